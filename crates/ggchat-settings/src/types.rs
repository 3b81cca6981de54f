//! Settings sections.
//!
//! Every struct is `camelCase` on disk with `#[serde(default)]`, so a
//! partial file only needs the keys it changes.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    /// Listener and per-connection transport settings.
    pub server: ServerSettings,
    /// Credential and login settings.
    pub auth: AuthSettings,
    /// External chat bridge settings.
    pub bridge: BridgeSettings,
    /// Poll store settings.
    pub polls: PollSettings,
    /// Logging settings.
    pub logging: LoggingSettings,
}

impl RelaySettings {
    /// Reject combinations that would leave the relay unusable.
    pub fn validate(&self) -> Result<()> {
        if self.server.max_connections == 0 {
            return Err(SettingsError::InvalidValue(
                "server.maxConnections must be at least 1".into(),
            ));
        }
        if self.server.send_queue_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "server.sendQueueCapacity must be at least 1".into(),
            ));
        }
        if self.server.heartbeat_timeout_secs <= self.server.heartbeat_interval_secs {
            return Err(SettingsError::InvalidValue(
                "server.heartbeatTimeoutSecs must exceed heartbeatIntervalSecs".into(),
            ));
        }
        if self.auth.credential_ttl_secs <= 0 {
            return Err(SettingsError::InvalidValue(
                "auth.credentialTtlSecs must be positive".into(),
            ));
        }
        if self.polls.max_polls == Some(0) {
            return Err(SettingsError::InvalidValue(
                "polls.maxPolls must be at least 1 when set".into(),
            ));
        }
        let bridge = &self.bridge;
        // Mirrored messages come back through the inbound gate without it.
        if bridge.webhook_url.is_some()
            && bridge.inbound_secret.is_some()
            && bridge.bot_author_id.is_none()
        {
            return Err(SettingsError::InvalidValue(
                "bridge.botAuthorId is required when webhookUrl and inboundSecret are both set"
                    .into(),
            ));
        }
        Ok(())
    }
}

/// Listener and transport settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Admitted connections allowed at once.
    pub max_connections: usize,
    /// Outbound frames buffered per connection before it counts as stuck.
    pub send_queue_capacity: usize,
    /// Per-write transport timeout in milliseconds.
    pub send_timeout_ms: u64,
    /// Ping interval in seconds.
    pub heartbeat_interval_secs: u64,
    /// Silence after which a connection is dropped, in seconds.
    pub heartbeat_timeout_secs: u64,
    /// Largest accepted inbound frame in bytes.
    pub max_message_size: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8800,
            max_connections: 256,
            send_queue_capacity: 256,
            send_timeout_ms: 5_000,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 90,
            max_message_size: 64 * 1024,
        }
    }
}

/// Credential and login settings.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSettings {
    /// Credential lifetime in seconds.
    pub credential_ttl_secs: i64,
    /// HS256 signing secret. Generated per process when absent, which
    /// invalidates credentials on every restart.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signing_secret: Option<String>,
    /// Lifetime of a pending browser login in seconds.
    pub login_ttl_secs: u64,
    /// OAuth application settings.
    pub oauth: OAuthSettings,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            credential_ttl_secs: 7 * 24 * 60 * 60,
            signing_secret: None,
            login_ttl_secs: 600,
            oauth: OAuthSettings::default(),
        }
    }
}

impl std::fmt::Debug for AuthSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSettings")
            .field("credential_ttl_secs", &self.credential_ttl_secs)
            .field("signing_secret", &self.signing_secret.as_ref().map(|_| "<redacted>"))
            .field("login_ttl_secs", &self.login_ttl_secs)
            .field("oauth", &self.oauth)
            .finish()
    }
}

/// OAuth application settings.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OAuthSettings {
    /// Provider API root.
    pub api_base: String,
    /// Application client ID.
    pub client_id: String,
    /// Application client secret.
    pub client_secret: String,
    /// Redirect registered with the provider.
    pub redirect_uri: String,
    /// Guild the user must belong to.
    pub guild_id: String,
    /// Bot token for membership lookups.
    pub bot_token: String,
    /// Role ID that marks officers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub officer_role_id: Option<String>,
}

impl Default for OAuthSettings {
    fn default() -> Self {
        Self {
            api_base: "https://discord.com/api".to_string(),
            client_id: String::new(),
            client_secret: String::new(),
            redirect_uri: "http://localhost:8800/auth/callback".to_string(),
            guild_id: String::new(),
            bot_token: String::new(),
            officer_role_id: None,
        }
    }
}

impl OAuthSettings {
    /// Whether enough is configured to run the browser login.
    pub fn is_configured(&self) -> bool {
        !self.client_id.is_empty() && !self.guild_id.is_empty()
    }
}

impl std::fmt::Debug for OAuthSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthSettings")
            .field("api_base", &self.api_base)
            .field("client_id", &self.client_id)
            .field("redirect_uri", &self.redirect_uri)
            .field("guild_id", &self.guild_id)
            .field("officer_role_id", &self.officer_role_id)
            .finish_non_exhaustive()
    }
}

/// External chat bridge settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BridgeSettings {
    /// Webhook receiving mirrored chat. Mirroring is off when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    /// Shared secret required on `POST /bridge/messages`. Injection is off when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inbound_secret: Option<String>,
    /// Author ID of the bridge's own bot, filtered to prevent echo loops.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bot_author_id: Option<String>,
    /// Only inject messages from this channel.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    /// Mirror jobs buffered before new ones are dropped.
    pub queue_capacity: usize,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            webhook_url: None,
            inbound_secret: None,
            bot_author_id: None,
            channel_id: None,
            queue_capacity: 256,
        }
    }
}

/// Poll store settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PollSettings {
    /// Oldest polls are evicted past this count. Unbounded when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_polls: Option<usize>,
}

/// Logging settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Filter directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of the compact format.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
