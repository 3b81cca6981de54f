//! External identity provider.
//!
//! [`IdentityProvider`] is the seam the HTTP callback calls through. The
//! Discord implementation exchanges the OAuth code for a user token, reads
//! the user, then checks guild membership with the bot token.

use async_trait::async_trait;
use serde::Deserialize;

use crate::errors::AuthError;
use crate::issuer::{ExternalIdentity, GuildMembership};

/// Verified user plus their group standing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedIdentity {
    /// External user.
    pub identity: ExternalIdentity,
    /// Membership lookup result.
    pub membership: GuildMembership,
}

/// Source of verified external identities.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Browser URL that starts the login, carrying `state` back to the callback.
    fn authorization_url(&self, state: &str) -> String;

    /// Exchange an authorization code for a verified identity.
    async fn resolve(&self, code: &str) -> Result<ResolvedIdentity, AuthError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Discord
// ─────────────────────────────────────────────────────────────────────────────

/// Discord OAuth application settings.
#[derive(Clone, Debug)]
pub struct DiscordConfig {
    /// API root, overridable for tests.
    pub api_base: String,
    /// Application client ID.
    pub client_id: String,
    /// Application client secret.
    pub client_secret: String,
    /// Registered redirect (the relay's `/auth/callback`).
    pub redirect_uri: String,
    /// Guild the user must belong to.
    pub guild_id: String,
    /// Bot token used for the membership lookup.
    pub bot_token: String,
    /// Role that marks officers, if any.
    pub officer_role_id: Option<String>,
}

impl Default for DiscordConfig {
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

const SCOPES: &str = "identify guilds.members.read";

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct DiscordUser {
    id: String,
    username: String,
    #[serde(default)]
    global_name: Option<String>,
}

#[derive(Deserialize)]
struct GuildMember {
    #[serde(default)]
    nick: Option<String>,
    #[serde(default)]
    roles: Vec<String>,
}

/// Discord-backed [`IdentityProvider`].
#[derive(Debug, Clone)]
pub struct DiscordProvider {
    config: DiscordConfig,
    http: reqwest::Client,
}

impl DiscordProvider {
    /// Provider with a fresh HTTP client.
    pub fn new(config: DiscordConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    async fn exchange_code(&self, code: &str) -> Result<String, AuthError> {
        let form = [
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("scope", SCOPES),
        ];
        let resp = self
            .http
            .post(format!("{}/oauth2/token", self.config.api_base))
            .form(&form)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status != 200 {
            let text = resp.text().await.unwrap_or_default();
            return Err(AuthError::OAuth {
                status,
                message: text,
            });
        }
        let data: TokenResponse = resp.json().await?;
        Ok(data.access_token)
    }

    async fn fetch_user(&self, access_token: &str) -> Result<DiscordUser, AuthError> {
        let resp = self
            .http
            .get(format!("{}/users/@me", self.config.api_base))
            .bearer_auth(access_token)
            .send()
            .await?;
        let status = resp.status().as_u16();
        if status != 200 {
            let text = resp.text().await.unwrap_or_default();
            return Err(AuthError::OAuth {
                status,
                message: text,
            });
        }
        Ok(resp.json().await?)
    }

    async fn fetch_member(&self, user_id: &str) -> Result<Option<GuildMember>, AuthError> {
        let resp = self
            .http
            .get(format!(
                "{}/guilds/{}/members/{}",
                self.config.api_base, self.config.guild_id, user_id
            ))
            .header("Authorization", format!("Bot {}", self.config.bot_token))
            .send()
            .await?;
        if !resp.status().is_success() {
            tracing::info!(
                user_id,
                status = resp.status().as_u16(),
                "guild member lookup refused"
            );
            return Ok(None);
        }
        Ok(Some(resp.json().await?))
    }
}

#[async_trait]
impl IdentityProvider for DiscordProvider {
    fn authorization_url(&self, state: &str) -> String {
        format!(
            "{}/oauth2/authorize?client_id={}&redirect_uri={}&response_type=code&scope={}&state={}",
            self.config.api_base,
            urlencoded(&self.config.client_id),
            urlencoded(&self.config.redirect_uri),
            urlencoded(SCOPES),
            urlencoded(state),
        )
    }

    #[tracing::instrument(skip_all, fields(provider = "discord"))]
    async fn resolve(&self, code: &str) -> Result<ResolvedIdentity, AuthError> {
        let access_token = self.exchange_code(code).await?;
        let user = self.fetch_user(&access_token).await?;

        let Some(member) = self.fetch_member(&user.id).await? else {
            return Ok(ResolvedIdentity {
                identity: ExternalIdentity::new(&user.id, &user.username),
                membership: GuildMembership::outsider(),
            });
        };

        let is_officer = self
            .config
            .officer_role_id
            .as_ref()
            .is_some_and(|role| member.roles.iter().any(|r| r == role));
        let display_name = member
            .nick
            .or(user.global_name)
            .unwrap_or(user.username);

        Ok(ResolvedIdentity {
            identity: ExternalIdentity::new(user.id, display_name),
            membership: GuildMembership {
                is_member: true,
                is_officer,
            },
        })
    }
}

fn urlencoded(s: &str) -> String {
    s.replace('%', "%25")
        .replace(' ', "%20")
        .replace('&', "%26")
        .replace('=', "%3D")
        .replace('+', "%2B")
        .replace('/', "%2F")
        .replace(':', "%3A")
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
