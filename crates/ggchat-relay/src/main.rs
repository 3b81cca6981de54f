//! # ggchat-relay
//!
//! GG Chat relay binary. Loads settings, wires the credential issuer, the
//! optional login provider and bridge into the relay server, and serves
//! until Ctrl-C.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::builder::RangedU64ValueParser;
use clap::{Args, Parser, Subcommand};
use ggchat_auth::{CredentialIssuer, DiscordConfig, DiscordProvider, ExternalIdentity, GuildMembership};
use ggchat_server::shutdown::DRAIN_TIMEOUT;
use ggchat_server::{
    InboundFilter, InboundGate, MirrorWorker, QueuedMirror, RelayServer, ServerConfig, WebhookSink,
};
use ggchat_settings::{OAuthSettings, RelaySettings};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// GG Chat relay server.
#[derive(Parser, Debug)]
#[command(name = "ggchat-relay", about = "GG Chat relay server")]
struct Cli {
    /// Settings file (defaults to `~/.ggchat/settings.json`).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Log filter used when `RUST_LOG` is unset.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the relay (default).
    Serve(ServeArgs),
    /// Print a signed credential for an operator or test account.
    Issue(IssueArgs),
}

#[derive(Args, Debug, Default)]
struct ServeArgs {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Maximum admitted connections (overrides settings).
    #[arg(long, value_parser = RangedU64ValueParser::<usize>::new().range(1..))]
    max_connections: Option<usize>,
}

#[derive(Args, Debug)]
struct IssueArgs {
    /// Subject ID embedded in the credential.
    #[arg(long)]
    subject: String,

    /// Display name shown to other users.
    #[arg(long)]
    name: String,

    /// Issue with the officer role.
    #[arg(long)]
    officer: bool,
}

impl Cli {
    fn load_settings(&self) -> Result<RelaySettings> {
        let path = self
            .settings
            .clone()
            .unwrap_or_else(ggchat_settings::settings_path);
        ggchat_settings::load_settings_from_path(&path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))
    }
}

fn init_logging(cli: &Cli, settings: &RelaySettings) {
    let level = cli.log_level.as_deref().unwrap_or(&settings.logging.level);
    if settings.logging.json {
        ggchat_core::logging::init_json_subscriber(level);
    } else {
        ggchat_core::logging::init_subscriber(level);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Wiring
// ─────────────────────────────────────────────────────────────────────────────

/// Configured secret, or a fresh random one for this process.
fn signing_secret(settings: &RelaySettings) -> Vec<u8> {
    if let Some(secret) = settings.auth.signing_secret.as_deref() {
        return secret.as_bytes().to_vec();
    }
    warn!("auth.signingSecret not set; credentials will not survive a restart");
    rand::random::<[u8; 32]>().to_vec()
}

fn server_config(settings: &RelaySettings, args: &ServeArgs) -> ServerConfig {
    let mut config = ServerConfig::from(&settings.server);
    if let Some(host) = &args.host {
        config.host.clone_from(host);
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(max) = args.max_connections {
        config.max_connections = max;
    }
    config
}

fn discord_config(oauth: &OAuthSettings) -> DiscordConfig {
    DiscordConfig {
        api_base: oauth.api_base.clone(),
        client_id: oauth.client_id.clone(),
        client_secret: oauth.client_secret.clone(),
        redirect_uri: oauth.redirect_uri.clone(),
        guild_id: oauth.guild_id.clone(),
        bot_token: oauth.bot_token.clone(),
        officer_role_id: oauth.officer_role_id.clone(),
    }
}

/// Build the server and spawn its background workers.
///
/// Must be called inside a runtime; worker handles stop on the server's
/// shutdown token.
fn build_server(
    settings: &RelaySettings,
    config: ServerConfig,
    secret: &[u8],
) -> (RelayServer, Vec<JoinHandle<()>>) {
    let mut handles = Vec::new();
    let issuer = CredentialIssuer::with_ttl(secret, settings.auth.credential_ttl_secs);
    let mut server = RelayServer::new(config, secret)
        .with_issuer(issuer)
        .with_max_polls(settings.polls.max_polls)
        .with_login_ttl(Duration::from_secs(settings.auth.login_ttl_secs));

    if settings.auth.oauth.is_configured() {
        let provider = DiscordProvider::new(discord_config(&settings.auth.oauth));
        server = server.with_identity_provider(Arc::new(provider));
        info!("browser login enabled");
    } else {
        info!("oauth not configured, browser login disabled");
    }

    let bridge = &settings.bridge;
    if let Some(url) = &bridge.webhook_url {
        let (mirror, rx) = QueuedMirror::channel(bridge.queue_capacity.max(1));
        let worker = MirrorWorker::new(rx, Arc::new(WebhookSink::new(url.clone())));
        handles.push(tokio::spawn(worker.run(server.shutdown().token())));
        server = server.with_mirror(Arc::new(mirror));
        info!("outbound bridge enabled");
    }

    if let Some(secret) = &bridge.inbound_secret {
        let filter = InboundFilter {
            bot_author_id: bridge.bot_author_id.clone(),
            channel_id: bridge.channel_id.clone(),
        };
        server = server.with_inbound_bridge(InboundGate::new(secret.clone(), filter));
        info!("inbound bridge enabled");
    }

    (server, handles)
}

/// Mint a credential with the configured secret.
fn issue(settings: &RelaySettings, args: &IssueArgs) -> Result<String> {
    let Some(secret) = settings.auth.signing_secret.as_deref() else {
        bail!("auth.signingSecret must be set to issue credentials the relay will accept");
    };
    let membership = if args.officer {
        GuildMembership::officer()
    } else {
        GuildMembership::member()
    };
    let issued = CredentialIssuer::with_ttl(secret.as_bytes(), settings.auth.credential_ttl_secs)
        .issue(&ExternalIdentity::new(&args.subject, &args.name), membership)
        .context("Failed to sign credential")?;
    Ok(issued.token)
}

async fn serve(settings: &RelaySettings, args: &ServeArgs) -> Result<()> {
    let secret = signing_secret(settings);
    let (server, mut handles) = build_server(settings, server_config(settings, args), &secret);

    let (addr, listener) = server.listen().await.context("Failed to bind server")?;
    handles.push(listener);
    info!("GG Chat relay listening on ws://{addr}/ws");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    info!("Shutting down...");
    if !server.shutdown().drain(handles, DRAIN_TIMEOUT).await {
        warn!("some tasks did not stop in time");
    }
    info!("Shutdown complete");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = cli.load_settings()?;
    init_logging(&cli, &settings);

    match &cli.command {
        Some(Command::Issue(args)) => {
            println!("{}", issue(&settings, args)?);
            Ok(())
        }
        Some(Command::Serve(args)) => serve(&settings, args).await,
        None => serve(&settings, &ServeArgs::default()).await,
    }
}
