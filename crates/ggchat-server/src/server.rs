//! `RelayServer`: Axum HTTP + WebSocket surface.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Json, Response};
use axum::routing::{get, post};
use ggchat_auth::{
    AuthError, CredentialIssuer, CredentialVerifier, IdentityProvider, LoginStart, LoginStatus,
    PendingLogins, Rejection,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::bridge::{BRIDGE_SECRET_HEADER, InboundGate, InboundMessage, Mirror, NoopMirror};
use crate::config::ServerConfig;
use crate::errors::ServerError;
use crate::health::HealthResponse;
use crate::polls::PollStore;
use crate::router::MessageRouter;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::registry::ConnectionRegistry;
use crate::websocket::session::{SessionContext, reject, run_session};

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Live connections.
    pub registry: Arc<ConnectionRegistry>,
    /// Frame router.
    pub router: Arc<MessageRouter>,
    /// Poll store, for health reporting.
    pub polls: Arc<PollStore>,
    /// Credential verifier for `/ws`.
    pub verifier: Arc<CredentialVerifier>,
    /// Credential issuer for `/auth/callback`.
    pub issuer: Arc<CredentialIssuer>,
    /// In-flight logins.
    pub logins: Arc<PendingLogins>,
    /// External identity provider, when login is configured.
    pub provider: Option<Arc<dyn IdentityProvider>>,
    /// Inbound bridge guard, when injection is enabled.
    pub inbound: Option<Arc<InboundGate>>,
    /// Server limits.
    pub config: Arc<ServerConfig>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
}

impl AppState {
    fn session_context(&self) -> SessionContext {
        SessionContext {
            registry: self.registry.clone(),
            router: self.router.clone(),
            config: self.config.clone(),
            shutdown: self.shutdown.token(),
        }
    }
}

/// The relay server.
pub struct RelayServer {
    config: Arc<ServerConfig>,
    registry: Arc<ConnectionRegistry>,
    polls: Arc<PollStore>,
    mirror: Arc<dyn Mirror>,
    router: Arc<MessageRouter>,
    verifier: Arc<CredentialVerifier>,
    issuer: Arc<CredentialIssuer>,
    logins: Arc<PendingLogins>,
    provider: Option<Arc<dyn IdentityProvider>>,
    inbound: Option<Arc<InboundGate>>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
}

impl RelayServer {
    /// Server signing and verifying credentials with `secret`.
    pub fn new(config: ServerConfig, secret: &[u8]) -> Self {
        let registry = Arc::new(ConnectionRegistry::new(config.max_connections));
        let polls = Arc::new(PollStore::new());
        let mirror: Arc<dyn Mirror> = Arc::new(NoopMirror);
        let router = Arc::new(MessageRouter::with_mirror(
            registry.clone(),
            polls.clone(),
            mirror.clone(),
        ));
        Self {
            config: Arc::new(config),
            registry,
            polls,
            mirror,
            router,
            verifier: Arc::new(CredentialVerifier::new(secret)),
            issuer: Arc::new(CredentialIssuer::new(secret)),
            logins: Arc::new(PendingLogins::default()),
            provider: None,
            inbound: None,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
        }
    }

    /// Replace the credential issuer (e.g. for a custom lifetime).
    #[must_use]
    pub fn with_issuer(mut self, issuer: CredentialIssuer) -> Self {
        self.issuer = Arc::new(issuer);
        self
    }

    /// Mirror chat lines to `mirror`.
    #[must_use]
    pub fn with_mirror(mut self, mirror: Arc<dyn Mirror>) -> Self {
        self.mirror = mirror;
        self.rebuild_router();
        self
    }

    /// Cap the number of stored polls.
    #[must_use]
    pub fn with_max_polls(mut self, max_polls: Option<usize>) -> Self {
        self.polls = Arc::new(PollStore::with_limit(max_polls));
        self.rebuild_router();
        self
    }

    /// Enable `/auth/*` with an identity provider.
    #[must_use]
    pub fn with_identity_provider(mut self, provider: Arc<dyn IdentityProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Lifetime of pending logins.
    #[must_use]
    pub fn with_login_ttl(mut self, ttl: Duration) -> Self {
        self.logins = Arc::new(PendingLogins::new(ttl));
        self
    }

    /// Enable `POST /bridge/messages`.
    #[must_use]
    pub fn with_inbound_bridge(mut self, gate: InboundGate) -> Self {
        self.inbound = Some(Arc::new(gate));
        self
    }

    fn rebuild_router(&mut self) {
        self.router = Arc::new(MessageRouter::with_mirror(
            self.registry.clone(),
            self.polls.clone(),
            self.mirror.clone(),
        ));
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            registry: self.registry.clone(),
            router: self.router.clone(),
            polls: self.polls.clone(),
            verifier: self.verifier.clone(),
            issuer: self.issuer.clone(),
            logins: self.logins.clone(),
            provider: self.provider.clone(),
            inbound: self.inbound.clone(),
            config: self.config.clone(),
            shutdown: self.shutdown.clone(),
            start_time: self.start_time,
        };

        Router::new()
            .route("/health", get(health_handler))
            .route("/online", get(online_handler))
            .route("/ws", get(ws_handler))
            .route("/auth/start", get(auth_start_handler))
            .route("/auth/callback", get(auth_callback_handler))
            .route("/auth/token", get(auth_token_handler))
            .route("/bridge/messages", post(bridge_inbound_handler))
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Bind the configured address and serve until shutdown.
    ///
    /// Returns the bound address (useful with port 0) and the serve task.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>), ServerError> {
        let addr = self.config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local = listener.local_addr()?;
        let app = self.router();
        let token = self.shutdown.token();

        let handle = tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = served {
                error!(error = %e, "server stopped with error");
            }
        });
        info!(addr = %local, "relay listening");
        Ok((local, handle))
    }

    /// Connection registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Message router.
    pub fn message_router(&self) -> &Arc<MessageRouter> {
        &self.router
    }

    /// Poll store.
    pub fn polls(&self) -> &Arc<PollStore> {
        &self.polls
    }

    /// Credential issuer.
    pub fn issuer(&self) -> &Arc<CredentialIssuer> {
        &self.issuer
    }

    /// Pending login table.
    pub fn logins(&self) -> &Arc<PendingLogins> {
        &self.logins
    }

    /// Shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse::snapshot(
        state.start_time,
        state.shutdown.is_shutting_down(),
        state.registry.count(),
        state.polls.len(),
    ))
}

/// Body of `GET /online`.
#[derive(Debug, Serialize)]
struct OnlineResponse {
    online: usize,
    users: Vec<String>,
}

/// GET /online
async fn online_handler(State(state): State<AppState>) -> Json<OnlineResponse> {
    let identities = state.registry.enumerate();
    Json(OnlineResponse {
        online: identities.len(),
        users: state.registry.online_names(),
    })
}

#[derive(Debug, Deserialize)]
struct WsParams {
    token: Option<String>,
}

/// GET /ws?token=...
///
/// The credential is checked before admission. A rejected socket is still
/// upgraded so the client receives a 4001 close frame with the reason.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
) -> Response {
    let ws = ws.max_message_size(state.config.max_message_size);
    let verdict = match params.token.as_deref() {
        Some(token) => state.verifier.verify(token),
        None => Err(Rejection::Malformed),
    };
    match verdict {
        Ok(credential) => {
            let identity = credential.identity();
            let ctx = state.session_context();
            ws.on_upgrade(move |socket| run_session(socket, identity, ctx))
        }
        Err(rejection) => ws.on_upgrade(move |socket| reject(socket, rejection)),
    }
}

fn error_body(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

/// GET /auth/start
async fn auth_start_handler(State(state): State<AppState>) -> Response {
    let Some(provider) = &state.provider else {
        return error_body(StatusCode::SERVICE_UNAVAILABLE, "login is not configured");
    };
    let correlation_id = state.logins.begin();
    let start = LoginStart {
        authorization_url: provider.authorization_url(&correlation_id),
        correlation_id,
    };
    debug!(correlation_id = %start.correlation_id, "login started");
    Json(start).into_response()
}

#[derive(Debug, Deserialize)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
}

const LOGIN_COMPLETE_HTML: &str = "<!doctype html><title>GG Chat</title>\
<h1>Login complete</h1><p>You can close this window and return to GG Chat.</p>";

/// GET /auth/callback?code=..&state=..
async fn auth_callback_handler(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> Response {
    let (Some(code), Some(correlation_id)) = (params.code, params.state) else {
        return error_body(StatusCode::BAD_REQUEST, "missing code or state");
    };
    if !state.logins.is_pending(&correlation_id) {
        return error_body(StatusCode::BAD_REQUEST, "unknown or expired login");
    }
    let Some(provider) = &state.provider else {
        return error_body(StatusCode::SERVICE_UNAVAILABLE, "login is not configured");
    };

    let resolved = match provider.resolve(&code).await {
        Ok(resolved) => resolved,
        Err(e) => {
            warn!(error = %e, "identity provider failed");
            return error_body(StatusCode::BAD_GATEWAY, "identity provider failed");
        }
    };

    let issued = match state.issuer.issue(&resolved.identity, resolved.membership) {
        Ok(issued) => issued,
        Err(AuthError::NotAMember(user)) => {
            info!(user = %user, "login refused, not a guild member");
            return (
                StatusCode::FORBIDDEN,
                Html("<h1>Access denied</h1><p>You are not a member of the guild.</p>"),
            )
                .into_response();
        }
        Err(e) => {
            error!(error = %e, "credential signing failed");
            return error_body(StatusCode::INTERNAL_SERVER_ERROR, "credential signing failed");
        }
    };

    if let Err(e) = state.logins.complete(&correlation_id, issued.token) {
        warn!(error = %e, "login expired during callback");
        return error_body(StatusCode::BAD_REQUEST, "unknown or expired login");
    }
    info!(
        subject = %issued.claims.subject_id,
        role = ?issued.claims.role,
        "credential issued"
    );
    Html(LOGIN_COMPLETE_HTML).into_response()
}

#[derive(Debug, Deserialize)]
struct TokenParams {
    correlation_id: String,
}

/// GET /auth/token?correlation_id=..
async fn auth_token_handler(
    State(state): State<AppState>,
    Query(params): Query<TokenParams>,
) -> Response {
    match state.logins.poll(&params.correlation_id) {
        LoginStatus::Ready(credential) => {
            Json(json!({ "status": "ready", "credential": credential })).into_response()
        }
        LoginStatus::Pending => Json(json!({ "status": "pending" })).into_response(),
        LoginStatus::Unknown => {
            (StatusCode::NOT_FOUND, Json(json!({ "status": "unknown" }))).into_response()
        }
    }
}

/// POST /bridge/messages
async fn bridge_inbound_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(message): Json<InboundMessage>,
) -> Response {
    let Some(gate) = &state.inbound else {
        return error_body(StatusCode::NOT_FOUND, "bridge injection is disabled");
    };
    let presented = headers
        .get(BRIDGE_SECRET_HEADER)
        .and_then(|v| v.to_str().ok());
    if !gate.authorizes(presented) {
        return error_body(StatusCode::UNAUTHORIZED, "bad bridge secret");
    }
    if !gate.filter().accepts(&message) {
        debug!(author_id = %message.author_id, "filtered inbound bridge message");
        return Json(json!({ "injected": false })).into_response();
    }
    let recipients = state.router.inject_external(&message);
    Json(json!({ "injected": true, "recipients": recipients })).into_response()
}
