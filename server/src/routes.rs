//! HTTP route handlers for the wspub server.
//!
//! The server runs two listeners, each with its own router:
//!
//! Publisher/admin ([`create_publisher_router`]):
//!
//! - `GET /streams` - List live streams
//! - `DELETE /streams/{stream}` - Close a stream and revoke its tokens
//! - `POST /streams/{stream}/tokens` - Issue a subscriber token
//! - `DELETE /streams/{stream}/tokens/{token}` - Revoke a token
//! - `GET /streams/{stream}/publish` - WebSocket publishing endpoint
//! - `GET /health` - Health check endpoint
//!
//! Subscriber ([`create_subscriber_router`]):
//!
//! - `GET /streams/{stream}/tokens/{token}` - WebSocket subscription endpoint
//! - `GET /health` - Health check endpoint
//!
//! # Architecture
//!
//! All routes share application state through [`AppState`], which contains:
//! - Configuration
//! - The stream registrar and the token manager
//! - Server start time for uptime reporting
//!
//! # Example
//!
//! ```rust,no_run
//! use wspub_server::config::Config;
//! use wspub_server::routes::{create_publisher_router, create_subscriber_router, AppState};
//!
//! #[tokio::main]
//! async fn main() {
//!     let state = AppState::new(Config::default());
//!     let publishers = create_publisher_router(state.clone());
//!     let subscribers = create_subscriber_router(state);
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8081").await.unwrap();
//!     tokio::spawn(async move { axum::serve(listener, subscribers).await });
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await.unwrap();
//!     axum::serve(listener, publishers).await.unwrap();
//! }
//! ```

use std::fmt;
use std::pin::pin;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, Message},
        Path, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::Response,
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, trace, warn};

use crate::config::Config;
use crate::error::{Result, ServerError};
use crate::hub::Hub;
use crate::registrar::Registrar;
use crate::tokens::{Token, TokenManager};
use crate::types::Frame;

// ============================================================================
// Application State
// ============================================================================

/// Shared application state for all route handlers.
///
/// Both routers share one state, so a token issued on the publisher listener
/// is immediately valid on the subscriber listener.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<Config>,

    /// Directory of live streams.
    pub registrar: Arc<Registrar>,

    /// Subscriber token grants.
    pub tokens: Arc<TokenManager>,

    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    /// Creates a new application state with the given configuration.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use wspub_server::routes::AppState;
    /// use wspub_server::config::Config;
    ///
    /// let config = Config::from_env().expect("failed to load config");
    /// let state = AppState::new(config);
    /// ```
    #[must_use]
    pub fn new(config: Config) -> Self {
        let registrar = Registrar::new(config.queue_capacity);
        Self {
            config: Arc::new(config),
            registrar: Arc::new(registrar),
            tokens: Arc::new(TokenManager::new()),
            start_time: Instant::now(),
        }
    }
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("streams", &self.registrar.len())
            .field("tokens", &self.tokens.len())
            .field("start_time", &self.start_time)
            .finish()
    }
}

// ============================================================================
// Routers
// ============================================================================

/// Creates the publisher/admin router.
pub fn create_publisher_router(state: AppState) -> Router {
    Router::new()
        .route("/streams", get(list_streams))
        .route("/streams/{stream}", delete(delete_stream))
        .route("/streams/{stream}/tokens", post(issue_token))
        .route("/streams/{stream}/tokens/{token}", delete(revoke_token))
        .route("/streams/{stream}/publish", get(publish))
        .route("/health", get(get_health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Creates the subscriber router.
pub fn create_subscriber_router(state: AppState) -> Router {
    Router::new()
        .route("/streams/{stream}/tokens/{token}", get(subscribe))
        .route("/health", get(get_health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============================================================================
// Stream administration
// ============================================================================

/// One entry of the `GET /streams` listing.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StreamSummary {
    pub id: String,
    pub created: DateTime<Utc>,
    /// Subscribers currently attached to the stream's hub.
    pub connections: usize,
}

/// GET /streams - List live streams.
///
/// Streams whose hub terminated between the snapshot and the stats query are
/// reported with zero connections.
async fn list_streams(State(state): State<AppState>) -> Json<Vec<StreamSummary>> {
    let mut summaries = Vec::new();
    for stream in state.registrar.list_streams() {
        let connections = stream
            .hub()
            .stats()
            .await
            .map_or(0, |stats| stats.connections);
        summaries.push(StreamSummary {
            id: stream.id,
            created: stream.created,
            connections,
        });
    }
    summaries.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.id.cmp(&b.id)));
    Json(summaries)
}

/// DELETE /streams/{stream} - Close a stream.
///
/// Revokes every token issued for the stream, then shuts the hub down,
/// disconnecting every subscriber.
async fn delete_stream(
    State(state): State<AppState>,
    Path(stream): Path<String>,
) -> Result<StatusCode> {
    // Revoke first so no new subscriber can validate against the stream.
    let revoked = state.tokens.revoke_all_for_stream(&stream);
    let closed = state.registrar.close(&stream);
    disconnect_holders(&state.registrar, &stream, &revoked);

    if !closed {
        return Err(ServerError::stream_not_found(stream));
    }
    info!(stream = %stream, revoked = revoked.len(), "Stream deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Disconnects holders of `revoked` from whatever hub now serves `stream`.
///
/// A publisher may recreate the stream while it is being deleted; subscribers
/// admitted to that new hub under a revoked token must not stay attached.
fn disconnect_holders(registrar: &Registrar, stream: &str, revoked: &[Token]) {
    let Some(hub) = registrar.get_existing_hub(stream) else {
        return;
    };
    for token in revoked {
        hub.revoke_token(*token);
    }
    debug!(stream, tokens = revoked.len(), "Disconnected holders on recreated stream");
}

/// Response body for token issuance.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenResponse {
    pub stream: String,
    pub token: Token,
}

/// POST /streams/{stream}/tokens - Issue a subscriber token.
///
/// # Responses
///
/// - `200 OK` - `{"stream": "...", "token": "<uuid>"}`
/// - `404 Not Found` - No such stream
async fn issue_token(
    State(state): State<AppState>,
    Path(stream): Path<String>,
) -> Result<Json<TokenResponse>> {
    if state.registrar.get_existing_hub(&stream).is_none() {
        return Err(ServerError::stream_not_found(stream));
    }

    let token = Token::random();
    state.tokens.issue(&stream, token);
    Ok(Json(TokenResponse { stream, token }))
}

/// DELETE /streams/{stream}/tokens/{token} - Revoke a token.
///
/// The grant is removed only if it belongs to this stream. Subscribers holding
/// the token on this stream are disconnected either way; a token that never
/// parsed as a token cannot be held by anyone.
async fn revoke_token(
    State(state): State<AppState>,
    Path((stream, token)): Path<(String, String)>,
) -> Result<StatusCode> {
    let Some(hub) = state.registrar.get_existing_hub(&stream) else {
        return Err(ServerError::stream_not_found(stream));
    };

    if let Ok(token) = token.parse::<Token>() {
        let removed = state.tokens.revoke(&stream, token);
        hub.revoke_token(token);
        info!(stream = %stream, token = %token, removed, "Token revoked");
    } else {
        debug!(stream = %stream, "Revocation for malformed token ignored");
    }
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// GET /streams/{stream}/publish - Publishing
// ============================================================================

/// GET /streams/{stream}/publish - WebSocket publishing endpoint.
///
/// Creates the stream if it does not exist yet. Every text or binary message
/// the publisher sends is broadcast to the stream's subscribers. Several
/// publishers may feed one stream; a disconnecting publisher leaves the stream
/// open.
///
/// # Responses
///
/// - `101 Switching Protocols` - WebSocket upgrade successful
/// - `400 Bad Request` - Not a WebSocket upgrade request
async fn publish(
    State(state): State<AppState>,
    Path(stream): Path<String>,
    ws: std::result::Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response> {
    let ws = ws.map_err(|rejection| ServerError::websocket(rejection.body_text()))?;

    let hub = state.registrar.get_or_create_hub(&stream);
    info!(stream = %stream, "Publisher connecting");

    Ok(ws.on_upgrade(move |socket| async move {
        let (sink, inbound) = socket.split();
        run_publisher(hub, sink, inbound).await;
    }))
}

/// Forwards publisher messages to `hub` until the publisher leaves or the
/// stream is closed.
async fn run_publisher<K, S, E>(hub: Hub, sink: K, inbound: S)
where
    K: Sink<Message>,
    K::Error: fmt::Display,
    S: Stream<Item = std::result::Result<Message, E>>,
    E: fmt::Display,
{
    let mut sink = pin!(sink);
    let mut inbound = pin!(inbound);

    let forward = async {
        while let Some(message) = inbound.next().await {
            match message {
                Ok(Message::Close(_)) => {
                    debug!(stream = %hub.stream(), "Publisher sent close frame");
                    break;
                }
                Ok(message) => match Frame::from_message(message) {
                    Some(frame) => {
                        trace!(stream = %hub.stream(), bytes = frame.len(), "Publishing frame");
                        hub.broadcast(frame);
                    }
                    None => trace!(stream = %hub.stream(), "Ignoring control frame"),
                },
                Err(err) => {
                    warn!(stream = %hub.stream(), error = %err, "Error reading publisher websocket");
                    break;
                }
            }
        }
    };

    tokio::select! {
        () = forward => {}
        () = hub.terminated() => {
            info!(stream = %hub.stream(), "Stream closed, disconnecting publisher");
        }
    }

    if let Err(err) = sink.close().await {
        trace!(stream = %hub.stream(), error = %err, "Publisher socket already closed");
    }
    info!(stream = %hub.stream(), "Publisher disconnected");
}

// ============================================================================
// GET /streams/{stream}/tokens/{token} - Subscription
// ============================================================================

/// GET /streams/{stream}/tokens/{token} - WebSocket subscription endpoint.
///
/// The stream and token are checked before the upgrade, so a rejected
/// subscriber never reaches the hub.
///
/// # Responses
///
/// - `101 Switching Protocols` - WebSocket upgrade successful
/// - `400 Bad Request` - Not a WebSocket upgrade request
/// - `401 Unauthorized` - Token is not valid for this stream
/// - `404 Not Found` - No such stream
async fn subscribe(
    State(state): State<AppState>,
    Path((stream, token)): Path<(String, String)>,
    ws: std::result::Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response> {
    let Some(hub) = state.registrar.get_existing_hub(&stream) else {
        debug!(stream = %stream, "Subscription to unknown stream");
        return Err(ServerError::stream_not_found(stream));
    };

    let token = match token.parse::<Token>() {
        Ok(token) if state.tokens.validate(&stream, token) => token,
        _ => {
            debug!(stream = %stream, "Invalid token in subscription request");
            return Err(ServerError::unauthorized(stream));
        }
    };

    let ws = ws.map_err(|rejection| ServerError::websocket(rejection.body_text()))?;
    info!(stream = %stream, token = %token, "Subscriber connecting");

    let tokens = Arc::clone(&state.tokens);
    Ok(ws.on_upgrade(move |socket| async move {
        // The token may have been revoked while the handshake completed.
        if !tokens.validate(hub.stream(), token) {
            debug!(stream = %hub.stream(), token = %token, "Token revoked during upgrade");
            return;
        }
        hub.handle_connection(token, socket).await;
    }))
}

// ============================================================================
// GET /health - Health Check
// ============================================================================

/// Response body for health check endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Server status (always "ok" if responding).
    pub status: String,

    /// Number of live streams.
    pub streams: usize,

    /// Server uptime in seconds.
    pub uptime_seconds: u64,
}

/// GET /health - Health check endpoint.
///
/// ```json
/// {
///   "status": "ok",
///   "streams": 3,
///   "uptime_seconds": 3600
/// }
/// ```
async fn get_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        streams: state.registrar.len(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}

// ============================================================================
// Tests
// ============================================================================
