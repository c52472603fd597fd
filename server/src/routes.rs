//! HTTP route handlers for the Sparq realtime server.
//!
//! This module provides the HTTP API endpoints:
//!
//! - `POST /events` - Ingest identity-addressed events from producer services
//! - `GET /ws` - WebSocket channel endpoint for clients
//! - `GET /session` - Session introspection for authenticated callers
//! - `GET /admin/stats` - Live connection statistics (admin only)
//! - `GET /health` - Health check endpoint
//!
//! # Architecture
//!
//! All routes share application state through [`AppState`]: configuration,
//! the session authenticator, the entitlement gate, the connection registry
//! and the event dispatcher. The registry is constructed once at startup and
//! handed to the state explicitly; nothing here is a process-wide singleton.
//!
//! The router carries the cross-origin policy from §configuration: only
//! allow-listed origins (plus the optional preview suffix) may issue
//! credentialed requests or open channels.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Query, State, WebSocketUpgrade},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, trace, warn};

use crate::auth::{extract_credential, SessionAuthenticator};
use crate::config::Config;
use crate::directory::DirectoryClient;
use crate::dispatch::EventDispatcher;
use crate::entitlement::{EntitlementError, EntitlementGate};
use crate::guard::{Admin, AuthRejection, PlanRejection};
use crate::registry::ConnectionRegistry;
use crate::token::{verify_producer_signature, SignatureError};
use crate::types::{Event, Identity};

// ============================================================================
// Constants
// ============================================================================

/// Header name for the producer identifier.
const HEADER_PRODUCER_ID: &str = "X-Producer-ID";

/// Header name for the Ed25519 signature.
const HEADER_SIGNATURE: &str = "X-Signature";

/// Maximum body size for event ingestion (64 KB).
const MAX_BODY_SIZE: usize = 64 * 1024;

// ============================================================================
// Application State
// ============================================================================

/// Shared application state for all route handlers.
///
/// Cloned per request; every field is either `Arc`-backed or itself a cheap
/// handle onto shared internals.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<Config>,

    /// Session authenticator for request and handshake credentials.
    pub authenticator: SessionAuthenticator,

    /// Entitlement gate for tier-gated handlers.
    pub entitlements: EntitlementGate,

    /// Registry of live channels per identity.
    pub registry: Arc<ConnectionRegistry>,

    /// Dispatcher delivering events onto registered channels.
    pub dispatcher: EventDispatcher,

    /// Producer id -> base64 Ed25519 public key, for ingest authentication.
    pub producer_keys: Arc<HashMap<String, String>>,

    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    /// Creates application state from its explicit collaborators.
    ///
    /// The registry and dispatcher are constructed here, tied to this
    /// state's lifetime; the directory client and verified session key are
    /// supplied by the caller so startup failures surface before any route
    /// is served.
    #[must_use]
    pub fn new(
        config: Config,
        directory: Arc<DirectoryClient>,
        session_key: VerifyingKey,
        producer_keys: HashMap<String, String>,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let dispatcher = EventDispatcher::new(Arc::clone(&registry));

        Self {
            config: Arc::new(config),
            authenticator: SessionAuthenticator::new(Arc::clone(&directory), session_key),
            entitlements: EntitlementGate::new(directory),
            registry,
            dispatcher,
            producer_keys: Arc::new(producer_keys),
            start_time: Instant::now(),
        }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &"<Config>")
            .field("registry", &self.registry)
            .field("producer_count", &self.producer_keys.len())
            .field("start_time", &self.start_time)
            .finish()
    }
}

// ============================================================================
// Router
// ============================================================================

/// Creates the application router with all routes configured.
///
/// # Returns
///
/// An axum `Router` with:
/// - `POST /events` - Producer event ingestion
/// - `GET /ws` - WebSocket channel endpoint
/// - `GET /session` - Session introspection
/// - `GET /admin/stats` - Admin connection statistics
/// - `GET /health` - Health check
///
/// wrapped in the CORS policy and request tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config);

    Router::new()
        .route("/events", post(post_events))
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .route("/ws", get(get_ws))
        .route("/session", get(get_session))
        .route("/admin/stats", get(get_admin_stats))
        .route("/health", get(get_health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Builds the CORS layer from the configured origin policy.
///
/// Credentialed requests require echoing a concrete origin, so the layer
/// uses a predicate over the allow-list rather than a wildcard.
fn cors_layer(config: &Config) -> CorsLayer {
    let config = config.clone();

    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(
            move |origin: &HeaderValue, _: &axum::http::request::Parts| {
                origin
                    .to_str()
                    .map(|o| config.origin_allowed(o))
                    .unwrap_or(false)
            },
        ))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true)
}

// ============================================================================
// Error Response Types
// ============================================================================

/// JSON error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    success: bool,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<String>,
}

impl ErrorResponse {
    fn new(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            code: None,
        }
    }

    fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

// ============================================================================
// POST /events - Producer Event Ingestion
// ============================================================================

/// Request body for event ingestion.
///
/// Accepts either a single event or an array of events.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum EventsPayload {
    Single(Event),
    Batch(Vec<Event>),
}

impl EventsPayload {
    /// Converts the payload into a vector of events.
    fn into_events(self) -> Vec<Event> {
        match self {
            Self::Single(event) => vec![event],
            Self::Batch(events) => events,
        }
    }
}

/// POST /events - Ingest identity-addressed events from producer services.
///
/// # Authentication
///
/// Requests must include:
/// - `X-Producer-ID` header: producer service identifier
/// - `X-Signature` header: Ed25519 signature of the raw request body
///
/// # Delivery
///
/// Each event is dispatched to the channels of its target identity.
/// Delivery is best-effort; a target with no open channels is not an error,
/// and a dead channel never fails the request.
///
/// # Responses
///
/// - `202 Accepted` - Events accepted and dispatched
/// - `400 Bad Request` - Invalid event format
/// - `401 Unauthorized` - Authentication failed
async fn post_events(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    // Extract required headers
    let producer_id = match headers.get(HEADER_PRODUCER_ID).and_then(|v| v.to_str().ok()) {
        Some(id) if !id.is_empty() => id,
        _ => {
            debug!("Missing or empty X-Producer-ID header");
            return (
                StatusCode::UNAUTHORIZED,
                Json(
                    ErrorResponse::new("missing X-Producer-ID header")
                        .with_code("missing_producer"),
                ),
            )
                .into_response();
        }
    };

    let signature = match headers.get(HEADER_SIGNATURE).and_then(|v| v.to_str().ok()) {
        Some(sig) if !sig.is_empty() => sig,
        _ => {
            debug!(producer = %producer_id, "Missing or empty X-Signature header");
            return (
                StatusCode::UNAUTHORIZED,
                Json(
                    ErrorResponse::new("missing X-Signature header")
                        .with_code("missing_signature"),
                ),
            )
                .into_response();
        }
    };

    // Verify signature over the raw body
    if let Err(err) = verify_producer_signature(producer_id, signature, &body, &state.producer_keys)
    {
        warn!(producer = %producer_id, error = %err, "Producer signature verification failed");
        let (error_msg, error_code) = match err {
            SignatureError::UnknownProducer(_) => ("unknown producer", "unknown_producer"),
            SignatureError::InvalidSignature => ("invalid signature", "invalid_signature"),
            SignatureError::InvalidBase64(_) => ("invalid signature encoding", "invalid_encoding"),
            SignatureError::InvalidPublicKey => ("server configuration error", "server_error"),
        };
        return (
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse::new(error_msg).with_code(error_code)),
        )
            .into_response();
    }

    // Parse request body
    let events_payload: EventsPayload = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(err) => {
            debug!(producer = %producer_id, error = %err, "Failed to parse event payload");
            return (
                StatusCode::BAD_REQUEST,
                Json(
                    ErrorResponse::new(format!("invalid event format: {err}"))
                        .with_code("invalid_format"),
                ),
            )
                .into_response();
        }
    };

    let events = events_payload.into_events();
    let event_count = events.len();

    // Every event must name a target identity
    for event in &events {
        if event.target_user_id.is_empty() {
            warn!(producer = %producer_id, "Event without target identity");
            return (
                StatusCode::BAD_REQUEST,
                Json(
                    ErrorResponse::new("event is missing a target identity")
                        .with_code("missing_target"),
                ),
            )
                .into_response();
        }
    }

    // Dispatch; delivery failures are local to individual channels and never
    // fail the request
    let mut delivered = 0;
    for event in events {
        trace!(
            producer = %producer_id,
            target = %event.target_user_id,
            kind = event.kind.as_str(),
            "Dispatching event"
        );
        delivered += state.dispatcher.emit(event);
    }

    info!(
        producer = %producer_id,
        event_count,
        delivered,
        "Events accepted and dispatched"
    );

    StatusCode::ACCEPTED.into_response()
}

// ============================================================================
// GET /ws - WebSocket Channels
// ============================================================================

/// Query parameters for the WebSocket endpoint.
#[derive(Debug, Deserialize)]
pub struct WsQueryParams {
    /// Session credential, for browser WebSocket clients which cannot set
    /// headers on the upgrade request.
    pub token: Option<String>,
}

/// Resolves the handshake credential for a channel.
///
/// Cookie and bearer header are checked first (same precedence as the HTTP
/// guards); the `token` query parameter is the fallback.
fn ws_credential(headers: &HeaderMap, params: &WsQueryParams) -> Option<String> {
    extract_credential(headers)
        .or_else(|| params.token.clone().filter(|t| !t.is_empty()))
}

/// GET /ws - WebSocket channel endpoint.
///
/// # Authentication
///
/// The upgrade request must carry the same credential format accepted by
/// the HTTP guards (cookie, bearer header, or `token` query parameter).
/// The credential is checked *before* the upgrade completes, so an
/// unauthenticated channel never exists and never touches the registry.
///
/// # Protocol
///
/// Once connected, the server pushes JSON text frames of the form
/// `{"event": "new_match" | "new_message", "target_user_id": ..., "payload": {...}}`.
/// The client is not expected to send anything beyond control frames.
///
/// # Responses
///
/// - `101 Switching Protocols` - Upgrade successful, channel registered
/// - `401 Unauthorized` - Invalid or missing credential
async fn get_ws(
    State(state): State<AppState>,
    Query(params): Query<WsQueryParams>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let credential = ws_credential(&headers, &params);

    let identity = match state.authenticator.authenticate(credential.as_deref()).await {
        Ok(identity) => identity,
        Err(err) => {
            debug!(error = %err, "Rejecting channel handshake");
            return AuthRejection(err).into_response();
        }
    };

    info!(user_id = %identity.id, "Channel handshake authenticated");

    let registry = Arc::clone(&state.registry);
    ws.on_upgrade(move |socket| handle_channel(socket, registry, identity))
}

/// Drives one established channel until disconnect.
///
/// Registers the channel, forwards queued events onto the socket from a
/// dedicated task, and unregisters on any exit path. A failed write is
/// treated as a disconnect of this channel only.
async fn handle_channel(
    socket: axum::extract::ws::WebSocket,
    registry: Arc<ConnectionRegistry>,
    identity: Identity,
) {
    use axum::extract::ws::Message;
    use futures_util::{SinkExt, StreamExt};

    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let channel_id = registry.register(identity.id.clone(), tx);
    info!(user_id = %identity.id, %channel_id, "Channel connected");

    // Forward queued events to the client. The queue decouples dispatch
    // from this socket's write speed: a slow client backs up only its own
    // queue.
    let forward_registry = Arc::clone(&registry);
    let forward_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => {
                    trace!(%channel_id, kind = event.kind.as_str(), "Writing event to channel");
                    if let Err(err) = sender.send(Message::Text(json.into())).await {
                        debug!(%channel_id, error = %err, "Channel write failed");
                        forward_registry.unregister(channel_id);
                        break;
                    }
                }
                Err(err) => {
                    error!(error = %err, "Failed to serialize event");
                }
            }
        }
    });

    // Wait for the client to go away
    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Close(_)) => {
                debug!(%channel_id, "Channel sent close frame");
                break;
            }
            Ok(Message::Ping(data)) => {
                // axum answers pongs automatically
                trace!(data_len = data.len(), "Received ping");
            }
            Ok(_) => {
                // Clients have nothing to say on this socket
            }
            Err(err) => {
                debug!(%channel_id, error = %err, "Channel error");
                break;
            }
        }
    }

    registry.unregister(channel_id);
    forward_task.abort();
    info!(user_id = %identity.id, %channel_id, "Channel disconnected");
}

// ============================================================================
// GET /session - Session Introspection
// ============================================================================

/// Response body for the session introspection endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionResponse {
    /// Always `true` on a 200.
    pub success: bool,

    /// The authenticated caller.
    pub user: Identity,

    /// The caller's active plan name, if any.
    pub plan: Option<String>,
}

/// GET /session - Who am I?
///
/// Runs the full session check via the identity guard, then reports the
/// caller's identity and active plan. Holding no plan is not an error here;
/// the client uses the `null` to show the upsell entry point.
async fn get_session(
    State(state): State<AppState>,
    identity: Identity,
) -> Result<Json<SessionResponse>, PlanRejection> {
    let plan = match state.entitlements.authorize(&identity, None).await {
        Ok(entitlement) => Some(entitlement.plan),
        Err(EntitlementError::NoActivePlan) => None,
        Err(err) => return Err(PlanRejection(err)),
    };

    Ok(Json(SessionResponse {
        success: true,
        user: identity,
        plan,
    }))
}

// ============================================================================
// GET /admin/stats - Admin Statistics
// ============================================================================

/// Response body for the admin statistics endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct AdminStatsResponse {
    /// Number of live channels across all identities.
    pub connections: usize,

    /// Number of identities with at least one live channel.
    pub identities: usize,

    /// Server uptime in seconds.
    pub uptime_seconds: u64,
}

/// GET /admin/stats - Live connection statistics.
///
/// Requires the admin role; members receive `403`.
async fn get_admin_stats(
    State(state): State<AppState>,
    Admin(identity): Admin,
) -> Json<AdminStatsResponse> {
    debug!(admin = %identity.id, "Serving admin stats");

    Json(AdminStatsResponse {
        connections: state.registry.connection_count(),
        identities: state.registry.identity_count(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}

// ============================================================================
// GET /health - Health Check
// ============================================================================

/// Response body for health check endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Server status (always "ok" if responding).
    pub status: String,

    /// Number of live channels.
    pub connections: usize,

    /// Number of identities with at least one live channel.
    pub identities: usize,

    /// Server uptime in seconds.
    pub uptime_seconds: u64,
}

/// GET /health - Health check endpoint.
///
/// Returns server health status and registry statistics.
/// No authentication required.
async fn get_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = state.start_time.elapsed();

    Json(HealthResponse {
        status: "ok".to_string(),
        connections: state.registry.connection_count(),
        identities: state.registry.identity_count(),
        uptime_seconds: uptime.as_secs(),
    })
}

// ============================================================================
// Tests
// ============================================================================
