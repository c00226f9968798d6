//! Streamable HTTP transport: one endpoint answering POST, GET and DELETE, plus /health.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{
        header::{ACCEPT, CONTENT_TYPE, HOST, ORIGIN},
        HeaderMap, HeaderName, HeaderValue, Method, StatusCode,
    },
    middleware,
    response::{IntoResponse, Json as AxumJson, Response},
    routing::get,
    Router,
};
use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use agentic_stream::{
    decode_payload, encode_reply, CodecError, EventCursor, EventId, InMemorySessionStore, Message, Request,
    RequestId, SessionId, SessionStore, StreamError, StreamId, StreamRegistry,
};

use crate::config::ServerConfig;
use crate::protocol::validator::validate_unique_ids;
use crate::protocol::{CallEnv, Dispatcher, MessageSink};
use crate::session::SessionRuntimes;
use crate::types::{McpError, McpResult};

use super::maintenance::spawn_maintenance;
use super::sse::sse_response;

pub const SESSION_HEADER: &str = "mcp-session-id";
pub const LAST_EVENT_ID_HEADER: &str = "last-event-id";

const APPLICATION_JSON: &str = "application/json";
const EVENT_STREAM: &str = "text/event-stream";

/// Shared state behind every route.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub dispatcher: Arc<Dispatcher>,
    pub sessions: Arc<dyn SessionStore>,
    pub streams: Arc<StreamRegistry>,
    pub runtimes: Arc<SessionRuntimes>,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    /// Release everything tied to a session that is no longer valid.
    pub fn end_session(&self, session: &SessionId) {
        let streams = self.streams.close_session(session);
        let cancelled = self.dispatcher.end_session(session);
        self.runtimes.remove(session);
        tracing::debug!(session = %session, streams, cancelled, "Session resources released");
    }

    /// Queue a server-initiated message unrelated to any client POST on the session's GET
    /// stream. It is buffered until a GET attaches.
    pub fn push(&self, session: Option<SessionId>, message: Message) -> McpResult<EventId> {
        if !self.config.enable_get_stream {
            return Err(McpError::MethodNotAllowed("GET streams are disabled".to_string()));
        }
        let handle = self.streams.standalone(session);
        Ok(self.streams.publish(&handle.id, message)?)
    }
}

/// An HTTP-level rejection rendered as a JSON-RPC error body.
#[derive(Debug)]
pub struct TransportError {
    pub error: McpError,
    pub id: Option<RequestId>,
}

impl TransportError {
    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.error.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl From<McpError> for TransportError {
    fn from(error: McpError) -> Self {
        let id = match &error {
            McpError::Codec(codec) => codec.id().cloned(),
            _ => None,
        };
        Self { error, id }
    }
}

impl From<CodecError> for TransportError {
    fn from(e: CodecError) -> Self {
        McpError::from(e).into()
    }
}

impl From<StreamError> for TransportError {
    fn from(e: StreamError) -> Self {
        McpError::from(e).into()
    }
}

impl IntoResponse for TransportError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(status = %status, "Request failed: {}", self.error);
        } else {
            tracing::warn!(status = %status, "Rejected request: {}", self.error);
        }
        let body = encode_reply(&[self.error.to_json_rpc_error(self.id)], false);
        (status, [(CONTENT_TYPE, APPLICATION_JSON)], body).into_response()
    }
}

/// Publishes into one request-scoped stream.
struct StreamSink {
    streams: Arc<StreamRegistry>,
    stream: StreamId,
}

impl MessageSink for StreamSink {
    fn deliver(&self, message: Message) -> bool {
        self.streams.publish(&self.stream, message).is_ok()
    }
}

/// Streamable HTTP server.
pub struct HttpTransport {
    state: AppState,
}

impl HttpTransport {
    pub fn new(config: ServerConfig, dispatcher: Dispatcher) -> Self {
        Self::with_store(config, dispatcher, Arc::new(InMemorySessionStore::new()))
    }

    /// Use a custom session store.
    pub fn with_store(
        config: ServerConfig,
        dispatcher: Dispatcher,
        sessions: Arc<dyn SessionStore>,
    ) -> Self {
        let streams = Arc::new(StreamRegistry::new(config.event_buffer_capacity));
        Self {
            state: AppState {
                config: Arc::new(config),
                dispatcher: Arc::new(dispatcher),
                sessions,
                streams,
                runtimes: Arc::new(SessionRuntimes::new()),
                started_at: chrono::Utc::now(),
            },
        }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn router(&self) -> Router {
        let state = self.state.clone();
        let endpoint = state.config.endpoint.clone();

        let router = Router::new()
            .route(
                &endpoint,
                get(handle_get).post(handle_post).delete(handle_delete),
            )
            .layer(middleware::from_fn_with_state(state.clone(), origin_layer))
            .layer(middleware::from_fn_with_state(state.clone(), auth_layer))
            .route("/health", get(handle_health))
            .with_state(state.clone())
            .layer(TraceLayer::new_for_http());

        match cors_layer(&state.config) {
            Some(cors) => router.layer(cors),
            None => router,
        }
    }

    /// Serve until `shutdown` fires.
    pub async fn run(&self, shutdown: CancellationToken) -> McpResult<()> {
        let addr = self.state.config.addr.clone();
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(McpError::Io)?;

        let maintenance = spawn_maintenance(self.state.clone(), shutdown.clone());

        tracing::info!(
            "HTTP transport listening on {addr}{}",
            self.state.config.endpoint
        );

        let stop = shutdown.clone();
        let streams = Arc::clone(&self.state.streams);
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                stop.cancelled().await;
                let closed = streams.close_all();
                tracing::info!(closed, "Shutting down, closed open streams");
            })
            .await
            .map_err(|e| McpError::Transport(e.to_string()))?;

        shutdown.cancel();
        let _ = maintenance.await;
        tracing::info!("HTTP transport stopped");
        Ok(())
    }
}

/// Auth middleware: checks the bearer token if one is configured.
/// /health is routed outside this layer.
async fn auth_layer(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: axum::extract::Request,
    next: middleware::Next,
) -> Response {
    if let Some(expected) = &state.config.token {
        let authorized = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .is_some_and(|token| token == expected);

        if !authorized {
            return TransportError::from(McpError::Unauthorized).into_response();
        }
    }

    next.run(request).await
}

/// Rejects cross-site requests whose Origin is neither same-host nor allow-listed.
async fn origin_layer(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: axum::extract::Request,
    next: middleware::Next,
) -> Response {
    if let Some(origin) = headers.get(ORIGIN).and_then(|v| v.to_str().ok()) {
        let host = headers.get(HOST).and_then(|v| v.to_str().ok());
        if !origin_allowed(origin, host, &state.config.allowed_origins) {
            return TransportError::from(McpError::ForbiddenOrigin(origin.to_string()))
                .into_response();
        }
    }

    next.run(request).await
}

pub fn origin_allowed(origin: &str, host: Option<&str>, allowed: &[String]) -> bool {
    if allowed.iter().any(|a| a == "*" || a.eq_ignore_ascii_case(origin)) {
        return true;
    }
    let authority = origin
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(origin)
        .trim_end_matches('/');
    host.is_some_and(|h| h.eq_ignore_ascii_case(authority))
}

fn cors_layer(config: &ServerConfig) -> Option<CorsLayer> {
    if config.allowed_origins.is_empty() {
        return None;
    }
    let origins = if config.allowed_origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(
            config
                .allowed_origins
                .iter()
                .filter_map(|o| HeaderValue::from_str(o).ok()),
        )
    };
    Some(
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET, Method::POST, Method::DELETE])
            .allow_headers(Any)
            .expose_headers([HeaderName::from_static(SESSION_HEADER)]),
    )
}

/// Health check endpoint, no auth required.
async fn handle_health(State(state): State<AppState>) -> AxumJson<serde_json::Value> {
    AxumJson(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "started_at": state.started_at.to_rfc3339(),
        "sessions": state.sessions.active_count(),
        "streams": state.streams.stream_count(),
    }))
}

async fn handle_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, TransportError> {
    if !accepts(&headers, APPLICATION_JSON) || !accepts(&headers, EVENT_STREAM) {
        return Err(McpError::NotAcceptable(format!(
            "Accept must include {APPLICATION_JSON} and {EVENT_STREAM}"
        ))
        .into());
    }

    let payload = decode_payload(&body)?;
    let batch = payload.is_batch();
    let messages = payload.into_messages();

    let initialize = messages
        .iter()
        .any(|m| m.is_request() && m.method() == Some("initialize"));
    if initialize {
        if batch {
            return Err(McpError::InvalidRequest(
                "initialize must not be part of a batch".to_string(),
            )
            .into());
        }
        return handle_initialize(&state, messages).await;
    }

    validate_unique_ids(&messages)?;
    let session = session_gate(&state, &headers)?;
    let runtime = state.runtimes.get_or_create(&session);
    let streaming = !state.config.json_response || state.dispatcher.wants_stream(&messages);

    let mut requests: Vec<Request> = Vec::new();
    for message in messages {
        match message {
            Message::Request(request) => requests.push(request),
            Message::Notification(notification) => {
                state.dispatcher.notify(notification, session.clone());
            }
            reply => match reply.id().cloned() {
                Some(id) => {
                    if !runtime.pending.resolve(&id, reply) {
                        tracing::warn!(id = %id, "Response for unknown server request");
                    }
                }
                None => tracing::warn!("Dropping error response without an id"),
            },
        }
    }

    if requests.is_empty() {
        return Ok(with_session(StatusCode::ACCEPTED.into_response(), &session));
    }

    if streaming {
        let handle = state.streams.open_stream(session.clone());
        let consumer = state.streams.attach(&handle.id)?;
        let sink = Arc::new(StreamSink {
            streams: Arc::clone(&state.streams),
            stream: handle.id.clone(),
        });
        let env = CallEnv::new(session.clone(), sink.clone())
            .with_pending(Arc::clone(&runtime.pending), state.config.pending_call_timeout);

        let dispatcher = Arc::clone(&state.dispatcher);
        let streams = Arc::clone(&state.streams);
        tracing::debug!(stream = %handle.id, requests = requests.len(), "Answering over SSE");
        tokio::spawn(async move {
            join_all(requests.into_iter().map(|request| {
                let env = env.clone();
                let dispatcher = &dispatcher;
                let sink = &sink;
                async move {
                    let reply = dispatcher.dispatch(request, env).await;
                    if !sink.deliver(reply) {
                        tracing::warn!("Stream closed before a response could be published");
                    }
                }
            }))
            .await;
            streams.close(&handle.id);
        });

        let response = sse_response(consumer, None, state.config.keep_alive_interval);
        return Ok(with_session(response.into_response(), &session));
    }

    // A JSON reply has no channel for related messages; pushes fail back to the handler.
    let env = CallEnv::detached(session.clone())
        .with_pending(Arc::clone(&runtime.pending), state.config.pending_call_timeout);
    let replies = join_all(
        requests
            .into_iter()
            .map(|request| state.dispatcher.dispatch(request, env.clone())),
    )
    .await;

    Ok(with_session(json_reply(&replies, batch), &session))
}

async fn handle_initialize(
    state: &AppState,
    messages: Vec<Message>,
) -> Result<Response, TransportError> {
    let Some(Message::Request(request)) = messages.into_iter().next() else {
        return Err(McpError::InvalidRequest("initialize must be a request".to_string()).into());
    };

    let session = state.config.stateful.then(|| state.sessions.create());
    let env = CallEnv::detached(session.clone());
    let reply = state.dispatcher.dispatch(request, env).await;

    if let (Message::Error(_), Some(id)) = (&reply, &session) {
        state.sessions.terminate(id);
        state.end_session(id);
        return Ok(json_reply(&[reply], false));
    }

    Ok(with_session(json_reply(&[reply], false), &session))
}

async fn handle_get(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, TransportError> {
    if !state.config.enable_get_stream {
        return Err(McpError::MethodNotAllowed("GET streams are disabled".to_string()).into());
    }
    if !accepts(&headers, EVENT_STREAM) {
        return Err(McpError::NotAcceptable(format!("Accept must include {EVENT_STREAM}")).into());
    }

    let session = session_gate(&state, &headers)?;

    // A gap behind the cursor is reported by the consumer as its first frame.
    let consumer = match header_str(&headers, LAST_EVENT_ID_HEADER) {
        Some(raw) => {
            let cursor = EventCursor::parse(raw)?;
            let handle = state.streams.resolve(&session, &cursor)?;
            state.streams.resume(&handle.id, cursor.event)?
        }
        None => {
            let handle = state.streams.standalone(session.clone());
            state.streams.attach(&handle.id)?
        }
    };

    tracing::debug!(stream = %consumer.handle().id, cursor = consumer.cursor(), "GET stream attached");
    let response = sse_response(
        consumer,
        state.config.stream_idle_timeout,
        state.config.keep_alive_interval,
    );
    Ok(with_session(response.into_response(), &session))
}

async fn handle_delete(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<StatusCode, TransportError> {
    if !state.config.stateful {
        return Err(McpError::MethodNotAllowed("Sessions are disabled".to_string()).into());
    }
    let id = header_str(&headers, SESSION_HEADER)
        .map(SessionId::from)
        .ok_or(McpError::MissingSession)?;

    if !state.sessions.terminate(&id) {
        return Err(McpError::SessionNotFound(id.to_string()).into());
    }
    state.end_session(&id);
    Ok(StatusCode::NO_CONTENT)
}

/// Resolve and refresh the caller's session. `None` in stateless mode.
fn session_gate(state: &AppState, headers: &HeaderMap) -> Result<Option<SessionId>, TransportError> {
    if !state.config.stateful {
        return Ok(None);
    }
    let id = header_str(headers, SESSION_HEADER)
        .map(SessionId::from)
        .ok_or(McpError::MissingSession)?;
    if !state.sessions.touch(&id) {
        return Err(McpError::SessionNotFound(id.to_string()).into());
    }
    Ok(Some(id))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Whether the Accept header admits `media` (wildcards included).
fn accepts(headers: &HeaderMap, media: &str) -> bool {
    let family = media.split('/').next().unwrap_or(media);
    headers
        .get_all(ACCEPT)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|range| range.split(';').next().unwrap_or("").trim().to_ascii_lowercase())
        .any(|range| range == "*/*" || range == media || range == format!("{family}/*"))
}

fn json_reply(replies: &[Message], batch: bool) -> Response {
    (
        StatusCode::OK,
        [(CONTENT_TYPE, APPLICATION_JSON)],
        encode_reply(replies, batch),
    )
        .into_response()
}

fn with_session(mut response: Response, session: &Option<SessionId>) -> Response {
    if let Some(id) = session {
        if let Ok(value) = HeaderValue::from_str(id.as_str()) {
            response.headers_mut().insert(SESSION_HEADER, value);
        }
    }
    response
}
