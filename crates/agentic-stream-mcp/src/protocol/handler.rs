//! Request dispatcher: routes JSON-RPC requests to registered method handlers.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use agentic_stream::SessionId;

use crate::types::*;

use super::context::{CallEnv, RequestContext};
use super::negotiation::NegotiatedCapabilities;
use super::validator::{validate_method_name, validate_notification_name};

/// Serves one request method.
#[async_trait]
pub trait MethodHandler: Send + Sync {
    async fn handle(&self, params: Option<Value>, ctx: RequestContext) -> McpResult<Value>;

    /// Whether replies should go over an SSE stream so progress can be pushed first.
    fn streaming(&self) -> bool {
        false
    }
}

/// Reacts to a client notification. Nothing is sent back.
#[async_trait]
pub trait NotificationHandler: Send + Sync {
    async fn handle(&self, params: Option<Value>, session: Option<SessionId>);
}

/// Adapter that turns an async closure into a [`MethodHandler`].
pub struct FnHandler<F> {
    f: F,
    streaming: bool,
}

impl<F> FnHandler<F> {
    pub fn new(f: F) -> Self {
        Self {
            f,
            streaming: false,
        }
    }

    pub fn streaming(mut self) -> Self {
        self.streaming = true;
        self
    }
}

#[async_trait]
impl<F, Fut> MethodHandler for FnHandler<F>
where
    F: Fn(Option<Value>, RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = McpResult<Value>> + Send + 'static,
{
    async fn handle(&self, params: Option<Value>, ctx: RequestContext) -> McpResult<Value> {
        (self.f)(params, ctx).await
    }

    fn streaming(&self) -> bool {
        self.streaming
    }
}

type InFlightKey = (Option<SessionId>, RequestId);

/// Removes an in-flight entry when the dispatch future finishes or is dropped.
struct InFlight<'a> {
    table: &'a Mutex<HashMap<InFlightKey, CancellationToken>>,
    key: InFlightKey,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.table.lock().remove(&self.key);
    }
}

/// Routes requests and notifications, tracking in-flight work for cancellation.
#[derive(Default)]
pub struct Dispatcher {
    handlers: HashMap<String, Arc<dyn MethodHandler>>,
    notification_handlers: HashMap<String, Arc<dyn NotificationHandler>>,
    instructions: Option<String>,
    in_flight: Mutex<HashMap<InFlightKey, CancellationToken>>,
    negotiated: Mutex<HashMap<Option<SessionId>, NegotiatedCapabilities>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    /// Register a handler for `method`. Names are validated and must be unique.
    pub fn register(
        &mut self,
        method: &str,
        handler: impl MethodHandler + 'static,
    ) -> McpResult<()> {
        validate_method_name(method)?;
        if self.handlers.contains_key(method) {
            return Err(McpError::InvalidRequest(format!(
                "Method \"{method}\" is already registered"
            )));
        }
        self.handlers.insert(method.to_string(), Arc::new(handler));
        tracing::debug!(method, "Registered method handler");
        Ok(())
    }

    pub fn register_fn<F, Fut>(&mut self, method: &str, f: F) -> McpResult<()>
    where
        F: Fn(Option<Value>, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = McpResult<Value>> + Send + 'static,
    {
        self.register(method, FnHandler::new(f))
    }

    pub fn on_notification(
        &mut self,
        method: &str,
        handler: impl NotificationHandler + 'static,
    ) -> McpResult<()> {
        validate_notification_name(method)?;
        if self.notification_handlers.contains_key(method) {
            return Err(McpError::InvalidRequest(format!(
                "Notification \"{method}\" already has a handler"
            )));
        }
        self.notification_handlers
            .insert(method.to_string(), Arc::new(handler));
        Ok(())
    }

    /// Registered request methods, sorted.
    pub fn methods(&self) -> Vec<String> {
        let mut methods: Vec<String> = self.handlers.keys().cloned().collect();
        methods.sort();
        methods
    }

    /// True if any request in `messages` targets a streaming handler.
    pub fn wants_stream(&self, messages: &[Message]) -> bool {
        messages.iter().any(|m| match m {
            Message::Request(r) => self
                .handlers
                .get(&r.method)
                .is_some_and(|h| h.streaming()),
            _ => false,
        })
    }

    /// Serve one request and produce exactly one reply for it.
    pub async fn dispatch(&self, request: Request, env: CallEnv) -> Message {
        let Request { id, method, params } = request;

        if method == "initialize" {
            return match self.initialize(params, &env.session) {
                Ok(result) => Message::response(id, result),
                Err(e) => e.to_json_rpc_error(Some(id)),
            };
        }

        let handler = match self.handlers.get(&method) {
            Some(handler) => Arc::clone(handler),
            None if method == "ping" => return Message::response(id, json!({})),
            None => return McpError::MethodNotFound(method).to_json_rpc_error(Some(id)),
        };

        let token = CancellationToken::new();
        // The live request owns `id`; the duplicate gets an id-less error so `id` is answered once.
        let Some(_guard) = self.track((env.session.clone(), id.clone()), token.clone()) else {
            tracing::warn!(method = %method, id = %id, "Request id already in flight");
            return McpError::InvalidRequest(format!("Request id {id} is already in flight"))
                .to_json_rpc_error(None);
        };

        tracing::debug!(method = %method, id = %id, "Dispatching request");
        let ctx = RequestContext::new(id.clone(), method.clone(), env, token.clone());
        let mut task = tokio::spawn(async move { handler.handle(params, ctx).await });

        let joined = tokio::select! {
            joined = &mut task => joined,
            _ = token.cancelled() => {
                tracing::info!(method = %method, id = %id, "Request cancelled");
                task.abort();
                return McpError::RequestCancelled.to_json_rpc_error(Some(id));
            }
        };

        match joined {
            Ok(Ok(result)) => Message::response(id, result),
            Ok(Err(e)) => {
                tracing::debug!(method = %method, id = %id, "Handler returned error: {e}");
                e.to_json_rpc_error(Some(id))
            }
            Err(join_err) => {
                let detail = panic_detail(join_err);
                tracing::error!(method = %method, id = %id, "Handler failed: {detail}");
                McpError::InternalError(detail).to_json_rpc_error(Some(id))
            }
        }
    }

    /// Handle a client notification. Registered handlers run in the background.
    pub fn notify(&self, notification: Notification, session: Option<SessionId>) {
        let Notification { method, params } = notification;
        match method.as_str() {
            INITIALIZED => {
                if let Some(caps) = self.negotiated.lock().get_mut(&session) {
                    caps.mark_initialized();
                }
            }
            CANCELLED => {
                let parsed = params.and_then(|p| serde_json::from_value::<CancelledParams>(p).ok());
                match parsed {
                    Some(p) => {
                        if !self.cancel(&session, &p.request_id) {
                            tracing::debug!(id = %p.request_id, "Cancellation for request not in flight");
                        }
                    }
                    None => tracing::warn!("Malformed notifications/cancelled params"),
                }
            }
            _ => match self.notification_handlers.get(&method) {
                Some(handler) => {
                    let handler = Arc::clone(handler);
                    tokio::spawn(async move { handler.handle(params, session).await });
                }
                None => tracing::debug!(method = %method, "Ignoring unhandled notification"),
            },
        }
    }

    /// Cancel an in-flight request. False if it already finished or never existed.
    pub fn cancel(&self, session: &Option<SessionId>, id: &RequestId) -> bool {
        match self.in_flight.lock().get(&(session.clone(), id.clone())) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel everything still running for `session` and drop its negotiated state.
    pub fn end_session(&self, session: &SessionId) -> usize {
        let key = Some(session.clone());
        let mut cancelled = 0;
        for ((owner, _), token) in self.in_flight.lock().iter() {
            if *owner == key {
                token.cancel();
                cancelled += 1;
            }
        }
        self.negotiated.lock().remove(&key);
        if cancelled > 0 {
            tracing::info!(session = %session, cancelled, "Cancelled in-flight requests for ended session");
        }
        cancelled
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Negotiated state for a session, once `initialize` has succeeded.
    pub fn negotiated(&self, session: &Option<SessionId>) -> Option<NegotiatedCapabilities> {
        self.negotiated.lock().get(session).cloned()
    }

    fn initialize(&self, params: Option<Value>, session: &Option<SessionId>) -> McpResult<Value> {
        let params: InitializeParams = params
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| McpError::InvalidParams(e.to_string()))?
            .ok_or_else(|| McpError::InvalidParams("initialize requires params".to_string()))?;

        let mut caps = NegotiatedCapabilities::default();
        let result = caps.negotiate(params, &self.methods(), self.instructions.clone())?;
        self.negotiated.lock().insert(session.clone(), caps);
        Ok(serde_json::to_value(result)?)
    }

    fn track(&self, key: InFlightKey, token: CancellationToken) -> Option<InFlight<'_>> {
        let mut in_flight = self.in_flight.lock();
        if in_flight.contains_key(&key) {
            return None;
        }
        in_flight.insert(key.clone(), token);
        Some(InFlight {
            table: &self.in_flight,
            key,
        })
    }
}

fn panic_detail(err: tokio::task::JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("handler panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("handler panicked: {s}")
    } else {
        "handler panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn dispatcher() -> Dispatcher {
        let mut d = Dispatcher::new();
        d.register_fn("echo", |params, _ctx| async move {
            Ok(params.unwrap_or(Value::Null))
        })
        .unwrap();
        d.register_fn("fail", |_, _| async {
            Err(McpError::InvalidParams("bad".into()))
        })
        .unwrap();
        d.register_fn("bad_json", |_, _| async {
            serde_json::from_str::<Value>("{").map_err(McpError::from)
        })
        .unwrap();
        d.register_fn("io", |_, _| async {
            Err(McpError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk gone",
            )))
        })
        .unwrap();
        d.register_fn("boom", |_, _| async {
            if true {
                panic!("boom");
            }
            Ok(Value::Null)
        })
        .unwrap();
        d.register_fn("slow", |_, _| async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Value::Null)
        })
        .unwrap();
        d
    }

    fn request(id: i64, method: &str, params: Option<Value>) -> Request {
        Request {
            id: RequestId::Number(id),
            method: method.to_string(),
            params,
        }
    }

    fn error_code(msg: &Message) -> i32 {
        match msg {
            Message::Error(e) => e.error.code,
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_routes_to_handler() {
        let d = dispatcher();
        let reply = d
            .dispatch(request(1, "echo", Some(json!({"a": 1}))), CallEnv::detached(None))
            .await;
        assert_eq!(reply, Message::response(RequestId::Number(1), json!({"a": 1})));
        assert_eq!(d.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_unknown_method_and_ping_fallback() {
        let d = dispatcher();
        let reply = d.dispatch(request(1, "nope", None), CallEnv::detached(None)).await;
        assert_eq!(error_code(&reply), error_codes::METHOD_NOT_FOUND);

        let reply = d.dispatch(request(2, "ping", None), CallEnv::detached(None)).await;
        assert_eq!(reply, Message::response(RequestId::Number(2), json!({})));
    }

    #[tokio::test]
    async fn test_handler_error_keeps_code() {
        let d = dispatcher();
        let reply = d.dispatch(request(1, "fail", None), CallEnv::detached(None)).await;
        assert_eq!(error_code(&reply), error_codes::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_server_side_handler_failures_are_internal() {
        let d = dispatcher();
        for (id, method) in [(1, "bad_json"), (2, "io")] {
            match d.dispatch(request(id, method, None), CallEnv::detached(None)).await {
                Message::Error(e) => {
                    assert_eq!(e.id, Some(RequestId::Number(id)));
                    assert_eq!(e.error.code, error_codes::INTERNAL_ERROR);
                    assert!(e.error.data.unwrap()["detail"].is_string());
                }
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_panic_becomes_internal_error() {
        let d = dispatcher();
        let reply = d.dispatch(request(9, "boom", None), CallEnv::detached(None)).await;
        match reply {
            Message::Error(e) => {
                assert_eq!(e.id, Some(RequestId::Number(9)));
                assert_eq!(e.error.code, error_codes::INTERNAL_ERROR);
                let detail = e.error.data.unwrap()["detail"].as_str().unwrap().to_string();
                assert!(detail.contains("boom"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(d.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_cancel_notification_stops_request() {
        let d = Arc::new(dispatcher());
        let runner = Arc::clone(&d);
        let task = tokio::spawn(async move {
            runner
                .dispatch(request(5, "slow", None), CallEnv::detached(None))
                .await
        });

        while d.in_flight() == 0 {
            tokio::task::yield_now().await;
        }
        d.notify(
            Notification {
                method: CANCELLED.to_string(),
                params: Some(json!({"requestId": 5, "reason": "user"})),
            },
            None,
        );

        let reply = task.await.unwrap();
        assert_eq!(error_code(&reply), mcp_error_codes::REQUEST_CANCELLED);
        assert_eq!(d.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_in_flight_id_rejected() {
        let d = Arc::new(dispatcher());
        let runner = Arc::clone(&d);
        let first = tokio::spawn(async move {
            runner
                .dispatch(request(1, "slow", None), CallEnv::detached(None))
                .await
        });
        while d.in_flight() == 0 {
            tokio::task::yield_now().await;
        }

        let reply = d.dispatch(request(1, "echo", None), CallEnv::detached(None)).await;
        assert_eq!(error_code(&reply), error_codes::INVALID_REQUEST);
        assert_eq!(reply.id(), None);

        // Same id in another session is fine.
        let other = Some(SessionId::from("other"));
        let reply = d.dispatch(request(1, "echo", None), CallEnv::detached(other)).await;
        assert!(matches!(reply, Message::Response(_)));

        assert!(d.cancel(&None, &RequestId::Number(1)));
        assert_eq!(error_code(&first.await.unwrap()), mcp_error_codes::REQUEST_CANCELLED);
    }

    #[tokio::test]
    async fn test_end_session_cancels_its_requests() {
        let d = Arc::new(dispatcher());
        let session = SessionId::from("s1");
        let runner = Arc::clone(&d);
        let env = CallEnv::detached(Some(session.clone()));
        let task = tokio::spawn(async move { runner.dispatch(request(1, "slow", None), env).await });
        while d.in_flight() == 0 {
            tokio::task::yield_now().await;
        }

        assert_eq!(d.end_session(&session), 1);
        assert_eq!(error_code(&task.await.unwrap()), mcp_error_codes::REQUEST_CANCELLED);
    }

    #[tokio::test]
    async fn test_initialize_records_negotiation() {
        let d = dispatcher();
        let session = Some(SessionId::from("s1"));
        let params = json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {},
            "clientInfo": {"name": "t", "version": "1"}
        });
        let reply = d
            .dispatch(request(1, "initialize", Some(params)), CallEnv::detached(session.clone()))
            .await;
        match reply {
            Message::Response(r) => {
                assert_eq!(r.result["protocolVersion"], "2024-11-05");
                assert_eq!(r.result["serverInfo"]["name"], SERVER_NAME);
            }
            other => panic!("unexpected {other:?}"),
        }

        assert!(!d.negotiated(&session).unwrap().initialized);
        d.notify(
            Notification {
                method: INITIALIZED.to_string(),
                params: None,
            },
            session.clone(),
        );
        assert!(d.negotiated(&session).unwrap().initialized);
    }

    #[tokio::test]
    async fn test_initialize_without_params_is_invalid() {
        let d = dispatcher();
        let reply = d.dispatch(request(1, "initialize", None), CallEnv::detached(None)).await;
        assert_eq!(error_code(&reply), error_codes::INVALID_PARAMS);
    }

    #[test]
    fn test_registration_rules() {
        let mut d = dispatcher();
        assert!(d.register_fn("echo", |_, _| async { Ok(Value::Null) }).is_err());
        assert!(d.register_fn("initialize", |_, _| async { Ok(Value::Null) }).is_err());
        assert_eq!(d.methods(), vec!["boom", "echo", "fail", "slow"]);
    }

    #[test]
    fn test_wants_stream() {
        let mut d = Dispatcher::new();
        d.register("live", FnHandler::new(|_, _| async { Ok(Value::Null) }).streaming())
            .unwrap();
        d.register_fn("plain", |_, _| async { Ok(Value::Null) }).unwrap();
        assert!(d.wants_stream(&[Message::request(1i64, "live", None)]));
        assert!(!d.wants_stream(&[Message::request(1i64, "plain", None)]));
        assert!(!d.wants_stream(&[Message::notification("live", None)]));
    }
}
