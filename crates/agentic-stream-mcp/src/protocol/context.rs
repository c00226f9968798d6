//! Per-request context handed to method handlers.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use agentic_stream::{Message, PendingCalls, RequestId, SessionId};

use crate::types::{McpError, McpResult};

/// Where server-originated messages related to a request are delivered.
pub trait MessageSink: Send + Sync {
    /// Hand a message to the client channel. False when there is nowhere to send it.
    fn deliver(&self, message: Message) -> bool;
}

/// Sink that drops everything; used when a transport has no push channel.
pub struct NullSink;

impl MessageSink for NullSink {
    fn deliver(&self, message: Message) -> bool {
        tracing::debug!(method = ?message.method(), "No push channel, dropping message");
        false
    }
}

/// Transport-provided plumbing shared by every request of one HTTP exchange or stdio line.
#[derive(Clone)]
pub struct CallEnv {
    pub session: Option<SessionId>,
    pub sink: Arc<dyn MessageSink>,
    pub pending: Option<Arc<PendingCalls>>,
    pub call_timeout: Duration,
}

impl CallEnv {
    pub fn new(session: Option<SessionId>, sink: Arc<dyn MessageSink>) -> Self {
        Self {
            session,
            sink,
            pending: None,
            call_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_pending(mut self, pending: Arc<PendingCalls>, call_timeout: Duration) -> Self {
        self.pending = Some(pending);
        self.call_timeout = call_timeout;
        self
    }

    /// An environment with no push channel and no server-initiated calls.
    pub fn detached(session: Option<SessionId>) -> Self {
        Self::new(session, Arc::new(NullSink))
    }
}

/// What a handler can see and do while serving one request.
#[derive(Clone)]
pub struct RequestContext {
    pub request_id: RequestId,
    pub method: String,
    env: CallEnv,
    cancel: CancellationToken,
}

impl RequestContext {
    pub(crate) fn new(request_id: RequestId, method: String, env: CallEnv, cancel: CancellationToken) -> Self {
        Self {
            request_id,
            method,
            env,
            cancel,
        }
    }

    pub fn session(&self) -> Option<&SessionId> {
        self.env.session.as_ref()
    }

    /// Cancelled when the client sends `notifications/cancelled` for this request or its session ends.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Push a notification related to this request.
    pub fn notify(&self, method: &str, params: Option<Value>) -> McpResult<()> {
        if self.env.sink.deliver(Message::notification(method, params)) {
            Ok(())
        } else {
            Err(McpError::Transport(format!(
                "No channel available for notification {method}"
            )))
        }
    }

    /// Send a request to the client and wait for its reply.
    pub async fn call(&self, method: &str, params: Option<Value>) -> McpResult<Value> {
        let pending = self.env.pending.as_ref().ok_or_else(|| {
            McpError::InternalError("Server-initiated requests are not available on this transport".into())
        })?;

        let id = pending.next_id();
        let call = pending.register_with_timeout(id.clone(), self.env.call_timeout)?;
        if !self.env.sink.deliver(Message::request(id.clone(), method, params)) {
            pending.forget(&id);
            return Err(McpError::Transport(format!(
                "No channel available for request {method}"
            )));
        }

        let reply = tokio::select! {
            reply = call.wait() => reply?,
            _ = self.cancel.cancelled() => {
                pending.forget(&id);
                return Err(McpError::RequestCancelled);
            }
        };

        match reply {
            Message::Response(r) => Ok(r.result),
            Message::Error(e) => Err(McpError::Remote {
                code: e.error.code,
                message: e.error.message,
                data: e.error.data,
            }),
            other => Err(McpError::InternalError(format!(
                "Unexpected reply to {method}: {other:?}"
            ))),
        }
    }
}
