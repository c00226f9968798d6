//! Error types and JSON-RPC error codes for the MCP server.

use serde_json::json;

use agentic_stream::{CodecError, Message, PendingError, RequestId, StreamError};

pub use agentic_stream::error_codes;

/// MCP and transport-specific error codes.
pub mod mcp_error_codes {
    /// Transport: session id unknown or terminated.
    pub const SESSION_NOT_FOUND: i32 = -32001;
    /// Transport: a server-initiated call got no reply in time.
    pub const REQUEST_TIMEOUT: i32 = -32002;
    /// Transport: requested events were evicted from the replay buffer.
    pub const REPLAY_GAP: i32 = -32003;
    /// Transport: request rejected by HTTP-level rules (headers, verb).
    pub const BAD_TRANSPORT_REQUEST: i32 = -32000;

    pub const REQUEST_CANCELLED: i32 = -32800;

    /// Server: Unauthorized (missing or invalid bearer token).
    pub const UNAUTHORIZED: i32 = -32900;
    /// Server: Origin header not in the allow-list.
    pub const FORBIDDEN_ORIGIN: i32 = -32903;
}

/// All errors that can occur in the MCP server.
#[derive(thiserror::Error, Debug)]
pub enum McpError {
    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Request cancelled")]
    RequestCancelled,

    #[error("Request timed out: {0}")]
    RequestTimeout(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Missing Mcp-Session-Id header")]
    MissingSession,

    #[error("Not acceptable: {0}")]
    NotAcceptable(String),

    #[error("Method not allowed: {0}")]
    MethodNotAllowed(String),

    /// Unauthorized: missing or invalid bearer token.
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden origin: {0}")]
    ForbiddenOrigin(String),

    /// The peer answered a server-initiated request with an error.
    #[error("Remote error {code}: {message}")]
    Remote {
        code: i32,
        message: String,
        data: Option<serde_json::Value>,
    },

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl McpError {
    pub fn code(&self) -> i32 {
        use error_codes::*;
        use mcp_error_codes::*;
        match self {
            McpError::ParseError(_) => PARSE_ERROR,
            McpError::InvalidRequest(_) => INVALID_REQUEST,
            McpError::MethodNotFound(_) => METHOD_NOT_FOUND,
            McpError::InvalidParams(_) => INVALID_PARAMS,
            McpError::InternalError(_)
            | McpError::Transport(_)
            | McpError::Io(_)
            | McpError::Json(_) => INTERNAL_ERROR,
            McpError::RequestCancelled => REQUEST_CANCELLED,
            McpError::RequestTimeout(_) => REQUEST_TIMEOUT,
            McpError::SessionNotFound(_) => SESSION_NOT_FOUND,
            McpError::MissingSession
            | McpError::NotAcceptable(_)
            | McpError::MethodNotAllowed(_) => BAD_TRANSPORT_REQUEST,
            McpError::Unauthorized => UNAUTHORIZED,
            McpError::ForbiddenOrigin(_) => FORBIDDEN_ORIGIN,
            McpError::Remote { code, .. } => *code,
            McpError::Codec(e) => e.code(),
            McpError::Stream(StreamError::ReplayGap { .. }) => REPLAY_GAP,
            McpError::Stream(StreamError::InvalidCursor(_)) => INVALID_REQUEST,
            McpError::Stream(_) => BAD_TRANSPORT_REQUEST,
        }
    }

    /// HTTP status used when this error rejects a whole HTTP request.
    pub fn http_status(&self) -> u16 {
        match self {
            McpError::ParseError(_)
            | McpError::Codec(_)
            | McpError::InvalidRequest(_)
            | McpError::InvalidParams(_)
            | McpError::MissingSession
            | McpError::Stream(StreamError::InvalidCursor(_)) => 400,
            McpError::Unauthorized => 401,
            McpError::ForbiddenOrigin(_) => 403,
            McpError::SessionNotFound(_)
            | McpError::MethodNotFound(_)
            | McpError::Stream(StreamError::UnknownStream(_)) => 404,
            McpError::MethodNotAllowed(_) => 405,
            McpError::NotAcceptable(_) => 406,
            McpError::Stream(StreamError::ReplayGap { .. }) | McpError::Stream(StreamError::Closed(_)) => 409,
            _ => 500,
        }
    }

    fn data(&self) -> Option<serde_json::Value> {
        match self {
            McpError::InternalError(detail) | McpError::Transport(detail) => {
                Some(json!({ "detail": detail }))
            }
            McpError::Io(e) => Some(json!({ "detail": e.to_string() })),
            McpError::Json(e) => Some(json!({ "detail": e.to_string() })),
            McpError::Remote { data, .. } => data.clone(),
            McpError::Stream(StreamError::ReplayGap { requested, oldest }) => {
                Some(json!({ "requested": requested, "oldest": oldest }))
            }
            _ => None,
        }
    }

    /// Wrap this error as an error response for `id`.
    pub fn to_json_rpc_error(&self, id: Option<RequestId>) -> Message {
        let message = match self {
            McpError::Remote { message, .. } => message.clone(),
            other => other.to_string(),
        };
        Message::error(id, self.code(), message, self.data())
    }
}

impl From<PendingError> for McpError {
    fn from(e: PendingError) -> Self {
        match e {
            PendingError::Timeout(_) => McpError::RequestTimeout(e.to_string()),
            PendingError::Cancelled => McpError::RequestCancelled,
            PendingError::DuplicateId(_) => McpError::InternalError(e.to_string()),
        }
    }
}

impl From<anyhow::Error> for McpError {
    fn from(e: anyhow::Error) -> Self {
        McpError::InternalError(format!("{e:#}"))
    }
}

pub type McpResult<T> = Result<T, McpError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_internal_error_carries_detail_in_data() {
        let msg = McpError::InternalError("disk full".into()).to_json_rpc_error(Some(RequestId::Number(4)));
        match msg {
            Message::Error(e) => {
                assert_eq!(e.id, Some(RequestId::Number(4)));
                assert_eq!(e.error.code, error_codes::INTERNAL_ERROR);
                assert_eq!(e.error.data, Some(json!({ "detail": "disk full" })));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_server_side_failures_are_internal() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let failures = [
            McpError::from(json_err),
            McpError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk gone")),
            McpError::Transport("channel closed".into()),
        ];
        for err in failures {
            match err.to_json_rpc_error(Some(RequestId::Number(1))) {
                Message::Error(e) => {
                    assert_eq!(e.error.code, error_codes::INTERNAL_ERROR);
                    assert!(e.error.data.unwrap()["detail"].is_string());
                }
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn test_statuses() {
        assert_eq!(McpError::SessionNotFound("x".into()).http_status(), 404);
        assert_eq!(McpError::MissingSession.http_status(), 400);
        assert_eq!(McpError::NotAcceptable("x".into()).http_status(), 406);
        assert_eq!(
            McpError::Codec(CodecError::Parse("eof".into())).http_status(),
            400
        );
    }

    #[test]
    fn test_codec_error_keeps_code() {
        let err: McpError = CodecError::Parse("eof".into()).into();
        assert_eq!(err.code(), error_codes::PARSE_ERROR);
    }

    #[test]
    fn test_pending_error_mapping() {
        let timeout: McpError = PendingError::Timeout(std::time::Duration::from_secs(1)).into();
        assert_eq!(timeout.code(), mcp_error_codes::REQUEST_TIMEOUT);
        let cancelled: McpError = PendingError::Cancelled.into();
        assert_eq!(cancelled.code(), mcp_error_codes::REQUEST_CANCELLED);
    }
}
