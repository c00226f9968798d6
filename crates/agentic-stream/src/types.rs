//! Core identifiers, cursors and error types for event streams.

use serde::{Deserialize, Serialize};

use crate::message::Message;
use crate::session::SessionId;

/// Per-stream event sequence number. The first published event is 1.
pub type EventId = u64;

/// Identifier of one event stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(String);

impl StreamId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StreamId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A buffered event.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEvent {
    pub id: EventId,
    pub payload: Message,
}

/// Cheap, cloneable reference to a stream owned by the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamHandle {
    pub id: StreamId,
    pub session: Option<SessionId>,
    /// True for the per-session stream opened by GET.
    pub standalone: bool,
}

/// Wire form of an event id.
///
/// Events on a session's standalone stream are addressed by their bare sequence number
/// (`"7"`). Events on request-scoped streams carry the stream id (`"<stream>/7"`), so a
/// `Last-Event-ID` header alone is enough to locate the stream to resume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventCursor {
    pub stream: Option<StreamId>,
    pub event: EventId,
}

impl EventCursor {
    pub fn for_event(handle: &StreamHandle, event: EventId) -> Self {
        Self {
            stream: (!handle.standalone).then(|| handle.id.clone()),
            event,
        }
    }

    pub fn parse(raw: &str) -> StreamResult<Self> {
        let raw = raw.trim();
        let (stream, seq) = match raw.rsplit_once('/') {
            Some((stream, seq)) if !stream.is_empty() => (Some(StreamId::from(stream)), seq),
            Some(_) => return Err(StreamError::InvalidCursor(raw.to_string())),
            None => (None, raw),
        };
        let event = seq
            .parse::<EventId>()
            .map_err(|_| StreamError::InvalidCursor(raw.to_string()))?;
        Ok(Self { stream, event })
    }
}

impl std::fmt::Display for EventCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.stream {
            Some(stream) => write!(f, "{stream}/{}", self.event),
            None => write!(f, "{}", self.event),
        }
    }
}

/// Errors raised by the stream registry.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("Stream not found: {0}")]
    UnknownStream(StreamId),

    #[error("Stream closed: {0}")]
    Closed(StreamId),

    /// The buffer no longer holds every event after `requested`; `oldest` is the first one still held.
    #[error("Replay gap: events after {requested} requested, oldest retained is {oldest}")]
    ReplayGap { requested: EventId, oldest: EventId },

    #[error("Invalid event cursor: {0}")]
    InvalidCursor(String),
}

/// Convenience result type.
pub type StreamResult<T> = Result<T, StreamError>;
