//! AgenticStream core transport library: JSON-RPC codec, sessions, resumable event streams, and call correlation.

pub mod codec;
pub mod message;
pub mod pending;
pub mod session;
pub mod stream;
pub mod types;

pub use codec::{decode, decode_payload, encode, encode_batch, encode_reply, CodecError, Payload};
pub use message::*;
pub use pending::{PendingCall, PendingCalls, PendingError};
pub use session::{InMemorySessionStore, Session, SessionId, SessionState, SessionStatus, SessionStore};
pub use stream::{StreamConsumer, StreamRegistry, DEFAULT_BUFFER_CAPACITY};
pub use types::*;
