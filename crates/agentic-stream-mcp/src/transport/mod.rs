//! Transport layer: stdio and Streamable HTTP.

pub mod framing;
#[cfg(feature = "http")]
pub mod http;
#[cfg(feature = "http")]
pub mod maintenance;
#[cfg(feature = "http")]
pub mod sse;
pub mod stdio;

#[cfg(feature = "http")]
pub use http::{AppState, HttpTransport, TransportError, LAST_EVENT_ID_HEADER, SESSION_HEADER};
pub use stdio::StdioTransport;
