//! AgenticStream MCP Server. Streamable HTTP and stdio transports over the AgenticStream core.

pub mod config;
pub mod methods;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod types;

pub use config::{ConfigError, ServerConfig};
pub use methods::MethodRegistry;
pub use protocol::{CallEnv, Dispatcher, MethodHandler, RequestContext};
#[cfg(feature = "http")]
pub use transport::HttpTransport;
pub use transport::StdioTransport;
