//! Request dispatch: routing, per-request context and initialization.

pub mod context;
pub mod handler;
pub mod negotiation;
pub mod validator;

pub use context::{CallEnv, MessageSink, NullSink, RequestContext};
pub use handler::{Dispatcher, FnHandler, MethodHandler, NotificationHandler};
pub use negotiation::NegotiatedCapabilities;
