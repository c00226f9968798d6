//! Built-in demo methods served by the binary.

pub mod ask;
pub mod countdown;
pub mod echo;
pub mod ping;
pub mod registry;

pub use registry::{MethodInfo, MethodRegistry};
