//! Per-session transport state layered over the core session store.

pub mod runtime;

pub use runtime::{SessionRuntime, SessionRuntimes};
