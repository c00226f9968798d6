//! Method registration for the demo server.

use serde::Serialize;

use crate::protocol::Dispatcher;
use crate::types::McpResult;

use super::{ask, countdown, echo, ping};

/// Listing entry for `info`.
#[derive(Debug, Clone, Serialize)]
pub struct MethodInfo {
    pub name: &'static str,
    pub description: &'static str,
    pub streaming: bool,
}

impl MethodInfo {
    pub fn new(name: &'static str, description: &'static str, streaming: bool) -> Self {
        Self {
            name,
            description,
            streaming,
        }
    }
}

pub struct MethodRegistry;

impl MethodRegistry {
    pub fn list_methods() -> Vec<MethodInfo> {
        vec![ping::info(), echo::info(), countdown::info(), ask::info()]
    }

    /// A dispatcher serving every demo method.
    pub fn dispatcher() -> McpResult<Dispatcher> {
        let mut dispatcher = Dispatcher::new().with_instructions(
            "Demo server: ping, echo, countdown (streams progress) and ask (calls back into the client).",
        );
        dispatcher.register(ping::NAME, ping::Ping)?;
        dispatcher.register(echo::NAME, echo::Echo)?;
        dispatcher.register(countdown::NAME, countdown::Countdown)?;
        dispatcher.register(ask::NAME, ask::Ask)?;
        Ok(dispatcher)
    }
}
