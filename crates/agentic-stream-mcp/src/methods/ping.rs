//! `ping` method: liveness check.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::protocol::{MethodHandler, RequestContext};
use crate::types::McpResult;

use super::MethodInfo;

pub const NAME: &str = "ping";

pub fn info() -> MethodInfo {
    MethodInfo::new(NAME, "Answer \"pong\"", false)
}

pub struct Ping;

#[async_trait]
impl MethodHandler for Ping {
    async fn handle(&self, _params: Option<Value>, _ctx: RequestContext) -> McpResult<Value> {
        Ok(json!("pong"))
    }
}
