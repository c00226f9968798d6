//! `echo` method: return the params unchanged.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::protocol::{MethodHandler, RequestContext};
use crate::types::McpResult;

use super::MethodInfo;

pub const NAME: &str = "echo";

pub fn info() -> MethodInfo {
    MethodInfo::new(NAME, "Return the request params unchanged", false)
}

pub struct Echo;

#[async_trait]
impl MethodHandler for Echo {
    async fn handle(&self, params: Option<Value>, _ctx: RequestContext) -> McpResult<Value> {
        Ok(params.unwrap_or_else(|| json!({})))
    }
}
