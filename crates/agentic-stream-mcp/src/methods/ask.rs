//! `ask` method: relay a question to the client and return its answer.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::protocol::{MethodHandler, RequestContext};
use crate::types::{McpError, McpResult};

use super::MethodInfo;

pub const NAME: &str = "ask";
/// Method of the request sent to the client.
pub const CLIENT_METHOD: &str = "client/ask";

#[derive(Debug, Deserialize)]
struct AskParams {
    question: String,
}

pub fn info() -> MethodInfo {
    MethodInfo::new(
        NAME,
        "Send `question` to the client as a client/ask request and return its answer",
        true,
    )
}

pub struct Ask;

#[async_trait]
impl MethodHandler for Ask {
    async fn handle(&self, params: Option<Value>, ctx: RequestContext) -> McpResult<Value> {
        let params: AskParams = params
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| McpError::InvalidParams(e.to_string()))?
            .ok_or_else(|| McpError::InvalidParams("ask requires a question".to_string()))?;

        let answer = ctx
            .call(CLIENT_METHOD, Some(json!({ "question": params.question })))
            .await?;

        Ok(json!({ "answer": answer }))
    }

    fn streaming(&self) -> bool {
        true
    }
}
