//! `countdown` method: count down in steps, pushing a progress notification per step.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::protocol::{MethodHandler, RequestContext};
use crate::types::{McpError, McpResult, ProgressParams, ProgressToken, PROGRESS};

use super::MethodInfo;

pub const NAME: &str = "countdown";
const MAX_STEPS: u64 = 1000;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CountdownParams {
    #[serde(default = "default_from")]
    from: u64,
    #[serde(default = "default_interval_ms")]
    interval_ms: u64,
    #[serde(default)]
    progress_token: Option<ProgressToken>,
}

fn default_from() -> u64 {
    3
}

fn default_interval_ms() -> u64 {
    100
}

pub fn info() -> MethodInfo {
    MethodInfo::new(
        NAME,
        "Count down from `from`, emitting notifications/progress every `intervalMs`",
        true,
    )
}

pub struct Countdown;

#[async_trait]
impl MethodHandler for Countdown {
    async fn handle(&self, params: Option<Value>, ctx: RequestContext) -> McpResult<Value> {
        let params: CountdownParams = serde_json::from_value(params.unwrap_or_else(|| json!({})))
            .map_err(|e| McpError::InvalidParams(e.to_string()))?;

        if params.from > MAX_STEPS {
            return Err(McpError::InvalidParams(format!(
                "from must be at most {MAX_STEPS}, got {}",
                params.from
            )));
        }

        let token = params
            .progress_token
            .unwrap_or_else(|| ProgressToken::String(ctx.request_id.to_string()));
        let interval = Duration::from_millis(params.interval_ms);

        for step in 1..=params.from {
            tokio::select! {
                _ = ctx.cancellation().cancelled() => return Err(McpError::RequestCancelled),
                _ = tokio::time::sleep(interval) => {}
            }

            let progress = ProgressParams {
                progress_token: token.clone(),
                progress: step as f64,
                total: Some(params.from as f64),
            };
            if let Err(e) = ctx.notify(PROGRESS, Some(serde_json::to_value(progress)?)) {
                tracing::debug!("Progress not delivered: {e}");
            }
        }

        Ok(json!({ "done": true, "steps": params.from }))
    }

    fn streaming(&self) -> bool {
        true
    }
}
