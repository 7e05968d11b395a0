//! Built-in tools used by the CLI and by plan files.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::time::Duration;

use super::{ToolError, ToolHandler};

/// Returns its payload unchanged.
pub struct EchoTool;

#[async_trait]
impl ToolHandler for EchoTool {
    async fn execute(&self, payload: &Value) -> Result<Value, ToolError> {
        Ok(payload.clone())
    }

    fn capabilities(&self) -> Vec<String> {
        vec!["echo".into()]
    }
}

/// Sleeps for `payload.ms` milliseconds.
pub struct SleepTool;

#[async_trait]
impl ToolHandler for SleepTool {
    async fn execute(&self, payload: &Value) -> Result<Value, ToolError> {
        let ms = match payload.get("ms") {
            None => 0,
            Some(v) => v
                .as_u64()
                .ok_or_else(|| ToolError::InvalidPayload("'ms' must be an integer".into()))?,
        };
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(json!({ "slept_ms": ms }))
    }

    fn capabilities(&self) -> Vec<String> {
        vec!["timing".into()]
    }
}

/// Always fails with `payload.message`.
pub struct FailTool;

#[async_trait]
impl ToolHandler for FailTool {
    async fn execute(&self, payload: &Value) -> Result<Value, ToolError> {
        let message = payload
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("tool failed on request");
        Err(ToolError::Failed(message.to_string()))
    }
}
