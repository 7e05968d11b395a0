//! Typed tool registry.
//!
//! Plans name tools by identifier. The registry maps each identifier to a
//! [`ToolHandler`] and its capability tags; the plan builder consults it so
//! unknown tools are rejected before anything runs, and the registry itself
//! serves as the step executor handed to the pool.

mod builtin;

pub use builtin::{EchoTool, FailTool, SleepTool};

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::core::plan::Step;
use crate::execution::{StepError, StepExecutor};

/// Errors returned by tool handlers.
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    /// The payload did not have the shape the tool expects.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// The tool ran and reported failure.
    #[error("{0}")]
    Failed(String),
}

impl From<ToolError> for StepError {
    fn from(err: ToolError) -> Self {
        StepError::failed(err.to_string())
    }
}

/// A tool invocable from a plan step.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Run the tool with the step payload.
    async fn execute(&self, payload: &Value) -> Result<Value, ToolError>;

    /// Capability tags this tool contributes to a plan.
    fn capabilities(&self) -> Vec<String> {
        Vec::new()
    }
}

struct RegisteredTool {
    handler: Arc<dyn ToolHandler>,
    capabilities: BTreeSet<String>,
}

/// Registry of tools by identifier.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with `echo`, `sleep`, and `fail`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("echo", Arc::new(EchoTool));
        registry.register("sleep", Arc::new(SleepTool));
        registry.register("fail", Arc::new(FailTool));
        registry
    }

    /// Register a tool, replacing any existing handler with the same name.
    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn ToolHandler>) {
        let name = name.into();
        let capabilities = handler.capabilities().into_iter().collect();
        debug!(tool = %name, "tool registered");
        self.tools.insert(
            name,
            RegisteredTool {
                handler,
                capabilities,
            },
        );
    }

    /// Builder form of [`register`](Self::register).
    pub fn with_tool(mut self, name: impl Into<String>, handler: Arc<dyn ToolHandler>) -> Self {
        self.register(name, handler);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.tools.get(name).map(|t| Arc::clone(&t.handler))
    }

    /// Capability tags of a tool; empty for unknown tools.
    pub fn capabilities(&self, name: &str) -> BTreeSet<String> {
        self.tools
            .get(name)
            .map(|t| t.capabilities.clone())
            .unwrap_or_default()
    }

    /// Registered tool names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[async_trait]
impl StepExecutor for ToolRegistry {
    async fn execute(&self, step: &Step) -> Result<Value, StepError> {
        let handler = self
            .get(&step.tool)
            .ok_or_else(|| StepError::failed(format!("unknown tool '{}'", step.tool)))?;
        handler.execute(&step.payload).await.map_err(StepError::from)
    }
}
