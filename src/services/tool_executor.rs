use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::errors::ToolError;
use crate::mcp::routes::{route_for, tool_names};
use crate::services::logger::Logger;
use crate::utils::output::render_json;
use crate::utils::suggest::suggest;

/// Rendered tool result. `is_error` marks typed failures such as a non-zero exit status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub text: String,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: false,
        }
    }

    pub fn failed(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: true,
        }
    }

    pub fn json(value: &Value) -> Self {
        Self::ok(render_json(value))
    }
}

#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn handle(&self, args: Value) -> Result<ToolOutput, ToolError>;
}

/// Routes tool calls to their handler with the action injected into the arguments.
#[derive(Clone)]
pub struct ToolExecutor {
    logger: Logger,
    handlers: Arc<HashMap<String, Arc<dyn ToolHandler>>>,
}

impl ToolExecutor {
    pub fn new(logger: Logger, handlers: HashMap<String, Arc<dyn ToolHandler>>) -> Self {
        Self {
            logger: logger.child("executor"),
            handlers: Arc::new(handlers),
        }
    }

    /// Tools whose route points at a handler that was never registered.
    pub fn unwired_tools(&self) -> Vec<&'static str> {
        tool_names()
            .filter(|tool| {
                route_for(tool)
                    .map(|route| !self.handlers.contains_key(route.handler))
                    .unwrap_or(true)
            })
            .collect()
    }

    pub async fn execute(&self, tool: &str, args: Value) -> Result<ToolOutput, ToolError> {
        let Some(route) = route_for(tool) else {
            let suggestions = suggest(tool, tool_names(), 3);
            let hint = if suggestions.is_empty() {
                "Call tools/list to see available tools".to_string()
            } else {
                format!("Did you mean: {}", suggestions.join(", "))
            };
            return Err(
                ToolError::invalid_params(format!("Unknown tool: {}", tool)).with_hint(hint)
            );
        };
        let handler = self.handlers.get(route.handler).ok_or_else(|| {
            ToolError::internal(format!("No handler registered for {}", route.handler))
        })?;

        let mut args = match args {
            Value::Object(map) => map,
            Value::Null => serde_json::Map::new(),
            _ => return Err(ToolError::invalid_params("Tool arguments must be an object")),
        };
        args.entry("action")
            .or_insert_with(|| Value::String(route.action.to_string()));

        let started = Instant::now();
        let result = handler.handle(Value::Object(args)).await;
        let duration_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(output) => self.logger.debug(
                "tool call",
                Some(&serde_json::json!({
                    "tool": tool,
                    "duration_ms": duration_ms,
                    "is_error": output.is_error,
                })),
            ),
            Err(err) => self.logger.warn(
                "tool call failed",
                Some(&serde_json::json!({
                    "tool": tool,
                    "duration_ms": duration_ms,
                    "code": err.code,
                })),
            ),
        }
        result
    }
}
