use crate::errors::ToolError;
use crate::services::logger::Logger;
use crate::services::tool_executor::{ToolHandler, ToolOutput};
use crate::services::transport::RemoteTransport;
use crate::utils::tool_errors::unknown_action_error;
use serde_json::Value;
use std::sync::Arc;

const SESSION_ACTIONS: &[&str] = &["status", "reconnect"];
pub const SERVICE_NAME: &str = "proxmox-mcp-server";

/// Health and recovery for the shared SSH session.
pub struct SessionManager {
    logger: Logger,
    transport: Arc<dyn RemoteTransport>,
}

impl SessionManager {
    pub fn new(logger: Logger, transport: Arc<dyn RemoteTransport>) -> Self {
        Self {
            logger: logger.child("session"),
            transport,
        }
    }

    pub async fn handle_action(&self, args: Value) -> Result<ToolOutput, ToolError> {
        let action = args.get("action").and_then(|v| v.as_str()).unwrap_or("");
        match action {
            "status" => Ok(ToolOutput::json(&self.health())),
            "reconnect" => self.reconnect().await,
            _ => Err(unknown_action_error(
                "session",
                args.get("action"),
                SESSION_ACTIONS,
            )),
        }
    }

    fn health(&self) -> Value {
        let connected = self.transport.is_connected();
        let mut payload = serde_json::json!({
            "status": if connected { "healthy" } else { "degraded" },
            "service": SERVICE_NAME,
            "ssh_connected": connected,
            "transport": self.transport.describe(),
            "log": self.logger.stats(),
        });
        if !connected {
            if let Some(obj) = payload.as_object_mut() {
                obj.insert(
                    "hint".to_string(),
                    Value::String("Call proxmox_session with action=reconnect".to_string()),
                );
            }
        }
        payload
    }

    async fn reconnect(&self) -> Result<ToolOutput, ToolError> {
        self.logger.info("Reconnect requested", None);
        if let Err(err) = self.transport.reconnect().await {
            self.logger.error(
                "Reconnect failed",
                Some(&serde_json::json!({ "error": err.to_string() })),
            );
            return Err(ToolError::from(err));
        }
        let mut payload = self.health();
        if let Some(obj) = payload.as_object_mut() {
            obj.insert("reconnected".to_string(), Value::Bool(true));
        }
        Ok(ToolOutput::json(&payload))
    }
}

#[async_trait::async_trait]
impl ToolHandler for SessionManager {
    async fn handle(&self, args: Value) -> Result<ToolOutput, ToolError> {
        self.handle_action(args).await
    }
}
