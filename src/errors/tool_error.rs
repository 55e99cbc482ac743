use super::CoreError;
use serde::Serialize;
use serde_json::Value;
use std::error::Error;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    InvalidParams,
    Denied,
    NotFound,
    Conflict,
    Failed,
    Timeout,
    Retryable,
    Internal,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolError {
    pub kind: ToolErrorKind,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    pub retryable: bool,
}

impl ToolError {
    pub fn new(kind: ToolErrorKind, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: code.into(),
            message: message.into(),
            hint: None,
            details: None,
            retryable: matches!(kind, ToolErrorKind::Timeout | ToolErrorKind::Retryable),
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::InvalidParams, "INVALID_PARAMS", message)
    }

    pub fn denied(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Denied, "DENIED", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Internal, "INTERNAL", message)
    }

    /// Payload rendered back to the caller when a tool call fails.
    pub fn to_payload(&self) -> Value {
        let mut payload = serde_json::json!({
            "success": false,
            "error": self.message,
            "code": self.code,
            "kind": self.kind,
            "retryable": self.retryable,
        });
        if let Some(obj) = payload.as_object_mut() {
            if let Some(hint) = &self.hint {
                obj.insert("suggestion".to_string(), Value::String(hint.clone()));
            }
            if let Some(details) = &self.details {
                obj.insert("details".to_string(), details.clone());
            }
        }
        payload
    }
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Error for ToolError {}

impl From<std::io::Error> for ToolError {
    fn from(err: std::io::Error) -> Self {
        ToolError::internal(err.to_string())
    }
}

impl From<CoreError> for ToolError {
    fn from(err: CoreError) -> Self {
        let message = err.to_string();
        match err {
            CoreError::NotConnected => {
                ToolError::new(ToolErrorKind::Retryable, "NOT_CONNECTED", message).with_hint(
                    "Reconnect with proxmox_session action=reconnect, then retry.",
                )
            }
            CoreError::Connection { endpoint, .. } => {
                ToolError::new(ToolErrorKind::Retryable, "CONNECTION_ERROR", message)
                    .with_hint("Check that the host is reachable and the SSH credentials are valid.")
                    .with_details(serde_json::json!({ "endpoint": endpoint }))
            }
            CoreError::Config(_) => {
                ToolError::new(ToolErrorKind::InvalidParams, "CONFIG_ERROR", message)
            }
            CoreError::CommandTimeout { timeout_ms } => {
                ToolError::new(ToolErrorKind::Timeout, "COMMAND_TIMEOUT", message)
                    .with_hint("Increase timeout or run the command in the background.")
                    .with_details(serde_json::json!({ "timeout_ms": timeout_ms }))
            }
            CoreError::CommandFailed { exit_code, stderr } => {
                ToolError::new(ToolErrorKind::Failed, "COMMAND_FAILED", message).with_details(
                    serde_json::json!({ "exit_code": exit_code, "stderr": stderr }),
                )
            }
            CoreError::Validation { field, reason } => {
                ToolError::new(ToolErrorKind::InvalidParams, "VALIDATION_ERROR", message)
                    .with_details(serde_json::json!({ "field": field, "reason": reason }))
            }
            CoreError::SizeExceeded { path, size, limit } => {
                ToolError::new(ToolErrorKind::InvalidParams, "SIZE_EXCEEDS_LIMIT", message)
                    .with_hint("Increase MAX_FILE_SIZE or choose a smaller file.")
                    .with_details(serde_json::json!({
                        "path": path,
                        "size": size,
                        "limit": limit,
                    }))
            }
            CoreError::PermissionFormat { value } => ToolError::new(
                ToolErrorKind::InvalidParams,
                "PERMISSION_FORMAT_INVALID",
                message,
            )
            .with_details(serde_json::json!({ "permissions": value })),
            CoreError::DestinationExists { path } => {
                ToolError::new(ToolErrorKind::Conflict, "DESTINATION_EXISTS", message)
                    .with_hint(
                        "Set overwrite=true to replace the existing file or choose a different path.",
                    )
                    .with_details(serde_json::json!({ "path": path }))
            }
            CoreError::SourceNotFound { path } => {
                ToolError::new(ToolErrorKind::NotFound, "SOURCE_NOT_FOUND", message)
                    .with_hint("Check that the source path is correct and the file exists.")
                    .with_details(serde_json::json!({ "path": path }))
            }
            CoreError::TargetNotFound { vmid } => {
                ToolError::new(ToolErrorKind::NotFound, "TARGET_NOT_FOUND", message)
                    .with_hint("Use proxmox_list_containers to see available containers.")
                    .with_details(serde_json::json!({ "vmid": vmid }))
            }
            CoreError::TransferIo { path, reason } => {
                ToolError::new(ToolErrorKind::Retryable, "TRANSFER_IO_ERROR", message)
                    .with_details(serde_json::json!({ "path": path, "reason": reason }))
            }
            CoreError::IndirectionFailed {
                command,
                exit_code,
                stderr,
            } => ToolError::new(
                ToolErrorKind::Failed,
                "INDIRECTION_COMMAND_FAILED",
                message,
            )
            .with_hint("Check that the container exists, is running, and the path is valid.")
            .with_details(serde_json::json!({
                "command": command,
                "exit_code": exit_code,
                "stderr": stderr,
            })),
            CoreError::Internal(_) => ToolError::internal(message),
        }
    }
}
