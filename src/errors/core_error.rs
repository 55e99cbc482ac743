use thiserror::Error;

/// Failure taxonomy of the remote execution and transfer core.
///
/// Everything except `NotConnected`, `Connection` and `TransferIo` is recoverable by the
/// caller and is surfaced as a structured tool result. Cleanup problems are never errors;
/// they travel as [`crate::services::staging::CleanupWarning`] values.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    #[error("SSH session is not connected")]
    NotConnected,

    #[error("Connection to {endpoint} failed: {reason}")]
    Connection { endpoint: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Command timed out after {timeout_ms} ms")]
    CommandTimeout { timeout_ms: u64 },

    #[error("Command exited with status {exit_code}")]
    CommandFailed { exit_code: i32, stderr: String },

    #[error("Invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("File size ({size} bytes) exceeds maximum allowed ({limit} bytes): {path}")]
    SizeExceeded { path: String, size: u64, limit: u64 },

    #[error("Permissions must be a 3 or 4 digit octal string (e.g. '644', '0755'), got '{value}'")]
    PermissionFormat { value: String },

    #[error("Destination already exists: {path}")]
    DestinationExists { path: String },

    #[error("Source file not found: {path}")]
    SourceNotFound { path: String },

    #[error("Container {vmid} does not exist")]
    TargetNotFound { vmid: u32 },

    #[error("Transfer failed for {path}: {reason}")]
    TransferIo { path: String, reason: String },

    #[error("Indirection command failed with status {exit_code}: {command}")]
    IndirectionFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("{0}")]
    Internal(String),
}

impl CoreError {
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn transfer_io(path: impl Into<String>, reason: impl ToString) -> Self {
        Self::TransferIo {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Faults after which the underlying connection can no longer be trusted.
    pub fn invalidates_session(&self) -> bool {
        match self {
            CoreError::Connection { .. } => true,
            CoreError::TransferIo { reason, .. } => reason.starts_with(CONNECTION_LOST_PREFIX),
            _ => false,
        }
    }

    pub fn is_caller_recoverable(&self) -> bool {
        !matches!(
            self,
            CoreError::NotConnected
                | CoreError::Connection { .. }
                | CoreError::TransferIo { .. }
                | CoreError::Internal(_)
        )
    }
}

/// Marker prepended to transfer reasons when the transport itself went away.
pub const CONNECTION_LOST_PREFIX: &str = "connection lost";
