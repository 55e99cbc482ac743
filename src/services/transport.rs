use crate::errors::CoreError;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;

/// Immutable outcome of one remote command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub timed_out: bool,
    pub duration_ms: u64,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
}

impl CommandResult {
    pub fn completed(stdout: impl Into<String>, stderr: impl Into<String>, exit_code: i32) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
            exit_code,
            timed_out: false,
            duration_ms: 0,
            stdout_truncated: false,
            stderr_truncated: false,
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }

    /// Classifies the result: zero exit is the only success signal.
    pub fn check(&self, timeout: Duration) -> Result<(), CoreError> {
        if self.timed_out {
            return Err(CoreError::CommandTimeout {
                timeout_ms: timeout.as_millis() as u64,
            });
        }
        if self.exit_code != 0 {
            return Err(CoreError::CommandFailed {
                exit_code: self.exit_code,
                stderr: self.stderr.clone(),
            });
        }
        Ok(())
    }
}

/// Metadata of a file on the host filesystem as seen through the copy channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteFileStat {
    pub size: u64,
    pub mode: Option<u32>,
}

/// The single connection to the infrastructure host.
///
/// Command execution and the secure copy channel share one underlying connection; an
/// implementation serializes access so only one operation touches it at a time.
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    fn is_connected(&self) -> bool;

    /// Runs `command` through the remote shell. Never fails on timeout: the result carries
    /// `timed_out = true` and whatever output was captured.
    async fn execute(&self, command: &str, timeout: Duration) -> Result<CommandResult, CoreError>;

    /// Stats a host path; `SourceNotFound` when it does not exist.
    async fn stat(&self, remote_path: &str) -> Result<RemoteFileStat, CoreError>;

    /// Copies a local file to `remote_path`, returning the number of bytes written.
    async fn upload(&self, local_path: PathBuf, remote_path: &str) -> Result<u64, CoreError>;

    /// Copies `remote_path` into `local_path`, returning the number of bytes read.
    async fn download(&self, remote_path: &str, local_path: PathBuf) -> Result<u64, CoreError>;

    /// Removes a host file. Removing a path that no longer exists succeeds.
    async fn remove(&self, remote_path: &str) -> Result<(), CoreError>;

    /// Health snapshot for the session tool.
    fn describe(&self) -> Value {
        serde_json::json!({ "ssh_connected": self.is_connected() })
    }

    /// Full disconnect followed by a fresh connect.
    async fn reconnect(&self) -> Result<(), CoreError> {
        Err(CoreError::Internal(
            "reconnect is not supported by this transport".to_string(),
        ))
    }

    /// Best-effort teardown; never fails.
    async fn disconnect(&self) {}
}
