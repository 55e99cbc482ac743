//! Container operations expressed as `pct` invocations on the Proxmox host.
//!
//! Every method builds exactly one shell command and runs it through the shared
//! [`RemoteTransport`]. Container state is never cached; each call re-queries `pct`.

use crate::constants::timeouts;
use crate::errors::CoreError;
use crate::services::logger::Logger;
use crate::services::transport::{CommandResult, RemoteTransport};
use crate::utils::shell::quote;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Container identifier, already range-checked by the argument validators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Vmid(pub u32);

impl fmt::Display for Vmid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetState {
    Running,
    Stopped,
    Unknown,
}

impl TargetState {
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "running" => TargetState::Running,
            "stopped" => TargetState::Stopped,
            _ => TargetState::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TargetState::Running => "running",
            TargetState::Stopped => "stopped",
            TargetState::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerRecord {
    pub vmid: u32,
    pub status: TargetState,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LifecycleOutcome {
    pub vmid: Vmid,
    pub state: TargetState,
    pub changed: bool,
}

/// Parses the column report printed by `pct list`.
///
/// The header and any row whose first column is not numeric are skipped. Columns are split on
/// runs of whitespace; the name is the last column and an optional lock column may sit between
/// status and name.
pub fn parse_list_output(output: &str) -> Vec<ContainerRecord> {
    output
        .lines()
        .filter_map(|line| {
            let columns: Vec<&str> = line.split_whitespace().collect();
            let vmid = columns.first()?.parse::<u32>().ok()?;
            let status = columns
                .get(1)
                .map(|raw| TargetState::parse(raw))
                .unwrap_or(TargetState::Unknown);
            let name = if columns.len() >= 3 {
                columns[columns.len() - 1].to_string()
            } else {
                String::new()
            };
            let lock = if columns.len() >= 4 {
                Some(columns[2..columns.len() - 1].join(" "))
            } else {
                None
            };
            Some(ContainerRecord {
                vmid,
                status,
                name,
                lock,
            })
        })
        .collect()
}

/// Reads the `status: <state>` line of `pct status`; anything else is `Unknown`.
pub fn parse_status_output(output: &str) -> TargetState {
    output
        .lines()
        .find_map(|line| line.trim().strip_prefix("status:"))
        .map(TargetState::parse)
        .unwrap_or(TargetState::Unknown)
}

fn reports_missing_target(stderr: &str, vmid: Vmid) -> bool {
    stderr.contains("does not exist") && stderr.contains(&format!("{}.conf", vmid))
}

/// Indirection adapter over `pct`.
#[derive(Clone)]
pub struct PctAdapter {
    transport: Arc<dyn RemoteTransport>,
    logger: Logger,
}

impl PctAdapter {
    pub fn new(transport: Arc<dyn RemoteTransport>, logger: Logger) -> Self {
        Self {
            transport,
            logger: logger.child("pct"),
        }
    }

    fn probe_timeout() -> Duration {
        Duration::from_secs(timeouts::PROBE_SECS)
    }

    async fn checked(
        &self,
        vmid: Option<Vmid>,
        command: String,
        timeout: Duration,
    ) -> Result<CommandResult, CoreError> {
        let result = self.transport.execute(&command, timeout).await?;
        if let Some(vmid) = vmid {
            if !result.success() && reports_missing_target(&result.stderr, vmid) {
                return Err(CoreError::TargetNotFound { vmid: vmid.0 });
            }
        }
        result.check(timeout)?;
        Ok(result)
    }

    pub async fn list(&self) -> Result<Vec<ContainerRecord>, CoreError> {
        let result = self
            .checked(None, "pct list".to_string(), Self::probe_timeout())
            .await?;
        Ok(parse_list_output(&result.stdout))
    }

    pub async fn status(&self, vmid: Vmid) -> Result<TargetState, CoreError> {
        let result = self
            .checked(Some(vmid), format!("pct status {}", vmid), Self::probe_timeout())
            .await?;
        Ok(parse_status_output(&result.stdout))
    }

    pub async fn start(&self, vmid: Vmid) -> Result<LifecycleOutcome, CoreError> {
        self.transition(vmid, TargetState::Running, "start", "already running")
            .await
    }

    pub async fn stop(&self, vmid: Vmid) -> Result<LifecycleOutcome, CoreError> {
        self.transition(vmid, TargetState::Stopped, "stop", "not running")
            .await
    }

    async fn transition(
        &self,
        vmid: Vmid,
        desired: TargetState,
        verb: &str,
        already_marker: &str,
    ) -> Result<LifecycleOutcome, CoreError> {
        if self.status(vmid).await? == desired {
            return Ok(LifecycleOutcome {
                vmid,
                state: desired,
                changed: false,
            });
        }
        let timeout = Duration::from_secs(timeouts::COMMAND_MAX_SECS);
        match self
            .checked(Some(vmid), format!("pct {} {}", verb, vmid), timeout)
            .await
        {
            Ok(_) => {
                self.logger.info(
                    "Container lifecycle changed",
                    Some(&serde_json::json!({ "vmid": vmid, "action": verb })),
                );
                Ok(LifecycleOutcome {
                    vmid,
                    state: desired,
                    changed: true,
                })
            }
            Err(CoreError::CommandFailed { stderr, .. }) if stderr.contains(already_marker) => {
                Ok(LifecycleOutcome {
                    vmid,
                    state: desired,
                    changed: false,
                })
            }
            Err(err) => Err(err),
        }
    }

    /// Runs `command` inside the container through `bash -c`.
    ///
    /// The raw result is returned so callers see the exact exit status; only a missing
    /// container is turned into an error.
    pub async fn run(
        &self,
        vmid: Vmid,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandResult, CoreError> {
        let line = format!("pct exec {} -- bash -c {}", vmid, quote(command));
        let result = self.transport.execute(&line, timeout).await?;
        if !result.success() && reports_missing_target(&result.stderr, vmid) {
            return Err(CoreError::TargetNotFound { vmid: vmid.0 });
        }
        Ok(result)
    }

    /// Host file -> container file.
    pub async fn copy_in(
        &self,
        vmid: Vmid,
        host_path: &str,
        target_path: &str,
    ) -> Result<(), CoreError> {
        let line = format!(
            "pct push {} {} {}",
            vmid,
            quote(host_path),
            quote(target_path)
        );
        self.primitive(vmid, line, Duration::from_secs(timeouts::STAGING_COPY_SECS))
            .await
            .map(|_| ())
    }

    /// Container file -> host file.
    pub async fn copy_out(
        &self,
        vmid: Vmid,
        target_path: &str,
        host_path: &str,
    ) -> Result<(), CoreError> {
        let line = format!(
            "pct pull {} {} {}",
            vmid,
            quote(target_path),
            quote(host_path)
        );
        self.primitive(vmid, line, Duration::from_secs(timeouts::STAGING_COPY_SECS))
            .await
            .map(|_| ())
    }

    pub async fn file_exists(&self, vmid: Vmid, path: &str) -> Result<bool, CoreError> {
        let line = format!("pct exec {} -- test -f {}", vmid, quote(path));
        let result = self.transport.execute(&line, Self::probe_timeout()).await?;
        match result.exit_code {
            0 if !result.timed_out => Ok(true),
            1 => Ok(false),
            _ => self.classify(vmid, line, result, Self::probe_timeout()).map(|_| false),
        }
    }

    pub async fn chmod(&self, vmid: Vmid, mode: &str, path: &str) -> Result<(), CoreError> {
        let line = format!("pct exec {} -- chmod {} {}", vmid, quote(mode), quote(path));
        self.primitive(vmid, line, Self::probe_timeout())
            .await
            .map(|_| ())
    }

    /// Octal permission bits of a container file, `None` when `stat` output is unreadable.
    pub async fn file_mode(&self, vmid: Vmid, path: &str) -> Result<Option<u32>, CoreError> {
        let line = format!("pct exec {} -- stat -c %a {}", vmid, quote(path));
        let result = self.primitive(vmid, line, Self::probe_timeout()).await?;
        Ok(u32::from_str_radix(result.stdout.trim(), 8).ok())
    }

    async fn primitive(
        &self,
        vmid: Vmid,
        line: String,
        timeout: Duration,
    ) -> Result<CommandResult, CoreError> {
        let result = self.transport.execute(&line, timeout).await?;
        self.classify(vmid, line, result, timeout)
    }

    fn classify(
        &self,
        vmid: Vmid,
        line: String,
        result: CommandResult,
        timeout: Duration,
    ) -> Result<CommandResult, CoreError> {
        if result.timed_out {
            return Err(CoreError::CommandTimeout {
                timeout_ms: timeout.as_millis() as u64,
            });
        }
        if result.exit_code == 0 {
            return Ok(result);
        }
        if reports_missing_target(&result.stderr, vmid) {
            return Err(CoreError::TargetNotFound { vmid: vmid.0 });
        }
        self.logger.warn(
            "Indirection command failed",
            Some(&serde_json::json!({ "vmid": vmid, "exit_code": result.exit_code })),
        );
        Err(CoreError::IndirectionFailed {
            command: line,
            exit_code: result.exit_code,
            stderr: result.stderr,
        })
    }
}
