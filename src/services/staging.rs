//! Staged file transfer between the caller's filesystem, the Proxmox host and containers.
//!
//! Each transfer walks a small state machine:
//!
//! ```text
//! Init -> Validated -> Staged -> Transferred -> Cleaned
//!                  \-------------^  (host-direct transfers skip Staged)
//! any non-terminal state -> Failed
//! ```
//!
//! Container transfers bridge through a [`StagingArtifact`] on the host. The artifact is
//! released after the inner steps return, whatever they returned; a failed release becomes a
//! [`CleanupWarning`] and never changes the outcome.

use crate::constants::timeouts;
use crate::errors::{CoreError, ToolError};
use crate::services::config::ServerConfig;
use crate::services::logger::Logger;
use crate::services::pct::{PctAdapter, Vmid};
use crate::services::transport::RemoteTransport;
use crate::services::validation::{
    validate_path, validate_permissions, validate_remote_path, validate_size,
};
use crate::utils::fs_atomic::{
    ensure_dir_for_file, path_exists, remove_quietly, set_mode, sha256_file, temp_sibling_path,
};
use crate::utils::shell::quote;
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferState {
    Init,
    Validated,
    Staged,
    Transferred,
    Cleaned,
    Failed,
}

impl TransferState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TransferState::Cleaned | TransferState::Failed)
    }

    pub fn permits(self, next: TransferState) -> bool {
        use TransferState::*;
        match next {
            Failed => !self.is_terminal(),
            _ => matches!(
                (self, next),
                (Init, Validated)
                    | (Validated, Staged)
                    | (Staged, Transferred)
                    | (Validated, Transferred)
                    | (Transferred, Cleaned)
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Download,
    Upload,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupWarning {
    pub path: String,
    pub reason: String,
}

/// Host-side path holding bytes in transit. Only [`StagingArtifact::release`] ends its life.
#[derive(Debug)]
pub struct StagingArtifact {
    path: String,
}

impl StagingArtifact {
    pub fn allocate(prefix: &str) -> Self {
        Self {
            path: format!("{}{}", prefix, uuid::Uuid::new_v4().simple()),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Removes the artifact from the host. A path that is already gone counts as removed.
    pub async fn release(self, transport: &dyn RemoteTransport) -> Option<CleanupWarning> {
        match transport.remove(&self.path).await {
            Ok(()) => None,
            Err(err) => Some(CleanupWarning {
                path: self.path,
                reason: err.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub source: String,
    pub destination: PathBuf,
    pub overwrite: bool,
}

#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub source: PathBuf,
    pub destination: String,
    pub permissions: String,
    pub overwrite: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransferOutcome {
    pub direction: Direction,
    pub target: String,
    pub source: String,
    pub destination: String,
    pub state: TransferState,
    pub bytes_transferred: u64,
    pub sha256: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permissions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permissions_applied: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permissions_warning: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cleanup_warnings: Vec<CleanupWarning>,
}

/// A transfer that ended in `Failed`, with the state it last reached.
#[derive(Debug, Clone)]
pub struct TransferFailure {
    pub error: CoreError,
    pub failed_after: TransferState,
    pub cleanup_warnings: Vec<CleanupWarning>,
}

impl From<TransferFailure> for ToolError {
    fn from(failure: TransferFailure) -> Self {
        let mut tool = ToolError::from(failure.error);
        let mut details = match tool.details.take() {
            Some(Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        };
        details.insert(
            "failed_after".to_string(),
            serde_json::json!(failure.failed_after),
        );
        if !failure.cleanup_warnings.is_empty() {
            details.insert(
                "cleanup_warnings".to_string(),
                serde_json::json!(failure.cleanup_warnings),
            );
        }
        tool.with_details(Value::Object(details))
    }
}

/// What the inner steps of a transfer produced.
#[derive(Debug, Default)]
struct Moved {
    bytes: u64,
    sha256: String,
    mode: Option<u32>,
    permissions_applied: Option<bool>,
    permissions_warning: Option<String>,
}

/// Tracks one transfer through its states and collects cleanup warnings.
struct Ledger {
    direction: Direction,
    target: String,
    source: String,
    destination: String,
    state: TransferState,
    warnings: Vec<CleanupWarning>,
    logger: Logger,
}

impl Ledger {
    fn new(
        logger: &Logger,
        direction: Direction,
        target: String,
        source: String,
        destination: String,
    ) -> Self {
        Self {
            direction,
            target,
            source,
            destination,
            state: TransferState::Init,
            warnings: Vec::new(),
            logger: logger.clone(),
        }
    }

    fn advance(&mut self, next: TransferState) {
        debug_assert!(
            self.state.permits(next),
            "illegal transfer transition {:?} -> {:?}",
            self.state,
            next
        );
        self.logger.debug(
            "transfer state",
            Some(&serde_json::json!({
                "target": self.target,
                "from": self.state,
                "to": next,
            })),
        );
        self.state = next;
    }

    async fn release(&mut self, artifact: StagingArtifact, transport: &dyn RemoteTransport) {
        if let Some(warning) = artifact.release(transport).await {
            self.logger.warn(
                "Failed to remove staging artifact",
                Some(&serde_json::json!({ "path": warning.path, "reason": warning.reason })),
            );
            self.warnings.push(warning);
        }
    }

    fn conclude(
        mut self,
        result: Result<Moved, CoreError>,
        permissions: Option<String>,
    ) -> Result<TransferOutcome, TransferFailure> {
        match result {
            Ok(moved) => {
                self.advance(TransferState::Cleaned);
                self.logger.info(
                    "Transfer complete",
                    Some(&serde_json::json!({
                        "direction": self.direction,
                        "target": self.target,
                        "bytes": moved.bytes,
                    })),
                );
                Ok(TransferOutcome {
                    direction: self.direction,
                    target: self.target,
                    source: self.source,
                    destination: self.destination,
                    state: self.state,
                    bytes_transferred: moved.bytes,
                    sha256: moved.sha256,
                    mode: moved.mode.map(|mode| format!("{:04o}", mode)),
                    permissions,
                    permissions_applied: moved.permissions_applied,
                    permissions_warning: moved.permissions_warning,
                    cleanup_warnings: self.warnings,
                })
            }
            Err(error) => {
                let failed_after = self.state;
                self.advance(TransferState::Failed);
                let meta = serde_json::json!({
                    "direction": self.direction,
                    "target": self.target,
                    "failed_after": failed_after,
                    "error": error.to_string(),
                });
                if error.is_caller_recoverable() {
                    self.logger.warn("Transfer failed", Some(&meta));
                } else {
                    self.logger.error("Transfer failed; session may need a reconnect", Some(&meta));
                }
                Err(TransferFailure {
                    error,
                    failed_after,
                    cleanup_warnings: self.warnings,
                })
            }
        }
    }
}

pub struct StagingOrchestrator {
    transport: Arc<dyn RemoteTransport>,
    pct: PctAdapter,
    max_file_size: u64,
    staging_prefix: String,
    logger: Logger,
}

impl StagingOrchestrator {
    pub fn new(
        transport: Arc<dyn RemoteTransport>,
        pct: PctAdapter,
        config: &ServerConfig,
        logger: Logger,
    ) -> Self {
        Self {
            transport,
            pct,
            max_file_size: config.max_file_size,
            staging_prefix: config.staging_prefix.clone(),
            logger: logger.child("staging"),
        }
    }

    /// Container file -> host staging artifact -> local file.
    pub async fn download_from_container(
        &self,
        vmid: Vmid,
        request: DownloadRequest,
    ) -> Result<TransferOutcome, TransferFailure> {
        let mut ledger = Ledger::new(
            &self.logger,
            Direction::Download,
            format!("container:{}", vmid),
            request.source.clone(),
            request.destination.display().to_string(),
        );
        let result = match self.check_container_download(vmid, &request).await {
            Err(err) => Err(err),
            Ok(()) => {
                ledger.advance(TransferState::Validated);
                let artifact = StagingArtifact::allocate(&self.staging_prefix);
                let moved = self
                    .pull_through(vmid, &request, artifact.path(), &mut ledger)
                    .await;
                ledger.release(artifact, self.transport.as_ref()).await;
                moved
            }
        };
        ledger.conclude(result, None)
    }

    /// Local file -> host staging artifact -> container file, then chmod inside the container.
    pub async fn upload_to_container(
        &self,
        vmid: Vmid,
        request: UploadRequest,
    ) -> Result<TransferOutcome, TransferFailure> {
        let mut ledger = Ledger::new(
            &self.logger,
            Direction::Upload,
            format!("container:{}", vmid),
            request.source.display().to_string(),
            request.destination.clone(),
        );
        let result = match self.check_container_upload(vmid, &request).await {
            Err(err) => Err(err),
            Ok(()) => {
                ledger.advance(TransferState::Validated);
                let artifact = StagingArtifact::allocate(&self.staging_prefix);
                let moved = self
                    .push_through(vmid, &request, artifact.path(), &mut ledger)
                    .await;
                ledger.release(artifact, self.transport.as_ref()).await;
                moved
            }
        };
        ledger.conclude(result, Some(request.permissions))
    }

    /// Host file -> local file over the copy channel; no staging.
    pub async fn download_from_host(
        &self,
        request: DownloadRequest,
    ) -> Result<TransferOutcome, TransferFailure> {
        let mut ledger = Ledger::new(
            &self.logger,
            Direction::Download,
            "host".to_string(),
            request.source.clone(),
            request.destination.display().to_string(),
        );
        let result = self.host_download_steps(&request, &mut ledger).await;
        ledger.conclude(result, None)
    }

    /// Local file -> host file over the copy channel, then chmod on the host.
    pub async fn upload_to_host(
        &self,
        request: UploadRequest,
    ) -> Result<TransferOutcome, TransferFailure> {
        let mut ledger = Ledger::new(
            &self.logger,
            Direction::Upload,
            "host".to_string(),
            request.source.display().to_string(),
            request.destination.clone(),
        );
        let result = self.host_upload_steps(&request, &mut ledger).await;
        ledger.conclude(result, Some(request.permissions))
    }

    async fn host_download_steps(
        &self,
        request: &DownloadRequest,
        ledger: &mut Ledger,
    ) -> Result<Moved, CoreError> {
        check_local_destination(request)?;
        validate_remote_path("host_path", &request.source)?;
        let stat = self.transport.stat(&request.source).await?;
        validate_size(&request.source, stat.size, self.max_file_size)?;
        ledger.advance(TransferState::Validated);

        let bytes = self
            .receive_local(&request.source, &request.destination)
            .await?;
        ledger.advance(TransferState::Transferred);
        finish_local_download(&request.destination, bytes, stat.mode)
    }

    async fn host_upload_steps(
        &self,
        request: &UploadRequest,
        ledger: &mut Ledger,
    ) -> Result<Moved, CoreError> {
        self.check_local_source(request)?;
        validate_remote_path("host_path", &request.destination)?;
        if !request.overwrite && self.host_file_exists(&request.destination).await? {
            return Err(CoreError::DestinationExists {
                path: request.destination.clone(),
            });
        }
        ledger.advance(TransferState::Validated);

        let sha256 = local_sha256(&request.source)?;
        let bytes = self
            .transport
            .upload(request.source.clone(), &request.destination)
            .await?;
        ledger.advance(TransferState::Transferred);

        let line = format!(
            "chmod {} {}",
            quote(&request.permissions),
            quote(&request.destination)
        );
        let chmod = match self.transport.execute(&line, probe_timeout()).await {
            Ok(result) => result.check(probe_timeout()),
            Err(err) => Err(err),
        };
        Ok(with_chmod(bytes, sha256, chmod, &self.logger))
    }

    async fn check_container_download(
        &self,
        vmid: Vmid,
        request: &DownloadRequest,
    ) -> Result<(), CoreError> {
        check_local_destination(request)?;
        validate_remote_path("container_path", &request.source)?;
        if !self.pct.file_exists(vmid, &request.source).await? {
            return Err(CoreError::SourceNotFound {
                path: request.source.clone(),
            });
        }
        Ok(())
    }

    async fn pull_through(
        &self,
        vmid: Vmid,
        request: &DownloadRequest,
        staged: &str,
        ledger: &mut Ledger,
    ) -> Result<Moved, CoreError> {
        self.pct.copy_out(vmid, &request.source, staged).await?;
        ledger.advance(TransferState::Staged);

        let stat = self.transport.stat(staged).await?;
        validate_size(&request.source, stat.size, self.max_file_size)?;
        let bytes = self.receive_local(staged, &request.destination).await?;
        ledger.advance(TransferState::Transferred);

        let mode = match self.pct.file_mode(vmid, &request.source).await {
            Ok(mode) => mode,
            Err(err) => {
                self.logger.debug(
                    "Could not read container file mode",
                    Some(&serde_json::json!({ "error": err.to_string() })),
                );
                None
            }
        };
        finish_local_download(&request.destination, bytes, mode)
    }

    async fn check_container_upload(
        &self,
        vmid: Vmid,
        request: &UploadRequest,
    ) -> Result<(), CoreError> {
        self.check_local_source(request)?;
        validate_remote_path("container_path", &request.destination)?;
        if !request.overwrite && self.pct.file_exists(vmid, &request.destination).await? {
            return Err(CoreError::DestinationExists {
                path: request.destination.clone(),
            });
        }
        Ok(())
    }

    async fn push_through(
        &self,
        vmid: Vmid,
        request: &UploadRequest,
        staged: &str,
        ledger: &mut Ledger,
    ) -> Result<Moved, CoreError> {
        let sha256 = local_sha256(&request.source)?;
        let bytes = self.transport.upload(request.source.clone(), staged).await?;
        ledger.advance(TransferState::Staged);

        self.pct.copy_in(vmid, staged, &request.destination).await?;
        ledger.advance(TransferState::Transferred);

        let chmod = self
            .pct
            .chmod(vmid, &request.permissions, &request.destination)
            .await;
        Ok(with_chmod(bytes, sha256, chmod, &self.logger))
    }

    /// Local-side upload checks. Oversized or missing sources never reach the transport.
    fn check_local_source(&self, request: &UploadRequest) -> Result<(), CoreError> {
        validate_path("local_path", &request.source.to_string_lossy())?;
        validate_permissions(&request.permissions)?;
        let display = request.source.display().to_string();
        let meta = fs::metadata(&request.source).map_err(|_| CoreError::SourceNotFound {
            path: display.clone(),
        })?;
        if !meta.is_file() {
            return Err(CoreError::validation(
                "local_path",
                format!("not a regular file: {}", display),
            ));
        }
        validate_size(&display, meta.len(), self.max_file_size)
    }

    async fn host_file_exists(&self, path: &str) -> Result<bool, CoreError> {
        let result = self
            .transport
            .execute(&format!("test -f {}", quote(path)), probe_timeout())
            .await?;
        match result.exit_code {
            0 if !result.timed_out => Ok(true),
            1 => Ok(false),
            _ => result.check(probe_timeout()).map(|_| false),
        }
    }

    /// Streams `remote` into a temp sibling of `local` and renames it into place.
    async fn receive_local(&self, remote: &str, local: &Path) -> Result<u64, CoreError> {
        let display = local.display().to_string();
        ensure_dir_for_file(local).map_err(|err| CoreError::transfer_io(&display, err))?;
        let partial = temp_sibling_path(local);
        let bytes = match self.transport.download(remote, partial.clone()).await {
            Ok(bytes) => bytes,
            Err(err) => {
                remove_quietly(&partial);
                return Err(err);
            }
        };
        if let Err(err) = fs::rename(&partial, local) {
            remove_quietly(&partial);
            return Err(CoreError::transfer_io(display, err));
        }
        Ok(bytes)
    }
}

fn probe_timeout() -> Duration {
    Duration::from_secs(timeouts::PROBE_SECS)
}

fn check_local_destination(request: &DownloadRequest) -> Result<(), CoreError> {
    let display = request.destination.display().to_string();
    validate_path("local_path", &request.destination.to_string_lossy())?;
    if !request.overwrite && path_exists(&request.destination) {
        return Err(CoreError::DestinationExists { path: display });
    }
    Ok(())
}

fn local_sha256(path: &Path) -> Result<String, CoreError> {
    sha256_file(path).map_err(|err| CoreError::transfer_io(path.display().to_string(), err))
}

fn finish_local_download(local: &Path, bytes: u64, mode: Option<u32>) -> Result<Moved, CoreError> {
    let display = local.display().to_string();
    if let Some(mode) = mode {
        set_mode(local, mode).map_err(|err| CoreError::transfer_io(&display, err))?;
    }
    let sha256 = sha256_file(local).map_err(|err| CoreError::transfer_io(&display, err))?;
    Ok(Moved {
        bytes,
        sha256,
        mode,
        ..Moved::default()
    })
}

/// Permission failures after a completed copy are reported, not raised.
fn with_chmod(bytes: u64, sha256: String, chmod: Result<(), CoreError>, logger: &Logger) -> Moved {
    match chmod {
        Ok(_) => Moved {
            bytes,
            sha256,
            permissions_applied: Some(true),
            ..Moved::default()
        },
        Err(err) => {
            logger.warn(
                "chmod after upload failed",
                Some(&serde_json::json!({ "error": err.to_string() })),
            );
            Moved {
                bytes,
                sha256,
                permissions_applied: Some(false),
                permissions_warning: Some(err.to_string()),
                ..Moved::default()
            }
        }
    }
}
