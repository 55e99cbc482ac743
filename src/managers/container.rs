use crate::constants::{limits, staging};
use crate::errors::ToolError;
use crate::services::config::ServerConfig;
use crate::services::logger::Logger;
use crate::services::pct::{PctAdapter, TargetState};
use crate::services::staging::{
    Direction, DownloadRequest, StagingOrchestrator, TransferOutcome, UploadRequest,
};
use crate::services::tool_executor::{ToolHandler, ToolOutput};
use crate::services::validation::Validation;
use crate::utils::output::{render_container_list, render_exec, ResponseFormat};
use crate::utils::tool_errors::unknown_action_error;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;

const CONTAINER_ACTIONS: &[&str] = &[
    "exec", "list", "status", "start", "stop", "download", "upload",
];

pub struct ContainerManager {
    logger: Logger,
    validation: Validation,
    config: Arc<ServerConfig>,
    pct: PctAdapter,
    staging: Arc<StagingOrchestrator>,
}

impl ContainerManager {
    pub fn new(
        logger: Logger,
        validation: Validation,
        config: Arc<ServerConfig>,
        pct: PctAdapter,
        staging: Arc<StagingOrchestrator>,
    ) -> Self {
        Self {
            logger: logger.child("container"),
            validation,
            config,
            pct,
            staging,
        }
    }

    pub async fn handle_action(&self, args: Value) -> Result<ToolOutput, ToolError> {
        let action = args.get("action").and_then(|v| v.as_str()).unwrap_or("");
        match action {
            "exec" => self.exec(&args).await,
            "list" => self.list(&args).await,
            "status" => self.status(&args).await,
            "start" => self.lifecycle(&args, true).await,
            "stop" => self.lifecycle(&args, false).await,
            "download" => self.download(&args).await,
            "upload" => self.upload(&args).await,
            _ => Err(unknown_action_error(
                "container",
                args.get("action"),
                CONTAINER_ACTIONS,
            )),
        }
    }

    async fn exec(&self, args: &Value) -> Result<ToolOutput, ToolError> {
        let vmid = self.validation.ensure_vmid(args)?;
        let command = self
            .validation
            .required_string(args, "command", limits::MAX_COMMAND_LENGTH)?;
        let timeout = self.validation.ensure_timeout(args)?;
        let format = self
            .validation
            .ensure_response_format(args, ResponseFormat::Text)?;

        let result = self.pct.run(vmid, &command, timeout).await?;
        let rendered = render_exec(&result, format, self.config.character_limit);
        Ok(if result.success() {
            ToolOutput::ok(rendered)
        } else {
            ToolOutput::failed(rendered)
        })
    }

    async fn list(&self, args: &Value) -> Result<ToolOutput, ToolError> {
        let format = self
            .validation
            .ensure_response_format(args, ResponseFormat::Json)?;
        let records = self.pct.list().await?;
        Ok(ToolOutput::ok(render_container_list(&records, format)))
    }

    async fn status(&self, args: &Value) -> Result<ToolOutput, ToolError> {
        let vmid = self.validation.ensure_vmid(args)?;
        let format = self
            .validation
            .ensure_response_format(args, ResponseFormat::Json)?;
        let state = self.pct.status(vmid).await?;
        Ok(match format {
            ResponseFormat::Text => {
                ToolOutput::ok(format!("Container {} is {}", vmid, state.as_str()))
            }
            ResponseFormat::Json => ToolOutput::json(&serde_json::json!({
                "vmid": vmid,
                "status": state,
                "success": true,
            })),
        })
    }

    async fn lifecycle(&self, args: &Value, start: bool) -> Result<ToolOutput, ToolError> {
        let vmid = self.validation.ensure_vmid(args)?;
        let outcome = if start {
            self.pct.start(vmid).await?
        } else {
            self.pct.stop(vmid).await?
        };
        let verb = if start { "started" } else { "stopped" };
        let message = if outcome.changed {
            format!("Container {} {} successfully", vmid, verb)
        } else {
            format!("Container {} is already {}", vmid, outcome.state.as_str())
        };
        if outcome.state == TargetState::Unknown {
            self.logger.warn(
                "Lifecycle finished with unknown state",
                Some(&serde_json::json!({ "vmid": vmid })),
            );
        }
        Ok(ToolOutput::json(&serde_json::json!({
            "success": true,
            "message": message,
            "vmid": outcome.vmid,
            "state": outcome.state,
            "changed": outcome.changed,
        })))
    }

    async fn download(&self, args: &Value) -> Result<ToolOutput, ToolError> {
        let vmid = self.validation.ensure_vmid(args)?;
        let request = DownloadRequest {
            source: self
                .validation
                .required_string(args, "container_path", limits::MAX_PATH_LENGTH)?,
            destination: PathBuf::from(self.validation.required_string(
                args,
                "local_path",
                limits::MAX_PATH_LENGTH,
            )?),
            overwrite: self.validation.ensure_bool(args, "overwrite", false)?,
        };
        let format = self
            .validation
            .ensure_response_format(args, ResponseFormat::Json)?;
        let outcome = self
            .staging
            .download_from_container(vmid, request)
            .await
            .map_err(ToolError::from)?;
        Ok(transfer_output(&outcome, format))
    }

    async fn upload(&self, args: &Value) -> Result<ToolOutput, ToolError> {
        let vmid = self.validation.ensure_vmid(args)?;
        let request = UploadRequest {
            source: PathBuf::from(self.validation.required_string(
                args,
                "local_path",
                limits::MAX_PATH_LENGTH,
            )?),
            destination: self
                .validation
                .required_string(args, "container_path", limits::MAX_PATH_LENGTH)?,
            permissions: optional_permissions(&self.validation, args)?,
            overwrite: self.validation.ensure_bool(args, "overwrite", false)?,
        };
        let format = self
            .validation
            .ensure_response_format(args, ResponseFormat::Json)?;
        let outcome = self
            .staging
            .upload_to_container(vmid, request)
            .await
            .map_err(ToolError::from)?;
        Ok(transfer_output(&outcome, format))
    }
}

pub(crate) fn optional_permissions(
    validation: &Validation,
    args: &Value,
) -> Result<String, ToolError> {
    match args.get("permissions") {
        None | Some(Value::Null) => Ok(staging::DEFAULT_PERMISSIONS.to_string()),
        Some(value) => validation.ensure_string(value, "permissions", true),
    }
}

pub(crate) fn transfer_output(outcome: &TransferOutcome, format: ResponseFormat) -> ToolOutput {
    match format {
        ResponseFormat::Json => {
            let mut payload = serde_json::json!(outcome);
            if let Some(obj) = payload.as_object_mut() {
                obj.insert("success".to_string(), Value::Bool(true));
            }
            ToolOutput::json(&payload)
        }
        ResponseFormat::Text => {
            let verb = match outcome.direction {
                Direction::Download => "Downloaded",
                Direction::Upload => "Uploaded",
            };
            let mut lines = vec![format!(
                "{} {} bytes from {} to {} ({})",
                verb, outcome.bytes_transferred, outcome.source, outcome.destination, outcome.target
            )];
            lines.push(format!("sha256: {}", outcome.sha256));
            if let Some(mode) = &outcome.mode {
                lines.push(format!("mode: {}", mode));
            }
            if let Some(warning) = &outcome.permissions_warning {
                lines.push(format!("warning: permissions not applied: {}", warning));
            }
            for warning in &outcome.cleanup_warnings {
                lines.push(format!(
                    "warning: staging file {} not removed: {}",
                    warning.path, warning.reason
                ));
            }
            ToolOutput::ok(lines.join("\n"))
        }
    }
}

#[async_trait::async_trait]
impl ToolHandler for ContainerManager {
    async fn handle(&self, args: Value) -> Result<ToolOutput, ToolError> {
        self.logger.debug("handle_action", args.get("action"));
        self.handle_action(args).await
    }
}
