use crate::constants::limits;
use crate::errors::ToolError;
use crate::managers::container::{optional_permissions, transfer_output};
use crate::services::config::ServerConfig;
use crate::services::logger::Logger;
use crate::services::staging::{DownloadRequest, StagingOrchestrator, UploadRequest};
use crate::services::tool_executor::{ToolHandler, ToolOutput};
use crate::services::transport::RemoteTransport;
use crate::services::validation::Validation;
use crate::utils::output::{render_exec, ResponseFormat};
use crate::utils::tool_errors::unknown_action_error;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;

const HOST_ACTIONS: &[&str] = &["exec", "download", "upload"];

/// Direct access to the Proxmox host. Every action is refused unless host execution is enabled.
pub struct HostManager {
    logger: Logger,
    validation: Validation,
    config: Arc<ServerConfig>,
    transport: Arc<dyn RemoteTransport>,
    staging: Arc<StagingOrchestrator>,
}

impl HostManager {
    pub fn new(
        logger: Logger,
        validation: Validation,
        config: Arc<ServerConfig>,
        transport: Arc<dyn RemoteTransport>,
        staging: Arc<StagingOrchestrator>,
    ) -> Self {
        Self {
            logger: logger.child("host"),
            validation,
            config,
            transport,
            staging,
        }
    }

    fn ensure_enabled(&self) -> Result<(), ToolError> {
        if self.config.enable_host_exec {
            return Ok(());
        }
        Err(ToolError::denied("Host command execution is disabled")
            .with_hint("Set ENABLE_HOST_EXEC=true to enable host-level tools."))
    }

    pub async fn handle_action(&self, args: Value) -> Result<ToolOutput, ToolError> {
        self.ensure_enabled()?;
        let action = args.get("action").and_then(|v| v.as_str()).unwrap_or("");
        match action {
            "exec" => self.exec(&args).await,
            "download" => self.download(&args).await,
            "upload" => self.upload(&args).await,
            _ => Err(unknown_action_error("host", args.get("action"), HOST_ACTIONS)),
        }
    }

    async fn exec(&self, args: &Value) -> Result<ToolOutput, ToolError> {
        let command = self
            .validation
            .required_string(args, "command", limits::MAX_COMMAND_LENGTH)?;
        let timeout = self.validation.ensure_timeout(args)?;
        let format = self
            .validation
            .ensure_response_format(args, ResponseFormat::Text)?;

        self.logger.info(
            "Host command",
            Some(&serde_json::json!({ "timeout_secs": timeout.as_secs() })),
        );
        let result = self.transport.execute(&command, timeout).await?;
        let rendered = render_exec(&result, format, self.config.character_limit);
        Ok(if result.success() {
            ToolOutput::ok(rendered)
        } else {
            ToolOutput::failed(rendered)
        })
    }

    async fn download(&self, args: &Value) -> Result<ToolOutput, ToolError> {
        let request = DownloadRequest {
            source: self
                .validation
                .required_string(args, "host_path", limits::MAX_PATH_LENGTH)?,
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
            .download_from_host(request)
            .await
            .map_err(ToolError::from)?;
        Ok(transfer_output(&outcome, format))
    }

    async fn upload(&self, args: &Value) -> Result<ToolOutput, ToolError> {
        let request = UploadRequest {
            source: PathBuf::from(self.validation.required_string(
                args,
                "local_path",
                limits::MAX_PATH_LENGTH,
            )?),
            destination: self
                .validation
                .required_string(args, "host_path", limits::MAX_PATH_LENGTH)?,
            permissions: optional_permissions(&self.validation, args)?,
            overwrite: self.validation.ensure_bool(args, "overwrite", false)?,
        };
        let format = self
            .validation
            .ensure_response_format(args, ResponseFormat::Json)?;
        let outcome = self
            .staging
            .upload_to_host(request)
            .await
            .map_err(ToolError::from)?;
        Ok(transfer_output(&outcome, format))
    }
}

#[async_trait::async_trait]
impl ToolHandler for HostManager {
    async fn handle(&self, args: Value) -> Result<ToolOutput, ToolError> {
        self.logger.debug("handle_action", args.get("action"));
        self.handle_action(args).await
    }
}
