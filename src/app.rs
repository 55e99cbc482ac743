use crate::errors::ToolError;
use crate::managers::container::ContainerManager;
use crate::managers::host::HostManager;
use crate::managers::session::SessionManager;
use crate::mcp::catalog::tool_catalog;
use crate::mcp::routes::{route_for, HANDLER_CONTAINER, HANDLER_HOST, HANDLER_SESSION};
use crate::services::config::ServerConfig;
use crate::services::logger::Logger;
use crate::services::pct::PctAdapter;
use crate::services::ssh_session::SshSession;
use crate::services::staging::StagingOrchestrator;
use crate::services::tool_executor::{ToolExecutor, ToolHandler};
use crate::services::transport::RemoteTransport;
use crate::services::validation::Validation;
use std::collections::HashMap;
use std::sync::Arc;

/// Process-wide wiring: one config, one logger, one transport shared by every handler.
pub struct App {
    pub config: Arc<ServerConfig>,
    pub logger: Logger,
    pub transport: Arc<dyn RemoteTransport>,
    pub tool_executor: Arc<ToolExecutor>,
}

impl App {
    /// Reads the environment and connects. A failed connection aborts startup.
    pub async fn initialize() -> Result<Self, ToolError> {
        let config = ServerConfig::from_env()?;
        let logger = Logger::with_level("proxmox", config.log_level);
        logger.info(
            "Configuration loaded",
            Some(&serde_json::json!({
                "host": config.endpoint.address(),
                "user": config.endpoint.username,
                "auth": config.credential.method(),
                "host_exec": config.enable_host_exec,
                "log_level": config.log_level.as_str(),
            })),
        );
        let session = SshSession::connect(&config, logger.clone()).await?;
        Self::build(Arc::new(config), logger, Arc::new(session))
    }

    /// Wires handlers around an existing transport.
    pub fn build(
        config: Arc<ServerConfig>,
        logger: Logger,
        transport: Arc<dyn RemoteTransport>,
    ) -> Result<Self, ToolError> {
        let validation = Validation::new();
        let pct = PctAdapter::new(transport.clone(), logger.clone());
        let staging = Arc::new(StagingOrchestrator::new(
            transport.clone(),
            pct.clone(),
            &config,
            logger.clone(),
        ));

        let container_manager = Arc::new(ContainerManager::new(
            logger.clone(),
            validation.clone(),
            config.clone(),
            pct,
            staging.clone(),
        ));
        let host_manager = Arc::new(HostManager::new(
            logger.clone(),
            validation,
            config.clone(),
            transport.clone(),
            staging,
        ));
        let session_manager = Arc::new(SessionManager::new(logger.clone(), transport.clone()));

        let mut handlers: HashMap<String, Arc<dyn ToolHandler>> = HashMap::new();
        handlers.insert(HANDLER_CONTAINER.to_string(), container_manager);
        handlers.insert(HANDLER_HOST.to_string(), host_manager);
        handlers.insert(HANDLER_SESSION.to_string(), session_manager);

        let tool_executor = ToolExecutor::new(logger.clone(), handlers);
        Self::validate_tool_wiring(&tool_executor)?;

        Ok(Self {
            config,
            logger,
            transport,
            tool_executor: Arc::new(tool_executor),
        })
    }

    fn validate_tool_wiring(executor: &ToolExecutor) -> Result<(), ToolError> {
        let mut missing: Vec<String> = tool_catalog()
            .iter()
            .filter(|tool| route_for(&tool.name).is_none())
            .map(|tool| tool.name.clone())
            .collect();
        missing.extend(executor.unwired_tools().into_iter().map(str::to_string));
        if missing.is_empty() {
            return Ok(());
        }
        missing.sort();
        Err(ToolError::internal("Tool wiring is incomplete")
            .with_hint("Every tool in tool_catalog.json needs a route and a registered handler.")
            .with_details(serde_json::json!({ "missing": missing })))
    }

    /// Closes the transport. Safe to call more than once.
    pub async fn shutdown(&self) {
        self.logger.info("Shutting down", None);
        self.transport.disconnect().await;
    }
}
