pub mod config;
pub mod logger;
pub mod pct;
pub mod ssh_session;
pub mod staging;
pub mod tool_executor;
pub mod transport;
pub mod validation;
