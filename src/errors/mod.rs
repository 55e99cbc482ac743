mod core_error;
mod mcp_error;
mod tool_error;

pub use core_error::{CoreError, CONNECTION_LOST_PREFIX};
pub use mcp_error::{ErrorCode, McpError};
pub use tool_error::{ToolError, ToolErrorKind};
