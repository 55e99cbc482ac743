/// Where a public tool name lands: a handler key and the action it performs there.
///
/// The action is a default; tools that expose an `action` argument of their own keep it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolRoute {
    pub handler: &'static str,
    pub action: &'static str,
}

pub const HANDLER_CONTAINER: &str = "container";
pub const HANDLER_HOST: &str = "host";
pub const HANDLER_SESSION: &str = "session";

const TOOL_ROUTES: &[(&str, ToolRoute)] = &[
    ("proxmox_container_exec_command", route(HANDLER_CONTAINER, "exec")),
    ("proxmox_list_containers", route(HANDLER_CONTAINER, "list")),
    ("proxmox_container_status", route(HANDLER_CONTAINER, "status")),
    ("proxmox_start_container", route(HANDLER_CONTAINER, "start")),
    ("proxmox_stop_container", route(HANDLER_CONTAINER, "stop")),
    ("proxmox_download_file_from_container", route(HANDLER_CONTAINER, "download")),
    ("proxmox_upload_file_to_container", route(HANDLER_CONTAINER, "upload")),
    ("proxmox_host_exec_command", route(HANDLER_HOST, "exec")),
    ("proxmox_download_file_from_host", route(HANDLER_HOST, "download")),
    ("proxmox_upload_file_to_host", route(HANDLER_HOST, "upload")),
    ("proxmox_session", route(HANDLER_SESSION, "status")),
];

const fn route(handler: &'static str, action: &'static str) -> ToolRoute {
    ToolRoute { handler, action }
}

pub fn route_for(tool: &str) -> Option<ToolRoute> {
    TOOL_ROUTES
        .iter()
        .find(|(name, _)| *name == tool)
        .map(|(_, route)| *route)
}

pub fn tool_names() -> impl Iterator<Item = &'static str> {
    TOOL_ROUTES.iter().map(|(name, _)| *name)
}

/// Host-level tools are only listed and callable when host execution is enabled.
pub fn is_host_tool(tool: &str) -> bool {
    route_for(tool)
        .map(|route| route.handler == HANDLER_HOST)
        .unwrap_or(false)
}
