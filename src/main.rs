use proxmox_mcp::services::logger::Logger;

#[tokio::main]
async fn main() {
    if let Err(err) = proxmox_mcp::mcp::server::run_stdio().await {
        Logger::new("proxmox").error(
            "Server failed",
            Some(&serde_json::json!({ "code": err.code, "error": err.message, "hint": err.hint })),
        );
        std::process::exit(1);
    }
}
