pub mod network {
    pub const SSH_DEFAULT_PORT: u16 = 22;
    pub const SSH_DEFAULT_USERNAME: &str = "root";
    pub const TIMEOUT_SSH_READY_MS: u64 = 10_000;
    pub const TIMEOUT_SSH_EXEC_HARD_GRACE_MS: u64 = 2_000;
    pub const KEEPALIVE_INTERVAL_SECS: u32 = 30;
    pub const EXEC_POLL_INTERVAL_MS: u64 = 20;
}

pub mod timeouts {
    pub const COMMAND_DEFAULT_SECS: u64 = 30;
    pub const COMMAND_MAX_SECS: u64 = 300;
    /// Budget for `pct push`/`pct pull` of a file at the size ceiling.
    pub const STAGING_COPY_SECS: u64 = 120;
    pub const PROBE_SECS: u64 = 30;
}

pub mod limits {
    pub const VMID_MIN: i64 = 100;
    pub const VMID_MAX: i64 = 999_999_999;
    pub const MAX_PATH_LENGTH: usize = 4096;
    pub const MAX_COMMAND_LENGTH: usize = 10_000;
    pub const DEFAULT_CHARACTER_LIMIT: usize = 25_000;
    pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;
    pub const MAX_CAPTURE_BYTES: usize = 1024 * 1024;
    pub const COMMAND_LOG_PREFIX: usize = 120;
    pub const JSON_OVERHEAD_CHARS: usize = 500;
    pub const MIN_JSON_DATA_CHARS: usize = 1000;
}

pub mod staging {
    pub const DEFAULT_PREFIX: &str = "/tmp/proxmox-mcp-";
    pub const DEFAULT_PERMISSIONS: &str = "644";
}
