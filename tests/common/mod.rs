#![allow(dead_code)]

use async_trait::async_trait;
use once_cell::sync::Lazy;
use proxmox_mcp::errors::CoreError;
use proxmox_mcp::services::config::ServerConfig;
use proxmox_mcp::services::logger::{LogLevel, Logger};
use proxmox_mcp::services::transport::{CommandResult, RemoteFileStat, RemoteTransport};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use tokio::sync::Mutex;

pub static ENV_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

pub const STAGING_PREFIX: &str = "/tmp/proxmox-mcp-";

pub fn quiet_logger() -> Logger {
    Logger::with_level("test", LogLevel::Error)
}

pub fn tmp_dir(prefix: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("{}-{}", prefix, uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

pub fn test_config(enable_host_exec: bool, max_file_size: u64) -> ServerConfig {
    let mut env: HashMap<&str, String> = HashMap::new();
    env.insert("I_ACCEPT_RISKS", "true".to_string());
    env.insert("HOST", "pve.test".to_string());
    env.insert("SSH_PASSWORD", "secret".to_string());
    env.insert("ENABLE_HOST_EXEC", enable_host_exec.to_string());
    env.insert("MAX_FILE_SIZE", max_file_size.to_string());
    env.insert("STAGING_PREFIX", STAGING_PREFIX.to_string());
    ServerConfig::from_lookup(|key| env.get(key).cloned()).expect("test config")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeFile {
    pub data: Vec<u8>,
    pub mode: u32,
}

#[derive(Debug, Clone)]
pub struct FakeContainer {
    pub name: String,
    pub running: bool,
    pub files: HashMap<String, FakeFile>,
}

#[derive(Default)]
struct HostState {
    files: HashMap<String, FakeFile>,
    containers: BTreeMap<u32, FakeContainer>,
    exec_log: Vec<String>,
    inner_commands: Vec<String>,
    scripted: Vec<(String, CommandResult)>,
    removed: Vec<String>,
}

/// In-memory Proxmox host. Interprets the exact command lines the adapter emits, unquoting
/// them the way `/bin/sh` would.
pub struct FakeHost {
    state: StdMutex<HostState>,
    calls: AtomicUsize,
    connected: AtomicBool,
    pub fail_remove: AtomicBool,
    pub fail_download: AtomicBool,
    pub fail_chmod: AtomicBool,
    pub drop_on_next_call: AtomicBool,
}

impl Default for FakeHost {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeHost {
    pub fn new() -> Self {
        Self {
            state: StdMutex::new(HostState::default()),
            calls: AtomicUsize::new(0),
            connected: AtomicBool::new(true),
            fail_remove: AtomicBool::new(false),
            fail_download: AtomicBool::new(false),
            fail_chmod: AtomicBool::new(false),
            drop_on_next_call: AtomicBool::new(false),
        }
    }

    pub fn with_container(self, vmid: u32, name: &str, running: bool) -> Self {
        self.lock().containers.insert(
            vmid,
            FakeContainer {
                name: name.to_string(),
                running,
                files: HashMap::new(),
            },
        );
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HostState> {
        self.state.lock().expect("fake host state")
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn put_container_file(&self, vmid: u32, path: &str, data: &[u8], mode: u32) {
        let mut state = self.lock();
        let container = state.containers.get_mut(&vmid).expect("container");
        container.files.insert(
            path.to_string(),
            FakeFile {
                data: data.to_vec(),
                mode,
            },
        );
    }

    pub fn container_file(&self, vmid: u32, path: &str) -> Option<FakeFile> {
        self.lock()
            .containers
            .get(&vmid)
            .and_then(|c| c.files.get(path).cloned())
    }

    pub fn put_host_file(&self, path: &str, data: &[u8], mode: u32) {
        self.lock().files.insert(
            path.to_string(),
            FakeFile {
                data: data.to_vec(),
                mode,
            },
        );
    }

    pub fn host_file(&self, path: &str) -> Option<FakeFile> {
        self.lock().files.get(path).cloned()
    }

    /// Host paths currently under the staging prefix.
    pub fn staging_leftovers(&self) -> Vec<String> {
        self.lock()
            .files
            .keys()
            .filter(|path| path.starts_with(STAGING_PREFIX))
            .cloned()
            .collect()
    }

    /// Every path a `remove` was requested for, in order.
    pub fn removed(&self) -> Vec<String> {
        self.lock().removed.clone()
    }

    pub fn exec_log(&self) -> Vec<String> {
        self.lock().exec_log.clone()
    }

    /// Argument the container-side `bash -c` received, after unquoting.
    pub fn inner_commands(&self) -> Vec<String> {
        self.lock().inner_commands.clone()
    }

    /// Any command line starting with `prefix` answers with `result`.
    pub fn script(&self, prefix: &str, result: CommandResult) {
        self.lock().scripted.push((prefix.to_string(), result));
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    fn enter(&self) -> Result<(), CoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.connected.load(Ordering::SeqCst) {
            return Err(CoreError::NotConnected);
        }
        if self.drop_on_next_call.swap(false, Ordering::SeqCst) {
            self.connected.store(false, Ordering::SeqCst);
            return Err(CoreError::Connection {
                endpoint: "pve.test:22".to_string(),
                reason: format!(
                    "{}: simulated drop",
                    proxmox_mcp::errors::CONNECTION_LOST_PREFIX
                ),
            });
        }
        Ok(())
    }

    fn run_line(&self, line: &str) -> CommandResult {
        let mut state = self.lock();
        state.exec_log.push(line.to_string());
        if let Some((_, result)) = state
            .scripted
            .iter()
            .find(|(prefix, _)| line.starts_with(prefix.as_str()))
        {
            return result.clone();
        }
        let words = shell_words(line);
        let args: Vec<&str> = words.iter().map(String::as_str).collect();
        match args.as_slice() {
            ["pct", "list"] => pct_list(&state),
            ["pct", verb, vmid, rest @ ..] => {
                let Ok(vmid) = vmid.parse::<u32>() else {
                    return failed(255, "invalid vmid");
                };
                if !state.containers.contains_key(&vmid) {
                    return failed(
                        2,
                        &format!(
                            "Configuration file 'nodes/pve/lxc/{}.conf' does not exist",
                            vmid
                        ),
                    );
                }
                let fail_chmod = self.fail_chmod.load(Ordering::SeqCst);
                pct_command(&mut state, verb, vmid, rest, fail_chmod)
            }
            ["test", "-f", path] => exit_status(state.files.contains_key(*path)),
            ["chmod", mode, path] => {
                if self.fail_chmod.load(Ordering::SeqCst) {
                    return failed(1, "chmod: Operation not permitted");
                }
                chmod(&mut state.files, mode, path)
            }
            _ => CommandResult::completed("", "", 0),
        }
    }
}

fn failed(code: i32, stderr: &str) -> CommandResult {
    CommandResult::completed("", format!("{}\n", stderr), code)
}

fn exit_status(ok: bool) -> CommandResult {
    CommandResult::completed("", "", if ok { 0 } else { 1 })
}

fn chmod(files: &mut HashMap<String, FakeFile>, mode: &str, path: &str) -> CommandResult {
    let Ok(bits) = u32::from_str_radix(mode, 8) else {
        return failed(1, &format!("chmod: invalid mode: '{}'", mode));
    };
    match files.get_mut(path) {
        Some(file) => {
            file.mode = bits;
            CommandResult::completed("", "", 0)
        }
        None => failed(
            1,
            &format!("chmod: cannot access '{}': No such file or directory", path),
        ),
    }
}

fn pct_list(state: &HostState) -> CommandResult {
    let mut out = String::from("VMID       Status     Lock         Name                \n");
    for (vmid, container) in &state.containers {
        let status = if container.running { "running" } else { "stopped" };
        out.push_str(&format!(
            "{:<10} {:<10} {:<12} {:<20}\n",
            vmid, status, "", container.name
        ));
    }
    CommandResult::completed(out, "", 0)
}

fn pct_command(
    state: &mut HostState,
    verb: &str,
    vmid: u32,
    rest: &[&str],
    fail_chmod: bool,
) -> CommandResult {
    let HostState {
        files,
        containers,
        inner_commands,
        ..
    } = state;
    let Some(container) = containers.get_mut(&vmid) else {
        return failed(2, "no such container");
    };
    match (verb, rest) {
        ("status", []) => {
            let status = if container.running { "running" } else { "stopped" };
            CommandResult::completed(format!("status: {}\n", status), "", 0)
        }
        ("start", []) => {
            if container.running {
                return failed(255, &format!("CT {} already running", vmid));
            }
            container.running = true;
            CommandResult::completed("", "", 0)
        }
        ("stop", []) => {
            if !container.running {
                return failed(255, &format!("CT {} not running", vmid));
            }
            container.running = false;
            CommandResult::completed("", "", 0)
        }
        ("push", [host_path, target_path]) => match files.get(*host_path) {
            Some(file) => {
                container.files.insert(
                    target_path.to_string(),
                    FakeFile {
                        data: file.data.clone(),
                        mode: 0o644,
                    },
                );
                CommandResult::completed("", "", 0)
            }
            None => failed(2, &format!("can't open file {}", host_path)),
        },
        ("pull", [target_path, host_path]) => match container.files.get(*target_path) {
            Some(file) => {
                files.insert(
                    host_path.to_string(),
                    FakeFile {
                        data: file.data.clone(),
                        mode: 0o644,
                    },
                );
                CommandResult::completed("", "", 0)
            }
            None => failed(2, &format!("failed to open {}", target_path)),
        },
        ("exec", ["--", "test", "-f", path]) => exit_status(container.files.contains_key(*path)),
        ("exec", ["--", "chmod", mode, path]) => {
            if fail_chmod {
                return failed(1, "chmod: Operation not permitted");
            }
            chmod(&mut container.files, mode, path)
        }
        ("exec", ["--", "stat", "-c", "%a", path]) => match container.files.get(*path) {
            Some(file) => CommandResult::completed(format!("{:o}\n", file.mode), "", 0),
            None => failed(1, "stat: cannot stat"),
        },
        ("exec", ["--", "bash", "-c", inner]) => {
            inner_commands.push(inner.to_string());
            if let Some(text) = inner.strip_prefix("echo ") {
                return CommandResult::completed(format!("{}\n", text), "", 0);
            }
            if let Some(code) = inner.strip_prefix("exit ") {
                let code = code.trim().parse().unwrap_or(1);
                return CommandResult::completed("", "", code);
            }
            CommandResult::completed("", "", 0)
        }
        _ => failed(255, &format!("unsupported pct invocation: {} {:?}", verb, rest)),
    }
}

/// Splits a command line into words with POSIX quoting: single quotes are literal, a
/// backslash outside quotes escapes the next character.
pub fn shell_words(line: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_word = true;
                for inner in chars.by_ref() {
                    if inner == '\'' {
                        break;
                    }
                    current.push(inner);
                }
            }
            '\\' => {
                in_word = true;
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                in_word = true;
                current.push(c);
            }
        }
    }
    if in_word {
        words.push(current);
    }
    words
}

#[async_trait]
impl RemoteTransport for FakeHost {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn execute(&self, command: &str, _timeout: Duration) -> Result<CommandResult, CoreError> {
        self.enter()?;
        Ok(self.run_line(command))
    }

    async fn stat(&self, remote_path: &str) -> Result<RemoteFileStat, CoreError> {
        self.enter()?;
        self.lock()
            .files
            .get(remote_path)
            .map(|file| RemoteFileStat {
                size: file.data.len() as u64,
                mode: Some(file.mode),
            })
            .ok_or_else(|| CoreError::SourceNotFound {
                path: remote_path.to_string(),
            })
    }

    async fn upload(&self, local_path: PathBuf, remote_path: &str) -> Result<u64, CoreError> {
        self.enter()?;
        let data = std::fs::read(&local_path)
            .map_err(|err| CoreError::transfer_io(local_path.display().to_string(), err))?;
        let len = data.len() as u64;
        self.lock()
            .files
            .insert(remote_path.to_string(), FakeFile { data, mode: 0o600 });
        Ok(len)
    }

    async fn download(&self, remote_path: &str, local_path: PathBuf) -> Result<u64, CoreError> {
        self.enter()?;
        if self.fail_download.load(Ordering::SeqCst) {
            return Err(CoreError::transfer_io(remote_path, "simulated channel fault"));
        }
        let file = self
            .host_file(remote_path)
            .ok_or_else(|| CoreError::SourceNotFound {
                path: remote_path.to_string(),
            })?;
        write_local(&local_path, &file.data)?;
        Ok(file.data.len() as u64)
    }

    async fn remove(&self, remote_path: &str) -> Result<(), CoreError> {
        self.enter()?;
        self.lock().removed.push(remote_path.to_string());
        if self.fail_remove.load(Ordering::SeqCst) {
            return Err(CoreError::transfer_io(remote_path, "simulated unlink failure"));
        }
        self.lock().files.remove(remote_path);
        Ok(())
    }

    async fn reconnect(&self) -> Result<(), CoreError> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

fn write_local(path: &Path, data: &[u8]) -> Result<(), CoreError> {
    std::fs::write(path, data).map_err(|err| CoreError::transfer_io(path.display().to_string(), err))
}
