use crate::constants::{limits, network, staging};
use crate::errors::CoreError;
use crate::services::logger::LogLevel;
use crate::utils::feature_flags::is_truthy;
use std::fmt;
use std::path::PathBuf;

/// Exactly one authentication method; never both, never neither.
#[derive(Clone)]
pub enum SshCredential {
    PrivateKey {
        path: PathBuf,
        passphrase: Option<String>,
    },
    Password(String),
}

impl SshCredential {
    pub fn from_parts(
        password: Option<String>,
        key_path: Option<String>,
        passphrase: Option<String>,
    ) -> Result<Self, CoreError> {
        match (password, key_path) {
            (Some(_), Some(_)) => Err(CoreError::Config(
                "SSH_PASSWORD and SSH_KEY are mutually exclusive; set only one".to_string(),
            )),
            (None, None) => Err(CoreError::Config(
                "Either SSH_PASSWORD or SSH_KEY must be set".to_string(),
            )),
            (Some(password), None) => Ok(SshCredential::Password(password)),
            (None, Some(path)) => Ok(SshCredential::PrivateKey {
                path: PathBuf::from(path),
                passphrase,
            }),
        }
    }

    pub fn method(&self) -> &'static str {
        match self {
            SshCredential::PrivateKey { .. } => "private_key",
            SshCredential::Password(_) => "password",
        }
    }
}

impl fmt::Debug for SshCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SshCredential::PrivateKey { path, passphrase } => f
                .debug_struct("PrivateKey")
                .field("path", path)
                .field("passphrase", &passphrase.as_ref().map(|_| "<redacted>"))
                .finish(),
            SshCredential::Password(_) => f.write_str("Password(<redacted>)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SshEndpoint {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub connect_timeout_ms: u64,
    pub host_key_fingerprint: Option<String>,
}

impl SshEndpoint {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Process-wide settings, read once at startup and shared by reference.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub endpoint: SshEndpoint,
    pub credential: SshCredential,
    pub enable_host_exec: bool,
    pub character_limit: usize,
    pub max_file_size: u64,
    pub staging_prefix: String,
    pub log_level: LogLevel,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, CoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if !read("I_ACCEPT_RISKS").map(is_truthy).unwrap_or(false) {
            return Err(CoreError::Config(
                "You must explicitly accept the risks of giving an AI system SSH access to your \
                 infrastructure: set I_ACCEPT_RISKS=true"
                    .to_string(),
            ));
        }

        let host = read("HOST")
            .ok_or_else(|| CoreError::Config("HOST environment variable is required".to_string()))?;
        let port = parse_number("SSH_PORT", read("SSH_PORT"), network::SSH_DEFAULT_PORT)?;
        if port == 0 {
            return Err(CoreError::Config("SSH_PORT must be between 1 and 65535".to_string()));
        }
        let username = read("SSH_USERNAME")
            .unwrap_or_else(|| network::SSH_DEFAULT_USERNAME.to_string());
        let credential = SshCredential::from_parts(
            read("SSH_PASSWORD"),
            read("SSH_KEY"),
            read("SSH_KEY_PASSPHRASE"),
        )?;
        let connect_timeout_ms = parse_number(
            "SSH_CONNECT_TIMEOUT_MS",
            read("SSH_CONNECT_TIMEOUT_MS"),
            network::TIMEOUT_SSH_READY_MS,
        )?;
        let host_key_fingerprint = read("SSH_HOST_KEY_SHA256").map(normalize_fingerprint);

        let character_limit = parse_number(
            "CHARACTER_LIMIT",
            read("CHARACTER_LIMIT"),
            limits::DEFAULT_CHARACTER_LIMIT,
        )?;
        let max_file_size = parse_number(
            "MAX_FILE_SIZE",
            read("MAX_FILE_SIZE"),
            limits::DEFAULT_MAX_FILE_SIZE,
        )?;
        let staging_prefix =
            read("STAGING_PREFIX").unwrap_or_else(|| staging::DEFAULT_PREFIX.to_string());
        if !staging_prefix.starts_with('/') || staging_prefix.contains("..") {
            return Err(CoreError::Config(
                "STAGING_PREFIX must be an absolute path without '..'".to_string(),
            ));
        }

        let log_level = read("LOG_LEVEL")
            .map(|raw| LogLevel::parse(&raw))
            .unwrap_or(LogLevel::Info);

        Ok(Self {
            endpoint: SshEndpoint {
                host,
                port,
                username,
                connect_timeout_ms,
                host_key_fingerprint,
            },
            credential,
            enable_host_exec: read("ENABLE_HOST_EXEC").map(is_truthy).unwrap_or(false),
            character_limit,
            max_file_size,
            staging_prefix,
            log_level,
        })
    }
}

fn parse_number<T: std::str::FromStr>(
    key: &str,
    raw: Option<String>,
    fallback: T,
) -> Result<T, CoreError> {
    match raw {
        None => Ok(fallback),
        Some(text) => text
            .parse::<T>()
            .map_err(|_| CoreError::Config(format!("{} must be a non-negative integer", key))),
    }
}

fn normalize_fingerprint(raw: String) -> String {
    match raw.get(..7) {
        Some(prefix) if prefix.eq_ignore_ascii_case("SHA256:") => {
            format!("SHA256:{}", &raw[7..])
        }
        _ => format!("SHA256:{}", raw),
    }
}
