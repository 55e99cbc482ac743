use crate::constants::{limits, timeouts};
use crate::errors::{CoreError, ToolError};
use crate::services::pct::Vmid;
use crate::utils::output::ResponseFormat;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::time::Duration;

static PERMISSIONS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-7]{3,4}$").expect("permissions regex"));

/// Path safety shared by every transfer endpoint: non-empty, bounded, no NUL, no `..` segment.
pub fn validate_path(field: &str, path: &str) -> Result<(), CoreError> {
    if path.trim().is_empty() {
        return Err(CoreError::validation(field, "path must not be empty"));
    }
    if path.len() > limits::MAX_PATH_LENGTH {
        return Err(CoreError::validation(
            field,
            format!("path exceeds {} characters", limits::MAX_PATH_LENGTH),
        ));
    }
    if path.contains('\0') {
        return Err(CoreError::validation(field, "path must not contain NUL bytes"));
    }
    if path.split(['/', '\\']).any(|segment| segment == "..") {
        return Err(CoreError::validation(
            field,
            format!("path traversal ('..') is not allowed: {}", path),
        ));
    }
    Ok(())
}

/// Host and container paths must additionally be absolute.
pub fn validate_remote_path(field: &str, path: &str) -> Result<(), CoreError> {
    validate_path(field, path)?;
    if !path.starts_with('/') {
        return Err(CoreError::validation(
            field,
            format!("remote path must be absolute: {}", path),
        ));
    }
    Ok(())
}

pub fn validate_permissions(value: &str) -> Result<(), CoreError> {
    if PERMISSIONS_RE.is_match(value) {
        Ok(())
    } else {
        Err(CoreError::PermissionFormat {
            value: value.to_string(),
        })
    }
}

pub fn validate_size(path: &str, size: u64, limit: u64) -> Result<(), CoreError> {
    if size > limit {
        return Err(CoreError::SizeExceeded {
            path: path.to_string(),
            size,
            limit,
        });
    }
    Ok(())
}

/// Typed extraction of tool arguments. Schemas have already been checked by the MCP layer;
/// these helpers apply defaults and guard direct callers.
#[derive(Clone)]
pub struct Validation;

impl Validation {
    pub fn new() -> Self {
        Self
    }

    pub fn ensure_string(
        &self,
        value: &Value,
        label: &str,
        trim: bool,
    ) -> Result<String, ToolError> {
        let text = value.as_str().ok_or_else(|| {
            ToolError::invalid_params(format!("{} must be a non-empty string", label))
        })?;
        let normalized = text.trim();
        if normalized.is_empty() {
            return Err(ToolError::invalid_params(format!(
                "{} must be a non-empty string",
                label
            )));
        }
        Ok(if trim {
            normalized.to_string()
        } else {
            text.to_string()
        })
    }

    pub fn required_string(
        &self,
        args: &Value,
        key: &str,
        max_len: usize,
    ) -> Result<String, ToolError> {
        let value = args
            .get(key)
            .ok_or_else(|| ToolError::invalid_params(format!("{} is required", key)))?;
        let text = self.ensure_string(value, key, false)?;
        if text.chars().count() > max_len {
            return Err(ToolError::invalid_params(format!(
                "{} must be at most {} characters",
                key, max_len
            )));
        }
        Ok(text)
    }

    pub fn ensure_vmid(&self, args: &Value) -> Result<Vmid, ToolError> {
        let raw = args
            .get("vmid")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| ToolError::invalid_params("vmid must be an integer"))?;
        if !(limits::VMID_MIN..=limits::VMID_MAX).contains(&raw) {
            return Err(ToolError::invalid_params(format!(
                "vmid must be between {} and {}",
                limits::VMID_MIN,
                limits::VMID_MAX
            )));
        }
        Ok(Vmid(raw as u32))
    }

    pub fn ensure_timeout(&self, args: &Value) -> Result<Duration, ToolError> {
        let secs = match args.get("timeout") {
            None | Some(Value::Null) => timeouts::COMMAND_DEFAULT_SECS as i64,
            Some(value) => value
                .as_i64()
                .ok_or_else(|| ToolError::invalid_params("timeout must be an integer"))?,
        };
        if secs < 1 || secs > timeouts::COMMAND_MAX_SECS as i64 {
            return Err(ToolError::invalid_params(format!(
                "timeout must be between 1 and {} seconds",
                timeouts::COMMAND_MAX_SECS
            )));
        }
        Ok(Duration::from_secs(secs as u64))
    }

    pub fn ensure_bool(&self, args: &Value, key: &str, fallback: bool) -> Result<bool, ToolError> {
        match args.get(key) {
            None | Some(Value::Null) => Ok(fallback),
            Some(Value::Bool(flag)) => Ok(*flag),
            Some(_) => Err(ToolError::invalid_params(format!("{} must be a boolean", key))),
        }
    }

    pub fn ensure_response_format(
        &self,
        args: &Value,
        fallback: ResponseFormat,
    ) -> Result<ResponseFormat, ToolError> {
        match args.get("response_format") {
            None | Some(Value::Null) => Ok(fallback),
            Some(value) => value
                .as_str()
                .and_then(ResponseFormat::parse)
                .ok_or_else(|| {
                    ToolError::invalid_params("response_format must be 'json' or 'text'")
                }),
        }
    }
}

impl Default for Validation {
    fn default() -> Self {
        Self::new()
    }
}
