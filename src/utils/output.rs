use crate::constants::limits;
use crate::services::pct::ContainerRecord;
use crate::services::transport::CommandResult;
use crate::utils::text::char_prefix;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    Json,
    Text,
}

impl ResponseFormat {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "json" => Some(ResponseFormat::Json),
            "text" | "markdown" => Some(ResponseFormat::Text),
            _ => None,
        }
    }
}

pub fn render_json(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

/// Renders a command result within `limit` characters.
///
/// JSON output shrinks stdout and stderr proportionally before serialization so the document
/// stays valid; text output is assembled first and then cut with a trailing marker.
pub fn render_exec(result: &CommandResult, format: ResponseFormat, limit: usize) -> String {
    match format {
        ResponseFormat::Json => render_exec_json(result, limit),
        ResponseFormat::Text => render_exec_text(result, limit),
    }
}

fn render_exec_json(result: &CommandResult, limit: usize) -> String {
    let available = limit
        .saturating_sub(limits::JSON_OVERHEAD_CHARS)
        .max(limits::MIN_JSON_DATA_CHARS);
    let stdout_len = result.stdout.chars().count();
    let stderr_len = result.stderr.chars().count();
    let total = stdout_len + stderr_len;

    let (stdout_limit, stderr_limit) = if total > available {
        (
            (available as u128 * stdout_len as u128 / total as u128) as usize,
            (available as u128 * stderr_len as u128 / total as u128) as usize,
        )
    } else {
        (stdout_len, stderr_len)
    };

    let mut payload = serde_json::json!({
        "exit_code": result.exit_code,
        "stdout": char_prefix(&result.stdout, stdout_limit),
        "stderr": char_prefix(&result.stderr, stderr_limit),
        "success": result.success(),
        "timed_out": result.timed_out,
    });
    if let Some(obj) = payload.as_object_mut() {
        if stdout_len > stdout_limit {
            obj.insert("stdout_truncated".to_string(), Value::Bool(true));
            obj.insert("stdout_original_length".to_string(), Value::from(stdout_len));
        }
        if stderr_len > stderr_limit {
            obj.insert("stderr_truncated".to_string(), Value::Bool(true));
            obj.insert("stderr_original_length".to_string(), Value::from(stderr_len));
        }
    }
    render_json(&payload)
}

fn render_exec_text(result: &CommandResult, limit: usize) -> String {
    let mut parts = Vec::new();
    if !result.stdout.is_empty() {
        parts.push(format!("=== STDOUT ===\n{}", result.stdout));
    }
    if !result.stderr.is_empty() {
        parts.push(format!("=== STDERR ===\n{}", result.stderr));
    }
    if result.timed_out {
        parts.push("=== TIMED OUT ===".to_string());
    }
    parts.push(format!("=== EXIT CODE: {} ===", result.exit_code));
    truncate_text(&parts.join("\n\n"), limit)
}

pub fn truncate_text(output: &str, limit: usize) -> String {
    let total = output.chars().count();
    if total <= limit {
        return output.to_string();
    }
    format!(
        "{}\n\n[OUTPUT TRUNCATED - showing first {} of {} characters]",
        char_prefix(output, limit),
        limit,
        total
    )
}

pub fn render_container_list(records: &[ContainerRecord], format: ResponseFormat) -> String {
    match format {
        ResponseFormat::Json => render_json(&serde_json::json!(records)),
        ResponseFormat::Text if records.is_empty() => "No containers found".to_string(),
        ResponseFormat::Text => {
            let mut lines = vec!["VMID | Status | Name".to_string(), "-".repeat(40)];
            for record in records {
                lines.push(format!(
                    "{:4} | {:7} | {}",
                    record.vmid,
                    record.status.as_str(),
                    record.name
                ));
            }
            lines.join("\n")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::pct::TargetState;

    #[test]
    fn text_exec_layout() {
        let result = CommandResult::completed("hello\n", "", 0);
        assert_eq!(
            render_exec(&result, ResponseFormat::Text, 1000),
            "=== STDOUT ===\nhello\n\n\n=== EXIT CODE: 0 ==="
        );
        let result = CommandResult::completed("", "boom", 2);
        assert_eq!(
            render_exec(&result, ResponseFormat::Text, 1000),
            "=== STDERR ===\nboom\n\n=== EXIT CODE: 2 ==="
        );
    }

    #[test]
    fn text_exec_truncates_with_marker() {
        let result = CommandResult::completed("x".repeat(100), "", 0);
        let rendered = render_exec(&result, ResponseFormat::Text, 20);
        assert!(rendered.starts_with("=== STDOUT ===\nxxxxx"));
        assert!(rendered.ends_with("[OUTPUT TRUNCATED - showing first 20 of 137 characters]"));
    }

    #[test]
    fn json_exec_truncates_proportionally_and_stays_valid() {
        let result = CommandResult::completed("o".repeat(3000), "e".repeat(1000), 1);
        let rendered = render_exec(&result, ResponseFormat::Json, 2500);
        let parsed: Value = serde_json::from_str(&rendered).expect("valid json");
        assert_eq!(parsed["stdout"].as_str().map(str::len), Some(1500));
        assert_eq!(parsed["stderr"].as_str().map(str::len), Some(500));
        assert_eq!(parsed["stdout_original_length"], 3000);
        assert_eq!(parsed["stderr_truncated"], true);
        assert_eq!(parsed["success"], false);
        assert_eq!(parsed["exit_code"], 1);
    }

    #[test]
    fn json_exec_keeps_minimum_budget() {
        let result = CommandResult::completed("a".repeat(900), "", 0);
        let parsed: Value =
            serde_json::from_str(&render_exec(&result, ResponseFormat::Json, 10)).expect("json");
        assert_eq!(parsed["stdout"].as_str().map(str::len), Some(900));
        assert!(parsed.get("stdout_truncated").is_none());
    }

    #[test]
    fn list_table() {
        let records = vec![ContainerRecord {
            vmid: 100,
            status: TargetState::Running,
            name: "web".to_string(),
            lock: None,
        }];
        let table = render_container_list(&records, ResponseFormat::Text);
        assert_eq!(
            table,
            format!("VMID | Status | Name\n{}\n 100 | running | web", "-".repeat(40))
        );
        assert_eq!(
            render_container_list(&[], ResponseFormat::Text),
            "No containers found"
        );
    }
}
