use crate::errors::McpError;
use crate::mcp::routes::is_host_tool;
use crate::utils::suggest::suggest;
use jsonschema::error::{TypeKind, ValidationErrorKind};
use jsonschema::{JSONSchema, ValidationError};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

const MAX_REPORTED_ERRORS: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDef {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

static TOOL_CATALOG: Lazy<Vec<ToolDef>> = Lazy::new(|| {
    let raw = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/tool_catalog.json"));
    serde_json::from_str(raw).expect("tool_catalog.json must be valid JSON")
});

static TOOL_VALIDATORS: Lazy<HashMap<String, JSONSchema>> = Lazy::new(|| {
    TOOL_CATALOG
        .iter()
        .map(|tool| {
            let schema = JSONSchema::compile(&tool.input_schema)
                .unwrap_or_else(|err| panic!("invalid schema for {}: {}", tool.name, err));
            (tool.name.clone(), schema)
        })
        .collect()
});

pub fn tool_catalog() -> &'static [ToolDef] {
    &TOOL_CATALOG
}

pub fn tool_by_name(name: &str) -> Option<&'static ToolDef> {
    TOOL_CATALOG.iter().find(|tool| tool.name == name)
}

/// Tools advertised by `tools/list`; host-level tools only when host execution is enabled.
pub fn list_tools(enable_host_exec: bool) -> Vec<&'static ToolDef> {
    TOOL_CATALOG
        .iter()
        .filter(|tool| enable_host_exec || !is_host_tool(&tool.name))
        .collect()
}

pub fn validate_tool_args(tool_name: &str, args: &Value) -> Result<(), McpError> {
    let Some(schema) = TOOL_VALIDATORS.get(tool_name) else {
        return Ok(());
    };
    if let Err(errors) = schema.validate(args) {
        let lines: Vec<String> = errors
            .take(MAX_REPORTED_ERRORS)
            .map(|err| describe_error(tool_name, &err))
            .collect();
        let mut message = format!("Invalid arguments for {}", tool_name);
        for line in lines {
            message.push_str("\n- ");
            message.push_str(&line);
        }
        return Err(McpError::invalid_params(message));
    }
    Ok(())
}

fn describe_error(tool_name: &str, err: &ValidationError<'_>) -> String {
    let instance_path = err.instance_path.to_string();
    let at = if instance_path.is_empty() {
        "(root)"
    } else {
        instance_path.as_str()
    };
    match &err.kind {
        ValidationErrorKind::AdditionalProperties { unexpected } => unexpected
            .iter()
            .map(|field| {
                let known = known_fields(tool_name);
                let close = suggest(field, known.iter().map(String::as_str), 3);
                if close.is_empty() {
                    format!("{}: unknown field '{}'", at, field)
                } else {
                    format!(
                        "{}: unknown field '{}' (did you mean: {}?)",
                        at,
                        field,
                        close.join(", ")
                    )
                }
            })
            .collect::<Vec<_>>()
            .join("; "),
        ValidationErrorKind::Required { property } => format!(
            "{}: missing required field '{}'",
            at,
            property.as_str().unwrap_or_default()
        ),
        ValidationErrorKind::Enum { options } => {
            let allowed: Vec<String> = options
                .as_array()
                .map(|items| {
                    items
                        .iter()
                        .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
                        .collect()
                })
                .unwrap_or_default();
            format!("{}: expected one of {}", at, allowed.join(", "))
        }
        ValidationErrorKind::Type { kind } => format!("{}: expected {}", at, type_name(kind)),
        ValidationErrorKind::Minimum { limit } => format!("{}: must be >= {}", at, limit),
        ValidationErrorKind::Maximum { limit } => format!("{}: must be <= {}", at, limit),
        ValidationErrorKind::MinLength { limit } => {
            format!("{}: must be at least {} characters", at, limit)
        }
        ValidationErrorKind::MaxLength { limit } => {
            format!("{}: must be at most {} characters", at, limit)
        }
        ValidationErrorKind::Pattern { pattern } => {
            format!("{}: must match {}", at, pattern)
        }
        _ => format!("{}: {}", at, err),
    }
}

fn known_fields(tool_name: &str) -> Vec<String> {
    tool_by_name(tool_name)
        .and_then(|tool| tool.input_schema.get("properties"))
        .and_then(|props| props.as_object())
        .map(|props| props.keys().cloned().collect())
        .unwrap_or_default()
}

fn type_name(kind: &TypeKind) -> String {
    match kind {
        TypeKind::Single(primitive) => primitive.to_string(),
        TypeKind::Multiple(types) => (*types)
            .into_iter()
            .map(|t| t.to_string())
            .collect::<Vec<_>>()
            .join(" | "),
    }
}
