use crate::errors::ToolError;
use crate::utils::suggest::suggest;
use serde_json::Value;

/// `INVALID_PARAMS` for an action the handler does not implement, listing the ones it does.
pub fn unknown_action_error(handler: &str, action: Option<&Value>, known: &[&str]) -> ToolError {
    let received = action.and_then(|v| v.as_str()).unwrap_or("");
    let did_you_mean = suggest(received, known.iter().copied(), 3);

    let mut hint = format!("Use one of: {}.", known.join(", "));
    if !did_you_mean.is_empty() {
        hint = format!("Did you mean: {}? {}", did_you_mean.join(", "), hint);
    }
    ToolError::invalid_params(format!("Unknown {} action: {}", handler, received))
        .with_hint(hint)
        .with_details(serde_json::json!({
            "known_actions": known,
            "did_you_mean": did_you_mean,
        }))
}
