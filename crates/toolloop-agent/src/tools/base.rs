//! Tool trait: the handler side of a registered tool.
//!
//! The static half (name, description, input schema) is a
//! [`ToolSpec`](toolloop_core::types::ToolSpec) supplied at registration;
//! this trait is only the behaviour.

use async_trait::async_trait;
use serde_json::{Map, Value};

use toolloop_core::error::ToolError;

// ─────────────────────────────────────────────
// Tool trait
// ─────────────────────────────────────────────

/// How the agent loop treats a tool's result.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ToolRole {
    /// Ordinary tool; its payload goes back to the model.
    #[default]
    Standard,
    /// Terminal tool; its `answer` ends the run after the current step.
    Submission,
}

/// Every tool handler implements this trait.
///
/// Arguments arrive already validated against the tool's input schema, so
/// required fields are present and correctly typed.
#[async_trait]
pub trait Tool: Send + Sync {
    fn role(&self) -> ToolRole {
        ToolRole::Standard
    }

    /// Run the tool.
    ///
    /// Returns the payload sent back to the model. `ToolError::Failed` is
    /// reported to the model as `{"error": ...}` and the run continues;
    /// `ToolError::Interrupted` aborts the run.
    async fn execute(&self, args: &Map<String, Value>) -> Result<Value, ToolError>;
}

// ─────────────────────────────────────────────
// Param helpers
// ─────────────────────────────────────────────

/// Extract a required string argument.
pub fn require_str<'a>(args: &'a Map<String, Value>, key: &str) -> Result<&'a str, ToolError> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::failed(format!("Missing required parameter: {key}")))
}

/// Extract a required argument of any type.
pub fn require_value<'a>(args: &'a Map<String, Value>, key: &str) -> Result<&'a Value, ToolError> {
    args.get(key)
        .ok_or_else(|| ToolError::failed(format!("Missing required parameter: {key}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_require_str() {
        let a = args(json!({"expression": "print(1)"}));
        assert_eq!(require_str(&a, "expression").unwrap(), "print(1)");
        assert_eq!(
            require_str(&a, "missing").unwrap_err(),
            ToolError::Failed("Missing required parameter: missing".into())
        );
    }

    #[test]
    fn test_require_str_wrong_type() {
        let a = args(json!({"expression": 5}));
        assert!(require_str(&a, "expression").is_err());
    }

    #[test]
    fn test_require_value_accepts_null() {
        let a = args(json!({"answer": null}));
        assert_eq!(require_value(&a, "answer").unwrap(), &Value::Null);
    }

    #[test]
    fn test_default_role_is_standard() {
        assert_eq!(ToolRole::default(), ToolRole::Standard);
    }
}
