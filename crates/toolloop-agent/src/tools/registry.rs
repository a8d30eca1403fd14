//! Tool Registry: name → {spec, handler}, validated at registration.
//!
//! The agent loop sends [`ToolRegistry::definitions`] to the model and the
//! invoker resolves tool-use requests through [`ToolRegistry::lookup`].

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::info;

use toolloop_core::error::AgentError;
use toolloop_core::interrupt::Interrupt;
use toolloop_core::types::ToolSpec;

use super::base::{Tool, ToolRole};
use super::expression::ExpressionTool;
use super::submit::SubmitAnswerTool;

static TOOL_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_-]{1,64}$").expect("valid tool-name regex"));

// ─────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────

/// One registered tool.
pub struct RegisteredTool {
    pub spec: ToolSpec,
    pub handler: Arc<dyn Tool>,
}

impl RegisteredTool {
    pub fn role(&self) -> ToolRole {
        self.handler.role()
    }
}

/// Stores tools in registration order and resolves them by name.
///
/// Immutable once handed to the agent loop; share it behind an `Arc`.
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            tools: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Registry holding `python_expression` and `submit_answer`.
    pub fn with_default_tools(interrupt: Interrupt) -> Result<Self, AgentError> {
        let mut registry = Self::new();
        registry.register(
            ExpressionTool::spec(),
            Arc::new(ExpressionTool::new(interrupt)),
        )?;
        registry.register(SubmitAnswerTool::spec(), Arc::new(SubmitAnswerTool))?;
        Ok(registry)
    }

    /// Register a tool.
    ///
    /// Fails with `DuplicateTool` if the name is taken, and with
    /// `InvalidToolSpec` for a malformed name, repeated schema fields, or a
    /// second submission-role handler.
    pub fn register(&mut self, spec: ToolSpec, handler: Arc<dyn Tool>) -> Result<(), AgentError> {
        if self.index.contains_key(&spec.name) {
            return Err(AgentError::DuplicateTool(spec.name));
        }
        let invalid = |reason: String| AgentError::InvalidToolSpec {
            name: spec.name.clone(),
            reason,
        };
        if !TOOL_NAME.is_match(&spec.name) {
            return Err(invalid(
                "name must match ^[a-zA-Z0-9_-]{1,64}$".to_string(),
            ));
        }
        if let Some(field) = spec.input_schema.duplicate_field() {
            return Err(invalid(format!("field '{field}' is declared twice")));
        }
        if handler.role() == ToolRole::Submission {
            if let Some(existing) = self.tools.iter().find(|t| t.role() == ToolRole::Submission) {
                return Err(invalid(format!(
                    "'{}' already has the submission role",
                    existing.spec.name
                )));
            }
        }

        info!(tool = %spec.name, role = ?handler.role(), "registered tool");
        self.index.insert(spec.name.clone(), self.tools.len());
        self.tools.push(RegisteredTool { spec, handler });
        Ok(())
    }

    /// Resolve a tool by name.
    pub fn lookup(&self, name: &str) -> Result<&RegisteredTool, AgentError> {
        self.index
            .get(name)
            .map(|&i| &self.tools[i])
            .ok_or_else(|| AgentError::UnknownTool(name.to_string()))
    }

    /// Check if a tool is registered.
    pub fn has(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Tool names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.spec.name.clone()).collect()
    }

    /// Specs sent to the model, in registration order.
    pub fn definitions(&self) -> Vec<ToolSpec> {
        self.tools.iter().map(|t| t.spec.clone()).collect()
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{json, Map, Value};
    use toolloop_core::error::ToolError;
    use toolloop_core::schema::{FieldKind, InputSchema};

    /// Minimal test tool.
    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        async fn execute(&self, args: &Map<String, Value>) -> Result<Value, ToolError> {
            Ok(json!({ "echo": args.get("text").cloned().unwrap_or(Value::Null) }))
        }
    }

    /// Tool that claims the submission role.
    struct FinishTool;

    #[async_trait]
    impl Tool for FinishTool {
        fn role(&self) -> ToolRole {
            ToolRole::Submission
        }
        async fn execute(&self, _args: &Map<String, Value>) -> Result<Value, ToolError> {
            Ok(json!({ "answer": null, "submitted": true }))
        }
    }

    fn echo_spec(name: &str) -> ToolSpec {
        ToolSpec::new(
            name,
            "Echoes back the input",
            InputSchema::new().required("text", FieldKind::String, "Text to echo"),
        )
    }

    #[test]
    fn test_register_and_lookup() {
        let mut reg = ToolRegistry::new();
        assert!(reg.is_empty());
        reg.register(echo_spec("echo"), Arc::new(EchoTool)).unwrap();
        assert_eq!(reg.len(), 1);
        assert!(reg.has("echo"));
        assert_eq!(reg.lookup("echo").unwrap().spec.name, "echo");
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut reg = ToolRegistry::new();
        reg.register(echo_spec("echo"), Arc::new(EchoTool)).unwrap();
        let err = reg.register(echo_spec("echo"), Arc::new(EchoTool)).unwrap_err();
        assert!(matches!(err, AgentError::DuplicateTool(name) if name == "echo"));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_unknown_lookup_fails() {
        let reg = ToolRegistry::new();
        let err = reg.lookup("nope").err().unwrap();
        assert!(matches!(err, AgentError::UnknownTool(name) if name == "nope"));
    }

    #[test]
    fn test_lookup_is_idempotent() {
        let mut reg = ToolRegistry::new();
        reg.register(echo_spec("echo"), Arc::new(EchoTool)).unwrap();
        let a = reg.lookup("echo").unwrap();
        let b = reg.lookup("echo").unwrap();
        assert!(Arc::ptr_eq(&a.handler, &b.handler));
        assert!(std::ptr::eq(a, b));
    }

    #[test]
    fn test_invalid_names_rejected() {
        let mut reg = ToolRegistry::new();
        let long = "x".repeat(65);
        for bad in ["", "has space", "dot.name", long.as_str()] {
            let err = reg.register(echo_spec(bad), Arc::new(EchoTool)).unwrap_err();
            assert!(matches!(err, AgentError::InvalidToolSpec { .. }), "{bad:?}");
        }
        assert!(reg.is_empty());
    }

    #[test]
    fn test_duplicate_fields_rejected() {
        let mut reg = ToolRegistry::new();
        let spec = ToolSpec::new(
            "twice",
            "",
            InputSchema::new()
                .required("a", FieldKind::String, "")
                .optional("a", FieldKind::Number, ""),
        );
        let err = reg.register(spec, Arc::new(EchoTool)).unwrap_err();
        assert!(matches!(err, AgentError::InvalidToolSpec { reason, .. } if reason.contains("'a'")));
    }

    #[test]
    fn test_single_submission_role() {
        let mut reg = ToolRegistry::new();
        reg.register(echo_spec("finish"), Arc::new(FinishTool)).unwrap();
        let err = reg.register(echo_spec("finish2"), Arc::new(FinishTool)).unwrap_err();
        assert!(matches!(err, AgentError::InvalidToolSpec { .. }));
    }

    #[test]
    fn test_definitions_in_registration_order() {
        let mut reg = ToolRegistry::new();
        reg.register(echo_spec("zeta"), Arc::new(EchoTool)).unwrap();
        reg.register(echo_spec("alpha"), Arc::new(EchoTool)).unwrap();
        let names: Vec<String> = reg.definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["zeta", "alpha"]);
        assert_eq!(reg.names(), vec!["zeta", "alpha"]);
    }

    #[test]
    fn test_default_tools() {
        let reg = ToolRegistry::with_default_tools(Interrupt::new()).unwrap();
        assert_eq!(reg.names(), vec!["python_expression", "submit_answer"]);
        assert_eq!(reg.lookup("submit_answer").unwrap().role(), ToolRole::Submission);
        assert_eq!(reg.lookup("python_expression").unwrap().role(), ToolRole::Standard);
    }
}
