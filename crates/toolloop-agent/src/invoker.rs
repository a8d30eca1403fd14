//! Tool invoker: validates one tool call and runs its handler.
//!
//! Error mapping:
//! - unknown tool → per [`UnknownToolPolicy`]
//! - arguments that fail the input schema → `AgentError::ToolPrecondition` (fatal)
//! - `ToolError::Failed` → `{"error": message}` payload, run continues
//! - `ToolError::Interrupted` or a raised [`Interrupt`] → `AgentError::Interrupted`

use serde_json::{json, Value};
use tracing::{debug, warn};

use toolloop_core::error::{AgentError, ToolError};
use toolloop_core::interrupt::Interrupt;
use toolloop_core::types::{ToolCall, ToolResult};

use crate::tools::base::ToolRole;
use crate::tools::registry::ToolRegistry;

/// What to do when the model asks for a tool that is not registered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum UnknownToolPolicy {
    /// Answer the request with `{"error": "Unknown tool: <name>"}` and continue.
    #[default]
    ReportToModel,
    /// Fail the run with `AgentError::UnknownTool`.
    Abort,
}

/// Result of one successful dispatch.
#[derive(Clone, Debug, PartialEq)]
pub struct Invocation {
    pub result: ToolResult,
    /// The submitted answer, when the handler has the submission role.
    pub submitted: Option<Value>,
}

/// Dispatches tool calls against a registry.
pub struct ToolInvoker<'a> {
    registry: &'a ToolRegistry,
    interrupt: Interrupt,
    unknown_tool: UnknownToolPolicy,
}

impl<'a> ToolInvoker<'a> {
    pub fn new(registry: &'a ToolRegistry, interrupt: Interrupt) -> Self {
        Self {
            registry,
            interrupt,
            unknown_tool: UnknownToolPolicy::default(),
        }
    }

    pub fn with_unknown_tool_policy(mut self, policy: UnknownToolPolicy) -> Self {
        self.unknown_tool = policy;
        self
    }

    /// Run a single tool call.
    pub async fn invoke(&self, call: &ToolCall) -> Result<Invocation, AgentError> {
        self.interrupt.check()?;

        let tool = match self.registry.lookup(&call.name) {
            Ok(tool) => tool,
            Err(e) => {
                warn!(tool = %call.name, id = %call.id, policy = ?self.unknown_tool, "model requested unknown tool");
                return match self.unknown_tool {
                    UnknownToolPolicy::Abort => Err(e),
                    UnknownToolPolicy::ReportToModel => Ok(Invocation {
                        result: ToolResult::new(
                            call.id.clone(),
                            json!({ "error": format!("Unknown tool: {}", call.name) }),
                        ),
                        submitted: None,
                    }),
                };
            }
        };

        let precondition = |reason: String| AgentError::ToolPrecondition {
            tool: call.name.clone(),
            reason,
        };
        tool.spec
            .input_schema
            .validate(&call.arguments)
            .map_err(precondition)?;
        let args = call
            .arguments
            .as_object()
            .ok_or_else(|| precondition("arguments must be an object".to_string()))?;

        debug!(tool = %call.name, id = %call.id, "invoking tool");
        let outcome = tokio::select! {
            biased;
            _ = self.interrupt.cancelled() => return Err(AgentError::Interrupted),
            outcome = tool.handler.execute(args) => outcome,
        };

        match outcome {
            Ok(payload) => {
                let submitted = match tool.role() {
                    ToolRole::Submission => {
                        Some(payload.get("answer").cloned().unwrap_or(Value::Null))
                    }
                    ToolRole::Standard => None,
                };
                Ok(Invocation {
                    result: ToolResult::new(call.id.clone(), payload),
                    submitted,
                })
            }
            Err(ToolError::Interrupted) => Err(AgentError::Interrupted),
            Err(ToolError::Failed(message)) => {
                warn!(tool = %call.name, error = %message, "tool execution failed");
                Ok(Invocation {
                    result: ToolResult::new(call.id.clone(), json!({ "error": message })),
                    submitted: None,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::Map;
    use toolloop_core::schema::{FieldKind, InputSchema};
    use toolloop_core::types::ToolSpec;

    use crate::tools::base::Tool;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        async fn execute(&self, args: &Map<String, Value>) -> Result<Value, ToolError> {
            Ok(json!({ "echo": args["text"] }))
        }
    }

    struct FailingTool;

    #[async_trait]
    impl Tool for FailingTool {
        async fn execute(&self, _args: &Map<String, Value>) -> Result<Value, ToolError> {
            Err(ToolError::failed("boom"))
        }
    }

    struct HangingTool;

    #[async_trait]
    impl Tool for HangingTool {
        async fn execute(&self, _args: &Map<String, Value>) -> Result<Value, ToolError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(json!({}))
        }
    }

    struct InterruptingTool;

    #[async_trait]
    impl Tool for InterruptingTool {
        async fn execute(&self, _args: &Map<String, Value>) -> Result<Value, ToolError> {
            Err(ToolError::Interrupted)
        }
    }

    fn text_spec(name: &str) -> ToolSpec {
        ToolSpec::new(
            name,
            "",
            InputSchema::new().required("text", FieldKind::String, ""),
        )
    }

    fn registry(interrupt: &Interrupt) -> ToolRegistry {
        let mut reg = ToolRegistry::with_default_tools(interrupt.clone()).unwrap();
        reg.register(text_spec("echo"), Arc::new(EchoTool)).unwrap();
        reg.register(text_spec("fail"), Arc::new(FailingTool)).unwrap();
        reg.register(text_spec("hang"), Arc::new(HangingTool)).unwrap();
        reg.register(text_spec("halt"), Arc::new(InterruptingTool)).unwrap();
        reg
    }

    fn call(id: &str, name: &str, arguments: Value) -> ToolCall {
        ToolCall {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    #[tokio::test]
    async fn test_invoke_echo() {
        let interrupt = Interrupt::new();
        let reg = registry(&interrupt);
        let invoker = ToolInvoker::new(&reg, interrupt);
        let out = invoker
            .invoke(&call("t1", "echo", json!({"text": "hi"})))
            .await
            .unwrap();
        assert_eq!(out.result.tool_use_id, "t1");
        assert_eq!(out.result.payload, json!({"echo": "hi"}));
        assert!(out.submitted.is_none());
    }

    #[tokio::test]
    async fn test_submission_records_answer() {
        let interrupt = Interrupt::new();
        let reg = registry(&interrupt);
        let invoker = ToolInvoker::new(&reg, interrupt);
        let out = invoker
            .invoke(&call("t1", "submit_answer", json!({"answer": 89})))
            .await
            .unwrap();
        assert_eq!(out.submitted, Some(json!(89)));
        assert_eq!(out.result.payload, json!({"answer": 89, "submitted": true}));
    }

    #[tokio::test]
    async fn test_expression_tool_through_invoker() {
        let interrupt = Interrupt::new();
        let reg = registry(&interrupt);
        let invoker = ToolInvoker::new(&reg, interrupt);
        let out = invoker
            .invoke(&call(
                "t1",
                "python_expression",
                json!({"expression": "print((2**3 + 3**4) * 1)"}),
            ))
            .await
            .unwrap();
        assert_eq!(out.result.payload["result"], "89\n");
    }

    #[tokio::test]
    async fn test_missing_required_argument_is_fatal() {
        let interrupt = Interrupt::new();
        let reg = registry(&interrupt);
        let invoker = ToolInvoker::new(&reg, interrupt);

        for (name, args) in [
            ("submit_answer", json!({})),
            ("python_expression", json!({"code": "print(1)"})),
        ] {
            let err = invoker.invoke(&call("t1", name, args)).await.unwrap_err();
            match err {
                AgentError::ToolPrecondition { tool, reason } => {
                    assert_eq!(tool, name);
                    assert!(reason.contains("missing required argument"), "{reason}");
                }
                other => panic!("unexpected error: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_mistyped_or_non_object_arguments_are_fatal() {
        let interrupt = Interrupt::new();
        let reg = registry(&interrupt);
        let invoker = ToolInvoker::new(&reg, interrupt);

        let err = invoker
            .invoke(&call("t1", "python_expression", json!({"expression": 5})))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::ToolPrecondition { .. }));

        let err = invoker
            .invoke(&call("t2", "echo", json!("hi")))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::ToolPrecondition { .. }));
    }

    #[tokio::test]
    async fn test_handler_failure_becomes_error_payload() {
        let interrupt = Interrupt::new();
        let reg = registry(&interrupt);
        let invoker = ToolInvoker::new(&reg, interrupt);
        let out = invoker
            .invoke(&call("t9", "fail", json!({"text": "x"})))
            .await
            .unwrap();
        assert_eq!(out.result.tool_use_id, "t9");
        assert_eq!(out.result.payload, json!({"error": "boom"}));
    }

    #[tokio::test]
    async fn test_unknown_tool_policies() {
        let interrupt = Interrupt::new();
        let reg = registry(&interrupt);

        let report = ToolInvoker::new(&reg, interrupt.clone());
        let out = report.invoke(&call("t1", "nope", json!({}))).await.unwrap();
        assert_eq!(out.result.payload, json!({"error": "Unknown tool: nope"}));

        let abort = ToolInvoker::new(&reg, interrupt).with_unknown_tool_policy(UnknownToolPolicy::Abort);
        let err = abort.invoke(&call("t1", "nope", json!({}))).await.unwrap_err();
        assert!(matches!(err, AgentError::UnknownTool(name) if name == "nope"));
    }

    #[tokio::test]
    async fn test_handler_interrupt_propagates() {
        let interrupt = Interrupt::new();
        let reg = registry(&interrupt);
        let invoker = ToolInvoker::new(&reg, interrupt);
        let err = invoker
            .invoke(&call("t1", "halt", json!({"text": ""})))
            .await
            .unwrap_err();
        assert!(err.is_interrupt());
    }

    #[tokio::test]
    async fn test_interrupt_cancels_running_handler() {
        let interrupt = Interrupt::new();
        let reg = registry(&interrupt);
        let invoker = ToolInvoker::new(&reg, interrupt.clone());

        let trigger = interrupt.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.trigger();
        });

        let err = tokio::time::timeout(
            Duration::from_secs(5),
            invoker.invoke(&call("t1", "hang", json!({"text": ""}))),
        )
        .await
        .expect("interrupt should cancel the handler")
        .unwrap_err();
        assert!(err.is_interrupt());
    }

    #[tokio::test]
    async fn test_raised_interrupt_skips_handler() {
        let interrupt = Interrupt::new();
        let reg = registry(&interrupt);
        interrupt.trigger();
        let invoker = ToolInvoker::new(&reg, interrupt);
        let err = invoker
            .invoke(&call("t1", "echo", json!({"text": "hi"})))
            .await
            .unwrap_err();
        assert!(err.is_interrupt());
    }
}
