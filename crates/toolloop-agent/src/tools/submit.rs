//! `submit_answer`: the terminal tool.

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use toolloop_core::error::ToolError;
use toolloop_core::schema::{FieldKind, InputSchema};
use toolloop_core::types::ToolSpec;

use super::base::{require_value, Tool, ToolRole};

/// Records the model's final answer. Always succeeds.
pub struct SubmitAnswerTool;

impl SubmitAnswerTool {
    pub const NAME: &'static str = "submit_answer";

    pub fn spec() -> ToolSpec {
        ToolSpec::new(
            Self::NAME,
            "Submit the final answer",
            InputSchema::new().required("answer", FieldKind::Any, "The final answer"),
        )
    }
}

#[async_trait]
impl Tool for SubmitAnswerTool {
    fn role(&self) -> ToolRole {
        ToolRole::Submission
    }

    async fn execute(&self, args: &Map<String, Value>) -> Result<Value, ToolError> {
        let answer = require_value(args, "answer")?;
        Ok(json!({ "answer": answer, "submitted": true }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_submit_echoes_answer() {
        let args = json!({"answer": ["a", 1]}).as_object().cloned().unwrap();
        let out = SubmitAnswerTool.execute(&args).await.unwrap();
        assert_eq!(out, json!({"answer": ["a", 1], "submitted": true}));
    }

    #[test]
    fn test_spec() {
        let spec = SubmitAnswerTool::spec();
        assert_eq!(spec.name, "submit_answer");
        let schema = spec.input_schema.to_json_schema();
        assert_eq!(schema["required"], json!(["answer"]));
        assert_eq!(SubmitAnswerTool.role(), ToolRole::Submission);
    }
}
