//! Core types for toolloop: the transcript model shared by the loop and backends.
//!
//! A conversation is a list of [`Turn`]s. Assistant turns carry ordered
//! [`Block`]s (text or tool-use requests); the user turn that follows a
//! tool-using assistant turn carries one [`ToolResult`] per request, in order.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::schema::InputSchema;

// ─────────────────────────────────────────────
// Transcript
// ─────────────────────────────────────────────

/// One content unit inside an assistant turn.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    /// Free text from the model.
    Text { text: String },
    /// A uniquely identified request to run a named tool.
    ToolUse {
        id: String,
        name: String,
        /// Named arguments, normally a JSON object.
        input: Value,
    },
}

impl Block {
    /// Create a text block.
    pub fn text(text: impl Into<String>) -> Self {
        Block::Text { text: text.into() }
    }

    /// Create a tool-use block.
    pub fn tool_use(id: impl Into<String>, name: impl Into<String>, input: Value) -> Self {
        Block::ToolUse {
            id: id.into(),
            name: name.into(),
            input,
        }
    }

    /// View this block as a [`ToolCall`], if it is a tool-use request.
    pub fn as_tool_call(&self) -> Option<ToolCall> {
        match self {
            Block::ToolUse { id, name, input } => Some(ToolCall {
                id: id.clone(),
                name: name.clone(),
                arguments: input.clone(),
            }),
            Block::Text { .. } => None,
        }
    }
}

/// A tool result correlated to a tool-use request by id.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ToolResult {
    pub tool_use_id: String,
    /// Arbitrary structured payload; the model sees its JSON encoding.
    pub payload: Value,
}

impl ToolResult {
    pub fn new(tool_use_id: impl Into<String>, payload: Value) -> Self {
        ToolResult {
            tool_use_id: tool_use_id.into(),
            payload,
        }
    }
}

/// Content of a user turn: the seed prompt, or the results of the previous
/// assistant turn's tool calls.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum UserContent {
    Text(String),
    ToolResults(Vec<ToolResult>),
}

/// A single transcript entry.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Turn {
    User { content: UserContent },
    Assistant { content: Vec<Block> },
}

impl Turn {
    /// Create a user turn with plain text.
    pub fn user(text: impl Into<String>) -> Self {
        Turn::User {
            content: UserContent::Text(text.into()),
        }
    }

    /// Create a user turn carrying tool results.
    pub fn tool_results(results: Vec<ToolResult>) -> Self {
        Turn::User {
            content: UserContent::ToolResults(results),
        }
    }

    /// Create an assistant turn.
    pub fn assistant(blocks: Vec<Block>) -> Self {
        Turn::Assistant { content: blocks }
    }

    pub fn is_assistant(&self) -> bool {
        matches!(self, Turn::Assistant { .. })
    }
}

// ─────────────────────────────────────────────
// Tools
// ─────────────────────────────────────────────

/// Static description of a tool, sent to the model with every request.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolSpec {
    /// Unique key in the registry.
    pub name: String,
    pub description: String,
    pub input_schema: InputSchema,
}

impl ToolSpec {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: InputSchema,
    ) -> Self {
        ToolSpec {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

/// A model-issued request to run a tool. Lives only for one step.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

// ─────────────────────────────────────────────
// Backend response
// ─────────────────────────────────────────────

/// Token accounting reported by the backend.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsageInfo {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl std::ops::AddAssign for UsageInfo {
    fn add_assign(&mut self, rhs: Self) {
        self.input_tokens += rhs.input_tokens;
        self.output_tokens += rhs.output_tokens;
    }
}

/// One assistant reply from the model backend.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LlmResponse {
    /// Ordered content blocks.
    pub content: Vec<Block>,
    /// Why the model stopped generating (e.g. `"end_turn"`, `"tool_use"`).
    pub stop_reason: Option<String>,
    pub usage: Option<UsageInfo>,
}

impl LlmResponse {
    /// Tool-use requests in arrival order.
    pub fn tool_calls(&self) -> Vec<ToolCall> {
        self.content.iter().filter_map(Block::as_tool_call).collect()
    }

    pub fn has_tool_use(&self) -> bool {
        self.content
            .iter()
            .any(|b| matches!(b, Block::ToolUse { .. }))
    }

    /// Concatenated text blocks, if any.
    pub fn text(&self) -> Option<String> {
        let parts: Vec<&str> = self
            .content
            .iter()
            .filter_map(|b| match b {
                Block::Text { text } => Some(text.as_str()),
                Block::ToolUse { .. } => None,
            })
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n"))
        }
    }
}

// ─────────────────────────────────────────────
// Outcome
// ─────────────────────────────────────────────

/// Caller-visible result of one loop run.
#[derive(Clone, Debug, PartialEq)]
pub enum LoopOutcome {
    /// The submission tool was called with this answer.
    Submitted(Value),
    /// Natural stop or budget exhaustion.
    NotSubmitted,
}

impl LoopOutcome {
    pub fn answer(&self) -> Option<&Value> {
        match self {
            LoopOutcome::Submitted(v) => Some(v),
            LoopOutcome::NotSubmitted => None,
        }
    }

    pub fn is_submitted(&self) -> bool {
        matches!(self, LoopOutcome::Submitted(_))
    }
}

/// Why a run ended. Natural stop and budget exhaustion both surface as
/// [`LoopOutcome::NotSubmitted`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    Submitted,
    NaturalStop,
    BudgetExhausted,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StopReason::Submitted => "submitted",
            StopReason::NaturalStop => "natural stop",
            StopReason::BudgetExhausted => "budget exhausted",
        };
        f.write_str(s)
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_block_serialization() {
        let block = Block::tool_use("toolu_1", "python_expression", json!({"expression": "1"}));
        let v = serde_json::to_value(&block).unwrap();
        assert_eq!(v["type"], "tool_use");
        assert_eq!(v["id"], "toolu_1");
        assert_eq!(v["input"]["expression"], "1");

        let text = serde_json::to_value(Block::text("hi")).unwrap();
        assert_eq!(text, json!({"type": "text", "text": "hi"}));
    }

    #[test]
    fn test_turn_role_tag() {
        let v = serde_json::to_value(Turn::user("prompt")).unwrap();
        assert_eq!(v["role"], "user");
        assert_eq!(v["content"], "prompt");

        let v = serde_json::to_value(Turn::assistant(vec![Block::text("ok")])).unwrap();
        assert_eq!(v["role"], "assistant");
        assert_eq!(v["content"][0]["text"], "ok");
    }

    #[test]
    fn test_tool_results_turn_deserializes() {
        let raw = json!({
            "role": "user",
            "content": [{"tool_use_id": "a", "payload": {"answer": 1}}]
        });
        let turn: Turn = serde_json::from_value(raw).unwrap();
        match turn {
            Turn::User {
                content: UserContent::ToolResults(results),
            } => {
                assert_eq!(results.len(), 1);
                assert_eq!(results[0].tool_use_id, "a");
            }
            other => panic!("unexpected turn: {other:?}"),
        }
    }

    #[test]
    fn test_response_tool_calls_in_order() {
        let resp = LlmResponse {
            content: vec![
                Block::text("thinking"),
                Block::tool_use("t1", "a", json!({})),
                Block::tool_use("t2", "b", json!({"x": 1})),
            ],
            ..Default::default()
        };
        let calls = resp.tool_calls();
        assert!(resp.has_tool_use());
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "t1");
        assert_eq!(calls[1].name, "b");
        assert_eq!(calls[1].arguments["x"], 1);
        assert_eq!(resp.text().as_deref(), Some("thinking"));
    }

    #[test]
    fn test_response_without_tools() {
        let resp = LlmResponse {
            content: vec![Block::text("done")],
            ..Default::default()
        };
        assert!(!resp.has_tool_use());
        assert!(resp.tool_calls().is_empty());
    }

    #[test]
    fn test_usage_accumulates() {
        let mut total = UsageInfo::default();
        total += UsageInfo { input_tokens: 10, output_tokens: 2 };
        total += UsageInfo { input_tokens: 5, output_tokens: 3 };
        assert_eq!(total, UsageInfo { input_tokens: 15, output_tokens: 5 });
    }

    #[test]
    fn test_outcome_answer() {
        assert_eq!(LoopOutcome::Submitted(json!(89)).answer(), Some(&json!(89)));
        assert!(LoopOutcome::NotSubmitted.answer().is_none());
        assert_eq!(StopReason::BudgetExhausted.to_string(), "budget exhausted");
    }
}
