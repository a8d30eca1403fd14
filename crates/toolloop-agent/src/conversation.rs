//! Conversation state: the append-only transcript of one run.
//!
//! Turns strictly alternate, starting with the caller's prompt. A user turn
//! that follows an assistant turn carries exactly one result per tool-use
//! block of that turn, with matching ids, in the same order.

use toolloop_core::error::AgentError;
use toolloop_core::types::{Block, ToolResult, Turn};

#[derive(Clone, Debug)]
pub struct Conversation {
    turns: Vec<Turn>,
}

impl Conversation {
    /// Seed a conversation with a single user turn.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            turns: vec![Turn::user(prompt)],
        }
    }

    /// Append the model's reply. Must follow a user turn.
    pub fn push_assistant(&mut self, blocks: Vec<Block>) -> Result<(), AgentError> {
        if self.turns.last().is_some_and(Turn::is_assistant) {
            return Err(AgentError::Transcript(
                "assistant turn must follow a user turn".into(),
            ));
        }
        self.turns.push(Turn::assistant(blocks));
        Ok(())
    }

    /// Append the results for the last assistant turn's tool calls.
    pub fn push_tool_results(&mut self, results: Vec<ToolResult>) -> Result<(), AgentError> {
        let Some(Turn::Assistant { content }) = self.turns.last() else {
            return Err(AgentError::Transcript(
                "tool results must follow an assistant turn".into(),
            ));
        };

        let expected: Vec<&str> = content
            .iter()
            .filter_map(|b| match b {
                Block::ToolUse { id, .. } => Some(id.as_str()),
                Block::Text { .. } => None,
            })
            .collect();
        let got: Vec<&str> = results.iter().map(|r| r.tool_use_id.as_str()).collect();

        if expected.is_empty() {
            return Err(AgentError::Transcript(
                "assistant turn has no tool-use blocks".into(),
            ));
        }
        if expected != got {
            return Err(AgentError::Transcript(format!(
                "tool results {got:?} do not match tool-use ids {expected:?}"
            )));
        }

        self.turns.push(Turn::tool_results(results));
        Ok(())
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Always false; a conversation starts with its prompt.
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn into_turns(self) -> Vec<Turn> {
        self.turns
    }
}
