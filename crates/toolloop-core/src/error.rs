//! Error taxonomy for toolloop.
//!
//! - [`ProviderError`]: the backend call failed or returned garbage (fatal).
//! - [`ToolError`]: a handler failed; `Failed` is recovered into the tool
//!   result, `Interrupted` always propagates.
//! - [`AgentError`]: everything that can end a run or a registration.

use thiserror::Error;

/// Transport-level failure talking to the model backend.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("backend returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed backend response: {0}")]
    Decode(String),

    #[error("provider not configured: {0}")]
    NotConfigured(String),
}

/// Failure raised by a tool handler.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ToolError {
    /// Handler logic failed; the message is shown to the model.
    #[error("{0}")]
    Failed(String),

    /// Explicit cancellation; aborts the run.
    #[error("interrupted")]
    Interrupted,
}

impl ToolError {
    pub fn failed(msg: impl Into<String>) -> Self {
        ToolError::Failed(msg.into())
    }
}

/// Errors surfaced by the registry, the invoker, and the agent loop.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("transport error: {0}")]
    Transport(#[from] ProviderError),

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("tool '{0}' is already registered")]
    DuplicateTool(String),

    #[error("invalid tool spec '{name}': {reason}")]
    InvalidToolSpec { name: String, reason: String },

    #[error("precondition failed for tool '{tool}': {reason}")]
    ToolPrecondition { tool: String, reason: String },

    #[error("run interrupted")]
    Interrupted,

    #[error("transcript invariant violated: {0}")]
    Transcript(String),
}

impl AgentError {
    /// Whether this error came from an explicit interrupt.
    pub fn is_interrupt(&self) -> bool {
        matches!(self, AgentError::Interrupted)
    }
}
