//! LLM Provider trait: the model backend seen by the agent loop.

use async_trait::async_trait;
use toolloop_core::error::ProviderError;
use toolloop_core::types::{LlmResponse, ToolSpec, Turn};

/// Per-call settings passed through to the backend untouched.
#[derive(Clone, Debug)]
pub struct LlmRequestConfig {
    /// Maximum tokens to generate.
    pub max_tokens: u32,
}

impl Default for LlmRequestConfig {
    fn default() -> Self {
        Self { max_tokens: 1000 }
    }
}

/// A request/response model backend.
///
/// Implementations are constructed once per process and shared by reference
/// across runs; they must not keep per-conversation state.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Send the full transcript plus tool specs and receive one assistant reply.
    ///
    /// # Arguments
    /// * `turns`: Full transcript, seed prompt first.
    /// * `tools`: Tool specs the model may call.
    /// * `model`: Opaque model identifier.
    /// * `config`: Token limit.
    ///
    /// Transport failures and undecodable replies are returned as errors;
    /// callers must not retry.
    async fn chat(
        &self,
        turns: &[Turn],
        tools: &[ToolSpec],
        model: &str,
        config: &LlmRequestConfig,
    ) -> Result<LlmResponse, ProviderError>;

    /// Display name for logging.
    fn display_name(&self) -> &str;
}
