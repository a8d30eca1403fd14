//! Model backend layer for toolloop.
//!
//! # Architecture
//!
//! - [`traits::LlmProvider`]: trait the agent loop calls once per step
//! - [`anthropic::AnthropicProvider`]: Anthropic Messages API client
//! - [`anthropic::create_provider`]: convenience builder from config

pub mod anthropic;
pub mod traits;

pub use anthropic::{create_provider, AnthropicProvider};
pub use traits::{LlmProvider, LlmRequestConfig};
