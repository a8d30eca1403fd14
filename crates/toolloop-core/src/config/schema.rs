//! Configuration schema.
//!
//! Hierarchy: `Config` → `AgentConfig`, `ProviderConfig`, `EvalConfig`.
//!
//! JSON on disk uses **camelCase** keys; Rust uses snake_case.

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────
// Root Config
// ─────────────────────────────────────────────

/// Root configuration: loaded from `~/.toolloop/config.json` + env vars.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub agent: AgentConfig,
    pub provider: ProviderConfig,
    pub eval: EvalConfig,
}

// ─────────────────────────────────────────────
// Agent
// ─────────────────────────────────────────────

/// Loop settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentConfig {
    /// Model identifier passed through to the backend untouched.
    pub model: String,
    /// Maximum output tokens per backend call.
    pub max_tokens: u32,
    /// Step budget for a single run.
    pub max_steps: u32,
    /// Print a human-readable transcript while running.
    pub verbose: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: "claude-3-5-haiku-latest".to_string(),
            max_tokens: 1000,
            max_steps: 5,
            verbose: true,
        }
    }
}

// ─────────────────────────────────────────────
// Provider
// ─────────────────────────────────────────────

/// Anthropic Messages API connection settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderConfig {
    pub api_key: String,
    pub api_base: String,
    /// Value of the `anthropic-version` header.
    pub anthropic_version: String,
    /// Whole-request timeout for the HTTP client.
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base: "https://api.anthropic.com".to_string(),
            anthropic_version: "2023-06-01".to_string(),
            timeout_secs: 120,
        }
    }
}

impl ProviderConfig {
    /// Whether an API key is set.
    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }
}

// ─────────────────────────────────────────────
// Eval
// ─────────────────────────────────────────────

/// Harness settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EvalConfig {
    /// Repetitions per case.
    pub runs: u32,
    /// Step budget per harness run.
    pub max_steps: u32,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            runs: 30,
            max_steps: 7,
        }
    }
}
