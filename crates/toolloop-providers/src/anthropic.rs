//! Anthropic Messages API provider.
//!
//! Talks to `POST {api_base}/v1/messages` directly via `reqwest`. Transcript
//! turns map onto the API's block format; tool results are sent as
//! `tool_result` blocks whose `content` is the JSON-encoded payload.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error};

use toolloop_core::config::ProviderConfig;
use toolloop_core::error::ProviderError;
use toolloop_core::types::{Block, LlmResponse, ToolSpec, Turn, UsageInfo, UserContent};

use crate::traits::{LlmProvider, LlmRequestConfig};

// ─────────────────────────────────────────────
// Wire format
// ─────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
    messages: Vec<WireMessage>,
}

#[derive(Debug, Serialize)]
struct WireTool<'a> {
    name: &'a str,
    description: &'a str,
    input_schema: Value,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: WireContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum WireContent {
    Text(String),
    Blocks(Vec<WireBlock>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireBlock {
    Text { text: String },
    ToolUse { id: String, name: String, input: Value },
    ToolResult { tool_use_id: String, content: String },
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ResponseBlock>,
    stop_reason: Option<String>,
    usage: Option<UsageInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    /// Block kinds the loop has no use for (thinking, citations, …).
    #[serde(other)]
    Other,
}

fn to_wire_message(turn: &Turn) -> Result<WireMessage, ProviderError> {
    let msg = match turn {
        Turn::User {
            content: UserContent::Text(text),
        } => WireMessage {
            role: "user",
            content: WireContent::Text(text.clone()),
        },
        Turn::User {
            content: UserContent::ToolResults(results),
        } => {
            let blocks = results
                .iter()
                .map(|r| {
                    serde_json::to_string(&r.payload)
                        .map(|content| WireBlock::ToolResult {
                            tool_use_id: r.tool_use_id.clone(),
                            content,
                        })
                        .map_err(|e| ProviderError::Request(format!("unserializable tool result: {e}")))
                })
                .collect::<Result<Vec<_>, _>>()?;
            WireMessage {
                role: "user",
                content: WireContent::Blocks(blocks),
            }
        }
        Turn::Assistant { content } => WireMessage {
            role: "assistant",
            content: WireContent::Blocks(
                content
                    .iter()
                    .map(|b| match b {
                        Block::Text { text } => WireBlock::Text { text: text.clone() },
                        Block::ToolUse { id, name, input } => WireBlock::ToolUse {
                            id: id.clone(),
                            name: name.clone(),
                            input: input.clone(),
                        },
                    })
                    .collect(),
            ),
        },
    };
    Ok(msg)
}

impl TryFrom<MessagesResponse> for LlmResponse {
    type Error = ProviderError;

    fn try_from(resp: MessagesResponse) -> Result<Self, Self::Error> {
        let mut seen = HashSet::new();
        let mut content = Vec::with_capacity(resp.content.len());
        for block in resp.content {
            match block {
                ResponseBlock::Text { text } => content.push(Block::Text { text }),
                ResponseBlock::ToolUse { id, name, input } => {
                    if !seen.insert(id.clone()) {
                        return Err(ProviderError::Decode(format!("duplicate tool_use id '{id}'")));
                    }
                    content.push(Block::ToolUse { id, name, input });
                }
                ResponseBlock::Other => {}
            }
        }
        Ok(LlmResponse {
            content,
            stop_reason: resp.stop_reason,
            usage: resp.usage,
        })
    }
}

// ─────────────────────────────────────────────
// AnthropicProvider
// ─────────────────────────────────────────────

/// Model backend for the Anthropic Messages API.
pub struct AnthropicProvider {
    /// HTTP client (shared, connection-pooled).
    client: reqwest::Client,
    /// API base URL without the `/v1/messages` suffix.
    api_base: String,
    api_key: String,
    /// `anthropic-version` header value.
    version: String,
}

impl std::fmt::Debug for AnthropicProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicProvider")
            .field("api_base", &self.api_base)
            .field("version", &self.version)
            .finish()
    }
}

impl AnthropicProvider {
    /// Build a provider from connection settings.
    pub fn new(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ProviderError::Request(format!("failed to build HTTP client: {e}")))?;

        Ok(AnthropicProvider {
            client,
            api_base: config.api_base.clone(),
            api_key: config.api_key.clone(),
            version: config.anthropic_version.clone(),
        })
    }

    /// Build the full messages URL.
    fn messages_url(&self) -> String {
        let base = self.api_base.trim_end_matches('/');
        format!("{}/v1/messages", base)
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    async fn chat(
        &self,
        turns: &[Turn],
        tools: &[ToolSpec],
        model: &str,
        config: &LlmRequestConfig,
    ) -> Result<LlmResponse, ProviderError> {
        debug!(
            model = %model,
            turns = turns.len(),
            tools = tools.len(),
            "Calling model backend"
        );

        let request_body = MessagesRequest {
            model,
            max_tokens: config.max_tokens,
            tools: tools
                .iter()
                .map(|t| WireTool {
                    name: &t.name,
                    description: &t.description,
                    input_schema: t.input_schema.to_json_schema(),
                })
                .collect(),
            messages: turns
                .iter()
                .map(to_wire_message)
                .collect::<Result<Vec<_>, _>>()?,
        };

        let response = self
            .client
            .post(self.messages_url())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", &self.version)
            .json(&request_body)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "HTTP request failed");
                ProviderError::Request(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            error!(status = %status, body = %body, "API error");
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let raw: MessagesResponse = response.json().await.map_err(|e| {
            error!(error = %e, "Failed to parse model response");
            ProviderError::Decode(e.to_string())
        })?;
        let llm_resp = LlmResponse::try_from(raw)?;

        debug!(
            blocks = llm_resp.content.len(),
            tool_use = llm_resp.has_tool_use(),
            stop_reason = llm_resp.stop_reason.as_deref().unwrap_or("?"),
            "Model response received"
        );
        Ok(llm_resp)
    }

    fn display_name(&self) -> &str {
        "Anthropic"
    }
}

// ─────────────────────────────────────────────
// Builder (convenience)
// ─────────────────────────────────────────────

/// Build the process-wide backend client from configuration.
///
/// Fails when no API key is configured.
pub fn create_provider(config: &ProviderConfig) -> Result<AnthropicProvider, ProviderError> {
    if !config.is_configured() {
        return Err(ProviderError::NotConfigured(
            "no API key set (use ANTHROPIC_API_KEY or TOOLLOOP_PROVIDER__API_KEY)".into(),
        ));
    }
    debug!(api_base = %config.api_base, "Creating model provider");
    AnthropicProvider::new(config)
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
