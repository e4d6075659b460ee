//! HTTP provider for the Anthropic Messages API.
//!
//! Converts the typed conversation history into `/v1/messages` requests and
//! classifies the reply into a [`ModelResponse`]. Tool results travel back as
//! a `user` message made of `tool_result` blocks, in request order.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error};

use scout_core::config::ProviderConfig;
use scout_core::types::{
    ContentBlock, ModelResponse, StopReason, ToolDefinition, ToolInvocation, Turn, UsageInfo,
};

use crate::traits::{ModelProvider, ModelRequest, ProviderError};

const DEFAULT_API_BASE: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

// ─────────────────────────────────────────────
// Wire format
// ─────────────────────────────────────────────

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f64,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "no_tools")]
    tools: &'a [ToolDefinition],
}

fn no_tools(tools: &&[ToolDefinition]) -> bool {
    tools.is_empty()
}

#[derive(Serialize)]
struct WireMessage {
    role: &'static str,
    content: Value,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<WireBlock>,
    stop_reason: Option<String>,
    usage: Option<UsageInfo>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(other)]
    Unsupported,
}

/// Convert conversation turns into Messages API messages.
fn to_wire_messages(turns: &[Turn]) -> Vec<WireMessage> {
    turns
        .iter()
        .map(|turn| match turn {
            Turn::User { content } => WireMessage {
                role: "user",
                content: Value::String(content.clone()),
            },
            Turn::Assistant { content } => WireMessage {
                role: "assistant",
                content: serde_json::to_value(content).unwrap_or(Value::Array(Vec::new())),
            },
            Turn::ToolResults { results } => WireMessage {
                role: "user",
                content: Value::Array(
                    results
                        .iter()
                        .map(|r| {
                            json!({
                                "type": "tool_result",
                                "tool_use_id": r.invocation_id,
                                "content": r.content,
                            })
                        })
                        .collect(),
                ),
            },
        })
        .collect()
}

impl From<MessagesResponse> for ModelResponse {
    fn from(resp: MessagesResponse) -> Self {
        let content = resp
            .content
            .into_iter()
            .filter_map(|block| match block {
                WireBlock::Text { text } => Some(ContentBlock::Text { text }),
                WireBlock::ToolUse { id, name, input } => {
                    Some(ContentBlock::ToolUse(ToolInvocation::new(id, name, input)))
                }
                WireBlock::Unsupported => None,
            })
            .collect();

        ModelResponse {
            stop_reason: StopReason::from_wire(resp.stop_reason.as_deref().unwrap_or("end_turn")),
            content,
            usage: resp.usage,
        }
    }
}

// ─────────────────────────────────────────────
// AnthropicProvider
// ─────────────────────────────────────────────

/// Provider that talks to the Anthropic Messages API over HTTP.
pub struct AnthropicProvider {
    /// HTTP client (shared, connection-pooled).
    client: reqwest::Client,
    /// API base URL without the `/v1/messages` suffix.
    api_base: String,
    /// API key sent as `x-api-key`.
    api_key: String,
    /// Default model for this provider instance.
    default_model: String,
}

impl std::fmt::Debug for AnthropicProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicProvider")
            .field("api_base", &self.api_base)
            .field("default_model", &self.default_model)
            .finish()
    }
}

impl AnthropicProvider {
    /// Create a provider from the user's provider config.
    pub fn new(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let api_base = config
            .api_base
            .clone()
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ProviderError::Client(e.to_string()))?;

        Ok(Self {
            client,
            api_base,
            api_key: config.api_key.clone(),
            default_model: config.model.clone(),
        })
    }

    /// Build the full messages URL.
    fn messages_url(&self) -> String {
        let base = self.api_base.trim_end_matches('/');
        format!("{}/v1/messages", base)
    }
}

#[async_trait]
impl ModelProvider for AnthropicProvider {
    async fn complete(&self, request: &ModelRequest) -> Result<ModelResponse, ProviderError> {
        debug!(
            model = %request.model,
            turns = request.turns.len(),
            tools = request.tools.len(),
            "Calling model"
        );

        let body = MessagesRequest {
            model: &request.model,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            messages: to_wire_messages(&request.turns),
            tools: &request.tools,
        };

        let response = self
            .client
            .post(self.messages_url())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "HTTP request failed");
                ProviderError::Http(e)
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            error!(status = %status, body = %error_text, "API error");
            return Err(ProviderError::Api {
                status: status.as_u16(),
                body: error_text,
            });
        }

        let parsed = response
            .json::<MessagesResponse>()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;
        let model_resp = ModelResponse::from(parsed);

        debug!(
            stop_reason = model_resp.stop_reason.as_str(),
            blocks = model_resp.content.len(),
            "Model response received"
        );
        Ok(model_resp)
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    fn display_name(&self) -> &str {
        "Anthropic"
    }
}

// ─────────────────────────────────────────────
// Builder (convenience)
// ─────────────────────────────────────────────

/// Build a provider from config, failing early when no API key is set.
pub fn create_provider(config: &ProviderConfig) -> Result<AnthropicProvider, ProviderError> {
    if !config.is_configured() {
        return Err(ProviderError::NotConfigured(
            "Anthropic (set ANTHROPIC_API_KEY or provider.apiKey)".to_string(),
        ));
    }

    debug!(
        model = %config.model,
        api_base = config.api_base.as_deref().unwrap_or("default"),
        "Creating model provider"
    );

    AnthropicProvider::new(config)
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
