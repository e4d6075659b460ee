//! Model provider trait: the seam between the conversation driver and a
//! concrete model backend.

use async_trait::async_trait;
use scout_core::types::{ModelResponse, ToolDefinition, Turn};

/// Everything a single model call needs.
#[derive(Clone, Debug)]
pub struct ModelRequest {
    /// Model identifier (e.g. `"claude-sonnet-4-20250514"`).
    pub model: String,
    /// Full conversation history, oldest first.
    pub turns: Vec<Turn>,
    /// Tools the model may request. Empty means no tools are offered.
    pub tools: Vec<ToolDefinition>,
    /// Maximum tokens to generate.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f64,
}

/// Errors surfaced by a model call.
///
/// These are hard failures for the run; there is no retry.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("no API key configured for {0}")]
    NotConfigured(String),

    #[error("failed to build HTTP client: {0}")]
    Client(String),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("failed to parse model response: {0}")]
    Parse(String),
}

/// Trait that every model backend implements.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Send one request and return the classified response.
    async fn complete(&self, request: &ModelRequest) -> Result<ModelResponse, ProviderError>;

    /// The default model for this provider instance.
    fn default_model(&self) -> &str;

    /// Display name for logging.
    fn display_name(&self) -> &str;
}
