//! Model provider layer for Scout.
//!
//! # Architecture
//!
//! - [`traits::ModelProvider`]: trait the conversation driver talks to
//! - [`anthropic::AnthropicProvider`]: HTTP client for the Messages API
//! - [`anthropic::create_provider`]: convenience builder from config

pub mod anthropic;
pub mod traits;

// Re-export main types for convenience
pub use anthropic::{create_provider, AnthropicProvider};
pub use traits::{ModelProvider, ModelRequest, ProviderError};
