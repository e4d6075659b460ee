//! Configuration schema.
//!
//! Hierarchy: `Config` → `ProviderConfig`, `AgentConfig`, `ToolServerConfig`,
//! `PreferencesConfig`.
//!
//! JSON on disk uses **camelCase** keys; Rust uses snake_case.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ─────────────────────────────────────────────
// Root Config
// ─────────────────────────────────────────────

/// Root configuration: loaded from `~/.scout/config.json` + env vars.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub provider: ProviderConfig,
    pub agent: AgentConfig,
    pub tool_server: ToolServerConfig,
    pub preferences: PreferencesConfig,
}

// ─────────────────────────────────────────────
// Provider
// ─────────────────────────────────────────────

/// Model provider connection settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderConfig {
    /// API key for authentication.
    pub api_key: String,
    /// Custom API base URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
    /// Model identifier.
    pub model: String,
    /// Maximum output tokens per model call.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f64,
    /// HTTP request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base: None,
            model: "claude-sonnet-4-20250514".to_string(),
            max_tokens: 8192,
            temperature: 0.7,
            request_timeout_secs: 120,
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
// Agent
// ─────────────────────────────────────────────

/// Format instruction folded into every prompt.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Given/When/Then criteria.
    #[default]
    Gherkin,
    /// Long-form numbered sections.
    Explicit,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gherkin" => Ok(OutputFormat::Gherkin),
            "explicit" => Ok(OutputFormat::Explicit),
            other => Err(format!("unknown output format: {other}")),
        }
    }
}

/// Conversation loop settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentConfig {
    /// Maximum tool-dispatch iterations per run.
    pub max_iterations: u32,
    /// Optional wall-clock budget for a whole run, in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_timeout_secs: Option<u64>,
    /// Default output format hint.
    pub output_format: OutputFormat,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            run_timeout_secs: None,
            output_format: OutputFormat::Gherkin,
        }
    }
}

// ─────────────────────────────────────────────
// Tool server
// ─────────────────────────────────────────────

/// Subprocess tool server settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolServerConfig {
    /// Whether to try starting the real server at all.
    pub enabled: bool,
    /// Executable to spawn.
    pub command: String,
    /// Arguments for the executable.
    pub args: Vec<String>,
    /// Extra environment for the subprocess.
    pub env: HashMap<String, String>,
    /// Handshake timeout in seconds.
    pub handshake_timeout_secs: u64,
    /// Per-call timeout in seconds.
    pub call_timeout_secs: u64,
}

impl Default for ToolServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command: "npx".to_string(),
            args: vec![
                "-y".to_string(),
                "@executeautomation/playwright-mcp-server".to_string(),
            ],
            env: HashMap::new(),
            handshake_timeout_secs: 30,
            call_timeout_secs: 60,
        }
    }
}

impl ToolServerConfig {
    /// Whether enough is set to attempt a launch.
    pub fn is_configured(&self) -> bool {
        self.enabled && !self.command.trim().is_empty()
    }
}

// ─────────────────────────────────────────────
// Preferences
// ─────────────────────────────────────────────

/// Preference store location.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PreferencesConfig {
    /// Path of the store file (`~` is expanded).
    pub path: String,
}

impl Default for PreferencesConfig {
    fn default() -> Self {
        Self {
            path: "~/.scout/preferences.json".to_string(),
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.agent.max_iterations, 10);
        assert_eq!(config.tool_server.handshake_timeout_secs, 30);
        assert_eq!(config.tool_server.call_timeout_secs, 60);
        assert!(!config.provider.is_configured());
        assert!(config.tool_server.is_configured());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: Config = serde_json::from_str(
            r#"{"agent": {"maxIterations": 3}, "toolServer": {"command": "node"}}"#,
        )
        .unwrap();
        assert_eq!(config.agent.max_iterations, 3);
        assert_eq!(config.agent.output_format, OutputFormat::Gherkin);
        assert_eq!(config.tool_server.command, "node");
        assert_eq!(config.tool_server.call_timeout_secs, 60);
    }

    #[test]
    fn test_output_format_parse() {
        assert_eq!("Explicit".parse::<OutputFormat>().unwrap(), OutputFormat::Explicit);
        assert_eq!("gherkin".parse::<OutputFormat>().unwrap(), OutputFormat::Gherkin);
        assert!("yaml".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_disabled_tool_server_not_configured() {
        let cfg = ToolServerConfig {
            enabled: false,
            ..Default::default()
        };
        assert!(!cfg.is_configured());

        let cfg = ToolServerConfig {
            command: "  ".into(),
            ..Default::default()
        };
        assert!(!cfg.is_configured());
    }

    #[test]
    fn test_serializes_camel_case() {
        let raw = serde_json::to_value(Config::default()).unwrap();
        assert!(raw["toolServer"].get("handshakeTimeoutSecs").is_some());
        assert!(raw["agent"].get("maxIterations").is_some());
        assert!(raw["provider"].get("api_key").is_none());
    }
}
