//! Config loader: reads `~/.scout/config.json`, merges env vars, and
//! applies legacy migrations.
//!
//! # Loading precedence
//! 1. Defaults (from `Config::default()`)
//! 2. JSON file at `~/.scout/config.json`
//! 3. Environment variables `SCOUT_<SECTION>__<FIELD>` (override JSON)

use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::schema::Config;

/// Default config file path.
pub fn get_config_path() -> PathBuf {
    crate::utils::get_data_path().join("config.json")
}

/// Load configuration from the default path + env vars.
///
/// Falls back to `Config::default()` if the file doesn't exist or can't be parsed.
pub fn load_config(path: Option<&Path>) -> Config {
    let config_path = path.map(PathBuf::from).unwrap_or_else(get_config_path);

    load_config_from_path(&config_path)
}

/// Load config from a specific file path.
fn load_config_from_path(path: &Path) -> Config {
    if !path.exists() {
        info!("No config file found at {}, using defaults", path.display());
        return apply_env_overrides(Config::default());
    }

    debug!("Loading config from {}", path.display());

    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to read config file {}: {}", path.display(), e);
            return apply_env_overrides(Config::default());
        }
    };

    let mut raw: serde_json::Value = match serde_json::from_str(&content) {
        Ok(v) => v,
        Err(e) => {
            warn!("Failed to parse config JSON: {}", e);
            return apply_env_overrides(Config::default());
        }
    };

    migrate_config(&mut raw);

    let config: Config = match serde_json::from_value(raw) {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to deserialize config: {}", e);
            return apply_env_overrides(Config::default());
        }
    };

    apply_env_overrides(config)
}

/// Save configuration to disk (pretty-printed JSON with camelCase keys).
pub fn save_config(config: &Config, path: Option<&Path>) -> std::io::Result<()> {
    let config_path = path.map(PathBuf::from).unwrap_or_else(get_config_path);

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(config)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;

    std::fs::write(&config_path, json)?;
    debug!("Config saved to {}", config_path.display());
    Ok(())
}

/// Apply legacy config migrations.
///
/// Moves an `mcpServers.playwright` block (`{command, args, env}`) into
/// `toolServer` when no `toolServer` section is present.
fn migrate_config(raw: &mut serde_json::Value) {
    if raw.get("toolServer").is_some() {
        return;
    }
    let Some(legacy) = raw
        .get("mcpServers")
        .and_then(|servers| servers.get("playwright"))
        .cloned()
    else {
        return;
    };

    let mut tool_server = serde_json::Map::new();
    for key in ["command", "args", "env"] {
        if let Some(value) = legacy.get(key) {
            tool_server.insert(key.to_string(), value.clone());
        }
    }
    if let Some(obj) = raw.as_object_mut() {
        obj.insert(
            "toolServer".to_string(),
            serde_json::Value::Object(tool_server),
        );
        debug!("Migrated mcpServers.playwright → toolServer");
    }
}

/// Apply environment variable overrides on top of a loaded config.
///
/// Env var format: `SCOUT_<SECTION>__<FIELD>` (double underscore as delimiter).
///
/// Supported overrides:
/// - `SCOUT_PROVIDER__API_KEY` → `provider.api_key` (falls back to `ANTHROPIC_API_KEY`)
/// - `SCOUT_PROVIDER__API_BASE` → `provider.api_base`
/// - `SCOUT_PROVIDER__MODEL` → `provider.model`
/// - `SCOUT_PROVIDER__MAX_TOKENS` → `provider.max_tokens`
/// - `SCOUT_AGENT__MAX_ITERATIONS` → `agent.max_iterations`
/// - `SCOUT_AGENT__RUN_TIMEOUT_SECS` → `agent.run_timeout_secs`
/// - `SCOUT_TOOL_SERVER__ENABLED` → `tool_server.enabled`
/// - `SCOUT_TOOL_SERVER__COMMAND` → `tool_server.command`
/// - `SCOUT_PREFERENCES__PATH` → `preferences.path`
fn apply_env_overrides(mut config: Config) -> Config {
    // Provider
    if let Ok(val) = std::env::var("SCOUT_PROVIDER__API_KEY") {
        config.provider.api_key = val;
    }
    if config.provider.api_key.is_empty() {
        if let Ok(val) = std::env::var("ANTHROPIC_API_KEY") {
            config.provider.api_key = val;
        }
    }
    if let Ok(val) = std::env::var("SCOUT_PROVIDER__API_BASE") {
        config.provider.api_base = Some(val);
    }
    if let Ok(val) = std::env::var("SCOUT_PROVIDER__MODEL") {
        config.provider.model = val;
    }
    if let Ok(val) = std::env::var("SCOUT_PROVIDER__MAX_TOKENS") {
        if let Ok(n) = val.parse::<u32>() {
            config.provider.max_tokens = n;
        }
    }

    // Agent
    if let Ok(val) = std::env::var("SCOUT_AGENT__MAX_ITERATIONS") {
        if let Ok(n) = val.parse::<u32>() {
            config.agent.max_iterations = n;
        }
    }
    if let Ok(val) = std::env::var("SCOUT_AGENT__RUN_TIMEOUT_SECS") {
        if let Ok(n) = val.parse::<u64>() {
            config.agent.run_timeout_secs = Some(n);
        }
    }

    // Tool server
    if let Ok(val) = std::env::var("SCOUT_TOOL_SERVER__ENABLED") {
        config.tool_server.enabled = val == "true" || val == "1";
    }
    if let Ok(val) = std::env::var("SCOUT_TOOL_SERVER__COMMAND") {
        config.tool_server.command = val;
    }

    // Preferences
    if let Ok(val) = std::env::var("SCOUT_PREFERENCES__PATH") {
        config.preferences.path = val;
    }

    config
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
