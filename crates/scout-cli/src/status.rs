//! `scout status`: show configuration, tool server and preference status.

use anyhow::Result;
use colored::Colorize;

use scout_agent::{ConnectorState, PreferenceStore, ToolConnector};
use scout_core::config::{get_config_path, load_config};
use scout_core::utils::{expand_home, truncate_string};

/// Run the status command.
pub async fn run() -> Result<()> {
    let config = load_config(None);
    let config_path = get_config_path();

    println!();
    println!("{}", "🔭 Scout Status".cyan().bold());
    println!();

    // Config
    println!(
        "  {:<18} {} {}",
        "Config:".bold(),
        config_path.display(),
        if config_path.exists() {
            "✓".green().to_string()
        } else {
            "(not found)".red().to_string()
        }
    );

    // Model
    println!("  {:<18} {}", "Model:".bold(), config.provider.model);
    println!(
        "  {:<18} {} | max_tokens: {} | max_iterations: {}",
        "Parameters:".bold(),
        format!("temp: {}", config.provider.temperature).dimmed(),
        format!("{}", config.provider.max_tokens).dimmed(),
        format!("{}", config.agent.max_iterations).dimmed(),
    );
    let key_status = if config.provider.is_configured() {
        format!("{} (key set)", "✓".green())
    } else {
        format!("{}", "· not configured".dimmed())
    };
    println!("  {:<18} {}", "Anthropic:".bold(), key_status);

    // Tool server
    println!();
    let connector = ToolConnector::from_config(&config.tool_server);
    let status = connector.status().await;
    let server = match &status.server {
        Some(desc) => desc.clone(),
        None => "-".to_string(),
    };
    let state = match status.state {
        ConnectorState::Unconfigured if status.configured => "not started".dimmed().to_string(),
        other => other.to_string(),
    };
    println!("  {:<18} {}", "Tool server:".bold(), server);
    println!(
        "  {:<18} {} | {} tools | {}",
        "Connection:".bold(),
        status.connection,
        status.tool_count,
        state
    );

    // Preferences
    println!();
    let prefs_path = expand_home(&config.preferences.path);
    let store = PreferenceStore::new(&prefs_path);
    println!(
        "  {:<18} {} ({} stored)",
        "Preferences:".bold(),
        prefs_path.display(),
        store.list().len()
    );
    for record in store.recent(3) {
        println!("    {} {}", "·".dimmed(), truncate_string(&record.text, 70));
    }

    println!();

    Ok(())
}
