//! `scout prefs` and `scout feedback`: manage stored preferences.
//!
//! - `scout prefs list`: list stored preferences
//! - `scout prefs remove <INDEX>`: remove one (1-based, as listed)
//! - `scout prefs clear`: remove all
//! - `scout feedback <TEXT> [--context LABEL]`: promote feedback

use anyhow::{bail, Context, Result};
use clap::Subcommand;
use colored::Colorize;

use scout_agent::feedback::analyze;
use scout_agent::PreferenceStore;
use scout_core::config::load_config;
use scout_core::utils::expand_home;

/// Preference subcommands.
#[derive(Subcommand)]
pub enum PrefsCommands {
    /// List stored preferences
    List,

    /// Remove a preference by its listed number
    Remove {
        /// 1-based index from `scout prefs list`
        index: usize,
    },

    /// Remove every stored preference
    Clear,
}

/// Dispatch a prefs subcommand.
pub fn dispatch(cmd: PrefsCommands) -> Result<()> {
    let store = open_store();
    match cmd {
        PrefsCommands::List => list(&store),
        PrefsCommands::Remove { index } => remove(&store, index),
        PrefsCommands::Clear => clear(&store),
    }
}

fn open_store() -> PreferenceStore {
    let config = load_config(None);
    PreferenceStore::new(expand_home(&config.preferences.path))
}

/// Render an RFC 3339 timestamp as a short local date.
fn format_timestamp(ts: &str) -> String {
    chrono::DateTime::parse_from_rfc3339(ts)
        .map(|dt| dt.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|_| "-".to_string())
}

fn list(store: &PreferenceStore) -> Result<()> {
    let records = store
        .load()
        .with_context(|| format!("failed to read {}", store.path().display()))?
        .preferences;

    if records.is_empty() {
        println!("{}", "No stored preferences.".dimmed());
        return Ok(());
    }

    println!();
    println!("{}", "Stored preferences".cyan().bold());
    println!();
    for (i, record) in records.iter().enumerate() {
        println!("  {:>3}. {}", i + 1, record.text);
        println!(
            "       {}",
            format!(
                "{} | {} | applied {}×",
                format_timestamp(&record.timestamp),
                if record.context.is_empty() { "-" } else { record.context.as_str() },
                record.application_count
            )
            .dimmed()
        );
    }
    println!();
    Ok(())
}

fn remove(store: &PreferenceStore, index: usize) -> Result<()> {
    if index == 0 {
        bail!("preference numbers start at 1");
    }
    match store.remove(index - 1).context("failed to update preferences")? {
        Some(record) => println!("{} {}", "✓ removed:".green(), record.text),
        None => bail!("no preference #{index}"),
    }
    Ok(())
}

fn clear(store: &PreferenceStore) -> Result<()> {
    let removed = store.clear().context("failed to clear preferences")?;
    println!("{} {removed} preference(s)", "✓ cleared".green());
    Ok(())
}

/// Promote feedback text straight into the store.
pub fn add_feedback(text: &str, context: &str) -> Result<()> {
    if text.trim().is_empty() {
        bail!("feedback text is empty");
    }
    let store = open_store();
    let added = store
        .promote(text, context)
        .context("failed to store feedback")?;

    let categories: Vec<&str> = analyze(text).iter().map(|c| c.as_str()).collect();
    if added {
        println!(
            "{} {}",
            "✓ preference stored".green(),
            format!("[{}]", categories.join(", ")).dimmed()
        );
    } else {
        println!("{}", "· already stored".dimmed());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_timestamp() {
        assert_ne!(format_timestamp("2026-01-05T10:30:00+00:00"), "-");
        assert_eq!(format_timestamp("not a time"), "-");
    }
}
