//! Shared CLI helpers: path expansion, output, artifact writing.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use colored::Colorize;

/// Expand `~` at the start of a path to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs_next::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs_next::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

/// Print the final answer to stdout.
pub fn print_response(response: &str) {
    println!();
    println!("{}", "🔭 Scout".cyan().bold());
    if response.is_empty() {
        println!("{}", "(no response)".dimmed());
    } else {
        println!("{response}");
    }
    println!();
}

pub fn print_thinking() {
    eprint!("{}", "⠿ researching...".dimmed());
}

pub fn clear_thinking() {
    eprint!("\r{}\r", " ".repeat(40));
}

/// Write `text` to `path`, replacing it or appending after a blank line.
pub fn write_artifact(path: &Path, text: &str, overwrite: bool) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    if overwrite || !path.exists() {
        return std::fs::write(path, text)
            .with_context(|| format!("failed to write {}", path.display()));
    }

    let existing_len = std::fs::metadata(path)
        .with_context(|| format!("failed to stat {}", path.display()))?
        .len();
    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    if existing_len > 0 {
        file.write_all(b"\n\n")?;
    }
    file.write_all(text.as_bytes())
        .with_context(|| format!("failed to append to {}", path.display()))
}

/// Titles of items already present in an artifact.
///
/// Picks `Feature:`/`Scenario:` lines and markdown headings.
pub fn existing_titles(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter_map(|line| {
            ["Feature:", "Scenario:", "## ", "### "]
                .iter()
                .find_map(|prefix| line.strip_prefix(prefix))
        })
        .map(|title| title.trim().to_string())
        .filter(|title| !title.is_empty())
        .collect()
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
