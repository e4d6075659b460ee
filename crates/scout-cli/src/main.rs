//! Scout CLI: entry point.
//!
//! # Commands
//!
//! - `scout run <TASK_OR_FILE> [-i INSTRUCTION] [-o TARGET]`: research and write
//! - `scout feedback <TEXT>`: record a preference for future runs
//! - `scout prefs list|remove|clear`: manage stored preferences
//! - `scout status`: show configuration and tool server status

mod helpers;
mod prefs_cmd;
mod status;

use std::path::Path;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use scout_agent::{RunStatus, Session, Strategy, TaskRequest};
use scout_core::config::{load_config, OutputFormat};

// ─────────────────────────────────────────────
// CLI definition
// ─────────────────────────────────────────────

/// 🔭 Scout: research-driven task writer with browser tools
#[derive(Parser)]
#[command(name = "scout", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a task: plan, research with tools, write the result
    Run {
        /// Task text, or a path to a file containing it
        task: String,

        /// Explicit research instruction (forces the guided strategy)
        #[arg(short, long)]
        instruction: Option<String>,

        /// File to write the result to
        #[arg(short, long)]
        output: Option<String>,

        /// Replace the output file instead of appending
        #[arg(long, default_value_t = false)]
        overwrite: bool,

        /// Output format hint: gherkin or explicit
        #[arg(long)]
        format: Option<OutputFormat>,

        /// Force a strategy: guided, domain or generic
        #[arg(long)]
        strategy: Option<Strategy>,

        /// Feedback to apply to this run (repeatable; also stored)
        #[arg(long)]
        feedback: Vec<String>,

        /// Do not launch the tool server; simulate tool calls
        #[arg(long, default_value_t = false)]
        no_tools: bool,

        /// Enable debug logging
        #[arg(long, default_value_t = false)]
        logs: bool,
    },

    /// Store feedback as a preference for future runs
    Feedback {
        /// Feedback text
        text: String,

        /// Label describing where the feedback came from
        #[arg(short, long, default_value = "cli")]
        context: String,
    },

    /// Manage stored preferences
    Prefs {
        #[command(subcommand)]
        action: prefs_cmd::PrefsCommands,
    },

    /// Show configuration and tool server status
    Status,
}

// ─────────────────────────────────────────────
// Entrypoint
// ─────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            task,
            instruction,
            output,
            overwrite,
            format,
            strategy,
            feedback,
            no_tools,
            logs,
        } => {
            init_logging(logs);
            let opts = RunOptions {
                task,
                instruction,
                output,
                overwrite,
                format,
                strategy,
                feedback,
                no_tools,
            };
            run_task(opts).await
        }
        Commands::Feedback { text, context } => {
            init_logging(false);
            prefs_cmd::add_feedback(&text, &context)
        }
        Commands::Prefs { action } => {
            init_logging(false);
            prefs_cmd::dispatch(action)
        }
        Commands::Status => status::run().await,
    }
}

// ─────────────────────────────────────────────
// Run command
// ─────────────────────────────────────────────

struct RunOptions {
    task: String,
    instruction: Option<String>,
    output: Option<String>,
    overwrite: bool,
    format: Option<OutputFormat>,
    strategy: Option<Strategy>,
    feedback: Vec<String>,
    no_tools: bool,
}

async fn run_task(opts: RunOptions) -> Result<()> {
    let config = load_config(None);
    let task_text = read_task(&opts.task)?;

    let mut request = TaskRequest::new(task_text);
    if let Some(instruction) = &opts.instruction {
        request = request.with_instruction(instruction);
    }
    if let Some(output) = &opts.output {
        let target = helpers::expand_tilde(output);
        if target.is_file() && !opts.overwrite {
            let existing = std::fs::read_to_string(&target)
                .with_context(|| format!("failed to read {}", target.display()))?;
            request = request.with_existing_items(helpers::existing_titles(&existing));
        }
        request = request.with_target(output, opts.overwrite);
    }

    let mut session = Session::from_config(&config)
        .context("model provider is not configured (set provider.apiKey or ANTHROPIC_API_KEY)")?;
    if opts.no_tools {
        session = session.without_tool_server();
    }
    if let Some(format) = opts.format {
        session = session.with_output_format(format);
    }
    for text in &opts.feedback {
        session.feedback_mut().add_feedback(text, "cli").await;
    }
    if !opts.feedback.is_empty() {
        let summary = session.feedback().summary();
        info!(
            session = summary.session_count,
            stored = summary.stored_count,
            categories = ?summary.categories,
            "feedback applied"
        );
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            on_signal.cancel();
        }
    });

    helpers::print_thinking();
    let outcome = session.run(&request, opts.strategy, cancel).await;
    helpers::clear_thinking();
    session.shutdown().await;

    info!(
        diagnostics = %serde_json::to_string(&outcome.diagnostics).unwrap_or_default(),
        "run diagnostics"
    );

    match outcome.status {
        RunStatus::Error => {
            let message = outcome.diagnostics.error.unwrap_or_else(|| "unknown error".into());
            bail!("run failed: {message}");
        }
        RunStatus::Partial => {
            let reason = outcome
                .diagnostics
                .terminal_reason
                .map(|r| r.to_string())
                .unwrap_or_default();
            eprintln!(
                "{} {}",
                "⚠ partial result:".yellow().bold(),
                reason.dimmed()
            );
        }
        RunStatus::Success => {}
    }

    match &request.target {
        Some(target) => {
            let path = helpers::expand_tilde(target);
            helpers::write_artifact(&path, &outcome.text, request.overwrite)?;
            println!(
                "{} {}",
                "✓ written to".green(),
                path.display()
            );
        }
        None => helpers::print_response(&outcome.text),
    }

    if let Some(err) = &outcome.diagnostics.tool_server_error {
        eprintln!("{} {}", "· tool server unavailable:".dimmed(), err.dimmed());
    }

    Ok(())
}

/// Treat `task` as a file path when one exists, otherwise as literal text.
fn read_task(task: &str) -> Result<String> {
    let path = Path::new(task);
    if path.is_file() {
        return std::fs::read_to_string(path)
            .with_context(|| format!("failed to read task file {}", path.display()));
    }
    Ok(task.to_string())
}

/// Initialize tracing/logging.
fn init_logging(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("scout=debug,info")
        } else {
            EnvFilter::new("warn")
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}
