//! Session: the caller-facing entry point.
//!
//! A session wires one model provider, one tool connector and one feedback
//! aggregator together. [`Session::run`] plans the task, augments the seed
//! prompt with preferences, drives the conversation and reports the outcome
//! with diagnostics. The connector is started lazily on the first run and
//! stopped by [`Session::shutdown`].
//!
//! Runs on one session are serialized: the tool server and its history of
//! in-flight calls belong to a single conversation at a time.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use scout_core::config::{Config, OutputFormat};
use scout_core::types::{ExecutionMode, ToolInvocation, Turn};
use scout_core::utils::expand_home;
use scout_providers::{create_provider, ModelProvider, ProviderError};

use crate::catalog;
use crate::connector::{ConnectorError, ToolConnector};
use crate::driver::{ConversationDriver, ConversationState, DriverConfig, TerminalReason};
use crate::feedback::FeedbackAggregator;
use crate::planner::{plan_request, Strategy, TaskRequest};
use crate::preferences::PreferenceStore;

// ─────────────────────────────────────────────
// Outcome types
// ─────────────────────────────────────────────

/// Overall result of a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    /// Budget exhausted; `text` holds what was produced so far.
    Partial,
    Error,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Success => f.write_str("success"),
            RunStatus::Partial => f.write_str("partial"),
            RunStatus::Error => f.write_str("error"),
        }
    }
}

/// What happened during a run.
#[derive(Clone, Debug, Serialize)]
pub struct Diagnostics {
    pub strategy: Strategy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prototype_url: Option<String>,
    pub iterations: u32,
    pub model_calls: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminal_reason: Option<TerminalReason>,
    pub real_results: usize,
    pub simulated_results: usize,
    pub unresolved: Vec<ToolInvocation>,
    pub preferences_applied: Vec<String>,
    /// Why the real tool server is not in use, if it failed to start.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_server_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Diagnostics {
    fn new(strategy: Strategy) -> Self {
        Self {
            strategy,
            domain: None,
            prototype_url: None,
            iterations: 0,
            model_calls: 0,
            terminal_reason: None,
            real_results: 0,
            simulated_results: 0,
            unresolved: Vec::new(),
            preferences_applied: Vec::new(),
            tool_server_error: None,
            error: None,
        }
    }

    fn count_results(&mut self, state: &ConversationState) {
        for turn in state.turns() {
            if let Turn::ToolResults { results } = turn {
                for r in results {
                    match r.mode {
                        ExecutionMode::Real => self.real_results += 1,
                        ExecutionMode::Simulated => self.simulated_results += 1,
                    }
                }
            }
        }
    }
}

/// Result of [`Session::run`].
#[derive(Clone, Debug, Serialize)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub text: String,
    pub diagnostics: Diagnostics,
}

impl RunOutcome {
    fn error(message: String, mut diagnostics: Diagnostics) -> Self {
        diagnostics.error = Some(message);
        Self {
            status: RunStatus::Error,
            text: String::new(),
            diagnostics,
        }
    }
}

// ─────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────

pub struct Session {
    provider: Arc<dyn ModelProvider>,
    connector: Arc<ToolConnector>,
    feedback: FeedbackAggregator,
    driver_config: DriverConfig,
    max_tokens: u32,
    output_format: OutputFormat,
    /// Held for the whole of [`run`](Self::run).
    run_guard: Mutex<()>,
}

impl Session {
    pub fn new(
        provider: Arc<dyn ModelProvider>,
        connector: Arc<ToolConnector>,
        feedback: FeedbackAggregator,
        config: &Config,
    ) -> Self {
        Self {
            provider,
            connector,
            feedback,
            driver_config: DriverConfig {
                model: config.provider.model.clone(),
                max_iterations: config.agent.max_iterations,
                temperature: config.provider.temperature,
                run_timeout: config.agent.run_timeout_secs.map(Duration::from_secs),
            },
            max_tokens: config.provider.max_tokens,
            output_format: config.agent.output_format,
            run_guard: Mutex::new(()),
        }
    }

    /// Build every component from config: Anthropic provider, tool
    /// connector and a store-backed feedback aggregator.
    pub fn from_config(config: &Config) -> Result<Self, ProviderError> {
        let provider = Arc::new(create_provider(&config.provider)?);
        let connector = Arc::new(ToolConnector::from_config(&config.tool_server));
        let store = PreferenceStore::new(expand_home(&config.preferences.path));
        Ok(Self::new(
            provider,
            connector,
            FeedbackAggregator::new(store),
            config,
        ))
    }

    /// Replace the connector with one that never launches a server.
    pub fn without_tool_server(mut self) -> Self {
        self.connector = Arc::new(ToolConnector::simulated());
        self
    }

    pub fn with_output_format(mut self, format: OutputFormat) -> Self {
        self.output_format = format;
        self
    }

    pub fn feedback(&self) -> &FeedbackAggregator {
        &self.feedback
    }

    pub fn feedback_mut(&mut self) -> &mut FeedbackAggregator {
        &mut self.feedback
    }

    pub fn connector(&self) -> &ToolConnector {
        &self.connector
    }

    /// Plan, augment, drive and report one task.
    ///
    /// A second concurrent call waits until the first has finished.
    pub async fn run(
        &self,
        task: &TaskRequest,
        strategy_override: Option<Strategy>,
        cancel: CancellationToken,
    ) -> RunOutcome {
        let plan = plan_request(task, strategy_override);
        let mut diagnostics = Diagnostics::new(plan.strategy);
        if !plan.detected_domain.is_empty() {
            diagnostics.domain = Some(plan.detected_domain.clone());
        }
        diagnostics.prototype_url = plan.prototype.as_ref().map(|p| p.url.clone());

        let _exclusive = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return RunOutcome::error("run cancelled".into(), diagnostics);
            }
            guard = self.run_guard.lock() => guard,
        };

        info!(
            strategy = %plan.strategy,
            domain = %plan.detected_domain,
            "task planned"
        );

        let schemas = match catalog::load() {
            Ok(s) => s,
            Err(e) => return RunOutcome::error(format!("tool catalog: {e}"), diagnostics),
        };

        let enhanced = self.feedback.enhance(&plan.seed_prompt, self.output_format);
        diagnostics.preferences_applied = enhanced.applied_preferences.clone();

        match self.connector.start(&cancel).await {
            Ok(true) => info!("tool server connected"),
            Ok(false) => info!("tool calls will be simulated"),
            Err(e @ (ConnectorError::Cancelled | ConnectorError::Stopped)) => {
                return RunOutcome::error(e.to_string(), diagnostics);
            }
            Err(e) => {
                warn!(error = %e, "tool server unavailable, tool calls will be simulated");
                diagnostics.tool_server_error = Some(e.to_string());
            }
        }

        let driver = ConversationDriver::new(
            self.provider.clone(),
            self.connector.clone(),
            self.driver_config.clone(),
        );

        let outcome = match driver
            .run(&enhanced.prompt, &schemas, self.max_tokens, &cancel)
            .await
        {
            Ok(o) => o,
            Err(e) => {
                warn!(error = %e, model_calls = e.model_calls(), "run failed");
                diagnostics.model_calls = e.model_calls();
                if e.model_calls() > 0 {
                    self.record_applied(&enhanced.applied_preferences).await;
                }
                return RunOutcome::error(e.to_string(), diagnostics);
            }
        };

        diagnostics.iterations = outcome.state.iteration_count();
        diagnostics.model_calls = outcome.model_calls;
        diagnostics.count_results(&outcome.state);
        diagnostics.unresolved = outcome.unresolved;

        if outcome.model_calls > 0 {
            self.record_applied(&enhanced.applied_preferences).await;
        }

        let status = if outcome.reason.is_partial() {
            RunStatus::Partial
        } else {
            RunStatus::Success
        };
        diagnostics.terminal_reason = Some(outcome.reason);

        info!(
            status = %status,
            iterations = diagnostics.iterations,
            real = diagnostics.real_results,
            simulated = diagnostics.simulated_results,
            "run finished"
        );

        RunOutcome {
            status,
            text: outcome.text,
            diagnostics,
        }
    }

    /// Bump the application count of preferences a model call has seen.
    async fn record_applied(&self, applied: &[String]) {
        if applied.is_empty() {
            return;
        }
        if let Some(store) = self.feedback.store() {
            if let Err(e) = store.mark_applied_async(applied.to_vec()).await {
                warn!(error = %e, "failed to record applied preferences");
            }
        }
    }

    /// Stop the tool server. The session cannot run tasks afterwards.
    pub async fn shutdown(&self) {
        self.connector.stop().await;
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
