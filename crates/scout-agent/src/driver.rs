//! Conversation driver: the bounded model/tool loop.
//!
//! ```text
//! INIT → AWAITING_MODEL → (TOOL_DISPATCH → AWAITING_MODEL)* → DONE
//! ```
//!
//! Each step calls the model with the full history and handles the classified
//! reply:
//!
//! - `EndTurn` appends the model turn and finishes with its text.
//! - `ToolRequest` dispatches every invocation concurrently, waits for all of
//!   them, then appends the model turn and the results (in request order).
//!   Reaching `max_iterations` finishes with a partial answer.
//! - `MaxTokens` and unknown stop reasons finish with a partial answer.
//!
//! Model failures are not retried. Cancellation is honoured at every await.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use scout_core::types::{
    join_text, tool_invocations, ModelReply, ToolInvocation, ToolResult, Turn,
};
use scout_core::utils::truncate_string;
use scout_providers::{ModelProvider, ModelRequest, ProviderError};

use crate::catalog::{self, ToolSchema};
use crate::connector::{ConnectorError, ToolConnector};

// ─────────────────────────────────────────────
// Types
// ─────────────────────────────────────────────

/// Loop limits and sampling settings.
#[derive(Clone, Debug)]
pub struct DriverConfig {
    /// Model identifier; empty uses the provider default.
    pub model: String,
    /// Maximum tool-dispatch iterations (at least 1).
    pub max_iterations: u32,
    pub temperature: f64,
    /// Wall-clock budget for the whole run.
    pub run_timeout: Option<Duration>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            model: String::new(),
            max_iterations: 10,
            temperature: 0.7,
            run_timeout: None,
        }
    }
}

/// History owned by one run.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConversationState {
    turns: Vec<Turn>,
    iteration_count: u32,
    terminal: bool,
}

impl ConversationState {
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn iteration_count(&self) -> u32 {
        self.iteration_count
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal
    }

    fn push(&mut self, turn: Turn) {
        if self.terminal {
            warn!("ignoring turn appended after the conversation finished");
            return;
        }
        self.turns.push(turn);
    }

    fn finish(&mut self) {
        self.terminal = true;
    }
}

/// Why the run stopped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum TerminalReason {
    EndTurn,
    MaxTokens,
    MaxIterations,
    /// The run's wall-clock budget ran out.
    Deadline,
    /// An unmodelled stop reason from the model.
    StopReason(String),
}

impl TerminalReason {
    /// Whether the answer may be incomplete.
    pub fn is_partial(&self) -> bool {
        !matches!(self, TerminalReason::EndTurn)
    }
}

impl std::fmt::Display for TerminalReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TerminalReason::EndTurn => f.write_str("end_turn"),
            TerminalReason::MaxTokens => f.write_str("max_tokens"),
            TerminalReason::MaxIterations => f.write_str("max_iterations"),
            TerminalReason::Deadline => f.write_str("deadline"),
            TerminalReason::StopReason(r) => write!(f, "stop_reason:{r}"),
        }
    }
}

/// Result of a finished run.
#[derive(Clone, Debug)]
pub struct DriverOutcome {
    pub text: String,
    pub state: ConversationState,
    pub reason: TerminalReason,
    /// Invocations whose results the model never got to use.
    pub unresolved: Vec<ToolInvocation>,
    pub model_calls: u32,
}

/// Hard failures of a run. Each carries the number of model calls that
/// completed before the failure.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("model call failed: {source}")]
    Model {
        #[source]
        source: ProviderError,
        model_calls: u32,
    },

    #[error("tool dispatch failed: {source}")]
    Connector {
        #[source]
        source: ConnectorError,
        model_calls: u32,
    },

    #[error("run cancelled")]
    Cancelled { model_calls: u32 },
}

impl DriverError {
    pub fn model_calls(&self) -> u32 {
        match self {
            DriverError::Model { model_calls, .. }
            | DriverError::Connector { model_calls, .. }
            | DriverError::Cancelled { model_calls } => *model_calls,
        }
    }
}

// ─────────────────────────────────────────────
// ConversationDriver
// ─────────────────────────────────────────────

/// Runs one conversation against a model and a tool connector.
pub struct ConversationDriver {
    provider: Arc<dyn ModelProvider>,
    connector: Arc<ToolConnector>,
    config: DriverConfig,
}

impl ConversationDriver {
    pub fn new(
        provider: Arc<dyn ModelProvider>,
        connector: Arc<ToolConnector>,
        mut config: DriverConfig,
    ) -> Self {
        config.max_iterations = config.max_iterations.max(1);
        Self {
            provider,
            connector,
            config,
        }
    }

    /// Drive the loop from `seed_prompt` until a terminal state.
    pub async fn run(
        &self,
        seed_prompt: &str,
        tool_schemas: &[ToolSchema],
        max_tokens_per_call: u32,
        cancel: &CancellationToken,
    ) -> Result<DriverOutcome, DriverError> {
        let tools = catalog::definitions(tool_schemas);
        let model = if self.config.model.is_empty() {
            self.provider.default_model().to_string()
        } else {
            self.config.model.clone()
        };
        let deadline = self.config.run_timeout.map(|d| Instant::now() + d);

        let mut state = ConversationState::default();
        let mut texts: Vec<String> = Vec::new();
        let mut model_calls = 0u32;

        state.push(Turn::user(seed_prompt));
        info!(
            provider = self.provider.display_name(),
            model = %model,
            tools = tools.len(),
            max_iterations = self.config.max_iterations,
            "conversation started"
        );

        loop {
            let request = ModelRequest {
                model: model.clone(),
                turns: state.turns.clone(),
                tools: tools.clone(),
                max_tokens: max_tokens_per_call,
                temperature: self.config.temperature,
            };

            let response = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(DriverError::Cancelled { model_calls }),
                _ = deadline_elapsed(deadline) => {
                    return Ok(finish(state, &texts, TerminalReason::Deadline, Vec::new(), model_calls));
                }
                res = self.provider.complete(&request) => {
                    res.map_err(|source| DriverError::Model { source, model_calls })?
                }
            };
            model_calls += 1;

            let reply = response.into_reply();
            let text = join_text(reply.content());
            if !text.trim().is_empty() {
                texts.push(text.clone());
            }

            match reply {
                ModelReply::EndTurn { content } => {
                    state.push(Turn::assistant(content));
                    state.finish();
                    info!(iterations = state.iteration_count, model_calls, "conversation finished");
                    return Ok(DriverOutcome {
                        text,
                        state,
                        reason: TerminalReason::EndTurn,
                        unresolved: Vec::new(),
                        model_calls,
                    });
                }

                ModelReply::ToolRequest {
                    content,
                    invocations,
                } => {
                    debug!(
                        iteration = state.iteration_count + 1,
                        tools = ?invocations.iter().map(|i| i.name.as_str()).collect::<Vec<_>>(),
                        "dispatching tools"
                    );

                    let results = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(DriverError::Cancelled { model_calls }),
                        _ = deadline_elapsed(deadline) => {
                            return Ok(finish(state, &texts, TerminalReason::Deadline, invocations, model_calls));
                        }
                        res = self.dispatch(&invocations) => {
                            res.map_err(|source| DriverError::Connector { source, model_calls })?
                        }
                    };

                    state.push(Turn::assistant(content));
                    state.push(Turn::tool_results(results));
                    state.iteration_count += 1;

                    if state.iteration_count >= self.config.max_iterations {
                        warn!(
                            iterations = state.iteration_count,
                            "iteration limit reached, returning partial answer"
                        );
                        return Ok(finish(
                            state,
                            &texts,
                            TerminalReason::MaxIterations,
                            invocations,
                            model_calls,
                        ));
                    }
                }

                ModelReply::MaxTokens { content } => {
                    let unresolved = tool_invocations(&content);
                    state.push(Turn::assistant(content));
                    warn!("model output truncated by token limit");
                    return Ok(finish(state, &texts, TerminalReason::MaxTokens, unresolved, model_calls));
                }

                ModelReply::Other { reason, content } => {
                    let unresolved = tool_invocations(&content);
                    state.push(Turn::assistant(content));
                    warn!(stop_reason = %reason, "unexpected stop reason, returning partial answer");
                    return Ok(finish(
                        state,
                        &texts,
                        TerminalReason::StopReason(reason),
                        unresolved,
                        model_calls,
                    ));
                }
            }
        }
    }

    /// Run every invocation concurrently; results come back in request order.
    async fn dispatch(
        &self,
        invocations: &[ToolInvocation],
    ) -> Result<Vec<ToolResult>, ConnectorError> {
        let results = join_all(invocations.iter().map(|inv| self.connector.invoke(inv))).await;
        let results = results.into_iter().collect::<Result<Vec<_>, _>>()?;
        for r in &results {
            debug!(
                id = %r.invocation_id,
                mode = %r.mode,
                preview = %truncate_string(&r.content, 120),
                "tool result"
            );
        }
        Ok(results)
    }
}

fn finish(
    mut state: ConversationState,
    texts: &[String],
    reason: TerminalReason,
    unresolved: Vec<ToolInvocation>,
    model_calls: u32,
) -> DriverOutcome {
    state.finish();
    DriverOutcome {
        text: texts.join("\n\n"),
        state,
        reason,
        unresolved,
        model_calls,
    }
}

async fn deadline_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use scout_core::types::{ContentBlock, ExecutionMode, ModelResponse, StopReason};
    use serde_json::{json, Value};
    use std::sync::Mutex;

    use crate::connector::{ConnectorState, ContentItem, ServerLauncher, ToolTransport};

    /// Provider that replays scripted responses and records history lengths.
    /// With `fail` set it errors once the script runs out.
    struct MockProvider {
        responses: Mutex<Vec<ModelResponse>>,
        seen_lengths: Mutex<Vec<usize>>,
        repeat_last: bool,
        fail: bool,
        delay: Duration,
    }

    impl MockProvider {
        fn new(responses: Vec<ModelResponse>) -> Self {
            Self {
                responses: Mutex::new(responses),
                seen_lengths: Mutex::new(Vec::new()),
                repeat_last: false,
                fail: false,
                delay: Duration::ZERO,
            }
        }

        fn always(response: ModelResponse) -> Self {
            Self {
                repeat_last: true,
                ..Self::new(vec![response])
            }
        }

        fn failing() -> Self {
            Self::failing_after(vec![])
        }

        fn failing_after(responses: Vec<ModelResponse>) -> Self {
            Self {
                fail: true,
                ..Self::new(responses)
            }
        }

        fn slow(delay: Duration, response: ModelResponse) -> Self {
            Self {
                delay,
                ..Self::always(response)
            }
        }
    }

    #[async_trait]
    impl ModelProvider for MockProvider {
        async fn complete(&self, request: &ModelRequest) -> Result<ModelResponse, ProviderError> {
            self.seen_lengths.lock().unwrap().push(request.turns.len());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let mut responses = self.responses.lock().unwrap();
            match responses.len() {
                0 if self.fail => Err(ProviderError::Api {
                    status: 401,
                    body: "invalid x-api-key".into(),
                }),
                0 => Ok(ModelResponse::end_turn("(no more responses)")),
                1 if self.repeat_last => Ok(responses[0].clone()),
                _ => Ok(responses.remove(0)),
            }
        }

        fn default_model(&self) -> &str {
            "mock-model"
        }

        fn display_name(&self) -> &str {
            "MockProvider"
        }
    }

    fn driver(provider: Arc<MockProvider>, max_iterations: u32) -> ConversationDriver {
        ConversationDriver::new(
            provider,
            Arc::new(ToolConnector::simulated()),
            DriverConfig {
                max_iterations,
                ..Default::default()
            },
        )
    }

    fn click(id: &str) -> ToolInvocation {
        ToolInvocation::new(id, "playwright_click", json!({"selector": format!("#{id}")}))
    }

    /// Live transport whose every call takes `delay`.
    struct SlowTransport {
        delay: Duration,
    }

    #[async_trait]
    impl ToolTransport for SlowTransport {
        async fn call(&self, name: &str, _arguments: Value) -> Result<Vec<ContentItem>, ConnectorError> {
            tokio::time::sleep(self.delay).await;
            Ok(vec![ContentItem::Text(format!("real {name}"))])
        }

        async fn close(&self) {}
    }

    struct SlowLauncher {
        delay: Duration,
    }

    #[async_trait]
    impl ServerLauncher for SlowLauncher {
        async fn launch(&self) -> Result<Arc<dyn ToolTransport>, ConnectorError> {
            Ok(Arc::new(SlowTransport { delay: self.delay }))
        }

        fn describe(&self) -> String {
            "slow".into()
        }
    }

    async fn slow_connector(delay: Duration) -> Arc<ToolConnector> {
        let connector = Arc::new(ToolConnector::new(Arc::new(SlowLauncher { delay })));
        assert!(connector.start(&CancellationToken::new()).await.unwrap());
        connector
    }

    #[tokio::test]
    async fn test_end_turn_single_call() {
        let provider = Arc::new(MockProvider::new(vec![ModelResponse::end_turn("All done")]));
        let outcome = driver(provider, 10)
            .run("seed", &catalog::schemas(), 1024, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.text, "All done");
        assert_eq!(outcome.reason, TerminalReason::EndTurn);
        assert_eq!(outcome.state.turns().len(), 2);
        assert!(outcome.state.is_terminal());
        assert_eq!(outcome.model_calls, 1);
    }

    #[tokio::test]
    async fn test_history_grows_by_two_then_one() {
        let provider = Arc::new(MockProvider::new(vec![
            ModelResponse::tool_use(vec![click("a")]),
            ModelResponse::tool_use(vec![click("b"), click("c")]),
            ModelResponse::end_turn("done"),
        ]));
        let outcome = driver(provider.clone(), 10)
            .run("seed", &catalog::schemas(), 1024, &CancellationToken::new())
            .await
            .unwrap();

        let seen = provider.seen_lengths.lock().unwrap().clone();
        assert_eq!(seen, vec![1, 3, 5]);
        assert_eq!(outcome.state.turns().len(), 6);
        assert_eq!(outcome.state.iteration_count(), 2);

        match &outcome.state.turns()[4] {
            Turn::ToolResults { results } => {
                let ids: Vec<&str> = results.iter().map(|r| r.invocation_id.as_str()).collect();
                assert_eq!(ids, vec!["b", "c"]);
                assert!(results.iter().all(|r| r.mode == ExecutionMode::Simulated));
            }
            other => panic!("expected tool results, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_iteration_bound_is_partial() {
        let provider = Arc::new(MockProvider::always(ModelResponse::tool_use(vec![click("x")])));
        let outcome = driver(provider.clone(), 3)
            .run("seed", &catalog::schemas(), 1024, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.reason, TerminalReason::MaxIterations);
        assert_eq!(outcome.state.iteration_count(), 3);
        assert_eq!(outcome.model_calls, 3);
        assert_eq!(outcome.unresolved.len(), 1);
        assert_eq!(outcome.state.turns().len(), 7);
    }

    #[tokio::test]
    async fn test_partial_text_accumulates() {
        let mut first = ModelResponse::tool_use(vec![click("a")]);
        first.content.insert(0, ContentBlock::text("Looking at the page."));
        let mut second = ModelResponse::tool_use(vec![click("b")]);
        second.content.insert(0, ContentBlock::text("Clicking next."));

        let provider = Arc::new(MockProvider::new(vec![first, second]));
        let outcome = driver(provider, 2)
            .run("seed", &catalog::schemas(), 1024, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.text, "Looking at the page.\n\nClicking next.");
    }

    #[tokio::test]
    async fn test_max_tokens_is_partial() {
        let provider = Arc::new(MockProvider::new(vec![ModelResponse::max_tokens("Story 1 ...")]));
        let outcome = driver(provider, 10)
            .run("seed", &[], 16, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.reason, TerminalReason::MaxTokens);
        assert!(outcome.reason.is_partial());
        assert_eq!(outcome.text, "Story 1 ...");
        assert_eq!(outcome.state.turns().len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_stop_reason_is_partial() {
        let provider = Arc::new(MockProvider::new(vec![ModelResponse {
            stop_reason: StopReason::Other("refusal".into()),
            content: vec![ContentBlock::text("partial")],
            usage: None,
        }]));
        let outcome = driver(provider, 10)
            .run("seed", &[], 16, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.reason, TerminalReason::StopReason("refusal".into()));
        assert_eq!(outcome.text, "partial");
    }

    #[tokio::test]
    async fn test_model_error_is_hard_failure() {
        let provider = Arc::new(MockProvider::failing());
        let err = driver(provider.clone(), 10)
            .run("seed", &[], 16, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DriverError::Model {
                source: ProviderError::Api { status: 401, .. },
                model_calls: 0
            }
        ));
        // Not retried
        assert_eq!(provider.seen_lengths.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_call() {
        let provider = Arc::new(MockProvider::new(vec![ModelResponse::end_turn("never")]));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = driver(provider, 10)
            .run("seed", &[], 16, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::Cancelled { model_calls: 0 }));
    }

    #[tokio::test]
    async fn test_model_error_after_tool_round_keeps_call_count() {
        let provider = Arc::new(MockProvider::failing_after(vec![ModelResponse::tool_use(vec![
            click("a"),
        ])]));
        let err = driver(provider.clone(), 10)
            .run("seed", &catalog::schemas(), 16, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, DriverError::Model { model_calls: 1, .. }));
        assert_eq!(err.model_calls(), 1);
        assert_eq!(provider.seen_lengths.lock().unwrap().clone(), vec![1, 3]);
    }

    #[tokio::test]
    async fn test_deadline_during_slow_model_call_is_partial() {
        let provider = Arc::new(MockProvider::slow(
            Duration::from_secs(5),
            ModelResponse::end_turn("too late"),
        ));
        let d = ConversationDriver::new(
            provider,
            Arc::new(ToolConnector::simulated()),
            DriverConfig {
                run_timeout: Some(Duration::from_millis(50)),
                ..Default::default()
            },
        );

        let started = Instant::now();
        let outcome = d
            .run("seed", &[], 16, &CancellationToken::new())
            .await
            .unwrap();

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(outcome.reason, TerminalReason::Deadline);
        assert!(outcome.reason.is_partial());
        assert!(outcome.state.is_terminal());
        assert_eq!(outcome.model_calls, 0);
        assert!(outcome.text.is_empty());
    }

    #[tokio::test]
    async fn test_deadline_during_slow_dispatch_reports_unresolved() {
        let provider = Arc::new(MockProvider::new(vec![ModelResponse::tool_use(vec![click("a")])]));
        let d = ConversationDriver::new(
            provider,
            slow_connector(Duration::from_secs(5)).await,
            DriverConfig {
                run_timeout: Some(Duration::from_millis(50)),
                ..Default::default()
            },
        );

        let outcome = d
            .run("seed", &catalog::schemas(), 16, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.reason, TerminalReason::Deadline);
        assert_eq!(outcome.model_calls, 1);
        assert_eq!(outcome.unresolved.len(), 1);
        assert_eq!(outcome.unresolved[0].id, "a");
    }

    #[tokio::test]
    async fn test_cancel_during_slow_tool_call() {
        let provider = Arc::new(MockProvider::new(vec![ModelResponse::tool_use(vec![
            click("a"),
            click("b"),
        ])]));
        let connector = slow_connector(Duration::from_secs(5)).await;
        let d = ConversationDriver::new(provider, connector.clone(), DriverConfig::default());

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let watcher = connector.clone();
        tokio::spawn(async move {
            // Wait until both calls are on the wire, then cancel.
            loop {
                if watcher.status().await.in_flight.len() == 2 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            trigger.cancel();
        });

        let started = Instant::now();
        let err = d
            .run("seed", &catalog::schemas(), 16, &cancel)
            .await
            .unwrap_err();

        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(matches!(err, DriverError::Cancelled { model_calls: 1 }));

        // The connection survives and abandoned calls are no longer tracked.
        let status = connector.status().await;
        assert_eq!(connector.state().await, ConnectorState::Connected);
        assert_eq!(status.state, ConnectorState::Connected);
        assert!(status.in_flight.is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_after_stop_is_error() {
        let provider = Arc::new(MockProvider::new(vec![ModelResponse::tool_use(vec![click("a")])]));
        let connector = Arc::new(ToolConnector::simulated());
        connector.stop().await;

        let d = ConversationDriver::new(provider, connector, DriverConfig::default());
        let err = d
            .run("seed", &catalog::schemas(), 16, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DriverError::Connector {
                source: ConnectorError::Stopped,
                model_calls: 1
            }
        ));
    }

    #[test]
    fn test_zero_iterations_clamped() {
        let d = driver(Arc::new(MockProvider::new(vec![])), 0);
        assert_eq!(d.config.max_iterations, 1);
    }
}
