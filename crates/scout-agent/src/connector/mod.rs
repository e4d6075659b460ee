//! Tool connector: lifecycle of the subprocess tool server, with a
//! simulated fallback.
//!
//! ```text
//! UNCONFIGURED ──start()──▶ STARTING ──ok──▶ CONNECTED ──stop()──▶ STOPPED
//!                              │                 │
//!                              └──fail──▶ UNAVAILABLE (simulate every call)
//! ```
//!
//! While `CONNECTED`, each in-flight call is tracked by invocation id. A
//! failed or timed-out call is answered by the simulated responder for that
//! call only; the connection stays up. Results always carry their
//! [`ExecutionMode`](scout_core::types::ExecutionMode).

pub mod simulate;
pub mod transport;

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use scout_core::config::ToolServerConfig;
use scout_core::types::{ToolInvocation, ToolResult};

pub use simulate::simulate;
pub use transport::{render_content, ContentItem, McpClient, StdioLauncher};

const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);

// ─────────────────────────────────────────────
// Errors + seams
// ─────────────────────────────────────────────

/// Connector and transport failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConnectorError {
    #[error("tool server binary not found: {0}")]
    MissingBinary(String),

    #[error("failed to spawn tool server: {0}")]
    Spawn(String),

    #[error("tool server handshake failed: {0}")]
    Handshake(String),

    #[error("tool server handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    #[error("tool call timed out after {0:?}")]
    CallTimeout(Duration),

    #[error("tool server connection closed")]
    Closed,

    #[error("tool server error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("connector start cancelled")]
    Cancelled,

    #[error("connector is stopped")]
    Stopped,
}

/// A live connection able to execute tool calls.
#[async_trait]
pub trait ToolTransport: Send + Sync {
    /// Execute one tool call and return its content items.
    async fn call(&self, name: &str, arguments: Value) -> Result<Vec<ContentItem>, ConnectorError>;

    /// Tear the connection down. Must be safe to call more than once.
    async fn close(&self);
}

/// Starts a tool server and completes its handshake.
#[async_trait]
pub trait ServerLauncher: Send + Sync {
    async fn launch(&self) -> Result<Arc<dyn ToolTransport>, ConnectorError>;

    /// Human-readable description for status output.
    fn describe(&self) -> String;
}

// ─────────────────────────────────────────────
// State
// ─────────────────────────────────────────────

/// Lifecycle state of the connector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectorState {
    Unconfigured,
    Starting,
    Connected,
    /// Start failed; every call is simulated.
    Unavailable,
    Stopped,
}

impl std::fmt::Display for ConnectorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectorState::Unconfigured => "unconfigured",
            ConnectorState::Starting => "starting",
            ConnectorState::Connected => "connected",
            ConnectorState::Unavailable => "unavailable",
            ConnectorState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Snapshot returned by [`ToolConnector::status`].
#[derive(Clone, Debug, Serialize)]
pub struct ConnectorStatus {
    pub configured: bool,
    pub state: ConnectorState,
    /// Invocation ids currently executing on the live server.
    pub in_flight: Vec<String>,
    pub tool_count: usize,
    pub connection: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
}

struct Inner {
    state: ConnectorState,
    transport: Option<Arc<dyn ToolTransport>>,
}

/// Removes an invocation id from the in-flight list when dropped.
struct InFlight<'a> {
    ids: &'a StdMutex<Vec<String>>,
    id: String,
}

impl<'a> InFlight<'a> {
    fn enter(ids: &'a StdMutex<Vec<String>>, id: &str) -> Self {
        if let Ok(mut v) = ids.lock() {
            v.push(id.to_string());
        }
        Self {
            ids,
            id: id.to_string(),
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Ok(mut v) = self.ids.lock() {
            if let Some(pos) = v.iter().position(|x| *x == self.id) {
                v.remove(pos);
            }
        }
    }
}

// ─────────────────────────────────────────────
// ToolConnector
// ─────────────────────────────────────────────

/// Owns one tool-server connection for one session.
pub struct ToolConnector {
    launcher: Option<Arc<dyn ServerLauncher>>,
    inner: Mutex<Inner>,
    in_flight: StdMutex<Vec<String>>,
    handshake_timeout: Duration,
    call_timeout: Duration,
    tool_count: usize,
}

impl ToolConnector {
    /// Connector that launches a real server through `launcher`.
    pub fn new(launcher: Arc<dyn ServerLauncher>) -> Self {
        Self::with_launcher(Some(launcher))
    }

    /// Connector with no server: every call is simulated.
    pub fn simulated() -> Self {
        Self::with_launcher(None)
    }

    fn with_launcher(launcher: Option<Arc<dyn ServerLauncher>>) -> Self {
        Self {
            launcher,
            inner: Mutex::new(Inner {
                state: ConnectorState::Unconfigured,
                transport: None,
            }),
            in_flight: StdMutex::new(Vec::new()),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            tool_count: crate::catalog::tool_names().len(),
        }
    }

    /// Build from config. A disabled or empty config yields [`simulated`](Self::simulated).
    pub fn from_config(config: &ToolServerConfig) -> Self {
        if !config.is_configured() {
            debug!("tool server not configured, using simulated responder");
            return Self::simulated();
        }
        Self::new(Arc::new(StdioLauncher::from_config(config))).with_timeouts(
            Duration::from_secs(config.handshake_timeout_secs),
            Duration::from_secs(config.call_timeout_secs),
        )
    }

    /// Override handshake and per-call timeouts.
    pub fn with_timeouts(mut self, handshake: Duration, call: Duration) -> Self {
        self.handshake_timeout = handshake;
        self.call_timeout = call;
        self
    }

    /// Whether a real server could be launched at all.
    pub fn is_configured(&self) -> bool {
        self.launcher.is_some()
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> ConnectorState {
        self.inner.lock().await.state
    }

    /// Launch the server and complete the handshake.
    ///
    /// Returns `Ok(true)` when the real path is usable and `Ok(false)` when
    /// calls will be simulated (no server configured, or an earlier start
    /// already failed). A launch failure is returned as an error and leaves
    /// the connector `Unavailable`, so later calls are simulated. Calling
    /// again while `Connected` does not relaunch.
    pub async fn start(&self, cancel: &CancellationToken) -> Result<bool, ConnectorError> {
        let mut inner = self.inner.lock().await;

        match inner.state {
            ConnectorState::Connected => return Ok(true),
            ConnectorState::Unavailable => return Ok(false),
            ConnectorState::Stopped => return Err(ConnectorError::Stopped),
            ConnectorState::Unconfigured | ConnectorState::Starting => {}
        }

        let Some(launcher) = self.launcher.clone() else {
            return Ok(false);
        };

        inner.state = ConnectorState::Starting;
        info!(server = %launcher.describe(), "starting tool server");

        let outcome = tokio::select! {
            _ = cancel.cancelled() => Err(ConnectorError::Cancelled),
            res = tokio::time::timeout(self.handshake_timeout, launcher.launch()) => match res {
                Ok(launched) => launched,
                Err(_) => Err(ConnectorError::HandshakeTimeout(self.handshake_timeout)),
            },
        };

        match outcome {
            Ok(transport) => {
                inner.transport = Some(transport);
                inner.state = ConnectorState::Connected;
                info!("tool server connected");
                Ok(true)
            }
            Err(ConnectorError::Cancelled) => {
                inner.state = ConnectorState::Stopped;
                info!("tool server start cancelled");
                Err(ConnectorError::Cancelled)
            }
            Err(e) => {
                inner.state = ConnectorState::Unavailable;
                warn!(error = %e, "tool server unavailable, falling back to simulated tools");
                Err(e)
            }
        }
    }

    /// Execute one invocation.
    ///
    /// Real when connected, simulated otherwise. A failed real call is
    /// answered by the simulated responder. Errors only after [`stop`](Self::stop).
    pub async fn invoke(&self, invocation: &ToolInvocation) -> Result<ToolResult, ConnectorError> {
        let transport = {
            let inner = self.inner.lock().await;
            match inner.state {
                ConnectorState::Stopped => return Err(ConnectorError::Stopped),
                ConnectorState::Connected => inner.transport.clone(),
                _ => None,
            }
        };

        let Some(transport) = transport else {
            debug!(tool = %invocation.name, id = %invocation.id, "simulating tool call");
            return Ok(simulate(invocation));
        };

        let _guard = InFlight::enter(&self.in_flight, &invocation.id);
        debug!(tool = %invocation.name, id = %invocation.id, "calling tool server");

        let outcome = tokio::time::timeout(
            self.call_timeout,
            transport.call(&invocation.name, invocation.input.clone()),
        )
        .await
        .unwrap_or(Err(ConnectorError::CallTimeout(self.call_timeout)));

        match outcome {
            Ok(items) => Ok(ToolResult::real(&invocation.id, render_content(&items))),
            Err(e) => {
                warn!(
                    tool = %invocation.name,
                    id = %invocation.id,
                    error = %e,
                    "tool call failed, using simulated result"
                );
                Ok(simulate(invocation))
            }
        }
    }

    /// Close the transport and process. Safe to call repeatedly.
    pub async fn stop(&self) {
        let mut inner = self.inner.lock().await;
        if let Some(transport) = inner.transport.take() {
            transport.close().await;
        }
        if inner.state != ConnectorState::Stopped {
            debug!(from = %inner.state, "tool connector stopped");
        }
        inner.state = ConnectorState::Stopped;
    }

    /// Snapshot of configuration, state and in-flight calls.
    pub async fn status(&self) -> ConnectorStatus {
        let state = self.state().await;
        let in_flight = self
            .in_flight
            .lock()
            .map(|v| v.clone())
            .unwrap_or_default();
        ConnectorStatus {
            configured: self.is_configured(),
            state,
            in_flight,
            tool_count: self.tool_count,
            connection: if state == ConnectorState::Connected {
                "real stdio"
            } else {
                "simulated"
            },
            server: self.launcher.as_ref().map(|l| l.describe()),
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
