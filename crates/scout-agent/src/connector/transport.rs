//! Subprocess tool-server transport on `rmcp`.
//!
//! `serve_client` runs the `initialize` / `notifications/initialized`
//! exchange (protocol 2024-11-05); afterwards `tools/call` requests go through
//! the running service's peer, which routes responses by id so several calls
//! can be in flight at once.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use rmcp::model::{
    CallToolRequestParams, CallToolResult, ClientCapabilities, Content, InitializeRequestParams,
    ProtocolVersion, RawContent,
};
use rmcp::service::{serve_client, Peer, RoleClient, RunningService, ServiceError};
use rmcp::transport::child_process::TokioChildProcess;
use rmcp::transport::IntoTransport;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use scout_core::config::ToolServerConfig;

use super::{ConnectorError, ServerLauncher, ToolTransport};

// ─────────────────────────────────────────────
// Content items
// ─────────────────────────────────────────────

/// One item of a tool-call result.
#[derive(Clone, Debug, PartialEq)]
pub enum ContentItem {
    Text(String),
    /// Non-text payload, kept only as its decoded size.
    Binary { size: usize, mime_type: Option<String> },
}

impl ContentItem {
    fn from_content(content: &Content) -> Option<Self> {
        match &content.raw {
            RawContent::Text(t) => Some(ContentItem::Text(t.text.clone())),
            RawContent::Image(img) => {
                let size = base64::engine::general_purpose::STANDARD
                    .decode(&img.data)
                    .map(|bytes| bytes.len())
                    .unwrap_or(img.data.len());
                Some(ContentItem::Binary {
                    size,
                    mime_type: Some(img.mime_type.clone()),
                })
            }
            _ => None,
        }
    }

    /// Text form fed back to the model.
    pub fn render(&self) -> String {
        match self {
            ContentItem::Text(text) => text.clone(),
            ContentItem::Binary { size, .. } => format!("[Binary data: {size} bytes]"),
        }
    }
}

/// Join rendered items with newlines.
pub fn render_content(items: &[ContentItem]) -> String {
    items
        .iter()
        .map(ContentItem::render)
        .collect::<Vec<_>>()
        .join("\n")
}

fn parse_call_result(result: &CallToolResult) -> Vec<ContentItem> {
    let items: Vec<ContentItem> = result
        .content
        .iter()
        .filter_map(ContentItem::from_content)
        .collect();

    if result.is_error.unwrap_or(false) {
        warn!(content = %render_content(&items), "tool server reported a tool error");
    }
    items
}

fn call_error(err: ServiceError) -> ConnectorError {
    match err {
        ServiceError::McpError(e) => ConnectorError::Rpc {
            code: i64::from(e.code.0),
            message: e.message.to_string(),
        },
        ServiceError::TransportClosed | ServiceError::TransportSend(_) => ConnectorError::Closed,
        ServiceError::Cancelled { .. } => ConnectorError::Cancelled,
        other => ConnectorError::Protocol(other.to_string()),
    }
}

/// Client parameters sent with `initialize`.
fn init_params() -> InitializeRequestParams {
    InitializeRequestParams {
        meta: None,
        protocol_version: ProtocolVersion::V_2024_11_05,
        capabilities: ClientCapabilities::default(),
        client_info: rmcp::model::Implementation::from_build_env(),
    }
}

// ─────────────────────────────────────────────
// Protocol client
// ─────────────────────────────────────────────

/// Tool-server client over a running `rmcp` service.
pub struct McpClient {
    peer: Peer<RoleClient>,
    service: Mutex<Option<RunningService<RoleClient, InitializeRequestParams>>>,
    server: String,
}

impl McpClient {
    /// Handshake over any `rmcp` transport (child process, stream pair).
    pub async fn connect<T, E, A>(transport: T) -> Result<Self, ConnectorError>
    where
        T: IntoTransport<RoleClient, E, A>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let service = serve_client(init_params(), transport)
            .await
            .map_err(|e| ConnectorError::Handshake(e.to_string()))?;

        let server = service
            .peer_info()
            .map(|info| info.server_info.name.clone())
            .unwrap_or_else(|| "unknown".to_string());
        info!(server = %server, "tool server handshake complete");

        Ok(Self {
            peer: service.peer().clone(),
            service: Mutex::new(Some(service)),
            server,
        })
    }

    /// Name the server reported in its `initialize` result.
    pub fn server_name(&self) -> &str {
        &self.server
    }
}

#[async_trait]
impl ToolTransport for McpClient {
    async fn call(&self, name: &str, arguments: Value) -> Result<Vec<ContentItem>, ConnectorError> {
        let params = CallToolRequestParams {
            meta: None,
            name: name.to_string().into(),
            arguments: Some(arguments.as_object().cloned().unwrap_or_default()),
            task: None,
        };
        let result = self.peer.call_tool(params).await.map_err(call_error)?;
        Ok(parse_call_result(&result))
    }

    async fn close(&self) {
        if let Some(service) = self.service.lock().await.take() {
            match service.cancel().await {
                Ok(reason) => info!(?reason, "tool server stopped"),
                Err(e) => debug!(error = %e, "tool server task ended abnormally"),
            }
        }
    }
}

// ─────────────────────────────────────────────
// Stdio launcher
// ─────────────────────────────────────────────

/// Spawns the configured tool server and performs the handshake.
#[derive(Clone, Debug)]
pub struct StdioLauncher {
    command: String,
    args: Vec<String>,
    env: HashMap<String, String>,
}

impl StdioLauncher {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            env: HashMap::new(),
        }
    }

    pub fn from_config(config: &ToolServerConfig) -> Self {
        Self {
            command: config.command.clone(),
            args: config.args.clone(),
            env: config.env.clone(),
        }
    }
}

#[async_trait]
impl ServerLauncher for StdioLauncher {
    async fn launch(&self) -> Result<Arc<dyn ToolTransport>, ConnectorError> {
        debug!(command = %self.command, args = ?self.args, "spawning tool server");

        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped());
        let (transport, stderr) = TokioChildProcess::builder(cmd)
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ConnectorError::MissingBinary(self.command.clone())
                } else {
                    ConnectorError::Spawn(e.to_string())
                }
            })?;

        if let Some(stderr) = stderr {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: "scout_agent::tool_server", "{line}");
                }
            });
        }

        let client = McpClient::connect(transport).await?;
        Ok(Arc::new(client))
    }

    fn describe(&self) -> String {
        format!("{} {}", self.command, self.args.join(" "))
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
