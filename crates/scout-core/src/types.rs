//! Core types for Scout: the typed conversation model.
//!
//! A conversation is an ordered list of [`Turn`]s: the seed prompt, model
//! utterances (text and tool-use blocks), and batches of tool results. Model
//! replies are classified into a [`ModelReply`] sum type so the driver has to
//! handle every stop reason explicitly.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─────────────────────────────────────────────
// Tool invocations and results
// ─────────────────────────────────────────────

/// One tool call requested by the model.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ToolInvocation {
    /// Correlation id assigned by the model (matches the result).
    pub id: String,
    /// Name of the tool to call.
    pub name: String,
    /// Structured input, usually a JSON object.
    #[serde(default)]
    pub input: Value,
}

impl ToolInvocation {
    /// Create a new invocation.
    pub fn new(id: impl Into<String>, name: impl Into<String>, input: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            input,
        }
    }

    /// Read a string field from the input object.
    pub fn input_str(&self, key: &str) -> Option<&str> {
        self.input.get(key).and_then(|v| v.as_str())
    }
}

/// Whether a tool result came from the real tool server or the local stand-in.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Real,
    Simulated,
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionMode::Real => f.write_str("real"),
            ExecutionMode::Simulated => f.write_str("simulated"),
        }
    }
}

/// Output of executing one [`ToolInvocation`].
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ToolResult {
    /// Id of the invocation this result answers.
    pub invocation_id: String,
    /// Result text (binary content is rendered as a size placeholder).
    pub content: String,
    /// Which execution path produced this result.
    pub mode: ExecutionMode,
}

impl ToolResult {
    /// A result produced by the live tool server.
    pub fn real(invocation_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            invocation_id: invocation_id.into(),
            content: content.into(),
            mode: ExecutionMode::Real,
        }
    }

    /// A result produced by the simulated responder.
    pub fn simulated(invocation_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            invocation_id: invocation_id.into(),
            content: content.into(),
            mode: ExecutionMode::Simulated,
        }
    }
}

// ─────────────────────────────────────────────
// Conversation turns
// ─────────────────────────────────────────────

/// A fragment of a model utterance.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    ToolUse(ToolInvocation),
}

impl ContentBlock {
    /// Create a text block.
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }
}

/// One entry of the conversation history.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Turn {
    /// Plain user text (the seed prompt).
    User { content: String },
    /// A model utterance.
    Assistant { content: Vec<ContentBlock> },
    /// Results for every invocation of the preceding assistant turn, in request order.
    ToolResults { results: Vec<ToolResult> },
}

impl Turn {
    /// Create a user turn.
    pub fn user(content: impl Into<String>) -> Self {
        Turn::User {
            content: content.into(),
        }
    }

    /// Create an assistant turn.
    pub fn assistant(content: Vec<ContentBlock>) -> Self {
        Turn::Assistant { content }
    }

    /// Create a tool-results turn.
    pub fn tool_results(results: Vec<ToolResult>) -> Self {
        Turn::ToolResults { results }
    }

    /// Concatenated text of an assistant turn (empty for other kinds).
    pub fn text(&self) -> String {
        match self {
            Turn::Assistant { content } => join_text(content),
            _ => String::new(),
        }
    }
}

/// Concatenate all text fragments of a content list.
pub fn join_text(blocks: &[ContentBlock]) -> String {
    blocks
        .iter()
        .filter_map(|b| match b {
            ContentBlock::Text { text } => Some(text.as_str()),
            ContentBlock::ToolUse(_) => None,
        })
        .collect()
}

/// All tool-use requests in a content list, in order.
pub fn tool_invocations(blocks: &[ContentBlock]) -> Vec<ToolInvocation> {
    blocks
        .iter()
        .filter_map(|b| match b {
            ContentBlock::ToolUse(inv) => Some(inv.clone()),
            ContentBlock::Text { .. } => None,
        })
        .collect()
}

// ─────────────────────────────────────────────
// Tool definitions (sent to the model)
// ─────────────────────────────────────────────

/// Definition of a tool as the model sees it.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the input object.
    pub input_schema: Value,
}

impl ToolDefinition {
    /// Create a new tool definition.
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

// ─────────────────────────────────────────────
// Model responses
// ─────────────────────────────────────────────

/// Why the model stopped generating.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    /// Any stop reason the driver does not model explicitly.
    Other(String),
}

impl StopReason {
    /// Map a wire-level stop reason string.
    ///
    /// `stop_sequence` ends the turn just like `end_turn`.
    pub fn from_wire(reason: &str) -> Self {
        match reason {
            "end_turn" | "stop_sequence" => StopReason::EndTurn,
            "tool_use" => StopReason::ToolUse,
            "max_tokens" => StopReason::MaxTokens,
            other => StopReason::Other(other.to_string()),
        }
    }

    /// Wire-level name.
    pub fn as_str(&self) -> &str {
        match self {
            StopReason::EndTurn => "end_turn",
            StopReason::ToolUse => "tool_use",
            StopReason::MaxTokens => "max_tokens",
            StopReason::Other(s) => s,
        }
    }
}

/// Token usage reported by the model.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct UsageInfo {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// A raw model response: stop reason plus ordered content fragments.
#[derive(Clone, Debug, PartialEq)]
pub struct ModelResponse {
    pub stop_reason: StopReason,
    pub content: Vec<ContentBlock>,
    pub usage: Option<UsageInfo>,
}

impl ModelResponse {
    /// A finished text answer.
    pub fn end_turn(text: impl Into<String>) -> Self {
        Self {
            stop_reason: StopReason::EndTurn,
            content: vec![ContentBlock::text(text)],
            usage: None,
        }
    }

    /// A reply requesting the given tool invocations.
    pub fn tool_use(invocations: Vec<ToolInvocation>) -> Self {
        Self {
            stop_reason: StopReason::ToolUse,
            content: invocations.into_iter().map(ContentBlock::ToolUse).collect(),
            usage: None,
        }
    }

    /// A truncated reply.
    pub fn max_tokens(text: impl Into<String>) -> Self {
        Self {
            stop_reason: StopReason::MaxTokens,
            content: vec![ContentBlock::text(text)],
            usage: None,
        }
    }

    /// Concatenated text fragments.
    pub fn text(&self) -> String {
        join_text(&self.content)
    }

    /// Classify the response into the driver-facing sum type.
    ///
    /// A `tool_use` stop without any tool-use block is treated as `end_turn`.
    pub fn into_reply(self) -> ModelReply {
        match self.stop_reason {
            StopReason::EndTurn => ModelReply::EndTurn {
                content: self.content,
            },
            StopReason::ToolUse => {
                let invocations = tool_invocations(&self.content);
                if invocations.is_empty() {
                    ModelReply::EndTurn {
                        content: self.content,
                    }
                } else {
                    ModelReply::ToolRequest {
                        content: self.content,
                        invocations,
                    }
                }
            }
            StopReason::MaxTokens => ModelReply::MaxTokens {
                content: self.content,
            },
            StopReason::Other(reason) => ModelReply::Other {
                reason,
                content: self.content,
            },
        }
    }
}

/// A model reply classified by what the driver must do next.
#[derive(Clone, Debug, PartialEq)]
pub enum ModelReply {
    /// The model is done; the text is the final answer.
    EndTurn { content: Vec<ContentBlock> },
    /// The model wants these tools executed before it continues.
    ToolRequest {
        content: Vec<ContentBlock>,
        invocations: Vec<ToolInvocation>,
    },
    /// Output was truncated by the token limit.
    MaxTokens { content: Vec<ContentBlock> },
    /// An unmodelled stop reason.
    Other {
        reason: String,
        content: Vec<ContentBlock>,
    },
}

impl ModelReply {
    /// The content fragments of the reply, whatever its kind.
    pub fn content(&self) -> &[ContentBlock] {
        match self {
            ModelReply::EndTurn { content }
            | ModelReply::ToolRequest { content, .. }
            | ModelReply::MaxTokens { content }
            | ModelReply::Other { content, .. } => content,
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stop_reason_from_wire() {
        assert_eq!(StopReason::from_wire("end_turn"), StopReason::EndTurn);
        assert_eq!(StopReason::from_wire("stop_sequence"), StopReason::EndTurn);
        assert_eq!(StopReason::from_wire("tool_use"), StopReason::ToolUse);
        assert_eq!(StopReason::from_wire("max_tokens"), StopReason::MaxTokens);
        assert_eq!(
            StopReason::from_wire("refusal"),
            StopReason::Other("refusal".into())
        );
    }

    #[test]
    fn test_join_text_skips_tool_use() {
        let blocks = vec![
            ContentBlock::text("Looking "),
            ContentBlock::ToolUse(ToolInvocation::new("t1", "search", json!({}))),
            ContentBlock::text("it up"),
        ];
        assert_eq!(join_text(&blocks), "Looking it up");
    }

    #[test]
    fn test_into_reply_tool_request_keeps_order() {
        let resp = ModelResponse::tool_use(vec![
            ToolInvocation::new("a", "click", json!({"selector": "#a"})),
            ToolInvocation::new("b", "click", json!({"selector": "#b"})),
        ]);
        match resp.into_reply() {
            ModelReply::ToolRequest { invocations, content } => {
                assert_eq!(content.len(), 2);
                let ids: Vec<&str> = invocations.iter().map(|i| i.id.as_str()).collect();
                assert_eq!(ids, vec!["a", "b"]);
            }
            other => panic!("expected tool request, got {other:?}"),
        }
    }

    #[test]
    fn test_tool_use_without_blocks_is_end_turn() {
        let resp = ModelResponse {
            stop_reason: StopReason::ToolUse,
            content: vec![ContentBlock::text("nothing to call")],
            usage: None,
        };
        assert!(matches!(resp.into_reply(), ModelReply::EndTurn { .. }));
    }

    #[test]
    fn test_other_stop_reason_preserved() {
        let resp = ModelResponse {
            stop_reason: StopReason::Other("pause_turn".into()),
            content: vec![ContentBlock::text("partial")],
            usage: None,
        };
        match resp.into_reply() {
            ModelReply::Other { reason, content } => {
                assert_eq!(reason, "pause_turn");
                assert_eq!(join_text(&content), "partial");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_content_block_serialization() {
        let block = ContentBlock::ToolUse(ToolInvocation::new(
            "toolu_1",
            "playwright_navigate",
            json!({"url": "https://example.com"}),
        ));
        let v = serde_json::to_value(&block).unwrap();
        assert_eq!(v["type"], "tool_use");
        assert_eq!(v["id"], "toolu_1");
        assert_eq!(v["name"], "playwright_navigate");
        assert_eq!(v["input"]["url"], "https://example.com");
    }

    #[test]
    fn test_execution_mode_serializes_lowercase() {
        let r = ToolResult::simulated("x", "ok");
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["mode"], "simulated");
        assert_eq!(ExecutionMode::Real.to_string(), "real");
    }

    #[test]
    fn test_turn_text() {
        let turn = Turn::assistant(vec![ContentBlock::text("Done")]);
        assert_eq!(turn.text(), "Done");
        assert_eq!(Turn::user("hi").text(), "");
    }

    #[test]
    fn test_invocation_input_str() {
        let inv = ToolInvocation::new("1", "search", json!({"query": "X", "n": 3}));
        assert_eq!(inv.input_str("query"), Some("X"));
        assert_eq!(inv.input_str("n"), None);
        assert_eq!(inv.input_str("missing"), None);
    }
}
