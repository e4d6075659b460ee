//! Simulated responder: deterministic stand-in results for every catalog tool.

use serde_json::Value;

use scout_core::types::{ToolInvocation, ToolResult};

const DEFAULT_SCROLL_DIRECTION: &str = "down";
const DEFAULT_SCROLL_AMOUNT: i64 = 800;
const SCRIPT_PREVIEW_CHARS: usize = 100;

/// Produce the simulated result for an invocation. Pure, no I/O.
pub fn simulate(invocation: &ToolInvocation) -> ToolResult {
    ToolResult::simulated(&invocation.id, simulated_text(invocation))
}

fn simulated_text(inv: &ToolInvocation) -> String {
    let arg = |key: &'static str| inv.input_str(key).unwrap_or_default();

    match inv.name.as_str() {
        "playwright_navigate" => format!(
            "[SIMULATED] Successfully navigated to {}. Page loaded with 200 OK status.",
            arg("url")
        ),
        "playwright_screenshot" => {
            format!("[SIMULATED] Screenshot saved as {}. Size: 1920x1080.", arg("name"))
        }
        "playwright_click" => format!("[SIMULATED] Clicked element: {}", arg("selector")),
        "playwright_fill" => format!(
            "[SIMULATED] Filled {} with: {}",
            arg("selector"),
            arg("value")
        ),
        "playwright_evaluate" => {
            let preview: String = arg("script").chars().take(SCRIPT_PREVIEW_CHARS).collect();
            format!("[SIMULATED] Executed JavaScript: {preview}...")
        }
        "playwright_press_key" => format!("[SIMULATED] Pressed key: {}", arg("key")),
        "playwright_scroll_page" => {
            let direction = inv
                .input_str("direction")
                .unwrap_or(DEFAULT_SCROLL_DIRECTION);
            format!(
                "[SIMULATED] Scrolled page {direction} by {}px",
                scroll_amount(inv.input.get("amount"))
            )
        }
        "playwright_get_page_info" => {
            "[SIMULATED] Page info: URL: https://example.com, Title: Example Page".to_string()
        }
        other => format!("[SIMULATED] Tool {other} executed"),
    }
}

fn scroll_amount(value: Option<&Value>) -> String {
    match value {
        Some(v) if v.is_i64() || v.is_u64() => v.to_string(),
        Some(v) => match v.as_f64() {
            Some(f) if f.fract() == 0.0 => format!("{}", f as i64),
            Some(f) => f.to_string(),
            None => DEFAULT_SCROLL_AMOUNT.to_string(),
        },
        None => DEFAULT_SCROLL_AMOUNT.to_string(),
    }
}
