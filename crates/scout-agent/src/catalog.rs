//! Tool catalog: the static registry of browser tools offered to the model.
//!
//! The catalog only describes tools. Executing them is the connector's job,
//! so the driver can hand schemas to the model without knowing whether calls
//! will run against a live server or the simulated responder.

use std::collections::HashSet;

use serde::Serialize;
use serde_json::{json, Map, Value};

use scout_core::types::ToolDefinition;

// ─────────────────────────────────────────────
// Schema types
// ─────────────────────────────────────────────

/// JSON type of an input field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    String,
    Number,
    Boolean,
}

impl FieldKind {
    fn json_type(&self) -> &'static str {
        match self {
            FieldKind::String => "string",
            FieldKind::Number => "number",
            FieldKind::Boolean => "boolean",
        }
    }
}

/// One named input field.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FieldSchema {
    pub name: String,
    pub kind: FieldKind,
    pub description: String,
    pub required: bool,
    /// Allowed values; empty means unrestricted.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub allowed: Vec<String>,
}

/// Name, description and input shape of one tool.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub fields: Vec<FieldSchema>,
}

impl ToolSchema {
    /// JSON Schema object for the input.
    pub fn input_schema(&self) -> Value {
        let mut properties = Map::new();
        for field in &self.fields {
            let mut prop = json!({
                "type": field.kind.json_type(),
                "description": field.description,
            });
            if !field.allowed.is_empty() {
                prop["enum"] = json!(field.allowed);
            }
            properties.insert(field.name.clone(), prop);
        }
        let required: Vec<&str> = self
            .fields
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name.as_str())
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Build the `ToolDefinition` sent to the model.
    pub fn to_definition(&self) -> ToolDefinition {
        ToolDefinition::new(&self.name, &self.description, self.input_schema())
    }
}

/// A malformed catalog.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum CatalogError {
    #[error("tool #{0} has an empty name")]
    EmptyName(usize),

    #[error("duplicate tool name: {0}")]
    DuplicateTool(String),

    #[error("tool {tool} has an invalid field: {field:?}")]
    InvalidField { tool: String, field: String },
}

// ─────────────────────────────────────────────
// Static table
// ─────────────────────────────────────────────

struct FieldSpec {
    name: &'static str,
    kind: FieldKind,
    description: &'static str,
    required: bool,
    allowed: &'static [&'static str],
}

struct ToolSpec {
    name: &'static str,
    description: &'static str,
    fields: &'static [FieldSpec],
}

const fn field(
    name: &'static str,
    kind: FieldKind,
    description: &'static str,
    required: bool,
) -> FieldSpec {
    FieldSpec {
        name,
        kind,
        description,
        required,
        allowed: &[],
    }
}

const TOOLS: &[ToolSpec] = &[
    ToolSpec {
        name: "playwright_navigate",
        description: "Navigate to a URL in the browser",
        fields: &[field("url", FieldKind::String, "The URL to navigate to", true)],
    },
    ToolSpec {
        name: "playwright_screenshot",
        description: "Take a screenshot of the current page",
        fields: &[
            field("name", FieldKind::String, "Name for the screenshot file", true),
            field("fullPage", FieldKind::Boolean, "Capture full scrollable page", false),
        ],
    },
    ToolSpec {
        name: "playwright_click",
        description: "Click an element on the page",
        fields: &[field(
            "selector",
            FieldKind::String,
            "CSS selector for the element to click",
            true,
        )],
    },
    ToolSpec {
        name: "playwright_fill",
        description: "Fill a form input field",
        fields: &[
            field("selector", FieldKind::String, "CSS selector for the input field", true),
            field("value", FieldKind::String, "Value to fill", true),
        ],
    },
    ToolSpec {
        name: "playwright_evaluate",
        description: "Execute JavaScript in the browser and return result",
        fields: &[field("script", FieldKind::String, "JavaScript code to execute", true)],
    },
    ToolSpec {
        name: "playwright_press_key",
        description: "Press a keyboard key (useful for prototypes, image carousels, presentations). Use ArrowRight for next, ArrowLeft for previous.",
        fields: &[field(
            "key",
            FieldKind::String,
            "Key to press: ArrowRight, ArrowLeft, ArrowUp, ArrowDown, Enter, Escape, etc.",
            true,
        )],
    },
    ToolSpec {
        name: "playwright_scroll_page",
        description: "Scroll the page to capture long content",
        fields: &[
            FieldSpec {
                name: "direction",
                kind: FieldKind::String,
                description: "Direction to scroll",
                required: true,
                allowed: &["down", "up", "bottom", "top"],
            },
            field("amount", FieldKind::Number, "Pixels to scroll", false),
        ],
    },
    ToolSpec {
        name: "playwright_get_page_info",
        description: "Get current page information including URL, title, and visible text",
        fields: &[],
    },
];

// ─────────────────────────────────────────────
// Public API
// ─────────────────────────────────────────────

/// All tool schemas, in catalog order.
pub fn schemas() -> Vec<ToolSchema> {
    TOOLS
        .iter()
        .map(|t| ToolSchema {
            name: t.name.to_string(),
            description: t.description.to_string(),
            fields: t
                .fields
                .iter()
                .map(|f| FieldSchema {
                    name: f.name.to_string(),
                    kind: f.kind,
                    description: f.description.to_string(),
                    required: f.required,
                    allowed: f.allowed.iter().map(|s| s.to_string()).collect(),
                })
                .collect(),
        })
        .collect()
}

/// Names of all catalog tools.
pub fn tool_names() -> Vec<&'static str> {
    TOOLS.iter().map(|t| t.name).collect()
}

/// Reject empty or duplicate names.
pub fn validate(schemas: &[ToolSchema]) -> Result<(), CatalogError> {
    let mut seen = HashSet::new();
    for (i, schema) in schemas.iter().enumerate() {
        if schema.name.trim().is_empty() {
            return Err(CatalogError::EmptyName(i));
        }
        if !seen.insert(schema.name.as_str()) {
            return Err(CatalogError::DuplicateTool(schema.name.clone()));
        }
        let mut fields = HashSet::new();
        for f in &schema.fields {
            if f.name.trim().is_empty() || !fields.insert(f.name.as_str()) {
                return Err(CatalogError::InvalidField {
                    tool: schema.name.clone(),
                    field: f.name.clone(),
                });
            }
        }
    }
    Ok(())
}

/// Load and validate the catalog. Fails fast on a malformed table.
pub fn load() -> Result<Vec<ToolSchema>, CatalogError> {
    let all = schemas();
    validate(&all)?;
    Ok(all)
}

/// Model-facing definitions for a set of schemas.
pub fn definitions(schemas: &[ToolSchema]) -> Vec<ToolDefinition> {
    schemas.iter().map(ToolSchema::to_definition).collect()
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_loads() {
        let all = load().unwrap();
        assert_eq!(all.len(), 8);
        assert_eq!(all[0].name, "playwright_navigate");
        assert_eq!(tool_names().len(), 8);
    }

    #[test]
    fn test_schemas_are_pure() {
        assert_eq!(schemas(), schemas());
    }

    #[test]
    fn test_input_schema_marks_required() {
        let fill = schemas().into_iter().find(|s| s.name == "playwright_fill").unwrap();
        let schema = fill.input_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["value"]["type"], "string");
        assert_eq!(schema["required"], json!(["selector", "value"]));
    }

    #[test]
    fn test_enum_field() {
        let scroll = schemas()
            .into_iter()
            .find(|s| s.name == "playwright_scroll_page")
            .unwrap();
        let def = scroll.to_definition();
        assert_eq!(
            def.input_schema["properties"]["direction"]["enum"],
            json!(["down", "up", "bottom", "top"])
        );
        assert_eq!(def.input_schema["required"], json!(["direction"]));
    }

    #[test]
    fn test_no_field_tool() {
        let info = schemas()
            .into_iter()
            .find(|s| s.name == "playwright_get_page_info")
            .unwrap();
        let schema = info.input_schema();
        assert_eq!(schema["properties"], json!({}));
        assert_eq!(schema["required"], json!([]));
    }

    #[test]
    fn test_validate_rejects_duplicates() {
        let mut all = schemas();
        all.push(all[0].clone());
        assert_eq!(
            validate(&all),
            Err(CatalogError::DuplicateTool("playwright_navigate".into()))
        );
    }

    #[test]
    fn test_validate_rejects_empty_name() {
        let mut all = schemas();
        all[2].name = " ".into();
        assert_eq!(validate(&all), Err(CatalogError::EmptyName(2)));
    }

    #[test]
    fn test_validate_rejects_bad_field() {
        let mut all = schemas();
        let dup = all[3].fields[0].clone();
        all[3].fields.push(dup);
        assert!(matches!(validate(&all), Err(CatalogError::InvalidField { .. })));
    }

    #[test]
    fn test_definitions_match_schemas() {
        let all = schemas();
        let defs = definitions(&all);
        assert_eq!(defs.len(), all.len());
        assert_eq!(defs[1].name, "playwright_screenshot");
    }
}
