//! Tool System
//!
//! Descriptors discovered from the tool provider, the call/result pair that
//! crosses the process boundary, and the per-session registry that caches the
//! catalog.

use std::collections::HashMap;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AgentError, Result};
use crate::schema;

/// A tool as advertised by the provider
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Unique tool identifier
    pub name: String,

    /// Human-readable description (shown to the model)
    #[serde(default)]
    pub description: String,

    /// JSON Schema for the accepted arguments
    #[serde(rename = "inputSchema", default = "empty_object_schema")]
    pub input_schema: Value,
}

fn empty_object_schema() -> Value {
    serde_json::json!({ "type": "object" })
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

/// Tool call request from the model
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Call identifier assigned by the model service
    pub id: String,

    /// Tool identifier
    pub name: String,

    /// Arguments as an untyped structured payload
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// Body of a tool result
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ToolPayload {
    Text(String),
    Structured(Value),
}

impl ToolPayload {
    /// Render the payload as the text handed back to the model
    pub fn to_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Structured(value) => value.to_string(),
        }
    }
}

/// Result from tool execution, correlated to its call by `call_id`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Identifier of the originating `ToolCall`
    pub call_id: String,

    /// Output (success content or error description)
    pub payload: ToolPayload,

    /// Whether execution failed
    pub is_error: bool,

    /// Whether the payload was cut to the size bound
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
}

impl ToolResult {
    pub fn success(call_id: impl Into<String>, payload: ToolPayload) -> Self {
        Self {
            call_id: call_id.into(),
            payload,
            is_error: false,
            truncated: false,
        }
    }

    pub fn text(call_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::success(call_id, ToolPayload::Text(text.into()))
    }

    pub fn failure(call_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            payload: ToolPayload::Text(error.into()),
            is_error: true,
            truncated: false,
        }
    }

    /// Bound the rendered payload to `max_chars` characters.
    ///
    /// Oversized payloads become text cut on a char boundary with a trailing marker.
    #[must_use]
    pub fn truncated_to(mut self, max_chars: usize) -> Self {
        let text = self.payload.to_text();
        let total = text.chars().count();
        if total <= max_chars {
            return self;
        }
        let mut cut: String = text.chars().take(max_chars).collect();
        cut.push_str(&format!("\n[truncated: {max_chars} of {total} characters shown]"));
        self.payload = ToolPayload::Text(cut);
        self.truncated = true;
        self
    }
}

/// Read-through cache of the provider's catalog for one session.
///
/// Populated once at discovery time and never mutated afterwards.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    catalog: OnceLock<Catalog>,
}

#[derive(Debug)]
struct Catalog {
    tools: Vec<ToolDescriptor>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fill the registry from a discovery result.
    ///
    /// Fails if the registry was already populated or the catalog repeats a name.
    pub fn populate(&self, tools: Vec<ToolDescriptor>) -> Result<()> {
        let mut index = HashMap::with_capacity(tools.len());
        for (pos, tool) in tools.iter().enumerate() {
            if index.insert(tool.name.clone(), pos).is_some() {
                return Err(AgentError::Protocol(format!(
                    "tool catalog lists '{}' more than once",
                    tool.name
                )));
            }
        }
        self.catalog
            .set(Catalog { tools, index })
            .map_err(|_| AgentError::Session("tool registry is already populated".into()))
    }

    pub fn is_populated(&self) -> bool {
        self.catalog.get().is_some()
    }

    /// Get a tool by name
    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        let catalog = self.catalog.get()?;
        catalog.index.get(name).map(|&pos| &catalog.tools[pos])
    }

    /// Check that `name` is known and `arguments` conform to its schema
    pub fn validate(&self, name: &str, arguments: &Value) -> Result<&ToolDescriptor> {
        let tool = self
            .get(name)
            .ok_or_else(|| AgentError::Validation(format!("unknown tool '{name}'")))?;
        schema::validate(&tool.input_schema, arguments)
            .map_err(|violation| AgentError::Validation(format!("{name}: {violation}")))?;
        Ok(tool)
    }

    /// Catalog in discovery order, as passed to the model each turn
    pub fn catalog(&self) -> &[ToolDescriptor] {
        self.catalog.get().map_or(&[], |c| c.tools.as_slice())
    }

    /// Get tool names
    pub fn names(&self) -> Vec<&str> {
        self.catalog().iter().map(|t| t.name.as_str()).collect()
    }

    /// Number of registered tools
    pub fn len(&self) -> usize {
        self.catalog().len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.catalog().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn create_patient() -> ToolDescriptor {
        ToolDescriptor::new(
            "create_patient",
            "Register a new patient",
            json!({
                "type": "object",
                "properties": {
                    "id": {"type": "string"},
                    "name": {"type": "string"},
                    "species": {"type": "string"}
                },
                "required": ["id", "name", "species"]
            }),
        )
    }

    #[test]
    fn test_registry_lookup() {
        let registry = ToolRegistry::new();
        assert!(registry.is_empty());
        registry.populate(vec![create_patient()]).unwrap();

        assert_eq!(registry.len(), 1);
        assert!(registry.get("create_patient").is_some());
        assert!(registry.get("unknown").is_none());
        assert_eq!(registry.names(), vec!["create_patient"]);
    }

    #[test]
    fn test_registry_is_populated_once() {
        let registry = ToolRegistry::new();
        registry.populate(vec![create_patient()]).unwrap();
        let err = registry.populate(vec![]).unwrap_err();
        assert!(matches!(err, AgentError::Session(_)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_registry_rejects_duplicate_names() {
        let registry = ToolRegistry::new();
        let err = registry
            .populate(vec![create_patient(), create_patient()])
            .unwrap_err();
        assert!(matches!(err, AgentError::Protocol(_)));
        assert!(!registry.is_populated());
    }

    #[test]
    fn test_validate_arguments() {
        let registry = ToolRegistry::new();
        registry.populate(vec![create_patient()]).unwrap();

        assert!(registry
            .validate("create_patient", &json!({"id": "P010", "name": "Rex", "species": "Dog"}))
            .is_ok());

        let err = registry
            .validate("create_patient", &json!({"id": "P010"}))
            .unwrap_err();
        assert!(matches!(err, AgentError::Validation(ref m) if m.contains("name")));

        let err = registry.validate("delete_everything", &json!({})).unwrap_err();
        assert!(matches!(err, AgentError::Validation(ref m) if m.contains("unknown tool")));
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let result = ToolResult::text("call_1", "héllo wörld").truncated_to(4);
        assert!(result.truncated);
        assert!(result.payload.to_text().starts_with("héll\n[truncated: 4 of 11"));

        let small = ToolResult::text("call_2", "ok").truncated_to(4);
        assert!(!small.truncated);
        assert_eq!(small.payload, ToolPayload::Text("ok".into()));
    }
}
