//! Plugin function framework.
//!
//! Every capability the model can call is a [`Tool`]. Tools belong to a
//! plugin and are exposed under `"{plugin}-{function}"`, the name the model
//! sees in its function list and sends back in tool calls.
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │                 ToolRegistry                  │
//! │  ┌───────────┐ ┌─────────────┐ ┌───────────┐  │
//! │  │ sql_query │ │ rag_retrieve│ │ discover_ │  │
//! │  │           │ │             │ │ database  │  │
//! │  └───────────┘ └─────────────┘ └───────────┘  │
//! └───────────────┬───────────────────────────────┘
//!                 ▼  definitions(filter)
//!         Kernel → chat model → tool calls
//! ```
//!
//! # Usage
//!
//! ```rust
//! use fin_copilot::tools::{FunctionFilter, ToolRegistry};
//!
//! let tools = ToolRegistry::new();
//! // tools.register(Box::new(MyTool::new()));
//! assert!(tools.definitions(&FunctionFilter::all()).is_empty());
//! ```

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::{Mutex, MutexGuard};

use crate::llm::ToolDefinition;
use crate::models::{RetrievalContext, RetrievalOverrides};

// ═══════════════════════════════════════════════════════════════════════
// Tool Trait
// ═══════════════════════════════════════════════════════════════════════

/// A function the model can request by name.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use anyhow::Result;
/// use serde_json::{json, Value};
/// use fin_copilot::tools::{Tool, ToolContext};
///
/// pub struct ClockTool;
///
/// #[async_trait]
/// impl Tool for ClockTool {
///     fn name(&self) -> &str { "now" }
///     fn description(&self) -> &str { "Current UTC time" }
///
///     fn parameters_schema(&self) -> Value {
///         json!({ "type": "object", "properties": {} })
///     }
///
///     async fn execute(&self, _params: Value, _ctx: &ToolContext) -> Result<Value> {
///         Ok(json!("2024-01-01T00:00:00Z"))
///     }
/// }
///
/// assert_eq!(ClockTool.qualified_name(), "plugins-now");
/// ```
#[async_trait]
pub trait Tool: Send + Sync {
    /// Plugin this function belongs to.
    fn plugin_name(&self) -> &str {
        "plugins"
    }

    /// Function name within the plugin (e.g. `"sql_query"`).
    fn name(&self) -> &str;

    /// Name the model uses: `"{plugin}-{function}"`.
    fn qualified_name(&self) -> String {
        format!("{}-{}", self.plugin_name(), self.name())
    }

    /// Tells the model when to call this function.
    fn description(&self) -> &str;

    /// OpenAI function-calling JSON Schema for the parameters.
    fn parameters_schema(&self) -> Value;

    /// Run with parameters already checked by [`validate_params`].
    ///
    /// Strings are handed to the model as-is; any other value is sent as
    /// JSON text.
    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value>;

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.qualified_name(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// ToolContext
// ═══════════════════════════════════════════════════════════════════════

/// Per-turn state shared by the tools a turn invokes.
///
/// Holds the caller's retrieval overrides and collects the thoughts and
/// grounding documents produced by searches.
#[derive(Debug, Default)]
pub struct ToolContext {
    trace: Mutex<RetrievalContext>,
}

impl ToolContext {
    pub fn new(overrides: RetrievalOverrides) -> Self {
        Self {
            trace: Mutex::new(RetrievalContext {
                overrides,
                ..Default::default()
            }),
        }
    }

    /// Lock the retrieval trace for the duration of a search.
    pub async fn trace(&self) -> MutexGuard<'_, RetrievalContext> {
        self.trace.lock().await
    }

    pub fn into_trace(self) -> RetrievalContext {
        self.trace.into_inner()
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Parameter Validation
// ═══════════════════════════════════════════════════════════════════════

/// Check model-supplied arguments against a tool's schema.
///
/// Enforces required keys, JSON types and enums, and fills in defaults for
/// absent optional keys. Returns the completed parameter object.
pub fn validate_params(schema: &Value, params: &Value) -> Result<Value> {
    let mut validated = match params {
        Value::Object(obj) => obj.clone(),
        Value::Null => Map::new(),
        other => bail!("arguments must be a JSON object, got {}", json_type_name(other)),
    };

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for key in required.iter().filter_map(Value::as_str) {
            if !validated.contains_key(key) {
                bail!("missing required parameter: {}", key);
            }
        }
    }

    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Ok(Value::Object(validated));
    };

    for (key, prop) in properties {
        let Some(value) = validated.get(key) else {
            if let Some(default) = prop.get("default") {
                validated.insert(key.clone(), default.clone());
            }
            continue;
        };

        if let Some(expected) = prop.get("type").and_then(Value::as_str) {
            let matches = match expected {
                "string" => value.is_string(),
                "integer" => value.is_i64() || value.is_u64(),
                "number" => value.is_number(),
                "boolean" => value.is_boolean(),
                "array" => value.is_array(),
                "object" => value.is_object(),
                _ => true,
            };
            if !matches {
                bail!(
                    "parameter '{}' must be of type '{}', got {}",
                    key,
                    expected,
                    json_type_name(value)
                );
            }
        }

        if let Some(allowed) = prop.get("enum").and_then(Value::as_array) {
            if !allowed.contains(value) {
                let listed: Vec<String> = allowed.iter().map(Value::to_string).collect();
                bail!(
                    "parameter '{}' must be one of [{}], got {}",
                    key,
                    listed.join(", "),
                    value
                );
            }
        }
    }

    Ok(Value::Object(validated))
}

pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Registry
// ═══════════════════════════════════════════════════════════════════════

/// The qualified function names offered to the model. Empty offers all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FunctionFilter {
    pub included: Vec<String>,
}

impl FunctionFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn only<S: Into<String>>(names: impl IntoIterator<Item = S>) -> Self {
        Self {
            included: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn allows(&self, qualified_name: &str) -> bool {
        self.included.is_empty() || self.included.iter().any(|n| n == qualified_name)
    }
}

pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Register a tool. A later tool with the same qualified name replaces
    /// the earlier one.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.qualified_name();
        self.tools.retain(|t| t.qualified_name() != name);
        self.tools.push(tool);
    }

    pub fn tools(&self) -> &[Box<dyn Tool>] {
        &self.tools
    }

    /// Find a tool by qualified name.
    pub fn find(&self, qualified_name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.qualified_name() == qualified_name)
            .map(|t| t.as_ref())
    }

    /// Definitions of the registered tools `filter` lets through, in
    /// registration order.
    pub fn definitions(&self, filter: &FunctionFilter) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .filter(|t| filter.allows(&t.qualified_name()))
            .map(|t| t.definition())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echo the text"
        }
        fn parameters_schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string" },
                    "mode": { "type": "string", "enum": ["plain", "upper"], "default": "plain" }
                },
                "required": ["text"]
            })
        }
        async fn execute(&self, params: Value, _ctx: &ToolContext) -> Result<Value> {
            Ok(params["text"].clone())
        }
    }

    #[test]
    fn test_validate_injects_default() {
        let out = validate_params(&Echo.parameters_schema(), &json!({"text": "hi"})).unwrap();
        assert_eq!(out["mode"], "plain");
    }

    #[test]
    fn test_validate_missing_required() {
        let err = validate_params(&Echo.parameters_schema(), &json!({})).unwrap_err();
        assert!(err.to_string().contains("missing required parameter: text"));
    }

    #[test]
    fn test_validate_wrong_type() {
        let err = validate_params(&Echo.parameters_schema(), &json!({"text": 3})).unwrap_err();
        assert!(err.to_string().contains("must be of type 'string', got number"));
    }

    #[test]
    fn test_validate_enum() {
        let err = validate_params(
            &Echo.parameters_schema(),
            &json!({"text": "x", "mode": "loud"}),
        )
        .unwrap_err();
        assert!(err.to_string().contains("must be one of"));
    }

    #[test]
    fn test_validate_rejects_non_object() {
        assert!(validate_params(&Echo.parameters_schema(), &json!([1])).is_err());
    }

    #[test]
    fn test_registry_filter() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(Echo));
        assert_eq!(registry.len(), 1);
        assert!(registry.find("plugins-echo").is_some());
        assert!(registry.find("echo").is_none());

        assert_eq!(registry.definitions(&FunctionFilter::all()).len(), 1);
        let filter = FunctionFilter::only(["plugins-sql_query"]);
        assert!(registry.definitions(&filter).is_empty());
        assert!(!filter.allows("plugins-echo"));
    }

    #[test]
    fn test_register_replaces_same_name() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(Echo));
        registry.register(Box::new(Echo));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_context_collects_trace() {
        let ctx = ToolContext::new(RetrievalOverrides { top: Some(3) });
        ctx.trace().await.thoughts.push(crate::models::Thought {
            title: "t".into(),
            description: "d".into(),
        });
        let trace = ctx.into_trace();
        assert_eq!(trace.overrides.top, Some(3));
        assert_eq!(trace.thoughts.len(), 1);
    }
}
