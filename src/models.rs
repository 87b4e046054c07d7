//! Core data types shared by the index, the plugins and the kernel.

use serde::Serialize;
use serde_json::{Map, Value};

/// One chunk of a source document, ready to be written to a search index.
#[derive(Debug, Clone)]
pub struct IndexRecord {
    pub id: String,
    pub content: String,
    pub title: String,
    pub file: String,
    /// Entity fields such as `product_name` or `risk_class`.
    pub metadata: Map<String, Value>,
    pub embedding: Option<Vec<f32>>,
}

/// A record returned by a search, with its fused relevance score.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedDocument {
    pub id: String,
    pub content: String,
    pub title: String,
    pub file: String,
    pub score: f64,
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

impl RetrievedDocument {
    /// Look up a field by name, covering both fixed columns and entity fields.
    pub fn field(&self, key: &str) -> Option<Value> {
        match key {
            "id" => Some(Value::String(self.id.clone())),
            "content" => Some(Value::String(self.content.clone())),
            "title" => Some(Value::String(self.title.clone())),
            "file" => Some(Value::String(self.file.clone())),
            "score" => Some(Value::from(self.score)),
            other => self.metadata.get(other).cloned(),
        }
    }

    /// Keep only `keys`, in order, skipping the ones this document lacks.
    pub fn project(&self, keys: &[String]) -> Map<String, Value> {
        keys.iter()
            .filter_map(|k| self.field(k).map(|v| (k.clone(), v)))
            .collect()
    }
}

/// A step of reasoning surfaced to the caller alongside an answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Thought {
    pub title: String,
    pub description: String,
}

/// Per-request knobs that override the configured retrieval settings.
#[derive(Debug, Clone, Default)]
pub struct RetrievalOverrides {
    pub top: Option<usize>,
}

/// Retrieval trace accumulated across the searches of one turn.
#[derive(Debug, Clone, Default)]
pub struct RetrievalContext {
    pub overrides: RetrievalOverrides,
    pub thoughts: Vec<Thought>,
    pub grounding_data: Vec<Vec<RetrievedDocument>>,
}
