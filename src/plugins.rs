//! The functions offered to the model.
//!
//! | Function | Backend |
//! |----------|---------|
//! | `plugins-sql_query` | transaction database |
//! | `plugins-discover_database` | transaction database |
//! | `plugins-rag_retrieve` | search index |
//! | `plugins-process_document` | search index |
//! | `plugins-remove_document` | search index |

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::index::VectorIndex;
use crate::sql::SqlDatabase;
use crate::tools::{Tool, ToolContext, ToolRegistry};

fn required_str<'a>(params: &'a Value, key: &str) -> Result<&'a str> {
    match params.get(key).and_then(Value::as_str) {
        Some(s) if !s.trim().is_empty() => Ok(s),
        _ => bail!("{} must not be empty", key),
    }
}

pub struct SqlQueryPlugin {
    db: Arc<SqlDatabase>,
}

impl SqlQueryPlugin {
    pub fn new(db: Arc<SqlDatabase>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Tool for SqlQueryPlugin {
    fn name(&self) -> &str {
        "sql_query"
    }

    fn description(&self) -> &str {
        "Run a SQL query against the transaction database and return the matching rows. \
         Discover the database first to learn its tables and columns."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "SQL statement in the SQLite dialect" }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value, _ctx: &ToolContext) -> Result<Value> {
        let query = required_str(&params, "query")?;
        tracing::info!("Running SQL query: {}", query);
        Ok(self.db.query(query).await.to_value())
    }
}

pub struct DiscoverDatabasePlugin {
    db: Arc<SqlDatabase>,
}

impl DiscoverDatabasePlugin {
    pub fn new(db: Arc<SqlDatabase>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Tool for DiscoverDatabasePlugin {
    fn name(&self) -> &str {
        "discover_database"
    }

    fn description(&self) -> &str {
        "Describe the transaction database: its tables, columns, primary keys and foreign keys."
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _params: Value, _ctx: &ToolContext) -> Result<Value> {
        tracing::info!("Discovering transaction database");
        let schema = self.db.discover().await?;
        Ok(Value::String(schema.to_string()))
    }
}

pub struct RagRetrievePlugin {
    index: Arc<VectorIndex>,
    context_keys: Vec<String>,
}

impl RagRetrievePlugin {
    pub fn new(index: Arc<VectorIndex>, context_keys: Vec<String>) -> Self {
        Self {
            index,
            context_keys,
        }
    }
}

#[async_trait]
impl Tool for RagRetrievePlugin {
    fn name(&self) -> &str {
        "rag_retrieve"
    }

    fn description(&self) -> &str {
        "Search the ETF key information documents and return the most relevant passages \
         with product name, manufacturer and risk class."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "What to look for in the documents" }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let query = required_str(&params, "query")?;
        tracing::info!("Retrieving documents from '{}' for: {}", self.index.name(), query);

        let mut trace = ctx.trace().await;
        let documents = self.index.get_documents(query, &mut trace).await?;

        Ok(Value::Array(
            documents
                .iter()
                .map(|d| Value::Object(d.project(&self.context_keys)))
                .collect(),
        ))
    }
}

pub struct ProcessDocumentPlugin {
    index: Arc<VectorIndex>,
}

impl ProcessDocumentPlugin {
    pub fn new(index: Arc<VectorIndex>) -> Self {
        Self { index }
    }
}

#[async_trait]
impl Tool for ProcessDocumentPlugin {
    fn name(&self) -> &str {
        "process_document"
    }

    fn description(&self) -> &str {
        "Add a document's extracted text to the search index."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "filename": { "type": "string" },
                "content": { "type": "string", "description": "Extracted text, sections separated by the chunk separator" }
            },
            "required": ["filename", "content"]
        })
    }

    async fn execute(&self, params: Value, _ctx: &ToolContext) -> Result<Value> {
        let filename = required_str(&params, "filename")?;
        let content = required_str(&params, "content")?;
        tracing::info!("Processing document {}", filename);

        let pages = [Value::String(content.to_string())];
        let message = match self.index.add_document(filename, &pages).await {
            Ok(_) => "Document successfully processed.".to_string(),
            Err(e) => {
                tracing::error!("Error during document processing: {:#}", e);
                format!("Error during document processing: {}", e)
            }
        };
        Ok(Value::String(message))
    }
}

pub struct RemoveDocumentPlugin {
    index: Arc<VectorIndex>,
}

impl RemoveDocumentPlugin {
    pub fn new(index: Arc<VectorIndex>) -> Self {
        Self { index }
    }
}

#[async_trait]
impl Tool for RemoveDocumentPlugin {
    fn name(&self) -> &str {
        "remove_document"
    }

    fn description(&self) -> &str {
        "Remove every passage of a document from the search index."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "filename": { "type": "string" }
            },
            "required": ["filename"]
        })
    }

    async fn execute(&self, params: Value, _ctx: &ToolContext) -> Result<Value> {
        let filename = required_str(&params, "filename")?;
        tracing::info!("Removing document {}", filename);

        let message = match self.index.remove_file(filename).await {
            Ok(_) => "Document successfully removed from the Search Index.".to_string(),
            Err(e) => {
                tracing::error!("Error during document removing: {:#}", e);
                format!("Error during document removing: {}", e)
            }
        };
        Ok(Value::String(message))
    }
}

/// Register all five plugin functions.
pub fn register_plugins(
    registry: &mut ToolRegistry,
    sql: Arc<SqlDatabase>,
    index: Arc<VectorIndex>,
    context_keys: Vec<String>,
) {
    registry.register(Box::new(SqlQueryPlugin::new(sql.clone())));
    registry.register(Box::new(DiscoverDatabasePlugin::new(sql)));
    registry.register(Box::new(RagRetrievePlugin::new(index.clone(), context_keys)));
    registry.register(Box::new(ProcessDocumentPlugin::new(index.clone())));
    registry.register(Box::new(RemoveDocumentPlugin::new(index)));
}
