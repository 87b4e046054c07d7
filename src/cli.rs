//! Command implementations behind the `fincop` binary.
//!
//! Each `run_*` function opens what it needs from the config, prints its
//! result to stdout and closes its connections.

use anyhow::{bail, Context, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::Config;
use crate::embedding::create_provider;
use crate::history::ChatHistory;
use crate::index::VectorIndex;
use crate::kernel::Kernel;
use crate::llm::create_chat_model;
use crate::migrate;
use crate::models::{RetrievalContext, RetrievalOverrides};
use crate::orchestrator::Orchestrator;
use crate::sql::{QueryOutcome, SqlDatabase, NO_RESULT};

async fn open_index(config: &Config) -> Result<VectorIndex> {
    let embedder = create_provider(&config.embedding)?;
    VectorIndex::open(config, embedder).await
}

/// Both backends plus the chat model, wired into a kernel.
async fn build_kernel(config: &Config) -> Result<(Kernel, Arc<SqlDatabase>, Arc<VectorIndex>)> {
    if !config.llm.is_enabled() {
        bail!("Chat needs a model. Set [llm] provider = \"openai\" and llm.model in the config.");
    }
    let model = create_chat_model(&config.llm)?;
    let sql = Arc::new(SqlDatabase::connect(&config.sql).await?);
    let index = Arc::new(open_index(config).await?);
    let kernel = Kernel::create(config, sql.clone(), index.clone(), model);
    Ok((kernel, sql, index))
}

/// Read a document for indexing: `.json` files hold a page list (or one
/// page), anything else is one page of plain text.
pub fn load_pages(path: &Path) -> Result<Vec<Value>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    if path.extension().and_then(|e| e.to_str()) == Some("json") {
        let value: Value = serde_json::from_str(&text)
            .with_context(|| format!("Invalid JSON in {}", path.display()))?;
        return Ok(match value {
            Value::Array(pages) => pages,
            other => vec![other],
        });
    }
    Ok(vec![Value::String(text)])
}

pub async fn run_init(config: &Config) -> Result<()> {
    migrate::run_migrations(config).await?;
    println!("Index store initialized successfully.");
    Ok(())
}

pub async fn run_chat(config: &Config) -> Result<()> {
    let (kernel, sql, index) = build_kernel(config).await?;
    let mut history = ChatHistory::with_system_message(&config.agent.system_prompt);
    let orchestrator = Orchestrator::new(kernel);

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let result = orchestrator
        .run(&mut history, stdin, tokio::io::stdout())
        .await;

    sql.close().await;
    index.close().await;
    result
}

pub async fn run_ask(config: &Config, question: &str, top: Option<usize>, json: bool) -> Result<()> {
    let (kernel, sql, index) = build_kernel(config).await?;
    let mut history = ChatHistory::with_system_message(&config.agent.system_prompt);

    let reply = kernel
        .respond(question, &mut history, RetrievalOverrides { top })
        .await;
    sql.close().await;
    index.close().await;
    let reply = reply?;

    if json {
        println!("{}", serde_json::to_string_pretty(&reply)?);
        return Ok(());
    }

    println!("{}", reply.content);
    if !reply.invocations.is_empty() {
        println!();
        for invocation in &reply.invocations {
            println!("  tool: {} {}", invocation.name, invocation.arguments);
        }
    }
    Ok(())
}

pub async fn run_index_list(config: &Config) -> Result<()> {
    let index = open_index(config).await?;
    let names = index.list_index_names().await?;
    if names.is_empty() {
        println!("No search indexes.");
    }
    for name in names {
        println!("{}", name);
    }
    index.close().await;
    Ok(())
}

pub async fn run_index_create(config: &Config, files: &[PathBuf]) -> Result<()> {
    let index = open_index(config).await?;

    let mut documents = Vec::with_capacity(files.len());
    for path in files {
        documents.push((path.display().to_string(), load_pages(path)?));
    }

    let uploaded = index.create_index_from_pages(&documents).await?;
    println!(
        "Created index '{}' with {} records from {} files.",
        index.name(),
        uploaded,
        files.len()
    );
    index.close().await;
    Ok(())
}

pub async fn run_index_add(config: &Config, path: &Path) -> Result<()> {
    let index = open_index(config).await?;
    if !index.exists().await? {
        index.create_index().await?;
    }
    let pages = load_pages(path)?;
    let uploaded = index.add_document(&path.display().to_string(), &pages).await?;
    println!("Uploaded {} records to '{}'.", uploaded, index.name());
    index.close().await;
    Ok(())
}

pub async fn run_index_load_json(config: &Config, path: &Path) -> Result<()> {
    let rows = load_pages(path)?;
    let index = open_index(config).await?;
    let uploaded = index.create_index_from_json(&rows).await?;
    println!("Loaded {} records into '{}'.", uploaded, index.name());
    index.close().await;
    Ok(())
}

pub async fn run_index_remove(config: &Config, file: &str) -> Result<()> {
    let index = open_index(config).await?;
    let removed = index.remove_file(file).await?;
    println!("Removed {} records.", removed);
    index.close().await;
    Ok(())
}

pub async fn run_index_count(config: &Config, file: Option<&str>) -> Result<()> {
    let index = open_index(config).await?;
    let count = index.count(file).await?;
    println!("records: {}", count);
    index.close().await;
    Ok(())
}

pub async fn run_search(config: &Config, query: &str, top: Option<usize>) -> Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }

    let index = open_index(config).await?;
    let mut ctx = RetrievalContext {
        overrides: RetrievalOverrides { top },
        ..Default::default()
    };
    let documents = index.get_documents(query, &mut ctx).await?;
    index.close().await;

    if documents.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, doc) in documents.iter().enumerate() {
        println!("{}. [{:.2}] {}", i + 1, doc.score, doc.title);
        for (key, value) in &doc.metadata {
            match value {
                Value::String(s) => println!("    {}: {}", key, s),
                other => println!("    {}: {}", key, other),
            }
        }
        let excerpt: String = doc.content.chars().take(240).collect();
        println!("    excerpt: \"{}\"", excerpt.replace('\n', " ").trim());
        println!("    id: {}", doc.id);
        println!();
    }
    Ok(())
}

pub async fn run_sql_discover(config: &Config) -> Result<()> {
    let db = SqlDatabase::connect(&config.sql).await?;
    let schema = db.discover().await;
    db.close().await;
    println!("{}", schema?);
    Ok(())
}

pub async fn run_sql_query(config: &Config, sql: &str) -> Result<()> {
    let db = SqlDatabase::connect(&config.sql).await?;
    let outcome = db.query(sql).await;
    db.close().await;

    match outcome {
        QueryOutcome::Rows(rows) => println!("{}", serde_json::to_string_pretty(&rows)?),
        QueryOutcome::NoResult => println!("{}", NO_RESULT),
    }
    Ok(())
}
