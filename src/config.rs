//! TOML configuration.
//!
//! A single file describes both backends the assistant talks to (the
//! transaction database and the document index store), the hosted models,
//! and the agent's prompt and tool filter. Every section except `[db]` and
//! `[sql]` has defaults, so a minimal config is:
//!
//! ```toml
//! [db]
//! path = "./data/index.sqlite"
//!
//! [sql]
//! path = "./data/transactions.sqlite"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Prompt given to the model at the start of every conversation.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an AI financial advisor answering questions about finance, capital market, investments, pensions, insurance and banking products. \
You have access to a vector database of ETF key information documents and a SQL database of transactions. The SQL database must be discovered in order to understand its structure. \
From the query given by the user you must understand which tool call to perform (if any). \
Every query you make MUST be in the SQLite dialect.";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub sql: SqlConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Location of the SQLite file holding the search indexes.
#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// The transaction database queried by the SQL plugin.
#[derive(Debug, Deserialize, Clone)]
pub struct SqlConfig {
    pub path: PathBuf,
    #[serde(default = "default_sql_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_sql_retry_delay_secs")]
    pub retry_delay_secs: u64,
    #[serde(default = "default_sql_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_sql_max_retries() -> u32 {
    5
}
fn default_sql_retry_delay_secs() -> u64 {
    5
}
fn default_sql_connect_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_separator")]
    pub separator: String,
    /// Upper bound on whitespace-delimited words per chunk.
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            separator: default_separator(),
            max_chunk_size: default_max_chunk_size(),
        }
    }
}

fn default_separator() -> String {
    "|||".to_string()
}
fn default_max_chunk_size() -> usize {
    500
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_index_name")]
    pub index_name: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_hybrid_alpha")]
    pub hybrid_alpha: f64,
    #[serde(default = "default_candidate_k")]
    pub candidate_k: i64,
    #[serde(default = "default_rag_entities")]
    pub rag_entities: Vec<String>,
    #[serde(default = "default_context_keys")]
    pub context_keys: Vec<String>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            index_name: default_index_name(),
            top_k: default_top_k(),
            hybrid_alpha: default_hybrid_alpha(),
            candidate_k: default_candidate_k(),
            rag_entities: default_rag_entities(),
            context_keys: default_context_keys(),
        }
    }
}

fn default_index_name() -> String {
    "etf-kid".to_string()
}
fn default_top_k() -> usize {
    5
}
fn default_hybrid_alpha() -> f64 {
    0.6
}
fn default_candidate_k() -> i64 {
    80
}
fn default_rag_entities() -> Vec<String> {
    vec![
        "product_name".to_string(),
        "manufacturer".to_string(),
        "risk_class".to_string(),
    ]
}
fn default_context_keys() -> Vec<String> {
    vec![
        "product_name".to_string(),
        "manufacturer".to_string(),
        "risk_class".to_string(),
        "content".to_string(),
    ]
}

/// How credentials are attached to outgoing model requests.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ApiAuth {
    /// `Authorization: Bearer <key>` (OpenAI and compatible servers).
    #[default]
    Bearer,
    /// `api-key: <key>` (Azure OpenAI deployments).
    ApiKey,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default)]
    pub auth: ApiAuth,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            auth: ApiAuth::default(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    /// Configured dimensionality, falling back to the known size of the model.
    pub fn resolved_dims(&self) -> Option<usize> {
        self.dims
            .or_else(|| self.model.as_deref().and_then(default_dims_for_model))
    }
}

/// Vector sizes of the embedding models the assistant is usually deployed with.
pub fn default_dims_for_model(model: &str) -> Option<usize> {
    match model {
        "text-embedding-ada-002" | "text-embedding-3-small" => Some(1536),
        "text-embedding-3-large" => Some(3072),
        _ => None,
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default)]
    pub auth: ApiAuth,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            auth: ApiAuth::default(),
            temperature: None,
            max_tokens: None,
            max_retries: default_max_retries(),
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_llm_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    /// Fully-qualified plugin functions offered to the model. Empty offers all.
    #[serde(default = "default_included_functions")]
    pub included_functions: Vec<String>,
    #[serde(default = "default_max_auto_invoke_attempts")]
    pub max_auto_invoke_attempts: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            included_functions: default_included_functions(),
            max_auto_invoke_attempts: default_max_auto_invoke_attempts(),
        }
    }
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}
fn default_included_functions() -> Vec<String> {
    vec![
        "plugins-rag_retrieve".to_string(),
        "plugins-discover_database".to_string(),
        "plugins-sql_query".to_string(),
    ]
}
fn default_max_auto_invoke_attempts() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Optional log file, appended to alongside stderr output.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    // Validate chunking
    if config.chunking.max_chunk_size == 0 {
        anyhow::bail!("chunking.max_chunk_size must be > 0");
    }
    if config.chunking.separator.is_empty() {
        anyhow::bail!("chunking.separator must not be empty");
    }

    // Validate retrieval
    if config.retrieval.top_k < 1 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if config.retrieval.candidate_k < 1 {
        anyhow::bail!("retrieval.candidate_k must be >= 1");
    }
    if !(0.0..=1.0).contains(&config.retrieval.hybrid_alpha) {
        anyhow::bail!("retrieval.hybrid_alpha must be in [0.0, 1.0]");
    }
    if config.retrieval.index_name.trim().is_empty() {
        anyhow::bail!("retrieval.index_name must not be empty");
    }

    if config.sql.max_retries == 0 {
        anyhow::bail!("sql.max_retries must be >= 1");
    }

    // Validate embedding
    match config.embedding.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled or openai.",
            other
        ),
    }
    if config.embedding.is_enabled() {
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
        match config.embedding.resolved_dims() {
            None | Some(0) => anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            ),
            Some(_) => {}
        }
    }

    // Validate llm
    match config.llm.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown llm provider: '{}'. Must be disabled or openai.",
            other
        ),
    }
    if config.llm.is_enabled() && config.llm.model.is_none() {
        anyhow::bail!(
            "llm.model must be specified when provider is '{}'",
            config.llm.provider
        );
    }

    if config.agent.max_auto_invoke_attempts == 0 {
        anyhow::bail!("agent.max_auto_invoke_attempts must be >= 1");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[db]
path = "/tmp/index.sqlite"

[sql]
path = "/tmp/transactions.sqlite"
"#;

    #[test]
    fn test_minimal_config_defaults() {
        let cfg = parse_config(MINIMAL).unwrap();
        assert_eq!(cfg.chunking.separator, "|||");
        assert_eq!(cfg.chunking.max_chunk_size, 500);
        assert_eq!(cfg.retrieval.top_k, 5);
        assert_eq!(cfg.retrieval.rag_entities.len(), 3);
        assert_eq!(cfg.sql.max_retries, 5);
        assert!(!cfg.embedding.is_enabled());
        assert!(!cfg.llm.is_enabled());
        assert_eq!(cfg.agent.included_functions.len(), 3);
        assert!(cfg.agent.system_prompt.contains("financial advisor"));
    }

    #[test]
    fn test_dims_inferred_from_model() {
        let text = format!(
            "{}\n[embedding]\nprovider = \"openai\"\nmodel = \"text-embedding-3-large\"\n",
            MINIMAL
        );
        let cfg = parse_config(&text).unwrap();
        assert_eq!(cfg.embedding.resolved_dims(), Some(3072));
    }

    #[test]
    fn test_unknown_model_requires_dims() {
        let text = format!(
            "{}\n[embedding]\nprovider = \"openai\"\nmodel = \"my-embedder\"\n",
            MINIMAL
        );
        let err = parse_config(&text).unwrap_err();
        assert!(err.to_string().contains("embedding.dims"));
    }

    #[test]
    fn test_llm_requires_model() {
        let text = format!("{}\n[llm]\nprovider = \"openai\"\n", MINIMAL);
        assert!(parse_config(&text).is_err());
    }

    #[test]
    fn test_rejects_bad_alpha() {
        let text = format!("{}\n[retrieval]\nhybrid_alpha = 1.5\n", MINIMAL);
        assert!(parse_config(&text).is_err());
    }

    #[test]
    fn test_rejects_non_positive_candidate_k() {
        for value in ["0", "-3"] {
            let text = format!("{}\n[retrieval]\ncandidate_k = {}\n", MINIMAL, value);
            let err = parse_config(&text).unwrap_err();
            assert!(err.to_string().contains("candidate_k"));
        }
    }

    #[test]
    fn test_example_config_parses() {
        let cfg = parse_config(include_str!("../config/fincop.example.toml")).unwrap();
        assert_eq!(cfg.embedding.resolved_dims(), Some(1536));
        assert_eq!(cfg.llm.model.as_deref(), Some("gpt-4o"));
        assert_eq!(cfg.retrieval.context_keys.len(), 4);
    }

    #[test]
    fn test_azure_auth_mode() {
        let text = format!(
            "{}\n[llm]\nprovider = \"openai\"\nmodel = \"gpt-4o\"\nauth = \"api-key\"\n",
            MINIMAL
        );
        let cfg = parse_config(&text).unwrap();
        assert_eq!(cfg.llm.auth, ApiAuth::ApiKey);
    }
}
