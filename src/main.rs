//! # fin-copilot CLI (`fincop`)
//!
//! A financial assistant that answers questions from two sources: a SQL
//! database of card transactions and a search index of ETF key information
//! documents. The model picks the source; `fincop` runs the calls.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `fincop init` | Create the index store and run schema migrations |
//! | `fincop chat` | Interactive chat (`exit` to quit) |
//! | `fincop ask "<question>"` | Answer one question |
//! | `fincop index list\|create\|add\|load-json\|remove\|count` | Manage search indexes |
//! | `fincop search "<query>"` | Hybrid search of the current index |
//! | `fincop sql discover` | Print the transaction database schema |
//! | `fincop sql query "<sql>"` | Run SQL against the transaction database |
//!
//! ## Examples
//!
//! ```bash
//! fincop init --config ./config/fincop.toml
//! fincop index create ./kids/world-etf.json ./kids/bond-etf.txt
//! fincop search "ongoing charges" --top 3
//! fincop ask "How many transactions had errors?"
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use fin_copilot::{cli, config, logging};

/// fin-copilot: answers finance questions from transaction data and ETF documents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file.
#[derive(Parser)]
#[command(
    name = "fincop",
    about = "fin-copilot: a financial assistant over SQL transactions and ETF documents",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/fincop.toml")]
    config: PathBuf,

    /// Search index to use instead of `retrieval.index_name`.
    #[arg(long, global = true)]
    index: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the index store.
    ///
    /// Creates the SQLite file and its tables. Safe to run repeatedly.
    Init,

    /// Start an interactive chat session.
    Chat,

    /// Answer a single question and exit.
    Ask {
        question: String,

        /// Number of documents each retrieval returns.
        #[arg(long)]
        top: Option<usize>,

        /// Print the answer with its tool calls and grounding data as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Manage search indexes.
    Index {
        #[command(subcommand)]
        action: IndexAction,
    },

    /// Search the current index.
    Search {
        query: String,

        /// Maximum number of results.
        #[arg(long)]
        top: Option<usize>,
    },

    /// Inspect or query the transaction database.
    Sql {
        #[command(subcommand)]
        action: SqlAction,
    },
}

#[derive(Subcommand)]
enum IndexAction {
    /// List search indexes.
    List,
    /// Create the index (replacing an existing one), optionally from files.
    Create {
        /// Text files or JSON page lists to index.
        files: Vec<PathBuf>,
    },
    /// Add one document to the index.
    Add { file: PathBuf },
    /// Replace the index with a pre-chunked JSON export.
    LoadJson { file: PathBuf },
    /// Remove every record of a file.
    Remove { file: String },
    /// Count records, optionally for one file.
    Count {
        #[arg(long)]
        file: Option<String>,
    },
}

#[derive(Subcommand)]
enum SqlAction {
    /// Print tables, columns and foreign keys.
    Discover,
    /// Run a SQL statement and print the rows as JSON.
    Query { sql: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    let mut cfg = config::load_config(&args.config)?;
    if let Some(index) = args.index {
        cfg.retrieval.index_name = index;
    }
    logging::init(&cfg.logging)?;

    match args.command {
        Commands::Init => cli::run_init(&cfg).await?,
        Commands::Chat => cli::run_chat(&cfg).await?,
        Commands::Ask {
            question,
            top,
            json,
        } => cli::run_ask(&cfg, &question, top, json).await?,
        Commands::Index { action } => match action {
            IndexAction::List => cli::run_index_list(&cfg).await?,
            IndexAction::Create { files } => cli::run_index_create(&cfg, &files).await?,
            IndexAction::Add { file } => cli::run_index_add(&cfg, &file).await?,
            IndexAction::LoadJson { file } => cli::run_index_load_json(&cfg, &file).await?,
            IndexAction::Remove { file } => cli::run_index_remove(&cfg, &file).await?,
            IndexAction::Count { file } => cli::run_index_count(&cfg, file.as_deref()).await?,
        },
        Commands::Search { query, top } => cli::run_search(&cfg, &query, top).await?,
        Commands::Sql { action } => match action {
            SqlAction::Discover => cli::run_sql_discover(&cfg).await?,
            SqlAction::Query { sql } => cli::run_sql_query(&cfg, &sql).await?,
        },
    }

    Ok(())
}
