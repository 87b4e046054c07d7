//! # fin-copilot
//!
//! A retrieval-augmented financial assistant. A hosted chat model answers
//! questions about finance products and transactions, calling plugin
//! functions to look things up in two backends:
//!
//! ```text
//!                 ┌──────────────┐
//!   user ────────▶│    Kernel    │◀──────▶ chat model (function calling)
//!                 └──────┬───────┘
//!            ┌───────────┼──────────────┐
//!            ▼           ▼              ▼
//!     discover_database  sql_query   rag_retrieve
//!            │           │              │
//!            └─────┬─────┘              ▼
//!                  ▼             ┌──────────────┐
//!          ┌──────────────┐      │ search index │
//!          │ transactions │      │ FTS5 + vector│
//!          │   (SQLite)   │      │   (SQLite)   │
//!          └──────────────┘      └──────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`logging`] | Tracing subscriber setup |
//! | [`sql`] | Transaction database access |
//! | [`schema`] | Discovered database structure |
//! | [`chunk`] | Separator-driven chunking |
//! | [`embedding`] | Embedding providers |
//! | [`index`] | Search index storage and retrieval |
//! | [`search`] | Hybrid score fusion |
//! | [`history`] | Chat history |
//! | [`llm`] | Chat completion client |
//! | [`tools`] | Plugin function framework |
//! | [`plugins`] | The functions offered to the model |
//! | [`kernel`] | Tool-calling loop |
//! | [`orchestrator`] | Interactive chat loop |
//! | [`cli`] | Command implementations |

pub mod chunk;
pub mod cli;
pub mod config;
pub mod db;
pub mod embedding;
pub mod history;
pub mod http;
pub mod index;
pub mod kernel;
pub mod llm;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod orchestrator;
pub mod plugins;
pub mod schema;
pub mod search;
pub mod sql;
pub mod tools;
