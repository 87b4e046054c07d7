//! Transaction database access for the SQL plugin.
//!
//! The model writes SQL itself, so [`SqlDatabase::query`] accepts arbitrary
//! statements and returns rows as JSON objects. Query failures get one
//! reconnect-and-retry; if that also fails the outcome is
//! [`QueryOutcome::NoResult`], which the model sees as `"No Result Found"`
//! and can react to instead of the turn aborting.

use anyhow::{bail, Result};
use base64::Engine;
use serde_json::{Map, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column as _, Row, TypeInfo, ValueRef};
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::config::SqlConfig;
use crate::schema::{Column, DatabaseSchema, ForeignKey, Table};

/// Text the model receives when a query cannot be answered.
pub const NO_RESULT: &str = "No Result Found";

/// Result of running model-authored SQL.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    Rows(Vec<Map<String, Value>>),
    NoResult,
}

impl QueryOutcome {
    pub fn rows(&self) -> Option<&[Map<String, Value>]> {
        match self {
            QueryOutcome::Rows(rows) => Some(rows),
            QueryOutcome::NoResult => None,
        }
    }

    /// JSON form handed back to the model.
    pub fn to_value(&self) -> Value {
        match self {
            QueryOutcome::Rows(rows) => {
                Value::Array(rows.iter().cloned().map(Value::Object).collect())
            }
            QueryOutcome::NoResult => Value::String(NO_RESULT.to_string()),
        }
    }
}

pub struct SqlDatabase {
    pool: RwLock<SqlitePool>,
    options: SqliteConnectOptions,
    config: SqlConfig,
}

impl SqlDatabase {
    /// Connect to an existing transaction database, retrying on failure.
    ///
    /// The connection is read-only: statements come from the model and
    /// must never change the user's data.
    pub async fn connect(config: &SqlConfig) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", config.path.display()))?
            .create_if_missing(false)
            .read_only(true);
        let pool = open_pool(&options, config).await?;
        tracing::debug!("connected to transaction database {}", config.path.display());

        Ok(Self {
            pool: RwLock::new(pool),
            options,
            config: config.clone(),
        })
    }

    async fn current_pool(&self) -> SqlitePool {
        self.pool.read().await.clone()
    }

    async fn reconnect(&self) -> Result<()> {
        let fresh = open_pool(&self.options, &self.config).await?;
        let stale = std::mem::replace(&mut *self.pool.write().await, fresh);
        stale.close().await;
        Ok(())
    }

    /// Discover tables, columns, primary keys and foreign keys.
    pub async fn discover(&self) -> Result<DatabaseSchema> {
        tracing::debug!("Discovering attached database");
        let pool = self.current_pool().await;

        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(&pool)
        .await?;

        let mut schema = DatabaseSchema::default();

        for name in tables {
            let ident = quote_ident(&name);
            let mut table = Table::new(name.clone());

            let column_sql = format!("PRAGMA table_info({})", ident);
            let column_rows = sqlx::query(&column_sql).fetch_all(&pool).await?;
            for row in &column_rows {
                let data_type: String = row.try_get("type")?;
                let pk: i64 = row.try_get("pk")?;
                table.columns.push(Column {
                    name: row.try_get("name")?,
                    data_type: if data_type.is_empty() {
                        "ANY".to_string()
                    } else {
                        data_type
                    },
                    is_primary_key: pk > 0,
                });
            }

            // Composite keys span several rows sharing an id; seq 0 heads each key.
            let fk_sql = format!("PRAGMA foreign_key_list({})", ident);
            let fk_rows = sqlx::query(&fk_sql).fetch_all(&pool).await?;
            for row in &fk_rows {
                let seq: i64 = row.try_get("seq")?;
                if seq != 0 {
                    continue;
                }
                let id: i64 = row.try_get("id")?;
                table.foreign_keys.push(ForeignKey {
                    name: format!("fk_{}_{}", name, id),
                    parent_table: name.clone(),
                    referenced_table: row.try_get("table")?,
                });
            }

            schema.tables.push(table);
        }

        tracing::debug!("Successfully discovered attached database: {}", schema);
        Ok(schema)
    }

    /// Run model-authored SQL, with one reconnect-and-retry on failure.
    pub async fn query(&self, sql: &str) -> QueryOutcome {
        tracing::debug!("Querying database with: {}", sql);

        match self.fetch_rows(sql).await {
            Ok(rows) => {
                tracing::debug!("Successfully queried database: {} rows", rows.len());
                QueryOutcome::Rows(rows)
            }
            Err(first) => {
                tracing::debug!("Error querying database: {}. Trying to reconnect.", first);
                let retried = async {
                    self.reconnect().await?;
                    self.fetch_rows(sql).await
                }
                .await;

                match retried {
                    Ok(rows) => {
                        tracing::debug!("Successfully queried database: {} rows", rows.len());
                        QueryOutcome::Rows(rows)
                    }
                    Err(e) => {
                        tracing::error!("Error querying database: {}", e);
                        QueryOutcome::NoResult
                    }
                }
            }
        }
    }

    async fn fetch_rows(&self, sql: &str) -> Result<Vec<Map<String, Value>>> {
        let pool = self.current_pool().await;
        let rows = sqlx::query(sql).fetch_all(&pool).await?;
        Ok(rows.iter().map(row_to_json).collect())
    }

    pub async fn close(&self) {
        self.pool.read().await.close().await;
    }
}

async fn open_pool(options: &SqliteConnectOptions, config: &SqlConfig) -> Result<SqlitePool> {
    for attempt in 1..=config.max_retries {
        let connected = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect_with(options.clone())
            .await;

        match connected {
            Ok(pool) => return Ok(pool),
            Err(e) => {
                tracing::debug!(
                    "Failed to connect ({}). Retrying in {} seconds ({}/{} attempts).",
                    e,
                    config.retry_delay_secs,
                    attempt,
                    config.max_retries
                );
                if attempt < config.max_retries {
                    tokio::time::sleep(Duration::from_secs(config.retry_delay_secs)).await;
                }
            }
        }
    }

    bail!("Failed to connect to the database after multiple attempts.")
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn row_to_json(row: &SqliteRow) -> Map<String, Value> {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, column)| (column.name().to_string(), decode_value(row, i)))
        .collect()
}

/// Decode by the stored value's type; SQLite columns are not strictly typed.
fn decode_value(row: &SqliteRow, index: usize) -> Value {
    let type_name = match row.try_get_raw(index) {
        Ok(raw) if raw.is_null() => return Value::Null,
        Ok(raw) => raw.type_info().name().to_ascii_uppercase(),
        Err(_) => return Value::Null,
    };

    let decoded = if type_name.contains("INT") {
        row.try_get_unchecked::<i64, _>(index).map(Value::from)
    } else if ["REAL", "FLOA", "DOUB", "NUMERIC", "DECIMAL"]
        .iter()
        .any(|t| type_name.contains(t))
    {
        row.try_get_unchecked::<f64, _>(index).map(|f| {
            serde_json::Number::from_f64(f)
                .map(Value::Number)
                .unwrap_or(Value::Null)
        })
    } else if type_name.contains("BLOB") {
        row.try_get_unchecked::<Vec<u8>, _>(index)
            .map(|bytes| Value::String(base64::engine::general_purpose::STANDARD.encode(bytes)))
    } else if type_name.contains("BOOL") {
        row.try_get_unchecked::<bool, _>(index).map(Value::Bool)
    } else {
        row.try_get_unchecked::<String, _>(index).map(Value::String)
    };

    decoded.unwrap_or(Value::Null)
}
