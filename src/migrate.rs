use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(&config.db).await?;
    ensure_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create the index store tables if they are missing. Idempotent.
pub async fn ensure_schema(pool: &SqlitePool) -> Result<()> {
    // One row per named search index
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS search_indexes (
            name TEXT PRIMARY KEY,
            embedding_model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_records (
            id TEXT PRIMARY KEY,
            index_name TEXT NOT NULL,
            content TEXT NOT NULL,
            title TEXT NOT NULL,
            file TEXT NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            hash TEXT NOT NULL,
            embedding BLOB,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (index_name) REFERENCES search_indexes(name) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE VIRTUAL TABLE IF NOT EXISTS records_fts USING fts5(
            record_id UNINDEXED,
            index_name UNINDEXED,
            title,
            content
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_records_index_file ON index_records(index_name, file)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DbConfig;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_ensure_schema_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let pool = db::connect(&DbConfig {
            path: tmp.path().join("store/index.sqlite"),
        })
        .await
        .unwrap();

        ensure_schema(&pool).await.unwrap();
        ensure_schema(&pool).await.unwrap();

        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE name IN ('search_indexes', 'index_records', 'records_fts') ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();
        assert_eq!(tables, vec!["index_records", "records_fts", "search_indexes"]);
        pool.close().await;
    }
}
