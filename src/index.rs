//! Search index over already-extracted documents.
//!
//! A [`VectorIndex`] is bound to one named index inside the `[db]` SQLite
//! file. Records carry their text, the source file name, entity metadata
//! and (when an embedding provider is configured) a vector. Retrieval is a
//! hybrid of FTS5 keyword ranking and cosine similarity, blended by
//! [`crate::search::fuse`].

use anyhow::{anyhow, bail, Context, Result};
use serde_json::{Map, Value};
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

use crate::chunk::{content_hash, merge_pages, recursive_chunking};
use crate::config::{ChunkingConfig, Config, RetrievalConfig};
use crate::db;
use crate::embedding::{self, EmbeddingProvider};
use crate::migrate::ensure_schema;
use crate::models::{IndexRecord, RetrievalContext, RetrievedDocument, Thought};
use crate::search::{fts_query, fuse, Candidate};

pub struct VectorIndex {
    pool: SqlitePool,
    name: String,
    embedder: Arc<dyn EmbeddingProvider>,
    chunking: ChunkingConfig,
    retrieval: RetrievalConfig,
}

impl VectorIndex {
    /// Open the index store, migrating it if needed, bound to
    /// `retrieval.index_name`.
    pub async fn open(config: &Config, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        let pool = db::connect(&config.db).await?;
        ensure_schema(&pool).await?;

        Ok(Self {
            pool,
            name: config.retrieval.index_name.clone(),
            embedder,
            chunking: config.chunking.clone(),
            retrieval: config.retrieval.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub async fn list_index_names(&self) -> Result<Vec<String>> {
        let names = sqlx::query_scalar("SELECT name FROM search_indexes ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        Ok(names)
    }

    pub async fn exists(&self) -> Result<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT COUNT(*) > 0 FROM search_indexes WHERE name = ?")
                .bind(&self.name)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    /// Create the index empty, dropping any existing index of the same name.
    pub async fn create_index(&self) -> Result<()> {
        if self.delete().await? {
            tracing::info!("Found existing index named '{}', and deleted it", self.name);
        }

        sqlx::query(
            "INSERT INTO search_indexes (name, embedding_model, dims, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&self.name)
        .bind(self.embedder.model_name())
        .bind(self.embedder.dims() as i64)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        tracing::info!("Created search index '{}'", self.name);
        Ok(())
    }

    /// Drop the index and all its records. Returns whether it existed.
    pub async fn delete(&self) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM records_fts WHERE index_name = ?")
            .bind(&self.name)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM index_records WHERE index_name = ?")
            .bind(&self.name)
            .execute(&mut *tx)
            .await?;
        let removed = sqlx::query("DELETE FROM search_indexes WHERE name = ?")
            .bind(&self.name)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;
        Ok(removed > 0)
    }

    /// Chunk one document's pages into records ready for [`Self::upload`].
    pub async fn build_records(&self, file: &str, pages: &[Value]) -> Result<Vec<IndexRecord>> {
        let file = basename(file);
        let (texts, metadata) = merge_pages(pages);
        let metadata = self.entity_fields(metadata);
        let chunks = recursive_chunking(
            &texts,
            &self.chunking.separator,
            self.chunking.max_chunk_size,
        );

        // Chunks already stored for this file are not embedded or uploaded again.
        let stored: HashSet<String> =
            sqlx::query_scalar("SELECT hash FROM index_records WHERE index_name = ? AND file = ?")
                .bind(&self.name)
                .bind(&file)
                .fetch_all(&self.pool)
                .await?
                .into_iter()
                .collect();
        let total = chunks.len();
        let chunks: Vec<String> = chunks
            .into_iter()
            .filter(|chunk| !stored.contains(&content_hash(chunk)))
            .collect();
        if chunks.len() < total {
            tracing::debug!(
                "Skipping {} unchanged chunks of '{}'",
                total - chunks.len(),
                file
            );
        }

        let mut vectors = self.embed_all(&chunks).await?.map(Vec::into_iter);

        Ok(chunks
            .into_iter()
            .map(|content| IndexRecord {
                id: Uuid::new_v4().to_string(),
                content,
                title: file.clone(),
                file: file.clone(),
                metadata: metadata.clone(),
                embedding: vectors.as_mut().and_then(Iterator::next),
            })
            .collect())
    }

    /// Records from a pre-chunked export: `{"Chunk": .., "from": .., "type": .., <entities>}`.
    pub async fn records_from_json(&self, rows: &[Value]) -> Result<Vec<IndexRecord>> {
        let mut records = Vec::with_capacity(rows.len());

        for (i, row) in rows.iter().enumerate() {
            let obj = row
                .as_object()
                .ok_or_else(|| anyhow!("row {} is not a JSON object", i))?;
            let content = obj
                .get("Chunk")
                .and_then(Value::as_str)
                .ok_or_else(|| anyhow!("row {} has no string 'Chunk' field", i))?;
            let file = obj
                .get("from")
                .and_then(Value::as_str)
                .ok_or_else(|| anyhow!("row {} has no string 'from' field", i))?;

            let metadata: Map<String, Value> = obj
                .iter()
                .filter(|(k, _)| !matches!(k.as_str(), "Chunk" | "from" | "type"))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();

            records.push(IndexRecord {
                id: Uuid::new_v4().to_string(),
                content: content.to_string(),
                title: file.to_string(),
                file: file.to_string(),
                metadata,
                embedding: None,
            });
        }

        let contents: Vec<String> = records.iter().map(|r| r.content.clone()).collect();
        if let Some(vectors) = self.embed_all(&contents).await? {
            for (record, vector) in records.iter_mut().zip(vectors) {
                record.embedding = Some(vector);
            }
        }

        Ok(records)
    }

    async fn embed_all(&self, texts: &[String]) -> Result<Option<Vec<Vec<f32>>>> {
        if !self.embedder.is_enabled() || texts.is_empty() {
            return Ok(None);
        }
        let vectors = self
            .embedder
            .embed(texts)
            .await
            .with_context(|| format!("Failed to embed {} chunks", texts.len()))?;
        Ok(Some(vectors))
    }

    fn entity_fields(&self, metadata: Map<String, Value>) -> Map<String, Value> {
        metadata
            .into_iter()
            .filter(|(k, _)| self.retrieval.rag_entities.iter().any(|e| e == k))
            .collect()
    }

    /// Write records and their full-text rows in one transaction.
    pub async fn upload(&self, records: &[IndexRecord]) -> Result<usize> {
        let dims: Option<i64> =
            sqlx::query_scalar("SELECT dims FROM search_indexes WHERE name = ?")
                .bind(&self.name)
                .fetch_optional(&self.pool)
                .await?;
        let dims = dims.ok_or_else(|| anyhow!("Search index '{}' does not exist", self.name))?;

        for record in records {
            if let Some(vector) = &record.embedding {
                if vector.len() as i64 != dims {
                    bail!(
                        "Record {} has {} dimensions but index '{}' expects {}",
                        record.id,
                        vector.len(),
                        self.name,
                        dims
                    );
                }
            }
        }

        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        for record in records {
            sqlx::query(
                r#"
                INSERT INTO index_records
                    (id, index_name, content, title, file, metadata_json, hash, embedding, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&record.id)
            .bind(&self.name)
            .bind(&record.content)
            .bind(&record.title)
            .bind(&record.file)
            .bind(serde_json::to_string(&record.metadata)?)
            .bind(content_hash(&record.content))
            .bind(record.embedding.as_deref().map(embedding::vec_to_blob))
            .bind(now)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "INSERT INTO records_fts (record_id, index_name, title, content) VALUES (?, ?, ?, ?)",
            )
            .bind(&record.id)
            .bind(&self.name)
            .bind(&record.title)
            .bind(&record.content)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(records.len())
    }

    /// Chunk, embed and upload one document.
    pub async fn add_document(&self, file: &str, pages: &[Value]) -> Result<usize> {
        let records = self.build_records(file, pages).await?;
        let uploaded = self.upload(&records).await?;
        tracing::info!("Uploaded {} documents to '{}' index", uploaded, self.name);
        Ok(uploaded)
    }

    /// Reset the index and fill it from `(file, pages)` documents.
    pub async fn create_index_from_pages(&self, documents: &[(String, Vec<Value>)]) -> Result<usize> {
        self.create_index().await?;
        let mut total = 0;
        for (file, pages) in documents {
            total += self.add_document(file, pages).await?;
        }
        Ok(total)
    }

    /// Reset the index and fill it from a pre-chunked JSON export.
    pub async fn create_index_from_json(&self, rows: &[Value]) -> Result<usize> {
        self.create_index().await?;
        let records = self.records_from_json(rows).await?;
        let uploaded = self.upload(&records).await?;
        tracing::info!("Uploaded {} documents to '{}' index", uploaded, self.name);
        Ok(uploaded)
    }

    /// Delete every record of `file` (matched on its basename).
    pub async fn remove_file(&self, file: &str) -> Result<u64> {
        let file = basename(file);
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            DELETE FROM records_fts
            WHERE record_id IN (SELECT id FROM index_records WHERE index_name = ? AND file = ?)
            "#,
        )
        .bind(&self.name)
        .bind(&file)
        .execute(&mut *tx)
        .await?;

        let removed = sqlx::query("DELETE FROM index_records WHERE index_name = ? AND file = ?")
            .bind(&self.name)
            .bind(&file)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;

        if removed == 0 {
            tracing::info!("No documents found with filename: {}", file);
        } else {
            tracing::info!("Removed {} documents of {} from '{}'", removed, file, self.name);
        }
        Ok(removed)
    }

    /// Number of records in the index, optionally for one file only.
    pub async fn count(&self, file: Option<&str>) -> Result<i64> {
        let count = match file {
            Some(file) => {
                sqlx::query_scalar(
                    "SELECT COUNT(*) FROM index_records WHERE index_name = ? AND file = ?",
                )
                .bind(&self.name)
                .bind(basename(file))
                .fetch_one(&self.pool)
                .await?
            }
            None => {
                sqlx::query_scalar("SELECT COUNT(*) FROM index_records WHERE index_name = ?")
                    .bind(&self.name)
                    .fetch_one(&self.pool)
                    .await?
            }
        };
        Ok(count)
    }

    /// Hybrid search for `query`, recording the search in `ctx`.
    pub async fn get_documents(
        &self,
        query: &str,
        ctx: &mut RetrievalContext,
    ) -> Result<Vec<RetrievedDocument>> {
        let top = ctx.overrides.top.unwrap_or(self.retrieval.top_k).max(1);

        let keyword = self.keyword_candidates(query).await?;
        let (vector, alpha) = if self.embedder.is_enabled() {
            let query_vec = embedding::embed_query(self.embedder.as_ref(), query).await?;
            (
                self.vector_candidates(&query_vec).await?,
                self.retrieval.hybrid_alpha,
            )
        } else {
            (Vec::new(), 0.0)
        };

        let mut ranked = fuse(&keyword, &vector, alpha);
        ranked.truncate(top);

        let mut documents = Vec::with_capacity(ranked.len());
        for (id, score) in ranked {
            if let Some(doc) = self.load_document(&id, score).await? {
                documents.push(doc);
            }
        }

        tracing::debug!(
            "Retrieved {} documents from '{}' for query: {}",
            documents.len(),
            self.name,
            query
        );

        ctx.thoughts.push(Thought {
            title: "Generated search query".to_string(),
            description: query.to_string(),
        });
        ctx.grounding_data.push(documents.clone());

        Ok(documents)
    }

    async fn keyword_candidates(&self, query: &str) -> Result<Vec<Candidate>> {
        let Some(fts) = fts_query(query) else {
            return Ok(Vec::new());
        };

        let rows = sqlx::query(
            r#"
            SELECT record_id, rank
            FROM records_fts
            WHERE records_fts MATCH ? AND index_name = ?
            ORDER BY rank
            LIMIT ?
            "#,
        )
        .bind(&fts)
        .bind(&self.name)
        .bind(self.retrieval.candidate_k)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<Candidate> {
                let rank: f64 = row.try_get("rank")?;
                // negate so higher = better
                Ok(Candidate::new(row.try_get::<String, _>("record_id")?, -rank))
            })
            .collect()
    }

    async fn vector_candidates(&self, query_vec: &[f32]) -> Result<Vec<Candidate>> {
        let rows = sqlx::query(
            "SELECT id, embedding FROM index_records WHERE index_name = ? AND embedding IS NOT NULL",
        )
        .bind(&self.name)
        .fetch_all(&self.pool)
        .await?;

        let mut candidates = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.try_get("embedding")?;
            let similarity =
                embedding::cosine_similarity(query_vec, &embedding::blob_to_vec(&blob)) as f64;
            candidates.push(Candidate::new(row.try_get::<String, _>("id")?, similarity));
        }

        candidates.sort_by(|a, b| {
            b.raw_score
                .partial_cmp(&a.raw_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates.truncate(self.retrieval.candidate_k.max(0) as usize);

        Ok(candidates)
    }

    async fn load_document(&self, id: &str, score: f64) -> Result<Option<RetrievedDocument>> {
        let row = sqlx::query(
            "SELECT id, content, title, file, metadata_json FROM index_records WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let metadata_json: String = row.try_get("metadata_json")?;
        let metadata: Map<String, Value> = serde_json::from_str(&metadata_json)
            .with_context(|| format!("Corrupt metadata for record {}", id))?;

        Ok(Some(RetrievedDocument {
            id: row.try_get("id")?,
            content: row.try_get("content")?,
            title: row.try_get("title")?,
            file: row.try_get("file")?,
            score,
            metadata,
        }))
    }
}

/// Final path component, used as a record's `file` and `title`.
pub fn basename(file: &str) -> String {
    Path::new(file)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| file.to_string())
}
