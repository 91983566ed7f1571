//! Ingestion pipeline.
//!
//! Coordinates the full flow for one document: load stored bytes → per-page
//! text extraction → page-anchored chunking → embedding → transactional
//! persistence of chunks + vectors → `indexed`.
//!
//! Failure at any step transitions the document to `failed` with the error
//! recorded on the row. Chunks and vectors are written in a single
//! transaction only after every embedding exists, so a partial run never
//! leaves a chunk pointing at a missing embedding.
//!
//! Idempotent on retry: if the stored bytes still match the document's
//! checksum and chunks already exist, ingestion is a no-op.

use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::chunk::chunk_pages;
use crate::config::Config;
use crate::embedding::{embed_in_batches, Embedder};
use crate::error::{PipelineError, Result};
use crate::extract;
use crate::models::DocumentStatus;
use crate::store;

/// What a completed ingestion produced.
#[derive(Debug, Clone, Copy)]
pub struct IngestOutcome {
    pub pages: i64,
    pub chunk_count: i64,
}

/// Run the pipeline for one document. The caller (queue worker or CLI) is
/// responsible for serializing calls per document id.
pub async fn ingest_document(
    config: &Config,
    pool: &SqlitePool,
    embedder: &dyn Embedder,
    document_id: &str,
) -> Result<IngestOutcome> {
    let doc = store::get_document(pool, document_id)
        .await
        .map_err(|e| PipelineError::Other(e.to_string()))?
        .ok_or_else(|| PipelineError::DocumentNotFound(document_id.to_string()))?;

    // Checksum-guarded idempotence: an already-indexed document whose stored
    // bytes still hash to the recorded checksum needs no work.
    if doc.status == DocumentStatus::Indexed {
        let existing = store::chunk_count(pool, document_id)
            .await
            .map_err(|e| PipelineError::Other(e.to_string()))?;
        if existing > 0 {
            let bytes = read_stored_bytes(config, &doc.file_key)?;
            if checksum_hex(&bytes) == doc.checksum {
                info!(document_id, "checksum unchanged, skipping re-ingest");
                return Ok(IngestOutcome {
                    pages: doc.pages.unwrap_or(0),
                    chunk_count: existing,
                });
            }
        }
    }

    store::transition_status(pool, document_id, DocumentStatus::Processing, None, None).await?;

    match run_pipeline(config, pool, embedder, &doc).await {
        Ok(outcome) => {
            store::transition_status(
                pool,
                document_id,
                DocumentStatus::Indexed,
                Some(outcome.pages),
                None,
            )
            .await?;
            info!(
                document_id,
                pages = outcome.pages,
                chunks = outcome.chunk_count,
                "document indexed"
            );
            Ok(outcome)
        }
        Err(e) => {
            warn!(document_id, error = %e, "ingestion failed");
            mark_failed(pool, document_id, &e.to_string()).await;
            Err(e)
        }
    }
}

/// Record a failure on the document row. Best-effort: the document may
/// already be terminal (e.g. a timeout fired concurrently).
pub async fn mark_failed(pool: &SqlitePool, document_id: &str, error: &str) {
    if let Err(e) =
        store::transition_status(pool, document_id, DocumentStatus::Failed, None, Some(error))
            .await
    {
        warn!(document_id, error = %e, "could not record ingestion failure");
    }
}

async fn run_pipeline(
    config: &Config,
    pool: &SqlitePool,
    embedder: &dyn Embedder,
    doc: &crate::models::Document,
) -> Result<IngestOutcome> {
    let bytes = read_stored_bytes(config, &doc.file_key)?;

    // The checksum is immutable; stored bytes that no longer match it mean
    // the storage layer is corrupt, not that the document changed.
    if checksum_hex(&bytes) != doc.checksum {
        return Err(PipelineError::Other(format!(
            "stored bytes do not match recorded checksum for {}",
            doc.file_key
        )));
    }

    let pages = extract::extract_pages(&bytes, &doc.content_type)
        .map_err(|e| PipelineError::Extraction(e.to_string()))?;

    let mut chunks = chunk_pages(
        &doc.id,
        &pages,
        config.chunking.window_chars,
        config.chunking.overlap_chars,
    );

    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    let vectors = embed_in_batches(embedder, &texts, config.embedding.batch_size)
        .await
        .map_err(|e| PipelineError::Embedding(e.to_string()))?;

    if vectors.len() != chunks.len() {
        return Err(PipelineError::Embedding(format!(
            "provider returned {} vectors for {} chunks",
            vectors.len(),
            chunks.len()
        )));
    }

    // Embedding references exist only once the vectors do.
    for chunk in &mut chunks {
        chunk.embedding_id = Some(Uuid::new_v4().to_string());
    }

    store::replace_chunks(
        pool,
        &doc.id,
        doc.course_id,
        embedder.model_name(),
        &chunks,
        &vectors,
    )
    .await
    .map_err(|e| PipelineError::Other(e.to_string()))?;

    Ok(IngestOutcome {
        pages: pages.len() as i64,
        chunk_count: chunks.len() as i64,
    })
}

fn read_stored_bytes(config: &Config, file_key: &str) -> Result<Vec<u8>> {
    let path = config.storage.root.join(file_key);
    Ok(std::fs::read(path)?)
}

/// SHA-256 hex digest, the document checksum format.
pub fn checksum_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        ChunkingConfig, Config, DbConfig, EmbeddingConfig, IngestConfig, RetrievalConfig,
        ServerConfig, StorageConfig,
    };
    use crate::embedding::HashEmbedder;
    use sqlx::sqlite::SqlitePoolOptions;

    fn test_config(root: &std::path::Path) -> Config {
        Config {
            db: DbConfig {
                path: root.join("test.sqlite"),
            },
            storage: StorageConfig {
                root: root.to_path_buf(),
            },
            server: ServerConfig {
                bind: "127.0.0.1:0".to_string(),
            },
            chunking: ChunkingConfig {
                window_chars: 200,
                overlap_chars: 40,
            },
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
            ingest: IngestConfig::default(),
        }
    }

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::migrate::run_migrations(&pool).await.unwrap();
        pool
    }

    async fn seed_upload(
        config: &Config,
        pool: &SqlitePool,
        body: &[u8],
        content_type: &str,
    ) -> crate::models::Document {
        let file_key = "courses/1/notes.txt";
        let path = config.storage.root.join(file_key);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, body).unwrap();
        store::create_document(
            pool,
            1,
            "notes.txt",
            file_key,
            &checksum_hex(body),
            content_type,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn ingest_marks_document_indexed() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let pool = test_pool().await;
        let embedder = HashEmbedder::new(64);

        let body = "Backpropagation applies the chain rule.\n\nGradient descent minimizes loss."
            .repeat(5);
        let doc = seed_upload(&config, &pool, body.as_bytes(), "text/plain").await;

        let outcome = ingest_document(&config, &pool, &embedder, &doc.id)
            .await
            .unwrap();
        assert!(outcome.chunk_count >= 1);
        assert!(outcome.pages >= 1);

        let doc = store::get_document(&pool, &doc.id).await.unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Indexed);
        assert_eq!(doc.pages, Some(outcome.pages));

        // Every chunk carries an embedding reference and a vector row.
        let chunks = store::get_chunks(&pool, &doc.id).await.unwrap();
        assert_eq!(chunks.len() as i64, outcome.chunk_count);
        for c in &chunks {
            assert!(c.embedding_id.is_some());
        }
        let vectors: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunk_vectors")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(vectors, outcome.chunk_count);
    }

    #[tokio::test]
    async fn reingest_unchanged_checksum_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let pool = test_pool().await;
        let embedder = HashEmbedder::new(64);

        let doc = seed_upload(&config, &pool, b"Short lecture notes about overfitting.", "text/plain").await;

        let first = ingest_document(&config, &pool, &embedder, &doc.id)
            .await
            .unwrap();
        let before: Vec<String> = store::get_chunks(&pool, &doc.id)
            .await
            .unwrap()
            .iter()
            .map(|c| c.id.clone())
            .collect();

        let second = ingest_document(&config, &pool, &embedder, &doc.id)
            .await
            .unwrap();
        assert_eq!(first.chunk_count, second.chunk_count);

        // Same chunk rows, not re-written duplicates.
        let after: Vec<String> = store::get_chunks(&pool, &doc.id)
            .await
            .unwrap()
            .iter()
            .map(|c| c.id.clone())
            .collect();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn corrupt_file_marks_failed() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let pool = test_pool().await;
        let embedder = HashEmbedder::new(64);

        let doc = seed_upload(&config, &pool, b"not a real pdf", "application/pdf").await;

        let err = ingest_document(&config, &pool, &embedder, &doc.id)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Extraction(_)));

        let doc = store::get_document(&pool, &doc.id).await.unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Failed);
        assert!(doc.error.is_some());

        // No partial chunks survive.
        assert_eq!(store::chunk_count(&pool, &doc.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn missing_stored_file_marks_failed() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let pool = test_pool().await;
        let embedder = HashEmbedder::new(64);

        let doc = store::create_document(&pool, 1, "ghost.txt", "courses/1/ghost.txt", "00", "text/plain")
            .await
            .unwrap();

        assert!(ingest_document(&config, &pool, &embedder, &doc.id)
            .await
            .is_err());
        let doc = store::get_document(&pool, &doc.id).await.unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Failed);
    }

    #[tokio::test]
    async fn unknown_document_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let pool = test_pool().await;
        let embedder = HashEmbedder::new(64);

        let err = ingest_document(&config, &pool, &embedder, "missing")
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::DocumentNotFound(_)));
    }
}
