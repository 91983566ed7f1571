//! Course-scoped vector index over the `chunk_vectors` table.
//!
//! Vectors persist in SQLite, so the index survives process restart with no
//! separate rebuild step. Upserts are single statements executed inside the
//! chunk-replacement transaction, so a concurrent reader never observes a
//! half-written vector.
//!
//! Similarity metric: cosine. Result ordering: score descending, ties broken
//! stably by chunk id ascending.

use anyhow::Result;
use sqlx::{Row, Sqlite, SqlitePool};

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};

/// A scored nearest-neighbor hit.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub chunk_id: String,
    pub document_id: String,
    pub score: f64,
}

/// Insert or replace one chunk's vector. `embedding_id` is the opaque
/// reference the chunk row carries back into the index.
pub async fn upsert_vector<'e, E>(
    executor: E,
    embedding_id: &str,
    chunk_id: &str,
    document_id: &str,
    course_id: i64,
    model: &str,
    vector: &[f32],
) -> Result<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let blob = vec_to_blob(vector);
    sqlx::query(
        r#"
        INSERT INTO chunk_vectors (embedding_id, chunk_id, document_id, course_id, model, dims, embedding)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(chunk_id) DO UPDATE SET
            embedding_id = excluded.embedding_id,
            model = excluded.model,
            dims = excluded.dims,
            embedding = excluded.embedding
        "#,
    )
    .bind(embedding_id)
    .bind(chunk_id)
    .bind(document_id)
    .bind(course_id)
    .bind(model)
    .bind(vector.len() as i64)
    .bind(blob)
    .execute(executor)
    .await?;
    Ok(())
}

/// Drop all vectors belonging to a document (cascade-delete path).
pub async fn remove_document<'e, E>(executor: E, document_id: &str) -> Result<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query("DELETE FROM chunk_vectors WHERE document_id = ?")
        .bind(document_id)
        .execute(executor)
        .await?;
    Ok(())
}

/// Nearest-neighbor query scoped to one course. Chunks from other courses are
/// never returned, regardless of score.
pub async fn query_course(
    pool: &SqlitePool,
    query_vec: &[f32],
    k: usize,
    course_id: i64,
) -> Result<Vec<VectorHit>> {
    let rows = sqlx::query(
        "SELECT chunk_id, document_id, embedding FROM chunk_vectors WHERE course_id = ?",
    )
    .bind(course_id)
    .fetch_all(pool)
    .await?;

    let mut hits: Vec<VectorHit> = rows
        .iter()
        .map(|row| {
            let blob: Vec<u8> = row.get("embedding");
            let vec = blob_to_vec(&blob);
            VectorHit {
                chunk_id: row.get("chunk_id"),
                document_id: row.get("document_id"),
                score: cosine_similarity(query_vec, &vec) as f64,
            }
        })
        .collect();

    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    hits.truncate(k);

    Ok(hits)
}
