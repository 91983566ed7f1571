//! Document store: durable records for documents, chunks, search logs, and
//! audit events.
//!
//! All writes that touch more than one table run in a transaction. Status
//! transitions are enforced forward-only at the SQL level so concurrent
//! writers cannot resurrect a terminal document.

use anyhow::Result;
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::error::PipelineError;
use crate::index;
use crate::models::{event_kind, Chunk, Document, DocumentStatus};

fn document_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Document> {
    let status_str: String = row.get("status");
    let status = DocumentStatus::parse(&status_str)
        .ok_or_else(|| anyhow::anyhow!("unknown document status in db: {}", status_str))?;
    Ok(Document {
        id: row.get("id"),
        course_id: row.get("course_id"),
        title: row.get("title"),
        file_key: row.get("file_key"),
        checksum: row.get("checksum"),
        content_type: row.get("content_type"),
        status,
        pages: row.get("pages"),
        error: row.get("error"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

/// Insert a new document in `queued` state and return the record.
pub async fn create_document(
    pool: &SqlitePool,
    course_id: i64,
    title: &str,
    file_key: &str,
    checksum: &str,
    content_type: &str,
) -> Result<Document> {
    let now = Utc::now().timestamp();
    let doc = Document {
        id: Uuid::new_v4().to_string(),
        course_id,
        title: title.to_string(),
        file_key: file_key.to_string(),
        checksum: checksum.to_string(),
        content_type: content_type.to_string(),
        status: DocumentStatus::Queued,
        pages: None,
        error: None,
        created_at: now,
        updated_at: now,
    };

    sqlx::query(
        r#"
        INSERT INTO documents (id, course_id, title, file_key, checksum, content_type, status, pages, error, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, NULL, NULL, ?, ?)
        "#,
    )
    .bind(&doc.id)
    .bind(doc.course_id)
    .bind(&doc.title)
    .bind(&doc.file_key)
    .bind(&doc.checksum)
    .bind(&doc.content_type)
    .bind(doc.status.as_str())
    .bind(doc.created_at)
    .bind(doc.updated_at)
    .execute(pool)
    .await?;

    Ok(doc)
}

pub async fn get_document(pool: &SqlitePool, id: &str) -> Result<Option<Document>> {
    let row = sqlx::query("SELECT * FROM documents WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(document_from_row).transpose()
}

/// Advance a document's lifecycle state. Only forward transitions commit:
/// `queued→processing`, `processing→indexed`, and `→failed` from any
/// non-terminal state. `pages` is written alongside `indexed`; `error`
/// alongside `failed`. The checksum column is never touched here.
pub async fn transition_status(
    pool: &SqlitePool,
    id: &str,
    to: DocumentStatus,
    pages: Option<i64>,
    error: Option<&str>,
) -> std::result::Result<(), PipelineError> {
    let allowed_from: &[&str] = match to {
        DocumentStatus::Processing => &["queued"],
        DocumentStatus::Indexed => &["processing"],
        DocumentStatus::Failed => &["queued", "processing"],
        DocumentStatus::Queued => &[],
    };
    if allowed_from.is_empty() {
        return Err(PipelineError::IllegalTransition {
            from: "*".to_string(),
            to: to.as_str().to_string(),
        });
    }

    let placeholders = vec!["?"; allowed_from.len()].join(", ");
    let sql = format!(
        "UPDATE documents
         SET status = ?, pages = COALESCE(?, pages), error = ?, updated_at = ?
         WHERE id = ? AND status IN ({})",
        placeholders
    );

    let mut query = sqlx::query(&sql)
        .bind(to.as_str())
        .bind(pages)
        .bind(error)
        .bind(Utc::now().timestamp())
        .bind(id);
    for from in allowed_from {
        query = query.bind(*from);
    }

    let result = query.execute(pool).await?;
    if result.rows_affected() == 0 {
        let current = get_document(pool, id)
            .await
            .map_err(|e| PipelineError::Other(e.to_string()))?;
        return match current {
            None => Err(PipelineError::DocumentNotFound(id.to_string())),
            Some(doc) => Err(PipelineError::IllegalTransition {
                from: doc.status.as_str().to_string(),
                to: to.as_str().to_string(),
            }),
        };
    }
    Ok(())
}

/// Delete a document, its chunks, and its vectors in one transaction, and
/// record the audit event. Returns the deleted record, or `None` if the id
/// was unknown.
pub async fn delete_document(pool: &SqlitePool, id: &str) -> Result<Option<Document>> {
    let Some(doc) = get_document(pool, id).await? else {
        return Ok(None);
    };

    let mut tx = pool.begin().await?;

    index::remove_document(&mut *tx, id).await?;
    sqlx::query("DELETE FROM chunks WHERE document_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM documents WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    let payload = serde_json::json!({
        "title": doc.title,
        "fileKey": doc.file_key,
    });
    insert_event(&mut *tx, event_kind::DOCUMENT_DELETED, Some(id), &payload).await?;

    tx.commit().await?;
    Ok(Some(doc))
}

/// Replace a document's chunks and vectors atomically. Every chunk must carry
/// an `embedding_id` and a matching entry in `vectors` — chunks are only
/// persisted once their embeddings exist.
pub async fn replace_chunks(
    pool: &SqlitePool,
    document_id: &str,
    course_id: i64,
    model: &str,
    chunks: &[Chunk],
    vectors: &[Vec<f32>],
) -> Result<()> {
    debug_assert_eq!(chunks.len(), vectors.len());

    let mut tx = pool.begin().await?;

    index::remove_document(&mut *tx, document_id).await?;
    sqlx::query("DELETE FROM chunks WHERE document_id = ?")
        .bind(document_id)
        .execute(&mut *tx)
        .await?;

    for (chunk, vector) in chunks.iter().zip(vectors.iter()) {
        let embedding_id = chunk
            .embedding_id
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("chunk {} has no embedding id", chunk.id))?;

        sqlx::query(
            r#"
            INSERT INTO chunks (id, document_id, chunk_index, start_page, end_page, start_char, end_char, text, text_hash, embedding_id)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&chunk.id)
        .bind(&chunk.document_id)
        .bind(chunk.chunk_index)
        .bind(chunk.start_page)
        .bind(chunk.end_page)
        .bind(chunk.start_char)
        .bind(chunk.end_char)
        .bind(&chunk.text)
        .bind(&chunk.text_hash)
        .bind(embedding_id)
        .execute(&mut *tx)
        .await?;

        index::upsert_vector(
            &mut *tx,
            embedding_id,
            &chunk.id,
            document_id,
            course_id,
            model,
            vector,
        )
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

pub async fn chunk_count(pool: &SqlitePool, document_id: &str) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE document_id = ?")
        .bind(document_id)
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// All chunks for a document, in ordinal order.
pub async fn get_chunks(pool: &SqlitePool, document_id: &str) -> Result<Vec<Chunk>> {
    let rows = sqlx::query(
        "SELECT * FROM chunks WHERE document_id = ? ORDER BY chunk_index ASC",
    )
    .bind(document_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| Chunk {
            id: row.get("id"),
            document_id: row.get("document_id"),
            chunk_index: row.get("chunk_index"),
            start_page: row.get("start_page"),
            end_page: row.get("end_page"),
            start_char: row.get("start_char"),
            end_char: row.get("end_char"),
            text: row.get("text"),
            text_hash: row.get("text_hash"),
            embedding_id: row.get("embedding_id"),
        })
        .collect())
}

/// Chunk text plus document title for building citations, keyed by chunk id.
pub struct CitationRow {
    pub chunk_id: String,
    pub document_id: String,
    pub title: String,
    pub start_page: i64,
    pub text: String,
}

pub async fn get_citation_rows(
    pool: &SqlitePool,
    chunk_ids: &[String],
) -> Result<Vec<CitationRow>> {
    if chunk_ids.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = vec!["?"; chunk_ids.len()].join(", ");
    let sql = format!(
        "SELECT c.id AS chunk_id, c.document_id, d.title, c.start_page, c.text
         FROM chunks c JOIN documents d ON d.id = c.document_id
         WHERE c.id IN ({})",
        placeholders
    );
    let mut query = sqlx::query(&sql);
    for id in chunk_ids {
        query = query.bind(id);
    }
    let rows = query.fetch_all(pool).await?;
    Ok(rows
        .iter()
        .map(|row| CitationRow {
            chunk_id: row.get("chunk_id"),
            document_id: row.get("document_id"),
            title: row.get("title"),
            start_page: row.get("start_page"),
            text: row.get("text"),
        })
        .collect())
}

pub async fn insert_event<'e, E>(
    executor: E,
    kind: &str,
    target_id: Option<&str>,
    payload: &serde_json::Value,
) -> Result<()>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    sqlx::query("INSERT INTO events (kind, target_id, payload, created_at) VALUES (?, ?, ?, ?)")
        .bind(kind)
        .bind(target_id)
        .bind(payload.to_string())
        .bind(Utc::now().timestamp())
        .execute(executor)
        .await?;
    Ok(())
}

pub async fn record_search(
    pool: &SqlitePool,
    course_id: i64,
    query: &str,
    latency_ms: i64,
    results_count: i64,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO search_logs (course_id, query, latency_ms, results_count, created_at)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(course_id)
    .bind(query)
    .bind(latency_ms)
    .bind(results_count)
    .bind(Utc::now().timestamp())
    .execute(pool)
    .await?;
    Ok(())
}
