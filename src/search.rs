//! Retrieval: embed the query, rank course-scoped chunks, compose a cited
//! answer.
//!
//! The answer is extractive: the top-scoring chunk's text, with every
//! contributing chunk returned as a citation carrying document, page, and
//! score. When no candidate clears the similarity floor the response is a
//! fixed "not found" message with zero citations, never a low-confidence
//! guess. Every request is logged to `search_logs` after completion, hits or
//! not.

use std::time::Instant;

use sqlx::SqlitePool;
use tracing::{debug, warn};

use crate::config::Config;
use crate::embedding::{embed_query, Embedder};
use crate::error::{PipelineError, Result};
use crate::index;
use crate::models::{event_kind, Answer, Citation};
use crate::store;

/// Returned when nothing in the course clears the similarity floor.
pub const NOT_FOUND_ANSWER: &str = "I did not find this in your materials. \
Please try rephrasing your question or check if the relevant documents have been uploaded.";

/// Answer a question against one course's indexed materials.
///
/// `top_k` overrides the configured default when given. The query must be
/// non-empty after trimming; callers validate that at the edge.
pub async fn answer(
    config: &Config,
    pool: &SqlitePool,
    embedder: &dyn Embedder,
    course_id: i64,
    query: &str,
    top_k: Option<usize>,
) -> Result<Answer> {
    let started = Instant::now();
    let k = top_k.unwrap_or(config.retrieval.top_k).max(1);

    let query_vec = embed_query(embedder, query)
        .await
        .map_err(|e| PipelineError::Embedding(e.to_string()))?;

    let hits = index::query_course(pool, &query_vec, k, course_id)
        .await
        .map_err(|e| PipelineError::Other(e.to_string()))?;

    let passing: Vec<_> = hits
        .into_iter()
        .filter(|h| h.score >= config.retrieval.min_score)
        .collect();
    debug!(course_id, candidates = passing.len(), "retrieval complete");

    let citations = build_citations(config, pool, &passing).await?;

    let answer_text = match citations.first() {
        Some(top) => compose_answer(top),
        None => NOT_FOUND_ANSWER.to_string(),
    };

    let latency_ms = started.elapsed().as_millis() as i64;
    let result = Answer {
        answer: answer_text,
        citations,
        latency_ms,
    };

    log_search(pool, course_id, query, &result).await;
    Ok(result)
}

/// Fetch chunk text and document titles for the passing hits, preserving the
/// ranked order.
async fn build_citations(
    config: &Config,
    pool: &SqlitePool,
    hits: &[index::VectorHit],
) -> Result<Vec<Citation>> {
    if hits.is_empty() {
        return Ok(Vec::new());
    }

    let chunk_ids: Vec<String> = hits.iter().map(|h| h.chunk_id.clone()).collect();
    let rows = store::get_citation_rows(pool, &chunk_ids)
        .await
        .map_err(|e| PipelineError::Other(e.to_string()))?;

    // The IN-clause fetch returns rows in table order; re-key by chunk id so
    // citations come back in rank order.
    let mut by_id: std::collections::HashMap<String, store::CitationRow> =
        rows.into_iter().map(|r| (r.chunk_id.clone(), r)).collect();

    let mut citations = Vec::with_capacity(hits.len());
    for hit in hits {
        let Some(row) = by_id.remove(&hit.chunk_id) else {
            // Chunk deleted between ranking and fetch; skip rather than fail
            // the whole request.
            warn!(chunk_id = %hit.chunk_id, "ranked chunk vanished before citation fetch");
            continue;
        };
        citations.push(Citation {
            document_id: row.document_id,
            title: row.title,
            page: row.start_page,
            snippet: snippet(&row.text, config.retrieval.snippet_chars),
            score: hit.score,
        });
    }
    Ok(citations)
}

fn compose_answer(top: &Citation) -> String {
    format!(
        "{}\n\n(Source: {}, p. {})",
        top.snippet, top.title, top.page
    )
}

/// Truncate to at most `max_chars` characters on a char boundary, appending
/// an ellipsis when text was cut.
fn snippet(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(max_chars).collect();
    format!("{}…", cut.trim_end())
}

/// Best-effort bookkeeping; a logging failure never fails the search.
async fn log_search(pool: &SqlitePool, course_id: i64, query: &str, result: &Answer) {
    if let Err(e) = store::record_search(
        pool,
        course_id,
        query,
        result.latency_ms,
        result.citations.len() as i64,
    )
    .await
    {
        warn!(course_id, error = %e, "failed to record search log");
    }

    let payload = serde_json::json!({
        "courseId": course_id,
        "resultsCount": result.citations.len(),
        "latencyMs": result.latency_ms,
    });
    let target = course_id.to_string();
    if let Err(e) =
        store::insert_event(pool, event_kind::SEARCH_PERFORMED, Some(&target), &payload).await
    {
        warn!(course_id, error = %e, "failed to record search event");
    }
}
