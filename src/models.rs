//! Core data models for the ingestion and retrieval pipeline.
//!
//! These types mirror the SQLite schema in `migrate.rs`. Timestamps are unix
//! seconds; identifiers are UUID strings.

use serde::Serialize;

/// Lifecycle state of a document.
///
/// Transitions are forward-only: `Queued → Processing → Indexed`, or
/// `→ Failed` from any non-terminal state. [`crate::store::transition_status`]
/// enforces this at the SQL level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Queued,
    Processing,
    Indexed,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Queued => "queued",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Indexed => "indexed",
            DocumentStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(DocumentStatus::Queued),
            "processing" => Some(DocumentStatus::Processing),
            "indexed" => Some(DocumentStatus::Indexed),
            "failed" => Some(DocumentStatus::Failed),
            _ => None,
        }
    }

    /// Terminal states accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DocumentStatus::Indexed | DocumentStatus::Failed)
    }
}

/// A document record as persisted.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub id: String,
    #[serde(rename = "courseId")]
    pub course_id: i64,
    pub title: String,
    #[serde(rename = "fileKey")]
    pub file_key: String,
    /// SHA-256 hex of the uploaded bytes. Immutable once set.
    pub checksum: String,
    #[serde(rename = "contentType")]
    pub content_type: String,
    pub status: DocumentStatus,
    /// Page count, null until ingestion determines it.
    pub pages: Option<i64>,
    /// Failure detail, set when status becomes `failed`.
    pub error: Option<String>,
    #[serde(rename = "createdAt")]
    pub created_at: i64,
    #[serde(rename = "updatedAt")]
    pub updated_at: i64,
}

/// A page-anchored span of a document's text, the unit of embedding and
/// retrieval.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    /// Ordinal position within the document; contiguous from 0.
    pub chunk_index: i64,
    /// 1-based page span covered by this chunk.
    pub start_page: i64,
    pub end_page: i64,
    /// Byte offsets into the extracted document text.
    pub start_char: i64,
    pub end_char: i64,
    pub text: String,
    /// SHA-256 of `text`, used for de-duplication and staleness checks.
    pub text_hash: String,
    /// Opaque reference into the vector index. Set only after the embedding
    /// step succeeds.
    pub embedding_id: Option<String>,
}

/// A chunk reference surfaced to the caller with provenance and score.
#[derive(Debug, Clone, Serialize)]
pub struct Citation {
    #[serde(rename = "documentId")]
    pub document_id: String,
    pub title: String,
    pub page: i64,
    pub snippet: String,
    pub score: f64,
}

/// Composed response for a search request.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub answer: String,
    pub citations: Vec<Citation>,
    #[serde(rename = "latencyMs")]
    pub latency_ms: i64,
}

/// Audit event kinds recorded in the `events` table.
pub mod event_kind {
    pub const DOCUMENT_UPLOADED: &str = "document.uploaded";
    pub const DOCUMENT_DELETED: &str = "document.deleted";
    pub const SEARCH_PERFORMED: &str = "search.performed";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_roundtrip() {
        for s in ["queued", "processing", "indexed", "failed"] {
            assert_eq!(DocumentStatus::parse(s).unwrap().as_str(), s);
        }
        assert!(DocumentStatus::parse("deleted").is_none());
    }

    #[test]
    fn terminal_states() {
        assert!(!DocumentStatus::Queued.is_terminal());
        assert!(!DocumentStatus::Processing.is_terminal());
        assert!(DocumentStatus::Indexed.is_terminal());
        assert!(DocumentStatus::Failed.is_terminal());
    }
}
