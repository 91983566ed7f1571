//! Pipeline error taxonomy.
//!
//! Three caller-visible classes: validation errors (client-fixable, 400),
//! not-found (404), and everything else (500, logged, generic message to the
//! caller). Ingestion step failures are recorded on the document row rather
//! than surfaced to the uploader, whose upload was already accepted.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("document not found: {0}")]
    DocumentNotFound(String),

    #[error("text extraction failed: {0}")]
    Extraction(String),

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("illegal status transition: {from} -> {to}")]
    IllegalTransition { from: String, to: String },

    #[error("ingestion timed out after {0}s")]
    Timeout(u64),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl From<anyhow::Error> for PipelineError {
    fn from(err: anyhow::Error) -> Self {
        PipelineError::Other(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
