//! HTTP API for uploads, document lifecycle, and search.
//!
//! # Endpoints
//!
//! | Method   | Path | Description |
//! |----------|------|-------------|
//! | `POST`   | `/upload` | Multipart upload (`file`, `courseId`); queues ingestion |
//! | `GET`    | `/documents/{id}` | Fetch one document record with status |
//! | `DELETE` | `/documents/{id}` | Delete a document, its chunks, and vectors |
//! | `POST`   | `/search` | Ask a question against one course's materials |
//! | `GET`    | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! All error responses share one envelope:
//!
//! ```json
//! { "error": { "code": "NOT_FOUND", "message": "no document with id ..." } }
//! ```
//!
//! Codes: `MISSING_PARAMETERS` (400), `EMPTY_QUERY` (400), `INVALID_ID` (400),
//! `INVALID_FILE_TYPE` (400), `FILE_TOO_LARGE` (400), `NOT_FOUND` (404),
//! `INTERNAL_ERROR` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser clients.

use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};
use uuid::Uuid;

use crate::config::Config;
use crate::embedding::{create_embedder, Embedder};
use crate::extract::ALLOWED_MIME_TYPES;
use crate::models::event_kind;
use crate::queue::IngestQueue;
use crate::search;
use crate::store;

/// Uploads larger than this are rejected with `FILE_TOO_LARGE`.
pub const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

// Body limit sits above the file cap so the multipart framing and form
// fields fit; files between the two caps are rejected by our own size check,
// larger bodies by the limit layer. Both paths produce the same envelope.
const BODY_LIMIT_BYTES: usize = MAX_UPLOAD_BYTES + 4 * 1024 * 1024;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pool: SqlitePool,
    pub embedder: Arc<dyn Embedder>,
    pub queue: IngestQueue,
}

/// Build the router over pre-constructed state. Split out from [`run_server`]
/// so tests can serve on an ephemeral port with their own pool and embedder.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/upload", post(handle_upload))
        .route(
            "/documents/{id}",
            get(handle_get_document).delete(handle_delete_document),
        )
        .route("/search", post(handle_search))
        .route("/health", get(handle_health))
        .layer(DefaultBodyLimit::max(BODY_LIMIT_BYTES))
        .layer(cors)
        .with_state(state)
}

/// Start the API server: connect the database, run migrations, spin up the
/// ingest workers, and serve until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let config = Arc::new(config.clone());

    let pool = crate::db::connect(&config).await?;
    crate::migrate::run_migrations(&pool).await?;

    let embedder = create_embedder(&config.embedding)?;
    let queue = IngestQueue::start(config.clone(), pool.clone(), embedder.clone());

    let app = build_router(AppState {
        config,
        pool,
        embedder,
        queue,
    });

    info!("listening on http://{}", bind_addr);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an HTTP response with the shared
/// error envelope.
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn missing_parameters(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "MISSING_PARAMETERS",
        message: message.into(),
    }
}

fn empty_query() -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "EMPTY_QUERY",
        message: "query must not be empty".to_string(),
    }
}

fn invalid_id(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "INVALID_ID",
        message: message.into(),
    }
}

fn invalid_file_type(content_type: &str) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "INVALID_FILE_TYPE",
        message: format!(
            "unsupported content type '{}'; allowed: {}",
            content_type,
            ALLOWED_MIME_TYPES.join(", ")
        ),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "NOT_FOUND",
        message: message.into(),
    }
}

fn file_too_large(size: usize) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "FILE_TOO_LARGE",
        message: format!(
            "file is {} bytes; the limit is {} bytes",
            size, MAX_UPLOAD_BYTES
        ),
    }
}

/// Multipart read failures keep the shared envelope: a tripped body limit
/// surfaces as `FILE_TOO_LARGE`, anything else as a malformed request.
fn multipart_read_error(context: &str, err: MultipartError) -> AppError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return AppError {
            status: StatusCode::BAD_REQUEST,
            code: "FILE_TOO_LARGE",
            message: format!(
                "request body exceeds the {} byte upload limit",
                MAX_UPLOAD_BYTES
            ),
        };
    }
    missing_parameters(format!("{}: {}", context, err))
}

fn internal_error(err: impl std::fmt::Display) -> AppError {
    error!(error = %err, "internal error");
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "INTERNAL_ERROR",
        message: "internal error".to_string(),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /upload ============

#[derive(Serialize)]
struct UploadResponse {
    #[serde(rename = "documentId")]
    document_id: String,
    status: String,
    title: String,
}

/// Handler for `POST /upload`.
///
/// Accepts a multipart form with a `file` part and a `courseId` field.
/// Validates type and size, stores the bytes under the storage root, creates
/// the document row in `queued` state, and enqueues background ingestion.
/// Responds immediately; poll `GET /documents/{id}` for status.
async fn handle_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let mut file_bytes: Option<Vec<u8>> = None;
    let mut file_name: Option<String> = None;
    let mut content_type: Option<String> = None;
    let mut course_id_raw: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_read_error("malformed multipart body", e))?
    {
        let name = field.name().map(|s| s.to_string());
        match name.as_deref() {
            Some("file") => {
                file_name = field.file_name().map(|s| s.to_string());
                content_type = field.content_type().map(|s| s.to_string());
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| multipart_read_error("could not read file part", e))?;
                file_bytes = Some(bytes.to_vec());
            }
            Some("courseId") => {
                course_id_raw = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| multipart_read_error("could not read courseId", e))?,
                );
            }
            _ => {}
        }
    }

    let bytes = file_bytes.ok_or_else(|| missing_parameters("file part is required"))?;
    let course_id_raw = course_id_raw.ok_or_else(|| missing_parameters("courseId is required"))?;
    let course_id: i64 = course_id_raw
        .trim()
        .parse()
        .map_err(|_| invalid_id(format!("courseId must be an integer, got '{}'", course_id_raw)))?;

    let content_type = content_type.ok_or_else(|| missing_parameters("file content type is required"))?;
    if !ALLOWED_MIME_TYPES.contains(&content_type.as_str()) {
        return Err(invalid_file_type(&content_type));
    }
    if bytes.len() > MAX_UPLOAD_BYTES {
        return Err(file_too_large(bytes.len()));
    }
    if bytes.is_empty() {
        return Err(missing_parameters("file must not be empty"));
    }

    let title = file_name.unwrap_or_else(|| "upload".to_string());
    let file_key = format!(
        "courses/{}/{}-{}",
        course_id,
        chrono::Utc::now().timestamp_millis(),
        sanitize_filename(&title)
    );

    let path = state.config.storage.root.join(&file_key);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(internal_error)?;
    }
    std::fs::write(&path, &bytes).map_err(internal_error)?;

    let checksum = format!("{:x}", Sha256::digest(&bytes));
    let doc = store::create_document(
        &state.pool,
        course_id,
        &title,
        &file_key,
        &checksum,
        &content_type,
    )
    .await
    .map_err(internal_error)?;

    let payload = serde_json::json!({
        "courseId": course_id,
        "title": title,
        "contentType": content_type,
        "sizeBytes": bytes.len(),
    });
    store::insert_event(&state.pool, event_kind::DOCUMENT_UPLOADED, Some(&doc.id), &payload)
        .await
        .map_err(internal_error)?;

    state.queue.enqueue(&doc.id).map_err(internal_error)?;
    info!(document_id = %doc.id, course_id, title = %doc.title, "upload accepted");

    Ok(Json(UploadResponse {
        document_id: doc.id,
        status: doc.status.as_str().to_string(),
        title: doc.title,
    }))
}

/// Keep the basename only and replace path-hostile characters so the file
/// key is safe to join under the storage root.
fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '-' | '_' | ' ') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim();
    if trimmed.is_empty() {
        "upload".to_string()
    } else {
        trimmed.to_string()
    }
}

// ============ GET/DELETE /documents/{id} ============

async fn handle_get_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<crate::models::Document>, AppError> {
    validate_document_id(&id)?;
    let doc = store::get_document(&state.pool, &id)
        .await
        .map_err(internal_error)?
        .ok_or_else(|| not_found(format!("no document with id {}", id)))?;
    Ok(Json(doc))
}

#[derive(Serialize)]
struct DeleteResponse {
    #[serde(rename = "documentId")]
    document_id: String,
    deleted: bool,
}

async fn handle_delete_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>, AppError> {
    validate_document_id(&id)?;
    let deleted = store::delete_document(&state.pool, &id)
        .await
        .map_err(internal_error)?;
    match deleted {
        Some(doc) => {
            // Stored bytes are removed best-effort; the row and index entries
            // are already gone.
            let path = state.config.storage.root.join(&doc.file_key);
            if let Err(e) = std::fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    error!(document_id = %id, error = %e, "could not remove stored file");
                }
            }
            info!(document_id = %id, "document deleted");
            Ok(Json(DeleteResponse {
                document_id: id,
                deleted: true,
            }))
        }
        None => Err(not_found(format!("no document with id {}", id))),
    }
}

fn validate_document_id(id: &str) -> Result<(), AppError> {
    Uuid::parse_str(id)
        .map(|_| ())
        .map_err(|_| invalid_id(format!("'{}' is not a valid document id", id)))
}

// ============ POST /search ============

#[derive(Deserialize)]
struct SearchRequest {
    #[serde(rename = "courseId")]
    course_id: Option<i64>,
    query: Option<String>,
    #[serde(rename = "topK")]
    top_k: Option<usize>,
}

async fn handle_search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<crate::models::Answer>, AppError> {
    let course_id = req
        .course_id
        .ok_or_else(|| missing_parameters("courseId is required"))?;
    let query = req
        .query
        .ok_or_else(|| missing_parameters("query is required"))?;
    let query = query.trim();
    if query.is_empty() {
        return Err(empty_query());
    }

    let result = search::answer(
        &state.config,
        &state.pool,
        state.embedder.as_ref(),
        course_id,
        query,
        req.top_k,
    )
    .await
    .map_err(internal_error)?;

    Ok(Json(result))
}
