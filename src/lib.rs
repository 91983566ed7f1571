//! # Lectern
//!
//! A document ingestion and retrieval pipeline for course materials.
//!
//! Lectern ingests uploaded documents (PDF, DOCX, PPTX, plain text), extracts
//! page-anchored text, chunks and embeds it into a course-scoped vector
//! index, and answers questions with citations back to document and page.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────────┐   ┌──────────┐
//! │  Upload  │──▶│   Pipeline    │──▶│  SQLite  │
//! │ HTTP/CLI │   │ Extract+Chunk │   │ Docs+Vec │
//! └──────────┘   │    +Embed     │   └────┬─────┘
//!                └───────────────┘        │
//!                     ┌───────────────────┤
//!                     ▼                   ▼
//!                ┌──────────┐       ┌──────────┐
//!                │   CLI    │       │   HTTP   │
//!                │(lectern) │       │  (API)   │
//!                └──────────┘       └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! lectern init                       # create database
//! lectern serve                      # start HTTP API
//! curl -F file=@slides.pdf -F courseId=1 http://localhost:8080/upload
//! lectern search 1 "what is backpropagation"
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`extract`] | Per-page text extraction (PDF, OOXML, plain text) |
//! | [`chunk`] | Page-anchored text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | Course-scoped vector index |
//! | [`store`] | Document, chunk, and event persistence |
//! | [`ingest`] | The ingestion pipeline |
//! | [`queue`] | Background ingest workers |
//! | [`search`] | Retrieval and cited answer composition |
//! | [`server`] | HTTP API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`error`] | Pipeline error taxonomy |

pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod index;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod queue;
pub mod search;
pub mod server;
pub mod store;
