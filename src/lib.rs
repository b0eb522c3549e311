//! # docwatch
//!
//! Watched-directory ingestion of PDF, DOCX and RTF documents into a
//! full-text search index.
//!
//! A periodic scan picks up new files, extracts their text, writes it to an
//! SQLite FTS5 index and records each file's lifecycle in a status table.
//! Indexed files are moved to an archive directory. The query engine
//! returns ranked hits with highlighted snippets.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌─────────────┐
//! │  Watched    │──▶│   Scanner    │──▶│  Ingestor   │
//! │  directory  │   │ claim + pool │   │ extract+idx │
//! └─────────────┘   └──────────────┘   └──────┬──────┘
//!                                             │
//!                  ┌──────────────┬───────────┤
//!                  ▼              ▼           ▼
//!            ┌──────────┐  ┌───────────┐ ┌─────────┐
//!            │  status  │  │ FTS5 index│ │ archive │
//!            └──────────┘  └─────┬─────┘ └─────────┘
//!                                ▼
//!                          ┌───────────┐
//!                          │QueryEngine│
//!                          └───────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`models`] | Status records and search hits |
//! | [`error`] | Error types and failure kinds |
//! | [`extract`] | Format-specific text extraction |
//! | [`rtf`] | RTF to plain text decoder |
//! | [`status`] | Status store |
//! | [`index`] | Full-text index and highlighting |
//! | [`memory`] | In-memory status store and index |
//! | [`archive`] | Moving indexed files out of the watched directory |
//! | [`ingest`] | Per-document processing, delete and reindex |
//! | [`scanner`] | Periodic directory scan and worker pool |
//! | [`search`] | Query engine and snippets |
//! | [`history`] | Search history |
//! | [`app`] | Component wiring from a config |
//! | [`logging`] | Tracing setup |

pub mod app;
pub mod archive;
pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod history;
pub mod index;
pub mod ingest;
pub mod logging;
pub mod memory;
pub mod migrate;
pub mod models;
pub mod rtf;
pub mod scanner;
pub mod search;
pub mod status;
