//! Error types for the ingestion pipeline and query engine.
//!
//! Per-document failures are classified by [`FailureKind`] so that the
//! scanner's retry policy is driven by kind, not by message text.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::models::DocumentStatus;

/// Classification of a failed processing attempt, persisted alongside the
/// `error` status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The decoder rejected the file (corrupt, truncated, oversized).
    Extraction,
    /// Extraction did not finish within the configured timeout.
    ExtractionTimeout,
    /// The file decoded but produced no text.
    EmptyContent,
    /// The search index refused or could not take the write.
    IndexWrite,
    /// The file could not be read (permissions, vanished mid-scan).
    FileSystem,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Extraction => "extraction",
            FailureKind::ExtractionTimeout => "extraction_timeout",
            FailureKind::EmptyContent => "empty_content",
            FailureKind::IndexWrite => "index_write",
            FailureKind::FileSystem => "file_system",
        }
    }

    /// Transient faults may succeed on a later attempt without the file
    /// changing; terminal ones describe the document itself.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FailureKind::ExtractionTimeout
                | FailureKind::IndexWrite
                | FailureKind::FileSystem
        )
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailureKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "extraction" => Ok(FailureKind::Extraction),
            "extraction_timeout" => Ok(FailureKind::ExtractionTimeout),
            "empty_content" => Ok(FailureKind::EmptyContent),
            "index_write" => Ok(FailureKind::IndexWrite),
            "file_system" => Ok(FailureKind::FileSystem),
            other => Err(format!("unknown failure kind: '{}'", other)),
        }
    }
}

/// Text extraction failure. Never panics out of a decoder; the pipeline
/// records the kind and moves on to the next file.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("no extractor registered for extension '{0}'")]
    UnsupportedFormat(String),
    #[error("{format} decode failed: {message}")]
    Decode {
        format: &'static str,
        message: String,
    },
    #[error("decoded text is empty")]
    Empty,
    #[error("file is {size} bytes, limit is {limit}")]
    TooLarge { size: u64, limit: u64 },
    #[error("extraction timed out after {0:?}")]
    Timeout(Duration),
    #[error("decoder panicked")]
    Panicked,
    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),
}

impl ExtractError {
    pub fn decode(format: &'static str, err: impl fmt::Display) -> Self {
        ExtractError::Decode {
            format,
            message: err.to_string(),
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            ExtractError::Empty => FailureKind::EmptyContent,
            ExtractError::Timeout(_) => FailureKind::ExtractionTimeout,
            ExtractError::Io(_) => FailureKind::FileSystem,
            ExtractError::UnsupportedFormat(_)
            | ExtractError::Decode { .. }
            | ExtractError::TooLarge { .. }
            | ExtractError::Panicked => FailureKind::Extraction,
        }
    }
}

/// Failure of the search index, on write or on query.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("search index unavailable: {0}")]
    Unavailable(#[from] sqlx::Error),
    #[error("search index rejected the request: {0}")]
    Rejected(String),
}

/// Failure of the status store itself. Fatal to the operation in progress.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("status store unavailable: {0}")]
    Unavailable(#[from] sqlx::Error),
    #[error("status store holds an unreadable row: {0}")]
    Corrupt(String),
    #[error("illegal status transition for '{filename}': {from} -> {to}")]
    IllegalTransition {
        filename: String,
        from: DocumentStatus,
        to: DocumentStatus,
    },
}

/// Failure of a caller-facing document operation (delete, reindex).
#[derive(Debug, Error)]
pub enum OperationError {
    #[error("invalid document filename: '{0}'")]
    InvalidFilename(String),
    #[error("no extractor for document: '{0}'")]
    Unsupported(String),
    #[error("source file not found: {0}")]
    SourceMissing(String),
    #[error("document is already being processed: {0}")]
    InFlight(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error("file system failure: {0}")]
    Io(#[from] std::io::Error),
}

/// Query failure as reported to callers. Carries the kind only; engine
/// diagnostics are logged where the query fails and go no further.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("search backend unavailable")]
    Backend,
}
