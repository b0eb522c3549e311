//! Core data models used throughout docwatch.
//!
//! These types describe the per-file lifecycle record kept by the status
//! store and the values handed back by the query engine.

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::error::FailureKind;

/// Lifecycle state of a tracked document.
///
/// `Absent` is never stored: it is what a missing row means.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Absent,
    Indexing,
    Indexed,
    Error,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Absent => "absent",
            DocumentStatus::Indexing => "indexing",
            DocumentStatus::Indexed => "indexed",
            DocumentStatus::Error => "error",
        }
    }

    /// Whether moving from `self` to `next` is a legal lifecycle step.
    ///
    /// `Indexed -> Indexing` is only legal through a forced claim (reindex or
    /// delete); the periodic scan never takes it. `Indexing -> Indexing` is
    /// a stale claim being taken over.
    pub fn can_transition_to(&self, next: DocumentStatus) -> bool {
        use DocumentStatus::*;
        matches!(
            (self, next),
            (Absent, Indexing)
                | (Indexing, Indexing)
                | (Indexing, Indexed)
                | (Indexing, Error)
                | (Error, Indexing)
                | (Indexed, Indexing)
        )
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "absent" => Ok(DocumentStatus::Absent),
            "indexing" => Ok(DocumentStatus::Indexing),
            "indexed" => Ok(DocumentStatus::Indexed),
            "error" => Ok(DocumentStatus::Error),
            other => Err(format!("unknown document status: '{}'", other)),
        }
    }
}

/// One row of the status store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentRecord {
    pub filename: String,
    pub status: DocumentStatus,
    pub added_date: DateTime<Utc>,
    /// Kind of the last failure, set only while `status` is `error`.
    pub error_kind: Option<FailureKind>,
}

impl DocumentRecord {
    pub fn new(filename: &str, status: DocumentStatus, added_date: DateTime<Utc>) -> Self {
        Self {
            filename: filename.to_string(),
            status,
            added_date,
            error_kind: None,
        }
    }

    pub fn failed(filename: &str, kind: FailureKind, added_date: DateTime<Utc>) -> Self {
        Self {
            filename: filename.to_string(),
            status: DocumentStatus::Error,
            added_date,
            error_kind: Some(kind),
        }
    }
}

/// A ranked query result with its highlighted snippets.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub filename: String,
    pub added_date: DateTime<Utc>,
    pub score: f64,
    pub snippet_short: String,
    pub snippet_full: String,
}

/// An entry of the append-only search history.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHistoryEntry {
    pub query: String,
    pub origin: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Milliseconds since the epoch, the storage format for every timestamp.
pub fn to_millis(ts: &DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

pub fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Current time truncated to millisecond precision, so that a value
/// survives a round trip through storage unchanged.
pub fn now_millis() -> DateTime<Utc> {
    from_millis(Utc::now().timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            DocumentStatus::Indexing,
            DocumentStatus::Indexed,
            DocumentStatus::Error,
        ] {
            assert_eq!(status.as_str().parse::<DocumentStatus>().unwrap(), status);
        }
        assert!("done".parse::<DocumentStatus>().is_err());
    }

    #[test]
    fn only_lifecycle_edges_are_legal() {
        use DocumentStatus::*;
        let all = [Absent, Indexing, Indexed, Error];
        let legal: Vec<(DocumentStatus, DocumentStatus)> = all
            .iter()
            .flat_map(|a| all.iter().map(move |b| (*a, *b)))
            .filter(|(a, b)| a.can_transition_to(*b))
            .collect();
        assert_eq!(
            legal,
            vec![
                (Absent, Indexing),
                (Indexing, Indexing),
                (Indexing, Indexed),
                (Indexing, Error),
                (Indexed, Indexing),
                (Error, Indexing),
            ]
        );
    }
}
