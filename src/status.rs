//! Durable per-filename lifecycle records.
//!
//! The [`StatusStore`] is the single source of truth for what has been
//! processed. Every operation touches one row and is atomic with respect to
//! it; the conditional [`claim`](StatusStore::claim) is the only
//! synchronization primitive the pipeline relies on.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use crate::error::{FailureKind, StoreError};
use crate::models::{from_millis, to_millis, DocumentRecord, DocumentStatus};

/// Abstract status persistence.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`get`](StatusStore::get) | Point lookup |
/// | [`upsert`](StatusStore::upsert) | Replace-or-insert one row |
/// | [`claim`](StatusStore::claim) | Conditional move to `indexing` |
/// | [`list`](StatusStore::list) | All rows, newest `added_date` first |
/// | [`delete`](StatusStore::delete) | Idempotent removal |
#[async_trait]
pub trait StatusStore: Send + Sync {
    async fn get(&self, filename: &str) -> Result<Option<DocumentRecord>, StoreError>;

    async fn upsert(&self, record: &DocumentRecord) -> Result<(), StoreError>;

    /// Marks `filename` as `indexing` at `now`, unless another attempt
    /// already holds it. A holding claim older than `stale_before` is
    /// treated as abandoned and taken over.
    ///
    /// With `expected = Some(status)` the claim only succeeds while the row
    /// is still in `status` ([`DocumentStatus::Absent`] meaning no row).
    /// `None` accepts any status but a live claim.
    ///
    /// Returns `true` when this caller now owns the attempt.
    async fn claim(
        &self,
        filename: &str,
        expected: Option<DocumentStatus>,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    async fn list(&self) -> Result<Vec<DocumentRecord>, StoreError>;

    /// Removes the row. Removing a missing row is not an error.
    async fn delete(&self, filename: &str) -> Result<(), StoreError>;
}

/// SQLite implementation over the `documents` table.
pub struct SqliteStatusStore {
    pool: SqlitePool,
}

impl SqliteStatusStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<DocumentRecord, StoreError> {
    let status: String = row.get("status");
    let error_kind: Option<String> = row.get("error_kind");
    Ok(DocumentRecord {
        filename: row.get("filename"),
        status: status.parse().map_err(StoreError::Corrupt)?,
        added_date: from_millis(row.get("added_date")),
        error_kind: error_kind
            .map(|k| k.parse::<FailureKind>())
            .transpose()
            .map_err(StoreError::Corrupt)?,
    })
}

#[async_trait]
impl StatusStore for SqliteStatusStore {
    async fn get(&self, filename: &str) -> Result<Option<DocumentRecord>, StoreError> {
        let row = sqlx::query(
            "SELECT filename, status, added_date, error_kind FROM documents WHERE filename = ?",
        )
        .bind(filename)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_record).transpose()
    }

    async fn upsert(&self, record: &DocumentRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO documents (filename, status, added_date, error_kind)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(filename) DO UPDATE SET
                status = excluded.status,
                added_date = excluded.added_date,
                error_kind = excluded.error_kind
            "#,
        )
        .bind(&record.filename)
        .bind(record.status.as_str())
        .bind(to_millis(&record.added_date))
        .bind(record.error_kind.map(|k| k.as_str()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn claim(
        &self,
        filename: &str,
        expected: Option<DocumentStatus>,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        // Each branch is a single statement, so the condition and the write
        // see the same row.
        let indexing = DocumentStatus::Indexing.as_str();
        let result = match expected {
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO documents (filename, status, added_date, error_kind)
                    VALUES (?, ?, ?, NULL)
                    ON CONFLICT(filename) DO UPDATE SET
                        status = excluded.status,
                        added_date = excluded.added_date,
                        error_kind = NULL
                    WHERE documents.status <> excluded.status OR documents.added_date < ?
                    "#,
                )
                .bind(filename)
                .bind(indexing)
                .bind(to_millis(&now))
                .bind(to_millis(&stale_before))
                .execute(&self.pool)
                .await?
            }
            Some(DocumentStatus::Absent) => {
                sqlx::query(
                    r#"
                    INSERT INTO documents (filename, status, added_date, error_kind)
                    VALUES (?, ?, ?, NULL)
                    ON CONFLICT(filename) DO NOTHING
                    "#,
                )
                .bind(filename)
                .bind(indexing)
                .bind(to_millis(&now))
                .execute(&self.pool)
                .await?
            }
            Some(seen) => {
                sqlx::query(
                    r#"
                    UPDATE documents
                    SET status = ?, added_date = ?, error_kind = NULL
                    WHERE filename = ?
                      AND status = ?
                      AND (status <> ? OR added_date < ?)
                    "#,
                )
                .bind(indexing)
                .bind(to_millis(&now))
                .bind(filename)
                .bind(seen.as_str())
                .bind(indexing)
                .bind(to_millis(&stale_before))
                .execute(&self.pool)
                .await?
            }
        };

        Ok(result.rows_affected() == 1)
    }

    async fn list(&self) -> Result<Vec<DocumentRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT filename, status, added_date, error_kind FROM documents ORDER BY added_date DESC, filename ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_record).collect()
    }

    async fn delete(&self, filename: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM documents WHERE filename = ?")
            .bind(filename)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
