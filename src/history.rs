//! Append-only log of issued queries.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::error::StoreError;
use crate::models::{from_millis, to_millis, SearchHistoryEntry};

#[async_trait]
pub trait SearchHistory: Send + Sync {
    async fn append(&self, entry: &SearchHistoryEntry) -> Result<(), StoreError>;

    /// Up to `limit` entries, most recent first.
    async fn recent(&self, limit: i64) -> Result<Vec<SearchHistoryEntry>, StoreError>;
}

pub struct SqliteSearchHistory {
    pool: SqlitePool,
}

impl SqliteSearchHistory {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SearchHistory for SqliteSearchHistory {
    async fn append(&self, entry: &SearchHistoryEntry) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO search_history (query, origin, timestamp) VALUES (?, ?, ?)")
            .bind(&entry.query)
            .bind(&entry.origin)
            .bind(to_millis(&entry.timestamp))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn recent(&self, limit: i64) -> Result<Vec<SearchHistoryEntry>, StoreError> {
        let rows = sqlx::query(
            "SELECT query, origin, timestamp FROM search_history \
             ORDER BY timestamp DESC, id DESC LIMIT ?",
        )
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| SearchHistoryEntry {
                query: row.get("query"),
                origin: row.get("origin"),
                timestamp: from_millis(row.get("timestamp")),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, migrate};
    use chrono::Duration;

    #[tokio::test]
    async fn recent_is_newest_first_and_limited() {
        let tmp = tempfile::TempDir::new().unwrap();
        let pool = db::connect_path(&tmp.path().join("h.sqlite")).await.unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        let history = SqliteSearchHistory::new(pool);

        let base = crate::models::now_millis();
        for (i, q) in ["invoice", "contract", "memo"].iter().enumerate() {
            history
                .append(&SearchHistoryEntry {
                    query: q.to_string(),
                    origin: (i == 1).then(|| "cli".to_string()),
                    timestamp: base + Duration::seconds(i as i64),
                })
                .await
                .unwrap();
        }

        let recent = history.recent(2).await.unwrap();
        let queries: Vec<&str> = recent.iter().map(|e| e.query.as_str()).collect();
        assert_eq!(queries, vec!["memo", "contract"]);
        assert_eq!(recent[1].origin.as_deref(), Some("cli"));
        assert_eq!(recent[0].timestamp, base + Duration::seconds(2));
    }
}
