use anyhow::Result;
use sqlx::SqlitePool;
use tracing::info;

/// Creates the status table, the full-text index and the search history
/// table. Safe to run on every startup.
///
/// Returns `true` when the full-text index was created by this call.
pub async fn run_migrations(pool: &SqlitePool) -> Result<bool> {
    // Status store: one row per filename
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            filename TEXT PRIMARY KEY,
            status TEXT NOT NULL,
            added_date INTEGER NOT NULL,
            error_kind TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS search_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            query TEXT NOT NULL,
            origin TEXT,
            timestamp INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // FTS5 CREATE is not idempotent natively, so we check first
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='documents_fts'",
    )
    .fetch_one(pool)
    .await?;

    if fts_exists {
        info!("search index 'documents_fts' already exists");
    } else {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE documents_fts USING fts5(
                filename UNINDEXED,
                content,
                added_date UNINDEXED,
                tokenize = 'unicode61 remove_diacritics 2'
            )
            "#,
        )
        .execute(pool)
        .await?;
        info!("search index 'documents_fts' created");
    }

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_documents_added_date ON documents(added_date DESC)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_search_history_timestamp ON search_history(timestamp DESC)",
    )
    .execute(pool)
    .await?;

    Ok(!fts_exists)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let tmp = tempfile::TempDir::new().unwrap();
        let pool = db::connect_path(&tmp.path().join("t.sqlite")).await.unwrap();

        assert!(run_migrations(&pool).await.unwrap());
        assert!(!run_migrations(&pool).await.unwrap());

        let tables: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE name IN ('documents', 'documents_fts', 'search_history')",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(tables, 3);
    }
}
