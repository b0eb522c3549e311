//! Wiring of the SQLite backends, the pipeline and the query engine from a
//! loaded [`Config`].

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::archive::Archiver;
use crate::config::Config;
use crate::db;
use crate::extract::ExtractorRegistry;
use crate::history::{SearchHistory, SqliteSearchHistory};
use crate::index::SqliteIndex;
use crate::ingest::Ingestor;
use crate::migrate;
use crate::scanner::{ScanSettings, Scanner};
use crate::search::QueryEngine;
use crate::status::SqliteStatusStore;

pub struct App {
    pub ingestor: Arc<Ingestor>,
    pub engine: QueryEngine,
    pub history: Arc<dyn SearchHistory>,
    scan: ScanSettings,
}

impl App {
    /// Opens the database, applies migrations and builds every component.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::run_migrations(&pool).await?;

        let status = Arc::new(SqliteStatusStore::new(pool.clone()));
        let index = Arc::new(SqliteIndex::new(pool.clone()));
        let history: Arc<dyn SearchHistory> = Arc::new(SqliteSearchHistory::new(pool.clone()));
        let extractors = Arc::new(ExtractorRegistry::with_defaults(config.watch.max_file_bytes));

        let ingestor = Ingestor::new(
            status,
            index.clone(),
            extractors,
            Archiver::from_config(&config.watch),
            &config.watch.dir,
        )
        .with_extraction_timeout(config.watch.extraction_timeout())
        .with_stale_claim(config.watch.stale_claim());

        let mut engine = QueryEngine::from_config(index, &config.search);
        if config.search.record_history {
            engine = engine.with_history(history.clone());
        }

        let scan = ScanSettings::from_config(&config.watch)
            .context("Invalid pattern in watch.exclude_globs")?;

        Ok(Self {
            ingestor: Arc::new(ingestor),
            engine,
            history,
            scan,
        })
    }

    pub fn scanner(&self) -> Scanner {
        Scanner::new(Arc::clone(&self.ingestor), self.scan.clone())
    }
}
