//! Periodic scan of the watched directory.
//!
//! Each cycle lists the top-level files, keeps those with a registered
//! extractor, and hands every candidate to a bounded pool of workers. A file
//! is claimed in the status store before its worker is spawned, so two
//! overlapping cycles (or two processes) never run the same file at once.

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use globset::{Glob, GlobSet, GlobSetBuilder};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::config::{RetryPolicy, WatchConfig};
use crate::ingest::{Ingestor, Outcome};
use crate::models::{DocumentRecord, DocumentStatus};

#[derive(Debug, Clone)]
pub struct ScanSettings {
    pub interval: Duration,
    pub workers: usize,
    pub retry: RetryPolicy,
    pub exclude: GlobSet,
}

impl ScanSettings {
    pub fn from_config(watch: &WatchConfig) -> Result<Self, globset::Error> {
        Ok(Self {
            interval: watch.interval(),
            workers: watch.workers.max(1),
            retry: watch.retry,
            exclude: build_globset(&watch.exclude_globs)?,
        })
    }
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            workers: 4,
            retry: RetryPolicy::Always,
            exclude: GlobSet::empty(),
        }
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet, globset::Error> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    builder.build()
}

/// A supported file found in the watched directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub filename: String,
    pub path: PathBuf,
}

/// Per-cycle counters, logged at the end of every cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Supported files present in the directory.
    pub seen: usize,
    /// Already `indexed`, or `error` and excluded by the retry policy.
    pub skipped: usize,
    /// Held by another live attempt, or changed by another scanner since
    /// it was read.
    pub busy: usize,
    pub indexed: usize,
    pub failed: usize,
    pub store_errors: usize,
}

/// Whether a file with this status row should be attempted this cycle.
pub fn is_candidate(record: Option<&DocumentRecord>, retry: RetryPolicy) -> bool {
    let Some(record) = record else {
        return true;
    };
    match record.status {
        DocumentStatus::Absent | DocumentStatus::Indexing => true,
        DocumentStatus::Indexed => false,
        DocumentStatus::Error => match retry {
            RetryPolicy::Always => true,
            RetryPolicy::Transient => record.error_kind.map_or(true, |k| k.is_retryable()),
        },
    }
}

pub struct Scanner {
    ingestor: Arc<Ingestor>,
    settings: ScanSettings,
}

impl Scanner {
    pub fn new(ingestor: Arc<Ingestor>, settings: ScanSettings) -> Self {
        Self { ingestor, settings }
    }

    pub fn watch_dir(&self) -> &Path {
        self.ingestor.watch_dir()
    }

    /// Supported top-level files, sorted by name. Subdirectories (the
    /// archive among them) are not descended into.
    pub fn enumerate(&self) -> io::Result<Vec<SourceFile>> {
        let root = self.watch_dir();
        if !root.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("watch directory does not exist: {}", root.display()),
            ));
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(root).min_depth(1).max_depth(1) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(filename) = entry.file_name().to_str() else {
                warn!(path = %entry.path().display(), "skipping non UTF-8 filename");
                continue;
            };
            if self.settings.exclude.is_match(filename) {
                continue;
            }
            if !self.ingestor.extractors().supports(entry.path()) {
                continue;
            }
            files.push(SourceFile {
                filename: filename.to_string(),
                path: entry.path().to_path_buf(),
            });
        }

        files.sort_by(|a, b| a.filename.cmp(&b.filename));
        Ok(files)
    }

    /// One full pass over the directory. Returns once every attempt started
    /// in this cycle has finished.
    ///
    /// Only a failure to list the directory is an `Err`; per-file problems
    /// are counted in the report.
    pub async fn run_cycle(&self) -> io::Result<CycleReport> {
        let files = self.enumerate()?;
        let mut report = CycleReport {
            seen: files.len(),
            ..Default::default()
        };

        let permits = Arc::new(Semaphore::new(self.settings.workers));
        let mut workers = JoinSet::new();

        for file in files {
            let record = match self.ingestor.status().get(&file.filename).await {
                Ok(record) => record,
                Err(e) => {
                    error!(filename = %file.filename, error = %e, "status lookup failed");
                    report.store_errors += 1;
                    continue;
                }
            };
            if !is_candidate(record.as_ref(), self.settings.retry) {
                report.skipped += 1;
                continue;
            }
            let seen = record.map_or(DocumentStatus::Absent, |r| r.status);

            let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                break;
            };

            match self.ingestor.claim_if(&file.filename, seen).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!(filename = %file.filename, "in flight elsewhere");
                    report.busy += 1;
                    continue;
                }
                Err(e) => {
                    error!(filename = %file.filename, error = %e, "claim failed");
                    report.store_errors += 1;
                    continue;
                }
            }

            let ingestor = Arc::clone(&self.ingestor);
            workers.spawn(async move {
                let _permit = permit;
                let result = ingestor.process(&file.path, &file.filename).await;
                (file.filename, result)
            });
        }

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok((_, Ok(Outcome::Indexed { .. }))) => report.indexed += 1,
                Ok((_, Ok(Outcome::Failed(_)))) => report.failed += 1,
                Ok((filename, Err(e))) => {
                    error!(%filename, error = %e, "status store failed mid-attempt");
                    report.store_errors += 1;
                }
                Err(e) => {
                    error!(error = %e, "worker aborted");
                    report.failed += 1;
                }
            }
        }

        info!(
            seen = report.seen,
            skipped = report.skipped,
            busy = report.busy,
            indexed = report.indexed,
            failed = report.failed,
            store_errors = report.store_errors,
            "scan cycle complete"
        );
        Ok(report)
    }

    /// Runs a cycle immediately and then every interval until `shutdown`
    /// resolves. A cycle in progress is allowed to finish.
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            dir = %self.watch_dir().display(),
            interval_secs = self.settings.interval.as_secs(),
            workers = self.settings.workers,
            "watching"
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("scanner stopping");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.run_cycle().await {
                        error!(dir = %self.watch_dir().display(), error = %e, "scan cycle failed");
                    }
                }
            }
        }
    }
}
