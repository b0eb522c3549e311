//! Per-document processing and the caller-facing document operations.
//!
//! One attempt runs claim → extract → index → record → archive. The claim
//! is taken by the caller (scanner or reindex) before the attempt starts;
//! [`Ingestor::process`] always leaves the row `indexed` or `error`, unless
//! the status store itself fails, in which case the claim goes stale and a
//! later cycle takes the file over.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, info, warn};

use crate::archive::Archiver;
use crate::error::{ExtractError, FailureKind, OperationError, StoreError};
use crate::extract::ExtractorRegistry;
use crate::index::SearchIndex;
use crate::models::{now_millis, DocumentRecord, DocumentStatus};
use crate::status::StatusStore;

const DEFAULT_EXTRACTION_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_STALE_CLAIM: Duration = Duration::from_secs(300);

/// Result of one processing attempt that reached a resting state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Content is searchable. `archived_to` is the new location when the
    /// source was moved.
    Indexed { archived_to: Option<PathBuf> },
    /// The row was marked `error` with this kind.
    Failed(FailureKind),
}

pub struct Ingestor {
    status: Arc<dyn StatusStore>,
    index: Arc<dyn SearchIndex>,
    extractors: Arc<ExtractorRegistry>,
    archiver: Archiver,
    watch_dir: PathBuf,
    extraction_timeout: Duration,
    stale_claim: Duration,
}

impl Ingestor {
    pub fn new(
        status: Arc<dyn StatusStore>,
        index: Arc<dyn SearchIndex>,
        extractors: Arc<ExtractorRegistry>,
        archiver: Archiver,
        watch_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            status,
            index,
            extractors,
            archiver,
            watch_dir: watch_dir.into(),
            extraction_timeout: DEFAULT_EXTRACTION_TIMEOUT,
            stale_claim: DEFAULT_STALE_CLAIM,
        }
    }

    pub fn with_extraction_timeout(mut self, timeout: Duration) -> Self {
        self.extraction_timeout = timeout;
        self
    }

    /// Age after which an `indexing` row is considered abandoned.
    pub fn with_stale_claim(mut self, age: Duration) -> Self {
        self.stale_claim = age;
        self
    }

    pub fn status(&self) -> &Arc<dyn StatusStore> {
        &self.status
    }

    pub fn extractors(&self) -> &ExtractorRegistry {
        &self.extractors
    }

    pub fn watch_dir(&self) -> &Path {
        &self.watch_dir
    }

    /// Takes ownership of the next attempt for `filename`, whatever its
    /// resting status. `false` means a live attempt already holds it.
    pub async fn claim(&self, filename: &str) -> Result<bool, StoreError> {
        self.claim_with(filename, None).await
    }

    /// Like [`claim`](Self::claim), but only while the row is still in the
    /// `seen` status. `false` also covers a row that changed since it was
    /// read, such as a file another scanner just indexed.
    pub async fn claim_if(
        &self,
        filename: &str,
        seen: DocumentStatus,
    ) -> Result<bool, StoreError> {
        self.claim_with(filename, Some(seen)).await
    }

    async fn claim_with(
        &self,
        filename: &str,
        expected: Option<DocumentStatus>,
    ) -> Result<bool, StoreError> {
        let now = now_millis();
        let stale_before = stale_threshold(now, self.stale_claim);
        let claimed = self
            .status
            .claim(filename, expected, now, stale_before)
            .await?;
        if claimed {
            debug!(filename, "claimed");
        }
        Ok(claimed)
    }

    /// Runs one attempt on a file this caller has claimed.
    ///
    /// Extraction and index failures are recorded on the row and returned
    /// as [`Outcome::Failed`]. Only a status store failure is an `Err`.
    pub async fn process(&self, path: &Path, filename: &str) -> Result<Outcome, StoreError> {
        let started = Instant::now();

        let text = match self.extract(path).await {
            Ok(text) => text,
            Err(e) => {
                warn!(filename, kind = %e.kind(), error = %e, "extraction failed");
                return self.fail(filename, e.kind()).await;
            }
        };

        let added_date = now_millis();
        if let Err(e) = self.index.upsert(filename, &text, added_date).await {
            warn!(filename, error = %e, "index write failed");
            return self.fail(filename, FailureKind::IndexWrite).await;
        }

        self.status
            .upsert(&DocumentRecord::new(
                filename,
                DocumentStatus::Indexed,
                added_date,
            ))
            .await?;
        info!(
            filename,
            chars = text.chars().count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "indexed"
        );

        let archived_to = match self.archiver.archive(path) {
            Ok(dest) => dest,
            Err(e) => {
                warn!(filename, error = %e, "archive move failed, file left in place");
                None
            }
        };
        Ok(Outcome::Indexed { archived_to })
    }

    /// Extracts on the blocking pool, bounded by the extraction timeout.
    /// A timed-out decoder keeps running detached; its result is dropped.
    async fn extract(&self, path: &Path) -> Result<String, ExtractError> {
        let registry = Arc::clone(&self.extractors);
        let owned = path.to_path_buf();
        let task = tokio::task::spawn_blocking(move || registry.extract_file(&owned));

        match tokio::time::timeout(self.extraction_timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(_join)) => Err(ExtractError::Panicked),
            Err(_elapsed) => Err(ExtractError::Timeout(self.extraction_timeout)),
        }
    }

    async fn fail(&self, filename: &str, kind: FailureKind) -> Result<Outcome, StoreError> {
        self.status
            .upsert(&DocumentRecord::failed(filename, kind, now_millis()))
            .await?;
        Ok(Outcome::Failed(kind))
    }

    pub async fn list_documents(&self) -> Result<Vec<DocumentRecord>, StoreError> {
        self.status.list().await
    }

    /// Removes every trace of `filename`: the source file (watched or
    /// archived copy), the index document and the status row. Repeating a
    /// delete is a no-op.
    ///
    /// The file is claimed first, so a live attempt makes the delete fail
    /// with [`OperationError::InFlight`] instead of racing it.
    pub async fn delete_document(&self, filename: &str) -> Result<(), OperationError> {
        validate_filename(filename)?;
        if !self.claim(filename).await? {
            return Err(OperationError::InFlight(filename.to_string()));
        }

        for dir in self.source_dirs() {
            remove_if_exists(&dir.join(filename))?;
        }
        self.index.delete(filename).await?;
        self.status.delete(filename).await?;

        info!(filename, "document deleted");
        Ok(())
    }

    /// Forces a fresh attempt on `filename`, whatever its current resting
    /// status. The source is looked up in the watched directory first,
    /// then in the archive.
    pub async fn reindex_document(&self, filename: &str) -> Result<Outcome, OperationError> {
        validate_filename(filename)?;

        let path = self
            .locate_source(filename)
            .ok_or_else(|| OperationError::SourceMissing(filename.to_string()))?;
        if !self.extractors.supports(&path) {
            return Err(OperationError::Unsupported(filename.to_string()));
        }
        if !self.claim(filename).await? {
            return Err(OperationError::InFlight(filename.to_string()));
        }

        info!(filename, path = %path.display(), "reindex");
        Ok(self.process(&path, filename).await?)
    }

    /// Current location of the source file for `filename`, if any.
    pub fn locate_source(&self, filename: &str) -> Option<PathBuf> {
        self.source_dirs()
            .into_iter()
            .map(|dir| dir.join(filename))
            .find(|p| p.is_file())
    }

    fn source_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = vec![self.watch_dir.clone()];
        if let Some(archive) = self.archiver.archive_dir() {
            if archive != self.watch_dir {
                dirs.push(archive.to_path_buf());
            }
        }
        dirs
    }
}

fn stale_threshold(now: DateTime<Utc>, age: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(age)
        .ok()
        .and_then(|delta| now.checked_sub_signed(delta))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Filenames are bare names inside the watched directory.
pub fn validate_filename(filename: &str) -> Result<(), OperationError> {
    let bad = filename.is_empty()
        || filename == "."
        || filename == ".."
        || filename.contains(['/', '\\', '\0']);
    if bad {
        return Err(OperationError::InvalidFilename(filename.to_string()));
    }
    Ok(())
}

fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path.display(), "source removed");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ArchiveMode;
    use crate::extract::Extractor;
    use crate::memory::{InMemoryIndex, InMemoryStatusStore};
    use tempfile::TempDir;

    /// Treats file bytes as UTF-8 text.
    struct PlainText;

    impl Extractor for PlainText {
        fn format(&self) -> &'static str {
            "plain"
        }

        fn extract(&self, bytes: &[u8]) -> Result<String, ExtractError> {
            Ok(String::from_utf8_lossy(bytes).into_owned())
        }
    }

    struct Sleepy;

    impl Extractor for Sleepy {
        fn format(&self) -> &'static str {
            "sleepy"
        }

        fn extract(&self, _bytes: &[u8]) -> Result<String, ExtractError> {
            std::thread::sleep(Duration::from_millis(500));
            Ok("late".to_string())
        }
    }

    struct Fixture {
        tmp: TempDir,
        status: Arc<InMemoryStatusStore>,
        index: Arc<InMemoryIndex>,
        ingestor: Ingestor,
    }

    impl Fixture {
        fn new(mode: fn(&Path) -> ArchiveMode) -> Self {
            let tmp = TempDir::new().unwrap();
            let status = Arc::new(InMemoryStatusStore::new());
            let index = Arc::new(InMemoryIndex::new());
            let mut registry = ExtractorRegistry::new(1024 * 1024);
            registry.register("pdf", Arc::new(PlainText));
            registry.register("slow", Arc::new(Sleepy));
            let ingestor = Ingestor::new(
                status.clone(),
                index.clone(),
                Arc::new(registry),
                Archiver::new(mode(tmp.path())),
                tmp.path(),
            )
            .with_extraction_timeout(Duration::from_millis(50));
            Self {
                tmp,
                status,
                index,
                ingestor,
            }
        }

        fn write(&self, name: &str, content: &[u8]) -> PathBuf {
            let path = self.tmp.path().join(name);
            std::fs::write(&path, content).unwrap();
            path
        }
    }

    fn archive_mode(dir: &Path) -> ArchiveMode {
        ArchiveMode::Move(dir.join("indexed"))
    }

    fn keep_mode(_dir: &Path) -> ArchiveMode {
        ArchiveMode::Keep
    }

    #[tokio::test]
    async fn success_indexes_records_and_archives() {
        let fx = Fixture::new(archive_mode);
        let path = fx.write("report.pdf", b"quarterly invoice totals");

        assert!(fx.ingestor.claim("report.pdf").await.unwrap());
        let outcome = fx.ingestor.process(&path, "report.pdf").await.unwrap();

        let archived = fx.tmp.path().join("indexed").join("report.pdf");
        assert_eq!(
            outcome,
            Outcome::Indexed {
                archived_to: Some(archived.clone())
            }
        );
        assert!(archived.exists());
        assert!(!path.exists());

        let doc = fx.index.get("report.pdf").await.unwrap().unwrap();
        assert_eq!(doc.content, "quarterly invoice totals");
        let row = fx.status.get("report.pdf").await.unwrap().unwrap();
        assert_eq!(row.status, DocumentStatus::Indexed);
        assert_eq!(row.added_date, doc.added_date);
        assert_eq!(
            fx.status.transitions("report.pdf"),
            vec![DocumentStatus::Indexing, DocumentStatus::Indexed]
        );
    }

    #[tokio::test]
    async fn empty_file_is_recorded_as_error() {
        let fx = Fixture::new(keep_mode);
        let path = fx.write("blank.pdf", b"   \n ");

        fx.ingestor.claim("blank.pdf").await.unwrap();
        let outcome = fx.ingestor.process(&path, "blank.pdf").await.unwrap();

        assert_eq!(outcome, Outcome::Failed(FailureKind::EmptyContent));
        let row = fx.status.get("blank.pdf").await.unwrap().unwrap();
        assert_eq!(row.status, DocumentStatus::Error);
        assert_eq!(row.error_kind, Some(FailureKind::EmptyContent));
        assert!(fx.index.is_empty());
        assert!(path.exists());
    }

    #[tokio::test]
    async fn slow_extraction_times_out() {
        let fx = Fixture::new(keep_mode);
        let path = fx.write("big.slow", b"x");

        fx.ingestor.claim("big.slow").await.unwrap();
        let outcome = fx.ingestor.process(&path, "big.slow").await.unwrap();

        assert_eq!(outcome, Outcome::Failed(FailureKind::ExtractionTimeout));
        assert!(fx.index.is_empty());
    }

    #[tokio::test]
    async fn index_outage_marks_error_and_keeps_source() {
        let fx = Fixture::new(archive_mode);
        let path = fx.write("a.pdf", b"text");
        fx.index.set_unavailable(true);

        fx.ingestor.claim("a.pdf").await.unwrap();
        let outcome = fx.ingestor.process(&path, "a.pdf").await.unwrap();

        assert_eq!(outcome, Outcome::Failed(FailureKind::IndexWrite));
        assert!(path.exists());
    }

    #[tokio::test]
    async fn store_outage_is_fatal_to_the_attempt() {
        let fx = Fixture::new(keep_mode);
        let path = fx.write("a.pdf", b"text");
        fx.ingestor.claim("a.pdf").await.unwrap();
        fx.status.set_unavailable(true);

        assert!(fx.ingestor.process(&path, "a.pdf").await.is_err());
    }

    #[tokio::test]
    async fn second_claim_is_refused_while_in_flight() {
        let fx = Fixture::new(keep_mode);
        assert!(fx.ingestor.claim("a.pdf").await.unwrap());
        assert!(!fx.ingestor.claim("a.pdf").await.unwrap());
    }

    #[tokio::test]
    async fn reindex_finds_archived_source() {
        let fx = Fixture::new(archive_mode);
        let path = fx.write("memo.pdf", b"first draft");
        fx.ingestor.claim("memo.pdf").await.unwrap();
        fx.ingestor.process(&path, "memo.pdf").await.unwrap();

        let outcome = fx.ingestor.reindex_document("memo.pdf").await.unwrap();
        assert_eq!(outcome, Outcome::Indexed { archived_to: None });
        assert_eq!(fx.index.len(), 1);
        assert_eq!(
            fx.status.get("memo.pdf").await.unwrap().unwrap().status,
            DocumentStatus::Indexed
        );
    }

    #[tokio::test]
    async fn reindex_without_source_changes_nothing() {
        let fx = Fixture::new(keep_mode);
        fx.ingestor.claim("gone.pdf").await.unwrap();
        fx.status
            .upsert(&DocumentRecord::new(
                "gone.pdf",
                DocumentStatus::Indexed,
                now_millis(),
            ))
            .await
            .unwrap();

        let err = fx.ingestor.reindex_document("gone.pdf").await.unwrap_err();
        assert!(matches!(err, OperationError::SourceMissing(_)));
        assert_eq!(
            fx.status.transitions("gone.pdf"),
            vec![DocumentStatus::Indexing, DocumentStatus::Indexed]
        );
    }

    #[tokio::test]
    async fn reindex_rejects_in_flight_and_bad_names() {
        let fx = Fixture::new(keep_mode);
        fx.write("busy.pdf", b"text");
        fx.ingestor.claim("busy.pdf").await.unwrap();

        let err = fx.ingestor.reindex_document("busy.pdf").await.unwrap_err();
        assert!(matches!(err, OperationError::InFlight(_)));

        let err = fx.ingestor.reindex_document("../etc.pdf").await.unwrap_err();
        assert!(matches!(err, OperationError::InvalidFilename(_)));

        fx.write("notes.txt", b"text");
        let err = fx.ingestor.reindex_document("notes.txt").await.unwrap_err();
        assert!(matches!(err, OperationError::Unsupported(_)));
    }

    #[tokio::test]
    async fn delete_removes_everything_and_repeats_cleanly() {
        let fx = Fixture::new(archive_mode);
        let path = fx.write("old.pdf", b"obsolete contract");
        fx.ingestor.claim("old.pdf").await.unwrap();
        fx.ingestor.process(&path, "old.pdf").await.unwrap();

        fx.ingestor.delete_document("old.pdf").await.unwrap();
        assert!(fx.status.get("old.pdf").await.unwrap().is_none());
        assert!(fx.index.get("old.pdf").await.unwrap().is_none());
        assert!(fx.ingestor.locate_source("old.pdf").is_none());

        fx.ingestor.delete_document("old.pdf").await.unwrap();
    }

    #[tokio::test]
    async fn delete_refuses_a_file_in_flight() {
        let fx = Fixture::new(keep_mode);
        let path = fx.write("live.pdf", b"contract text");
        assert!(fx.ingestor.claim("live.pdf").await.unwrap());

        let err = fx.ingestor.delete_document("live.pdf").await.unwrap_err();
        assert!(matches!(err, OperationError::InFlight(_)));
        assert!(path.exists());

        // The worker holding the claim finishes; the delete then goes through
        // and nothing comes back.
        fx.ingestor.process(&path, "live.pdf").await.unwrap();
        fx.ingestor.delete_document("live.pdf").await.unwrap();
        assert!(fx.status.get("live.pdf").await.unwrap().is_none());
        assert!(fx.index.get("live.pdf").await.unwrap().is_none());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn claim_if_requires_the_status_that_was_read() {
        let fx = Fixture::new(keep_mode);
        let path = fx.write("seen.pdf", b"text");
        assert!(fx
            .ingestor
            .claim_if("seen.pdf", DocumentStatus::Absent)
            .await
            .unwrap());
        fx.ingestor.process(&path, "seen.pdf").await.unwrap();

        for seen in [DocumentStatus::Absent, DocumentStatus::Error] {
            assert!(!fx.ingestor.claim_if("seen.pdf", seen).await.unwrap());
        }
        assert_eq!(
            fx.status.get("seen.pdf").await.unwrap().unwrap().status,
            DocumentStatus::Indexed
        );
    }

    #[test]
    fn filename_validation() {
        assert!(validate_filename("Report 2024.pdf").is_ok());
        assert!(validate_filename("").is_err());
        assert!(validate_filename("..").is_err());
        assert!(validate_filename("a/b.pdf").is_err());
        assert!(validate_filename("a\\b.pdf").is_err());
    }
}
