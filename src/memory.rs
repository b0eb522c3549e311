//! In-memory [`StatusStore`] and [`SearchIndex`] implementations.
//!
//! Used as substitutes for the SQLite backends in tests. Both can be
//! switched into an "unavailable" state to exercise failure paths, and the
//! index counts the queries it receives.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{IndexError, StoreError};
use crate::index::{highlight_fragments, IndexHit, IndexQuery, IndexedDocument, SearchIndex};
use crate::models::{DocumentRecord, DocumentStatus};
use crate::status::StatusStore;

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

/// Status rows in a `HashMap`. Writes that skip a lifecycle step are
/// refused, so tests catch an out-of-order pipeline.
#[derive(Default)]
pub struct InMemoryStatusStore {
    rows: RwLock<HashMap<String, DocumentRecord>>,
    unavailable: AtomicBool,
    /// Every status written, in order, per filename.
    history: RwLock<HashMap<String, Vec<DocumentStatus>>>,
}

impl InMemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Statuses written for `filename` since creation, oldest first.
    pub fn transitions(&self, filename: &str) -> Vec<DocumentStatus> {
        read(&self.history).get(filename).cloned().unwrap_or_default()
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Corrupt("store marked unavailable".to_string()));
        }
        Ok(())
    }

    fn record_transition(&self, filename: &str, status: DocumentStatus) {
        write(&self.history)
            .entry(filename.to_string())
            .or_default()
            .push(status);
    }
}

#[async_trait]
impl StatusStore for InMemoryStatusStore {
    async fn get(&self, filename: &str) -> Result<Option<DocumentRecord>, StoreError> {
        self.check()?;
        Ok(read(&self.rows).get(filename).cloned())
    }

    async fn upsert(&self, record: &DocumentRecord) -> Result<(), StoreError> {
        self.check()?;
        let mut rows = write(&self.rows);
        let from = rows
            .get(&record.filename)
            .map_or(DocumentStatus::Absent, |r| r.status);
        if !from.can_transition_to(record.status) {
            return Err(StoreError::IllegalTransition {
                filename: record.filename.clone(),
                from,
                to: record.status,
            });
        }
        rows.insert(record.filename.clone(), record.clone());
        drop(rows);
        self.record_transition(&record.filename, record.status);
        Ok(())
    }

    async fn claim(
        &self,
        filename: &str,
        expected: Option<DocumentStatus>,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.check()?;
        let mut rows = write(&self.rows);
        let existing = rows.get(filename);
        let live = existing.is_some_and(|r| {
            r.status == DocumentStatus::Indexing && r.added_date >= stale_before
        });
        let current = existing.map_or(DocumentStatus::Absent, |r| r.status);
        if live || expected.is_some_and(|seen| seen != current) {
            return Ok(false);
        }
        rows.insert(
            filename.to_string(),
            DocumentRecord::new(filename, DocumentStatus::Indexing, now),
        );
        drop(rows);
        self.record_transition(filename, DocumentStatus::Indexing);
        Ok(true)
    }

    async fn list(&self) -> Result<Vec<DocumentRecord>, StoreError> {
        self.check()?;
        let mut rows: Vec<DocumentRecord> = read(&self.rows).values().cloned().collect();
        rows.sort_by(|a, b| {
            b.added_date
                .cmp(&a.added_date)
                .then_with(|| a.filename.cmp(&b.filename))
        });
        Ok(rows)
    }

    async fn delete(&self, filename: &str) -> Result<(), StoreError> {
        self.check()?;
        write(&self.rows).remove(filename);
        Ok(())
    }
}

/// Term-count index for tests. Scores are the number of query-term
/// occurrences; highlighting wraps whole matching words.
#[derive(Default)]
pub struct InMemoryIndex {
    docs: RwLock<HashMap<String, IndexedDocument>>,
    unavailable: AtomicBool,
    queries: AtomicUsize,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of `query` calls received.
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        read(&self.docs).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check(&self) -> Result<(), IndexError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(IndexError::Rejected("index marked unavailable".to_string()));
        }
        Ok(())
    }
}

fn word_key(word: &str) -> String {
    word.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase()
}

#[async_trait]
impl SearchIndex for InMemoryIndex {
    async fn upsert(
        &self,
        filename: &str,
        content: &str,
        added_date: DateTime<Utc>,
    ) -> Result<(), IndexError> {
        self.check()?;
        write(&self.docs).insert(
            filename.to_string(),
            IndexedDocument {
                filename: filename.to_string(),
                content: content.to_string(),
                added_date,
            },
        );
        Ok(())
    }

    async fn delete(&self, filename: &str) -> Result<(), IndexError> {
        self.check()?;
        write(&self.docs).remove(filename);
        Ok(())
    }

    async fn get(&self, filename: &str) -> Result<Option<IndexedDocument>, IndexError> {
        self.check()?;
        Ok(read(&self.docs).get(filename).cloned())
    }

    async fn query(&self, query: &IndexQuery<'_>) -> Result<Vec<IndexHit>, IndexError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.check()?;

        let terms: Vec<String> = query
            .text
            .split_whitespace()
            .map(word_key)
            .filter(|t| !t.is_empty())
            .collect();
        let opts = query.highlight;

        let mut hits: Vec<IndexHit> = read(&self.docs)
            .values()
            .filter_map(|doc| {
                let mut score = 0usize;
                let marked: Vec<String> = doc
                    .content
                    .split_whitespace()
                    .map(|word| {
                        if terms.contains(&word_key(word)) {
                            score += 1;
                            format!("{}{}{}", opts.pre_tag, word, opts.post_tag)
                        } else {
                            word.to_string()
                        }
                    })
                    .collect();
                (score > 0).then(|| IndexHit {
                    filename: doc.filename.clone(),
                    added_date: doc.added_date,
                    score: score as f64,
                    content: doc.content.clone(),
                    fragments: highlight_fragments(&marked.join(" "), opts),
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.filename.cmp(&b.filename))
        });
        hits.truncate(query.limit.max(0) as usize);
        Ok(hits)
    }
}
