//! Full-text search index over extracted document text.
//!
//! Documents are keyed by filename, so writing the same filename twice
//! replaces the earlier entry. The SQLite implementation uses an FTS5
//! table (`documents_fts`) with `bm25` ranking and `highlight()` markers;
//! the markers are cut into scored fragments by [`highlight_fragments`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use crate::error::IndexError;
use crate::models::{from_millis, to_millis};

/// Highlight request parameters.
#[derive(Debug, Clone)]
pub struct HighlightOptions {
    pub pre_tag: String,
    pub post_tag: String,
    /// Approximate visible characters per fragment.
    pub fragment_size: usize,
    /// Maximum fragments returned per hit.
    pub fragment_count: usize,
}

impl Default for HighlightOptions {
    fn default() -> Self {
        Self {
            pre_tag: "<mark>".to_string(),
            post_tag: "</mark>".to_string(),
            fragment_size: 150,
            fragment_count: 5,
        }
    }
}

/// A ranked match query against the `content` field.
#[derive(Debug, Clone)]
pub struct IndexQuery<'a> {
    pub text: &'a str,
    pub limit: i64,
    pub highlight: &'a HighlightOptions,
}

/// One hit as returned by the engine, best first.
#[derive(Debug, Clone)]
pub struct IndexHit {
    pub filename: String,
    pub added_date: DateTime<Utc>,
    pub score: f64,
    pub content: String,
    /// Highlighted fragments, highest scoring first. May be empty.
    pub fragments: Vec<String>,
}

/// A stored index document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedDocument {
    pub filename: String,
    pub content: String,
    pub added_date: DateTime<Utc>,
}

#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Inserts or replaces the document for `filename`.
    async fn upsert(
        &self,
        filename: &str,
        content: &str,
        added_date: DateTime<Utc>,
    ) -> Result<(), IndexError>;

    /// Removes the document. A missing document counts as removed.
    async fn delete(&self, filename: &str) -> Result<(), IndexError>;

    async fn get(&self, filename: &str) -> Result<Option<IndexedDocument>, IndexError>;

    /// Relevance-ranked match with highlighting.
    async fn query(&self, query: &IndexQuery<'_>) -> Result<Vec<IndexHit>, IndexError>;
}

/// FTS5-backed index.
pub struct SqliteIndex {
    pool: SqlitePool,
}

impl SqliteIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SearchIndex for SqliteIndex {
    async fn upsert(
        &self,
        filename: &str,
        content: &str,
        added_date: DateTime<Utc>,
    ) -> Result<(), IndexError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM documents_fts WHERE filename = ?")
            .bind(filename)
            .execute(&mut *tx)
            .await?;

        sqlx::query("INSERT INTO documents_fts (filename, content, added_date) VALUES (?, ?, ?)")
            .bind(filename)
            .bind(content)
            .bind(to_millis(&added_date))
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn delete(&self, filename: &str) -> Result<(), IndexError> {
        sqlx::query("DELETE FROM documents_fts WHERE filename = ?")
            .bind(filename)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get(&self, filename: &str) -> Result<Option<IndexedDocument>, IndexError> {
        let row = sqlx::query(
            "SELECT filename, content, added_date FROM documents_fts WHERE filename = ? LIMIT 1",
        )
        .bind(filename)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| IndexedDocument {
            filename: row.get("filename"),
            content: row.get("content"),
            added_date: from_millis(row.get("added_date")),
        }))
    }

    async fn query(&self, query: &IndexQuery<'_>) -> Result<Vec<IndexHit>, IndexError> {
        let expression = match match_expression(query.text) {
            Some(expr) => expr,
            None => return Ok(Vec::new()),
        };
        let opts = query.highlight;

        let rows = sqlx::query(
            r#"
            SELECT filename, added_date, content,
                   highlight(documents_fts, 1, ?, ?) AS marked,
                   bm25(documents_fts) AS rank
            FROM documents_fts
            WHERE documents_fts MATCH ?
            ORDER BY rank
            LIMIT ?
            "#,
        )
        .bind(&opts.pre_tag)
        .bind(&opts.post_tag)
        .bind(&expression)
        .bind(query.limit)
        .fetch_all(&self.pool)
        .await?;

        let hits = rows
            .iter()
            .map(|row| {
                let rank: f64 = row.get("rank");
                let marked: String = row.get("marked");
                IndexHit {
                    filename: row.get("filename"),
                    added_date: from_millis(row.get("added_date")),
                    score: -rank, // negate so higher = better
                    content: row.get("content"),
                    fragments: highlight_fragments(&marked, opts),
                }
            })
            .collect();

        Ok(hits)
    }
}

/// Turns free text into an FTS5 expression matching any of its terms.
///
/// Every term is quoted, so operator characters in user input never reach
/// the FTS5 query parser. Returns `None` when nothing searchable remains.
pub fn match_expression(text: &str) -> Option<String> {
    let terms: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"", t))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}

struct Fragment {
    text: String,
    hits: usize,
}

/// A whitespace-delimited word with its markers left inline.
#[derive(Default)]
struct MarkedWord {
    text: String,
    visible: usize,
    opens: usize,
    closes: usize,
}

/// Splits marker-annotated text into words. Markers are located before
/// any whitespace split, so tags that contain spaces stay whole.
fn marked_words(marked: &str, pre: &str, post: &str) -> Vec<MarkedWord> {
    let mut words = Vec::new();
    let mut word = MarkedWord::default();
    let mut depth = 0usize;
    let mut rest = marked;

    while let Some(c) = rest.chars().next() {
        // With identical tags the open/close role follows the nesting depth.
        let tag = if depth > 0 && !post.is_empty() && rest.starts_with(post) {
            depth -= 1;
            word.closes += 1;
            Some(post)
        } else if !pre.is_empty() && rest.starts_with(pre) {
            depth += 1;
            word.opens += 1;
            Some(pre)
        } else {
            None
        };

        if let Some(tag) = tag {
            word.text.push_str(tag);
            rest = &rest[tag.len()..];
            continue;
        }

        if c.is_whitespace() {
            if !word.text.is_empty() {
                words.push(std::mem::take(&mut word));
            }
        } else {
            word.text.push(c);
            word.visible += 1;
        }
        rest = &rest[c.len_utf8()..];
    }
    if !word.text.is_empty() {
        words.push(word);
    }
    words
}

/// Cuts marker-annotated text into fragments of roughly
/// `fragment_size` visible characters on whitespace boundaries.
///
/// A marker pair is never split: a fragment that ends inside a highlight
/// is closed with the post tag and the next one reopens it. Only fragments
/// containing a highlight are kept, ordered by highlight count (document
/// order on ties), at most `fragment_count` of them.
pub fn highlight_fragments(marked: &str, opts: &HighlightOptions) -> Vec<String> {
    let pre = opts.pre_tag.as_str();
    let post = opts.post_tag.as_str();

    let mut fragments: Vec<Fragment> = Vec::new();
    let mut text = String::new();
    let mut visible = 0usize;
    let mut hits = 0usize;
    let mut depth = 0isize;

    for word in marked_words(marked, pre, post) {
        if visible > 0 && visible + 1 + word.visible > opts.fragment_size {
            if depth > 0 {
                text.push_str(post);
            }
            fragments.push(Fragment {
                text: std::mem::take(&mut text),
                hits,
            });
            hits = 0;
            visible = 0;
            if depth > 0 {
                text.push_str(pre);
            }
        }

        if visible > 0 {
            text.push(' ');
            visible += 1;
        }
        text.push_str(&word.text);
        visible += word.visible;

        hits += word.opens;
        depth += word.opens as isize - word.closes as isize;
    }
    if !text.is_empty() {
        fragments.push(Fragment { text, hits });
    }

    fragments.retain(|f| f.hits > 0);
    // Stable: equal counts keep document order.
    fragments.sort_by(|a, b| b.hits.cmp(&a.hits));
    fragments
        .into_iter()
        .take(opts.fragment_count)
        .map(|f| f.text)
        .collect()
}
