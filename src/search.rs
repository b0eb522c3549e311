//! Query engine: full-text query, ranking, snippet construction.
//!
//! The index returns ranked hits with highlighted fragments; this module
//! turns them into [`SearchHit`]s with a short and a full snippet. A hit
//! with no fragments falls back to the leading part of its content.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::SearchConfig;
use crate::error::SearchError;
use crate::history::SearchHistory;
use crate::index::{HighlightOptions, IndexHit, IndexQuery, SearchIndex};
use crate::models::{now_millis, SearchHistoryEntry, SearchHit};

/// Snippet assembly settings.
#[derive(Debug, Clone)]
pub struct SnippetOptions {
    /// Fragments joined into the short snippet.
    pub short_fragments: usize,
    pub separator: String,
    /// Length of the fallback snippet, in characters.
    pub fallback_chars: usize,
    /// Snippet for a document with no text at all.
    pub empty_placeholder: String,
}

impl Default for SnippetOptions {
    fn default() -> Self {
        Self {
            short_fragments: 2,
            separator: " ... ".to_string(),
            fallback_chars: 400,
            empty_placeholder: "(no text)".to_string(),
        }
    }
}

/// One query as issued by a caller.
#[derive(Debug, Clone, Copy, Default)]
pub struct SearchRequest<'a> {
    pub text: &'a str,
    /// Who asked, recorded in the history.
    pub origin: Option<&'a str>,
    /// Overrides the configured result cap.
    pub limit: Option<i64>,
}

impl<'a> SearchRequest<'a> {
    pub fn new(text: &'a str) -> Self {
        Self {
            text,
            ..Default::default()
        }
    }
}

pub struct QueryEngine {
    index: Arc<dyn SearchIndex>,
    highlight: HighlightOptions,
    snippets: SnippetOptions,
    max_results: i64,
    history: Option<Arc<dyn SearchHistory>>,
}

impl QueryEngine {
    pub fn new(index: Arc<dyn SearchIndex>) -> Self {
        Self {
            index,
            highlight: HighlightOptions::default(),
            snippets: SnippetOptions::default(),
            max_results: 15,
            history: None,
        }
    }

    pub fn from_config(index: Arc<dyn SearchIndex>, config: &SearchConfig) -> Self {
        Self {
            index,
            highlight: HighlightOptions {
                pre_tag: config.pre_tag.clone(),
                post_tag: config.post_tag.clone(),
                fragment_size: config.fragment_size,
                fragment_count: config.fragment_count,
            },
            snippets: SnippetOptions {
                short_fragments: config.short_fragments,
                separator: config.fragment_separator.clone(),
                fallback_chars: config.fallback_chars,
                empty_placeholder: config.empty_placeholder.clone(),
            },
            max_results: config.max_results,
            history: None,
        }
    }

    /// Records every non-empty query in `history`.
    pub fn with_history(mut self, history: Arc<dyn SearchHistory>) -> Self {
        self.history = Some(history);
        self
    }

    pub async fn search(&self, text: &str) -> Result<Vec<SearchHit>, SearchError> {
        self.search_with(SearchRequest::new(text)).await
    }

    /// Runs a query. Blank input returns no hits without touching the
    /// index or the history.
    pub async fn search_with(
        &self,
        request: SearchRequest<'_>,
    ) -> Result<Vec<SearchHit>, SearchError> {
        let text = request.text.trim();
        if text.is_empty() {
            return Ok(Vec::new());
        }

        if let Some(history) = &self.history {
            let entry = SearchHistoryEntry {
                query: text.to_string(),
                origin: request.origin.map(str::to_string),
                timestamp: now_millis(),
            };
            if let Err(e) = history.append(&entry).await {
                warn!(error = %e, "search history not recorded");
            }
        }

        let query = IndexQuery {
            text,
            limit: request.limit.unwrap_or(self.max_results).max(1),
            highlight: &self.highlight,
        };
        let hits = self.index.query(&query).await.map_err(|e| {
            warn!(query = text, error = %e, "search failed");
            SearchError::Backend
        })?;
        debug!(query = text, hits = hits.len(), "search");

        Ok(hits
            .into_iter()
            .map(|hit| to_search_hit(hit, &self.snippets))
            .collect())
    }
}

fn to_search_hit(hit: IndexHit, opts: &SnippetOptions) -> SearchHit {
    let (snippet_short, snippet_full) = build_snippets(&hit, opts);
    SearchHit {
        filename: hit.filename,
        added_date: hit.added_date,
        score: hit.score,
        snippet_short,
        snippet_full,
    }
}

/// Short and full snippets for one hit. Both are the same fallback text
/// when the index produced no fragments.
pub fn build_snippets(hit: &IndexHit, opts: &SnippetOptions) -> (String, String) {
    if hit.fragments.is_empty() {
        let fallback = leading_text(&hit.content, opts.fallback_chars, &opts.empty_placeholder);
        return (fallback.clone(), fallback);
    }

    let short = hit
        .fragments
        .iter()
        .take(opts.short_fragments.max(1))
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(&opts.separator);
    let full = hit.fragments.join(&opts.separator);
    (short, full)
}

/// The first `max_chars` characters of `content`, with `...` appended when
/// something was cut.
pub fn leading_text(content: &str, max_chars: usize, placeholder: &str) -> String {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return placeholder.to_string();
    }
    match trimmed.char_indices().nth(max_chars) {
        None => trimmed.to_string(),
        Some((cut, _)) => format!("{}...", trimmed[..cut].trim_end()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryIndex;
    use crate::models::now_millis;

    fn hit(content: &str, fragments: &[&str]) -> IndexHit {
        IndexHit {
            filename: "a.pdf".to_string(),
            added_date: now_millis(),
            score: 1.0,
            content: content.to_string(),
            fragments: fragments.iter().map(|f| f.to_string()).collect(),
        }
    }

    #[test]
    fn short_snippet_takes_leading_fragments() {
        let opts = SnippetOptions::default();
        let (short, full) = build_snippets(&hit("", &["one", "two", "three"]), &opts);
        assert_eq!(short, "one ... two");
        assert_eq!(full, "one ... two ... three");

        let (short, full) = build_snippets(&hit("", &["only"]), &opts);
        assert_eq!(short, "only");
        assert_eq!(full, "only");
    }

    #[test]
    fn fallback_truncates_on_char_boundary() {
        let text = "é".repeat(500);
        let out = leading_text(&text, 400, "(no text)");
        assert_eq!(out.chars().count(), 403);
        assert!(out.ends_with("..."));

        assert_eq!(leading_text("short body", 400, "(no text)"), "short body");
        assert_eq!(leading_text("  \n", 400, "(no text)"), "(no text)");
    }

    #[test]
    fn fallback_used_for_both_snippets() {
        let opts = SnippetOptions {
            fallback_chars: 5,
            ..Default::default()
        };
        let (short, full) = build_snippets(&hit("abcdefgh", &[]), &opts);
        assert_eq!(short, "abcde...");
        assert_eq!(full, short);
    }

    #[tokio::test]
    async fn blank_query_never_reaches_the_index() {
        let index = Arc::new(InMemoryIndex::new());
        let engine = QueryEngine::new(index.clone());
        assert!(engine.search("").await.unwrap().is_empty());
        assert!(engine.search("   ").await.unwrap().is_empty());
        assert_eq!(index.query_count(), 0);
    }

    #[tokio::test]
    async fn backend_failure_is_reported_as_kind() {
        let index = Arc::new(InMemoryIndex::new());
        index.set_unavailable(true);
        let engine = QueryEngine::new(index.clone());
        let err = engine.search("invoice").await.unwrap_err();
        assert_eq!(err.to_string(), "search backend unavailable");
        assert_eq!(index.query_count(), 1);
    }

    #[tokio::test]
    async fn hits_are_ranked_with_highlights() {
        let index = Arc::new(InMemoryIndex::new());
        index
            .upsert("a.pdf", "invoice for march, invoice total", now_millis())
            .await
            .unwrap();
        index
            .upsert("b.pdf", "one invoice attached", now_millis())
            .await
            .unwrap();
        index
            .upsert("c.pdf", "unrelated memo", now_millis())
            .await
            .unwrap();

        let engine = QueryEngine::new(index);
        let hits = engine.search("invoice").await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].filename, "a.pdf");
        assert!(hits[0].score >= hits[1].score);
        assert!(hits[0].snippet_short.contains("<mark>invoice</mark>"));
    }

    #[tokio::test]
    async fn limit_caps_results() {
        let index = Arc::new(InMemoryIndex::new());
        for name in ["a.pdf", "b.pdf", "c.pdf"] {
            index.upsert(name, "invoice", now_millis()).await.unwrap();
        }
        let engine = QueryEngine::new(index);
        let hits = engine
            .search_with(SearchRequest {
                text: "invoice",
                limit: Some(2),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
    }
}
