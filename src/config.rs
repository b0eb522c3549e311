use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub watch: WatchConfig,
    #[serde(default)]
    pub search: SearchConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// How a file whose status is `error` is treated by the periodic scan.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RetryPolicy {
    /// Every `error` row is a candidate on the next cycle.
    #[default]
    Always,
    /// Only rows whose last failure was transient are retried.
    Transient,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WatchConfig {
    pub dir: PathBuf,
    #[serde(default = "default_archive")]
    pub archive: bool,
    #[serde(default = "default_archive_dir")]
    pub archive_dir: PathBuf,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_extraction_timeout_secs")]
    pub extraction_timeout_secs: u64,
    #[serde(default = "default_stale_claim_secs")]
    pub stale_claim_secs: u64,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default = "default_exclude_globs")]
    pub exclude_globs: Vec<String>,
}

fn default_archive() -> bool {
    true
}
fn default_archive_dir() -> PathBuf {
    PathBuf::from("indexed")
}
fn default_interval_secs() -> u64 {
    30
}
fn default_workers() -> usize {
    4
}
fn default_extraction_timeout_secs() -> u64 {
    60
}
fn default_stale_claim_secs() -> u64 {
    300
}
fn default_max_file_bytes() -> u64 {
    100 * 1024 * 1024
}
fn default_exclude_globs() -> Vec<String> {
    vec!["~$*".to_string(), ".*".to_string()]
}

impl WatchConfig {
    /// Archive location, resolved against the watched directory when relative.
    pub fn archive_path(&self) -> PathBuf {
        if self.archive_dir.is_absolute() {
            self.archive_dir.clone()
        } else {
            self.dir.join(&self.archive_dir)
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn extraction_timeout(&self) -> Duration {
        Duration::from_secs(self.extraction_timeout_secs)
    }

    pub fn stale_claim(&self) -> Duration {
        Duration::from_secs(self.stale_claim_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_max_results")]
    pub max_results: i64,
    #[serde(default = "default_pre_tag")]
    pub pre_tag: String,
    #[serde(default = "default_post_tag")]
    pub post_tag: String,
    #[serde(default = "default_fragment_size")]
    pub fragment_size: usize,
    #[serde(default = "default_fragment_count")]
    pub fragment_count: usize,
    #[serde(default = "default_short_fragments")]
    pub short_fragments: usize,
    #[serde(default = "default_fragment_separator")]
    pub fragment_separator: String,
    #[serde(default = "default_fallback_chars")]
    pub fallback_chars: usize,
    #[serde(default = "default_empty_placeholder")]
    pub empty_placeholder: String,
    #[serde(default = "default_record_history")]
    pub record_history: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_results: default_max_results(),
            pre_tag: default_pre_tag(),
            post_tag: default_post_tag(),
            fragment_size: default_fragment_size(),
            fragment_count: default_fragment_count(),
            short_fragments: default_short_fragments(),
            fragment_separator: default_fragment_separator(),
            fallback_chars: default_fallback_chars(),
            empty_placeholder: default_empty_placeholder(),
            record_history: default_record_history(),
        }
    }
}

fn default_max_results() -> i64 {
    15
}
fn default_pre_tag() -> String {
    "<mark>".to_string()
}
fn default_post_tag() -> String {
    "</mark>".to_string()
}
fn default_fragment_size() -> usize {
    150
}
fn default_fragment_count() -> usize {
    5
}
fn default_short_fragments() -> usize {
    2
}
fn default_fragment_separator() -> String {
    " ... ".to_string()
}
fn default_fallback_chars() -> usize {
    400
}
fn default_empty_placeholder() -> String {
    "(no text)".to_string()
}
fn default_record_history() -> bool {
    true
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    // Validate watch
    if config.watch.workers == 0 {
        anyhow::bail!("watch.workers must be >= 1");
    }
    if config.watch.interval_secs == 0 {
        anyhow::bail!("watch.interval_secs must be >= 1");
    }
    if config.watch.extraction_timeout_secs == 0 {
        anyhow::bail!("watch.extraction_timeout_secs must be >= 1");
    }
    // A claim must outlive the attempt holding it.
    if config.watch.stale_claim_secs <= config.watch.extraction_timeout_secs {
        anyhow::bail!(
            "watch.stale_claim_secs ({}) must be greater than watch.extraction_timeout_secs ({})",
            config.watch.stale_claim_secs,
            config.watch.extraction_timeout_secs
        );
    }

    // Validate search
    let search = &config.search;
    if search.max_results < 1 {
        anyhow::bail!("search.max_results must be >= 1");
    }
    if search.fragment_size == 0 || search.fragment_count == 0 || search.short_fragments == 0 {
        anyhow::bail!("search.fragment_size, fragment_count and short_fragments must be >= 1");
    }
    if search.pre_tag.is_empty() || search.post_tag.is_empty() {
        anyhow::bail!("search.pre_tag and search.post_tag must not be empty");
    }

    Ok(config)
}
