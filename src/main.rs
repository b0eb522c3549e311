//! # docwatch CLI
//!
//! Watches a directory for PDF, DOCX and RTF files, indexes their text and
//! answers full-text queries over them.
//!
//! ## Usage
//!
//! ```bash
//! docwatch --config ./config/docwatch.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docwatch init` | Create the SQLite database and run schema migrations |
//! | `docwatch scan` | Run one scan cycle over the watched directory |
//! | `docwatch watch` | Scan periodically until interrupted |
//! | `docwatch list` | Show every known document and its status |
//! | `docwatch delete <file>` | Remove a document, its index entry and source file |
//! | `docwatch reindex <file>` | Re-extract and re-index one document |
//! | `docwatch search "<query>"` | Full-text search with highlighted snippets |
//! | `docwatch history` | Show recent queries |

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use docwatch::app::App;
use docwatch::config::{self, Config};
use docwatch::extract::ExtractorRegistry;
use docwatch::ingest::Outcome;
use docwatch::logging;
use docwatch::search::SearchRequest;
use docwatch::{db, migrate};

/// Document ingestion and full-text search over a watched directory.
#[derive(Parser)]
#[command(name = "docwatch", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docwatch.toml")]
    config: PathBuf,

    /// Default log level when `RUST_LOG` is unset.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the status table, the full-text index and the search history.
    /// Running it again is safe.
    Init,

    /// Run a single scan cycle and exit.
    Scan,

    /// Scan the watched directory every `watch.interval_secs` until Ctrl-C.
    Watch,

    /// List known documents, newest first.
    List {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Delete a document: source file, index entry and status row.
    Delete {
        /// Bare filename as shown by `list`.
        filename: String,
    },

    /// Force re-extraction and re-indexing of one document.
    Reindex {
        /// Bare filename as shown by `list`.
        filename: String,
    },

    /// Search indexed documents.
    Search {
        /// The search query string.
        query: String,

        /// Maximum number of results to return.
        #[arg(long)]
        limit: Option<i64>,

        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Show recent search queries.
    History {
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_tracing(&cli.log_level);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => run_init(&cfg).await?,
        Commands::Scan => run_scan(&cfg).await?,
        Commands::Watch => run_watch(&cfg).await?,
        Commands::List { json } => run_list(&cfg, json).await?,
        Commands::Delete { filename } => run_delete(&cfg, &filename).await?,
        Commands::Reindex { filename } => run_reindex(&cfg, &filename).await?,
        Commands::Search { query, limit, json } => run_search(&cfg, &query, limit, json).await?,
        Commands::History { limit } => run_history(&cfg, limit).await?,
    }

    Ok(())
}

async fn run_init(cfg: &Config) -> Result<()> {
    let pool = db::connect(cfg).await?;
    let created = migrate::run_migrations(&pool).await?;
    if created {
        println!("Database initialized successfully.");
    } else {
        println!("Database already initialized.");
    }
    println!("  db: {}", cfg.db.path.display());
    println!("  watching: {}", cfg.watch.dir.display());
    println!(
        "  formats: {}",
        ExtractorRegistry::with_defaults(cfg.watch.max_file_bytes)
            .extensions()
            .join(", ")
    );
    Ok(())
}

async fn run_scan(cfg: &Config) -> Result<()> {
    let app = App::open(cfg).await?;
    let report = app.scanner().run_cycle().await?;

    println!("scan {}", cfg.watch.dir.display());
    println!("  files seen: {}", report.seen);
    println!("  skipped: {}", report.skipped);
    println!("  in flight elsewhere: {}", report.busy);
    println!("  indexed: {}", report.indexed);
    println!("  failed: {}", report.failed);
    if report.store_errors > 0 {
        println!("  status store errors: {}", report.store_errors);
    }
    println!("ok");
    Ok(())
}

async fn run_watch(cfg: &Config) -> Result<()> {
    let app = App::open(cfg).await?;
    app.scanner()
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "cannot listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        })
        .await;
    Ok(())
}

async fn run_list(cfg: &Config, json: bool) -> Result<()> {
    let app = App::open(cfg).await?;
    let docs = app.ingestor.list_documents().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&docs)?);
        return Ok(());
    }
    if docs.is_empty() {
        println!("No documents.");
        return Ok(());
    }
    println!("{:<10} {:<20} {:<18} FILENAME", "STATUS", "ADDED", "ERROR");
    for doc in docs {
        println!(
            "{:<10} {:<20} {:<18} {}",
            doc.status.as_str(),
            doc.added_date.format("%Y-%m-%d %H:%M:%S").to_string(),
            doc.error_kind.map(|k| k.to_string()).unwrap_or_default(),
            doc.filename
        );
    }
    Ok(())
}

async fn run_delete(cfg: &Config, filename: &str) -> Result<()> {
    let app = App::open(cfg).await?;
    app.ingestor.delete_document(filename).await?;
    println!("deleted {}", filename);
    Ok(())
}

async fn run_reindex(cfg: &Config, filename: &str) -> Result<()> {
    let app = App::open(cfg).await?;
    match app.ingestor.reindex_document(filename).await? {
        Outcome::Indexed { archived_to } => {
            println!("reindexed {}", filename);
            if let Some(dest) = archived_to {
                println!("  archived to: {}", dest.display());
            }
        }
        Outcome::Failed(kind) => {
            anyhow::bail!("reindex of {} failed: {}", filename, kind);
        }
    }
    Ok(())
}

async fn run_search(cfg: &Config, query: &str, limit: Option<i64>, json: bool) -> Result<()> {
    let app = App::open(cfg).await?;
    let hits = app
        .engine
        .search_with(SearchRequest {
            text: query,
            origin: Some("cli"),
            limit,
        })
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&hits)?);
        return Ok(());
    }
    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }
    for (i, hit) in hits.iter().enumerate() {
        println!(
            "{}. [{:.2}] {} ({})",
            i + 1,
            hit.score,
            hit.filename,
            hit.added_date.format("%Y-%m-%d")
        );
        println!("    {}", hit.snippet_short);
    }
    Ok(())
}

async fn run_history(cfg: &Config, limit: i64) -> Result<()> {
    let app = App::open(cfg).await?;
    let entries = app.history.recent(limit).await?;
    if entries.is_empty() {
        println!("No searches recorded.");
        return Ok(());
    }
    for entry in entries {
        println!(
            "{}  {:<6} {}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            entry.origin.as_deref().unwrap_or("-"),
            entry.query
        );
    }
    Ok(())
}
