//! # Lexbase CLI (`lexbase`)
//!
//! The `lexbase` binary is the primary interface for the knowledge-base
//! core. It provides commands for database initialization, crawler-feed
//! ingestion, search, feedback logging, gap detection, source quality
//! management, and statistics.
//!
//! ## Usage
//!
//! ```bash
//! lexbase --config ./config/lexbase.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `lexbase init` | Create the SQLite database and run schema migrations |
//! | `lexbase ingest <feed>` | Dedup, chunk, embed, and merge a crawler feed |
//! | `lexbase search "<query>"` | Search the index and log the query |
//! | `lexbase feedback <id> <type>` | Record user feedback on a query |
//! | `lexbase followup <id> <id>` | Link a follow-up query to the original |
//! | `lexbase gaps detect` | Cluster low-quality queries into coverage gaps |
//! | `lexbase gaps report` | Print the open gap backlog |
//! | `lexbase gaps resolve <id>` | Mark a gap resolved |
//! | `lexbase quality update` | Recompute source quality scores |
//! | `lexbase quality priority` | Print the crawl priority queue |
//! | `lexbase stats` | Knowledge-base health overview |

mod chunk;
mod config;
mod db;
mod dedup;
mod embedding;
mod feedback;
mod gaps;
mod index;
mod ingest;
mod migrate;
mod models;
mod quality;
mod search;
mod stats;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::index::SearchFilter;
use crate::models::{DocumentType, FeedbackType};

/// Lexbase CLI — a self-learning legal knowledge-base core.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/lexbase.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "lexbase",
    about = "Lexbase — a self-learning legal knowledge-base core",
    version,
    long_about = "Lexbase ingests crawled legal documents through a dedup, chunk, embed, and \
    merge pipeline into an atomically-replaced vector index, logs every served query with its \
    retrieval quality, and clusters poorly-served queries into a prioritized backlog of \
    coverage gaps for targeted re-crawling."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/lexbase.toml`. Database, index, chunking,
    /// embedding, and gap-detection settings are read from this file.
    #[arg(long, global = true, default_value = "./config/lexbase.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables (documents,
    /// sources, crawl_history, content_changes, queries, coverage_gaps).
    /// This command is idempotent — running it multiple times is safe.
    Init,

    /// Ingest a crawler feed (JSON Lines, one document per line).
    ///
    /// Each document is classified against the fingerprint store, chunked
    /// by its document type, embedded, and merged into the index in a
    /// single atomic batch. Unchanged re-crawls and content-identical
    /// duplicates are skipped.
    Ingest {
        /// Path to the feed file.
        feed: PathBuf,

        /// Classify and chunk only — no embedding, no writes.
        #[arg(long)]
        dry_run: bool,

        /// Ingest at most N feed entries.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Search the index and log the query.
    ///
    /// Requires an embedding provider to be configured. The query, its
    /// retrieved chunk ids, and the best score are recorded for the
    /// feedback loop.
    Search {
        /// The search query string.
        query: String,

        /// Maximum number of results to return.
        #[arg(long, default_value_t = 5)]
        k: usize,

        /// Filter by document type: `law` or `court_decision`.
        #[arg(long)]
        doc_type: Option<String>,

        /// Filter by category (e.g., `tax`).
        #[arg(long)]
        category: Option<String>,

        /// Session identifier, used to correlate follow-up queries.
        #[arg(long)]
        session: Option<String>,
    },

    /// Record user feedback on a logged query.
    ///
    /// Negative feedback (thumbs_down, or a rating of 2 or less) flags the
    /// query low-quality and queues it for review.
    Feedback {
        /// Query id, as printed by `lexbase search`.
        query_id: i64,

        /// Feedback type: `thumbs_up`, `thumbs_down`, or `rating`.
        feedback_type: String,

        /// Rating value (1-5), required for `rating`.
        #[arg(long)]
        value: Option<i64>,

        /// Free-text comment.
        #[arg(long)]
        comment: Option<String>,
    },

    /// Link a follow-up query to the query it revisits.
    ///
    /// Marks the original query as needing review — a follow-up is
    /// evidence the first answer was insufficient.
    Followup {
        /// The original query id.
        original_id: i64,
        /// The follow-up query id.
        follow_up_id: i64,
    },

    /// Coverage gap detection and backlog management.
    Gaps {
        #[command(subcommand)]
        action: GapsAction,
    },

    /// Source quality scores and crawl prioritization.
    Quality {
        #[command(subcommand)]
        action: QualityAction,
    },

    /// Print a knowledge-base health overview.
    ///
    /// Shows live document counts, index size, backup count, feedback
    /// counters for the trailing week, and the gap backlog.
    Stats,
}

/// Gap detection subcommands.
#[derive(Subcommand)]
enum GapsAction {
    /// Cluster recent low-quality queries into coverage gaps.
    ///
    /// Runs density-based clustering over the query embeddings; isolated
    /// queries are discarded as noise. Detected gaps are persisted sorted
    /// by priority.
    Detect,

    /// Print open gaps, highest priority first.
    Report,

    /// Mark a gap resolved.
    Resolve {
        /// Gap id, as printed by `lexbase gaps report`.
        gap_id: i64,

        /// Chunk id that addresses the gap, if known.
        #[arg(long)]
        chunk_id: Option<String>,
    },
}

/// Quality scoring subcommands.
#[derive(Subcommand)]
enum QualityAction {
    /// Recompute quality scores for all active sources.
    Update,

    /// Print sources due for crawling, best first.
    Priority {
        /// Maximum number of sources to list.
        #[arg(long, default_value_t = 10)]
        limit: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest {
            feed,
            dry_run,
            limit,
        } => {
            ingest::run_ingest(&cfg, &feed, dry_run, limit).await?;
        }
        Commands::Search {
            query,
            k,
            doc_type,
            category,
            session,
        } => {
            let filter = SearchFilter {
                document_type: doc_type.as_deref().map(DocumentType::parse).transpose()?,
                category,
            };
            search::run_search(&cfg, &query, k, filter, session.as_deref()).await?;
        }
        Commands::Feedback {
            query_id,
            feedback_type,
            value,
            comment,
        } => {
            let feedback_type = FeedbackType::parse(&feedback_type)?;
            if feedback_type == FeedbackType::Rating && value.is_none() {
                anyhow::bail!("--value is required for rating feedback");
            }
            let pool = db::connect(&cfg.db).await?;
            feedback::log_feedback(&pool, query_id, feedback_type, value, comment.as_deref())
                .await?;
            pool.close().await;
            println!("Feedback recorded for query #{}.", query_id);
        }
        Commands::Followup {
            original_id,
            follow_up_id,
        } => {
            let pool = db::connect(&cfg.db).await?;
            feedback::log_follow_up(&pool, original_id, follow_up_id).await?;
            pool.close().await;
            println!(
                "Query #{} linked as follow-up of #{}; original marked for review.",
                follow_up_id, original_id
            );
        }
        Commands::Gaps { action } => {
            let pool = db::connect(&cfg.db).await?;
            match action {
                GapsAction::Detect => {
                    let detected = gaps::detect_gaps(&pool, &cfg.gaps).await?;
                    if detected.is_empty() {
                        println!("No coverage gaps detected.");
                    } else {
                        println!("Detected {} coverage gaps:", detected.len());
                        print_gaps(&detected);
                    }
                }
                GapsAction::Report => {
                    let open = gaps::active_gaps(&pool).await?;
                    if open.is_empty() {
                        println!("No open coverage gaps.");
                    } else {
                        println!("{} open coverage gaps:", open.len());
                        print_gaps(&open);
                    }
                }
                GapsAction::Resolve { gap_id, chunk_id } => {
                    gaps::mark_resolved(&pool, gap_id, chunk_id.as_deref()).await?;
                    println!("Gap #{} resolved.", gap_id);
                }
            }
            pool.close().await;
        }
        Commands::Quality { action } => {
            let pool = db::connect(&cfg.db).await?;
            match action {
                QualityAction::Update => {
                    let scores = quality::update_all_scores(&pool).await?;
                    println!("Updated {} sources:", scores.len());
                    for (id, name, score) in scores {
                        println!("  #{:<4} {:<28} {:.3}", id, name, score);
                    }
                }
                QualityAction::Priority { limit } => {
                    let queue = quality::crawl_priority(&pool, limit).await?;
                    if queue.is_empty() {
                        println!("No sources due for crawling.");
                    } else {
                        println!("Crawl priority queue:");
                        for (i, s) in queue.iter().enumerate() {
                            println!(
                                "  {}. {:<28} {:.3}{}",
                                i + 1,
                                s.name,
                                s.quality_score,
                                if s.is_whitelisted { "  [whitelisted]" } else { "" }
                            );
                        }
                    }
                }
            }
            pool.close().await;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
    }

    Ok(())
}

fn print_gaps(gaps: &[models::CoverageGap]) {
    for gap in gaps {
        let id = gap
            .id
            .map(|i| format!("#{}", i))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {} [{:.1}] \"{}\" ({} queries, avg score {:.2}{})",
            id,
            gap.priority_score,
            gap.topic,
            gap.query_count,
            gap.avg_score,
            gap.category
                .as_deref()
                .map(|c| format!(", category {}", c))
                .unwrap_or_default()
        );
    }
}
