use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(&config.db).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Apply the schema to an already-open pool. Idempotent.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    // Documents table. Rows are never deleted; a re-crawl with changed
    // content marks the previous row superseded and inserts a new one.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            canonical_id TEXT NOT NULL,
            document_type TEXT NOT NULL,
            title TEXT,
            full_text TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            category TEXT,
            court_name TEXT,
            decision_date TEXT,
            ecli TEXT,
            source_url TEXT,
            retrieved_at INTEGER NOT NULL,
            indexed INTEGER NOT NULL DEFAULT 0,
            superseded INTEGER NOT NULL DEFAULT 0,
            chunk_ids TEXT NOT NULL DEFAULT '[]'
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One live row per canonical id and type; content hash unique among
    // indexed documents of the same type.
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_documents_live
         ON documents(canonical_id, document_type) WHERE superseded = 0",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_documents_hash
         ON documents(document_type, content_hash) WHERE indexed = 1 AND superseded = 0",
    )
    .execute(pool)
    .await?;

    // Crawl sources and their quality scores (reorders the crawl queue,
    // never gates ingestion).
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sources (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            url TEXT,
            source_type TEXT NOT NULL DEFAULT 'government',
            authority_score REAL NOT NULL DEFAULT 0.5,
            quality_score REAL NOT NULL DEFAULT 0.0,
            information_density REAL NOT NULL DEFAULT 0.0,
            freshness_score REAL NOT NULL DEFAULT 0.0,
            rag_contribution REAL NOT NULL DEFAULT 0.0,
            is_active INTEGER NOT NULL DEFAULT 1,
            is_whitelisted INTEGER NOT NULL DEFAULT 0,
            last_crawled_at INTEGER,
            next_crawl_at INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS crawl_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source_id INTEGER NOT NULL,
            crawled_at INTEGER NOT NULL,
            status TEXT NOT NULL,
            chunks_extracted INTEGER NOT NULL DEFAULT 0,
            chunks_merged INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY (source_id) REFERENCES sources(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS content_changes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source_id INTEGER,
            canonical_id TEXT NOT NULL,
            document_type TEXT NOT NULL,
            detected_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Served queries, retrieval outcomes, and user feedback.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS queries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp INTEGER NOT NULL,
            session_id TEXT,
            query_text TEXT NOT NULL,
            category TEXT,
            query_embedding BLOB,
            retrieved_chunk_ids TEXT,
            retrieved_scores TEXT,
            best_score REAL,
            feedback_type TEXT,
            feedback_value INTEGER,
            feedback_comment TEXT,
            follow_up_query_id INTEGER,
            is_low_quality INTEGER NOT NULL DEFAULT 0,
            needs_review INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS coverage_gaps (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            detected_at INTEGER NOT NULL,
            topic TEXT NOT NULL,
            category TEXT,
            query_count INTEGER NOT NULL,
            avg_score REAL NOT NULL,
            priority_score REAL NOT NULL,
            status TEXT NOT NULL DEFAULT 'detected',
            member_query_ids TEXT NOT NULL DEFAULT '[]',
            resolved_by_chunk_id TEXT,
            resolved_at INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_documents_canonical ON documents(canonical_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_queries_timestamp ON queries(timestamp DESC)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_queries_low_quality ON queries(is_low_quality)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_crawl_history_source ON crawl_history(source_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
