//! Knowledge-base statistics and health overview.
//!
//! A quick summary of what's indexed: live document counts by type, index
//! size, feedback counters for the trailing week, and the open coverage-gap
//! backlog. Used by `lexbase stats` to confirm that ingestion and the
//! feedback loop are working as expected.

use anyhow::Result;
use sqlx::Row;

use crate::config::Config;
use crate::db;
use crate::feedback;
use crate::index;

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(&config.db).await?;

    let live_laws: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM documents WHERE document_type = 'law' AND superseded = 0",
    )
    .fetch_one(&pool)
    .await?;
    let live_decisions: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM documents WHERE document_type = 'court_decision' AND superseded = 0",
    )
    .fetch_one(&pool)
    .await?;
    let superseded: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE superseded = 1")
            .fetch_one(&pool)
            .await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Lexbase — Knowledge Base Stats");
    println!("==============================");
    println!();
    println!("  Database:        {}", config.db.path.display());
    println!("  Size:            {}", format_bytes(db_size));
    println!();
    println!("  Laws:            {}", live_laws);
    println!("  Court decisions: {}", live_decisions);
    println!("  Superseded:      {}", superseded);

    let category_rows = sqlx::query(
        "SELECT COALESCE(category, 'uncategorized') AS category, COUNT(*) AS n
         FROM documents WHERE superseded = 0
         GROUP BY category ORDER BY n DESC",
    )
    .fetch_all(&pool)
    .await?;
    if !category_rows.is_empty() {
        println!();
        println!("  Categories:");
        for row in &category_rows {
            println!(
                "    {:<20} {}",
                row.get::<String, _>("category"),
                row.get::<i64, _>("n")
            );
        }
        println!();
    }

    println!("  Index:           {}", index::describe(&config.index)?);

    let backups = index::list_backups(&config.index.backup_dir)?;
    println!("  Backups:         {}", backups.len());
    if let Some(latest) = backups.first() {
        println!("  Latest backup:   {}", latest.display());
    }

    let stats = feedback::query_stats(&pool, 7).await?;
    println!();
    println!("  Queries (7 days):");
    println!("    Total:         {}", stats.total);
    println!("    Low quality:   {}", stats.low_quality);
    println!("    Needs review:  {}", stats.needs_review);
    println!(
        "    Feedback:      {} up / {} down",
        stats.thumbs_up, stats.thumbs_down
    );
    println!("    Avg score:     {:.3}", stats.avg_best_score);
    for (category, n) in &stats.by_category {
        println!("    {:<14} {}", format!("{}:", category), n);
    }

    let gap_rows = sqlx::query(
        "SELECT status, COUNT(*) AS n FROM coverage_gaps GROUP BY status ORDER BY status",
    )
    .fetch_all(&pool)
    .await?;
    if !gap_rows.is_empty() {
        println!();
        println!("  Coverage gaps:");
        for row in &gap_rows {
            println!(
                "    {:<12} {}",
                row.get::<String, _>("status"),
                row.get::<i64, _>("n")
            );
        }
    }

    let source_rows = sqlx::query(
        "SELECT name, quality_score, is_whitelisted, last_crawled_at
         FROM sources WHERE is_active = 1
         ORDER BY quality_score DESC",
    )
    .fetch_all(&pool)
    .await?;
    if !source_rows.is_empty() {
        println!();
        println!("  Sources:");
        println!("    {:<28} {:>7}   {}", "NAME", "SCORE", "LAST CRAWL");
        for row in &source_rows {
            let name: String = row.get("name");
            let score: f64 = row.get("quality_score");
            let whitelisted = row.get::<i64, _>("is_whitelisted") != 0;
            let last = match row.get::<Option<i64>, _>("last_crawled_at") {
                Some(ts) => format_ts_relative(ts),
                None => "never".to_string(),
            };
            println!(
                "    {:<28} {:>7.3}   {}{}",
                name,
                score,
                last,
                if whitelisted { "  [whitelisted]" } else { "" }
            );
        }
    }

    println!();
    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let now = chrono::Utc::now().timestamp();
    let delta = now - ts;

    if delta < 0 {
        return chrono::DateTime::from_timestamp(ts, 0)
            .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| ts.to_string());
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    }
}
