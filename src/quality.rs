//! Source quality scoring and crawl prioritization.
//!
//! Each crawl source carries a composite quality score built from four
//! factors:
//!
//! - authority (40%): manually curated trust tier, 1.0 for government
//!   registers down to 0.3 for forums
//! - information density (25%): average chunks extracted per successful
//!   crawl, 5 or more scoring 1.0
//! - freshness (20%): content changes detected in the trailing 30 days,
//!   4 or more scoring 1.0
//! - index contribution (15%): average chunks actually merged into the
//!   index per successful crawl, 10 or more scoring 1.0
//!
//! The score never gates ingestion. It only reorders the crawl queue:
//! higher-scored sources are crawled sooner.

use anyhow::Result;
use chrono::Utc;
use regex::Regex;
use sqlx::{Row, SqlitePool};
use std::sync::OnceLock;
use tracing::info;

const THIRTY_DAYS_SECS: i64 = 30 * 24 * 3600;

/// The four factors and their weighted sum.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityBreakdown {
    pub authority: f64,
    pub information_density: f64,
    pub freshness: f64,
    pub rag_contribution: f64,
    pub quality_score: f64,
}

/// Combine raw aggregates into the weighted score. Pure; the database
/// reads live in [`score_source`].
pub fn composite_score(
    authority: f64,
    avg_chunks_extracted: f64,
    recent_changes: i64,
    avg_chunks_merged: f64,
) -> QualityBreakdown {
    let information_density = (avg_chunks_extracted / 5.0).min(1.0);
    let freshness = (recent_changes as f64 / 4.0).min(1.0);
    let rag_contribution = (avg_chunks_merged / 10.0).min(1.0);
    let quality_score = authority * 0.40
        + information_density * 0.25
        + freshness * 0.20
        + rag_contribution * 0.15;
    QualityBreakdown {
        authority,
        information_density,
        freshness,
        rag_contribution,
        quality_score,
    }
}

/// Recompute and persist the quality score for one source.
pub async fn score_source(pool: &SqlitePool, source_id: i64) -> Result<QualityBreakdown> {
    let authority: f64 =
        sqlx::query_scalar("SELECT authority_score FROM sources WHERE id = ?")
            .bind(source_id)
            .fetch_one(pool)
            .await?;

    let row = sqlx::query(
        "SELECT AVG(chunks_extracted) AS avg_extracted, AVG(chunks_merged) AS avg_merged
         FROM crawl_history WHERE source_id = ? AND status = 'success'",
    )
    .bind(source_id)
    .fetch_one(pool)
    .await?;
    let avg_extracted: f64 = row.try_get::<Option<f64>, _>("avg_extracted")?.unwrap_or(0.0);
    let avg_merged: f64 = row.try_get::<Option<f64>, _>("avg_merged")?.unwrap_or(0.0);

    let cutoff = Utc::now().timestamp() - THIRTY_DAYS_SECS;
    let recent_changes: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM content_changes WHERE source_id = ? AND detected_at > ?",
    )
    .bind(source_id)
    .bind(cutoff)
    .fetch_one(pool)
    .await?;

    let breakdown = composite_score(authority, avg_extracted, recent_changes, avg_merged);

    sqlx::query(
        "UPDATE sources
         SET quality_score = ?, information_density = ?, freshness_score = ?, rag_contribution = ?
         WHERE id = ?",
    )
    .bind(breakdown.quality_score)
    .bind(breakdown.information_density)
    .bind(breakdown.freshness)
    .bind(breakdown.rag_contribution)
    .bind(source_id)
    .execute(pool)
    .await?;

    Ok(breakdown)
}

/// Recompute scores for every active source. Returns (id, name, score).
pub async fn update_all_scores(pool: &SqlitePool) -> Result<Vec<(i64, String, f64)>> {
    let rows = sqlx::query("SELECT id, name FROM sources WHERE is_active = 1 ORDER BY id")
        .fetch_all(pool)
        .await?;

    let mut results = Vec::with_capacity(rows.len());
    for row in rows {
        let id: i64 = row.get("id");
        let name: String = row.get("name");
        let breakdown = score_source(pool, id).await?;
        results.push((id, name, breakdown.quality_score));
    }
    info!(sources = results.len(), "quality scores updated");
    Ok(results)
}

/// A source ready to crawl, in priority order.
#[derive(Debug, Clone)]
pub struct SourcePriority {
    pub id: i64,
    pub name: String,
    pub quality_score: f64,
    pub is_whitelisted: bool,
}

/// Sources due for crawling, best first. Ordered by quality score, ties
/// broken by the whitelist flag, then by staleness. Sources with no
/// scheduled crawl time sort first within a tie (never crawled yet).
pub async fn crawl_priority(pool: &SqlitePool, limit: i64) -> Result<Vec<SourcePriority>> {
    let now = Utc::now().timestamp();
    let rows = sqlx::query(
        "SELECT id, name, quality_score, is_whitelisted
         FROM sources
         WHERE is_active = 1 AND (next_crawl_at IS NULL OR next_crawl_at <= ?)
         ORDER BY quality_score DESC, is_whitelisted DESC, next_crawl_at ASC
         LIMIT ?",
    )
    .bind(now)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| SourcePriority {
            id: row.get("id"),
            name: row.get("name"),
            quality_score: row.get("quality_score"),
            is_whitelisted: row.get::<i64, _>("is_whitelisted") != 0,
        })
        .collect())
}

fn amount_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+\s*(%|kč|czk|eur)").unwrap())
}

fn statute_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"§\s*\d+|act no\.|zákon|vyhláška|regulation").unwrap())
}

const DEADLINE_KEYWORDS: &[&str] = &["deadline", "no later than", "lhůta", "termín", "due date"];
const PROCESS_KEYWORDS: &[&str] = &["procedure", "form", "registration", "postup", "formulář"];

/// Heuristic relevance of a chunk's text, in [0, 1]. Rewards concrete
/// amounts, statute references, deadlines, and procedural language;
/// chunks from whitelisted sources get a 1.2x boost before clamping.
pub fn chunk_relevance(text: &str, whitelisted_source: bool) -> f32 {
    let lower = text.to_lowercase();
    let mut relevance = 0.0f32;

    if amount_pattern().is_match(&lower) {
        relevance += 0.3;
    }
    if statute_pattern().is_match(&lower) {
        relevance += 0.25;
    }
    if DEADLINE_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        relevance += 0.2;
    }
    if PROCESS_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        relevance += 0.15;
    }

    let keyword_hits = DEADLINE_KEYWORDS
        .iter()
        .chain(PROCESS_KEYWORDS.iter())
        .filter(|kw| lower.contains(*kw))
        .count();
    relevance += (keyword_hits as f32 * 0.05).min(0.3);

    if whitelisted_source {
        relevance *= 1.2;
    }
    relevance.min(1.0)
}
