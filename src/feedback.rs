//! Query feedback logging.
//!
//! Every served query is recorded together with its retrieval outcome and
//! any user feedback. A query is flagged low-quality when the user reacts
//! negatively (thumbs down, or a rating of 2 or less) or when the best
//! retrieval score falls below the configured threshold. Low-quality
//! queries feed the gap detector; this module never mutates the index.

use anyhow::Result;
use chrono::Utc;
use sqlx::{Row, SqlitePool};

use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::models::{FeedbackType, LoggedQuery};

/// Insert a served query. Returns the query id used by the other log
/// operations. The embedding is optional so that queries can still be
/// recorded when the embedding provider is down.
pub async fn log_query(
    pool: &SqlitePool,
    query_text: &str,
    session_id: Option<&str>,
    category: Option<&str>,
    embedding: Option<&[f32]>,
) -> Result<i64> {
    let id = sqlx::query(
        "INSERT INTO queries (timestamp, session_id, query_text, category, query_embedding)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(Utc::now().timestamp())
    .bind(session_id)
    .bind(query_text)
    .bind(category)
    .bind(embedding.map(vec_to_blob))
    .execute(pool)
    .await?
    .last_insert_rowid();
    Ok(id)
}

/// Attach retrieval results to a logged query. `best_score` is the maximum
/// of the supplied scores; an empty result set records 0.0, which flags the
/// query low-quality under any sensible threshold.
pub async fn log_retrieval(
    pool: &SqlitePool,
    query_id: i64,
    chunk_ids: &[String],
    scores: &[f32],
    low_score_threshold: f64,
) -> Result<()> {
    let best_score = scores.iter().cloned().fold(0.0f32, f32::max) as f64;
    let low = best_score < low_score_threshold;

    sqlx::query(
        "UPDATE queries
         SET retrieved_chunk_ids = ?, retrieved_scores = ?, best_score = ?, is_low_quality = ?
         WHERE id = ?",
    )
    .bind(serde_json::to_string(chunk_ids)?)
    .bind(serde_json::to_string(scores)?)
    .bind(best_score)
    .bind(low)
    .bind(query_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// True when the feedback alone marks the query low-quality.
pub fn negative_feedback(feedback: FeedbackType, value: Option<i64>) -> bool {
    match feedback {
        FeedbackType::ThumbsDown => true,
        FeedbackType::Rating => value.map(|v| v <= 2).unwrap_or(false),
        FeedbackType::ThumbsUp => false,
    }
}

/// Record user feedback on a query. Negative feedback flags the query
/// low-quality and queues it for review; it never clears a low-quality
/// flag already derived from a poor retrieval score.
pub async fn log_feedback(
    pool: &SqlitePool,
    query_id: i64,
    feedback: FeedbackType,
    value: Option<i64>,
    comment: Option<&str>,
) -> Result<()> {
    let negative = negative_feedback(feedback, value);

    let updated = sqlx::query(
        "UPDATE queries
         SET feedback_type = ?,
             feedback_value = ?,
             feedback_comment = ?,
             is_low_quality = is_low_quality OR ?,
             needs_review = needs_review OR ?
         WHERE id = ?",
    )
    .bind(feedback.as_str())
    .bind(value)
    .bind(comment)
    .bind(negative)
    .bind(negative)
    .bind(query_id)
    .execute(pool)
    .await?
    .rows_affected();

    if updated == 0 {
        anyhow::bail!("No query with id {}", query_id);
    }
    Ok(())
}

/// Link a follow-up query to the one it revisits. A follow-up is evidence
/// the original answer was insufficient, so the original is marked as
/// needing review.
pub async fn log_follow_up(
    pool: &SqlitePool,
    original_query_id: i64,
    follow_up_query_id: i64,
) -> Result<()> {
    let updated = sqlx::query(
        "UPDATE queries SET follow_up_query_id = ?, needs_review = 1 WHERE id = ?",
    )
    .bind(follow_up_query_id)
    .bind(original_query_id)
    .execute(pool)
    .await?
    .rows_affected();

    if updated == 0 {
        anyhow::bail!("No query with id {}", original_query_id);
    }
    Ok(())
}

/// Most recent low-quality queries that carry an embedding, newest first.
/// This is the gap detector's input window.
pub async fn low_quality_queries(pool: &SqlitePool, limit: usize) -> Result<Vec<LoggedQuery>> {
    let rows = sqlx::query(
        "SELECT id, query_text, category, query_embedding, best_score
         FROM queries
         WHERE is_low_quality = 1 AND query_embedding IS NOT NULL
         ORDER BY timestamp DESC
         LIMIT ?",
    )
    .bind(limit as i64)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| LoggedQuery {
            id: row.get("id"),
            query_text: row.get("query_text"),
            category: row.get("category"),
            embedding: blob_to_vec(&row.get::<Vec<u8>, _>("query_embedding")),
            best_score: row.get("best_score"),
        })
        .collect())
}

/// Aggregate counters over the trailing window, for the stats command.
#[derive(Debug, Clone, Default)]
pub struct QueryStats {
    pub total: i64,
    pub low_quality: i64,
    pub needs_review: i64,
    pub thumbs_up: i64,
    pub thumbs_down: i64,
    pub avg_best_score: f64,
    /// Query counts per category, most queried first.
    pub by_category: Vec<(String, i64)>,
}

pub async fn query_stats(pool: &SqlitePool, days: i64) -> Result<QueryStats> {
    let cutoff = Utc::now().timestamp() - days * 24 * 3600;
    let row = sqlx::query(
        "SELECT
            COUNT(*) AS total,
            SUM(is_low_quality) AS low_quality,
            SUM(needs_review) AS needs_review,
            SUM(CASE WHEN feedback_type = 'thumbs_up' THEN 1 ELSE 0 END) AS thumbs_up,
            SUM(CASE WHEN feedback_type = 'thumbs_down' THEN 1 ELSE 0 END) AS thumbs_down,
            AVG(best_score) AS avg_best_score
         FROM queries WHERE timestamp >= ?",
    )
    .bind(cutoff)
    .fetch_one(pool)
    .await?;

    let category_rows = sqlx::query(
        "SELECT category, COUNT(*) AS n FROM queries
         WHERE timestamp >= ? AND category IS NOT NULL
         GROUP BY category ORDER BY n DESC",
    )
    .bind(cutoff)
    .fetch_all(pool)
    .await?;
    let by_category = category_rows
        .into_iter()
        .map(|r| (r.get::<String, _>("category"), r.get::<i64, _>("n")))
        .collect();

    Ok(QueryStats {
        total: row.get("total"),
        low_quality: row.try_get::<Option<i64>, _>("low_quality")?.unwrap_or(0),
        needs_review: row.try_get::<Option<i64>, _>("needs_review")?.unwrap_or(0),
        thumbs_up: row.try_get::<Option<i64>, _>("thumbs_up")?.unwrap_or(0),
        thumbs_down: row.try_get::<Option<i64>, _>("thumbs_down")?.unwrap_or(0),
        avg_best_score: row
            .try_get::<Option<f64>, _>("avg_best_score")?
            .unwrap_or(0.0),
        by_category,
    })
}
