//! Coverage gap detection.
//!
//! A batch job over the trailing window of low-quality queries. Queries are
//! clustered by embedding similarity with DBSCAN over cosine distance;
//! queries that land in no dense neighborhood are noise, not gaps. A gap
//! must be a recurring failure, never a one-off. Each cluster becomes a
//! [`CoverageGap`] with a keyword topic, a dominant category if one exists,
//! and a priority score:
//!
//! ```text
//! priority = 10 * query_count + 20 * (1 - avg_score) + 5 * [has category]
//! ```
//!
//! Frequency dominates, poor retrieval quality comes next, and a clear
//! category match is a small tiebreaker bonus. Detected gaps form a ranked
//! backlog of missing knowledge-base content for targeted re-crawling.

use anyhow::Result;
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use tracing::info;

use crate::config::GapsConfig;
use crate::embedding::cosine_similarity;
use crate::feedback;
use crate::models::{CoverageGap, LoggedQuery};

/// Density-based clustering over cosine distance. Returns one label per
/// input vector: `Some(cluster)` or `None` for noise. A point's
/// neighborhood includes itself, so `min_samples = 3` means a seed point
/// needs two neighbors within `eps`.
pub fn dbscan(embeddings: &[Vec<f32>], eps: f32, min_samples: usize) -> Vec<Option<usize>> {
    let n = embeddings.len();
    let mut labels: Vec<Option<usize>> = vec![None; n];
    let mut visited = vec![false; n];
    let mut next_cluster = 0;

    let neighbors = |i: usize| -> Vec<usize> {
        (0..n)
            .filter(|&j| 1.0 - cosine_similarity(&embeddings[i], &embeddings[j]) <= eps)
            .collect()
    };

    for i in 0..n {
        if visited[i] {
            continue;
        }
        visited[i] = true;

        let seed_neighbors = neighbors(i);
        if seed_neighbors.len() < min_samples {
            continue; // noise, may still be claimed by a later cluster
        }

        let cluster = next_cluster;
        next_cluster += 1;
        labels[i] = Some(cluster);

        let mut frontier = seed_neighbors;
        let mut cursor = 0;
        while cursor < frontier.len() {
            let j = frontier[cursor];
            cursor += 1;

            if labels[j].is_none() {
                labels[j] = Some(cluster);
            }
            if visited[j] {
                continue;
            }
            visited[j] = true;

            let j_neighbors = neighbors(j);
            if j_neighbors.len() >= min_samples {
                frontier.extend(j_neighbors);
            }
        }
    }

    labels
}

const STOPWORDS: &[&str] = &[
    "what", "when", "where", "which", "that", "this", "does", "must", "have", "with", "from",
    "about", "should", "would", "could", "will", "than", "then", "them", "they", "their", "much",
    "many", "need", "jaký", "který", "musím", "kolik",
];

/// Keyword summary of a cluster: the three most frequent words longer than
/// three characters that are not stopwords, across all member query texts.
/// Ties break by first occurrence so the topic is stable across runs.
pub fn extract_topic(query_texts: &[&str]) -> String {
    let mut counts: Vec<(String, usize)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for text in query_texts {
        for word in text.to_lowercase().split_whitespace() {
            let word: String = word
                .chars()
                .filter(|c| c.is_alphanumeric() || *c == '§')
                .collect();
            if word.chars().count() <= 3 || STOPWORDS.contains(&word.as_str()) {
                continue;
            }
            match index.get(&word) {
                Some(&pos) => counts[pos].1 += 1,
                None => {
                    index.insert(word.clone(), counts.len());
                    counts.push((word, 1));
                }
            }
        }
    }

    let mut order: Vec<usize> = (0..counts.len()).collect();
    order.sort_by(|&a, &b| counts[b].1.cmp(&counts[a].1).then(a.cmp(&b)));

    let top: Vec<&str> = order
        .iter()
        .take(3)
        .map(|&i| counts[i].0.as_str())
        .collect();
    if top.is_empty() {
        "unknown topic".to_string()
    } else {
        top.join(" ")
    }
}

fn dominant_category(queries: &[&LoggedQuery]) -> Option<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for q in queries {
        if let Some(cat) = &q.category {
            *counts.entry(cat.as_str()).or_default() += 1;
        }
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(a.0)))
        .map(|(cat, _)| cat.to_string())
}

pub fn priority_score(query_count: usize, avg_score: f64, has_category: bool) -> f64 {
    query_count as f64 * 10.0
        + (1.0 - avg_score) * 20.0
        + if has_category { 5.0 } else { 0.0 }
}

/// Build gap records from a window of low-quality queries. Pure; the
/// persistence lives in [`detect_gaps`].
pub fn gaps_from_queries(queries: &[LoggedQuery], config: &GapsConfig) -> Vec<CoverageGap> {
    if queries.len() < config.min_cluster_size {
        return Vec::new();
    }

    let embeddings: Vec<Vec<f32>> = queries.iter().map(|q| q.embedding.clone()).collect();
    let labels = dbscan(&embeddings, config.eps, config.min_cluster_size);

    let mut clusters: HashMap<usize, Vec<&LoggedQuery>> = HashMap::new();
    for (q, label) in queries.iter().zip(labels.iter()) {
        if let Some(cluster) = label {
            clusters.entry(*cluster).or_default().push(q);
        }
    }

    let mut gaps: Vec<CoverageGap> = clusters
        .into_values()
        .map(|members| {
            let texts: Vec<&str> = members.iter().map(|q| q.query_text.as_str()).collect();
            let scored: Vec<f64> = members.iter().filter_map(|q| q.best_score).collect();
            let avg_score = if scored.is_empty() {
                0.0
            } else {
                scored.iter().sum::<f64>() / scored.len() as f64
            };
            let category = dominant_category(&members);
            let priority = priority_score(members.len(), avg_score, category.is_some());
            CoverageGap {
                id: None,
                topic: extract_topic(&texts),
                category,
                query_count: members.len(),
                avg_score,
                priority_score: priority,
                status: "detected".to_string(),
                member_query_ids: members.iter().map(|q| q.id).collect(),
            }
        })
        .collect();

    gaps.sort_by(|a, b| {
        b.priority_score
            .partial_cmp(&a.priority_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    gaps
}

/// Run gap detection over the most recent low-quality queries and persist
/// the results, highest priority first.
pub async fn detect_gaps(pool: &SqlitePool, config: &GapsConfig) -> Result<Vec<CoverageGap>> {
    let queries = feedback::low_quality_queries(pool, config.query_window).await?;
    info!(queries = queries.len(), "running gap detection");

    let mut gaps = gaps_from_queries(&queries, config);

    let now = Utc::now().timestamp();
    for gap in &mut gaps {
        let id = sqlx::query(
            "INSERT INTO coverage_gaps
                 (detected_at, topic, category, query_count, avg_score, priority_score,
                  status, member_query_ids)
             VALUES (?, ?, ?, ?, ?, ?, 'detected', ?)",
        )
        .bind(now)
        .bind(&gap.topic)
        .bind(&gap.category)
        .bind(gap.query_count as i64)
        .bind(gap.avg_score)
        .bind(gap.priority_score)
        .bind(serde_json::to_string(&gap.member_query_ids)?)
        .execute(pool)
        .await?
        .last_insert_rowid();
        gap.id = Some(id);
    }

    info!(gaps = gaps.len(), "gap detection finished");
    Ok(gaps)
}

/// Unresolved gaps, highest priority first.
pub async fn active_gaps(pool: &SqlitePool) -> Result<Vec<CoverageGap>> {
    let rows = sqlx::query(
        "SELECT id, topic, category, query_count, avg_score, priority_score, status,
                member_query_ids
         FROM coverage_gaps
         WHERE status = 'detected'
         ORDER BY priority_score DESC",
    )
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|row| {
            let member_query_ids: Vec<i64> =
                serde_json::from_str(&row.get::<String, _>("member_query_ids"))?;
            Ok(CoverageGap {
                id: Some(row.get("id")),
                topic: row.get("topic"),
                category: row.get("category"),
                query_count: row.get::<i64, _>("query_count") as usize,
                avg_score: row.get("avg_score"),
                priority_score: row.get("priority_score"),
                status: row.get("status"),
                member_query_ids,
            })
        })
        .collect()
}

/// Mark a gap resolved, recording which chunk (if any) closed it.
pub async fn mark_resolved(
    pool: &SqlitePool,
    gap_id: i64,
    resolved_by_chunk_id: Option<&str>,
) -> Result<()> {
    let updated = sqlx::query(
        "UPDATE coverage_gaps
         SET status = 'resolved', resolved_by_chunk_id = ?, resolved_at = ?
         WHERE id = ? AND status = 'detected'",
    )
    .bind(resolved_by_chunk_id)
    .bind(Utc::now().timestamp())
    .bind(gap_id)
    .execute(pool)
    .await?
    .rows_affected();

    if updated == 0 {
        anyhow::bail!("No unresolved gap with id {}", gap_id);
    }
    Ok(())
}
