//! Serving path: embed the query, search the index, log the outcome.
//!
//! Zero results is a valid outcome and is logged like any other retrieval
//! (it flags the query low-quality, which is exactly the signal the gap
//! detector wants). A missing or unrecoverably corrupt index surfaces as
//! an "index unavailable" error instead.

use anyhow::{anyhow, Result};
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;
use crate::embedding;
use crate::feedback;
use crate::index::{self, IndexError, SearchFilter, SearchResult};

/// Search with an already-embedded query vector, logging the query and its
/// retrieval outcome. This is the core of [`run_search`]; it is separate so
/// callers that manage their own embeddings can reuse it.
pub async fn search_with_vector(
    pool: &SqlitePool,
    config: &Config,
    query_text: &str,
    query_vec: &[f32],
    k: usize,
    filter: &SearchFilter,
    session_id: Option<&str>,
) -> Result<(i64, Vec<SearchResult>)> {
    let state = match index::load_or_restore(&config.index) {
        Ok(state) => state,
        Err(IndexError::Missing(dir)) => {
            return Err(anyhow!(
                "index unavailable: no index has been built yet in {}",
                dir.display()
            ));
        }
        Err(e) => return Err(anyhow!("index unavailable: {}", e)),
    };

    let results = index::search(&state, query_vec, k, filter);

    let query_id = feedback::log_query(
        pool,
        query_text,
        session_id,
        filter.category.as_deref(),
        Some(query_vec),
    )
    .await?;
    let chunk_ids: Vec<String> = results.iter().map(|r| r.chunk_id.clone()).collect();
    let scores: Vec<f32> = results.iter().map(|r| r.score).collect();
    feedback::log_retrieval(
        pool,
        query_id,
        &chunk_ids,
        &scores,
        config.feedback.low_score_threshold,
    )
    .await?;

    Ok((query_id, results))
}

/// CLI entry point: embed the query, search, print the hits.
pub async fn run_search(
    config: &Config,
    query_text: &str,
    k: usize,
    filter: SearchFilter,
    session_id: Option<&str>,
) -> Result<()> {
    let provider = embedding::create_provider(&config.embedding)?;
    let query_vec = embedding::embed_query(provider.as_ref(), &config.embedding, query_text).await?;
    let pool = db::connect(&config.db).await?;

    // Follow-up correlation needs a session id even when the caller did
    // not supply one.
    let session = session_id
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let (query_id, results) =
        search_with_vector(&pool, config, query_text, &query_vec, k, &filter, Some(&session))
            .await?;
    pool.close().await;

    if results.is_empty() {
        println!("No results (query #{} logged).", query_id);
        return Ok(());
    }

    println!("{} results (query #{}):\n", results.len(), query_id);
    for (i, hit) in results.iter().enumerate() {
        println!(
            "{}. [{:.3}] {} ({} {}, {})",
            i + 1,
            hit.score,
            hit.chunk_id,
            hit.metadata.document_type().as_str(),
            hit.metadata.parent_id(),
            hit.metadata.section()
        );
        let preview: String = hit.text.chars().take(200).collect();
        println!("   {}\n", preview);
    }
    Ok(())
}
