//! End-to-end pipeline tests with deterministic mock embeddings.
//!
//! These tests drive the library API through the full loop: ingest (dedup,
//! chunk, merge), search with logging, feedback, and gap detection. Mock
//! vectors stand in for the embedding provider so the tests are
//! deterministic and run without network access.

use std::path::Path;

use chrono::Utc;
use sqlx::SqlitePool;

use lexbase::config::{
    ChunkingConfig, Config, DbConfig, EmbeddingConfig, FeedbackConfig, GapsConfig, IndexConfig,
};
use lexbase::embedding::l2_normalize;
use lexbase::index::{self, SearchFilter};
use lexbase::models::{CrawledDocument, DocumentType, FeedbackType};
use lexbase::{feedback, gaps, ingest, migrate, search};

fn test_config(root: &Path) -> Config {
    Config {
        db: DbConfig {
            path: root.join("kb.sqlite"),
        },
        index: IndexConfig {
            dir: root.join("index"),
            backup_dir: root.join("backups"),
        },
        chunking: ChunkingConfig {
            max_chars: 2000,
            min_chars: 20,
        },
        embedding: EmbeddingConfig::default(),
        feedback: FeedbackConfig::default(),
        gaps: GapsConfig::default(),
    }
}

/// Deterministic stand-in for the embedding provider: folds the text bytes
/// into a fixed-dimensional unit vector. Identical text always embeds to
/// the identical vector.
fn mock_embed_one(text: &str) -> Vec<f32> {
    let mut v = vec![0.1f32; 8];
    for (i, b) in text.bytes().enumerate() {
        v[i % 8] += (b as f32) / 255.0;
    }
    l2_normalize(&mut v);
    v
}

fn mock_embed(texts: &[String]) -> Vec<Vec<f32>> {
    texts.iter().map(|t| mock_embed_one(t)).collect()
}

fn unit(mut v: Vec<f32>) -> Vec<f32> {
    l2_normalize(&mut v);
    v
}

fn law(canonical_id: &str, text: &str) -> CrawledDocument {
    CrawledDocument {
        canonical_id: canonical_id.to_string(),
        document_type: DocumentType::Law,
        title: Some("Income Tax Act".to_string()),
        full_text: text.to_string(),
        category: Some("tax".to_string()),
        court_name: None,
        decision_date: None,
        ecli: None,
        source_url: Some("https://example.gov/laws/586-1992".to_string()),
        retrieved_at: Utc::now(),
        source_id: None,
    }
}

fn decision(canonical_id: &str, text: &str) -> CrawledDocument {
    CrawledDocument {
        canonical_id: canonical_id.to_string(),
        document_type: DocumentType::CourtDecision,
        title: None,
        full_text: text.to_string(),
        category: Some("tax".to_string()),
        court_name: Some("Supreme Administrative Court".to_string()),
        decision_date: Some("2025-11-03".to_string()),
        ecli: Some("ECLI:CZ:NSS:2025:1234".to_string()),
        source_url: None,
        retrieved_at: Utc::now(),
        source_id: None,
    }
}

fn law_text() -> String {
    format!(
        "§ 1\n{}\n§ 2\n{}",
        "Taxpayers shall file the annual return no later than the first of April. ".repeat(2),
        "Advance payments of 2000 Kč are due quarterly under this act. ".repeat(2),
    )
}

fn decision_text() -> String {
    format!(
        "{}\n\n{}",
        "The court held that the advance payment obligation applies from registration. "
            .repeat(2),
        "Costs of the proceedings are borne by the respondent in full measure. ".repeat(2),
    )
}

async fn ingest_docs(
    pool: &SqlitePool,
    config: &Config,
    docs: Vec<CrawledDocument>,
) -> ingest::IngestReport {
    let plan = ingest::plan(pool, config, docs).await.unwrap();
    let vectors = mock_embed(&plan.chunk_texts());
    ingest::commit(pool, config, plan, vectors).await.unwrap()
}

async fn test_pool() -> SqlitePool {
    let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
    migrate::apply(&pool).await.unwrap();
    pool
}

#[tokio::test]
async fn test_full_ingest_and_search_loop() {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(tmp.path());
    let pool = test_pool().await;

    let report = ingest_docs(
        &pool,
        &config,
        vec![law("586/1992", &law_text()), decision("1 Afs 10/2025", &decision_text())],
    )
    .await;
    assert_eq!(report.documents_indexed, 2);
    assert!(report.chunks_merged >= 4);

    // Alignment invariant after merge.
    let state = index::load(&config.index.dir).unwrap();
    assert_eq!(state.chunk_texts.len(), state.chunk_metadata.len());
    assert_eq!(state.chunk_texts.len(), state.index.len());

    // A query embedded identically to an indexed chunk must rank it first.
    let target = state.chunk_texts[0].clone();
    let (query_id, results) = search::search_with_vector(
        &pool,
        &config,
        "annual return deadline",
        &mock_embed_one(&target),
        3,
        &SearchFilter::default(),
        Some("sess-1"),
    )
    .await
    .unwrap();
    assert_eq!(results[0].text, target);
    assert!(results[0].score > 0.999);

    // Feedback closes the loop without touching the index.
    feedback::log_feedback(&pool, query_id, FeedbackType::ThumbsUp, None, None)
        .await
        .unwrap();
    let after = index::load(&config.index.dir).unwrap();
    assert_eq!(after.len(), state.len());
}

#[tokio::test]
async fn test_dedup_idempotence_across_repeated_ingests() {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(tmp.path());
    let pool = test_pool().await;

    let first = ingest_docs(&pool, &config, vec![law("586/1992", &law_text())]).await;
    let baseline = index::load(&config.index.dir).unwrap().len();
    assert_eq!(first.chunks_merged, baseline);

    for _ in 0..3 {
        let report = ingest_docs(&pool, &config, vec![law("586/1992", &law_text())]).await;
        assert_eq!(report.chunks_merged, 0);
        assert_eq!(report.unchanged, 1);
    }

    assert_eq!(index::load(&config.index.dir).unwrap().len(), baseline);
    let live: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM documents WHERE canonical_id = '586/1992' AND superseded = 0",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(live, 1);
}

#[tokio::test]
async fn test_cross_id_duplicate_indexed_once() {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(tmp.path());
    let pool = test_pool().await;

    ingest_docs(&pool, &config, vec![decision("1 Afs 10/2025", &decision_text())]).await;
    let report = ingest_docs(
        &pool,
        &config,
        vec![decision("ECLI:CZ:NSS:2025:1234", &decision_text())],
    )
    .await;
    assert_eq!(report.duplicates, 1);
    assert_eq!(report.documents_indexed, 0);
}

#[tokio::test]
async fn test_alignment_holds_across_repeated_merges() {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(tmp.path());
    let pool = test_pool().await;

    for i in 0..3 {
        let text = format!(
            "§ 1\nSection text number {} about statutory filing obligations and deadlines.",
            i
        );
        ingest_docs(&pool, &config, vec![law(&format!("10{}/2026", i), &text)]).await;

        let state = index::load(&config.index.dir).unwrap();
        assert_eq!(state.chunk_texts.len(), state.chunk_metadata.len());
        assert_eq!(state.chunk_texts.len(), state.index.len());
        assert_eq!(state.len(), i + 1);
    }
}

#[tokio::test]
async fn test_failed_merge_leaves_live_index_byte_identical() {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(tmp.path());
    let pool = test_pool().await;

    ingest_docs(&pool, &config, vec![law("586/1992", &law_text())]).await;

    let snapshot: Vec<(String, Vec<u8>)> = std::fs::read_dir(&config.index.dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_file())
        .map(|e| {
            (
                e.file_name().to_string_lossy().to_string(),
                std::fs::read(e.path()).unwrap(),
            )
        })
        .collect();

    // Wrong dimensionality aborts the merge after the snapshot step.
    let err = index::merge(
        &config.index,
        vec!["bad".to_string()],
        vec![lexbase::models::ChunkMetadata::Law {
            chunk_id: "bad_0".to_string(),
            law_number: "0/0".to_string(),
            law_name: None,
            section: "§ 1".to_string(),
            category: None,
            source_url: None,
            content_hash: "x".to_string(),
            relevance_score: 0.0,
            added_at: "2026-01-01T00:00:00Z".to_string(),
        }],
        vec![unit(vec![1.0, 0.0])],
    );
    assert!(err.is_err());

    for (name, before) in snapshot {
        let after = std::fs::read(config.index.dir.join(&name)).unwrap();
        assert_eq!(before, after, "artifact {} changed after failed merge", name);
    }
}

#[tokio::test]
async fn test_low_quality_cluster_becomes_single_gap() {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(tmp.path());
    let pool = test_pool().await;

    // Index one chunk far away from every query vector so all searches
    // score poorly.
    ingest_docs(&pool, &config, vec![law("586/1992", &law_text())]).await;

    let cluster = [
        unit(vec![1.0, 0.02, 0.0, 0.0]),
        unit(vec![0.99, 0.05, 0.01, 0.0]),
        unit(vec![0.98, 0.04, 0.02, 0.0]),
        unit(vec![0.97, 0.01, 0.03, 0.0]),
        unit(vec![0.99, 0.03, 0.0, 0.01]),
    ];
    let texts = [
        "crypto asset reporting deadline",
        "deadline for crypto asset reports",
        "crypto asset report due date",
        "when are crypto asset reports due",
        "crypto reporting obligation deadline",
    ];
    for (text, vec) in texts.iter().zip(cluster.iter()) {
        let id = feedback::log_query(&pool, text, None, Some("tax"), Some(vec))
            .await
            .unwrap();
        feedback::log_retrieval(&pool, id, &[], &[0.1], 0.4).await.unwrap();
    }
    // One isolated low-quality query: must be noise, not a gap.
    let outlier = feedback::log_query(
        &pool,
        "dog breeding permits",
        None,
        None,
        Some(&unit(vec![0.0, 0.0, 0.0, 1.0])),
    )
    .await
    .unwrap();
    feedback::log_retrieval(&pool, outlier, &[], &[0.05], 0.4)
        .await
        .unwrap();

    let detected = gaps::detect_gaps(&pool, &config.gaps).await.unwrap();
    assert_eq!(detected.len(), 1);
    assert_eq!(detected[0].query_count, 5);
    assert!(!detected[0].member_query_ids.contains(&outlier));
    assert!(detected[0].topic.contains("crypto"));

    gaps::mark_resolved(&pool, detected[0].id.unwrap(), Some("law_586/1992_§_1_0"))
        .await
        .unwrap();
    assert!(gaps::active_gaps(&pool).await.unwrap().is_empty());
}
