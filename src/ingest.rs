//! Ingestion pipeline: dedup, chunk, embed, merge.
//!
//! Documents arrive as a JSON Lines feed from an external crawler. Each
//! line deserializes to a [`CrawledDocument`]. The pipeline runs in three
//! phases:
//!
//! 1. plan: classify each document, chunk the new ones, score relevance
//! 2. embed: batch-embed all planned chunk texts (no lock held yet)
//! 3. commit: merge into the index, then record the document rows,
//!    content changes, and crawl history
//!
//! Embedding failures abort the whole batch before the merge lock is
//! taken, leaving the previous index untouched. Classification happens
//! against live document rows, so re-running the same feed is a no-op.

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

use crate::chunk::chunk_document;
use crate::config::Config;
use crate::db;
use crate::dedup::{self, Verdict};
use crate::embedding;
use crate::index;
use crate::models::{ChunkDraft, ChunkMetadata, CrawledDocument, DocumentType};
use crate::quality::chunk_relevance;

/// One document that survived classification, with its chunks and metadata
/// ready for embedding.
pub struct PlannedDocument {
    pub doc: CrawledDocument,
    pub content_hash: String,
    /// True when a live row with the same canonical id will be superseded.
    pub supersedes: bool,
    /// Pieces the chunker produced before the minimum-length filter.
    pub extracted: usize,
    pub drafts: Vec<ChunkDraft>,
    pub metadata: Vec<ChunkMetadata>,
}

/// Outcome of the planning phase.
#[derive(Default)]
pub struct IngestPlan {
    pub documents: Vec<PlannedDocument>,
    pub unchanged: usize,
    pub duplicates: usize,
    pub empty: usize,
}

impl IngestPlan {
    pub fn chunk_texts(&self) -> Vec<String> {
        self.documents
            .iter()
            .flat_map(|d| d.drafts.iter().map(|c| c.text.clone()))
            .collect()
    }

    pub fn total_chunks(&self) -> usize {
        self.documents.iter().map(|d| d.drafts.len()).sum()
    }
}

/// Classify and chunk a batch of crawled documents. Read-only against the
/// database; nothing is persisted until [`commit`].
pub async fn plan(pool: &SqlitePool, config: &Config, docs: Vec<CrawledDocument>) -> Result<IngestPlan> {
    let mut plan = IngestPlan::default();
    // The fingerprint store only knows committed rows, so entries earlier
    // in this batch are tracked here: content hashes already planned, and
    // where each canonical id landed in `plan.documents`.
    let mut batch_hashes: HashMap<(DocumentType, String), String> = HashMap::new();
    let mut batch_positions: HashMap<(DocumentType, String), usize> = HashMap::new();

    for doc in docs {
        let content_hash = dedup::content_fingerprint(&doc.full_text);

        if let Some(prior_id) = batch_hashes.get(&(doc.document_type, content_hash.clone())) {
            if *prior_id == doc.canonical_id {
                plan.unchanged += 1;
            } else {
                info!(
                    canonical_id = %doc.canonical_id,
                    duplicate_of = %prior_id,
                    "discarding content-identical duplicate (same batch)"
                );
                plan.duplicates += 1;
            }
            continue;
        }

        let verdict = dedup::classify(pool, &doc.canonical_id, doc.document_type, &doc.full_text).await;
        match verdict {
            Verdict::Unchanged => {
                plan.unchanged += 1;
                continue;
            }
            Verdict::DuplicateOf(existing) => {
                info!(
                    canonical_id = %doc.canonical_id,
                    duplicate_of = %existing,
                    "discarding content-identical duplicate"
                );
                plan.duplicates += 1;
                continue;
            }
            Verdict::New => {}
        }

        let supersedes = live_row_exists(pool, &doc.canonical_id, doc.document_type).await?;
        let output = chunk_document(
            &doc.canonical_id,
            doc.document_type,
            &doc.full_text,
            &config.chunking,
        );
        if output.drafts.is_empty() {
            warn!(canonical_id = %doc.canonical_id, "document produced no chunks; skipping");
            plan.empty += 1;
            continue;
        }

        let whitelisted = source_whitelisted(pool, doc.source_id).await?;
        let added_at = Utc::now().to_rfc3339();
        let metadata = output
            .drafts
            .iter()
            .map(|draft| build_metadata(&doc, draft, &content_hash, whitelisted, &added_at))
            .collect();

        let id_key = (doc.document_type, doc.canonical_id.clone());
        batch_hashes.insert((doc.document_type, content_hash.clone()), doc.canonical_id.clone());

        let planned = PlannedDocument {
            doc,
            content_hash,
            supersedes,
            extracted: output.extracted,
            drafts: output.drafts,
            metadata,
        };

        match batch_positions.get(&id_key) {
            // The same id appeared earlier in this batch with different
            // content. The later crawl wins; only one documents row per
            // canonical id may come out of a single commit.
            Some(&pos) => {
                let stale_hash = plan.documents[pos].content_hash.clone();
                batch_hashes.remove(&(id_key.0, stale_hash));
                info!(
                    canonical_id = %planned.doc.canonical_id,
                    "re-crawled within batch; keeping the later content"
                );
                plan.documents[pos] = planned;
            }
            None => {
                batch_positions.insert(id_key, plan.documents.len());
                plan.documents.push(planned);
            }
        }
    }

    Ok(plan)
}

fn build_metadata(
    doc: &CrawledDocument,
    draft: &ChunkDraft,
    content_hash: &str,
    whitelisted: bool,
    added_at: &str,
) -> ChunkMetadata {
    let relevance_score = chunk_relevance(&draft.text, whitelisted);
    match doc.document_type {
        DocumentType::Law => ChunkMetadata::Law {
            chunk_id: draft.chunk_id.clone(),
            law_number: doc.canonical_id.clone(),
            law_name: doc.title.clone(),
            section: draft.section_label.clone(),
            category: doc.category.clone(),
            source_url: doc.source_url.clone(),
            content_hash: content_hash.to_string(),
            relevance_score,
            added_at: added_at.to_string(),
        },
        DocumentType::CourtDecision => ChunkMetadata::CourtDecision {
            chunk_id: draft.chunk_id.clone(),
            case_number: doc.canonical_id.clone(),
            court_name: doc.court_name.clone(),
            section: draft.section_label.clone(),
            category: doc.category.clone(),
            decision_date: doc.decision_date.clone(),
            ecli: doc.ecli.clone(),
            source_url: doc.source_url.clone(),
            content_hash: content_hash.to_string(),
            relevance_score,
            added_at: added_at.to_string(),
        },
    }
}

async fn live_row_exists(
    pool: &SqlitePool,
    canonical_id: &str,
    document_type: DocumentType,
) -> Result<bool> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM documents
         WHERE canonical_id = ? AND document_type = ? AND superseded = 0",
    )
    .bind(canonical_id)
    .bind(document_type.as_str())
    .fetch_one(pool)
    .await?;
    Ok(count > 0)
}

async fn source_whitelisted(pool: &SqlitePool, source_id: Option<i64>) -> Result<bool> {
    let Some(id) = source_id else {
        return Ok(false);
    };
    let flag: Option<i64> = sqlx::query_scalar("SELECT is_whitelisted FROM sources WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(flag.unwrap_or(0) != 0)
}

/// Summary of a committed batch.
#[derive(Debug, Default)]
pub struct IngestReport {
    pub documents_indexed: usize,
    pub unchanged: usize,
    pub duplicates: usize,
    pub chunks_merged: usize,
    pub index_total: usize,
}

/// Merge the planned chunks into the index and record the bookkeeping
/// rows. `vectors` must be one L2-normalized embedding per planned chunk,
/// in plan order.
pub async fn commit(
    pool: &SqlitePool,
    config: &Config,
    plan: IngestPlan,
    vectors: Vec<Vec<f32>>,
) -> Result<IngestReport> {
    let texts = plan.chunk_texts();
    anyhow::ensure!(
        texts.len() == vectors.len(),
        "embedding count {} does not match planned chunk count {}",
        vectors.len(),
        texts.len()
    );

    let mut report = IngestReport {
        unchanged: plan.unchanged,
        duplicates: plan.duplicates,
        ..Default::default()
    };
    if plan.documents.is_empty() {
        return Ok(report);
    }

    let metadata: Vec<ChunkMetadata> = plan
        .documents
        .iter()
        .flat_map(|d| d.metadata.iter().cloned())
        .collect();

    let merge_report = index::merge(&config.index, texts, metadata, vectors)
        .context("index merge failed; previous index state is intact")?;
    report.chunks_merged = merge_report.added;
    report.index_total = merge_report.total;

    let now = Utc::now().timestamp();
    for planned in &plan.documents {
        record_document(pool, planned, now).await?;
    }
    record_crawl_history(pool, &plan, now).await?;
    report.documents_indexed = plan.documents.len();

    info!(
        documents = report.documents_indexed,
        chunks = report.chunks_merged,
        index_total = report.index_total,
        "ingest batch committed"
    );
    Ok(report)
}

async fn record_document(pool: &SqlitePool, planned: &PlannedDocument, now: i64) -> Result<()> {
    let doc = &planned.doc;
    let mut tx = pool.begin().await?;

    if planned.supersedes {
        sqlx::query(
            "UPDATE documents SET superseded = 1
             WHERE canonical_id = ? AND document_type = ? AND superseded = 0",
        )
        .bind(&doc.canonical_id)
        .bind(doc.document_type.as_str())
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO content_changes (source_id, canonical_id, document_type, detected_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(doc.source_id)
        .bind(&doc.canonical_id)
        .bind(doc.document_type.as_str())
        .bind(now)
        .execute(&mut *tx)
        .await?;
    }

    let chunk_ids: Vec<&str> = planned.drafts.iter().map(|c| c.chunk_id.as_str()).collect();
    sqlx::query(
        "INSERT INTO documents
             (canonical_id, document_type, title, full_text, content_hash, category,
              court_name, decision_date, ecli, source_url, retrieved_at, indexed, chunk_ids)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?)",
    )
    .bind(&doc.canonical_id)
    .bind(doc.document_type.as_str())
    .bind(&doc.title)
    .bind(&doc.full_text)
    .bind(&planned.content_hash)
    .bind(&doc.category)
    .bind(&doc.court_name)
    .bind(&doc.decision_date)
    .bind(&doc.ecli)
    .bind(&doc.source_url)
    .bind(doc.retrieved_at.timestamp())
    .bind(serde_json::to_string(&chunk_ids)?)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

async fn record_crawl_history(pool: &SqlitePool, plan: &IngestPlan, now: i64) -> Result<()> {
    let mut per_source: HashMap<i64, (i64, i64)> = HashMap::new();
    for planned in &plan.documents {
        if let Some(source_id) = planned.doc.source_id {
            let entry = per_source.entry(source_id).or_default();
            entry.0 += planned.extracted as i64;
            entry.1 += planned.drafts.len() as i64;
        }
    }

    for (source_id, (extracted, merged)) in per_source {
        sqlx::query(
            "INSERT INTO crawl_history (source_id, crawled_at, status, chunks_extracted, chunks_merged)
             VALUES (?, ?, 'success', ?, ?)",
        )
        .bind(source_id)
        .bind(now)
        .bind(extracted)
        .bind(merged)
        .execute(pool)
        .await?;

        sqlx::query("UPDATE sources SET last_crawled_at = ? WHERE id = ?")
            .bind(now)
            .bind(source_id)
            .execute(pool)
            .await?;
    }
    Ok(())
}

/// Parse a JSON Lines crawler feed. Blank lines are skipped; a malformed
/// line aborts with its line number.
pub fn read_feed(path: &Path) -> Result<Vec<CrawledDocument>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read feed file: {}", path.display()))?;

    let mut docs = Vec::new();
    for (i, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let doc: CrawledDocument = serde_json::from_str(line)
            .with_context(|| format!("Malformed feed entry at line {}", i + 1))?;
        docs.push(doc);
    }
    Ok(docs)
}

/// Run the full pipeline over a feed file. With `dry_run` the feed is
/// classified and chunked but nothing is embedded or written. `limit`
/// caps the number of feed entries taken from the front of the file.
pub async fn run_ingest(
    config: &Config,
    feed_path: &Path,
    dry_run: bool,
    limit: Option<usize>,
) -> Result<()> {
    let mut docs = read_feed(feed_path)?;
    if let Some(limit) = limit {
        docs.truncate(limit);
    }
    println!("Read {} documents from {}", docs.len(), feed_path.display());

    let pool = db::connect(&config.db).await?;
    let plan = plan(&pool, config, docs).await?;

    println!(
        "Planned: {} to index ({} chunks), {} unchanged, {} duplicates, {} empty",
        plan.documents.len(),
        plan.total_chunks(),
        plan.unchanged,
        plan.duplicates,
        plan.empty
    );

    if dry_run {
        for planned in &plan.documents {
            println!(
                "  [{}] {} -> {} chunks{}",
                planned.doc.document_type.as_str(),
                planned.doc.canonical_id,
                planned.drafts.len(),
                if planned.supersedes { " (supersedes)" } else { "" }
            );
        }
        pool.close().await;
        return Ok(());
    }

    if plan.documents.is_empty() {
        println!("Nothing to merge.");
        pool.close().await;
        return Ok(());
    }

    let provider = embedding::create_provider(&config.embedding)?;
    info!(
        model = provider.model_name(),
        chunks = plan.total_chunks(),
        "embedding planned chunks"
    );
    let texts = plan.chunk_texts();
    let vectors = embedding::embed_all(provider.as_ref(), &config.embedding, &texts)
        .await
        .context("embedding failed; batch aborted before merge")?;

    let report = commit(&pool, config, plan, vectors).await?;
    pool.close().await;

    println!(
        "Merged {} chunks from {} documents (index now holds {} chunks)",
        report.chunks_merged, report.documents_indexed, report.index_total
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChunkingConfig, DbConfig, EmbeddingConfig, FeedbackConfig, GapsConfig, IndexConfig};
    use crate::migrate;

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

    fn law(canonical_id: &str, text: &str) -> CrawledDocument {
        CrawledDocument {
            canonical_id: canonical_id.to_string(),
            document_type: DocumentType::Law,
            title: Some("Test Act".to_string()),
            full_text: text.to_string(),
            category: Some("tax".to_string()),
            court_name: None,
            decision_date: None,
            ecli: None,
            source_url: None,
            retrieved_at: Utc::now(),
            source_id: None,
        }
    }

    fn law_text() -> String {
        format!(
            "§ 1\n{}\n§ 2\n{}",
            "Taxpayers shall file the return no later than the statutory deadline. ".repeat(2),
            "The advance payment of 2000 Kč is due quarterly under this act. ".repeat(2),
        )
    }

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        migrate::apply(&pool).await.unwrap();
        pool
    }

    fn fake_vectors(n: usize) -> Vec<Vec<f32>> {
        (0..n)
            .map(|i| {
                let mut v = vec![0.0f32; 4];
                v[i % 4] = 1.0;
                v
            })
            .collect()
    }

    #[tokio::test]
    async fn test_plan_chunks_new_documents() {
        let pool = test_pool().await;
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config(tmp.path());

        let plan = plan(&pool, &config, vec![law("89/2012", &law_text())])
            .await
            .unwrap();
        assert_eq!(plan.documents.len(), 1);
        assert_eq!(plan.documents[0].drafts.len(), 2);
        assert!(!plan.documents[0].supersedes);
        assert_eq!(plan.unchanged, 0);
    }

    #[tokio::test]
    async fn test_reingesting_same_feed_is_noop() {
        let pool = test_pool().await;
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config(tmp.path());

        let first = plan(&pool, &config, vec![law("89/2012", &law_text())])
            .await
            .unwrap();
        let n = first.total_chunks();
        commit(&pool, &config, first, fake_vectors(n)).await.unwrap();

        let second = plan(&pool, &config, vec![law("89/2012", &law_text())])
            .await
            .unwrap();
        assert!(second.documents.is_empty());
        assert_eq!(second.unchanged, 1);

        let report = commit(&pool, &config, second, Vec::new()).await.unwrap();
        assert_eq!(report.chunks_merged, 0);
        let state = index::load(&config.index.dir).unwrap();
        assert_eq!(state.len(), n);
    }

    #[tokio::test]
    async fn test_changed_content_supersedes_and_records_change() {
        let pool = test_pool().await;
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config(tmp.path());

        let first = plan(&pool, &config, vec![law("89/2012", &law_text())])
            .await
            .unwrap();
        let n = first.total_chunks();
        commit(&pool, &config, first, fake_vectors(n)).await.unwrap();

        let amended = format!("{}\n§ 3\nAn entirely new section about registration forms and procedures.", law_text());
        let second = plan(&pool, &config, vec![law("89/2012", &amended)])
            .await
            .unwrap();
        assert_eq!(second.documents.len(), 1);
        assert!(second.documents[0].supersedes);
        let m = second.total_chunks();
        commit(&pool, &config, second, fake_vectors(m)).await.unwrap();

        let live: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM documents WHERE canonical_id = '89/2012' AND superseded = 0",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(live, 1);
        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE canonical_id = '89/2012'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(total, 2);
        let changes: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM content_changes")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(changes, 1);
    }

    #[tokio::test]
    async fn test_cross_id_duplicate_not_indexed() {
        let pool = test_pool().await;
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config(tmp.path());

        let first = plan(&pool, &config, vec![law("89/2012", &law_text())])
            .await
            .unwrap();
        let n = first.total_chunks();
        commit(&pool, &config, first, fake_vectors(n)).await.unwrap();

        let second = plan(&pool, &config, vec![law("89/2012-copy", &law_text())])
            .await
            .unwrap();
        assert!(second.documents.is_empty());
        assert_eq!(second.duplicates, 1);
    }

    #[tokio::test]
    async fn test_same_batch_cross_id_duplicate_merges_once() {
        let pool = test_pool().await;
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config(tmp.path());

        // Two crawlers yield byte-identical text under different ids in
        // the same feed; nothing is committed yet, so the fingerprint
        // store alone cannot catch this.
        let plan = plan(
            &pool,
            &config,
            vec![law("586/1992", &law_text()), law("586/1992-alt", &law_text())],
        )
        .await
        .unwrap();
        assert_eq!(plan.documents.len(), 1);
        assert_eq!(plan.documents[0].doc.canonical_id, "586/1992");
        assert_eq!(plan.duplicates, 1);

        let n = plan.total_chunks();
        commit(&pool, &config, plan, fake_vectors(n)).await.unwrap();
        let state = index::load(&config.index.dir).unwrap();
        assert_eq!(state.len(), n);
    }

    #[tokio::test]
    async fn test_same_batch_recrawl_same_id_commits_once() {
        let pool = test_pool().await;
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config(tmp.path());

        let plan = plan(
            &pool,
            &config,
            vec![law("586/1992", &law_text()), law("586/1992", &law_text())],
        )
        .await
        .unwrap();
        assert_eq!(plan.documents.len(), 1);
        assert_eq!(plan.unchanged, 1);

        let n = plan.total_chunks();
        commit(&pool, &config, plan, fake_vectors(n)).await.unwrap();

        let live: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM documents WHERE canonical_id = '586/1992' AND superseded = 0",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(live, 1);
        let state = index::load(&config.index.dir).unwrap();
        assert_eq!(state.len(), n);
    }

    #[tokio::test]
    async fn test_same_batch_recrawl_with_changed_text_keeps_later() {
        let pool = test_pool().await;
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config(tmp.path());

        let amended = format!(
            "{}\n§ 3\nAn entirely new section about registration forms and procedures.",
            law_text()
        );
        let plan = plan(
            &pool,
            &config,
            vec![law("586/1992", &law_text()), law("586/1992", &amended)],
        )
        .await
        .unwrap();
        assert_eq!(plan.documents.len(), 1);
        assert_eq!(plan.documents[0].drafts.len(), 3);
        assert_eq!(
            plan.documents[0].content_hash,
            crate::dedup::content_fingerprint(&amended)
        );
    }

    #[tokio::test]
    async fn test_crawl_history_counts_dropped_pieces_as_extracted() {
        let pool = test_pool().await;
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config(tmp.path());

        let source_id = sqlx::query("INSERT INTO sources (name) VALUES ('registry')")
            .execute(&pool)
            .await
            .unwrap()
            .last_insert_rowid();

        // § 3 is below min_chars and gets dropped by the chunker, so the
        // source extracted more than it contributed to the merge.
        let text = format!("{}\n§ 3\nShort.", law_text());
        let mut doc = law("586/1992", &text);
        doc.source_id = Some(source_id);

        let plan = plan(&pool, &config, vec![doc]).await.unwrap();
        let n = plan.total_chunks();
        commit(&pool, &config, plan, fake_vectors(n)).await.unwrap();

        let (extracted, merged): (i64, i64) = sqlx::query_as(
            "SELECT chunks_extracted, chunks_merged FROM crawl_history WHERE source_id = ?",
        )
        .bind(source_id)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(merged, n as i64);
        assert_eq!(extracted, merged + 1);
    }

    #[tokio::test]
    async fn test_commit_rejects_vector_count_mismatch() {
        let pool = test_pool().await;
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config(tmp.path());

        let plan = plan(&pool, &config, vec![law("89/2012", &law_text())])
            .await
            .unwrap();
        assert!(commit(&pool, &config, plan, fake_vectors(1)).await.is_err());
    }

    #[test]
    fn test_read_feed_parses_json_lines() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("feed.jsonl");
        std::fs::write(
            &path,
            r#"{"canonical_id":"89/2012","document_type":"law","full_text":"text","retrieved_at":"2026-01-05T10:00:00Z"}

{"canonical_id":"I US 1/21","document_type":"court_decision","full_text":"ruling","retrieved_at":"2026-01-05T11:00:00Z"}
"#,
        )
        .unwrap();
        let docs = read_feed(&path).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].canonical_id, "89/2012");
        assert_eq!(docs[1].document_type, DocumentType::CourtDecision);
    }

    #[test]
    fn test_read_feed_reports_bad_line() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("feed.jsonl");
        std::fs::write(&path, "{not json}\n").unwrap();
        let err = read_feed(&path).unwrap_err();
        assert!(err.to_string().contains("line 1"));
    }
}
