//! Content deduplication.
//!
//! Classifies a crawled document as new, unchanged, or a content-identical
//! duplicate of a different canonical id. Deduplication is double-keyed:
//! the canonical id resolves re-crawls of the same document, and the
//! content fingerprint catches byte-identical text published under
//! different external ids (observed across court-decision endpoints).
//!
//! Classification has no side effects; callers act on the verdict.

use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use tracing::warn;

use crate::models::DocumentType;

/// Outcome of classifying a crawled document against the fingerprint store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Content not seen before, or new content under an existing canonical
    /// id (update in place, triggers re-chunk and re-embed).
    New,
    /// Same canonical id, same fingerprint. No-op.
    Unchanged,
    /// Different canonical id, identical normalized content. Discarded;
    /// the payload names the canonical id already indexed.
    DuplicateOf(String),
}

/// Collapse whitespace runs and trim, so that formatting-only differences
/// between crawl endpoints do not defeat duplicate detection.
pub fn normalize_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_was_space = true;
    for ch in text.chars() {
        if ch.is_whitespace() {
            if !last_was_space {
                out.push(' ');
                last_was_space = true;
            }
        } else {
            out.push(ch);
            last_was_space = false;
        }
    }
    while out.ends_with(' ') {
        out.pop();
    }
    out
}

/// SHA-256 hex digest over normalized text.
pub fn content_fingerprint(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_text(text).as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Classify a crawled document.
///
/// Lookup order:
/// 1. canonical id match with identical fingerprint → [`Verdict::Unchanged`]
/// 2. canonical id match with different fingerprint → [`Verdict::New`]
/// 3. fingerprint seen under another canonical id → [`Verdict::DuplicateOf`]
/// 4. neither → [`Verdict::New`]
///
/// Fails closed: if the fingerprint store cannot be queried, the document
/// is reported [`Verdict::Unchanged`] so that an outage can never cause a
/// duplicate insertion.
pub async fn classify(
    pool: &SqlitePool,
    canonical_id: &str,
    document_type: DocumentType,
    full_text: &str,
) -> Verdict {
    let fingerprint = content_fingerprint(full_text);

    match lookup(pool, canonical_id, document_type, &fingerprint).await {
        Ok(verdict) => verdict,
        Err(e) => {
            warn!(
                canonical_id,
                error = %e,
                "fingerprint store unavailable; treating document as unchanged"
            );
            Verdict::Unchanged
        }
    }
}

async fn lookup(
    pool: &SqlitePool,
    canonical_id: &str,
    document_type: DocumentType,
    fingerprint: &str,
) -> anyhow::Result<Verdict> {
    let existing: Option<String> = sqlx::query_scalar(
        "SELECT content_hash FROM documents
         WHERE canonical_id = ? AND document_type = ? AND superseded = 0",
    )
    .bind(canonical_id)
    .bind(document_type.as_str())
    .fetch_optional(pool)
    .await?;

    if let Some(existing_hash) = existing {
        if existing_hash == fingerprint {
            return Ok(Verdict::Unchanged);
        }
        // Same id, new content: update in place.
        return Ok(Verdict::New);
    }

    // No id match; is this content already indexed under another id?
    let duplicate = sqlx::query(
        "SELECT canonical_id FROM documents
         WHERE content_hash = ? AND document_type = ? AND superseded = 0",
    )
    .bind(fingerprint)
    .bind(document_type.as_str())
    .fetch_optional(pool)
    .await?;

    if let Some(row) = duplicate {
        return Ok(Verdict::DuplicateOf(row.get("canonical_id")));
    }

    Ok(Verdict::New)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_collapses_whitespace() {
        assert_eq!(normalize_text("  a\t b\n\nc  "), "a b c");
        assert_eq!(normalize_text(""), "");
        assert_eq!(normalize_text("   \n\t "), "");
    }

    #[test]
    fn test_fingerprint_ignores_formatting() {
        let a = content_fingerprint("Section 1.\n\nThe tax rate is 21%.");
        let b = content_fingerprint("Section 1. The   tax rate is 21%.");
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_distinguishes_content() {
        let a = content_fingerprint("The tax rate is 21%.");
        let b = content_fingerprint("The tax rate is 15%.");
        assert_ne!(a, b);
    }

    #[test]
    fn test_fingerprint_is_deterministic() {
        let text = "Act No. 89/2012, the Civil Code.";
        assert_eq!(content_fingerprint(text), content_fingerprint(text));
    }

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        // Minimal documents table for classification lookups.
        sqlx::query(
            r#"
            CREATE TABLE documents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                canonical_id TEXT NOT NULL,
                document_type TEXT NOT NULL,
                full_text TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                retrieved_at INTEGER NOT NULL DEFAULT 0,
                indexed INTEGER NOT NULL DEFAULT 0,
                superseded INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&pool)
        .await
        .unwrap();
        pool
    }

    async fn insert_doc(pool: &SqlitePool, canonical_id: &str, doc_type: &str, text: &str) {
        sqlx::query(
            "INSERT INTO documents (canonical_id, document_type, full_text, content_hash, indexed)
             VALUES (?, ?, ?, ?, 1)",
        )
        .bind(canonical_id)
        .bind(doc_type)
        .bind(text)
        .bind(content_fingerprint(text))
        .execute(pool)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_classify_new_document() {
        let pool = test_pool().await;
        let verdict = classify(&pool, "89/2012", DocumentType::Law, "Civil Code text").await;
        assert_eq!(verdict, Verdict::New);
    }

    #[tokio::test]
    async fn test_classify_unchanged_on_recrawl() {
        let pool = test_pool().await;
        insert_doc(&pool, "89/2012", "law", "Civil Code text").await;
        let verdict = classify(&pool, "89/2012", DocumentType::Law, "Civil Code text").await;
        assert_eq!(verdict, Verdict::Unchanged);
    }

    #[tokio::test]
    async fn test_classify_new_content_under_same_id() {
        let pool = test_pool().await;
        insert_doc(&pool, "89/2012", "law", "Civil Code text").await;
        let verdict = classify(&pool, "89/2012", DocumentType::Law, "Amended Civil Code").await;
        assert_eq!(verdict, Verdict::New);
    }

    #[tokio::test]
    async fn test_classify_cross_id_duplicate() {
        let pool = test_pool().await;
        insert_doc(&pool, "II US 123/2020", "court_decision", "Identical ruling text").await;
        let verdict = classify(
            &pool,
            "ECLI:CZ:US:2020:123",
            DocumentType::CourtDecision,
            "Identical  ruling\ntext",
        )
        .await;
        assert_eq!(verdict, Verdict::DuplicateOf("II US 123/2020".to_string()));
    }

    #[tokio::test]
    async fn test_classify_same_content_different_type_is_new() {
        let pool = test_pool().await;
        insert_doc(&pool, "89/2012", "law", "Shared text").await;
        let verdict = classify(&pool, "I US 1/21", DocumentType::CourtDecision, "Shared text").await;
        assert_eq!(verdict, Verdict::New);
    }

    #[tokio::test]
    async fn test_classify_fails_closed_when_store_missing() {
        // No documents table at all: every lookup errors.
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        let verdict = classify(&pool, "89/2012", DocumentType::Law, "Civil Code text").await;
        assert_eq!(verdict, Verdict::Unchanged);
    }
}
