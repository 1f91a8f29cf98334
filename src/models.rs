//! Core data models for the lexbase pipeline.
//!
//! These types represent the documents, chunks, queries, and coverage gaps
//! that flow through ingestion, retrieval, and the feedback loop.

use anyhow::bail;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of legal document. Determines the segmentation strategy and the
/// metadata variant attached to each chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Law,
    CourtDecision,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Law => "law",
            DocumentType::CourtDecision => "court_decision",
        }
    }

    pub fn parse(s: &str) -> anyhow::Result<Self> {
        match s {
            "law" => Ok(DocumentType::Law),
            "court_decision" => Ok(DocumentType::CourtDecision),
            other => bail!(
                "Unknown document type: '{}'. Use law or court_decision.",
                other
            ),
        }
    }
}

/// Raw item yielded by an external crawler, before classification.
///
/// Crawlers may yield the same canonical id multiple times (re-crawls) and
/// different crawlers may yield byte-identical content under different ids;
/// both cases are resolved by [`crate::dedup::classify`].
#[derive(Debug, Clone, Deserialize)]
pub struct CrawledDocument {
    /// Externally meaningful identifier (law number or case number).
    pub canonical_id: String,
    pub document_type: DocumentType,
    #[serde(default)]
    pub title: Option<String>,
    pub full_text: String,
    /// Legal category for laws, legal area for court decisions.
    #[serde(default)]
    pub category: Option<String>,
    /// Issuing court, for court decisions.
    #[serde(default)]
    pub court_name: Option<String>,
    #[serde(default)]
    pub decision_date: Option<String>,
    #[serde(default)]
    pub ecli: Option<String>,
    #[serde(default)]
    pub source_url: Option<String>,
    pub retrieved_at: DateTime<Utc>,
    /// Row id in the `sources` table, when the crawler reports one.
    /// Used for crawl-history bookkeeping; ingestion works without it.
    #[serde(default)]
    pub source_id: Option<i64>,
}

/// A chunk produced by the chunker, before embedding.
///
/// `chunk_id` is deterministic (parent id + section label + ordinal) so that
/// re-chunking identical text yields identical ids across runs.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkDraft {
    pub chunk_id: String,
    pub ordinal: usize,
    pub text: String,
    pub section_label: String,
}

/// Per-chunk metadata stored in the index, parallel to the chunk texts and
/// the embedding matrix.
///
/// Tagged by document type with a fixed field set per variant, validated at
/// chunk-creation time rather than trusted at read time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "document_type", rename_all = "snake_case")]
pub enum ChunkMetadata {
    Law {
        chunk_id: String,
        law_number: String,
        #[serde(default)]
        law_name: Option<String>,
        section: String,
        #[serde(default)]
        category: Option<String>,
        #[serde(default)]
        source_url: Option<String>,
        content_hash: String,
        relevance_score: f32,
        added_at: String,
    },
    CourtDecision {
        chunk_id: String,
        case_number: String,
        #[serde(default)]
        court_name: Option<String>,
        section: String,
        #[serde(default)]
        category: Option<String>,
        #[serde(default)]
        decision_date: Option<String>,
        #[serde(default)]
        ecli: Option<String>,
        #[serde(default)]
        source_url: Option<String>,
        content_hash: String,
        relevance_score: f32,
        added_at: String,
    },
}

impl ChunkMetadata {
    pub fn chunk_id(&self) -> &str {
        match self {
            ChunkMetadata::Law { chunk_id, .. } => chunk_id,
            ChunkMetadata::CourtDecision { chunk_id, .. } => chunk_id,
        }
    }

    pub fn document_type(&self) -> DocumentType {
        match self {
            ChunkMetadata::Law { .. } => DocumentType::Law,
            ChunkMetadata::CourtDecision { .. } => DocumentType::CourtDecision,
        }
    }

    pub fn section(&self) -> &str {
        match self {
            ChunkMetadata::Law { section, .. } => section,
            ChunkMetadata::CourtDecision { section, .. } => section,
        }
    }

    pub fn category(&self) -> Option<&str> {
        match self {
            ChunkMetadata::Law { category, .. } => category.as_deref(),
            ChunkMetadata::CourtDecision { category, .. } => category.as_deref(),
        }
    }

    /// The canonical id of the parent document.
    pub fn parent_id(&self) -> &str {
        match self {
            ChunkMetadata::Law { law_number, .. } => law_number,
            ChunkMetadata::CourtDecision { case_number, .. } => case_number,
        }
    }
}

/// User feedback attached to a logged query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackType {
    ThumbsUp,
    ThumbsDown,
    Rating,
}

impl FeedbackType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackType::ThumbsUp => "thumbs_up",
            FeedbackType::ThumbsDown => "thumbs_down",
            FeedbackType::Rating => "rating",
        }
    }

    pub fn parse(s: &str) -> anyhow::Result<Self> {
        match s {
            "thumbs_up" => Ok(FeedbackType::ThumbsUp),
            "thumbs_down" => Ok(FeedbackType::ThumbsDown),
            "rating" => Ok(FeedbackType::Rating),
            other => bail!(
                "Unknown feedback type: '{}'. Use thumbs_up, thumbs_down, or rating.",
                other
            ),
        }
    }
}

/// A logged query read back for gap detection.
#[derive(Debug, Clone)]
pub struct LoggedQuery {
    pub id: i64,
    pub query_text: String,
    pub category: Option<String>,
    pub embedding: Vec<f32>,
    pub best_score: Option<f64>,
}

/// A detected coverage gap: a cluster of recurring, poorly-served queries
/// indicating missing knowledge-base content.
#[derive(Debug, Clone, Serialize)]
pub struct CoverageGap {
    /// Row id once persisted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    /// Keyword summary of the cluster.
    pub topic: String,
    /// Dominant category among member queries, if any.
    pub category: Option<String>,
    pub query_count: usize,
    pub avg_score: f64,
    pub priority_score: f64,
    /// `detected` or `resolved`.
    pub status: String,
    pub member_query_ids: Vec<i64>,
}
