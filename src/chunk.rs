//! Document chunking.
//!
//! Splits a document's full text into retrieval-sized, semantically bounded
//! segments with section labels. Segmentation is a pluggable strategy
//! selected by document type:
//!
//! - **[`SectionStrategy`]** — statute text, split on `§ N` paragraph markers.
//! - **[`ParagraphStrategy`]** — narrative decision text, paragraphs
//!   accumulated up to the length limit and labeled `Part N`.
//! - **[`FixedWindowStrategy`]** — fallback when no boundaries are detected.
//!
//! Length bounds are enforced independently of the strategy: segments over
//! `max_chars` are split at the nearest sentence boundary before the limit
//! (never mid-sentence; a remainder with no boundary is emitted whole), and
//! segments under `min_chars` are dropped as noise.
//!
//! Output is deterministic for identical input text: ordinals are contiguous
//! from 0 and chunk ids derive from the parent id, section label, and
//! ordinal. This makes re-indexing on content change safe.

use regex::Regex;
use std::sync::OnceLock;
use tracing::warn;

use crate::config::ChunkingConfig;
use crate::models::{ChunkDraft, DocumentType};

/// A labeled segment produced by a segmentation strategy, before length
/// bounds are applied.
#[derive(Debug, Clone)]
pub struct Segment {
    pub label: String,
    pub text: String,
}

/// Boundary-detection heuristic. Returns an empty vector when the text has
/// no detectable boundaries, in which case the caller falls back to fixed
/// windowing.
pub trait SegmentationStrategy {
    fn segment(&self, text: &str) -> Vec<Segment>;
}

fn section_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"§\s*\d+[a-z]?").expect("valid section marker regex"))
}

/// Splits statute text on legal paragraph markers (`§ N`). Each section
/// becomes one candidate segment labeled with its marker. Text before the
/// first marker (title header, publication notice) is not emitted.
pub struct SectionStrategy;

impl SegmentationStrategy for SectionStrategy {
    fn segment(&self, text: &str) -> Vec<Segment> {
        let re = section_marker();
        let markers: Vec<(usize, usize, String)> = re
            .find_iter(text)
            .map(|m| (m.start(), m.end(), m.as_str().to_string()))
            .collect();

        if markers.is_empty() {
            return Vec::new();
        }

        let mut segments = Vec::with_capacity(markers.len());
        for (i, (start, _end, marker)) in markers.iter().enumerate() {
            let body_end = markers.get(i + 1).map(|m| m.0).unwrap_or(text.len());
            let body = text[*start..body_end].trim();
            if body.is_empty() {
                continue;
            }
            // Normalize the label to "§ N" regardless of source spacing.
            let number = marker.trim_start_matches('§').trim();
            segments.push(Segment {
                label: format!("§ {}", number),
                text: body.to_string(),
            });
        }
        segments
    }
}

/// Accumulates blank-line-separated paragraphs into segments up to
/// `max_chars`, labeling them `Part 1`, `Part 2`, ... Used for narrative
/// court-decision text without statutory structure.
pub struct ParagraphStrategy {
    pub max_chars: usize,
}

impl SegmentationStrategy for ParagraphStrategy {
    fn segment(&self, text: &str) -> Vec<Segment> {
        if !text.contains("\n\n") {
            // No paragraph boundaries: degenerate input.
            return Vec::new();
        }

        let mut segments: Vec<Segment> = Vec::new();
        let mut current = String::new();
        let mut part = 1usize;

        let mut flush = |current: &mut String, part: &mut usize, segments: &mut Vec<Segment>| {
            if !current.trim().is_empty() {
                segments.push(Segment {
                    label: format!("Part {}", part),
                    text: current.trim().to_string(),
                });
                *part += 1;
            }
            current.clear();
        };

        for para in text.split("\n\n") {
            let para = para.trim();
            if para.is_empty() {
                continue;
            }
            if !current.is_empty() && current.len() + 2 + para.len() > self.max_chars {
                flush(&mut current, &mut part, &mut segments);
            }
            if !current.is_empty() {
                current.push_str("\n\n");
            }
            current.push_str(para);
        }
        flush(&mut current, &mut part, &mut segments);

        segments
    }
}

/// Fixed-size windowing fallback for text with no detectable structure.
/// Windows break at the last whitespace before `max_chars` when possible.
pub struct FixedWindowStrategy {
    pub max_chars: usize,
}

impl SegmentationStrategy for FixedWindowStrategy {
    fn segment(&self, text: &str) -> Vec<Segment> {
        let mut segments = Vec::new();
        let mut remaining = text.trim();
        let mut part = 1usize;

        while !remaining.is_empty() {
            if remaining.len() <= self.max_chars {
                segments.push(Segment {
                    label: format!("Part {}", part),
                    text: remaining.to_string(),
                });
                break;
            }
            let limit = floor_char_boundary(remaining, self.max_chars);
            let split_at = remaining[..limit]
                .rfind(char::is_whitespace)
                .map(|pos| pos + 1)
                .unwrap_or(limit);
            segments.push(Segment {
                label: format!("Part {}", part),
                text: remaining[..split_at].trim().to_string(),
            });
            part += 1;
            remaining = remaining[split_at..].trim_start();
        }
        segments
    }
}

/// Chunking result: the drafts that survived the length bounds, plus how
/// many pieces segmentation produced before the minimum-length filter. The
/// crawl history records both, so extraction and merge contribution are
/// tracked separately.
#[derive(Debug)]
pub struct ChunkOutput {
    pub drafts: Vec<ChunkDraft>,
    pub extracted: usize,
}

/// Chunk a document's full text according to its type.
///
/// The strategy produces labeled segments; length bounds are then enforced
/// and ordinals assigned. Strategies that find no boundaries trigger the
/// fixed-window fallback (logged as a warning, never fatal).
pub fn chunk_document(
    canonical_id: &str,
    document_type: DocumentType,
    text: &str,
    limits: &ChunkingConfig,
) -> ChunkOutput {
    let strategy: Box<dyn SegmentationStrategy> = match document_type {
        DocumentType::Law => Box::new(SectionStrategy),
        DocumentType::CourtDecision => Box::new(ParagraphStrategy {
            max_chars: limits.max_chars,
        }),
    };

    let mut segments = strategy.segment(text);
    if segments.is_empty() {
        warn!(
            canonical_id,
            document_type = document_type.as_str(),
            "no section or paragraph boundaries detected; falling back to fixed windows"
        );
        segments = FixedWindowStrategy {
            max_chars: limits.max_chars,
        }
        .segment(text);
    }

    let mut drafts = Vec::new();
    let mut extracted = 0usize;
    let mut ordinal = 0usize;

    for segment in &segments {
        for piece in split_at_sentence_bounds(&segment.text, limits.max_chars) {
            extracted += 1;
            if piece.len() < limits.min_chars {
                continue;
            }
            drafts.push(ChunkDraft {
                chunk_id: chunk_id(canonical_id, document_type, &segment.label, ordinal),
                ordinal,
                text: piece,
                section_label: segment.label.clone(),
            });
            ordinal += 1;
        }
    }

    ChunkOutput { drafts, extracted }
}

/// Deterministic chunk id: parent id + section label + ordinal.
fn chunk_id(
    canonical_id: &str,
    document_type: DocumentType,
    section_label: &str,
    ordinal: usize,
) -> String {
    let prefix = match document_type {
        DocumentType::Law => "law",
        DocumentType::CourtDecision => "case",
    };
    let id = canonical_id.replace(char::is_whitespace, "_");
    let label = section_label.replace(char::is_whitespace, "_");
    format!("{}_{}_{}_{}", prefix, id, label, ordinal)
}

/// Split `text` into pieces no longer than `max_chars`, breaking at the
/// nearest sentence boundary before the limit. A remainder containing no
/// sentence boundary within the limit is emitted whole rather than split
/// mid-sentence.
fn split_at_sentence_bounds(text: &str, max_chars: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut remaining = text.trim();

    while remaining.len() > max_chars {
        match last_sentence_boundary(remaining, max_chars) {
            Some(split) => {
                pieces.push(remaining[..split].trim().to_string());
                remaining = remaining[split..].trim_start();
            }
            None => break,
        }
    }
    if !remaining.is_empty() {
        pieces.push(remaining.to_string());
    }
    pieces
}

/// Byte offset just after the last sentence terminator (`.`, `!`, `?`
/// followed by whitespace) at or before `limit`. Returns `None` when the
/// window contains no such boundary.
fn last_sentence_boundary(text: &str, limit: usize) -> Option<usize> {
    let limit = floor_char_boundary(text, limit);
    let window = &text[..limit];
    let mut last = None;
    let mut chars = window.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if !matches!(c, '.' | '!' | '?') {
            continue;
        }
        let end = i + c.len_utf8();
        let followed_by_space = match chars.peek() {
            Some(&(_, next)) => next.is_whitespace(),
            // Terminator sits at the window edge; look one char past it.
            None => text[end..]
                .chars()
                .next()
                .map(|n| n.is_whitespace())
                .unwrap_or(false),
        };
        if followed_by_space {
            last = Some(end);
        }
    }
    last
}

/// Largest char boundary at or below `i`.
fn floor_char_boundary(s: &str, mut i: usize) -> usize {
    if i >= s.len() {
        return s.len();
    }
    while !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}
