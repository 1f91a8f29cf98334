//! Persistent vector index store.
//!
//! The index is a triple of parallel artifacts plus a search structure:
//!
//! - `chunks.json`      chunk texts, position i belongs to chunk i
//! - `metadata.json`    per-chunk metadata, same order
//! - `embeddings.bin`   row-major f32 matrix, row i embeds chunk i
//! - `index.bin`        the flat inner-product index rebuilt at merge time
//!
//! The alignment invariant (`texts.len() == metadata.len() == rows`) is
//! checked on every load and before every commit. A merge that would break
//! it aborts with the previous state intact.
//!
//! # Merge protocol
//!
//! 1. acquire the lock file (`.merge.lock`, created exclusively)
//! 2. snapshot the current artifacts into a timestamped backup directory
//! 3. load, append, rebuild the search structure from scratch
//! 4. verify alignment, then write each artifact to a temp file and rename
//!
//! The lock is advisory and scoped to the process that holds it; it is
//! removed on drop. A crash between renames leaves a mixed state, which the
//! next load detects as misaligned and repairs from the latest backup.

use anyhow::{Context, Result};
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::IndexConfig;
use crate::models::{ChunkMetadata, DocumentType};

const CHUNKS_FILE: &str = "chunks.json";
const METADATA_FILE: &str = "metadata.json";
const EMBEDDINGS_FILE: &str = "embeddings.bin";
const INDEX_FILE: &str = "index.bin";
const LOCK_FILE: &str = ".merge.lock";
const ARTIFACTS: [&str; 4] = [CHUNKS_FILE, METADATA_FILE, EMBEDDINGS_FILE, INDEX_FILE];

/// Matrix file magic: "LXB1".
const MATRIX_MAGIC: [u8; 4] = *b"LXB1";

#[derive(Debug, Error)]
pub enum IndexError {
    /// No index has been built yet. Searches report this as the index being
    /// unavailable; merges start from an empty state instead.
    #[error("no index found in {0}")]
    Missing(PathBuf),
    /// An artifact failed to parse or failed its integrity check.
    #[error("index corrupt: {0}")]
    Corrupt(String),
    /// The parallel artifacts disagree on length or dimensionality.
    #[error("index artifacts misaligned: {0}")]
    Misaligned(String),
    /// Another merge holds the lock file.
    #[error("merge already in progress (lock file {0} exists)")]
    Locked(PathBuf),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Brute-force inner-product index over L2-normalized rows. With unit rows,
/// inner product equals cosine similarity.
#[derive(Debug, Clone)]
pub struct FlatIndex {
    dims: usize,
    data: Vec<f32>,
}

impl FlatIndex {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            data: Vec::new(),
        }
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn len(&self) -> usize {
        if self.dims == 0 {
            0
        } else {
            self.data.len() / self.dims
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn add(&mut self, row: &[f32]) -> Result<(), IndexError> {
        if row.len() != self.dims {
            return Err(IndexError::Misaligned(format!(
                "vector has {} dims, index expects {}",
                row.len(),
                self.dims
            )));
        }
        self.data.extend_from_slice(row);
        Ok(())
    }

    pub fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.dims..(i + 1) * self.dims]
    }

    /// Top-k rows by inner product with the query, best first. Ties broken
    /// by lower row index so results are deterministic.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(usize, f32)> {
        if query.len() != self.dims || self.is_empty() || k == 0 {
            return Vec::new();
        }
        let mut scored: Vec<(usize, f32)> = (0..self.len())
            .map(|i| {
                let dot: f32 = self.row(i).iter().zip(query.iter()).map(|(a, b)| a * b).sum();
                (i, dot)
            })
            .collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        scored.truncate(k);
        scored
    }
}

/// In-memory view of the persisted index.
#[derive(Debug)]
pub struct IndexState {
    pub chunk_texts: Vec<String>,
    pub chunk_metadata: Vec<ChunkMetadata>,
    pub index: FlatIndex,
}

impl IndexState {
    pub fn empty(dims: usize) -> Self {
        Self {
            chunk_texts: Vec::new(),
            chunk_metadata: Vec::new(),
            index: FlatIndex::new(dims),
        }
    }

    pub fn len(&self) -> usize {
        self.chunk_texts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunk_texts.is_empty()
    }

    fn check_alignment(&self) -> Result<(), IndexError> {
        let (t, m, r) = (
            self.chunk_texts.len(),
            self.chunk_metadata.len(),
            self.index.len(),
        );
        if t != m || t != r {
            return Err(IndexError::Misaligned(format!(
                "{} texts, {} metadata entries, {} vectors",
                t, m, r
            )));
        }
        Ok(())
    }
}

/// Optional metadata filters applied after similarity search.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub document_type: Option<DocumentType>,
    pub category: Option<String>,
}

impl SearchFilter {
    pub fn is_empty(&self) -> bool {
        self.document_type.is_none() && self.category.is_none()
    }

    pub fn matches(&self, meta: &ChunkMetadata) -> bool {
        if let Some(dt) = self.document_type {
            if meta.document_type() != dt {
                return false;
            }
        }
        if let Some(cat) = &self.category {
            match meta.category() {
                Some(c) if c.eq_ignore_ascii_case(cat) => {}
                _ => return false,
            }
        }
        true
    }
}

/// A single search hit.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub chunk_id: String,
    pub text: String,
    pub score: f32,
    pub metadata: ChunkMetadata,
}

/// Search the loaded index. When filters are present the index is
/// over-fetched by 10x before filtering, since the flat index cannot filter
/// during the scan.
pub fn search(
    state: &IndexState,
    query: &[f32],
    k: usize,
    filter: &SearchFilter,
) -> Vec<SearchResult> {
    let fetch = if filter.is_empty() {
        k
    } else {
        k.saturating_mul(10)
    };
    let mut results = Vec::new();
    for (row, score) in state.index.search(query, fetch) {
        let meta = &state.chunk_metadata[row];
        if !filter.matches(meta) {
            continue;
        }
        results.push(SearchResult {
            chunk_id: meta.chunk_id().to_string(),
            text: state.chunk_texts[row].clone(),
            score,
            metadata: meta.clone(),
        });
        if results.len() == k {
            break;
        }
    }
    results
}

/// Summary returned by [`merge`].
#[derive(Debug)]
pub struct MergeReport {
    pub added: usize,
    pub total: usize,
    pub backup: Option<PathBuf>,
}

/// A lock older than this is assumed to be left over from a crash; no
/// merge holds the lock for anywhere near this long.
const STALE_LOCK_SECS: u64 = 600;

/// Advisory lock held for the duration of a merge. Removed on drop. A lock
/// file whose recorded process is gone, or that has outlived
/// [`STALE_LOCK_SECS`], is reclaimed instead of blocking merges forever.
struct MergeLock {
    path: PathBuf,
}

impl MergeLock {
    fn acquire(dir: &Path) -> Result<Self, IndexError> {
        fs::create_dir_all(dir)?;
        let path = dir.join(LOCK_FILE);
        match Self::try_create(&path)? {
            Some(lock) => Ok(lock),
            None if lock_is_stale(&path) => {
                warn!(path = %path.display(), "reclaiming stale merge lock");
                let _ = fs::remove_file(&path);
                Self::try_create(&path)?.ok_or(IndexError::Locked(path))
            }
            None => Err(IndexError::Locked(path)),
        }
    }

    fn try_create(path: &Path) -> Result<Option<Self>, IndexError> {
        match fs::OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(mut f) => {
                let _ = writeln!(f, "{}", std::process::id());
                Ok(Some(Self {
                    path: path.to_path_buf(),
                }))
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

fn lock_is_stale(path: &Path) -> bool {
    if let Ok(contents) = fs::read_to_string(path) {
        if let Ok(pid) = contents.trim().parse::<u32>() {
            if pid != std::process::id() && !process_alive(pid) {
                return true;
            }
        }
    }
    match fs::metadata(path).and_then(|m| m.modified()) {
        Ok(modified) => modified
            .elapsed()
            .map(|age| age.as_secs() > STALE_LOCK_SECS)
            .unwrap_or(false),
        Err(_) => false,
    }
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

#[cfg(not(target_os = "linux"))]
fn process_alive(_pid: u32) -> bool {
    true
}

impl Drop for MergeLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to remove merge lock");
        }
    }
}

/// Load the index from disk, verifying the alignment invariant.
pub fn load(dir: &Path) -> Result<IndexState, IndexError> {
    if !dir.join(CHUNKS_FILE).exists() {
        return Err(IndexError::Missing(dir.to_path_buf()));
    }

    let chunk_texts: Vec<String> = read_json(&dir.join(CHUNKS_FILE))?;
    let chunk_metadata: Vec<ChunkMetadata> = read_json(&dir.join(METADATA_FILE))?;
    let (dims, matrix) = read_matrix(&dir.join(EMBEDDINGS_FILE))?;
    let (index_dims, index_data) = read_matrix(&dir.join(INDEX_FILE))?;

    if dims != index_dims || matrix.len() != index_data.len() {
        return Err(IndexError::Misaligned(
            "embedding matrix and search index disagree".to_string(),
        ));
    }

    let state = IndexState {
        chunk_texts,
        chunk_metadata,
        index: FlatIndex {
            dims: index_dims,
            data: index_data,
        },
    };
    state.check_alignment()?;
    Ok(state)
}

/// Load the index, restoring from the most recent backup when the on-disk
/// state is corrupt or misaligned. A missing index is passed through.
pub fn load_or_restore(config: &IndexConfig) -> Result<IndexState, IndexError> {
    match load(&config.dir) {
        Ok(state) => Ok(state),
        Err(e @ IndexError::Missing(_)) => Err(e),
        Err(e) => {
            warn!(error = %e, "index failed to load; attempting restore from backup");
            let backup = latest_backup(&config.backup_dir)?.ok_or(e)?;
            restore_backup(&backup, &config.dir)?;
            info!(backup = %backup.display(), "restored index from backup");
            load(&config.dir)
        }
    }
}

/// Append new chunks to the index and atomically replace the on-disk
/// artifacts. New vectors must already be L2-normalized.
pub fn merge(
    config: &IndexConfig,
    new_texts: Vec<String>,
    new_metadata: Vec<ChunkMetadata>,
    new_vectors: Vec<Vec<f32>>,
) -> Result<MergeReport, IndexError> {
    if new_texts.len() != new_metadata.len() || new_texts.len() != new_vectors.len() {
        return Err(IndexError::Misaligned(format!(
            "merge batch: {} texts, {} metadata entries, {} vectors",
            new_texts.len(),
            new_metadata.len(),
            new_vectors.len()
        )));
    }
    if new_texts.is_empty() {
        return Err(IndexError::Corrupt("empty merge batch".to_string()));
    }
    let dims = new_vectors[0].len();
    if dims == 0 {
        return Err(IndexError::Corrupt("zero-dimensional vectors".to_string()));
    }

    let _lock = MergeLock::acquire(&config.dir)?;

    let backup = backup_current(config)?;

    let mut state = match load(&config.dir) {
        Ok(state) => state,
        Err(IndexError::Missing(_)) => IndexState::empty(dims),
        Err(e) => return Err(e),
    };
    if state.index.dims() != dims {
        return Err(IndexError::Misaligned(format!(
            "existing index has {} dims, new vectors have {}",
            state.index.dims(),
            dims
        )));
    }

    // Full rebuild: existing rows first, then the new batch, so row order
    // stays stable across merges.
    let mut rebuilt = FlatIndex::new(dims);
    for i in 0..state.index.len() {
        rebuilt.add(state.index.row(i))?;
    }
    for v in &new_vectors {
        rebuilt.add(v)?;
    }

    let added = new_texts.len();
    state.chunk_texts.extend(new_texts);
    state.chunk_metadata.extend(new_metadata);
    state.index = rebuilt;
    state.check_alignment()?;

    write_artifacts(&config.dir, &state)?;

    Ok(MergeReport {
        added,
        total: state.len(),
        backup,
    })
}

/// Backup directories under the configured backup root, newest first.
pub fn list_backups(backup_dir: &Path) -> Result<Vec<PathBuf>, IndexError> {
    if !backup_dir.exists() {
        return Ok(Vec::new());
    }
    let mut dirs: Vec<PathBuf> = fs::read_dir(backup_dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.is_dir()
                && p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with("rag_backup_"))
                    .unwrap_or(false)
        })
        .collect();
    dirs.sort();
    dirs.reverse();
    Ok(dirs)
}

fn latest_backup(backup_dir: &Path) -> Result<Option<PathBuf>, IndexError> {
    Ok(list_backups(backup_dir)?.into_iter().next())
}

fn backup_current(config: &IndexConfig) -> Result<Option<PathBuf>, IndexError> {
    if !config.dir.join(CHUNKS_FILE).exists() {
        return Ok(None);
    }
    fs::create_dir_all(&config.backup_dir)?;
    let stamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
    let mut target = config.backup_dir.join(format!("rag_backup_{}", stamp));
    let mut suffix = 1;
    while target.exists() {
        suffix += 1;
        target = config
            .backup_dir
            .join(format!("rag_backup_{}_{}", stamp, suffix));
    }
    fs::create_dir_all(&target)?;
    for name in ARTIFACTS {
        let src = config.dir.join(name);
        if src.exists() {
            fs::copy(&src, target.join(name))?;
        }
    }
    info!(backup = %target.display(), "index snapshot written");
    Ok(Some(target))
}

fn restore_backup(backup: &Path, dir: &Path) -> Result<(), IndexError> {
    fs::create_dir_all(dir)?;
    for name in ARTIFACTS {
        let src = backup.join(name);
        if src.exists() {
            fs::copy(&src, dir.join(name))?;
        }
    }
    Ok(())
}

fn write_artifacts(dir: &Path, state: &IndexState) -> Result<(), IndexError> {
    fs::create_dir_all(dir)?;
    write_json_atomic(&dir.join(CHUNKS_FILE), &state.chunk_texts)?;
    write_json_atomic(&dir.join(METADATA_FILE), &state.chunk_metadata)?;
    write_matrix_atomic(
        &dir.join(EMBEDDINGS_FILE),
        state.index.dims(),
        &state.index.data,
    )?;
    write_matrix_atomic(&dir.join(INDEX_FILE), state.index.dims(), &state.index.data)?;
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, IndexError> {
    let content = fs::read_to_string(path)?;
    serde_json::from_str(&content)
        .map_err(|e| IndexError::Corrupt(format!("{}: {}", path.display(), e)))
}

fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), IndexError> {
    let json = serde_json::to_string(value)
        .map_err(|e| IndexError::Corrupt(format!("serialize {}: {}", path.display(), e)))?;
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn read_matrix(path: &Path) -> Result<(usize, Vec<f32>), IndexError> {
    let bytes = fs::read(path)?;
    if bytes.len() < 12 || bytes[0..4] != MATRIX_MAGIC {
        return Err(IndexError::Corrupt(format!(
            "{}: bad header",
            path.display()
        )));
    }
    let dims = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
    let rows = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize;
    let expected = 12 + dims * rows * 4;
    if bytes.len() != expected {
        return Err(IndexError::Corrupt(format!(
            "{}: expected {} bytes for {}x{}, found {}",
            path.display(),
            expected,
            rows,
            dims,
            bytes.len()
        )));
    }
    let data = bytes[12..]
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    Ok((dims, data))
}

fn write_matrix_atomic(path: &Path, dims: usize, data: &[f32]) -> Result<(), IndexError> {
    let rows = if dims == 0 { 0 } else { data.len() / dims };
    let mut bytes = Vec::with_capacity(12 + data.len() * 4);
    bytes.extend_from_slice(&MATRIX_MAGIC);
    bytes.extend_from_slice(&(dims as u32).to_le_bytes());
    bytes.extend_from_slice(&(rows as u32).to_le_bytes());
    for x in data {
        bytes.extend_from_slice(&x.to_le_bytes());
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Human-readable summary of the on-disk index for the stats command.
pub fn describe(config: &IndexConfig) -> Result<String> {
    match load(&config.dir) {
        Ok(state) => {
            let laws = state
                .chunk_metadata
                .iter()
                .filter(|m| m.document_type() == DocumentType::Law)
                .count();
            Ok(format!(
                "{} chunks ({} law, {} court decision), {} dims",
                state.len(),
                laws,
                state.len() - laws,
                state.index.dims()
            ))
        }
        Err(IndexError::Missing(_)) => Ok("no index built yet".to_string()),
        Err(e) => Err(e).context("failed to load index"),
    }
}
