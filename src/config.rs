use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub index: IndexConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub feedback: FeedbackConfig,
    #[serde(default)]
    pub gaps: GapsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// Directory holding the persisted triple (chunks, metadata, embeddings)
    /// plus the similarity index.
    pub dir: PathBuf,
    /// Directory receiving timestamped snapshots before every merge.
    pub backup_dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Maximum chunk length in characters. Oversized sections are split at
    /// the nearest sentence boundary before this limit.
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    /// Minimum chunk length; shorter segments are dropped as noise.
    #[serde(default = "default_min_chars")]
    pub min_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            min_chars: default_min_chars(),
        }
    }
}

fn default_max_chars() -> usize {
    2000
}
fn default_min_chars() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL for the Ollama provider.
    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            batch_size: 64,
            max_retries: 5,
            timeout_secs: 30,
            ollama_url: default_ollama_url(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct FeedbackConfig {
    /// A query whose best retrieval score falls below this threshold is
    /// flagged low-quality even without explicit negative feedback.
    #[serde(default = "default_low_score_threshold")]
    pub low_score_threshold: f64,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            low_score_threshold: default_low_score_threshold(),
        }
    }
}

fn default_low_score_threshold() -> f64 {
    0.4
}

#[derive(Debug, Deserialize, Clone)]
pub struct GapsConfig {
    /// Cosine-distance neighborhood radius for clustering.
    #[serde(default = "default_eps")]
    pub eps: f32,
    /// Minimum neighbors for a query to seed a cluster.
    #[serde(default = "default_min_cluster_size")]
    pub min_cluster_size: usize,
    /// How many recent low-quality queries to consider per batch.
    #[serde(default = "default_query_window")]
    pub query_window: usize,
}

impl Default for GapsConfig {
    fn default() -> Self {
        Self {
            eps: default_eps(),
            min_cluster_size: default_min_cluster_size(),
            query_window: default_query_window(),
        }
    }
}

fn default_eps() -> f32 {
    0.3
}
fn default_min_cluster_size() -> usize {
    3
}
fn default_query_window() -> usize {
    150
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.chunking.max_chars == 0 {
        anyhow::bail!("chunking.max_chars must be > 0");
    }
    if config.chunking.min_chars >= config.chunking.max_chars {
        anyhow::bail!("chunking.min_chars must be < chunking.max_chars");
    }

    if !(0.0..=1.0).contains(&config.feedback.low_score_threshold) {
        anyhow::bail!("feedback.low_score_threshold must be in [0.0, 1.0]");
    }

    if config.gaps.eps <= 0.0 || config.gaps.eps >= 2.0 {
        anyhow::bail!("gaps.eps must be in (0.0, 2.0) (cosine distance)");
    }
    if config.gaps.min_cluster_size == 0 {
        anyhow::bail!("gaps.min_cluster_size must be >= 1");
    }

    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn test_minimal_config() {
        let f = write_config(
            r#"
[db]
path = "/tmp/lexbase.sqlite"

[index]
dir = "/tmp/lexbase_index"
backup_dir = "/tmp/lexbase_backups"
"#,
        );
        let cfg = load_config(f.path()).unwrap();
        assert_eq!(cfg.chunking.max_chars, 2000);
        assert_eq!(cfg.chunking.min_chars, 100);
        assert!((cfg.feedback.low_score_threshold - 0.4).abs() < 1e-9);
        assert!((cfg.gaps.eps - 0.3).abs() < 1e-6);
        assert_eq!(cfg.gaps.min_cluster_size, 3);
        assert!(!cfg.embedding.is_enabled());
    }

    #[test]
    fn test_embedding_requires_model_and_dims() {
        let f = write_config(
            r#"
[db]
path = "/tmp/lexbase.sqlite"

[index]
dir = "/tmp/i"
backup_dir = "/tmp/b"

[embedding]
provider = "openai"
"#,
        );
        assert!(load_config(f.path()).is_err());
    }

    #[test]
    fn test_rejects_inverted_chunk_bounds() {
        let f = write_config(
            r#"
[db]
path = "/tmp/lexbase.sqlite"

[index]
dir = "/tmp/i"
backup_dir = "/tmp/b"

[chunking]
max_chars = 50
min_chars = 100
"#,
        );
        assert!(load_config(f.path()).is_err());
    }
}
