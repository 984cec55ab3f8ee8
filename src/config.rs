//! TOML configuration parsing and validation.
//!
//! Every section has serde defaults, so an empty file (or no file at all)
//! yields a fully usable configuration. [`load_config`] validates the
//! result and clamps `chunk_overlap` to `chunk_size - 1` when a config
//! asks for an overlap that would never let a chunk close.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub chat: ChatConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Target chunk size in whitespace-delimited words.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Words of shared context carried from one chunk into the next.
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    /// Upper bound on concurrently processing documents.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// When false, the table detection step is marked Skipped.
    #[serde(default = "default_extract_tables")]
    pub extract_tables: bool,
    /// Minimum non-whitespace characters extraction must yield for the
    /// OCR step to be skipped.
    #[serde(default = "default_ocr_text_threshold")]
    pub ocr_text_threshold: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            extract_tables: default_extract_tables(),
            ocr_text_threshold: default_ocr_text_threshold(),
        }
    }
}

fn default_max_workers() -> usize {
    4
}
fn default_extract_tables() -> bool {
    true
}
fn default_ocr_text_threshold() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Hits requested from each attached document's collection.
    #[serde(default = "default_per_document_k")]
    pub per_document_k: usize,
    /// Global result count after cross-document re-ranking.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            per_document_k: default_per_document_k(),
            top_k: default_top_k(),
        }
    }
}

fn default_per_document_k() -> usize {
    3
}
fn default_top_k() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    /// Trailing messages serialized into the retrieval query.
    #[serde(default = "default_context_window")]
    pub context_window: usize,
    #[serde(default = "default_max_documents_per_chat")]
    pub max_documents_per_chat: usize,
    /// Default completion provider for new sessions.
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Model identifier passed to providers that need one.
    #[serde(default)]
    pub model: Option<String>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            context_window: default_context_window(),
            max_documents_per_chat: default_max_documents_per_chat(),
            provider: default_provider(),
            model: None,
        }
    }
}

fn default_context_window() -> usize {
    5
}
fn default_max_documents_per_chat() -> usize {
    5
}
fn default_provider() -> String {
    "extractive".to_string()
}

/// Load and validate a configuration file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(config)
}

/// Validate and normalize a configuration.
pub fn validate(mut config: Config) -> Result<Config> {
    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }

    // Overlap must leave room for new content in every chunk.
    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        let clamped = config.chunking.chunk_size - 1;
        tracing::warn!(
            requested = config.chunking.chunk_overlap,
            clamped,
            "chunking.chunk_overlap >= chunk_size; clamping"
        );
        config.chunking.chunk_overlap = clamped;
    }

    if config.pipeline.max_workers == 0 {
        anyhow::bail!("pipeline.max_workers must be >= 1");
    }

    if config.retrieval.top_k == 0 || config.retrieval.per_document_k == 0 {
        anyhow::bail!("retrieval.top_k and retrieval.per_document_k must be >= 1");
    }

    if config.chat.max_documents_per_chat == 0 {
        anyhow::bail!("chat.max_documents_per_chat must be >= 1");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = validate(Config::default()).unwrap();
        assert_eq!(config.chunking.chunk_size, 1000);
        assert_eq!(config.chunking.chunk_overlap, 200);
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.chat.provider, "extractive");
    }

    #[test]
    fn empty_toml_parses_to_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.pipeline.max_workers, 4);
        assert_eq!(config.retrieval.per_document_k, 3);
    }

    #[test]
    fn overlap_at_or_above_chunk_size_is_clamped() {
        let config: Config = toml::from_str(
            "[chunking]\nchunk_size = 50\nchunk_overlap = 50\n",
        )
        .unwrap();
        let config = validate(config).unwrap();
        assert_eq!(config.chunking.chunk_overlap, 49);
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        let config: Config = toml::from_str("[chunking]\nchunk_size = 0\n").unwrap();
        assert!(validate(config).is_err());
    }

    #[test]
    fn zero_workers_rejected() {
        let config: Config = toml::from_str("[pipeline]\nmax_workers = 0\n").unwrap();
        assert!(validate(config).is_err());
    }
}
