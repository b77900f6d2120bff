//! Configuration management for ragcore
//!
//! Application settings live in a TOML file (storage location, embedding backend,
//! channel timeouts, graph view limits, import chunking). Retrieval profiles are
//! not part of this file: they are versioned records in the profile store.

use crate::error::{RagError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

mod validator;

pub use validator::ConfigValidator;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub retrieval: RetrievalConfig,
    pub graph: GraphConfig,
    pub import: ImportConfig,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
    #[serde(default = "current_timestamp")]
    pub last_modified: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub database_file: String,
}

impl StorageConfig {
    /// Full path of the SQLite database, with `~/` expanded
    pub fn database_path(&self) -> Result<PathBuf> {
        Ok(expand_path(&self.data_dir)?.join(&self.database_file))
    }

    /// Directory of the persisted keyword index
    pub fn keyword_index_path(&self) -> Result<PathBuf> {
        Ok(expand_path(&self.data_dir)?.join("keyword_index"))
    }
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// "fastembed" (local ONNX model) or "hash" (deterministic feature hashing)
    pub backend: String,
    pub model: String,
    pub dimension: usize,
    pub batch_size: usize,
    pub max_concurrent: usize,
}

/// Retrieval engine settings that are not part of a retrieval profile
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    pub default_top_k: usize,
    /// Per-channel generator timeout in milliseconds
    pub channel_timeout_ms: u64,
    pub snippet_max_chars: usize,
    /// Recent conversation turns kept for co-reference resolution
    pub history_turns: usize,
}

/// Knowledge graph settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    pub persist_snapshots: bool,
    pub max_entities_per_chunk: usize,
    pub view_node_limit: usize,
    pub view_edge_limit: usize,
}

/// Document import settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub extensions: Vec<String>,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(RagError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| RagError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        config.apply_env_overrides();

        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| RagError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: RAGCORE_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        for (key, value) in std::env::vars() {
            if let Some(config_key) = key.strip_prefix("RAGCORE_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "STORAGE__DATA_DIR" => {
                self.storage.data_dir = PathBuf::from(value);
            }
            "EMBEDDING__BACKEND" => {
                self.embedding.backend = value.to_string();
            }
            "EMBEDDING__MODEL" => {
                self.embedding.model = value.to_string();
            }
            "RETRIEVAL__DEFAULT_TOP_K" => {
                self.retrieval.default_top_k = parse_env(path, value)?;
            }
            "RETRIEVAL__CHANNEL_TIMEOUT_MS" => {
                self.retrieval.channel_timeout_ms = parse_env(path, value)?;
            }
            "GRAPH__PERSIST_SNAPSHOTS" => {
                self.graph.persist_snapshots = parse_env(path, value)?;
            }
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| RagError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("ragcore").join("config.toml"))
    }

    /// Get the default data directory
    pub fn default_data_dir() -> Result<PathBuf> {
        let home_dir = dirs::home_dir()
            .ok_or_else(|| RagError::Config("Cannot determine home directory".to_string()))?;

        Ok(home_dir.join(".ragcore"))
    }
}

fn parse_env<T: std::str::FromStr>(path: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| RagError::InvalidConfigValue {
        path: path.to_string(),
        message: format!("Cannot parse '{}'", value),
    })
}

/// Expand a leading `~/` to the home directory
pub fn expand_path(path: &Path) -> Result<PathBuf> {
    let path_str = path
        .to_str()
        .ok_or_else(|| RagError::Config("Invalid path encoding".to_string()))?;

    if let Some(stripped) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| RagError::Config("Cannot determine home directory".to_string()))?;
        Ok(home.join(stripped))
    } else {
        Ok(path.to_path_buf())
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: "fastembed".to_string(),
            model: "all-MiniLM-L6-v2".to_string(),
            dimension: 384,
            batch_size: 32,
            max_concurrent: 4,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            meta: MetaConfig {
                schema_version: "1.0.0".to_string(),
                created_at: current_timestamp(),
                last_modified: current_timestamp(),
            },
            storage: StorageConfig {
                data_dir: PathBuf::from("~/.ragcore"),
                database_file: "ragcore.db".to_string(),
            },
            embedding: EmbeddingConfig::default(),
            retrieval: RetrievalConfig {
                default_top_k: 6,
                channel_timeout_ms: 3000,
                snippet_max_chars: 500,
                history_turns: 4,
            },
            graph: GraphConfig {
                persist_snapshots: true,
                max_entities_per_chunk: 20,
                view_node_limit: 80,
                view_edge_limit: 150,
            },
            import: ImportConfig {
                chunk_size: 500,
                chunk_overlap: 80,
                extensions: vec!["txt".to_string(), "md".to_string(), "csv".to_string()],
            },
        }
    }
}
