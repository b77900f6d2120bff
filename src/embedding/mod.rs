mod batch;
/// Embedding capability
///
/// This module provides local embedding generation for import and query time.
/// Architecture:
/// - EmbeddingProvider trait for abstraction
/// - FastEmbedProvider for local models (all-MiniLM-L6-v2, 384-dim)
/// - HashEmbedder for deterministic, download-free embeddings
/// - OfflineEmbedder standing in when a model cannot be loaded
/// - Batch processing for imports
mod provider;

pub use batch::{BatchProcessor, BatchResult};
pub use provider::{
    EmbeddingError, EmbeddingProvider, FastEmbedProvider, HashEmbedder, OfflineEmbedder,
};

use crate::config::EmbeddingConfig;
use std::sync::Arc;

/// Build the provider named by the configuration.
///
/// A FastEmbed model that fails to load does not abort the caller: the returned
/// provider fails every call so retrieval degrades to the remaining channels.
pub fn create_provider(config: &EmbeddingConfig) -> Arc<dyn EmbeddingProvider> {
    match config.backend.as_str() {
        "hash" => Arc::new(HashEmbedder::new(config.dimension)),
        _ => match FastEmbedProvider::new(&config.model) {
            Ok(provider) => Arc::new(provider),
            Err(e) => {
                tracing::warn!("Embedding model unavailable, vector search disabled: {}", e);
                Arc::new(OfflineEmbedder::new(config.dimension, e.to_string()))
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_hash_provider() {
        let config = EmbeddingConfig {
            backend: "hash".to_string(),
            dimension: 128,
            ..EmbeddingConfig::default()
        };
        let provider = create_provider(&config);
        assert_eq!(provider.dimension(), 128);
        assert_eq!(provider.model_name(), "feature-hash-128");
    }

    #[test]
    fn test_unknown_model_degrades_to_offline() {
        let config = EmbeddingConfig {
            backend: "fastembed".to_string(),
            model: "no-such-model".to_string(),
            ..EmbeddingConfig::default()
        };
        let provider = create_provider(&config);
        assert_eq!(provider.model_name(), "offline");
        assert!(provider.embed("query").is_err());
    }
}
