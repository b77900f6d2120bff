use crate::config::Config;
use crate::error::{RagError, Result, ValidationError};

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration, collecting every failure
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_storage(config, &mut errors);
        Self::validate_embedding(config, &mut errors);
        Self::validate_retrieval(config, &mut errors);
        Self::validate_graph(config, &mut errors);
        Self::validate_import(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(RagError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != "1.0.0" {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_storage(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.storage.data_dir.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.data_dir",
                "Data directory cannot be empty",
            ));
        }

        if config.storage.database_file.trim().is_empty() {
            errors.push(ValidationError::new(
                "storage.database_file",
                "Database file name cannot be empty",
            ));
        }
    }

    fn validate_embedding(config: &Config, errors: &mut Vec<ValidationError>) {
        let backend = &config.embedding.backend;
        if backend != "fastembed" && backend != "hash" {
            errors.push(ValidationError::new(
                "embedding.backend",
                format!("Backend must be 'fastembed' or 'hash', got '{}'", backend),
            ));
        }

        if config.embedding.model.is_empty() {
            errors.push(ValidationError::new(
                "embedding.model",
                "Model name cannot be empty",
            ));
        }

        if config.embedding.dimension == 0 {
            errors.push(ValidationError::new(
                "embedding.dimension",
                "Dimension must be greater than 0",
            ));
        }

        if config.embedding.batch_size == 0 {
            errors.push(ValidationError::new(
                "embedding.batch_size",
                "Batch size must be greater than 0",
            ));
        }

        if config.embedding.max_concurrent == 0 {
            errors.push(ValidationError::new(
                "embedding.max_concurrent",
                "Concurrency must be greater than 0",
            ));
        }
    }

    fn validate_retrieval(config: &Config, errors: &mut Vec<ValidationError>) {
        let top_k = config.retrieval.default_top_k;
        if !(1..=50).contains(&top_k) {
            errors.push(ValidationError::new(
                "retrieval.default_top_k",
                format!("top_k must be between 1 and 50, got {}", top_k),
            ));
        }

        if config.retrieval.channel_timeout_ms == 0 {
            errors.push(ValidationError::new(
                "retrieval.channel_timeout_ms",
                "Channel timeout must be greater than 0",
            ));
        }

        if config.retrieval.snippet_max_chars < 16 {
            errors.push(ValidationError::new(
                "retrieval.snippet_max_chars",
                "Snippets must allow at least 16 characters",
            ));
        }
    }

    fn validate_graph(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.graph.max_entities_per_chunk == 0 {
            errors.push(ValidationError::new(
                "graph.max_entities_per_chunk",
                "Entity limit must be greater than 0",
            ));
        }
    }

    fn validate_import(config: &Config, errors: &mut Vec<ValidationError>) {
        let import = &config.import;
        if import.chunk_size < 50 {
            errors.push(ValidationError::new(
                "import.chunk_size",
                format!("Chunk size must be at least 50, got {}", import.chunk_size),
            ));
        }

        if import.chunk_overlap >= import.chunk_size {
            errors.push(ValidationError::new(
                "import.chunk_overlap",
                "Overlap must be smaller than the chunk size",
            ));
        }

        if import.extensions.is_empty() {
            errors.push(ValidationError::new(
                "import.extensions",
                "At least one file extension is required",
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_config() {
        let config = Config::default();
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_invalid_backend() {
        let mut config = Config::default();
        config.embedding.backend = "remote".to_string();
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn test_collects_every_error() {
        let mut config = Config::default();
        config.retrieval.channel_timeout_ms = 0;
        config.import.chunk_overlap = config.import.chunk_size;

        match ConfigValidator::validate(&config) {
            Err(RagError::ConfigValidation { errors }) => {
                let paths: Vec<&str> = errors.iter().map(|e| e.path.as_str()).collect();
                assert_eq!(
                    paths,
                    vec!["retrieval.channel_timeout_ms", "import.chunk_overlap"]
                );
            }
            other => panic!("expected validation failure, got {:?}", other),
        }
    }
}
