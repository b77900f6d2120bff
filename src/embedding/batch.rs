/// Batch processor for embedding generation during import
use super::EmbeddingProvider;
use crate::error::{RagError, Result};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Embeddings for a list of texts, aligned with the input
#[derive(Debug)]
pub struct BatchResult {
    /// One entry per input text; empty where the batch failed
    pub embeddings: Vec<Vec<f32>>,
    pub processed: usize,
    pub failed: usize,
    pub duration_ms: u64,
}

/// Batch processor for embedding generation
///
/// Splits the input into batches of `batch_size` and embeds up to
/// `max_concurrent` batches at once on the blocking pool. A failed batch does
/// not fail the run: its texts get empty embeddings and are counted as failed.
pub struct BatchProcessor {
    provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
    max_concurrent: usize,
}

impl BatchProcessor {
    /// Create a new batch processor
    ///
    /// # Arguments
    /// * `provider` - Embedding provider
    /// * `batch_size` - Number of texts to embed in one call
    /// * `max_concurrent` - Maximum concurrent batch operations
    pub fn new(provider: Arc<dyn EmbeddingProvider>, batch_size: usize, max_concurrent: usize) -> Self {
        Self {
            provider,
            batch_size: batch_size.max(1),
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Embed all texts, preserving order
    pub async fn process(&self, texts: Vec<String>) -> Result<BatchResult> {
        let start = std::time::Instant::now();
        let total = texts.len();

        info!("Starting batch embedding of {} texts", total);

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut handles = Vec::new();

        for batch in texts.chunks(self.batch_size) {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| RagError::Other(e.into()))?;
            let provider = Arc::clone(&self.provider);
            let batch = batch.to_vec();

            handles.push(tokio::task::spawn_blocking(move || {
                let _permit = permit;
                let len = batch.len();
                (len, provider.embed_batch(&batch))
            }));
        }

        let mut embeddings = Vec::with_capacity(total);
        let mut processed = 0;
        let mut failed = 0;

        for handle in handles {
            let (len, result) = handle.await.map_err(|e| RagError::Other(e.into()))?;
            match result {
                Ok(batch_embeddings) => {
                    debug!("Embedded batch of {} texts", len);
                    processed += len;
                    embeddings.extend(batch_embeddings);
                }
                Err(e) => {
                    warn!("Failed to embed batch of {} texts: {}", len, e);
                    failed += len;
                    embeddings.extend(std::iter::repeat_with(Vec::new).take(len));
                }
            }
        }

        let duration_ms = start.elapsed().as_millis() as u64;

        info!(
            "Batch embedding complete: {} processed, {} failed, {}ms",
            processed, failed, duration_ms
        );

        Ok(BatchResult {
            embeddings,
            processed,
            failed,
            duration_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{EmbeddingError, HashEmbedder};

    /// Fails any batch containing the word "poison"
    struct PickyEmbedder(HashEmbedder);

    impl EmbeddingProvider for PickyEmbedder {
        fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
            self.0.embed(text)
        }

        fn embed_batch(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError> {
            if texts.iter().any(|t| t.contains("poison")) {
                return Err(EmbeddingError::GenerationError("poisoned batch".to_string()));
            }
            self.0.embed_batch(texts)
        }

        fn dimension(&self) -> usize {
            self.0.dimension()
        }

        fn model_name(&self) -> &str {
            "picky"
        }
    }

    #[tokio::test]
    async fn test_batch_processing_preserves_order() {
        let provider = Arc::new(HashEmbedder::new(32));
        let processor = BatchProcessor::new(provider.clone(), 2, 3);

        let texts: Vec<String> = (0..7).map(|i| format!("document number {}", i)).collect();
        let result = processor.process(texts.clone()).await.unwrap();

        assert_eq!(result.processed, 7);
        assert_eq!(result.failed, 0);
        for (text, embedding) in texts.iter().zip(&result.embeddings) {
            assert_eq!(embedding, &provider.embed(text).unwrap());
        }
    }

    #[tokio::test]
    async fn test_failed_batch_yields_empty_embeddings() {
        let processor = BatchProcessor::new(Arc::new(PickyEmbedder(HashEmbedder::new(32))), 2, 2);
        let texts = vec![
            "fine text".to_string(),
            "more text".to_string(),
            "poison text".to_string(),
            "last text".to_string(),
        ];

        let result = processor.process(texts).await.unwrap();
        assert_eq!(result.processed, 2);
        assert_eq!(result.failed, 2);
        assert_eq!(result.embeddings.len(), 4);
        assert!(!result.embeddings[0].is_empty());
        assert!(result.embeddings[2].is_empty());
        assert!(result.embeddings[3].is_empty());
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let processor = BatchProcessor::new(Arc::new(HashEmbedder::new(32)), 8, 2);
        let result = processor.process(Vec::new()).await.unwrap();
        assert_eq!(result.processed, 0);
        assert!(result.embeddings.is_empty());
    }
}
