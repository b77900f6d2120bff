//! Document import
//!
//! Collects text files under a path, splits them into overlapping windows,
//! embeds the windows in batches and replaces each file's chunks in the store.
//! Files whose content hash matches the last import are left untouched.

use crate::config::{EmbeddingConfig, ImportConfig};
use crate::embedding::{BatchProcessor, EmbeddingProvider};
use crate::error::{RagError, Result};
use crate::storage::{content_hash, ChunkStore, NewChunk};
use crate::text::{content_tokens, split_text};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Keyword terms recorded per chunk
const CHUNK_KEYWORD_TERMS: usize = 48;

/// What happened to one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Imported,
    Unchanged,
}

/// Summary of an import run
#[derive(Debug, Default, Clone, Serialize)]
pub struct ImportReport {
    pub files_imported: usize,
    pub files_unchanged: usize,
    pub chunks_written: usize,
    /// Chunks stored without an embedding because their batch failed
    pub embeddings_failed: usize,
    /// Files that could not be read, with the reason
    pub skipped: Vec<(String, String)>,
}

pub struct Importer {
    store: Arc<dyn ChunkStore>,
    batch: BatchProcessor,
    settings: ImportConfig,
}

impl Importer {
    pub fn new(
        store: Arc<dyn ChunkStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        embedding: &EmbeddingConfig,
        settings: ImportConfig,
    ) -> Self {
        Self {
            store,
            batch: BatchProcessor::new(embedder, embedding.batch_size, embedding.max_concurrent),
            settings,
        }
    }

    /// Import one file or every matching file below a directory.
    ///
    /// Files are stored under their path relative to `path` (or their bare name
    /// when `path` is a file), so re-importing the same tree updates in place.
    pub async fn import_path(&self, library_id: Uuid, path: &Path) -> Result<ImportReport> {
        let files = self.collect_files(path)?;
        info!("Importing {} files from {:?}", files.len(), path);

        let mut report = ImportReport::default();
        for file in files {
            let file_name = display_name(path, &file);
            let text = match std::fs::read_to_string(&file) {
                Ok(text) => text,
                Err(e) => {
                    warn!("Skipping {}: {}", file_name, e);
                    report.skipped.push((file_name, e.to_string()));
                    continue;
                }
            };

            let (status, chunks, failed) = self.import_text(library_id, &file_name, &text).await?;
            match status {
                FileStatus::Imported => report.files_imported += 1,
                FileStatus::Unchanged => report.files_unchanged += 1,
            }
            report.chunks_written += chunks;
            report.embeddings_failed += failed;
        }

        info!(
            "Import finished: {} imported, {} unchanged, {} chunks",
            report.files_imported, report.files_unchanged, report.chunks_written
        );
        Ok(report)
    }

    /// Import one document's text. Returns the status, the number of chunks
    /// written and how many of them lack an embedding.
    pub async fn import_text(
        &self,
        library_id: Uuid,
        file_name: &str,
        text: &str,
    ) -> Result<(FileStatus, usize, usize)> {
        let hash = content_hash(text);
        let previous = self.blocking({
            let store = Arc::clone(&self.store);
            let file_name = file_name.to_string();
            move || store.file_hash(library_id, &file_name)
        })
        .await?;
        if previous.as_deref() == Some(hash.as_str()) {
            debug!("{} unchanged, skipping", file_name);
            return Ok((FileStatus::Unchanged, 0, 0));
        }

        let pieces = split_text(text, self.settings.chunk_size, self.settings.chunk_overlap);
        let embedded = self.batch.process(pieces.clone()).await?;
        let failed = embedded.failed;

        let chunks: Vec<NewChunk> = pieces
            .into_iter()
            .zip(embedded.embeddings)
            .map(|(text, embedding)| NewChunk {
                keyword_terms: content_tokens(&text, CHUNK_KEYWORD_TERMS),
                text,
                embedding,
            })
            .collect();

        let record = self
            .blocking({
                let store = Arc::clone(&self.store);
                let file_name = file_name.to_string();
                move || store.replace_file_chunks(library_id, &file_name, &hash, chunks)
            })
            .await?;
        debug!("{}: {} chunks", file_name, record.chunk_count);
        Ok((FileStatus::Imported, record.chunk_count, failed))
    }

    /// Files under `path` with an accepted extension, sorted by path
    pub fn collect_files(&self, path: &Path) -> Result<Vec<PathBuf>> {
        if path.is_file() {
            return Ok(vec![path.to_path_buf()]);
        }
        if !path.is_dir() {
            return Err(RagError::Io {
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file or directory"),
                context: format!("Cannot import {:?}", path),
            });
        }

        let mut files = Vec::new();
        let mut pending = vec![path.to_path_buf()];
        while let Some(dir) = pending.pop() {
            let entries = std::fs::read_dir(&dir).map_err(|e| RagError::Io {
                source: e,
                context: format!("Failed to read directory {:?}", dir),
            })?;
            for entry in entries {
                let entry = entry.map_err(|e| RagError::Io {
                    source: e,
                    context: format!("Failed to read directory {:?}", dir),
                })?;
                let entry_path = entry.path();
                if entry_path.is_dir() {
                    pending.push(entry_path);
                } else if self.accepts(&entry_path) {
                    files.push(entry_path);
                }
            }
        }
        files.sort();
        Ok(files)
    }

    fn accepts(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                self.settings
                    .extensions
                    .iter()
                    .any(|allowed| allowed.trim_start_matches('.').eq_ignore_ascii_case(ext))
            })
            .unwrap_or(false)
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        tokio::task::spawn_blocking(f)
            .await
            .map_err(|e| RagError::Other(e.into()))?
    }
}

fn display_name(root: &Path, file: &Path) -> String {
    let relative = file.strip_prefix(root).ok().filter(|p| !p.as_os_str().is_empty());
    match relative {
        Some(relative) => relative.to_string_lossy().replace('\\', "/"),
        None => file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| file.to_string_lossy().into_owned()),
    }
}
