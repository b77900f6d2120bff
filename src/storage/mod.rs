//! Storage layer for ragcore
//!
//! The retrieval engine only needs a handful of query primitives over indexed
//! chunks, captured by [`ChunkStore`]. Two adapters implement it: an in-memory
//! store and a SQLite store sharing the pooled [`Database`] with the profile store
//! and graph snapshot persistence. Both rank keyword matches through the same
//! tantivy [`KeywordIndex`].

pub mod database;
mod keyword_index;
mod memory;
mod snapshot;
mod sqlite;

pub use database::{Database, DbPool, DbStats};
pub use keyword_index::{IndexedChunk, KeywordHit, KeywordIndex};
pub use memory::MemoryChunkStore;
pub use snapshot::SqliteSnapshotStore;
pub use sqlite::{Library, SqliteChunkStore};
pub(crate) use sqlite::{time_column, uuid_column};

use crate::cancel::Interrupt;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An indexed text unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: i64,
    pub library_id: Uuid,
    pub file_id: Uuid,
    pub file_name: String,
    pub chunk_index: usize,
    pub text: String,
    pub keyword_terms: Vec<String>,
}

/// A chunk about to be written, with its embedding
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub text: String,
    /// Empty when the embedding provider failed for this chunk
    pub embedding: Vec<f32>,
    pub keyword_terms: Vec<String>,
}

/// Record of an imported file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: Uuid,
    pub library_id: Uuid,
    pub file_name: String,
    pub content_hash: String,
    pub chunk_count: usize,
}

/// One nearest-neighbour result
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VectorHit {
    pub chunk_id: i64,
    pub similarity: f32,
}

/// One keyword match with its BM25 score
#[derive(Debug, Clone, PartialEq)]
pub struct KeywordMatch {
    pub chunk: Chunk,
    pub bm25: f32,
}

/// Query primitives consumed by the retrieval engine and the graph builder.
///
/// Implementations are synchronous; the engine calls them from blocking tasks.
/// The two scans poll `interrupt` and return its error once it fires.
pub trait ChunkStore: Send + Sync {
    /// Nearest chunks by cosine similarity, descending, ties by chunk id
    fn vector_query(
        &self,
        embedding: &[f32],
        scope: &[Uuid],
        limit: usize,
        interrupt: &Interrupt,
    ) -> Result<Vec<VectorHit>>;

    /// The `limit` most relevant chunks matching any of `terms`, by BM25
    /// descending, ties by chunk id
    fn keyword_query(
        &self,
        terms: &[String],
        scope: &[Uuid],
        limit: usize,
        interrupt: &Interrupt,
    ) -> Result<Vec<KeywordMatch>>;

    /// Chunks by id, in the order of `ids`; unknown ids are skipped
    fn get_chunks(&self, ids: &[i64]) -> Result<Vec<Chunk>>;

    /// Every chunk of a library, in chunk id order
    fn library_chunks(&self, library_id: Uuid) -> Result<Vec<Chunk>>;

    /// Content hash recorded by the last import of `file_name`
    fn file_hash(&self, library_id: Uuid, file_name: &str) -> Result<Option<String>>;

    /// Replace all chunks of `file_name` in a library
    fn replace_file_chunks(
        &self,
        library_id: Uuid,
        file_name: &str,
        content_hash: &str,
        chunks: Vec<NewChunk>,
    ) -> Result<FileRecord>;
}

/// Cosine similarity; zero for mismatched or degenerate vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    dot / (mag_a * mag_b)
}

/// Order hits by similarity descending, then chunk id ascending, and truncate
pub(crate) fn rank_hits(mut hits: Vec<VectorHit>, limit: usize) -> Vec<VectorHit> {
    hits.sort_by(|a, b| {
        b.similarity
            .total_cmp(&a.similarity)
            .then(a.chunk_id.cmp(&b.chunk_id))
    });
    hits.truncate(limit);
    hits
}

/// Pair index hits with their chunks, dropping hits whose chunk is gone
pub(crate) fn attach_chunks(hits: &[KeywordHit], chunks: Vec<Chunk>) -> Vec<KeywordMatch> {
    let mut by_id: std::collections::HashMap<i64, Chunk> =
        chunks.into_iter().map(|c| (c.id, c)).collect();
    hits.iter()
        .filter_map(|hit| {
            by_id
                .remove(&hit.chunk_id)
                .map(|chunk| KeywordMatch { chunk, bm25: hit.score })
        })
        .collect()
}

/// Hex BLAKE3 digest of file content, used to detect re-imports
pub fn content_hash(text: &str) -> String {
    blake3::hash(text.as_bytes()).to_hex()[..32].to_string()
}
