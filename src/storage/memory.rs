//! In-memory chunk store

use super::{
    attach_chunks, cosine_similarity, rank_hits, Chunk, ChunkStore, FileRecord, IndexedChunk,
    KeywordIndex, KeywordMatch, NewChunk, VectorHit,
};
use crate::cancel::Interrupt;
use crate::error::{RagError, Result};
use std::collections::BTreeMap;
use std::sync::RwLock;
use uuid::Uuid;

struct StoredChunk {
    chunk: Chunk,
    embedding: Vec<f32>,
}

#[derive(Default)]
struct Inner {
    next_id: i64,
    chunks: BTreeMap<i64, StoredChunk>,
    files: BTreeMap<(Uuid, String), FileRecord>,
}

const INTERRUPT_CHECK_EVERY: usize = 256;

/// Chunk store kept entirely in memory
pub struct MemoryChunkStore {
    inner: RwLock<Inner>,
    keywords: KeywordIndex,
}

impl MemoryChunkStore {
    pub fn new() -> Result<Self> {
        Ok(Self {
            inner: RwLock::new(Inner::default()),
            keywords: KeywordIndex::in_memory()?,
        })
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|inner| inner.chunks.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn poisoned() -> RagError {
        RagError::Store("memory chunk store lock poisoned".to_string())
    }
}

impl ChunkStore for MemoryChunkStore {
    fn vector_query(
        &self,
        embedding: &[f32],
        scope: &[Uuid],
        limit: usize,
        interrupt: &Interrupt,
    ) -> Result<Vec<VectorHit>> {
        let inner = self.inner.read().map_err(|_| Self::poisoned())?;
        let mut hits = Vec::new();
        let in_scope = inner
            .chunks
            .values()
            .filter(|stored| scope.contains(&stored.chunk.library_id))
            .filter(|stored| !stored.embedding.is_empty());
        for (i, stored) in in_scope.enumerate() {
            if i % INTERRUPT_CHECK_EVERY == 0 {
                interrupt.check()?;
            }
            hits.push(VectorHit {
                chunk_id: stored.chunk.id,
                similarity: cosine_similarity(embedding, &stored.embedding),
            });
        }
        Ok(rank_hits(hits, limit))
    }

    fn keyword_query(
        &self,
        terms: &[String],
        scope: &[Uuid],
        limit: usize,
        interrupt: &Interrupt,
    ) -> Result<Vec<KeywordMatch>> {
        let hits = self.keywords.search(terms, scope, limit, interrupt)?;
        let ids: Vec<i64> = hits.iter().map(|h| h.chunk_id).collect();
        Ok(attach_chunks(&hits, self.get_chunks(&ids)?))
    }

    fn get_chunks(&self, ids: &[i64]) -> Result<Vec<Chunk>> {
        let inner = self.inner.read().map_err(|_| Self::poisoned())?;
        Ok(ids
            .iter()
            .filter_map(|id| inner.chunks.get(id).map(|stored| stored.chunk.clone()))
            .collect())
    }

    fn library_chunks(&self, library_id: Uuid) -> Result<Vec<Chunk>> {
        let inner = self.inner.read().map_err(|_| Self::poisoned())?;
        Ok(inner
            .chunks
            .values()
            .filter(|stored| stored.chunk.library_id == library_id)
            .map(|stored| stored.chunk.clone())
            .collect())
    }

    fn file_hash(&self, library_id: Uuid, file_name: &str) -> Result<Option<String>> {
        let inner = self.inner.read().map_err(|_| Self::poisoned())?;
        Ok(inner
            .files
            .get(&(library_id, file_name.to_string()))
            .map(|record| record.content_hash.clone()))
    }

    fn replace_file_chunks(
        &self,
        library_id: Uuid,
        file_name: &str,
        content_hash: &str,
        chunks: Vec<NewChunk>,
    ) -> Result<FileRecord> {
        let mut inner = self.inner.write().map_err(|_| Self::poisoned())?;
        let key = (library_id, file_name.to_string());

        let file_id = match inner.files.get(&key) {
            Some(existing) => existing.id,
            None => Uuid::new_v4(),
        };
        inner.chunks.retain(|_, stored| stored.chunk.file_id != file_id);

        let chunk_count = chunks.len();
        let mut ids = Vec::with_capacity(chunk_count);
        for (chunk_index, new_chunk) in chunks.into_iter().enumerate() {
            inner.next_id += 1;
            let id = inner.next_id;
            ids.push(id);
            inner.chunks.insert(
                id,
                StoredChunk {
                    chunk: Chunk {
                        id,
                        library_id,
                        file_id,
                        file_name: file_name.to_string(),
                        chunk_index,
                        text: new_chunk.text,
                        keyword_terms: new_chunk.keyword_terms,
                    },
                    embedding: new_chunk.embedding,
                },
            );
        }

        // Indexed under the write lock so readers never see the two disagree
        let indexed: Vec<IndexedChunk<'_>> = ids
            .iter()
            .filter_map(|id| inner.chunks.get(id))
            .map(|stored| IndexedChunk {
                chunk_id: stored.chunk.id,
                library_id,
                file_id,
                text: &stored.chunk.text,
                keyword_terms: &stored.chunk.keyword_terms,
            })
            .collect();
        self.keywords.replace_file(file_id, &indexed)?;

        let record = FileRecord {
            id: file_id,
            library_id,
            file_name: file_name.to_string(),
            content_hash: content_hash.to_string(),
            chunk_count,
        };
        inner.files.insert(key, record.clone());
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_chunk(text: &str, embedding: Vec<f32>) -> NewChunk {
        NewChunk {
            text: text.to_string(),
            embedding,
            keyword_terms: Vec::new(),
        }
    }

    #[test]
    fn test_replace_file_chunks() {
        let store = MemoryChunkStore::new().unwrap();
        let library = Uuid::new_v4();

        let first = store
            .replace_file_chunks(
                library,
                "a.txt",
                "h1",
                vec![new_chunk("one", vec![1.0]), new_chunk("two", vec![1.0])],
            )
            .unwrap();
        assert_eq!(first.chunk_count, 2);

        let second = store
            .replace_file_chunks(library, "a.txt", "h2", vec![new_chunk("three", vec![])])
            .unwrap();
        assert_eq!(second.id, first.id);

        let chunks = store.library_chunks(library).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "three");
        assert_eq!(chunks[0].chunk_index, 0);
    }

    #[test]
    fn test_vector_query_respects_scope() {
        let store = MemoryChunkStore::new().unwrap();
        let lib_a = Uuid::new_v4();
        let lib_b = Uuid::new_v4();
        store
            .replace_file_chunks(lib_a, "a.txt", "h", vec![new_chunk("a", vec![1.0, 0.0])])
            .unwrap();
        store
            .replace_file_chunks(lib_b, "b.txt", "h", vec![new_chunk("b", vec![1.0, 0.0])])
            .unwrap();

        let hits = store
            .vector_query(&[1.0, 0.0], &[lib_a], 10, &Interrupt::none())
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!((hits[0].similarity - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_keyword_query_ranks_by_relevance() {
        let store = MemoryChunkStore::new().unwrap();
        let library = Uuid::new_v4();
        let mut chunks: Vec<NewChunk> = (0..5)
            .map(|i| new_chunk(&format!("A task note number {}", i), vec![]))
            .collect();
        chunks.push(new_chunk("Tokio task scheduler", vec![]));
        store
            .replace_file_chunks(library, "a.txt", "h", chunks)
            .unwrap();

        let terms = vec!["tokio task".to_string()];
        let found = store
            .keyword_query(&terms, &[library], 3, &Interrupt::none())
            .unwrap();
        assert_eq!(found.len(), 3);
        assert_eq!(found[0].chunk.text, "Tokio task scheduler");
        assert!(found[0].bm25 > found[1].bm25);
        // Equal scores keep chunk id order
        assert!(found[1].chunk.id < found[2].chunk.id);
        assert!(store
            .keyword_query(&["absent".to_string()], &[library], 3, &Interrupt::none())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_replaced_file_leaves_keyword_index() {
        let store = MemoryChunkStore::new().unwrap();
        let library = Uuid::new_v4();
        store
            .replace_file_chunks(library, "a.txt", "h1", vec![new_chunk("old tokio", vec![])])
            .unwrap();
        store
            .replace_file_chunks(library, "a.txt", "h2", vec![new_chunk("fresh serde", vec![])])
            .unwrap();

        let stale = store
            .keyword_query(&["tokio".to_string()], &[library], 10, &Interrupt::none())
            .unwrap();
        assert!(stale.is_empty());
        let fresh = store
            .keyword_query(&["serde".to_string()], &[library], 10, &Interrupt::none())
            .unwrap();
        assert_eq!(fresh.len(), 1);
    }

    #[test]
    fn test_vector_query_stops_when_interrupted() {
        let store = MemoryChunkStore::new().unwrap();
        let library = Uuid::new_v4();
        store
            .replace_file_chunks(library, "a.txt", "h", vec![new_chunk("a", vec![1.0])])
            .unwrap();
        let expired = Interrupt::new(None, Some(std::time::Instant::now()));
        assert!(matches!(
            store.vector_query(&[1.0], &[library], 10, &expired),
            Err(RagError::DeadlineExceeded)
        ));
    }
}
