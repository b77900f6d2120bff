//! Tantivy keyword index over chunk text and stored keyword terms.
//!
//! Text is run through [`index_terms`] before it reaches tantivy, and queries
//! are built from the same analyzer as raw term queries, so Latin words and CJK
//! bigrams match the same way in both directions. Results are ranked by BM25.

use crate::cancel::Interrupt;
use crate::error::{RagError, Result};
use crate::text::{index_terms, is_query_noise, is_stopword};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;
use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, BoostQuery, Occur, Query, TermQuery};
use tantivy::schema::*;
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument};
use uuid::Uuid;

const WRITER_MEMORY_BYTES: usize = 20_000_000;
const MAX_QUERY_TERMS: usize = 64;
const STORED_TERMS_BOOST: f32 = 0.5;

/// One BM25 match
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeywordHit {
    pub chunk_id: i64,
    pub score: f32,
}

/// A chunk as the index sees it
pub struct IndexedChunk<'a> {
    pub chunk_id: i64,
    pub library_id: Uuid,
    pub file_id: Uuid,
    pub text: &'a str,
    pub keyword_terms: &'a [String],
}

#[derive(Clone, Copy)]
struct Fields {
    chunk_id: Field,
    library_id: Field,
    file_id: Field,
    text: Field,
    terms: Field,
}

impl Fields {
    fn schema() -> (Schema, Fields) {
        let mut builder = Schema::builder();
        let fields = Fields {
            chunk_id: builder.add_i64_field("chunk_id", INDEXED | STORED | FAST),
            library_id: builder.add_text_field("library_id", STRING),
            file_id: builder.add_text_field("file_id", STRING),
            text: builder.add_text_field("text", TEXT),
            terms: builder.add_text_field("terms", TEXT),
        };
        (builder.build(), fields)
    }

    fn resolve(schema: &Schema) -> Result<Fields> {
        let field = |name: &str| {
            schema
                .get_field(name)
                .map_err(|_| RagError::Store(format!("keyword index is missing field '{}'", name)))
        };
        Ok(Fields {
            chunk_id: field("chunk_id")?,
            library_id: field("library_id")?,
            file_id: field("file_id")?,
            text: field("text")?,
            terms: field("terms")?,
        })
    }
}

/// BM25 index of chunks, shared by both chunk stores
pub struct KeywordIndex {
    reader: IndexReader,
    writer: Mutex<IndexWriter>,
    fields: Fields,
}

impl KeywordIndex {
    /// Index held in memory
    pub fn in_memory() -> Result<Self> {
        let (schema, fields) = Fields::schema();
        Self::from_index(Index::create_in_ram(schema), fields)
    }

    /// Open the index under `dir`, creating it if the directory holds none
    pub fn open(dir: &Path) -> Result<Self> {
        if dir.join("meta.json").exists() {
            let index = Index::open_in_dir(dir)?;
            let fields = Fields::resolve(&index.schema())?;
            return Self::from_index(index, fields);
        }

        std::fs::create_dir_all(dir).map_err(|e| RagError::Io {
            source: e,
            context: format!("Failed to create keyword index directory {}", dir.display()),
        })?;
        let (schema, fields) = Fields::schema();
        Self::from_index(Index::create_in_dir(dir, schema)?, fields)
    }

    fn from_index(index: Index, fields: Fields) -> Result<Self> {
        let writer = index.writer_with_num_threads(1, WRITER_MEMORY_BYTES)?;
        let reader: IndexReader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;
        Ok(Self {
            reader,
            writer: Mutex::new(writer),
            fields,
        })
    }

    /// Number of indexed chunks
    pub fn len(&self) -> u64 {
        self.reader.searcher().num_docs()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every chunk of `file_id` and index `chunks` in its place
    pub fn replace_file(&self, file_id: Uuid, chunks: &[IndexedChunk<'_>]) -> Result<()> {
        let mut writer = self.lock()?;
        writer.delete_term(Term::from_field_text(self.fields.file_id, &file_id.to_string()));
        for chunk in chunks {
            writer.add_document(self.document(chunk))?;
        }
        writer.commit()?;
        drop(writer);
        self.reader.reload()?;
        Ok(())
    }

    /// Replace the whole index content
    pub fn rebuild(&self, chunks: &[IndexedChunk<'_>]) -> Result<()> {
        let mut writer = self.lock()?;
        writer.delete_all_documents()?;
        for chunk in chunks {
            writer.add_document(self.document(chunk))?;
        }
        writer.commit()?;
        drop(writer);
        self.reader.reload()?;
        tracing::info!("Rebuilt keyword index with {} chunks", chunks.len());
        Ok(())
    }

    /// Best `limit` chunks in `scope` matching any analyzed term, by BM25
    /// descending, ties by chunk id
    pub fn search(
        &self,
        terms: &[String],
        scope: &[Uuid],
        limit: usize,
        interrupt: &Interrupt,
    ) -> Result<Vec<KeywordHit>> {
        let tokens = query_tokens(terms);
        if tokens.is_empty() || scope.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        interrupt.check()?;

        let scope_query: Vec<(Occur, Box<dyn Query>)> = scope
            .iter()
            .map(|library| {
                let term = Term::from_field_text(self.fields.library_id, &library.to_string());
                let query: Box<dyn Query> = Box::new(TermQuery::new(term, IndexRecordOption::Basic));
                (Occur::Should, query)
            })
            .collect();
        let mut term_query: Vec<(Occur, Box<dyn Query>)> = Vec::with_capacity(tokens.len() * 2);
        for token in &tokens {
            let text: Box<dyn Query> = Box::new(TermQuery::new(
                Term::from_field_text(self.fields.text, token),
                IndexRecordOption::WithFreqs,
            ));
            let stored: Box<dyn Query> = Box::new(TermQuery::new(
                Term::from_field_text(self.fields.terms, token),
                IndexRecordOption::WithFreqs,
            ));
            let stored: Box<dyn Query> = Box::new(BoostQuery::new(stored, STORED_TERMS_BOOST));
            term_query.push((Occur::Should, text));
            term_query.push((Occur::Should, stored));
        }
        // The scope clause filters without contributing to the score
        let in_scope: Box<dyn Query> =
            Box::new(BoostQuery::new(Box::new(BooleanQuery::new(scope_query)), 0.0));
        let matching: Box<dyn Query> = Box::new(BooleanQuery::new(term_query));
        let query = BooleanQuery::new(vec![(Occur::Must, in_scope), (Occur::Must, matching)]);

        let searcher = self.reader.searcher();
        let top_docs = searcher.search(&query, &TopDocs::with_limit(limit))?;

        let mut hits = Vec::with_capacity(top_docs.len());
        for (i, (score, address)) in top_docs.into_iter().enumerate() {
            if i % 256 == 0 {
                interrupt.check()?;
            }
            let doc: TantivyDocument = searcher.doc(address)?;
            let chunk_id = doc
                .get_first(self.fields.chunk_id)
                .and_then(|v| v.as_i64())
                .ok_or_else(|| RagError::Store("keyword index document without chunk id".to_string()))?;
            hits.push(KeywordHit { chunk_id, score });
        }
        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.chunk_id.cmp(&b.chunk_id)));
        Ok(hits)
    }

    fn document(&self, chunk: &IndexedChunk<'_>) -> TantivyDocument {
        doc!(
            self.fields.chunk_id => chunk.chunk_id,
            self.fields.library_id => chunk.library_id.to_string(),
            self.fields.file_id => chunk.file_id.to_string(),
            self.fields.text => index_terms(chunk.text).join(" "),
            self.fields.terms => index_terms(&chunk.keyword_terms.join(" ")).join(" "),
        )
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, IndexWriter>> {
        self.writer
            .lock()
            .map_err(|_| RagError::Store("keyword index writer lock poisoned".to_string()))
    }
}

/// Analyzed, deduplicated query tokens without stopwords or question noise
fn query_tokens(terms: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    terms
        .iter()
        .flat_map(|term| index_terms(term))
        .filter(|token| !is_stopword(token) && !is_query_noise(token))
        .filter(|token| seen.insert(token.clone()))
        .take(MAX_QUERY_TERMS)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn chunk<'a>(chunk_id: i64, library_id: Uuid, file_id: Uuid, text: &'a str) -> IndexedChunk<'a> {
        IndexedChunk {
            chunk_id,
            library_id,
            file_id,
            text,
            keyword_terms: &[],
        }
    }

    fn terms(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_bm25_prefers_denser_matches() {
        let index = KeywordIndex::in_memory().unwrap();
        let (library, file) = (Uuid::new_v4(), Uuid::new_v4());
        index
            .replace_file(
                file,
                &[
                    chunk(1, library, file, "A note about the runtime"),
                    chunk(2, library, file, "Tokio runtime worker threads"),
                    chunk(3, library, file, "Serde derives"),
                ],
            )
            .unwrap();
        assert_eq!(index.len(), 3);

        let hits = index
            .search(&terms(&["Tokio", "worker threads"]), &[library], 10, &Interrupt::none())
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, 2);

        let hits = index
            .search(&terms(&["Tokio runtime"]), &[library], 10, &Interrupt::none())
            .unwrap();
        assert_eq!(hits.iter().map(|h| h.chunk_id).collect::<Vec<_>>(), vec![2, 1]);
    }

    #[test]
    fn test_cjk_terms_match_inside_longer_runs() {
        let index = KeywordIndex::in_memory().unwrap();
        let (library, file) = (Uuid::new_v4(), Uuid::new_v4());
        index
            .replace_file(
                file,
                &[
                    chunk(1, library, file, "孙悟空的金箍棒重一万三千五百斤"),
                    chunk(2, library, file, "猪八戒扛着九齿钉耙"),
                ],
            )
            .unwrap();
        let hits = index
            .search(&terms(&["金箍棒"]), &[library], 10, &Interrupt::none())
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, 1);
    }

    #[test]
    fn test_scope_and_stored_terms() {
        let index = KeywordIndex::in_memory().unwrap();
        let (lib_a, lib_b, file_a, file_b) =
            (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let tagged = terms(&["scheduler"]);
        index
            .replace_file(
                file_a,
                &[IndexedChunk {
                    chunk_id: 1,
                    library_id: lib_a,
                    file_id: file_a,
                    text: "Work stealing across threads",
                    keyword_terms: &tagged,
                }],
            )
            .unwrap();
        index
            .replace_file(file_b, &[chunk(2, lib_b, file_b, "The scheduler of library b")])
            .unwrap();

        let hits = index
            .search(&terms(&["scheduler"]), &[lib_a], 10, &Interrupt::none())
            .unwrap();
        assert_eq!(hits.iter().map(|h| h.chunk_id).collect::<Vec<_>>(), vec![1]);
        let both = index
            .search(&terms(&["scheduler"]), &[lib_a, lib_b], 10, &Interrupt::none())
            .unwrap();
        assert_eq!(both.len(), 2);
    }

    #[test]
    fn test_replace_file_drops_old_chunks() {
        let index = KeywordIndex::in_memory().unwrap();
        let (library, file) = (Uuid::new_v4(), Uuid::new_v4());
        index
            .replace_file(file, &[chunk(1, library, file, "old tokio text")])
            .unwrap();
        index
            .replace_file(file, &[chunk(2, library, file, "new tokio text")])
            .unwrap();
        let hits = index
            .search(&terms(&["tokio"]), &[library], 10, &Interrupt::none())
            .unwrap();
        assert_eq!(hits.iter().map(|h| h.chunk_id).collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn test_reopen_from_disk() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("keyword_index");
        let (library, file) = (Uuid::new_v4(), Uuid::new_v4());
        {
            let index = KeywordIndex::open(&dir).unwrap();
            index
                .replace_file(file, &[chunk(7, library, file, "Persisted tokio chunk")])
                .unwrap();
        }
        let index = KeywordIndex::open(&dir).unwrap();
        assert_eq!(index.len(), 1);
        let hits = index
            .search(&terms(&["tokio"]), &[library], 10, &Interrupt::none())
            .unwrap();
        assert_eq!(hits[0].chunk_id, 7);
    }

    #[test]
    fn test_interrupted_search_stops() {
        let index = KeywordIndex::in_memory().unwrap();
        let (library, file) = (Uuid::new_v4(), Uuid::new_v4());
        index
            .replace_file(file, &[chunk(1, library, file, "tokio")])
            .unwrap();
        let expired = Interrupt::new(None, Some(std::time::Instant::now()));
        assert!(matches!(
            index.search(&terms(&["tokio"]), &[library], 10, &expired),
            Err(RagError::DeadlineExceeded)
        ));
    }
}
