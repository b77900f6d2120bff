//! SQLite-backed chunk store and library registry

use super::{
    attach_chunks, rank_hits, Chunk, ChunkStore, Database, FileRecord, IndexedChunk, KeywordIndex,
    KeywordMatch, NewChunk, VectorHit,
};
use crate::cancel::Interrupt;
use crate::error::{RagError, Result};
use crate::profile::LibraryType;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

const INTERRUPT_CHECK_EVERY: usize = 256;

const CHUNK_COLUMNS: &str = "c.id, c.library_id, c.file_id, f.file_name, c.chunk_index, \
                             c.content, c.keyword_terms";

/// A knowledge library
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Library {
    pub id: Uuid,
    pub name: String,
    pub library_type: LibraryType,
    /// Explicitly assigned retrieval profile, if any
    pub profile_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Chunk store over the shared SQLite database
pub struct SqliteChunkStore {
    db: Arc<Database>,
    keywords: KeywordIndex,
}

impl SqliteChunkStore {
    /// Store with an in-memory keyword index built from the database
    pub fn new(db: Arc<Database>) -> Result<Self> {
        let store = Self {
            db,
            keywords: KeywordIndex::in_memory()?,
        };
        store.rebuild_keyword_index()?;
        Ok(store)
    }

    /// Store with a keyword index persisted under `index_dir`. The index is
    /// rebuilt when its document count disagrees with the chunk table.
    pub fn with_index_dir(db: Arc<Database>, index_dir: &Path) -> Result<Self> {
        let store = Self {
            db,
            keywords: KeywordIndex::open(index_dir)?,
        };
        let chunks: i64 = store
            .db
            .get_conn()?
            .query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;
        if store.keywords.len() != chunks as u64 {
            tracing::warn!(
                "Keyword index holds {} chunks, database {}; rebuilding",
                store.keywords.len(),
                chunks
            );
            store.rebuild_keyword_index()?;
        }
        Ok(store)
    }

    /// Re-index every stored chunk
    pub fn rebuild_keyword_index(&self) -> Result<()> {
        let conn = self.db.get_conn()?;
        let sql = format!(
            "SELECT {} FROM chunks c JOIN files f ON f.id = c.file_id ORDER BY c.id",
            CHUNK_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let chunks = stmt
            .query_map([], chunk_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        let indexed: Vec<IndexedChunk<'_>> = chunks.iter().map(indexed_chunk).collect();
        self.keywords.rebuild(&indexed)
    }

    pub fn create_library(&self, name: &str, library_type: LibraryType) -> Result<Library> {
        let name = name.trim();
        if name.is_empty() {
            return Err(RagError::InvalidConfigValue {
                path: "library.name".to_string(),
                message: "Library name cannot be empty".to_string(),
            });
        }

        let library = Library {
            id: Uuid::new_v4(),
            name: name.to_string(),
            library_type,
            profile_id: None,
            created_at: Utc::now(),
        };

        let conn = self.db.get_conn()?;
        conn.execute(
            "INSERT INTO libraries (id, name, library_type, profile_id, created_at)
             VALUES (?1, ?2, ?3, NULL, ?4)",
            params![
                library.id.to_string(),
                library.name,
                library.library_type.as_str(),
                library.created_at.to_rfc3339()
            ],
        )?;

        tracing::info!("Created library {} ({})", library.name, library.id);
        Ok(library)
    }

    pub fn list_libraries(&self) -> Result<Vec<Library>> {
        let conn = self.db.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, library_type, profile_id, created_at FROM libraries ORDER BY name",
        )?;
        let libraries = stmt
            .query_map([], library_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(libraries)
    }

    /// Look a library up by name or id
    pub fn find_library(&self, name_or_id: &str) -> Result<Library> {
        let conn = self.db.get_conn()?;
        conn.query_row(
            "SELECT id, name, library_type, profile_id, created_at FROM libraries
             WHERE name = ?1 OR id = ?1",
            params![name_or_id.trim()],
            library_from_row,
        )
        .optional()?
        .ok_or_else(|| RagError::LibraryNotFound {
            name: name_or_id.to_string(),
        })
    }

    /// Assign (or clear) the retrieval profile a library searches with
    pub fn set_library_profile(&self, library_id: Uuid, profile_id: Option<Uuid>) -> Result<()> {
        let conn = self.db.get_conn()?;
        let updated = conn.execute(
            "UPDATE libraries SET profile_id = ?1 WHERE id = ?2",
            params![profile_id.map(|id| id.to_string()), library_id.to_string()],
        )?;
        if updated == 0 {
            return Err(RagError::LibraryNotFound {
                name: library_id.to_string(),
            });
        }
        Ok(())
    }

    fn scope_clause(scope: &[Uuid], first_param: usize) -> (String, Vec<String>) {
        let placeholders: Vec<String> = (0..scope.len())
            .map(|i| format!("?{}", first_param + i))
            .collect();
        let values = scope.iter().map(Uuid::to_string).collect();
        (placeholders.join(", "), values)
    }
}

impl ChunkStore for SqliteChunkStore {
    fn vector_query(
        &self,
        embedding: &[f32],
        scope: &[Uuid],
        limit: usize,
        interrupt: &Interrupt,
    ) -> Result<Vec<VectorHit>> {
        if scope.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let (placeholders, values) = Self::scope_clause(scope, 1);
        let sql = format!(
            "SELECT id, embedding FROM chunks
             WHERE library_id IN ({}) AND embedding IS NOT NULL",
            placeholders
        );

        let conn = self.db.get_conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(values.iter()))?;

        let mut hits = Vec::new();
        let mut scanned = 0usize;
        while let Some(row) = rows.next()? {
            if scanned % INTERRUPT_CHECK_EVERY == 0 {
                interrupt.check()?;
            }
            scanned += 1;
            let chunk_id: i64 = row.get(0)?;
            let blob: Vec<u8> = row.get(1)?;
            let stored = decode_embedding(&blob);
            if stored.is_empty() {
                continue;
            }
            hits.push(VectorHit {
                chunk_id,
                similarity: super::cosine_similarity(embedding, &stored),
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
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "SELECT {} FROM chunks c JOIN files f ON f.id = c.file_id WHERE c.id IN ({})",
            CHUNK_COLUMNS,
            placeholders.join(", ")
        );

        let conn = self.db.get_conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let mut by_id: HashMap<i64, Chunk> = stmt
            .query_map(params_from_iter(ids.iter()), chunk_from_row)?
            .map(|chunk| chunk.map(|c| (c.id, c)))
            .collect::<rusqlite::Result<_>>()?;

        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    fn library_chunks(&self, library_id: Uuid) -> Result<Vec<Chunk>> {
        let conn = self.db.get_conn()?;
        let sql = format!(
            "SELECT {} FROM chunks c JOIN files f ON f.id = c.file_id
             WHERE c.library_id = ?1 ORDER BY c.id",
            CHUNK_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let chunks = stmt
            .query_map(params![library_id.to_string()], chunk_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(chunks)
    }

    fn file_hash(&self, library_id: Uuid, file_name: &str) -> Result<Option<String>> {
        let conn = self.db.get_conn()?;
        let hash = conn
            .query_row(
                "SELECT content_hash FROM files WHERE library_id = ?1 AND file_name = ?2",
                params![library_id.to_string(), file_name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(hash)
    }

    fn replace_file_chunks(
        &self,
        library_id: Uuid,
        file_name: &str,
        content_hash: &str,
        chunks: Vec<NewChunk>,
    ) -> Result<FileRecord> {
        let mut conn = self.db.get_conn()?;
        let tx = conn.transaction()?;

        let existing: Option<String> = tx
            .query_row(
                "SELECT id FROM files WHERE library_id = ?1 AND file_name = ?2",
                params![library_id.to_string(), file_name],
                |row| row.get(0),
            )
            .optional()?;

        let file_id = match existing {
            Some(id) => {
                tx.execute("DELETE FROM chunks WHERE file_id = ?1", params![id])?;
                Uuid::parse_str(&id).map_err(|e| RagError::Store(e.to_string()))?
            }
            None => Uuid::new_v4(),
        };

        tx.execute(
            "INSERT INTO files (id, library_id, file_name, content_hash, chunk_count, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(library_id, file_name)
             DO UPDATE SET content_hash = excluded.content_hash,
                           chunk_count = excluded.chunk_count",
            params![
                file_id.to_string(),
                library_id.to_string(),
                file_name,
                content_hash,
                chunks.len() as i64,
                Utc::now().to_rfc3339()
            ],
        )?;

        let chunk_count = chunks.len();
        let mut written = Vec::with_capacity(chunk_count);
        {
            let mut insert = tx.prepare(
                "INSERT INTO chunks (library_id, file_id, chunk_index, content, embedding, keyword_terms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for (index, chunk) in chunks.into_iter().enumerate() {
                let embedding = if chunk.embedding.is_empty() {
                    None
                } else {
                    Some(encode_embedding(&chunk.embedding))
                };
                let terms =
                    serde_json::to_string(&chunk.keyword_terms).map_err(|e| RagError::Json {
                        source: e,
                        context: "Failed to serialize keyword terms".to_string(),
                    })?;
                insert.execute(params![
                    library_id.to_string(),
                    file_id.to_string(),
                    index as i64,
                    chunk.text,
                    embedding,
                    terms
                ])?;
                written.push((tx.last_insert_rowid(), chunk.text, chunk.keyword_terms));
            }
        }
        tx.commit()?;

        let indexed: Vec<IndexedChunk<'_>> = written
            .iter()
            .map(|(chunk_id, text, keyword_terms)| IndexedChunk {
                chunk_id: *chunk_id,
                library_id,
                file_id,
                text,
                keyword_terms,
            })
            .collect();
        self.keywords.replace_file(file_id, &indexed)?;

        Ok(FileRecord {
            id: file_id,
            library_id,
            file_name: file_name.to_string(),
            content_hash: content_hash.to_string(),
            chunk_count,
        })
    }
}

fn indexed_chunk(chunk: &Chunk) -> IndexedChunk<'_> {
    IndexedChunk {
        chunk_id: chunk.id,
        library_id: chunk.library_id,
        file_id: chunk.file_id,
        text: &chunk.text,
        keyword_terms: &chunk.keyword_terms,
    }
}

fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

pub(crate) fn uuid_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn time_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn chunk_from_row(row: &Row<'_>) -> rusqlite::Result<Chunk> {
    let terms: String = row.get(6)?;
    Ok(Chunk {
        id: row.get(0)?,
        library_id: uuid_column(row, 1)?,
        file_id: uuid_column(row, 2)?,
        file_name: row.get(3)?,
        chunk_index: row.get::<_, i64>(4)? as usize,
        text: row.get(5)?,
        keyword_terms: serde_json::from_str(&terms)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, Type::Text, Box::new(e)))?,
    })
}

fn library_from_row(row: &Row<'_>) -> rusqlite::Result<Library> {
    let library_type: String = row.get(2)?;
    let profile_id: Option<String> = row.get(3)?;
    Ok(Library {
        id: uuid_column(row, 0)?,
        name: row.get(1)?,
        library_type: library_type.parse().unwrap_or(LibraryType::General),
        profile_id: profile_id.and_then(|id| Uuid::parse_str(&id).ok()),
        created_at: time_column(row, 4)?,
    })
}
