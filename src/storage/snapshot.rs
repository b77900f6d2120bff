//! Graph snapshot persistence
//!
//! One row per library holding the zstd-compressed JSON snapshot. Saving
//! replaces the row in a single statement, so a reader sees either the old or
//! the new snapshot.

use super::Database;
use crate::entities::{GraphSnapshot, SnapshotPersistence};
use crate::error::{RagError, Result};
use rusqlite::{params, OptionalExtension};
use std::sync::Arc;
use uuid::Uuid;

const COMPRESSION_LEVEL: i32 = 3;

pub struct SqliteSnapshotStore {
    db: Arc<Database>,
}

impl SqliteSnapshotStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    fn encode(snapshot: &GraphSnapshot) -> Result<Vec<u8>> {
        let json = serde_json::to_vec(snapshot).map_err(|e| RagError::Json {
            source: e,
            context: "Failed to serialize graph snapshot".to_string(),
        })?;
        zstd::encode_all(json.as_slice(), COMPRESSION_LEVEL).map_err(|e| RagError::Io {
            source: e,
            context: "Failed to compress graph snapshot".to_string(),
        })
    }

    fn decode(payload: &[u8]) -> Result<GraphSnapshot> {
        let json = zstd::decode_all(payload).map_err(|e| RagError::Io {
            source: e,
            context: "Failed to decompress graph snapshot".to_string(),
        })?;
        let mut snapshot: GraphSnapshot =
            serde_json::from_slice(&json).map_err(|e| RagError::Json {
                source: e,
                context: "Failed to parse graph snapshot".to_string(),
            })?;
        snapshot.reindex();
        Ok(snapshot)
    }
}

impl SnapshotPersistence for SqliteSnapshotStore {
    fn save(&self, snapshot: &GraphSnapshot) -> Result<()> {
        let payload = Self::encode(snapshot)?;
        let conn = self.db.get_conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO graph_snapshots
             (library_id, version, fingerprint, node_count, edge_count, chunk_count, payload, built_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                snapshot.library_id.to_string(),
                snapshot.version as i64,
                snapshot.fingerprint,
                snapshot.node_count() as i64,
                snapshot.edge_count() as i64,
                snapshot.chunk_count as i64,
                payload,
                snapshot.built_at.to_rfc3339()
            ],
        )?;
        tracing::debug!(
            "Persisted graph snapshot v{} for library {}",
            snapshot.version,
            snapshot.library_id
        );
        Ok(())
    }

    fn load(&self, library_id: Uuid) -> Result<Option<GraphSnapshot>> {
        let conn = self.db.get_conn()?;
        let payload: Option<Vec<u8>> = conn
            .query_row(
                "SELECT payload FROM graph_snapshots WHERE library_id = ?1",
                params![library_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        payload.map(|bytes| Self::decode(&bytes)).transpose()
    }
}
