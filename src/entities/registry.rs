//! Published graph snapshots, one per library
//!
//! Readers take an `Arc` to the current snapshot and never block a rebuild.
//! A rebuild builds off to the side, persists, then swaps the pointer, so a
//! failure at any step leaves the previous snapshot in place. At most one rebuild
//! per library runs at a time.

use super::graph::{GraphBuilder, GraphSnapshot};
use crate::error::{RagError, Result};
use crate::storage::Chunk;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Durable storage for snapshots
pub trait SnapshotPersistence: Send + Sync {
    fn save(&self, snapshot: &GraphSnapshot) -> Result<()>;

    fn load(&self, library_id: Uuid) -> Result<Option<GraphSnapshot>>;
}

/// Outcome of a successful rebuild
#[derive(Debug, Clone, Serialize)]
pub struct RebuildReport {
    pub library_id: Uuid,
    pub version: u64,
    pub node_count: usize,
    pub edge_count: usize,
    pub chunk_count: usize,
    pub message: String,
}

/// Marks a library as rebuilding until dropped
pub struct RebuildGuard<'a> {
    registry: &'a GraphRegistry,
    library_id: Uuid,
}

impl Drop for RebuildGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut rebuilding) = self.registry.rebuilding.lock() {
            rebuilding.remove(&self.library_id);
        }
    }
}

#[derive(Default)]
pub struct GraphRegistry {
    snapshots: RwLock<HashMap<Uuid, Arc<GraphSnapshot>>>,
    rebuilding: Mutex<HashSet<Uuid>>,
    persistence: Option<Arc<dyn SnapshotPersistence>>,
}

impl GraphRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_persistence(persistence: Arc<dyn SnapshotPersistence>) -> Self {
        Self {
            persistence: Some(persistence),
            ..Self::default()
        }
    }

    fn poisoned() -> RagError {
        RagError::Store("graph registry lock poisoned".to_string())
    }

    /// Current snapshot, loading it from persistence on first access
    pub fn snapshot(&self, library_id: Uuid) -> Result<Option<Arc<GraphSnapshot>>> {
        if let Some(snapshot) = self
            .snapshots
            .read()
            .map_err(|_| Self::poisoned())?
            .get(&library_id)
        {
            return Ok(Some(Arc::clone(snapshot)));
        }

        let Some(persistence) = &self.persistence else {
            return Ok(None);
        };
        let Some(loaded) = persistence.load(library_id)? else {
            return Ok(None);
        };

        debug!(
            "Loaded graph snapshot v{} for library {}",
            loaded.version, library_id
        );
        let mut snapshots = self.snapshots.write().map_err(|_| Self::poisoned())?;
        let entry = snapshots
            .entry(library_id)
            .or_insert_with(|| Arc::new(loaded));
        Ok(Some(Arc::clone(entry)))
    }

    pub fn is_rebuilding(&self, library_id: Uuid) -> bool {
        self.rebuilding
            .lock()
            .map(|rebuilding| rebuilding.contains(&library_id))
            .unwrap_or(false)
    }

    /// Claim the rebuild slot of a library
    pub fn begin_rebuild(&self, library_id: Uuid) -> Result<RebuildGuard<'_>> {
        let mut rebuilding = self.rebuilding.lock().map_err(|_| Self::poisoned())?;
        if !rebuilding.insert(library_id) {
            return Err(RagError::GraphRebuildConflict { library_id });
        }
        Ok(RebuildGuard {
            registry: self,
            library_id,
        })
    }

    /// Build, persist and publish a new snapshot from `chunks`
    pub fn rebuild(
        &self,
        library_id: Uuid,
        chunks: &[Chunk],
        builder: &GraphBuilder,
    ) -> Result<RebuildReport> {
        let _guard = self.begin_rebuild(library_id)?;
        info!(
            "Rebuilding graph for library {} from {} chunks",
            library_id,
            chunks.len()
        );

        let previous_version = self.snapshot(library_id)?.map_or(0, |s| s.version);
        let mut snapshot = builder.build(library_id, chunks);
        snapshot.version = previous_version + 1;

        if let Some(persistence) = &self.persistence {
            if let Err(e) = persistence.save(&snapshot) {
                warn!(
                    "Failed to persist graph for library {}, keeping v{}: {}",
                    library_id, previous_version, e
                );
                return Err(e);
            }
        }

        let report = RebuildReport {
            library_id,
            version: snapshot.version,
            node_count: snapshot.node_count(),
            edge_count: snapshot.edge_count(),
            chunk_count: snapshot.chunk_count,
            message: format!(
                "Graph rebuilt: {} entities, {} relations from {} chunks",
                snapshot.node_count(),
                snapshot.edge_count(),
                snapshot.chunk_count
            ),
        };

        self.snapshots
            .write()
            .map_err(|_| Self::poisoned())?
            .insert(library_id, Arc::new(snapshot));

        info!("{}", report.message);
        Ok(report)
    }

    /// Publish an already built snapshot without persisting it
    pub fn publish(&self, snapshot: GraphSnapshot) -> Result<()> {
        self.snapshots
            .write()
            .map_err(|_| Self::poisoned())?
            .insert(snapshot.library_id, Arc::new(snapshot));
        Ok(())
    }
}
