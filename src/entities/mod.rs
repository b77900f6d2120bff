//! Entity extraction and the per-library knowledge graph
//!
//! This module provides:
//! - A pluggable [`EntityExtractor`] with a rule-based default
//! - [`GraphBuilder`] turning chunks into an immutable [`GraphSnapshot`]
//! - [`GraphRegistry`] publishing snapshots with single-flight rebuilds
//! - Alias mining for "what is X also called" queries

mod alias;
mod extractor;
mod graph;
mod registry;

pub use alias::{is_alias_intent, AliasMiner};
pub use extractor::{
    choose_canonical_alias, infer_relation_type, AliasGroup, EntityExtractor, ExtractedEntity,
    ExtractedRelation, Extraction, RelationType, RuleBasedExtractor,
};
pub use graph::{
    chunk_set_fingerprint, entity_id, GraphBuilder, GraphEdge, GraphNode, GraphSnapshot,
    GraphView, ViewEdge, ViewNode,
};
pub use registry::{GraphRegistry, RebuildGuard, RebuildReport, SnapshotPersistence};
