//! Knowledge graph snapshot for one library
//!
//! A snapshot is an immutable build product: nodes are entities mentioned in the
//! library's chunks, edges are typed relations observed in shared sentences.
//! The builder aggregates in sorted maps so identical input always produces an
//! identical snapshot.

use super::extractor::{EntityExtractor, RelationType};
use crate::storage::Chunk;
use crate::text::normalize_entity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use uuid::Uuid;

const MAX_EDGE_EVIDENCE: usize = 3;

/// Stable entity identifier derived from library and normalized name
pub fn entity_id(library_id: Uuid, normalized: &str) -> String {
    let key = format!("{}:{}", library_id, normalized);
    blake3::hash(key.as_bytes()).to_hex()[..16].to_string()
}

/// Digest of the chunk set a snapshot was built from
pub fn chunk_set_fingerprint(chunks: &[Chunk]) -> String {
    let mut sorted: Vec<&Chunk> = chunks.iter().collect();
    sorted.sort_by_key(|c| c.id);

    let mut hasher = blake3::Hasher::new();
    for chunk in sorted {
        hasher.update(&chunk.id.to_le_bytes());
        hasher.update(chunk.text.as_bytes());
        hasher.update(&[0]);
    }
    hasher.finalize().to_hex()[..32].to_string()
}

/// An entity in the graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub entity_id: String,
    /// Normalized name
    pub name: String,
    /// Name as first written in the library
    pub display_name: String,
    pub entity_type: String,
    /// Number of chunks mentioning the entity
    pub frequency: u32,
    pub aliases: Vec<String>,
    /// Chunks mentioning the entity, ascending
    pub chunk_ids: Vec<i64>,
}

/// A typed relation between two entities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source_id: String,
    pub target_id: String,
    pub relation_type: RelationType,
    /// Number of sentences the relation was observed in
    pub weight: f32,
    /// Up to three evidence sentences
    pub evidence: Vec<String>,
}

#[derive(Debug, Clone, Default)]
struct SnapshotIndex {
    by_term: HashMap<String, usize>,
    by_id: HashMap<String, usize>,
    adjacency: Vec<Vec<usize>>,
}

/// Immutable knowledge graph of one library
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub library_id: Uuid,
    pub version: u64,
    pub fingerprint: String,
    pub built_at: DateTime<Utc>,
    pub chunk_count: usize,
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    #[serde(skip)]
    index: SnapshotIndex,
}

impl GraphSnapshot {
    pub fn new(
        library_id: Uuid,
        fingerprint: String,
        chunk_count: usize,
        nodes: Vec<GraphNode>,
        edges: Vec<GraphEdge>,
    ) -> Self {
        let mut snapshot = Self {
            library_id,
            version: 0,
            fingerprint,
            built_at: Utc::now(),
            chunk_count,
            nodes,
            edges,
            index: SnapshotIndex::default(),
        };
        snapshot.reindex();
        snapshot
    }

    /// Rebuild lookup tables; required after deserializing
    pub fn reindex(&mut self) {
        let mut index = SnapshotIndex {
            adjacency: vec![Vec::new(); self.nodes.len()],
            ..Default::default()
        };
        for (i, node) in self.nodes.iter().enumerate() {
            index.by_id.insert(node.entity_id.clone(), i);
            index.by_term.entry(node.name.clone()).or_insert(i);
        }
        // Display names and aliases never shadow a canonical name
        for (i, node) in self.nodes.iter().enumerate() {
            index
                .by_term
                .entry(normalize_entity(&node.display_name))
                .or_insert(i);
            for alias in &node.aliases {
                index.by_term.entry(normalize_entity(alias)).or_insert(i);
            }
        }
        for (e, edge) in self.edges.iter().enumerate() {
            if let (Some(&s), Some(&t)) = (
                index.by_id.get(&edge.source_id),
                index.by_id.get(&edge.target_id),
            ) {
                index.adjacency[s].push(e);
                if t != s {
                    index.adjacency[t].push(e);
                }
            }
        }
        self.index = index;
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, index: usize) -> Option<&GraphNode> {
        self.nodes.get(index)
    }

    pub fn node_index(&self, entity_id: &str) -> Option<usize> {
        self.index.by_id.get(entity_id).copied()
    }

    /// Node matching a term exactly by normalized name, display name or alias
    pub fn lookup(&self, term: &str) -> Option<usize> {
        self.index.by_term.get(&normalize_entity(term)).copied()
    }

    /// Exact matches for `terms`; when none match, fall back to nodes whose name
    /// contains a term, most frequent first
    pub fn match_terms(&self, terms: &[String], limit: usize) -> Vec<usize> {
        let mut matched: Vec<usize> = Vec::new();
        for term in terms {
            if let Some(i) = self.lookup(term) {
                if !matched.contains(&i) {
                    matched.push(i);
                }
            }
        }
        if !matched.is_empty() {
            matched.truncate(limit);
            return matched;
        }

        let needles: Vec<String> = terms
            .iter()
            .map(|t| normalize_entity(t))
            .filter(|t| t.chars().count() >= 2)
            .collect();
        let mut fuzzy: Vec<usize> = (0..self.nodes.len())
            .filter(|&i| {
                let name = normalize_entity(&self.nodes[i].display_name);
                needles.iter().any(|needle| name.contains(needle.as_str()))
            })
            .collect();
        fuzzy.sort_by(|&a, &b| {
            self.nodes[b]
                .frequency
                .cmp(&self.nodes[a].frequency)
                .then_with(|| self.nodes[a].name.cmp(&self.nodes[b].name))
        });
        fuzzy.truncate(limit);
        fuzzy
    }

    /// Incident edges of a node with the index of the node on the other end
    pub fn incident_edges(&self, index: usize) -> Vec<(&GraphEdge, usize)> {
        let Some(edge_ids) = self.index.adjacency.get(index) else {
            return Vec::new();
        };
        edge_ids
            .iter()
            .filter_map(|&e| {
                let edge = &self.edges[e];
                let source = self.node_index(&edge.source_id)?;
                let target = self.node_index(&edge.target_id)?;
                let other = if source == index { target } else { source };
                Some((edge, other))
            })
            .collect()
    }

    pub fn max_frequency(&self) -> u32 {
        self.nodes.iter().map(|n| n.frequency).max().unwrap_or(0)
    }

    /// Bounded view for display: most frequent nodes, heaviest edges
    pub fn view(&self, node_limit: usize, edge_limit: usize) -> GraphView {
        let mut nodes: Vec<&GraphNode> = self.nodes.iter().collect();
        nodes.sort_by(|a, b| {
            b.frequency
                .cmp(&a.frequency)
                .then_with(|| a.display_name.cmp(&b.display_name))
        });
        nodes.truncate(node_limit);

        let mut edges: Vec<&GraphEdge> = self.edges.iter().collect();
        edges.sort_by(|a, b| {
            b.weight
                .total_cmp(&a.weight)
                .then_with(|| a.source_id.cmp(&b.source_id))
                .then_with(|| a.target_id.cmp(&b.target_id))
        });
        edges.truncate(edge_limit);

        let display = |id: &str| {
            self.node_index(id)
                .map(|i| self.nodes[i].display_name.clone())
                .unwrap_or_default()
        };

        GraphView {
            library_id: self.library_id,
            version: self.version,
            node_count: self.nodes.len(),
            edge_count: self.edges.len(),
            nodes: nodes
                .into_iter()
                .map(|n| ViewNode {
                    entity_id: n.entity_id.clone(),
                    display_name: n.display_name.clone(),
                    entity_type: n.entity_type.clone(),
                    frequency: n.frequency,
                })
                .collect(),
            edges: edges
                .into_iter()
                .map(|e| ViewEdge {
                    source: e.source_id.clone(),
                    target: e.target_id.clone(),
                    source_name: display(&e.source_id),
                    target_name: display(&e.target_id),
                    relation_type: e.relation_type,
                    weight: e.weight,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ViewNode {
    pub entity_id: String,
    pub display_name: String,
    pub entity_type: String,
    pub frequency: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ViewEdge {
    pub source: String,
    pub target: String,
    pub source_name: String,
    pub target_name: String,
    pub relation_type: RelationType,
    pub weight: f32,
}

/// Bounded, display-ready slice of a snapshot
#[derive(Debug, Clone, Serialize)]
pub struct GraphView {
    pub library_id: Uuid,
    pub version: u64,
    pub node_count: usize,
    pub edge_count: usize,
    pub nodes: Vec<ViewNode>,
    pub edges: Vec<ViewEdge>,
}

struct NodeAcc {
    display_name: String,
    entity_type: String,
    chunk_ids: BTreeSet<i64>,
    aliases: BTreeSet<String>,
}

#[derive(Default)]
struct EdgeAcc {
    weight: f32,
    evidence: Vec<String>,
}

/// Builds snapshots from chunk text
pub struct GraphBuilder {
    extractor: Arc<dyn EntityExtractor>,
}

impl GraphBuilder {
    pub fn new(extractor: Arc<dyn EntityExtractor>) -> Self {
        Self { extractor }
    }

    /// Build a snapshot with version 0; the registry assigns the version
    pub fn build(&self, library_id: Uuid, chunks: &[Chunk]) -> GraphSnapshot {
        let mut ordered: Vec<&Chunk> = chunks.iter().collect();
        ordered.sort_by_key(|c| c.id);

        let mut entities: BTreeMap<String, NodeAcc> = BTreeMap::new();
        let mut relations: BTreeMap<(String, String, RelationType), EdgeAcc> = BTreeMap::new();

        for chunk in ordered {
            let extraction = self.extractor.extract(&chunk.text);

            for entity in &extraction.entities {
                entities
                    .entry(entity.normalized.clone())
                    .or_insert_with(|| NodeAcc {
                        display_name: entity.name.clone(),
                        entity_type: entity.entity_type.clone(),
                        chunk_ids: BTreeSet::new(),
                        aliases: BTreeSet::new(),
                    })
                    .chunk_ids
                    .insert(chunk.id);
            }

            for group in &extraction.alias_groups {
                if let Some(node) = entities.get_mut(&normalize_entity(&group.canonical)) {
                    node.aliases.extend(group.aliases.iter().cloned());
                }
            }

            for relation in &extraction.relations {
                let edge = relations
                    .entry((
                        relation.source.clone(),
                        relation.target.clone(),
                        relation.relation_type,
                    ))
                    .or_default();
                edge.weight += 1.0;
                if edge.evidence.len() < MAX_EDGE_EVIDENCE
                    && !edge.evidence.contains(&relation.evidence)
                {
                    edge.evidence.push(relation.evidence.clone());
                }
            }
        }

        let edges = relations
            .into_iter()
            .filter(|((source, target, _), _)| {
                entities.contains_key(source) && entities.contains_key(target)
            })
            .map(|((source, target, relation_type), acc)| GraphEdge {
                source_id: entity_id(library_id, &source),
                target_id: entity_id(library_id, &target),
                relation_type,
                weight: acc.weight,
                evidence: acc.evidence,
            })
            .collect();

        let nodes = entities
            .into_iter()
            .map(|(name, acc)| GraphNode {
                entity_id: entity_id(library_id, &name),
                name,
                display_name: acc.display_name,
                entity_type: acc.entity_type,
                frequency: acc.chunk_ids.len() as u32,
                aliases: acc.aliases.into_iter().collect(),
                chunk_ids: acc.chunk_ids.into_iter().collect(),
            })
            .collect();

        GraphSnapshot::new(
            library_id,
            chunk_set_fingerprint(chunks),
            chunks.len(),
            nodes,
            edges,
        )
    }
}
