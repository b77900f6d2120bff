//! Graph channel
//!
//! Matches query terms to graph nodes, expands one hop along the heaviest
//! incident edges, and proposes the chunks that mention the expanded entities.

use super::keyword::sparse_score;
use super::{Candidate, Channel, QueryPlan};
use crate::cancel::Interrupt;
use crate::entities::{AliasMiner, GraphSnapshot};
use crate::error::Result;
use crate::profile::ProfileConfig;
use crate::storage::ChunkStore;
use crate::text::term_hit_ratio;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

const MAX_TRAVERSED_EDGES: usize = 80;
const MIN_POOL: usize = 20;
const ENTITY_OVERLAP_CAP: usize = 8;
const MATCHED_ENTITIES_PER_CHUNK: usize = 8;
/// Chunks read per snapshot when mining aliases
const ALIAS_MINING_CHUNKS: usize = 40;

/// An entity reached by the traversal
struct Reached {
    snapshot: usize,
    node: usize,
    strength: f32,
    direct: bool,
}

fn frequency_factor(frequency: u32, max_frequency: u32) -> f32 {
    if max_frequency == 0 {
        return 1.0;
    }
    let f = (1.0 + frequency as f32).ln();
    let f_max = (1.0 + max_frequency as f32).ln();
    0.5 + 0.5 * (f / f_max)
}

/// Entities of one snapshot reached from the query, direct matches first
fn expand(
    snapshot: &GraphSnapshot,
    snapshot_index: usize,
    direct: &[usize],
    max_terms: usize,
) -> Vec<Reached> {
    let mut edges: Vec<(f32, f32, usize)> = Vec::new();
    for &node in direct {
        for (edge, other) in snapshot.incident_edges(node) {
            if direct.contains(&other) {
                continue;
            }
            edges.push((edge.weight, edge.relation_type.expansion_factor(), other));
        }
    }
    edges.sort_by(|a, b| {
        b.0.total_cmp(&a.0)
            .then_with(|| snapshot.nodes[a.2].name.cmp(&snapshot.nodes[b.2].name))
    });
    edges.truncate(MAX_TRAVERSED_EDGES);

    let max_weight = edges.iter().map(|e| e.0).fold(0.0f32, f32::max);
    let mut neighbours: BTreeMap<usize, f32> = BTreeMap::new();
    if max_weight > 0.0 {
        for (weight, factor, other) in edges {
            let strength = (factor * weight / max_weight).min(1.0);
            let entry = neighbours.entry(other).or_insert(0.0);
            *entry = entry.max(strength);
        }
    }

    let mut neighbours: Vec<(usize, f32)> = neighbours.into_iter().collect();
    neighbours.sort_by(|a, b| {
        let (na, nb) = (&snapshot.nodes[a.0], &snapshot.nodes[b.0]);
        nb.frequency.cmp(&na.frequency).then_with(|| na.name.cmp(&nb.name))
    });
    neighbours.truncate(max_terms.saturating_sub(direct.len()));

    let max_frequency = snapshot.max_frequency();
    direct
        .iter()
        .map(|&node| (node, 1.0, true))
        .chain(neighbours.into_iter().map(|(node, s)| (node, s, false)))
        .map(|(node, base, direct)| Reached {
            snapshot: snapshot_index,
            node,
            strength: base * frequency_factor(snapshot.nodes[node].frequency, max_frequency),
            direct,
        })
        .collect()
}

/// Aliases named near the matched entities, resolved to graph nodes
fn mined_alias_nodes(
    store: &dyn ChunkStore,
    snapshot: &GraphSnapshot,
    matched: &[usize],
    miner: &AliasMiner,
    limit: usize,
) -> Result<Vec<usize>> {
    let mut chunk_ids: Vec<i64> = matched
        .iter()
        .flat_map(|&i| snapshot.nodes[i].chunk_ids.iter().copied())
        .collect();
    chunk_ids.sort_unstable();
    chunk_ids.dedup();
    chunk_ids.truncate(ALIAS_MINING_CHUNKS);
    if chunk_ids.is_empty() {
        return Ok(Vec::new());
    }

    let chunks = store.get_chunks(&chunk_ids)?;
    let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
    let known: Vec<String> = matched
        .iter()
        .map(|&i| snapshot.nodes[i].display_name.clone())
        .collect();
    let mined = miner.mine(&texts, &known, limit);
    if !mined.is_empty() {
        tracing::debug!("Mined aliases: {:?}", mined);
    }
    Ok(mined
        .iter()
        .filter_map(|name| snapshot.lookup(name))
        .filter(|i| !matched.contains(i))
        .collect())
}

pub fn graph_candidates(
    store: &dyn ChunkStore,
    snapshots: &[Arc<GraphSnapshot>],
    plan: &QueryPlan,
    profile: &ProfileConfig,
    miner: &AliasMiner,
    interrupt: &Interrupt,
) -> Result<Vec<Candidate>> {
    let max_terms = profile.rag_graph_max_terms;
    let mut reached: Vec<Reached> = Vec::new();

    for (s, snapshot) in snapshots.iter().enumerate() {
        interrupt.check()?;
        if snapshot.is_empty() {
            continue;
        }
        let mut direct = snapshot.match_terms(&plan.graph_seed_terms, max_terms);
        if direct.is_empty() {
            continue;
        }
        if profile.alias_intent_enabled && plan.alias_intent && profile.alias_mining_max_terms > 0 {
            let mined = mined_alias_nodes(
                store,
                snapshot,
                &direct,
                miner,
                profile.alias_mining_max_terms,
            )?;
            for node in mined {
                if direct.len() >= max_terms {
                    break;
                }
                direct.push(node);
            }
        }
        reached.extend(expand(snapshot, s, &direct, max_terms));
    }
    if reached.is_empty() {
        return Ok(Vec::new());
    }
    interrupt.check()?;

    let direct_total = reached.iter().filter(|r| r.direct).count();
    // chunk id -> (summed strength, direct entity hits, entity names)
    let mut per_chunk: HashMap<i64, (f32, usize, Vec<String>)> = HashMap::new();
    for r in &reached {
        let node = &snapshots[r.snapshot].nodes[r.node];
        for &chunk_id in &node.chunk_ids {
            let entry = per_chunk.entry(chunk_id).or_insert((0.0, 0, Vec::new()));
            entry.0 += r.strength;
            if r.direct {
                entry.1 += 1;
            }
            if entry.2.len() < MATCHED_ENTITIES_PER_CHUNK && !entry.2.contains(&node.display_name) {
                entry.2.push(node.display_name.clone());
            }
        }
    }

    let mut ranked: Vec<(i64, (f32, usize, Vec<String>))> = per_chunk.into_iter().collect();
    ranked.sort_by(|a, b| b.1 .0.total_cmp(&a.1 .0).then(a.0.cmp(&b.0)));
    let pool = (plan.top_k * plan.graph_multiplier)
        .max(plan.effective_top_k * 3)
        .max(MIN_POOL);
    ranked.truncate(pool);
    interrupt.check()?;

    let max_strength = ranked.first().map_or(0.0, |r| r.1 .0);
    let ids: Vec<i64> = ranked.iter().map(|r| r.0).collect();
    let chunks: HashMap<i64, _> = store
        .get_chunks(&ids)?
        .into_iter()
        .map(|c| (c.id, c))
        .collect();
    let overlap_base = direct_total.clamp(1, ENTITY_OVERLAP_CAP) as f32;

    let mut candidates = Vec::with_capacity(ranked.len());
    for (chunk_id, (strength, direct_hits, names)) in ranked {
        // Snapshot may be older than the chunk set
        let Some(chunk) = chunks.get(&chunk_id) else {
            continue;
        };
        let graph_overlap = if max_strength > 0.0 { strength / max_strength } else { 0.0 };
        let entity_overlap = (direct_hits as f32 / overlap_base).min(1.0);
        let rank = candidates.len();
        candidates.push(Candidate {
            chunk_id,
            library_id: chunk.library_id,
            file_id: chunk.file_id,
            channel: Channel::Graph,
            raw_score: sparse_score(graph_overlap, rank, entity_overlap),
            vector_similarity: None,
            lexical_overlap: term_hit_ratio(&chunk.text, &plan.keyword_terms),
            matched_entities: names,
        });
    }

    tracing::debug!(
        "Graph channel: {} entities reached, {} chunks",
        reached.len(),
        candidates.len()
    );
    Ok(candidates)
}
