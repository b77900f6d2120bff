//! Weighted fusion of the channel candidate lists

use super::{Candidate, Channel, ChannelContribution, ChannelOutput, ScoredCandidate};
use crate::profile::ProfileConfig;
use crate::text::merge_preserve_order;
use ahash::AHashMap;
use std::collections::BTreeMap;

/// Upper bound of a composite score: the largest nominal weight sum, 1 + 1 + 1.2
pub const COMPOSITE_SCORE_CEILING: f32 = 3.2;

const MATCHED_ENTITY_LIMIT: usize = 16;

/// Effective per-channel weights for one request
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelWeights {
    pub vector: f32,
    pub keyword: f32,
    pub graph: f32,
}

impl ChannelWeights {
    pub fn nominal(profile: &ProfileConfig) -> Self {
        Self {
            vector: 1.0,
            keyword: 1.0,
            graph: profile.graph_channel_weight,
        }
    }

    pub fn get(&self, channel: Channel) -> f32 {
        match channel {
            Channel::Vector => self.vector,
            Channel::Keyword => self.keyword,
            Channel::Graph => self.graph,
        }
    }

    /// Zero the weights of unavailable channels and scale the rest up so the
    /// total weight is unchanged
    pub fn redistributed(profile: &ProfileConfig, available: &[Channel]) -> Self {
        let nominal = Self::nominal(profile);
        let nominal_total: f32 = Channel::ALL.iter().map(|&c| nominal.get(c)).sum();
        let available_total: f32 = available.iter().map(|&c| nominal.get(c)).sum();
        let scale = if available_total > 0.0 {
            nominal_total / available_total
        } else {
            1.0
        };
        let weight = |channel: Channel| {
            if available.contains(&channel) {
                nominal.get(channel) * scale
            } else {
                0.0
            }
        };
        Self {
            vector: weight(Channel::Vector),
            keyword: weight(Channel::Keyword),
            graph: weight(Channel::Graph),
        }
    }
}

/// Merge channel outputs into one ranking
///
/// # Arguments
/// * `outputs` - One output per channel; unavailable channels lose their weight
/// * `profile` - Supplies the graph channel weight and the graph-only penalty
///
/// # Returns
/// One entry per chunk, sorted by composite score descending, then by raw vector
/// score descending, then by chunk id ascending
pub fn fuse(outputs: &[ChannelOutput], profile: &ProfileConfig) -> Vec<ScoredCandidate> {
    let available: Vec<Channel> = outputs
        .iter()
        .filter(|o| o.status.is_available())
        .map(|o| o.channel)
        .collect();
    let weights = ChannelWeights::redistributed(profile, &available);

    let mut merged: AHashMap<i64, ScoredCandidate> = AHashMap::new();
    for output in outputs.iter().filter(|o| o.status.is_available()) {
        let weight = weights.get(output.channel);
        for candidate in &output.candidates {
            merge_candidate(&mut merged, candidate, weight);
        }
    }

    let mut fused: Vec<ScoredCandidate> = merged
        .into_values()
        .map(|mut scored| {
            let graph_only =
                scored.contributions.len() == 1 && scored.contributions.contains_key(&Channel::Graph);
            if graph_only {
                if let Some(graph) = scored.contributions.get_mut(&Channel::Graph) {
                    graph.weighted_score *= profile.graph_only_penalty;
                }
            }
            let total: f32 = scored.contributions.values().map(|c| c.weighted_score).sum();
            scored.composite_score = total.clamp(0.0, COMPOSITE_SCORE_CEILING);
            scored
        })
        .collect();

    fused.sort_by(|a, b| {
        b.composite_score
            .total_cmp(&a.composite_score)
            .then_with(|| b.raw_score(Channel::Vector).total_cmp(&a.raw_score(Channel::Vector)))
            .then(a.chunk_id.cmp(&b.chunk_id))
    });
    fused
}

fn merge_candidate(merged: &mut AHashMap<i64, ScoredCandidate>, candidate: &Candidate, weight: f32) {
    let scored = merged
        .entry(candidate.chunk_id)
        .or_insert_with(|| ScoredCandidate {
            chunk_id: candidate.chunk_id,
            library_id: candidate.library_id,
            file_id: candidate.file_id,
            composite_score: 0.0,
            contributions: BTreeMap::new(),
            vector_similarity: 0.0,
            lexical_overlap: 0.0,
            matched_entities: Vec::new(),
        });

    let contribution = ChannelContribution {
        raw_score: candidate.raw_score,
        weighted_score: candidate.raw_score * weight,
    };
    // Keep the best contribution per channel
    scored
        .contributions
        .entry(candidate.channel)
        .and_modify(|existing| {
            if contribution.raw_score > existing.raw_score {
                *existing = contribution;
            }
        })
        .or_insert(contribution);

    if let Some(similarity) = candidate.vector_similarity {
        scored.vector_similarity = scored.vector_similarity.max(similarity);
    }
    scored.lexical_overlap = scored.lexical_overlap.max(candidate.lexical_overlap);
    if !candidate.matched_entities.is_empty() {
        scored.matched_entities = merge_preserve_order(
            &scored.matched_entities,
            &candidate.matched_entities,
            MATCHED_ENTITY_LIMIT,
        );
    }
}
