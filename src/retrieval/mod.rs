//! Hybrid retrieval and ranking
//!
//! Three candidate generators (dense vector similarity, keyword matching and
//! the entity graph) run concurrently, are merged by fusion into one composite
//! ranking, and pass through an acceptance gate with a bounded relaxation
//! ladder. Broad questions switch to summary mode, which widens and diversifies
//! the selection. Accepted candidates become ordered citations.

mod citation;
mod fusion;
mod gate;
mod graph;
mod hybrid;
mod intent;
mod keyword;
mod query;
mod summary;
mod vector;

pub use crate::cancel::{cancel_pair, CancelHandle, CancelSignal, Interrupt};
pub use citation::assemble_citations;
pub use fusion::{fuse, ChannelWeights, COMPOSITE_SCORE_CEILING};
pub use gate::{evaluate, GateDecision, GateEvaluation, GateOutcome, GateTier, Thresholds};
pub use graph::graph_candidates;
pub use hybrid::{HybridSearcher, SearchRequest};
pub use intent::{IntentDetector, QueryIntent};
pub use keyword::{is_weak_hit, keyword_candidates, KeywordMode};
pub use query::QueryPlan;
pub use summary::{diverse_selection, has_summary_spread, SummaryDetector};
pub use vector::vector_candidates;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Candidate source. The declaration order is the tie-break order when picking
/// the dominant channel of a citation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Vector,
    Keyword,
    Graph,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Vector, Channel::Keyword, Channel::Graph];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Vector => "vector",
            Channel::Keyword => "keyword",
            Channel::Graph => "graph",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One chunk proposed by one generator
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub chunk_id: i64,
    pub library_id: Uuid,
    pub file_id: Uuid,
    pub channel: Channel,
    pub raw_score: f32,
    /// Cosine similarity, vector channel only
    pub vector_similarity: Option<f32>,
    /// Term-hit ratio of the query terms in the chunk text
    pub lexical_overlap: f32,
    /// Graph entities that led to this chunk
    pub matched_entities: Vec<String>,
}

/// Whether a generator produced a usable result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ChannelStatus {
    Available,
    Unavailable { reason: String },
}

impl ChannelStatus {
    pub fn is_available(&self) -> bool {
        matches!(self, ChannelStatus::Available)
    }
}

/// Output of one generator call
#[derive(Debug, Clone)]
pub struct ChannelOutput {
    pub channel: Channel,
    pub status: ChannelStatus,
    pub candidates: Vec<Candidate>,
}

impl ChannelOutput {
    pub fn available(channel: Channel, candidates: Vec<Candidate>) -> Self {
        Self {
            channel,
            status: ChannelStatus::Available,
            candidates,
        }
    }

    pub fn unavailable(channel: Channel, reason: impl Into<String>) -> Self {
        Self {
            channel,
            status: ChannelStatus::Unavailable {
                reason: reason.into(),
            },
            candidates: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelContribution {
    pub raw_score: f32,
    pub weighted_score: f32,
}

/// A chunk after fusion, carrying every channel's contribution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub chunk_id: i64,
    pub library_id: Uuid,
    pub file_id: Uuid,
    pub composite_score: f32,
    pub contributions: BTreeMap<Channel, ChannelContribution>,
    /// Best vector similarity seen, 0 when the vector channel did not propose it
    pub vector_similarity: f32,
    pub lexical_overlap: f32,
    pub matched_entities: Vec<String>,
}

impl ScoredCandidate {
    pub fn raw_score(&self, channel: Channel) -> f32 {
        self.contributions
            .get(&channel)
            .map_or(0.0, |c| c.raw_score)
    }

    /// Channel with the largest weighted contribution
    pub fn dominant_channel(&self) -> Channel {
        let mut best = (Channel::Vector, f32::NEG_INFINITY);
        for (&channel, contribution) in &self.contributions {
            if contribution.weighted_score > best.1 {
                best = (channel, contribution.weighted_score);
            }
        }
        best.0
    }
}

/// User-facing attribution of one accepted fragment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub library_id: Uuid,
    pub file_id: Uuid,
    pub file_name: String,
    pub chunk_id: i64,
    pub score: f32,
    pub snippet: String,
    pub source_channel: Channel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_entities: Option<Vec<String>>,
}

/// Accepted chunk text with its citation, handed to generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedFragment {
    pub citation: Citation,
    pub text: String,
}

/// What retrieval hands to the generation step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RetrievalOutcome {
    Grounded { fragments: Vec<RetrievedFragment> },
    /// The gate exhausted its ladder; not an error
    InsufficientEvidence { best_score: f32, message: String },
}

impl RetrievalOutcome {
    pub fn is_grounded(&self) -> bool {
        matches!(self, RetrievalOutcome::Grounded { .. })
    }

    pub fn fragments(&self) -> &[RetrievedFragment] {
        match self {
            RetrievalOutcome::Grounded { fragments } => fragments,
            RetrievalOutcome::InsufficientEvidence { .. } => &[],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMode {
    Ordinary,
    Summary,
}

/// Per-channel line of a report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelReport {
    pub channel: Channel,
    pub status: ChannelStatus,
    pub candidates: usize,
}

/// Outcome of one request plus how it was reached
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalReport {
    pub outcome: RetrievalOutcome,
    pub mode: RetrievalMode,
    /// Summary mode was detected but the spread requirement failed
    pub summary_fallback: bool,
    pub gate_trace: Vec<GateEvaluation>,
    pub channels: Vec<ChannelReport>,
    pub keyword_fallback_used: bool,
    pub effective_top_k: usize,
    pub profile_key: String,
    pub profile_version: u32,
}

impl RetrievalReport {
    /// Channels that failed or timed out
    pub fn degraded_channels(&self) -> Vec<Channel> {
        self.channels
            .iter()
            .filter(|c| !c.status.is_available())
            .map(|c| c.channel)
            .collect()
    }

    pub fn final_tier(&self) -> Option<GateTier> {
        self.gate_trace.last().map(|e| e.tier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contribution(raw: f32, weighted: f32) -> ChannelContribution {
        ChannelContribution {
            raw_score: raw,
            weighted_score: weighted,
        }
    }

    #[test]
    fn test_dominant_channel_ties_prefer_vector_then_keyword() {
        let mut candidate = ScoredCandidate {
            chunk_id: 1,
            library_id: Uuid::nil(),
            file_id: Uuid::nil(),
            composite_score: 1.0,
            contributions: BTreeMap::new(),
            vector_similarity: 0.0,
            lexical_overlap: 0.0,
            matched_entities: Vec::new(),
        };
        candidate
            .contributions
            .insert(Channel::Graph, contribution(0.5, 0.5));
        candidate
            .contributions
            .insert(Channel::Keyword, contribution(0.5, 0.5));
        assert_eq!(candidate.dominant_channel(), Channel::Keyword);

        candidate
            .contributions
            .insert(Channel::Vector, contribution(0.5, 0.5));
        assert_eq!(candidate.dominant_channel(), Channel::Vector);

        candidate
            .contributions
            .insert(Channel::Graph, contribution(0.9, 0.6));
        assert_eq!(candidate.dominant_channel(), Channel::Graph);
    }

    #[test]
    fn test_degraded_channels() {
        let report = RetrievalReport {
            outcome: RetrievalOutcome::InsufficientEvidence {
                best_score: 0.0,
                message: String::new(),
            },
            mode: RetrievalMode::Ordinary,
            summary_fallback: false,
            gate_trace: Vec::new(),
            channels: vec![
                ChannelReport {
                    channel: Channel::Vector,
                    status: ChannelStatus::Unavailable {
                        reason: "timed out".to_string(),
                    },
                    candidates: 0,
                },
                ChannelReport {
                    channel: Channel::Keyword,
                    status: ChannelStatus::Available,
                    candidates: 4,
                },
            ],
            keyword_fallback_used: false,
            effective_top_k: 5,
            profile_key: "general_default".to_string(),
            profile_version: 1,
        };
        assert_eq!(report.degraded_channels(), vec![Channel::Vector]);
        assert!(report.final_tier().is_none());
        assert!(report.outcome.fragments().is_empty());
    }
}
