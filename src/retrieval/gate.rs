//! Acceptance gate
//!
//! Evaluates a fused ranking against the profile thresholds. A failed
//! evaluation retries the same list with relaxed thresholds, at most twice:
//!
//! ```text
//! INITIAL -> ACCEPTED | RELAXED_1 -> ACCEPTED | RELAXED_2 -> ACCEPTED | REJECTED
//! ```

use super::ScoredCandidate;
use crate::profile::ProfileConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateTier {
    Initial,
    Relaxed1,
    Relaxed2,
}

impl GateTier {
    const LADDER: [GateTier; 3] = [GateTier::Initial, GateTier::Relaxed1, GateTier::Relaxed2];

    pub fn level(&self) -> usize {
        match self {
            GateTier::Initial => 0,
            GateTier::Relaxed1 => 1,
            GateTier::Relaxed2 => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub top1: f32,
    pub support: f32,
    pub support_count: usize,
    pub item: f32,
}

impl Thresholds {
    /// Thresholds of `tier`: base minus `level × relax`, floored at zero, with
    /// `item ≤ support ≤ top1` restored
    pub fn for_tier(profile: &ProfileConfig, tier: GateTier) -> Self {
        let level = tier.level();
        let relax = level as f32;
        let top1 = (profile.rag_min_top1_score - relax * profile.fallback_top1_relax).max(0.0);
        let support =
            (profile.rag_min_support_score - relax * profile.fallback_support_relax).max(0.0);
        let item = (profile.rag_min_item_score - relax * profile.fallback_item_relax).max(0.0);
        let support = support.min(top1);
        Self {
            top1,
            support,
            support_count: profile.rag_min_support_count.saturating_sub(level).max(1),
            item: item.min(support),
        }
    }
}

/// One step of the ladder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateEvaluation {
    pub tier: GateTier,
    pub thresholds: Thresholds,
    pub top1_score: f32,
    pub support_hits: usize,
    pub retained: usize,
    pub passed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", content = "tier", rename_all = "snake_case")]
pub enum GateDecision {
    Accepted(GateTier),
    Rejected,
}

#[derive(Debug, Clone)]
pub struct GateOutcome {
    pub decision: GateDecision,
    /// Accepted candidates in fused order; empty when rejected
    pub retained: Vec<ScoredCandidate>,
    pub trace: Vec<GateEvaluation>,
    pub best_score: f32,
}

impl GateOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self.decision, GateDecision::Accepted(_))
    }

    /// Thresholds of the accepting evaluation
    pub fn accepted_thresholds(&self) -> Option<Thresholds> {
        match self.decision {
            GateDecision::Accepted(_) => self.trace.last().map(|e| e.thresholds),
            GateDecision::Rejected => None,
        }
    }
}

fn evaluate_tier(
    fused: &[ScoredCandidate],
    top_k: usize,
    tier: GateTier,
    thresholds: Thresholds,
) -> (GateEvaluation, Vec<ScoredCandidate>) {
    let top1_score = fused.first().map_or(0.0, |c| c.composite_score);
    let window = top_k.max(thresholds.support_count);
    let support_hits = fused
        .iter()
        .take(window)
        .filter(|c| c.composite_score >= thresholds.support)
        .count();
    let retained: Vec<ScoredCandidate> = fused
        .iter()
        .filter(|c| c.composite_score >= thresholds.item)
        .take(top_k)
        .cloned()
        .collect();

    let passed = !fused.is_empty()
        && top1_score >= thresholds.top1
        && support_hits >= thresholds.support_count
        && !retained.is_empty();

    let evaluation = GateEvaluation {
        tier,
        thresholds,
        top1_score,
        support_hits,
        retained: retained.len(),
        passed,
    };
    (evaluation, retained)
}

/// Run the ladder over an already fused list. Generators are never re-run.
pub fn evaluate(fused: &[ScoredCandidate], top_k: usize, profile: &ProfileConfig) -> GateOutcome {
    let top_k = top_k.max(1);
    let tiers: &[GateTier] = if profile.fallback_relax_enabled {
        &GateTier::LADDER
    } else {
        &GateTier::LADDER[..1]
    };

    let mut trace = Vec::with_capacity(tiers.len());
    for &tier in tiers {
        let thresholds = Thresholds::for_tier(profile, tier);
        let (evaluation, retained) = evaluate_tier(fused, top_k, tier, thresholds);
        let passed = evaluation.passed;
        tracing::debug!(
            "Gate {:?}: top1 {:.3} (>= {:.3}), support {}/{} (>= {:.3}), retained {}",
            tier,
            evaluation.top1_score,
            thresholds.top1,
            evaluation.support_hits,
            thresholds.support_count,
            thresholds.support,
            evaluation.retained
        );
        trace.push(evaluation);
        if passed {
            return GateOutcome {
                decision: GateDecision::Accepted(tier),
                retained,
                trace,
                best_score: fused.first().map_or(0.0, |c| c.composite_score),
            };
        }
    }

    GateOutcome {
        decision: GateDecision::Rejected,
        retained: Vec::new(),
        trace,
        best_score: fused.first().map_or(0.0, |c| c.composite_score),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn ranking(scores: &[f32]) -> Vec<ScoredCandidate> {
        scores
            .iter()
            .enumerate()
            .map(|(i, &score)| ScoredCandidate {
                chunk_id: i as i64 + 1,
                library_id: Uuid::nil(),
                file_id: Uuid::nil(),
                composite_score: score,
                contributions: BTreeMap::new(),
                vector_similarity: 0.0,
                lexical_overlap: 0.0,
                matched_entities: Vec::new(),
            })
            .collect()
    }

    #[test]
    fn test_accepts_at_initial_tier() {
        let fused = ranking(&[0.5, 0.25, 0.22, 0.05]);
        let outcome = evaluate(&fused, 5, &ProfileConfig::default());

        assert_eq!(outcome.decision, GateDecision::Accepted(GateTier::Initial));
        assert_eq!(outcome.trace.len(), 1);
        let ids: Vec<i64> = outcome.retained.iter().map(|c| c.chunk_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_thresholds_are_inclusive() {
        let fused = ranking(&[0.30, 0.18]);
        let outcome = evaluate(&fused, 3, &ProfileConfig::default());
        assert_eq!(outcome.decision, GateDecision::Accepted(GateTier::Initial));
    }

    #[test]
    fn test_relaxed_thresholds() {
        let profile = ProfileConfig::default();
        let tier1 = Thresholds::for_tier(&profile, GateTier::Relaxed1);
        assert!((tier1.top1 - 0.22).abs() < 1e-6);
        assert!((tier1.support - 0.12).abs() < 1e-6);
        assert!((tier1.item - 0.06).abs() < 1e-6);
        assert_eq!(tier1.support_count, 1);

        let tier2 = Thresholds::for_tier(&profile, GateTier::Relaxed2);
        assert!((tier2.top1 - 0.14).abs() < 1e-6);
        assert!((tier2.support - 0.06).abs() < 1e-6);
        assert!((tier2.item - 0.02).abs() < 1e-6);
        assert_eq!(tier2.support_count, 1);
    }

    #[test]
    fn test_relaxation_restores_ordering() {
        let profile = ProfileConfig {
            rag_min_top1_score: 0.2,
            rag_min_support_score: 0.2,
            rag_min_item_score: 0.2,
            fallback_top1_relax: 0.2,
            fallback_support_relax: 0.0,
            fallback_item_relax: 0.0,
            ..ProfileConfig::default()
        };
        let tier = Thresholds::for_tier(&profile, GateTier::Relaxed1);
        assert_eq!(tier.top1, 0.0);
        assert_eq!(tier.support, 0.0);
        assert_eq!(tier.item, 0.0);
    }

    #[test]
    fn test_second_tier_accepts() {
        // 0.2 fails 0.30 and 0.22, passes 0.14
        let fused = ranking(&[0.2, 0.1]);
        let outcome = evaluate(&fused, 3, &ProfileConfig::default());
        assert_eq!(outcome.decision, GateDecision::Accepted(GateTier::Relaxed2));
        assert_eq!(outcome.trace.len(), 3);
        assert!(!outcome.trace[0].passed && !outcome.trace[1].passed);
        assert_eq!(outcome.retained.len(), 2);
    }

    #[test]
    fn test_rejected_after_two_relaxations() {
        let fused = ranking(&[0.1, 0.05]);
        let outcome = evaluate(&fused, 3, &ProfileConfig::default());
        assert_eq!(outcome.decision, GateDecision::Rejected);
        assert_eq!(outcome.trace.len(), 3);
        assert!(outcome.retained.is_empty());
        assert!((outcome.best_score - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_no_relaxation_rejects_immediately() {
        let profile = ProfileConfig {
            fallback_relax_enabled: false,
            ..ProfileConfig::default()
        };
        let outcome = evaluate(&ranking(&[0.2, 0.19]), 3, &profile);
        assert_eq!(outcome.decision, GateDecision::Rejected);
        assert_eq!(outcome.trace.len(), 1);
    }

    #[test]
    fn test_empty_ranking_is_rejected() {
        let outcome = evaluate(&[], 3, &ProfileConfig::default());
        assert_eq!(outcome.decision, GateDecision::Rejected);
        assert_eq!(outcome.best_score, 0.0);
    }

    #[test]
    fn test_support_window_spans_top_k() {
        let profile = ProfileConfig {
            rag_min_support_count: 3,
            fallback_relax_enabled: false,
            ..ProfileConfig::default()
        };
        let fused = ranking(&[0.5, 0.1, 0.1, 0.3, 0.3]);
        // Window of max(top_k, count) = 3 sees only one support hit
        assert_eq!(evaluate(&fused, 2, &profile).decision, GateDecision::Rejected);
        // A wider top_k brings the later hits into the window
        assert_eq!(
            evaluate(&fused, 5, &profile).decision,
            GateDecision::Accepted(GateTier::Initial)
        );
    }

    #[test]
    fn test_lower_item_threshold_never_shrinks_selection() {
        let fused = ranking(&[0.6, 0.3, 0.2, 0.12, 0.09, 0.04, 0.01]);
        let mut previous = 0;
        for item in [0.18, 0.15, 0.12, 0.1, 0.08, 0.05, 0.02, 0.0] {
            let profile = ProfileConfig {
                rag_min_item_score: item,
                ..ProfileConfig::default()
            };
            let retained = evaluate(&fused, 10, &profile).retained.len();
            assert!(retained >= previous);
            previous = retained;
        }
        assert_eq!(previous, 7);
    }
}
