//! Keyword channel
//!
//! Asks the store's BM25 index for chunks matching the query terms, rescores
//! them locally by term and anchor coverage, and ranks the survivors. Count and
//! roster questions widen the scan and favour chunks carrying that evidence.
//! Fallback mode widens the scan and swaps the acceptance floor when the fused
//! ranking looks weak.

use super::{Candidate, Channel, IntentDetector, QueryPlan, ScoredCandidate};
use crate::cancel::Interrupt;
use crate::error::Result;
use crate::profile::ProfileConfig;
use crate::storage::{ChunkStore, KeywordMatch};
use crate::text::term_hit_ratio;
use std::collections::HashSet;
use uuid::Uuid;

const NORMAL_SCAN_CAP: usize = 5000;
const MIN_NORMAL_SCAN: usize = 120;
const MIN_COUNT_SCAN: usize = 360;
const MIN_ROSTER_SCAN: usize = 900;
const MIN_NORMAL_KEEP: usize = 20;
const MIN_ROSTER_SCAN_EXTRA: usize = 240;
const MIN_ROSTER_APPEND: usize = 40;
const ROSTER_SCAN_TERMS: usize = 10;
const FALLBACK_MIN_KEYWORD_OVERLAP: f32 = 0.25;
const COUNT_BOOST: f32 = 0.10;
const ROSTER_BOOST: f32 = 0.10;

/// Fused window inspected by the weak-hit trigger
pub const WEAK_HIT_WINDOW: usize = 8;
const WEAK_HIT_LEXICAL_OVERLAP: f32 = 0.12;
const WEAK_HIT_TOP1_MARGIN: f32 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeywordMode {
    Normal,
    /// Wider scan, floor at `keyword_fallback_min_score`
    Fallback,
}

fn local_relevance(keyword_overlap: f32, anchor_overlap: f32, bm25_share: f32) -> f32 {
    0.52 * keyword_overlap + 0.32 * anchor_overlap + 0.16 * bm25_share
}

pub(crate) fn sparse_score(overlap: f32, rank: usize, boost: f32) -> f32 {
    0.55 * overlap + 0.35 / (rank as f32 + 1.0) + 0.10 * boost
}

struct Rescored {
    relevance: f32,
    keyword_overlap: f32,
    anchor_overlap: f32,
    found: KeywordMatch,
}

pub fn keyword_candidates(
    store: &dyn ChunkStore,
    plan: &QueryPlan,
    scope: &[Uuid],
    profile: &ProfileConfig,
    mode: KeywordMode,
    intents: &IntentDetector,
    interrupt: &Interrupt,
) -> Result<Vec<Candidate>> {
    if plan.keyword_terms.is_empty() {
        return Ok(Vec::new());
    }

    let (scan_limit, keep) = match mode {
        KeywordMode::Normal => {
            let mut scan = (plan.top_k * plan.keyword_multiplier * 6)
                .max(plan.effective_top_k * 6)
                .max(MIN_NORMAL_SCAN);
            if plan.count_intent {
                scan = scan.max(MIN_COUNT_SCAN);
            }
            if plan.roster_intent {
                scan = scan.max(MIN_ROSTER_SCAN);
            }
            let keep = (plan.top_k * plan.keyword_multiplier)
                .max(plan.effective_top_k * 2)
                .max(MIN_NORMAL_KEEP);
            (scan.min(NORMAL_SCAN_CAP), keep)
        }
        KeywordMode::Fallback => (
            profile.keyword_fallback_scan_limit,
            profile.keyword_fallback_max_chunks,
        ),
    };

    let mut matches = store.keyword_query(&plan.keyword_terms, scope, scan_limit, interrupt)?;

    if plan.roster_intent && !plan.roster_terms.is_empty() {
        let roster_terms = &plan.roster_terms[..plan.roster_terms.len().min(ROSTER_SCAN_TERMS)];
        let limit = (plan.top_k * plan.keyword_multiplier * 6)
            .max(plan.effective_top_k * 6)
            .max(MIN_ROSTER_SCAN_EXTRA);
        let append = (plan.effective_top_k * 5).max(MIN_ROSTER_APPEND);
        let present: HashSet<i64> = matches.iter().map(|m| m.chunk.id).collect();
        let extra: Vec<KeywordMatch> = store
            .keyword_query(roster_terms, scope, limit, interrupt)?
            .into_iter()
            .filter(|m| !present.contains(&m.chunk.id))
            .take(append)
            .collect();
        matches.extend(extra);
    }
    interrupt.check()?;

    let scanned = matches.len();
    let max_bm25 = matches.iter().map(|m| m.bm25).fold(0.0f32, f32::max);

    let mut rescored: Vec<Rescored> = matches
        .into_iter()
        .filter_map(|found| {
            let text = found.chunk.text.as_str();
            let keyword_overlap = term_hit_ratio(text, &plan.keyword_terms);
            let anchor_overlap = term_hit_ratio(text, &plan.anchor_terms);
            let bm25_share = if max_bm25 > 0.0 { found.bm25 / max_bm25 } else { 0.0 };
            let mut relevance = local_relevance(keyword_overlap, anchor_overlap, bm25_share);
            if plan.count_intent && intents.has_count_signal(text, &plan.count_unit_hints) {
                relevance += COUNT_BOOST;
            }
            if plan.roster_intent && intents.has_roster_signal(text, &plan.anchor_terms) {
                relevance += ROSTER_BOOST;
            }
            let keep = match mode {
                KeywordMode::Normal => relevance > 0.0,
                KeywordMode::Fallback => {
                    relevance >= profile.keyword_fallback_min_score
                        && (anchor_overlap > 0.0 || keyword_overlap >= FALLBACK_MIN_KEYWORD_OVERLAP)
                }
            };
            keep.then_some(Rescored {
                relevance,
                keyword_overlap,
                anchor_overlap,
                found,
            })
        })
        .collect();

    rescored.sort_by(|a, b| {
        b.relevance
            .total_cmp(&a.relevance)
            .then(b.found.bm25.total_cmp(&a.found.bm25))
            .then(a.found.chunk.id.cmp(&b.found.chunk.id))
    });
    rescored.truncate(keep);

    let candidates: Vec<Candidate> = rescored
        .into_iter()
        .enumerate()
        .map(|(rank, r)| Candidate {
            chunk_id: r.found.chunk.id,
            library_id: r.found.chunk.library_id,
            file_id: r.found.chunk.file_id,
            channel: Channel::Keyword,
            raw_score: sparse_score(r.keyword_overlap, rank, r.anchor_overlap),
            vector_similarity: None,
            lexical_overlap: r.keyword_overlap,
            matched_entities: Vec::new(),
        })
        .collect();

    tracing::debug!(
        "Keyword channel ({:?}): scanned {}, kept {}",
        mode,
        scanned,
        candidates.len()
    );
    Ok(candidates)
}

/// Whether the first fused ranking is weak enough to justify a fallback scan.
///
/// `window` holds the top fused candidates with their chunk text, best first.
/// Count and roster questions also need a window chunk carrying a number or a
/// member list.
pub fn is_weak_hit(
    window: &[(&ScoredCandidate, &str)],
    plan: &QueryPlan,
    intents: &IntentDetector,
    profile: &ProfileConfig,
) -> bool {
    let window = &window[..window.len().min(WEAK_HIT_WINDOW)];
    let Some((top, _)) = window.first() else {
        return true;
    };
    let anchor_terms = &plan.anchor_terms;

    if !anchor_terms.is_empty()
        && window
            .iter()
            .all(|(_, text)| term_hit_ratio(text, anchor_terms) == 0.0)
    {
        return true;
    }
    if plan.count_intent
        && !window
            .iter()
            .any(|(_, text)| intents.has_count_signal(text, &plan.count_unit_hints))
    {
        return true;
    }
    if plan.roster_intent
        && !window
            .iter()
            .any(|(_, text)| intents.has_roster_signal(text, anchor_terms))
    {
        return true;
    }

    let lexical_hits = window
        .iter()
        .filter(|(c, _)| c.lexical_overlap >= WEAK_HIT_LEXICAL_OVERLAP)
        .count();
    lexical_hits <= 1 && top.composite_score < profile.rag_min_top1_score + WEAK_HIT_TOP1_MARGIN
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::RuleBasedExtractor;
    use crate::retrieval::QueryIntent;
    use crate::storage::{MemoryChunkStore, NewChunk};
    use std::collections::BTreeMap;

    fn store_with(texts: &[&str]) -> (MemoryChunkStore, Uuid) {
        let store = MemoryChunkStore::new().unwrap();
        let library = Uuid::new_v4();
        let chunks = texts
            .iter()
            .map(|t| NewChunk {
                text: t.to_string(),
                embedding: Vec::new(),
                keyword_terms: Vec::new(),
            })
            .collect();
        store
            .replace_file_chunks(library, "doc.txt", "hash", chunks)
            .unwrap();
        (store, library)
    }

    fn intents() -> IntentDetector {
        IntentDetector::new().unwrap()
    }

    fn plan_with(query: &str, intent: &QueryIntent) -> QueryPlan {
        let extractor = RuleBasedExtractor::new().unwrap();
        QueryPlan::build(query, 3, intent, &[], &extractor, &[], &ProfileConfig::default())
    }

    fn plan(query: &str) -> QueryPlan {
        plan_with(query, &QueryIntent::default())
    }

    fn search(
        store: &MemoryChunkStore,
        plan: &QueryPlan,
        library: Uuid,
        profile: &ProfileConfig,
        mode: KeywordMode,
    ) -> Vec<Candidate> {
        keyword_candidates(store, plan, &[library], profile, mode, &intents(), &Interrupt::none()).unwrap()
    }

    fn scored(chunk_id: i64, score: f32, overlap: f32) -> ScoredCandidate {
        ScoredCandidate {
            chunk_id,
            library_id: Uuid::nil(),
            file_id: Uuid::nil(),
            composite_score: score,
            contributions: BTreeMap::new(),
            vector_similarity: 0.0,
            lexical_overlap: overlap,
            matched_entities: Vec::new(),
        }
    }

    #[test]
    fn test_best_coverage_ranks_first() {
        let (store, library) = store_with(&[
            "Serde handles serialization",
            "Tokio runtime schedules async tasks on worker threads",
            "The Tokio project",
            "Nothing relevant here",
        ]);
        let candidates = search(
            &store,
            &plan("Tokio runtime worker threads"),
            library,
            &ProfileConfig::default(),
            KeywordMode::Normal,
        );

        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].chunk_id, 2);
        assert_eq!(candidates[1].chunk_id, 3);
        assert!(candidates[0].raw_score > candidates[1].raw_score);
        assert!(candidates[0].lexical_overlap > candidates[1].lexical_overlap);
    }

    #[test]
    fn test_relevant_chunk_survives_past_the_scan_limit() {
        // More weak matches than the normal scan holds, all with lower ids
        let mut texts: Vec<String> = (0..130).map(|i| format!("The runtime note {}", i)).collect();
        texts.push("Tokio runtime worker threads scheduler".to_string());
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let (store, library) = store_with(&refs);

        let candidates = search(
            &store,
            &plan("Tokio runtime worker threads"),
            library,
            &ProfileConfig::default(),
            KeywordMode::Normal,
        );
        assert_eq!(candidates[0].chunk_id, 131);
    }

    #[test]
    fn test_fallback_floor_filters_thin_matches() {
        let (store, library) = store_with(&[
            "Tokio runtime schedules async tasks on worker threads",
            "mentions threads only",
        ]);
        let profile = ProfileConfig {
            keyword_fallback_min_score: 0.3,
            ..ProfileConfig::default()
        };
        let plan = plan("Tokio runtime worker threads");

        let normal = search(&store, &plan, library, &profile, KeywordMode::Normal);
        assert_eq!(normal.len(), 2);

        let fallback = search(&store, &plan, library, &profile, KeywordMode::Fallback);
        assert_eq!(fallback.len(), 1);
        assert_eq!(fallback[0].chunk_id, 1);
    }

    #[test]
    fn test_fallback_respects_max_chunks() {
        let texts: Vec<String> = (0..30).map(|i| format!("Tokio runtime note {}", i)).collect();
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let (store, library) = store_with(&refs);
        let profile = ProfileConfig {
            keyword_fallback_max_chunks: 20,
            ..ProfileConfig::default()
        };
        let fallback = search(&store, &plan("Tokio runtime"), library, &profile, KeywordMode::Fallback);
        assert_eq!(fallback.len(), 20);
        // Equal relevance keeps chunk id order
        assert_eq!(fallback[0].chunk_id, 1);
    }

    #[test]
    fn test_count_question_prefers_chunks_with_numbers() {
        let (store, library) = store_with(&["徒弟们在路边休息", "三个徒弟在路边休息"]);
        let query = "唐僧有几个徒弟";
        let intent = intents().detect(query, false);
        assert!(intent.count && intent.roster);

        let candidates = search(
            &store,
            &plan_with(query, &intent),
            library,
            &ProfileConfig::default(),
            KeywordMode::Normal,
        );
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].chunk_id, 2);
    }

    #[test]
    fn test_weak_hit_trigger() {
        let profile = ProfileConfig::default();
        let detector = intents();
        let plan = plan("Tokio");
        assert!(plan.anchor_terms.contains(&"tokio".to_string()));

        assert!(is_weak_hit(&[], &plan, &detector, &profile));

        let strong = scored(1, 0.9, 0.5);
        let second = scored(2, 0.6, 0.4);
        let window = [(&strong, "Tokio runtime"), (&second, "Tokio tasks")];
        assert!(!is_weak_hit(&window, &plan, &detector, &profile));

        // No window item mentions an anchor
        let off_topic = [(&strong, "Serde"), (&second, "Rayon")];
        assert!(is_weak_hit(&off_topic, &plan, &detector, &profile));

        // Anchors present but a single lexical hit and a low top score
        let low = scored(3, 0.32, 0.5);
        let thin = scored(4, 0.2, 0.0);
        let weak = [(&low, "Tokio"), (&thin, "Tokio")];
        assert!(is_weak_hit(&weak, &plan, &detector, &profile));

        // Same shape with a confident top score is fine
        let high = scored(3, 0.5, 0.5);
        let confident = [(&high, "Tokio"), (&thin, "Tokio")];
        assert!(!is_weak_hit(&confident, &plan, &detector, &profile));
    }

    #[test]
    fn test_count_question_without_numbers_is_weak() {
        let profile = ProfileConfig::default();
        let detector = intents();
        let query = "唐僧有几个徒弟";
        let plan = plan_with(query, &detector.detect(query, false));

        let strong = scored(1, 0.9, 0.5);
        let second = scored(2, 0.6, 0.4);
        let no_count = [(&strong, "唐僧的徒弟很多"), (&second, "唐僧和徒弟赶路")];
        assert!(is_weak_hit(&no_count, &plan, &detector, &profile));

        let counted = [(&strong, "唐僧收了三个徒弟"), (&second, "唐僧和徒弟赶路")];
        assert!(!is_weak_hit(&counted, &plan, &detector, &profile));
    }
}
