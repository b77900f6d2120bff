//! Query analysis shared by the generators

use super::intent::{QueryIntent, ROSTER_CUE_TERMS};
use crate::entities::{is_alias_intent, EntityExtractor, GraphSnapshot};
use crate::profile::ProfileConfig;
use crate::session::{contextual_query, select_context_entities};
use crate::text::{content_tokens, is_query_noise, is_stopword, merge_preserve_order, normalize_entity};
use std::collections::HashSet;
use std::sync::Arc;

const QUERY_ENTITY_LIMIT: usize = 10;
const QUERY_TOKEN_LIMIT: usize = 24;
const FOCUS_TOKEN_LIMIT: usize = 8;
const KEYWORD_TERM_LIMIT: usize = 64;
const ANCHOR_TERM_LIMIT: usize = 12;
const ROSTER_ANCHOR_LIMIT: usize = 16;
const GRAPH_SEED_LIMIT: usize = 24;
const ROSTER_SEED_LIMIT: usize = 14;
const ROSTER_KEYWORD_LIMIT: usize = 48;
const NEIGHBOR_EDGE_LIMIT: usize = 260;

/// Everything the generators need to know about one question
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub query: String,
    /// The query plus up to three conversation entities; the text that is embedded
    pub contextual_query: String,
    pub query_entities: Vec<String>,
    pub context_entities: Vec<String>,
    pub focus_tokens: Vec<String>,
    /// Terms searched by the keyword channel, most specific first
    pub keyword_terms: Vec<String>,
    /// Normalized terms a chunk should mention to be on topic
    pub anchor_terms: Vec<String>,
    /// Terms matched against graph nodes
    pub graph_seed_terms: Vec<String>,
    pub alias_intent: bool,
    pub summary_mode: bool,
    pub count_intent: bool,
    pub roster_intent: bool,
    pub count_unit_hints: Vec<String>,
    /// Graph neighbours of the query entities, mined for roster questions
    pub roster_terms: Vec<String>,
    pub top_k: usize,
    pub effective_top_k: usize,
    pub vector_multiplier: usize,
    pub keyword_multiplier: usize,
    pub graph_multiplier: usize,
}

impl QueryPlan {
    /// Analyse `query` against the conversation history and the graph snapshots
    /// of the libraries in scope
    pub fn build(
        query: &str,
        top_k: usize,
        intent: &QueryIntent,
        history_entities: &[String],
        extractor: &dyn EntityExtractor,
        snapshots: &[Arc<GraphSnapshot>],
        profile: &ProfileConfig,
    ) -> Self {
        let query = query.trim().to_string();
        let top_k = top_k.max(1);

        let query_entities: Vec<String> = extractor
            .extract_names(&query, QUERY_ENTITY_LIMIT)
            .into_iter()
            .filter(|name| !is_query_noise(&normalize_entity(name)))
            .collect();
        let context_entities = select_context_entities(
            &query,
            &query_entities,
            history_entities,
            profile.co_reference_enabled,
            profile.alias_intent_enabled,
        );
        let contextual = contextual_query(&query, &query_entities, &context_entities);
        let tokens = content_tokens(&query, QUERY_TOKEN_LIMIT);
        let focus_tokens: Vec<String> = tokens
            .iter()
            .filter(|t| t.chars().count() >= 2)
            .take(FOCUS_TOKEN_LIMIT)
            .cloned()
            .collect();

        let entities = merge_preserve_order(&query_entities, &context_entities, GRAPH_SEED_LIMIT);
        let graph_names = graph_terms(snapshots, &query, &entities);

        let mut raw_terms = entities.clone();
        raw_terms.extend(tokens.iter().cloned());
        raw_terms.extend(graph_names.iter().cloned());
        raw_terms.push(query.clone());
        raw_terms.push(contextual.clone());
        if intent.count && intent.roster {
            raw_terms.extend(ROSTER_CUE_TERMS.iter().map(|t| t.to_string()));
        }
        let mut keyword_terms = filter_keyword_terms(&raw_terms, KEYWORD_TERM_LIMIT);

        let anchor_limit = if intent.roster {
            ROSTER_ANCHOR_LIMIT
        } else {
            ANCHOR_TERM_LIMIT
        };
        let anchors = merge_preserve_order(&entities, &focus_tokens, anchor_limit);
        let mut anchor_terms: Vec<String> = anchors
            .iter()
            .map(|t| normalize_entity(t))
            .filter(|t| t.chars().count() >= 2 && !is_query_noise(t))
            .collect();

        let mut graph_seed_terms = merge_preserve_order(&entities, &focus_tokens, GRAPH_SEED_LIMIT);

        let mut roster_terms = Vec::new();
        if intent.roster && !snapshots.is_empty() {
            let seeds = merge_preserve_order(&graph_names, &entities, ROSTER_SEED_LIMIT);
            roster_terms = neighbor_terms(snapshots, &seeds, profile.rag_graph_max_terms.clamp(4, 16));
            if !roster_terms.is_empty() {
                keyword_terms = merge_preserve_order(&keyword_terms, &roster_terms, ROSTER_KEYWORD_LIMIT);
                let mined: Vec<String> = roster_terms.iter().map(|t| normalize_entity(t)).collect();
                anchor_terms = merge_preserve_order(&anchor_terms, &mined, ROSTER_ANCHOR_LIMIT);
                let seed_limit = (profile.rag_graph_max_terms * 3).max(GRAPH_SEED_LIMIT);
                graph_seed_terms = merge_preserve_order(&graph_seed_terms, &roster_terms, seed_limit);
            }
        }

        let summary_mode = intent.summary;
        let effective_top_k = if summary_mode {
            (top_k * profile.summary_expand_factor.max(1)).max(profile.summary_min_chunks)
        } else {
            top_k
        };
        let cap = |multiplier: usize, limit: usize| {
            if summary_mode {
                multiplier
            } else {
                multiplier.min(limit)
            }
        };

        Self {
            alias_intent: is_alias_intent(&query),
            contextual_query: contextual,
            query,
            query_entities,
            context_entities,
            focus_tokens,
            keyword_terms,
            anchor_terms,
            graph_seed_terms,
            summary_mode,
            count_intent: intent.count,
            roster_intent: intent.roster,
            count_unit_hints: intent.count_unit_hints.clone(),
            roster_terms,
            top_k,
            effective_top_k,
            vector_multiplier: cap(profile.vector_candidate_multiplier, 3),
            keyword_multiplier: cap(profile.keyword_candidate_multiplier, 3),
            graph_multiplier: cap(profile.graph_candidate_multiplier, 4),
        }
    }
}

/// Names, display names and aliases of graph nodes the query refers to: exact
/// entity matches, plus alias-bearing nodes named anywhere in the query text
fn graph_terms(snapshots: &[Arc<GraphSnapshot>], query: &str, entities: &[String]) -> Vec<String> {
    let lowered = query.to_lowercase();
    let mut terms = Vec::new();
    for snapshot in snapshots {
        let mut matched: Vec<usize> = entities.iter().filter_map(|e| snapshot.lookup(e)).collect();
        for (i, node) in snapshot.nodes.iter().enumerate() {
            if node.aliases.is_empty() || matched.contains(&i) {
                continue;
            }
            let named = std::iter::once(&node.display_name)
                .chain(node.aliases.iter())
                .any(|name| lowered.contains(&name.to_lowercase()));
            if named {
                matched.push(i);
            }
        }

        for node in matched.into_iter().filter_map(|i| snapshot.node(i)) {
            terms.push(node.display_name.clone());
            terms.push(node.name.clone());
            terms.extend(node.aliases.iter().cloned());
        }
    }
    terms
}

/// Names of graph nodes adjacent to the seed nodes, strongest relation first.
///
/// Members of a group tend to share edges with the group's leader or name, so
/// the neighbours of the query entities are candidate roster names.
fn neighbor_terms(snapshots: &[Arc<GraphSnapshot>], seeds: &[String], max_terms: usize) -> Vec<String> {
    let seed_norms: HashSet<String> = seeds.iter().map(|s| normalize_entity(s)).collect();
    let mut scored: Vec<(f32, &str, &[String])> = Vec::new();

    for snapshot in snapshots {
        let mut seed_nodes: Vec<usize> = seeds.iter().filter_map(|s| snapshot.lookup(s)).collect();
        seed_nodes.sort_unstable();
        seed_nodes.dedup();

        let mut edges: Vec<(f32, f32, usize)> = Vec::new();
        for &seed in &seed_nodes {
            for (edge, other) in snapshot.incident_edges(seed) {
                if seed_nodes.contains(&other) {
                    continue;
                }
                edges.push((edge.weight, edge.relation_type.expansion_factor(), other));
            }
        }
        edges.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.2.cmp(&b.2)));
        edges.truncate(NEIGHBOR_EDGE_LIMIT);

        for (weight, factor, other) in edges {
            if let Some(node) = snapshot.node(other) {
                let score = weight.max(1.0) * factor;
                scored.push((score, node.display_name.as_str(), node.aliases.as_slice()));
            }
        }
    }
    scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(b.1)));

    let mut terms: Vec<String> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    for (_, display_name, aliases) in scored {
        for name in std::iter::once(display_name).chain(aliases.iter().take(2).map(String::as_str)) {
            let normalized = normalize_entity(name);
            if normalized.chars().count() < 2
                || seed_norms.contains(&normalized)
                || is_stopword(&normalized)
                || is_query_noise(&normalized)
                || !seen.insert(normalized)
            {
                continue;
            }
            terms.push(name.to_string());
            if terms.len() >= max_terms {
                return terms;
            }
        }
    }
    terms
}

/// Deduplicate by normalized form, dropping short, stopword and noise terms
fn filter_keyword_terms(terms: &[String], limit: usize) -> Vec<String> {
    let usable: Vec<String> = terms
        .iter()
        .filter(|term| {
            let normalized = normalize_entity(term);
            normalized.chars().count() >= 2 && !is_stopword(&normalized) && !is_query_noise(&normalized)
        })
        .cloned()
        .collect();
    merge_preserve_order(&[], &usable, limit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{GraphBuilder, RuleBasedExtractor};
    use crate::storage::Chunk;
    use uuid::Uuid;

    fn plan(query: &str, history: &[String], summary: bool) -> QueryPlan {
        let extractor = RuleBasedExtractor::new().unwrap();
        let intent = QueryIntent {
            summary,
            ..QueryIntent::default()
        };
        QueryPlan::build(query, 4, &intent, history, &extractor, &[], &ProfileConfig::default())
    }

    #[test]
    fn test_terms_put_entities_first() {
        let plan = plan("How does Tokio schedule tasks?", &[], false);
        assert!(plan.query_entities.iter().any(|e| e == "Tokio"));
        assert_eq!(plan.keyword_terms[0], "Tokio");
        assert!(plan.keyword_terms.contains(&"How does Tokio schedule tasks?".to_string()));
        assert!(plan.anchor_terms.contains(&"tokio".to_string()));
        assert!(!plan.summary_mode);
        assert_eq!(plan.effective_top_k, 4);
    }

    #[test]
    fn test_multipliers_are_capped_outside_summary_mode() {
        let extractor = RuleBasedExtractor::new().unwrap();
        let profile = ProfileConfig {
            vector_candidate_multiplier: 10,
            keyword_candidate_multiplier: 10,
            graph_candidate_multiplier: 10,
            ..ProfileConfig::default()
        };
        let ordinary = QueryPlan::build("Tokio", 4, &QueryIntent::default(), &[], &extractor, &[], &profile);
        assert_eq!(
            (ordinary.vector_multiplier, ordinary.keyword_multiplier, ordinary.graph_multiplier),
            (3, 3, 4)
        );

        let summary = QueryPlan::build("Tokio", 4, &QueryIntent::summary(), &[], &extractor, &[], &profile);
        assert_eq!(summary.vector_multiplier, 10);
        assert_eq!(summary.effective_top_k, 12);
    }

    #[test]
    fn test_summary_effective_top_k_has_floor() {
        let plan = plan("总结全书", &[], true);
        // max(4 * 3, 8)
        assert_eq!(plan.effective_top_k, 12);

        let extractor = RuleBasedExtractor::new().unwrap();
        let small = QueryPlan::build("总结全书", 1, &QueryIntent::summary(), &[], &extractor, &[], &ProfileConfig::default());
        assert_eq!(small.effective_top_k, 8);
    }

    #[test]
    fn test_coreference_adds_context() {
        let history = vec!["孙悟空".to_string()];
        let plan = plan("他用什么兵器", &history, false);
        assert_eq!(plan.context_entities, history);
        assert!(plan.contextual_query.ends_with("孙悟空"));
        assert!(plan.keyword_terms.contains(&"孙悟空".to_string()));
        assert!(plan.anchor_terms.contains(&"孙悟空".to_string()));
    }

    #[test]
    fn test_graph_aliases_become_keyword_terms() {
        let extractor = Arc::new(RuleBasedExtractor::new().unwrap());
        let chunks = vec![Chunk {
            id: 1,
            library_id: Uuid::nil(),
            file_id: Uuid::nil(),
            file_name: "bio.txt".to_string(),
            chunk_index: 0,
            text: "Samuel Clemens, also known as Mark Twain, grew up in Missouri.".to_string(),
            keyword_terms: Vec::new(),
        }];
        let snapshot = Arc::new(GraphBuilder::new(extractor.clone()).build(Uuid::nil(), &chunks));
        let canonical = snapshot.lookup("Samuel Clemens").and_then(|i| snapshot.node(i)).unwrap();
        assert!(!canonical.aliases.is_empty());

        let plan = QueryPlan::build(
            "Where did Samuel Clemens grow up?",
            4,
            &QueryIntent::default(),
            &[],
            extractor.as_ref(),
            &[snapshot.clone()],
            &ProfileConfig::default(),
        );
        for alias in &canonical.aliases {
            assert!(plan.keyword_terms.iter().any(|t| normalize_entity(t) == normalize_entity(alias)));
        }
    }

    fn chunk(id: i64, text: &str) -> Chunk {
        Chunk {
            id,
            library_id: Uuid::nil(),
            file_id: Uuid::nil(),
            file_name: "journey.txt".to_string(),
            chunk_index: id as usize,
            text: text.to_string(),
            keyword_terms: Vec::new(),
        }
    }

    #[test]
    fn test_roster_question_mines_graph_neighbours() {
        let extractor = Arc::new(RuleBasedExtractor::new().unwrap());
        let chunks = vec![
            chunk(1, "Tripitaka travels west with Wukong."),
            chunk(2, "Tripitaka rests at the temple."),
        ];
        let snapshot = Arc::new(GraphBuilder::new(extractor.clone()).build(Uuid::nil(), &chunks));
        let intent = QueryIntent {
            count: true,
            roster: true,
            count_unit_hints: vec!["徒弟".to_string()],
            ..QueryIntent::default()
        };

        let plan = QueryPlan::build(
            "Who travels with Tripitaka?",
            4,
            &intent,
            &[],
            extractor.as_ref(),
            &[snapshot],
            &ProfileConfig::default(),
        );
        assert!(plan.roster_intent && plan.count_intent);
        assert!(plan.roster_terms.iter().any(|t| t == "Wukong"));
        assert!(!plan.roster_terms.iter().any(|t| t == "Tripitaka"));
        assert!(plan.keyword_terms.iter().any(|t| t == "Wukong"));
        assert!(plan.anchor_terms.contains(&"wukong".to_string()));
        assert!(plan.graph_seed_terms.iter().any(|t| t == "Wukong"));
        // Counting a group adds the roster cue words
        assert!(plan.keyword_terms.iter().any(|t| t == "师徒"));
    }

    #[test]
    fn test_ordinary_question_mines_nothing() {
        let extractor = Arc::new(RuleBasedExtractor::new().unwrap());
        let chunks = vec![chunk(1, "Tripitaka travels west with Wukong.")];
        let snapshot = Arc::new(GraphBuilder::new(extractor.clone()).build(Uuid::nil(), &chunks));
        let plan = QueryPlan::build(
            "Who travels with Tripitaka?",
            4,
            &QueryIntent::default(),
            &[],
            extractor.as_ref(),
            &[snapshot],
            &ProfileConfig::default(),
        );
        assert!(plan.roster_terms.is_empty());
        assert!(!plan.keyword_terms.iter().any(|t| t == "师徒"));
    }
}
