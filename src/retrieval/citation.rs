//! Citation assembly

use super::{Channel, Citation, RetrievedFragment, ScoredCandidate};
use crate::storage::Chunk;
use crate::text::truncate_chars;
use std::collections::HashMap;

/// Pair accepted candidates with their chunk text, in the given order.
///
/// Candidates whose chunk is missing from `chunks` (deleted since indexing)
/// are skipped.
pub fn assemble_citations(
    accepted: &[ScoredCandidate],
    chunks: &[Chunk],
    snippet_max_chars: usize,
) -> Vec<RetrievedFragment> {
    let by_id: HashMap<i64, &Chunk> = chunks.iter().map(|c| (c.id, c)).collect();

    accepted
        .iter()
        .filter_map(|candidate| {
            let chunk = by_id.get(&candidate.chunk_id)?;
            let graph_involved = candidate.contributions.contains_key(&Channel::Graph);
            let matched_entities = (graph_involved && !candidate.matched_entities.is_empty())
                .then(|| candidate.matched_entities.clone());

            Some(RetrievedFragment {
                citation: Citation {
                    library_id: chunk.library_id,
                    file_id: chunk.file_id,
                    file_name: chunk.file_name.clone(),
                    chunk_id: chunk.id,
                    score: candidate.composite_score,
                    snippet: truncate_chars(chunk.text.trim(), snippet_max_chars),
                    source_channel: candidate.dominant_channel(),
                    matched_entities,
                },
                text: chunk.text.clone(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::ChannelContribution;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn chunk(id: i64, text: &str) -> Chunk {
        Chunk {
            id,
            library_id: Uuid::nil(),
            file_id: Uuid::nil(),
            file_name: format!("file-{}.txt", id),
            chunk_index: 0,
            text: text.to_string(),
            keyword_terms: Vec::new(),
        }
    }

    fn scored(chunk_id: i64, score: f32, channels: &[(Channel, f32)], entities: &[&str]) -> ScoredCandidate {
        let contributions: BTreeMap<Channel, ChannelContribution> = channels
            .iter()
            .map(|&(c, w)| {
                (
                    c,
                    ChannelContribution {
                        raw_score: w,
                        weighted_score: w,
                    },
                )
            })
            .collect();
        ScoredCandidate {
            chunk_id,
            library_id: Uuid::nil(),
            file_id: Uuid::nil(),
            composite_score: score,
            contributions,
            vector_similarity: 0.0,
            lexical_overlap: 0.0,
            matched_entities: entities.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_citations_keep_order_and_attribution() {
        let chunks = vec![chunk(1, "孙悟空大闹天宫，自称齐天大圣。"), chunk(2, "Tokio runtime")];
        let accepted = vec![
            scored(2, 0.9, &[(Channel::Keyword, 0.5), (Channel::Vector, 0.4)], &["Tokio"]),
            scored(1, 0.6, &[(Channel::Graph, 0.4), (Channel::Vector, 0.2)], &["孙悟空"]),
            scored(99, 0.5, &[(Channel::Vector, 0.5)], &[]),
        ];

        let fragments = assemble_citations(&accepted, &chunks, 5);
        assert_eq!(fragments.len(), 2);

        let first = &fragments[0].citation;
        assert_eq!(first.chunk_id, 2);
        assert_eq!(first.source_channel, Channel::Keyword);
        assert!(first.matched_entities.is_none());
        assert_eq!(first.snippet, "Tokio");

        let second = &fragments[1].citation;
        assert_eq!(second.source_channel, Channel::Graph);
        assert_eq!(second.matched_entities, Some(vec!["孙悟空".to_string()]));
        assert_eq!(second.snippet, "孙悟空大闹");
        assert_eq!(fragments[1].text, "孙悟空大闹天宫，自称齐天大圣。");
    }
}
