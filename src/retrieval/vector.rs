//! Dense vector channel

use super::{Candidate, Channel, QueryPlan};
use crate::cancel::Interrupt;
use crate::embedding::EmbeddingProvider;
use crate::error::Result;
use crate::profile::ProfileConfig;
use crate::storage::ChunkStore;
use crate::text::term_hit_ratio;
use std::collections::HashMap;
use uuid::Uuid;

const MIN_POOL: usize = 16;

pub(crate) fn vector_score(similarity: f32, rank: usize) -> f32 {
    0.85 * similarity.clamp(0.0, 1.0) + 0.15 / (rank as f32 + 1.0)
}

/// Nearest chunks to the embedded contextual query.
///
/// An embedding failure is returned as an error; the engine turns it into an
/// unavailable channel. The interrupt is checked around the embedding call and
/// polled by the store scan.
pub fn vector_candidates(
    store: &dyn ChunkStore,
    embedder: &dyn EmbeddingProvider,
    plan: &QueryPlan,
    scope: &[Uuid],
    profile: &ProfileConfig,
    interrupt: &Interrupt,
) -> Result<Vec<Candidate>> {
    interrupt.check()?;
    let embedding = embedder.embed(&plan.contextual_query)?;
    interrupt.check()?;

    let pool = (plan.top_k * plan.vector_multiplier)
        .max(plan.effective_top_k * 2)
        .max(MIN_POOL);
    let hits = store.vector_query(&embedding, scope, pool, interrupt)?;

    let ids: Vec<i64> = hits.iter().map(|h| h.chunk_id).collect();
    let chunks: HashMap<i64, _> = store
        .get_chunks(&ids)?
        .into_iter()
        .map(|c| (c.id, c))
        .collect();

    let mut candidates = Vec::with_capacity(hits.len());
    for (rank, hit) in hits.iter().enumerate() {
        let similarity = hit.similarity.clamp(0.0, 1.0);
        if similarity < profile.vector_semantic_min {
            continue;
        }
        let Some(chunk) = chunks.get(&hit.chunk_id) else {
            continue;
        };
        candidates.push(Candidate {
            chunk_id: chunk.id,
            library_id: chunk.library_id,
            file_id: chunk.file_id,
            channel: Channel::Vector,
            raw_score: vector_score(similarity, rank),
            vector_similarity: Some(similarity),
            lexical_overlap: term_hit_ratio(&chunk.text, &plan.keyword_terms),
            matched_entities: Vec::new(),
        });
    }

    tracing::debug!("Vector channel: {} hits, {} kept", hits.len(), candidates.len());
    Ok(candidates)
}
