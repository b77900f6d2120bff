//! Hybrid retrieval engine

use super::keyword::WEAK_HIT_WINDOW;
use super::{
    assemble_citations, diverse_selection, evaluate, fuse, graph_candidates, has_summary_spread,
    is_weak_hit, keyword_candidates, vector_candidates, Candidate, Channel, ChannelOutput,
    ChannelReport, GateEvaluation, GateOutcome, IntentDetector, KeywordMode, QueryPlan, RetrievalMode,
    RetrievalOutcome, RetrievalReport, ScoredCandidate, SummaryDetector,
};
use crate::cancel::{CancelSignal, Interrupt};
use crate::config::RetrievalConfig;
use crate::embedding::EmbeddingProvider;
use crate::entities::{AliasMiner, EntityExtractor, GraphRegistry, GraphSnapshot};
use crate::error::{RagError, Result};
use crate::profile::RetrievalProfile;
use crate::session::ConversationContext;
use crate::storage::{Chunk, ChunkStore};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Question and scope of one retrieval request
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    pub library_ids: Vec<Uuid>,
    pub top_k: usize,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>, library_ids: Vec<Uuid>, top_k: usize) -> Self {
        Self {
            query: query.into(),
            library_ids,
            top_k,
        }
    }
}

/// Hybrid searcher combining vector, keyword and graph retrieval
pub struct HybridSearcher {
    store: Arc<dyn ChunkStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    graphs: Arc<GraphRegistry>,
    extractor: Arc<dyn EntityExtractor>,
    alias_miner: Arc<AliasMiner>,
    summary: SummaryDetector,
    intents: Arc<IntentDetector>,
    config: RetrievalConfig,
}

impl HybridSearcher {
    /// Create a new hybrid searcher
    pub fn new(
        store: Arc<dyn ChunkStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        graphs: Arc<GraphRegistry>,
        extractor: Arc<dyn EntityExtractor>,
        config: RetrievalConfig,
    ) -> Result<Self> {
        Ok(Self {
            store,
            embedder,
            graphs,
            extractor,
            alias_miner: Arc::new(AliasMiner::new()?),
            summary: SummaryDetector::new()?,
            intents: Arc::new(IntentDetector::new()?),
            config,
        })
    }

    /// Retrieve supporting fragments for a question.
    ///
    /// `profile` is read once and never re-read during the request. `context`
    /// supplies recent conversation entities for co-reference resolution. If
    /// `cancel` fires first, `RagError::Cancelled` is returned at once and the
    /// blocking generators stop at their next interrupt check.
    pub async fn search(
        &self,
        request: &SearchRequest,
        profile: Arc<RetrievalProfile>,
        context: Option<&ConversationContext>,
        cancel: Option<CancelSignal>,
    ) -> Result<RetrievalReport> {
        let history = context.map(|c| c.history_entities()).unwrap_or_default();
        match cancel {
            Some(mut signal) => {
                let interrupt_signal = signal.clone();
                tokio::select! {
                    biased;
                    _ = signal.cancelled() => {
                        info!("Retrieval cancelled");
                        Err(RagError::Cancelled)
                    }
                    report = self.run(request, profile, history, Some(interrupt_signal)) => report,
                }
            }
            None => self.run(request, profile, history, None).await,
        }
    }

    async fn run(
        &self,
        request: &SearchRequest,
        profile: Arc<RetrievalProfile>,
        history: Vec<String>,
        cancel: Option<CancelSignal>,
    ) -> Result<RetrievalReport> {
        let start = Instant::now();
        if request.query.trim().is_empty() {
            return Err(RagError::InvalidQuery(
                "Query text cannot be empty".to_string(),
            ));
        }
        if request.library_ids.is_empty() {
            return Err(RagError::InvalidQuery(
                "At least one library must be in scope".to_string(),
            ));
        }
        let cfg = &profile.config;
        let top_k = request.top_k.max(1);
        let scope = Arc::new(request.library_ids.clone());

        // Step 1: Query analysis against the current graph snapshots
        let summary_mode = cfg.summary_intent_enabled && self.summary.is_summary_query(&request.query);
        let intent = self.intents.detect(&request.query, summary_mode);
        let (snapshots, graph_error) = match self.load_snapshots(&scope).await {
            Ok(snapshots) => (snapshots, None),
            Err(e) => (Vec::new(), Some(e.to_string())),
        };
        let snapshots = Arc::new(snapshots);
        let plan = Arc::new(QueryPlan::build(
            &request.query,
            top_k,
            &intent,
            &history,
            self.extractor.as_ref(),
            &snapshots,
            cfg,
        ));
        debug!(
            "Query plan: {} keyword terms, {} anchors, {} graph seeds, {:?}",
            plan.keyword_terms.len(),
            plan.anchor_terms.len(),
            plan.graph_seed_terms.len(),
            intent
        );

        // Step 2: Parallel fan-out over the three channels
        let vector = {
            let (store, embedder, plan, scope, profile) = (
                Arc::clone(&self.store),
                Arc::clone(&self.embedder),
                Arc::clone(&plan),
                Arc::clone(&scope),
                Arc::clone(&profile),
            );
            self.run_channel(Channel::Vector, cancel.clone(), move |interrupt| {
                vector_candidates(
                    store.as_ref(),
                    embedder.as_ref(),
                    &plan,
                    &scope,
                    &profile.config,
                    &interrupt,
                )
            })
        };
        let keyword = self.keyword_channel(&plan, &scope, &profile, KeywordMode::Normal, cancel.clone());
        let graph = async {
            if let Some(reason) = &graph_error {
                warn!("graph channel unavailable: {}", reason);
                return ChannelOutput::unavailable(Channel::Graph, reason.clone());
            }
            let (store, snapshots, plan, profile, miner) = (
                Arc::clone(&self.store),
                Arc::clone(&snapshots),
                Arc::clone(&plan),
                Arc::clone(&profile),
                Arc::clone(&self.alias_miner),
            );
            self.run_channel(Channel::Graph, cancel.clone(), move |interrupt| {
                graph_candidates(store.as_ref(), &snapshots, &plan, &profile.config, &miner, &interrupt)
            })
            .await
        };
        let (vector, keyword, graph) = tokio::join!(vector, keyword, graph);
        let mut outputs = vec![vector, keyword, graph];

        // Step 3: Fusion
        let mut fused = fuse(&outputs, cfg);

        // Step 4: One keyword fallback scan when the ranking looks weak
        let mut keyword_fallback_used = false;
        if !summary_mode
            && cfg.keyword_fallback_expand_on_weak_hits
            && outputs[1].status.is_available()
            && self.is_weak(&fused, &plan, &profile).await
        {
            let fallback = self
                .keyword_channel(&plan, &scope, &profile, KeywordMode::Fallback, cancel.clone())
                .await;
            if fallback.status.is_available() {
                info!(
                    "Weak first ranking, keyword fallback added {} candidates",
                    fallback.candidates.len()
                );
                outputs[1].candidates.extend(fallback.candidates);
                fused = fuse(&outputs, cfg);
                keyword_fallback_used = true;
            }
        }

        // Step 5: Acceptance gate, widened and diversified in summary mode
        let (mode, summary_fallback, gate, trace) = self.gate(&fused, &plan, &profile);

        // Step 6: Citations
        let outcome = if gate.is_accepted() {
            let ids: Vec<i64> = gate.retained.iter().map(|c| c.chunk_id).collect();
            let chunks = self.fetch_chunks(ids).await?;
            let fragments = assemble_citations(&gate.retained, &chunks, self.config.snippet_max_chars);
            if fragments.is_empty() {
                insufficient(gate.best_score)
            } else {
                RetrievalOutcome::Grounded { fragments }
            }
        } else {
            insufficient(gate.best_score)
        };

        let channels: Vec<ChannelReport> = outputs
            .into_iter()
            .map(|o| ChannelReport {
                channel: o.channel,
                candidates: o.candidates.len(),
                status: o.status,
            })
            .collect();

        let report = RetrievalReport {
            outcome,
            mode,
            summary_fallback,
            gate_trace: trace,
            channels,
            keyword_fallback_used,
            effective_top_k: match mode {
                RetrievalMode::Summary => plan.effective_top_k,
                RetrievalMode::Ordinary => top_k,
            },
            profile_key: profile.profile_key.clone(),
            profile_version: profile.version,
        };
        info!(
            "Retrieved {} fragments ({:?}, tier {:?}, degraded {:?}) in {}ms",
            report.outcome.fragments().len(),
            report.mode,
            report.final_tier(),
            report.degraded_channels(),
            start.elapsed().as_millis()
        );
        Ok(report)
    }

    /// Run the gate; summary mode falls back to an ordinary evaluation of the
    /// same list when the accepted selection lacks spread
    fn gate(
        &self,
        fused: &[ScoredCandidate],
        plan: &QueryPlan,
        profile: &RetrievalProfile,
    ) -> (RetrievalMode, bool, GateOutcome, Vec<GateEvaluation>) {
        let cfg = &profile.config;
        if !plan.summary_mode {
            let outcome = evaluate(fused, plan.top_k, cfg);
            let trace = outcome.trace.clone();
            return (RetrievalMode::Ordinary, false, outcome, trace);
        }

        let mut outcome = evaluate(fused, plan.effective_top_k, cfg);
        let Some(thresholds) = outcome.accepted_thresholds() else {
            let trace = outcome.trace.clone();
            return (RetrievalMode::Summary, false, outcome, trace);
        };

        let pruned: Vec<ScoredCandidate> = fused
            .iter()
            .filter(|c| c.composite_score >= thresholds.item)
            .cloned()
            .collect();
        let selected = diverse_selection(
            &pruned,
            plan.effective_top_k,
            cfg.summary_per_file_cap,
            cfg.summary_min_files,
        );
        if has_summary_spread(&selected, cfg.summary_min_files, cfg.summary_min_chunks) {
            outcome.retained = selected;
            let trace = outcome.trace.clone();
            return (RetrievalMode::Summary, false, outcome, trace);
        }

        info!(
            "Summary selection too narrow ({} chunks), answering as an ordinary question",
            selected.len()
        );
        let ordinary = evaluate(fused, plan.top_k, cfg);
        let mut trace = outcome.trace;
        trace.extend(ordinary.trace.iter().cloned());
        (RetrievalMode::Ordinary, true, ordinary, trace)
    }

    fn keyword_channel(
        &self,
        plan: &Arc<QueryPlan>,
        scope: &Arc<Vec<Uuid>>,
        profile: &Arc<RetrievalProfile>,
        mode: KeywordMode,
        cancel: Option<CancelSignal>,
    ) -> impl std::future::Future<Output = ChannelOutput> + '_ {
        let (store, plan, scope, profile, intents) = (
            Arc::clone(&self.store),
            Arc::clone(plan),
            Arc::clone(scope),
            Arc::clone(profile),
            Arc::clone(&self.intents),
        );
        self.run_channel(Channel::Keyword, cancel, move |interrupt| {
            keyword_candidates(
                store.as_ref(),
                &plan,
                &scope,
                &profile.config,
                mode,
                &intents,
                &interrupt,
            )
        })
    }

    /// Run one generator on the blocking pool under the channel timeout. Failure
    /// and timeout both yield an unavailable channel, never an error.
    ///
    /// The generator receives an [`Interrupt`] carrying the request's cancel
    /// signal and the channel deadline, so abandoned work stops at its next check
    /// instead of running to completion on the blocking pool.
    async fn run_channel<F>(&self, channel: Channel, cancel: Option<CancelSignal>, generator: F) -> ChannelOutput
    where
        F: FnOnce(Interrupt) -> Result<Vec<Candidate>> + Send + 'static,
    {
        let timeout = Duration::from_millis(self.config.channel_timeout_ms);
        let interrupt = Interrupt::new(cancel, Some(Instant::now() + timeout));
        let task = tokio::task::spawn_blocking(move || generator(interrupt));
        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(Ok(candidates))) => ChannelOutput::available(channel, candidates),
            Ok(Ok(Err(RagError::DeadlineExceeded))) | Err(_) => {
                warn!(
                    "{} channel timed out after {}ms",
                    channel, self.config.channel_timeout_ms
                );
                ChannelOutput::unavailable(
                    channel,
                    format!("timed out after {}ms", self.config.channel_timeout_ms),
                )
            }
            Ok(Ok(Err(e))) => {
                warn!("{} channel unavailable: {}", channel, e);
                ChannelOutput::unavailable(channel, e.to_string())
            }
            Ok(Err(e)) => {
                warn!("{} channel task failed: {}", channel, e);
                ChannelOutput::unavailable(channel, format!("task failed: {}", e))
            }
        }
    }

    async fn is_weak(&self, fused: &[ScoredCandidate], plan: &QueryPlan, profile: &RetrievalProfile) -> bool {
        let window = &fused[..fused.len().min(WEAK_HIT_WINDOW)];
        let ids: Vec<i64> = window.iter().map(|c| c.chunk_id).collect();
        let chunks = match self.fetch_chunks(ids).await {
            Ok(chunks) => chunks,
            Err(e) => {
                warn!("Skipping keyword fallback check: {}", e);
                return false;
            }
        };
        let texts: Vec<(&ScoredCandidate, &str)> = window
            .iter()
            .filter_map(|c| {
                chunks
                    .iter()
                    .find(|chunk| chunk.id == c.chunk_id)
                    .map(|chunk| (c, chunk.text.as_str()))
            })
            .collect();
        is_weak_hit(&texts, plan, &self.intents, &profile.config)
    }

    async fn fetch_chunks(&self, ids: Vec<i64>) -> Result<Vec<Chunk>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || store.get_chunks(&ids))
            .await
            .map_err(|e| RagError::Other(e.into()))?
    }

    async fn load_snapshots(&self, scope: &Arc<Vec<Uuid>>) -> Result<Vec<Arc<GraphSnapshot>>> {
        let graphs = Arc::clone(&self.graphs);
        let scope = Arc::clone(scope);
        tokio::task::spawn_blocking(move || {
            let mut snapshots = Vec::new();
            for &library_id in scope.iter() {
                if let Some(snapshot) = graphs.snapshot(library_id)? {
                    snapshots.push(snapshot);
                }
            }
            Ok(snapshots)
        })
        .await
        .map_err(|e| RagError::Other(e.into()))?
    }
}

fn insufficient(best_score: f32) -> RetrievalOutcome {
    RetrievalOutcome::InsufficientEvidence {
        best_score,
        message: "No confident match in the selected libraries".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::cancel_pair;
    use crate::embedding::{EmbeddingError, HashEmbedder, OfflineEmbedder};
    use crate::entities::RuleBasedExtractor;
    use crate::profile::ProfileConfig;
    use crate::storage::{FileRecord, KeywordMatch, MemoryChunkStore, NewChunk, VectorHit};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct SlowEmbedder(HashEmbedder);

    impl EmbeddingProvider for SlowEmbedder {
        fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
            std::thread::sleep(Duration::from_millis(400));
            self.0.embed(text)
        }

        fn embed_batch(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError> {
            self.0.embed_batch(texts)
        }

        fn dimension(&self) -> usize {
            self.0.dimension()
        }

        fn model_name(&self) -> &str {
            "slow"
        }
    }

    /// Counts vector scans that reach the store
    struct CountingStore {
        inner: MemoryChunkStore,
        vector_queries: Arc<AtomicUsize>,
    }

    impl ChunkStore for CountingStore {
        fn vector_query(
            &self,
            embedding: &[f32],
            scope: &[Uuid],
            limit: usize,
            interrupt: &Interrupt,
        ) -> Result<Vec<VectorHit>> {
            self.vector_queries.fetch_add(1, Ordering::SeqCst);
            self.inner.vector_query(embedding, scope, limit, interrupt)
        }

        fn keyword_query(
            &self,
            terms: &[String],
            scope: &[Uuid],
            limit: usize,
            interrupt: &Interrupt,
        ) -> Result<Vec<KeywordMatch>> {
            self.inner.keyword_query(terms, scope, limit, interrupt)
        }

        fn get_chunks(&self, ids: &[i64]) -> Result<Vec<Chunk>> {
            self.inner.get_chunks(ids)
        }

        fn library_chunks(&self, library_id: Uuid) -> Result<Vec<Chunk>> {
            self.inner.library_chunks(library_id)
        }

        fn file_hash(&self, library_id: Uuid, file_name: &str) -> Result<Option<String>> {
            self.inner.file_hash(library_id, file_name)
        }

        fn replace_file_chunks(
            &self,
            library_id: Uuid,
            file_name: &str,
            content_hash: &str,
            chunks: Vec<NewChunk>,
        ) -> Result<FileRecord> {
            self.inner
                .replace_file_chunks(library_id, file_name, content_hash, chunks)
        }
    }

    fn config(timeout_ms: u64) -> RetrievalConfig {
        RetrievalConfig {
            default_top_k: 3,
            channel_timeout_ms: timeout_ms,
            snippet_max_chars: 120,
            history_turns: 4,
        }
    }

    fn indexed_store() -> (MemoryChunkStore, Uuid) {
        let indexer = HashEmbedder::new(64);
        let store = MemoryChunkStore::new().unwrap();
        let library = Uuid::new_v4();
        let texts = [
            "Tokio runtime schedules async tasks on worker threads",
            "Tokio tasks are cheap green threads",
            "Serde serializes Rust data structures",
        ];
        let chunks = texts
            .iter()
            .map(|t| NewChunk {
                text: t.to_string(),
                embedding: indexer.embed(t).unwrap(),
                keyword_terms: Vec::new(),
            })
            .collect();
        store
            .replace_file_chunks(library, "notes.txt", "hash", chunks)
            .unwrap();
        (store, library)
    }

    fn searcher_over(
        store: Arc<dyn ChunkStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        timeout_ms: u64,
    ) -> HybridSearcher {
        HybridSearcher::new(
            store,
            embedder,
            Arc::new(GraphRegistry::new()),
            Arc::new(RuleBasedExtractor::new().unwrap()),
            config(timeout_ms),
        )
        .unwrap()
    }

    fn searcher(embedder: Arc<dyn EmbeddingProvider>, timeout_ms: u64) -> (HybridSearcher, Uuid) {
        let (store, library) = indexed_store();
        (searcher_over(Arc::new(store), embedder, timeout_ms), library)
    }

    /// A searcher with the slow embedder whose store counts vector scans
    fn counting_searcher(timeout_ms: u64) -> (HybridSearcher, Uuid, Arc<AtomicUsize>) {
        let (inner, library) = indexed_store();
        let vector_queries = Arc::new(AtomicUsize::new(0));
        let store = CountingStore {
            inner,
            vector_queries: Arc::clone(&vector_queries),
        };
        let searcher = searcher_over(
            Arc::new(store),
            Arc::new(SlowEmbedder(HashEmbedder::new(64))),
            timeout_ms,
        );
        (searcher, library, vector_queries)
    }

    fn profile() -> Arc<RetrievalProfile> {
        Arc::new(RetrievalProfile::ephemeral("test", ProfileConfig::default()))
    }

    #[tokio::test]
    async fn test_empty_query_is_rejected() {
        let (searcher, library) = searcher(Arc::new(HashEmbedder::new(64)), 2000);
        let result = searcher
            .search(&SearchRequest::new("   ", vec![library], 3), profile(), None, None)
            .await;
        assert!(matches!(result, Err(RagError::InvalidQuery(_))));

        let result = searcher
            .search(&SearchRequest::new("Tokio", Vec::new(), 3), profile(), None, None)
            .await;
        assert!(matches!(result, Err(RagError::InvalidQuery(_))));
    }

    #[tokio::test]
    async fn test_grounded_answer() {
        let (searcher, library) = searcher(Arc::new(HashEmbedder::new(64)), 2000);
        let report = searcher
            .search(
                &SearchRequest::new("How does the Tokio runtime schedule tasks?", vec![library], 3),
                profile(),
                None,
                None,
            )
            .await
            .unwrap();

        assert!(report.outcome.is_grounded());
        assert!(report.degraded_channels().is_empty());
        assert_eq!(report.mode, RetrievalMode::Ordinary);
        let fragments = report.outcome.fragments();
        assert_eq!(fragments[0].citation.chunk_id, 1);
        assert!(fragments.len() <= 3);
        // Graph channel has no snapshot yet, so it contributes nothing
        assert!(fragments.iter().all(|f| f.citation.matched_entities.is_none()));
    }

    #[tokio::test]
    async fn test_offline_embedder_degrades_vector_channel() {
        let (searcher, library) =
            searcher(Arc::new(OfflineEmbedder::new(64, "model missing")), 2000);
        let report = searcher
            .search(
                &SearchRequest::new("Tokio runtime tasks", vec![library], 3),
                profile(),
                None,
                None,
            )
            .await
            .unwrap();
        assert_eq!(report.degraded_channels(), vec![Channel::Vector]);
        assert!(report.outcome.is_grounded());
    }

    #[tokio::test]
    async fn test_slow_channel_times_out() {
        let (searcher, library) = searcher(Arc::new(SlowEmbedder(HashEmbedder::new(64))), 100);
        let report = searcher
            .search(
                &SearchRequest::new("Tokio runtime tasks", vec![library], 3),
                profile(),
                None,
                None,
            )
            .await
            .unwrap();
        assert_eq!(report.degraded_channels(), vec![Channel::Vector]);
        match &report.channels[0].status {
            crate::retrieval::ChannelStatus::Unavailable { reason } => {
                assert!(reason.contains("timed out"))
            }
            other => panic!("unexpected status {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancelled_request_returns_nothing() {
        let (searcher, library) = searcher(Arc::new(SlowEmbedder(HashEmbedder::new(64))), 5000);
        let (handle, signal) = cancel_pair();
        let request = SearchRequest::new("Tokio runtime tasks", vec![library], 3);

        let search = searcher.search(&request, profile(), None, Some(signal));
        let cancel = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            handle.cancel();
        };
        let (result, _) = tokio::join!(search, cancel);
        assert!(matches!(result, Err(RagError::Cancelled)));
    }

    #[tokio::test]
    async fn test_cancel_stops_blocking_work() {
        let (searcher, library, vector_queries) = counting_searcher(5000);
        let (handle, signal) = cancel_pair();
        let request = SearchRequest::new("Tokio runtime tasks", vec![library], 3);

        let search = searcher.search(&request, profile(), None, Some(signal));
        let cancel = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            handle.cancel();
        };
        let (result, _) = tokio::join!(search, cancel);
        assert!(matches!(result, Err(RagError::Cancelled)));

        // Give the embedding call time to finish on the blocking pool
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(vector_queries.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_timed_out_channel_stops_blocking_work() {
        let (searcher, library, vector_queries) = counting_searcher(100);
        let report = searcher
            .search(
                &SearchRequest::new("Tokio runtime tasks", vec![library], 3),
                profile(),
                None,
                None,
            )
            .await
            .unwrap();
        assert_eq!(report.degraded_channels(), vec![Channel::Vector]);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(vector_queries.load(Ordering::SeqCst), 0);
    }
}
