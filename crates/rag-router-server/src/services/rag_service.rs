use crate::config::{MessagesConfig, PrecomputeConfig, SearchConfig};
use crate::knowledge::KnowledgeSource;
use crate::models::{AnswerSource, KnowledgeItem, SimilarityMatch};
use crate::services::embedding_store::EmbeddingStore;
use crate::services::precompute::{PrecomputeHandle, PrecomputeReport, PrecomputeWorker};
use crate::services::provider::{
    EmbeddingProvider, GenerationProvider, RetrievalAnswer, RetrievalBackend,
};
use crate::utils::cosine_similarity;
use crate::utils::error::BackendError;
use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use std::cmp::Ordering;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Question used by the health check round trip.
const HEALTH_PROBE_QUESTION: &str = "测试";

/// Result of one retrieval step.
#[derive(Debug)]
pub enum StepOutcome<T> {
    Hit(T),
    Miss,
    BackendError(BackendError),
}

/// Retrieval engine: vector search, answer synthesis, keyword fallback.
pub struct RagService {
    source: Arc<dyn KnowledgeSource>,
    knowledge: RwLock<Arc<Vec<KnowledgeItem>>>,
    store: Arc<EmbeddingStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    generator: Arc<dyn GenerationProvider>,
    search: SearchConfig,
    precompute: PrecomputeConfig,
    messages: MessagesConfig,
    precompute_handle: Mutex<Option<Arc<PrecomputeHandle>>>,
}

impl RagService {
    /// Load the knowledge base. Embeddings are computed once
    /// [`start_precompute`](Self::start_precompute) is called.
    pub fn new(
        source: Arc<dyn KnowledgeSource>,
        embedder: Arc<dyn EmbeddingProvider>,
        generator: Arc<dyn GenerationProvider>,
        search: SearchConfig,
        precompute: PrecomputeConfig,
        messages: MessagesConfig,
    ) -> Self {
        let items = source.load();
        info!("Retrieval engine initialised with {} knowledge items", items.len());

        Self {
            source,
            knowledge: RwLock::new(Arc::new(items)),
            store: Arc::new(EmbeddingStore::new()),
            embedder,
            generator,
            search,
            precompute,
            messages,
            precompute_handle: Mutex::new(None),
        }
    }

    /// Start the background embedding precompute for the current knowledge base.
    pub fn start_precompute(&self) {
        let items = self.knowledge_snapshot();
        let generation = self.store.generation();
        self.spawn_precompute(items, generation);
    }

    fn spawn_precompute(&self, items: Arc<Vec<KnowledgeItem>>, generation: u64) {
        let handle = Arc::new(PrecomputeWorker::spawn(
            items,
            self.embedder.clone(),
            self.store.clone(),
            generation,
            self.precompute.delay(),
        ));
        if let Some(previous) = self.precompute_handle.lock().replace(handle) {
            previous.cancel();
        }
    }

    /// Wait for the running precompute worker, if any.
    pub async fn wait_for_precompute(&self) -> Option<PrecomputeReport> {
        let handle = self.precompute_handle.lock().clone()?;
        handle.wait().await
    }

    /// Reload the knowledge base and recompute every embedding from scratch.
    /// Returns the number of loaded items.
    ///
    /// The source is read on the blocking pool. If loading panics, the current
    /// knowledge base and its embeddings are kept.
    pub async fn reload(&self) -> usize {
        info!("Reloading knowledge base...");
        let source = self.source.clone();
        let items = match tokio::task::spawn_blocking(move || source.load()).await {
            Ok(items) => Arc::new(items),
            Err(e) => {
                error!("Knowledge reload failed, keeping current items: {}", e);
                return self.knowledge_len();
            }
        };
        let count = items.len();

        let generation = {
            let mut knowledge = self.knowledge.write();
            let generation = self.store.reset();
            *knowledge = items.clone();
            generation
        };

        self.spawn_precompute(items, generation);
        info!("Knowledge base reloaded: {} items", count);
        count
    }

    pub fn knowledge_snapshot(&self) -> Arc<Vec<KnowledgeItem>> {
        self.knowledge.read().clone()
    }

    pub fn knowledge_len(&self) -> usize {
        self.knowledge.read().len()
    }

    pub fn cached_embeddings(&self) -> usize {
        self.store.len()
    }

    pub fn embedding_store(&self) -> &Arc<EmbeddingStore> {
        &self.store
    }

    /// Answer a question. Never fails; degraded paths produce an apology text.
    pub async fn query(&self, question: &str) -> String {
        self.answer_question(question).await.text
    }

    pub async fn answer_question(&self, question: &str) -> RetrievalAnswer {
        let start = Instant::now();
        info!("Processing RAG query: {}", question);

        match AssertUnwindSafe(self.run_chain(question)).catch_unwind().await {
            Ok(answer) => {
                info!(
                    "RAG query answered by {} in {:?}",
                    answer.source.as_str(),
                    start.elapsed()
                );
                answer
            }
            Err(_) => {
                error!("RAG query aborted by an internal fault");
                RetrievalAnswer {
                    text: self.messages.system_busy.clone(),
                    source: AnswerSource::Rag,
                }
            }
        }
    }

    async fn run_chain(&self, question: &str) -> RetrievalAnswer {
        let knowledge = self.knowledge_snapshot();

        match self.vector_search(question, &knowledge).await {
            StepOutcome::Hit(matches) => {
                let text = match self.synthesize(question, &matches).await {
                    StepOutcome::Hit(text) => text,
                    StepOutcome::Miss => matches[0].item.answer.clone(),
                    StepOutcome::BackendError(e) => {
                        warn!("Answer generation failed, returning best match verbatim: {}", e);
                        matches[0].item.answer.clone()
                    }
                };
                return RetrievalAnswer {
                    text,
                    source: AnswerSource::Rag,
                };
            }
            StepOutcome::Miss => debug!("Vector search found no match above threshold"),
            StepOutcome::BackendError(e) => warn!("Embedding unavailable, skipping vector search: {}", e),
        }

        if let Some(item) = keyword_search(question, &knowledge) {
            debug!("Keyword match on {}", item.id);
            return RetrievalAnswer {
                text: item.answer.clone(),
                source: AnswerSource::Keyword,
            };
        }

        RetrievalAnswer {
            text: self.messages.could_not_understand.clone(),
            source: AnswerSource::Rag,
        }
    }

    async fn vector_search(
        &self,
        question: &str,
        knowledge: &[KnowledgeItem],
    ) -> StepOutcome<Vec<SimilarityMatch>> {
        let query_embedding = match self.embedder.embed(question).await {
            Ok(v) => v,
            Err(e) => return StepOutcome::BackendError(e),
        };

        let matches = rank_matches(
            &query_embedding,
            knowledge,
            &self.store,
            self.search.similarity_threshold,
            self.search.max_results,
        );

        if matches.is_empty() {
            StepOutcome::Miss
        } else {
            debug!(
                "Vector search: {} candidates, best {} ({:.3})",
                matches.len(),
                matches[0].item.id,
                matches[0].similarity
            );
            StepOutcome::Hit(matches)
        }
    }

    async fn synthesize(&self, question: &str, matches: &[SimilarityMatch]) -> StepOutcome<String> {
        let prompt = build_prompt(question, &build_context(matches));
        match self.generator.generate(&prompt).await {
            Ok(text) if !text.trim().is_empty() => StepOutcome::Hit(text),
            Ok(_) => StepOutcome::Miss,
            Err(e) => StepOutcome::BackendError(e),
        }
    }

    /// Vector search step alone: ranked candidates for a question.
    pub async fn search(&self, question: &str) -> Vec<SimilarityMatch> {
        let knowledge = self.knowledge_snapshot();
        match self.vector_search(question, &knowledge).await {
            StepOutcome::Hit(matches) => matches,
            StepOutcome::Miss => Vec::new(),
            StepOutcome::BackendError(e) => {
                warn!("Embedding unavailable for search: {}", e);
                Vec::new()
            }
        }
    }

    /// Connectivity probe plus a trivial round-trip query.
    pub async fn check_health(&self) -> bool {
        if let Err(e) = self.generator.probe().await {
            warn!("Ollama backend unreachable: {}", e);
            return false;
        }

        let answer = self.query(HEALTH_PROBE_QUESTION).await;
        !answer.is_empty() && !answer.contains(&self.messages.system_busy)
    }
}

/// Score every item that has a cached embedding, keep those strictly above
/// `threshold`, best first, at most `top_k`. Ties keep knowledge-base order.
pub fn rank_matches(
    query: &[f32],
    knowledge: &[KnowledgeItem],
    store: &EmbeddingStore,
    threshold: f32,
    top_k: usize,
) -> Vec<SimilarityMatch> {
    let mut matches: Vec<SimilarityMatch> = knowledge
        .iter()
        .filter_map(|item| {
            let vector = store.get(&item.id)?;
            Some(SimilarityMatch {
                item: item.clone(),
                similarity: cosine_similarity(query, &vector),
            })
        })
        .filter(|m| m.similarity > threshold)
        .collect();

    matches.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(Ordering::Equal)
    });
    matches.truncate(top_k);
    matches
}

/// Case-insensitive substring match in either direction between the question
/// and an item question, or the item answer containing the question.
/// First hit in knowledge-base order wins.
pub fn keyword_search<'a>(question: &str, knowledge: &'a [KnowledgeItem]) -> Option<&'a KnowledgeItem> {
    let question = question.trim().to_lowercase();
    if question.is_empty() {
        return None;
    }

    knowledge.iter().find(|item| {
        let item_question = item.question.to_lowercase();
        item_question.contains(&question)
            || (!item_question.is_empty() && question.contains(&item_question))
            || item.answer.to_lowercase().contains(&question)
    })
}

/// Candidates rendered as `Q:`/`A:` pairs in rank order.
pub fn build_context(matches: &[SimilarityMatch]) -> String {
    let mut context = String::new();
    for m in matches {
        context.push_str("Q: ");
        context.push_str(&m.item.question);
        context.push_str("\nA: ");
        context.push_str(&m.item.answer);
        context.push_str("\n\n");
    }
    context
}

pub fn build_prompt(question: &str, context: &str) -> String {
    format!(
        "基于以下知识库信息回答用户问题。请确保回答准确、简洁、有帮助。\n\n\
         知识库信息：\n{}\n\
         用户问题：{}\n\n\
         回答：",
        context, question
    )
}

#[async_trait]
impl RetrievalBackend for RagService {
    async fn answer(&self, question: &str) -> RetrievalAnswer {
        self.answer_question(question).await
    }

    async fn check_health(&self) -> bool {
        RagService::check_health(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::StaticKnowledge;
    use crate::services::provider::{MockEmbeddingProvider, MockGenerationProvider};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::time::Duration;

    fn kb() -> Vec<KnowledgeItem> {
        vec![
            KnowledgeItem::new("qa_001", "How do I reset my password?", "Use the reset link.", "account"),
            KnowledgeItem::new("qa_002", "What does VIP cost?", "VIP is 15 per month.", "vip"),
            KnowledgeItem::new("qa_003", "Can I download music?", "VIP members can download.", "vip"),
        ]
    }

    /// Embedder answering from a fixed table; unknown texts fail.
    struct TableEmbedder(HashMap<String, Vec<f32>>);

    #[async_trait]
    impl EmbeddingProvider for TableEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, BackendError> {
            self.0
                .get(text)
                .cloned()
                .ok_or(BackendError::EmptyEmbedding)
        }
    }

    fn failing_embedder() -> MockEmbeddingProvider {
        let mut embedder = MockEmbeddingProvider::new();
        embedder
            .expect_embed()
            .returning(|_| Err(BackendError::MalformedResponse("offline".into())));
        embedder
    }

    fn unused_generator() -> MockGenerationProvider {
        let mut generator = MockGenerationProvider::new();
        generator.expect_generate().never();
        generator
    }

    fn service(
        items: Vec<KnowledgeItem>,
        embedder: impl EmbeddingProvider + 'static,
        generator: impl GenerationProvider + 'static,
    ) -> RagService {
        RagService::new(
            Arc::new(StaticKnowledge(items)),
            Arc::new(embedder),
            Arc::new(generator),
            SearchConfig::default(),
            PrecomputeConfig { delay_ms: 0 },
            MessagesConfig::default(),
        )
    }

    #[test]
    fn test_rank_filters_sorts_and_truncates() {
        let store = EmbeddingStore::new();
        let g = store.generation();
        store.insert(g, "qa_001", vec![1.0, 0.0]);
        store.insert(g, "qa_002", vec![0.9, 0.1]);
        store.insert(g, "qa_003", vec![0.0, 1.0]);

        let matches = rank_matches(&[1.0, 0.0], &kb(), &store, 0.7, 5);
        let ids: Vec<_> = matches.iter().map(|m| m.item.id.as_str()).collect();
        assert_eq!(ids, vec!["qa_001", "qa_002"]);
        assert!(matches[0].similarity >= matches[1].similarity);

        let top1 = rank_matches(&[1.0, 0.0], &kb(), &store, 0.7, 1);
        assert_eq!(top1.len(), 1);
    }

    #[test]
    fn test_rank_threshold_is_strict() {
        let store = EmbeddingStore::new();
        store.insert(store.generation(), "qa_001", vec![1.0, 0.0]);
        assert!(rank_matches(&[1.0, 0.0], &kb(), &store, 1.0, 5).is_empty());
    }

    #[test]
    fn test_rank_skips_missing_and_mismatched_vectors() {
        let store = EmbeddingStore::new();
        store.insert(store.generation(), "qa_002", vec![1.0, 0.0, 0.0]);
        // mismatched length scores 0
        assert_eq!(rank_matches(&[1.0, 0.0], &kb(), &store, -0.5, 5).len(), 1);
        assert!(rank_matches(&[1.0, 0.0], &kb(), &store, 0.0, 5).is_empty());
    }

    #[test]
    fn test_single_item_own_embedding_is_top_match() {
        let item = KnowledgeItem::new("only", "q", "a", "c");
        let store = EmbeddingStore::new();
        let v = vec![0.3, -1.2, 4.0];
        store.insert(store.generation(), "only", v.clone());

        let matches = rank_matches(&v, &[item], &store, 0.99, 5);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].item.id, "only");
    }

    #[test]
    fn test_keyword_search_rules() {
        let items = kb();
        // item question contains the question
        assert_eq!(keyword_search("RESET MY", &items).unwrap().id, "qa_001");
        // question contains the item question
        assert_eq!(
            keyword_search("hello, what does vip cost? thanks", &items).unwrap().id,
            "qa_002"
        );
        // answer contains the question
        assert_eq!(keyword_search("members can", &items).unwrap().id, "qa_003");
        assert!(keyword_search("weather tomorrow", &items).is_none());
        assert!(keyword_search("   ", &items).is_none());
    }

    #[test]
    fn test_keyword_search_is_deterministic() {
        let items = kb();
        // "vip" appears in qa_002 and qa_003; load order decides
        let first = keyword_search("vip", &items).unwrap().id.clone();
        let second = keyword_search("vip", &items).unwrap().id.clone();
        assert_eq!(first, "qa_002");
        assert_eq!(first, second);
    }

    #[test]
    fn test_prompt_contains_context_in_rank_order() {
        let matches = vec![
            SimilarityMatch { item: kb()[1].clone(), similarity: 0.9 },
            SimilarityMatch { item: kb()[0].clone(), similarity: 0.8 },
        ];
        let context = build_context(&matches);
        assert!(context.find("What does VIP cost?").unwrap() < context.find("reset my password").unwrap());

        let prompt = build_prompt("vip price?", &context);
        assert!(prompt.contains(&context));
        assert!(prompt.contains("用户问题：vip price?"));
    }

    #[tokio::test]
    async fn test_vector_hit_is_synthesized() {
        let mut table = HashMap::new();
        table.insert("price of vip".to_string(), vec![1.0, 0.0]);
        let mut generator = MockGenerationProvider::new();
        generator
            .expect_generate()
            .withf(|prompt| prompt.contains("VIP is 15 per month."))
            .times(1)
            .returning(|_| Ok("It costs 15.".to_string()));

        let rag = service(kb(), TableEmbedder(table), generator);
        let g = rag.embedding_store().generation();
        rag.embedding_store().insert(g, "qa_002", vec![1.0, 0.0]);

        let answer = rag.answer_question("price of vip").await;
        assert_eq!(answer.text, "It costs 15.");
        assert_eq!(answer.source, AnswerSource::Rag);
    }

    #[tokio::test]
    async fn test_generation_failure_returns_best_answer_verbatim() {
        let mut table = HashMap::new();
        table.insert("price of vip".to_string(), vec![1.0, 0.0]);
        let mut generator = MockGenerationProvider::new();
        generator
            .expect_generate()
            .returning(|_| Err(BackendError::Status { status: 503, body: String::new() }));

        let rag = service(kb(), TableEmbedder(table), generator);
        let g = rag.embedding_store().generation();
        rag.embedding_store().insert(g, "qa_002", vec![1.0, 0.0]);
        rag.embedding_store().insert(g, "qa_003", vec![0.8, 0.2]);

        assert_eq!(rag.query("price of vip").await, "VIP is 15 per month.");
    }

    #[tokio::test]
    async fn test_embedding_failure_falls_back_to_keyword() {
        let rag = service(kb(), failing_embedder(), unused_generator());
        let answer = rag.answer_question("download music").await;
        assert_eq!(answer.text, "VIP members can download.");
        assert_eq!(answer.source, AnswerSource::Keyword);
    }

    #[tokio::test]
    async fn test_nothing_matches_returns_could_not_understand() {
        let rag = service(kb(), failing_embedder(), unused_generator());
        let answer = rag.query("quantum chromodynamics").await;
        assert_eq!(answer, MessagesConfig::default().could_not_understand);
    }

    #[tokio::test]
    async fn test_panicking_step_degrades_to_system_busy() {
        struct PanickingEmbedder;

        #[async_trait]
        impl EmbeddingProvider for PanickingEmbedder {
            async fn embed(&self, _text: &str) -> Result<Vec<f32>, BackendError> {
                panic!("boom")
            }
        }

        let rag = service(kb(), PanickingEmbedder, unused_generator());
        assert_eq!(rag.query("anything").await, MessagesConfig::default().system_busy);
    }

    #[tokio::test]
    async fn test_health_requires_probe() {
        let mut generator = MockGenerationProvider::new();
        generator
            .expect_probe()
            .returning(|| Err(BackendError::MalformedResponse("down".into())));
        let rag = service(kb(), failing_embedder(), generator);
        assert!(!rag.check_health().await);

        let mut generator = MockGenerationProvider::new();
        generator.expect_probe().returning(|| Ok(()));
        let rag = service(kb(), failing_embedder(), generator);
        assert!(rag.check_health().await);
    }

    /// Embedder returning a vector that depends on how many reloads happened.
    struct EpochEmbedder {
        epoch: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl EmbeddingProvider for EpochEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, BackendError> {
            match (self.epoch.load(AtomicOrdering::SeqCst), text) {
                (0, _) => Ok(vec![1.0, 0.0]),
                (_, "question") => Err(BackendError::EmptyEmbedding),
                _ => Ok(vec![0.0, 1.0]),
            }
        }
    }

    #[tokio::test]
    async fn test_precompute_then_reload_clears_stale_vectors() {
        let epoch = Arc::new(AtomicUsize::new(0));
        let mut generator = MockGenerationProvider::new();
        generator.expect_generate().returning(|_| Ok("synthesized".to_string()));

        let rag = service(
            vec![KnowledgeItem::new("qa_001", "question", "answer", "c")],
            EpochEmbedder { epoch: epoch.clone() },
            generator,
        );

        rag.start_precompute();
        let report = rag.wait_for_precompute().await.unwrap();
        assert_eq!(report.embedded, 1);
        assert_eq!(rag.cached_embeddings(), 1);
        assert_eq!(rag.query("zzz").await, "synthesized");

        epoch.store(1, AtomicOrdering::SeqCst);
        assert_eq!(rag.reload().await, 1);
        // the cache starts empty after a reload; the old vector is gone
        assert!(rag.embedding_store().get("qa_001").map_or(true, |v| v.as_slice() == [0.0, 1.0]));

        let report = tokio::time::timeout(Duration::from_secs(5), rag.wait_for_precompute())
            .await
            .unwrap()
            .unwrap();
        assert!(!report.cancelled);
        assert_eq!(
            rag.embedding_store().get("qa_001").unwrap().as_slice(),
            &[0.0, 1.0]
        );
    }

    fn search_table() -> HashMap<String, Vec<f32>> {
        let mut table = HashMap::new();
        for (item, vector) in kb().iter().zip([vec![1.0, 0.0], vec![0.9, 0.1], vec![0.0, 1.0]]) {
            table.insert(item.embedding_text(), vector);
        }
        table.insert("forgot password".to_string(), vec![1.0, 0.0]);
        table.insert("unrelated".to_string(), vec![-1.0, 0.0]);
        table
    }

    #[tokio::test]
    async fn test_search_returns_ranked_matches() {
        let rag = service(kb(), TableEmbedder(search_table()), unused_generator());
        rag.start_precompute();
        rag.wait_for_precompute().await.unwrap();

        let matches = rag.search("forgot password").await;
        let ids: Vec<_> = matches.iter().map(|m| m.item.id.as_str()).collect();
        assert_eq!(ids, vec!["qa_001", "qa_002"]);
        assert!(matches[0].similarity > matches[1].similarity);
    }

    #[tokio::test]
    async fn test_search_below_threshold_is_empty() {
        let rag = service(kb(), TableEmbedder(search_table()), unused_generator());
        rag.start_precompute();
        rag.wait_for_precompute().await.unwrap();

        assert!(rag.search("unrelated").await.is_empty());
    }

    #[tokio::test]
    async fn test_search_without_embedding_is_empty() {
        let rag = service(kb(), failing_embedder(), unused_generator());
        assert!(rag.search("forgot password").await.is_empty());
    }

    /// Source that serves one load and panics on every later one.
    struct OneShotSource(AtomicUsize);

    impl KnowledgeSource for OneShotSource {
        fn load(&self) -> Vec<KnowledgeItem> {
            if self.0.fetch_add(1, AtomicOrdering::SeqCst) > 0 {
                panic!("knowledge file vanished");
            }
            kb()
        }
    }

    #[tokio::test]
    async fn test_reload_failure_keeps_current_knowledge() {
        let rag = RagService::new(
            Arc::new(OneShotSource(AtomicUsize::new(0))),
            Arc::new(failing_embedder()),
            Arc::new(unused_generator()),
            SearchConfig::default(),
            PrecomputeConfig { delay_ms: 0 },
            MessagesConfig::default(),
        );

        assert_eq!(rag.reload().await, 3);
        assert_eq!(rag.knowledge_len(), 3);
        assert_eq!(rag.query("members can").await, "VIP members can download.");
    }
}
