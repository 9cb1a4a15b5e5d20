//! Embedding engine: cache-fronted model calls that degrade to zero vectors.
//!
//! Only model loading is a hard failure. Once built, the engine always
//! returns a vector of the model's dimension for every input; the
//! [`EmbedOutcome`] variant says how it was obtained.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use greenlight_core::config::EmbeddingConfig;
use greenlight_core::error::{GreenlightError, Result};
use greenlight_core::WorkerPool;
use greenlight_storage::CacheStore;
use serde::Serialize;
use tracing::{debug, warn};

use crate::cache::EmbeddingCache;
use crate::embedding::{load_model, EmbeddingModel};

/// Why a zero vector was returned instead of an embedding.
#[derive(Debug, Clone, PartialEq)]
pub enum DegradeReason {
    EmptyInput,
    ModelFailure(String),
    DimensionMismatch { expected: usize, actual: usize },
    WorkerFailure(String),
}

impl fmt::Display for DegradeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DegradeReason::EmptyInput => write!(f, "empty input"),
            DegradeReason::ModelFailure(e) => write!(f, "model failure: {}", e),
            DegradeReason::DimensionMismatch { expected, actual } => {
                write!(f, "expected {} dimensions, model returned {}", expected, actual)
            }
            DegradeReason::WorkerFailure(e) => write!(f, "worker failure: {}", e),
        }
    }
}

/// Result of embedding one text.
#[derive(Debug, Clone, PartialEq)]
pub enum EmbedOutcome {
    /// Fresh model output, now cached.
    Computed(Vec<f32>),
    Cached(Vec<f32>),
    /// All-zero vector of the model dimension.
    Degraded {
        vector: Vec<f32>,
        reason: DegradeReason,
    },
}

impl EmbedOutcome {
    pub fn vector(&self) -> &[f32] {
        match self {
            EmbedOutcome::Computed(v) | EmbedOutcome::Cached(v) => v,
            EmbedOutcome::Degraded { vector, .. } => vector,
        }
    }

    pub fn into_vector(self) -> Vec<f32> {
        match self {
            EmbedOutcome::Computed(v) | EmbedOutcome::Cached(v) => v,
            EmbedOutcome::Degraded { vector, .. } => vector,
        }
    }

    pub fn is_cached(&self) -> bool {
        matches!(self, EmbedOutcome::Cached(_))
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, EmbedOutcome::Degraded { .. })
    }
}

/// Static description of the loaded model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelInfo {
    pub name: String,
    pub backend: String,
    pub dimensions: usize,
    pub max_sequence_length: Option<usize>,
    pub cache_backend: String,
}

/// Turns text into fixed-length vectors through a cache.
pub struct EmbeddingEngine {
    model: Arc<dyn EmbeddingModel>,
    cache: EmbeddingCache,
    dimensions: usize,
    batch_size: usize,
}

impl fmt::Debug for EmbeddingEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmbeddingEngine")
            .field("model", &self.model.name())
            .field("dimensions", &self.dimensions)
            .field("cache", &self.cache)
            .finish()
    }
}

impl EmbeddingEngine {
    /// Wrap an already-loaded model. The cache is namespaced by model name.
    pub fn new(model: Arc<dyn EmbeddingModel>, store: Arc<dyn CacheStore>) -> Self {
        let dimensions = model.dimensions();
        let cache = EmbeddingCache::new(store, model.name());
        Self {
            model,
            cache,
            dimensions,
            batch_size: EmbeddingConfig::default().batch_size,
        }
    }

    /// Load the configured model. Errors if it cannot be loaded.
    pub fn from_config(config: &EmbeddingConfig, store: Arc<dyn CacheStore>) -> Result<Self> {
        let model = load_model(config)?;
        Ok(Self::new(model, store).with_batch_size(config.batch_size))
    }

    /// Default chunk size for [`embed_batch_default`](Self::embed_batch_default).
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn cache(&self) -> &EmbeddingCache {
        &self.cache
    }

    pub fn model_info(&self) -> ModelInfo {
        ModelInfo {
            name: self.model.name().to_string(),
            backend: self.model.backend().to_string(),
            dimensions: self.dimensions,
            max_sequence_length: self.model.max_sequence_length(),
            cache_backend: self.cache.backend().to_string(),
        }
    }

    pub fn zero_vector(&self) -> Vec<f32> {
        vec![0.0; self.dimensions]
    }

    fn degraded(&self, reason: DegradeReason) -> EmbedOutcome {
        EmbedOutcome::Degraded {
            vector: self.zero_vector(),
            reason,
        }
    }

    /// Embed one text. Never fails.
    pub fn embed(&self, text: &str) -> EmbedOutcome {
        if text.trim().is_empty() {
            return self.degraded(DegradeReason::EmptyInput);
        }

        let key = self.cache.key_for(text);
        if let Some(vector) = self.cache.get(&key) {
            if vector.len() == self.dimensions {
                return EmbedOutcome::Cached(vector);
            }
            warn!(
                cached = vector.len(),
                expected = self.dimensions,
                "Cached vector has wrong dimension, recomputing"
            );
        }

        self.compute(&key, text)
    }

    /// Embed `texts` in chunks of `batch_size` (0 is treated as 1).
    ///
    /// Output order matches input order. A failing chunk is retried item by
    /// item so one bad input degrades only itself.
    pub fn embed_batch<S: AsRef<str>>(&self, texts: &[S], batch_size: usize) -> Vec<EmbedOutcome> {
        let batch_size = batch_size.max(1);
        let mut results = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(batch_size) {
            results.extend(self.embed_chunk(chunk));
        }
        debug!(
            total = texts.len(),
            batch_size,
            degraded = results.iter().filter(|r| r.is_degraded()).count(),
            "Batch embedded"
        );
        results
    }

    /// [`embed_batch`](Self::embed_batch) with the configured batch size.
    pub fn embed_batch_default<S: AsRef<str>>(&self, texts: &[S]) -> Vec<EmbedOutcome> {
        self.embed_batch(texts, self.batch_size)
    }

    fn embed_chunk<S: AsRef<str>>(&self, chunk: &[S]) -> Vec<EmbedOutcome> {
        let mut slots: Vec<Option<EmbedOutcome>> = vec![None; chunk.len()];
        // (slot index, cache key, text) for each cache miss.
        let mut pending: Vec<(usize, String, &str)> = Vec::new();

        for (i, text) in chunk.iter().enumerate() {
            let text = text.as_ref();
            if text.trim().is_empty() {
                slots[i] = Some(self.degraded(DegradeReason::EmptyInput));
                continue;
            }
            let key = self.cache.key_for(text);
            match self.cache.get(&key) {
                Some(vector) if vector.len() == self.dimensions => {
                    slots[i] = Some(EmbedOutcome::Cached(vector));
                }
                _ => pending.push((i, key, text)),
            }
        }

        if !pending.is_empty() {
            let inputs: Vec<&str> = pending.iter().map(|(_, _, text)| *text).collect();
            match guarded(|| self.model.encode_batch(&inputs)) {
                Ok(vectors) if vectors.len() == pending.len() => {
                    for ((slot, key, _), vector) in pending.iter().zip(vectors) {
                        slots[*slot] = Some(self.accept(key, vector));
                    }
                }
                Ok(vectors) => {
                    warn!(
                        expected = pending.len(),
                        returned = vectors.len(),
                        "Model returned wrong batch size, retrying items individually"
                    );
                    for (slot, key, text) in &pending {
                        slots[*slot] = Some(self.compute(key, text));
                    }
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        items = pending.len(),
                        "Batch embedding failed, retrying items individually"
                    );
                    for (slot, key, text) in &pending {
                        slots[*slot] = Some(self.compute(key, text));
                    }
                }
            }
        }

        slots
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| {
                    self.degraded(DegradeReason::ModelFailure("unresolved batch item".to_string()))
                })
            })
            .collect()
    }

    /// Model call for one cache miss.
    fn compute(&self, key: &str, text: &str) -> EmbedOutcome {
        match guarded(|| self.model.encode(text)) {
            Ok(vector) => self.accept(key, vector),
            Err(e) => {
                warn!(error = %e, "Embedding failed, returning zero vector");
                self.degraded(DegradeReason::ModelFailure(e.to_string()))
            }
        }
    }

    /// Validate fresh model output and cache it.
    fn accept(&self, key: &str, vector: Vec<f32>) -> EmbedOutcome {
        if vector.len() != self.dimensions {
            warn!(
                expected = self.dimensions,
                actual = vector.len(),
                "Model returned wrong dimension, returning zero vector"
            );
            return self.degraded(DegradeReason::DimensionMismatch {
                expected: self.dimensions,
                actual: vector.len(),
            });
        }
        if vector.iter().any(|v| !v.is_finite()) {
            warn!("Model returned non-finite components, returning zero vector");
            return self.degraded(DegradeReason::ModelFailure(
                "non-finite embedding component".to_string(),
            ));
        }
        self.cache.put(key, &vector);
        EmbedOutcome::Computed(vector)
    }

    /// [`embed`](Self::embed) on the worker pool.
    pub async fn embed_async(self: &Arc<Self>, pool: &WorkerPool, text: String) -> EmbedOutcome {
        let this = Arc::clone(self);
        match pool.run(move || this.embed(&text)).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "Embedding job failed, returning zero vector");
                self.degraded(DegradeReason::WorkerFailure(e.to_string()))
            }
        }
    }

    /// [`embed_batch`](Self::embed_batch) on the worker pool.
    pub async fn embed_batch_async(
        self: &Arc<Self>,
        pool: &WorkerPool,
        texts: Vec<String>,
        batch_size: usize,
    ) -> Vec<EmbedOutcome> {
        let count = texts.len();
        let this = Arc::clone(self);
        match pool.run(move || this.embed_batch(&texts, batch_size)).await {
            Ok(outcomes) => outcomes,
            Err(e) => {
                warn!(error = %e, items = count, "Batch embedding job failed, returning zero vectors");
                (0..count)
                    .map(|_| self.degraded(DegradeReason::WorkerFailure(e.to_string())))
                    .collect()
            }
        }
    }
}

/// Run a model call, turning a panic into a model error.
fn guarded<T>(call: impl FnOnce() -> Result<T>) -> Result<T> {
    panic::catch_unwind(AssertUnwindSafe(call))
        .unwrap_or_else(|_| Err(GreenlightError::Model("model call panicked".to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::MockEmbeddingModel;
    use greenlight_storage::{MemoryCacheStore, SqliteCacheStore};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const DIM: usize = 32;

    fn mock_engine() -> (Arc<MockEmbeddingModel>, EmbeddingEngine) {
        let model = Arc::new(MockEmbeddingModel::new("mock-model", DIM).unwrap());
        let engine = EmbeddingEngine::new(model.clone(), Arc::new(MemoryCacheStore::new()));
        (model, engine)
    }

    /// Fails on any text containing "bad"; counts batch calls.
    struct FlakyModel {
        inner: MockEmbeddingModel,
        batch_calls: AtomicUsize,
    }

    impl FlakyModel {
        fn new() -> Self {
            Self {
                inner: MockEmbeddingModel::new("flaky", DIM).unwrap(),
                batch_calls: AtomicUsize::new(0),
            }
        }
    }

    impl EmbeddingModel for FlakyModel {
        fn name(&self) -> &str {
            "flaky"
        }

        fn backend(&self) -> &'static str {
            "mock"
        }

        fn dimensions(&self) -> usize {
            DIM
        }

        fn encode(&self, text: &str) -> Result<Vec<f32>> {
            if text.contains("bad") {
                return Err(GreenlightError::Model("cannot embed".to_string()));
            }
            self.inner.encode(text)
        }

        fn encode_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
            self.batch_calls.fetch_add(1, Ordering::SeqCst);
            texts.iter().map(|t| self.encode(t)).collect()
        }
    }

    /// Always returns vectors of the wrong length.
    struct ShortModel;

    impl EmbeddingModel for ShortModel {
        fn name(&self) -> &str {
            "short"
        }

        fn backend(&self) -> &'static str {
            "mock"
        }

        fn dimensions(&self) -> usize {
            DIM
        }

        fn encode(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![1.0; DIM - 1])
        }
    }

    struct PanickingModel;

    impl EmbeddingModel for PanickingModel {
        fn name(&self) -> &str {
            "panicking"
        }

        fn backend(&self) -> &'static str {
            "mock"
        }

        fn dimensions(&self) -> usize {
            DIM
        }

        fn encode(&self, _text: &str) -> Result<Vec<f32>> {
            panic!("inference crashed");
        }
    }

    #[test]
    fn test_empty_input_is_zero_without_model_call() {
        let (model, engine) = mock_engine();
        for input in ["", "   ", "\n"] {
            let outcome = engine.embed(input);
            assert_eq!(
                outcome,
                EmbedOutcome::Degraded {
                    vector: vec![0.0; DIM],
                    reason: DegradeReason::EmptyInput
                }
            );
        }
        assert_eq!(model.encoded_count(), 0);
    }

    #[test]
    fn test_second_call_hits_cache() {
        let (model, engine) = mock_engine();
        let first = engine.embed("hello");
        let second = engine.embed("hello");
        assert!(matches!(first, EmbedOutcome::Computed(_)));
        assert!(second.is_cached());
        assert_eq!(first.vector(), second.vector());
        assert_eq!(model.encoded_count(), 1);
    }

    #[test]
    fn test_every_outcome_has_model_dimension() {
        let (_, engine) = mock_engine();
        for text in ["", "a", "a longer sentence about heart failure"] {
            assert_eq!(engine.embed(text).vector().len(), DIM);
        }
    }

    #[test]
    fn test_model_failure_degrades() {
        let engine = EmbeddingEngine::new(Arc::new(FlakyModel::new()), Arc::new(MemoryCacheStore::new()));
        let outcome = engine.embed("this is bad");
        assert!(matches!(
            outcome,
            EmbedOutcome::Degraded {
                reason: DegradeReason::ModelFailure(_),
                ..
            }
        ));
        assert_eq!(outcome.vector(), engine.zero_vector().as_slice());
        // Failures are not cached.
        assert_eq!(engine.cache().stats().unwrap().entries, 0);
    }

    #[test]
    fn test_wrong_dimension_degrades() {
        let engine = EmbeddingEngine::new(Arc::new(ShortModel), Arc::new(MemoryCacheStore::new()));
        let outcome = engine.embed("anything");
        assert_eq!(
            outcome,
            EmbedOutcome::Degraded {
                vector: vec![0.0; DIM],
                reason: DegradeReason::DimensionMismatch {
                    expected: DIM,
                    actual: DIM - 1
                }
            }
        );
    }

    #[test]
    fn test_panicking_model_degrades() {
        let engine = EmbeddingEngine::new(Arc::new(PanickingModel), Arc::new(MemoryCacheStore::new()));
        assert!(engine.embed("anything").is_degraded());
        let batch = engine.embed_batch(&["a", "b"], 2);
        assert!(batch.iter().all(|o| o.is_degraded()));
    }

    #[test]
    fn test_batch_with_empty_items() {
        let (_, engine) = mock_engine();
        let outcomes = engine.embed_batch(&["", "hello", ""], 8);
        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes[0].vector(), vec![0.0; DIM].as_slice());
        assert_eq!(outcomes[2].vector(), vec![0.0; DIM].as_slice());
        assert_eq!(outcomes[1].vector().len(), DIM);
        assert!(outcomes[1].vector().iter().any(|v| *v != 0.0));
    }

    #[test]
    fn test_batch_matches_single_embeddings() {
        let (_, batch_engine) = mock_engine();
        let (_, single_engine) = mock_engine();
        let texts = ["alpha", "beta", "gamma", "delta", "epsilon"];
        let batch = batch_engine.embed_batch(&texts, 2);
        for (text, outcome) in texts.iter().zip(&batch) {
            assert_eq!(outcome.vector(), single_engine.embed(text).vector());
        }
    }

    #[test]
    fn test_batch_matches_single_with_partial_cache() {
        let (_, engine) = mock_engine();
        let warmed: Vec<Vec<f32>> = ["beta", "delta"]
            .iter()
            .map(|text| engine.embed(text).into_vector())
            .collect();

        let texts = ["alpha", "beta", "gamma", "delta", "epsilon"];
        let batch = engine.embed_batch(&texts, 2);
        assert_eq!(batch.len(), texts.len());

        for (text, outcome) in texts.iter().zip(&batch) {
            let expect_cached = matches!(*text, "beta" | "delta");
            assert_eq!(outcome.is_cached(), expect_cached, "{}", text);
            assert!(!outcome.is_degraded());

            let single = engine.embed(text);
            assert!(single.is_cached());
            assert_eq!(outcome.vector(), single.vector(), "{}", text);
        }
        assert_eq!(batch[1].vector(), warmed[0].as_slice());
        assert_eq!(batch[3].vector(), warmed[1].as_slice());
    }

    #[test]
    fn test_batch_zero_size_treated_as_one() {
        let (_, engine) = mock_engine();
        let outcomes = engine.embed_batch(&["a", "b", "c"], 0);
        assert_eq!(outcomes.len(), 3);
        assert!(outcomes.iter().all(|o| !o.is_degraded()));
    }

    #[test]
    fn test_batch_uses_cache() {
        let (model, engine) = mock_engine();
        engine.embed("cached one");
        let outcomes = engine.embed_batch(&["cached one", "fresh"], 4);
        assert!(outcomes[0].is_cached());
        assert!(matches!(outcomes[1], EmbedOutcome::Computed(_)));
        assert_eq!(model.encoded_count(), 2);
    }

    #[test]
    fn test_batch_failure_isolated_to_bad_item() {
        let model = Arc::new(FlakyModel::new());
        let engine = EmbeddingEngine::new(model.clone(), Arc::new(MemoryCacheStore::new()));
        let outcomes = engine.embed_batch(&["good one", "bad one", "good two"], 3);

        assert_eq!(model.batch_calls.load(Ordering::SeqCst), 1);
        assert!(matches!(outcomes[0], EmbedOutcome::Computed(_)));
        assert!(matches!(
            outcomes[1],
            EmbedOutcome::Degraded {
                reason: DegradeReason::ModelFailure(_),
                ..
            }
        ));
        assert!(matches!(outcomes[2], EmbedOutcome::Computed(_)));
        assert_eq!(engine.cache().stats().unwrap().entries, 2);
    }

    #[test]
    fn test_cache_shared_across_engines_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");
        let vector = {
            let model = Arc::new(MockEmbeddingModel::new("mock-model", DIM).unwrap());
            let store = Arc::new(SqliteCacheStore::open(&path, "mock-model").unwrap());
            EmbeddingEngine::new(model, store).embed("persist me").into_vector()
        };

        let model = Arc::new(MockEmbeddingModel::new("mock-model", DIM).unwrap());
        let store = Arc::new(SqliteCacheStore::open(&path, "mock-model").unwrap());
        let engine = EmbeddingEngine::new(model.clone(), store);
        let outcome = engine.embed("persist me");
        assert!(outcome.is_cached());
        assert_eq!(outcome.vector(), vector.as_slice());
        assert_eq!(model.encoded_count(), 0);
    }

    #[test]
    fn test_model_info() {
        let (_, engine) = mock_engine();
        let info = engine.model_info();
        assert_eq!(info.name, "mock-model");
        assert_eq!(info.backend, "mock");
        assert_eq!(info.dimensions, DIM);
        assert_eq!(info.cache_backend, "memory");
    }

    #[test]
    fn test_from_config_mock() {
        let config = EmbeddingConfig {
            backend: greenlight_core::config::EmbeddingBackend::Mock,
            mock_dimensions: 8,
            batch_size: 0,
            ..EmbeddingConfig::default()
        };
        let engine = EmbeddingEngine::from_config(&config, Arc::new(MemoryCacheStore::new())).unwrap();
        assert_eq!(engine.dimensions(), 8);
        assert_eq!(engine.batch_size(), 1);
    }

    #[tokio::test]
    async fn test_embed_async_matches_sync() {
        let (_, engine) = mock_engine();
        let engine = Arc::new(engine);
        let pool = WorkerPool::new(2);
        let outcome = engine.embed_async(&pool, "async text".to_string()).await;
        assert!(matches!(outcome, EmbedOutcome::Computed(_)));
        assert!(engine.embed("async text").is_cached());
    }

    #[tokio::test]
    async fn test_embed_batch_async_preserves_order() {
        let (_, engine) = mock_engine();
        let engine = Arc::new(engine);
        let pool = WorkerPool::new(2);
        let texts: Vec<String> = vec!["one".into(), "".into(), "three".into()];
        let outcomes = engine.embed_batch_async(&pool, texts, 2).await;
        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes[0].vector(), engine.embed("one").vector());
        assert!(outcomes[1].is_degraded());
        assert_eq!(outcomes[2].vector(), engine.embed("three").vector());
    }
}
