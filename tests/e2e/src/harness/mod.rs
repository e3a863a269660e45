//! Engine Harness
//!
//! Builds a complete engine (router + collaborators + in-memory index +
//! file-backed scheduler) over a temp directory, wired to the lexicon
//! mocks. Every journey talks to the engine exactly the way production
//! callers do: admit a candidate, route it, inspect the decision.

use std::sync::Arc;

use taxon_core::{
    Batch, BudgetConfig, CachingDistiller, CachingEmbedder, CancelToken, CentroidManager,
    ConceptCandidate, ContentCache, EngineConfig, MemoryVectorIndex, RequestBudget, RetryPolicy,
    ReviewScheduler, RouteError, RoutingDecision, SmartRouter, VectorIndex,
};
use tempfile::TempDir;

use crate::mocks::{CallCounts, LexiconDistiller, LexiconEmbedder, MOCK_DIMENSIONS};

/// Engine configuration tuned to the lexicon mocks' similarity geometry.
pub fn e2e_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.dimensions = MOCK_DIMENSIONS;
    config.routing.high_confidence_threshold = 0.68;
    config.routing.low_confidence_threshold = 0.5;
    config.routing.dup_high_threshold = 0.85;
    config.routing.reference_threshold = 0.45;
    // Serial batches keep journey assertions deterministic.
    config.routing.batch_concurrency = 1;
    // No background sweeper threads inside tests.
    config.cache.cleanup_interval_secs = 0;
    config
}

/// A fully wired engine over temp storage
pub struct EngineHarness {
    /// The router under test
    pub router: SmartRouter,
    /// Upstream call counters shared with the mocks
    pub counts: Arc<CallCounts>,
    batch: Batch,
    _dir: TempDir,
}

impl EngineHarness {
    /// Engine with the standard e2e configuration and a generous budget.
    pub fn new() -> Self {
        Self::with(e2e_config(), BudgetConfig::default())
    }

    /// Engine with explicit configuration and budget.
    pub fn with(config: EngineConfig, budget_config: BudgetConfig) -> Self {
        config.validate().expect("e2e config must be valid");
        let dir = TempDir::new().expect("temp dir");
        let counts = Arc::new(CallCounts::default());

        let cache = Arc::new(ContentCache::new(&config.cache));
        let budget = Arc::new(RequestBudget::new(budget_config));
        let distiller = Arc::new(
            CachingDistiller::new(
                Arc::new(LexiconDistiller::new(Arc::clone(&counts))),
                Arc::clone(&cache),
                Arc::clone(&budget),
            )
            .with_retry(RetryPolicy {
                max_attempts: 2,
                base_delay: std::time::Duration::from_millis(1),
            }),
        );
        let embedder = Arc::new(CachingEmbedder::new(
            Arc::new(LexiconEmbedder::new(Arc::clone(&counts))),
            Arc::clone(&cache),
            Arc::clone(&budget),
        ));
        let index: Arc<dyn VectorIndex> = Arc::new(MemoryVectorIndex::new(config.dimensions));
        let centroids = Arc::new(
            CentroidManager::new(Arc::clone(&index), config.centroid.clone(), config.dimensions)
                .expect("centroid manager"),
        );
        let scheduler = Arc::new(
            ReviewScheduler::new(Some(dir.path().join("schedules")), config.sm2.clone())
                .expect("scheduler"),
        );
        let router = SmartRouter::new(
            distiller,
            embedder,
            index,
            centroids,
            scheduler,
            budget,
            config,
        )
        .expect("router");

        Self {
            router,
            counts,
            batch: Batch::new("Study Session", "study"),
            _dir: dir,
        }
    }

    /// Admit a snippet as the next entry of the harness batch.
    pub fn candidate(&mut self, text: &str) -> ConceptCandidate {
        let index = self.batch.push_entry(text);
        ConceptCandidate::from_entry(&self.batch, index, &self.router.config().candidate)
            .expect("candidate admission")
    }

    /// Route a snippet, waiting for background centroid work to land.
    pub fn route_text(&mut self, text: &str) -> RoutingDecision {
        self.try_route_text(text).expect("route")
    }

    /// Route a snippet, surfacing stage errors.
    pub fn try_route_text(&mut self, text: &str) -> Result<RoutingDecision, RouteError> {
        let candidate = self.candidate(text);
        let decision = self.router.route(&candidate, &CancelToken::new())?;
        self.router.flush_centroid_updates();
        Ok(decision)
    }
}

impl Default for EngineHarness {
    fn default() -> Self {
        Self::new()
    }
}
