//! Embedding Contract
//!
//! An embedding collaborator turns a distilled concept into two unit-norm
//! vectors of the configured dimension: a title vector (title alone) and a
//! context vector (title + summary). Concrete providers live outside this
//! crate; [`TextEmbedder`] is the single-text contract they implement and
//! [`CachingEmbedder`] composes the concept-level [`VectorEmbeddings`],
//! consulting the content-hash cache first so identical inputs come back
//! bitwise identical.

mod math;

pub use math::{
    cosine_similarity, dot_product, euclidean_distance, is_unit_norm, l2_norm, normalize,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::budget::{BudgetExhausted, RequestBudget};
use crate::cache::ContentCache;
use crate::cancel::{CancelToken, Cancelled};
use crate::distill::{DistilledConcept, estimate_tokens};

// ============================================================================
// CONSTANTS
// ============================================================================

/// Unit-norm tolerance for vectors returned by providers
pub const UNIT_NORM_EPSILON: f64 = 1e-6;

/// Cache key namespace for concept embeddings
const CACHE_PREFIX: &str = "embed:";

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Embedding failure modes
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    /// The provider failed upstream
    #[error("Embedding upstream failure: {0}")]
    Upstream(String),
    /// The daily budget is spent
    #[error("Embedding quota: {0}")]
    Quota(#[from] BudgetExhausted),
    /// The provider returned a vector of the wrong dimension
    #[error("Embedding dimension mismatch: expected {expected}, got {got}")]
    Dimension {
        /// Configured dimension
        expected: usize,
        /// Returned dimension
        got: usize,
    },
    /// The route was cancelled
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

// ============================================================================
// TYPES
// ============================================================================

/// Title and context vectors for one concept
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorEmbeddings {
    /// Unit-norm vector over the title alone
    pub title_vector: Vec<f32>,
    /// Unit-norm vector over `title ‖ "\n\n" ‖ summary`
    pub context_vector: Vec<f32>,
    /// Shared dimension of both vectors
    pub dimensions: usize,
    /// Content hash of the source concept
    pub content_hash: String,
    /// Model that produced the vectors
    pub model: String,
    /// When embedding happened
    pub embedded_at: DateTime<Utc>,
}

// ============================================================================
// CONTRACT
// ============================================================================

/// The embedding collaborator contract
///
/// Implementations embed one text at a time; the decorator derives the
/// title/context pair, checks dimensions, and renormalizes against provider
/// drift (remote providers may differ by < ε between calls).
pub trait TextEmbedder: Send + Sync {
    /// Embed a single text.
    fn embed_text(&self, text: &str) -> Result<Vec<f32>, EmbedError>;

    /// The fixed output dimension.
    fn dimensions(&self) -> usize;

    /// Identifier of the backing model.
    fn model_name(&self) -> &str;
}

// ============================================================================
// CACHING EMBEDDER
// ============================================================================

/// Budgeted, cached decorator over a [`TextEmbedder`] provider
pub struct CachingEmbedder {
    provider: Arc<dyn TextEmbedder>,
    cache: Arc<ContentCache>,
    budget: Arc<RequestBudget>,
    retry: crate::distill::RetryPolicy,
}

impl CachingEmbedder {
    /// Wrap a provider with the standard cache/budget/retry stack.
    pub fn new(
        provider: Arc<dyn TextEmbedder>,
        cache: Arc<ContentCache>,
        budget: Arc<RequestBudget>,
    ) -> Self {
        Self {
            provider,
            cache,
            budget,
            retry: crate::distill::RetryPolicy::default(),
        }
    }

    /// Override the retry policy (tests use near-zero delays).
    pub fn with_retry(mut self, retry: crate::distill::RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The fixed output dimension of the wrapped provider.
    pub fn dimensions(&self) -> usize {
        self.provider.dimensions()
    }

    /// Embed a distilled concept, consulting the cache first.
    ///
    /// Cache hits are deserialized verbatim, so identical inputs produce
    /// bitwise-identical vectors.
    pub fn embed(
        &self,
        concept: &DistilledConcept,
        cancel: &CancelToken,
    ) -> Result<VectorEmbeddings, EmbedError> {
        cancel.checkpoint()?;

        let cache_key = format!("{CACHE_PREFIX}{}", concept.content_hash);
        if let Some(bytes) = self.cache.get(&cache_key)
            && let Ok(embeddings) = serde_json::from_slice::<VectorEmbeddings>(&bytes)
            && embeddings.dimensions == self.provider.dimensions()
        {
            return Ok(embeddings);
        }

        let context_text = concept.context_text();
        self.budget
            .acquire_tokens(estimate_tokens(&concept.title) + estimate_tokens(&context_text))?;

        let title_vector = self.embed_one(&concept.title, cancel)?;
        let context_vector = self.embed_one(&context_text, cancel)?;

        let embeddings = VectorEmbeddings {
            title_vector,
            context_vector,
            dimensions: self.provider.dimensions(),
            content_hash: concept.content_hash.clone(),
            model: self.provider.model_name().to_string(),
            embedded_at: Utc::now(),
        };

        if let Ok(bytes) = serde_json::to_vec(&embeddings) {
            self.cache.set(&cache_key, bytes, None);
        }
        Ok(embeddings)
    }

    /// Cache-only lookup by content hash; never calls the provider.
    pub fn cached(&self, content_hash: &str) -> Option<VectorEmbeddings> {
        let bytes = self.cache.get(&format!("{CACHE_PREFIX}{content_hash}"))?;
        serde_json::from_slice(&bytes).ok()
    }

    fn embed_one(&self, text: &str, cancel: &CancelToken) -> Result<Vec<f32>, EmbedError> {
        let mut last_err = None;
        for attempt in 0..self.retry.max_attempts {
            cancel.checkpoint()?;
            if attempt > 0 {
                std::thread::sleep(self.retry.base_delay * 2u32.saturating_pow(attempt - 1));
            }
            match self.provider.embed_text(text) {
                Ok(mut vector) => {
                    let expected = self.provider.dimensions();
                    if vector.len() != expected {
                        return Err(EmbedError::Dimension {
                            expected,
                            got: vector.len(),
                        });
                    }
                    // Providers drift below ε; pin the invariant here.
                    normalize(&mut vector);
                    return Ok(vector);
                }
                Err(err @ EmbedError::Upstream(_)) => {
                    tracing::warn!(attempt, error = %err, "embedding attempt failed");
                    last_err = Some(err);
                }
                Err(other) => return Err(other),
            }
        }
        Err(last_err.unwrap_or_else(|| EmbedError::Upstream("no attempts made".to_string())))
    }
}

// ============================================================================
// TESTS
// ============================================================================
