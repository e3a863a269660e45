//! Distillation Contract
//!
//! An LLM collaborator reduces a normalized snippet to a short title and
//! summary, and classifies whether the text is study material at all.
//! Concrete providers live outside this crate; [`Distiller`] is the
//! contract they implement, and [`CachingDistiller`] is the decorator the
//! router actually talks to:
//!
//! - content-hash cache lookup (a hit returns `cached = true`, no remote call)
//! - daily request budget, failing fast with `Quota`
//! - bounded retries with exponential backoff for `Timeout`/`Upstream`
//! - first-sentence / first-500-chars fallback for `Malformed`
//! - hard per-call timeout (default 30 s)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::mpsc;
use std::time::Duration;

use crate::budget::{BudgetExhausted, RequestBudget};
use crate::cache::ContentCache;
use crate::cancel::{CancelToken, Cancelled};
use crate::candidate::ConceptCandidate;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Maximum title length the contract allows
pub const MAX_TITLE_CHARS: usize = 100;

/// Summary length bounds the contract allows
pub const SUMMARY_CHARS: std::ops::RangeInclusive<usize> = 50..=500;

/// Cache key namespace for distilled concepts
const CACHE_PREFIX: &str = "distill:";

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Distillation failure modes
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum DistillError {
    /// The hard per-call timeout elapsed
    #[error("Distillation timed out after {0:?}")]
    Timeout(Duration),
    /// The daily budget is spent
    #[error("Distillation quota: {0}")]
    Quota(#[from] BudgetExhausted),
    /// The provider returned output violating the contract
    #[error("Malformed distillation output: {0}")]
    Malformed(String),
    /// The provider failed upstream
    #[error("Distillation upstream failure: {0}")]
    Upstream(String),
    /// The route was cancelled before or between attempts
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

// ============================================================================
// TYPES
// ============================================================================

/// Study-content classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Classification {
    /// Educational content worth storing
    #[default]
    Study,
    /// Ads, chrome, chatter — the caller must discard these
    NotStudy,
}

/// Raw provider output, before the decorator stamps identity fields
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Distillation {
    /// Proposed title (≤ 100 chars for study content)
    pub title: String,
    /// Proposed summary (50–500 chars for study content)
    pub summary: String,
    /// Whether this is study material
    pub classification: Classification,
}

/// A distilled concept, cached by content hash
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistilledConcept {
    /// Same id as the originating candidate
    pub concept_id: String,
    /// Title, ≤ 100 chars
    pub title: String,
    /// Summary, 50–500 chars
    pub summary: String,
    /// Content hash of the normalized source text
    pub content_hash: String,
    /// When distillation happened
    pub distilled_at: DateTime<Utc>,
    /// Whether this copy came from the cache
    pub cached: bool,
    /// Study / not-study classification
    pub classification: Classification,
}

impl DistilledConcept {
    /// Whether the caller must discard this concept.
    pub fn is_not_study(&self) -> bool {
        self.classification == Classification::NotStudy
    }

    /// The text pair embedded downstream: `title`, and `title ‖ "\n\n" ‖ summary`.
    pub fn context_text(&self) -> String {
        format!("{}\n\n{}", self.title, self.summary)
    }
}

// ============================================================================
// CONTRACT
// ============================================================================

/// The distillation collaborator contract
///
/// `distill` receives normalized text plus its content hash and returns a
/// title/summary/classification triple. Implementations may block on
/// network I/O; the decorator enforces the hard timeout around them.
pub trait Distiller: Send + Sync {
    /// Reduce normalized text to a titled summary.
    fn distill(&self, normalized_text: &str, content_hash: &str)
    -> Result<Distillation, DistillError>;
}

// ============================================================================
// RETRY POLICY
// ============================================================================

/// Retry behavior for `Timeout`/`Upstream` failures
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Backoff base; attempt n sleeps `base * 2^(n-1)`
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt)
    }
}

// ============================================================================
// CACHING DISTILLER
// ============================================================================

/// Budgeted, cached, retrying decorator over a [`Distiller`] provider
pub struct CachingDistiller {
    provider: Arc<dyn Distiller>,
    cache: Arc<ContentCache>,
    budget: Arc<RequestBudget>,
    retry: RetryPolicy,
}

impl CachingDistiller {
    /// Wrap a provider with the standard cache/budget/retry stack.
    pub fn new(
        provider: Arc<dyn Distiller>,
        cache: Arc<ContentCache>,
        budget: Arc<RequestBudget>,
    ) -> Self {
        Self {
            provider,
            cache,
            budget,
            retry: RetryPolicy::default(),
        }
    }

    /// Override the retry policy (tests use near-zero delays).
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Distill a candidate, consulting the cache first.
    pub fn distill(
        &self,
        candidate: &ConceptCandidate,
        cancel: &CancelToken,
    ) -> Result<DistilledConcept, DistillError> {
        cancel.checkpoint()?;

        let cache_key = format!("{CACHE_PREFIX}{}", candidate.content_hash);
        if let Some(bytes) = self.cache.get(&cache_key)
            && let Ok(mut concept) = serde_json::from_slice::<DistilledConcept>(&bytes)
        {
            concept.cached = true;
            concept.concept_id = candidate.candidate_id.clone();
            return Ok(concept);
        }

        let distillation = self.call_with_retries(candidate, cancel)?;
        let concept = self.finish(candidate, distillation, false);

        if let Ok(bytes) = serde_json::to_vec(&concept) {
            self.cache.set(&cache_key, bytes, None);
        }
        Ok(concept)
    }

    fn call_with_retries(
        &self,
        candidate: &ConceptCandidate,
        cancel: &CancelToken,
    ) -> Result<Distillation, DistillError> {
        let mut last_err = None;
        for attempt in 0..self.retry.max_attempts {
            cancel.checkpoint()?;
            if attempt > 0 {
                std::thread::sleep(self.retry.delay_for(attempt - 1));
            }

            self.budget
                .acquire(estimate_tokens(&candidate.normalized_text))?;

            match self.call_with_timeout(candidate) {
                Ok(distillation) => match validate(&distillation) {
                    Ok(()) => return Ok(distillation),
                    Err(reason) => {
                        tracing::warn!(
                            concept = %candidate.candidate_id,
                            %reason,
                            "malformed distillation, using lexical fallback"
                        );
                        return Ok(fallback_distillation(&candidate.normalized_text));
                    }
                },
                Err(err @ (DistillError::Timeout(_) | DistillError::Upstream(_))) => {
                    tracing::warn!(
                        concept = %candidate.candidate_id,
                        attempt,
                        error = %err,
                        "distillation attempt failed"
                    );
                    last_err = Some(err);
                }
                Err(DistillError::Malformed(reason)) => {
                    tracing::warn!(
                        concept = %candidate.candidate_id,
                        %reason,
                        "malformed distillation, using lexical fallback"
                    );
                    return Ok(fallback_distillation(&candidate.normalized_text));
                }
                Err(other) => return Err(other),
            }
        }
        Err(last_err.unwrap_or_else(|| DistillError::Upstream("no attempts made".to_string())))
    }

    /// Run the provider on a worker thread and give up after the hard timeout.
    ///
    /// A timed-out provider call keeps running on its thread until it
    /// returns; its eventual result is discarded.
    fn call_with_timeout(&self, candidate: &ConceptCandidate) -> Result<Distillation, DistillError> {
        let timeout = self.budget.request_timeout();
        let provider = Arc::clone(&self.provider);
        let text = candidate.normalized_text.clone();
        let hash = candidate.content_hash.clone();

        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let _ = tx.send(provider.distill(&text, &hash));
        });

        match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => Err(DistillError::Timeout(timeout)),
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                Err(DistillError::Upstream("provider thread died".to_string()))
            }
        }
    }

    fn finish(
        &self,
        candidate: &ConceptCandidate,
        distillation: Distillation,
        cached: bool,
    ) -> DistilledConcept {
        DistilledConcept {
            concept_id: candidate.candidate_id.clone(),
            title: distillation.title,
            summary: distillation.summary,
            content_hash: candidate.content_hash.clone(),
            distilled_at: Utc::now(),
            cached,
            classification: distillation.classification,
        }
    }
}

// ============================================================================
// CONTRACT ENFORCEMENT
// ============================================================================

fn validate(distillation: &Distillation) -> Result<(), String> {
    if distillation.classification == Classification::NotStudy {
        return Ok(());
    }
    let title_len = distillation.title.chars().count();
    if distillation.title.trim().is_empty() || title_len > MAX_TITLE_CHARS {
        return Err(format!("title length {title_len} outside 1..={MAX_TITLE_CHARS}"));
    }
    let summary_len = distillation.summary.chars().count();
    if !SUMMARY_CHARS.contains(&summary_len) {
        return Err(format!("summary length {summary_len} outside {SUMMARY_CHARS:?}"));
    }
    Ok(())
}

/// Lexical fallback: first sentence as title, first 500 chars as summary.
fn fallback_distillation(normalized_text: &str) -> Distillation {
    let first_sentence = normalized_text
        .split_inclusive(['.', '!', '?'])
        .next()
        .unwrap_or(normalized_text)
        .trim();
    let title: String = first_sentence.chars().take(MAX_TITLE_CHARS).collect();
    let summary: String = normalized_text.chars().take(500).collect();
    Distillation {
        title,
        summary,
        classification: Classification::Study,
    }
}

/// Rough token estimate for budget accounting (≈4 chars per token).
pub fn estimate_tokens(text: &str) -> u64 {
    (text.len() as u64 / 4).max(1)
}

// ============================================================================
// TESTS
// ============================================================================
