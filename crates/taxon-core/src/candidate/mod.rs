//! Concept Candidate - The validated unit of ingestion
//!
//! A [`ConceptCandidate`] is a captured snippet that survived admission:
//! normalized, quality-scored, and content-addressed. Two ids matter
//! downstream:
//!
//! - `candidate_id` — first 64 bits of `SHA-256(batchId:index:normalized)`,
//!   hex. Identical (batch, index, text) always produces the same id; this
//!   is the engine's idempotency key and per-concept fencing token.
//! - `content_hash` — `SHA-256(normalized)`, hex. The deduplication key
//!   across batches.

mod normalize;
mod quality;

pub use normalize::normalize;
pub use quality::{key_terms, quality_score};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::batch::Batch;
use crate::config::CandidateConfig;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Admission failure for a raw snippet
#[non_exhaustive]
#[derive(Debug, Clone, thiserror::Error)]
pub enum CandidateError {
    /// Nothing left after normalization
    #[error("Empty text after normalization")]
    EmptyText,
    /// Below the minimum length or word count
    #[error("Text too short: {actual} {unit}, minimum {minimum}")]
    TooShort {
        /// Observed value
        actual: usize,
        /// Configured minimum
        minimum: usize,
        /// "chars" or "words"
        unit: &'static str,
    },
    /// Above the maximum length
    #[error("Text too long: {actual} chars, maximum {maximum}")]
    TooLong {
        /// Observed length
        actual: usize,
        /// Configured maximum
        maximum: usize,
    },
    /// Quality score below the admission gate
    #[error("Quality score {score:.3} below minimum {minimum:.3}")]
    LowQuality {
        /// Computed quality score
        score: f64,
        /// Configured minimum
        minimum: f64,
    },
    /// Matched a banned content pattern
    #[error("Banned pattern: {0}")]
    BannedPattern(&'static str),
    /// Entry index outside the batch
    #[error("Batch has no entry at index {0}")]
    NoSuchEntry(usize),
}

/// Content that is never worth a candidate, whatever it scores.
const BANNED_PATTERNS: &[&str] = &[
    "lorem ipsum",
    "404 not found",
    "page not found",
    "enable javascript",
    "please enable cookies",
];

// ============================================================================
// SOURCE
// ============================================================================

/// Where a candidate came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnippetSource {
    /// Capture window label
    pub window: String,
    /// Topic label from the capture layer
    pub topic: String,
    /// Source URI, if the capture layer knew one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
}

// ============================================================================
// CONCEPT CANDIDATE
// ============================================================================

/// A validated, normalized, content-addressed snippet
///
/// Created once per `(batch, index, normalized text)` and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConceptCandidate {
    /// Deterministic id: first 64 bits of SHA-256 over `batch:index:text`
    pub candidate_id: String,
    /// The owning batch
    pub batch_id: String,
    /// Position within the batch
    pub index: usize,
    /// Raw captured text, untouched
    pub raw_text: String,
    /// Output of the normalization pipeline
    pub normalized_text: String,
    /// SHA-256 of the normalized text (cross-batch dedup key)
    pub content_hash: String,
    /// Capture provenance
    pub source: SnippetSource,
    /// When the candidate was admitted
    pub created_at: DateTime<Utc>,
    /// Optional title hint from the capture layer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title_hint: Option<String>,
    /// Most frequent content words, for folder name proposals
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub key_terms: Vec<String>,
    /// Lexical quality score in [0, 1]
    pub quality_score: f64,
}

impl ConceptCandidate {
    /// Admit a raw snippet from a batch.
    ///
    /// Runs the fixed normalization pipeline, applies every admission gate,
    /// and derives the two content-addressed ids. Fails without side
    /// effects.
    pub fn from_batch(
        batch: &Batch,
        index: usize,
        raw_text: &str,
        config: &CandidateConfig,
    ) -> Result<Self, CandidateError> {
        let normalized = normalize(raw_text);
        if normalized.is_empty() {
            return Err(CandidateError::EmptyText);
        }

        for pattern in BANNED_PATTERNS {
            if normalized.contains(pattern) {
                return Err(CandidateError::BannedPattern(pattern));
            }
        }

        let char_count = normalized.chars().count();
        if char_count < config.min_text_length {
            return Err(CandidateError::TooShort {
                actual: char_count,
                minimum: config.min_text_length,
                unit: "chars",
            });
        }
        if char_count > config.max_text_length {
            return Err(CandidateError::TooLong {
                actual: char_count,
                maximum: config.max_text_length,
            });
        }

        let word_count = normalized.split_whitespace().count();
        if word_count < config.min_word_count {
            return Err(CandidateError::TooShort {
                actual: word_count,
                minimum: config.min_word_count,
                unit: "words",
            });
        }

        let score = quality_score(&normalized, config);
        if score < config.min_quality_score {
            return Err(CandidateError::LowQuality {
                score,
                minimum: config.min_quality_score,
            });
        }

        let batch_id = batch.batch_id.to_string();
        let candidate_id = derive_candidate_id(&batch_id, index, &normalized);
        let content_hash = content_hash(&normalized);
        let key_terms = key_terms(&normalized, 5);

        Ok(Self {
            candidate_id,
            batch_id,
            index,
            raw_text: raw_text.to_string(),
            normalized_text: normalized,
            content_hash,
            source: SnippetSource {
                window: batch.window.clone(),
                topic: batch.topic.clone(),
                uri: batch
                    .entries
                    .get(index)
                    .and_then(|e| e.metadata.as_ref())
                    .and_then(|m| m.uri.clone()),
            },
            created_at: Utc::now(),
            title_hint: None,
            key_terms,
            quality_score: score,
        })
    }

    /// Admit the entry already stored at `index` in the batch.
    pub fn from_entry(
        batch: &Batch,
        index: usize,
        config: &CandidateConfig,
    ) -> Result<Self, CandidateError> {
        let entry = batch
            .entries
            .get(index)
            .ok_or(CandidateError::NoSuchEntry(index))?;
        Self::from_batch(batch, index, &entry.text, config)
    }
}

// ============================================================================
// CONTENT ADDRESSING
// ============================================================================

/// First 64 bits of `SHA-256(batch_id:index:normalized)`, lowercase hex.
pub fn derive_candidate_id(batch_id: &str, index: usize, normalized: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(batch_id.as_bytes());
    hasher.update(b":");
    hasher.update(index.to_string().as_bytes());
    hasher.update(b":");
    hasher.update(normalized.as_bytes());
    let digest = hasher.finalize();
    digest[..8].iter().map(|b| format!("{b:02x}")).collect()
}

/// Full `SHA-256(normalized)`, lowercase hex.
pub fn content_hash(normalized: &str) -> String {
    let digest = Sha256::digest(normalized.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

// ============================================================================
// TESTS
// ============================================================================
