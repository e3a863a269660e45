//! Configuration Records
//!
//! Every tunable of the engine lives here as a typed record. The loosely
//! typed option bags of earlier prototypes are gone: each section is a
//! struct with serde camelCase field names and `deny_unknown_fields`, so a
//! config document with a misspelled or unknown key is rejected at parse
//! time instead of being silently ignored.
//!
//! Sections:
//! - [`CandidateConfig`] — input admission and quality scoring
//! - [`RoutingConfig`] — decision gates and folder scoring weights
//! - [`ContextConfig`] — folder-context filtering
//! - [`CentroidConfig`] — centroid/exemplar lifecycle
//! - [`CacheConfig`] — content cache
//! - [`BudgetConfig`] — LLM throttling
//! - [`Sm2Config`] — spaced-repetition scheduler

use serde::{Deserialize, Serialize};

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Configuration validation error
#[non_exhaustive]
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// A threshold or weight is outside its legal range
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue {
        /// The offending field, camelCase as in the config document
        field: &'static str,
        /// Why the value was rejected
        reason: String,
    },
    /// Two fields are individually legal but mutually inconsistent
    #[error("Inconsistent configuration: {0}")]
    Inconsistent(String),
}

// ============================================================================
// CANDIDATE ADMISSION
// ============================================================================

/// Input admission and quality scoring for concept candidates
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CandidateConfig {
    /// Minimum normalized text length (characters)
    pub min_text_length: usize,
    /// Maximum normalized text length (characters)
    pub max_text_length: usize,
    /// Minimum word count after normalization
    pub min_word_count: usize,
    /// Minimum quality score for admission (0.0 to 1.0)
    pub min_quality_score: f64,
    /// Weight of the unique-word ratio in the quality score
    pub uniqueness_weight: f64,
    /// Weight of the average-word-length score in the quality score
    pub length_weight: f64,
    /// Average word length that maps to a length score of 1.0
    pub avg_word_length_normalization: f64,
    /// Quality score assigned to texts below the minimum word count
    pub short_text_quality_score: f64,
}

impl Default for CandidateConfig {
    fn default() -> Self {
        Self {
            min_text_length: 15,
            max_text_length: 5000,
            min_word_count: 3,
            min_quality_score: 0.3,
            uniqueness_weight: 0.6,
            length_weight: 0.4,
            avg_word_length_normalization: 7.0,
            short_text_quality_score: 0.2,
        }
    }
}

// ============================================================================
// ROUTING GATES
// ============================================================================

/// Decision gates and folder scoring weights for the router
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RoutingConfig {
    /// Score at or above which a candidate is routed without review
    pub high_confidence_threshold: f64,
    /// Score below which folder creation / unsorted handling kicks in
    pub low_confidence_threshold: f64,
    /// Title similarity at or above which a candidate is a duplicate
    pub dup_high_threshold: f64,
    /// Folder score at or above which a cross-reference is recorded
    pub reference_threshold: f64,
    /// Weight of centroid similarity in the folder score
    pub centroid_weight: f64,
    /// Weight of best-exemplar similarity in the folder score
    pub exemplar_weight: f64,
    /// Weight of best-member similarity in the folder score
    pub member_weight: f64,
    /// Single-link clustering threshold for unsorted batch items
    pub cluster_tau: f64,
    /// Minimum cluster size that produces a folder suggestion
    pub min_cluster_size: usize,
    /// Maximum concurrently routed candidates in batch mode
    pub batch_concurrency: usize,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            high_confidence_threshold: 0.82,
            low_confidence_threshold: 0.65,
            dup_high_threshold: 0.9,
            reference_threshold: 0.7,
            centroid_weight: 0.5,
            exemplar_weight: 0.3,
            member_weight: 0.2,
            cluster_tau: 0.75,
            min_cluster_size: 3,
            batch_concurrency: 4,
        }
    }
}

// ============================================================================
// CONTEXT FILTERING
// ============================================================================

/// Folder-context filtering knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ContextConfig {
    /// Whether low-confidence candidates may create new folders
    pub enable_folder_creation: bool,
    /// Folder count below which the system is considered "growing"
    pub growing_cap: usize,
    /// Maximum folders entering the scoring context when mature
    pub max_context_folders: usize,
    /// Token estimate reserved per context folder
    pub token_estimate_per_folder: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            enable_folder_creation: true,
            growing_cap: 10,
            max_context_folders: 20,
            token_estimate_per_folder: 200,
        }
    }
}

// ============================================================================
// CENTROIDS
// ============================================================================

/// Exemplar selection strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExemplarStrategy {
    /// Members closest to the centroid
    Medoid,
    /// Members farthest from the centroid
    Boundary,
    /// Greedy max-min spread over already chosen exemplars
    Diverse,
    /// 40% medoid + 30% boundary + remainder diverse, deduplicated
    #[default]
    Hybrid,
}

impl ExemplarStrategy {
    /// String name used in config documents
    pub fn as_str(&self) -> &'static str {
        match self {
            ExemplarStrategy::Medoid => "medoid",
            ExemplarStrategy::Boundary => "boundary",
            ExemplarStrategy::Diverse => "diverse",
            ExemplarStrategy::Hybrid => "hybrid",
        }
    }
}

impl std::fmt::Display for ExemplarStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Similarity metric for centroid comparisons
///
/// All vectors in the system are unit-norm, so cosine and dot coincide;
/// euclidean is kept for parity with backends that only expose distance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SimilarityMetric {
    /// Cosine similarity
    #[default]
    Cosine,
    /// Euclidean distance mapped to a similarity
    Euclidean,
    /// Raw dot product
    Dot,
}

/// Centroid/exemplar lifecycle knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CentroidConfig {
    /// Number of exemplars kept per folder
    pub default_exemplar_count: usize,
    /// Exemplar selection strategy
    pub exemplar_strategy: ExemplarStrategy,
    /// Weight of the best exemplar in folder similarity (vs the centroid)
    pub exemplar_weight: f64,
    /// Membership-delta size at which incremental update gives way to full recompute
    pub incremental_update_threshold: usize,
    /// Days after which a centroid is considered stale
    pub stale_threshold_days: i64,
    /// Folder ids per processing group in batch updates
    pub batch_size: usize,
    /// Maximum concurrent centroid updates
    pub parallel_updates: usize,
    /// Minimum similarity for a folder to be considered related
    pub min_folder_similarity: f64,
    /// Similarity metric for folder comparisons
    pub similarity_metric: SimilarityMetric,
}

impl Default for CentroidConfig {
    fn default() -> Self {
        Self {
            default_exemplar_count: 5,
            exemplar_strategy: ExemplarStrategy::Hybrid,
            exemplar_weight: 0.3,
            incremental_update_threshold: 10,
            stale_threshold_days: 7,
            batch_size: 16,
            parallel_updates: 4,
            min_folder_similarity: 0.5,
            similarity_metric: SimilarityMetric::Cosine,
        }
    }
}

// ============================================================================
// CONTENT CACHE
// ============================================================================

/// Content cache sizing and lifetimes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CacheConfig {
    /// Whether the cache is active at all
    pub enabled: bool,
    /// Maximum number of entries before LRU eviction
    pub max_size: usize,
    /// Default entry time-to-live in seconds
    pub default_ttl_secs: u64,
    /// Interval between background expiry sweeps in seconds
    pub cleanup_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size: 1000,
            default_ttl_secs: 86_400,
            cleanup_interval_secs: 300,
        }
    }
}

// ============================================================================
// LLM THROTTLING
// ============================================================================

/// Daily budgets and timeouts for the distillation/embedding collaborators
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BudgetConfig {
    /// Tokens the engine may spend per UTC day
    pub daily_token_budget: u64,
    /// Remote requests the engine may issue per UTC day
    pub daily_request_limit: u64,
    /// Hard per-call timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            daily_token_budget: 100_000,
            daily_request_limit: 1000,
            request_timeout_secs: 30,
        }
    }
}

// ============================================================================
// SCHEDULER
// ============================================================================

/// SM-2 scheduler parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Sm2Config {
    /// Ease factor assigned to new schedules
    pub initial_ease_factor: f64,
    /// Floor below which the ease factor never drops
    pub min_ease_factor: f64,
    /// Interval in days at which a schedule becomes mature
    pub mature_interval_days: i64,
}

impl Default for Sm2Config {
    fn default() -> Self {
        Self {
            initial_ease_factor: 2.5,
            min_ease_factor: 1.3,
            mature_interval_days: 21,
        }
    }
}

// ============================================================================
// ENGINE CONFIG
// ============================================================================

/// Complete engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EngineConfig {
    /// Input admission and quality scoring
    #[serde(default)]
    pub candidate: CandidateConfig,
    /// Decision gates and scoring weights
    #[serde(default)]
    pub routing: RoutingConfig,
    /// Folder-context filtering
    #[serde(default)]
    pub context: ContextConfig,
    /// Centroid/exemplar lifecycle
    #[serde(default)]
    pub centroid: CentroidConfig,
    /// Embedding dimension shared by every collection
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,
    /// Content cache
    #[serde(default)]
    pub cache: CacheConfig,
    /// LLM throttling
    #[serde(default)]
    pub budget: BudgetConfig,
    /// Spaced-repetition parameters
    #[serde(default)]
    pub sm2: Sm2Config,
}

fn default_dimensions() -> usize {
    DEFAULT_DIMENSIONS
}

/// Default embedding dimension when none is configured
pub const DEFAULT_DIMENSIONS: usize = 256;

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            candidate: CandidateConfig::default(),
            routing: RoutingConfig::default(),
            context: ContextConfig::default(),
            centroid: CentroidConfig::default(),
            dimensions: DEFAULT_DIMENSIONS,
            cache: CacheConfig::default(),
            budget: BudgetConfig::default(),
            sm2: Sm2Config::default(),
        }
    }
}

impl EngineConfig {
    /// Check cross-field consistency
    ///
    /// Serde catches unknown keys; this pass catches values that are
    /// individually parseable but jointly nonsensical.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dimensions == 0 {
            return Err(ConfigError::InvalidValue {
                field: "dimensions",
                reason: "must be positive".to_string(),
            });
        }
        if self.candidate.min_text_length > self.candidate.max_text_length {
            return Err(ConfigError::Inconsistent(format!(
                "minTextLength {} exceeds maxTextLength {}",
                self.candidate.min_text_length, self.candidate.max_text_length
            )));
        }
        for (field, value) in [
            (
                "highConfidenceThreshold",
                self.routing.high_confidence_threshold,
            ),
            (
                "lowConfidenceThreshold",
                self.routing.low_confidence_threshold,
            ),
            ("dupHighThreshold", self.routing.dup_high_threshold),
            ("referenceThreshold", self.routing.reference_threshold),
            ("clusterTau", self.routing.cluster_tau),
            ("minQualityScore", self.candidate.min_quality_score),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidValue {
                    field,
                    reason: format!("{value} is outside [0, 1]"),
                });
            }
        }
        if self.routing.low_confidence_threshold >= self.routing.high_confidence_threshold {
            return Err(ConfigError::Inconsistent(format!(
                "lowConfidenceThreshold {} must be below highConfidenceThreshold {}",
                self.routing.low_confidence_threshold, self.routing.high_confidence_threshold
            )));
        }
        let weight_sum = self.routing.centroid_weight
            + self.routing.exemplar_weight
            + self.routing.member_weight;
        if (weight_sum - 1.0).abs() > 1e-6 {
            return Err(ConfigError::Inconsistent(format!(
                "folder score weights must sum to 1, got {weight_sum}"
            )));
        }
        if self.routing.centroid_weight < 0.0
            || self.routing.exemplar_weight < 0.0
            || self.routing.member_weight < 0.0
        {
            return Err(ConfigError::Inconsistent(
                "folder score weights must be non-negative".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.centroid.exemplar_weight) {
            return Err(ConfigError::InvalidValue {
                field: "exemplarWeight",
                reason: format!("{} is outside [0, 1]", self.centroid.exemplar_weight),
            });
        }
        if self.centroid.parallel_updates == 0 || self.centroid.batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "parallelUpdates",
                reason: "batchSize and parallelUpdates must be positive".to_string(),
            });
        }
        if self.routing.batch_concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                field: "batchConcurrency",
                reason: "must be positive".to_string(),
            });
        }
        if self.sm2.min_ease_factor < 1.0 || self.sm2.initial_ease_factor < self.sm2.min_ease_factor
        {
            return Err(ConfigError::Inconsistent(format!(
                "initialEaseFactor {} must be at least minEaseFactor {}",
                self.sm2.initial_ease_factor, self.sm2.min_ease_factor
            )));
        }
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
