//! # Taxon Core
//!
//! Concept routing engine for self-organizing study notes. Raw text
//! snippets (typically OCR'd study material) are validated, distilled into
//! title/summary concepts, embedded, and routed into a self-growing
//! hierarchy of topical folders — each distinct idea stored exactly once,
//! cross-referenced where it belongs in more than one place, and scheduled
//! for SM-2 spaced-repetition review.
//!
//! - **Content addressing**: candidate ids are the first 64 bits of
//!   `SHA-256(batch:index:normalized text)`; content hashes deduplicate
//!   across batches
//! - **SmartRouter pipeline**: distill → embed → duplicate check → folder
//!   context → score → decide → commit → schedule, with writes confined to
//!   the commit stage
//! - **Vector index contract**: title/context/centroid collections behind a
//!   trait, with an exact-scan in-memory reference backend
//! - **Centroid manager**: incremental unit-norm centroids, four exemplar
//!   strategies, quality scoring, token-budgeted folder context
//! - **SM-2 scheduler**: crash-safe file-per-schedule persistence and due
//!   queries
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use taxon_core::prelude::*;
//!
//! let mut batch = Batch::new("Linear Algebra - PDF", "linear-algebra");
//! batch.push_entry("Eigenvalues: for square matrix A, Av = λv iff v is an eigenvector.");
//!
//! let candidate = ConceptCandidate::from_entry(&batch, 0, &config.candidate)?;
//! let decision = router.route(&candidate, &CancelToken::new())?;
//! match decision.action {
//!     RoutingAction::Route => println!("→ {}", decision.folder_id.unwrap()),
//!     RoutingAction::CreateFolder => println!("new {}", decision.new_folder.unwrap().path),
//!     _ => {}
//! }
//! ```

#![warn(rustdoc::missing_crate_level_docs)]

// ============================================================================
// MODULES
// ============================================================================

pub mod batch;
pub mod budget;
pub mod cache;
pub mod cancel;
pub mod candidate;
pub mod centroid;
pub mod config;
pub mod distill;
pub mod embed;
pub mod index;
pub mod router;
pub mod scheduler;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

// Capture boundary
pub use batch::{Batch, BatchEntry, EntryMetadata};

// Budgeting and cancellation
pub use budget::{BudgetExhausted, BudgetUsage, RequestBudget};
pub use cancel::{CancelToken, Cancelled};

// Content cache
pub use cache::{CacheStats, ContentCache};

// Candidates
pub use candidate::{
    CandidateError, ConceptCandidate, SnippetSource, content_hash, derive_candidate_id, key_terms,
    normalize, quality_score,
};

// Centroids
pub use centroid::{
    CentroidError, CentroidManager, CentroidQuality, CentroidUpdate, FolderCentroid,
    FolderContext, FolderContextEntry, MemberSample, MemberVector, RedundantPair, SystemState,
    select_exemplars,
};

// Configuration
pub use config::{
    BudgetConfig, CacheConfig, CandidateConfig, CentroidConfig, ConfigError, ContextConfig,
    DEFAULT_DIMENSIONS, EngineConfig, ExemplarStrategy, RoutingConfig, SimilarityMetric,
    Sm2Config,
};

// Distillation contract
pub use distill::{
    CachingDistiller, Classification, DistillError, Distillation, DistilledConcept, Distiller,
    MAX_TITLE_CHARS, RetryPolicy, estimate_tokens,
};

// Embedding contract
pub use embed::{
    CachingEmbedder, EmbedError, TextEmbedder, UNIT_NORM_EPSILON, VectorEmbeddings,
    cosine_similarity, dot_product, euclidean_distance, is_unit_norm, l2_norm, normalize as normalize_vector,
};

// Vector index contract
pub use index::{
    ConceptPlacement, Folder, FolderMember, FolderPath, FolderVectorData, IndexError,
    MemoryVectorIndex, PointPayload, SearchHit, SearchQuery, VectorIndex,
};

// Router
pub use router::{
    BatchDecision, BatchRoutingResult, ConceptCluster, IngestReport, NewFolder, RouteError,
    RoutingAction, RoutingDecision, RoutingExplanation, SmartRouter, StageError, SuggestedFolder,
};

// Scheduler
pub use scheduler::{
    BulkOptions, BulkScheduleReport, DueQuery, PreviewIntervals, ReviewPlan, ReviewQuality,
    ReviewRecord, ReviewSchedule, ReviewScheduler, ReviewStatus, ScheduleError, ScheduleStore,
    SchedulerHealth, SchedulerStats, Sm2Parameters, apply_review,
};

// ============================================================================
// VERSION INFO
// ============================================================================

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// PRELUDE
// ============================================================================

/// Convenient imports for common usage
pub mod prelude {
    pub use crate::{
        Batch, CachingDistiller, CachingEmbedder, CancelToken, CentroidManager, ConceptCandidate,
        ConceptPlacement, ContentCache, EngineConfig, MemoryVectorIndex, RequestBudget,
        ReviewQuality, ReviewScheduler, RoutingAction, RoutingDecision, SmartRouter, SystemState,
        VectorIndex,
    };
}
