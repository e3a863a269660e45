//! Vector Index Contract
//!
//! The engine stores concept vectors and folder centroids/exemplars in a
//! vector store reached through the [`VectorIndex`] trait. Three logical
//! collections share one dimension: **title** points, **context** points,
//! and **centroids** (which also holds exemplars as separately tagged
//! points). The store is the source of truth for placements; the engine is
//! a stateless client.
//!
//! Guarantees every backend must honor:
//! - a vector of the wrong dimension fails with [`IndexError::Dimension`]
//!   and mutates nothing
//! - search hits are sorted by similarity descending, tie-broken by the
//!   hit's primary-folder member count (descending) then concept id
//!   (ascending), so results are deterministic
//! - exemplar replacement is delete-then-insert; readers may briefly see an
//!   empty exemplar list and must tolerate it

mod memory;

pub use memory::MemoryVectorIndex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::embed::VectorEmbeddings;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Vector store failure modes
#[non_exhaustive]
#[derive(Debug, Clone, thiserror::Error)]
pub enum IndexError {
    /// A vector's length does not match the collection dimension
    #[error("Vector dimension mismatch: expected {expected}, got {got}")]
    Dimension {
        /// Collection dimension
        expected: usize,
        /// Offending vector length
        got: usize,
    },
    /// The backend is unreachable or not initialized
    #[error("Vector store connection: {0}")]
    Connection(String),
    /// A referenced point or folder does not exist
    #[error("Not found: {0}")]
    NotFound(String),
    /// Any other backend failure
    #[error("Vector store backend: {0}")]
    Backend(String),
}

/// Vector index result type
pub type Result<T> = std::result::Result<T, IndexError>;

// ============================================================================
// FOLDERS
// ============================================================================

/// A `/`-rooted sequence of path segments
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FolderPath {
    segments: Vec<String>,
}

impl FolderPath {
    /// Parse a `/`-rooted path; empty segments collapse.
    pub fn parse(path: &str) -> Self {
        Self {
            segments: path
                .split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    /// The path segments, root first.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// The final segment, if any.
    pub fn leaf(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }
}

impl std::fmt::Display for FolderPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "/{}", self.segments.join("/"))
    }
}

impl std::str::FromStr for FolderPath {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

/// A topical folder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Folder {
    /// Stable folder id
    pub folder_id: String,
    /// Position in the hierarchy
    pub path: FolderPath,
    /// When the folder was created
    pub created_at: DateTime<Utc>,
}

impl Folder {
    /// Create a folder record.
    pub fn new(folder_id: impl Into<String>, path: &str) -> Self {
        Self {
            folder_id: folder_id.into(),
            path: FolderPath::parse(path),
            created_at: Utc::now(),
        }
    }
}

// ============================================================================
// PLACEMENT
// ============================================================================

/// Where a concept lives: one owning folder plus cross-references
///
/// `primary_folder_id = None` parks the concept in the unsorted pool.
/// Construction enforces the invariants: the primary never appears among
/// the references, and every confidence is clamped into [0, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConceptPlacement {
    /// The placed concept
    pub concept_id: String,
    /// Owning folder, or `None` for unsorted
    pub primary_folder_id: Option<String>,
    /// Cross-reference folders, disjoint from the primary
    pub reference_folder_ids: Vec<String>,
    /// Per-folder placement confidence in [0, 1]
    pub placement_confidences: BTreeMap<String, f64>,
}

impl ConceptPlacement {
    /// Build a placement, enforcing the invariants.
    pub fn new(
        concept_id: impl Into<String>,
        primary_folder_id: Option<String>,
        mut reference_folder_ids: Vec<String>,
        placement_confidences: BTreeMap<String, f64>,
    ) -> Self {
        if let Some(primary) = &primary_folder_id {
            reference_folder_ids.retain(|folder| folder != primary);
        }
        reference_folder_ids.dedup();
        let placement_confidences = placement_confidences
            .into_iter()
            .map(|(folder, confidence)| (folder, confidence.clamp(0.0, 1.0)))
            .collect();
        Self {
            concept_id: concept_id.into(),
            primary_folder_id,
            reference_folder_ids,
            placement_confidences,
        }
    }

    /// An unsorted placement with no folder links.
    pub fn unsorted(concept_id: impl Into<String>) -> Self {
        Self::new(concept_id, None, Vec::new(), BTreeMap::new())
    }
}

// ============================================================================
// PAYLOAD & QUERY TYPES
// ============================================================================

/// Payload stored alongside each point, wire-exact
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PointPayload {
    /// Concept id
    pub concept_id: String,
    /// Id the concept was first admitted under
    pub original_id: String,
    /// Owning folder, or null for unsorted
    pub primary_folder: Option<String>,
    /// Cross-reference folders
    pub reference_folders: Vec<String>,
    /// Per-folder confidence
    pub placement_confidences: BTreeMap<String, f64>,
    /// Legacy singleton folder field, kept readable for old stores
    pub folder_id: Option<String>,
    /// Content hash of the concept
    pub content_hash: String,
    /// Embedding model
    pub model: String,
    /// When the vectors were produced
    pub embedded_at: DateTime<Utc>,
}

impl PointPayload {
    /// Assemble the payload written at upsert time.
    pub fn from_parts(embeddings: &VectorEmbeddings, placement: &ConceptPlacement) -> Self {
        Self {
            concept_id: placement.concept_id.clone(),
            original_id: placement.concept_id.clone(),
            primary_folder: placement.primary_folder_id.clone(),
            reference_folders: placement.reference_folder_ids.clone(),
            placement_confidences: placement.placement_confidences.clone(),
            folder_id: placement.primary_folder_id.clone(),
            content_hash: embeddings.content_hash.clone(),
            model: embeddings.model.clone(),
            embedded_at: embeddings.embedded_at,
        }
    }
}

/// Similarity search request
#[derive(Debug, Clone)]
pub struct SearchQuery {
    /// Query vector (collection dimension)
    pub vector: Vec<f32>,
    /// Minimum similarity for a hit
    pub threshold: f32,
    /// Maximum hits returned
    pub limit: usize,
}

/// One similarity search hit
#[derive(Debug, Clone)]
pub struct SearchHit {
    /// The matched concept
    pub concept_id: String,
    /// Similarity in [threshold, 1]
    pub similarity: f32,
    /// The point's stored payload
    pub payload: PointPayload,
}

/// Membership query result
#[derive(Debug, Clone)]
pub struct FolderMember {
    /// The member concept
    pub concept_id: String,
    /// Always 1.0 for membership queries
    pub similarity: f32,
    /// Whether the folder is the concept's primary
    pub is_primary: bool,
}

/// Stored vector state of a folder
#[derive(Debug, Clone)]
pub struct FolderVectorData {
    /// Unit-norm centroid
    pub centroid: Vec<f32>,
    /// Current exemplar set (possibly mid-replacement and empty)
    pub exemplars: Vec<Vec<f32>>,
    /// Number of concepts whose primary is this folder
    pub member_count: usize,
    /// Last centroid write
    pub last_updated: DateTime<Utc>,
}

// ============================================================================
// CONTRACT
// ============================================================================

/// The vector store contract (see module docs for the guarantees)
pub trait VectorIndex: Send + Sync {
    /// Create the collections if missing.
    fn initialize(&self) -> Result<()>;

    /// Whether the backend is reachable and the collections exist.
    fn is_ready(&self) -> bool;

    /// Write the title and context points for a concept.
    ///
    /// Atomicity is per-collection; callers treat the operation as
    /// successful only once it returns `Ok`.
    fn upsert(
        &self,
        concept_id: &str,
        embeddings: &VectorEmbeddings,
        placement: &ConceptPlacement,
    ) -> Result<()>;

    /// Similarity search over title points.
    fn search_by_title(&self, query: &SearchQuery) -> Result<Vec<SearchHit>>;

    /// Similarity search over context points.
    fn search_by_context(&self, query: &SearchQuery) -> Result<Vec<SearchHit>>;

    /// Members of a folder; with `include_references`, cross-referenced
    /// concepts too.
    fn search_by_folder(&self, folder_id: &str, include_references: bool)
    -> Result<Vec<FolderMember>>;

    /// Every folder id reachable from stored payloads (primary, reference,
    /// or legacy singleton).
    fn all_folder_ids(&self) -> Result<BTreeSet<String>>;

    /// Write a folder centroid.
    fn set_folder_centroid(&self, folder_id: &str, vector: &[f32]) -> Result<()>;

    /// Replace a folder's exemplars (delete-then-insert).
    fn set_folder_exemplars(&self, folder_id: &str, vectors: &[Vec<f32>]) -> Result<()>;

    /// A folder's stored centroid/exemplar state, if any.
    fn folder_vector_data(&self, folder_id: &str) -> Result<Option<FolderVectorData>>;

    /// Remove a concept's points. Idempotent.
    fn delete(&self, concept_id: &str) -> Result<()>;
}

// ============================================================================
// TESTS
// ============================================================================
