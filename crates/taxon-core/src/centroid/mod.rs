//! Centroid Manager
//!
//! Per-folder statistics over member context vectors: the unit-norm
//! centroid, a small exemplar set, and a quality score. The vector store
//! is the source of truth; this manager keeps a bounded cache in front of
//! it plus the member-vector registry that makes incremental updates and
//! context sampling exact.
//!
//! Numeric rules (shared with [`crate::embed`]): sums accumulate in f64,
//! renormalization only when the magnitude is positive, similarity is the
//! dot product on unit vectors.
//!
//! Concurrency: updates are serialized per folder; different folders update
//! in parallel up to the configured `parallel_updates`.

mod exemplars;

pub use exemplars::{MemberVector, select_exemplars};

use chrono::{DateTime, Duration, Utc};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use crate::config::{CentroidConfig, ContextConfig, SimilarityMetric};
use crate::embed::{dot_product, euclidean_distance, normalize};
use crate::index::{IndexError, VectorIndex};

// ============================================================================
// CONSTANTS
// ============================================================================

/// Bounded size of the in-memory centroid cache
const CENTROID_CACHE_SIZE: usize = 256;

/// Rough tokens consumed per member sample in a folder context
const TOKENS_PER_SAMPLE: usize = 20;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Centroid maintenance failure modes
#[non_exhaustive]
#[derive(Debug, Clone, thiserror::Error)]
pub enum CentroidError {
    /// The vector store failed underneath
    #[error(transparent)]
    Index(#[from] IndexError),
    /// Internal state was poisoned
    #[error("Centroid state error: {0}")]
    State(String),
}

/// Centroid result type
pub type Result<T> = std::result::Result<T, CentroidError>;

// ============================================================================
// TYPES
// ============================================================================

/// System growth phase, which controls how many folders enter scoring
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemState {
    /// No folders exist yet
    Bootstrap,
    /// Fewer folders than the growing cap
    Growing,
    /// Full folder population
    Mature,
}

impl SystemState {
    /// String name used on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            SystemState::Bootstrap => "bootstrap",
            SystemState::Growing => "growing",
            SystemState::Mature => "mature",
        }
    }
}

impl std::fmt::Display for SystemState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Quality of a folder centroid, each component in [0, 1]
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CentroidQuality {
    /// Mean member-to-centroid similarity
    pub cohesion: f64,
    /// Separation from other folders (stubbed until a folder-pair cache
    /// exists: `max(0.2, 1 - cohesion)`)
    pub separation: f64,
    /// Freshness: `max(0.5, 1 - days_since_update / stale_days)`
    pub stability: f64,
    /// `0.5·cohesion + 0.3·separation + 0.2·stability`
    pub overall: f64,
}

impl CentroidQuality {
    /// The no-quality score reported for empty folders.
    pub fn empty_folder() -> Self {
        Self {
            cohesion: 1.0,
            separation: 1.0,
            stability: 1.0,
            overall: 1.0,
        }
    }

    fn compute(cohesion: f64, days_since_update: f64, stale_days: i64) -> Self {
        let separation = (1.0 - cohesion).max(0.2);
        let stability = (1.0 - days_since_update / stale_days.max(1) as f64).max(0.5);
        Self {
            cohesion,
            separation,
            stability,
            overall: 0.5 * cohesion + 0.3 * separation + 0.2 * stability,
        }
    }
}

/// A folder's centroid state
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderCentroid {
    /// The folder
    pub folder_id: String,
    /// Unit-norm centroid (zero vector for an empty folder)
    pub centroid: Vec<f32>,
    /// Exemplar vectors, at most the configured count
    pub exemplars: Vec<Vec<f32>>,
    /// Members counted into the centroid
    pub member_count: usize,
    /// Last update time
    pub last_updated: DateTime<Utc>,
    /// Quality assessment
    pub quality: CentroidQuality,
}

/// Request for a centroid refresh
#[derive(Debug, Clone, Default)]
pub struct CentroidUpdate {
    /// The folder to update
    pub folder_id: String,
    /// Concepts newly added (vectors must be registered beforehand)
    pub new_concepts: Vec<String>,
    /// Concepts removed from the folder
    pub removed_concepts: Vec<String>,
    /// Skip the incremental path and recompute from all members
    pub force_full: bool,
}

impl CentroidUpdate {
    /// A refresh that adds one concept.
    pub fn add(folder_id: impl Into<String>, concept_id: impl Into<String>) -> Self {
        Self {
            folder_id: folder_id.into(),
            new_concepts: vec![concept_id.into()],
            ..Default::default()
        }
    }

    /// A full recompute of the folder.
    pub fn full(folder_id: impl Into<String>) -> Self {
        Self {
            folder_id: folder_id.into(),
            force_full: true,
            ..Default::default()
        }
    }
}

/// One folder entering the routing context
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderContextEntry {
    /// The folder
    pub folder_id: String,
    /// Combined centroid/exemplar similarity to the query vector
    pub similarity: f32,
    /// Folder size
    pub member_count: usize,
    /// Nearest member samples, token-budgeted
    pub samples: Vec<MemberSample>,
}

/// A member cited inside a folder context
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberSample {
    /// The member concept
    pub concept_id: String,
    /// Similarity of the query to this member
    pub similarity: f32,
}

/// The folder context handed to the router's scoring stage
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderContext {
    /// Growth phase the context was filtered under
    pub system_state: SystemState,
    /// Candidate folders, most similar first
    pub folders: Vec<FolderContextEntry>,
    /// True when aggregation failed and the context degraded to empty
    pub degraded: bool,
}

/// A pair of folders similar enough to merge
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedundantPair {
    /// First folder (lexicographically smaller)
    pub folder_a: String,
    /// Second folder
    pub folder_b: String,
    /// Centroid similarity
    pub similarity: f32,
}

// ============================================================================
// CENTROID MANAGER
// ============================================================================

/// Maintains folder centroids, exemplars, and quality
pub struct CentroidManager {
    index: Arc<dyn VectorIndex>,
    config: CentroidConfig,
    dimensions: usize,
    cache: Mutex<LruCache<String, FolderCentroid>>,
    /// folder → concept → context vector; the exact-removal registry
    members: Mutex<HashMap<String, HashMap<String, Vec<f32>>>>,
    folder_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    pool: rayon::ThreadPool,
}

impl CentroidManager {
    /// Create a manager over the given store.
    pub fn new(
        index: Arc<dyn VectorIndex>,
        config: CentroidConfig,
        dimensions: usize,
    ) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.parallel_updates.max(1))
            .build()
            .map_err(|e| CentroidError::State(format!("failed to build update pool: {e}")))?;
        Ok(Self {
            index,
            config,
            dimensions,
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(CENTROID_CACHE_SIZE).expect("cache size is non-zero"),
            )),
            members: Mutex::new(HashMap::new()),
            folder_locks: Mutex::new(HashMap::new()),
            pool,
        })
    }

    /// Register a member's context vector for exact incremental updates
    /// and context sampling. Called by the router at commit time.
    pub fn register_member_vector(&self, folder_id: &str, concept_id: &str, vector: Vec<f32>) {
        if let Ok(mut members) = self.members.lock() {
            members
                .entry(folder_id.to_string())
                .or_default()
                .insert(concept_id.to_string(), vector);
        }
    }

    /// Move a registered member between folders (reorganization support).
    pub fn move_member_vector(&self, from: &str, to: &str, concept_id: &str) {
        let Ok(mut members) = self.members.lock() else {
            return;
        };
        let vector = members
            .get_mut(from)
            .and_then(|folder| folder.remove(concept_id));
        if let Some(vector) = vector {
            members
                .entry(to.to_string())
                .or_default()
                .insert(concept_id.to_string(), vector);
        }
    }

    fn folder_lock(&self, folder_id: &str) -> Result<Arc<Mutex<()>>> {
        let mut locks = self
            .folder_locks
            .lock()
            .map_err(|_| CentroidError::State("folder lock table poisoned".to_string()))?;
        Ok(Arc::clone(
            locks
                .entry(folder_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        ))
    }

    fn registered_members(&self, folder_id: &str) -> Vec<MemberVector> {
        self.members
            .lock()
            .map(|members| {
                members
                    .get(folder_id)
                    .map(|folder| {
                        let mut vectors: Vec<MemberVector> = folder
                            .iter()
                            .map(|(concept_id, vector)| MemberVector {
                                concept_id: concept_id.clone(),
                                vector: vector.clone(),
                            })
                            .collect();
                        vectors.sort_by(|a, b| a.concept_id.cmp(&b.concept_id));
                        vectors
                    })
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }

    /// Refresh a folder's centroid, exemplars, and quality.
    ///
    /// Small membership deltas take the incremental path; anything at or
    /// above `incremental_update_threshold` (or `force_full`) recomputes
    /// from every registered member. Removed concepts whose vectors were
    /// registered are subtracted exactly; unregistered removals only
    /// reduce the member count and leave the folder for the stale sweep.
    pub fn update_folder_centroid(&self, update: &CentroidUpdate) -> Result<FolderCentroid> {
        let lock = self.folder_lock(&update.folder_id)?;
        let _guard = lock
            .lock()
            .map_err(|_| CentroidError::State("folder lock poisoned".to_string()))?;

        let existing = self.index.folder_vector_data(&update.folder_id)?;
        let delta = update.new_concepts.len() + update.removed_concepts.len();

        let (registry, unregistered_removals) = {
            let mut members = self
                .members
                .lock()
                .map_err(|_| CentroidError::State("member registry poisoned".to_string()))?;
            let mut unregistered = 0usize;
            if let Some(folder) = members.get_mut(&update.folder_id) {
                for removed in &update.removed_concepts {
                    if folder.remove(removed).is_none() {
                        unregistered += 1;
                    }
                }
            } else {
                unregistered = update.removed_concepts.len();
            }
            (
                members.get(&update.folder_id).cloned().unwrap_or_default(),
                unregistered,
            )
        };

        // Additions reconstruct the running sum from the stored centroid;
        // removals recompute from the registered member vectors, which is
        // exact. A removal whose vector was never registered cannot be
        // subtracted and leaves the folder for the stale sweep.
        let incremental = !update.force_full
            && delta < self.config.incremental_update_threshold
            && update.removed_concepts.is_empty()
            && existing.is_some();

        let (centroid, member_count) = match (&existing, incremental) {
            (Some(data), true) => incremental_centroid(data, update, &registry, self.dimensions),
            _ => full_centroid(&registry, self.dimensions),
        };
        if unregistered_removals > 0 {
            tracing::warn!(
                folder = %update.folder_id,
                unregistered_removals,
                "removed concepts had no registered vectors"
            );
        }

        let previous_update = existing.as_ref().map(|d| d.last_updated);
        let now = Utc::now();

        if member_count == 0 {
            // Empty folder: report the no-quality centroid instead of
            // writing a zero vector into the store.
            let result = FolderCentroid {
                folder_id: update.folder_id.clone(),
                centroid,
                exemplars: Vec::new(),
                member_count: 0,
                last_updated: now,
                quality: CentroidQuality::empty_folder(),
            };
            self.cache_put(result.clone());
            return Ok(result);
        }

        let member_vectors: Vec<MemberVector> = registry
            .iter()
            .map(|(concept_id, vector)| MemberVector {
                concept_id: concept_id.clone(),
                vector: vector.clone(),
            })
            .collect();
        let exemplars = select_exemplars(
            &member_vectors,
            &centroid,
            self.config.default_exemplar_count,
            self.config.exemplar_strategy,
        );
        let exemplar_vectors: Vec<Vec<f32>> =
            exemplars.iter().map(|m| m.vector.clone()).collect();

        self.index
            .set_folder_centroid(&update.folder_id, &centroid)?;
        self.index
            .set_folder_exemplars(&update.folder_id, &exemplar_vectors)?;

        let cohesion = if member_vectors.is_empty() {
            1.0
        } else {
            member_vectors
                .iter()
                .map(|m| dot_product(&m.vector, &centroid) as f64)
                .sum::<f64>()
                / member_vectors.len() as f64
        };
        let days_since_update = previous_update
            .map(|t| (now - t).num_seconds() as f64 / 86_400.0)
            .unwrap_or(0.0);
        let quality = CentroidQuality::compute(
            cohesion.clamp(0.0, 1.0),
            days_since_update,
            self.config.stale_threshold_days,
        );

        let result = FolderCentroid {
            folder_id: update.folder_id.clone(),
            centroid,
            exemplars: exemplar_vectors,
            member_count,
            last_updated: now,
            quality,
        };
        self.cache_put(result.clone());
        tracing::debug!(
            folder = %update.folder_id,
            members = member_count,
            incremental,
            cohesion = quality.cohesion,
            "centroid updated"
        );
        Ok(result)
    }

    /// Update many folders, in groups of `batch_size` with at most
    /// `parallel_updates` concurrent updates.
    pub fn batch_update_centroids(
        &self,
        folder_ids: &[String],
        force_full: bool,
    ) -> Vec<(String, Result<FolderCentroid>)> {
        use rayon::prelude::*;

        let mut results = Vec::with_capacity(folder_ids.len());
        for group in folder_ids.chunks(self.config.batch_size.max(1)) {
            let group_results: Vec<(String, Result<FolderCentroid>)> = self.pool.install(|| {
                group
                    .par_iter()
                    .map(|folder_id| {
                        let update = CentroidUpdate {
                            folder_id: folder_id.clone(),
                            force_full,
                            ..Default::default()
                        };
                        (folder_id.clone(), self.update_folder_centroid(&update))
                    })
                    .collect()
            });
            for (folder_id, result) in &group_results {
                if let Err(err) = result {
                    tracing::warn!(folder = %folder_id, error = %err, "centroid update failed");
                }
            }
            results.extend(group_results);
        }
        results
    }

    fn cache_put(&self, centroid: FolderCentroid) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.put(centroid.folder_id.clone(), centroid);
        }
    }

    /// Cache-through read of a folder's centroid state.
    pub fn folder_centroid(&self, folder_id: &str) -> Result<Option<FolderCentroid>> {
        if let Ok(mut cache) = self.cache.lock()
            && let Some(cached) = cache.get(folder_id)
        {
            return Ok(Some(cached.clone()));
        }

        let Some(data) = self.index.folder_vector_data(folder_id)? else {
            return Ok(None);
        };

        // Rebuild quality from what is at hand: registered members when we
        // have them, stored exemplars otherwise.
        let members = self.registered_members(folder_id);
        let cohesion_pool: Vec<&[f32]> = if members.is_empty() {
            data.exemplars.iter().map(|v| v.as_slice()).collect()
        } else {
            members.iter().map(|m| m.vector.as_slice()).collect()
        };
        let cohesion = if cohesion_pool.is_empty() {
            1.0
        } else {
            cohesion_pool
                .iter()
                .map(|v| dot_product(v, &data.centroid) as f64)
                .sum::<f64>()
                / cohesion_pool.len() as f64
        };
        let days = (Utc::now() - data.last_updated).num_seconds() as f64 / 86_400.0;
        let quality = if data.member_count == 0 {
            CentroidQuality::empty_folder()
        } else {
            CentroidQuality::compute(
                cohesion.clamp(0.0, 1.0),
                days,
                self.config.stale_threshold_days,
            )
        };

        let centroid = FolderCentroid {
            folder_id: folder_id.to_string(),
            centroid: data.centroid,
            exemplars: data.exemplars,
            member_count: data.member_count,
            last_updated: data.last_updated,
            quality,
        };
        self.cache_put(centroid.clone());
        Ok(Some(centroid))
    }

    fn metric_similarity(&self, a: &[f32], b: &[f32]) -> f32 {
        match self.config.similarity_metric {
            SimilarityMetric::Cosine | SimilarityMetric::Dot => dot_product(a, b),
            SimilarityMetric::Euclidean => 1.0 / (1.0 + euclidean_distance(a, b)),
        }
    }

    /// Folders similar to a query vector, combined centroid + exemplar score.
    pub fn find_similar_folders(
        &self,
        vector: &[f32],
        limit: usize,
        threshold: f32,
    ) -> Result<Vec<(String, f32)>> {
        let weight = self.config.exemplar_weight as f32;
        let mut matches: Vec<(String, f32)> = Vec::new();
        for folder_id in self.index.all_folder_ids()? {
            let Some(folder) = self.folder_centroid(&folder_id)? else {
                continue;
            };
            let centroid_similarity = self.metric_similarity(vector, &folder.centroid);
            let exemplar_similarity = folder
                .exemplars
                .iter()
                .map(|exemplar| self.metric_similarity(vector, exemplar))
                .fold(f32::NEG_INFINITY, f32::max);
            let combined = if exemplar_similarity.is_finite() {
                (1.0 - weight) * centroid_similarity + weight * exemplar_similarity
            } else {
                centroid_similarity
            };
            if combined >= threshold {
                matches.push((folder_id, combined));
            }
        }
        matches.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        matches.truncate(limit);
        Ok(matches)
    }

    /// Filter the folder population down to a token-budgeted scoring
    /// context.
    ///
    /// Never fails: aggregation errors degrade to an empty context, which
    /// the router treats as "duplicate checks only".
    pub fn filter_folder_context(
        &self,
        vector: &[f32],
        max_tokens: usize,
        system_state: SystemState,
        context_config: &ContextConfig,
    ) -> FolderContext {
        let target = match system_state {
            SystemState::Bootstrap => 5,
            SystemState::Growing => 10,
            SystemState::Mature => context_config.max_context_folders,
        }
        .max(1);

        let candidates = match self.find_similar_folders(
            vector,
            target,
            self.config.min_folder_similarity as f32,
        ) {
            Ok(candidates) => candidates,
            Err(err) => {
                tracing::warn!(error = %err, "context filtering degraded to empty");
                return FolderContext {
                    system_state,
                    folders: Vec::new(),
                    degraded: true,
                };
            }
        };

        let tokens_per_folder = max_tokens / target;
        let samples_per_folder = tokens_per_folder / TOKENS_PER_SAMPLE;

        let folders = candidates
            .into_iter()
            .map(|(folder_id, similarity)| {
                let member_count = self
                    .folder_centroid(&folder_id)
                    .ok()
                    .flatten()
                    .map(|c| c.member_count)
                    .unwrap_or(0);
                let mut samples: Vec<MemberSample> = self
                    .registered_members(&folder_id)
                    .into_iter()
                    .map(|member| MemberSample {
                        similarity: dot_product(vector, &member.vector),
                        concept_id: member.concept_id,
                    })
                    .collect();
                samples.sort_by(|a, b| {
                    b.similarity
                        .partial_cmp(&a.similarity)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| a.concept_id.cmp(&b.concept_id))
                });
                samples.truncate(samples_per_folder);
                FolderContextEntry {
                    folder_id,
                    similarity,
                    member_count,
                    samples,
                }
            })
            .collect();

        FolderContext {
            system_state,
            folders,
            degraded: false,
        }
    }

    /// Folders needing a refresh: stale since `stale_days` or with quality
    /// below `quality_threshold`.
    pub fn find_stale_centroids(
        &self,
        stale_days: i64,
        quality_threshold: f64,
    ) -> Result<Vec<String>> {
        let cutoff = Utc::now() - Duration::days(stale_days);
        let mut stale = Vec::new();
        for folder_id in self.index.all_folder_ids()? {
            let Some(folder) = self.folder_centroid(&folder_id)? else {
                // A folder with members but no stored centroid needs one.
                stale.push(folder_id);
                continue;
            };
            if folder.last_updated < cutoff || folder.quality.overall < quality_threshold {
                stale.push(folder_id);
            }
        }
        Ok(stale)
    }

    /// All unordered folder pairs whose centroid similarity meets the
    /// threshold.
    pub fn detect_redundant_folders(&self, threshold: f32) -> Result<Vec<RedundantPair>> {
        let folder_ids: Vec<String> = self.index.all_folder_ids()?.into_iter().collect();
        let mut centroids = Vec::with_capacity(folder_ids.len());
        for folder_id in &folder_ids {
            if let Some(folder) = self.folder_centroid(folder_id)? {
                centroids.push((folder_id.clone(), folder.centroid));
            }
        }

        let mut pairs = Vec::new();
        for i in 0..centroids.len() {
            for j in (i + 1)..centroids.len() {
                let similarity = dot_product(&centroids[i].1, &centroids[j].1);
                if similarity >= threshold {
                    pairs.push(RedundantPair {
                        folder_a: centroids[i].0.clone(),
                        folder_b: centroids[j].0.clone(),
                        similarity,
                    });
                }
            }
        }
        pairs.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(pairs)
    }
}

// ============================================================================
// CENTROID MATH
// ============================================================================

/// Full recompute: normalized mean of every registered member vector.
fn full_centroid(
    registry: &HashMap<String, Vec<f32>>,
    dimensions: usize,
) -> (Vec<f32>, usize) {
    let mut sum = vec![0.0_f64; dimensions];
    let mut count = 0usize;
    for vector in registry.values() {
        if vector.len() != dimensions {
            continue;
        }
        for (acc, x) in sum.iter_mut().zip(vector.iter()) {
            *acc += *x as f64;
        }
        count += 1;
    }
    if count == 0 {
        return (vec![0.0; dimensions], 0);
    }
    let mut centroid: Vec<f32> = sum.iter().map(|x| (*x / count as f64) as f32).collect();
    normalize(&mut centroid);
    (centroid, count)
}

/// Incremental addition: reconstruct the running sum from the stored
/// centroid, fold in the new vectors, renormalize.
fn incremental_centroid(
    existing: &crate::index::FolderVectorData,
    update: &CentroidUpdate,
    registry: &HashMap<String, Vec<f32>>,
    dimensions: usize,
) -> (Vec<f32>, usize) {
    let old_count = existing.member_count;
    let mut sum: Vec<f64> = existing
        .centroid
        .iter()
        .map(|x| *x as f64 * old_count as f64)
        .collect();
    if sum.len() != dimensions {
        sum = vec![0.0; dimensions];
    }

    let mut count = old_count;
    for concept_id in &update.new_concepts {
        if let Some(vector) = registry.get(concept_id) {
            for (acc, x) in sum.iter_mut().zip(vector.iter()) {
                *acc += *x as f64;
            }
            count += 1;
        }
    }

    if count == 0 {
        return (vec![0.0; dimensions], 0);
    }
    let mut centroid: Vec<f32> = sum.iter().map(|x| (*x / count as f64) as f32).collect();
    normalize(&mut centroid);
    (centroid, count)
}

// ============================================================================
// TESTS
// ============================================================================
