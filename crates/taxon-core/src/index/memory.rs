//! In-Memory Vector Index
//!
//! Reference backend for the [`VectorIndex`](super::VectorIndex) contract:
//! exact cosine scans over in-memory collections. Every guarantee a remote
//! backend must provide — dimension checks before mutation, deterministic
//! tie-breaking, delete-then-insert exemplar replacement — is implemented
//! literally here, which makes this backend the executable reference for
//! conformance tests and the engine's default store in embedded use.

use chrono::Utc;
use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

use super::{
    ConceptPlacement, FolderMember, FolderVectorData, IndexError, PointPayload, Result, SearchHit,
    SearchQuery, VectorIndex,
};
use crate::embed::{VectorEmbeddings, dot_product};

// ============================================================================
// STORAGE SHAPES
// ============================================================================

#[derive(Debug, Clone)]
struct ConceptPoint {
    title: Vec<f32>,
    context: Vec<f32>,
    payload: PointPayload,
}

#[derive(Debug, Clone, Default)]
struct FolderPoints {
    centroid: Option<Vec<f32>>,
    exemplars: Vec<Vec<f32>>,
    last_updated: Option<chrono::DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct Inner {
    concepts: HashMap<String, ConceptPoint>,
    folders: HashMap<String, FolderPoints>,
    initialized: bool,
}

/// Which concept collection a search runs over
#[derive(Clone, Copy)]
enum Collection {
    Title,
    Context,
}

// ============================================================================
// MEMORY VECTOR INDEX
// ============================================================================

/// Exact-scan in-memory backend
pub struct MemoryVectorIndex {
    dimensions: usize,
    inner: Mutex<Inner>,
}

impl MemoryVectorIndex {
    /// Create an index whose collections share the given dimension.
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// The shared collection dimension.
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimensions {
            return Err(IndexError::Dimension {
                expected: self.dimensions,
                got: vector.len(),
            });
        }
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| IndexError::Backend("index lock poisoned".to_string()))
    }

    fn locked_ready(&self) -> Result<std::sync::MutexGuard<'_, Inner>> {
        let inner = self.lock()?;
        if !inner.initialized {
            return Err(IndexError::Connection(
                "collections not initialized".to_string(),
            ));
        }
        Ok(inner)
    }

    fn search(&self, query: &SearchQuery, collection: Collection) -> Result<Vec<SearchHit>> {
        self.check_dimension(&query.vector)?;
        let inner = self.locked_ready()?;

        let member_counts = primary_member_counts(&inner);
        let mut hits: Vec<SearchHit> = inner
            .concepts
            .values()
            .filter_map(|point| {
                let vector = match collection {
                    Collection::Title => &point.title,
                    Collection::Context => &point.context,
                };
                let similarity = dot_product(&query.vector, vector);
                (similarity >= query.threshold).then(|| SearchHit {
                    concept_id: point.payload.concept_id.clone(),
                    similarity,
                    payload: point.payload.clone(),
                })
            })
            .collect();
        drop(inner);

        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    let members_a = hit_member_count(a, &member_counts);
                    let members_b = hit_member_count(b, &member_counts);
                    members_b.cmp(&members_a)
                })
                .then_with(|| a.concept_id.cmp(&b.concept_id))
        });
        hits.truncate(query.limit);
        Ok(hits)
    }
}

fn primary_member_counts(inner: &Inner) -> HashMap<String, usize> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for point in inner.concepts.values() {
        if let Some(primary) = &point.payload.primary_folder {
            *counts.entry(primary.clone()).or_insert(0) += 1;
        }
    }
    counts
}

fn hit_member_count(hit: &SearchHit, counts: &HashMap<String, usize>) -> usize {
    hit.payload
        .primary_folder
        .as_ref()
        .and_then(|folder| counts.get(folder).copied())
        .unwrap_or(0)
}

impl VectorIndex for MemoryVectorIndex {
    fn initialize(&self) -> Result<()> {
        let mut inner = self.lock()?;
        inner.initialized = true;
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.inner.lock().map(|i| i.initialized).unwrap_or(false)
    }

    fn upsert(
        &self,
        concept_id: &str,
        embeddings: &VectorEmbeddings,
        placement: &ConceptPlacement,
    ) -> Result<()> {
        self.check_dimension(&embeddings.title_vector)?;
        self.check_dimension(&embeddings.context_vector)?;
        let mut inner = self.locked_ready()?;
        inner.concepts.insert(
            concept_id.to_string(),
            ConceptPoint {
                title: embeddings.title_vector.clone(),
                context: embeddings.context_vector.clone(),
                payload: PointPayload::from_parts(embeddings, placement),
            },
        );
        Ok(())
    }

    fn search_by_title(&self, query: &SearchQuery) -> Result<Vec<SearchHit>> {
        self.search(query, Collection::Title)
    }

    fn search_by_context(&self, query: &SearchQuery) -> Result<Vec<SearchHit>> {
        self.search(query, Collection::Context)
    }

    fn search_by_folder(
        &self,
        folder_id: &str,
        include_references: bool,
    ) -> Result<Vec<FolderMember>> {
        let inner = self.locked_ready()?;
        let mut members: Vec<FolderMember> = inner
            .concepts
            .values()
            .filter_map(|point| {
                let is_primary = point.payload.primary_folder.as_deref() == Some(folder_id);
                let is_reference = include_references
                    && point
                        .payload
                        .reference_folders
                        .iter()
                        .any(|f| f == folder_id);
                (is_primary || is_reference).then(|| FolderMember {
                    concept_id: point.payload.concept_id.clone(),
                    similarity: 1.0,
                    is_primary,
                })
            })
            .collect();
        members.sort_by(|a, b| a.concept_id.cmp(&b.concept_id));
        Ok(members)
    }

    fn all_folder_ids(&self) -> Result<BTreeSet<String>> {
        let inner = self.locked_ready()?;
        let mut folders = BTreeSet::new();
        for point in inner.concepts.values() {
            if let Some(primary) = &point.payload.primary_folder {
                folders.insert(primary.clone());
            }
            for reference in &point.payload.reference_folders {
                folders.insert(reference.clone());
            }
            if let Some(legacy) = &point.payload.folder_id {
                folders.insert(legacy.clone());
            }
        }
        Ok(folders)
    }

    fn set_folder_centroid(&self, folder_id: &str, vector: &[f32]) -> Result<()> {
        self.check_dimension(vector)?;
        let mut inner = self.locked_ready()?;
        let folder = inner.folders.entry(folder_id.to_string()).or_default();
        folder.centroid = Some(vector.to_vec());
        folder.last_updated = Some(Utc::now());
        Ok(())
    }

    fn set_folder_exemplars(&self, folder_id: &str, vectors: &[Vec<f32>]) -> Result<()> {
        for vector in vectors {
            self.check_dimension(vector)?;
        }
        let mut inner = self.locked_ready()?;
        let folder = inner.folders.entry(folder_id.to_string()).or_default();
        // Delete-then-insert: the contract allows readers to observe the
        // empty window between the two steps.
        folder.exemplars.clear();
        folder.exemplars.extend(vectors.iter().cloned());
        Ok(())
    }

    fn folder_vector_data(&self, folder_id: &str) -> Result<Option<FolderVectorData>> {
        let inner = self.locked_ready()?;
        let Some(folder) = inner.folders.get(folder_id) else {
            return Ok(None);
        };
        let Some(centroid) = folder.centroid.clone() else {
            return Ok(None);
        };
        let member_count = inner
            .concepts
            .values()
            .filter(|p| p.payload.primary_folder.as_deref() == Some(folder_id))
            .count();
        Ok(Some(FolderVectorData {
            centroid,
            exemplars: folder.exemplars.clone(),
            member_count,
            last_updated: folder.last_updated.unwrap_or_else(Utc::now),
        }))
    }

    fn delete(&self, concept_id: &str) -> Result<()> {
        let mut inner = self.locked_ready()?;
        inner.concepts.remove(concept_id);
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
