//! Batch Routing
//!
//! Routes a whole capture batch with bounded concurrency, then runs a
//! clustering pass over whatever landed unsorted: single-link clusters over
//! context vectors at `cluster_tau`, and a folder suggestion for every
//! cluster that reaches `min_cluster_size`. Suggestions are proposals only;
//! nothing is created until the concepts are re-routed.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::{RouteError, RoutingAction, RoutingDecision, SmartRouter, slugify};
use crate::batch::Batch;
use crate::cancel::CancelToken;
use crate::candidate::ConceptCandidate;
use crate::embed::dot_product;

// ============================================================================
// RESULT TYPES
// ============================================================================

/// Per-candidate outcome of a batch route
#[derive(Debug)]
pub struct BatchDecision {
    /// The candidate that was routed
    pub candidate_id: String,
    /// Its decision, or the stage error that stopped it
    pub outcome: Result<RoutingDecision, RouteError>,
}

/// A group of unsorted concepts that belong together
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConceptCluster {
    /// Members, in candidate order
    pub member_ids: Vec<String>,
    /// Mean pairwise similarity inside the cluster
    pub mean_similarity: f32,
}

/// A folder proposal derived from an unsorted cluster
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestedFolder {
    /// Proposed name
    pub name: String,
    /// Proposed `/`-rooted path
    pub path: String,
    /// Concepts the folder would absorb
    pub member_ids: Vec<String>,
}

/// Everything a batch route produces
#[derive(Debug)]
pub struct BatchRoutingResult {
    /// One outcome per input candidate, in input order
    pub decisions: Vec<BatchDecision>,
    /// Clusters found among unsorted items
    pub clusters: Vec<ConceptCluster>,
    /// Folder proposals for clusters at or above the minimum size
    pub suggested_folders: Vec<SuggestedFolder>,
}

/// An entry the admission gate turned away
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectedEntry {
    /// Entry index within the batch
    pub index: usize,
    /// The admission failure, human-readable
    pub reason: String,
}

/// Summary of a full batch ingestion
#[derive(Debug)]
pub struct IngestReport {
    /// Entries in the incoming batch
    pub total_entries: usize,
    /// Entries that passed admission
    pub admitted: usize,
    /// Entries the gate rejected
    pub rejected: Vec<RejectedEntry>,
    /// Decision counts by action
    pub routed: usize,
    /// Folders created
    pub created_folders: usize,
    /// Duplicates detected
    pub duplicates: usize,
    /// Deferred to unsorted
    pub unsorted: usize,
    /// Flagged for review
    pub review: usize,
    /// Routes that failed with an error
    pub errors: usize,
    /// The underlying batch result
    pub batch: BatchRoutingResult,
}

// ============================================================================
// BATCH ROUTING
// ============================================================================

impl SmartRouter {
    /// Route many candidates with at most `batch_concurrency` in flight,
    /// then cluster the unsorted remainder.
    pub fn route_batch(
        &self,
        candidates: &[ConceptCandidate],
        cancel: &CancelToken,
    ) -> BatchRoutingResult {
        let decisions: Vec<BatchDecision> = self.batch_pool.install(|| {
            candidates
                .par_iter()
                .map(|candidate| BatchDecision {
                    candidate_id: candidate.candidate_id.clone(),
                    outcome: self.route(candidate, cancel),
                })
                .collect()
        });

        // Let pending centroid refreshes land before anyone reads folders.
        self.flush_centroid_updates();

        let (clusters, suggested_folders) = self.cluster_unsorted(candidates, &decisions);
        BatchRoutingResult {
            decisions,
            clusters,
            suggested_folders,
        }
    }

    /// Admit and route a whole capture batch.
    pub fn ingest_batch(&self, batch: &Batch, cancel: &CancelToken) -> IngestReport {
        let mut admitted = Vec::new();
        let mut rejected = Vec::new();
        for index in 0..batch.entries.len() {
            match ConceptCandidate::from_entry(batch, index, &self.config().candidate) {
                Ok(candidate) => admitted.push(candidate),
                Err(err) => {
                    tracing::debug!(index, error = %err, "entry rejected at admission");
                    rejected.push(RejectedEntry {
                        index,
                        reason: err.to_string(),
                    });
                }
            }
        }

        let batch_result = self.route_batch(&admitted, cancel);

        let mut report = IngestReport {
            total_entries: batch.entries.len(),
            admitted: admitted.len(),
            rejected,
            routed: 0,
            created_folders: 0,
            duplicates: 0,
            unsorted: 0,
            review: 0,
            errors: 0,
            batch: BatchRoutingResult {
                decisions: Vec::new(),
                clusters: Vec::new(),
                suggested_folders: Vec::new(),
            },
        };
        for decision in &batch_result.decisions {
            match &decision.outcome {
                Ok(d) => match d.action {
                    RoutingAction::Route => report.routed += 1,
                    RoutingAction::CreateFolder => report.created_folders += 1,
                    RoutingAction::Duplicate => report.duplicates += 1,
                    RoutingAction::Unsorted => report.unsorted += 1,
                    RoutingAction::Review => report.review += 1,
                },
                Err(_) => report.errors += 1,
            }
        }
        report.batch = batch_result;
        report
    }

    /// Single-link clustering of unsorted items over context vectors.
    fn cluster_unsorted(
        &self,
        candidates: &[ConceptCandidate],
        decisions: &[BatchDecision],
    ) -> (Vec<ConceptCluster>, Vec<SuggestedFolder>) {
        let tau = self.config().routing.cluster_tau as f32;
        let min_size = self.config().routing.min_cluster_size;

        // Unsorted items whose embeddings are in cache (budget-exceeded
        // items never got vectors and cannot cluster).
        let members: Vec<(&ConceptCandidate, Vec<f32>)> = decisions
            .iter()
            .zip(candidates.iter())
            .filter(|(decision, _)| {
                matches!(
                    &decision.outcome,
                    Ok(d) if d.action == RoutingAction::Unsorted
                        && d.explanation.primary_signal == "low-confidence"
                )
            })
            .filter_map(|(_, candidate)| {
                self.embedder
                    .cached(&candidate.content_hash)
                    .map(|e| (candidate, e.context_vector))
            })
            .collect();

        if members.len() < 2 {
            return (Vec::new(), Vec::new());
        }

        // Union-find over edges at or above tau.
        let mut parent: Vec<usize> = (0..members.len()).collect();
        fn find(parent: &mut Vec<usize>, i: usize) -> usize {
            if parent[i] != i {
                let root = find(parent, parent[i]);
                parent[i] = root;
            }
            parent[i]
        }
        for i in 0..members.len() {
            for j in (i + 1)..members.len() {
                if dot_product(&members[i].1, &members[j].1) >= tau {
                    let (ri, rj) = (find(&mut parent, i), find(&mut parent, j));
                    if ri != rj {
                        parent[ri] = rj;
                    }
                }
            }
        }

        let mut groups: HashMap<usize, Vec<usize>> = HashMap::new();
        for i in 0..members.len() {
            let root = find(&mut parent, i);
            groups.entry(root).or_default().push(i);
        }

        let mut clusters = Vec::new();
        let mut suggested_folders = Vec::new();
        let mut group_list: Vec<Vec<usize>> = groups.into_values().filter(|g| g.len() >= 2).collect();
        group_list.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

        for group in group_list {
            let member_ids: Vec<String> = group
                .iter()
                .map(|&i| members[i].0.candidate_id.clone())
                .collect();

            let mut similarity_sum = 0.0_f64;
            let mut pairs = 0usize;
            for (a, &i) in group.iter().enumerate() {
                for &j in group.iter().skip(a + 1) {
                    similarity_sum += dot_product(&members[i].1, &members[j].1) as f64;
                    pairs += 1;
                }
            }
            let mean_similarity = if pairs > 0 {
                (similarity_sum / pairs as f64) as f32
            } else {
                1.0
            };

            if group.len() >= min_size {
                let name = cluster_name(group.iter().map(|&i| members[i].0));
                suggested_folders.push(SuggestedFolder {
                    path: format!("/{}", slugify(&name)),
                    name,
                    member_ids: member_ids.clone(),
                });
            }
            clusters.push(ConceptCluster {
                member_ids,
                mean_similarity,
            });
        }
        (clusters, suggested_folders)
    }
}

/// Name a cluster by the key terms its members share most often.
fn cluster_name<'a>(members: impl Iterator<Item = &'a ConceptCandidate>) -> String {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for candidate in members {
        for term in &candidate.key_terms {
            *counts.entry(term.as_str()).or_insert(0) += 1;
        }
    }
    let mut terms: Vec<(&str, usize)> = counts.into_iter().collect();
    terms.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    let name = terms
        .into_iter()
        .take(3)
        .map(|(term, _)| term)
        .collect::<Vec<_>>()
        .join(" ");
    if name.is_empty() { "unsorted cluster".to_string() } else { name }
}

// ============================================================================
// TESTS
// ============================================================================
