//! Smart Router
//!
//! The decision engine. Given a validated candidate it runs the pipeline
//!
//! ```text
//! distill → embed → duplicate check → folder context → score → decide → commit → schedule
//! ```
//!
//! and produces exactly one [`RoutingDecision`]: route to an existing
//! folder, create a new folder, mark as duplicate, defer to unsorted, or
//! flag for review. Writes happen only in the commit stage, so a failed or
//! cancelled route leaves no partial state behind.
//!
//! Concurrency: all writes for one candidate id are serialized behind a
//! per-candidate fence; centroid refreshes for placed folders run on a
//! background worker so routing latency never includes centroid math.

mod batch;

pub use batch::{
    BatchDecision, BatchRoutingResult, ConceptCluster, IngestReport, RejectedEntry,
    SuggestedFolder,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};

use crate::budget::RequestBudget;
use crate::cancel::CancelToken;
use crate::candidate::ConceptCandidate;
use crate::centroid::{CentroidError, CentroidManager, CentroidUpdate, FolderContext, SystemState};
use crate::config::EngineConfig;
use crate::distill::{CachingDistiller, DistillError, DistilledConcept};
use crate::embed::{CachingEmbedder, EmbedError, VectorEmbeddings, dot_product};
use crate::index::{ConceptPlacement, Folder, IndexError, SearchQuery, VectorIndex};
use crate::scheduler::{ReviewScheduler, ScheduleError};

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Failure inside one pipeline stage
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    /// Distillation collaborator failed
    #[error(transparent)]
    Distill(#[from] DistillError),
    /// Embedding collaborator failed
    #[error(transparent)]
    Embed(#[from] EmbedError),
    /// Vector store failed
    #[error(transparent)]
    Index(#[from] IndexError),
    /// Centroid manager failed
    #[error(transparent)]
    Centroid(#[from] CentroidError),
    /// Scheduler failed
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
    /// Internal state was poisoned
    #[error("Router state error: {0}")]
    State(String),
}

/// A route either yields a decision or fails with one stage-tagged error
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    /// A pipeline stage failed
    #[error("Routing stage '{stage}' failed: {source}")]
    Stage {
        /// The failing stage
        stage: &'static str,
        /// The underlying failure
        #[source]
        source: StageError,
    },
    /// The route was cancelled between stages
    #[error("Route cancelled at stage '{stage}'")]
    Cancelled {
        /// The stage at which cancellation was observed
        stage: &'static str,
    },
}

fn stage_err(stage: &'static str, source: impl Into<StageError>) -> RouteError {
    RouteError::Stage {
        stage,
        source: source.into(),
    }
}

// ============================================================================
// DECISION TYPES
// ============================================================================

/// The five routing outcomes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingAction {
    /// Place into an existing folder
    Route,
    /// Create a new folder and place into it
    CreateFolder,
    /// The concept already exists
    Duplicate,
    /// Defer to the unsorted pool
    Unsorted,
    /// Defer to a human or a later re-check
    Review,
}

/// Proposal for a folder that does not exist yet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewFolder {
    /// Human-readable name
    pub name: String,
    /// `/`-rooted path
    pub path: String,
}

/// Why the router decided what it decided
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingExplanation {
    /// The dominant signal behind the decision
    pub primary_signal: String,
    /// Supporting observations, human-readable
    pub decision_factors: Vec<String>,
    /// Detected academic domain, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub academic_domain: Option<String>,
    /// Growth phase at decision time
    pub system_state: SystemState,
}

/// The router's verdict for one candidate
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingDecision {
    /// What to do with the concept
    pub action: RoutingAction,
    /// Target folder for `Route`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<String>,
    /// Folder proposal for `CreateFolder`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_folder: Option<NewFolder>,
    /// Existing concept for `Duplicate`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duplicate_id: Option<String>,
    /// Cross-reference folders
    #[serde(default)]
    pub references: Vec<String>,
    /// Decision confidence in [0, 1]
    pub confidence: f64,
    /// Why
    pub explanation: RoutingExplanation,
    /// When the decision was made
    pub timestamp: DateTime<Utc>,
}

// ============================================================================
// SMART ROUTER
// ============================================================================

enum CentroidJob {
    Refresh {
        folder_id: String,
        concept_id: String,
    },
    /// Test/batch barrier: acknowledged once everything before it drained.
    Barrier(mpsc::Sender<()>),
    Shutdown,
}

/// The routing decision engine
pub struct SmartRouter {
    distiller: Arc<CachingDistiller>,
    embedder: Arc<CachingEmbedder>,
    index: Arc<dyn VectorIndex>,
    centroids: Arc<CentroidManager>,
    scheduler: Arc<ReviewScheduler>,
    budget: Arc<RequestBudget>,
    config: EngineConfig,
    /// Per-candidate single-writer fences
    fences: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    /// content hash → committed concept id; the hash-equal fast path
    seen_hashes: Mutex<HashMap<String, String>>,
    centroid_tx: mpsc::Sender<CentroidJob>,
    centroid_worker: Option<std::thread::JoinHandle<()>>,
    batch_pool: rayon::ThreadPool,
}

impl SmartRouter {
    /// Assemble a router over its collaborators.
    pub fn new(
        distiller: Arc<CachingDistiller>,
        embedder: Arc<CachingEmbedder>,
        index: Arc<dyn VectorIndex>,
        centroids: Arc<CentroidManager>,
        scheduler: Arc<ReviewScheduler>,
        budget: Arc<RequestBudget>,
        config: EngineConfig,
    ) -> Result<Self, RouteError> {
        index.initialize().map_err(|e| stage_err("initialize", e))?;

        let (centroid_tx, centroid_rx) = mpsc::channel::<CentroidJob>();
        let worker_centroids = Arc::clone(&centroids);
        let centroid_worker = std::thread::spawn(move || {
            while let Ok(job) = centroid_rx.recv() {
                match job {
                    CentroidJob::Refresh {
                        folder_id,
                        concept_id,
                    } => {
                        if let Err(err) = worker_centroids
                            .update_folder_centroid(&CentroidUpdate::add(&folder_id, &concept_id))
                        {
                            tracing::warn!(
                                folder = %folder_id,
                                error = %err,
                                "background centroid refresh failed"
                            );
                        }
                    }
                    CentroidJob::Barrier(ack) => {
                        let _ = ack.send(());
                    }
                    CentroidJob::Shutdown => break,
                }
            }
        });

        let batch_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.routing.batch_concurrency.max(1))
            .build()
            .map_err(|e| stage_err("initialize", StageError::State(e.to_string())))?;

        Ok(Self {
            distiller,
            embedder,
            index,
            centroids,
            scheduler,
            budget,
            config,
            fences: Mutex::new(HashMap::new()),
            seen_hashes: Mutex::new(HashMap::new()),
            centroid_tx,
            centroid_worker: Some(centroid_worker),
            batch_pool,
        })
    }

    /// The engine configuration in effect.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The scheduler the router notifies.
    pub fn scheduler(&self) -> &Arc<ReviewScheduler> {
        &self.scheduler
    }

    /// The centroid manager used for folder context.
    pub fn centroids(&self) -> &Arc<CentroidManager> {
        &self.centroids
    }

    fn fence(&self, candidate_id: &str) -> Result<Arc<Mutex<()>>, RouteError> {
        let mut fences = self
            .fences
            .lock()
            .map_err(|_| stage_err("fence", StageError::State("fence table poisoned".into())))?;
        Ok(Arc::clone(
            fences
                .entry(candidate_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        ))
    }

    fn system_state(&self) -> Result<SystemState, RouteError> {
        let folder_count = self
            .index
            .all_folder_ids()
            .map_err(|e| stage_err("context", e))?
            .len();
        Ok(if folder_count == 0 {
            SystemState::Bootstrap
        } else if folder_count < self.config.context.growing_cap {
            SystemState::Growing
        } else {
            SystemState::Mature
        })
    }

    /// Route one candidate through the full pipeline.
    pub fn route(
        &self,
        candidate: &ConceptCandidate,
        cancel: &CancelToken,
    ) -> Result<RoutingDecision, RouteError> {
        let fence = self.fence(&candidate.candidate_id)?;
        let _guard = fence
            .lock()
            .map_err(|_| stage_err("fence", StageError::State("fence poisoned".into())))?;

        let checkpoint = |stage: &'static str| -> Result<(), RouteError> {
            cancel
                .checkpoint()
                .map_err(|_| RouteError::Cancelled { stage })
        };

        // Stage 1 happened in ConceptCandidate::from_batch. Before spending
        // budget, note the growth phase for explanations.
        checkpoint("distill")?;
        let system_state = self.system_state()?;

        // Stage 2: distill.
        let concept = match self.distiller.distill(candidate, cancel) {
            Ok(concept) => concept,
            Err(DistillError::Quota(_)) => {
                return Ok(self.budget_exceeded_decision(system_state));
            }
            Err(DistillError::Cancelled(_)) => {
                return Err(RouteError::Cancelled { stage: "distill" });
            }
            Err(err) => return Err(stage_err("distill", err)),
        };
        if concept.is_not_study() {
            return Ok(decision(
                RoutingAction::Unsorted,
                0.0,
                RoutingExplanation {
                    primary_signal: "non-study".to_string(),
                    decision_factors: vec!["distiller classified content as NOT_STUDY".to_string()],
                    academic_domain: None,
                    system_state,
                },
            ));
        }

        // Stage 3: embed.
        checkpoint("embed")?;
        let embeddings = match self.embedder.embed(&concept, cancel) {
            Ok(embeddings) => embeddings,
            Err(EmbedError::Quota(_)) => {
                return Ok(self.budget_exceeded_decision(system_state));
            }
            Err(EmbedError::Cancelled(_)) => {
                return Err(RouteError::Cancelled { stage: "embed" });
            }
            Err(err) => return Err(stage_err("embed", err)),
        };

        // Stage 4: duplicate check.
        checkpoint("duplicate")?;
        if let Some(decision) = self.duplicate_check(candidate, &embeddings, system_state)? {
            return Ok(decision);
        }

        // Stage 5: folder context.
        checkpoint("context")?;
        let max_tokens = self.config.context.token_estimate_per_folder
            * self.config.context.max_context_folders;
        let context = self.centroids.filter_folder_context(
            &embeddings.context_vector,
            max_tokens,
            system_state,
            &self.config.context,
        );

        // Stages 6–7: score and decide.
        checkpoint("score")?;
        let verdict = self.decide(candidate, &context, &embeddings);

        // Stage 8: commit, placements only for route/create/first-seen
        // unsorted.
        checkpoint("commit")?;
        self.commit(candidate, &concept, &embeddings, &verdict)?;

        // Stage 9: schedule every stored or reviewable concept.
        if !matches!(verdict.action, RoutingAction::Duplicate) {
            self.scheduler
                .schedule(&candidate.candidate_id, None)
                .map_err(|e| stage_err("schedule", e))?;
        }

        Ok(verdict)
    }

    fn budget_exceeded_decision(&self, system_state: SystemState) -> RoutingDecision {
        let usage = self.budget.usage();
        decision(
            RoutingAction::Unsorted,
            0.0,
            RoutingExplanation {
                primary_signal: "budget-exceeded".to_string(),
                decision_factors: vec![format!(
                    "daily budget spent: {}/{} requests, {}/{} tokens",
                    usage.requests_used, usage.request_limit, usage.tokens_used, usage.token_budget
                )],
                academic_domain: None,
                system_state,
            },
        )
    }

    /// Stage 4: hash-equal fast path, then title search at `dup_high`.
    fn duplicate_check(
        &self,
        candidate: &ConceptCandidate,
        embeddings: &VectorEmbeddings,
        system_state: SystemState,
    ) -> Result<Option<RoutingDecision>, RouteError> {
        let hash_hit = self
            .seen_hashes
            .lock()
            .ok()
            .and_then(|seen| seen.get(&candidate.content_hash).cloned());
        if let Some(existing_id) = hash_hit {
            return Ok(Some(duplicate_decision(
                existing_id,
                1.0,
                "hash-match",
                system_state,
            )));
        }

        let hits = self
            .index
            .search_by_title(&SearchQuery {
                vector: embeddings.title_vector.clone(),
                threshold: self.config.routing.dup_high_threshold as f32,
                limit: 1,
            })
            .map_err(|e| stage_err("duplicate", e))?;

        let Some(best) = hits.first() else {
            return Ok(None);
        };
        if best.payload.content_hash == candidate.content_hash {
            return Ok(Some(duplicate_decision(
                best.concept_id.clone(),
                1.0,
                "hash-match",
                system_state,
            )));
        }
        Ok(Some(duplicate_decision(
            best.concept_id.clone(),
            best.similarity as f64,
            "title-similarity",
            system_state,
        )))
    }

    /// Stages 6–7: score the context folders and pick an action.
    fn decide(
        &self,
        candidate: &ConceptCandidate,
        context: &FolderContext,
        embeddings: &VectorEmbeddings,
    ) -> RoutingDecision {
        let routing = &self.config.routing;

        if context.degraded {
            return decision(
                RoutingAction::Unsorted,
                0.0,
                RoutingExplanation {
                    primary_signal: "context-unavailable".to_string(),
                    decision_factors: vec![
                        "folder context aggregation failed; duplicate checks only".to_string(),
                    ],
                    academic_domain: None,
                    system_state: context.system_state,
                },
            );
        }

        let mut scored: Vec<(String, f64, usize)> = context
            .folders
            .iter()
            .filter_map(|entry| {
                let folder = self.centroids.folder_centroid(&entry.folder_id).ok()??;
                let centroid_sim =
                    dot_product(&embeddings.context_vector, &folder.centroid) as f64;
                let exemplar_sim = folder
                    .exemplars
                    .iter()
                    .map(|e| dot_product(&embeddings.context_vector, e) as f64)
                    .fold(0.0_f64, f64::max);
                let member_sim = entry
                    .samples
                    .iter()
                    .map(|s| s.similarity as f64)
                    .fold(0.0_f64, f64::max);
                let score = routing.centroid_weight * centroid_sim
                    + routing.exemplar_weight * exemplar_sim
                    + routing.member_weight * member_sim;
                Some((entry.folder_id.clone(), score, folder.member_count))
            })
            .collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.2.cmp(&a.2))
                .then_with(|| a.0.cmp(&b.0))
        });

        let best = scored.first().cloned();
        let references: Vec<String> = scored
            .iter()
            .skip(1)
            .filter(|(_, score, _)| *score >= routing.reference_threshold)
            .map(|(folder, _, _)| folder.clone())
            .collect();
        let factors = vec![
            format!("contextFolders={}", context.folders.len()),
            format!(
                "bestScore={}",
                best.as_ref()
                    .map(|(_, s, _)| format!("{s:.3}"))
                    .unwrap_or_else(|| "none".to_string())
            ),
        ];
        let academic_domain =
            (!candidate.source.topic.is_empty()).then(|| candidate.source.topic.clone());

        match best {
            Some((folder_id, score, _)) if score >= routing.high_confidence_threshold => {
                RoutingDecision {
                    action: RoutingAction::Route,
                    folder_id: Some(folder_id),
                    new_folder: None,
                    duplicate_id: None,
                    references,
                    confidence: score.clamp(0.0, 1.0),
                    explanation: RoutingExplanation {
                        primary_signal: "folder-match".to_string(),
                        decision_factors: factors,
                        academic_domain,
                        system_state: context.system_state,
                    },
                    timestamp: Utc::now(),
                }
            }
            Some((_, score, _)) if score >= routing.low_confidence_threshold => decision(
                RoutingAction::Review,
                score.clamp(0.0, 1.0),
                RoutingExplanation {
                    primary_signal: "ambiguous-match".to_string(),
                    decision_factors: factors,
                    academic_domain,
                    system_state: context.system_state,
                },
            ),
            best => {
                let best_score = best.map(|(_, score, _)| score).unwrap_or(0.0);
                let can_create = self.config.context.enable_folder_creation
                    && matches!(
                        context.system_state,
                        SystemState::Bootstrap | SystemState::Growing
                    );
                if can_create {
                    let new_folder = propose_folder(candidate);
                    RoutingDecision {
                        action: RoutingAction::CreateFolder,
                        folder_id: None,
                        new_folder: Some(new_folder),
                        duplicate_id: None,
                        references,
                        confidence: (1.0 - best_score).clamp(0.0, 1.0),
                        explanation: RoutingExplanation {
                            primary_signal: "no-folder-fits".to_string(),
                            decision_factors: factors,
                            academic_domain,
                            system_state: context.system_state,
                        },
                        timestamp: Utc::now(),
                    }
                } else {
                    decision(
                        RoutingAction::Unsorted,
                        0.0,
                        RoutingExplanation {
                            primary_signal: "low-confidence".to_string(),
                            decision_factors: factors,
                            academic_domain,
                            system_state: context.system_state,
                        },
                    )
                }
            }
        }
    }

    /// Stage 8: the only writing stage.
    fn commit(
        &self,
        candidate: &ConceptCandidate,
        concept: &DistilledConcept,
        embeddings: &VectorEmbeddings,
        verdict: &RoutingDecision,
    ) -> Result<(), RouteError> {
        let placement = match verdict.action {
            RoutingAction::Route => {
                let folder_id = verdict
                    .folder_id
                    .clone()
                    .ok_or_else(|| stage_err("commit", StageError::State("route without folder".into())))?;
                let mut confidences = BTreeMap::new();
                confidences.insert(folder_id.clone(), verdict.confidence);
                ConceptPlacement::new(
                    &candidate.candidate_id,
                    Some(folder_id),
                    verdict.references.clone(),
                    confidences,
                )
            }
            RoutingAction::CreateFolder => {
                let new_folder = verdict
                    .new_folder
                    .clone()
                    .ok_or_else(|| stage_err("commit", StageError::State("create without folder".into())))?;
                let folder_id = self.unique_folder_id(&new_folder, candidate)?;
                let folder = Folder::new(&folder_id, &new_folder.path);
                tracing::info!(folder = %folder.folder_id, path = %folder.path, "folder created");
                let mut confidences = BTreeMap::new();
                confidences.insert(folder_id.clone(), verdict.confidence);
                ConceptPlacement::new(
                    &candidate.candidate_id,
                    Some(folder_id),
                    verdict.references.clone(),
                    confidences,
                )
            }
            RoutingAction::Unsorted => ConceptPlacement::unsorted(&candidate.candidate_id),
            // Review and duplicate write nothing.
            RoutingAction::Review | RoutingAction::Duplicate => return Ok(()),
        };

        self.index
            .upsert(&candidate.candidate_id, embeddings, &placement)
            .map_err(|e| {
                // Write-path failures surface to the caller; the decision is
                // logged so the route can be replayed once the store is back.
                tracing::error!(
                    concept = %candidate.candidate_id,
                    action = ?verdict.action,
                    folder = ?placement.primary_folder_id,
                    error = %e,
                    "commit failed; decision logged for replay"
                );
                stage_err("commit", e)
            })?;

        if let Ok(mut seen) = self.seen_hashes.lock() {
            seen.insert(concept.content_hash.clone(), candidate.candidate_id.clone());
        }

        if let Some(folder_id) = &placement.primary_folder_id {
            self.centroids.register_member_vector(
                folder_id,
                &candidate.candidate_id,
                embeddings.context_vector.clone(),
            );
            if verdict.action == RoutingAction::CreateFolder {
                // A brand-new folder is invisible to scoring until its
                // centroid exists, so the first write is synchronous.
                self.centroids
                    .update_folder_centroid(&CentroidUpdate::add(
                        folder_id,
                        &candidate.candidate_id,
                    ))
                    .map_err(|e| stage_err("commit", e))?;
            } else {
                // Established folders refresh off the routing path.
                let _ = self.centroid_tx.send(CentroidJob::Refresh {
                    folder_id: folder_id.clone(),
                    concept_id: candidate.candidate_id.clone(),
                });
            }
        }
        Ok(())
    }

    /// Resolve a folder proposal to an id that is free in the store.
    fn unique_folder_id(
        &self,
        new_folder: &NewFolder,
        candidate: &ConceptCandidate,
    ) -> Result<String, RouteError> {
        let base = slugify(&new_folder.name);
        let existing = self
            .index
            .all_folder_ids()
            .map_err(|e| stage_err("commit", e))?;
        if !existing.contains(&base) {
            return Ok(base);
        }
        // Suffix with the candidate id prefix to stay deterministic.
        let suffix = &candidate.candidate_id[..candidate.candidate_id.len().min(6)];
        Ok(format!("{base}-{suffix}"))
    }

    /// Wait until the background centroid worker has drained its queue.
    ///
    /// Routing enqueues centroid refreshes asynchronously; batch callers
    /// and tests use this barrier before reading folder state.
    pub fn flush_centroid_updates(&self) {
        let (ack_tx, ack_rx) = mpsc::channel();
        if self.centroid_tx.send(CentroidJob::Barrier(ack_tx)).is_ok() {
            let _ = ack_rx.recv();
        }
    }
}

impl Drop for SmartRouter {
    fn drop(&mut self) {
        let _ = self.centroid_tx.send(CentroidJob::Shutdown);
        if let Some(worker) = self.centroid_worker.take() {
            let _ = worker.join();
        }
    }
}

// ============================================================================
// DECISION HELPERS
// ============================================================================

fn decision(
    action: RoutingAction,
    confidence: f64,
    explanation: RoutingExplanation,
) -> RoutingDecision {
    RoutingDecision {
        action,
        folder_id: None,
        new_folder: None,
        duplicate_id: None,
        references: Vec::new(),
        confidence,
        explanation,
        timestamp: Utc::now(),
    }
}

fn duplicate_decision(
    duplicate_id: String,
    confidence: f64,
    signal: &str,
    system_state: SystemState,
) -> RoutingDecision {
    RoutingDecision {
        action: RoutingAction::Duplicate,
        folder_id: None,
        new_folder: None,
        duplicate_id: Some(duplicate_id),
        references: Vec::new(),
        confidence: confidence.clamp(0.0, 1.0),
        explanation: RoutingExplanation {
            primary_signal: signal.to_string(),
            decision_factors: vec![format!("signal={signal}")],
            academic_domain: None,
            system_state,
        },
        timestamp: Utc::now(),
    }
}

/// Propose a folder from the concept title plus its top key terms.
fn propose_folder(candidate: &ConceptCandidate) -> NewFolder {
    let mut name_source = candidate
        .title_hint
        .clone()
        .unwrap_or_else(|| candidate.key_terms.join(" "));
    if name_source.trim().is_empty() {
        name_source = candidate
            .normalized_text
            .split_whitespace()
            .take(4)
            .collect::<Vec<_>>()
            .join(" ");
    }
    let name: String = name_source.chars().take(60).collect();
    let slug = slugify(&name);
    NewFolder {
        name,
        path: format!("/{slug}"),
    }
}

/// Lowercase, alphanumeric, dash-separated, bounded length.
fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut last_dash = true;
    for ch in name.chars() {
        if ch.is_alphanumeric() {
            slug.extend(ch.to_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
        if slug.len() >= 48 {
            break;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    if slug.is_empty() {
        "untitled".to_string()
    } else {
        slug
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::Batch;
    use crate::budget::RequestBudget;
    use crate::cache::ContentCache;
    use crate::centroid::CentroidManager;
    use crate::config::{BudgetConfig, CacheConfig};
    use crate::distill::{Classification, Distillation, Distiller, RetryPolicy};
    use crate::embed::{TextEmbedder, normalize};
    use crate::index::MemoryVectorIndex;
    use crate::scheduler::ReviewScheduler;
    use crate::config::Sm2Config;

    const DIMS: usize = 8;

    /// Keyword-anchored embedder. Axes 0–3 carry the topic; axes 4–7 carry
    /// deterministic per-text texture:
    ///
    /// - title vectors (no "\n\n") take a strong secondary component from
    ///   the first word, so different titles separate while a title
    ///   sharing its opening words with a stored one lands on top of it
    /// - context vectors (contain "\n\n") only get mild length jitter, so
    ///   same-topic contexts stay close
    struct AnchorEmbedder;

    impl AnchorEmbedder {
        fn axis(text: &str) -> usize {
            if text.contains("eigen") {
                0
            } else if text.contains("integral") || text.contains("derivative") {
                1
            } else if text.contains("newton") || text.contains("force") {
                2
            } else {
                3
            }
        }
    }

    impl TextEmbedder for AnchorEmbedder {
        fn embed_text(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
            let lowered = text.to_lowercase();
            let axis = Self::axis(&lowered);
            let mut v = vec![0.0_f32; DIMS];
            v[axis] = 1.0;
            if lowered.contains("\n\n") {
                // Context: same-topic texts stay within a few degrees.
                v[4 + axis] = 0.02 * (lowered.len() % 5) as f32;
            } else {
                // Title: the opening word dominates the secondary axis.
                let first_word_len = lowered.split_whitespace().next().map(str::len).unwrap_or(0);
                v[4 + (first_word_len % 4)] = 0.8;
            }
            normalize(&mut v);
            Ok(v)
        }

        fn dimensions(&self) -> usize {
            DIMS
        }

        fn model_name(&self) -> &str {
            "anchor-test"
        }
    }

    /// Distiller that titles by anchor keyword and flags ads as non-study.
    struct KeywordDistiller;

    impl Distiller for KeywordDistiller {
        fn distill(&self, text: &str, _hash: &str) -> Result<Distillation, DistillError> {
            if text.contains("% off") || text.contains("sale") {
                return Ok(Distillation {
                    title: String::new(),
                    summary: String::new(),
                    classification: Classification::NotStudy,
                });
            }
            let title: String = text.chars().take(80).collect();
            Ok(Distillation {
                title,
                summary: format!("{text} Condensed for review into a short stable summary."),
                classification: Classification::Study,
            })
        }
    }

    struct Harness {
        router: SmartRouter,
        batch: Batch,
    }

    fn harness_with(budget_config: BudgetConfig, config: EngineConfig) -> (Harness, tempfile::TempDir) {
        let dir = tempfile::TempDir::new().unwrap();
        let cache = Arc::new(ContentCache::new(&CacheConfig {
            cleanup_interval_secs: 0,
            ..CacheConfig::default()
        }));
        let budget = Arc::new(RequestBudget::new(budget_config));
        let distiller = Arc::new(
            CachingDistiller::new(
                Arc::new(KeywordDistiller),
                Arc::clone(&cache),
                Arc::clone(&budget),
            )
            .with_retry(RetryPolicy {
                max_attempts: 2,
                base_delay: std::time::Duration::from_millis(1),
            }),
        );
        let embedder = Arc::new(CachingEmbedder::new(
            Arc::new(AnchorEmbedder),
            Arc::clone(&cache),
            Arc::clone(&budget),
        ));
        let index: Arc<dyn VectorIndex> = Arc::new(MemoryVectorIndex::new(DIMS));
        let centroids = Arc::new(
            CentroidManager::new(Arc::clone(&index), config.centroid.clone(), DIMS).unwrap(),
        );
        let scheduler = Arc::new(
            ReviewScheduler::new(Some(dir.path().join("schedules")), Sm2Config::default()).unwrap(),
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
        .unwrap();
        (
            Harness {
                router,
                batch: Batch::new("Study Window", "mathematics"),
            },
            dir,
        )
    }

    fn harness() -> (Harness, tempfile::TempDir) {
        let mut config = EngineConfig::default();
        config.dimensions = DIMS;
        config.routing.dup_high_threshold = 0.95;
        harness_with(BudgetConfig::default(), config)
    }

    impl Harness {
        fn candidate(&mut self, text: &str) -> ConceptCandidate {
            let index = self.batch.push_entry(text);
            ConceptCandidate::from_entry(&self.batch, index, &self.router.config().candidate)
                .unwrap()
        }

        fn route(&mut self, text: &str) -> RoutingDecision {
            let candidate = self.candidate(text);
            let decision = self.router.route(&candidate, &CancelToken::new()).unwrap();
            // Settle background centroid work so follow-up routes see it.
            self.router.flush_centroid_updates();
            decision
        }
    }

    #[test]
    fn test_bootstrap_first_concept_creates_folder() {
        let (mut h, _dir) = harness();
        let decision = h.route("Eigenvalues describe how a linear map stretches space.");
        assert_eq!(decision.action, RoutingAction::CreateFolder);
        let new_folder = decision.new_folder.unwrap();
        assert!(new_folder.path.starts_with('/'));
        assert_eq!(decision.explanation.system_state, SystemState::Bootstrap);
    }

    #[test]
    fn test_followup_routes_into_created_folder() {
        let (mut h, _dir) = harness();
        h.route("Eigenvalues describe how a linear map stretches space.");
        let second = h.route("Eigen decomposition splits a matrix by its eigenvalues fully.");
        assert_eq!(second.action, RoutingAction::Route);
        assert!(second.folder_id.is_some());
        assert!(second.confidence >= h.router.config().routing.high_confidence_threshold);
    }

    #[test]
    fn test_rerouting_identical_text_is_duplicate() {
        let (mut h, _dir) = harness();
        let text = "Eigenvalues describe how a linear map stretches space.";
        let first = h.route(text);
        assert_eq!(first.action, RoutingAction::CreateFolder);

        // Same batch, new index, same text → different candidate id but the
        // same content hash: the hash fast path fires.
        let second = h.route(text);
        assert_eq!(second.action, RoutingAction::Duplicate);
        assert!(second.duplicate_id.is_some());
        assert_eq!(second.explanation.primary_signal, "hash-match");
        assert!((second.confidence - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_rerouting_same_candidate_resolves_to_itself() {
        let (mut h, _dir) = harness();
        let candidate = h.candidate("Eigenvalues describe how a linear map stretches space.");
        let first = h.router.route(&candidate, &CancelToken::new()).unwrap();
        assert_eq!(first.action, RoutingAction::CreateFolder);

        // Identical (batch, index, text) → identical candidate id.
        let decision = h.router.route(&candidate, &CancelToken::new()).unwrap();
        assert_eq!(decision.action, RoutingAction::Duplicate);
        assert_eq!(decision.duplicate_id.as_deref(), Some(candidate.candidate_id.as_str()));
    }

    #[test]
    fn test_near_duplicate_title_detected_by_search() {
        let (mut h, _dir) = harness();
        h.route("Eigenvalues describe how a linear map stretches space.");
        // Same anchor + same jitter bucket → title similarity ≈ 1.
        let near = "Eigenvalues describe how a linear map stretches range.";
        let decision = h.route(near);
        assert_eq!(decision.action, RoutingAction::Duplicate);
        assert_eq!(decision.explanation.primary_signal, "title-similarity");
    }

    #[test]
    fn test_non_study_content_goes_unsorted_without_upsert() {
        let (mut h, _dir) = harness();
        let decision = h.route("Huge weekend sale, fifty % off all electronics in store today!");
        assert_eq!(decision.action, RoutingAction::Unsorted);
        assert_eq!(decision.explanation.primary_signal, "non-study");
        // Nothing entered the index, so the system is still bootstrap.
        let next = h.route("Eigenvalues describe how a linear map stretches space.");
        assert_eq!(next.explanation.system_state, SystemState::Bootstrap);
    }

    #[test]
    fn test_non_study_is_not_scheduled() {
        let (mut h, _dir) = harness();
        let candidate = h.candidate("Flash sale this weekend, twenty % off everything you love!");
        h.router.route(&candidate, &CancelToken::new()).unwrap();
        assert!(h.router.scheduler().get_schedule(&candidate.candidate_id).is_none());
    }

    #[test]
    fn test_routed_concepts_are_scheduled() {
        let (mut h, _dir) = harness();
        let candidate = h.candidate("Eigenvalues describe how a linear map stretches space.");
        h.router.route(&candidate, &CancelToken::new()).unwrap();
        let schedule = h.router.scheduler().get_schedule(&candidate.candidate_id);
        assert!(schedule.is_some());
    }

    #[test]
    fn test_budget_exhaustion_forces_unsorted() {
        let mut config = EngineConfig::default();
        config.dimensions = DIMS;
        let (mut h, _dir) = harness_with(
            BudgetConfig {
                daily_request_limit: 1, // one route's distillation, then dry
                daily_token_budget: 1_000_000,
                request_timeout_secs: 5,
            },
            config,
        );
        let first = h.route("Eigenvalues describe how a linear map stretches space.");
        assert_ne!(first.explanation.primary_signal, "budget-exceeded");

        let second = h.route("Newton's second law relates force to mass and acceleration.");
        assert_eq!(second.action, RoutingAction::Unsorted);
        assert_eq!(second.explanation.primary_signal, "budget-exceeded");
        // Not stored, not scheduled.
        assert!(h.router.scheduler().stats().unwrap().total <= 1);
    }

    #[test]
    fn test_cancellation_aborts_without_commit() {
        let (mut h, _dir) = harness();
        let candidate = h.candidate("Eigenvalues describe how a linear map stretches space.");
        let token = CancelToken::new();
        token.cancel();
        let err = h.router.route(&candidate, &token).unwrap_err();
        assert!(matches!(err, RouteError::Cancelled { .. }));
        assert!(h.router.scheduler().get_schedule(&candidate.candidate_id).is_none());
    }

    #[test]
    fn test_distinct_topics_get_distinct_folders() {
        let (mut h, _dir) = harness();
        let first = h.route("Eigenvalues describe how a linear map stretches space.");
        let second = h.route("Newton's laws govern force, mass and acceleration dynamics.");
        assert_eq!(first.action, RoutingAction::CreateFolder);
        assert_eq!(second.action, RoutingAction::CreateFolder);
        assert_ne!(first.new_folder.unwrap().path, second.new_folder.unwrap().path);
    }

    #[test]
    fn test_decision_serialization_shape() {
        let (mut h, _dir) = harness();
        let decision = h.route("Eigenvalues describe how a linear map stretches space.");
        let json = serde_json::to_value(&decision).unwrap();
        assert_eq!(json["action"], "create_folder");
        assert!(json["confidence"].is_number());
        assert!(json["explanation"]["systemState"].is_string());
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Linear Algebra: Eigenvalues!"), "linear-algebra-eigenvalues");
        assert_eq!(slugify("  --  "), "untitled");
        assert!(slugify(&"x".repeat(200)).len() <= 48);
    }

    #[test]
    fn test_folder_proposal_prefers_key_terms() {
        let (mut h, _dir) = harness();
        let candidate = h.candidate("Eigenvalues eigenvalues eigenvectors define spectral structure clearly.");
        let proposal = propose_folder(&candidate);
        assert!(proposal.name.contains("eigenvalues"));
        assert_eq!(proposal.path, format!("/{}", slugify(&proposal.name)));
    }
}
