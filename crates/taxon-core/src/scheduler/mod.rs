//! Review Scheduler
//!
//! Owns per-concept SM-2 review state and answers "what is due?". State is
//! persisted as one JSON file per schedule (temp-file + rename writes) and
//! mirrored in memory for queries; the scheduler is the only writer of its
//! directory.
//!
//! Status machine:
//!
//! ```text
//! NEW ──non-FORGOT──▶ LEARNING ──3rd consecutive──▶ REVIEWING ──interval ≥ 21 d──▶ MATURE
//!                        ▲                              │                             │
//!                        └───────────── FORGOT ─────────┴─────────────────────────────┘
//! ```
//!
//! SUSPENDED schedules are excluded from due queries and reject reviews
//! until resumed.

mod sm2;
mod store;

pub use sm2::{ReviewQuality, Sm2Parameters, apply_review};
pub use store::ScheduleStore;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Mutex;
use uuid::Uuid;

use crate::config::Sm2Config;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Assumed seconds spent per review when estimating study time
const SECONDS_PER_REVIEW: f64 = 30.0;

/// Default group size for bulk scheduling
const DEFAULT_BULK_GROUP: usize = 50;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Scheduler failure modes
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    /// Filesystem failure
    #[error("Schedule IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Serialization failure
    #[error("Schedule serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    /// No schedule exists for the concept
    #[error("No schedule for concept {0}")]
    NotFound(String),
    /// The schedule is suspended and cannot be reviewed
    #[error("Schedule for concept {0} is suspended")]
    Suspended(String),
    /// Internal state was poisoned
    #[error("Scheduler state error: {0}")]
    State(String),
}

/// Scheduler result type
pub type Result<T> = std::result::Result<T, ScheduleError>;

// ============================================================================
// TYPES
// ============================================================================

/// Lifecycle status of a schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewStatus {
    /// Never reviewed
    New,
    /// In the learning phase
    Learning,
    /// Graduated into regular review
    Reviewing,
    /// Interval reached the mature threshold
    Mature,
    /// Excluded from due queries
    Suspended,
}

impl ReviewStatus {
    /// String name used on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewStatus::New => "NEW",
            ReviewStatus::Learning => "LEARNING",
            ReviewStatus::Reviewing => "REVIEWING",
            ReviewStatus::Mature => "MATURE",
            ReviewStatus::Suspended => "SUSPENDED",
        }
    }
}

impl std::fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One historical review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewRecord {
    /// When the review happened
    pub reviewed_at: DateTime<Utc>,
    /// The response grade
    pub quality: ReviewQuality,
    /// Interval produced by this review
    pub interval_days: i64,
    /// Ease factor after this review
    pub ease_factor: f64,
}

/// Per-concept spaced-repetition state (1:1 with concepts)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewSchedule {
    /// Unique schedule id
    pub schedule_id: String,
    /// The scheduled concept
    pub concept_id: String,
    /// Lifecycle status
    pub status: ReviewStatus,
    /// SM-2 triple
    pub parameters: Sm2Parameters,
    /// Consecutive non-FORGOT reviews
    pub consecutive_correct: u32,
    /// Consecutive FORGOT reviews
    pub consecutive_incorrect: u32,
    /// Total reviews ever
    pub total_reviews: u32,
    /// When the next review is due
    pub next_review_at: DateTime<Utc>,
    /// When the last review happened
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_review_at: Option<DateTime<Utc>>,
    /// When the schedule was created
    pub created_at: DateTime<Utc>,
    /// Full review history, oldest first
    #[serde(default)]
    pub history: Vec<ReviewRecord>,
}

impl ReviewSchedule {
    /// Whether the schedule is due at `now`.
    pub fn is_due_at(&self, now: DateTime<Utc>) -> bool {
        self.status != ReviewStatus::Suspended && self.next_review_at <= now
    }
}

/// Options for [`ReviewScheduler::due_reviews`]
#[derive(Debug, Clone, Default)]
pub struct DueQuery {
    /// Maximum schedules returned
    pub limit: Option<usize>,
    /// Sort hardest (lowest ease) first instead of oldest-due first
    pub prioritize_by_difficulty: bool,
}

/// Options for [`ReviewScheduler::bulk_schedule`]
#[derive(Debug, Clone)]
pub struct BulkOptions {
    /// Concepts per persistence group
    pub batch_size: usize,
    /// Leave existing schedules untouched
    pub skip_existing: bool,
}

impl Default for BulkOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BULK_GROUP,
            skip_existing: true,
        }
    }
}

/// Outcome of a bulk scheduling run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkScheduleReport {
    /// Newly created schedules
    pub created: usize,
    /// Concepts that already had a schedule
    pub skipped: usize,
    /// Concepts whose schedule failed to persist
    pub errors: usize,
}

/// Interval each grade would produce, without mutating anything
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewIntervals {
    /// Days if graded FORGOT
    pub forgot: i64,
    /// Days if graded HARD
    pub hard: i64,
    /// Days if graded GOOD
    pub good: i64,
    /// Days if graded EASY
    pub easy: i64,
}

/// Aggregate scheduler statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStats {
    /// Total schedules
    pub total: usize,
    /// Count per status
    pub by_status: BTreeMap<String, usize>,
    /// Mean ease factor over non-suspended schedules
    pub average_ease_factor: f64,
    /// Schedules due right now
    pub due_now: usize,
}

/// The near-term review workload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewPlan {
    /// Due right now
    pub due_now: usize,
    /// Due within 24 hours
    pub due_today: usize,
    /// Due within 48 hours
    pub due_tomorrow: usize,
    /// Due within 7 days
    pub due_this_week: usize,
}

/// Scheduler health snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerHealth {
    /// Aggregate statistics
    pub stats: SchedulerStats,
    /// Schedules overdue by more than a week
    pub heavily_overdue: usize,
    /// Storage directory in use
    pub storage_dir: String,
}

// ============================================================================
// REVIEW SCHEDULER
// ============================================================================

/// Persistent SM-2 scheduler, one logical writer per concept
pub struct ReviewScheduler {
    store: ScheduleStore,
    schedules: Mutex<HashMap<String, ReviewSchedule>>,
    config: Sm2Config,
}

impl ReviewScheduler {
    /// Open a scheduler over the given directory (or the platform default)
    /// and load every persisted schedule.
    pub fn new(dir: Option<PathBuf>, config: Sm2Config) -> Result<Self> {
        let dir = match dir {
            Some(dir) => dir,
            None => {
                let project = directories::ProjectDirs::from("io", "taxon", "core")
                    .ok_or_else(|| {
                        ScheduleError::State("could not determine data directory".to_string())
                    })?;
                project.data_dir().join("schedules")
            }
        };
        let store = ScheduleStore::open(dir)?;
        let schedules = store.load_all()?;
        tracing::debug!(count = schedules.len(), dir = %store.dir().display(), "schedules loaded");
        Ok(Self {
            store,
            schedules: Mutex::new(schedules),
            config,
        })
    }

    fn locked(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, ReviewSchedule>>> {
        self.schedules
            .lock()
            .map_err(|_| ScheduleError::State("schedule table poisoned".to_string()))
    }

    /// Create a NEW schedule for the concept if absent; returns the
    /// existing one untouched otherwise.
    pub fn schedule(
        &self,
        concept_id: &str,
        parameters: Option<Sm2Parameters>,
    ) -> Result<ReviewSchedule> {
        let mut schedules = self.locked()?;
        if let Some(existing) = schedules.get(concept_id) {
            return Ok(existing.clone());
        }

        let now = Utc::now();
        let schedule = ReviewSchedule {
            schedule_id: Uuid::new_v4().to_string(),
            concept_id: concept_id.to_string(),
            status: ReviewStatus::New,
            parameters: parameters.unwrap_or_else(|| Sm2Parameters::initial(&self.config)),
            consecutive_correct: 0,
            consecutive_incorrect: 0,
            total_reviews: 0,
            next_review_at: now,
            last_review_at: None,
            created_at: now,
            history: Vec::new(),
        };
        self.store.save(&schedule)?;
        schedules.insert(concept_id.to_string(), schedule.clone());
        Ok(schedule)
    }

    /// Apply one review and persist the updated schedule.
    pub fn process_review(
        &self,
        concept_id: &str,
        quality: ReviewQuality,
    ) -> Result<ReviewSchedule> {
        let mut schedules = self.locked()?;
        let schedule = schedules
            .get_mut(concept_id)
            .ok_or_else(|| ScheduleError::NotFound(concept_id.to_string()))?;
        if schedule.status == ReviewStatus::Suspended {
            return Err(ScheduleError::Suspended(concept_id.to_string()));
        }

        let now = Utc::now();
        schedule.parameters = apply_review(&schedule.parameters, quality, &self.config);
        schedule.total_reviews += 1;
        schedule.last_review_at = Some(now);
        schedule.next_review_at = now + Duration::days(schedule.parameters.interval_days);

        if quality == ReviewQuality::Forgot {
            schedule.consecutive_incorrect += 1;
            schedule.consecutive_correct = 0;
            schedule.status = ReviewStatus::Learning;
        } else {
            schedule.consecutive_correct += 1;
            schedule.consecutive_incorrect = 0;
            schedule.status = match schedule.status {
                ReviewStatus::New => ReviewStatus::Learning,
                ReviewStatus::Learning if schedule.consecutive_correct >= 3 => {
                    ReviewStatus::Reviewing
                }
                other => other,
            };
            if schedule.parameters.interval_days >= self.config.mature_interval_days
                && matches!(schedule.status, ReviewStatus::Reviewing | ReviewStatus::Mature)
            {
                schedule.status = ReviewStatus::Mature;
            }
        }

        schedule.history.push(ReviewRecord {
            reviewed_at: now,
            quality,
            interval_days: schedule.parameters.interval_days,
            ease_factor: schedule.parameters.ease_factor,
        });

        self.store.save(schedule)?;
        Ok(schedule.clone())
    }

    /// The schedule for a concept, if one exists.
    pub fn get_schedule(&self, concept_id: &str) -> Option<ReviewSchedule> {
        self.locked().ok()?.get(concept_id).cloned()
    }

    /// Schedules due now, non-suspended, oldest due first (or hardest
    /// first with `prioritize_by_difficulty`).
    pub fn due_reviews(&self, query: &DueQuery) -> Result<Vec<ReviewSchedule>> {
        let now = Utc::now();
        let schedules = self.locked()?;
        let mut due: Vec<ReviewSchedule> = schedules
            .values()
            .filter(|s| s.is_due_at(now))
            .cloned()
            .collect();
        drop(schedules);

        if query.prioritize_by_difficulty {
            due.sort_by(|a, b| {
                a.parameters
                    .ease_factor
                    .partial_cmp(&b.parameters.ease_factor)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.next_review_at.cmp(&b.next_review_at))
            });
        } else {
            due.sort_by(|a, b| a.next_review_at.cmp(&b.next_review_at));
        }
        if let Some(limit) = query.limit {
            due.truncate(limit);
        }
        Ok(due)
    }

    /// Exclude a schedule from due queries.
    pub fn suspend(&self, concept_id: &str) -> Result<ReviewSchedule> {
        self.set_status(concept_id, ReviewStatus::Suspended)
    }

    /// Bring a suspended schedule back; its status is re-derived from the
    /// SM-2 state it carries.
    pub fn resume(&self, concept_id: &str) -> Result<ReviewSchedule> {
        let mut schedules = self.locked()?;
        let schedule = schedules
            .get_mut(concept_id)
            .ok_or_else(|| ScheduleError::NotFound(concept_id.to_string()))?;
        if schedule.status == ReviewStatus::Suspended {
            schedule.status = derive_status(schedule, &self.config);
            self.store.save(schedule)?;
        }
        Ok(schedule.clone())
    }

    fn set_status(&self, concept_id: &str, status: ReviewStatus) -> Result<ReviewSchedule> {
        let mut schedules = self.locked()?;
        let schedule = schedules
            .get_mut(concept_id)
            .ok_or_else(|| ScheduleError::NotFound(concept_id.to_string()))?;
        schedule.status = status;
        self.store.save(schedule)?;
        Ok(schedule.clone())
    }

    /// Schedule many concepts in persistence groups with a directory flush
    /// per group.
    pub fn bulk_schedule(
        &self,
        concept_ids: &[String],
        options: &BulkOptions,
    ) -> Result<BulkScheduleReport> {
        let mut report = BulkScheduleReport::default();
        for group in concept_ids.chunks(options.batch_size.max(1)) {
            for concept_id in group {
                let exists = self.locked()?.contains_key(concept_id);
                if exists && options.skip_existing {
                    report.skipped += 1;
                    continue;
                }
                if exists {
                    // Reset requested: drop the old schedule first.
                    self.locked()?.remove(concept_id);
                }
                match self.schedule(concept_id, None) {
                    Ok(_) => report.created += 1,
                    Err(err) => {
                        tracing::warn!(concept = %concept_id, error = %err, "bulk schedule failed");
                        report.errors += 1;
                    }
                }
            }
            self.store.sync_dir()?;
        }
        Ok(report)
    }

    /// Drop schedules whose concepts no longer exist. Returns how many
    /// were removed.
    pub fn cleanup_orphaned(&self, valid_ids: &HashSet<String>) -> Result<usize> {
        let mut schedules = self.locked()?;
        let orphaned: Vec<String> = schedules
            .keys()
            .filter(|id| !valid_ids.contains(*id))
            .cloned()
            .collect();
        for concept_id in &orphaned {
            self.store.delete(concept_id)?;
            schedules.remove(concept_id);
        }
        if !orphaned.is_empty() {
            tracing::info!(removed = orphaned.len(), "orphaned schedules removed");
        }
        Ok(orphaned.len())
    }

    /// The interval each grade would produce for this concept right now.
    pub fn preview_intervals(&self, concept_id: &str) -> Result<PreviewIntervals> {
        let schedules = self.locked()?;
        let schedule = schedules
            .get(concept_id)
            .ok_or_else(|| ScheduleError::NotFound(concept_id.to_string()))?;
        let days = |quality| apply_review(&schedule.parameters, quality, &self.config).interval_days;
        Ok(PreviewIntervals {
            forgot: days(ReviewQuality::Forgot),
            hard: days(ReviewQuality::Hard),
            good: days(ReviewQuality::Good),
            easy: days(ReviewQuality::Easy),
        })
    }

    /// Aggregate statistics.
    pub fn stats(&self) -> Result<SchedulerStats> {
        let now = Utc::now();
        let schedules = self.locked()?;
        let mut by_status: BTreeMap<String, usize> = BTreeMap::new();
        let mut ease_sum = 0.0;
        let mut ease_count = 0usize;
        let mut due_now = 0usize;
        for schedule in schedules.values() {
            *by_status.entry(schedule.status.to_string()).or_insert(0) += 1;
            if schedule.status != ReviewStatus::Suspended {
                ease_sum += schedule.parameters.ease_factor;
                ease_count += 1;
            }
            if schedule.is_due_at(now) {
                due_now += 1;
            }
        }
        Ok(SchedulerStats {
            total: schedules.len(),
            by_status,
            average_ease_factor: if ease_count > 0 {
                ease_sum / ease_count as f64
            } else {
                0.0
            },
            due_now,
        })
    }

    /// The near-term workload.
    pub fn review_plan(&self) -> Result<ReviewPlan> {
        let now = Utc::now();
        let schedules = self.locked()?;
        let mut plan = ReviewPlan {
            due_now: 0,
            due_today: 0,
            due_tomorrow: 0,
            due_this_week: 0,
        };
        for schedule in schedules.values() {
            if schedule.status == ReviewStatus::Suspended {
                continue;
            }
            let due = schedule.next_review_at;
            if due <= now {
                plan.due_now += 1;
            }
            if due <= now + Duration::hours(24) {
                plan.due_today += 1;
            }
            if due <= now + Duration::hours(48) {
                plan.due_tomorrow += 1;
            }
            if due <= now + Duration::days(7) {
                plan.due_this_week += 1;
            }
        }
        Ok(plan)
    }

    /// Health snapshot for operators.
    pub fn system_health(&self) -> Result<SchedulerHealth> {
        let stats = self.stats()?;
        let cutoff = Utc::now() - Duration::days(7);
        let heavily_overdue = self
            .locked()?
            .values()
            .filter(|s| s.status != ReviewStatus::Suspended && s.next_review_at < cutoff)
            .count();
        Ok(SchedulerHealth {
            stats,
            heavily_overdue,
            storage_dir: self.store.dir().display().to_string(),
        })
    }

    /// Estimated minutes of review work due in the next 24 hours.
    pub fn estimate_daily_study_time(&self) -> Result<f64> {
        let plan = self.review_plan()?;
        Ok(plan.due_today as f64 * SECONDS_PER_REVIEW / 60.0)
    }
}

/// Re-derive a resumed schedule's status from its SM-2 state.
fn derive_status(schedule: &ReviewSchedule, config: &Sm2Config) -> ReviewStatus {
    if schedule.total_reviews == 0 {
        ReviewStatus::New
    } else if schedule.parameters.interval_days >= config.mature_interval_days {
        ReviewStatus::Mature
    } else if schedule.consecutive_correct >= 3 {
        ReviewStatus::Reviewing
    } else {
        ReviewStatus::Learning
    }
}

// ============================================================================
// TESTS
// ============================================================================
