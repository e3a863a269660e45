//! Scheduler journeys: SM-2 progression over a routed concept, crash-safe
//! persistence, and the due-review workflow.

use taxon_core::{
    CancelToken, DueQuery, ReviewQuality, ReviewScheduler, ReviewStatus, RoutingAction, Sm2Config,
};
use taxon_e2e_tests::harness::EngineHarness;

// ============================================================================
// SM-2 PROGRESSION (routed concept, six GOOD reviews)
// ============================================================================

#[test]
fn six_good_reviews_progress_new_to_mature() {
    let mut h = EngineHarness::new();
    let candidate = h.candidate("The derivative measures the instantaneous rate of change.");
    let decision = h.router.route(&candidate, &CancelToken::new()).unwrap();
    assert_eq!(decision.action, RoutingAction::CreateFolder);

    let scheduler = h.router.scheduler();
    assert_eq!(
        scheduler.get_schedule(&candidate.candidate_id).unwrap().status,
        ReviewStatus::New
    );

    let mut intervals = Vec::new();
    let mut statuses = Vec::new();
    for _ in 0..6 {
        let schedule = scheduler
            .process_review(&candidate.candidate_id, ReviewQuality::Good)
            .unwrap();
        intervals.push(schedule.parameters.interval_days);
        statuses.push(schedule.status);
    }

    // 1, 6, then round(previous · EF) with EF pinned at 2.5 by GOOD.
    assert_eq!(intervals[..4], [1, 6, 15, 38]);
    assert_eq!(statuses[0], ReviewStatus::Learning);
    assert_eq!(statuses[1], ReviewStatus::Learning);
    assert_eq!(statuses[2], ReviewStatus::Reviewing);
    // Interval 38 ≥ 21 days: mature from the fourth review on.
    assert!(statuses[3..].iter().all(|s| *s == ReviewStatus::Mature));
}

#[test]
fn forgot_resets_to_learning_with_floor_respected() {
    let mut h = EngineHarness::new();
    let candidate = h.candidate("The integral accumulates area by the fundamental theorem.");
    h.router.route(&candidate, &CancelToken::new()).unwrap();

    let scheduler = h.router.scheduler();
    for _ in 0..5 {
        scheduler
            .process_review(&candidate.candidate_id, ReviewQuality::Good)
            .unwrap();
    }
    let lapsed = scheduler
        .process_review(&candidate.candidate_id, ReviewQuality::Forgot)
        .unwrap();
    assert_eq!(lapsed.status, ReviewStatus::Learning);
    assert_eq!(lapsed.parameters.interval_days, 1);
    assert_eq!(lapsed.consecutive_correct, 0);
    assert!(lapsed.parameters.ease_factor >= 1.3);
}

// ============================================================================
// PERSISTENCE
// ============================================================================

#[test]
fn schedules_survive_restart_bit_equal() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("schedules");

    let before = {
        let scheduler = ReviewScheduler::new(Some(path.clone()), Sm2Config::default()).unwrap();
        scheduler.schedule("concept-a", None).unwrap();
        scheduler.process_review("concept-a", ReviewQuality::Good).unwrap();
        scheduler.process_review("concept-a", ReviewQuality::Hard).unwrap();
        scheduler.suspend("concept-a").unwrap();
        scheduler.schedule("concept-b", None).unwrap();
        (
            scheduler.get_schedule("concept-a").unwrap(),
            scheduler.get_schedule("concept-b").unwrap(),
        )
    };

    let reloaded = ReviewScheduler::new(Some(path), Sm2Config::default()).unwrap();
    assert_eq!(reloaded.get_schedule("concept-a").unwrap(), before.0);
    assert_eq!(reloaded.get_schedule("concept-b").unwrap(), before.1);

    // Suspension survives the restart and still gates reviews.
    assert!(reloaded.process_review("concept-a", ReviewQuality::Good).is_err());
}

// ============================================================================
// DUE WORKFLOW
// ============================================================================

#[test]
fn due_workflow_over_routed_concepts() {
    let mut h = EngineHarness::new();
    let texts = [
        "The derivative measures the instantaneous rate of change.",
        "Newton's second law relates force to mass times acceleration.",
        "Molecule formation depends on reaction energy and entropy balance.",
    ];
    let mut ids = Vec::new();
    for text in texts {
        let candidate = h.candidate(text);
        h.router.route(&candidate, &CancelToken::new()).unwrap();
        h.router.flush_centroid_updates();
        ids.push(candidate.candidate_id);
    }

    let scheduler = h.router.scheduler();
    let due = scheduler.due_reviews(&DueQuery::default()).unwrap();
    assert_eq!(due.len(), 3, "all new schedules are due immediately");
    for pair in due.windows(2) {
        assert!(pair[0].next_review_at <= pair[1].next_review_at);
    }

    // Reviewing one pushes it out of the due set.
    scheduler.process_review(&ids[0], ReviewQuality::Good).unwrap();
    let due = scheduler.due_reviews(&DueQuery::default()).unwrap();
    assert_eq!(due.len(), 2);
    assert!(due.iter().all(|s| s.concept_id != ids[0]));

    // Suspension removes, resume restores.
    scheduler.suspend(&ids[1]).unwrap();
    assert_eq!(scheduler.due_reviews(&DueQuery::default()).unwrap().len(), 1);
    scheduler.resume(&ids[1]).unwrap();
    assert_eq!(scheduler.due_reviews(&DueQuery::default()).unwrap().len(), 2);

    let plan = scheduler.review_plan().unwrap();
    assert_eq!(plan.due_now, 2);
    assert!(scheduler.estimate_daily_study_time().unwrap() > 0.0);
}
