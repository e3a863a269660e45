//! Routing journeys: duplicate detection, bootstrap folder creation,
//! cross-domain references, non-study rejection, and budget exhaustion —
//! each exercised through the full pipeline with the lexicon mocks.

use std::sync::atomic::Ordering;

use taxon_core::{RoutingAction, SystemState};
use taxon_e2e_tests::harness::EngineHarness;

// ============================================================================
// DUPLICATE DETECTION
// ============================================================================

#[test]
fn paraphrased_concept_is_detected_as_duplicate() {
    let mut h = EngineHarness::new();

    let t1 = "Eigenvalues: for square matrix A, Av=λv iff v is an eigenvector.";
    let t2 = "For matrix A, an eigenvector v satisfies A·v = λ·v for some eigenvalue λ.";

    let first_candidate = h.candidate(t1);
    let first = h
        .router
        .route(&first_candidate, &taxon_core::CancelToken::new())
        .unwrap();
    h.router.flush_centroid_updates();
    assert!(
        matches!(first.action, RoutingAction::Route | RoutingAction::CreateFolder),
        "first routing was {:?}",
        first.action
    );

    let second = h.route_text(t2);
    assert_eq!(second.action, RoutingAction::Duplicate);
    // The paraphrase resolves to the stored concept, not to itself.
    assert_eq!(
        second.duplicate_id.as_deref(),
        Some(first_candidate.candidate_id.as_str())
    );
    assert!(second.confidence >= 0.85);
}

#[test]
fn identical_text_is_duplicate_by_content_hash() {
    let mut h = EngineHarness::new();
    let text = "The derivative measures the instantaneous rate of change of a function.";
    h.route_text(text);

    let second = h.route_text(text);
    assert_eq!(second.action, RoutingAction::Duplicate);
    assert_eq!(second.explanation.primary_signal, "hash-match");
    assert!((second.confidence - 1.0).abs() < f64::EPSILON);
}

// ============================================================================
// BOOTSTRAP FOLDER CREATION
// ============================================================================

#[test]
fn bootstrap_creates_then_routes_with_high_confidence() {
    let mut h = EngineHarness::new();
    let high = h.router.config().routing.high_confidence_threshold;

    let first = h.route_text("The derivative measures the instantaneous rate of change.");
    assert_eq!(first.action, RoutingAction::CreateFolder);
    assert_eq!(first.explanation.system_state, SystemState::Bootstrap);
    let folder_path = first.new_folder.expect("folder proposal").path;
    assert!(folder_path.starts_with('/'));

    let second =
        h.route_text("The integral accumulates area under a curve by the fundamental theorem.");
    assert_eq!(second.action, RoutingAction::Route, "{second:?}");
    assert!(second.confidence >= high, "confidence {}", second.confidence);

    let third = h.route_text("Matrix algebra underpins systems of linear equations.");
    assert_eq!(third.action, RoutingAction::Route, "{third:?}");
    assert!(third.confidence >= high, "confidence {}", third.confidence);
    assert_eq!(second.folder_id, third.folder_id);
}

// ============================================================================
// CROSS-DOMAIN REFERENCES
// ============================================================================

#[test]
fn cross_domain_concept_routes_with_reference() {
    let mut h = EngineHarness::new();

    // Populate a math folder...
    h.route_text("Eigenvalues reveal the spectral structure of a linear operator.");
    h.route_text("The derivative measures the instantaneous rate of change of a function.");
    h.route_text("The integral accumulates area under a curve by the fundamental theorem.");
    // ...and a physics folder.
    let p1 = h.route_text("Newton's second law relates force to mass times acceleration.");
    assert_eq!(p1.action, RoutingAction::CreateFolder, "{p1:?}");
    let p2 = h.route_text("Momentum and energy are conserved in every isolated quantum system.");
    assert_eq!(p2.action, RoutingAction::Route, "{p2:?}");
    let physics_folder = p2.folder_id.expect("physics folder");

    // Covariance straddles statistics and physics in the mock lexicon.
    let pca =
        h.route_text("PCA uses eigendecomposition of the covariance matrix for dimensionality reduction.");
    assert_eq!(pca.action, RoutingAction::Route, "{pca:?}");
    let math_folder = pca.folder_id.expect("math folder");
    assert_ne!(math_folder, physics_folder);
    assert!(
        pca.references.contains(&physics_folder),
        "references {:?} missing {physics_folder}",
        pca.references
    );
}

// ============================================================================
// NON-STUDY REJECTION
// ============================================================================

#[test]
fn advertisement_is_unsorted_without_storage() {
    let mut h = EngineHarness::new();
    let decision = h.route_text("50% off all electronics this weekend!");
    assert_eq!(decision.action, RoutingAction::Unsorted);
    assert_eq!(decision.explanation.primary_signal, "non-study");

    // No upsert happened: the next study snippet still sees bootstrap.
    let next = h.route_text("Eigenvalues reveal the spectral structure of a linear operator.");
    assert_eq!(next.explanation.system_state, SystemState::Bootstrap);
    assert_eq!(next.action, RoutingAction::CreateFolder);
}

// ============================================================================
// BUDGET EXHAUSTION
// ============================================================================

#[test]
fn second_route_fails_fast_on_request_budget() {
    let mut h = EngineHarness::with(
        taxon_e2e_tests::harness::e2e_config(),
        taxon_core::BudgetConfig {
            daily_request_limit: 1,
            daily_token_budget: 1_000_000,
            request_timeout_secs: 5,
        },
    );

    let first = h.route_text("The derivative measures the instantaneous rate of change.");
    assert_eq!(first.action, RoutingAction::CreateFolder);
    let upstream_after_first = (
        h.counts.distill.load(Ordering::SeqCst),
        h.counts.embed.load(Ordering::SeqCst),
    );

    let second = h.route_text("Newton's second law relates force to mass times acceleration.");
    assert_eq!(second.action, RoutingAction::Unsorted);
    assert_eq!(second.explanation.primary_signal, "budget-exceeded");

    // Zero further upstream calls: both providers untouched by the second route.
    assert_eq!(h.counts.distill.load(Ordering::SeqCst), upstream_after_first.0);
    assert_eq!(h.counts.embed.load(Ordering::SeqCst), upstream_after_first.1);

    // And nothing was scheduled for the starved candidate.
    assert_eq!(h.router.scheduler().stats().unwrap().total, 1);
}

// ============================================================================
// SCHEDULING SIDE EFFECTS
// ============================================================================

#[test]
fn stored_concepts_get_new_schedules() {
    let mut h = EngineHarness::new();
    let candidate = h.candidate("Eigenvalues reveal the spectral structure of a linear operator.");
    let decision = h
        .router
        .route(&candidate, &taxon_core::CancelToken::new())
        .unwrap();
    assert_eq!(decision.action, RoutingAction::CreateFolder);

    let schedule = h
        .router
        .scheduler()
        .get_schedule(&candidate.candidate_id)
        .expect("schedule created");
    assert_eq!(schedule.status, taxon_core::ReviewStatus::New);
    assert_eq!(schedule.concept_id, candidate.candidate_id);
}

#[test]
fn duplicates_do_not_create_second_schedules() {
    let mut h = EngineHarness::new();
    let text = "The integral accumulates area under a curve by the fundamental theorem.";
    h.route_text(text);
    let before = h.router.scheduler().stats().unwrap().total;
    let second = h.route_text(text);
    assert_eq!(second.action, RoutingAction::Duplicate);
    assert_eq!(h.router.scheduler().stats().unwrap().total, before);
}
