//! Batch journeys: whole-batch ingestion with admission accounting, and
//! the clustering pass that proposes folders for unsorted items.

use taxon_core::{Batch, CancelToken, RoutingAction};
use taxon_e2e_tests::harness::{EngineHarness, e2e_config};

#[test]
fn ingest_batch_accounts_for_every_entry() {
    let h = EngineHarness::new();
    let mut batch = Batch::new("Calculus Notes", "calculus");
    batch.push_entry("The derivative measures the instantaneous rate of change of a function.");
    batch.push_entry("The integral accumulates area under a curve by the fundamental theorem.");
    batch.push_entry("ok"); // too short: rejected at admission
    batch.push_entry("50% off all electronics this weekend in the downtown store!"); // non-study

    let report = h.router.ingest_batch(&batch, &CancelToken::new());

    assert_eq!(report.total_entries, 4);
    assert_eq!(report.admitted, 3);
    assert_eq!(report.rejected.len(), 1);
    assert_eq!(report.rejected[0].index, 2);

    assert_eq!(report.created_folders, 1, "first calculus snippet bootstraps a folder");
    assert_eq!(report.routed, 1, "second calculus snippet joins it");
    assert_eq!(report.unsorted, 1, "the ad is deferred");
    assert_eq!(report.errors, 0);
    assert_eq!(report.batch.decisions.len(), 3);
}

#[test]
fn unsorted_items_cluster_into_folder_suggestions() {
    // Folder creation off: everything unfamiliar lands unsorted.
    let mut config = e2e_config();
    config.context.enable_folder_creation = false;
    let h = EngineHarness::with(config, taxon_core::BudgetConfig::default());

    let mut batch = Batch::new("Chemistry Notes", "chemistry");
    batch.push_entry("A molecule forms when atoms share electron pairs in covalent arrangement.");
    batch.push_entry("Every chemical reaction conserves mass while rearranging atomic partners.");
    batch.push_entry("Entropy measures the disorder a spontaneous process tends to increase.");

    let report = h.router.ingest_batch(&batch, &CancelToken::new());
    assert_eq!(report.unsorted, 3);

    assert_eq!(report.batch.clusters.len(), 1, "{:?}", report.batch.clusters);
    let cluster = &report.batch.clusters[0];
    assert_eq!(cluster.member_ids.len(), 3);
    assert!(cluster.mean_similarity > 0.75);

    assert_eq!(report.batch.suggested_folders.len(), 1);
    let suggestion = &report.batch.suggested_folders[0];
    assert!(suggestion.path.starts_with('/'));
    assert_eq!(suggestion.member_ids.len(), 3);
}

#[test]
fn small_unsorted_groups_do_not_suggest_folders() {
    let mut config = e2e_config();
    config.context.enable_folder_creation = false;
    let h = EngineHarness::with(config, taxon_core::BudgetConfig::default());

    let mut batch = Batch::new("Chemistry Notes", "chemistry");
    batch.push_entry("A molecule forms when atoms share electron pairs in covalent arrangement.");
    batch.push_entry("Every chemical reaction conserves mass while rearranging atomic partners.");

    let report = h.router.ingest_batch(&batch, &CancelToken::new());
    assert_eq!(report.unsorted, 2);
    // A pair clusters, but stays below the suggestion minimum of three.
    assert_eq!(report.batch.clusters.len(), 1);
    assert!(report.batch.suggested_folders.is_empty());
}

#[test]
fn duplicate_within_batch_is_detected() {
    let h = EngineHarness::new();
    let mut batch = Batch::new("Notes", "math");
    let text = "The derivative measures the instantaneous rate of change of a function.";
    batch.push_entry(text);
    batch.push_entry(text);

    let report = h.router.ingest_batch(&batch, &CancelToken::new());
    assert_eq!(report.total_entries, 2);
    assert_eq!(report.errors, 0);
    assert_eq!(report.created_folders, 1);
    assert_eq!(report.duplicates, 1);
}
