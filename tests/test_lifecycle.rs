//! Lifecycle integration tests against a real on-disk datastore.

mod common;
use common::*;

use bugbook::datastore::Datastore;
use bugbook::dedup::{deduplicate, unique};
use bugbook::diff::{diff, DiffMode, StatusFilter};
use bugbook::merge::{merge, StoreRequest};
use bugbook::status::{DetectionStatus, ReviewStatus};
use bugbook::Error;

use pretty_assertions::assert_eq;

const CACHE_SIZE: i64 = -8192;

fn open_datastore(temp: &TempDir) -> Datastore {
    Datastore::create_or_open(&temp.path().join("datastore.bb"), CACHE_SIZE)
        .expect("datastore should open")
}

fn store_request(run: &str, files: &[&str], findings: Vec<bugbook::identity::HashedFinding>) -> StoreRequest {
    let mut request = StoreRequest::new(run);
    request.files_analyzed = files.iter().map(|f| f.to_string()).collect();
    request.findings = findings;
    request
}

#[test]
fn store_resolve_reopen_cycle() {
    let temp = TempDir::new().unwrap();
    let mut datastore = open_datastore(&temp);

    let f1 = hashed(test_finding("a.c", "core.DivideZero", 12, "total / count"));

    // First store: the finding is new.
    let outcome = merge(&mut datastore, store_request("nightly", &["a.c"], vec![f1.clone()])).unwrap();
    assert_eq!(outcome.count(DetectionStatus::New), 1);

    let records = datastore.load_findings(outcome.run.id).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].detection_status, DetectionStatus::New);
    assert_eq!(records[0].review.status, ReviewStatus::Unreviewed);

    // Second store re-analyzes a.c and the finding is gone.
    let outcome = merge(&mut datastore, store_request("nightly", &["a.c"], vec![])).unwrap();
    assert_eq!(outcome.count(DetectionStatus::Resolved), 1);

    let records = datastore.load_findings(outcome.run.id).unwrap();
    assert_eq!(records[0].detection_status, DetectionStatus::Resolved);

    // Third store sees it again.
    let outcome = merge(&mut datastore, store_request("nightly", &["a.c"], vec![f1])).unwrap();
    assert_eq!(outcome.count(DetectionStatus::Reopened), 1);

    let records = datastore.load_findings(outcome.run.id).unwrap();
    assert_eq!(records[0].detection_status, DetectionStatus::Reopened);
}

#[test]
fn incremental_store_leaves_other_files_alone() {
    let temp = TempDir::new().unwrap();
    let mut datastore = open_datastore(&temp);

    let fa = hashed(test_finding("a.c", "core.DivideZero", 12, "total / count"));
    let fb = hashed(test_finding("b.c", "core.NullDereference", 30, "*slot = value"));

    let outcome = merge(
        &mut datastore,
        store_request("nightly", &["a.c", "b.c"], vec![fa.clone(), fb.clone()]),
    )
    .unwrap();
    assert_eq!(outcome.count(DetectionStatus::New), 2);

    // Re-analyze only a.c, with its finding gone. b.c's finding must keep its status.
    let outcome = merge(&mut datastore, store_request("nightly", &["a.c"], vec![])).unwrap();
    let records = datastore.load_findings(outcome.run.id).unwrap();

    let status_of = |hash: &bugbook::identity::IdentityHash| {
        records
            .iter()
            .find(|r| &r.hash == hash)
            .map(|r| r.detection_status)
            .unwrap()
    };
    assert_eq!(status_of(&fa.hash), DetectionStatus::Resolved);
    assert_eq!(status_of(&fb.hash), DetectionStatus::New);
}

#[test]
fn force_store_resolves_everything_absent() {
    let temp = TempDir::new().unwrap();
    let mut datastore = open_datastore(&temp);

    let fa = hashed(test_finding("a.c", "core.DivideZero", 12, "total / count"));
    let fb = hashed(test_finding("b.c", "core.NullDereference", 30, "*slot = value"));

    merge(
        &mut datastore,
        store_request("nightly", &["a.c", "b.c"], vec![fa.clone(), fb]),
    )
    .unwrap();

    // Force-store only a.c with only its finding: b.c drops out of the analysis entirely.
    let mut request = store_request("nightly", &["a.c"], vec![fa.clone()]);
    request.force = true;
    let outcome = merge(&mut datastore, request).unwrap();

    let records = datastore.load_findings(outcome.run.id).unwrap();
    let b_record = records.iter().find(|r| r.finding.file_path == "b.c").unwrap();
    assert_eq!(b_record.detection_status, DetectionStatus::Unavailable);
    let a_record = records.iter().find(|r| r.finding.file_path == "a.c").unwrap();
    assert_eq!(a_record.detection_status, DetectionStatus::Unresolved);
}

#[test]
fn shared_header_dedup_and_uniqueing() {
    // The same logical bug reported via two translation units that include the same header: the
    // report location is the header itself both times.
    let via_a = hashed(test_finding("lib.h", "core.UninitRead", 7, "int x = cfg->threshold;"));
    let via_b = hashed(test_finding("lib.h", "core.UninitRead", 7, "int x = cfg->threshold;"));
    assert_eq!(via_a.hash, via_b.hash);

    let deduped = deduplicate(vec![via_a.clone(), via_b]);
    assert_eq!(deduped.len(), 1);

    // The same defect also copied into a second header: one per file after dedup, one overall
    // after uniqueing.
    let mut copied = via_a.clone();
    copied.finding.file_path = "lib_compat.h".to_string();
    let deduped = deduplicate(vec![via_a, copied]);
    assert_eq!(deduped.len(), 2);
    assert_eq!(unique(deduped).len(), 1);
}

#[test]
fn concurrent_merge_is_rejected() {
    let temp = TempDir::new().unwrap();
    let mut datastore = open_datastore(&temp);

    let f1 = hashed(test_finding("a.c", "core.DivideZero", 12, "total / count"));
    merge(&mut datastore, store_request("nightly", &["a.c"], vec![f1.clone()])).unwrap();

    // Simulate a merge in flight on the same run name.
    datastore.lock_run("nightly").unwrap();

    let err = merge(&mut datastore, store_request("nightly", &["a.c"], vec![f1])).unwrap_err();
    match err.downcast_ref::<Error>() {
        Some(Error::RunLocked { run }) => assert_eq!(run, "nightly"),
        other => panic!("expected RunLocked, got {other:?}"),
    }

    // A different run name is unaffected.
    let f2 = hashed(test_finding("z.c", "core.DivideZero", 3, "x / y"));
    merge(&mut datastore, store_request("other", &["z.c"], vec![f2])).unwrap();

    datastore.unlock_run("nightly").unwrap();
}

#[test]
fn diff_between_run_and_local_batch() {
    let temp = TempDir::new().unwrap();
    let mut datastore = open_datastore(&temp);

    let old = hashed(test_finding("a.c", "core.DivideZero", 12, "total / count"));
    let kept = hashed(test_finding("a.c", "core.NullDereference", 20, "*p = 0"));
    let outcome = merge(
        &mut datastore,
        store_request("nightly", &["a.c"], vec![old.clone(), kept.clone()]),
    )
    .unwrap();

    // A just-analyzed batch that fixed `old` and introduced `fresh`, never stored.
    let fresh = hashed(test_finding("a.c", "core.StackAddressEscape", 40, "return &local;"));
    let local = bugbook::diff::materialize_local(
        vec![kept.clone(), fresh.clone()],
        &Default::default(),
    );

    let base = datastore.load_findings(outcome.run.id).unwrap();
    let filter = StatusFilter::default();

    let new_side = diff(&base, &local, DiffMode::New, &filter);
    assert_eq!(new_side.len(), 1);
    assert_eq!(new_side[0].hash, fresh.hash);

    let resolved = diff(&base, &local, DiffMode::Resolved, &filter);
    assert_eq!(resolved.len(), 1);
    assert_eq!(resolved[0].hash, old.hash);

    let unresolved = diff(&base, &local, DiffMode::Unresolved, &filter);
    assert_eq!(unresolved.len(), 1);
    assert_eq!(unresolved[0].hash, kept.hash);
}

#[test]
fn user_review_action_survives_reanalysis() {
    let temp = TempDir::new().unwrap();
    let mut datastore = open_datastore(&temp);

    let f1 = hashed(test_finding("a.c", "core.DivideZero", 12, "total / count"));
    let outcome = merge(&mut datastore, store_request("nightly", &["a.c"], vec![f1.clone()])).unwrap();

    let review = bugbook::lifecycle::ReviewState::from_user_action(
        ReviewStatus::FalsePositive,
        Some("denominator guarded upstream".to_string()),
    );
    datastore.set_review_status(outcome.run.id, &f1.hash, &review).unwrap();

    // Re-analysis without any annotation: the explicit action sticks.
    let outcome = merge(&mut datastore, store_request("nightly", &["a.c"], vec![f1.clone()])).unwrap();
    let records = datastore.load_findings(outcome.run.id).unwrap();
    assert_eq!(records[0].review.status, ReviewStatus::FalsePositive);

    // And a suppressed finding is not part of the active subset.
    assert!(!records[0].is_active());
}

#[test]
fn deleted_run_is_gone() {
    let temp = TempDir::new().unwrap();
    let mut datastore = open_datastore(&temp);

    let f1 = hashed(test_finding("a.c", "core.DivideZero", 12, "total / count"));
    merge(&mut datastore, store_request("doomed", &["a.c"], vec![f1])).unwrap();

    assert!(datastore.get_run("doomed").unwrap().is_some());
    assert!(datastore.delete_run("doomed").unwrap());
    assert!(datastore.get_run("doomed").unwrap().is_none());
    assert!(!datastore.delete_run("doomed").unwrap());
}

#[test]
fn store_events_accumulate() {
    let temp = TempDir::new().unwrap();
    let mut datastore = open_datastore(&temp);

    let f1 = hashed(test_finding("a.c", "core.DivideZero", 12, "total / count"));
    let mut request = store_request("nightly", &["a.c"], vec![f1.clone()]);
    request.tag = Some("v1.0".to_string());
    request.analyzer_name = Some("clang-sa".to_string());
    let outcome = merge(&mut datastore, request).unwrap();

    merge(&mut datastore, store_request("nightly", &["a.c"], vec![f1])).unwrap();

    let events = datastore.store_events(outcome.run.id).unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].tag.as_deref(), Some("v1.0"));
    assert_eq!(events[0].analyzer_name.as_deref(), Some("clang-sa"));
    assert_eq!(events[0].files, vec!["a.c".to_string()]);
}
