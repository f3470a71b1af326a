use anyhow::Result;
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::{debug, debug_span, warn};

use crate::datastore::{Datastore, NewStoreEvent};
use crate::dedup::deduplicate;
use crate::identity::{HashedFinding, IdentityHash};
use crate::lifecycle::{next_detection_status, resolve_review_state, Presence, ReviewState};
use crate::run::{FindingRecord, Run};
use crate::status::DetectionStatus;
use crate::suppression::SuppressionNote;

// -------------------------------------------------------------------------------------------------
// StoreRequest
// -------------------------------------------------------------------------------------------------
/// One store operation: a batch of hashed findings for a set of (re-)analyzed files, destined
/// for a named run.
#[derive(Debug, Clone)]
pub struct StoreRequest {
    pub run_name: String,

    /// The files this store event (re-)analyzed. Findings of files outside this set are left
    /// entirely untouched by a non-force merge.
    pub files_analyzed: Vec<String>,

    /// The new batch. Findings whose file is outside `files_analyzed` are dropped with a warning.
    pub findings: Vec<HashedFinding>,

    /// Treat the whole run as freshly re-analyzed: everything previously recorded is first
    /// marked absent, so only identities present in this batch end up non-resolved.
    pub force: bool,

    pub tag: Option<String>,
    pub analyzer_name: Option<String>,
    pub analyzer_version: Option<String>,

    /// The checkers enabled in this analysis. `None` means unknown, in which case every checker
    /// is assumed enabled. A previously-seen identity whose checker is not in this set
    /// transitions to `Off` rather than `Resolved`.
    pub enabled_checkers: Option<BTreeSet<String>>,

    /// In-source suppression annotations, keyed by file path.
    pub suppressions: HashMap<String, Vec<SuppressionNote>>,
}

impl StoreRequest {
    pub fn new(run_name: impl Into<String>) -> Self {
        StoreRequest {
            run_name: run_name.into(),
            files_analyzed: Vec::new(),
            findings: Vec::new(),
            force: false,
            tag: None,
            analyzer_name: None,
            analyzer_version: None,
            enabled_checkers: None,
            suppressions: HashMap::new(),
        }
    }
}

// -------------------------------------------------------------------------------------------------
// MergeOutcome
// -------------------------------------------------------------------------------------------------
/// What one committed merge did, for reporting back to the caller.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub run: Run,
    pub event_id: i64,

    /// Final detection statuses of every identity this event touched.
    pub counts: BTreeMap<DetectionStatus, usize>,
}

impl MergeOutcome {
    pub fn count(&self, status: DetectionStatus) -> usize {
        self.counts.get(&status).copied().unwrap_or(0)
    }
}

// -------------------------------------------------------------------------------------------------
// merge
// -------------------------------------------------------------------------------------------------
/// Reconcile a new batch of findings against the persisted run and commit the result as one
/// store event.
///
/// Holds the per-run merge lock for the duration; a concurrent merge on the same run name fails
/// fast with `Error::RunLocked`. The write is a single transaction: a merge either fully commits
/// or leaves the run exactly as it was.
pub fn merge(datastore: &mut Datastore, request: StoreRequest) -> Result<MergeOutcome> {
    let _span = debug_span!("merge", "{}", request.run_name).entered();

    let run = datastore.get_or_create_run(&request.run_name)?;
    datastore.lock_run(&run.name)?;
    let result = merge_locked(datastore, &run, &request);
    let unlock_result = datastore.unlock_run(&run.name);

    let (event_id, counts) = result?;
    unlock_result?;

    Ok(MergeOutcome {
        run,
        event_id,
        counts,
    })
}

fn merge_locked(
    datastore: &mut Datastore,
    run: &Run,
    request: &StoreRequest,
) -> Result<(i64, BTreeMap<DetectionStatus, usize>)> {
    let previous = datastore.load_findings(run.id)?;
    let reconciled = reconcile(&previous, request);
    debug!(
        "Reconciled {} identities against {} previous findings",
        reconciled.statuses.len(),
        previous.len()
    );

    let tx = datastore.begin()?;
    for hf in &reconciled.snapshots {
        tx.record_finding(run.id, hf)?;
    }
    for (hash, detection, review) in &reconciled.statuses {
        tx.record_status(run.id, hash, *detection, review)?;
    }
    let event_id = tx.record_store_event(
        run.id,
        &NewStoreEvent {
            timestamp: Utc::now(),
            tag: request.tag.clone(),
            analyzer_name: request.analyzer_name.clone(),
            analyzer_version: request.analyzer_version.clone(),
            files: request.files_analyzed.clone(),
        },
    )?;
    tx.commit()?;

    Ok((event_id, reconciled.counts))
}

// -------------------------------------------------------------------------------------------------
// reconciliation
// -------------------------------------------------------------------------------------------------

/// The pure outcome of reconciling one store event, before anything is written.
pub(crate) struct Reconciled {
    /// Finding snapshots to record (the deduplicated new batch).
    pub snapshots: Vec<HashedFinding>,

    /// The recomputed status table entries, one per identity touched by this event.
    pub statuses: Vec<(IdentityHash, DetectionStatus, ReviewState)>,

    /// Final detection statuses, counted.
    pub counts: BTreeMap<DetectionStatus, usize>,
}

/// Compute the status table updates for one store event.
///
/// Pure function of the previously materialized run and the request; identities of files outside
/// the event's file set are not touched by a non-force merge and produce no entry at all.
pub(crate) fn reconcile(previous: &[FindingRecord], request: &StoreRequest) -> Reconciled {
    let event_files: HashSet<&str> = request.files_analyzed.iter().map(|f| f.as_str()).collect();

    // Restrict the batch to the event's files, then collapse per-TU duplicates.
    let (in_event, outside): (Vec<_>, Vec<_>) = request
        .findings
        .iter()
        .cloned()
        .partition(|hf| event_files.contains(hf.finding.file_path.as_str()));
    for hf in &outside {
        warn!(
            "dropping finding for {} which is not among the files of this store event",
            hf.finding.file_path
        );
    }
    let batch = deduplicate(in_event);

    let mut batch_by_hash: BTreeMap<&IdentityHash, Vec<&HashedFinding>> = BTreeMap::new();
    for hf in &batch {
        batch_by_hash.entry(&hf.hash).or_default().push(hf);
    }

    let mut prev_by_hash: BTreeMap<&IdentityHash, Vec<&FindingRecord>> = BTreeMap::new();
    for record in previous {
        prev_by_hash.entry(&record.hash).or_default().push(record);
    }

    let checker_enabled = |checker: &str| match &request.enabled_checkers {
        None => true,
        Some(enabled) => enabled.contains(checker),
    };

    let annotation_for = |occurrences: &[&HashedFinding]| -> Option<SuppressionNote> {
        occurrences.iter().find_map(|hf| {
            request
                .suppressions
                .get(&hf.finding.file_path)?
                .iter()
                .find(|note| note.covers(hf.finding.line, &hf.finding.checker_name))
                .cloned()
        })
    };

    let mut statuses: Vec<(IdentityHash, DetectionStatus, ReviewState)> = Vec::new();

    // Previously-known identities.
    for (hash, records) in &prev_by_hash {
        let prev_detection = records[0].detection_status;
        let prev_review = &records[0].review;
        let checker = records[0].finding.checker_name.as_str();
        let files: Vec<&str> = records.iter().map(|r| r.finding.file_path.as_str()).collect();

        if let Some(occurrences) = batch_by_hash.get(*hash) {
            let detection = next_detection_status(Some(prev_detection), Presence::Present);
            let annotation = annotation_for(occurrences);
            let review = resolve_review_state(Some(prev_review), annotation.as_ref());
            statuses.push(((*hash).clone(), detection, review));
            continue;
        }

        let presence = if request.force {
            if !checker_enabled(checker) {
                Presence::CheckerDisabled
            } else if files.iter().any(|f| event_files.contains(f)) {
                Presence::AbsentReanalyzed
            } else {
                Presence::FileMissing
            }
        } else {
            let touched = files.iter().filter(|f| event_files.contains(*f)).count();
            if touched == 0 {
                // None of this identity's files were re-analyzed: its statuses persist
                // unchanged, and this event writes nothing for it.
                continue;
            }
            if !checker_enabled(checker) {
                Presence::CheckerDisabled
            } else if touched == files.len() {
                Presence::AbsentReanalyzed
            } else {
                // Some occurrences were re-analyzed away, but at least one file still stands
                // unexamined; absence is not proven, so the identity keeps its statuses.
                continue;
            }
        };

        let detection = next_detection_status(Some(prev_detection), presence);
        // The defect was not observed, so no annotation can cover it; the review state rides
        // along unchanged so that it survives a later reopen.
        statuses.push(((*hash).clone(), detection, prev_review.clone()));
    }

    // First-time identities.
    for (hash, occurrences) in &batch_by_hash {
        if prev_by_hash.contains_key(*hash) {
            continue;
        }
        let detection = next_detection_status(None, Presence::Present);
        let annotation = annotation_for(occurrences);
        let review = resolve_review_state(None, annotation.as_ref());
        statuses.push(((*hash).clone(), detection, review));
    }

    let mut counts: BTreeMap<DetectionStatus, usize> = BTreeMap::new();
    for (_, detection, _) in &statuses {
        *counts.entry(*detection).or_default() += 1;
    }

    Reconciled {
        snapshots: batch,
        statuses,
        counts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finding::Finding;
    use crate::identity::{identity_hash, HashVariant};
    use crate::status::{ReviewOrigin, ReviewStatus};
    use pretty_assertions::assert_eq;

    fn finding_in(file: &str, checker: &str, line_content: &str) -> HashedFinding {
        let finding = Finding {
            checker_name: checker.to_string(),
            severity: Default::default(),
            file_path: file.to_string(),
            line: 10,
            column: 4,
            message: format!("{checker} fired"),
            bug_path: Vec::new(),
            scope_signature: "void f()".to_string(),
            line_content: line_content.to_string(),
        };
        let hash = identity_hash(&finding, HashVariant::ContextFree).unwrap();
        HashedFinding { hash, finding }
    }

    fn record(hf: &HashedFinding, detection: DetectionStatus) -> FindingRecord {
        FindingRecord {
            hash: hf.hash.clone(),
            finding: hf.finding.clone(),
            detection_status: detection,
            review: ReviewState::default(),
        }
    }

    fn request(files: &[&str], findings: Vec<HashedFinding>) -> StoreRequest {
        let mut r = StoreRequest::new("test-run");
        r.files_analyzed = files.iter().map(|f| f.to_string()).collect();
        r.findings = findings;
        r
    }

    fn status_of<'a>(
        reconciled: &'a Reconciled,
        hash: &IdentityHash,
    ) -> Option<&'a (IdentityHash, DetectionStatus, ReviewState)> {
        reconciled.statuses.iter().find(|(h, _, _)| h == hash)
    }

    #[test]
    fn first_store_marks_everything_new() {
        let f1 = finding_in("a.c", "core.DivideZero", "x / y");
        let out = reconcile(&[], &request(&["a.c"], vec![f1.clone()]));
        assert_eq!(out.statuses.len(), 1);
        assert_eq!(status_of(&out, &f1.hash).unwrap().1, DetectionStatus::New);
        assert_eq!(out.snapshots.len(), 1);
    }

    #[test]
    fn absent_after_reanalysis_resolves_then_reopens() {
        let f1 = finding_in("a.c", "core.DivideZero", "x / y");

        // Second store re-analyzes a.c without the finding.
        let prev = vec![record(&f1, DetectionStatus::New)];
        let out = reconcile(&prev, &request(&["a.c"], vec![]));
        assert_eq!(status_of(&out, &f1.hash).unwrap().1, DetectionStatus::Resolved);

        // Third store sees it again.
        let prev = vec![record(&f1, DetectionStatus::Resolved)];
        let out = reconcile(&prev, &request(&["a.c"], vec![f1.clone()]));
        assert_eq!(status_of(&out, &f1.hash).unwrap().1, DetectionStatus::Reopened);
    }

    #[test]
    fn files_outside_event_are_untouched() {
        let fa = finding_in("a.c", "core.DivideZero", "x / y");
        let fb = finding_in("b.c", "core.NullDereference", "*p = 1");

        let prev = vec![record(&fa, DetectionStatus::Unresolved), record(&fb, DetectionStatus::Unresolved)];
        // Only a.c is re-analyzed; its finding is gone. b.c was not part of the event.
        let out = reconcile(&prev, &request(&["a.c"], vec![]));
        assert_eq!(status_of(&out, &fa.hash).unwrap().1, DetectionStatus::Resolved);
        assert!(status_of(&out, &fb.hash).is_none());
    }

    #[test]
    fn force_resolves_all_absent_identities() {
        let fa = finding_in("a.c", "core.DivideZero", "x / y");
        let fb = finding_in("b.c", "core.NullDereference", "*p = 1");

        let prev = vec![record(&fa, DetectionStatus::Unresolved), record(&fb, DetectionStatus::Unresolved)];
        let mut req = request(&["a.c"], vec![]);
        req.force = true;
        let out = reconcile(&prev, &req);
        // a.c was in the forced file set: resolved. b.c is no longer analyzed at all.
        assert_eq!(status_of(&out, &fa.hash).unwrap().1, DetectionStatus::Resolved);
        assert_eq!(status_of(&out, &fb.hash).unwrap().1, DetectionStatus::Unavailable);
    }

    #[test]
    fn disabled_checker_goes_off() {
        let f1 = finding_in("a.c", "deadcode.DeadStores", "int unused = 1;");
        let prev = vec![record(&f1, DetectionStatus::Unresolved)];
        let mut req = request(&["a.c"], vec![]);
        req.enabled_checkers = Some(["core.DivideZero".to_string()].into_iter().collect());
        let out = reconcile(&prev, &req);
        assert_eq!(status_of(&out, &f1.hash).unwrap().1, DetectionStatus::Off);
    }

    #[test]
    fn partial_absence_keeps_statuses() {
        // Same identity observed in two files; only one was re-analyzed and lost it.
        let fa = finding_in("lib.h", "core.UninitRead", "int x = cfg->t;");
        let mut fb = fa.clone();
        fb.finding.file_path = "lib_copy.h".to_string();

        let prev = vec![record(&fa, DetectionStatus::Unresolved), record(&fb, DetectionStatus::Unresolved)];
        let out = reconcile(&prev, &request(&["lib.h"], vec![]));
        assert!(status_of(&out, &fa.hash).is_none());
    }

    #[test]
    fn annotation_sets_review_on_new_finding() {
        let f1 = finding_in("a.c", "core.DivideZero", "x / y");
        let mut req = request(&["a.c"], vec![f1.clone()]);
        req.suppressions.insert(
            "a.c".to_string(),
            vec![SuppressionNote {
                line: 10,
                checkers: vec!["all".to_string()],
                status: ReviewStatus::FalsePositive,
                comment: "guarded by caller".to_string(),
            }],
        );
        let out = reconcile(&[], &req);
        let (_, detection, review) = status_of(&out, &f1.hash).unwrap();
        assert_eq!(*detection, DetectionStatus::New);
        assert_eq!(review.status, ReviewStatus::FalsePositive);
        assert_eq!(review.origin, ReviewOrigin::Annotation);
    }

    #[test]
    fn removed_annotation_reverts_review_but_user_action_sticks() {
        let f1 = finding_in("a.c", "core.DivideZero", "x / y");

        let mut annotated = record(&f1, DetectionStatus::Unresolved);
        annotated.review = ReviewState {
            status: ReviewStatus::FalsePositive,
            origin: ReviewOrigin::Annotation,
            comment: None,
        };
        let out = reconcile(&[annotated], &request(&["a.c"], vec![f1.clone()]));
        assert_eq!(status_of(&out, &f1.hash).unwrap().2.status, ReviewStatus::Unreviewed);

        let mut acted = record(&f1, DetectionStatus::Unresolved);
        acted.review = ReviewState::from_user_action(ReviewStatus::Confirmed, None);
        let out = reconcile(&[acted], &request(&["a.c"], vec![f1.clone()]));
        assert_eq!(status_of(&out, &f1.hash).unwrap().2.status, ReviewStatus::Confirmed);
    }

    #[test]
    fn review_survives_resolve_reopen_cycle() {
        let f1 = finding_in("a.c", "core.DivideZero", "x / y");

        let mut confirmed = record(&f1, DetectionStatus::Unresolved);
        confirmed.review = ReviewState::from_user_action(ReviewStatus::Confirmed, None);

        // Resolve it.
        let out = reconcile(&[confirmed.clone()], &request(&["a.c"], vec![]));
        let (_, detection, review) = status_of(&out, &f1.hash).unwrap();
        assert_eq!(*detection, DetectionStatus::Resolved);
        assert_eq!(review.status, ReviewStatus::Confirmed);

        // Reopen it: the review state rode along.
        let mut resolved = confirmed.clone();
        resolved.detection_status = DetectionStatus::Resolved;
        let out = reconcile(&[resolved], &request(&["a.c"], vec![f1.clone()]));
        let (_, detection, review) = status_of(&out, &f1.hash).unwrap();
        assert_eq!(*detection, DetectionStatus::Reopened);
        assert_eq!(review.status, ReviewStatus::Confirmed);
    }

    #[test]
    fn findings_outside_event_files_are_dropped() {
        let fa = finding_in("a.c", "core.DivideZero", "x / y");
        let fb = finding_in("b.c", "core.DivideZero", "q / r");
        let out = reconcile(&[], &request(&["a.c"], vec![fa, fb.clone()]));
        assert!(status_of(&out, &fb.hash).is_none());
        assert_eq!(out.snapshots.len(), 1);
    }
}
