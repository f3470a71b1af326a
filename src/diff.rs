use anyhow::Result;
use std::collections::{HashMap, HashSet};

use crate::datastore::Datastore;
use crate::dedup::deduplicate;
use crate::error::Error;
use crate::identity::{HashedFinding, IdentityHash};
use crate::lifecycle::resolve_review_state;
use crate::run::{FindingRecord, Run};
use crate::status::{DetectionStatus, ReviewStatus};
use crate::suppression::SuppressionNote;

// -------------------------------------------------------------------------------------------------
// DiffMode
// -------------------------------------------------------------------------------------------------
/// Which side of the comparison to report.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DiffMode {
    /// Findings in `new` whose identity does not occur in `base`
    New,
    /// Findings in `base` whose identity does not occur in `new`
    Resolved,
    /// Findings in `new` whose identity occurs in both
    Unresolved,
}

// -------------------------------------------------------------------------------------------------
// StatusFilter
// -------------------------------------------------------------------------------------------------
/// Which findings on each side participate in a diff.
///
/// By default each side is reduced to its active subset: findings still detected (detection
/// status not resolved, off, or unavailable) and not suppressed by review. An explicit filter on
/// a dimension replaces the default rule for that dimension, letting an operator ask
/// specifically for resolved or suppressed findings.
#[derive(Debug, Clone, Default)]
pub struct StatusFilter {
    pub detection_statuses: Option<Vec<DetectionStatus>>,
    pub review_statuses: Option<Vec<ReviewStatus>>,
}

impl StatusFilter {
    pub fn admits(&self, record: &FindingRecord) -> bool {
        let detection_ok = match &self.detection_statuses {
            Some(wanted) => wanted.contains(&record.detection_status),
            None => !matches!(
                record.detection_status,
                DetectionStatus::Resolved | DetectionStatus::Off | DetectionStatus::Unavailable
            ),
        };
        let review_ok = match &self.review_statuses {
            Some(wanted) => wanted.contains(&record.review.status),
            None => !record.review.status.is_suppressing(),
        };
        detection_ok && review_ok
    }
}

// -------------------------------------------------------------------------------------------------
// diff
// -------------------------------------------------------------------------------------------------
/// Compare two fully-materialized finding collections.
///
/// Both sides are reduced through `filter` first; the mode then selects along the identity-hash
/// set algebra. Neither input is mutated, and the result is ordered by file, line, and checker.
/// Either side may come from a persisted run or from a just-analyzed local batch; the algorithm
/// does not care.
pub fn diff(
    base: &[FindingRecord],
    new: &[FindingRecord],
    mode: DiffMode,
    filter: &StatusFilter,
) -> Vec<FindingRecord> {
    let base_subset: Vec<&FindingRecord> = base.iter().filter(|r| filter.admits(r)).collect();
    let new_subset: Vec<&FindingRecord> = new.iter().filter(|r| filter.admits(r)).collect();

    let base_hashes: HashSet<&IdentityHash> = base_subset.iter().map(|r| &r.hash).collect();
    let new_hashes: HashSet<&IdentityHash> = new_subset.iter().map(|r| &r.hash).collect();

    let mut result: Vec<FindingRecord> = match mode {
        DiffMode::New => new_subset
            .iter()
            .filter(|r| !base_hashes.contains(&r.hash))
            .map(|r| (*r).clone())
            .collect(),
        DiffMode::Resolved => base_subset
            .iter()
            .filter(|r| !new_hashes.contains(&r.hash))
            .map(|r| (*r).clone())
            .collect(),
        DiffMode::Unresolved => new_subset
            .iter()
            .filter(|r| base_hashes.contains(&r.hash))
            .map(|r| (*r).clone())
            .collect(),
    };

    result.sort_by(|a, b| {
        (&a.finding.file_path, a.finding.line, &a.finding.checker_name).cmp(&(
            &b.finding.file_path,
            b.finding.line,
            &b.finding.checker_name,
        ))
    });
    result
}

/// Materialize a just-analyzed local batch as finding records, without storing anything.
///
/// Every finding is a first sighting; suppression annotations still apply so that a local diff
/// honors in-source review markers.
pub fn materialize_local(
    findings: Vec<HashedFinding>,
    suppressions: &HashMap<String, Vec<SuppressionNote>>,
) -> Vec<FindingRecord> {
    deduplicate(findings)
        .into_iter()
        .map(|hf| {
            let annotation = suppressions
                .get(&hf.finding.file_path)
                .and_then(|notes| {
                    notes
                        .iter()
                        .find(|note| note.covers(hf.finding.line, &hf.finding.checker_name))
                });
            let review = resolve_review_state(None, annotation);
            FindingRecord {
                review,
                ..FindingRecord::fresh(hf)
            }
        })
        .collect()
}

/// Resolve a run selector that must match exactly one run.
///
/// The selector may use `*`/`?` wildcards; zero or multiple matches fail with
/// `Error::IdentifierResolution`.
pub fn resolve_single_run(datastore: &Datastore, selector: &str) -> Result<Run> {
    let mut runs = datastore.runs_matching(selector)?;
    if runs.len() == 1 {
        Ok(runs.remove(0))
    } else {
        Err(Error::IdentifierResolution {
            selector: selector.to_string(),
            matched: runs.len(),
        }
        .into())
    }
}
