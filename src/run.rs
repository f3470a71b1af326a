use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::finding::Finding;
use crate::identity::{HashedFinding, IdentityHash};
use crate::lifecycle::ReviewState;
use crate::status::DetectionStatus;

// -------------------------------------------------------------------------------------------------
// Run
// -------------------------------------------------------------------------------------------------
/// A named, persistently-updated collection of findings for one logical codebase or branch.
///
/// Created on first store and mutated by every subsequent store to the same name; deleting the
/// run is the only way its findings are ever physically removed.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct Run {
    pub id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

// -------------------------------------------------------------------------------------------------
// StoreEvent
// -------------------------------------------------------------------------------------------------
/// One atomic update to a run's persisted finding set.
///
/// Immutable history entry: when it happened, the optional tag, which analyzer produced the
/// batch, and which files were (re-)analyzed.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct StoreEvent {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub tag: Option<String>,
    pub analyzer_name: Option<String>,
    pub analyzer_version: Option<String>,
    pub files: Vec<String>,
}

// -------------------------------------------------------------------------------------------------
// FindingRecord
// -------------------------------------------------------------------------------------------------
/// A materialized finding as read back from a run: the immutable snapshot plus the statuses from
/// the side table keyed by `(run, identity hash)`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FindingRecord {
    pub hash: IdentityHash,
    pub finding: Finding,
    pub detection_status: DetectionStatus,
    pub review: ReviewState,
}

impl FindingRecord {
    /// A fresh record for a finding that has never been stored: first sighting, unreviewed.
    pub fn fresh(hashed: HashedFinding) -> Self {
        FindingRecord {
            hash: hashed.hash,
            finding: hashed.finding,
            detection_status: DetectionStatus::New,
            review: ReviewState::default(),
        }
    }

    /// Is this finding part of the active result set?
    ///
    /// Active means still detected (not resolved, off, or unavailable) and not suppressed by
    /// review (not false-positive or intentional).
    pub fn is_active(&self) -> bool {
        !matches!(
            self.detection_status,
            DetectionStatus::Resolved | DetectionStatus::Off | DetectionStatus::Unavailable
        ) && !self.review.status.is_suppressing()
    }
}

impl std::fmt::Display for FindingRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [{}/{}]", self.finding, self.detection_status, self.review.status)
    }
}
