use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::status::{DetectionStatus, ReviewOrigin, ReviewStatus};
use crate::suppression::SuppressionNote;

// -------------------------------------------------------------------------------------------------
// Presence
// -------------------------------------------------------------------------------------------------
/// What the latest store event observed about an identity that the merge must reconcile.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Presence {
    /// The identity appears in the new batch
    Present,
    /// Its file was re-analyzed and the identity is absent
    AbsentReanalyzed,
    /// The checker that produced it was not enabled in this analysis
    CheckerDisabled,
    /// Its file is no longer part of the analysis at all
    FileMissing,
}

/// Compute the next detection status of one identity within a run.
///
/// Pure function of the previous status and what the current store event observed; the merger
/// applies it once per identity relevant to the files touched by the event.
pub fn next_detection_status(
    previous: Option<DetectionStatus>,
    presence: Presence,
) -> DetectionStatus {
    use DetectionStatus::*;

    match presence {
        Presence::Present => match previous {
            None => New,
            Some(New) | Some(Unresolved) | Some(Reopened) => Unresolved,
            Some(Resolved) | Some(Off) | Some(Unavailable) => Reopened,
        },
        Presence::AbsentReanalyzed => match previous {
            // A first-time absence has nothing to resolve.
            None => Resolved,
            Some(New) | Some(Unresolved) | Some(Reopened) => Resolved,
            Some(other) => other,
        },
        Presence::CheckerDisabled => Off,
        Presence::FileMissing => Unavailable,
    }
}

// -------------------------------------------------------------------------------------------------
// ReviewState
// -------------------------------------------------------------------------------------------------
/// The review classification of one identity within a run, with its provenance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ReviewState {
    pub status: ReviewStatus,
    pub origin: ReviewOrigin,
    pub comment: Option<String>,
}

impl ReviewState {
    pub fn from_annotation(note: &SuppressionNote) -> Self {
        ReviewState {
            status: note.status,
            origin: ReviewOrigin::Annotation,
            comment: if note.comment.is_empty() {
                None
            } else {
                Some(note.comment.clone())
            },
        }
    }

    pub fn from_user_action(status: ReviewStatus, comment: Option<String>) -> Self {
        ReviewState {
            status,
            origin: ReviewOrigin::UserAction,
            comment,
        }
    }
}

/// Compute the review state of one identity after an analysis of its file.
///
/// The in-source annotation is re-evaluated on every analysis and wins when present. When no
/// annotation covers the report, an explicit user action is sticky; a state that came from a
/// now-removed annotation reverts to unreviewed.
pub fn resolve_review_state(
    previous: Option<&ReviewState>,
    annotation: Option<&SuppressionNote>,
) -> ReviewState {
    match annotation {
        Some(note) => ReviewState::from_annotation(note),
        None => match previous {
            Some(prev) if prev.origin == ReviewOrigin::UserAction => prev.clone(),
            _ => ReviewState::default(),
        },
    }
}
