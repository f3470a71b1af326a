use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// -------------------------------------------------------------------------------------------------
// DetectionStatus
// -------------------------------------------------------------------------------------------------
/// The lifecycle state of a finding's continued presence across analyses of a run.
///
/// Mutated only by the incremental store merger.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum DetectionStatus {
    /// First time this identity was seen in the run
    New,
    /// Seen before and still present
    Unresolved,
    /// Was resolved, but the defect is back
    Reopened,
    /// The file was re-analyzed and the defect is gone
    Resolved,
    /// The checker that produced it was not enabled in the latest analysis
    Off,
    /// The file is no longer part of the analysis at all
    Unavailable,
}

impl DetectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionStatus::New => "new",
            DetectionStatus::Unresolved => "unresolved",
            DetectionStatus::Reopened => "reopened",
            DetectionStatus::Resolved => "resolved",
            DetectionStatus::Off => "off",
            DetectionStatus::Unavailable => "unavailable",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "new" => Some(DetectionStatus::New),
            "unresolved" => Some(DetectionStatus::Unresolved),
            "reopened" => Some(DetectionStatus::Reopened),
            "resolved" => Some(DetectionStatus::Resolved),
            "off" => Some(DetectionStatus::Off),
            "unavailable" => Some(DetectionStatus::Unavailable),
            _ => None,
        }
    }
}

impl std::fmt::Display for DetectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// -------------------------------------------------------------------------------------------------
// ReviewStatus
// -------------------------------------------------------------------------------------------------
/// The human- or annotation-driven classification of a finding's validity.
///
/// Independent of [`DetectionStatus`]: a defect can be both `Unresolved` and `FalsePositive`.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    #[default]
    Unreviewed,
    Confirmed,
    FalsePositive,
    Intentional,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewStatus::Unreviewed => "unreviewed",
            ReviewStatus::Confirmed => "confirmed",
            ReviewStatus::FalsePositive => "false_positive",
            ReviewStatus::Intentional => "intentional",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "unreviewed" => Some(ReviewStatus::Unreviewed),
            "confirmed" => Some(ReviewStatus::Confirmed),
            "false_positive" => Some(ReviewStatus::FalsePositive),
            "intentional" => Some(ReviewStatus::Intentional),
            _ => None,
        }
    }

    /// Does this review status suppress the finding from active result sets?
    pub fn is_suppressing(&self) -> bool {
        matches!(self, ReviewStatus::FalsePositive | ReviewStatus::Intentional)
    }
}

impl std::fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// -------------------------------------------------------------------------------------------------
// ReviewOrigin
// -------------------------------------------------------------------------------------------------
/// Where a review status came from.
///
/// In-source annotations are re-evaluated on every analysis; explicit user actions are sticky
/// until changed by another user action.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReviewOrigin {
    #[default]
    Annotation,
    UserAction,
}

impl ReviewOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewOrigin::Annotation => "annotation",
            ReviewOrigin::UserAction => "user_action",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "annotation" => Some(ReviewOrigin::Annotation),
            "user_action" => Some(ReviewOrigin::UserAction),
            _ => None,
        }
    }
}

// -------------------------------------------------------------------------------------------------
// sql
// -------------------------------------------------------------------------------------------------
mod sql {
    use super::*;

    use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};

    impl ToSql for DetectionStatus {
        fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
            Ok(self.as_str().into())
        }
    }

    impl FromSql for DetectionStatus {
        fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
            DetectionStatus::from_str(value.as_str()?).ok_or(FromSqlError::InvalidType)
        }
    }

    impl ToSql for ReviewStatus {
        fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
            Ok(self.as_str().into())
        }
    }

    impl FromSql for ReviewStatus {
        fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
            ReviewStatus::from_str(value.as_str()?).ok_or(FromSqlError::InvalidType)
        }
    }

    impl ToSql for ReviewOrigin {
        fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
            Ok(self.as_str().into())
        }
    }

    impl FromSql for ReviewOrigin {
        fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
            ReviewOrigin::from_str(value.as_str()?).ok_or(FromSqlError::InvalidType)
        }
    }
}
