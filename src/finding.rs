use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// -------------------------------------------------------------------------------------------------
// Severity
// -------------------------------------------------------------------------------------------------
/// The severity assigned to a finding by the analyzer that produced it.
///
/// Ordered from least to most severe, so that findings can be sorted and thresholds compared with
/// the usual comparison operators.
#[derive(
    Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    Unspecified,
    Style,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Unspecified => "unspecified",
            Severity::Style => "style",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl Severity {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "unspecified" => Some(Severity::Unspecified),
            "style" => Some(Severity::Style),
            "low" => Some(Severity::Low),
            "medium" => Some(Severity::Medium),
            "high" => Some(Severity::High),
            "critical" => Some(Severity::Critical),
            _ => None,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

mod sql {
    use super::*;

    use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};

    impl ToSql for Severity {
        fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
            Ok(self.as_str().into())
        }
    }

    impl FromSql for Severity {
        fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
            Severity::from_str(value.as_str()?).ok_or(FromSqlError::InvalidType)
        }
    }
}

// -------------------------------------------------------------------------------------------------
// PathEvent
// -------------------------------------------------------------------------------------------------
/// One step of the execution trace that leads to a reported defect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PathEvent {
    pub file_path: String,
    pub line: u64,
    pub column: u64,
    pub message: String,
}

// -------------------------------------------------------------------------------------------------
// Finding
// -------------------------------------------------------------------------------------------------
/// One reported defect occurrence, as produced by an analyzer for a single source file.
///
/// A `Finding` is an immutable snapshot: statuses live in a side table keyed by identity hash
/// (see `status` and `datastore`), never on the finding itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Finding {
    /// The name of the rule that fired
    pub checker_name: String,

    /// The severity the analyzer assigned to the report
    #[serde(default)]
    pub severity: Severity,

    /// The file containing the primary report point
    pub file_path: String,

    /// 1-based line of the primary report point
    pub line: u64,

    /// 1-based column of the primary report point
    pub column: u64,

    /// Human-readable description of the defect
    pub message: String,

    /// The execution trace leading to the defect; may be empty
    #[serde(default)]
    pub bug_path: Vec<PathEvent>,

    /// Textual signature of the enclosing function, class, or namespace.
    ///
    /// Used as a line-shift-resistant anchor for identity hashing; empty when the analyzer could
    /// not determine one.
    #[serde(default)]
    pub scope_signature: String,

    /// The literal source line text at the report point.
    ///
    /// The other line-shift-resistant anchor: unrelated edits elsewhere in the file change `line`
    /// but not this.
    #[serde(default)]
    pub line_content: String,
}

impl std::fmt::Display for Finding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] {}:{}:{}: {} [{}]",
            self.severity, self.file_path, self.line, self.column, self.message, self.checker_name
        )
    }
}
