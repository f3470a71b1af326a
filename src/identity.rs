use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::io::Write;
use tracing::warn;

use crate::digest::Sha1;
use crate::error::Error;
use crate::finding::Finding;

// -------------------------------------------------------------------------------------------------
// IdentityHash
// -------------------------------------------------------------------------------------------------
/// The stable, content-derived key identifying "the same defect" across analyses.
///
/// Two findings with equal identity hashes are considered the same defect regardless of which
/// inclusion path or execution path produced them, and regardless of line-number drift caused by
/// unrelated edits elsewhere in the file.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
pub struct IdentityHash(String);

impl IdentityHash {
    pub fn new(hex: String) -> Self {
        IdentityHash(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for IdentityHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

mod sql {
    use super::*;

    use rusqlite::types::{FromSql, FromSqlResult, ToSql, ToSqlOutput, ValueRef};

    impl ToSql for IdentityHash {
        fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
            Ok(self.0.as_str().into())
        }
    }

    impl FromSql for IdentityHash {
        fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
            Ok(IdentityHash(String::column_result(value)?))
        }
    }
}

// -------------------------------------------------------------------------------------------------
// HashVariant
// -------------------------------------------------------------------------------------------------
/// Which identity hash to compute for a batch.
///
/// `ContextFree` ignores the bug path entirely: lower specificity, higher stability, and the only
/// meaningful choice for tools that provide no path. `ContextSensitive` additionally folds in a
/// normalized digest of the bug path steps, so a genuinely different code path to the same report
/// point yields a different identity.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum HashVariant {
    #[default]
    ContextFree,
    ContextSensitive,
}

// -------------------------------------------------------------------------------------------------
// HashedFinding
// -------------------------------------------------------------------------------------------------
/// A finding together with its computed identity hash.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct HashedFinding {
    pub hash: IdentityHash,
    pub finding: Finding,
}

// -------------------------------------------------------------------------------------------------
// hashing
// -------------------------------------------------------------------------------------------------
/// Compute the identity hash of a finding.
///
/// The digest is fed from `checker_name`, `column`, the trimmed `line_content`, and
/// `scope_signature`. The report's `line` number is deliberately excluded: it is unstable under
/// unrelated edits. For `ContextSensitive`, each bug path step contributes its
/// `(file_path, column, message)` — positions within the enclosing scope, never absolute line
/// numbers.
///
/// Fails with [`Error::HashComputation`] when `checker_name`, `file_path`, or `line_content` is
/// absent; callers must exclude or flag such findings rather than hash garbage.
pub fn identity_hash(finding: &Finding, variant: HashVariant) -> Result<IdentityHash, Error> {
    let missing = if finding.checker_name.is_empty() {
        Some("checker_name")
    } else if finding.file_path.is_empty() {
        Some("file_path")
    } else if finding.line_content.trim().is_empty() {
        Some("line_content")
    } else {
        None
    };
    if let Some(missing) = missing {
        return Err(Error::HashComputation {
            file_path: finding.file_path.clone(),
            line: finding.line,
            missing,
        });
    }

    let mut h = Sha1::new();
    write!(
        &mut h,
        "{}\0{}\0{}\0{}",
        finding.checker_name,
        finding.column,
        finding.line_content.trim(),
        finding.scope_signature,
    )
    .expect("should be able to compute identity hash");

    if variant == HashVariant::ContextSensitive {
        for step in &finding.bug_path {
            write!(&mut h, "\0{}\0{}\0{}", step.file_path, step.column, step.message)
                .expect("should be able to compute identity hash");
        }
    }

    Ok(IdentityHash(h.hexdigest()))
}

/// Hash a whole batch, excluding findings that cannot be hashed.
///
/// Unhashable findings are surfaced as warnings and returned separately; they never abort the
/// batch.
pub fn hash_batch(
    findings: Vec<Finding>,
    variant: HashVariant,
) -> (Vec<HashedFinding>, Vec<Error>) {
    let mut hashed = Vec::with_capacity(findings.len());
    let mut failures = Vec::new();
    for finding in findings {
        match identity_hash(&finding, variant) {
            Ok(hash) => hashed.push(HashedFinding { hash, finding }),
            Err(e) => {
                warn!("excluding finding from batch: {e}");
                failures.push(e);
            }
        }
    }
    (hashed, failures)
}
