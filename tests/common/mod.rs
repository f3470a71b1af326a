//! Integration Test Utilities and Common Code

#![allow(dead_code)]

pub use assert_cmd::prelude::*;
pub use assert_fs::prelude::*;
pub use assert_fs::{fixture::ChildPath, TempDir};
pub use predicates::str::RegexPredicate;
pub use std::path::Path;
pub use std::process::Command;

use bugbook::finding::{Finding, PathEvent, Severity};
use bugbook::identity::{identity_hash, HashVariant, HashedFinding};

/// Build a `Command` for the `bugbook` crate binary with variadic command-line arguments.
///
/// The arguments can be anything that is allowed by `Command::arg`.
#[macro_export]
macro_rules! bugbook {
    ( $( $arg:expr ),* ) => {
        {
            let mut cmd = bugbook_cmd();
            $(
                cmd.arg($arg);
            )*
            cmd
        }
    }
}

/// Get the command for the bugbook binary under test.
pub fn bugbook_cmd() -> Command {
    Command::cargo_bin("bugbook").expect("bugbook should be executable")
}

/// Create a `RegexPredicate` from the given pattern.
pub fn is_match(pat: &str) -> RegexPredicate {
    predicates::str::is_match(pat).expect("pattern should compile")
}

/// Build a finding with sensible defaults for tests.
pub fn test_finding(file_path: &str, checker: &str, line: u64, line_content: &str) -> Finding {
    Finding {
        checker_name: checker.to_string(),
        severity: Severity::Medium,
        file_path: file_path.to_string(),
        line,
        column: 5,
        message: format!("{checker} fired"),
        bug_path: vec![PathEvent {
            file_path: file_path.to_string(),
            line: line.saturating_sub(1),
            column: 5,
            message: "entering branch".to_string(),
        }],
        scope_signature: "void handler(struct request *)".to_string(),
        line_content: line_content.to_string(),
    }
}

/// Hash a test finding with the context-free variant.
pub fn hashed(finding: Finding) -> HashedFinding {
    let hash = identity_hash(&finding, HashVariant::ContextFree).unwrap();
    HashedFinding { hash, finding }
}

/// Serialize a per-file report document for `file_path` containing `findings`.
pub fn report_doc(analyzer: &str, file_path: &str, findings: &[Finding]) -> String {
    serde_json::to_string_pretty(&serde_json::json!({
        "analyzer": analyzer,
        "analyzer_version": "1.0.0",
        "file_path": file_path,
        "findings": findings,
    }))
    .expect("report document should serialize")
}

/// Write a report document into `dir` under `name`.
pub fn write_report(dir: &TempDir, name: &str, contents: &str) -> ChildPath {
    let child = dir.child(name);
    child.write_str(contents).expect("report document should be writable");
    child
}
