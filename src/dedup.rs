use std::collections::HashSet;

use crate::identity::HashedFinding;
use crate::run::FindingRecord;

// -------------------------------------------------------------------------------------------------
// deduplication & uniqueing
// -------------------------------------------------------------------------------------------------
//
// Two distinct operations that must not be conflated:
//
// - `deduplicate` collapses findings with identical (identity hash, file path) within one batch.
//   A header-only bug is reported once per translation unit that includes the header; without
//   this step the same defect would show up once per including source file even though it is one
//   physical finding in the header.
//
// - `unique` further collapses findings down to one record per identity hash alone, across all
//   files and translation units, for callers that want "how many distinct defects" rather than
//   "how many times did any translation unit observe this defect".
//
// Both keep the first occurrence in batch order and are idempotent.

/// Collapse findings with identical `(identity hash, file path)` within one batch.
pub fn deduplicate(findings: Vec<HashedFinding>) -> Vec<HashedFinding> {
    let mut seen: HashSet<(String, String)> = HashSet::with_capacity(findings.len());
    findings
        .into_iter()
        .filter(|hf| seen.insert((hf.hash.as_str().to_string(), hf.finding.file_path.clone())))
        .collect()
}

/// Collapse findings down to one record per identity hash, across all files.
pub fn unique(findings: Vec<HashedFinding>) -> Vec<HashedFinding> {
    let mut seen: HashSet<String> = HashSet::with_capacity(findings.len());
    findings
        .into_iter()
        .filter(|hf| seen.insert(hf.hash.as_str().to_string()))
        .collect()
}

/// Uniqueing over materialized records, for result sets spanning several files or runs.
pub fn unique_records(records: Vec<FindingRecord>) -> Vec<FindingRecord> {
    let mut seen: HashSet<String> = HashSet::with_capacity(records.len());
    records
        .into_iter()
        .filter(|r| seen.insert(r.hash.as_str().to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finding::Finding;
    use crate::identity::{hash_batch, HashVariant};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn header_finding(file_path: &str) -> Finding {
        Finding {
            checker_name: "core.UninitializedRead".to_string(),
            severity: Default::default(),
            // The report location is in the header regardless of which TU observed it.
            file_path: file_path.to_string(),
            line: 7,
            column: 3,
            message: "read of uninitialized field".to_string(),
            bug_path: Vec::new(),
            scope_signature: "void init(struct config *)".to_string(),
            line_content: "int x = cfg->threshold;".to_string(),
        }
    }

    #[test]
    fn shared_header_collapses_per_file_then_overall() {
        // The same logical bug observed via two including translation units.
        let batch = vec![
            header_finding("lib.h"),
            header_finding("lib.h"),
            header_finding("lib.h"),
        ];
        let (hashed, failures) = hash_batch(batch, HashVariant::ContextFree);
        assert!(failures.is_empty());

        let deduped = deduplicate(hashed);
        assert_eq!(deduped.len(), 1);

        // Same defect also surfacing at a copied location in another file: dedup keeps one per
        // file, uniqueing keeps one overall.
        let mut two_files = deduped.clone();
        let mut other = two_files[0].clone();
        other.finding.file_path = "lib_copy.h".to_string();
        two_files.push(other);

        let deduped = deduplicate(two_files);
        assert_eq!(deduped.len(), 2);

        let uniqued = unique(deduped);
        assert_eq!(uniqued.len(), 1);
    }

    proptest! {
        #[test]
        fn dedup_is_idempotent(files in proptest::collection::vec("[a-c]\\.h", 0..20)) {
            let batch: Vec<Finding> = files.iter().map(|f| header_finding(f)).collect();
            let (hashed, _) = hash_batch(batch, HashVariant::ContextFree);
            let once = deduplicate(hashed);
            let twice = deduplicate(once.clone());
            prop_assert_eq!(once.len(), twice.len());
        }

        #[test]
        fn unique_is_idempotent(files in proptest::collection::vec("[a-c]\\.h", 0..20)) {
            let batch: Vec<Finding> = files.iter().map(|f| header_finding(f)).collect();
            let (hashed, _) = hash_batch(batch, HashVariant::ContextFree);
            let once = unique(hashed);
            let twice = unique(once.clone());
            prop_assert_eq!(once.len(), twice.len());
        }
    }
}
