use anyhow::{Context, Result};
use rayon::prelude::*;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::finding::{Finding, Severity};
use crate::identity::{hash_batch, HashVariant, HashedFinding};
use crate::skip_list::SkipList;
use crate::suppression::{scan_source, SuppressionNote};

// -------------------------------------------------------------------------------------------------
// AnalyzerKind
// -------------------------------------------------------------------------------------------------
/// The closed set of analyzer families whose output this engine ingests.
///
/// Tool invocation and native-output conversion happen outside; every family projects into the
/// same per-file report document, so the engine never needs to understand a particular
/// analyzer's checks. The variants only differ in cosmetic normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalyzerKind {
    ClangSa,
    ClangTidy,
    External(String),
}

impl AnalyzerKind {
    pub fn from_label(label: &str) -> Self {
        match label {
            "clang-sa" => AnalyzerKind::ClangSa,
            "clang-tidy" => AnalyzerKind::ClangTidy,
            other => AnalyzerKind::External(other.to_string()),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            AnalyzerKind::ClangSa => "clang-sa",
            AnalyzerKind::ClangTidy => "clang-tidy",
            AnalyzerKind::External(name) => name,
        }
    }

    /// The severity assumed for findings the converter left unclassified.
    fn default_severity(&self) -> Severity {
        match self {
            AnalyzerKind::ClangSa => Severity::Medium,
            AnalyzerKind::ClangTidy => Severity::Style,
            AnalyzerKind::External(_) => Severity::Unspecified,
        }
    }

    fn normalize(&self, finding: &mut Finding) {
        if finding.severity == Severity::Unspecified {
            finding.severity = self.default_severity();
        }
    }
}

// -------------------------------------------------------------------------------------------------
// FileReport
// -------------------------------------------------------------------------------------------------

/// Outcome of one per-file analysis as reported by the invocation collaborator.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    #[default]
    Ok,
    Timeout,
    Crashed,
}

/// One per-file report document: the raw finding batch for a single analyzed source file.
///
/// Batches are produced out of order and in parallel by the analyzer workers; each worker writes
/// one JSON document of this shape.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FileReport {
    /// Which analyzer produced this batch
    pub analyzer: String,

    #[serde(default)]
    pub analyzer_version: Option<String>,

    /// The analyzed source file
    pub file_path: String,

    #[serde(default)]
    pub status: AnalysisStatus,

    /// Failure detail when status is not ok
    #[serde(default)]
    pub error: Option<String>,

    /// The checkers that were enabled for this analysis, when known
    #[serde(default)]
    pub checkers: Vec<String>,

    #[serde(default)]
    pub findings: Vec<Finding>,

    /// Pre-extracted suppression annotations for this file
    #[serde(default)]
    pub suppressions: Vec<SuppressionNote>,
}

/// Parse one per-file report document and normalize its findings.
pub fn parse_file_report(text: &str) -> Result<FileReport> {
    let mut report: FileReport =
        serde_json::from_str(text).context("Failed to parse file report JSON")?;
    let kind = AnalyzerKind::from_label(&report.analyzer);
    for finding in &mut report.findings {
        kind.normalize(finding);
    }
    Ok(report)
}

// -------------------------------------------------------------------------------------------------
// FailedUnit
// -------------------------------------------------------------------------------------------------

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    Crash,
    Malformed,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureKind::Timeout => "timeout",
            FailureKind::Crash => "crash",
            FailureKind::Malformed => "malformed",
        };
        write!(f, "{s}")
    }
}

/// One analysis unit that produced no usable findings.
///
/// Failures are isolated per file: a timed-out or crashed worker, or an unreadable report
/// document, never affects the findings of other files in the same invocation.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct FailedUnit {
    pub file_path: String,
    pub kind: FailureKind,
    pub detail: String,
}

// -------------------------------------------------------------------------------------------------
// Batch
// -------------------------------------------------------------------------------------------------
/// A fully ingested analysis invocation: hashed, skip-filtered, deduplicated findings plus
/// everything the merger needs to reconcile them.
#[derive(Debug, Default)]
pub struct Batch {
    pub findings: Vec<HashedFinding>,

    /// The files that were successfully analyzed and passed the skip list
    pub files: Vec<String>,

    pub failed: Vec<FailedUnit>,

    /// Suppression annotations, keyed by file path
    pub suppressions: HashMap<String, Vec<SuppressionNote>>,

    pub analyzer_name: Option<String>,
    pub analyzer_version: Option<String>,

    /// Union of the enabled checkers reported per file; `None` when no report listed any
    pub enabled_checkers: Option<BTreeSet<String>>,

    pub num_hash_failures: usize,
    pub num_skipped_files: usize,
}

enum ParsedUnit {
    Report(FileReport),
    Failed(FailedUnit),
}

/// Ingest a directory of per-file report documents.
///
/// Report parsing runs on the rayon pool; the reduction is sequential. Per-file problems —
/// malformed documents, timed-out or crashed analyses, findings missing identity fields — are
/// isolated and aggregated; only an unreadable directory fails the whole load.
pub fn load_reports_dir(dir: &Path, skip: &SkipList, variant: HashVariant) -> Result<Batch> {
    let mut report_paths = Vec::new();
    for entry in WalkDir::new(dir) {
        let entry = entry.with_context(|| {
            format!("Failed to enumerate report documents under {}", dir.display())
        })?;
        if entry.file_type().is_file()
            && entry.path().extension().map_or(false, |ext| ext == "json")
        {
            report_paths.push(entry.path().to_owned());
        }
    }
    report_paths.sort();
    debug!("Found {} report documents under {}", report_paths.len(), dir.display());

    let parsed: Vec<ParsedUnit> = report_paths
        .par_iter()
        .map(|path| {
            let text = match std::fs::read_to_string(path) {
                Ok(text) => text,
                Err(e) => {
                    return ParsedUnit::Failed(FailedUnit {
                        file_path: path.display().to_string(),
                        kind: FailureKind::Malformed,
                        detail: format!("unreadable report document: {e}"),
                    })
                }
            };
            match parse_file_report(&text) {
                Ok(report) => ParsedUnit::Report(report),
                Err(e) => ParsedUnit::Failed(FailedUnit {
                    file_path: path.display().to_string(),
                    kind: FailureKind::Malformed,
                    detail: format!("{e:#}"),
                }),
            }
        })
        .collect();

    let mut batch = Batch::default();
    let mut raw_findings = Vec::new();
    let mut checkers: BTreeSet<String> = BTreeSet::new();
    let mut any_checkers_listed = false;

    for unit in parsed {
        let report = match unit {
            ParsedUnit::Report(report) => report,
            ParsedUnit::Failed(failed) => {
                warn!("{}: {} ({})", failed.file_path, failed.kind, failed.detail);
                batch.failed.push(failed);
                continue;
            }
        };

        if !skip.is_included(&report.file_path) {
            debug!("Skipping {} per skip list", report.file_path);
            batch.num_skipped_files += 1;
            continue;
        }

        match report.status {
            AnalysisStatus::Ok => {}
            AnalysisStatus::Timeout | AnalysisStatus::Crashed => {
                let kind = match report.status {
                    AnalysisStatus::Timeout => FailureKind::Timeout,
                    _ => FailureKind::Crash,
                };
                batch.failed.push(FailedUnit {
                    file_path: report.file_path.clone(),
                    kind,
                    detail: report.error.unwrap_or_default(),
                });
                continue;
            }
        }

        if batch.analyzer_name.is_none() {
            batch.analyzer_name = Some(report.analyzer.clone());
            batch.analyzer_version = report.analyzer_version.clone();
        }
        if !report.checkers.is_empty() {
            any_checkers_listed = true;
            checkers.extend(report.checkers.iter().cloned());
        }

        let notes = if report.suppressions.is_empty() {
            suppressions_from_source(&report.file_path)
        } else {
            report.suppressions.clone()
        };
        if !notes.is_empty() {
            batch.suppressions.insert(report.file_path.clone(), notes);
        }

        batch.files.push(report.file_path.clone());
        raw_findings.extend(report.findings);
    }

    let (hashed, hash_failures) = hash_batch(raw_findings, variant);
    batch.num_hash_failures = hash_failures.len();
    batch.findings = crate::dedup::deduplicate(hashed);
    if any_checkers_listed {
        batch.enabled_checkers = Some(checkers);
    }

    Ok(batch)
}

/// Scan the analyzed source file for suppression annotations, when it is readable from here.
///
/// Report documents may carry pre-extracted annotations instead; those take precedence.
fn suppressions_from_source(file_path: &str) -> Vec<SuppressionNote> {
    match std::fs::read_to_string(file_path) {
        Ok(text) => scan_source(&text),
        Err(_) => Vec::new(),
    }
}
