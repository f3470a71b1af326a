use thiserror::Error;

// -------------------------------------------------------------------------------------------------
// Error
// -------------------------------------------------------------------------------------------------
/// The error taxonomy of the core engine.
///
/// Per-file analysis failures are deliberately _not_ represented here: those are recovered locally
/// and aggregated into a failure report (see `ingest::FailedUnit`) instead of aborting an
/// operation.
#[derive(Debug, Error)]
pub enum Error {
    /// A finding is missing a field that identity hashing requires.
    ///
    /// Callers should exclude the offending finding and surface a warning rather than aborting
    /// the whole batch.
    #[error("cannot compute identity hash for finding at {file_path}:{line}: missing required field `{missing}`")]
    HashComputation {
        file_path: String,
        line: u64,
        missing: &'static str,
    },

    /// Another store operation already holds the merge lock for this run.
    #[error("run `{run}` is locked by another store operation in progress; retry later")]
    RunLocked { run: String },

    /// A skip list line did not parse. The whole skip list load fails rather than silently
    /// ignoring the bad line, since that would silently change which files are analyzed.
    #[error("malformed skip rule on line {line_no}: `{line}` (expected `+` or `-` immediately followed by a glob pattern)")]
    MalformedSkipRule { line_no: usize, line: String },

    /// A run selector matched zero or more than one run where exactly one was required.
    #[error("run selector `{selector}` matched {matched} runs; expected exactly one")]
    IdentifierResolution { selector: String, matched: usize },
}

pub type Result<T> = std::result::Result<T, Error>;
