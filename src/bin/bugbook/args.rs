use clap::{crate_description, ArgAction, Args, Parser, Subcommand, ValueEnum};
use std::io::IsTerminal;
use std::path::PathBuf;

use bugbook::identity::HashVariant;
use bugbook::status::{DetectionStatus, ReviewStatus};

const DEFAULT_DATASTORE: &str = "datastore.bb";

// -----------------------------------------------------------------------------
// command-line args
// -----------------------------------------------------------------------------
#[derive(Parser, Debug)]
#[command(
    name("bugbook"),
    bin_name("bugbook"),

    author,   // retrieved from Cargo.toml `authors`
    version,  // retrieved from Cargo.toml `version`
    about,    // retrieved from Cargo.toml `description`

    long_about = concat!(
        crate_description!(),
    ),
)]
#[deny(missing_docs)]
/// Record and track static analysis findings across repeated analyses
pub struct CommandLineArgs {
    #[command(subcommand)]
    pub command: Command,

    #[command(flatten)]
    pub global_args: GlobalArgs,
}

impl CommandLineArgs {
    pub fn parse_args() -> Self {
        let mut args = Self::parse();

        // If `NO_COLOR` is set in the environment, disable colored output
        //
        // https://no-color.org/
        if std::env::var("NO_COLOR").is_ok() {
            args.global_args.color = Mode::Never
        }

        args
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Store a batch of analysis results into a run
    ///
    /// The batch is a directory of per-file report documents, one JSON document per analyzed
    /// source file, as written by the analyzer invocation tooling.
    ///
    /// Storing reconciles the batch against the named run: findings seen for the first time
    /// become `new`, findings still present become `unresolved`, findings absent from a
    /// re-analyzed file become `resolved`, and resolved findings that reappear become
    /// `reopened`. Files outside the batch are left untouched unless `--force` is given.
    ///
    /// Exits with code 0 when the run has no active findings afterwards, 2 when it has some,
    /// and 1 on operation failure.
    Store(StoreArgs),

    /// Compare two analysis snapshots
    ///
    /// Each side is either the name of a stored run (optionally with `*` wildcards, which must
    /// match exactly one run) or a path to a directory of per-file report documents that was
    /// never stored. Both sides are reduced to their active findings first unless explicit
    /// status filters are given.
    ///
    /// Exits with code 0 when the requested difference is empty, 2 when it is not, and 1 on
    /// operation failure.
    Diff(DiffArgs),

    /// Manage stored runs
    #[command(subcommand)]
    Runs(RunsCommand),

    /// Record an explicit review decision for one finding identity
    ///
    /// Unlike in-source suppression annotations, which are re-evaluated at every store, an
    /// explicit decision is sticky until changed by another decision or a covering annotation.
    Review(ReviewArgs),

    /// Summarize a run's findings per checker
    Summarize(SummarizeArgs),

    /// Manage the registry of background servers
    #[command(subcommand)]
    Servers(ServersCommand),
}

// -----------------------------------------------------------------------------
// global options
// -----------------------------------------------------------------------------
#[derive(Args, Debug)]
#[command(next_help_heading = "Global Options")]
pub struct GlobalArgs {
    /// Enable verbose output
    ///
    /// This can be repeated up to 3 times to enable successively more output.
    #[arg(global=true, long, short, action=ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(global = true, long, short)]
    pub quiet: bool,

    /// Enable or disable colored output
    ///
    /// When this is "auto", colors are enabled when stdout is a tty.
    ///
    /// If the `NO_COLOR` environment variable is set, it takes precedence and is equivalent to
    /// `--color=never`.
    #[arg(global=true, long, default_value_t=Mode::Auto, value_name="MODE")]
    pub color: Mode,

    /// Enable or disable progress bars
    ///
    /// When this is "auto", progress bars are enabled when stderr is a tty.
    #[arg(global=true, long, default_value_t=Mode::Auto, value_name="MODE")]
    pub progress: Mode,

    #[command(flatten)]
    pub advanced: AdvancedArgs,
}

#[derive(Args, Debug)]
#[command(next_help_heading = "Advanced Global Options")]
/// These are advanced options that should not need to be used in normal circumstances.
pub struct AdvancedArgs {
    /// Set the cache size in kibibytes for the sqlite database
    #[arg(hide_short_help=true, global=true, long, default_value_t=-65536, value_name="KIBIBYTES", allow_hyphen_values=true)]
    pub sqlite_cache_size: i64,

    /// Enable or disable backtraces on panic
    ///
    /// This has the effect of setting the `RUST_BACKTRACE` environment variable to 1.
    #[arg(hide_short_help=true, global=true, long, default_value_t=true, action=ArgAction::Set, value_name="BOOL")]
    pub enable_backtraces: bool,
}

impl GlobalArgs {
    pub fn use_color(&self) -> bool {
        match self.color {
            Mode::Never => false,
            Mode::Always => true,
            Mode::Auto => std::io::stdout().is_terminal(),
        }
    }

    pub fn use_progress(&self) -> bool {
        if self.quiet {
            return false;
        }
        match self.progress {
            Mode::Never => false,
            Mode::Always => true,
            Mode::Auto => std::io::stderr().is_terminal(),
        }
    }
}

/// A generic auto/never/always mode value
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum Mode {
    Auto,
    Never,
    Always,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Mode::Auto => "auto",
            Mode::Never => "never",
            Mode::Always => "always",
        };
        write!(f, "{s}")
    }
}

// -----------------------------------------------------------------------------
// shared argument groups
// -----------------------------------------------------------------------------
#[derive(Args, Debug)]
pub struct DatastoreArgs {
    /// Use the datastore at this directory
    #[arg(
        long,
        short,
        value_name = "PATH",
        env = "BUGBOOK_DATASTORE",
        default_value = DEFAULT_DATASTORE
    )]
    pub datastore: PathBuf,
}

#[derive(Args, Debug)]
pub struct FilterArgs {
    /// Apply the skip list from this file
    ///
    /// One rule per line: a `+` or `-` sign immediately followed by a glob pattern. Rules are
    /// evaluated top to bottom and the first match decides; unmatched paths are included.
    #[arg(long, value_name = "FILE")]
    pub skip: Option<PathBuf>,

    /// Which identity hash to compute for the batch
    ///
    /// `context-free` ignores the execution path entirely. `context-sensitive` also folds in
    /// the path steps, so the same report reached through a different path is a different
    /// identity. Use the same choice consistently for a run.
    #[arg(long, value_name = "VARIANT", default_value_t = HashVariantArg::ContextFree)]
    pub hash: HashVariantArg,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum HashVariantArg {
    ContextFree,
    ContextSensitive,
}

impl HashVariantArg {
    pub fn to_variant(self) -> HashVariant {
        match self {
            HashVariantArg::ContextFree => HashVariant::ContextFree,
            HashVariantArg::ContextSensitive => HashVariant::ContextSensitive,
        }
    }
}

impl std::fmt::Display for HashVariantArg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HashVariantArg::ContextFree => "context-free",
            HashVariantArg::ContextSensitive => "context-sensitive",
        };
        write!(f, "{s}")
    }
}

// -----------------------------------------------------------------------------
// `store` command
// -----------------------------------------------------------------------------
#[derive(Args, Debug)]
pub struct StoreArgs {
    #[command(flatten)]
    pub datastore: DatastoreArgs,

    #[command(flatten)]
    pub filter: FilterArgs,

    /// Directory of per-file report documents to store
    pub reports_dir: PathBuf,

    /// Name of the run to store into; created on first store
    #[arg(long, short = 'r', value_name = "NAME")]
    pub run: String,

    /// Mark everything previously stored as absent first
    ///
    /// Only identities present in this batch can end up non-resolved afterwards, as if the
    /// whole run had been freshly re-analyzed in one go.
    #[arg(long)]
    pub force: bool,

    /// Attach a tag to this store event
    #[arg(long, value_name = "TAG")]
    pub tag: Option<String>,

    /// The number of parallel jobs to use for ingesting report documents
    #[arg(long, short = 'j', value_name = "N", default_value_t = 4)]
    pub jobs: usize,
}

// -----------------------------------------------------------------------------
// `diff` command
// -----------------------------------------------------------------------------
#[derive(Args, Debug)]
#[command(group = clap::ArgGroup::new("mode").required(true))]
pub struct DiffArgs {
    #[command(flatten)]
    pub datastore: DatastoreArgs,

    #[command(flatten)]
    pub filter: FilterArgs,

    /// The baseline: a stored run name (with optional wildcards) or a reports directory
    #[arg(long, short = 'b', value_name = "RUN_OR_DIR")]
    pub basename: String,

    /// The new side: a stored run name (with optional wildcards) or a reports directory
    #[arg(long, short = 'n', value_name = "RUN_OR_DIR")]
    pub newname: String,

    /// Report findings that only appear on the new side
    #[arg(long, group = "mode")]
    pub new: bool,

    /// Report findings that only appear on the baseline side
    #[arg(long, group = "mode")]
    pub resolved: bool,

    /// Report findings present on both sides
    #[arg(long, group = "mode")]
    pub unresolved: bool,

    /// Only consider findings with these detection statuses
    ///
    /// Replaces the default rule, which drops resolved, off, and unavailable findings.
    #[arg(long, value_name = "STATUS")]
    pub detection_status: Vec<DetectionStatusArg>,

    /// Only consider findings with these review statuses
    ///
    /// Replaces the default rule, which drops false-positive and intentional findings.
    #[arg(long, value_name = "STATUS")]
    pub review_status: Vec<ReviewStatusArg>,

    /// Collapse the result to one finding per identity, across all files
    ///
    /// Answers "how many distinct defects" instead of "how many times was any defect observed".
    #[arg(long)]
    pub uniqueing: bool,

    /// Output format for the result
    #[arg(long, short = 'o', value_name = "FORMAT", default_value_t = OutputFormat::Human)]
    pub format: OutputFormat,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum DetectionStatusArg {
    New,
    Unresolved,
    Reopened,
    Resolved,
    Off,
    Unavailable,
}

impl DetectionStatusArg {
    pub fn to_status(self) -> DetectionStatus {
        match self {
            DetectionStatusArg::New => DetectionStatus::New,
            DetectionStatusArg::Unresolved => DetectionStatus::Unresolved,
            DetectionStatusArg::Reopened => DetectionStatus::Reopened,
            DetectionStatusArg::Resolved => DetectionStatus::Resolved,
            DetectionStatusArg::Off => DetectionStatus::Off,
            DetectionStatusArg::Unavailable => DetectionStatus::Unavailable,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum ReviewStatusArg {
    Unreviewed,
    Confirmed,
    FalsePositive,
    Intentional,
}

impl ReviewStatusArg {
    pub fn to_status(self) -> ReviewStatus {
        match self {
            ReviewStatusArg::Unreviewed => ReviewStatus::Unreviewed,
            ReviewStatusArg::Confirmed => ReviewStatus::Confirmed,
            ReviewStatusArg::FalsePositive => ReviewStatus::FalsePositive,
            ReviewStatusArg::Intentional => ReviewStatus::Intentional,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Human,
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OutputFormat::Human => "human",
            OutputFormat::Json => "json",
        };
        write!(f, "{s}")
    }
}

// -----------------------------------------------------------------------------
// `runs` command
// -----------------------------------------------------------------------------
#[derive(Subcommand, Debug)]
pub enum RunsCommand {
    /// List stored runs with their status counts
    List(RunsListArgs),

    /// Delete a run and everything recorded for it
    ///
    /// This is the only operation that physically removes findings.
    Delete(RunsDeleteArgs),
}

#[derive(Args, Debug)]
pub struct RunsListArgs {
    #[command(flatten)]
    pub datastore: DatastoreArgs,

    /// Only list runs whose name matches this selector; `*` and `?` wildcards are allowed
    #[arg(value_name = "SELECTOR", default_value = "*")]
    pub selector: String,
}

#[derive(Args, Debug)]
pub struct RunsDeleteArgs {
    #[command(flatten)]
    pub datastore: DatastoreArgs,

    /// Exact name of the run to delete
    pub name: String,
}

// -----------------------------------------------------------------------------
// `review` command
// -----------------------------------------------------------------------------
#[derive(Args, Debug)]
pub struct ReviewArgs {
    #[command(flatten)]
    pub datastore: DatastoreArgs,

    /// The run whose finding is being reviewed; wildcards must match exactly one run
    #[arg(long, short = 'r', value_name = "NAME")]
    pub run: String,

    /// The identity hash of the finding being reviewed
    pub hash: String,

    /// The review status to record
    #[arg(long, short = 's', value_name = "STATUS")]
    pub status: ReviewStatusArg,

    /// A justification to record alongside the status
    #[arg(long, short = 'm', value_name = "TEXT")]
    pub comment: Option<String>,
}

// -----------------------------------------------------------------------------
// `summarize` command
// -----------------------------------------------------------------------------
#[derive(Args, Debug)]
pub struct SummarizeArgs {
    #[command(flatten)]
    pub datastore: DatastoreArgs,

    /// The run to summarize; wildcards must match exactly one run
    #[arg(value_name = "SELECTOR")]
    pub run: String,

    /// Output format for the summary
    #[arg(long, short = 'o', value_name = "FORMAT", default_value_t = OutputFormat::Human)]
    pub format: OutputFormat,
}

// -----------------------------------------------------------------------------
// `servers` command
// -----------------------------------------------------------------------------
#[derive(Subcommand, Debug)]
pub enum ServersCommand {
    /// List registered background servers
    List(ServersListArgs),

    /// Register a background server for a workspace
    Register(ServersRegisterArgs),

    /// Remove registry entries whose process is gone
    Prune(ServersPruneArgs),
}

#[derive(Args, Debug)]
pub struct ServersListArgs {
    #[command(flatten)]
    pub datastore: DatastoreArgs,
}

#[derive(Args, Debug)]
pub struct ServersRegisterArgs {
    #[command(flatten)]
    pub datastore: DatastoreArgs,

    /// The workspace directory the server belongs to
    #[arg(long, value_name = "PATH")]
    pub workspace: String,

    /// The server's process id
    #[arg(long)]
    pub pid: u32,

    /// The port the server listens on
    #[arg(long)]
    pub port: u16,
}

#[derive(Args, Debug)]
pub struct ServersPruneArgs {
    #[command(flatten)]
    pub datastore: DatastoreArgs,
}
