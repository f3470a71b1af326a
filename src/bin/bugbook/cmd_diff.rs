use anyhow::{Context, Result};
use std::path::Path;
use std::process::ExitCode;
use tracing::debug;

use crate::args;

use bugbook::datastore::Datastore;
use bugbook::diff::{diff, materialize_local, resolve_single_run, DiffMode, StatusFilter};
use bugbook::ingest::load_reports_dir;
use bugbook::run::FindingRecord;
use bugbook::skip_list::SkipList;

/// This command compares two analysis snapshots: stored runs, local report directories, or one
/// of each. The comparison itself is read-only and never mutates either side.
pub fn run(global_args: &args::GlobalArgs, args: &args::DiffArgs) -> Result<ExitCode> {
    let skip_list = match &args.filter.skip {
        Some(path) => SkipList::from_file(path)?,
        None => SkipList::empty(),
    };

    // The datastore is only opened when a side actually names a stored run, so two local report
    // directories can be compared without one existing.
    let mut datastore: Option<Datastore> = None;

    let base = materialize_side(global_args, args, &mut datastore, &skip_list, &args.basename)?;
    let new = materialize_side(global_args, args, &mut datastore, &skip_list, &args.newname)?;

    let mode = if args.new {
        DiffMode::New
    } else if args.resolved {
        DiffMode::Resolved
    } else {
        DiffMode::Unresolved
    };

    let filter = StatusFilter {
        detection_statuses: if args.detection_status.is_empty() {
            None
        } else {
            Some(args.detection_status.iter().map(|s| s.to_status()).collect())
        },
        review_statuses: if args.review_status.is_empty() {
            None
        } else {
            Some(args.review_status.iter().map(|s| s.to_status()).collect())
        },
    };

    let mut result = diff(&base, &new, mode, &filter);
    if args.uniqueing {
        result = bugbook::dedup::unique_records(result);
    }

    match args.format {
        args::OutputFormat::Human => {
            for record in &result {
                println!("{record}");
            }
            if !global_args.quiet {
                println!("{} findings", result.len());
            }
        }
        args::OutputFormat::Json => {
            serde_json::to_writer_pretty(std::io::stdout(), &result)?;
            println!();
        }
    }

    if result.is_empty() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(2))
    }
}

/// Materialize one side of the comparison.
///
/// A value naming an existing directory is ingested as a local, never-stored batch; anything
/// else is resolved as a run selector against the datastore.
fn materialize_side(
    global_args: &args::GlobalArgs,
    args: &args::DiffArgs,
    datastore: &mut Option<Datastore>,
    skip_list: &SkipList,
    side: &str,
) -> Result<Vec<FindingRecord>> {
    let path = Path::new(side);
    if path.is_dir() {
        debug!("Treating `{side}` as a local reports directory");
        let batch = load_reports_dir(path, skip_list, args.filter.hash.to_variant())
            .with_context(|| format!("Failed to ingest reports from {side}"))?;
        return Ok(materialize_local(batch.findings, &batch.suppressions));
    }

    debug!("Treating `{side}` as a run selector");
    if datastore.is_none() {
        *datastore = Some(Datastore::open(
            &args.datastore.datastore,
            global_args.advanced.sqlite_cache_size,
        )?);
    }
    let ds = datastore.as_ref().expect("datastore should be open");
    let run = resolve_single_run(ds, side)?;
    let records = ds.load_findings(run.id)?;

    // Report-time path filtering: the same skip list machinery as analysis time.
    Ok(records
        .into_iter()
        .filter(|r| skip_list.is_included(&r.finding.file_path))
        .collect())
}
