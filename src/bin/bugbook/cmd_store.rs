use anyhow::{Context, Result};
use std::process::ExitCode;
use tracing::{debug, info};

use crate::args;

use bugbook::datastore::Datastore;
use bugbook::ingest::load_reports_dir;
use bugbook::merge::{merge, StoreRequest};
use bugbook::progress::Progress;
use bugbook::skip_list::SkipList;
use bugbook::status::DetectionStatus;

/// This command ingests a directory of per-file report documents and reconciles them against a
/// named run, committing the result as one store event.
pub fn run(global_args: &args::GlobalArgs, args: &args::StoreArgs) -> Result<ExitCode> {
    let progress_enabled = global_args.use_progress();

    // ---------------------------------------------------------------------------------------------
    // Configure the Rayon global thread pool
    // ---------------------------------------------------------------------------------------------
    debug!("Using {} parallel jobs", args.jobs);
    rayon::ThreadPoolBuilder::new()
        .num_threads(args.jobs)
        .thread_name(|idx| format!("Ingest {idx}"))
        .build_global()
        .with_context(|| format!("Failed to configure Rayon with {} threads", args.jobs))?;

    // ---------------------------------------------------------------------------------------------
    // Load the skip list
    // ---------------------------------------------------------------------------------------------
    let skip_list = match &args.filter.skip {
        Some(path) => SkipList::from_file(path)?,
        None => SkipList::empty(),
    };

    // ---------------------------------------------------------------------------------------------
    // Ingest the report documents
    // ---------------------------------------------------------------------------------------------
    let mut progress = Progress::new_spinner("Ingesting report documents...", progress_enabled);
    let batch = load_reports_dir(
        &args.reports_dir,
        &skip_list,
        args.filter.hash.to_variant(),
    )
    .with_context(|| format!("Failed to ingest reports from {}", args.reports_dir.display()))?;
    progress.finish_with_message(format!(
        "Ingested {} findings from {} files",
        batch.findings.len(),
        batch.files.len()
    ));

    for failed in &batch.failed {
        info!("failed analysis unit {}: {} ({})", failed.file_path, failed.kind, failed.detail);
    }

    // ---------------------------------------------------------------------------------------------
    // Merge into the datastore
    // ---------------------------------------------------------------------------------------------
    let mut datastore =
        Datastore::create_or_open(&args.datastore.datastore, global_args.advanced.sqlite_cache_size)?;

    let request = StoreRequest {
        run_name: args.run.clone(),
        files_analyzed: batch.files,
        findings: batch.findings,
        force: args.force,
        tag: args.tag.clone(),
        analyzer_name: batch.analyzer_name,
        analyzer_version: batch.analyzer_version,
        enabled_checkers: batch.enabled_checkers,
        suppressions: batch.suppressions,
    };
    let outcome = merge(&mut datastore, request)
        .with_context(|| format!("Failed to store into run `{}`", args.run))?;
    datastore.analyze()?;

    if !global_args.quiet {
        println!("Stored into run `{}`:", outcome.run.name);
        for (status, count) in &outcome.counts {
            println!("    {status}: {count}");
        }
        if !batch.failed.is_empty() {
            println!("    failed analysis units: {}", batch.failed.len());
        }
        if batch.num_hash_failures > 0 {
            println!("    findings without identity fields: {}", batch.num_hash_failures);
        }
        if batch.num_skipped_files > 0 {
            println!("    files skipped by skip list: {}", batch.num_skipped_files);
        }
    }

    let num_active = outcome.count(DetectionStatus::New)
        + outcome.count(DetectionStatus::Unresolved)
        + outcome.count(DetectionStatus::Reopened);
    if num_active > 0 {
        Ok(ExitCode::from(2))
    } else {
        Ok(ExitCode::SUCCESS)
    }
}
