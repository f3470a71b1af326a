use anyhow::{Context, Result};
use std::process::ExitCode;

use crate::args;
use crate::cmd_runs::apply_table_format;

use bugbook::datastore::{Datastore, RunSummary};
use bugbook::diff::resolve_single_run;

pub fn run(global_args: &args::GlobalArgs, args: &args::SummarizeArgs) -> Result<ExitCode> {
    let datastore = Datastore::open(&args.datastore.datastore, global_args.advanced.sqlite_cache_size)
        .with_context(|| format!("Failed to open datastore at {}", args.datastore.datastore.display()))?;

    let run = resolve_single_run(&datastore, &args.run)?;
    let summary = datastore
        .summarize_run(run.id)
        .with_context(|| format!("Failed to summarize run `{}`", run.name))?;

    match args.format {
        args::OutputFormat::Human => {
            println!();
            let mut table = summary_table(&summary);
            apply_table_format(&mut table);
            table.printstd();
        }
        args::OutputFormat::Json => {
            serde_json::to_writer_pretty(std::io::stdout(), &summary)?;
            println!();
        }
    }

    let num_active: usize = summary.0.iter().map(|e| e.active_count).sum();
    if num_active > 0 {
        Ok(ExitCode::from(2))
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

fn summary_table(summary: &RunSummary) -> prettytable::Table {
    use prettytable::row;

    let mut table: prettytable::Table = summary
        .0
        .iter()
        .map(|e| {
            row![
                 l -> &e.checker_name,
                 l -> e.severity,
                 r -> e.active_count,
                 r -> e.suppressed_count,
                 r -> e.resolved_count,
                 r -> e.total_count,
            ]
        })
        .collect();
    table.set_titles(row![
        lb -> "Checker",
        cb -> "Severity",
        cb -> "Active",
        cb -> "Suppressed",
        cb -> "Resolved",
        cb -> "Total",
    ]);
    table
}
