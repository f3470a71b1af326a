use anyhow::{bail, Context, Result};
use std::process::ExitCode;

use crate::args;

use bugbook::datastore::Datastore;
use bugbook::status::DetectionStatus;

pub fn run(global_args: &args::GlobalArgs, args: &args::RunsCommand) -> Result<ExitCode> {
    match args {
        args::RunsCommand::List(args) => list(global_args, args),
        args::RunsCommand::Delete(args) => delete(global_args, args),
    }
}

fn list(global_args: &args::GlobalArgs, args: &args::RunsListArgs) -> Result<ExitCode> {
    let datastore = Datastore::open(&args.datastore.datastore, global_args.advanced.sqlite_cache_size)
        .with_context(|| format!("Failed to open datastore at {}", args.datastore.datastore.display()))?;

    let runs = datastore.runs_matching(&args.selector)?;
    if runs.is_empty() {
        if !global_args.quiet {
            println!("No runs match `{}`", args.selector);
        }
        return Ok(ExitCode::SUCCESS);
    }

    let mut table = runs_table(&datastore, &runs)?;
    apply_table_format(&mut table);
    table.printstd();

    Ok(ExitCode::SUCCESS)
}

fn delete(global_args: &args::GlobalArgs, args: &args::RunsDeleteArgs) -> Result<ExitCode> {
    let datastore = Datastore::open(&args.datastore.datastore, global_args.advanced.sqlite_cache_size)
        .with_context(|| format!("Failed to open datastore at {}", args.datastore.datastore.display()))?;

    if !datastore.delete_run(&args.name)? {
        bail!("no run named `{}` exists", args.name);
    }
    if !global_args.quiet {
        println!("Deleted run `{}`", args.name);
    }
    Ok(ExitCode::SUCCESS)
}

fn runs_table(datastore: &Datastore, runs: &[bugbook::run::Run]) -> Result<prettytable::Table> {
    use prettytable::row;

    let mut table = prettytable::Table::new();
    table.set_titles(row![
        lb -> "Run",
        cb -> "Active",
        cb -> "Resolved",
        cb -> "Total",
        cb -> "Events",
        cb -> "Last store",
    ]);

    for run in runs {
        let counts = datastore.detection_status_counts(run.id)?;
        let count = |status: DetectionStatus| counts.get(&status).copied().unwrap_or(0);
        let active = count(DetectionStatus::New)
            + count(DetectionStatus::Unresolved)
            + count(DetectionStatus::Reopened);
        let total: usize = counts.values().sum();
        let events = datastore.store_events(run.id)?;
        let last_store = events
            .last()
            .map(|e| e.timestamp.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());

        table.add_row(row![
            l -> &run.name,
            r -> active,
            r -> count(DetectionStatus::Resolved),
            r -> total,
            r -> events.len(),
            l -> last_store,
        ]);
    }

    Ok(table)
}

pub(crate) fn apply_table_format(table: &mut prettytable::Table) {
    use prettytable::format::{FormatBuilder, LinePosition, LineSeparator};

    let f = FormatBuilder::new()
        .column_separator(' ')
        .separators(&[LinePosition::Title], LineSeparator::new('─', '─', '─', '─'))
        .padding(1, 1)
        .build();
    table.set_format(f);
}
