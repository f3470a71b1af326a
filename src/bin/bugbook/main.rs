use anyhow::{Context, Result};
use std::process::ExitCode;

mod args;
mod cmd_diff;
mod cmd_review;
mod cmd_runs;
mod cmd_servers;
mod cmd_store;
mod cmd_summarize;

use args::{CommandLineArgs, GlobalArgs};

/// Set up the logging / tracing system for the application.
fn configure_tracing(global_args: &GlobalArgs) -> Result<()> {
    use tracing_log::{AsLog, LogTracer};
    use tracing_subscriber::{filter::LevelFilter, EnvFilter};

    // Set the tracing level according to the `-q`/`--quiet` and `-v`/`--verbose` options
    let level_filter = if global_args.quiet {
        LevelFilter::ERROR
    } else {
        match global_args.verbose {
            0 => LevelFilter::WARN,
            1 => LevelFilter::INFO,
            2 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        }
    };

    // Configure the bridge from the `log` crate to the `tracing` crate
    LogTracer::builder()
        .with_max_level(level_filter.as_log())
        .init()?;

    // Configure logging filters according to the `BUGBOOK_LOG` environment variable
    let env_filter = EnvFilter::builder()
        .with_default_directive(level_filter.into())
        .with_env_var("BUGBOOK_LOG")
        .from_env()
        .context("Failed to parse filters from BUGBOOK_LOG environment variable")?;

    // Install the global tracing subscriber
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_ansi(global_args.use_color())
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    Ok(())
}

/// Enable or disable colored output according to the global arguments.
fn configure_color(global_args: &GlobalArgs) {
    console::set_colors_enabled(global_args.use_color());
    console::set_colors_enabled_stderr(global_args.use_color());
}

/// Enable or disable backtraces for the process according to the global arguments.
fn configure_backtraces(global_args: &GlobalArgs) {
    if global_args.advanced.enable_backtraces {
        // Print a stack trace in case of panic.
        // This should have no overhead in normal execution.
        std::env::set_var("RUST_BACKTRACE", "1");
    }
}

fn try_main(args: &CommandLineArgs) -> Result<ExitCode> {
    let global_args = &args.global_args;

    configure_backtraces(global_args);
    configure_color(global_args);
    configure_tracing(global_args).context("Failed to initialize logging")?;

    match &args.command {
        args::Command::Store(args) => cmd_store::run(global_args, args),
        args::Command::Diff(args) => cmd_diff::run(global_args, args),
        args::Command::Runs(args) => cmd_runs::run(global_args, args),
        args::Command::Review(args) => cmd_review::run(global_args, args),
        args::Command::Summarize(args) => cmd_summarize::run(global_args, args),
        args::Command::Servers(args) => cmd_servers::run(global_args, args),
    }
}

fn main() -> ExitCode {
    let args = &CommandLineArgs::parse_args();
    match try_main(args) {
        Ok(code) => code,
        Err(e) => {
            // Use the more verbose format that includes a backtrace when running with -vv or
            // higher, otherwise use a more compact one-line error format.
            if args.global_args.verbose > 1 {
                eprintln!("Error: {e:?}");
            } else {
                eprintln!("Error: {e:#}");
            }
            ExitCode::FAILURE
        }
    }
}
