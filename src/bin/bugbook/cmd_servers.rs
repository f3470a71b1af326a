use anyhow::{Context, Result};
use chrono::Utc;
use std::process::ExitCode;

use crate::args;
use crate::cmd_runs::apply_table_format;

use bugbook::datastore::Datastore;
use bugbook::server_registry::{prune_dead_servers, ServerInfo};

pub fn run(global_args: &args::GlobalArgs, args: &args::ServersCommand) -> Result<ExitCode> {
    match args {
        args::ServersCommand::List(args) => list(global_args, args),
        args::ServersCommand::Register(args) => register(global_args, args),
        args::ServersCommand::Prune(args) => prune(global_args, args),
    }
}

fn open(global_args: &args::GlobalArgs, datastore_args: &args::DatastoreArgs) -> Result<Datastore> {
    Datastore::create_or_open(&datastore_args.datastore, global_args.advanced.sqlite_cache_size)
        .with_context(|| format!("Failed to open datastore at {}", datastore_args.datastore.display()))
}

fn list(global_args: &args::GlobalArgs, args: &args::ServersListArgs) -> Result<ExitCode> {
    use prettytable::row;

    let datastore = open(global_args, &args.datastore)?;
    let servers = datastore.servers()?;
    if servers.is_empty() {
        if !global_args.quiet {
            println!("No servers registered");
        }
        return Ok(ExitCode::SUCCESS);
    }

    let mut table = prettytable::Table::new();
    table.set_titles(row![
        lb -> "Workspace",
        cb -> "PID",
        cb -> "Port",
        cb -> "Started",
        cb -> "Alive",
    ]);
    for server in &servers {
        table.add_row(row![
            l -> &server.workspace,
            r -> server.pid,
            r -> server.port,
            l -> server.started_at.format("%Y-%m-%d %H:%M:%S"),
            c -> if server.is_alive() { "yes" } else { "no" },
        ]);
    }
    apply_table_format(&mut table);
    table.printstd();

    Ok(ExitCode::SUCCESS)
}

fn register(global_args: &args::GlobalArgs, args: &args::ServersRegisterArgs) -> Result<ExitCode> {
    let datastore = open(global_args, &args.datastore)?;
    let info = ServerInfo {
        workspace: args.workspace.clone(),
        pid: args.pid,
        port: args.port,
        started_at: Utc::now(),
    };
    datastore.register_server(&info)?;
    if !global_args.quiet {
        println!("Registered server for workspace {} (pid {}, port {})", info.workspace, info.pid, info.port);
    }
    Ok(ExitCode::SUCCESS)
}

fn prune(global_args: &args::GlobalArgs, args: &args::ServersPruneArgs) -> Result<ExitCode> {
    let datastore = open(global_args, &args.datastore)?;
    let removed = prune_dead_servers(&datastore)?;
    if !global_args.quiet {
        println!("Pruned {} dead server entries", removed.len());
    }
    Ok(ExitCode::SUCCESS)
}
