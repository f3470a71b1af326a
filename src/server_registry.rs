use anyhow::Result;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::Serialize;
use tracing::debug;

use crate::datastore::Datastore;

// -------------------------------------------------------------------------------------------------
// ServerInfo
// -------------------------------------------------------------------------------------------------
/// One registered background server, keyed by its workspace directory.
///
/// The registry is an ordinary datastore table queried and mutated through explicit calls; there
/// is deliberately no in-process singleton tracking running servers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, JsonSchema)]
pub struct ServerInfo {
    pub workspace: String,
    pub pid: u32,
    pub port: u16,
    pub started_at: DateTime<Utc>,
}

impl ServerInfo {
    /// Best-effort liveness check for the registered process.
    pub fn is_alive(&self) -> bool {
        process_exists(self.pid)
    }
}

#[cfg(target_os = "linux")]
fn process_exists(pid: u32) -> bool {
    std::path::Path::new(&format!("/proc/{pid}")).exists()
}

#[cfg(not(target_os = "linux"))]
fn process_exists(_pid: u32) -> bool {
    // Without a portable liveness probe, assume the process is still running; `prune` is then a
    // no-op and entries must be removed explicitly.
    true
}

/// Remove registry entries whose process is gone. Returns the removed entries.
pub fn prune_dead_servers(datastore: &Datastore) -> Result<Vec<ServerInfo>> {
    let mut removed = Vec::new();
    for server in datastore.servers()? {
        if !server.is_alive() {
            debug!("Pruning dead server for workspace {}", server.workspace);
            datastore.remove_server(&server.workspace)?;
            removed.push(server);
        }
    }
    Ok(removed)
}
