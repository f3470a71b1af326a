use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, Utc};
use indoc::indoc;
use rusqlite::Connection;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, debug_span};

use crate::error::Error;
use crate::finding::Finding;
use crate::identity::{HashedFinding, IdentityHash};
use crate::lifecycle::ReviewState;
use crate::run::{FindingRecord, Run, StoreEvent};
use crate::server_registry::ServerInfo;
use crate::status::DetectionStatus;

// -------------------------------------------------------------------------------------------------
// Datastore
// -------------------------------------------------------------------------------------------------

/// The source of truth for recorded runs, findings, and their statuses.
///
/// A `Datastore` resides on disk as a directory holding a sqlite database. Runs, store events,
/// finding snapshots, and the per-`(run, identity)` status side table are tables within it.
///
/// Note that a `Datastore` is not `Sync`, and thus cannot be directly shared between threads.
/// The recommended pattern in a case that requires concurrent access is to have a single thread
/// that mediates access to the `Datastore`. The per-run merge lock lives in a table, so it holds
/// across processes as well.
pub struct Datastore {
    /// The root directory of everything contained in this `Datastore`.
    root_dir: PathBuf,

    /// A connection to the database backing this `Datastore`.
    conn: Connection,
}

/// How long a merge lock may be held before another store may treat it as abandoned.
const RUN_LOCK_TTL_MINUTES: i64 = 30;

// Public implementation
impl Datastore {
    /// Create a new datastore at `root_dir` if one does not exist,
    /// or open an existing one if present.
    pub fn create_or_open(root_dir: &Path, cache_size: i64) -> Result<Self> {
        debug!("Attempting to create or open an existing datastore at {}", root_dir.display());

        Self::create(root_dir, cache_size).or_else(|e| {
            debug!(
                "Failed to create datastore: {e:#}: will try to open existing datastore instead"
            );
            Self::open(root_dir, cache_size)
        })
    }

    /// Open the existing datastore at `root_dir`.
    pub fn open(root_dir: &Path, cache_size: i64) -> Result<Self> {
        debug!("Attempting to open existing datastore at {}", root_dir.display());

        let ds = Self::open_impl(root_dir, cache_size)?;
        ds.check_schema_version()?;
        Ok(ds)
    }

    /// Create a new datastore at `root_dir` and open it.
    pub fn create(root_dir: &Path, cache_size: i64) -> Result<Self> {
        debug!("Attempting to create new datastore at {}", root_dir.display());

        std::fs::create_dir(root_dir).with_context(|| {
            format!("Failed to create datastore root directory at {}", root_dir.display())
        })?;

        std::fs::write(root_dir.join(".gitignore"), "*\n").with_context(|| {
            format!("Failed to write .gitignore to datastore at {}", root_dir.display())
        })?;

        let mut ds = Self::open_impl(root_dir, cache_size)?;
        ds.migrate_0_1().context("Failed to initialize database schema")?;

        Self::open(root_dir, cache_size)
    }

    /// Get the root directory that contains this `Datastore`.
    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Analyze the datastore's sqlite database, potentially allowing for better query planning
    pub fn analyze(&self) -> Result<()> {
        let _span = debug_span!("Datastore::analyze", "{}", self.root_dir.display()).entered();
        self.conn.execute("analyze", [])?;
        Ok(())
    }
}

// Public implementation, run functions
impl Datastore {
    /// Look up a run by exact name.
    pub fn get_run(&self, name: &str) -> Result<Option<Run>> {
        let mut stmt = self.conn.prepare_cached(indoc! {r#"
            select id, name, created_at from run where name = ?
        "#})?;
        let mut rows = stmt.query((name,))?;
        match rows.next()? {
            Some(row) => Ok(Some(run_from_row(row)?)),
            None => Ok(None),
        }
    }

    /// List all runs, ordered by name.
    pub fn runs(&self) -> Result<Vec<Run>> {
        let mut stmt = self.conn.prepare_cached(indoc! {r#"
            select id, name, created_at from run order by name
        "#})?;
        let runs = stmt.query_map((), run_from_row)?;
        let mut result = Vec::new();
        for r in runs {
            result.push(r?);
        }
        Ok(result)
    }

    /// List the runs whose name matches the given selector.
    ///
    /// The selector may contain `*` and `?` wildcards; without wildcards it is an exact name.
    pub fn runs_matching(&self, selector: &str) -> Result<Vec<Run>> {
        let mut stmt = self.conn.prepare_cached(indoc! {r#"
            select id, name, created_at from run where name glob ? order by name
        "#})?;
        let runs = stmt.query_map((selector,), run_from_row)?;
        let mut result = Vec::new();
        for r in runs {
            result.push(r?);
        }
        Ok(result)
    }

    /// Look up a run by name, creating it if it does not exist yet.
    pub fn get_or_create_run(&self, name: &str) -> Result<Run> {
        if let Some(run) = self.get_run(name)? {
            return Ok(run);
        }
        let created_at = Utc::now();
        let mut stmt = self.conn.prepare_cached(indoc! {r#"
            insert into run (name, created_at) values (?, ?) returning id
        "#})?;
        let id: i64 = stmt.query_row((name, created_at.to_rfc3339()), val_from_row)?;
        debug!("Created run `{name}` with id {id}");
        Ok(Run {
            id,
            name: name.to_string(),
            created_at,
        })
    }

    /// Delete a run and everything recorded for it.
    ///
    /// This is the only operation that physically removes findings. Returns false when no run of
    /// that name exists.
    pub fn delete_run(&self, name: &str) -> Result<bool> {
        let n = self.conn.execute("delete from run where name = ?", (name,))?;
        self.conn.execute("delete from run_lock where run_name = ?", (name,))?;
        Ok(n > 0)
    }

    /// The store events recorded for a run, oldest first.
    pub fn store_events(&self, run_id: i64) -> Result<Vec<StoreEvent>> {
        let mut stmt = self.conn.prepare_cached(indoc! {r#"
            select id, timestamp, tag, analyzer_name, analyzer_version
            from store_event
            where run_id = ?
            order by id
        "#})?;
        let mut get_files = self.conn.prepare_cached(indoc! {r#"
            select file_path from store_event_file where event_id = ? order by file_path
        "#})?;

        let events = stmt.query_map((run_id,), |row| {
            let timestamp: String = row.get(1)?;
            Ok(StoreEvent {
                id: row.get(0)?,
                timestamp: parse_timestamp(&timestamp)?,
                tag: row.get(2)?,
                analyzer_name: row.get(3)?,
                analyzer_version: row.get(4)?,
                files: Vec::new(),
            })
        })?;

        let mut result = Vec::new();
        for e in events {
            let mut e = e?;
            let files = get_files.query_map((e.id,), val_from_row)?;
            for f in files {
                e.files.push(f?);
            }
            result.push(e);
        }
        Ok(result)
    }
}

// Public implementation, merge locking
impl Datastore {
    /// Acquire the exclusive per-run merge lock.
    ///
    /// At most one store operation may hold the lock for a given run name; a second caller gets
    /// `Error::RunLocked` synchronously and may retry with backoff. Locks older than the TTL are
    /// treated as abandoned by a crashed process and reclaimed.
    pub fn lock_run(&self, name: &str) -> Result<()> {
        let now = Utc::now();
        let stale_before = (now - Duration::minutes(RUN_LOCK_TTL_MINUTES)).to_rfc3339();
        self.conn.execute(
            "delete from run_lock where run_name = ? and locked_at < ?",
            (name, stale_before),
        )?;
        let n = self.conn.execute(
            "insert or ignore into run_lock (run_name, locked_at) values (?, ?)",
            (name, now.to_rfc3339()),
        )?;
        if n == 0 {
            return Err(Error::RunLocked {
                run: name.to_string(),
            }
            .into());
        }
        debug!("Acquired merge lock for run `{name}`");
        Ok(())
    }

    /// Release the per-run merge lock.
    pub fn unlock_run(&self, name: &str) -> Result<()> {
        self.conn.execute("delete from run_lock where run_name = ?", (name,))?;
        debug!("Released merge lock for run `{name}`");
        Ok(())
    }
}

// Public implementation, finding and status functions
impl Datastore {
    /// Materialize all findings of a run with their statuses.
    pub fn load_findings(&self, run_id: i64) -> Result<Vec<FindingRecord>> {
        let _span = debug_span!("Datastore::load_findings", "{}", self.root_dir.display()).entered();

        let mut stmt = self.conn.prepare_cached(indoc! {r#"
            select
                f.identity_hash,
                f.checker_name,
                f.severity,
                f.file_path,
                f.line,
                f.col,
                f.message,
                f.bug_path,
                f.scope_signature,
                f.line_content,
                s.detection_status,
                s.review_status,
                s.review_origin,
                s.review_comment
            from finding f
            inner join finding_status s
                on (s.run_id = f.run_id and s.identity_hash = f.identity_hash)
            where f.run_id = ?
            order by f.file_path, f.line, f.checker_name
        "#})?;

        let records = stmt.query_map((run_id,), |row| {
            let bug_path: String = row.get(7)?;
            let bug_path = serde_json::from_str(&bug_path)
                .map_err(|e| rusqlite::types::FromSqlError::Other(e.into()))?;
            Ok(FindingRecord {
                hash: row.get(0)?,
                finding: Finding {
                    checker_name: row.get(1)?,
                    severity: row.get(2)?,
                    file_path: row.get(3)?,
                    line: row.get(4)?,
                    column: row.get(5)?,
                    message: row.get(6)?,
                    bug_path,
                    scope_signature: row.get(8)?,
                    line_content: row.get(9)?,
                },
                detection_status: row.get(10)?,
                review: ReviewState {
                    status: row.get(11)?,
                    origin: row.get(12)?,
                    comment: row.get(13)?,
                },
            })
        })?;

        let mut result = Vec::new();
        for r in records {
            result.push(r?);
        }
        Ok(result)
    }

    /// Count a run's identities per detection status.
    pub fn detection_status_counts(&self, run_id: i64) -> Result<BTreeMap<DetectionStatus, usize>> {
        let mut stmt = self.conn.prepare_cached(indoc! {r#"
            select detection_status, count(*) from finding_status
            where run_id = ?
            group by detection_status
        "#})?;
        let entries = stmt.query_map((run_id,), |row| {
            let status: DetectionStatus = row.get(0)?;
            let count: usize = row.get(1)?;
            Ok((status, count))
        })?;
        let mut counts = BTreeMap::new();
        for e in entries {
            let (status, count) = e?;
            counts.insert(status, count);
        }
        Ok(counts)
    }

    /// Record an explicit review action on one identity of a run.
    ///
    /// Unlike annotation-derived review statuses, which are re-evaluated at every store, an
    /// explicit action is sticky until the next action or a covering annotation appears.
    pub fn set_review_status(
        &self,
        run_id: i64,
        hash: &IdentityHash,
        review: &ReviewState,
    ) -> Result<()> {
        let n = self.conn.execute(
            indoc! {r#"
                update finding_status
                set review_status = ?, review_origin = ?, review_comment = ?
                where run_id = ? and identity_hash = ?
            "#},
            (review.status, review.origin, &review.comment, run_id, hash),
        )?;
        if n == 0 {
            bail!("no finding with identity hash {hash} is recorded for this run");
        }
        Ok(())
    }
}

// Public implementation, server registry functions
impl Datastore {
    /// The registered background servers.
    pub fn servers(&self) -> Result<Vec<ServerInfo>> {
        let mut stmt = self.conn.prepare_cached(indoc! {r#"
            select workspace, pid, port, started_at from server order by workspace
        "#})?;
        let servers = stmt.query_map((), |row| {
            let started_at: String = row.get(3)?;
            Ok(ServerInfo {
                workspace: row.get(0)?,
                pid: row.get(1)?,
                port: row.get(2)?,
                started_at: parse_timestamp(&started_at)?,
            })
        })?;
        let mut result = Vec::new();
        for s in servers {
            result.push(s?);
        }
        Ok(result)
    }

    /// Register a background server for a workspace, replacing any previous entry.
    pub fn register_server(&self, info: &ServerInfo) -> Result<()> {
        self.conn.execute(
            indoc! {r#"
                insert into server (workspace, pid, port, started_at)
                values (?, ?, ?, ?)
                on conflict (workspace) do update set
                    pid = excluded.pid,
                    port = excluded.port,
                    started_at = excluded.started_at
            "#},
            (&info.workspace, info.pid, info.port, info.started_at.to_rfc3339()),
        )?;
        Ok(())
    }

    /// Remove a workspace's server entry. Returns false when none was registered.
    pub fn remove_server(&self, workspace: &str) -> Result<bool> {
        let n = self
            .conn
            .execute("delete from server where workspace = ?", (workspace,))?;
        Ok(n > 0)
    }
}

// Public implementation, summarization
impl Datastore {
    /// Summarize a run's findings per checker.
    pub fn summarize_run(&self, run_id: i64) -> Result<RunSummary> {
        let _span = debug_span!("Datastore::summarize_run", "{}", self.root_dir.display()).entered();

        let mut per_checker: BTreeMap<String, RunSummaryEntry> = BTreeMap::new();
        for record in self.load_findings(run_id)? {
            let entry = per_checker
                .entry(record.finding.checker_name.clone())
                .or_insert_with(|| RunSummaryEntry {
                    checker_name: record.finding.checker_name.clone(),
                    severity: record.finding.severity,
                    active_count: 0,
                    suppressed_count: 0,
                    resolved_count: 0,
                    total_count: 0,
                });
            entry.severity = entry.severity.max(record.finding.severity);
            entry.total_count += 1;
            if record.is_active() {
                entry.active_count += 1;
            }
            if record.review.status.is_suppressing() {
                entry.suppressed_count += 1;
            }
            if record.detection_status == DetectionStatus::Resolved {
                entry.resolved_count += 1;
            }
        }

        let mut entries: Vec<RunSummaryEntry> = per_checker.into_values().collect();
        entries.sort_by(|a, b| {
            b.active_count
                .cmp(&a.active_count)
                .then_with(|| a.checker_name.cmp(&b.checker_name))
        });
        Ok(RunSummary(entries))
    }
}

// -------------------------------------------------------------------------------------------------
// RunSummary
// -------------------------------------------------------------------------------------------------

/// A per-checker summary of one run's findings.
#[derive(Serialize)]
pub struct RunSummary(pub Vec<RunSummaryEntry>);

#[derive(Serialize)]
pub struct RunSummaryEntry {
    /// The checker name of this entry
    pub checker_name: String,

    /// The highest severity among this checker's findings
    pub severity: crate::finding::Severity,

    /// The number of findings that are detected and not suppressed
    pub active_count: usize,

    /// The number of findings suppressed by review status
    pub suppressed_count: usize,

    /// The number of findings whose detection status is resolved
    pub resolved_count: usize,

    /// All findings recorded for this checker
    pub total_count: usize,
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for entry in self.0.iter() {
            writeln!(
                f,
                "{}: {} active ({} total)",
                entry.checker_name, entry.active_count, entry.total_count
            )?;
        }
        Ok(())
    }
}

// -------------------------------------------------------------------------------------------------
// Transaction
// -------------------------------------------------------------------------------------------------

/// Everything a store event writes: the event itself, the analyzed file set, refreshed finding
/// snapshots, and the recomputed status table.
#[derive(Debug, Clone)]
pub struct NewStoreEvent {
    pub timestamp: DateTime<Utc>,
    pub tag: Option<String>,
    pub analyzer_name: Option<String>,
    pub analyzer_version: Option<String>,
    pub files: Vec<String>,
}

pub struct Transaction<'a> {
    inner: rusqlite::Transaction<'a>,
}

impl<'a> Transaction<'a> {
    pub fn commit(self) -> Result<()> {
        self.inner.commit()?;
        Ok(())
    }

    /// Record a finding snapshot, refreshing the stored copy if one exists for the same
    /// `(run, identity, file)`.
    pub fn record_finding(&self, run_id: i64, hf: &HashedFinding) -> Result<()> {
        let mut stmt = self.inner.prepare_cached(indoc! {r#"
            insert into finding (
                run_id, identity_hash, file_path, checker_name, severity,
                line, col, message, bug_path, scope_signature, line_content
            )
            values (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            on conflict (run_id, identity_hash, file_path) do update set
                checker_name = excluded.checker_name,
                severity = excluded.severity,
                line = excluded.line,
                col = excluded.col,
                message = excluded.message,
                bug_path = excluded.bug_path,
                scope_signature = excluded.scope_signature,
                line_content = excluded.line_content
        "#})?;
        let f = &hf.finding;
        let bug_path = serde_json::to_string(&f.bug_path)
            .expect("should be able to serialize bug path as JSON");
        stmt.execute((
            run_id,
            &hf.hash,
            &f.file_path,
            &f.checker_name,
            f.severity,
            f.line,
            f.column,
            &f.message,
            bug_path,
            &f.scope_signature,
            &f.line_content,
        ))?;
        Ok(())
    }

    /// Record the statuses of one identity.
    pub fn record_status(
        &self,
        run_id: i64,
        hash: &IdentityHash,
        detection: DetectionStatus,
        review: &ReviewState,
    ) -> Result<()> {
        let mut stmt = self.inner.prepare_cached(indoc! {r#"
            insert into finding_status (
                run_id, identity_hash, detection_status,
                review_status, review_origin, review_comment
            )
            values (?, ?, ?, ?, ?, ?)
            on conflict (run_id, identity_hash) do update set
                detection_status = excluded.detection_status,
                review_status = excluded.review_status,
                review_origin = excluded.review_origin,
                review_comment = excluded.review_comment
        "#})?;
        stmt.execute((run_id, hash, detection, review.status, review.origin, &review.comment))?;
        Ok(())
    }

    /// Append a store event to the run's history.
    pub fn record_store_event(&self, run_id: i64, event: &NewStoreEvent) -> Result<i64> {
        let mut stmt = self.inner.prepare_cached(indoc! {r#"
            insert into store_event (run_id, timestamp, tag, analyzer_name, analyzer_version)
            values (?, ?, ?, ?, ?)
            returning id
        "#})?;
        let event_id: i64 = stmt.query_row(
            (
                run_id,
                event.timestamp.to_rfc3339(),
                &event.tag,
                &event.analyzer_name,
                &event.analyzer_version,
            ),
            val_from_row,
        )?;

        let mut add_file = self.inner.prepare_cached(indoc! {r#"
            insert into store_event_file (event_id, file_path) values (?, ?)
        "#})?;
        for file in &event.files {
            add_file.execute((event_id, file))?;
        }

        Ok(event_id)
    }
}

impl Datastore {
    /// Begin a transaction covering one atomic store-event commit.
    pub fn begin(&mut self) -> Result<Transaction<'_>> {
        let inner = self
            .conn
            .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
        Ok(Transaction { inner })
    }
}

// -------------------------------------------------------------------------------------------------
// Implementation Utilities
// -------------------------------------------------------------------------------------------------

/// Convert a row into a single value.
///
/// This function exists to work around an ergonomic deficiency in Rust's type system, which
/// doesn't allow defining TryFrom<&rusqlite::Row<'_>> for any T that implements
/// rusqlite::types::FromSql. Without this function, you would have to use 1-tuples all over the
/// place instead.
fn val_from_row<T>(row: &rusqlite::Row<'_>) -> rusqlite::Result<T>
where
    T: rusqlite::types::FromSql,
{
    row.get(0)
}

fn run_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Run> {
    let created_at: String = row.get(2)?;
    Ok(Run {
        id: row.get(0)?,
        name: row.get(1)?,
        created_at: parse_timestamp(&created_at)?,
    })
}

fn parse_timestamp(s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, e.into()))
}

// Private implementation
impl Datastore {
    const CURRENT_SCHEMA_VERSION: u64 = 1;

    const SCHEMA: &'static str = indoc! {r#"
        create table run (
            id integer primary key,
            name text unique not null,
            created_at text not null
        );

        create table store_event (
            id integer primary key,
            run_id integer not null references run(id) on delete cascade,
            timestamp text not null,
            tag text,
            analyzer_name text,
            analyzer_version text
        );

        create table store_event_file (
            event_id integer not null references store_event(id) on delete cascade,
            file_path text not null
        );

        create table finding (
            id integer primary key,
            run_id integer not null references run(id) on delete cascade,
            identity_hash text not null,
            file_path text not null,
            checker_name text not null,
            severity text not null,
            line integer not null,
            col integer not null,
            message text not null,
            bug_path text not null,
            scope_signature text not null,
            line_content text not null,
            unique (run_id, identity_hash, file_path)
        );

        create index finding_run_hash on finding (run_id, identity_hash);

        create table finding_status (
            run_id integer not null references run(id) on delete cascade,
            identity_hash text not null,
            detection_status text not null,
            review_status text not null,
            review_origin text not null,
            review_comment text,
            primary key (run_id, identity_hash)
        );

        create table run_lock (
            run_name text primary key,
            locked_at text not null
        );

        create table server (
            workspace text primary key,
            pid integer not null,
            port integer not null,
            started_at text not null
        );
    "#};

    fn open_impl(root_dir: &Path, cache_size: i64) -> Result<Self> {
        let db_path = root_dir.join("datastore.db");
        let conn = Self::new_connection(&db_path, cache_size)?;
        let root_dir = root_dir.canonicalize()?;
        Ok(Self { root_dir, conn })
    }

    fn new_connection(path: &Path, cache_size: i64) -> Result<Connection> {
        let conn = Connection::open(path)?;

        conn.pragma_update(None, "journal_mode", "wal")?; // https://www.sqlite.org/wal.html
        conn.pragma_update(None, "foreign_keys", "on")?; // https://sqlite.org/foreignkeys.html
        conn.pragma_update(None, "synchronous", "normal")?; // https://sqlite.org/pragma.html#pragma_synchronous
        conn.pragma_update(None, "cache_size", cache_size)?; // sqlite.org/pragma.html#pragma_cache_size

        Ok(conn)
    }

    fn check_schema_version(&self) -> Result<()> {
        let user_version: u64 = self
            .conn
            .pragma_query_value(None, "user_version", val_from_row)?;
        if user_version != Self::CURRENT_SCHEMA_VERSION {
            bail!("Unsupported schema version {user_version}");
        }
        Ok(())
    }

    fn migrate_0_1(&mut self) -> Result<()> {
        let _span = debug_span!("Datastore::migrate_0_1", "{}", self.root_dir.display()).entered();
        let tx = self.conn.transaction()?;

        let user_version: u64 = tx.pragma_query_value(None, "user_version", val_from_row)?;
        if user_version > Self::CURRENT_SCHEMA_VERSION {
            bail!("Unknown schema version {user_version}");
        }

        if user_version == 0 {
            let new_user_version = Self::CURRENT_SCHEMA_VERSION;
            debug!("Migrating database schema from version {user_version} to {new_user_version}");
            tx.execute_batch(Self::SCHEMA)?;
            tx.pragma_update(None, "user_version", new_user_version)?;
        }

        tx.commit()?;
        Ok(())
    }
}
