//! StateStore: SQLite WAL storage for project state and the audit trail
//!
//! - `project_state`: one row per project path, last-writer-wins upsert
//! - `audit_log`: append-only ledger of orchestration actions
//!
//! There is no optimistic concurrency check: two concurrent switches for the
//! same project race here and either write may land last.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, Row, ToSql};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::error::Result;
use crate::types::Environment;

/// Durable state of a single project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectState {
    pub project: String,
    pub current_env: Environment,
    pub sidecars_running: BTreeSet<String>,
    pub last_activity: DateTime<Utc>,
}

/// Persisted audit record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub project: String,
    pub command: String,
    pub environment: Option<Environment>,
    pub duration_ms: Option<i64>,
    pub git_commit: Option<String>,
    pub success: bool,
    pub error_message: Option<String>,
}

/// Audit record about to be appended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAuditEntry {
    pub project: String,
    pub command: String,
    pub environment: Option<Environment>,
    pub duration_ms: Option<i64>,
    pub git_commit: Option<String>,
    pub success: bool,
    pub error_message: Option<String>,
}

impl NewAuditEntry {
    pub fn succeeded(project: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            command: command.into(),
            environment: None,
            duration_ms: None,
            git_commit: None,
            success: true,
            error_message: None,
        }
    }

    pub fn failed(
        project: impl Into<String>,
        command: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            error_message: Some(error.into()),
            ..Self::succeeded(project, command)
        }
    }

    pub fn environment(mut self, env: Environment) -> Self {
        self.environment = Some(env);
        self
    }

    pub fn duration(mut self, elapsed: Duration) -> Self {
        self.duration_ms = Some(i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX));
        self
    }

    pub fn git_commit(mut self, revision: impl Into<String>) -> Self {
        self.git_commit = Some(revision.into());
        self
    }
}

impl ToSql for Environment {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Environment {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: String| FromSqlError::Other(e.into()))
    }
}

/// SQLite store shared by the orchestrator and the operation facade
pub struct StateStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore").finish_non_exhaustive()
    }
}

impl StateStore {
    /// Open (or create) the database in WAL mode and run migrations.
    ///
    /// ```no_run
    /// use orbit_core::storage::StateStore;
    /// let store = StateStore::open("/home/me/.orbit/state.db").unwrap();
    /// ```
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )?;

        debug!(path = %path.display(), "state store opened");
        Self::with_connection(conn)
    }

    /// In-memory store, used by tests and dry runs
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    /// Idempotent DDL
    fn migrate(&self) -> Result<()> {
        self.conn.lock().execute_batch(
            "
            CREATE TABLE IF NOT EXISTS project_state (
                project           TEXT PRIMARY KEY,
                current_env       TEXT NOT NULL,
                last_activity     TEXT NOT NULL,
                sidecars_running  TEXT NOT NULL DEFAULT '[]'
            );

            CREATE TABLE IF NOT EXISTS audit_log (
                id             INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp      TEXT NOT NULL,
                project        TEXT NOT NULL,
                command        TEXT NOT NULL,
                environment    TEXT,
                duration_ms    INTEGER,
                git_commit     TEXT,
                success        INTEGER NOT NULL,
                error_message  TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_audit_project
                ON audit_log(project, id DESC);
            ",
        )?;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Project state
    // ─────────────────────────────────────────────────────────────────────────

    pub fn get_state(&self, project: &str) -> Result<Option<ProjectState>> {
        let conn = self.conn.lock();
        let state = conn
            .query_row(
                "SELECT project, current_env, last_activity, sidecars_running
                 FROM project_state WHERE project = ?1",
                params![project],
                row_to_state,
            )
            .optional()?;
        Ok(state)
    }

    /// All projects, most recently active first
    pub fn all_states(&self) -> Result<Vec<ProjectState>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT project, current_env, last_activity, sidecars_running
             FROM project_state ORDER BY last_activity DESC",
        )?;
        let rows = stmt.query_map([], row_to_state)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Create or replace the state row for `project`
    pub fn upsert_state<I, S>(&self, project: &str, env: Environment, sidecars: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let sidecars: BTreeSet<String> = sidecars.into_iter().map(Into::into).collect();
        upsert(&self.conn.lock(), project, env, &sidecars)
    }

    /// Empty the running sidecar set of every project, keeping environments
    pub fn clear_all_sidecars(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE project_state SET sidecars_running = '[]', last_activity = ?1",
            params![Utc::now()],
        )?;
        Ok(changed)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Audit trail
    // ─────────────────────────────────────────────────────────────────────────

    /// Append an audit record, returning its id
    pub fn append_audit(&self, entry: &NewAuditEntry) -> Result<i64> {
        insert_audit(&self.conn.lock(), entry)
    }

    /// Most recent audit records for `project`, newest first.
    /// Ordered by id, which AUTOINCREMENT keeps monotonic regardless of clock.
    pub fn recent_audit(&self, project: &str, limit: usize) -> Result<Vec<AuditLogEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, timestamp, project, command, environment, duration_ms,
                    git_commit, success, error_message
             FROM audit_log
             WHERE project = ?1
             ORDER BY id DESC
             LIMIT ?2",
        )?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt.query_map(params![project, limit], |row| {
            Ok(AuditLogEntry {
                id: row.get(0)?,
                timestamp: row.get(1)?,
                project: row.get(2)?,
                command: row.get(3)?,
                environment: row.get(4)?,
                duration_ms: row.get(5)?,
                git_commit: row.get(6)?,
                success: row.get(7)?,
                error_message: row.get(8)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Upsert the project state and append its audit record in one transaction,
    /// so state and audit never diverge.
    pub fn commit_transition(
        &self,
        project: &str,
        env: Environment,
        sidecars: &BTreeSet<String>,
        audit: &NewAuditEntry,
    ) -> Result<i64> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        upsert(&tx, project, env, sidecars)?;
        let id = insert_audit(&tx, audit)?;
        tx.commit()?;
        Ok(id)
    }
}

fn upsert(
    conn: &Connection,
    project: &str,
    env: Environment,
    sidecars: &BTreeSet<String>,
) -> Result<()> {
    let sidecars_json = serde_json::to_string(sidecars)?;
    conn.execute(
        "INSERT INTO project_state (project, current_env, last_activity, sidecars_running)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(project) DO UPDATE SET
             current_env = excluded.current_env,
             last_activity = excluded.last_activity,
             sidecars_running = excluded.sidecars_running",
        params![project, env, Utc::now(), sidecars_json],
    )?;
    Ok(())
}

fn insert_audit(conn: &Connection, entry: &NewAuditEntry) -> Result<i64> {
    conn.execute(
        "INSERT INTO audit_log
         (timestamp, project, command, environment, duration_ms, git_commit, success, error_message)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            Utc::now(),
            entry.project,
            entry.command,
            entry.environment,
            entry.duration_ms,
            entry.git_commit,
            entry.success,
            entry.error_message
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn row_to_state(row: &Row<'_>) -> rusqlite::Result<ProjectState> {
    let sidecars_json: String = row.get(3)?;
    // Rows written by older tooling may hold malformed JSON; treat as empty.
    let sidecars_running = serde_json::from_str(&sidecars_json).unwrap_or_default();
    Ok(ProjectState {
        project: row.get(0)?,
        current_env: row.get(1)?,
        last_activity: row.get(2)?,
        sidecars_running,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> StateStore {
        StateStore::open_in_memory().expect("in-memory SQLite should open")
    }

    #[test]
    fn test_upsert_creates_then_replaces() {
        let store = temp_store();
        assert!(store.get_state("/work/api").unwrap().is_none());

        store
            .upsert_state("/work/api", Environment::Test, ["redis", "postgres"])
            .unwrap();
        let state = store.get_state("/work/api").unwrap().expect("state present");
        assert_eq!(state.current_env, Environment::Test);
        assert_eq!(
            state.sidecars_running.iter().cloned().collect::<Vec<_>>(),
            vec!["postgres", "redis"]
        );

        store
            .upsert_state("/work/api", Environment::Dev, Vec::<String>::new())
            .unwrap();
        let state = store.get_state("/work/api").unwrap().unwrap();
        assert_eq!(state.current_env, Environment::Dev);
        assert!(state.sidecars_running.is_empty());
        assert_eq!(store.all_states().unwrap().len(), 1);
    }

    #[test]
    fn test_audit_is_append_only_and_newest_first() {
        let store = temp_store();
        let first = store
            .append_audit(&NewAuditEntry::succeeded("/work/api", "switch_env:test"))
            .unwrap();
        let second = store
            .append_audit(
                &NewAuditEntry::failed("/work/api", "switch_env:staging", "engine down")
                    .environment(Environment::Staging)
                    .duration(Duration::from_millis(42)),
            )
            .unwrap();
        store
            .append_audit(&NewAuditEntry::succeeded("/work/web", "switch_env:dev"))
            .unwrap();
        assert!(first < second);

        let log = store.recent_audit("/work/api", 10).unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].id, second);
        assert!(!log[0].success);
        assert_eq!(log[0].environment, Some(Environment::Staging));
        assert_eq!(log[0].duration_ms, Some(42));
        assert_eq!(log[0].error_message.as_deref(), Some("engine down"));
        assert!(log[1].success);
        assert_eq!(log[1].environment, None);

        assert_eq!(store.recent_audit("/work/api", 1).unwrap().len(), 1);
    }

    #[test]
    fn test_commit_transition_writes_both() {
        let store = temp_store();
        let sidecars: BTreeSet<String> = ["redis".to_string()].into_iter().collect();
        let id = store
            .commit_transition(
                "/work/api",
                Environment::Test,
                &sidecars,
                &NewAuditEntry::succeeded("/work/api", "switch_env:test")
                    .environment(Environment::Test)
                    .git_commit("abc123"),
            )
            .unwrap();

        let state = store.get_state("/work/api").unwrap().unwrap();
        assert_eq!(state.sidecars_running, sidecars);
        let log = store.recent_audit("/work/api", 5).unwrap();
        assert_eq!(log[0].id, id);
        assert_eq!(log[0].git_commit.as_deref(), Some("abc123"));
    }

    #[test]
    fn test_clear_all_sidecars() {
        let store = temp_store();
        store.upsert_state("/a", Environment::Test, ["redis"]).unwrap();
        store.upsert_state("/b", Environment::Staging, ["postgres"]).unwrap();

        assert_eq!(store.clear_all_sidecars().unwrap(), 2);
        for state in store.all_states().unwrap() {
            assert!(state.sidecars_running.is_empty());
        }
        assert_eq!(
            store.get_state("/b").unwrap().unwrap().current_env,
            Environment::Staging
        );
    }

    #[test]
    fn test_open_on_disk_is_reopenable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.db");
        {
            let store = StateStore::open(&path).unwrap();
            store.upsert_state("/a", Environment::Test, ["redis"]).unwrap();
        }
        let store = StateStore::open(&path).unwrap();
        assert_eq!(
            store.get_state("/a").unwrap().unwrap().current_env,
            Environment::Test
        );
    }
}
