//! Durable state: settings, sealed secrets, registered repositories, task
//! records and the append-only task event log.
//!
//! One writer connection sits behind a mutex; reads open their own
//! short-lived connection so WAL readers never queue behind each other or
//! behind the writer.

use crate::config::FogPaths;
use crate::shared::ErrorKind;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

pub mod crypto;
pub mod events;
pub mod repos;
pub mod secrets;
pub mod settings;
pub mod tasks;

pub use crypto::{CryptoError, MasterKey};
pub use repos::{NewRepo, Repo};
pub use secrets::GITHUB_TOKEN_KEY;
pub use settings::{SETTING_BRANCH_PREFIX, SETTING_CLOUD_URL, SETTING_DEFAULT_TOOL};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to create state directory {path}: {source}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("sqlite open failed at {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: rusqlite::Error,
    },
    #[error("sqlite statement failed: {source}")]
    Sql {
        #[source]
        source: rusqlite::Error,
    },
    #[error("state store lock was poisoned by a panicking writer")]
    LockPoisoned,
    #[error("master key unavailable: {0}")]
    MasterKey(#[source] CryptoError),
    #[error("failed to seal secret `{key}`: {source}")]
    Seal {
        key: String,
        #[source]
        source: CryptoError,
    },
    #[error("credential unreadable — re-run setup (secret `{key}`)")]
    Decrypt { key: String },
    #[error("json encoding failed for {what}: {source}")]
    Json {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("task {id} is already {state}; terminal tasks are immutable")]
    TaskTerminal { id: String, state: String },
    #[error("repository id {0} does not exist")]
    MissingRepo(i64),
    #[error("branch `{branch}` is already used by another task in repository {repo_id}")]
    BranchTaken { repo_id: i64, branch: String },
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::Decrypt { .. } => ErrorKind::Decrypt,
            StoreError::MissingRepo(_) => ErrorKind::Validation,
            StoreError::BranchTaken { .. } => ErrorKind::Conflict,
            _ => ErrorKind::Store,
        }
    }
}

pub(crate) fn sql_error(source: rusqlite::Error) -> StoreError {
    StoreError::Sql { source }
}

pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == rusqlite::ErrorCode::ConstraintViolation
                && failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

pub(crate) fn format_ts(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub(crate) fn parse_ts(raw: &str) -> Result<DateTime<Utc>, rusqlite::Error> {
    DateTime::parse_from_rfc3339(raw)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|err| conversion_error(format!("invalid timestamp `{raw}`: {err}")))
}

pub(crate) fn conversion_error(message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::other(message)),
    )
}

pub struct Store {
    db_path: PathBuf,
    writer: Mutex<Connection>,
    key: MasterKey,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("db_path", &self.db_path)
            .finish_non_exhaustive()
    }
}

impl Store {
    pub fn open(paths: &FogPaths) -> Result<Self, StoreError> {
        Self::open_at(&paths.db_path(), &paths.master_key_path())
    }

    pub fn open_at(db_path: &Path, key_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent).map_err(|source| StoreError::CreateDir {
                path: parent.display().to_string(),
                source,
            })?;
        }
        let key = MasterKey::load_or_create(key_path).map_err(StoreError::MasterKey)?;
        let writer = connect(db_path)?;
        ensure_schema(&writer)?;
        restrict_file_permissions(db_path);
        Ok(Self {
            db_path: db_path.to_path_buf(),
            writer: Mutex::new(writer),
            key,
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub(crate) fn master_key(&self) -> &MasterKey {
        &self.key
    }

    /// Runs `op` on the single writer connection; the lock is held only for
    /// the duration of the database call.
    pub(crate) fn write<T>(
        &self,
        op: impl FnOnce(&mut Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut guard = self.writer.lock().map_err(|_| StoreError::LockPoisoned)?;
        op(&mut guard)
    }

    pub(crate) fn read<T>(
        &self,
        op: impl FnOnce(&Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let connection = connect(&self.db_path)?;
        op(&connection)
    }

    pub fn table_names(&self) -> Result<Vec<String>, StoreError> {
        self.read(|conn| {
            let mut stmt = conn
                .prepare("SELECT name FROM sqlite_master WHERE type IN ('table','index') ORDER BY name")
                .map_err(sql_error)?;
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(sql_error)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(sql_error)
        })
    }
}

fn connect(db_path: &Path) -> Result<Connection, StoreError> {
    let connection = Connection::open(db_path).map_err(|source| StoreError::Open {
        path: db_path.display().to_string(),
        source,
    })?;
    connection.busy_timeout(BUSY_TIMEOUT).map_err(sql_error)?;
    connection
        .execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
        .map_err(sql_error)?;
    Ok(connection)
}

fn ensure_schema(connection: &Connection) -> Result<(), StoreError> {
    connection
        .execute_batch(
            "
            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS secrets (
                key TEXT PRIMARY KEY,
                ciphertext BLOB NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS repos (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                url TEXT NOT NULL,
                host TEXT NOT NULL,
                owner TEXT NOT NULL,
                repo TEXT NOT NULL,
                bare_path TEXT NOT NULL,
                base_path TEXT NOT NULL,
                default_branch TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                repo_id INTEGER NOT NULL REFERENCES repos(id),
                parent_id TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                completed_at TEXT,
                state TEXT NOT NULL,
                prompt TEXT NOT NULL,
                ai_tool TEXT NOT NULL,
                model TEXT,
                branch TEXT NOT NULL,
                worktree_path TEXT,
                options TEXT NOT NULL,
                metadata TEXT NOT NULL,
                error TEXT
            );

            CREATE TABLE IF NOT EXISTS task_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
                ts TEXT NOT NULL,
                type TEXT NOT NULL,
                message TEXT NOT NULL,
                payload TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_tasks_repo_created
                ON tasks(repo_id, created_at DESC);
            CREATE INDEX IF NOT EXISTS idx_task_events_task_ts
                ON task_events(task_id, ts DESC);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_tasks_repo_branch
                ON tasks(repo_id, branch);
            CREATE INDEX IF NOT EXISTS idx_tasks_state
                ON tasks(state);
            CREATE INDEX IF NOT EXISTS idx_tasks_slack_thread
                ON tasks(
                    json_extract(metadata, '$.slack_channel_id'),
                    json_extract(metadata, '$.slack_root_ts')
                );
            ",
        )
        .map_err(sql_error)
}

#[cfg(unix)]
fn restrict_file_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(err) = fs::set_permissions(path, fs::Permissions::from_mode(0o600)) {
        tracing::warn!(path = %path.display(), error = %err, "failed to restrict database permissions");
    }
}

#[cfg(not(unix))]
fn restrict_file_permissions(_path: &Path) {}
