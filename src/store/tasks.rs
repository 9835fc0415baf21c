use super::{
    conversion_error, format_ts, is_unique_violation, parse_ts, sql_error, Store, StoreError,
};
use crate::task::{Task, TaskOptions, TaskState};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeMap;
use std::path::PathBuf;
use uuid::Uuid;

const TASK_COLUMNS: &str = "id, repo_id, parent_id, created_at, updated_at, completed_at, state, \
     prompt, ai_tool, model, branch, worktree_path, options, metadata, error";

fn parse_uuid(raw: &str) -> Result<Uuid, rusqlite::Error> {
    Uuid::parse_str(raw).map_err(|err| conversion_error(format!("invalid task id `{raw}`: {err}")))
}

fn map_task(row: &Row<'_>) -> Result<Task, rusqlite::Error> {
    let id: String = row.get(0)?;
    let parent_id: Option<String> = row.get(2)?;
    let created: String = row.get(3)?;
    let updated: String = row.get(4)?;
    let completed: Option<String> = row.get(5)?;
    let state: String = row.get(6)?;
    let worktree: Option<String> = row.get(11)?;
    let options: String = row.get(12)?;
    let metadata: String = row.get(13)?;

    Ok(Task {
        id: parse_uuid(&id)?,
        repo_id: row.get(1)?,
        parent_id: parent_id.as_deref().map(parse_uuid).transpose()?,
        created_at: parse_ts(&created)?,
        updated_at: parse_ts(&updated)?,
        completed_at: completed.as_deref().map(parse_ts).transpose()?,
        state: state.parse::<TaskState>().map_err(conversion_error)?,
        prompt: row.get(7)?,
        ai_tool: row.get(8)?,
        model: row.get(9)?,
        branch: row.get(10)?,
        worktree_path: worktree.map(PathBuf::from),
        options: serde_json::from_str::<TaskOptions>(&options)
            .map_err(|err| conversion_error(format!("invalid task options: {err}")))?,
        metadata: serde_json::from_str::<BTreeMap<String, String>>(&metadata)
            .map_err(|err| conversion_error(format!("invalid task metadata: {err}")))?,
        error: row.get(14)?,
    })
}

fn load_task(conn: &Connection, id: &Uuid) -> Result<Option<Task>, StoreError> {
    conn.query_row(
        &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
        params![id.to_string()],
        map_task,
    )
    .optional()
    .map_err(sql_error)
}

impl Store {
    /// Inserts or updates the task row.
    ///
    /// The branch is fixed at insert and the worktree path can only go from
    /// unset to set. Once the persisted row is terminal every further save
    /// fails with [`StoreError::TaskTerminal`].
    pub fn save_task(&self, task: &Task) -> Result<(), StoreError> {
        let options = serde_json::to_string(&task.options).map_err(|source| StoreError::Json {
            what: "task options",
            source,
        })?;
        let metadata =
            serde_json::to_string(&task.metadata).map_err(|source| StoreError::Json {
                what: "task metadata",
                source,
            })?;
        let id = task.id.to_string();

        self.write(|conn| {
            let repo_exists = conn
                .query_row(
                    "SELECT 1 FROM repos WHERE id = ?1",
                    params![task.repo_id],
                    |_| Ok(()),
                )
                .optional()
                .map_err(sql_error)?
                .is_some();
            if !repo_exists {
                return Err(StoreError::MissingRepo(task.repo_id));
            }

            let changed = conn
                .execute(
                    "
                    INSERT INTO tasks (
                        id, repo_id, parent_id, created_at, updated_at, completed_at, state,
                        prompt, ai_tool, model, branch, worktree_path, options, metadata, error
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
                    ON CONFLICT(id) DO UPDATE SET
                        updated_at = excluded.updated_at,
                        completed_at = excluded.completed_at,
                        state = excluded.state,
                        ai_tool = excluded.ai_tool,
                        model = excluded.model,
                        worktree_path = COALESCE(tasks.worktree_path, excluded.worktree_path),
                        options = excluded.options,
                        metadata = excluded.metadata,
                        error = excluded.error
                    WHERE tasks.state NOT IN ('COMPLETED', 'FAILED')
                    ",
                    params![
                        id,
                        task.repo_id,
                        task.parent_id.map(|value| value.to_string()),
                        format_ts(&task.created_at),
                        format_ts(&task.updated_at),
                        task.completed_at.as_ref().map(format_ts),
                        task.state.as_str(),
                        task.prompt,
                        task.ai_tool,
                        task.model,
                        task.branch,
                        task.worktree_path
                            .as_ref()
                            .map(|path| path.display().to_string()),
                        options,
                        metadata,
                        task.error,
                    ],
                )
                .map_err(|err| {
                    if is_unique_violation(&err) {
                        StoreError::BranchTaken {
                            repo_id: task.repo_id,
                            branch: task.branch.clone(),
                        }
                    } else {
                        sql_error(err)
                    }
                })?;

            if changed == 0 {
                let state: String = conn
                    .query_row(
                        "SELECT state FROM tasks WHERE id = ?1",
                        params![id],
                        |row| row.get(0),
                    )
                    .map_err(sql_error)?;
                return Err(StoreError::TaskTerminal { id, state });
            }
            Ok(())
        })
    }

    pub fn get_task(&self, id: &Uuid) -> Result<Option<Task>, StoreError> {
        self.read(|conn| load_task(conn, id))
    }

    /// Newest first.
    pub fn list_tasks(&self, limit: Option<usize>) -> Result<Vec<Task>, StoreError> {
        let limit = limit.map(|value| value as i64).unwrap_or(-1);
        self.read(|conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {TASK_COLUMNS} FROM tasks ORDER BY created_at DESC, rowid DESC LIMIT ?1"
                ))
                .map_err(sql_error)?;
            let rows = stmt.query_map(params![limit], map_task).map_err(sql_error)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(sql_error)
        })
    }

    pub fn list_tasks_for_repo(&self, repo_id: i64) -> Result<Vec<Task>, StoreError> {
        self.read(|conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {TASK_COLUMNS} FROM tasks WHERE repo_id = ?1 ORDER BY created_at DESC, rowid DESC"
                ))
                .map_err(sql_error)?;
            let rows = stmt.query_map(params![repo_id], map_task).map_err(sql_error)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(sql_error)
        })
    }

    /// Every task not yet in a terminal state, oldest first.
    pub fn list_active_tasks(&self) -> Result<Vec<Task>, StoreError> {
        self.read(|conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {TASK_COLUMNS} FROM tasks WHERE state NOT IN ('COMPLETED', 'FAILED') ORDER BY created_at ASC, rowid ASC"
                ))
                .map_err(sql_error)?;
            let rows = stmt.query_map([], map_task).map_err(sql_error)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(sql_error)
        })
    }

    /// Removes the task row and its events. Returns whether a row existed.
    pub fn delete_task(&self, id: &Uuid) -> Result<bool, StoreError> {
        self.write(|conn| {
            let removed = conn
                .execute("DELETE FROM tasks WHERE id = ?1", params![id.to_string()])
                .map_err(sql_error)?;
            Ok(removed > 0)
        })
    }

    /// The most recently created task whose metadata carries the given Slack
    /// thread key.
    pub fn latest_task_in_thread(
        &self,
        channel_id: &str,
        root_ts: &str,
    ) -> Result<Option<Task>, StoreError> {
        self.read(|conn| {
            conn.query_row(
                &format!(
                    "SELECT {TASK_COLUMNS} FROM tasks
                     WHERE json_extract(metadata, '$.slack_channel_id') = ?1
                       AND json_extract(metadata, '$.slack_root_ts') = ?2
                     ORDER BY created_at DESC, rowid DESC
                     LIMIT 1"
                ),
                params![channel_id, root_ts],
                map_task,
            )
            .optional()
            .map_err(sql_error)
        })
    }
}

#[cfg(test)]
pub(crate) fn sample_task(repo_id: i64, branch: &str) -> Task {
    let now = chrono::Utc::now();
    Task {
        id: Uuid::new_v4(),
        repo_id,
        parent_id: None,
        created_at: now,
        updated_at: now,
        completed_at: None,
        state: TaskState::Created,
        prompt: "Add OTP".to_string(),
        ai_tool: "claude".to_string(),
        model: None,
        branch: branch.to_string(),
        worktree_path: None,
        options: TaskOptions::default(),
        metadata: BTreeMap::new(),
        error: None,
    }
}
