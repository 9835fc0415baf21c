use super::{conversion_error, format_ts, parse_ts, sql_error, Store, StoreError};
use crate::task::TaskEvent;
use chrono::Utc;
use rusqlite::{params, Row};
use uuid::Uuid;

fn map_event(row: &Row<'_>) -> Result<TaskEvent, rusqlite::Error> {
    let task_id: String = row.get(1)?;
    let ts: String = row.get(2)?;
    let payload: Option<String> = row.get(5)?;
    Ok(TaskEvent {
        id: row.get(0)?,
        task_id: Uuid::parse_str(&task_id)
            .map_err(|err| conversion_error(format!("invalid task id `{task_id}`: {err}")))?,
        ts: parse_ts(&ts)?,
        kind: row.get(3)?,
        message: row.get(4)?,
        payload: payload
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|err| conversion_error(format!("invalid event payload: {err}")))?,
    })
}

impl Store {
    /// Appends one event. Events are accepted for terminal tasks too.
    pub fn append_event(
        &self,
        task_id: &Uuid,
        kind: &str,
        message: &str,
        payload: Option<&serde_json::Value>,
    ) -> Result<i64, StoreError> {
        let payload = payload
            .map(serde_json::to_string)
            .transpose()
            .map_err(|source| StoreError::Json {
                what: "event payload",
                source,
            })?;
        let now = format_ts(&Utc::now());
        self.write(|conn| {
            conn.execute(
                "INSERT INTO task_events (task_id, ts, type, message, payload) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![task_id.to_string(), now, kind, message, payload],
            )
            .map_err(sql_error)?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// In append order.
    pub fn list_task_events(&self, task_id: &Uuid) -> Result<Vec<TaskEvent>, StoreError> {
        self.read(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, task_id, ts, type, message, payload FROM task_events
                     WHERE task_id = ?1 ORDER BY id ASC",
                )
                .map_err(sql_error)?;
            let rows = stmt
                .query_map(params![task_id.to_string()], map_event)
                .map_err(sql_error)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(sql_error)
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::store::repos::sample_repo;
    use crate::store::tasks::sample_task;
    use crate::store::test_support::open_temp_store;
    use crate::task::TaskState;
    use serde_json::json;

    #[test]
    fn events_are_listed_in_append_order_with_payloads() {
        let (_dir, store) = open_temp_store();
        let repo = store.upsert_repo(&sample_repo("acme/api")).expect("repo");
        let task = sample_task(repo.id, "fog/events");
        store.save_task(&task).expect("save");

        store
            .append_event(&task.id, "state", "SETUP", Some(&json!({"state": "SETUP"})))
            .expect("first");
        store
            .append_event(&task.id, "info", "worktree ready", None)
            .expect("second");

        let events = store.list_task_events(&task.id).expect("list");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, "state");
        assert_eq!(events[0].payload, Some(json!({"state": "SETUP"})));
        assert_eq!(events[1].message, "worktree ready");
        assert_eq!(events[1].payload, None);
    }

    #[test]
    fn terminal_tasks_still_accept_events() {
        let (_dir, store) = open_temp_store();
        let repo = store.upsert_repo(&sample_repo("acme/api")).expect("repo");
        let mut task = sample_task(repo.id, "fog/terminal");
        task.state = TaskState::Failed;
        store.save_task(&task).expect("save");
        store
            .append_event(&task.id, "info", "notification sent", None)
            .expect("append");
        assert_eq!(store.list_task_events(&task.id).expect("list").len(), 1);
    }

    #[test]
    fn events_for_unknown_task_are_rejected_by_foreign_key() {
        let (_dir, store) = open_temp_store();
        assert!(store
            .append_event(&uuid::Uuid::new_v4(), "info", "nobody", None)
            .is_err());
    }
}
