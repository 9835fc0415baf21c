use super::{format_ts, sql_error, Store, StoreError};
use chrono::Utc;
use rusqlite::{params, OptionalExtension};

pub const SETTING_DEFAULT_TOOL: &str = "default_tool";
pub const SETTING_BRANCH_PREFIX: &str = "branch_prefix";
pub const SETTING_CLOUD_URL: &str = "cloud_url";

impl Store {
    pub fn set_setting(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let now = format_ts(&Utc::now());
        self.write(|conn| {
            conn.execute(
                "
                INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)
                ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
                ",
                params![key, value, now],
            )
            .map_err(sql_error)?;
            Ok(())
        })
    }

    /// `None` when the key was never set.
    pub fn get_setting(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.read(|conn| {
            conn.query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map_err(sql_error)
        })
    }

    pub fn list_settings(&self) -> Result<Vec<(String, String)>, StoreError> {
        self.read(|conn| {
            let mut stmt = conn
                .prepare("SELECT key, value FROM settings ORDER BY key")
                .map_err(sql_error)?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
                .map_err(sql_error)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(sql_error)
        })
    }
}
