use super::{format_ts, parse_ts, sql_error, Store, StoreError};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A registered remote repository and its local mirror layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repo {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub host: String,
    pub owner: String,
    pub repo: String,
    pub bare_path: PathBuf,
    pub base_path: PathBuf,
    pub default_branch: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRepo {
    pub name: String,
    pub url: String,
    pub host: String,
    pub owner: String,
    pub repo: String,
    pub bare_path: PathBuf,
    pub base_path: PathBuf,
    pub default_branch: String,
}

const REPO_COLUMNS: &str =
    "id, name, url, host, owner, repo, bare_path, base_path, default_branch, created_at, updated_at";

fn map_repo(row: &Row<'_>) -> Result<Repo, rusqlite::Error> {
    let bare: String = row.get(6)?;
    let base: String = row.get(7)?;
    let created: String = row.get(9)?;
    let updated: String = row.get(10)?;
    Ok(Repo {
        id: row.get(0)?,
        name: row.get(1)?,
        url: row.get(2)?,
        host: row.get(3)?,
        owner: row.get(4)?,
        repo: row.get(5)?,
        bare_path: PathBuf::from(bare),
        base_path: PathBuf::from(base),
        default_branch: row.get(8)?,
        created_at: parse_ts(&created)?,
        updated_at: parse_ts(&updated)?,
    })
}

impl Store {
    /// Inserts or updates by `name`; the row id is preserved across updates.
    pub fn upsert_repo(&self, repo: &NewRepo) -> Result<Repo, StoreError> {
        let now = format_ts(&Utc::now());
        let name = repo.name.clone();
        self.write(|conn| {
            conn.execute(
                "
                INSERT INTO repos (
                    name, url, host, owner, repo, bare_path, base_path, default_branch,
                    created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
                ON CONFLICT(name) DO UPDATE SET
                    url = excluded.url,
                    host = excluded.host,
                    owner = excluded.owner,
                    repo = excluded.repo,
                    bare_path = excluded.bare_path,
                    base_path = excluded.base_path,
                    default_branch = excluded.default_branch,
                    updated_at = excluded.updated_at
                ",
                params![
                    repo.name,
                    repo.url,
                    repo.host,
                    repo.owner,
                    repo.repo,
                    repo.bare_path.display().to_string(),
                    repo.base_path.display().to_string(),
                    repo.default_branch,
                    now,
                ],
            )
            .map_err(sql_error)?;
            Ok(())
        })?;
        self.get_repo_by_name(&name)?
            .ok_or_else(|| sql_error(rusqlite::Error::QueryReturnedNoRows))
    }

    pub fn get_repo(&self, id: i64) -> Result<Option<Repo>, StoreError> {
        self.read(|conn| {
            conn.query_row(
                &format!("SELECT {REPO_COLUMNS} FROM repos WHERE id = ?1"),
                params![id],
                map_repo,
            )
            .optional()
            .map_err(sql_error)
        })
    }

    pub fn get_repo_by_name(&self, name: &str) -> Result<Option<Repo>, StoreError> {
        self.read(|conn| {
            conn.query_row(
                &format!("SELECT {REPO_COLUMNS} FROM repos WHERE name = ?1"),
                params![name.trim()],
                map_repo,
            )
            .optional()
            .map_err(sql_error)
        })
    }

    pub fn list_repos(&self) -> Result<Vec<Repo>, StoreError> {
        self.read(|conn| {
            let mut stmt = conn
                .prepare(&format!("SELECT {REPO_COLUMNS} FROM repos ORDER BY name"))
                .map_err(sql_error)?;
            let rows = stmt.query_map([], map_repo).map_err(sql_error)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(sql_error)
        })
    }
}

#[cfg(test)]
pub(crate) fn sample_repo(name: &str) -> NewRepo {
    let (owner, repo) = name.split_once('/').unwrap_or(("acme", name));
    NewRepo {
        name: name.to_string(),
        url: format!("https://github.com/{name}.git"),
        host: "github.com".to_string(),
        owner: owner.to_string(),
        repo: repo.to_string(),
        bare_path: PathBuf::from(format!("/fog/repos/{name}/repo.git")),
        base_path: PathBuf::from(format!("/fog/repos/{name}/base")),
        default_branch: "main".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::open_temp_store;

    #[test]
    fn upsert_by_name_is_idempotent_and_overwrites_mutable_fields() {
        let (_dir, store) = open_temp_store();
        let first = store.upsert_repo(&sample_repo("acme/api")).expect("insert");

        let mut changed = sample_repo("acme/api");
        changed.default_branch = "develop".to_string();
        changed.base_path = PathBuf::from("/fog/repos/acme/api/base2");
        let second = store.upsert_repo(&changed).expect("update");

        assert_eq!(first.id, second.id);
        assert_eq!(second.default_branch, "develop");
        assert_eq!(second.base_path, PathBuf::from("/fog/repos/acme/api/base2"));
        assert_eq!(store.list_repos().expect("list").len(), 1);
    }

    #[test]
    fn lookups_by_id_and_name() {
        let (_dir, store) = open_temp_store();
        let api = store.upsert_repo(&sample_repo("acme/api")).expect("api");
        store.upsert_repo(&sample_repo("acme/web")).expect("web");

        assert_eq!(store.get_repo(api.id).expect("get"), Some(api.clone()));
        assert_eq!(
            store.get_repo_by_name(" acme/api ").expect("by name"),
            Some(api)
        );
        assert_eq!(store.get_repo_by_name("acme/none").expect("none"), None);
        let names: Vec<String> = store
            .list_repos()
            .expect("list")
            .into_iter()
            .map(|repo| repo.name)
            .collect();
        assert_eq!(names, vec!["acme/api", "acme/web"]);
    }
}
