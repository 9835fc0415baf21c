use fog::shared::ErrorKind;
use fog::store::{NewRepo, Store, StoreError};
use fog::task::{Task, TaskOptions, TaskState};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Barrier};
use std::thread;
use tempfile::tempdir;
use uuid::Uuid;

fn open(dir: &Path) -> Store {
    Store::open_at(&dir.join("fog.db"), &dir.join("master.key")).expect("open store")
}

fn new_repo(name: &str, branch: &str) -> NewRepo {
    let (owner, repo) = name.split_once('/').expect("owner/name");
    NewRepo {
        name: name.to_string(),
        url: format!("https://github.com/{name}.git"),
        host: "github.com".to_string(),
        owner: owner.to_string(),
        repo: repo.to_string(),
        bare_path: PathBuf::from(format!("/fog/repos/{name}/repo.git")),
        base_path: PathBuf::from(format!("/fog/repos/{name}/base")),
        default_branch: branch.to_string(),
    }
}

fn task(repo_id: i64, branch: &str) -> Task {
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

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}

#[test]
fn database_file_never_holds_plaintext_token() {
    let dir = tempdir().expect("tempdir");
    let token = "ghp_plaintext_canary_4242";
    {
        let store = open(dir.path());
        store.save_github_token(token).expect("save token");
        assert!(store.has_github_token().expect("has token"));
        assert_eq!(store.github_token().expect("read").as_deref(), Some(token));
    }

    for name in ["fog.db", "fog.db-wal"] {
        let path = dir.path().join(name);
        if path.exists() {
            let bytes = fs::read(&path).expect("read db file");
            assert!(
                !contains(&bytes, token.as_bytes()),
                "{name} contains the plaintext token"
            );
        }
    }
}

#[test]
fn foreign_master_key_cannot_read_secrets() {
    let dir = tempdir().expect("tempdir");
    {
        let store = open(dir.path());
        store.save_github_token("ghp_x").expect("save token");
    }
    fs::remove_file(dir.path().join("master.key")).expect("remove key");

    let store = open(dir.path());
    assert!(store.has_github_token().expect("presence"));
    let err = store.github_token().expect_err("decrypt must fail");
    assert!(matches!(err, StoreError::Decrypt { .. }));
    assert!(err.to_string().contains("credential unreadable — re-run setup"));
}

#[test]
fn secrets_are_bound_to_their_key_name() {
    let dir = tempdir().expect("tempdir");
    let store = open(dir.path());
    store.set_secret("a", "value-a").expect("seal a");
    let sealed = store.get_secret_blob("a").expect("blob").expect("present");

    let conn = rusqlite::Connection::open(dir.path().join("fog.db")).expect("raw open");
    conn.execute(
        "INSERT INTO secrets (key, ciphertext, updated_at) VALUES ('b', ?1, 'now')",
        rusqlite::params![sealed],
    )
    .expect("copy ciphertext");

    assert!(matches!(
        store.get_secret("b"),
        Err(StoreError::Decrypt { .. })
    ));
    assert_eq!(store.get_secret("a").expect("a").as_deref(), Some("value-a"));
}

#[test]
fn repo_upsert_is_idempotent_by_name() {
    let dir = tempdir().expect("tempdir");
    let store = open(dir.path());
    let first = store.upsert_repo(&new_repo("acme/api", "main")).expect("first");
    let second = store
        .upsert_repo(&new_repo("acme/api", "develop"))
        .expect("second");
    assert_eq!(first.id, second.id);
    assert_eq!(second.default_branch, "develop");
    assert_eq!(store.list_repos().expect("list").len(), 1);
}

#[test]
fn tasks_require_an_existing_repo_and_freeze_when_terminal() {
    let dir = tempdir().expect("tempdir");
    let store = open(dir.path());
    assert!(matches!(
        store.save_task(&task(99, "fog/orphan")),
        Err(StoreError::MissingRepo(99))
    ));

    let repo = store.upsert_repo(&new_repo("acme/api", "main")).expect("repo");
    let mut record = task(repo.id, "fog/first");
    store.save_task(&record).expect("save created");
    record.state = TaskState::Completed;
    store.save_task(&record).expect("save completed");

    record.state = TaskState::Failed;
    assert!(matches!(
        store.save_task(&record),
        Err(StoreError::TaskTerminal { .. })
    ));
    let stored = store.get_task(&record.id).expect("get").expect("present");
    assert_eq!(stored.state, TaskState::Completed);
}

#[test]
fn concurrent_saves_cannot_share_a_branch_within_a_repo() {
    let dir = tempdir().expect("tempdir");
    let store = Arc::new(open(dir.path()));
    let repo = store.upsert_repo(&new_repo("acme/api", "main")).expect("repo");
    let other = store.upsert_repo(&new_repo("acme/web", "main")).expect("other repo");
    let repo_id = repo.id;

    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = (0..2)
        .map(|_| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                store.save_task(&task(repo_id, "fog/shared"))
            })
        })
        .collect();
    let results: Vec<_> = handles
        .into_iter()
        .map(|handle| handle.join().expect("join"))
        .collect();

    assert_eq!(results.iter().filter(|result| result.is_ok()).count(), 1);
    let err = results
        .into_iter()
        .find_map(Result::err)
        .expect("one save rejected");
    assert!(matches!(&err, StoreError::BranchTaken { branch, .. } if branch == "fog/shared"));
    assert_eq!(err.kind(), ErrorKind::Conflict);

    store
        .save_task(&task(other.id, "fog/shared"))
        .expect("same branch in another repo");
}

#[test]
fn settings_round_trip_and_missing_key() {
    let dir = tempdir().expect("tempdir");
    let store = open(dir.path());
    assert_eq!(store.get_setting("default_tool").expect("get"), None);
    store.set_setting("default_tool", "claude").expect("set");
    assert_eq!(
        store.get_setting("default_tool").expect("get").as_deref(),
        Some("claude")
    );
}
