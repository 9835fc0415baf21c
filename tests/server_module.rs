use fog::channels::slack::signature::{compute_signature, SIGNATURE_HEADER, TIMESTAMP_HEADER};
use fog::channels::slack::{SlackError, SlackIngest, SlackPoster};
use fog::config::{FogConfig, FogPaths};
use fog::git::{GitRunner, RepoImport, RepoRegistry, WorktreeProvisioner};
use fog::notify::SilentNotifier;
use fog::provider::{CliTool, ToolKind, ToolRegistry};
use fog::server::{serve, AppState, SlackHttp};
use fog::shared::RepoName;
use fog::store::Store;
use fog::task::TaskEngine;
use serde_json::{json, Value};
use std::fs;
use std::net::SocketAddr;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::process::Command;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::{tempdir, TempDir};

fn write_script(path: &Path, body: &str) {
    fs::write(path, body).expect("write script");
    let mut perms = fs::metadata(path).expect("metadata").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms).expect("chmod");
}

fn git(cwd: &Path, args: &[&str]) {
    let status = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .env("GIT_AUTHOR_NAME", "Fog Test")
        .env("GIT_AUTHOR_EMAIL", "fog@example.com")
        .env("GIT_COMMITTER_NAME", "Fog Test")
        .env("GIT_COMMITTER_EMAIL", "fog@example.com")
        .status()
        .expect("run git");
    assert!(status.success(), "git {args:?} failed");
}

#[derive(Default)]
struct RecordingPoster {
    responses: Mutex<Vec<(String, String, bool)>>,
}

impl SlackPoster for RecordingPoster {
    fn post_message(&self, _channel: &str, _text: &str) -> Result<(), SlackError> {
        Ok(())
    }

    fn post_thread(&self, _channel: &str, _ts: &str, _text: &str) -> Result<(), SlackError> {
        Ok(())
    }

    fn post_response(&self, url: &str, text: &str, ephemeral: bool) -> Result<(), SlackError> {
        self.responses
            .lock()
            .expect("lock")
            .push((url.to_string(), text.to_string(), ephemeral));
        Ok(())
    }
}

struct Server {
    _runtime: tokio::runtime::Runtime,
    _dir: TempDir,
    addr: SocketAddr,
    poster: Arc<RecordingPoster>,
}

impl Server {
    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

const SIGNING_SECRET: &str = "shhh";

fn start() -> Server {
    let dir = tempdir().expect("tempdir");
    let root = dir.path();
    let seed = root.join("seed");
    fs::create_dir_all(&seed).expect("seed");
    git(&seed, &["init", "-q", "-b", "main"]);
    fs::write(seed.join("README.md"), "hello\n").expect("readme");
    git(&seed, &["add", "README.md"]);
    git(&seed, &["commit", "-q", "-m", "init"]);

    let paths = FogPaths::new(root.join("home"));
    paths.bootstrap().expect("bootstrap");
    let store = Arc::new(Store::open(&paths).expect("store"));
    let runner = GitRunner::new()
        .with_env("GIT_AUTHOR_NAME", "Fog Test")
        .with_env("GIT_AUTHOR_EMAIL", "fog@example.com")
        .with_env("GIT_COMMITTER_NAME", "Fog Test")
        .with_env("GIT_COMMITTER_EMAIL", "fog@example.com");
    RepoRegistry::new(paths.clone(), runner.clone())
        .import(
            &store,
            &RepoImport {
                name: RepoName::parse("acme/api").expect("name"),
                clone_url: seed.display().to_string(),
                default_branch: "main".to_string(),
            },
        )
        .expect("import");

    let claude = root.join("claude");
    write_script(&claude, "#!/bin/sh\necho changed > CHANGE.md\necho ok\n");
    let mut tools = ToolRegistry::new();
    tools.register(Arc::new(CliTool::new(
        "claude",
        claude.display().to_string(),
        ToolKind::Claude,
    )));
    let config = FogConfig::default();
    let engine = TaskEngine::new(
        store.clone(),
        tools,
        WorktreeProvisioner::new(runner, config.worktree_dir.clone()),
        config,
        Arc::new(SilentNotifier),
    );

    let poster = Arc::new(RecordingPoster::default());
    let ingest = SlackIngest::new(
        store.clone(),
        Arc::new(engine.clone()),
        poster.clone(),
        "fog/",
    );
    let state = AppState::new(engine).with_slack(SlackHttp {
        ingest: Arc::new(ingest),
        signing_secret: Some(SIGNING_SECRET.to_string()),
    });

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("runtime");
    let listener = runtime
        .block_on(tokio::net::TcpListener::bind("127.0.0.1:0"))
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    runtime.spawn(async move {
        let _ = serve(listener, state, std::future::pending()).await;
    });

    Server {
        _runtime: runtime,
        _dir: dir,
        addr,
        poster,
    }
}

fn read(result: Result<ureq::Response, ureq::Error>) -> (u16, Value) {
    let response = match result {
        Ok(response) => response,
        Err(ureq::Error::Status(_, response)) => response,
        Err(err) => panic!("transport error: {err}"),
    };
    let status = response.status();
    let body = response.into_string().expect("body");
    let value = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_str(&body).unwrap_or(Value::String(body))
    };
    (status, value)
}

#[test]
fn health_reports_ok() {
    let server = start();
    let (status, body) = read(ureq::get(&server.url("/health")).call());
    assert_eq!(status, 200);
    assert_eq!(body["status"], "ok");
}

#[test]
fn sync_create_runs_task_and_is_retrievable() {
    let server = start();
    let (status, task) = read(ureq::post(&server.url("/api/tasks/create")).send_json(json!({
        "repo": "acme/api",
        "branch": "feature-http",
        "prompt": "Add endpoint",
        "options": { "commit": true }
    })));
    assert_eq!(status, 200, "{task}");
    assert_eq!(task["state"], "COMPLETED", "{task}");
    assert_eq!(task["options"]["commit"], true);

    let id = task["id"].as_str().expect("id");
    let (status, fetched) = read(ureq::get(&server.url(&format!("/api/tasks/{id}"))).call());
    assert_eq!(status, 200);
    assert_eq!(fetched["branch"], "feature-http");

    let (status, listed) = read(ureq::get(&server.url("/api/tasks?limit=5")).call());
    assert_eq!(status, 200);
    assert_eq!(listed.as_array().map(Vec::len), Some(1));
}

#[test]
fn async_create_returns_accepted_with_created_record() {
    let server = start();
    let (status, task) = read(ureq::post(&server.url("/api/tasks/create")).send_json(json!({
        "repo": "acme/api",
        "branch": "feature-async",
        "prompt": "Add endpoint",
        "options": { "async": true }
    })));
    assert_eq!(status, 202, "{task}");
    assert_eq!(task["state"], "CREATED");

    let id = task["id"].as_str().expect("id").to_string();
    let deadline = Instant::now() + Duration::from_secs(20);
    loop {
        let (_, fetched) = read(ureq::get(&server.url(&format!("/api/tasks/{id}"))).call());
        if fetched["state"] == "COMPLETED" {
            break;
        }
        assert!(Instant::now() < deadline, "task never finished: {fetched}");
        thread::sleep(Duration::from_millis(50));
    }
}

#[test]
fn invalid_requests_map_to_client_errors() {
    let server = start();
    let (status, body) = read(ureq::post(&server.url("/api/tasks/create")).send_json(json!({
        "repo": "acme/api",
        "branch": "feature-x",
        "prompt": "  "
    })));
    assert_eq!(status, 400);
    assert_eq!(body["kind"], "validation");

    let (status, _) = read(
        ureq::post(&server.url("/api/tasks/create"))
            .set("Content-Type", "application/json")
            .send_string("{not json"),
    );
    assert_eq!(status, 400);

    let (status, _) = read(ureq::get(&server.url("/api/tasks/not-a-uuid")).call());
    assert_eq!(status, 404);
    let (status, _) = read(
        ureq::get(&server.url(&format!("/api/tasks/{}", uuid::Uuid::new_v4()))).call(),
    );
    assert_eq!(status, 404);
}

fn slack_post(server: &Server, body: &str, signature: Option<String>) -> u16 {
    let timestamp = chrono::Utc::now().timestamp().to_string();
    let signature =
        signature.unwrap_or_else(|| compute_signature(SIGNING_SECRET, &timestamp, body.as_bytes()));
    read(
        ureq::post(&server.url("/slack/commands"))
            .set("Content-Type", "application/x-www-form-urlencoded")
            .set(TIMESTAMP_HEADER, &timestamp)
            .set(SIGNATURE_HEADER, &signature)
            .send_string(body),
    )
    .0
}

#[test]
fn slack_commands_require_a_valid_signature() {
    let server = start();
    let body = "command=%2Ffog&text=no+repo+here&channel_id=C1&response_url=https%3A%2F%2Fhooks.slack.test%2Fr";
    assert_eq!(slack_post(&server, body, Some("v0=deadbeef".to_string())), 401);
    assert_eq!(slack_post(&server, body, None), 200);

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let responses = server.poster.responses.lock().expect("lock").clone();
        if let Some((url, text, ephemeral)) = responses.first() {
            assert_eq!(url, "https://hooks.slack.test/r");
            assert!(text.contains("repo is required"), "{text}");
            assert!(*ephemeral);
            break;
        }
        assert!(Instant::now() < deadline, "no slash reply was posted");
        thread::sleep(Duration::from_millis(20));
    }
}
