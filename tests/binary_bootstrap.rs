use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::tempdir;

fn write_script(path: &Path, body: &str) {
    fs::write(path, body).expect("write script");
    let mut perms = fs::metadata(path).expect("metadata").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms).expect("chmod");
}

struct Env {
    home: PathBuf,
    bin: PathBuf,
    clone_base: PathBuf,
    cwd: PathBuf,
}

impl Env {
    fn fog(&self, args: &[&str]) -> Output {
        let path = format!(
            "{}:{}",
            self.bin.display(),
            std::env::var("PATH").unwrap_or_default()
        );
        Command::new(env!("CARGO_BIN_EXE_fog"))
            .args(args)
            .current_dir(&self.cwd)
            .env("FOG_HOME", &self.home)
            .env("FOG_GITHUB_CLONE_BASE", &self.clone_base)
            .env("PATH", path)
            .env("GIT_AUTHOR_NAME", "Fog Test")
            .env("GIT_AUTHOR_EMAIL", "fog@example.com")
            .env("GIT_COMMITTER_NAME", "Fog Test")
            .env("GIT_COMMITTER_EMAIL", "fog@example.com")
            .output()
            .expect("run fog")
    }
}

fn stdout_ok(output: &Output) -> String {
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).into_owned()
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

fn environment(root: &Path) -> Env {
    let bin = root.join("bin");
    fs::create_dir_all(&bin).expect("bin");
    write_script(
        &bin.join("claude"),
        "#!/bin/sh\nfor last; do :; done\necho \"$last\" > OTP.md\necho 'wrote OTP.md'\n",
    );

    let seed = root.join("seed");
    fs::create_dir_all(&seed).expect("seed");
    git(&seed, &["init", "-q", "-b", "main"]);
    fs::write(seed.join("README.md"), "hello\n").expect("readme");
    git(&seed, &["add", "README.md"]);
    git(&seed, &["commit", "-q", "-m", "init"]);
    let clone_base = root.join("remote");
    fs::create_dir_all(clone_base.join("acme")).expect("remote");
    git(
        root,
        &[
            "clone",
            "-q",
            "--bare",
            &seed.display().to_string(),
            &clone_base.join("acme/api.git").display().to_string(),
        ],
    );

    let cwd = root.join("elsewhere");
    fs::create_dir_all(&cwd).expect("cwd");
    Env {
        home: root.join("fog-home"),
        bin,
        clone_base,
        cwd,
    }
}

#[test]
fn setup_stores_encrypted_token_and_default_tool() {
    let dir = tempdir().expect("tempdir");
    let env = environment(dir.path());

    let out = stdout_ok(&env.fog(&["setup", "--token", "ghp_x", "--default-tool", "claude"]));
    assert!(out.contains("has_github_token=true"), "{out}");
    assert!(out.contains("default_tool=claude"), "{out}");

    let db = fs::read(env.home.join("fog.db")).expect("db");
    assert!(!db.windows(5).any(|window| window == b"ghp_x"));
    assert!(env.home.join("master.key").is_file());

    let view = stdout_ok(&env.fog(&["config", "view"]));
    assert!(view.contains("setting.default_tool=claude"), "{view}");
    assert!(view.contains("has_github_token=true"), "{view}");
}

#[test]
fn import_then_run_commits_on_a_new_worktree() {
    let dir = tempdir().expect("tempdir");
    let env = environment(dir.path());
    stdout_ok(&env.fog(&["setup", "--token", "ghp_x", "--default-tool", "claude"]));

    let imported = stdout_ok(&env.fog(&["repos", "import", "--select", "acme/api"]));
    assert!(imported.contains("imported=acme/api default_branch=main"), "{imported}");
    let repo_dir = env.home.join("repos/acme/api");
    assert!(repo_dir.join("repo.git/HEAD").is_file());
    assert!(repo_dir.join("base/README.md").is_file());

    let run = stdout_ok(&env.fog(&[
        "run",
        "--branch",
        "feature-otp",
        "--prompt",
        "Add OTP",
        "--commit",
    ]));
    assert!(run.contains("state=COMPLETED"), "{run}");
    assert!(run.contains("commit=true"), "{run}");
    assert!(run.contains("pr_url=\n"), "{run}");
    let worktree = repo_dir.join("worktrees/feature-otp");
    assert!(
        run.contains(&format!("worktree_path={}", worktree.display())),
        "{run}"
    );
    assert_eq!(
        fs::read_to_string(worktree.join("OTP.md")).expect("otp"),
        "Add OTP\n"
    );

    let listed = stdout_ok(&env.fog(&["list"]));
    assert!(listed.contains("feature-otp"), "{listed}");

    let task_id = run
        .lines()
        .find_map(|line| line.strip_prefix("task_id="))
        .expect("task id")
        .to_string();
    let status = stdout_ok(&env.fog(&["status", &task_id[..8]]));
    assert!(status.contains("COMMITTED"), "{status}");
}

#[test]
fn run_without_repositories_fails_with_guidance() {
    let dir = tempdir().expect("tempdir");
    let env = environment(dir.path());
    stdout_ok(&env.fog(&["setup", "--default-tool", "claude"]));

    let output = env.fog(&["run", "--branch", "b1", "--prompt", "x"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("fog repos import"), "{stderr}");
}
