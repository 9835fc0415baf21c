use std::collections::BTreeMap;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("binary `{program}` was not found on PATH")]
    NotFound { program: String },
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed waiting for `{program}`: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{program}` timed out after {timeout_ms}ms")]
    TimedOut { program: String, timeout_ms: u64 },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// stdout followed by stderr, trimmed; what users see in error strings.
    pub fn combined(&self) -> String {
        let stdout = self.stdout.trim();
        let stderr = self.stderr.trim();
        match (stdout.is_empty(), stderr.is_empty()) {
            (true, true) => String::new(),
            (false, true) => stdout.to_string(),
            (true, false) => stderr.to_string(),
            (false, false) => format!("{stdout}\n{stderr}"),
        }
    }
}

/// One shell-out: `(program, args, env, workdir) -> output`. Every external
/// binary the engine touches (git, AI tools, gh, setup/validate commands)
/// goes through here.
#[derive(Debug, Clone)]
pub struct ProcessCommand {
    program: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    env: BTreeMap<String, String>,
    timeout: Option<Duration>,
}

impl ProcessCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: BTreeMap::new(),
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, cwd: impl AsRef<Path>) -> Self {
        self.cwd = Some(cwd.as_ref().to_path_buf());
        self
    }

    pub fn envs(mut self, env: &BTreeMap<String, String>) -> Self {
        self.env
            .extend(env.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn run(&self) -> Result<ProcessOutput, ProcessError> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }
        for (key, value) in &self.env {
            command.env(key, value);
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(ProcessError::NotFound {
                    program: self.program.clone(),
                })
            }
            Err(source) => {
                return Err(ProcessError::Spawn {
                    program: self.program.clone(),
                    source,
                })
            }
        };

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let stdout_reader = thread::spawn(move || read_pipe(stdout));
        let stderr_reader = thread::spawn(move || read_pipe(stderr));

        let start = Instant::now();
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {
                    if let Some(timeout) = self.timeout {
                        if start.elapsed() > timeout {
                            let _ = child.kill();
                            let _ = child.wait();
                            // Readers are left detached: grandchildren may
                            // still hold the pipes open.
                            drop((stdout_reader, stderr_reader));
                            return Err(ProcessError::TimedOut {
                                program: self.program.clone(),
                                timeout_ms: timeout.as_millis() as u64,
                            });
                        }
                    }
                    thread::sleep(Duration::from_millis(10));
                }
                Err(source) => {
                    return Err(ProcessError::Wait {
                        program: self.program.clone(),
                        source,
                    })
                }
            }
        };

        Ok(ProcessOutput {
            stdout: stdout_reader.join().unwrap_or_default(),
            stderr: stderr_reader.join().unwrap_or_default(),
            exit_code: status.code(),
        })
    }
}

fn read_pipe<R: Read>(pipe: Option<R>) -> String {
    let Some(pipe) = pipe else {
        return String::new();
    };
    let mut buf = Vec::new();
    let _ = BufReader::new(pipe).read_to_end(&mut buf);
    String::from_utf8_lossy(&buf).into_owned()
}

pub fn is_binary_available(binary: &str) -> bool {
    if binary.trim().is_empty() {
        return false;
    }
    let explicit = Path::new(binary);
    if explicit.components().count() > 1 || explicit.is_absolute() {
        return is_executable_file(explicit);
    }

    let Some(path) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&path).any(|dir| is_executable_file(&dir.join(binary)))
}

#[cfg(unix)]
fn is_executable_file(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable_file(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_stdout_stderr_and_exit_code() {
        let output = ProcessCommand::new("sh")
            .args(["-c", "echo out; echo err 1>&2; exit 3"])
            .run()
            .expect("run");
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
        assert_eq!(output.exit_code, Some(3));
        assert!(!output.success());
        assert_eq!(output.combined(), "out\nerr");
    }

    #[test]
    fn missing_binary_is_reported_as_not_found() {
        let err = ProcessCommand::new("fog-definitely-missing-binary")
            .run()
            .expect_err("missing");
        assert!(matches!(err, ProcessError::NotFound { .. }));
        assert!(!is_binary_available("fog-definitely-missing-binary"));
        assert!(is_binary_available("sh"));
    }

    #[test]
    fn runs_in_working_directory_with_env() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut env = BTreeMap::new();
        env.insert("FOG_PROCESS_TEST".to_string(), "yes".to_string());
        let output = ProcessCommand::new("sh")
            .args(["-c", "pwd; echo $FOG_PROCESS_TEST"])
            .current_dir(dir.path())
            .envs(&env)
            .run()
            .expect("run");
        let canonical = dir.path().canonicalize().expect("canonical");
        assert!(output.stdout.contains(&canonical.display().to_string()));
        assert!(output.stdout.contains("yes"));
    }

    #[test]
    fn timeout_kills_long_running_process() {
        let err = ProcessCommand::new("sh")
            .args(["-c", "exec sleep 5"])
            .timeout(Duration::from_millis(100))
            .run()
            .expect_err("timeout");
        assert!(matches!(err, ProcessError::TimedOut { .. }));
    }
}
