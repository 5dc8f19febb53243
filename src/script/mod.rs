//! Script execution for conversation setup, cleanup, and verification.
//!
//! Scripts are external collaborators with an exit-code contract: zero is
//! success, anything else is failure. Stdout and stderr are captured for
//! diagnostics only and never interpreted. Each execution carries an
//! independent wall-clock timeout; a timed-out script is killed and
//! reported as an error.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crate::errors::ScriptError;

/// Default wall-clock timeout for one script execution.
pub const DEFAULT_SCRIPT_TIMEOUT_SECS: u64 = 300;

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Captured outcome of one script execution.
#[derive(Debug, Clone)]
pub struct ScriptOutput {
    /// Process exit code; -1 when terminated by a signal.
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ScriptOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs evaluation scripts through `bash` with captured output.
#[derive(Debug, Clone, Default)]
pub struct ScriptRunner {
    /// Directory relative script paths resolve against, normally the
    /// location of the evaluation-data file.
    base_dir: Option<PathBuf>,
    timeout: Option<Duration>,
}

impl ScriptRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn timeout(&self) -> Duration {
        self.timeout
            .unwrap_or(Duration::from_secs(DEFAULT_SCRIPT_TIMEOUT_SECS))
    }

    /// Resolve a script reference to a concrete path.
    ///
    /// Absolute paths are used as-is, `~/` resolves against the home
    /// directory, and anything else resolves against the configured base
    /// directory (falling back to the working directory).
    pub fn resolve_path(&self, script: &Path) -> Result<PathBuf, ScriptError> {
        let resolved = if script.is_absolute() {
            script.to_path_buf()
        } else if let Ok(stripped) = script.strip_prefix("~") {
            match std::env::var_os("HOME") {
                Some(home) => PathBuf::from(home).join(stripped),
                None => script.to_path_buf(),
            }
        } else {
            match &self.base_dir {
                Some(base) => base.join(script),
                None => script.to_path_buf(),
            }
        };

        if !resolved.exists() {
            return Err(ScriptError::NotFound { path: resolved });
        }
        if !resolved.is_file() {
            return Err(ScriptError::NotAFile { path: resolved });
        }
        Ok(resolved)
    }

    /// Execute a script and capture its outcome.
    ///
    /// Blocks the calling thread until the script exits or the timeout
    /// elapses; on timeout the process is killed.
    pub fn run(&self, script: &Path) -> Result<ScriptOutput, ScriptError> {
        let path = self.resolve_path(script)?;
        log::info!("running script: {}", path.display());

        let mut child = Command::new("bash")
            .arg(&path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ScriptError::Io { path: path.clone(), source })?;

        let stdout = drain_pipe(child.stdout.take());
        let stderr = drain_pipe(child.stderr.take());

        let status = self.wait_with_timeout(&mut child, &path)?;

        let stdout = stdout.join().unwrap_or_default();
        let stderr = stderr.join().unwrap_or_default();
        if !stdout.is_empty() {
            log::debug!("script stdout: {stdout}");
        }
        if !stderr.is_empty() {
            log::debug!("script stderr: {stderr}");
        }

        Ok(ScriptOutput {
            exit_code: status,
            stdout,
            stderr,
        })
    }

    fn wait_with_timeout(&self, child: &mut Child, path: &Path) -> Result<i32, ScriptError> {
        let timeout = self.timeout();
        let deadline = Instant::now() + timeout;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(status.code().unwrap_or(-1)),
                Ok(None) => {
                    if Instant::now() >= deadline {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(ScriptError::Timeout {
                            path: path.to_path_buf(),
                            timeout_secs: timeout.as_secs(),
                        });
                    }
                    thread::sleep(POLL_INTERVAL);
                }
                Err(source) => {
                    return Err(ScriptError::Io {
                        path: path.to_path_buf(),
                        source,
                    })
                }
            }
        }
    }
}

/// Drain a child pipe on a helper thread so large output cannot block the
/// child while the parent polls for exit.
fn drain_pipe<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buffer = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buffer);
        }
        String::from_utf8_lossy(&buffer).into_owned()
    })
}
