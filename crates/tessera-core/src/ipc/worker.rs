//! Worker process management for the remote backend.
//!
//! Provides [`WorkerProcess`] for spawning the `tessera-worker` binary with
//! piped stdio, and [`WorkerKillHandle`] for killing it from any thread.

use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::error::{Error, Result};

/// Environment variable naming the worker binary.
pub const WORKER_PATH_ENV: &str = "TESSERA_WORKER_PATH";

fn worker_file_name() -> &'static str {
    if cfg!(windows) {
        "tessera-worker.exe"
    } else {
        "tessera-worker"
    }
}

/// Find the tessera-worker binary.
///
/// Looks in the following order:
/// 1. An explicit override (the `worker` parameter or config)
/// 2. `TESSERA_WORKER_PATH` environment variable
/// 3. Same directory as the current executable, and its parent (test
///    binaries live in `target/<profile>/deps`)
/// 4. System PATH
/// 5. For development: `target/debug` or `target/release` of the workspace
pub fn find_worker_binary(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        return Err(Error::Launch(format!(
            "worker binary '{}' does not exist",
            path.display()
        )));
    }

    if let Ok(path) = std::env::var(WORKER_PATH_ENV) {
        let path = PathBuf::from(path);
        if path.exists() {
            return Ok(path);
        }
    }

    if let Ok(exe_path) = std::env::current_exe() {
        for dir in exe_path.ancestors().skip(1).take(2) {
            let worker_path = dir.join(worker_file_name());
            if worker_path.exists() {
                return Ok(worker_path);
            }
        }
    }

    if let Ok(path) = which::which(worker_file_name()) {
        return Ok(path);
    }

    if let Ok(manifest_dir) = std::env::var("CARGO_MANIFEST_DIR") {
        for profile in &["debug", "release"] {
            let path = PathBuf::from(&manifest_dir)
                .join("..")
                .join("..")
                .join("target")
                .join(profile)
                .join(worker_file_name());
            if path.exists() {
                return Ok(path.canonicalize().unwrap_or(path));
            }
        }
    }

    Err(Error::Launch(format!(
        "Could not find tessera-worker binary. Set {WORKER_PATH_ENV} or ensure it's in PATH."
    )))
}

/// A spawned worker process.
pub struct WorkerProcess {
    child: Child,
    killed: bool,
}

impl WorkerProcess {
    /// Spawn the worker in stdio mode. Returns the process and the pipes the
    /// engine talks over. Worker stderr passes through for its logs.
    pub fn spawn(path: &Path, token: &str) -> Result<(Self, ChildStdin, ChildStdout)> {
        let mut child = Command::new(path)
            .arg("--token")
            .arg(token)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| {
                Error::Launch(format!(
                    "Failed to spawn worker process '{}': {}",
                    path.display(),
                    e
                ))
            })?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let mut process = Self {
            child,
            killed: false,
        };
        match (stdin, stdout) {
            (Some(stdin), Some(stdout)) => Ok((process, stdin, stdout)),
            _ => {
                process.kill();
                Err(Error::Launch("Failed to get worker stdio".to_string()))
            }
        }
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Check if the worker process is still running.
    pub fn is_alive(&mut self) -> bool {
        !self.killed && matches!(self.child.try_wait(), Ok(None))
    }

    /// Give the worker `grace` to exit by itself, then kill it and reap it.
    pub fn shutdown(&mut self, grace: Duration) {
        let deadline = std::time::Instant::now() + grace;
        while std::time::Instant::now() < deadline {
            if !matches!(self.child.try_wait(), Ok(None)) {
                self.killed = true;
                return;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        self.kill();
    }

    /// Kill the worker process immediately.
    pub fn kill(&mut self) {
        if self.killed {
            return;
        }
        self.killed = true;

        if let Err(e) = self.child.kill() {
            // Already exited.
            if e.kind() != std::io::ErrorKind::InvalidInput {
                tracing::warn!("Failed to kill worker: {}", e);
            }
        }

        // Wait to reap zombie
        let _ = self.child.wait();
    }
}

impl Drop for WorkerProcess {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Kills a worker from any thread, without owning its [`WorkerProcess`].
#[derive(Clone)]
pub struct WorkerKillHandle {
    pid: u32,
    killed: Arc<AtomicBool>,
}

impl WorkerKillHandle {
    pub fn new(worker: &WorkerProcess) -> Self {
        Self {
            pid: worker.pid(),
            killed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Kill the worker process. Only the first call has an effect.
    pub fn kill(&self) {
        if self.killed.swap(true, Ordering::SeqCst) {
            return;
        }

        #[cfg(unix)]
        {
            // SIGKILL for immediate termination
            unsafe {
                libc::kill(self.pid as i32, libc::SIGKILL);
            }
        }

        #[cfg(not(unix))]
        tracing::warn!(pid = self.pid, "cannot kill worker from another thread on this platform");
    }

    pub fn is_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_explicit_path() {
        let err = find_worker_binary(Some(Path::new("/nonexistent/tessera-worker"))).unwrap_err();
        assert!(matches!(err, Error::Launch(_)));
    }

    #[test]
    fn test_explicit_path_wins() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert_eq!(find_worker_binary(Some(file.path())).unwrap(), file.path());
    }
}
