//! Process Supervisor: locates, launches, tees the stdio of, health-checks
//! and shuts down the wrapped binary.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::WrapError;

const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(5);
const MAX_PROCESS_AGE: Duration = Duration::from_secs(24 * 60 * 60);
const TERM_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildState {
    Starting,
    Running,
    Stopping,
    Stopped,
    Error,
}

#[derive(Debug)]
pub enum SupervisorEvent {
    StateChanged(ChildState),
    Unhealthy(String),
    Recovered,
    Exited(Option<i32>),
}

/// Search PATH, then a fixed list of well-known install locations.
pub fn locate_binary(name: &str) -> Result<PathBuf, WrapError> {
    let mut searched = Vec::new();

    if let Ok(path_var) = std::env::var("PATH") {
        for dir in std::env::split_paths(&path_var) {
            let candidate = dir.join(name);
            searched.push(candidate.clone());
            if is_executable(&candidate) {
                return Ok(candidate);
            }
        }
    }

    let mut well_known: Vec<PathBuf> = Vec::new();
    if let Some(home) = dirs::home_dir() {
        well_known.push(home.join(".local/bin").join(name));
    }
    well_known.push(PathBuf::from("/usr/local/bin").join(name));
    well_known.push(PathBuf::from("/opt").join(name).join("bin").join(name));

    for candidate in well_known {
        searched.push(candidate.clone());
        if is_executable(&candidate) {
            return Ok(candidate);
        }
    }

    Err(WrapError::BinaryNotFound {
        name: name.to_string(),
        searched,
    })
}

fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// A running wrapped-binary child, teed to the wrapper's own stdio.
pub struct Supervisor {
    child: Child,
    pid: Option<u32>,
    started_at: Instant,
    state: ChildState,
}

impl Supervisor {
    /// Spawn `binary_path` with `args`, injecting `env` (the proxy's
    /// `HTTP_PROXY`/`HTTPS_PROXY` variables) and teeing stdout/stderr to the
    /// wrapper's own.
    pub fn spawn(
        binary_path: &Path,
        args: &[String],
        env: &[(String, String)],
    ) -> Result<Self, WrapError> {
        let mut command = Command::new(binary_path);
        command
            .args(args)
            .envs(env.iter().cloned())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command.spawn()?;
        let pid = child.id();

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(tee(stdout, false));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(tee(stderr, true));
        }

        Ok(Self {
            child,
            pid,
            started_at: Instant::now(),
            state: ChildState::Starting,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn state(&self) -> ChildState {
        self.state
    }

    /// Run the health-check/settling loop until the child exits or `cancel`
    /// fires. Emits `SupervisorEvent`s as the child's health changes.
    pub async fn supervise(
        mut self,
        events: mpsc::Sender<SupervisorEvent>,
        cancel: CancellationToken,
    ) -> Option<i32> {
        self.state = ChildState::Running;
        let _ = events.send(SupervisorEvent::StateChanged(ChildState::Running)).await;

        let mut interval = tokio::time::interval(HEALTH_CHECK_INTERVAL);
        let mut was_healthy = true;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.shutdown().await;
                    return None;
                }
                status = self.child.wait() => {
                    let code = status.ok().and_then(|s| s.code());
                    self.state = if code == Some(0) { ChildState::Stopped } else { ChildState::Error };
                    let _ = events.send(SupervisorEvent::Exited(code)).await;
                    return code;
                }
                _ = interval.tick() => {
                    let healthy = self.is_healthy();
                    if healthy && !was_healthy {
                        let _ = events.send(SupervisorEvent::Recovered).await;
                    } else if !healthy && was_healthy {
                        let _ = events.send(SupervisorEvent::Unhealthy(
                            "signal probe failed or process age exceeded bound".to_string(),
                        )).await;
                    }
                    was_healthy = healthy;
                }
            }
        }
    }

    fn is_healthy(&self) -> bool {
        if self.started_at.elapsed() > MAX_PROCESS_AGE {
            return false;
        }
        match self.pid {
            Some(pid) => signal_zero(pid),
            None => false,
        }
    }

    /// Graceful term, then kill after a grace period.
    async fn shutdown(&mut self) {
        self.state = ChildState::Stopping;
        if let Some(pid) = self.pid {
            send_sigterm(pid);
        }
        let grace = tokio::time::timeout(TERM_GRACE, self.child.wait()).await;
        if grace.is_err() {
            let _ = self.child.kill().await;
        }
        self.state = ChildState::Stopped;
    }
}

fn signal_zero(pid: u32) -> bool {
    // kill(pid, 0) checks existence/permission without delivering a signal.
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

fn send_sigterm(pid: u32) {
    unsafe {
        libc::kill(pid as i32, libc::SIGTERM);
    }
}

async fn tee(stream: impl tokio::io::AsyncRead + Unpin, is_stderr: bool) {
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if is_stderr {
                    let mut stderr = tokio::io::stderr();
                    let _ = stderr.write_all(line.as_bytes()).await;
                    let _ = stderr.write_all(b"\n").await;
                } else {
                    let mut stdout = tokio::io::stdout();
                    let _ = stdout.write_all(line.as_bytes()).await;
                    let _ = stdout.write_all(b"\n").await;
                }
            }
            _ => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locate_binary_fails_with_searched_list_for_unknown_name() {
        let err = locate_binary("definitely-not-a-real-binary-xyz").unwrap_err();
        match err {
            WrapError::BinaryNotFound { name, searched } => {
                assert_eq!(name, "definitely-not-a-real-binary-xyz");
                assert!(!searched.is_empty());
            }
            _ => panic!("expected BinaryNotFound"),
        }
    }

    #[test]
    fn locate_binary_finds_something_on_path() {
        // `sh` is present on every POSIX system this runs on.
        assert!(locate_binary("sh").is_ok());
    }

    #[tokio::test]
    async fn spawn_and_wait_reports_exit_code() {
        let path = locate_binary("sh").unwrap();
        let supervisor = Supervisor::spawn(&path, &["-c".to_string(), "exit 0".to_string()], &[]).unwrap();
        let (tx, _rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let code = supervisor.supervise(tx, cancel).await;
        assert_eq!(code, Some(0));
    }
}
