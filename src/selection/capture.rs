//! Reading the text to speak from the Wayland selection.

use crate::defaults;
use crate::error::{Result, SelspeakError};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::io::Read;
use std::process::{Command, Stdio};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

/// Which selection to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SelectionSource {
    /// Highlighted text (middle-click buffer).
    #[default]
    Primary,
    /// Regular copy/paste clipboard.
    Clipboard,
}

impl SelectionSource {
    fn wl_paste_args(self) -> &'static [&'static str] {
        match self {
            SelectionSource::Primary => &["--primary", "--no-newline"],
            SelectionSource::Clipboard => &["--no-newline"],
        }
    }
}

/// Trait for executing system commands (allows mocking in tests).
pub trait CommandExecutor: Send + Sync {
    /// Execute a command with arguments.
    ///
    /// Returns the stdout of the command on success.
    /// Returns an error if the command fails, is not found, or times out.
    fn execute(&self, command: &str, args: &[&str]) -> Result<String>;
}

/// Production command executor using std::process::Command, with a timeout.
#[derive(Debug, Clone)]
pub struct SystemCommandExecutor {
    timeout: Duration,
}

impl Default for SystemCommandExecutor {
    fn default() -> Self {
        Self::new(Duration::from_millis(defaults::SELECTION_TIMEOUT_MS))
    }
}

fn read_all(mut pipe: impl Read + Send + 'static) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Err(e) = pipe.read_to_end(&mut buf) {
            tracing::debug!("reading child output failed: {e}");
        }
        buf
    })
}

impl SystemCommandExecutor {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl CommandExecutor for SystemCommandExecutor {
    fn execute(&self, command: &str, args: &[&str]) -> Result<String> {
        let mut child = Command::new(command)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    SelspeakError::SelectionToolNotFound {
                        tool: command.to_string(),
                    }
                } else {
                    SelspeakError::Other(format!("Failed to execute {}: {}", command, e))
                }
            })?;

        // Drain pipes concurrently so a large selection cannot fill them and stall the child.
        let stdout = child.stdout.take().map(read_all);
        let stderr = child.stderr.take().map(read_all);

        let deadline = Instant::now().checked_add(self.timeout);
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                if let Err(e) = child.kill() {
                    tracing::warn!("failed to kill {command}: {e}");
                }
                if let Err(e) = child.wait() {
                    tracing::warn!("failed to reap {command}: {e}");
                }
                return Err(SelspeakError::SelectionTimeout {
                    tool: command.to_string(),
                    timeout_ms: self.timeout.as_millis() as u64,
                });
            }
            thread::sleep(Duration::from_millis(10));
        };

        let collect = |handle: Option<thread::JoinHandle<Vec<u8>>>| {
            handle.and_then(|h| h.join().ok()).unwrap_or_default()
        };
        let stdout = collect(stdout);
        let stderr = collect(stderr);

        if !status.success() {
            return Err(SelspeakError::CommandFailed {
                command: command.to_string(),
                status: status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&stdout).to_string())
    }
}

/// Read the primary selection or clipboard through `wl-paste`.
///
/// Returns an empty string when nothing is selected.
///
/// # Requirements
/// - wl-paste (from the wl-clipboard package)
///
/// # Installation
/// Ubuntu/Debian: `sudo apt install wl-clipboard`
/// Arch: `sudo pacman -S wl-clipboard`
pub fn read_selection<E: CommandExecutor + ?Sized>(
    executor: &E,
    source: SelectionSource,
) -> Result<String> {
    match executor.execute(defaults::SELECTION_TOOL, source.wl_paste_args()) {
        Ok(text) => Ok(text),
        // wl-paste exits non-zero when the selection is empty
        Err(SelspeakError::CommandFailed { status, stderr, .. }) => {
            tracing::debug!("wl-paste exited with {status}: {stderr}");
            Ok(String::new())
        }
        Err(SelspeakError::SelectionToolNotFound { .. }) => {
            Err(SelspeakError::SelectionToolNotFound {
                tool: "wl-paste (install wl-clipboard: sudo apt install wl-clipboard)".to_string(),
            })
        }
        Err(e) => Err(e),
    }
}

/// Mock command executor for testing.
///
/// Records all command executions and returns queued responses in order.
/// Once the queue is empty every call returns an empty string.
#[derive(Debug, Default)]
pub struct MockCommandExecutor {
    calls: Mutex<Vec<(String, Vec<String>)>>,
    responses: Mutex<VecDeque<Result<String>>>,
}

impl MockCommandExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(self, response: Result<String>) -> Self {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(response);
        self
    }

    pub fn calls(&self) -> Vec<(String, Vec<String>)> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl CommandExecutor for MockCommandExecutor {
    fn execute(&self, command: &str, args: &[&str]) -> Result<String> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((
                command.to_string(),
                args.iter().map(|s| s.to_string()).collect(),
            ));
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| Ok(String::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_selection_uses_primary_flag() {
        let executor = MockCommandExecutor::new().with_response(Ok("Hello world.".to_string()));
        assert_eq!(
            read_selection(&executor, SelectionSource::Primary).unwrap(),
            "Hello world."
        );
        assert_eq!(
            executor.calls(),
            vec![(
                "wl-paste".to_string(),
                vec!["--primary".to_string(), "--no-newline".to_string()]
            )]
        );
    }

    #[test]
    fn clipboard_omits_primary_flag() {
        let executor = MockCommandExecutor::new();
        read_selection(&executor, SelectionSource::Clipboard).unwrap();
        assert_eq!(executor.calls()[0].1, vec!["--no-newline".to_string()]);
    }

    #[test]
    fn failed_wl_paste_means_empty_selection() {
        let executor = MockCommandExecutor::new().with_response(Err(
            SelspeakError::CommandFailed {
                command: "wl-paste".to_string(),
                status: 1,
                stderr: "No selection".to_string(),
            },
        ));
        assert_eq!(read_selection(&executor, SelectionSource::Primary).unwrap(), "");
    }

    #[test]
    fn missing_tool_is_an_error_with_install_hint() {
        let executor = MockCommandExecutor::new().with_response(Err(
            SelspeakError::SelectionToolNotFound {
                tool: "wl-paste".to_string(),
            },
        ));
        match read_selection(&executor, SelectionSource::Primary) {
            Err(SelspeakError::SelectionToolNotFound { tool }) => {
                assert!(tool.contains("wl-clipboard"))
            }
            other => panic!("expected SelectionToolNotFound, got {other:?}"),
        }
    }

    #[test]
    fn timeout_is_propagated() {
        let executor = MockCommandExecutor::new().with_response(Err(
            SelspeakError::SelectionTimeout {
                tool: "wl-paste".to_string(),
                timeout_ms: 2000,
            },
        ));
        assert!(matches!(
            read_selection(&executor, SelectionSource::Primary),
            Err(SelspeakError::SelectionTimeout { .. })
        ));
    }

    #[test]
    fn system_executor_returns_stdout() {
        let executor = SystemCommandExecutor::default();
        assert_eq!(executor.execute("echo", &["hi"]).unwrap(), "hi\n");
    }

    #[test]
    fn system_executor_reports_exit_status() {
        let executor = SystemCommandExecutor::default();
        match executor.execute("sh", &["-c", "echo nope >&2; exit 4"]) {
            Err(SelspeakError::CommandFailed { status, stderr, .. }) => {
                assert_eq!(status, 4);
                assert_eq!(stderr, "nope");
            }
            other => panic!("expected CommandFailed, got {other:?}"),
        }
    }

    #[test]
    fn system_executor_times_out() {
        let executor = SystemCommandExecutor::new(Duration::from_millis(100));
        let started = Instant::now();
        assert!(matches!(
            executor.execute("sleep", &["5"]),
            Err(SelspeakError::SelectionTimeout { timeout_ms: 100, .. })
        ));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn system_executor_missing_tool() {
        let executor = SystemCommandExecutor::default();
        assert!(matches!(
            executor.execute("selspeak-no-such-tool", &[]),
            Err(SelspeakError::SelectionToolNotFound { .. })
        ));
    }

    #[test]
    fn system_executor_handles_large_output() {
        let executor = SystemCommandExecutor::default();
        let out = executor
            .execute("sh", &["-c", "head -c 200000 /dev/zero | tr '\\0' a"])
            .unwrap();
        assert_eq!(out.len(), 200_000);
    }
}
