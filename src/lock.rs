//! Single-instance marker file.
//!
//! Only one selspeak process speaks at a time. The running instance holds an
//! exclusive `flock` on the marker for its whole lifetime and records its PID
//! inside; a second invocation either refuses to start or, in toggle mode,
//! stops the first one.
//!
//! Liveness comes from the lock, never from the PID text: the kernel drops
//! the lock when the holder exits, however it exits.

use crate::error::{Result, SelspeakError};
use crate::sys::{self, Signal};
use std::fs::{File, OpenOptions};
use std::os::unix::fs::{FileExt, MetadataExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);
const KILL_WAIT: Duration = Duration::from_secs(1);
const ACQUIRE_ATTEMPTS: usize = 3;
/// The holder writes its PID right after locking; give it this long.
const HOLDER_PID_WAIT: Duration = Duration::from_millis(100);

/// What the marker file says about other instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStatus {
    /// No marker file.
    Free,
    /// A live process holds the lock. The PID is `None` if it could not be read.
    Held(Option<u32>),
    /// The marker exists but nobody holds the lock.
    Stale(Option<u32>),
}

/// Result of [`stop_holder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Nothing was running. A stale marker, if any, was removed.
    NotRunning,
    /// The holder exited after SIGTERM.
    Terminated(u32),
    /// The holder ignored SIGTERM for the whole grace period and was killed.
    Killed(u32),
}

/// Guard for the instance marker. Dropping it releases the lock.
#[derive(Debug)]
pub struct InstanceLock {
    path: PathBuf,
    pid: u32,
    file: File,
}

impl InstanceLock {
    /// Default marker location: `$XDG_RUNTIME_DIR/selspeak.lock`, or
    /// `/tmp/selspeak-<uid>.lock` when no runtime directory is set.
    pub fn default_path() -> PathBuf {
        match std::env::var_os("XDG_RUNTIME_DIR") {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir).join("selspeak.lock"),
            _ => PathBuf::from(format!("/tmp/selspeak-{}.lock", sys::current_uid())),
        }
    }

    /// Take the lock, recording this process's PID.
    ///
    /// A marker nobody holds is taken over in place. A held lock yields
    /// [`SelspeakError::InstanceLocked`].
    pub fn acquire(path: &Path) -> Result<Self> {
        let pid = std::process::id();

        for attempt in 1..=ACQUIRE_ATTEMPTS {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .mode(0o600)
                .open(path)
                .map_err(|e| SelspeakError::Lock {
                    message: format!("Failed to open {}: {}", path.display(), e),
                })?;

            match sys::try_lock_exclusive(&file) {
                Ok(true) => {}
                Ok(false) => return Err(busy(path)),
                Err(e) => {
                    return Err(SelspeakError::Lock {
                        message: format!("Failed to lock {}: {}", path.display(), e),
                    });
                }
            }

            // A releasing holder unlinks the marker before unlocking, so the
            // file we locked may no longer be the one at `path`.
            if !same_file(&file, path) {
                tracing::debug!("{} was replaced while locking (attempt {attempt})", path.display());
                continue;
            }

            if let Some(previous) = read_holder(path) {
                tracing::info!("Taking over stale lock {} (pid {previous})", path.display());
            }
            let record = format!("{pid}\n");
            if let Err(e) = file
                .set_len(0)
                .and_then(|()| file.write_all_at(record.as_bytes(), 0))
            {
                remove_marker(path);
                return Err(SelspeakError::Lock {
                    message: format!("Failed to write {}: {}", path.display(), e),
                });
            }

            tracing::debug!("Acquired instance lock {} (pid {pid})", path.display());
            return Ok(Self {
                path: path.to_path_buf(),
                pid,
                file,
            });
        }

        Err(SelspeakError::Lock {
            message: format!(
                "Could not acquire {}: the file kept being replaced",
                path.display()
            ),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        // Unlink while still locked; the lock itself goes with `self.file`.
        if same_file(&self.file, &self.path) {
            remove_marker(&self.path);
            tracing::debug!("Released instance lock {}", self.path.display());
        }
    }
}

/// PID recorded in the marker, if the file exists and parses.
pub fn read_holder(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// Inspect the marker without modifying it.
pub fn status(path: &Path) -> LockStatus {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return LockStatus::Free,
        Err(e) => {
            tracing::warn!("Cannot inspect {}: {}", path.display(), e);
            return LockStatus::Held(read_holder(path));
        }
    };
    match sys::try_lock_exclusive(&file) {
        Ok(true) => LockStatus::Stale(read_holder(path)),
        Ok(false) => LockStatus::Held(wait_for_holder(path)),
        Err(e) => {
            tracing::warn!("Cannot lock {}: {}", path.display(), e);
            LockStatus::Held(read_holder(path))
        }
    }
}

/// Stop the instance recorded in the marker.
///
/// Sends SIGTERM, waits up to `grace` for the process to exit, then sends
/// SIGKILL. A marker left behind by the stopped process is removed.
pub fn stop_holder(path: &Path, grace: Duration) -> Result<StopOutcome> {
    let pid = match status(path) {
        LockStatus::Free => return Ok(StopOutcome::NotRunning),
        LockStatus::Stale(_) => {
            remove_if_unlocked(path);
            return Ok(StopOutcome::NotRunning);
        }
        LockStatus::Held(None) => {
            return Err(SelspeakError::Lock {
                message: format!("{} is locked but records no pid", path.display()),
            });
        }
        LockStatus::Held(Some(pid)) => pid,
    };
    if pid == std::process::id() {
        return Err(SelspeakError::Lock {
            message: "Refusing to stop the current process".to_string(),
        });
    }

    tracing::info!("Stopping instance {pid}");
    sys::send_signal(pid, Signal::Terminate).map_err(|e| SelspeakError::Lock {
        message: format!("Failed to signal pid {pid}: {e}"),
    })?;

    let outcome = if wait_for_exit(pid, grace) {
        StopOutcome::Terminated(pid)
    } else {
        tracing::warn!("Instance {pid} still running after {grace:?}, sending SIGKILL");
        sys::send_signal(pid, Signal::Kill).map_err(|e| SelspeakError::Lock {
            message: format!("Failed to kill pid {pid}: {e}"),
        })?;
        if !wait_for_exit(pid, KILL_WAIT) {
            return Err(SelspeakError::Lock {
                message: format!("pid {pid} survived SIGKILL"),
            });
        }
        StopOutcome::Killed(pid)
    };

    remove_if_unlocked(path);
    Ok(outcome)
}

fn busy(path: &Path) -> SelspeakError {
    match wait_for_holder(path) {
        Some(pid) => SelspeakError::InstanceLocked {
            pid,
            path: path.display().to_string(),
        },
        None => SelspeakError::Lock {
            message: format!("{} is held by another process", path.display()),
        },
    }
}

fn wait_for_holder(path: &Path) -> Option<u32> {
    let deadline = Instant::now() + HOLDER_PID_WAIT;
    loop {
        if let Some(pid) = read_holder(path) {
            return Some(pid);
        }
        if Instant::now() >= deadline {
            return None;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}

fn same_file(file: &File, path: &Path) -> bool {
    match (file.metadata(), std::fs::metadata(path)) {
        (Ok(open), Ok(current)) => open.dev() == current.dev() && open.ino() == current.ino(),
        _ => false,
    }
}

/// Remove the marker only while holding its lock, so a new holder's file is
/// never unlinked.
fn remove_if_unlocked(path: &Path) {
    let Ok(file) = File::open(path) else {
        return;
    };
    if matches!(sys::try_lock_exclusive(&file), Ok(true)) && same_file(&file, path) {
        remove_marker(path);
    }
}

fn wait_for_exit(pid: u32, timeout: Duration) -> bool {
    let deadline = Instant::now().checked_add(timeout);
    loop {
        if !sys::process_alive(pid) {
            return true;
        }
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return false;
        }
        std::thread::sleep(STOP_POLL_INTERVAL);
    }
}

fn remove_marker(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to remove {}: {}", path.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::{Command, Stdio};

    fn lock_path(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("selspeak.lock")
    }

    /// Lock the marker on behalf of another process.
    fn foreign_holder(path: &Path) -> File {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .unwrap();
        assert!(sys::try_lock_exclusive(&file).unwrap());
        file
    }

    /// A child that holds the marker lock through its stdin and is reaped by
    /// a background thread, so it disappears as soon as it exits.
    fn spawn_holder(path: &Path, script: &str) -> u32 {
        let file = foreign_holder(path);
        let mut child = Command::new("sh")
            .args(["-c", script])
            .stdin(Stdio::from(file))
            .spawn()
            .unwrap();
        let pid = child.id();
        std::fs::write(path, format!("{pid}\n")).unwrap();
        std::thread::spawn(move || child.wait());
        // Give sh time to install traps.
        std::thread::sleep(Duration::from_millis(200));
        pid
    }

    fn dead_pid() -> u32 {
        let mut child = Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        pid
    }

    #[test]
    fn acquire_writes_pid_and_drop_removes_marker() {
        let dir = tempfile::tempdir().unwrap();
        let path = lock_path(&dir);
        {
            let lock = InstanceLock::acquire(&path).unwrap();
            assert_eq!(lock.pid(), std::process::id());
            assert_eq!(read_holder(&path), Some(std::process::id()));
            assert_eq!(status(&path), LockStatus::Held(Some(std::process::id())));
        }
        assert!(!path.exists());
        assert_eq!(status(&path), LockStatus::Free);
    }

    #[test]
    fn second_acquire_reports_live_holder() {
        let dir = tempfile::tempdir().unwrap();
        let path = lock_path(&dir);
        let _held = InstanceLock::acquire(&path).unwrap();

        match InstanceLock::acquire(&path) {
            Err(SelspeakError::InstanceLocked { pid, .. }) => {
                assert_eq!(pid, std::process::id())
            }
            other => panic!("expected InstanceLocked, got {other:?}"),
        }
        assert!(path.exists(), "failed acquire must not remove the holder's marker");
        assert_eq!(read_holder(&path), Some(std::process::id()));
    }

    #[test]
    fn holder_that_has_not_written_its_pid_keeps_the_lock() {
        let dir = tempfile::tempdir().unwrap();
        let path = lock_path(&dir);
        let _holder = foreign_holder(&path);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");

        assert!(matches!(
            InstanceLock::acquire(&path),
            Err(SelspeakError::InstanceLocked { .. } | SelspeakError::Lock { .. })
        ));
        assert_eq!(status(&path), LockStatus::Held(None));
        assert!(path.exists());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
    }

    #[test]
    fn racing_acquirers_never_both_hold() {
        let dir = tempfile::tempdir().unwrap();
        let path = lock_path(&dir);
        std::fs::write(&path, format!("{}\n", dead_pid())).unwrap();

        let barrier = std::sync::Arc::new(std::sync::Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let path = path.clone();
                let barrier = std::sync::Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    InstanceLock::acquire(&path).ok()
                })
            })
            .collect();
        let winners: Vec<InstanceLock> = handles
            .into_iter()
            .filter_map(|h| h.join().unwrap())
            .collect();
        assert_eq!(winners.len(), 1);
    }

    #[test]
    fn stale_marker_is_taken_over() {
        let dir = tempfile::tempdir().unwrap();
        let path = lock_path(&dir);
        std::fs::write(&path, format!("{}\n", dead_pid())).unwrap();
        assert!(matches!(status(&path), LockStatus::Stale(Some(_))));

        let lock = InstanceLock::acquire(&path).unwrap();
        assert_eq!(read_holder(lock.path()), Some(std::process::id()));
    }

    #[test]
    fn unlocked_garbage_marker_is_taken_over() {
        let dir = tempfile::tempdir().unwrap();
        let path = lock_path(&dir);
        std::fs::write(&path, "not a pid and longer than one").unwrap();
        assert_eq!(status(&path), LockStatus::Stale(None));

        let lock = InstanceLock::acquire(&path).unwrap();
        assert_eq!(
            std::fs::read_to_string(lock.path()).unwrap(),
            format!("{}\n", std::process::id())
        );
    }

    #[test]
    fn drop_leaves_replaced_marker_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = lock_path(&dir);
        let lock = InstanceLock::acquire(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        std::fs::write(&path, "1\n").unwrap();
        drop(lock);
        assert_eq!(read_holder(&path), Some(1));
    }

    #[test]
    fn stop_without_holder_is_not_running() {
        let dir = tempfile::tempdir().unwrap();
        let path = lock_path(&dir);
        assert_eq!(
            stop_holder(&path, Duration::from_millis(100)).unwrap(),
            StopOutcome::NotRunning
        );

        std::fs::write(&path, format!("{}\n", dead_pid())).unwrap();
        assert_eq!(
            stop_holder(&path, Duration::from_millis(100)).unwrap(),
            StopOutcome::NotRunning
        );
        assert!(!path.exists());
    }

    #[test]
    fn stop_terminates_cooperative_holder() {
        let dir = tempfile::tempdir().unwrap();
        let path = lock_path(&dir);
        let pid = spawn_holder(&path, "exec sleep 30");
        assert_eq!(status(&path), LockStatus::Held(Some(pid)));

        let outcome = stop_holder(&path, Duration::from_secs(5)).unwrap();
        assert_eq!(outcome, StopOutcome::Terminated(pid));
        assert!(!path.exists());
    }

    #[test]
    fn stop_kills_holder_ignoring_sigterm() {
        let dir = tempfile::tempdir().unwrap();
        let path = lock_path(&dir);
        let pid = spawn_holder(&path, "trap '' TERM; while true; do sleep 0.1 <&-; done");

        let outcome = stop_holder(&path, Duration::from_millis(300)).unwrap();
        assert_eq!(outcome, StopOutcome::Killed(pid));
        assert!(!path.exists());
    }

    #[test]
    fn stop_refuses_own_pid() {
        let dir = tempfile::tempdir().unwrap();
        let path = lock_path(&dir);
        let _lock = InstanceLock::acquire(&path).unwrap();
        assert!(stop_holder(&path, Duration::from_millis(100)).is_err());
        assert!(path.exists());
    }

    #[test]
    fn default_path_is_per_user() {
        let path = InstanceLock::default_path();
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name == "selspeak.lock" || name.starts_with("selspeak-"));
    }
}
