//! Safe wrappers for platform-specific unsafe operations.
//!
//! Every `unsafe` block in the codebase lives here. Call sites use the safe
//! public API and never touch `unsafe` directly.

use std::fs::File;
use std::os::fd::AsRawFd;
use std::path::Path;

/// Return the effective user ID of the calling process.
pub fn current_uid() -> u32 {
    // SAFETY: getuid is a read-only POSIX syscall with no preconditions.
    unsafe { libc::getuid() }
}

/// Signals used to stop another instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// SIGTERM: ask the process to finish cleanly.
    Terminate,
    /// SIGKILL: cannot be caught.
    Kill,
}

impl Signal {
    fn as_raw(self) -> libc::c_int {
        match self {
            Signal::Terminate => libc::SIGTERM,
            Signal::Kill => libc::SIGKILL,
        }
    }
}

/// Returns true if a process with this PID exists.
///
/// Uses `kill(pid, 0)`, which performs the permission and existence checks
/// without delivering a signal. `EPERM` means the process exists but belongs to
/// someone else, which still counts as alive.
pub fn process_alive(pid: u32) -> bool {
    let Ok(raw) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }
    // SAFETY: kill with signal 0 has no side effects; the pid is validated positive
    // so it never addresses a process group.
    let rc = unsafe { libc::kill(raw, 0) };
    if rc == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Send a signal to a process.
///
/// A process that no longer exists (`ESRCH`) is not an error.
pub fn send_signal(pid: u32, signal: Signal) -> std::io::Result<()> {
    let raw = libc::pid_t::try_from(pid)
        .ok()
        .filter(|p| *p > 0)
        .ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, format!("invalid pid {pid}"))
        })?;
    // SAFETY: the pid is validated positive, so only a single process is addressed.
    let rc = unsafe { libc::kill(raw, signal.as_raw()) };
    if rc == 0 {
        return Ok(());
    }
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        Ok(())
    } else {
        Err(err)
    }
}

/// Try to take an exclusive advisory lock (`flock`) on `file` without blocking.
///
/// Returns `Ok(false)` when another open file description holds the lock. The
/// lock is released when every descriptor sharing this description is closed,
/// including when the process dies.
pub fn try_lock_exclusive(file: &File) -> std::io::Result<bool> {
    loop {
        // SAFETY: the descriptor is owned by `file` and stays open for the call.
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc == 0 {
            return Ok(true);
        }
        let err = std::io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::EWOULDBLOCK) => return Ok(false),
            Some(libc::EINTR) => continue,
            _ => return Err(err),
        }
    }
}

/// Heuristic check for a usable NVIDIA GPU.
///
/// Looks for the kernel driver rather than linking against CUDA.
pub fn gpu_available() -> bool {
    Path::new("/proc/driver/nvidia/version").exists() || Path::new("/dev/nvidia0").exists()
}

/// Run a closure with stderr temporarily redirected to `/dev/null`.
///
/// This suppresses noisy ALSA/JACK/PipeWire messages that CPAL triggers
/// when probing audio backends.
///
/// # Safety
/// Uses `libc::dup`/`libc::dup2` to save and restore file descriptor 2 (stderr).
/// Safe as long as no other thread is concurrently manipulating fd 2.
pub fn with_suppressed_stderr<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    // SAFETY: Safe as long as no other thread is concurrently manipulating fd 2.
    unsafe {
        let saved_fd = libc::dup(2);
        let devnull = libc::open(c"/dev/null".as_ptr(), libc::O_WRONLY);
        if saved_fd >= 0 && devnull >= 0 {
            libc::dup2(devnull, 2);
            libc::close(devnull);
        }

        let result = f();

        if saved_fd >= 0 {
            libc::dup2(saved_fd, 2);
            libc::close(saved_fd);
        }

        result
    }
}

/// Set an environment variable.
///
/// # Safety
/// Caller must ensure no other threads are reading environment variables concurrently.
pub fn set_env(key: &str, value: &str) {
    // SAFETY: Caller must ensure no other threads are reading environment
    // variables concurrently.
    unsafe {
        std::env::set_var(key, value);
    }
}

/// Remove an environment variable.
///
/// # Safety
/// Caller must ensure no other threads are reading environment variables concurrently.
pub fn remove_env(key: &str) {
    // SAFETY: Caller must ensure no other threads are reading environment
    // variables concurrently.
    unsafe {
        std::env::remove_var(key);
    }
}

/// Suppress noisy JACK/ALSA/PipeWire messages during audio backend probing.
///
/// Must be called before spawning threads.
pub fn suppress_audio_warnings() {
    set_env("JACK_NO_START_SERVER", "1");
    set_env("JACK_NO_AUDIO_RESERVATION", "1");
    set_env("PIPEWIRE_DEBUG", "0");
    set_env("ALSA_DEBUG", "0");
    set_env("PW_LOG", "0");
}
