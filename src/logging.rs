//! Diagnostic logging setup.
//!
//! Console output goes to stderr at a level chosen by `-v`/`-q` (or `RUST_LOG`).
//! A debug-level log file is written alongside it and rotated by size at startup.

use crate::config::LoggingConfig;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// File name of the active log file.
pub const LOG_FILE_NAME: &str = "selspeak.log";

/// Console filter directive for the given verbosity.
pub fn console_directive(verbosity: u8, quiet: bool) -> &'static str {
    match (quiet, verbosity) {
        (true, _) => "warn",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    }
}

/// Directory holding the log files.
pub fn log_dir(config: &LoggingConfig) -> PathBuf {
    config.directory.clone().unwrap_or_else(|| {
        dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("selspeak")
            .join("logs")
    })
}

/// Rotate `dir/name` when it is larger than `max_bytes`.
///
/// `name` becomes `name.1`, `name.1` becomes `name.2` and so on; files beyond
/// `keep` are deleted. With `keep == 0` the oversized file is simply removed.
pub fn rotate(dir: &Path, name: &str, max_bytes: u64, keep: usize) -> io::Result<()> {
    let active = dir.join(name);
    let size = match fs::metadata(&active) {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    if size <= max_bytes {
        return Ok(());
    }
    if keep == 0 {
        return fs::remove_file(&active);
    }

    let numbered = |i: usize| dir.join(format!("{name}.{i}"));
    match fs::remove_file(numbered(keep)) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    for i in (1..keep).rev() {
        let from = numbered(i);
        if from.exists() {
            fs::rename(&from, numbered(i + 1))?;
        }
    }
    fs::rename(&active, numbered(1))
}

/// Install the global subscriber.
///
/// Returns the file writer's guard; keep it alive until exit so buffered lines
/// are flushed. Logging problems never stop the program: they are reported on
/// stderr and the file layer is skipped.
pub fn init(verbosity: u8, quiet: bool, config: &LoggingConfig) -> Option<WorkerGuard> {
    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| console_directive(verbosity, quiet).into());
    let console = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_target(false)
        .compact()
        .with_filter(console_filter);

    let (file_layer, guard) = match file_writer(config) {
        Ok(Some((writer, guard))) => {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_thread_names(true)
                .with_filter(LevelFilter::DEBUG);
            (Some(layer), Some(guard))
        }
        Ok(None) => (None, None),
        Err(e) => {
            eprintln!("Warning: file logging disabled: {e}");
            (None, None)
        }
    };

    if let Err(e) = tracing_subscriber::registry()
        .with(console)
        .with(file_layer)
        .try_init()
    {
        eprintln!("Warning: logging already initialized: {e}");
    }
    guard
}

fn file_writer(
    config: &LoggingConfig,
) -> io::Result<Option<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)>> {
    if !config.file {
        return Ok(None);
    }
    let dir = log_dir(config);
    fs::create_dir_all(&dir)?;
    rotate(
        &dir,
        LOG_FILE_NAME,
        config.max_file_mb.saturating_mul(1024 * 1024),
        config.keep_files,
    )?;
    let appender = tracing_appender::rolling::never(&dir, LOG_FILE_NAME);
    Ok(Some(tracing_appender::non_blocking(appender)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_levels() {
        assert_eq!(console_directive(0, false), "info");
        assert_eq!(console_directive(1, false), "debug");
        assert_eq!(console_directive(3, false), "trace");
        assert_eq!(console_directive(2, true), "warn");
    }

    #[test]
    fn configured_directory_wins() {
        let config = LoggingConfig {
            directory: Some(PathBuf::from("/var/tmp/x")),
            ..LoggingConfig::default()
        };
        assert_eq!(log_dir(&config), PathBuf::from("/var/tmp/x"));
        assert!(log_dir(&LoggingConfig::default()).ends_with("selspeak/logs"));
    }

    #[test]
    fn small_file_is_not_rotated() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.log"), "abc").unwrap();
        rotate(dir.path(), "a.log", 10, 2).unwrap();
        assert!(dir.path().join("a.log").exists());
        assert!(!dir.path().join("a.log.1").exists());
    }

    #[test]
    fn missing_file_is_fine() {
        let dir = tempfile::tempdir().unwrap();
        rotate(dir.path(), "a.log", 10, 2).unwrap();
    }

    #[test]
    fn rotation_shifts_and_drops_oldest() {
        let dir = tempfile::tempdir().unwrap();
        let p = |n: &str| dir.path().join(n);
        fs::write(p("a.log"), "current-too-big").unwrap();
        fs::write(p("a.log.1"), "one").unwrap();
        fs::write(p("a.log.2"), "two").unwrap();

        rotate(dir.path(), "a.log", 4, 2).unwrap();

        assert!(!p("a.log").exists());
        assert_eq!(fs::read_to_string(p("a.log.1")).unwrap(), "current-too-big");
        assert_eq!(fs::read_to_string(p("a.log.2")).unwrap(), "one");
        assert!(!p("a.log.3").exists());
    }

    #[test]
    fn keep_zero_deletes_oversized_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.log"), "0123456789").unwrap();
        rotate(dir.path(), "a.log", 1, 0).unwrap();
        assert!(!dir.path().join("a.log").exists());
    }
}
