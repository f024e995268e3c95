//! Speak-selection application entry point.
//!
//! Orchestrates the complete text-to-speech flow:
//! capture → normalize → lock → synthesize + play

use crate::audio::cpal_output::CpalBackend;
use crate::audio::device::OutputBackend;
use crate::config::Config;
use crate::error::{Result, SelspeakError};
use crate::lock::{self, InstanceLock, LockStatus, StopOutcome};
use crate::output;
use crate::pipeline::{Pipeline, PipelineConfig, PipelineEvent, PipelineRunResult};
use crate::selection::{
    SelectionSource, SystemCommandExecutor, normalize_for_speech, read_selection,
};
use crate::synth::{CommandSynthesizer, ComputeDevice, Synthesizer, ToneSynthesizer};
use crate::sys;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{SignalKind, signal};

/// Spoke everything, or there was nothing to speak.
pub const EXIT_OK: i32 = 0;
/// Something failed.
pub const EXIT_FAILURE: i32 = 1;
/// Another instance is already speaking.
pub const EXIT_BUSY: i32 = 2;
/// Stopped by SIGINT or SIGTERM.
pub const EXIT_INTERRUPTED: i32 = 130;

/// Command-line overrides applied on top of file and environment settings.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub voice: Option<String>,
    pub speed: Option<f32>,
    pub device: Option<String>,
    pub compute: Option<ComputeDevice>,
}

impl Overrides {
    pub fn apply(self, config: &mut Config) {
        if let Some(voice) = self.voice {
            config.synthesis.voice = voice;
        }
        if let Some(speed) = self.speed {
            config.synthesis.speed = speed;
        }
        if let Some(device) = self.device {
            config.playback.device = Some(device);
        }
        if let Some(compute) = self.compute {
            config.synthesis.compute = compute;
        }
    }
}

/// Where the text comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum TextSource {
    Selection(SelectionSource),
    Argument(String),
    Stdin,
}

/// Options for [`run_speak`].
#[derive(Debug, Clone)]
pub struct SpeakOptions {
    pub source: TextSource,
    pub toggle: bool,
    pub quiet: bool,
    pub verbosity: u8,
    pub lock_path: PathBuf,
}

/// Run the speak command: capture text → normalize → speak.
///
/// Returns the process exit code.
pub async fn run_speak(config: Config, options: SpeakOptions) -> Result<i32> {
    if options.toggle
        && let LockStatus::Held(_) = lock::status(&options.lock_path)
    {
        return run_stop(
            &options.lock_path,
            Duration::from_millis(crate::defaults::STOP_GRACE_MS),
            options.quiet,
        );
    }

    let raw = obtain_text(&options.source, &config).await?;
    let Some(text) = normalize_for_speech(&raw, config.selection.preserve_paragraphs) else {
        output::status("Nothing to speak", options.quiet);
        return Ok(EXIT_OK);
    };
    tracing::info!("Speaking {} characters", text.chars().count());

    let _lock = match InstanceLock::acquire(&options.lock_path) {
        Ok(lock) => lock,
        Err(e @ SelspeakError::InstanceLocked { .. }) => {
            eprintln!("{e}");
            return Ok(EXIT_BUSY);
        }
        Err(e) => return Err(e),
    };

    let synthesizer: Arc<dyn Synthesizer> =
        Arc::new(CommandSynthesizer::from_config(&config.synthesis));
    let result = speak(&config, synthesizer, text, options.verbosity).await?;
    output::render_outcome(&result, options.quiet);
    Ok(result.exit_code())
}

/// Play `chunks` tones through the full pipeline.
pub async fn run_test_tone(
    config: Config,
    chunks: usize,
    quiet: bool,
    verbosity: u8,
) -> Result<i32> {
    let text = vec!["Tone."; chunks.max(1)].join(" ");
    output::status(
        &format!(
            "Playing {} test tone(s) at {} Hz",
            chunks.max(1),
            config.playback.sample_rate
        ),
        quiet,
    );
    let synthesizer: Arc<dyn Synthesizer> =
        Arc::new(ToneSynthesizer::new(config.playback.sample_rate));
    let result = speak(&config, synthesizer, text, verbosity).await?;
    output::render_outcome(&result, quiet);
    Ok(result.exit_code())
}

/// Stop the instance recorded in the lock file.
pub fn run_stop(path: &Path, grace: Duration, quiet: bool) -> Result<i32> {
    match lock::stop_holder(path, grace)? {
        StopOutcome::NotRunning => output::status("Not running", quiet),
        StopOutcome::Terminated(pid) => output::status(&format!("Stopped (pid {pid})"), quiet),
        StopOutcome::Killed(pid) => {
            output::status(&format!("Killed (pid {pid}) after {grace:?}"), quiet)
        }
    }
    Ok(EXIT_OK)
}

/// Print whether an instance is speaking.
pub fn run_status(path: &Path) -> i32 {
    match lock::status(path) {
        LockStatus::Held(Some(pid)) => {
            println!("Speaking (pid {pid})");
            EXIT_OK
        }
        LockStatus::Held(None) => {
            println!("Speaking (pid unknown)");
            EXIT_OK
        }
        LockStatus::Free => {
            println!("Not running");
            EXIT_OK
        }
        LockStatus::Stale(pid) => {
            match pid {
                Some(pid) => println!("Not running (stale lock from pid {pid})"),
                None => println!("Not running (stale lock file)"),
            }
            EXIT_OK
        }
    }
}

async fn obtain_text(source: &TextSource, config: &Config) -> Result<String> {
    match source {
        TextSource::Argument(text) => Ok(text.clone()),
        TextSource::Stdin => tokio::task::spawn_blocking(|| -> Result<String> {
            let mut text = String::new();
            std::io::stdin().read_to_string(&mut text)?;
            Ok(text)
        })
        .await
        .map_err(|e| SelspeakError::Other(format!("stdin reader failed: {e}")))?,
        TextSource::Selection(selection) => {
            let selection = *selection;
            let executor = SystemCommandExecutor::new(Duration::from_millis(
                config.selection.timeout_ms,
            ));
            tokio::task::spawn_blocking(move || read_selection(&executor, selection))
                .await
                .map_err(|e| SelspeakError::Other(format!("selection reader failed: {e}")))?
        }
    }
}

/// Run the pipeline on a blocking thread until it ends or a signal arrives.
///
/// SIGINT and SIGTERM cancel the run; the pipeline then closes the device and
/// reports `Interrupted`.
async fn speak(
    config: &Config,
    synthesizer: Arc<dyn Synthesizer>,
    text: String,
    verbosity: u8,
) -> Result<PipelineRunResult> {
    // Suppress noisy JACK/ALSA warnings before audio init
    sys::suppress_audio_warnings();

    let backend: Arc<dyn OutputBackend> =
        Arc::new(CpalBackend::new(config.playback.device.clone()));
    let mut pipeline = Pipeline::new(PipelineConfig::from_config(config), synthesizer, backend);

    let renderer = if verbosity >= 1 {
        let (tx, rx) = crossbeam_channel::bounded::<PipelineEvent>(64);
        pipeline = pipeline.with_event_sender(tx);
        Some(output::spawn_event_renderer(rx)?)
    } else {
        None
    };

    let mut sigterm = signal(SignalKind::terminate())?;
    let handle = Arc::new(pipeline).spawn(text)?;
    let cancel = handle.cancel_token();
    let mut run = tokio::task::spawn_blocking(move || handle.wait());

    let joined = tokio::select! {
        joined = &mut run => joined,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, stopping playback");
            cancel.cancel();
            run.await
        }
        _ = sigterm.recv() => {
            tracing::info!("Terminated, stopping playback");
            cancel.cancel();
            run.await
        }
    };
    let result =
        joined.map_err(|e| SelspeakError::Other(format!("pipeline task failed: {e}")))?;

    if let Some(renderer) = renderer
        && renderer.join().is_err()
    {
        tracing::warn!("event renderer panicked");
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_replace_config_values() {
        let mut config = Config::default();
        Overrides {
            voice: Some("de_DE-thorsten-high".to_string()),
            speed: Some(1.25),
            device: Some("pipewire".to_string()),
            compute: Some(ComputeDevice::Cpu),
        }
        .apply(&mut config);

        assert_eq!(config.synthesis.voice, "de_DE-thorsten-high");
        assert_eq!(config.synthesis.speed, 1.25);
        assert_eq!(config.playback.device.as_deref(), Some("pipewire"));
        assert_eq!(config.synthesis.compute, ComputeDevice::Cpu);
    }

    #[test]
    fn empty_overrides_keep_config() {
        let mut config = Config::default();
        Overrides::default().apply(&mut config);
        assert_eq!(config.synthesis.voice, Config::default().synthesis.voice);
        assert!(config.playback.device.is_none());
    }

    fn options(source: TextSource, lock_path: PathBuf) -> SpeakOptions {
        SpeakOptions {
            source,
            toggle: false,
            quiet: true,
            verbosity: 0,
            lock_path,
        }
    }

    #[tokio::test]
    async fn whitespace_only_text_exits_cleanly_without_lock() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("selspeak.lock");
        let code = run_speak(
            Config::default(),
            options(TextSource::Argument(" \n\t ".to_string()), lock_path.clone()),
        )
        .await
        .unwrap();
        assert_eq!(code, EXIT_OK);
        assert!(!lock_path.exists());
    }

    #[tokio::test]
    async fn busy_when_another_instance_holds_lock() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("selspeak.lock");
        let _held = InstanceLock::acquire(&lock_path).unwrap();

        let code = run_speak(
            Config::default(),
            options(TextSource::Argument("Hello.".to_string()), lock_path),
        )
        .await
        .unwrap();
        assert_eq!(code, EXIT_BUSY);
    }

    #[test]
    fn stop_without_instance_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let code = run_stop(&dir.path().join("none.lock"), Duration::from_millis(10), true)
            .unwrap();
        assert_eq!(code, EXIT_OK);
    }

    #[test]
    fn interrupted_runs_use_shell_convention() {
        let result = PipelineRunResult {
            outcome: crate::pipeline::RunOutcome::Interrupted,
            ..PipelineRunResult::nothing_to_speak()
        };
        assert_eq!(result.exit_code(), EXIT_INTERRUPTED);
    }

    #[test]
    fn status_without_instance() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(run_status(&dir.path().join("none.lock")), EXIT_OK);
    }
}
