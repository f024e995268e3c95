use crate::defaults;
use crate::error::{Result, SelspeakError};
use crate::selection::capture::SelectionSource;
use crate::synth::command::PcmFormat;
use crate::synth::synthesizer::ComputeDevice;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub playback: PlaybackConfig,
    pub synthesis: SynthesisConfig,
    pub selection: SelectionConfig,
    pub logging: LoggingConfig,
}

/// Audio output and queue configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Output device name; `None` uses the system default.
    pub device: Option<String>,
    pub sample_rate: u32,
    pub buffer_frames: u32,
    pub queue_capacity: usize,
    pub settle_ms: u64,
}

/// Speech synthesis configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SynthesisConfig {
    /// External TTS program, invoked once per sentence.
    pub command: String,
    /// Arguments; `{voice}`, `{speed}`, `{length_scale}` and `{device}` are substituted.
    pub args: Vec<String>,
    /// Extra arguments appended when synthesis runs on the GPU.
    pub gpu_args: Vec<String>,
    pub voice: String,
    pub speed: f32,
    pub compute: ComputeDevice,
    /// Sample rate of the raw PCM the command writes to stdout.
    pub sample_rate: u32,
    pub sample_format: PcmFormat,
    pub max_chunk_chars: usize,
}

/// Text acquisition configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SelectionConfig {
    pub source: SelectionSource,
    pub timeout_ms: u64,
    /// Keep blank lines between paragraphs so they become separate chunks.
    pub preserve_paragraphs: bool,
}

/// Log file configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Write a debug log file in addition to the console output.
    pub file: bool,
    /// Log directory; defaults to `~/.cache/selspeak/logs`.
    pub directory: Option<PathBuf>,
    pub max_file_mb: u64,
    pub keep_files: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            device: None,
            sample_rate: defaults::SAMPLE_RATE,
            buffer_frames: defaults::BUFFER_FRAMES,
            queue_capacity: defaults::QUEUE_CAPACITY,
            settle_ms: defaults::SETTLE_MS,
        }
    }
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            command: defaults::SYNTH_COMMAND.to_string(),
            args: vec![
                "--model".to_string(),
                "{voice}".to_string(),
                "--output-raw".to_string(),
                "--length_scale".to_string(),
                "{length_scale}".to_string(),
            ],
            gpu_args: vec!["--cuda".to_string()],
            voice: defaults::DEFAULT_VOICE.to_string(),
            speed: defaults::DEFAULT_SPEED,
            compute: ComputeDevice::Auto,
            sample_rate: defaults::SYNTH_SAMPLE_RATE,
            sample_format: PcmFormat::S16le,
            max_chunk_chars: defaults::MAX_CHUNK_CHARS,
        }
    }
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            source: SelectionSource::Primary,
            timeout_ms: defaults::SELECTION_TIMEOUT_MS,
            preserve_paragraphs: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file: true,
            directory: None,
            max_file_mb: defaults::LOG_MAX_FILE_MB,
            keep_files: defaults::LOG_KEEP_FILES,
        }
    }
}

impl PlaybackConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file is missing or contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if the file doesn't exist
    ///
    /// Only a missing file falls back to defaults; invalid TOML is an error.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(SelspeakError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(Self::default())
            }
            Err(e) => Err(SelspeakError::ConfigParse {
                message: format!("{}: {}", path.display(), e),
            }),
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - SELSPEAK_VOICE → synthesis.voice
    /// - SELSPEAK_SPEED → synthesis.speed
    /// - SELSPEAK_AUDIO_DEVICE → playback.device
    /// - SELSPEAK_COMPUTE → synthesis.compute (auto, gpu, cpu)
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(voice) = std::env::var("SELSPEAK_VOICE")
            && !voice.is_empty()
        {
            self.synthesis.voice = voice;
        }

        if let Ok(speed) = std::env::var("SELSPEAK_SPEED")
            && !speed.is_empty()
        {
            match speed.parse::<f32>() {
                Ok(value) => self.synthesis.speed = value,
                Err(_) => tracing::warn!("ignoring SELSPEAK_SPEED={speed:?}: not a number"),
            }
        }

        if let Ok(device) = std::env::var("SELSPEAK_AUDIO_DEVICE")
            && !device.is_empty()
        {
            self.playback.device = Some(device);
        }

        if let Ok(compute) = std::env::var("SELSPEAK_COMPUTE")
            && !compute.is_empty()
        {
            match compute.parse::<ComputeDevice>() {
                Ok(value) => self.synthesis.compute = value,
                Err(e) => tracing::warn!("ignoring SELSPEAK_COMPUTE: {e}"),
            }
        }

        self
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        fn invalid(key: &str, message: &str) -> SelspeakError {
            SelspeakError::ConfigInvalidValue {
                key: key.to_string(),
                message: message.to_string(),
            }
        }

        if self.playback.sample_rate == 0 {
            return Err(invalid("playback.sample_rate", "must be positive"));
        }
        if self.playback.buffer_frames == 0 {
            return Err(invalid("playback.buffer_frames", "must be positive"));
        }
        if self.playback.queue_capacity == 0 {
            return Err(invalid("playback.queue_capacity", "must be at least 1"));
        }
        if !(self.synthesis.speed.is_finite() && self.synthesis.speed > 0.0) {
            return Err(invalid("synthesis.speed", "must be a positive number"));
        }
        if self.synthesis.sample_rate == 0 {
            return Err(invalid("synthesis.sample_rate", "must be positive"));
        }
        if self.synthesis.command.trim().is_empty() {
            return Err(invalid("synthesis.command", "must not be empty"));
        }
        if self.synthesis.max_chunk_chars < 16 {
            return Err(invalid("synthesis.max_chunk_chars", "must be at least 16"));
        }
        let ceiling = format!("must not exceed {}", defaults::MAX_WAIT_MS);
        if self.playback.settle_ms > defaults::MAX_WAIT_MS {
            return Err(invalid("playback.settle_ms", &ceiling));
        }
        if self.selection.timeout_ms > defaults::MAX_WAIT_MS {
            return Err(invalid("selection.timeout_ms", &ceiling));
        }
        Ok(())
    }

    /// Serialize to pretty TOML (used by `selspeak config show` and `config init`).
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| SelspeakError::ConfigParse {
            message: e.to_string(),
        })
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/selspeak/config.toml on Linux
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("selspeak")
            .join("config.toml")
    }
}
