//! selspeak - Speak the selected text on Wayland Linux
//!
//! Streaming text-to-speech: audio for the first sentence plays while later
//! sentences are still being synthesized.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod defaults;
pub mod diagnostics;
pub mod error;
pub mod lock;
pub mod logging;
#[cfg(feature = "cli")]
pub mod output;
pub mod pipeline;
pub mod selection;
pub mod synth;
pub mod sys;

// Composition root - needs everything
#[cfg(all(feature = "cpal-audio", feature = "cli"))]
pub mod app;

// Core traits (synthesize → queue → play)
pub use audio::device::{OutputBackend, OutputDevice};
pub use selection::capture::{CommandExecutor, SystemCommandExecutor};
pub use synth::synthesizer::Synthesizer;

// Pipeline
pub use pipeline::{CancelToken, Pipeline, PipelineConfig, PipelineHandle, PipelineRunResult};

// Error handling
pub use error::{Result, SelspeakError};

// Config
pub use config::Config;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
