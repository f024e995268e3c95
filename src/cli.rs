//! Command-line interface for selspeak
//!
//! Provides argument parsing using clap derive macros.

use crate::synth::ComputeDevice;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use std::time::Duration;

/// Speak the selected text on Wayland Linux
#[derive(Parser, Debug)]
#[command(
    name = "selspeak",
    version,
    about = "Speak the selected text on Wayland Linux"
)]
pub struct Cli {
    /// Subcommand to execute (default: speak the primary selection)
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Suppress status output (quiet mode)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose output (-v: pipeline events, -vv: full diagnostics)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// If another instance is speaking, stop it instead of speaking
    #[arg(long, global = true)]
    pub toggle: bool,

    /// Voice passed to the synthesis command
    #[arg(long, global = true, value_name = "VOICE")]
    pub voice: Option<String>,

    /// Speaking speed multiplier (1.0 = natural)
    #[arg(long, global = true, value_name = "FACTOR")]
    pub speed: Option<f32>,

    /// Audio output device name (see `selspeak devices`)
    #[arg(long, global = true, value_name = "DEVICE")]
    pub device: Option<String>,

    /// Synthesis compute device: auto, gpu or cpu
    #[arg(long, global = true, value_name = "DEVICE")]
    pub compute: Option<ComputeDevice>,
}

/// Parse a grace period.
///
/// Bare numbers are seconds; anything else goes through `humantime`
/// (`500ms`, `2s`, `1m`).
fn parse_grace(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(s).map_err(|e| e.to_string())
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Speak text given as argument, from stdin, or from a selection
    Speak {
        /// Text to speak (default: primary selection)
        #[arg(conflicts_with = "stdin")]
        text: Option<String>,

        /// Read the text from stdin
        #[arg(long)]
        stdin: bool,

        /// Read the regular clipboard instead of the primary selection
        #[arg(long, conflicts_with_all = ["text", "stdin"])]
        clipboard: bool,
    },

    /// Stop the running instance
    Stop {
        /// Time to wait after SIGTERM before sending SIGKILL (e.g. 500ms, 2s)
        #[arg(long, value_name = "DURATION", default_value = "2s", value_parser = parse_grace)]
        grace: Duration,
    },

    /// Show whether an instance is speaking
    Status,

    /// List available audio output devices
    Devices,

    /// Play test tones through the full pipeline
    TestTone {
        /// Number of tones to play
        #[arg(long, short = 'n', value_name = "N", default_value = "3")]
        chunks: usize,
    },

    /// Check system dependencies
    Check,

    /// Inspect or create the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

/// Configuration management actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the configuration file path
    Path,
    /// Print the effective configuration (file, environment and flags applied)
    Show,
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}
