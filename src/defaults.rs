//! Default configuration constants for selspeak.
//!
//! Shared by the configuration types, the CLI and the pipeline so that every
//! entry point agrees on the same values.

/// Playback sample rate in Hz.
///
/// Matches the native output rate of the common neural voices, so the
/// synthesized audio usually reaches the device without resampling.
pub const SAMPLE_RATE: u32 = 24000;

/// Frames per device buffer requested from the output stream.
pub const BUFFER_FRAMES: u32 = 2048;

/// Number of audio chunks the queue holds before synthesis blocks.
pub const QUEUE_CAPACITY: usize = 10;

/// Delay between arming the output device and starting synthesis.
pub const SETTLE_MS: u64 = 100;

/// Poll interval for loops that wait on a queue while watching for cancellation.
pub const POLL_INTERVAL_MS: u64 = 50;

/// How long a cancelled run waits for the synthesis thread before leaving it behind.
pub const CANCEL_GRACE_MS: u64 = 500;

/// Upper bound accepted for configured delays and timeouts.
pub const MAX_WAIT_MS: u64 = 60_000;

/// External synthesis command.
pub const SYNTH_COMMAND: &str = "piper";

/// Default voice identifier passed to the synthesis command.
pub const DEFAULT_VOICE: &str = "en_US-lessac-medium";

/// Default speaking speed multiplier.
pub const DEFAULT_SPEED: f32 = 1.0;

/// Sample rate of raw PCM produced by the synthesis command.
pub const SYNTH_SAMPLE_RATE: u32 = 22050;

/// Longest text unit sent to the synthesizer in one request.
pub const MAX_CHUNK_CHARS: usize = 400;

/// Selection tool used to read the primary selection and clipboard.
pub const SELECTION_TOOL: &str = "wl-paste";

/// How long to wait for the selection tool before giving up.
pub const SELECTION_TIMEOUT_MS: u64 = 2000;

/// Grace period between SIGTERM and SIGKILL when stopping another instance.
pub const STOP_GRACE_MS: u64 = 2000;

/// Rotate the log file once it grows beyond this many megabytes.
pub const LOG_MAX_FILE_MB: u64 = 10;

/// Number of rotated log files kept next to the active one.
pub const LOG_KEEP_FILES: usize = 5;

/// Test tone: base frequency, per-chunk frequency step, duration and amplitude.
pub const TONE_BASE_HZ: f32 = 440.0;
pub const TONE_STEP_HZ: f32 = 50.0;
pub const TONE_SECS: f32 = 0.5;
pub const TONE_AMPLITUDE: f32 = 0.2;
