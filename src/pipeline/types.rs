//! Data types for the streaming speech pipeline.

use std::fmt;
use std::time::Duration;

/// Cleaned text ready for synthesis.
///
/// Construction fails for empty or whitespace-only input, so a `TextInput`
/// always has something to say.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextInput(String);

impl TextInput {
    /// Wraps `text`, returning `None` when there is nothing to speak.
    pub fn new(text: impl Into<String>) -> Option<Self> {
        let text = text.into();
        if text.trim().is_empty() {
            None
        } else {
            Some(Self(text))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Number of characters (not bytes).
    pub fn char_count(&self) -> usize {
        self.0.chars().count()
    }
}

impl fmt::Display for TextInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One incremental unit of synthesized speech: mono f32 at the pipeline rate.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    /// Zero-based position in the generated sequence.
    pub index: usize,
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioChunk {
    pub fn new(index: usize, samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            index,
            samples,
            sample_rate,
        }
    }

    /// Playback duration of this chunk.
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / f64::from(self.sample_rate))
    }
}

/// Item carried by the audio queue.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem {
    Chunk(AudioChunk),
    /// Last item of every stream, sent exactly once, including after failures.
    EndOfStream,
}

/// Lifecycle of one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    DeviceArmed,
    Streaming,
    Draining,
    Done,
    Failed,
}

impl PipelineState {
    pub fn is_terminal(self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Failed)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Idle => "idle",
            PipelineState::DeviceArmed => "device-armed",
            PipelineState::Streaming => "streaming",
            PipelineState::Draining => "draining",
            PipelineState::Done => "done",
            PipelineState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Why a run failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineFailure {
    /// The output device could not be opened; synthesis never started.
    DeviceUnavailable(String),
    /// The synthesizer failed to start or failed mid-sequence.
    SynthesisFailure(String),
    /// Writing a chunk to the device failed; the chunk counts as not played.
    DeviceWriteFailure(String),
    /// A worker thread panicked or could not be spawned.
    Internal(String),
}

impl PipelineFailure {
    pub fn message(&self) -> &str {
        match self {
            PipelineFailure::DeviceUnavailable(m)
            | PipelineFailure::SynthesisFailure(m)
            | PipelineFailure::DeviceWriteFailure(m)
            | PipelineFailure::Internal(m) => m,
        }
    }
}

impl fmt::Display for PipelineFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineFailure::DeviceUnavailable(m) => write!(f, "audio device unavailable: {m}"),
            PipelineFailure::SynthesisFailure(m) => write!(f, "speech synthesis failed: {m}"),
            PipelineFailure::DeviceWriteFailure(m) => write!(f, "audio playback failed: {m}"),
            PipelineFailure::Internal(m) => write!(f, "internal pipeline error: {m}"),
        }
    }
}

impl std::error::Error for PipelineFailure {}

/// Observable progress of a run, sent over an optional event channel.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    StateChanged(PipelineState),
    DeviceOpened { sample_rate: u32, buffer_frames: u32 },
    DeviceClosed,
    ChunkGenerated { index: usize, duration: Duration },
    ChunkPlaying { index: usize, duration: Duration },
    Failure(PipelineFailure),
}

/// High-level outcome of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every generated chunk was played.
    Completed,
    /// Input was empty; nothing was opened or synthesized.
    NothingToSpeak,
    /// Cancelled by the user or a signal.
    Interrupted,
    Failed(PipelineFailure),
}

/// Aggregated result of one pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineRunResult {
    pub outcome: RunOutcome,
    pub chunks_generated: usize,
    pub chunks_played: usize,
    pub final_state: PipelineState,
    pub elapsed: Duration,
}

impl PipelineRunResult {
    /// Result for empty input.
    pub fn nothing_to_speak() -> Self {
        Self {
            outcome: RunOutcome::NothingToSpeak,
            chunks_generated: 0,
            chunks_played: 0,
            final_state: PipelineState::Done,
            elapsed: Duration::ZERO,
        }
    }

    /// Completed or nothing to speak.
    pub fn is_success(&self) -> bool {
        matches!(
            self.outcome,
            RunOutcome::Completed | RunOutcome::NothingToSpeak
        )
    }

    pub fn failure(&self) -> Option<&PipelineFailure> {
        match &self.outcome {
            RunOutcome::Failed(failure) => Some(failure),
            _ => None,
        }
    }

    /// Process exit code: 0 success, 1 failure, 130 interrupted.
    pub fn exit_code(&self) -> i32 {
        match self.outcome {
            RunOutcome::Completed | RunOutcome::NothingToSpeak => 0,
            RunOutcome::Interrupted => 130,
            RunOutcome::Failed(_) => 1,
        }
    }
}
