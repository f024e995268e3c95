//! Terminal rendering of pipeline events and run outcomes.
//!
//! Status lines go to stderr so stdout stays clean for `config show` and
//! completions.

use crate::pipeline::{PipelineEvent, PipelineRunResult, PipelineState, RunOutcome};
use crossbeam_channel::Receiver;
use owo_colors::OwoColorize;
use std::thread::{self, JoinHandle};

/// Plain-text description of an event, or `None` for events not worth showing.
pub fn format_event(event: &PipelineEvent) -> Option<String> {
    match event {
        PipelineEvent::StateChanged(PipelineState::Idle) => None,
        PipelineEvent::StateChanged(state) => Some(format!("[{state}]")),
        PipelineEvent::DeviceOpened {
            sample_rate,
            buffer_frames,
        } => Some(format!(
            "Audio device opened ({sample_rate} Hz, {buffer_frames} frames)"
        )),
        PipelineEvent::DeviceClosed => Some("Audio device closed".to_string()),
        PipelineEvent::ChunkGenerated { index, duration } => Some(format!(
            "Chunk {} generated ({:.2}s)",
            index + 1,
            duration.as_secs_f32()
        )),
        PipelineEvent::ChunkPlaying { index, duration } => Some(format!(
            "Playing chunk {} ({:.2}s)",
            index + 1,
            duration.as_secs_f32()
        )),
        PipelineEvent::Failure(failure) => Some(failure.to_string()),
    }
}

/// Render one event to stderr.
pub fn render_event(event: &PipelineEvent) {
    let Some(line) = format_event(event) else {
        return;
    };
    match event {
        PipelineEvent::Failure(_) => eprintln!("{}", line.red()),
        PipelineEvent::StateChanged(_) => eprintln!("{}", line.dimmed()),
        _ => eprintln!("{line}"),
    }
}

/// Render events on a background thread until the sender side is dropped.
pub fn spawn_event_renderer(events: Receiver<PipelineEvent>) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("events".to_string())
        .spawn(move || {
            for event in events {
                render_event(&event);
            }
        })
}

/// One-line summary of a finished run.
pub fn format_outcome(result: &PipelineRunResult) -> String {
    match &result.outcome {
        RunOutcome::Completed => format!(
            "Done: {} chunk(s) spoken in {:.1}s",
            result.chunks_played,
            result.elapsed.as_secs_f32()
        ),
        RunOutcome::NothingToSpeak => "Nothing to speak".to_string(),
        RunOutcome::Interrupted => format!(
            "Interrupted after {} of {} chunk(s)",
            result.chunks_played, result.chunks_generated
        ),
        RunOutcome::Failed(failure) => format!(
            "Error: {failure} ({} of {} chunk(s) played)",
            result.chunks_played, result.chunks_generated
        ),
    }
}

/// Print the run summary to stderr. Failures are shown even when quiet.
pub fn render_outcome(result: &PipelineRunResult, quiet: bool) {
    let line = format_outcome(result);
    match result.outcome {
        RunOutcome::Failed(_) => eprintln!("{}", line.red()),
        _ if quiet => {}
        RunOutcome::Completed => eprintln!("{}", line.green()),
        RunOutcome::Interrupted => eprintln!("{}", line.yellow()),
        RunOutcome::NothingToSpeak => eprintln!("{}", line.dimmed()),
    }
}

/// Print a neutral status line unless quiet.
pub fn status(message: &str, quiet: bool) {
    if !quiet {
        eprintln!("{}", message.dimmed());
    }
}
