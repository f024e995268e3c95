//! Playback side of the pipeline.

use crate::audio::convert::resample;
use crate::audio::device::{CloseMode, OutputBackend, OutputDevice, OutputFormat};
use crate::error::Result;
use crate::pipeline::cancel::CancelToken;
use crate::pipeline::events::EventSink;
use crate::pipeline::queue::{PopError, QueueReceiver};
use crate::pipeline::types::{PipelineEvent, PipelineFailure, StreamItem};
use crossbeam_channel::Sender;
use std::sync::Arc;
use std::time::Duration;

/// What the consumer did, returned when its thread finishes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConsumerReport {
    /// Chunks fully written to the device.
    pub chunks_played: usize,
    pub failure: Option<PipelineFailure>,
    pub cancelled: bool,
    pub saw_end_of_stream: bool,
}

/// Result of opening the device, sent to the coordinator before playback starts.
pub type ArmedSignal = std::result::Result<(), PipelineFailure>;

/// Closes the device exactly once, on whichever path leaves the consumer.
struct DeviceGuard {
    device: Option<Box<dyn OutputDevice>>,
    events: EventSink,
}

impl DeviceGuard {
    fn write(&mut self, samples: &[f32]) -> Result<()> {
        match self.device.as_mut() {
            Some(device) => device.write(samples),
            None => Err(crate::error::SelspeakError::AudioWrite {
                message: "device already closed".to_string(),
            }),
        }
    }

    fn close(&mut self, mode: CloseMode) {
        let Some(mut device) = self.device.take() else {
            return;
        };
        match device.close(mode) {
            Ok(()) => tracing::info!("Closed audio device {} ({:?})", device.name(), mode),
            Err(e) => tracing::warn!("Closing audio device {} failed: {e}", device.name()),
        }
        self.events.emit(PipelineEvent::DeviceClosed);
    }
}

impl Drop for DeviceGuard {
    fn drop(&mut self) {
        self.close(CloseMode::Discard);
    }
}

/// Owns the output device and plays chunks from the audio queue.
pub struct PlaybackConsumer {
    backend: Arc<dyn OutputBackend>,
    format: OutputFormat,
    poll_interval: Duration,
    events: EventSink,
}

impl PlaybackConsumer {
    pub fn new(
        backend: Arc<dyn OutputBackend>,
        format: OutputFormat,
        poll_interval: Duration,
        events: EventSink,
    ) -> Self {
        Self {
            backend,
            format,
            poll_interval,
            events,
        }
    }

    /// Open the device, report through `armed`, then play until `EndOfStream`,
    /// a write failure, or cancellation.
    pub fn run(
        &self,
        queue: QueueReceiver,
        armed: Sender<ArmedSignal>,
        cancel: &CancelToken,
    ) -> ConsumerReport {
        let mut report = ConsumerReport::default();

        let device = match self.backend.open(&self.format) {
            Ok(device) => device,
            Err(e) => {
                tracing::error!("Cannot open audio device: {e}");
                let failure = PipelineFailure::DeviceUnavailable(e.to_string());
                report.failure = Some(failure.clone());
                if armed.send(Err(failure)).is_err() {
                    tracing::debug!("coordinator gone before device failure was reported");
                }
                return report;
            }
        };
        tracing::info!(
            "Opened audio device {} ({}Hz, {} frames/buffer)",
            device.name(),
            self.format.sample_rate,
            self.format.buffer_frames
        );
        self.events.emit(PipelineEvent::DeviceOpened {
            sample_rate: self.format.sample_rate,
            buffer_frames: self.format.buffer_frames,
        });
        let mut guard = DeviceGuard {
            device: Some(device),
            events: self.events.clone(),
        };
        if armed.send(Ok(())).is_err() {
            tracing::debug!("coordinator gone after device was armed");
        }

        self.play(&queue, &mut guard, cancel, &mut report);

        // unblock a producer waiting on a full queue before draining the device
        drop(queue);

        let mode = if report.saw_end_of_stream && report.failure.is_none() && !cancel.is_cancelled()
        {
            CloseMode::Drain
        } else {
            CloseMode::Discard
        };
        guard.close(mode);
        report
    }

    fn play(
        &self,
        queue: &QueueReceiver,
        guard: &mut DeviceGuard,
        cancel: &CancelToken,
        report: &mut ConsumerReport,
    ) {
        loop {
            if cancel.is_cancelled() {
                tracing::debug!("playback cancelled after {} chunk(s)", report.chunks_played);
                report.cancelled = true;
                return;
            }

            let chunk = match queue.pop_timeout(self.poll_interval) {
                Ok(StreamItem::Chunk(chunk)) => chunk,
                Ok(StreamItem::EndOfStream) => {
                    tracing::debug!("end of stream after {} chunk(s)", report.chunks_played);
                    report.saw_end_of_stream = true;
                    return;
                }
                Err(PopError::Timeout) => continue,
                Err(PopError::Disconnected) => {
                    tracing::warn!("synthesis stopped without end of stream");
                    return;
                }
            };

            if chunk.samples.is_empty() {
                tracing::warn!("skipping empty chunk {}", chunk.index + 1);
                continue;
            }

            let duration = chunk.duration();
            tracing::info!(
                "Playing chunk {} ({:.2}s)",
                chunk.index + 1,
                duration.as_secs_f32()
            );
            self.events.emit(PipelineEvent::ChunkPlaying {
                index: chunk.index,
                duration,
            });

            let written = if chunk.sample_rate == self.format.sample_rate {
                guard.write(&chunk.samples)
            } else {
                guard.write(&resample(
                    &chunk.samples,
                    chunk.sample_rate,
                    self.format.sample_rate,
                ))
            };
            if let Err(e) = written {
                tracing::error!("Writing chunk {} failed: {e}", chunk.index + 1);
                report.failure = Some(PipelineFailure::DeviceWriteFailure(e.to_string()));
                return;
            }
            report.chunks_played += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::device::MockOutput;
    use crate::pipeline::queue::bounded_audio_queue;
    use crate::pipeline::types::AudioChunk;

    fn consumer(backend: &MockOutput) -> PlaybackConsumer {
        PlaybackConsumer::new(
            Arc::new(backend.clone()),
            OutputFormat::mono(24000, 2048),
            Duration::from_millis(5),
            EventSink::disabled(),
        )
    }

    fn chunk(index: usize) -> AudioChunk {
        AudioChunk::new(index, vec![index as f32 * 0.1; 4], 24000)
    }

    #[test]
    fn plays_until_end_of_stream_and_drains() {
        let backend = MockOutput::new();
        let (tx, rx) = bounded_audio_queue(4);
        tx.push(chunk(0)).unwrap();
        tx.push(chunk(1)).unwrap();
        assert!(tx.finish());
        let (armed_tx, armed_rx) = crossbeam_channel::bounded(1);

        let report = consumer(&backend).run(rx, armed_tx, &CancelToken::new());

        assert_eq!(armed_rx.recv().unwrap(), Ok(()));
        assert_eq!(report.chunks_played, 2);
        assert!(report.saw_end_of_stream);
        assert_eq!(backend.written(), vec![vec![0.0; 4], vec![0.1; 4]]);
        assert_eq!(backend.close_modes(), vec![CloseMode::Drain]);
    }

    #[test]
    fn open_failure_is_reported_through_armed_channel() {
        let backend = MockOutput::new().with_open_failure();
        let (_tx, rx) = bounded_audio_queue(4);
        let (armed_tx, armed_rx) = crossbeam_channel::bounded(1);

        let report = consumer(&backend).run(rx, armed_tx, &CancelToken::new());

        assert!(matches!(
            armed_rx.recv().unwrap(),
            Err(PipelineFailure::DeviceUnavailable(_))
        ));
        assert!(matches!(
            report.failure,
            Some(PipelineFailure::DeviceUnavailable(_))
        ));
        assert_eq!(backend.closes(), 0);
    }

    #[test]
    fn write_failure_stops_and_discards() {
        let backend = MockOutput::new().with_write_failure_at(1);
        let (tx, rx) = bounded_audio_queue(4);
        for i in 0..3 {
            tx.push(chunk(i)).unwrap();
        }
        let (armed_tx, _armed_rx) = crossbeam_channel::bounded(1);

        let report = consumer(&backend).run(rx, armed_tx, &CancelToken::new());

        assert_eq!(report.chunks_played, 1);
        assert!(matches!(
            report.failure,
            Some(PipelineFailure::DeviceWriteFailure(_))
        ));
        assert_eq!(backend.close_modes(), vec![CloseMode::Discard]);
        assert!(tx.push(chunk(3)).is_err(), "queue closed after consumer exit");
    }

    #[test]
    fn cancellation_drops_queued_chunks() {
        let backend = MockOutput::new();
        let (tx, rx) = bounded_audio_queue(4);
        tx.push(chunk(0)).unwrap();
        let (armed_tx, _armed_rx) = crossbeam_channel::bounded(1);
        let cancel = CancelToken::new();
        cancel.cancel();

        let report = consumer(&backend).run(rx, armed_tx, &cancel);

        assert!(report.cancelled);
        assert_eq!(report.chunks_played, 0);
        assert_eq!(backend.closes(), 1);
        assert_eq!(backend.close_modes(), vec![CloseMode::Discard]);
    }

    #[test]
    fn producer_disconnect_without_end_of_stream_ends_playback() {
        let backend = MockOutput::new();
        let (tx, rx) = bounded_audio_queue(4);
        tx.push(chunk(0)).unwrap();
        drop(tx);
        let (armed_tx, _armed_rx) = crossbeam_channel::bounded(1);

        let report = consumer(&backend).run(rx, armed_tx, &CancelToken::new());

        assert_eq!(report.chunks_played, 1);
        assert!(!report.saw_end_of_stream);
        assert_eq!(backend.closes(), 1);
    }
}
