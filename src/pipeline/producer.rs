//! Synthesis side of the pipeline.

use crate::audio::convert::to_pipeline_samples;
use crate::pipeline::cancel::CancelToken;
use crate::pipeline::events::EventSink;
use crate::pipeline::queue::{PushError, QueueSender};
use crate::pipeline::types::{AudioChunk, PipelineEvent, PipelineFailure, TextInput};
use crate::synth::synthesizer::{SynthesisParams, Synthesizer};
use std::sync::Arc;
use std::time::Duration;

/// What the producer did, returned when its thread finishes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProducerReport {
    /// Chunks pushed into the queue.
    pub chunks_generated: usize,
    pub failure: Option<PipelineFailure>,
    pub cancelled: bool,
    /// EndOfStream reached the queue.
    pub end_of_stream_sent: bool,
}

/// Drives a [`Synthesizer`] over the input text and feeds the audio queue.
pub struct SynthesisProducer {
    synthesizer: Arc<dyn Synthesizer>,
    params: SynthesisParams,
    sample_rate: u32,
    poll_interval: Duration,
    events: EventSink,
}

impl SynthesisProducer {
    pub fn new(
        synthesizer: Arc<dyn Synthesizer>,
        params: SynthesisParams,
        sample_rate: u32,
        poll_interval: Duration,
        events: EventSink,
    ) -> Self {
        Self {
            synthesizer,
            params,
            sample_rate,
            poll_interval,
            events,
        }
    }

    /// Synthesize `text` chunk by chunk into `queue`.
    ///
    /// `EndOfStream` is sent exactly once on every path where the consumer is
    /// still listening, including failures and cancellation.
    pub fn run(&self, text: &TextInput, queue: QueueSender, cancel: &CancelToken) -> ProducerReport {
        let mut report = ProducerReport::default();
        let consumer_alive = self.produce(text, &queue, cancel, &mut report);

        report.end_of_stream_sent = consumer_alive && queue.finish();
        if consumer_alive && !report.end_of_stream_sent {
            tracing::debug!("EndOfStream not delivered: playback already stopped");
        }
        report
    }

    /// Returns false if the consumer went away.
    fn produce(
        &self,
        text: &TextInput,
        queue: &QueueSender,
        cancel: &CancelToken,
        report: &mut ProducerReport,
    ) -> bool {
        if cancel.is_cancelled() {
            report.cancelled = true;
            return true;
        }

        let source_rate = self.synthesizer.sample_rate();
        let mut chunks = match self
            .synthesizer
            .synthesize(text.as_str(), &self.params, cancel)
        {
            Ok(chunks) => chunks,
            Err(e) => {
                tracing::error!("{} failed to start: {e}", self.synthesizer.name());
                report.failure = Some(PipelineFailure::SynthesisFailure(e.to_string()));
                return true;
            }
        };

        loop {
            if cancel.is_cancelled() {
                tracing::debug!("synthesis cancelled after {} chunk(s)", report.chunks_generated);
                report.cancelled = true;
                return true;
            }

            let next = chunks.next();
            // Whatever the engine returned after cancellation is discarded.
            if cancel.is_cancelled() {
                tracing::debug!("synthesis cancelled after {} chunk(s)", report.chunks_generated);
                report.cancelled = true;
                return true;
            }

            let raw = match next {
                None => return true,
                Some(Ok(raw)) => raw,
                Some(Err(e)) => {
                    tracing::error!(
                        "synthesis failed after {} chunk(s): {e}",
                        report.chunks_generated
                    );
                    report.failure = Some(PipelineFailure::SynthesisFailure(e.to_string()));
                    return true;
                }
            };

            let samples = to_pipeline_samples(raw, source_rate, self.sample_rate);
            if samples.is_empty() {
                tracing::debug!("skipping empty synthesis chunk");
                continue;
            }

            let chunk = AudioChunk::new(report.chunks_generated, samples, self.sample_rate);
            let index = chunk.index;
            let duration = chunk.duration();

            match queue.push_cancellable(chunk, cancel, self.poll_interval) {
                Ok(()) => {
                    report.chunks_generated += 1;
                    tracing::info!(
                        "Chunk {} generated ({:.2}s of audio)",
                        index + 1,
                        duration.as_secs_f32()
                    );
                    self.events
                        .emit(PipelineEvent::ChunkGenerated { index, duration });
                }
                Err(PushError::Cancelled) => {
                    report.cancelled = true;
                    return true;
                }
                Err(PushError::Disconnected) => {
                    tracing::debug!("playback stopped; abandoning synthesis");
                    return false;
                }
            }
        }
    }
}
