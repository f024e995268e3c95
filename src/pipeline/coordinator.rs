//! Runs one speech request: playback thread first, then synthesis.

use crate::audio::device::{OutputBackend, OutputFormat};
use crate::config::Config;
use crate::defaults;
use crate::pipeline::cancel::CancelToken;
use crate::pipeline::consumer::{ArmedSignal, ConsumerReport, PlaybackConsumer};
use crate::pipeline::events::EventSink;
use crate::pipeline::producer::{ProducerReport, SynthesisProducer};
use crate::pipeline::queue::bounded_audio_queue;
use crate::pipeline::types::{
    PipelineEvent, PipelineFailure, PipelineRunResult, PipelineState, RunOutcome, TextInput,
};
use crate::synth::synthesizer::{SynthesisParams, Synthesizer};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use std::any::Any;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Configuration for the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Playback sample rate; every chunk is converted to it.
    pub sample_rate: u32,
    pub buffer_frames: u32,
    pub queue_capacity: usize,
    /// Pause between arming the device and starting synthesis.
    pub settle: Duration,
    /// How often blocked workers re-check cancellation.
    pub poll_interval: Duration,
    /// How long a cancelled run waits for synthesis to stop before leaving
    /// the synthesis thread behind.
    pub cancel_grace: Duration,
    pub params: SynthesisParams,
}

impl PipelineConfig {
    /// Build from the loaded configuration. `Auto` compute is resolved here.
    pub fn from_config(config: &Config) -> Self {
        Self {
            sample_rate: config.playback.sample_rate,
            buffer_frames: config.playback.buffer_frames,
            queue_capacity: config.playback.queue_capacity,
            settle: config.playback.settle(),
            poll_interval: Duration::from_millis(defaults::POLL_INTERVAL_MS),
            cancel_grace: Duration::from_millis(defaults::CANCEL_GRACE_MS),
            params: SynthesisParams {
                voice: config.synthesis.voice.clone(),
                speed: config.synthesis.speed,
                compute: config.synthesis.compute.resolve(),
            },
        }
    }

    pub fn output_format(&self) -> OutputFormat {
        OutputFormat::mono(self.sample_rate, self.buffer_frames)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sample_rate: defaults::SAMPLE_RATE,
            buffer_frames: defaults::BUFFER_FRAMES,
            queue_capacity: defaults::QUEUE_CAPACITY,
            settle: Duration::from_millis(defaults::SETTLE_MS),
            poll_interval: Duration::from_millis(defaults::POLL_INTERVAL_MS),
            cancel_grace: Duration::from_millis(defaults::CANCEL_GRACE_MS),
            params: SynthesisParams {
                voice: defaults::DEFAULT_VOICE.to_string(),
                speed: defaults::DEFAULT_SPEED,
                compute: crate::synth::synthesizer::ComputeDevice::Cpu,
            },
        }
    }
}

fn panic_message(panic_info: &(dyn Any + Send)) -> String {
    panic_info
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic_info.downcast_ref::<String>().map(|s| s.as_str()))
        .unwrap_or("unknown panic")
        .to_string()
}

/// Tracks the state machine and reports each transition.
struct StateTracker<'a> {
    state: PipelineState,
    events: &'a EventSink,
}

impl<'a> StateTracker<'a> {
    fn new(events: &'a EventSink) -> Self {
        events.emit(PipelineEvent::StateChanged(PipelineState::Idle));
        Self {
            state: PipelineState::Idle,
            events,
        }
    }

    fn enter(&mut self, next: PipelineState) {
        if self.state == next {
            return;
        }
        tracing::debug!("pipeline {} -> {}", self.state, next);
        self.state = next;
        self.events.emit(PipelineEvent::StateChanged(next));
    }
}

/// Streaming speech pipeline: Synthesizer → bounded queue → output device.
pub struct Pipeline {
    config: PipelineConfig,
    synthesizer: Arc<dyn Synthesizer>,
    backend: Arc<dyn OutputBackend>,
    events: EventSink,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        synthesizer: Arc<dyn Synthesizer>,
        backend: Arc<dyn OutputBackend>,
    ) -> Self {
        Self {
            config,
            synthesizer,
            backend,
            events: EventSink::disabled(),
        }
    }

    /// Stream progress events to `tx` (non-blocking; events are dropped when full).
    pub fn with_event_sender(mut self, tx: Sender<PipelineEvent>) -> Self {
        self.events = EventSink::new(tx);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Speak `text`, blocking until playback finishes, fails or is cancelled.
    ///
    /// Empty or whitespace-only text returns immediately without touching the
    /// device or the synthesizer.
    pub fn run(&self, text: &str, cancel: &CancelToken) -> PipelineRunResult {
        match TextInput::new(text) {
            Some(input) => self.run_input(input, cancel),
            None => {
                tracing::info!("Nothing to speak");
                PipelineRunResult::nothing_to_speak()
            }
        }
    }

    /// Speak validated input.
    pub fn run_input(&self, input: TextInput, cancel: &CancelToken) -> PipelineRunResult {
        let started = Instant::now();
        let mut tracker = StateTracker::new(&self.events);
        tracing::info!(
            "Speaking {} characters with {} (voice {}, speed {}, {})",
            input.char_count(),
            self.synthesizer.name(),
            self.config.params.voice,
            self.config.params.speed,
            self.config.params.compute
        );

        let (queue_tx, queue_rx) = bounded_audio_queue(self.config.queue_capacity);
        let (armed_tx, armed_rx) = bounded::<ArmedSignal>(1);

        let consumer = PlaybackConsumer::new(
            Arc::clone(&self.backend),
            self.config.output_format(),
            self.config.poll_interval,
            self.events.clone(),
        );
        let consumer_cancel = cancel.clone();
        let consumer_handle = match thread::Builder::new()
            .name("playback".to_string())
            .spawn(move || consumer.run(queue_rx, armed_tx, &consumer_cancel))
        {
            Ok(handle) => handle,
            Err(e) => {
                return self.finish(
                    &mut tracker,
                    Some(PipelineFailure::Internal(format!(
                        "failed to spawn playback thread: {e}"
                    ))),
                    false,
                    ProducerReport::default(),
                    ConsumerReport::default(),
                    started,
                );
            }
        };

        // The producer must not start before the device is armed.
        let armed = armed_rx.recv().unwrap_or_else(|_| {
            Err(PipelineFailure::Internal(
                "playback thread exited before opening the device".to_string(),
            ))
        });
        if let Err(failure) = armed {
            drop(queue_tx);
            let consumer_report = join_consumer(consumer_handle);
            return self.finish(
                &mut tracker,
                Some(consumer_report.failure.clone().unwrap_or(failure)),
                false,
                ProducerReport::default(),
                consumer_report,
                started,
            );
        }
        tracker.enter(PipelineState::DeviceArmed);

        if !settle(self.config.settle, self.config.poll_interval, cancel) {
            let delivered = queue_tx.finish();
            tracing::debug!("cancelled while settling (end of stream delivered: {delivered})");
            let consumer_report = join_consumer(consumer_handle);
            return self.finish(
                &mut tracker,
                consumer_report.failure.clone(),
                true,
                ProducerReport::default(),
                consumer_report,
                started,
            );
        }
        tracker.enter(PipelineState::Streaming);

        let producer = SynthesisProducer::new(
            Arc::clone(&self.synthesizer),
            self.config.params.clone(),
            self.config.sample_rate,
            self.config.poll_interval,
            self.events.clone(),
        );
        let producer_cancel = cancel.clone();
        let (report_tx, report_rx) = bounded::<ProducerReport>(1);
        let producer_result = thread::Builder::new()
            .name("synthesis".to_string())
            .spawn(move || {
                let report = producer.run(&input, queue_tx, &producer_cancel);
                if report_tx.send(report).is_err() {
                    tracing::debug!("synthesis finished after the run was abandoned");
                }
            });

        let producer_report = match producer_result {
            Ok(handle) => self.wait_producer(handle, &report_rx, cancel),
            Err(e) => Some(ProducerReport {
                failure: Some(PipelineFailure::Internal(format!(
                    "failed to spawn synthesis thread: {e}"
                ))),
                ..ProducerReport::default()
            }),
        };
        // Queued audio still plays out after a synthesis failure.
        if producer_report
            .as_ref()
            .is_some_and(|report| report.end_of_stream_sent)
            && !cancel.is_cancelled()
        {
            tracker.enter(PipelineState::Draining);
        }

        let consumer_report = join_consumer(consumer_handle);
        let producer_report = producer_report.unwrap_or_else(|| ProducerReport {
            chunks_generated: consumer_report.chunks_played,
            cancelled: true,
            ..ProducerReport::default()
        });

        // A device failure usually explains a producer that stopped early.
        let failure = consumer_report
            .failure
            .clone()
            .or_else(|| producer_report.failure.clone());
        let interrupted =
            cancel.is_cancelled() || producer_report.cancelled || consumer_report.cancelled;
        self.finish(
            &mut tracker,
            failure,
            interrupted,
            producer_report,
            consumer_report,
            started,
        )
    }

    /// Wait for the synthesis thread's report.
    ///
    /// After cancellation the thread gets `cancel_grace` to stop; an engine
    /// call that ignores cancellation is then left running and `None` is
    /// returned so the run can end.
    fn wait_producer(
        &self,
        handle: JoinHandle<()>,
        reports: &Receiver<ProducerReport>,
        cancel: &CancelToken,
    ) -> Option<ProducerReport> {
        let mut abandon_at: Option<Instant> = None;
        loop {
            match reports.recv_timeout(self.config.poll_interval) {
                Ok(report) => {
                    if handle.join().is_err() {
                        tracing::warn!("synthesis thread panicked after reporting");
                    }
                    return Some(report);
                }
                Err(RecvTimeoutError::Disconnected) => return Some(join_producer(handle)),
                Err(RecvTimeoutError::Timeout) => {}
            }
            if cancel.is_cancelled() {
                let grace = self
                    .config
                    .cancel_grace
                    .min(Duration::from_millis(defaults::MAX_WAIT_MS));
                let deadline = *abandon_at.get_or_insert_with(|| Instant::now() + grace);
                if Instant::now() >= deadline {
                    tracing::warn!(
                        "synthesis did not stop within {grace:?} of cancellation; leaving it behind"
                    );
                    return None;
                }
            }
        }
    }

    fn finish(
        &self,
        tracker: &mut StateTracker<'_>,
        failure: Option<PipelineFailure>,
        interrupted: bool,
        producer: ProducerReport,
        consumer: ConsumerReport,
        started: Instant,
    ) -> PipelineRunResult {
        let failure = failure.or_else(|| {
            (!interrupted && !consumer.saw_end_of_stream).then(|| {
                PipelineFailure::Internal(format!(
                    "playback ended early: {} of {} chunk(s) played",
                    consumer.chunks_played, producer.chunks_generated
                ))
            })
        });

        let outcome = match failure {
            Some(failure) => {
                self.events.emit(PipelineEvent::Failure(failure.clone()));
                tracker.enter(PipelineState::Failed);
                RunOutcome::Failed(failure)
            }
            None => {
                tracker.enter(PipelineState::Done);
                if interrupted {
                    RunOutcome::Interrupted
                } else {
                    RunOutcome::Completed
                }
            }
        };

        let result = PipelineRunResult {
            outcome,
            chunks_generated: producer.chunks_generated,
            chunks_played: consumer.chunks_played,
            final_state: tracker.state,
            elapsed: started.elapsed(),
        };
        tracing::info!(
            "Pipeline finished: {:?}, {}/{} chunk(s) played in {:.2}s",
            result.outcome,
            result.chunks_played,
            result.chunks_generated,
            result.elapsed.as_secs_f32()
        );
        result
    }

    /// Run on a background thread.
    pub fn spawn(self: Arc<Self>, text: String) -> crate::error::Result<PipelineHandle> {
        let cancel = CancelToken::new();
        let run_cancel = cancel.clone();
        let thread = thread::Builder::new()
            .name("pipeline".to_string())
            .spawn(move || self.run(&text, &run_cancel))?;
        Ok(PipelineHandle { cancel, thread })
    }
}

/// Sleep for `duration` in slices; returns false if cancelled meanwhile.
fn settle(duration: Duration, slice: Duration, cancel: &CancelToken) -> bool {
    // An unrepresentable deadline means waiting until cancelled.
    let deadline = Instant::now().checked_add(duration);
    loop {
        if cancel.is_cancelled() {
            return false;
        }
        let now = Instant::now();
        match deadline {
            Some(deadline) if now >= deadline => return true,
            Some(deadline) => thread::sleep(slice.min(deadline - now)),
            None => thread::sleep(slice),
        }
    }
}

/// Join a synthesis thread that ended without sending its report.
fn join_producer(handle: JoinHandle<()>) -> ProducerReport {
    let msg = match handle.join() {
        Ok(()) => "synthesis thread exited without a report".to_string(),
        Err(panic_info) => format!(
            "synthesis thread panicked: {}",
            panic_message(panic_info.as_ref())
        ),
    };
    tracing::error!("{msg}");
    ProducerReport {
        failure: Some(PipelineFailure::Internal(msg)),
        ..ProducerReport::default()
    }
}

fn join_consumer(handle: JoinHandle<ConsumerReport>) -> ConsumerReport {
    handle.join().unwrap_or_else(|panic_info| {
        let msg = panic_message(panic_info.as_ref());
        tracing::error!("playback thread panicked: {msg}");
        ConsumerReport {
            failure: Some(PipelineFailure::Internal(format!(
                "playback thread panicked: {msg}"
            ))),
            ..ConsumerReport::default()
        }
    })
}

/// Handle to a pipeline running on a background thread.
pub struct PipelineHandle {
    cancel: CancelToken,
    thread: JoinHandle<PipelineRunResult>,
}

impl PipelineHandle {
    /// Request cooperative cancellation.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token that cancels this run; can be moved to a signal handler.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the run to end.
    pub fn wait(self) -> PipelineRunResult {
        let started = Instant::now();
        self.thread.join().unwrap_or_else(|panic_info| {
            let msg = panic_message(panic_info.as_ref());
            tracing::error!("pipeline thread panicked: {msg}");
            PipelineRunResult {
                outcome: RunOutcome::Failed(PipelineFailure::Internal(msg)),
                chunks_generated: 0,
                chunks_played: 0,
                final_state: PipelineState::Failed,
                elapsed: started.elapsed(),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::device::MockOutput;
    use crate::synth::synthesizer::MockSynthesizer;

    fn test_config() -> PipelineConfig {
        PipelineConfig {
            settle: Duration::from_millis(10),
            poll_interval: Duration::from_millis(5),
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn from_config_copies_playback_settings() {
        let mut config = Config::default();
        config.playback.queue_capacity = 3;
        config.playback.settle_ms = 250;
        config.synthesis.voice = "v".to_string();
        config.synthesis.compute = crate::synth::synthesizer::ComputeDevice::Cpu;

        let pc = PipelineConfig::from_config(&config);
        assert_eq!(pc.queue_capacity, 3);
        assert_eq!(pc.settle, Duration::from_millis(250));
        assert_eq!(pc.params.voice, "v");
        assert_eq!(pc.cancel_grace, Duration::from_millis(defaults::CANCEL_GRACE_MS));
        assert_eq!(pc.output_format(), OutputFormat::mono(24000, 2048));
    }

    #[test]
    fn settle_returns_early_on_cancel() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let started = Instant::now();
        assert!(!settle(Duration::from_secs(5), Duration::from_millis(5), &cancel));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(settle(Duration::ZERO, Duration::from_millis(5), &CancelToken::new()));
        assert!(!settle(Duration::MAX, Duration::from_millis(5), &cancel));
    }

    #[test]
    fn panic_message_extracts_str_and_string() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "bang");
        let boxed: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }

    #[test]
    fn spawned_pipeline_can_be_cancelled() {
        let synth = MockSynthesizer::new(24000)
            .with_chunk_count(100)
            .with_chunk_delay(Duration::from_millis(20));
        let backend = MockOutput::new();
        let pipeline = Arc::new(Pipeline::new(
            test_config(),
            Arc::new(synth),
            Arc::new(backend.clone()),
        ));

        let handle = pipeline.spawn("Long text.".to_string()).unwrap();
        thread::sleep(Duration::from_millis(100));
        handle.cancel();
        let result = handle.wait();

        assert_eq!(result.outcome, RunOutcome::Interrupted);
        assert_eq!(result.exit_code(), 130);
        assert_eq!(backend.closes(), 1);
    }
}
