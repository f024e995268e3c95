use crate::error::{Result, SelspeakError};
use crate::pipeline::cancel::CancelToken;
use crate::synth::sentences::split_sentences;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Raw audio as produced by a synthesis engine, before conversion to the
/// pipeline's mono f32 format.
#[derive(Debug, Clone, PartialEq)]
pub enum RawAudio {
    F32(Vec<f32>),
    I16(Vec<i16>),
}

impl RawAudio {
    pub fn len(&self) -> usize {
        match self {
            RawAudio::F32(s) => s.len(),
            RawAudio::I16(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Lazy, one-shot sequence of synthesized chunks.
///
/// Each call to `next` may block while the engine works on the next unit.
pub type ChunkStream<'a> = Box<dyn Iterator<Item = Result<RawAudio>> + Send + 'a>;

/// Where the synthesis engine should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ComputeDevice {
    /// GPU when one is detected, otherwise CPU.
    #[default]
    Auto,
    Gpu,
    Cpu,
}

impl ComputeDevice {
    /// Resolves `Auto` using the local GPU probe.
    pub fn resolve(self) -> ComputeDevice {
        self.resolve_with(crate::sys::gpu_available())
    }

    /// Resolves `Auto` against an explicit probe result.
    pub fn resolve_with(self, gpu_available: bool) -> ComputeDevice {
        match self {
            ComputeDevice::Auto if gpu_available => ComputeDevice::Gpu,
            ComputeDevice::Auto => {
                tracing::warn!("GPU not available, using CPU (slower)");
                ComputeDevice::Cpu
            }
            other => other,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ComputeDevice::Auto => "auto",
            ComputeDevice::Gpu => "gpu",
            ComputeDevice::Cpu => "cpu",
        }
    }
}

impl fmt::Display for ComputeDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComputeDevice {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(ComputeDevice::Auto),
            "gpu" | "cuda" => Ok(ComputeDevice::Gpu),
            "cpu" => Ok(ComputeDevice::Cpu),
            other => Err(format!(
                "unknown compute device '{other}' (expected auto, gpu or cpu)"
            )),
        }
    }
}

/// Per-run synthesis parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisParams {
    pub voice: String,
    /// Speaking rate multiplier; 1.0 is the voice's natural speed.
    pub speed: f32,
    pub compute: ComputeDevice,
}

/// Trait for text-to-speech engines.
///
/// Implementations may be expensive to construct (model loading), so one
/// instance is created per process and shared across runs.
pub trait Synthesizer: Send + Sync {
    /// Start synthesizing `text`.
    ///
    /// Errors returned here mean the engine could not start at all. Errors
    /// yielded by the stream are mid-sequence failures. Once `cancel` is set,
    /// a unit in progress should be abandoned promptly; the stream may then
    /// end or yield [`SelspeakError::SynthesisCancelled`].
    fn synthesize<'a>(
        &'a self,
        text: &'a str,
        params: &SynthesisParams,
        cancel: &CancelToken,
    ) -> Result<ChunkStream<'a>>;

    /// Sample rate of the audio this engine yields.
    fn sample_rate(&self) -> u32;

    /// Short engine name for logs.
    fn name(&self) -> &str;
}

/// Implement Synthesizer for Arc<T> to allow sharing across runs.
impl<T: Synthesizer + ?Sized> Synthesizer for Arc<T> {
    fn synthesize<'a>(
        &'a self,
        text: &'a str,
        params: &SynthesisParams,
        cancel: &CancelToken,
    ) -> Result<ChunkStream<'a>> {
        (**self).synthesize(text, params, cancel)
    }

    fn sample_rate(&self) -> u32 {
        (**self).sample_rate()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Mock synthesizer for testing
///
/// By default yields one chunk per sentence. Chunk `i` is filled with the
/// value `(i + 1) * 0.01`, so tests can tell chunks apart after playback.
#[derive(Debug, Clone)]
pub struct MockSynthesizer {
    sample_rate: u32,
    samples_per_chunk: usize,
    chunk_count: Option<usize>,
    fail_after: Option<usize>,
    fail_on_start: bool,
    empty_chunks: Vec<usize>,
    chunk_delay: Duration,
    ignore_cancel: bool,
    synthesize_calls: Arc<AtomicUsize>,
    chunks_requested: Arc<AtomicUsize>,
}

impl MockSynthesizer {
    /// Create a new mock synthesizer producing audio at `sample_rate`.
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            samples_per_chunk: 240,
            chunk_count: None,
            fail_after: None,
            fail_on_start: false,
            empty_chunks: Vec::new(),
            chunk_delay: Duration::ZERO,
            ignore_cancel: false,
            synthesize_calls: Arc::new(AtomicUsize::new(0)),
            chunks_requested: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Yield exactly `count` chunks regardless of the text.
    pub fn with_chunk_count(mut self, count: usize) -> Self {
        self.chunk_count = Some(count);
        self
    }

    /// Number of samples in every chunk.
    pub fn with_samples_per_chunk(mut self, samples: usize) -> Self {
        self.samples_per_chunk = samples;
        self
    }

    /// Yield an error instead of chunk `k` (after `k` good chunks).
    pub fn with_failure_after(mut self, k: usize) -> Self {
        self.fail_after = Some(k);
        self
    }

    /// Fail before yielding anything.
    pub fn with_start_failure(mut self) -> Self {
        self.fail_on_start = true;
        self
    }

    /// Yield an empty buffer at position `index`.
    pub fn with_empty_chunk_at(mut self, index: usize) -> Self {
        self.empty_chunks.push(index);
        self
    }

    /// Sleep this long before yielding each chunk.
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    /// Sleep through the chunk delay even after cancellation, like an engine
    /// that cannot be interrupted.
    pub fn with_cancel_ignored(mut self) -> Self {
        self.ignore_cancel = true;
        self
    }

    /// Number of `synthesize` calls so far.
    pub fn synthesize_calls(&self) -> usize {
        self.synthesize_calls.load(Ordering::SeqCst)
    }

    /// Number of times the chunk stream was advanced.
    pub fn chunks_requested(&self) -> usize {
        self.chunks_requested.load(Ordering::SeqCst)
    }

    /// Sample value used for chunk `index`.
    pub fn marker_for(index: usize) -> f32 {
        (index + 1) as f32 * 0.01
    }
}

impl Synthesizer for MockSynthesizer {
    fn synthesize<'a>(
        &'a self,
        text: &'a str,
        _params: &SynthesisParams,
        cancel: &CancelToken,
    ) -> Result<ChunkStream<'a>> {
        self.synthesize_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_on_start {
            return Err(SelspeakError::Synthesis {
                message: "mock synthesizer failed to start".to_string(),
            });
        }
        let total = self
            .chunk_count
            .unwrap_or_else(|| split_sentences(text, usize::MAX).len());

        let cancel = cancel.clone();
        let mut index = 0;
        Ok(Box::new(std::iter::from_fn(move || {
            self.chunks_requested.fetch_add(1, Ordering::SeqCst);
            if self.fail_after == Some(index) {
                index += 1;
                return Some(Err(SelspeakError::Synthesis {
                    message: format!("mock synthesis failure at chunk {}", index - 1),
                }));
            }
            if index >= total || self.fail_after.is_some_and(|k| index > k) {
                return None;
            }
            if !self.chunk_delay.is_zero() {
                if self.ignore_cancel {
                    std::thread::sleep(self.chunk_delay);
                } else if !sleep_unless_cancelled(self.chunk_delay, &cancel) {
                    return Some(Err(SelspeakError::SynthesisCancelled));
                }
            }
            let samples = if self.empty_chunks.contains(&index) {
                Vec::new()
            } else {
                vec![Self::marker_for(index); self.samples_per_chunk]
            };
            index += 1;
            Some(Ok(RawAudio::F32(samples)))
        })))
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Returns false if `cancel` was set before `duration` elapsed.
fn sleep_unless_cancelled(duration: Duration, cancel: &CancelToken) -> bool {
    let deadline = Instant::now().checked_add(duration);
    loop {
        if cancel.is_cancelled() {
            return false;
        }
        let now = Instant::now();
        let left = match deadline {
            Some(deadline) if now >= deadline => return true,
            Some(deadline) => deadline - now,
            None => Duration::MAX,
        };
        std::thread::sleep(left.min(Duration::from_millis(5)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> SynthesisParams {
        SynthesisParams {
            voice: "test".to_string(),
            speed: 1.0,
            compute: ComputeDevice::Cpu,
        }
    }

    #[test]
    fn compute_device_parses_and_displays() {
        assert_eq!("GPU".parse::<ComputeDevice>(), Ok(ComputeDevice::Gpu));
        assert_eq!("cuda".parse::<ComputeDevice>(), Ok(ComputeDevice::Gpu));
        assert_eq!(" cpu ".parse::<ComputeDevice>(), Ok(ComputeDevice::Cpu));
        assert!("tpu".parse::<ComputeDevice>().is_err());
        assert_eq!(ComputeDevice::Auto.to_string(), "auto");
    }

    #[test]
    fn auto_resolves_by_probe() {
        assert_eq!(ComputeDevice::Auto.resolve_with(true), ComputeDevice::Gpu);
        assert_eq!(ComputeDevice::Auto.resolve_with(false), ComputeDevice::Cpu);
        assert_eq!(ComputeDevice::Gpu.resolve_with(false), ComputeDevice::Gpu);
        assert_eq!(ComputeDevice::Cpu.resolve_with(true), ComputeDevice::Cpu);
    }

    #[test]
    fn mock_yields_one_chunk_per_sentence_by_default() {
        let synth = MockSynthesizer::new(24000);
        let chunks: Vec<_> = synth
            .synthesize("One. Two! Three?", &params(), &CancelToken::new())
            .unwrap()
            .collect();
        assert_eq!(chunks.len(), 3);
        assert_eq!(synth.synthesize_calls(), 1);
    }

    #[test]
    fn mock_chunks_carry_index_markers() {
        let synth = MockSynthesizer::new(24000)
            .with_chunk_count(2)
            .with_samples_per_chunk(4);
        let chunks: Vec<RawAudio> = synth
            .synthesize("Hello world.", &params(), &CancelToken::new())
            .unwrap()
            .map(|c| c.unwrap())
            .collect();
        assert_eq!(
            chunks,
            vec![
                RawAudio::F32(vec![MockSynthesizer::marker_for(0); 4]),
                RawAudio::F32(vec![MockSynthesizer::marker_for(1); 4]),
            ]
        );
    }

    #[test]
    fn mock_failure_after_k_chunks_then_ends() {
        let synth = MockSynthesizer::new(24000)
            .with_chunk_count(5)
            .with_failure_after(1);
        let results: Vec<_> = synth
            .synthesize("text", &params(), &CancelToken::new())
            .unwrap()
            .collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(SelspeakError::Synthesis { .. })));
    }

    #[test]
    fn mock_start_failure() {
        let synth = MockSynthesizer::new(24000).with_start_failure();
        assert!(
            synth
                .synthesize("text", &params(), &CancelToken::new())
                .is_err()
        );
        assert_eq!(synth.synthesize_calls(), 1);
        assert_eq!(synth.chunks_requested(), 0);
    }

    #[test]
    fn counters_are_shared_between_clones() {
        let synth = MockSynthesizer::new(24000).with_chunk_count(1);
        let observer = synth.clone();
        let _ = synth
            .synthesize("x", &params(), &CancelToken::new())
            .unwrap()
            .count();
        assert_eq!(observer.synthesize_calls(), 1);
        assert_eq!(observer.chunks_requested(), 2, "one chunk plus the final None");
    }

    #[test]
    fn mock_delay_ends_early_on_cancel() {
        let synth = MockSynthesizer::new(24000)
            .with_chunk_count(1)
            .with_chunk_delay(Duration::from_secs(10));
        let cancel = CancelToken::new();
        let mut chunks = synth.synthesize("x", &params(), &cancel).unwrap();

        let canceller = cancel.clone();
        let timer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            canceller.cancel();
        });
        let started = Instant::now();
        let next = chunks.next();
        timer.join().unwrap();

        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(matches!(next, Some(Err(SelspeakError::SynthesisCancelled))));
    }

    #[test]
    fn raw_audio_len() {
        assert_eq!(RawAudio::I16(vec![1, 2, 3]).len(), 3);
        assert!(RawAudio::F32(Vec::new()).is_empty());
    }
}
