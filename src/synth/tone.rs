use crate::defaults;
use crate::error::Result;
use crate::pipeline::cancel::CancelToken;
use crate::synth::sentences::split_sentences;
use crate::synth::synthesizer::{ChunkStream, RawAudio, SynthesisParams, Synthesizer};

/// Synthesizer that answers every sentence with a sine tone.
///
/// Used by `selspeak test-tone` to exercise the whole pipeline and the output
/// device without a speech engine. Each chunk is a little higher than the last.
#[derive(Debug, Clone)]
pub struct ToneSynthesizer {
    sample_rate: u32,
}

impl ToneSynthesizer {
    pub fn new(sample_rate: u32) -> Self {
        Self { sample_rate }
    }

    /// Tone for chunk `index`.
    pub fn tone(&self, index: usize) -> Vec<f32> {
        let frequency = defaults::TONE_BASE_HZ + defaults::TONE_STEP_HZ * index as f32;
        let len = (self.sample_rate as f32 * defaults::TONE_SECS) as usize;
        let step = std::f32::consts::TAU * frequency / self.sample_rate as f32;
        (0..len)
            .map(|n| defaults::TONE_AMPLITUDE * (step * n as f32).sin())
            .collect()
    }
}

impl Synthesizer for ToneSynthesizer {
    fn synthesize<'a>(
        &'a self,
        text: &'a str,
        _params: &SynthesisParams,
        _cancel: &CancelToken,
    ) -> Result<ChunkStream<'a>> {
        let count = split_sentences(text, usize::MAX).len();
        Ok(Box::new(
            (0..count).map(move |index| Ok(RawAudio::F32(self.tone(index)))),
        ))
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn name(&self) -> &str {
        "tone"
    }
}
