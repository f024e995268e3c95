//! Speech synthesis engines.

pub mod command;
pub mod sentences;
pub mod synthesizer;
pub mod tone;

pub use command::{CommandSynthesizer, PcmFormat};
pub use sentences::split_sentences;
pub use synthesizer::{
    ChunkStream, ComputeDevice, MockSynthesizer, RawAudio, SynthesisParams, Synthesizer,
};
pub use tone::ToneSynthesizer;
