//! Streaming speech pipeline.
//!
//! A synthesis thread and a playback thread connected by one bounded crossbeam
//! channel. The playback thread opens the device before synthesis starts, and
//! the channel's capacity limits how far synthesis can run ahead of playback.

pub mod cancel;
pub mod consumer;
pub mod coordinator;
pub mod events;
pub mod producer;
pub mod queue;
pub mod types;

pub use cancel::CancelToken;
pub use consumer::{ConsumerReport, PlaybackConsumer};
pub use coordinator::{Pipeline, PipelineConfig, PipelineHandle};
pub use events::EventSink;
pub use producer::{ProducerReport, SynthesisProducer};
pub use queue::{PopError, PushError, QueueReceiver, QueueSender, bounded_audio_queue};
pub use types::{
    AudioChunk, PipelineEvent, PipelineFailure, PipelineRunResult, PipelineState, RunOutcome,
    StreamItem, TextInput,
};
