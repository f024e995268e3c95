use crate::pipeline::types::PipelineEvent;
use crossbeam_channel::Sender;

/// Optional, non-blocking outlet for [`PipelineEvent`]s.
///
/// A full or disconnected channel drops the event; observers must never slow
/// down playback.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<Sender<PipelineEvent>>,
}

impl EventSink {
    pub fn new(tx: Sender<PipelineEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn emit(&self, event: PipelineEvent) {
        if let Some(tx) = &self.tx {
            if tx.try_send(event).is_err() {
                tracing::trace!("pipeline event dropped");
            }
        }
    }
}
