//! Bounded FIFO between the synthesis producer and the playback consumer.
//!
//! A thin layer over a crossbeam bounded channel. The sender half can only
//! emit `EndOfStream` by being consumed, so the marker is sent at most once.

use crate::pipeline::cancel::CancelToken;
use crate::pipeline::types::{AudioChunk, StreamItem};
use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender, bounded};
use std::time::Duration;

/// Why a push did not enqueue its chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushError {
    /// The consumer has gone away.
    Disconnected,
    /// Cancellation was requested while waiting for space.
    Cancelled,
}

/// Why a timed pop returned without an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopError {
    Timeout,
    /// The producer dropped its half without sending `EndOfStream`.
    Disconnected,
}

/// Producer half of the audio queue.
#[derive(Debug)]
pub struct QueueSender {
    tx: Sender<StreamItem>,
    capacity: usize,
}

/// Consumer half of the audio queue.
#[derive(Debug)]
pub struct QueueReceiver {
    rx: Receiver<StreamItem>,
    capacity: usize,
}

/// Creates a queue holding at most `capacity` items (minimum 1).
pub fn bounded_audio_queue(capacity: usize) -> (QueueSender, QueueReceiver) {
    let capacity = capacity.max(1);
    let (tx, rx) = bounded(capacity);
    (QueueSender { tx, capacity }, QueueReceiver { rx, capacity })
}

impl QueueSender {
    /// Enqueues a chunk, blocking while the queue is full.
    pub fn push(&self, chunk: AudioChunk) -> Result<(), PushError> {
        self.tx
            .send(StreamItem::Chunk(chunk))
            .map_err(|_| PushError::Disconnected)
    }

    /// Like [`push`](Self::push), but gives up when `cancel` is set while waiting.
    pub fn push_cancellable(
        &self,
        chunk: AudioChunk,
        cancel: &CancelToken,
        poll: Duration,
    ) -> Result<(), PushError> {
        let mut item = StreamItem::Chunk(chunk);
        loop {
            if cancel.is_cancelled() {
                return Err(PushError::Cancelled);
            }
            match self.tx.send_timeout(item, poll) {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Timeout(returned)) => item = returned,
                Err(SendTimeoutError::Disconnected(_)) => return Err(PushError::Disconnected),
            }
        }
    }

    /// Sends `EndOfStream` and closes the producer side.
    ///
    /// Blocks until there is room or the consumer disconnects. Returns false if
    /// the marker could not be delivered.
    pub fn finish(self) -> bool {
        self.tx.send(StreamItem::EndOfStream).is_ok()
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl QueueReceiver {
    /// Takes the oldest item, blocking while empty.
    ///
    /// Returns `None` once the producer is gone and the queue is drained.
    pub fn pop(&self) -> Option<StreamItem> {
        self.rx.recv().ok()
    }

    /// Takes the oldest item, waiting at most `timeout`.
    pub fn pop_timeout(&self, timeout: Duration) -> Result<StreamItem, PopError> {
        self.rx.recv_timeout(timeout).map_err(|e| match e {
            RecvTimeoutError::Timeout => PopError::Timeout,
            RecvTimeoutError::Disconnected => PopError::Disconnected,
        })
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Instant;

    fn chunk(index: usize) -> AudioChunk {
        AudioChunk::new(index, vec![0.1; 8], 24000)
    }

    fn chunk_index(item: StreamItem) -> usize {
        match item {
            StreamItem::Chunk(c) => c.index,
            StreamItem::EndOfStream => panic!("unexpected EndOfStream"),
        }
    }

    #[test]
    fn items_come_out_in_push_order() {
        let (tx, rx) = bounded_audio_queue(4);
        for i in 0..3 {
            tx.push(chunk(i)).unwrap();
        }
        assert!(tx.finish());

        assert_eq!(chunk_index(rx.pop().unwrap()), 0);
        assert_eq!(chunk_index(rx.pop().unwrap()), 1);
        assert_eq!(chunk_index(rx.pop().unwrap()), 2);
        assert_eq!(rx.pop(), Some(StreamItem::EndOfStream));
        assert_eq!(rx.pop(), None, "sender consumed by finish");
    }

    #[test]
    fn third_push_blocks_until_first_pop() {
        let (tx, rx) = bounded_audio_queue(2);
        tx.push(chunk(0)).unwrap();
        tx.push(chunk(1)).unwrap();
        assert_eq!(tx.len(), 2);

        let third_done = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&third_done);
        let producer = thread::spawn(move || {
            tx.push(chunk(2)).unwrap();
            flag.store(true, Ordering::SeqCst);
            tx
        });

        thread::sleep(Duration::from_millis(100));
        assert!(
            !third_done.load(Ordering::SeqCst),
            "push into a full queue must block"
        );
        assert!(rx.len() <= rx.capacity());

        assert_eq!(chunk_index(rx.pop().unwrap()), 0);
        let tx = producer.join().unwrap();
        assert!(third_done.load(Ordering::SeqCst));
        assert_eq!(tx.len(), 2);
        assert_eq!(chunk_index(rx.pop().unwrap()), 1);
        assert_eq!(chunk_index(rx.pop().unwrap()), 2);
    }

    #[test]
    fn push_after_receiver_dropped_is_disconnected() {
        let (tx, rx) = bounded_audio_queue(1);
        drop(rx);
        assert_eq!(tx.push(chunk(0)), Err(PushError::Disconnected));
        assert!(!tx.finish());
    }

    #[test]
    fn cancellable_push_gives_up_when_cancelled() {
        let (tx, _rx) = bounded_audio_queue(1);
        tx.push(chunk(0)).unwrap();

        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            trigger.cancel();
        });

        let started = Instant::now();
        let result = tx.push_cancellable(chunk(1), &cancel, Duration::from_millis(10));
        canceller.join().unwrap();

        assert_eq!(result, Err(PushError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(tx.len(), 1, "cancelled chunk is not enqueued");
    }

    #[test]
    fn pop_timeout_reports_timeout_and_disconnect() {
        let (tx, rx) = bounded_audio_queue(1);
        assert_eq!(
            rx.pop_timeout(Duration::from_millis(10)),
            Err(PopError::Timeout)
        );
        drop(tx);
        assert_eq!(
            rx.pop_timeout(Duration::from_millis(10)),
            Err(PopError::Disconnected)
        );
    }

    #[test]
    fn zero_capacity_is_clamped_to_one() {
        let (tx, rx) = bounded_audio_queue(0);
        assert_eq!(tx.capacity(), 1);
        assert_eq!(rx.capacity(), 1);
        tx.push(chunk(0)).unwrap();
        assert!(!rx.is_empty());
    }
}
