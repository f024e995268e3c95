//! Audio output abstraction.
//!
//! The playback consumer opens a device through an [`OutputBackend`] on its own
//! thread and owns the resulting [`OutputDevice`] until it closes it. Devices
//! need not be `Send`; cpal streams are not.

use crate::error::{Result, SelspeakError};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Format requested from the output device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputFormat {
    pub sample_rate: u32,
    pub channels: u16,
    /// Frames per device buffer.
    pub buffer_frames: u32,
}

impl OutputFormat {
    /// Mono f32 at `sample_rate`.
    pub fn mono(sample_rate: u32, buffer_frames: u32) -> Self {
        Self {
            sample_rate,
            channels: 1,
            buffer_frames,
        }
    }
}

/// How to close a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseMode {
    /// Let audio already handed to the device finish playing.
    Drain,
    /// Stop immediately and discard buffered audio.
    Discard,
}

/// Factory for output devices.
pub trait OutputBackend: Send + Sync {
    /// Open and start a device. Called on the playback thread.
    fn open(&self, format: &OutputFormat) -> Result<Box<dyn OutputDevice>>;
}

/// An open output device.
pub trait OutputDevice {
    /// Write mono samples, blocking while the device buffer is full.
    ///
    /// An error means the chunk was not (fully) played.
    fn write(&mut self, samples: &[f32]) -> Result<()>;

    /// Stop the device and release it.
    fn close(&mut self, mode: CloseMode) -> Result<()>;

    /// Human-readable device name for logs.
    fn name(&self) -> &str;
}

#[derive(Debug, Default)]
struct MockOutputLog {
    formats: Vec<OutputFormat>,
    written: Vec<Vec<f32>>,
    closes: Vec<CloseMode>,
}

/// Mock output backend for testing
///
/// Records every open, write and close in a log shared by all clones, so a
/// test can keep one clone and hand another to the pipeline.
#[derive(Debug, Clone, Default)]
pub struct MockOutput {
    log: Arc<Mutex<MockOutputLog>>,
    open_failure: bool,
    fail_write_at: Option<usize>,
    write_delay: Duration,
}

impl MockOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `open` fail as if no device were present.
    pub fn with_open_failure(mut self) -> Self {
        self.open_failure = true;
        self
    }

    /// Make the `n`th write (zero-based) fail.
    pub fn with_write_failure_at(mut self, n: usize) -> Self {
        self.fail_write_at = Some(n);
        self
    }

    /// Sleep this long in every write, like a real device playing the audio.
    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = delay;
        self
    }

    fn with_log<R>(&self, f: impl FnOnce(&MockOutputLog) -> R) -> R {
        f(&self.log.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Number of successful opens.
    pub fn opens(&self) -> usize {
        self.with_log(|log| log.formats.len())
    }

    /// Formats passed to successful opens.
    pub fn formats(&self) -> Vec<OutputFormat> {
        self.with_log(|log| log.formats.clone())
    }

    /// Number of close calls.
    pub fn closes(&self) -> usize {
        self.with_log(|log| log.closes.len())
    }

    pub fn close_modes(&self) -> Vec<CloseMode> {
        self.with_log(|log| log.closes.clone())
    }

    /// Buffers passed to successful writes, in order.
    pub fn written(&self) -> Vec<Vec<f32>> {
        self.with_log(|log| log.written.clone())
    }
}

impl OutputBackend for MockOutput {
    fn open(&self, format: &OutputFormat) -> Result<Box<dyn OutputDevice>> {
        if self.open_failure {
            return Err(SelspeakError::AudioDeviceNotFound {
                device: "mock".to_string(),
            });
        }
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .formats
            .push(*format);
        Ok(Box::new(MockDevice {
            log: Arc::clone(&self.log),
            fail_write_at: self.fail_write_at,
            write_delay: self.write_delay,
            writes: 0,
        }))
    }
}

struct MockDevice {
    log: Arc<Mutex<MockOutputLog>>,
    fail_write_at: Option<usize>,
    write_delay: Duration,
    writes: usize,
}

impl OutputDevice for MockDevice {
    fn write(&mut self, samples: &[f32]) -> Result<()> {
        let n = self.writes;
        self.writes += 1;
        if self.fail_write_at == Some(n) {
            return Err(SelspeakError::AudioWrite {
                message: format!("mock write {n} failed"),
            });
        }
        if !self.write_delay.is_zero() {
            std::thread::sleep(self.write_delay);
        }
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .written
            .push(samples.to_vec());
        Ok(())
    }

    fn close(&mut self, mode: CloseMode) -> Result<()> {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .closes
            .push(mode);
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_records_open_write_close() {
        let backend = MockOutput::new();
        let observer = backend.clone();

        let mut device = backend.open(&OutputFormat::mono(24000, 2048)).unwrap();
        device.write(&[0.1, 0.2]).unwrap();
        device.close(CloseMode::Drain).unwrap();

        assert_eq!(observer.opens(), 1);
        assert_eq!(observer.formats()[0].channels, 1);
        assert_eq!(observer.written(), vec![vec![0.1, 0.2]]);
        assert_eq!(observer.close_modes(), vec![CloseMode::Drain]);
    }

    #[test]
    fn mock_open_failure() {
        let backend = MockOutput::new().with_open_failure();
        assert!(matches!(
            backend.open(&OutputFormat::mono(24000, 2048)),
            Err(SelspeakError::AudioDeviceNotFound { .. })
        ));
        assert_eq!(backend.opens(), 0);
    }

    #[test]
    fn mock_write_failure_records_nothing() {
        let backend = MockOutput::new().with_write_failure_at(1);
        let mut device = backend.open(&OutputFormat::mono(24000, 2048)).unwrap();
        device.write(&[0.1]).unwrap();
        assert!(device.write(&[0.2]).is_err());
        assert_eq!(backend.written(), vec![vec![0.1]]);
    }
}
