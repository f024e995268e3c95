//! Real audio playback using CPAL (Cross-Platform Audio Library).
//!
//! `write` feeds a bounded sample buffer that the real-time callback drains.
//! A full buffer blocks the writer, which is how the device paces the
//! playback consumer.

use crate::audio::convert::{resample, upmix};
use crate::audio::device::{CloseMode, OutputBackend, OutputDevice, OutputFormat};
use crate::error::{Result, SelspeakError};
use crate::sys::with_suppressed_stderr;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Preferred device names for GNOME/PipeWire environments.
const PREFERRED_DEVICES: &[&str] = &["pipewire", "pulse", "PulseAudio"];

/// Device buffers of audio the writer may run ahead of the callback.
const BUFFER_PERIODS: usize = 4;

/// A write fails if the callback has not consumed anything for this long.
const STALL_TIMEOUT: Duration = Duration::from_secs(3);

const WAIT_SLICE: Duration = Duration::from_millis(50);

fn is_preferred_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    PREFERRED_DEVICES
        .iter()
        .any(|pref| lower.contains(&pref.to_lowercase()))
}

/// List output device names, marking PipeWire/PulseAudio as recommended.
pub fn list_output_devices() -> Result<Vec<String>> {
    let (host, devices) = with_suppressed_stderr(|| {
        let host = cpal::default_host();
        let devices = host.output_devices();
        (host, devices)
    });
    let _host = host;
    let devices = devices.map_err(|e| SelspeakError::AudioOutput {
        message: format!("Failed to enumerate output devices: {}", e),
    })?;

    let mut names = Vec::new();
    for device in devices {
        if let Ok(name) = device.name() {
            if is_preferred_device(&name) {
                names.push(format!("{} [recommended]", name));
            } else {
                names.push(name);
            }
        }
    }
    Ok(names)
}

fn find_device(device_name: Option<&str>) -> Result<cpal::Device> {
    with_suppressed_stderr(|| {
        let host = cpal::default_host();
        let devices = host
            .output_devices()
            .map_err(|e| SelspeakError::AudioOutput {
                message: format!("Failed to enumerate output devices: {}", e),
            });

        match device_name {
            Some(name) => {
                for device in devices? {
                    if device.name().is_ok_and(|n| n == name) {
                        return Ok(device);
                    }
                }
                Err(SelspeakError::AudioDeviceNotFound {
                    device: name.to_string(),
                })
            }
            None => {
                if let Ok(devices) = devices {
                    for device in devices {
                        if device.name().is_ok_and(|n| is_preferred_device(&n)) {
                            return Ok(device);
                        }
                    }
                }
                host.default_output_device()
                    .ok_or_else(|| SelspeakError::AudioDeviceNotFound {
                        device: "default".to_string(),
                    })
            }
        }
    })
}

struct BufferState {
    samples: VecDeque<f32>,
    error: Option<String>,
    last_consumed: Instant,
}

/// Sample buffer shared between the writer and the device callback.
struct SharedBuffer {
    state: Mutex<BufferState>,
    consumed: Condvar,
    capacity: usize,
}

impl SharedBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(BufferState {
                samples: VecDeque::with_capacity(capacity),
                error: None,
                last_consumed: Instant::now(),
            }),
            consumed: Condvar::new(),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BufferState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Device callback: hand out buffered samples, pad with silence on underrun.
    fn fill<T: cpal::SizedSample + cpal::FromSample<f32>>(&self, data: &mut [T]) {
        let mut state = self.lock();
        for slot in data.iter_mut() {
            *slot = T::from_sample(state.samples.pop_front().unwrap_or(0.0));
        }
        state.last_consumed = Instant::now();
        drop(state);
        self.consumed.notify_all();
    }

    fn fail(&self, message: String) {
        tracing::error!("Audio stream error: {message}");
        let mut state = self.lock();
        if state.error.is_none() {
            state.error = Some(message);
        }
        drop(state);
        self.consumed.notify_all();
    }

    /// Append interleaved samples, blocking while the buffer is full.
    fn push_all(&self, mut samples: &[f32]) -> Result<()> {
        let mut state = self.lock();
        while !samples.is_empty() {
            if let Some(message) = &state.error {
                return Err(SelspeakError::AudioWrite {
                    message: message.clone(),
                });
            }
            let room = self.capacity.saturating_sub(state.samples.len());
            if room == 0 {
                if state.last_consumed.elapsed() > STALL_TIMEOUT {
                    return Err(SelspeakError::AudioWrite {
                        message: format!(
                            "device stopped consuming audio for {}s",
                            STALL_TIMEOUT.as_secs()
                        ),
                    });
                }
                state = self
                    .consumed
                    .wait_timeout(state, WAIT_SLICE)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0;
                continue;
            }
            let take = room.min(samples.len());
            state.samples.extend(&samples[..take]);
            samples = &samples[take..];
        }
        Ok(())
    }

    /// Wait until the callback has taken everything, or `deadline` passes.
    fn wait_empty(&self, deadline: Instant) -> bool {
        let mut state = self.lock();
        while !state.samples.is_empty() && state.error.is_none() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = self
                .consumed
                .wait_timeout(state, WAIT_SLICE.min(deadline - now))
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }

    fn clear(&self) {
        self.lock().samples.clear();
    }
}

/// Opens CPAL output streams.
#[derive(Debug, Clone, Default)]
pub struct CpalBackend {
    device_name: Option<String>,
}

impl CpalBackend {
    /// `device_name` selects an output device by exact name; `None` prefers
    /// PipeWire/PulseAudio and falls back to the system default.
    pub fn new(device_name: Option<String>) -> Self {
        Self { device_name }
    }
}

impl OutputBackend for CpalBackend {
    fn open(&self, format: &OutputFormat) -> Result<Box<dyn OutputDevice>> {
        let device = find_device(self.device_name.as_deref())?;
        let name = device.name().unwrap_or_else(|_| "unknown".to_string());
        let output = CpalOutput::start(device, name, format)?;
        Ok(Box::new(output))
    }
}

/// An open CPAL output stream.
pub struct CpalOutput {
    stream: Option<cpal::Stream>,
    shared: Arc<SharedBuffer>,
    name: String,
    source_rate: u32,
    device_rate: u32,
    device_channels: u16,
    period: Duration,
}

impl CpalOutput {
    /// Build and start a stream.
    ///
    /// Tries in order:
    /// 1. f32/requested rate/mono with a fixed buffer size
    /// 2. the same with the backend's default buffer size
    /// 3. device default config, with software resampling and channel duplication
    fn start(device: cpal::Device, name: String, format: &OutputFormat) -> Result<Self> {
        let frames = format.buffer_frames.max(1) as usize;

        let preferred = cpal::StreamConfig {
            channels: format.channels.max(1),
            sample_rate: cpal::SampleRate(format.sample_rate),
            buffer_size: cpal::BufferSize::Fixed(format.buffer_frames),
        };
        let capacity = frames * BUFFER_PERIODS * usize::from(preferred.channels);

        for buffer_size in [
            cpal::BufferSize::Fixed(format.buffer_frames),
            cpal::BufferSize::Default,
        ] {
            let config = cpal::StreamConfig {
                buffer_size,
                ..preferred.clone()
            };
            let shared = Arc::new(SharedBuffer::new(capacity));
            let built = with_suppressed_stderr(|| {
                build_stream::<f32>(&device, &config, Arc::clone(&shared))
            });
            match built {
                Ok(stream) => {
                    return Self::play(
                        stream,
                        shared,
                        name,
                        format,
                        format.sample_rate,
                        config.channels,
                    );
                }
                Err(e) => tracing::debug!("{name}: preferred config {config:?} rejected: {e}"),
            }
        }

        let native = device
            .default_output_config()
            .map_err(|e| SelspeakError::AudioOutput {
                message: format!("Failed to query default output config: {}", e),
            })?;
        let sample_format = native.sample_format();
        let config: cpal::StreamConfig = native.into();
        tracing::info!(
            "{name}: using native config {}Hz, {} channel(s), {:?}",
            config.sample_rate.0,
            config.channels,
            sample_format
        );

        let capacity = frames * BUFFER_PERIODS * usize::from(config.channels.max(1));
        let shared = Arc::new(SharedBuffer::new(capacity));
        let built = with_suppressed_stderr(|| match sample_format {
            cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config, Arc::clone(&shared)),
            cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config, Arc::clone(&shared)),
            cpal::SampleFormat::U16 => build_stream::<u16>(&device, &config, Arc::clone(&shared)),
            other => Err(cpal::BuildStreamError::BackendSpecific {
                err: cpal::BackendSpecificError {
                    description: format!("unsupported sample format {other:?}"),
                },
            }),
        });
        let stream = built.map_err(|e| SelspeakError::AudioOutput {
            message: format!("Failed to build output stream on {name}: {e}"),
        })?;
        Self::play(
            stream,
            shared,
            name,
            format,
            config.sample_rate.0,
            config.channels,
        )
    }

    fn play(
        stream: cpal::Stream,
        shared: Arc<SharedBuffer>,
        name: String,
        format: &OutputFormat,
        device_rate: u32,
        device_channels: u16,
    ) -> Result<Self> {
        stream.play().map_err(|e| SelspeakError::AudioOutput {
            message: format!("Failed to start output stream on {name}: {e}"),
        })?;
        let period = Duration::from_secs_f64(
            f64::from(format.buffer_frames) / f64::from(device_rate.max(1)),
        );
        Ok(Self {
            stream: Some(stream),
            shared,
            name,
            source_rate: format.sample_rate,
            device_rate,
            device_channels,
            period,
        })
    }

    fn buffered_duration(&self) -> Duration {
        let samples = self.shared.lock().samples.len();
        let frames = samples / usize::from(self.device_channels.max(1));
        Duration::from_secs_f64(frames as f64 / f64::from(self.device_rate.max(1)))
    }
}

fn build_stream<T: cpal::SizedSample + cpal::FromSample<f32>>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    shared: Arc<SharedBuffer>,
) -> std::result::Result<cpal::Stream, cpal::BuildStreamError> {
    let data_shared = Arc::clone(&shared);
    device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| data_shared.fill(data),
        move |err| shared.fail(err.to_string()),
        None,
    )
}

impl OutputDevice for CpalOutput {
    fn write(&mut self, samples: &[f32]) -> Result<()> {
        if self.stream.is_none() {
            return Err(SelspeakError::AudioWrite {
                message: "device already closed".to_string(),
            });
        }
        let resampled;
        let at_rate = if self.source_rate == self.device_rate {
            samples
        } else {
            resampled = resample(samples, self.source_rate, self.device_rate);
            &resampled
        };
        if self.device_channels == 1 {
            self.shared.push_all(at_rate)
        } else {
            self.shared.push_all(&upmix(at_rate, self.device_channels))
        }
    }

    fn close(&mut self, mode: CloseMode) -> Result<()> {
        let Some(stream) = self.stream.take() else {
            return Ok(());
        };
        match mode {
            CloseMode::Drain => {
                let deadline = Instant::now() + self.buffered_duration() + Duration::from_secs(1);
                if !self.shared.wait_empty(deadline) {
                    tracing::warn!("{}: drain timed out, discarding remaining audio", self.name);
                }
                // the last period is still in the device buffer
                std::thread::sleep(self.period * 2);
            }
            CloseMode::Discard => self.shared.clear(),
        }
        let paused = stream.pause();
        drop(stream);
        paused.map_err(|e| SelspeakError::AudioOutput {
            message: format!("Failed to stop output stream on {}: {e}", self.name),
        })
    }

    fn name(&self) -> &str {
        &self.name
    }
}
