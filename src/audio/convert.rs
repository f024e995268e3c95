//! Sample format, rate and channel conversion.

use crate::synth::synthesizer::RawAudio;

/// Convert signed 16-bit PCM to f32 in [-1.0, 1.0).
pub fn i16_to_f32(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| f32::from(s) / 32768.0).collect()
}

/// Parse little-endian PCM bytes as i16 samples. A trailing odd byte is ignored.
pub fn i16_from_le_bytes(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect()
}

/// Parse little-endian PCM bytes as f32 samples. Trailing partial samples are ignored.
pub fn f32_from_le_bytes(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Linear-interpolation resampling.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 || to_rate == 0 {
        return samples.to_vec();
    }

    let ratio = f64::from(from_rate) / f64::from(to_rate);
    let output_len = (samples.len() as f64 / ratio).ceil() as usize;

    (0..output_len)
        .map(|i| {
            let source_pos = i as f64 * ratio;
            let source_idx = (source_pos.floor() as usize).min(samples.len() - 1);
            let fraction = (source_pos - source_idx as f64) as f32;

            if source_idx + 1 >= samples.len() {
                samples[source_idx]
            } else {
                let left = samples[source_idx];
                let right = samples[source_idx + 1];
                left + (right - left) * fraction
            }
        })
        .collect()
}

/// Duplicate mono samples across `channels` interleaved channels.
pub fn upmix(samples: &[f32], channels: u16) -> Vec<f32> {
    let channels = usize::from(channels.max(1));
    if channels == 1 {
        return samples.to_vec();
    }
    samples
        .iter()
        .flat_map(|&s| std::iter::repeat_n(s, channels))
        .collect()
}

/// Convert engine output to mono f32 at `target_rate`, clamped to [-1.0, 1.0].
pub fn to_pipeline_samples(raw: RawAudio, source_rate: u32, target_rate: u32) -> Vec<f32> {
    let samples = match raw {
        RawAudio::F32(samples) => samples,
        RawAudio::I16(samples) => i16_to_f32(&samples),
    };
    let mut samples = if source_rate == target_rate {
        samples
    } else {
        resample(&samples, source_rate, target_rate)
    };
    for s in &mut samples {
        *s = if s.is_finite() { s.clamp(-1.0, 1.0) } else { 0.0 };
    }
    samples
}
