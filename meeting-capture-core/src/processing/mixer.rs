use crate::models::error::CaptureError;

/// Outcome of a mix-down.
#[derive(Debug, Clone, PartialEq)]
pub struct MixOutput {
    /// Interleaved samples at the session's channel count.
    pub samples: Vec<f32>,
    pub frames: usize,
    /// Number of sources that contributed (1 or 2).
    pub sources: usize,
    /// Gain applied by the post-hoc limiter, if it fired.
    pub limiter_gain: Option<f32>,
}

/// Pure-math mix-down of two independently clocked captures.
///
/// Both inputs must already share the output channel layout. With no shared
/// clock between the two streams, alignment is start-aligned truncation:
/// anything past the shorter stream is dropped, never padded.
#[derive(Debug, Clone)]
pub struct Mixer {
    pub channels: u16,
}

impl Mixer {
    pub fn new(channels: u16) -> Self {
        Self {
            channels: channels.max(1),
        }
    }

    /// Mix two captures. Empty inputs count as "no data".
    ///
    /// - one non-empty input is returned unchanged
    /// - two inputs are truncated to the shorter, averaged, and rescaled by
    ///   `1 / peak` if the average exceeds full scale anywhere
    pub fn mix_down(&self, first: &[f32], second: &[f32]) -> Result<MixOutput, CaptureError> {
        let ch = self.channels as usize;
        let first = whole_frames(first, ch);
        let second = whole_frames(second, ch);

        match (first.is_empty(), second.is_empty()) {
            (true, true) => Err(CaptureError::NoAudioData),
            (false, true) => Ok(self.single(first)),
            (true, false) => Ok(self.single(second)),
            (false, false) => Ok(self.average(first, second)),
        }
    }

    fn single(&self, samples: &[f32]) -> MixOutput {
        MixOutput {
            samples: samples.to_vec(),
            frames: samples.len() / self.channels as usize,
            sources: 1,
            limiter_gain: None,
        }
    }

    fn average(&self, first: &[f32], second: &[f32]) -> MixOutput {
        let len = first.len().min(second.len());
        let mut mixed: Vec<f32> = first[..len]
            .iter()
            .zip(&second[..len])
            .map(|(a, b)| (a + b) / 2.0)
            .collect();

        let limiter_gain = Self::limit(&mut mixed);
        if let Some(gain) = limiter_gain {
            log::debug!("Mix exceeded full scale, rescaled by {:.4}", gain);
        }

        MixOutput {
            frames: mixed.len() / self.channels as usize,
            samples: mixed,
            sources: 2,
            limiter_gain,
        }
    }

    /// Scale the whole buffer by `1 / peak` when `peak > 1.0`.
    ///
    /// Applied once over the buffer, not per block.
    pub fn limit(samples: &mut [f32]) -> Option<f32> {
        let peak = peak_level(samples);
        if peak <= 1.0 {
            return None;
        }
        let gain = 1.0 / peak;
        for s in samples.iter_mut() {
            *s = (*s * gain).clamp(-1.0, 1.0);
        }
        Some(gain)
    }

    /// Convert f32 samples `[-1.0, 1.0]` to 16-bit PCM (little-endian bytes).
    ///
    /// Clamps out-of-range values and rounds to nearest. Output length =
    /// `samples.len() * 2` bytes.
    pub fn convert_to_int16_pcm(samples: &[f32]) -> Vec<u8> {
        let mut data = Vec::with_capacity(samples.len() * 2);
        for &sample in samples {
            data.extend_from_slice(&to_i16(sample).to_le_bytes());
        }
        data
    }
}

/// Quantize one sample to 16-bit.
pub fn to_i16(sample: f32) -> i16 {
    let clamped = if sample.is_nan() { 0.0 } else { sample.clamp(-1.0, 1.0) };
    (clamped * i16::MAX as f32).round() as i16
}

/// Peak absolute level of samples.
pub fn peak_level(samples: &[f32]) -> f32 {
    samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max)
}

fn whole_frames(samples: &[f32], channels: usize) -> &[f32] {
    &samples[..samples.len() - samples.len() % channels]
}
