//! Channel-layout adaptation between what a device delivered and what the
//! session writes.

/// Downmix interleaved multi-channel audio to mono by averaging channels per frame.
pub fn downmix_to_mono(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    let frame_count = samples.len() / channels;
    let scale = 1.0 / channels as f32;
    let mut mono = Vec::with_capacity(frame_count);
    for frame in samples.chunks_exact(channels) {
        mono.push(frame.iter().sum::<f32>() * scale);
    }
    mono
}

/// Duplicate a mono signal into interleaved stereo `[s0, s0, s1, s1, ...]`.
pub fn mono_to_stereo(samples: &[f32]) -> Vec<f32> {
    let mut stereo = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        stereo.push(s);
        stereo.push(s);
    }
    stereo
}

/// Keep only the first `keep` channels of each frame.
pub fn take_leading_channels(samples: &[f32], channels: usize, keep: usize) -> Vec<f32> {
    if keep >= channels {
        return samples.to_vec();
    }
    let mut out = Vec::with_capacity(samples.len() / channels * keep);
    for frame in samples.chunks_exact(channels) {
        out.extend_from_slice(&frame[..keep]);
    }
    out
}

/// Convert interleaved audio from `from` channels to `to` channels.
///
/// - mono → stereo duplicates the channel
/// - many → mono averages
/// - many → stereo keeps the first two channels
///
/// A trailing partial frame is dropped.
pub fn adapt_channels(samples: &[f32], from: u16, to: u16) -> Vec<f32> {
    let from = from.max(1) as usize;
    let to = to.max(1) as usize;
    let whole = samples.len() - samples.len() % from;
    let samples = &samples[..whole];

    match (from, to) {
        (f, t) if f == t => samples.to_vec(),
        (1, 2) => mono_to_stereo(samples),
        (f, 1) => downmix_to_mono(samples, f),
        (1, t) => {
            let mut out = Vec::with_capacity(samples.len() * t);
            for &s in samples {
                out.extend(std::iter::repeat(s).take(t));
            }
            out
        }
        (f, t) if f > t => take_leading_channels(samples, f, t),
        (f, t) => {
            // Widen by padding the extra channels with silence.
            let mut out = Vec::with_capacity(samples.len() / f * t);
            for frame in samples.chunks_exact(f) {
                out.extend_from_slice(frame);
                out.extend(std::iter::repeat(0.0).take(t - f));
            }
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downmix_stereo_to_mono() {
        let stereo = [0.2, 0.8, 0.4, 0.6];
        let mono = downmix_to_mono(&stereo, 2);
        assert_eq!(mono.len(), 2);
        assert!((mono[0] - 0.5).abs() < 1e-6);
        assert!((mono[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn downmix_mono_passthrough() {
        let samples = vec![0.1, 0.2, 0.3];
        assert_eq!(downmix_to_mono(&samples, 1), samples);
    }

    #[test]
    fn mono_capture_duplicates_into_stereo() {
        assert_eq!(adapt_channels(&[0.1, 0.2], 1, 2), vec![0.1, 0.1, 0.2, 0.2]);
    }

    #[test]
    fn surround_keeps_front_pair_for_stereo() {
        let six = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0, 11.0, 12.0];
        assert_eq!(adapt_channels(&six, 6, 2), vec![1.0, 2.0, 7.0, 8.0]);
    }

    #[test]
    fn partial_trailing_frame_is_dropped() {
        assert_eq!(adapt_channels(&[0.1, 0.2, 0.3], 2, 2), vec![0.1, 0.2]);
    }

    #[test]
    fn matching_layout_is_unchanged() {
        let samples = vec![0.1, -0.1, 0.2, -0.2];
        assert_eq!(adapt_channels(&samples, 2, 2), samples);
    }
}
