//! Conversion of raw WASAPI packet bytes to f32 samples, and shared-mode
//! buffer sizing.
//!
//! Kept free of Windows types so both are testable everywhere.

pub const WAVE_FORMAT_PCM: u16 = 0x0001;
pub const WAVE_FORMAT_IEEE_FLOAT: u16 = 0x0003;
pub const WAVE_FORMAT_EXTENSIBLE: u16 = 0xFFFE;

/// 100 ms, in 100 ns units. Used when no block size was requested.
pub const DEFAULT_BUFFER_DURATION: i64 = 1_000_000;

/// Three 10 ms engine periods; smaller buffers overrun under load.
pub const MIN_BUFFER_DURATION: i64 = 300_000;

/// Shared-mode buffer duration holding `frames_per_buffer` frames at `sample_rate`.
pub fn buffer_duration(frames_per_buffer: u32, sample_rate: u32) -> i64 {
    if frames_per_buffer == 0 || sample_rate == 0 {
        return DEFAULT_BUFFER_DURATION;
    }
    let duration = frames_per_buffer as i64 * 10_000_000 / sample_rate as i64;
    duration.max(MIN_BUFFER_DURATION)
}

/// Sample encodings a shared-mode stream can deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleEncoding {
    Float32,
    Int16,
    Int24,
    Int32,
}

impl SampleEncoding {
    /// Interpret a `WAVEFORMATEX` tag and bit depth.
    ///
    /// For `WAVE_FORMAT_EXTENSIBLE` the caller says whether the sub-format
    /// GUID is IEEE float.
    pub fn from_format(tag: u16, bits_per_sample: u16, extensible_is_float: bool) -> Option<Self> {
        let is_float = match tag {
            WAVE_FORMAT_IEEE_FLOAT => true,
            WAVE_FORMAT_PCM => false,
            WAVE_FORMAT_EXTENSIBLE => extensible_is_float,
            _ => return None,
        };
        match (is_float, bits_per_sample) {
            (true, 32) => Some(Self::Float32),
            (false, 16) => Some(Self::Int16),
            (false, 24) => Some(Self::Int24),
            (false, 32) => Some(Self::Int32),
            _ => None,
        }
    }

    pub fn bytes_per_sample(self) -> usize {
        match self {
            Self::Int16 => 2,
            Self::Int24 => 3,
            Self::Float32 | Self::Int32 => 4,
        }
    }
}

/// Append the samples in `bytes` to `out` as f32 in `[-1, 1]`.
///
/// A trailing partial sample is ignored.
pub fn decode_into(bytes: &[u8], encoding: SampleEncoding, out: &mut Vec<f32>) {
    let width = encoding.bytes_per_sample();
    out.reserve(bytes.len() / width);
    let chunks = bytes.chunks_exact(width);
    match encoding {
        SampleEncoding::Float32 => {
            out.extend(chunks.map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]])));
        }
        SampleEncoding::Int16 => {
            out.extend(chunks.map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0));
        }
        SampleEncoding::Int24 => {
            // Place the 24 bits high in an i32 so the shift sign-extends.
            out.extend(chunks.map(|b| (i32::from_le_bytes([0, b[0], b[1], b[2]]) >> 8) as f32 / 8_388_608.0));
        }
        SampleEncoding::Int32 => {
            out.extend(chunks.map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f32 / 2_147_483_648.0));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn recognizes_shared_mode_formats() {
        assert_eq!(
            SampleEncoding::from_format(WAVE_FORMAT_EXTENSIBLE, 32, true),
            Some(SampleEncoding::Float32)
        );
        assert_eq!(
            SampleEncoding::from_format(WAVE_FORMAT_EXTENSIBLE, 24, false),
            Some(SampleEncoding::Int24)
        );
        assert_eq!(SampleEncoding::from_format(WAVE_FORMAT_PCM, 16, true), Some(SampleEncoding::Int16));
        assert_eq!(SampleEncoding::from_format(WAVE_FORMAT_IEEE_FLOAT, 64, false), None);
        assert_eq!(SampleEncoding::from_format(0x0055, 16, false), None);
    }

    #[test]
    fn decodes_float_packets_verbatim() {
        let bytes: Vec<u8> = [0.5f32, -0.25].iter().flat_map(|s| s.to_le_bytes()).collect();
        let mut out = Vec::new();
        decode_into(&bytes, SampleEncoding::Float32, &mut out);
        assert_eq!(out, vec![0.5, -0.25]);
    }

    #[test]
    fn decodes_int16_to_unit_range() {
        let bytes: Vec<u8> = [i16::MIN, 0, 16384].iter().flat_map(|s| s.to_le_bytes()).collect();
        let mut out = Vec::new();
        decode_into(&bytes, SampleEncoding::Int16, &mut out);
        assert_relative_eq!(out[0], -1.0);
        assert_relative_eq!(out[1], 0.0);
        assert_relative_eq!(out[2], 0.5);
    }

    #[test]
    fn int24_sign_extends() {
        // -1 and +half scale, little-endian 3-byte samples.
        let bytes = [0xFF, 0xFF, 0xFF, 0x00, 0x00, 0x40];
        let mut out = Vec::new();
        decode_into(&bytes, SampleEncoding::Int24, &mut out);
        assert_relative_eq!(out[0], -1.0 / 8_388_608.0);
        assert_relative_eq!(out[1], 0.5);
    }

    #[test]
    fn partial_trailing_sample_is_dropped() {
        let mut out = vec![1.0];
        decode_into(&[0, 0, 0x80], SampleEncoding::Int16, &mut out);
        assert_eq!(out.len(), 2);
        assert_relative_eq!(out[1], 0.0);
    }

    #[test]
    fn buffer_duration_follows_the_requested_block() {
        // 4800 frames at 48 kHz is 100 ms.
        assert_eq!(buffer_duration(4800, 48000), 1_000_000);
        assert_eq!(buffer_duration(8192, 16000), 5_120_000);
    }

    #[test]
    fn tiny_or_missing_blocks_fall_back_to_safe_durations() {
        assert_eq!(buffer_duration(64, 48000), MIN_BUFFER_DURATION);
        assert_eq!(buffer_duration(0, 48000), DEFAULT_BUFFER_DURATION);
        assert_eq!(buffer_duration(1024, 0), DEFAULT_BUFFER_DURATION);
    }
}
