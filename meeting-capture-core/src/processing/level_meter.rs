//! Block level metering shared by every recorder.
//!
//! Pure functions only: the same block always yields the same reading.

/// Bottom of the display range in dBFS.
pub const DISPLAY_FLOOR_DB: f32 = -60.0;

/// RMS floor applied before taking the logarithm.
pub const RMS_FLOOR: f32 = 1e-10;

/// Levels computed from one capture block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelReading {
    pub rms: f32,
    pub peak: f32,
    pub db: f32,
    /// `clamp((db + 60) / 60, 0, 1)`.
    pub normalized: f32,
}

/// Measure an interleaved block using its first channel as representative.
pub fn level(samples: &[f32], channels: u16) -> LevelReading {
    let step = channels.max(1) as usize;
    let mut count = 0usize;
    let mut sum_sq = 0.0f64;
    let mut peak = 0.0f32;
    for &s in samples.iter().step_by(step) {
        sum_sq += (s as f64) * (s as f64);
        peak = peak.max(s.abs());
        count += 1;
    }

    let rms = if count == 0 {
        0.0
    } else {
        (sum_sq / count as f64).sqrt() as f32
    };
    let db = to_db(rms);

    LevelReading {
        rms,
        peak,
        db,
        normalized: normalize_db(db),
    }
}

/// RMS in dBFS with the floor applied, so silence maps to -200 dB, not -inf.
pub fn to_db(rms: f32) -> f32 {
    20.0 * rms.max(RMS_FLOOR).log10()
}

pub fn normalize_db(db: f32) -> f32 {
    ((db - DISPLAY_FLOOR_DB) / -DISPLAY_FLOOR_DB).clamp(0.0, 1.0)
}

/// Display scalar for a raw RMS value.
pub fn normalized_level(rms: f32) -> f32 {
    normalize_db(to_db(rms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Small xorshift generator so the property checks are reproducible.
    struct XorShift(u64);

    impl XorShift {
        fn next_f32(&mut self) -> f32 {
            self.0 ^= self.0 << 13;
            self.0 ^= self.0 >> 7;
            self.0 ^= self.0 << 17;
            ((self.0 >> 40) as f32 / (1u64 << 24) as f32) * 2.0 - 1.0
        }
    }

    #[test]
    fn silence_hits_floor() {
        let reading = level(&[0.0; 1024], 1);
        assert_eq!(reading.rms, 0.0);
        assert_eq!(reading.peak, 0.0);
        assert!(reading.db.is_finite());
        assert_eq!(reading.normalized, 0.0);
    }

    #[test]
    fn full_scale_square_is_zero_db() {
        let block: Vec<f32> = (0..512).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        let reading = level(&block, 1);
        assert_relative_eq!(reading.rms, 1.0, epsilon = 1e-6);
        assert_relative_eq!(reading.db, 0.0, epsilon = 1e-4);
        assert_relative_eq!(reading.normalized, 1.0, epsilon = 1e-4);
    }

    #[test]
    fn minus_thirty_db_is_half_scale() {
        let rms = 10f32.powf(-30.0 / 20.0);
        assert_relative_eq!(normalized_level(rms), 0.5, epsilon = 1e-4);
    }

    #[test]
    fn uses_first_channel_only() {
        // Left is silent, right is loud.
        let block = [0.0, 0.9, 0.0, -0.9, 0.0, 0.9];
        let reading = level(&block, 2);
        assert_eq!(reading.rms, 0.0);
        assert_eq!(reading.peak, 0.0);
    }

    #[test]
    fn empty_block_is_silent() {
        let reading = level(&[], 2);
        assert_eq!(reading.rms, 0.0);
        assert_eq!(reading.normalized, 0.0);
    }

    #[test]
    fn random_blocks_keep_peak_above_rms() {
        let mut rng = XorShift(0x9E37_79B9_7F4A_7C15);
        for len in [1usize, 7, 64, 1024, 4096] {
            for _ in 0..20 {
                let block: Vec<f32> = (0..len).map(|_| rng.next_f32()).collect();
                let reading = level(&block, 1);
                assert!(reading.rms >= 0.0);
                assert!(reading.peak >= 0.0);
                assert!(reading.peak + 1e-6 >= reading.rms, "peak {} < rms {}", reading.peak, reading.rms);
                assert!((0.0..=1.0).contains(&reading.normalized));
            }
        }
    }

    #[test]
    fn normalized_stays_in_range_for_any_finite_rms() {
        for rms in [0.0f32, 1e-30, 1e-10, 1e-3, 0.5, 1.0, 10.0, 1e6, f32::MAX] {
            let n = normalized_level(rms);
            assert!((0.0..=1.0).contains(&n), "rms {} gave {}", rms, n);
        }
    }
}
