use crate::models::audio_models::AudioChunk;

/// Ordered accumulation of captured blocks for one recorder.
///
/// Wrap in `Arc<parking_lot::Mutex<ChunkBuffer>>` to share between the
/// backend callback (sole writer) and the recorder (reader after stop).
/// Sequence numbers are assigned on push and strictly increase.
#[derive(Debug, Default)]
pub struct ChunkBuffer {
    chunks: Vec<AudioChunk>,
    next_sequence: u64,
    total_samples: usize,
}

impl ChunkBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a copy of `samples` as the next block. Empty blocks are ignored.
    pub fn push(&mut self, samples: &[f32], channels: u16) -> Option<u64> {
        if samples.is_empty() {
            return None;
        }
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.total_samples += samples.len();
        self.chunks.push(AudioChunk {
            sequence,
            channels,
            samples: samples.to_vec(),
        });
        Some(sequence)
    }

    /// Concatenate every block in sequence order and empty the buffer.
    pub fn take_all(&mut self) -> Vec<f32> {
        let mut chunks = std::mem::take(&mut self.chunks);
        chunks.sort_by_key(|c| c.sequence);

        let mut out = Vec::with_capacity(self.total_samples);
        for chunk in &chunks {
            out.extend_from_slice(&chunk.samples);
        }
        self.total_samples = 0;
        out
    }

    /// Number of blocks held.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Number of samples (not frames) held.
    pub fn sample_count(&self) -> usize {
        self.total_samples
    }

    /// Drop all blocks and restart sequence numbering.
    pub fn reset(&mut self) {
        self.chunks.clear();
        self.next_sequence = 0;
        self.total_samples = 0;
    }
}
