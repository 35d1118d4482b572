use std::fs::{self, File};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::models::error::CaptureError;
use crate::processing::mixer::Mixer;
use crate::processing::wav_format::{self, PcmFormat, DATA_SIZE_OFFSET, RIFF_SIZE_OFFSET, WAV_HEADER_SIZE};

/// Streaming 16-bit PCM WAV writer.
///
/// ```text
/// [44-byte WAV header]   ← sizes patched on close
/// [interleaved 16-bit PCM data...]
/// ```
pub struct WavFileWriter {
    file_path: PathBuf,
    format: Option<PcmFormat>,
    file: Option<BufWriter<File>>,
    data_bytes: u64,
}

/// What `close` left on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WavSummary {
    pub frames: u64,
    pub data_bytes: u64,
    pub checksum: String,
}

impl WavFileWriter {
    pub fn new(file_path: PathBuf) -> Self {
        Self {
            file_path,
            format: None,
            file: None,
            data_bytes: 0,
        }
    }

    /// Create the file (and any missing parent directories) and write the header.
    pub fn open(&mut self, format: PcmFormat) -> Result<(), CaptureError> {
        if self.file.is_some() {
            return Ok(());
        }

        if let Some(parent) = self.file_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .map_err(|e| CaptureError::StorageError(format!("failed to create directory: {}", e)))?;
            }
        }

        let file = File::create(&self.file_path)
            .map_err(|e| CaptureError::StorageError(format!("failed to create file: {}", e)))?;
        let mut file = BufWriter::new(file);

        let header = wav_format::generate_wav_header(format, 0);
        file.write_all(&header)
            .map_err(|e| CaptureError::StorageError(format!("write failed: {}", e)))?;

        self.file = Some(file);
        self.format = Some(format);
        self.data_bytes = 0;
        Ok(())
    }

    /// Quantize and append interleaved float samples.
    pub fn write_samples(&mut self, samples: &[f32]) -> Result<(), CaptureError> {
        let pcm = Mixer::convert_to_int16_pcm(samples);
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| CaptureError::StorageError("file is not open for writing".into()))?;
        file.write_all(&pcm)
            .map_err(|e| CaptureError::StorageError(format!("write failed: {}", e)))?;
        self.data_bytes += pcm.len() as u64;
        Ok(())
    }

    /// Patch the header sizes, flush, and checksum the finished file.
    pub fn close(&mut self) -> Result<WavSummary, CaptureError> {
        let mut file = self
            .file
            .take()
            .ok_or_else(|| CaptureError::StorageError("file is not open".into()))?;
        let format = self
            .format
            .ok_or_else(|| CaptureError::StorageError("file format unknown".into()))?;

        let (riff_size, data_size) = header_sizes(self.data_bytes)?;

        let io = |e: std::io::Error| CaptureError::StorageError(e.to_string());
        file.seek(SeekFrom::Start(RIFF_SIZE_OFFSET)).map_err(io)?;
        file.write_all(&riff_size.to_le_bytes()).map_err(io)?;
        file.seek(SeekFrom::Start(DATA_SIZE_OFFSET)).map_err(io)?;
        file.write_all(&data_size.to_le_bytes()).map_err(io)?;
        file.flush().map_err(io)?;
        drop(file);

        let checksum = sha256_file(&self.file_path)?;
        Ok(WavSummary {
            frames: self.data_bytes / format.block_align() as u64,
            data_bytes: self.data_bytes,
            checksum,
        })
    }

    /// Data bytes written so far, excluding the header.
    pub fn bytes_written(&self) -> u64 {
        self.data_bytes
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }
}

/// RIFF and data chunk sizes for `data_bytes` of PCM, if they fit in 32 bits.
fn header_sizes(data_bytes: u64) -> Result<(u32, u32), CaptureError> {
    let too_large = || CaptureError::StorageError("recording exceeds 4 GiB WAV limit".into());
    let data_size = u32::try_from(data_bytes).map_err(|_| too_large())?;
    let riff_size = data_size.checked_add(WAV_HEADER_SIZE as u32 - 8).ok_or_else(too_large)?;
    Ok((riff_size, data_size))
}

/// Write a complete buffer to `path` in one go.
pub fn write_wav(path: &Path, samples: &[f32], format: PcmFormat) -> Result<WavSummary, CaptureError> {
    let mut writer = WavFileWriter::new(path.to_path_buf());
    writer.open(format)?;
    writer.write_samples(samples)?;
    writer.close()
}

/// Compute SHA-256 hex digest of a file.
fn sha256_file(path: &Path) -> Result<String, CaptureError> {
    let data =
        fs::read(path).map_err(|e| CaptureError::StorageError(format!("failed to read file for checksum: {}", e)))?;
    let digest = Sha256::digest(&data);
    Ok(hex_encode(&digest))
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_file_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("meeting_capture_test_{}", uuid::Uuid::new_v4()))
            .join(name)
    }

    #[test]
    fn header_sizes_reject_data_near_the_32_bit_limit() {
        assert_eq!(header_sizes(1000).unwrap(), (1036, 1000));
        assert_eq!(header_sizes(u32::MAX as u64 - 36).unwrap(), (u32::MAX, u32::MAX - 36));
        assert!(matches!(header_sizes(u32::MAX as u64 - 35), Err(CaptureError::StorageError(_))));
        assert!(matches!(header_sizes(u32::MAX as u64 + 1), Err(CaptureError::StorageError(_))));
    }

    #[test]
    fn round_trip_preserves_rate_and_frames() {
        let path = temp_file_path("round_trip.wav");
        let frames = 4410usize;
        let samples: Vec<f32> = (0..frames * 2)
            .map(|i| ((i as f32) * 0.01).sin() * 0.8)
            .collect();

        let summary = write_wav(&path, &samples, PcmFormat::pcm16(44100, 2)).unwrap();
        assert_eq!(summary.frames, frames as u64);

        let mut reader = hound::WavReader::open(&path).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.sample_rate, 44100);
        assert_eq!(spec.channels, 2);
        assert_eq!(spec.bits_per_sample, 16);
        assert_eq!(reader.duration() as usize, frames);

        let read: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(read.len(), samples.len());
        for (orig, got) in samples.iter().zip(&read) {
            let expected = (orig * 32767.0).round() as i32;
            assert!((expected - *got as i32).abs() <= 1);
        }

        fs::remove_dir_all(path.parent().unwrap()).ok();
    }

    #[test]
    fn creates_missing_parent_directories() {
        let path = temp_file_path("nested/deeper/out.wav");
        write_wav(&path, &[0.0, 0.0], PcmFormat::pcm16(16000, 1)).unwrap();
        assert!(path.exists());
        fs::remove_dir_all(path.parent().unwrap().parent().unwrap().parent().unwrap()).ok();
    }

    #[test]
    fn header_sizes_are_patched_on_close() {
        let path = temp_file_path("sizes.wav");
        let mut writer = WavFileWriter::new(path.clone());
        writer.open(PcmFormat::pcm16(48000, 2)).unwrap();
        writer.write_samples(&[0.0; 8]).unwrap();
        writer.write_samples(&[0.5; 8]).unwrap();
        let summary = writer.close().unwrap();

        let data = fs::read(&path).unwrap();
        assert_eq!(data.len(), 44 + 32);
        assert_eq!(u32::from_le_bytes([data[40], data[41], data[42], data[43]]), 32);
        assert_eq!(u32::from_le_bytes([data[4], data[5], data[6], data[7]]), 36 + 32);
        assert_eq!(summary.frames, 8);
        assert_eq!(summary.checksum.len(), 64);

        fs::remove_dir_all(path.parent().unwrap()).ok();
    }

    #[test]
    fn write_before_open_fails() {
        let mut writer = WavFileWriter::new(temp_file_path("unopened.wav"));
        assert!(matches!(writer.write_samples(&[0.0]), Err(CaptureError::StorageError(_))));
        assert!(matches!(writer.close(), Err(CaptureError::StorageError(_))));
    }
}
