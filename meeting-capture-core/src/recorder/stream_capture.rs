use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::models::audio_models::{AudioLevel, SourceTag};
use crate::models::error::CaptureError;
use crate::models::state::RecorderState;
use crate::processing::channels::adapt_channels;
use crate::processing::chunk_buffer::ChunkBuffer;
use crate::processing::level_meter;
use crate::traits::backend::{CaptureStream, FrameCallback};
use crate::traits::capture_delegate::CaptureDelegate;

/// Stream handle, block buffer and state shared by both recorder kinds.
///
/// ```text
/// [backend thread] → callback → ChunkBuffer (append) + LevelMeter → delegate
/// [caller thread]  → stop() quiesces the stream → drain() reads the buffer
/// ```
pub(crate) struct StreamCapture {
    source: SourceTag,
    buffer: Arc<Mutex<ChunkBuffer>>,
    stream: Option<Box<dyn CaptureStream>>,
    state: RecorderState,
    stream_channels: u16,
}

impl StreamCapture {
    pub fn new(source: SourceTag) -> Self {
        Self {
            source,
            buffer: Arc::new(Mutex::new(ChunkBuffer::new())),
            stream: None,
            state: RecorderState::Idle,
            stream_channels: 0,
        }
    }

    pub fn state(&self) -> RecorderState {
        self.state
    }

    /// Enter `Starting` and drop anything left from the previous recording.
    pub fn begin_start(&mut self) {
        self.state = RecorderState::Starting;
        self.buffer.lock().reset();
    }

    /// Open failed: back to idle with nothing held.
    pub fn fail_start(&mut self) {
        self.state = RecorderState::Idle;
        self.stream = None;
    }

    pub fn attach(&mut self, stream: Box<dyn CaptureStream>) {
        self.stream_channels = stream.channels();
        self.stream = Some(stream);
        self.state = RecorderState::Recording;
    }

    /// Build the callback handed to a backend. Each call yields a fresh
    /// callback writing into the same buffer.
    pub fn frame_callback(&self, delegate: Option<Arc<dyn CaptureDelegate>>) -> FrameCallback {
        let buffer = Arc::clone(&self.buffer);
        let source = self.source;
        let started = Instant::now();

        Box::new(move |samples: &[f32], channels: u16| {
            if buffer.lock().push(samples, channels).is_none() {
                return;
            }

            let Some(delegate) = delegate.as_ref() else {
                return;
            };
            let reading = level_meter::level(samples, channels);
            let level = AudioLevel {
                rms: reading.rms,
                peak: reading.peak,
                normalized: reading.normalized,
                timestamp: started.elapsed().as_secs_f64(),
            };
            let delivered = panic::catch_unwind(AssertUnwindSafe(|| delegate.on_level(source, &level)));
            if delivered.is_err() {
                log::error!("{} level observer panicked; capture continues", source);
            }
        })
    }

    /// Close the stream if open. The buffer is kept for `take_samples`.
    pub fn stop(&mut self, timeout: Duration) -> Result<(), CaptureError> {
        let Some(mut stream) = self.stream.take() else {
            self.state = RecorderState::Idle;
            return Ok(());
        };

        self.state = RecorderState::Stopping;
        let closed = stream.close(timeout);
        self.state = RecorderState::Idle;

        if let Err(ref e) = closed {
            log::warn!("{} stream did not close cleanly: {}", self.source, e);
        }
        closed
    }

    /// Buffered audio in sequence order, adapted to `channels`.
    pub fn take_samples(&mut self, channels: u16) -> Vec<f32> {
        let samples = self.buffer.lock().take_all();
        if samples.is_empty() {
            return samples;
        }
        adapt_channels(&samples, self.stream_channels.max(1), channels)
    }

    pub fn stream_channels(&self) -> u16 {
        self.stream_channels
    }
}

impl Drop for StreamCapture {
    fn drop(&mut self) {
        if self.stream.is_some() {
            let _ = self.stop(Duration::from_millis(200));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Collecting(Mutex<Vec<(SourceTag, AudioLevel)>>);

    impl CaptureDelegate for Collecting {
        fn on_level(&self, source: SourceTag, level: &AudioLevel) {
            self.0.lock().push((source, *level));
        }
    }

    #[test]
    fn callback_buffers_and_reports_levels() {
        let mut capture = StreamCapture::new(SourceTag::Microphone);
        let observer = Arc::new(Collecting(Mutex::new(Vec::new())));
        let mut callback = capture.frame_callback(Some(observer.clone() as Arc<dyn CaptureDelegate>));

        callback(&[0.5, 0.5, -0.5, -0.5], 2);
        callback(&[], 2);
        callback(&[0.25, 0.25], 2);

        let levels = observer.0.lock();
        assert_eq!(levels.len(), 2);
        assert_eq!(levels[0].0, SourceTag::Microphone);
        assert!((levels[0].1.rms - 0.5).abs() < 1e-6);
        assert!(levels[1].1.timestamp >= levels[0].1.timestamp);
        drop(levels);

        capture.stream_channels = 2;
        assert_eq!(capture.take_samples(2), vec![0.5, 0.5, -0.5, -0.5, 0.25, 0.25]);
    }

    #[test]
    fn panicking_observer_does_not_stop_buffering() {
        let capture = StreamCapture::new(SourceTag::Application);
        let observer: Arc<dyn CaptureDelegate> = Arc::new(|_: SourceTag, _: &AudioLevel| panic!("observer bug"));
        let mut callback = capture.frame_callback(Some(observer));

        callback(&[0.1, 0.2], 1);
        callback(&[0.3], 1);

        assert_eq!(capture.buffer.lock().len(), 2);
    }

    #[test]
    fn mono_capture_drains_as_stereo() {
        let mut capture = StreamCapture::new(SourceTag::Microphone);
        let mut callback = capture.frame_callback(None);
        callback(&[0.1, 0.2], 1);
        capture.stream_channels = 1;

        assert_eq!(capture.take_samples(2), vec![0.1, 0.1, 0.2, 0.2]);
        assert!(capture.take_samples(2).is_empty());
    }

    #[test]
    fn stop_without_stream_is_idle() {
        let mut capture = StreamCapture::new(SourceTag::Microphone);
        assert!(capture.stop(Duration::from_millis(10)).is_ok());
        assert_eq!(capture.state(), RecorderState::Idle);
    }
}
