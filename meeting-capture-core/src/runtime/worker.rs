use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use crate::models::error::CaptureError;
use crate::runtime::cancel::CancellationToken;

/// A named thread running a blocking capture loop.
///
/// The body receives a `CancellationToken` and must return once it is
/// cancelled. `stop` waits a bounded time for that to happen.
pub struct CaptureWorker {
    name: String,
    token: CancellationToken,
    done_rx: Receiver<()>,
    handle: Option<thread::JoinHandle<()>>,
}

impl CaptureWorker {
    pub fn spawn<F>(name: &str, body: F) -> Result<Self, CaptureError>
    where
        F: FnOnce(CancellationToken) + Send + 'static,
    {
        let token = CancellationToken::new();
        let (done_tx, done_rx) = mpsc::channel();
        let loop_token = token.clone();

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                body(loop_token);
                let _ = done_tx.send(());
            })
            .map_err(|e| CaptureError::StreamOpenFailed(format!("failed to spawn {} thread: {}", name, e)))?;

        Ok(Self {
            name: name.to_string(),
            token,
            done_rx,
            handle: Some(handle),
        })
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Whether the loop has already exited on its own.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Cancel the loop and wait up to `timeout` for it to exit.
    ///
    /// Returns `false` if the deadline passed; the thread is then detached.
    pub fn stop(&mut self, timeout: Duration) -> bool {
        self.token.cancel();
        let Some(handle) = self.handle.take() else {
            return true;
        };

        match self.done_rx.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if handle.join().is_err() {
                    log::error!("{} thread panicked", self.name);
                }
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                log::warn!(
                    "{} thread did not exit within {:?}; detaching",
                    self.name,
                    timeout
                );
                false
            }
        }
    }
}

impl Drop for CaptureWorker {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.stop(Duration::from_millis(100));
        }
    }
}
