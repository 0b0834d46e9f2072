//! Transport capturing every message a channel sends.

use std::{
    io,
    sync::{
        Arc,
        Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use bytes::Bytes;
use muxframe::transport::MessageTransport;

/// [`MessageTransport`] that stores sent messages instead of delivering them.
///
/// Clones share the same record, so a test can keep one clone while the
/// channel owns another.
#[derive(Clone, Debug, Default)]
pub struct RecordingTransport {
    sent: Arc<Mutex<Vec<Bytes>>>,
    failing: Arc<AtomicBool>,
}

impl RecordingTransport {
    /// Create a transport that accepts every message.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Make subsequent sends fail with [`io::ErrorKind::BrokenPipe`].
    pub fn fail_sends(&self, failing: bool) { self.failing.store(failing, Ordering::SeqCst); }

    /// Messages sent so far.
    ///
    /// # Panics
    ///
    /// Panics if a sender panicked while recording.
    #[must_use]
    pub fn sent(&self) -> Vec<Bytes> { self.sent.lock().expect("record poisoned").clone() }

    /// Remove and return the messages sent so far.
    ///
    /// # Panics
    ///
    /// Panics if a sender panicked while recording.
    pub fn take(&self) -> Vec<Bytes> {
        std::mem::take(&mut *self.sent.lock().expect("record poisoned"))
    }
}

#[async_trait]
impl MessageTransport for RecordingTransport {
    async fn send(&self, message: Bytes) -> io::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "recording transport failing"));
        }
        self.sent
            .lock()
            .map_err(|_| io::Error::other("record poisoned"))?
            .push(message);
        Ok(())
    }
}
