//! Capture `tracing` output for assertions.
//!
//! The subscriber is installed as the thread default, so it sees everything
//! logged from a current-thread tokio test, spawned tasks included.

use std::io;
use std::sync::{Arc, Mutex};

use tracing::subscriber::DefaultGuard;

#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl io::Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub struct LogCapture {
    buf: SharedBuf,
    _guard: DefaultGuard,
}

impl LogCapture {
    /// Capture DEBUG and above until dropped.
    pub fn start() -> Self {
        let buf = SharedBuf::default();
        let writer = buf.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        let guard = tracing::subscriber::set_default(subscriber);
        Self { buf, _guard: guard }
    }

    pub fn contents(&self) -> String {
        let bytes = self.buf.0.lock().unwrap_or_else(|p| p.into_inner()).clone();
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// Lines at `level` (e.g. `"WARN"`) containing `needle`.
    pub fn count(&self, level: &str, needle: &str) -> usize {
        self.contents()
            .lines()
            .filter(|l| l.contains(level) && l.contains(needle))
            .count()
    }

    pub fn clear(&self) {
        self.buf.0.lock().unwrap_or_else(|p| p.into_inner()).clear();
    }
}
