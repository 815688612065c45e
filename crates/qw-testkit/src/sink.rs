use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use anyhow::{bail, Result};

use qw_runtime::EventSink;
use qw_schemas::ChangeEvent;

/// Records every published event in order.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<(String, ChangeEvent)>>,
    fail: AtomicBool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every publish until cleared. Rejected events are still recorded.
    pub fn fail_publishes(&self, on: bool) {
        self.fail.store(on, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<ChangeEvent> {
        self.lock().iter().map(|(_, e)| e.clone()).collect()
    }

    pub fn topics(&self) -> Vec<&'static str> {
        self.lock().iter().map(|(_, e)| e.topic()).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(String, ChangeEvent)>> {
        self.events.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl EventSink for RecordingSink {
    fn publish(&self, scope: &str, event: ChangeEvent) -> Result<()> {
        self.lock().push((scope.to_string(), event));
        if self.fail.load(Ordering::SeqCst) {
            bail!("publish rejected: injected");
        }
        Ok(())
    }
}
