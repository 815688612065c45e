//! qw-testkit
//!
//! Deterministic fakes for driving price cycles end to end without network
//! or Postgres: a scripted quote provider, an in-memory store, a recording
//! sink and a log capture.

mod logs;
mod provider;
mod sink;
mod store;

use std::sync::Arc;

use qw_config::CycleSettings;
use qw_runtime::ScopeRuntime;

pub use logs::LogCapture;
pub use provider::{quote_map, FakeQuoteProvider, FakeStep, FAKE_SOURCE};
pub use sink::RecordingSink;
pub use store::InMemoryStore;

/// One scope wired to fakes. Fields stay reachable for seeding and asserts.
pub struct Harness {
    pub provider: Arc<FakeQuoteProvider>,
    pub store: Arc<InMemoryStore>,
    pub sink: Arc<RecordingSink>,
    pub runtime: ScopeRuntime,
}

impl Harness {
    pub fn new(provider: FakeQuoteProvider, store: InMemoryStore, settings: CycleSettings) -> Self {
        Self::build(provider, store, settings, true)
    }

    /// Same as [`Harness::new`] without a position loader.
    pub fn without_positions(
        provider: FakeQuoteProvider,
        store: InMemoryStore,
        settings: CycleSettings,
    ) -> Self {
        Self::build(provider, store, settings, false)
    }

    fn build(
        provider: FakeQuoteProvider,
        store: InMemoryStore,
        settings: CycleSettings,
        positions: bool,
    ) -> Self {
        let provider = Arc::new(provider);
        let store = Arc::new(store);
        let sink = Arc::new(RecordingSink::new());
        let mut runtime = ScopeRuntime::new(
            "test",
            settings,
            provider.clone(),
            store.clone(),
            sink.clone(),
        );
        if positions {
            runtime = runtime.with_positions(store.clone());
        }
        Self {
            provider,
            store,
            sink,
            runtime,
        }
    }
}
