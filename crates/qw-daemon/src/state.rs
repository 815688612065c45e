//! Shared runtime state for qw-daemon.
//!
//! Handlers receive `State<Arc<AppState>>` from Axum. The scheduler owns the
//! per-scope cycle tasks; this module only holds handles to it.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use qw_runtime::{CycleScheduler, EventSink};
use qw_schemas::{ChangeEvent, EventEnvelope};

// ---------------------------------------------------------------------------
// BusMsg: SSE event bus payload
// ---------------------------------------------------------------------------

/// Messages broadcast over the internal event bus and surfaced as SSE events.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusMsg {
    Heartbeat { ts_millis: i64 },
    Change(EventEnvelope<ChangeEvent>),
}

impl BusMsg {
    /// SSE event name.
    pub fn event_name(&self) -> &'static str {
        match self {
            BusMsg::Heartbeat { .. } => "heartbeat",
            BusMsg::Change(env) => env.payload.topic(),
        }
    }
}

// ---------------------------------------------------------------------------
// BroadcastSink
// ---------------------------------------------------------------------------

/// Cycle sink that wraps every change in an envelope and broadcasts it.
///
/// Having no subscribers is not an error; the event is simply dropped.
#[derive(Clone)]
pub struct BroadcastSink {
    bus: broadcast::Sender<BusMsg>,
}

impl BroadcastSink {
    pub fn new(bus: broadcast::Sender<BusMsg>) -> Self {
        Self { bus }
    }
}

impl EventSink for BroadcastSink {
    fn publish(&self, scope: &str, event: ChangeEvent) -> Result<()> {
        let topic = event.topic();
        let env = EventEnvelope::new(scope, topic, event);
        if self.bus.send(BusMsg::Change(env)).is_err() {
            debug!(scope, topic, "no bus subscribers; event dropped");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

/// Cloneable (Arc) handle shared across all Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Broadcast bus for SSE.
    pub bus: broadcast::Sender<BusMsg>,
    pub build: BuildInfo,
    pub scheduler: Arc<CycleScheduler>,
    /// SHA-256 of the effective config, for operators comparing deployments.
    pub config_hash: String,
}

impl AppState {
    pub fn new(scheduler: Arc<CycleScheduler>, config_hash: String, bus_capacity: usize) -> Self {
        let (bus, _rx) = broadcast::channel::<BusMsg>(bus_capacity.max(1));
        Self {
            bus,
            build: BuildInfo {
                service: "qw-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            scheduler,
            config_hash,
        }
    }

    pub fn sink(&self) -> BroadcastSink {
        BroadcastSink::new(self.bus.clone())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Monotonically increasing uptime since first call (process lifetime).
pub fn uptime_secs() -> u64 {
    static START: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();
    START
        .get_or_init(std::time::Instant::now)
        .elapsed()
        .as_secs()
}

/// Spawn a background task that emits a heartbeat SSE every `interval`.
pub fn spawn_heartbeat(bus: broadcast::Sender<BusMsg>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let ts = chrono::Utc::now().timestamp_millis();
            let _ = bus.send(BusMsg::Heartbeat { ts_millis: ts });
        }
    });
}
