//! Wire payloads shared between the cycle runtime, storage and the daemon.
//!
//! Field names follow the consumer-facing camelCase contract.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope<T> {
    pub event_id: Uuid,
    pub scope: String,
    pub ts_utc: DateTime<Utc>,
    pub topic: String,
    pub payload: T,
}

impl<T> EventEnvelope<T> {
    pub fn new<S: Into<String>>(scope: S, topic: &str, payload: T) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            scope: scope.into(),
            ts_utc: Utc::now(),
            topic: topic.to_string(),
            payload,
        }
    }
}

/// Performance block carried in each `values` row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Performance {
    pub gain_abs: f64,
    pub gain_pct: f64,
    pub total_change_eur: f64,
    pub total_change_pct: f64,
    /// `"live"` when recomputed this cycle, `"stored"` on the fallback path.
    pub source: String,
    pub coverage_ratio: f64,
}

/// One owner's aggregate as emitted in a `values` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValuesRow {
    pub owner_id: i64,
    pub name: String,
    pub current_value: f64,
    pub purchase_baseline: f64,
    pub position_count: usize,
    pub performance: Performance,
}

/// One position row in a `positions` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionDetail {
    pub entity_id: i64,
    pub symbol: Option<String>,
    pub quantity: f64,
    /// Persisted price as a float (scaled / 1e8); `None` when never priced.
    pub price: Option<f64>,
    pub currency: Option<String>,
    pub market_value: Option<f64>,
    pub price_fetched_at: Option<String>,
}

/// Outbound change notifications, in dispatch order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ChangeEvent {
    Values {
        rows: Vec<ValuesRow>,
    },
    Positions {
        owner_id: i64,
        rows: Vec<PositionDetail>,
    },
}

impl ChangeEvent {
    pub fn topic(&self) -> &'static str {
        match self {
            ChangeEvent::Values { .. } => "values",
            ChangeEvent::Positions { .. } => "positions",
        }
    }
}

/// Immutable per-cycle snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleMeta {
    pub symbols_total: usize,
    pub batches: usize,
    pub quotes_returned: usize,
    pub changed: u64,
    pub errors: u32,
    pub duration_ms: u64,
    pub skipped_running: bool,
}

impl CycleMeta {
    /// Outcome of a tick that found another cycle holding the scope lock.
    pub fn skipped() -> Self {
        Self {
            skipped_running: true,
            ..Self::default()
        }
    }
}
