//! qw-portfolio
//!
//! Owner revaluation model:
//! - 1e-8 fixed-point persisted prices (`ScaledPrice`)
//! - Holdings and BUY/SELL transaction history
//! - Average-cost purchase baseline and realized gain
//! - Pluggable `Aggregator` (value + baseline) and derived performance
//! - Pure deterministic logic (no IO, no time, no storage wiring)

mod accounting;
mod metrics;
mod types;

pub mod fixedpoint;

pub use accounting::{current_value, summarize_ledger, Aggregator, AverageCostAggregator, LedgerSummary};
pub use fixedpoint::{scale_price, NonPositivePrice, ScaledPrice, PRICE_SCALE};
pub use metrics::{coverage_ratio, performance, valuate, PerformanceMetrics, Valuation};
pub use types::{Holding, Transaction, TxKind};

/// Absolute tolerance below which a recomputed aggregate counts as unchanged.
pub const AGGREGATE_TOLERANCE: f64 = 1e-6;

/// `true` when `new` differs from `stored` by more than [`AGGREGATE_TOLERANCE`]
/// (a missing stored value always differs).
pub fn aggregate_differs(stored: Option<f64>, new: f64) -> bool {
    match stored {
        Some(old) => (old - new).abs() > AGGREGATE_TOLERANCE,
        None => true,
    }
}
