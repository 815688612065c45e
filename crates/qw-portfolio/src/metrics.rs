use crate::accounting::Aggregator;
use crate::types::{Holding, Transaction};

/// Owner-level performance figures derived from a valuation.
#[derive(Clone, Debug, PartialEq)]
pub struct PerformanceMetrics {
    /// current_value - purchase_baseline
    pub gain_abs: f64,
    /// gain_abs / purchase_baseline × 100 (0 when baseline is 0)
    pub gain_pct: f64,
    /// gain_abs + realized gain
    pub total_change: f64,
    /// total_change / invested × 100 (0 when nothing was invested)
    pub total_change_pct: f64,
    /// priced open positions / open positions (1.0 with no open positions)
    pub coverage_ratio: f64,
}

/// Result of revaluing one owner.
#[derive(Clone, Debug, PartialEq)]
pub struct Valuation {
    pub current_value: f64,
    pub purchase_baseline: f64,
    pub position_count: usize,
    pub performance: PerformanceMetrics,
}

fn pct(num: f64, den: f64) -> f64 {
    if den.abs() <= f64::EPSILON {
        0.0
    } else {
        num / den * 100.0
    }
}

/// Fraction of open holdings that carry a persisted price.
pub fn coverage_ratio(holdings: &[Holding]) -> f64 {
    let open: Vec<&Holding> = holdings.iter().filter(|h| h.is_open()).collect();
    if open.is_empty() {
        return 1.0;
    }
    let priced = open.iter().filter(|h| h.price.is_some()).count();
    priced as f64 / open.len() as f64
}

/// Performance for an already-known value/baseline pair.
///
/// Used both by [`valuate`] and by callers that only hold stored aggregates
/// (no ledger replay): pass `realized_gain = 0` and `invested = baseline`.
pub fn performance(
    current_value: f64,
    purchase_baseline: f64,
    realized_gain: f64,
    invested: f64,
    coverage_ratio: f64,
) -> PerformanceMetrics {
    let gain_abs = current_value - purchase_baseline;
    let total_change = gain_abs + realized_gain;
    PerformanceMetrics {
        gain_abs,
        gain_pct: pct(gain_abs, purchase_baseline),
        total_change,
        total_change_pct: pct(total_change, invested),
        coverage_ratio,
    }
}

/// Revalue one owner from holdings and transaction history.
///
/// Pure: the aggregator decides value and baseline, this function only
/// derives the performance block around them.
pub fn valuate(
    aggregator: &dyn Aggregator,
    holdings: &[Holding],
    transactions: &[Transaction],
) -> Valuation {
    let current_value = aggregator.current_value(holdings);
    let purchase_baseline = aggregator.purchase_baseline(transactions);
    let summary = aggregator.ledger_summary(transactions);

    Valuation {
        current_value,
        purchase_baseline,
        position_count: holdings.iter().filter(|h| h.is_open()).count(),
        performance: performance(
            current_value,
            purchase_baseline,
            summary.realized_gain,
            summary.invested,
            coverage_ratio(holdings),
        ),
    }
}
