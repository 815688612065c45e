use std::collections::BTreeMap;

use crate::types::{Holding, Transaction, TxKind};

/// Average-cost lot for one entity, maintained while replaying transactions.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct AvgCostLot {
    quantity: f64,
    cost: f64,
}

/// Totals derived from replaying an owner's transaction history.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LedgerSummary {
    /// Remaining cost basis of open quantity (average-cost method).
    pub cost_basis: f64,
    /// Gross cash ever put in: Σ buy amount + buy fees.
    pub invested: f64,
    /// Realized gain from sells, net of sell fees.
    pub realized_gain: f64,
}

/// Replay transactions in the given (chronological) order.
///
/// Rules:
/// - BUY adds quantity and `amount + fees` to the entity's cost.
/// - SELL removes quantity at the current average cost; realized gain is
///   `amount - fees - sold_qty * avg_cost`.
/// - A SELL larger than the open quantity only realizes against what is
///   held; the excess is ignored (no short lots).
pub fn summarize_ledger(transactions: &[Transaction]) -> LedgerSummary {
    let mut lots: BTreeMap<i64, AvgCostLot> = BTreeMap::new();
    let mut invested = 0.0;
    let mut realized = 0.0;

    for tx in transactions {
        let lot = lots.entry(tx.entity_id).or_default();
        match tx.kind {
            TxKind::Buy => {
                lot.quantity += tx.quantity;
                lot.cost += tx.amount + tx.fees;
                invested += tx.amount + tx.fees;
            }
            TxKind::Sell => {
                if lot.quantity <= f64::EPSILON {
                    continue;
                }
                let sold = tx.quantity.min(lot.quantity);
                let avg = lot.cost / lot.quantity;
                let released = avg * sold;
                // proceeds are pro-rated when the sell exceeds the open quantity
                let proceeds = (tx.amount - tx.fees) * (sold / tx.quantity);
                realized += proceeds - released;
                lot.quantity -= sold;
                lot.cost -= released;
                if lot.quantity <= f64::EPSILON {
                    *lot = AvgCostLot::default();
                }
            }
        }
    }

    LedgerSummary {
        cost_basis: lots.values().map(|l| l.cost).sum(),
        invested,
        realized_gain: realized,
    }
}

/// Sum of priced holding values. Unpriced holdings contribute zero.
pub fn current_value(holdings: &[Holding]) -> f64 {
    holdings.iter().filter_map(Holding::market_value).sum()
}

/// Pure owner-level aggregation functions.
///
/// Implementations must be deterministic and free of IO; the revaluation
/// engine calls them inline for every impacted owner.
pub trait Aggregator: Send + Sync {
    /// Current market value of an owner's holdings.
    fn current_value(&self, holdings: &[Holding]) -> f64;

    /// Purchase baseline (cost basis of what is still held).
    fn purchase_baseline(&self, transactions: &[Transaction]) -> f64;

    /// Full ledger summary; defaults to the average-cost replay.
    fn ledger_summary(&self, transactions: &[Transaction]) -> LedgerSummary {
        summarize_ledger(transactions)
    }
}

/// Default aggregator: market value of priced holdings and average-cost
/// baseline.
#[derive(Clone, Copy, Debug, Default)]
pub struct AverageCostAggregator;

impl Aggregator for AverageCostAggregator {
    fn current_value(&self, holdings: &[Holding]) -> f64 {
        current_value(holdings)
    }

    fn purchase_baseline(&self, transactions: &[Transaction]) -> f64 {
        summarize_ledger(transactions).cost_basis
    }
}
