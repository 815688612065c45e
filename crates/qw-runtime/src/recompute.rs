//! Selective owner revaluation after a price write.
//!
//! Only owners linked to a changed entity (by holding or by transaction) are
//! revalued; an owner is written back only when its value or baseline moved
//! beyond [`qw_portfolio::AGGREGATE_TOLERANCE`]. Every recomputed owner gets a
//! live row whether or not it was written back.

use std::collections::BTreeMap;

use anyhow::Result;
use tracing::{debug, warn};

use qw_db::{OwnerRecord, PriceStore};
use qw_portfolio::{aggregate_differs, valuate, Aggregator, Valuation};
use qw_schemas::{Performance, ValuesRow};

/// Result of one recompute pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecomputeOutcome {
    /// Every owner linked to a changed entity, ascending.
    pub impacted: Vec<i64>,
    /// Live rows for every impacted owner that was recomputed.
    pub rows: BTreeMap<i64, ValuesRow>,
    /// Owners whose stored aggregate was rewritten this cycle.
    pub written: usize,
    /// Owners skipped because loading or writing failed.
    pub skipped: usize,
}

pub const SOURCE_LIVE: &str = "live";

pub fn live_row(owner: &OwnerRecord, v: &Valuation) -> ValuesRow {
    ValuesRow {
        owner_id: owner.owner_id,
        name: owner.name.clone(),
        current_value: v.current_value,
        purchase_baseline: v.purchase_baseline,
        position_count: v.position_count,
        performance: Performance {
            gain_abs: v.performance.gain_abs,
            gain_pct: v.performance.gain_pct,
            total_change_eur: v.performance.total_change,
            total_change_pct: v.performance.total_change_pct,
            source: SOURCE_LIVE.to_string(),
            coverage_ratio: v.performance.coverage_ratio,
        },
    }
}

pub async fn recompute_impacted(
    scope: &str,
    store: &dyn PriceStore,
    aggregator: &dyn Aggregator,
    changed_entities: &[i64],
) -> RecomputeOutcome {
    let mut out = RecomputeOutcome::default();
    if changed_entities.is_empty() {
        return out;
    }

    out.impacted = match store.owners_for_entities(changed_entities).await {
        Ok(owners) => owners.into_iter().collect(),
        Err(e) => {
            warn!(scope, error = %format!("{e:#}"), "impacted owner lookup failed");
            return out;
        }
    };

    for &owner_id in &out.impacted {
        match recompute_owner(store, aggregator, owner_id).await {
            Ok(Some((row, written))) => {
                if written {
                    out.written += 1;
                }
                out.rows.insert(owner_id, row);
            }
            Ok(None) => {}
            Err(e) => {
                out.skipped += 1;
                warn!(scope, owner_id, error = %format!("{e:#}"), "owner recompute skipped");
            }
        }
    }

    debug!(
        scope,
        impacted = out.impacted.len(),
        recomputed = out.rows.len(),
        written = out.written,
        skipped = out.skipped,
        "owner recompute finished"
    );
    out
}

async fn recompute_owner(
    store: &dyn PriceStore,
    aggregator: &dyn Aggregator,
    owner_id: i64,
) -> Result<Option<(ValuesRow, bool)>> {
    let Some(owner) = store.load_owner(owner_id).await? else {
        return Ok(None);
    };
    let holdings = store.load_holdings(owner_id).await?;
    let transactions = store.load_transactions(owner_id).await?;

    let v = valuate(aggregator, &holdings, &transactions);
    let moved = aggregate_differs(owner.current_value, v.current_value)
        || aggregate_differs(owner.purchase_baseline, v.purchase_baseline);
    if moved {
        store
            .write_owner_aggregate(owner_id, v.current_value, v.purchase_baseline)
            .await?;
    }
    Ok(Some((live_row(&owner, &v), moved)))
}
