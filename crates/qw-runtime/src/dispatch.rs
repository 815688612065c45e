use std::collections::BTreeMap;

use anyhow::Result;
use tracing::{debug, warn};

use qw_db::{OwnerRecord, PositionLoader, PriceStore};
use qw_portfolio::performance;
use qw_schemas::{ChangeEvent, Performance, ValuesRow};

/// Outbound change notifications.
///
/// Called in dispatch order; implementations must not reorder events of one
/// scope.
pub trait EventSink: Send + Sync {
    fn publish(&self, scope: &str, event: ChangeEvent) -> Result<()>;
}

pub const SOURCE_STORED: &str = "stored";

/// A `values` row built from stored aggregates only (no ledger replay).
pub fn stored_row(owner: &OwnerRecord) -> ValuesRow {
    let current_value = owner.current_value.unwrap_or(0.0);
    let baseline = owner.purchase_baseline.unwrap_or(0.0);
    let p = performance(current_value, baseline, 0.0, baseline, 1.0);
    ValuesRow {
        owner_id: owner.owner_id,
        name: owner.name.clone(),
        current_value,
        purchase_baseline: baseline,
        position_count: owner.position_count,
        performance: Performance {
            gain_abs: p.gain_abs,
            gain_pct: p.gain_pct,
            total_change_eur: p.total_change,
            total_change_pct: p.total_change_pct,
            source: SOURCE_STORED.to_string(),
            coverage_ratio: p.coverage_ratio,
        },
    }
}

/// What reached the sink.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub values_rows: usize,
    pub positions_events: usize,
    pub publish_failures: usize,
}

/// Emit one `values` event, then one `positions` event per owner with
/// position data. Nothing is emitted when no price row changed.
///
/// The `values` rows cover every impacted owner: the live row when the owner
/// was recomputed, else its stored aggregate.
pub async fn dispatch_changes(
    scope: &str,
    sink: &dyn EventSink,
    store: &dyn PriceStore,
    positions: Option<&dyn PositionLoader>,
    changed: u64,
    live: BTreeMap<i64, ValuesRow>,
    impacted: &[i64],
) -> DispatchOutcome {
    let mut out = DispatchOutcome::default();
    if changed == 0 {
        return out;
    }

    let mut by_owner: BTreeMap<i64, ValuesRow> = live
        .into_iter()
        .filter(|(owner_id, _)| impacted.contains(owner_id))
        .collect();
    let missing: Vec<i64> = impacted
        .iter()
        .copied()
        .filter(|id| !by_owner.contains_key(id))
        .collect();
    if !missing.is_empty() {
        match store.load_owners(&missing).await {
            Ok(owners) => {
                for owner in &owners {
                    by_owner.insert(owner.owner_id, stored_row(owner));
                }
            }
            Err(e) => {
                warn!(scope, error = %format!("{e:#}"), "stored aggregate load failed");
            }
        }
    }
    let rows: Vec<ValuesRow> = by_owner.into_values().collect();

    if rows.is_empty() {
        debug!(scope, changed, "no owner aggregates to dispatch");
        return out;
    }

    let owner_ids: Vec<i64> = rows.iter().map(|r| r.owner_id).collect();
    out.values_rows = rows.len();
    if let Err(e) = sink.publish(scope, ChangeEvent::Values { rows }) {
        out.publish_failures += 1;
        warn!(scope, error = %format!("{e:#}"), "values event publish failed");
    }

    let Some(loader) = positions else {
        return out;
    };

    for owner_id in owner_ids {
        let rows = match loader.load_positions(owner_id).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(scope, owner_id, error = %format!("{e:#}"), "position load failed");
                continue;
            }
        };
        if rows.is_empty() {
            continue;
        }
        out.positions_events += 1;
        if let Err(e) = sink.publish(scope, ChangeEvent::Positions { owner_id, rows }) {
            out.publish_failures += 1;
            warn!(scope, owner_id, error = %format!("{e:#}"), "positions event publish failed");
        }
    }

    out
}
