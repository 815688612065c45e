use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use qw_db::{PriceStore, PriceWrite};

use crate::detect::PriceChange;

/// Persisted fetch timestamp, second precision UTC.
pub fn format_fetched_at(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Write the detected changes in one transaction and return the ids the
/// store reports as written. A storage failure yields an empty list.
pub async fn persist_changes(
    scope: &str,
    store: &dyn PriceStore,
    changes: &[PriceChange],
    source: &str,
    fetched_at: &str,
) -> Vec<i64> {
    if changes.is_empty() {
        return Vec::new();
    }

    let writes: Vec<PriceWrite> = changes
        .iter()
        .map(|c| PriceWrite {
            entity_id: c.entity_id,
            price: c.price,
        })
        .collect();

    match store.write_prices(&writes, source, fetched_at).await {
        Ok(written) => {
            debug!(
                scope,
                detected = writes.len(),
                written = written.len(),
                "price write committed"
            );
            written
        }
        Err(e) => {
            warn!(scope, detected = writes.len(), error = %format!("{e:#}"), "price write rolled back");
            Vec::new()
        }
    }
}
