use std::collections::BTreeMap;

use tracing::warn;

use qw_md::ValidQuote;

use crate::directory::SymbolDirectory;
use crate::state::CycleState;

/// Warn once per symbol per scope lifetime when a quote's currency differs
/// from a mapped entity's persisted currency. Returns the number of new
/// warnings.
pub async fn check_currency_drift(
    state: &CycleState,
    quotes: &BTreeMap<String, ValidQuote>,
    dir: &SymbolDirectory,
) -> usize {
    let mut warned = 0;
    for (symbol, quote) in quotes {
        let Some(quote_ccy) = quote.currency.as_deref() else {
            continue;
        };
        let mismatch = dir.entries(symbol).iter().find(|e| {
            e.currency
                .as_deref()
                .is_some_and(|c| !c.trim().eq_ignore_ascii_case(quote_ccy.trim()))
        });
        let Some(entry) = mismatch else {
            continue;
        };
        if state.mark_drift_warned(symbol).await {
            warned += 1;
            warn!(
                scope = state.scope(),
                symbol = %symbol,
                entity_id = entry.entity_id,
                quote_currency = quote_ccy,
                entity_currency = entry.currency.as_deref().unwrap_or(""),
                "quote currency differs from tracked entity currency"
            );
        }
    }
    warned
}
