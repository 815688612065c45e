use std::collections::BTreeMap;
use std::fmt;

use qw_md::ValidQuote;
use qw_portfolio::ScaledPrice;

use crate::directory::SymbolDirectory;

/// One entity whose persisted price differs from the new quote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceChange {
    pub entity_id: i64,
    pub symbol: String,
    pub price: ScaledPrice,
}

/// Failure of the change-detection step. Aborts persistence for the cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum DetectError {
    /// The quote scaled to a non-positive integer (e.g. a sub-1e-8 price).
    InvalidScaledPrice { symbol: String, price: f64 },
}

impl fmt::Display for DetectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetectError::InvalidScaledPrice { symbol, price } => {
                write!(f, "invalid scaled price for {symbol}: {price} does not scale to > 0")
            }
        }
    }
}

impl std::error::Error for DetectError {}

/// Entity ids mapped to any of the quoted symbols.
pub fn quoted_entity_ids(quotes: &BTreeMap<String, ValidQuote>, dir: &SymbolDirectory) -> Vec<i64> {
    quotes
        .keys()
        .flat_map(|s| dir.entries(s).iter().map(|e| e.entity_id))
        .collect()
}

/// Compare each quote against the persisted scaled price of every entity
/// mapped to its symbol. A missing persisted price counts as changed.
pub fn detect_changes(
    quotes: &BTreeMap<String, ValidQuote>,
    dir: &SymbolDirectory,
    persisted: &BTreeMap<i64, i64>,
) -> Result<Vec<PriceChange>, DetectError> {
    let mut changes = Vec::new();
    for (symbol, quote) in quotes {
        let entries = dir.entries(symbol);
        if entries.is_empty() {
            continue;
        }
        let price = ScaledPrice::from_f64(quote.price).map_err(|_| DetectError::InvalidScaledPrice {
            symbol: symbol.clone(),
            price: quote.price,
        })?;
        for e in entries {
            if persisted.get(&e.entity_id) != Some(&price.raw()) {
                changes.push(PriceChange {
                    entity_id: e.entity_id,
                    symbol: symbol.clone(),
                    price,
                });
            }
        }
    }
    Ok(changes)
}
