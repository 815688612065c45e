//! qw-md
//!
//! Live quote ingest: the provider abstraction and concrete quote providers.
//! It does **not** write to the DB; the cycle orchestrator fetches quotes and
//! decides what reaches persistence.

pub mod provider;
pub mod twelvedata;

pub use provider::{ProviderError, Quote, QuoteMap, QuoteProvider, QuoteRejection, ValidQuote};
pub use twelvedata::{TwelveDataQuoteProvider, TWELVEDATA_MAX_BATCH, TWELVEDATA_SOURCE};

/// Split `symbols` into provider-sized chunks, preserving order.
///
/// A `batch_size` of zero is treated as one.
pub fn chunk_symbols(symbols: &[String], batch_size: usize) -> Vec<Vec<String>> {
    symbols
        .chunks(batch_size.max(1))
        .map(|c| c.to_vec())
        .collect()
}
