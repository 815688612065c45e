//! One scope's price-update cycle.
//!
//! Order of a cycle: acquire the scope lock (or report a skipped run), make
//! sure the symbol directory exists, fetch quotes chunk by chunk under a
//! per-chunk timeout, merge and validate, detect and persist changed prices,
//! revalue impacted owners, dispatch events, then report.
//!
//! Nothing in here returns an error to the caller. Every failure ends up as
//! a counter in [`CycleMeta`] and a log line.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::time::{timeout, Instant};
use tracing::{error, info, warn};

use qw_config::CycleSettings;
use qw_db::{PositionLoader, PriceStore};
use qw_md::{chunk_symbols, QuoteProvider, ValidQuote};
use qw_portfolio::{Aggregator, AverageCostAggregator};
use qw_schemas::CycleMeta;

use crate::detect::{detect_changes, quoted_entity_ids};
use crate::directory::{ensure_directory, SymbolDirectory};
use crate::dispatch::{dispatch_changes, EventSink};
use crate::drift::check_currency_drift;
use crate::persist::{format_fetched_at, persist_changes};
use crate::recompute::recompute_impacted;
use crate::state::CycleState;

/// Everything one scope needs to run cycles. Collaborators are injected.
pub struct ScopeRuntime {
    state: Arc<CycleState>,
    settings: CycleSettings,
    provider: Arc<dyn QuoteProvider>,
    store: Arc<dyn PriceStore>,
    positions: Option<Arc<dyn PositionLoader>>,
    aggregator: Arc<dyn Aggregator>,
    sink: Arc<dyn EventSink>,
}

impl ScopeRuntime {
    pub fn new(
        scope: &str,
        settings: CycleSettings,
        provider: Arc<dyn QuoteProvider>,
        store: Arc<dyn PriceStore>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            state: Arc::new(CycleState::new(scope)),
            settings,
            provider,
            store,
            positions: None,
            aggregator: Arc::new(AverageCostAggregator),
            sink,
        }
    }

    pub fn with_positions(mut self, loader: Arc<dyn PositionLoader>) -> Self {
        self.positions = Some(loader);
        self
    }

    pub fn with_aggregator(mut self, aggregator: Arc<dyn Aggregator>) -> Self {
        self.aggregator = aggregator;
        self
    }

    pub fn scope(&self) -> &str {
        self.state.scope()
    }

    pub fn state(&self) -> &Arc<CycleState> {
        &self.state
    }

    pub fn settings(&self) -> &CycleSettings {
        &self.settings
    }

    /// Symbols per provider call.
    pub fn effective_batch_size(&self) -> usize {
        self.settings
            .batch_size
            .min(self.provider.batch_limit())
            .max(1)
    }

    fn source_tag(&self) -> String {
        self.settings
            .price_source
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(self.provider.name())
            .to_string()
    }

    /// Run one cycle. Overlapping calls return a skipped meta immediately.
    pub async fn run_cycle(&self) -> CycleMeta {
        let scope = self.scope();
        let Some(_guard) = self.state.try_acquire() else {
            let meta = CycleMeta::skipped();
            info!(scope, skipped_running = true, "price cycle skipped; previous cycle still running");
            return meta;
        };

        let started = Instant::now();
        let mut meta = CycleMeta::default();

        let dir = match ensure_directory(&self.state, self.store.as_ref()).await {
            Ok(dir) => dir,
            Err(e) => {
                meta.errors += 1;
                warn!(scope, error = %format!("{e:#}"), "symbol directory load failed");
                Arc::new(SymbolDirectory::default())
            }
        };

        let symbols = dir.symbols();
        meta.symbols_total = symbols.len();
        self.state.set_last_symbol_count(symbols.len());

        if !symbols.is_empty() {
            let merged = self.fetch_all(&symbols, &dir, &mut meta).await;
            meta.quotes_returned = merged.len();

            if merged.is_empty() {
                let consecutive = self.state.record_zero_quote_cycle();
                if self
                    .state
                    .should_warn_zero_quotes(self.settings.zero_quote_warn_interval())
                    .await
                {
                    warn!(
                        scope,
                        symbols = symbols.len(),
                        consecutive,
                        "no quotes returned for any symbol"
                    );
                }
            } else {
                check_currency_drift(&self.state, &merged, &dir).await;
                self.apply_quotes(&merged, &dir, &mut meta).await;
            }
        }

        meta.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.report(&meta).await;
        meta
    }

    async fn fetch_all(
        &self,
        symbols: &[String],
        dir: &SymbolDirectory,
        meta: &mut CycleMeta,
    ) -> BTreeMap<String, ValidQuote> {
        let scope = self.scope();
        let chunks = chunk_symbols(symbols, self.effective_batch_size());
        meta.batches = chunks.len();

        let mut merged = BTreeMap::new();
        for (idx, chunk) in chunks.iter().enumerate() {
            let result = timeout(self.settings.chunk_timeout(), self.provider.fetch_quotes(chunk)).await;
            let quotes = match result {
                Err(_) => {
                    meta.errors += 1;
                    warn!(
                        scope,
                        chunk = idx,
                        size = chunk.len(),
                        timeout_secs = self.settings.chunk_timeout_secs,
                        "quote chunk timed out"
                    );
                    continue;
                }
                Ok(Err(e)) => {
                    meta.errors += 1;
                    warn!(scope, chunk = idx, size = chunk.len(), error = %e, "quote chunk failed");
                    continue;
                }
                Ok(Ok(q)) if q.is_empty() => {
                    meta.errors += 1;
                    warn!(scope, chunk = idx, size = chunk.len(), "quote chunk returned no quotes");
                    continue;
                }
                Ok(Ok(q)) => q,
            };

            for (symbol, quote) in quotes {
                if !dir.contains(&symbol) {
                    continue;
                }
                match quote.validate() {
                    Ok(valid) => {
                        merged.insert(symbol, valid);
                    }
                    Err(reason) => {
                        tracing::debug!(scope, symbol = %symbol, %reason, "quote rejected");
                    }
                }
            }
        }
        merged
    }

    async fn apply_quotes(
        &self,
        merged: &BTreeMap<String, ValidQuote>,
        dir: &SymbolDirectory,
        meta: &mut CycleMeta,
    ) {
        let scope = self.scope();
        let store = self.store.as_ref();

        let ids = quoted_entity_ids(merged, dir);
        let persisted = match store.load_scaled_prices(&ids).await {
            Ok(p) => p,
            Err(e) => {
                meta.errors += 1;
                warn!(scope, error = %format!("{e:#}"), "persisted price load failed");
                return;
            }
        };

        let changes = match detect_changes(merged, dir, &persisted) {
            Ok(c) => c,
            Err(e) => {
                meta.errors += 1;
                error!(scope, error = %e, "price persistence aborted");
                return;
            }
        };

        let fetched_at = format_fetched_at(Utc::now());
        let written = persist_changes(scope, store, &changes, &self.source_tag(), &fetched_at).await;
        meta.changed = written.len() as u64;
        if written.is_empty() {
            return;
        }

        let recomputed =
            recompute_impacted(scope, store, self.aggregator.as_ref(), &written).await;
        let dispatched = dispatch_changes(
            scope,
            self.sink.as_ref(),
            store,
            self.positions.as_deref(),
            meta.changed,
            recomputed.rows,
            &recomputed.impacted,
        )
        .await;
        meta.errors += u32::try_from(dispatched.publish_failures).unwrap_or(u32::MAX);
    }

    async fn report(&self, meta: &CycleMeta) {
        let scope = self.scope();
        info!(
            scope,
            symbols_total = meta.symbols_total,
            batches = meta.batches,
            quotes_returned = meta.quotes_returned,
            changed = meta.changed,
            errors = meta.errors,
            duration_ms = meta.duration_ms,
            skipped_running = meta.skipped_running,
            "price cycle complete"
        );

        if meta.duration_ms > self.settings.watchdog_ms {
            warn!(
                scope,
                duration_ms = meta.duration_ms,
                threshold_ms = self.settings.watchdog_ms,
                "price cycle exceeded watchdog threshold"
            );
        }

        let consecutive = self.state.error_count();
        // only cycles that actually fetched can repeat a fetch failure
        if meta.batches > 0
            && meta.quotes_returned == 0
            && consecutive >= self.settings.error_threshold
        {
            warn!(
                scope,
                consecutive,
                threshold = self.settings.error_threshold,
                "repeated price cycles without quotes"
            );
        }
        if meta.quotes_returned > 0 {
            self.state.reset_errors();
        }

        self.state.set_last_meta(meta.clone()).await;
    }
}
