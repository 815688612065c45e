//! Scripted quote provider. No network.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use qw_md::{ProviderError, Quote, QuoteMap, QuoteProvider};

pub const FAKE_SOURCE: &str = "fake";

/// One scripted response, consumed in call order.
#[derive(Debug, Clone)]
pub enum FakeStep {
    /// Return exactly this map.
    Quotes(QuoteMap),
    /// Fail the whole chunk.
    Fail(String),
    /// Return an empty map.
    Empty,
    /// Never resolve; only the caller's timeout ends the call.
    Hang,
}

/// Answers from the script while it lasts, then from a price table.
pub struct FakeQuoteProvider {
    batch_limit: usize,
    script: Mutex<VecDeque<FakeStep>>,
    table: Mutex<BTreeMap<String, (f64, Option<String>)>>,
    calls: Mutex<Vec<Vec<String>>>,
}

impl Default for FakeQuoteProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeQuoteProvider {
    pub fn new() -> Self {
        Self {
            batch_limit: 50,
            script: Mutex::new(VecDeque::new()),
            table: Mutex::new(BTreeMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_batch_limit(mut self, limit: usize) -> Self {
        self.batch_limit = limit;
        self
    }

    pub fn with_price(self, symbol: &str, price: f64, currency: Option<&str>) -> Self {
        self.set_price(symbol, price, currency);
        self
    }

    pub fn set_price(&self, symbol: &str, price: f64, currency: Option<&str>) {
        lock(&self.table).insert(symbol.to_string(), (price, currency.map(str::to_string)));
    }

    pub fn clear_prices(&self) {
        lock(&self.table).clear();
    }

    pub fn push_step(&self, step: FakeStep) {
        lock(&self.script).push_back(step);
    }

    /// Symbols of every call so far, in call order.
    pub fn calls(&self) -> Vec<Vec<String>> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    fn from_table(&self, symbols: &[String]) -> QuoteMap {
        let table = lock(&self.table);
        symbols
            .iter()
            .filter_map(|s| {
                let (price, ccy) = table.get(s)?;
                let q = Quote::new(s.clone(), Some(*price), FAKE_SOURCE);
                let q = match ccy {
                    Some(c) => q.with_currency(c.clone()),
                    None => q,
                };
                Some((s.clone(), q))
            })
            .collect()
    }
}

/// Quote map with raw prices, including ones the cycle must reject.
pub fn quote_map(entries: &[(&str, Option<f64>)]) -> QuoteMap {
    entries
        .iter()
        .map(|(s, p)| (s.to_string(), Quote::new(*s, *p, FAKE_SOURCE)))
        .collect()
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl QuoteProvider for FakeQuoteProvider {
    fn name(&self) -> &'static str {
        FAKE_SOURCE
    }

    fn batch_limit(&self) -> usize {
        self.batch_limit
    }

    async fn fetch_quotes(&self, symbols: &[String]) -> Result<QuoteMap, ProviderError> {
        lock(&self.calls).push(symbols.to_vec());
        let step = lock(&self.script).pop_front();
        match step {
            Some(FakeStep::Quotes(map)) => Ok(map),
            Some(FakeStep::Fail(msg)) => Err(ProviderError::Transport(msg)),
            Some(FakeStep::Empty) => Ok(QuoteMap::new()),
            Some(FakeStep::Hang) => std::future::pending().await,
            None => Ok(self.from_table(symbols)),
        }
    }
}
