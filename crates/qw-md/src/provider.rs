//! Provider boundary for live quotes.
//!
//! This module defines **only** the quote types, validation at the boundary,
//! and the provider trait. Concrete HTTP providers live in their own modules;
//! no storage or change-detection logic belongs here.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Quote
// ---------------------------------------------------------------------------

/// A single live quote as returned by an upstream provider.
///
/// `price` and `currency` are nullable: upstream payloads routinely omit them
/// for halted or unknown instruments. Use [`Quote::validate`] before trusting
/// the price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    /// Ticker symbol exactly as requested from the provider.
    pub symbol: String,
    pub price: Option<f64>,
    /// ISO currency code reported by the provider (e.g. `"EUR"`).
    pub currency: Option<String>,
    /// Provider-side quote time (UTC).
    pub timestamp: DateTime<Utc>,
    /// Short provider tag (e.g. `"twelvedata"`).
    pub source: String,
}

/// Provider results keyed by symbol. Missing symbols are simply absent.
pub type QuoteMap = BTreeMap<String, Quote>;

/// Why a quote was not usable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum QuoteRejection {
    MissingPrice,
    NonFinite(f64),
    NonPositive(f64),
}

impl fmt::Display for QuoteRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuoteRejection::MissingPrice => write!(f, "quote has no price"),
            QuoteRejection::NonFinite(p) => write!(f, "quote price is not finite: {p}"),
            QuoteRejection::NonPositive(p) => write!(f, "quote price must be > 0, got {p}"),
        }
    }
}

impl std::error::Error for QuoteRejection {}

/// A quote whose price is known to be finite and strictly positive.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidQuote {
    pub symbol: String,
    pub price: f64,
    pub currency: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub source: String,
}

impl Quote {
    pub fn new<S: Into<String>>(symbol: S, price: Option<f64>, source: &str) -> Self {
        Self {
            symbol: symbol.into(),
            price,
            currency: None,
            timestamp: Utc::now(),
            source: source.to_string(),
        }
    }

    pub fn with_currency<S: Into<String>>(mut self, currency: S) -> Self {
        self.currency = Some(currency.into());
        self
    }

    /// Validate the nullable price.
    ///
    /// Empty currency strings are normalised to `None` so they never take
    /// part in currency comparisons.
    pub fn validate(&self) -> Result<ValidQuote, QuoteRejection> {
        let price = self.price.ok_or(QuoteRejection::MissingPrice)?;
        if !price.is_finite() {
            return Err(QuoteRejection::NonFinite(price));
        }
        if price <= 0.0 {
            return Err(QuoteRejection::NonPositive(price));
        }
        let currency = self
            .currency
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string);
        Ok(ValidQuote {
            symbol: self.symbol.clone(),
            price,
            currency,
            timestamp: self.timestamp,
            source: self.source.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that a [`QuoteProvider`] implementation may return for a whole
/// batch. Individual unreachable symbols are never errors.
#[derive(Debug)]
pub enum ProviderError {
    /// Network or transport failure.
    Transport(String),
    /// The upstream API returned an application-level error.
    Api { code: Option<i64>, message: String },
    /// A response payload could not be decoded.
    Decode(String),
    /// A required configuration value (e.g. API key) is missing or invalid.
    Config(String),
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::Transport(msg) => write!(f, "transport error: {msg}"),
            ProviderError::Api {
                code: Some(c),
                message,
            } => {
                write!(f, "provider api error code={c}: {message}")
            }
            ProviderError::Api {
                code: None,
                message,
            } => {
                write!(f, "provider api error: {message}")
            }
            ProviderError::Decode(msg) => write!(f, "decode error: {msg}"),
            ProviderError::Config(msg) => write!(f, "config error: {msg}"),
        }
    }
}

impl std::error::Error for ProviderError {}

// ---------------------------------------------------------------------------
// Provider trait
// ---------------------------------------------------------------------------

/// Upstream live-quote provider contract.
///
/// Implementations must be object-safe (`Arc<dyn QuoteProvider>`) and
/// `Send + Sync` so a scope's periodic task can own one.
#[async_trait::async_trait]
pub trait QuoteProvider: Send + Sync {
    /// Short provider tag, persisted as the price source (e.g. `"twelvedata"`).
    fn name(&self) -> &'static str;

    /// Maximum number of symbols accepted by one [`QuoteProvider::fetch_quotes`] call.
    fn batch_limit(&self) -> usize;

    /// Fetch the latest quote for each symbol.
    ///
    /// Symbols the upstream cannot price are absent from the map. Only quotes
    /// with a positive price are returned.
    async fn fetch_quotes(&self, symbols: &[String]) -> Result<QuoteMap, ProviderError>;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
