//! TwelveData-backed live quote provider (`GET /quote`).
//!
//! TwelveData accepts a comma-separated symbol list. A single-symbol request
//! returns the quote object itself; a multi-symbol request returns an object
//! keyed by symbol, where unknown symbols carry an inline
//! `{"status":"error", ...}` entry instead of a quote.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::provider::{ProviderError, Quote, QuoteMap, QuoteProvider};

pub const TWELVEDATA_SOURCE: &str = "twelvedata";

/// Upstream hard limit on symbols per `/quote` call.
pub const TWELVEDATA_MAX_BATCH: usize = 120;

/// API key is read by the caller and passed in; do not log it.
#[derive(Debug, Clone)]
pub struct TwelveDataQuoteProvider {
    api_key: String,
    http: reqwest::Client,
    base_url: String,
    batch_limit: usize,
}

impl TwelveDataQuoteProvider {
    pub fn new(api_key: String) -> Self {
        Self::new_with_base_url(api_key, "https://api.twelvedata.com".to_string())
    }

    pub fn new_with_base_url(api_key: String, base_url: String) -> Self {
        Self {
            api_key,
            http: reqwest::Client::new(),
            base_url,
            batch_limit: 50,
        }
    }

    /// Override the per-call batch size (clamped to `1..=TWELVEDATA_MAX_BATCH`).
    pub fn with_batch_limit(mut self, batch_limit: usize) -> Self {
        self.batch_limit = batch_limit.clamp(1, TWELVEDATA_MAX_BATCH);
        self
    }

    fn build_quote_url(&self) -> String {
        format!("{}/quote", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait::async_trait]
impl QuoteProvider for TwelveDataQuoteProvider {
    fn name(&self) -> &'static str {
        TWELVEDATA_SOURCE
    }

    fn batch_limit(&self) -> usize {
        self.batch_limit
    }

    async fn fetch_quotes(&self, symbols: &[String]) -> Result<QuoteMap, ProviderError> {
        if symbols.is_empty() {
            return Ok(QuoteMap::new());
        }
        if self.api_key.trim().is_empty() {
            return Err(ProviderError::Config("twelvedata api key is empty".to_string()));
        }

        let joined = symbols.join(",");
        let resp = self
            .http
            .get(self.build_quote_url())
            .query(&[("symbol", joined.as_str()), ("apikey", self.api_key.as_str())])
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = resp.status();
        let body: Value = resp
            .json()
            .await
            .map_err(|e| ProviderError::Decode(format!("twelvedata response json: {e}")))?;

        if !status.is_success() {
            return Err(ProviderError::Api {
                code: Some(i64::from(status.as_u16())),
                message: error_message(&body).unwrap_or_else(|| "http error".to_string()),
            });
        }
        if is_error_entry(&body) {
            return Err(ProviderError::Api {
                code: body.get("code").and_then(Value::as_i64),
                message: error_message(&body).unwrap_or_else(|| "unknown".to_string()),
            });
        }

        let entries: Vec<(&String, &Value)> = if symbols.len() == 1 {
            vec![(&symbols[0], &body)]
        } else {
            symbols
                .iter()
                .filter_map(|s| body.get(s.as_str()).map(|v| (s, v)))
                .collect()
        };

        let mut out = QuoteMap::new();
        for (symbol, entry) in entries {
            if is_error_entry(entry) {
                debug!(%symbol, message = ?error_message(entry), "twelvedata symbol unavailable");
                continue;
            }
            let raw: TwelveDataQuote = match serde_json::from_value(entry.clone()) {
                Ok(r) => r,
                Err(e) => {
                    debug!(%symbol, error = %e, "twelvedata quote entry undecodable");
                    continue;
                }
            };
            let quote = raw.into_quote(symbol);
            // only positive prices cross the provider boundary
            if quote.validate().is_ok() {
                out.insert(symbol.clone(), quote);
            }
        }

        Ok(out)
    }
}

fn is_error_entry(v: &Value) -> bool {
    v.get("status").and_then(Value::as_str) == Some("error")
}

fn error_message(v: &Value) -> Option<String> {
    v.get("message").and_then(Value::as_str).map(str::to_string)
}

#[derive(Debug, Clone, Deserialize)]
struct TwelveDataQuote {
    #[serde(default)]
    close: Option<String>,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    timestamp: Option<i64>,
}

impl TwelveDataQuote {
    fn into_quote(self, symbol: &str) -> Quote {
        let timestamp = self
            .timestamp
            .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0))
            .unwrap_or_else(Utc::now);
        Quote {
            symbol: symbol.to_string(),
            price: self.close.as_deref().and_then(|c| c.trim().parse::<f64>().ok()),
            currency: self.currency,
            timestamp,
            source: TWELVEDATA_SOURCE.to_string(),
        }
    }
}
