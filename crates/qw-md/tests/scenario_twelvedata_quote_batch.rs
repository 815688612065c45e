//! Scenario: TwelveData batched `/quote` decoding
//!
//! # Invariants under test
//!
//! 1. A multi-symbol response yields one quote per priced symbol; symbols
//!    with an inline error entry are absent (never an error for the batch).
//!
//! 2. Non-positive and unparsable prices never cross the provider boundary.
//!
//! 3. A top-level API error or a non-2xx status fails the whole batch.
//!
//! Uses httpmock; no real network.

use httpmock::prelude::*;
use qw_md::{ProviderError, QuoteProvider, TwelveDataQuoteProvider};
use serde_json::json;

fn provider(server: &MockServer) -> TwelveDataQuoteProvider {
    TwelveDataQuoteProvider::new_with_base_url("test-key".to_string(), server.base_url())
}

fn syms(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn multi_symbol_batch_drops_unavailable_and_non_positive() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/quote")
                .query_param("symbol", "SAP,BMW,NOPE,ZERO")
                .query_param("apikey", "test-key");
            then.status(200).json_body(json!({
                "SAP":  { "symbol": "SAP", "close": "182.34", "currency": "EUR", "timestamp": 1700000000 },
                "BMW":  { "symbol": "BMW", "close": "97.10", "currency": "EUR", "timestamp": 1700000000 },
                "NOPE": { "code": 404, "message": "symbol not found", "status": "error" },
                "ZERO": { "symbol": "ZERO", "close": "0.0", "currency": "EUR" }
            }));
        })
        .await;

    let quotes = provider(&server)
        .fetch_quotes(&syms(&["SAP", "BMW", "NOPE", "ZERO"]))
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(quotes.len(), 2);
    assert_eq!(quotes["SAP"].price, Some(182.34));
    assert_eq!(quotes["SAP"].currency.as_deref(), Some("EUR"));
    assert_eq!(quotes["SAP"].source, "twelvedata");
    assert_eq!(quotes["BMW"].price, Some(97.10));
    assert!(!quotes.contains_key("NOPE"));
    assert!(!quotes.contains_key("ZERO"));
}

#[tokio::test]
async fn single_symbol_response_is_the_quote_object() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/quote").query_param("symbol", "SAP");
            then.status(200).json_body(json!({
                "symbol": "SAP", "close": "1.05", "currency": "EUR", "timestamp": 1700000000
            }));
        })
        .await;

    let quotes = provider(&server).fetch_quotes(&syms(&["SAP"])).await.unwrap();
    assert_eq!(quotes.len(), 1);
    assert_eq!(quotes["SAP"].price, Some(1.05));
}

#[tokio::test]
async fn top_level_api_error_fails_batch() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/quote");
            then.status(200).json_body(json!({
                "code": 401, "message": "invalid api key", "status": "error"
            }));
        })
        .await;

    let err = provider(&server)
        .fetch_quotes(&syms(&["SAP", "BMW"]))
        .await
        .unwrap_err();
    match err {
        ProviderError::Api { code, message } => {
            assert_eq!(code, Some(401));
            assert_eq!(message, "invalid api key");
        }
        other => panic!("expected api error, got {other}"),
    }
}

#[tokio::test]
async fn http_error_status_fails_batch() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/quote");
            then.status(429).json_body(json!({ "message": "too many requests" }));
        })
        .await;

    let err = provider(&server)
        .fetch_quotes(&syms(&["SAP"]))
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::Api { code: Some(429), .. }));
}

#[tokio::test]
async fn empty_symbol_list_makes_no_request() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/quote");
            then.status(200).json_body(json!({}));
        })
        .await;

    let quotes = provider(&server).fetch_quotes(&[]).await.unwrap();
    assert!(quotes.is_empty());
    mock.assert_hits_async(0).await;
}
