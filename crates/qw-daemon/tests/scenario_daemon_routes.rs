//! Scenario: read-only ops endpoints and the broadcast sink
//!
//! # Invariants under test
//!
//! 1. `GET /v1/health` reports ok with the config hash it was built with.
//! 2. `GET /v1/cycles` lists every scheduled scope with its last cycle
//!    snapshot once a cycle has completed.
//! 3. The broadcast sink wraps each change in an envelope carrying the scope
//!    and topic, and keeps `values` ahead of `positions`.
//! 4. Publishing with no subscribers is not an error.
//!
//! All tests are in-process; no DB or network required.

use std::sync::Arc;
use std::time::Duration;

use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use qw_config::CycleSettings;
use qw_daemon::{routes, state};
use qw_portfolio::Transaction;
use qw_runtime::{CycleScheduler, EventSink, ScopeRuntime};
use qw_schemas::ChangeEvent;
use qw_testkit::{FakeQuoteProvider, InMemoryStore};
use tower::ServiceExt; // oneshot

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn get(router: axum::Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let req = Request::builder()
        .method("GET")
        .uri(uri)
        .body(axum::body::Body::empty())
        .unwrap();
    let resp = router.oneshot(req).await.expect("oneshot failed");
    let status = resp.status();
    let body = resp
        .into_body()
        .collect()
        .await
        .expect("body collect failed")
        .to_bytes();
    let json = serde_json::from_slice(&body).expect("body is not valid JSON");
    (status, json)
}

fn seeded_store() -> Arc<InMemoryStore> {
    let store = InMemoryStore::new();
    store.add_entity(1, "SAP", Some("EUR"), Some(100_000_000));
    store.add_owner(10, "Core", Some(100.0), Some(100.0));
    store.add_holding(10, 1, 100.0);
    store.add_transaction(10, Transaction::buy(1, 100.0, 100.0));
    Arc::new(store)
}

fn app_state() -> Arc<state::AppState> {
    Arc::new(state::AppState::new(
        Arc::new(CycleScheduler::new()),
        "abc123".to_string(),
        16,
    ))
}

// ---------------------------------------------------------------------------
// 1. health
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_reports_service_and_config_hash() {
    let st = app_state();
    let (status, json) = get(routes::build_router(Arc::clone(&st)), "/v1/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["ok"], true);
    assert_eq!(json["service"], "qw-daemon");
    assert_eq!(json["config_hash"], "abc123");
}

// ---------------------------------------------------------------------------
// 2. cycles
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cycles_lists_scopes_with_last_snapshot() {
    let st = app_state();
    let (_, json) = get(routes::build_router(Arc::clone(&st)), "/v1/cycles").await;
    assert_eq!(json["scopes"].as_array().map(Vec::len), Some(0));

    let store = seeded_store();
    let provider = Arc::new(FakeQuoteProvider::new().with_price("SAP", 1.05, Some("EUR")));
    let runtime = ScopeRuntime::new(
        "main",
        CycleSettings::default(),
        provider,
        store.clone(),
        Arc::new(st.sink()),
    )
    .with_positions(store);
    st.scheduler.ensure_scope(runtime).await;

    // the first tick fires immediately; wait for it to land
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while st.scheduler.last_meta("main").await.is_none() {
        assert!(tokio::time::Instant::now() < deadline, "first cycle never completed");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let (status, json) = get(routes::build_router(Arc::clone(&st)), "/v1/cycles").await;
    assert_eq!(status, StatusCode::OK);
    let scopes = json["scopes"].as_array().expect("scopes array");
    assert_eq!(scopes.len(), 1);
    assert_eq!(scopes[0]["scope"], "main");
    assert_eq!(scopes[0]["consecutive_errors"], 0);
    assert_eq!(scopes[0]["last"]["symbolsTotal"], 1);
    assert_eq!(scopes[0]["last"]["changed"], 1);

    st.scheduler.shutdown().await;
}

// ---------------------------------------------------------------------------
// 3. broadcast sink
// ---------------------------------------------------------------------------

#[tokio::test]
async fn broadcast_sink_envelopes_changes_in_order() {
    let st = app_state();
    let mut rx = st.bus.subscribe();

    let store = seeded_store();
    let provider = Arc::new(FakeQuoteProvider::new().with_price("SAP", 1.05, Some("EUR")));
    let runtime = ScopeRuntime::new(
        "main",
        CycleSettings::default(),
        provider,
        store.clone(),
        Arc::new(st.sink()),
    )
    .with_positions(store);

    let meta = runtime.run_cycle().await;
    assert_eq!(meta.changed, 1);

    let first = rx.try_recv().expect("values event");
    let second = rx.try_recv().expect("positions event");
    assert!(rx.try_recv().is_err(), "exactly two events");

    assert_eq!(first.event_name(), "values");
    assert_eq!(second.event_name(), "positions");

    let state::BusMsg::Change(env) = &first else {
        panic!("expected change, got {first:?}");
    };
    assert_eq!(env.scope, "main");
    assert_eq!(env.topic, "values");
    let ChangeEvent::Values { rows } = &env.payload else {
        panic!("values payload expected");
    };
    assert_eq!(rows[0].owner_id, 10);

    let json = serde_json::to_value(&second).expect("serialize");
    assert_eq!(json["type"], "change");
    assert_eq!(json["payload"]["event"], "positions");
    assert_eq!(json["payload"]["owner_id"], 10);
}

#[test]
fn publish_without_subscribers_is_ok() {
    let st = app_state();
    let sink = st.sink();
    let res = sink.publish("main", ChangeEvent::Values { rows: Vec::new() });
    assert!(res.is_ok());
}
