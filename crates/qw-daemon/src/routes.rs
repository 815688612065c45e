//! Axum router and handlers for qw-daemon.
//!
//! Every endpoint is read-only telemetry; nothing here can start, stop or
//! alter a cycle. `build_router` is the single entry point; `main.rs` attaches
//! middleware layers.

use std::{convert::Infallible, sync::Arc};

use axum::{
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::get,
    Json, Router,
};
use futures_util::{Stream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::{
    api_types::{CyclesResponse, HealthResponse, ScopeCycle},
    state::{uptime_secs, AppState, BusMsg},
};

/// Middleware layers (CORS, tracing) are **not** applied here so tests can
/// use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/cycles", get(cycles))
        .route("/v1/stream", get(stream))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service.to_string(),
            version: st.build.version.to_string(),
            config_hash: st.config_hash.clone(),
            uptime_secs: uptime_secs(),
        }),
    )
}

// ---------------------------------------------------------------------------
// GET /v1/cycles
// ---------------------------------------------------------------------------

/// Last completed cycle per scope, sorted by scope name.
pub(crate) async fn cycles(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    let mut scopes = Vec::new();
    for scope in st.scheduler.scopes().await {
        let Some(rt) = st.scheduler.runtime(&scope).await else {
            continue;
        };
        scopes.push(ScopeCycle {
            last: rt.state().last_meta().await,
            consecutive_errors: rt.state().error_count(),
            scope,
        });
    }
    (StatusCode::OK, Json(CyclesResponse { scopes }))
}

// ---------------------------------------------------------------------------
// GET /v1/stream  (SSE)
// ---------------------------------------------------------------------------

pub(crate) async fn stream(State(st): State<Arc<AppState>>) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));
    headers.insert("Connection", HeaderValue::from_static("keep-alive"));

    let rx = st.bus.subscribe();
    let events = broadcast_to_sse(rx);

    (headers, Sse::new(events).keep_alive(KeepAlive::new())).into_response()
}

fn broadcast_to_sse(
    rx: broadcast::Receiver<BusMsg>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    BroadcastStream::new(rx).filter_map(|msg| async move {
        match msg {
            Ok(m) => {
                let data = serde_json::to_string(&m).ok()?;
                Some(Ok(Event::default().event(m.event_name()).data(data)))
            }
            Err(_) => None, // lagged / closed
        }
    })
}
