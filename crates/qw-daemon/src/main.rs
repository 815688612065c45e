//! qw-daemon entry point.
//!
//! Loads config and secrets, starts one cycle scope per configured database,
//! and serves the read-only ops endpoints. Route handlers live in `routes.rs`;
//! shared state types live in `state.rs`.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use qw_daemon::{routes, state};
use qw_db::PgStore;
use qw_md::{QuoteProvider, TwelveDataQuoteProvider};
use qw_runtime::{CycleScheduler, ScopeRuntime};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, warn, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Silent if missing; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let loaded = qw_config::load_from_env().context("config load failed")?;
    let cfg = loaded.config;
    info!(config_hash = %loaded.config_hash, scopes = cfg.scopes.len(), "config loaded");

    let secrets = qw_config::resolve_secrets(&cfg)?;

    let provider: Arc<dyn QuoteProvider> = Arc::new(
        TwelveDataQuoteProvider::new_with_base_url(
            secrets.provider_api_key.clone(),
            cfg.provider.base_url.clone(),
        )
        .with_batch_limit(cfg.cycle.batch_size),
    );

    let scheduler = Arc::new(CycleScheduler::new());
    let shared = Arc::new(state::AppState::new(
        Arc::clone(&scheduler),
        loaded.config_hash.clone(),
        cfg.daemon.event_bus_capacity,
    ));
    let sink = Arc::new(shared.sink());

    for scope in &cfg.scopes {
        let url = secrets
            .database_urls
            .get(&scope.name)
            .with_context(|| format!("no database url resolved for scope '{}'", scope.name))?;
        let store = Arc::new(
            PgStore::connect(url)
                .await
                .with_context(|| format!("scope '{}' database connect failed", scope.name))?,
        );
        let runtime = ScopeRuntime::new(
            &scope.name,
            cfg.cycle.clone(),
            Arc::clone(&provider),
            store.clone(),
            sink.clone(),
        )
        .with_positions(store);
        scheduler.ensure_scope(runtime).await;
    }
    if cfg.scopes.is_empty() {
        warn!("no scopes configured; serving ops endpoints only");
    }

    state::spawn_heartbeat(shared.bus.clone(), Duration::from_secs(1));

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    let addr: SocketAddr = cfg
        .daemon
        .bind_addr
        .parse()
        .with_context(|| format!("invalid daemon.bind_addr '{}'", cfg.daemon.bind_addr))?;
    info!("qw-daemon listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server crashed")?;

    scheduler.shutdown().await;
    info!("qw-daemon stopped");
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "ctrl_c handler failed; shutting down");
    }
    info!("shutdown requested");
}

/// CORS: allow only localhost origins; every endpoint is GET.
fn cors_localhost_only() -> CorsLayer {
    let allowed_origins = [
        "http://localhost",
        "http://127.0.0.1",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
        "http://localhost:5173",
        "http://127.0.0.1:5173",
    ];

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET])
        .allow_headers(tower_http::cors::Any)
}
