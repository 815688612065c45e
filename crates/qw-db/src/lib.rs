//! qw-db
//!
//! Storage seam for the price cycle. The runtime only sees the
//! [`PriceStore`] and [`PositionLoader`] traits; [`PgStore`] is the Postgres
//! implementation with embedded migrations.

mod store;

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool};

use qw_portfolio::{Holding, ScaledPrice, Transaction};
use qw_schemas::PositionDetail;

pub use store::PgStore;

pub const ENV_DB_URL: &str = "QW_DATABASE_URL";

/// Connect to Postgres using QW_DATABASE_URL.
pub async fn connect_from_env() -> Result<PgPool> {
    let url = std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;
    connect(&url).await
}

pub async fn connect(url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(url)
        .await
        .context("failed to connect to Postgres")?;
    Ok(pool)
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

/// An instrument row as stored. Retired and symbol-less rows are returned
/// too; the directory decides what to map.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedEntity {
    pub id: i64,
    pub symbol: Option<String>,
    pub currency: Option<String>,
    pub retired: bool,
}

/// One authorized price update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceWrite {
    pub entity_id: i64,
    pub price: ScaledPrice,
}

/// Stored aggregate for one owner.
#[derive(Debug, Clone, PartialEq)]
pub struct OwnerRecord {
    pub owner_id: i64,
    pub name: String,
    pub current_value: Option<f64>,
    pub purchase_baseline: Option<f64>,
    /// Holdings with non-zero quantity.
    pub position_count: usize,
}

/// Narrow storage surface used by one scope's price cycle.
#[async_trait]
pub trait PriceStore: Send + Sync {
    async fn load_tracked_entities(&self) -> Result<Vec<TrackedEntity>>;

    /// Persisted raw scaled prices; entities never priced are absent.
    async fn load_scaled_prices(&self, entity_ids: &[i64]) -> Result<BTreeMap<i64, i64>>;

    /// Writes price, source tag and fetch timestamp in one transaction. Each
    /// row is updated only if its stored price differs. Returns the ids of
    /// rows actually written; on error nothing is committed.
    async fn write_prices(
        &self,
        writes: &[PriceWrite],
        source: &str,
        fetched_at: &str,
    ) -> Result<Vec<i64>>;

    /// Owners holding, or with transactions referencing, any of the entities.
    async fn owners_for_entities(&self, entity_ids: &[i64]) -> Result<BTreeSet<i64>>;

    async fn load_owner(&self, owner_id: i64) -> Result<Option<OwnerRecord>>;

    async fn load_owners(&self, owner_ids: &[i64]) -> Result<Vec<OwnerRecord>>;

    async fn load_holdings(&self, owner_id: i64) -> Result<Vec<Holding>>;

    async fn load_transactions(&self, owner_id: i64) -> Result<Vec<Transaction>>;

    async fn write_owner_aggregate(
        &self,
        owner_id: i64,
        current_value: f64,
        purchase_baseline: f64,
    ) -> Result<()>;
}

/// Per-owner position rows for `positions` events.
#[async_trait]
pub trait PositionLoader: Send + Sync {
    async fn load_positions(&self, owner_id: i64) -> Result<Vec<PositionDetail>>;
}
