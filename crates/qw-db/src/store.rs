use std::collections::{BTreeMap, BTreeSet};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use qw_portfolio::{Holding, ScaledPrice, Transaction, TxKind};
use qw_schemas::PositionDetail;

use crate::{OwnerRecord, PositionLoader, PriceStore, PriceWrite, TrackedEntity};

/// Postgres-backed store for one scope. Owns its pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and apply migrations.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = crate::connect(url).await?;
        crate::migrate(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn price_from_db(raw: Option<i64>) -> Option<ScaledPrice> {
    raw.and_then(|r| ScaledPrice::new_positive(r).ok())
}

fn owner_from_row(row: &PgRow) -> Result<OwnerRecord> {
    let count: i64 = row.try_get("position_count")?;
    Ok(OwnerRecord {
        owner_id: row.try_get("owner_id")?,
        name: row.try_get("name")?,
        current_value: row.try_get("current_value")?,
        purchase_baseline: row.try_get("purchase_baseline")?,
        position_count: usize::try_from(count).unwrap_or(0),
    })
}

const OWNER_COLUMNS: &str = r#"
    o.owner_id,
    o.name,
    o.current_value,
    o.purchase_baseline,
    (select count(*) from holdings h
      where h.owner_id = o.owner_id and h.quantity <> 0)::bigint as position_count
"#;

#[async_trait]
impl PriceStore for PgStore {
    async fn load_tracked_entities(&self) -> Result<Vec<TrackedEntity>> {
        let rows = sqlx::query(
            r#"
            select id, symbol, currency, retired
            from tracked_entities
            order by id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("load_tracked_entities failed")?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(TrackedEntity {
                id: row.try_get("id")?,
                symbol: row.try_get("symbol")?,
                currency: row.try_get("currency")?,
                retired: row.try_get("retired")?,
            });
        }
        Ok(out)
    }

    async fn load_scaled_prices(&self, entity_ids: &[i64]) -> Result<BTreeMap<i64, i64>> {
        if entity_ids.is_empty() {
            return Ok(BTreeMap::new());
        }
        let rows = sqlx::query(
            r#"
            select id, last_price_scaled
            from tracked_entities
            where id = any($1) and last_price_scaled is not null
            "#,
        )
        .bind(entity_ids.to_vec())
        .fetch_all(&self.pool)
        .await
        .context("load_scaled_prices failed")?;

        let mut out = BTreeMap::new();
        for row in rows {
            out.insert(row.try_get("id")?, row.try_get("last_price_scaled")?);
        }
        Ok(out)
    }

    async fn write_prices(
        &self,
        writes: &[PriceWrite],
        source: &str,
        fetched_at: &str,
    ) -> Result<Vec<i64>> {
        if writes.is_empty() {
            return Ok(Vec::new());
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .context("write_prices begin failed")?;

        let mut written = Vec::new();
        for w in writes {
            // Dropping `tx` on an early return rolls the whole batch back.
            let res = sqlx::query(
                r#"
                update tracked_entities
                set last_price_scaled = $2,
                    last_price_source = $3,
                    last_price_fetched_at = $4
                where id = $1
                  and (last_price_scaled is null or last_price_scaled <> $2)
                "#,
            )
            .bind(w.entity_id)
            .bind(w.price.raw())
            .bind(source)
            .bind(fetched_at)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("write_prices update failed entity_id={}", w.entity_id))?;

            if res.rows_affected() > 0 {
                written.push(w.entity_id);
            }
        }

        tx.commit().await.context("write_prices commit failed")?;
        Ok(written)
    }

    async fn owners_for_entities(&self, entity_ids: &[i64]) -> Result<BTreeSet<i64>> {
        if entity_ids.is_empty() {
            return Ok(BTreeSet::new());
        }
        let rows = sqlx::query(
            r#"
            select owner_id from holdings where entity_id = any($1)
            union
            select owner_id from transactions where entity_id = any($1)
            "#,
        )
        .bind(entity_ids.to_vec())
        .fetch_all(&self.pool)
        .await
        .context("owners_for_entities failed")?;

        let mut out = BTreeSet::new();
        for row in rows {
            out.insert(row.try_get::<i64, _>("owner_id")?);
        }
        Ok(out)
    }

    async fn load_owner(&self, owner_id: i64) -> Result<Option<OwnerRecord>> {
        let sql = format!("select {OWNER_COLUMNS} from owners o where o.owner_id = $1");
        let row = sqlx::query(&sql)
            .bind(owner_id)
            .fetch_optional(&self.pool)
            .await
            .context("load_owner failed")?;
        row.as_ref().map(owner_from_row).transpose()
    }

    async fn load_owners(&self, owner_ids: &[i64]) -> Result<Vec<OwnerRecord>> {
        if owner_ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "select {OWNER_COLUMNS} from owners o where o.owner_id = any($1) order by o.owner_id"
        );
        let rows = sqlx::query(&sql)
            .bind(owner_ids.to_vec())
            .fetch_all(&self.pool)
            .await
            .context("load_owners failed")?;
        rows.iter().map(owner_from_row).collect()
    }

    async fn load_holdings(&self, owner_id: i64) -> Result<Vec<Holding>> {
        let rows = sqlx::query(
            r#"
            select h.entity_id, e.symbol, h.quantity, e.last_price_scaled
            from holdings h
            join tracked_entities e on e.id = h.entity_id
            where h.owner_id = $1
            order by h.entity_id
            "#,
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .context("load_holdings failed")?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(Holding {
                entity_id: row.try_get("entity_id")?,
                symbol: row.try_get("symbol")?,
                quantity: row.try_get("quantity")?,
                price: price_from_db(row.try_get("last_price_scaled")?),
            });
        }
        Ok(out)
    }

    async fn load_transactions(&self, owner_id: i64) -> Result<Vec<Transaction>> {
        let rows = sqlx::query(
            r#"
            select entity_id, kind, quantity, amount, fees
            from transactions
            where owner_id = $1
            order by ts_utc, tx_id
            "#,
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .context("load_transactions failed")?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let kind_s: String = row.try_get("kind")?;
            let kind = TxKind::parse(&kind_s)
                .ok_or_else(|| anyhow!("invalid transaction kind: {kind_s}"))?;
            out.push(Transaction {
                entity_id: row.try_get("entity_id")?,
                kind,
                quantity: row.try_get("quantity")?,
                amount: row.try_get("amount")?,
                fees: row.try_get("fees")?,
            });
        }
        Ok(out)
    }

    async fn write_owner_aggregate(
        &self,
        owner_id: i64,
        current_value: f64,
        purchase_baseline: f64,
    ) -> Result<()> {
        let res = sqlx::query(
            r#"
            update owners
            set current_value = $2,
                purchase_baseline = $3,
                updated_at_utc = now()
            where owner_id = $1
            "#,
        )
        .bind(owner_id)
        .bind(current_value)
        .bind(purchase_baseline)
        .execute(&self.pool)
        .await
        .context("write_owner_aggregate failed")?;

        if res.rows_affected() == 0 {
            bail!("write_owner_aggregate: owner {owner_id} not found");
        }
        Ok(())
    }
}

#[async_trait]
impl PositionLoader for PgStore {
    async fn load_positions(&self, owner_id: i64) -> Result<Vec<PositionDetail>> {
        let rows = sqlx::query(
            r#"
            select h.entity_id, e.symbol, h.quantity, e.last_price_scaled,
                   e.currency, e.last_price_fetched_at
            from holdings h
            join tracked_entities e on e.id = h.entity_id
            where h.owner_id = $1 and h.quantity <> 0
            order by h.entity_id
            "#,
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .context("load_positions failed")?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let quantity: f64 = row.try_get("quantity")?;
            let price = price_from_db(row.try_get("last_price_scaled")?);
            out.push(PositionDetail {
                entity_id: row.try_get("entity_id")?,
                symbol: row.try_get("symbol")?,
                quantity,
                price: price.map(ScaledPrice::to_f64),
                currency: row.try_get("currency")?,
                market_value: price.map(|p| p.value_of(quantity)),
                price_fetched_at: row.try_get("last_price_fetched_at")?,
            });
        }
        Ok(out)
    }
}
