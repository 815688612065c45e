//! In-memory `PriceStore` + `PositionLoader` with failure switches and a
//! call counter, for driving cycles without Postgres.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use qw_db::{OwnerRecord, PositionLoader, PriceStore, PriceWrite, TrackedEntity};
use qw_portfolio::{Holding, ScaledPrice, Transaction};
use qw_schemas::PositionDetail;

#[derive(Debug, Clone)]
struct EntityRow {
    entity: TrackedEntity,
    price: Option<i64>,
    source: Option<String>,
    fetched_at: Option<String>,
}

#[derive(Debug, Clone)]
struct OwnerRow {
    name: String,
    current_value: Option<f64>,
    purchase_baseline: Option<f64>,
}

#[derive(Debug, Clone, Default)]
struct Inner {
    entities: BTreeMap<i64, EntityRow>,
    owners: BTreeMap<i64, OwnerRow>,
    holdings: BTreeMap<(i64, i64), f64>,
    transactions: Vec<(i64, Transaction)>,
}

#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
    calls: AtomicUsize,
    fail_price_writes: AtomicBool,
    fail_entity_load: AtomicBool,
    failing_owners: Mutex<BTreeSet<i64>>,
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // --- seeding ---------------------------------------------------------

    pub fn add_entity(&self, id: i64, symbol: &str, currency: Option<&str>, price: Option<i64>) {
        lock(&self.inner).entities.insert(
            id,
            EntityRow {
                entity: TrackedEntity {
                    id,
                    symbol: Some(symbol.to_string()),
                    currency: currency.map(str::to_string),
                    retired: false,
                },
                price,
                source: None,
                fetched_at: None,
            },
        );
    }

    pub fn add_tracked(&self, entity: TrackedEntity) {
        lock(&self.inner).entities.insert(
            entity.id,
            EntityRow {
                entity,
                price: None,
                source: None,
                fetched_at: None,
            },
        );
    }

    pub fn add_owner(&self, owner_id: i64, name: &str, current_value: Option<f64>, baseline: Option<f64>) {
        lock(&self.inner).owners.insert(
            owner_id,
            OwnerRow {
                name: name.to_string(),
                current_value,
                purchase_baseline: baseline,
            },
        );
    }

    pub fn add_holding(&self, owner_id: i64, entity_id: i64, quantity: f64) {
        lock(&self.inner).holdings.insert((owner_id, entity_id), quantity);
    }

    pub fn add_transaction(&self, owner_id: i64, tx: Transaction) {
        lock(&self.inner).transactions.push((owner_id, tx));
    }

    // --- failure switches --------------------------------------------------

    pub fn fail_price_writes(&self, on: bool) {
        self.fail_price_writes.store(on, Ordering::SeqCst);
    }

    pub fn fail_entity_load(&self, on: bool) {
        self.fail_entity_load.store(on, Ordering::SeqCst);
    }

    /// Loading this owner's holdings fails until cleared.
    pub fn fail_owner(&self, owner_id: i64) {
        lock(&self.failing_owners).insert(owner_id);
    }

    // --- inspection --------------------------------------------------------

    /// Number of trait calls of any kind.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn price(&self, entity_id: i64) -> Option<i64> {
        lock(&self.inner).entities.get(&entity_id).and_then(|e| e.price)
    }

    pub fn price_source(&self, entity_id: i64) -> Option<String> {
        lock(&self.inner)
            .entities
            .get(&entity_id)
            .and_then(|e| e.source.clone())
    }

    pub fn fetched_at(&self, entity_id: i64) -> Option<String> {
        lock(&self.inner)
            .entities
            .get(&entity_id)
            .and_then(|e| e.fetched_at.clone())
    }

    pub fn owner_aggregate(&self, owner_id: i64) -> Option<(Option<f64>, Option<f64>)> {
        lock(&self.inner)
            .owners
            .get(&owner_id)
            .map(|o| (o.current_value, o.purchase_baseline))
    }

    fn touch(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }

    fn owner_record(inner: &Inner, owner_id: i64) -> Option<OwnerRecord> {
        let o = inner.owners.get(&owner_id)?;
        let position_count = inner
            .holdings
            .iter()
            .filter(|((owner, _), qty)| *owner == owner_id && qty.abs() > f64::EPSILON)
            .count();
        Some(OwnerRecord {
            owner_id,
            name: o.name.clone(),
            current_value: o.current_value,
            purchase_baseline: o.purchase_baseline,
            position_count,
        })
    }
}

#[async_trait]
impl PriceStore for InMemoryStore {
    async fn load_tracked_entities(&self) -> Result<Vec<TrackedEntity>> {
        self.touch();
        if self.fail_entity_load.load(Ordering::SeqCst) {
            bail!("load_tracked_entities failed: injected");
        }
        Ok(lock(&self.inner)
            .entities
            .values()
            .map(|e| e.entity.clone())
            .collect())
    }

    async fn load_scaled_prices(&self, entity_ids: &[i64]) -> Result<BTreeMap<i64, i64>> {
        self.touch();
        let inner = lock(&self.inner);
        Ok(entity_ids
            .iter()
            .filter_map(|id| inner.entities.get(id)?.price.map(|p| (*id, p)))
            .collect())
    }

    async fn write_prices(
        &self,
        writes: &[PriceWrite],
        source: &str,
        fetched_at: &str,
    ) -> Result<Vec<i64>> {
        self.touch();
        if self.fail_price_writes.load(Ordering::SeqCst) {
            bail!("write_prices failed: injected");
        }
        let mut inner = lock(&self.inner);
        // stage on a copy, commit by swap
        let mut staged = inner.entities.clone();
        let mut written = Vec::new();
        for w in writes {
            let row = staged
                .get_mut(&w.entity_id)
                .ok_or_else(|| anyhow!("write_prices: unknown entity {}", w.entity_id))?;
            if row.price == Some(w.price.raw()) {
                continue;
            }
            row.price = Some(w.price.raw());
            row.source = Some(source.to_string());
            row.fetched_at = Some(fetched_at.to_string());
            written.push(w.entity_id);
        }
        inner.entities = staged;
        Ok(written)
    }

    async fn owners_for_entities(&self, entity_ids: &[i64]) -> Result<BTreeSet<i64>> {
        self.touch();
        let inner = lock(&self.inner);
        let mut out: BTreeSet<i64> = inner
            .holdings
            .keys()
            .filter(|(_, e)| entity_ids.contains(e))
            .map(|(o, _)| *o)
            .collect();
        out.extend(
            inner
                .transactions
                .iter()
                .filter(|(_, tx)| entity_ids.contains(&tx.entity_id))
                .map(|(o, _)| *o),
        );
        Ok(out)
    }

    async fn load_owner(&self, owner_id: i64) -> Result<Option<OwnerRecord>> {
        self.touch();
        Ok(Self::owner_record(&lock(&self.inner), owner_id))
    }

    async fn load_owners(&self, owner_ids: &[i64]) -> Result<Vec<OwnerRecord>> {
        self.touch();
        let inner = lock(&self.inner);
        Ok(owner_ids
            .iter()
            .filter_map(|id| Self::owner_record(&inner, *id))
            .collect())
    }

    async fn load_holdings(&self, owner_id: i64) -> Result<Vec<Holding>> {
        self.touch();
        if lock(&self.failing_owners).contains(&owner_id) {
            bail!("load_holdings failed for owner {owner_id}: injected");
        }
        let inner = lock(&self.inner);
        Ok(inner
            .holdings
            .iter()
            .filter(|((o, _), _)| *o == owner_id)
            .map(|((_, entity_id), qty)| {
                let row = inner.entities.get(entity_id);
                Holding {
                    entity_id: *entity_id,
                    symbol: row.and_then(|r| r.entity.symbol.clone()),
                    quantity: *qty,
                    price: row
                        .and_then(|r| r.price)
                        .and_then(|p| ScaledPrice::new_positive(p).ok()),
                }
            })
            .collect())
    }

    async fn load_transactions(&self, owner_id: i64) -> Result<Vec<Transaction>> {
        self.touch();
        Ok(lock(&self.inner)
            .transactions
            .iter()
            .filter(|(o, _)| *o == owner_id)
            .map(|(_, tx)| tx.clone())
            .collect())
    }

    async fn write_owner_aggregate(
        &self,
        owner_id: i64,
        current_value: f64,
        purchase_baseline: f64,
    ) -> Result<()> {
        self.touch();
        let mut inner = lock(&self.inner);
        let owner = inner
            .owners
            .get_mut(&owner_id)
            .ok_or_else(|| anyhow!("write_owner_aggregate: owner {owner_id} not found"))?;
        owner.current_value = Some(current_value);
        owner.purchase_baseline = Some(purchase_baseline);
        Ok(())
    }
}

#[async_trait]
impl PositionLoader for InMemoryStore {
    async fn load_positions(&self, owner_id: i64) -> Result<Vec<PositionDetail>> {
        self.touch();
        let inner = lock(&self.inner);
        Ok(inner
            .holdings
            .iter()
            .filter(|((o, _), qty)| *o == owner_id && qty.abs() > f64::EPSILON)
            .map(|((_, entity_id), qty)| {
                let row = inner.entities.get(entity_id);
                let price = row
                    .and_then(|r| r.price)
                    .and_then(|p| ScaledPrice::new_positive(p).ok());
                PositionDetail {
                    entity_id: *entity_id,
                    symbol: row.and_then(|r| r.entity.symbol.clone()),
                    quantity: *qty,
                    price: price.map(ScaledPrice::to_f64),
                    currency: row.and_then(|r| r.entity.currency.clone()),
                    market_value: price.map(|p| p.value_of(*qty)),
                    price_fetched_at: row.and_then(|r| r.fetched_at.clone()),
                }
            })
            .collect())
    }
}
