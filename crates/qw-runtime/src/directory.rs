use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info};

use qw_db::{PriceStore, TrackedEntity};

use crate::state::CycleState;

/// A tracked entity as seen from its symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectoryEntry {
    pub entity_id: i64,
    pub currency: Option<String>,
}

/// symbol -> entities quoted under that symbol.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SymbolDirectory {
    by_symbol: BTreeMap<String, Vec<DirectoryEntry>>,
}

impl SymbolDirectory {
    /// Retired entities and entities without a usable symbol are left out.
    pub fn from_entities(entities: &[TrackedEntity]) -> Self {
        let mut by_symbol: BTreeMap<String, Vec<DirectoryEntry>> = BTreeMap::new();
        for e in entities.iter().filter(|e| !e.retired) {
            let Some(symbol) = e.symbol.as_deref().map(str::trim).filter(|s| !s.is_empty()) else {
                continue;
            };
            by_symbol
                .entry(symbol.to_string())
                .or_default()
                .push(DirectoryEntry {
                    entity_id: e.id,
                    currency: e.currency.clone(),
                });
        }
        Self { by_symbol }
    }

    pub fn is_empty(&self) -> bool {
        self.by_symbol.is_empty()
    }

    /// Number of distinct symbols.
    pub fn len(&self) -> usize {
        self.by_symbol.len()
    }

    /// Sorted symbol list.
    pub fn symbols(&self) -> Vec<String> {
        self.by_symbol.keys().cloned().collect()
    }

    pub fn entries(&self, symbol: &str) -> &[DirectoryEntry] {
        self.by_symbol.get(symbol).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.by_symbol.contains_key(symbol)
    }
}

/// Cached directory, rebuilt from storage when absent or empty.
pub async fn ensure_directory(
    state: &CycleState,
    store: &dyn PriceStore,
) -> Result<Arc<SymbolDirectory>> {
    if let Some(dir) = state.cached_directory().await {
        return Ok(dir);
    }

    let entities = store.load_tracked_entities().await?;
    let dir = Arc::new(SymbolDirectory::from_entities(&entities));

    if dir.is_empty() {
        if state.note_empty_directory() {
            info!(scope = state.scope(), "no tracked symbols; nothing to price");
        }
    } else {
        state.note_non_empty_directory();
        debug!(
            scope = state.scope(),
            symbols = dir.len(),
            entities = entities.len(),
            "symbol directory rebuilt"
        );
    }

    state.store_directory(Arc::clone(&dir)).await;
    Ok(dir)
}
