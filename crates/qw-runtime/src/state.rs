//! Scope-local mutable state shared by every cycle of one scope.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard, RwLock};
use tokio::time::Instant;

use qw_schemas::CycleMeta;

use crate::directory::SymbolDirectory;

/// Lives as long as the scope. Cleared only by dropping it on teardown.
pub struct CycleState {
    scope: String,
    lock: Mutex<()>,
    error_count: AtomicU32,
    drift_warned: Mutex<BTreeSet<String>>,
    directory: RwLock<Option<Arc<SymbolDirectory>>>,
    empty_directory_logged: AtomicBool,
    last_zero_quote_warn: Mutex<Option<Instant>>,
    last_symbol_count: AtomicUsize,
    last_meta: RwLock<Option<CycleMeta>>,
}

impl CycleState {
    pub fn new<S: Into<String>>(scope: S) -> Self {
        Self {
            scope: scope.into(),
            lock: Mutex::new(()),
            error_count: AtomicU32::new(0),
            drift_warned: Mutex::new(BTreeSet::new()),
            directory: RwLock::new(None),
            empty_directory_logged: AtomicBool::new(false),
            last_zero_quote_warn: Mutex::new(None),
            last_symbol_count: AtomicUsize::new(0),
            last_meta: RwLock::new(None),
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Non-blocking; `None` means another cycle owns the scope.
    pub fn try_acquire(&self) -> Option<MutexGuard<'_, ()>> {
        self.lock.try_lock().ok()
    }

    pub fn error_count(&self) -> u32 {
        self.error_count.load(Ordering::SeqCst)
    }

    /// Increments the consecutive zero-quote counter; returns the new value.
    pub fn record_zero_quote_cycle(&self) -> u32 {
        self.error_count.fetch_add(1, Ordering::SeqCst).saturating_add(1)
    }

    pub fn reset_errors(&self) {
        self.error_count.store(0, Ordering::SeqCst);
    }

    /// `true` the first time `symbol` is seen; the set never shrinks.
    pub async fn mark_drift_warned(&self, symbol: &str) -> bool {
        let mut warned = self.drift_warned.lock().await;
        if warned.contains(symbol) {
            return false;
        }
        warned.insert(symbol.to_string())
    }

    pub async fn drift_warned(&self) -> BTreeSet<String> {
        self.drift_warned.lock().await.clone()
    }

    /// Cached directory, if one was built and is non-empty.
    pub async fn cached_directory(&self) -> Option<Arc<SymbolDirectory>> {
        self.directory
            .read()
            .await
            .as_ref()
            .filter(|d| !d.is_empty())
            .cloned()
    }

    pub async fn store_directory(&self, dir: Arc<SymbolDirectory>) {
        *self.directory.write().await = Some(dir);
    }

    /// Forces the next cycle to rebuild the directory.
    pub async fn invalidate_directory(&self) {
        *self.directory.write().await = None;
    }

    /// Returns `true` only on the first empty build since the last
    /// non-empty one.
    pub(crate) fn note_empty_directory(&self) -> bool {
        !self.empty_directory_logged.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn note_non_empty_directory(&self) {
        self.empty_directory_logged.store(false, Ordering::SeqCst);
    }

    /// Throttle gate for the zero-quote warning.
    pub async fn should_warn_zero_quotes(&self, min_interval: Duration) -> bool {
        let now = Instant::now();
        let mut last = self.last_zero_quote_warn.lock().await;
        match *last {
            Some(prev) if now.duration_since(prev) < min_interval => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }

    pub fn last_symbol_count(&self) -> usize {
        self.last_symbol_count.load(Ordering::SeqCst)
    }

    pub(crate) fn set_last_symbol_count(&self, n: usize) {
        self.last_symbol_count.store(n, Ordering::SeqCst);
    }

    pub async fn last_meta(&self) -> Option<CycleMeta> {
        self.last_meta.read().await.clone()
    }

    pub(crate) async fn set_last_meta(&self, meta: CycleMeta) {
        *self.last_meta.write().await = Some(meta);
    }
}

impl std::fmt::Debug for CycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CycleState")
            .field("scope", &self.scope)
            .field("error_count", &self.error_count())
            .field("last_symbol_count", &self.last_symbol_count())
            .finish_non_exhaustive()
    }
}
