use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use qw_schemas::CycleMeta;

use crate::cycle::ScopeRuntime;

struct ScopeHandle {
    runtime: Arc<ScopeRuntime>,
    ticker: JoinHandle<()>,
}

/// Owns one periodic task per scope.
///
/// Each tick spawns its cycle separately, so a slow cycle never delays the
/// timer; the next tick simply finds the scope lock held and reports a
/// skipped run.
#[derive(Default)]
pub struct CycleScheduler {
    scopes: Mutex<BTreeMap<String, ScopeHandle>>,
}

impl CycleScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the periodic task for `runtime`'s scope. Idempotent: if the
    /// scope is already running, `runtime` is dropped and the existing one is
    /// returned with its state intact.
    pub async fn ensure_scope(&self, runtime: ScopeRuntime) -> Arc<ScopeRuntime> {
        let mut scopes = self.scopes.lock().await;
        if let Some(existing) = scopes.get(runtime.scope()) {
            return Arc::clone(&existing.runtime);
        }

        let scope = runtime.scope().to_string();
        let runtime = Arc::new(runtime);
        let ticker = spawn_ticker(Arc::clone(&runtime));
        info!(
            scope = %scope,
            interval_secs = runtime.settings().interval_secs,
            batch_size = runtime.effective_batch_size(),
            "price cycle scheduled"
        );
        scopes.insert(
            scope,
            ScopeHandle {
                runtime: Arc::clone(&runtime),
                ticker,
            },
        );
        runtime
    }

    /// Stop the timer and drop the scope's state. A cycle already in flight
    /// runs to completion.
    pub async fn teardown_scope(&self, scope: &str) -> bool {
        let Some(handle) = self.scopes.lock().await.remove(scope) else {
            return false;
        };
        handle.ticker.abort();
        info!(scope, "price cycle torn down");
        true
    }

    /// Run a cycle now, outside the timer. Honors the scope lock.
    pub async fn run_now(&self, scope: &str) -> Option<CycleMeta> {
        let runtime = self.runtime(scope).await?;
        Some(runtime.run_cycle().await)
    }

    pub async fn runtime(&self, scope: &str) -> Option<Arc<ScopeRuntime>> {
        self.scopes
            .lock()
            .await
            .get(scope)
            .map(|h| Arc::clone(&h.runtime))
    }

    pub async fn scopes(&self) -> Vec<String> {
        self.scopes.lock().await.keys().cloned().collect()
    }

    /// Last completed (non-skipped) cycle of `scope`.
    pub async fn last_meta(&self, scope: &str) -> Option<CycleMeta> {
        let runtime = self.runtime(scope).await?;
        runtime.state().last_meta().await
    }

    pub async fn shutdown(&self) {
        let mut scopes = self.scopes.lock().await;
        for (scope, handle) in std::mem::take(&mut *scopes) {
            handle.ticker.abort();
            info!(scope = %scope, "price cycle stopped");
        }
    }
}

fn spawn_ticker(runtime: Arc<ScopeRuntime>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(runtime.settings().interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let rt = Arc::clone(&runtime);
            let cycle = tokio::spawn(async move {
                rt.run_cycle().await;
            });
            let scope = runtime.scope().to_string();
            tokio::spawn(async move {
                if let Err(e) = cycle.await {
                    if e.is_panic() {
                        error!(scope = %scope, "price cycle panicked");
                    }
                }
            });
        }
    })
}
