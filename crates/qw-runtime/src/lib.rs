//! qw-runtime
//!
//! Price-update cycle orchestration for one or more scopes:
//! - [`CycleState`]: per-scope lock, counters and caches
//! - [`ScopeRuntime::run_cycle`]: fetch, detect, persist, revalue, dispatch
//! - [`CycleScheduler`]: periodic task per scope with explicit lifecycle
//!
//! Storage, quote source, aggregation and the outbound sink are injected as
//! trait objects.

mod cycle;
mod detect;
mod directory;
mod dispatch;
mod drift;
mod persist;
mod recompute;
mod scheduler;
mod state;

pub use cycle::ScopeRuntime;
pub use detect::{detect_changes, quoted_entity_ids, DetectError, PriceChange};
pub use directory::{ensure_directory, DirectoryEntry, SymbolDirectory};
pub use dispatch::{dispatch_changes, stored_row, DispatchOutcome, EventSink, SOURCE_STORED};
pub use drift::check_currency_drift;
pub use persist::{format_fetched_at, persist_changes};
pub use recompute::{live_row, recompute_impacted, RecomputeOutcome, SOURCE_LIVE};
pub use scheduler::CycleScheduler;
pub use state::CycleState;
