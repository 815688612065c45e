//! Response types for the read-only qw-daemon endpoints.
//!
//! `Serialize + Deserialize` so Axum can encode them and tests can decode
//! them. No logic lives here.

use serde::{Deserialize, Serialize};

use qw_schemas::CycleMeta;

// ---------------------------------------------------------------------------
// /v1/health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: String,
    pub version: String,
    pub config_hash: String,
    pub uptime_secs: u64,
}

// ---------------------------------------------------------------------------
// /v1/cycles
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeCycle {
    pub scope: String,
    /// `None` until the scope's first cycle completes.
    pub last: Option<CycleMeta>,
    pub consecutive_errors: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CyclesResponse {
    pub scopes: Vec<ScopeCycle>,
}
