//! qw-config
//!
//! Layered YAML configuration for the quote daemon:
//! - later documents override earlier ones (deep merge)
//! - literal secrets are rejected; YAML stores only env var NAMES
//! - the effective config is hashed (SHA-256 of canonical JSON) for logging
//! - typed settings with defaults and validation

pub mod secrets;

use std::collections::BTreeSet;
use std::fs;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

pub use secrets::{resolve_secrets, resolve_secrets_with, ResolvedSecrets};

/// Known secret-like prefixes / patterns. If any leaf string value in the
/// effective config starts with one of these, loading aborts with
/// CONFIG_SECRET_DETECTED.
const SECRET_PREFIXES: &[&str] = &[
    "sk-",         // OpenAI style
    "sk_live",     // Stripe live
    "sk_test",     // Stripe test
    "AKIA",        // AWS access key ID
    "-----BEGIN",  // PEM private keys
    "ghp_",        // GitHub PAT
    "glpat-",      // GitLab PAT
    "xoxb-",       // Slack bot token
    "postgres://", // connection strings carry credentials
    "postgresql://",
];

pub const ENV_CONFIG_PATH: &str = "QW_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "quotewatch.yaml";

// ---------------------------------------------------------------------------
// Typed settings
// ---------------------------------------------------------------------------

/// Per-cycle constants shared by every scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CycleSettings {
    /// Timer period between cycle firings.
    pub interval_secs: u64,
    /// Symbols per provider call (further capped by the provider's own limit).
    pub batch_size: usize,
    /// Timeout applied to each chunk fetch independently.
    pub chunk_timeout_secs: u64,
    /// Minimum spacing between "no quotes returned" warnings.
    pub zero_quote_warn_interval_secs: u64,
    /// Cycles slower than this log a watchdog warning (never fatal).
    pub watchdog_ms: u64,
    /// Consecutive zero-quote cycles before the repeated-failure warning.
    pub error_threshold: u32,
    /// Overrides the provider tag persisted as price source.
    pub price_source: Option<String>,
}

impl Default for CycleSettings {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            batch_size: 50,
            chunk_timeout_secs: 20,
            zero_quote_warn_interval_secs: 1800,
            watchdog_ms: 25_000,
            error_threshold: 3,
            price_source: None,
        }
    }
}

impl CycleSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn chunk_timeout(&self) -> Duration {
        Duration::from_secs(self.chunk_timeout_secs)
    }

    pub fn zero_quote_warn_interval(&self) -> Duration {
        Duration::from_secs(self.zero_quote_warn_interval_secs)
    }

    pub fn watchdog(&self) -> Duration {
        Duration::from_millis(self.watchdog_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.interval_secs == 0 {
            bail!("CONFIG_INVALID cycle.interval_secs must be > 0");
        }
        if self.batch_size == 0 {
            bail!("CONFIG_INVALID cycle.batch_size must be >= 1");
        }
        if self.chunk_timeout_secs == 0 {
            bail!("CONFIG_INVALID cycle.chunk_timeout_secs must be > 0");
        }
        if self.error_threshold == 0 {
            bail!("CONFIG_INVALID cycle.error_threshold must be >= 1");
        }
        if let Some(src) = &self.price_source {
            let t = src.trim();
            if t.is_empty() || t.len() > 32 {
                bail!("CONFIG_INVALID cycle.price_source must be a short non-empty tag");
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Twelvedata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProviderSettings {
    pub kind: ProviderKind,
    pub base_url: String,
    /// Name of the env var holding the API key (never the key itself).
    pub api_key_env: String,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            kind: ProviderKind::Twelvedata,
            base_url: "https://api.twelvedata.com".to_string(),
            api_key_env: "TWELVEDATA_API_KEY".to_string(),
        }
    }
}

/// One monitored dataset: its own database, lock and cycle state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScopeSettings {
    pub name: String,
    /// Name of the env var holding the Postgres URL.
    pub database_url_env: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonSettings {
    pub bind_addr: String,
    pub event_bus_capacity: usize,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8899".to_string(),
            event_bus_capacity: 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QuotewatchConfig {
    pub cycle: CycleSettings,
    pub provider: ProviderSettings,
    pub scopes: Vec<ScopeSettings>,
    pub daemon: DaemonSettings,
}

impl QuotewatchConfig {
    pub fn validate(&self) -> Result<()> {
        self.cycle.validate()?;
        if self.daemon.event_bus_capacity == 0 {
            bail!("CONFIG_INVALID daemon.event_bus_capacity must be >= 1");
        }
        let mut seen = BTreeSet::new();
        for s in &self.scopes {
            if s.name.trim().is_empty() {
                bail!("CONFIG_INVALID scopes[].name must be non-empty");
            }
            if s.database_url_env.trim().is_empty() {
                bail!("CONFIG_INVALID scope '{}' has empty database_url_env", s.name);
            }
            if !seen.insert(s.name.as_str()) {
                bail!("CONFIG_INVALID duplicate scope name '{}'", s.name);
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config_hash: String,
    pub canonical_json: String,
    pub config: QuotewatchConfig,
}

/// Load from the path in `QW_CONFIG` (default `quotewatch.yaml`).
pub fn load_from_env() -> Result<LoadedConfig> {
    let path = std::env::var(ENV_CONFIG_PATH).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    load_layered_yaml(&[path.as_str()])
}

pub fn load_layered_yaml(paths: &[&str]) -> Result<LoadedConfig> {
    let mut docs: Vec<String> = Vec::new();
    for p in paths {
        let raw =
            fs::read_to_string(p).with_context(|| format!("failed to read yaml path: {p}"))?;
        docs.push(raw);
    }

    let doc_refs: Vec<&str> = docs.iter().map(|s| s.as_str()).collect();
    load_layered_yaml_from_strings(&doc_refs)
}

pub fn load_layered_yaml_from_strings(yaml_docs: &[&str]) -> Result<LoadedConfig> {
    // Merge YAML docs in order: earlier docs are base, later docs override.
    let mut merged = serde_json::json!({});
    for raw in yaml_docs {
        let v_yaml: serde_yaml::Value = serde_yaml::from_str(raw).context("invalid yaml")?;
        let v_json = serde_json::to_value(v_yaml).context("yaml->json conversion failed")?;
        // an empty document parses as null; treat it as an empty layer
        if v_json.is_null() {
            continue;
        }
        merged = deep_merge(merged, v_json);
    }

    enforce_no_secret_literals(&merged)?;

    let config: QuotewatchConfig =
        serde_json::from_value(merged.clone()).context("CONFIG_SCHEMA invalid config shape")?;
    config.validate()?;

    // Hash the effective (defaults-applied) config so an omitted key and its
    // explicit default hash identically.
    let effective = serde_json::to_value(&config).context("effective config serialize failed")?;
    let canonical_json = canonicalize_json(&effective)?;
    let config_hash = sha256_hex(canonical_json.as_bytes());
    Ok(LoadedConfig {
        config_hash,
        canonical_json,
        config,
    })
}

fn deep_merge(a: Value, b: Value) -> Value {
    match (a, b) {
        (Value::Object(mut a_map), Value::Object(b_map)) => {
            for (k, b_val) in b_map {
                let a_val = a_map.remove(&k).unwrap_or(Value::Null);
                a_map.insert(k, deep_merge(a_val, b_val));
            }
            Value::Object(a_map)
        }
        (_, b_other) => b_other,
    }
}

fn canonicalize_json(v: &Value) -> Result<String> {
    // serde_json::Map is BTreeMap-backed here (no preserve_order), so keys
    // serialize sorted.
    let s = serde_json::to_string(v).context("canonical json serialize failed")?;
    Ok(s)
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn enforce_no_secret_literals(v: &Value) -> Result<()> {
    let mut leaves = Vec::new();
    collect_leaf_pointers(v, "", &mut leaves);

    for ptr in leaves {
        if let Some(s) = v.pointer(&ptr).and_then(Value::as_str) {
            if looks_like_secret(s) {
                bail!("CONFIG_SECRET_DETECTED leaf={} value=REDACTED", ptr);
            }
        }
    }
    Ok(())
}

fn collect_leaf_pointers(v: &Value, prefix: &str, out: &mut Vec<String>) {
    match v {
        Value::Object(map) => {
            for (k, vv) in map.iter() {
                let next = format!("{}/{}", prefix, escape_pointer_token(k));
                collect_leaf_pointers(vv, &next, out);
            }
        }
        Value::Array(arr) => {
            for (i, vv) in arr.iter().enumerate() {
                let next = format!("{}/{}", prefix, i);
                collect_leaf_pointers(vv, &next, out);
            }
        }
        _ => {
            let p = if prefix.is_empty() {
                "/".to_string()
            } else {
                prefix.to_string()
            };
            out.push(p);
        }
    }
}

fn escape_pointer_token(s: &str) -> String {
    s.replace('~', "~0").replace('/', "~1")
}

fn looks_like_secret(s: &str) -> bool {
    let t = s.trim();
    if t.len() < 8 {
        return false;
    }
    SECRET_PREFIXES.iter().any(|p| t.starts_with(p))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let loaded = load_layered_yaml_from_strings(&[""]).unwrap();
        assert_eq!(loaded.config.cycle, CycleSettings::default());
        assert_eq!(loaded.config.cycle.batch_size, 50);
        assert_eq!(loaded.config.cycle.chunk_timeout(), Duration::from_secs(20));
        assert!(loaded.config.scopes.is_empty());
        assert_eq!(loaded.config_hash.len(), 64);
    }

    #[test]
    fn unknown_key_is_rejected() {
        let err = load_layered_yaml_from_strings(&["cycle:\n  batch_sise: 10\n"]).unwrap_err();
        assert!(format!("{err:#}").contains("CONFIG_SCHEMA"));
    }

    #[test]
    fn zero_batch_size_is_invalid() {
        let err = load_layered_yaml_from_strings(&["cycle:\n  batch_size: 0\n"]).unwrap_err();
        assert!(err.to_string().contains("batch_size"));
    }

    #[test]
    fn duplicate_scope_names_are_invalid() {
        let yaml = r#"
scopes:
  - name: main
    database_url_env: QW_DB_MAIN
  - name: main
    database_url_env: QW_DB_OTHER
"#;
        let err = load_layered_yaml_from_strings(&[yaml]).unwrap_err();
        assert!(err.to_string().contains("duplicate scope"));
    }

    #[test]
    fn pointer_escaping() {
        assert_eq!(escape_pointer_token("a/b~c"), "a~1b~0c");
    }
}
