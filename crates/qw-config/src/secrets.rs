//! Runtime secret resolution.
//!
//! # Contract
//! - Config YAML stores only **env var NAMES** (e.g. `"TWELVEDATA_API_KEY"`).
//! - At startup, callers invoke [`resolve_secrets`] once and pass the result
//!   into constructors; never scatter `std::env::var` calls across the code.
//! - `Debug` output **redacts** values.
//! - Error messages reference the env var **NAME**, never the value.

use std::collections::BTreeMap;

use anyhow::{bail, Result};

use crate::QuotewatchConfig;

/// All runtime-resolved secrets for one daemon instantiation.
#[derive(Clone)]
pub struct ResolvedSecrets {
    /// Quote provider API key.
    pub provider_api_key: String,
    /// Postgres URL per scope name.
    pub database_urls: BTreeMap<String, String>,
}

impl std::fmt::Debug for ResolvedSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let scopes: Vec<&String> = self.database_urls.keys().collect();
        f.debug_struct("ResolvedSecrets")
            .field("provider_api_key", &"<REDACTED>")
            .field("database_urls", &scopes)
            .finish()
    }
}

/// Resolve a named environment variable; blank counts as unset.
fn resolve_env(var_name: &str) -> Option<String> {
    match std::env::var(var_name) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

/// Resolve every secret named by `cfg` from the process environment.
pub fn resolve_secrets(cfg: &QuotewatchConfig) -> Result<ResolvedSecrets> {
    resolve_secrets_with(cfg, resolve_env)
}

/// Same as [`resolve_secrets`] with an injectable lookup (tests).
///
/// # Errors
/// Returns `Err` naming the first missing env var. The provider key and
/// every scope's database URL are required.
pub fn resolve_secrets_with<F>(cfg: &QuotewatchConfig, lookup: F) -> Result<ResolvedSecrets>
where
    F: Fn(&str) -> Option<String>,
{
    let key_var = cfg.provider.api_key_env.trim();
    let Some(provider_api_key) = lookup(key_var).filter(|v| !v.trim().is_empty()) else {
        bail!(
            "SECRETS_MISSING: required env var '{}' (provider api key) is not set or empty",
            key_var
        );
    };

    let mut database_urls = BTreeMap::new();
    for scope in &cfg.scopes {
        let var = scope.database_url_env.trim();
        match lookup(var).filter(|v| !v.trim().is_empty()) {
            Some(url) => {
                database_urls.insert(scope.name.clone(), url);
            }
            None => bail!(
                "SECRETS_MISSING: required env var '{}' (database url for scope '{}') is not set or empty",
                var,
                scope.name
            ),
        }
    }

    Ok(ResolvedSecrets {
        provider_api_key,
        database_urls,
    })
}
