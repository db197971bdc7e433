//! Store credential resolution.
//!
//! # Contract
//! - YAML may carry `source.password_env`: the NAME of an env var.
//! - At startup the daemon calls [`resolve_store_credentials`] once and hands
//!   the result to the source connector; nothing else reads the env.
//! - `Debug` on [`StoreCredentials`] redacts the password.
//! - Errors name the env var, never its value.
//!
//! Precedence: explicit password (command line) > `password_env` > literal
//! `source.password`. The command-line override clears `password_env`, see
//! [`crate::SyncConfig::apply_source_overrides`].

use anyhow::{bail, Result};

use crate::SourceConfig;

#[derive(Clone)]
pub struct StoreCredentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for StoreCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreCredentials")
            .field("username", &self.username)
            .field("password", &"<REDACTED>")
            .finish()
    }
}

/// Resolve a named environment variable. Blank counts as unset.
fn resolve_env(var_name: &str) -> Option<String> {
    match std::env::var(var_name) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

pub fn resolve_store_credentials(source: &SourceConfig) -> Result<StoreCredentials> {
    let password = match source.password_env.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => match resolve_env(name) {
            Some(v) => v,
            None => bail!(
                "SECRETS_MISSING: env var '{}' (source.password_env) is not set or empty",
                name
            ),
        },
        _ => source.password.clone(),
    };

    Ok(StoreCredentials {
        username: source.username.clone(),
        password,
    })
}
