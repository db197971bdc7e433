//! Configuration for the prefix synchroniser.
//!
//! Three sections, each fully defaulted so an empty config is runnable:
//! - `source`: where the desired prefixes live and how often to read them
//! - `routing`: static routing metadata attached to every announced route
//! - `api`: optional administrative HTTP surface
//!
//! Layering order: built-in defaults, then YAML documents (later wins, deep
//! merge), then command-line overrides ([`SourceOverrides`]).

use std::net::{Ipv4Addr, SocketAddr};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

mod layering;
pub mod secrets;

pub use layering::{
    load_layered_yaml, load_layered_yaml_from_strings, LoadedConfig, UnknownKeyPolicy,
};

/// Highest value an MPLS label can carry (20 bits).
pub const MAX_MPLS_LABEL: u32 = (1 << 20) - 1;

/// Address family names the routing engine understands.
pub const KNOWN_AFI_SAFIS: &[&str] = &["ipv4-unicast", "l3vpn-ipv4-unicast"];

// ---------------------------------------------------------------------------
// Top level
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub source: SourceConfig,
    pub routing: RoutingConfig,
    pub api: ApiConfig,
}

impl SyncConfig {
    /// Canonical JSON of the effective config. The password is never included.
    pub fn canonical_json(&self) -> Result<String> {
        serde_json::to_string(self).context("canonical json serialize failed")
    }

    /// SHA-256 over [`Self::canonical_json`], hex encoded.
    pub fn config_hash(&self) -> Result<String> {
        let canonical = self.canonical_json()?;
        Ok(sha256_hex(canonical.as_bytes()))
    }

    /// Minimal startup validation. Any error here is fatal for the daemon.
    pub fn validate(&self) -> Result<()> {
        self.source.validate()?;
        self.routing.validate()?;
        self.api.validate()?;
        Ok(())
    }

    pub fn apply_source_overrides(&mut self, o: SourceOverrides) {
        let s = &mut self.source;
        if let Some(v) = o.username {
            s.username = v;
        }
        if let Some(v) = o.password {
            // An explicit password beats any env indirection from YAML.
            s.password = v;
            s.password_env = None;
        }
        if let Some(v) = o.host {
            s.host = v;
        }
        if let Some(v) = o.port {
            s.port = v;
        }
        if let Some(v) = o.database {
            s.database = v;
        }
        if let Some(v) = o.select_statement {
            s.select_statement = v;
        }
        if let Some(v) = o.scan_interval_secs {
            s.scan_interval_secs = v;
        }
    }
}

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Command-line level overrides for the `source` section. `None` = keep.
#[derive(Clone, Debug, Default)]
pub struct SourceOverrides {
    pub username: Option<String>,
    pub password: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database: Option<String>,
    pub select_statement: Option<String>,
    pub scan_interval_secs: Option<u64>,
}

// ---------------------------------------------------------------------------
// source
// ---------------------------------------------------------------------------

/// What to do with a cycle whose query failed outright.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryErrorPolicy {
    /// Treat the failed query as "no rows": every known prefix is withdrawn.
    #[default]
    WithdrawAll,
    /// Skip the cycle: known state and advertisements stay as they are.
    KeepKnown,
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub username: String,
    /// Literal password. Never serialized, so it stays out of the config hash.
    #[serde(skip_serializing)]
    pub password: String,
    /// Name of an env var holding the password. Wins over `password` when set.
    pub password_env: Option<String>,
    /// IPv4 literal of the store.
    pub host: String,
    pub port: u16,
    pub database: String,
    /// Read-only statement; the first column of each row is the prefix.
    pub select_statement: String,
    pub scan_interval_secs: u64,
    pub retry_interval_secs: u64,
    pub on_query_error: QueryErrorPolicy,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            username: "admin".to_string(),
            password: "admin".to_string(),
            password_env: None,
            host: "127.0.0.1".to_string(),
            port: 3306,
            database: "database".to_string(),
            select_statement: "SELECT prefix as prefix FROM blackholeprefixes".to_string(),
            scan_interval_secs: 30,
            retry_interval_secs: 10,
            on_query_error: QueryErrorPolicy::WithdrawAll,
        }
    }
}

impl std::fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceConfig")
            .field("username", &self.username)
            .field("password", &"<REDACTED>")
            .field("password_env", &self.password_env)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("select_statement", &self.select_statement)
            .field("scan_interval_secs", &self.scan_interval_secs)
            .field("retry_interval_secs", &self.retry_interval_secs)
            .field("on_query_error", &self.on_query_error)
            .finish()
    }
}

impl SourceConfig {
    pub fn host_addr(&self) -> Result<Ipv4Addr> {
        self.host
            .trim()
            .parse::<Ipv4Addr>()
            .with_context(|| format!("{} is not a valid ipv4 address", self.host))
    }

    /// Connection string for logs. The password is always redacted.
    pub fn data_source_name(&self) -> String {
        let mut cred = String::new();
        if !self.username.is_empty() {
            cred.push_str(&self.username);
            cred.push_str(":<REDACTED>@");
        }
        format!(
            "mysql://{}{}:{}/{}",
            cred, self.host, self.port, self.database
        )
    }

    fn validate(&self) -> Result<()> {
        self.host_addr()?;
        if self.port == 0 {
            bail!("source.port must be > 0");
        }
        if self.select_statement.trim().is_empty() {
            bail!("source.select_statement must not be empty");
        }
        if self.scan_interval_secs == 0 {
            bail!("source.scan_interval_secs must be > 0");
        }
        if self.retry_interval_secs == 0 {
            bail!("source.retry_interval_secs must be > 0");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// routing
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    pub local_asn: u32,
    pub router_id: Ipv4Addr,
    /// `None` keeps the speaker from listening for inbound sessions.
    pub listen_port: Option<u16>,
    pub neighbor_address: Ipv4Addr,
    pub peer_asn: u32,
    pub afi_safis: Vec<String>,
    /// `ASN:nn` or `IPv4:nn`.
    pub route_distinguisher: String,
    /// Two-octet AS specific route target, `ASN:nn`.
    pub route_target: String,
    pub label: u32,
    /// Defaults to `router_id` when unset.
    pub next_hop: Option<Ipv4Addr>,
    /// Length used when a stored prefix carries no `/len`.
    pub default_prefix_len: u8,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            local_asn: 65000,
            router_id: Ipv4Addr::new(10, 2, 8, 12),
            listen_port: None,
            neighbor_address: Ipv4Addr::new(10, 2, 51, 7),
            peer_asn: 65000,
            afi_safis: vec![
                "ipv4-unicast".to_string(),
                "l3vpn-ipv4-unicast".to_string(),
            ],
            route_distinguisher: "1:1".to_string(),
            route_target: "1:1".to_string(),
            label: 100,
            next_hop: None,
            default_prefix_len: 32,
        }
    }
}

impl RoutingConfig {
    pub fn effective_next_hop(&self) -> Ipv4Addr {
        self.next_hop.unwrap_or(self.router_id)
    }

    fn validate(&self) -> Result<()> {
        if self.local_asn == 0 {
            bail!("routing.local_asn must be > 0");
        }
        if self.label > MAX_MPLS_LABEL {
            bail!(
                "routing.label {} exceeds 20-bit MPLS label space (max {})",
                self.label,
                MAX_MPLS_LABEL
            );
        }
        if self.default_prefix_len > 32 {
            bail!("routing.default_prefix_len must be <= 32");
        }
        if self.afi_safis.is_empty() {
            bail!("routing.afi_safis must name at least one address family");
        }
        for name in &self.afi_safis {
            if !KNOWN_AFI_SAFIS.contains(&name.as_str()) {
                bail!(
                    "routing.afi_safis: unknown address family '{}'; expected one of {:?}",
                    name,
                    KNOWN_AFI_SAFIS
                );
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// api
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub listen: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: "127.0.0.1:50051".to_string(),
        }
    }
}

impl ApiConfig {
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.listen
            .parse::<SocketAddr>()
            .with_context(|| format!("api.listen '{}' is not a socket address", self.listen))
    }

    fn validate(&self) -> Result<()> {
        if self.enabled {
            self.listen_addr()?;
        }
        Ok(())
    }
}
