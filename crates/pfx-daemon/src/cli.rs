//! Command line and config assembly for the daemon binary.

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use pfx_config::{load_layered_yaml, LoadedConfig, SourceOverrides, UnknownKeyPolicy};
use tracing::warn;

#[derive(Parser, Debug, Default)]
#[command(name = "pfx-daemon")]
#[command(about = "Announce prefixes from a MySQL table to a BGP RIB", long_about = None)]
pub struct Args {
    /// YAML config paths in merge order (later overrides earlier)
    #[arg(long = "config")]
    pub config_paths: Vec<String>,

    /// Reject unknown config keys instead of warning
    #[arg(long, default_value_t = false)]
    pub strict_config: bool,

    /// Database username
    #[arg(long = "dbusername")]
    pub db_username: Option<String>,

    /// Database password
    #[arg(long = "dbpassword")]
    pub db_password: Option<String>,

    /// Database IPv4 address
    #[arg(long = "dbipv4address")]
    pub db_ipv4_address: Option<String>,

    /// Database port
    #[arg(long = "dbport")]
    pub db_port: Option<u16>,

    /// Database name
    #[arg(long = "dbname")]
    pub db_name: Option<String>,

    /// Select statement returning one prefix per row
    #[arg(long = "dbprefixst")]
    pub db_prefix_statement: Option<String>,

    /// Seconds between database scans
    #[arg(long = "dbscantime")]
    pub db_scan_time: Option<u64>,

    /// Do not start the admin HTTP API
    #[arg(long, default_value_t = false)]
    pub no_api: bool,

    /// Admin HTTP API listen address (overrides api.listen)
    #[arg(long)]
    pub api_addr: Option<String>,

    /// -v = debug, -vv = trace (RUST_LOG wins when set)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

impl Args {
    pub fn source_overrides(&self) -> SourceOverrides {
        SourceOverrides {
            username: self.db_username.clone(),
            password: self.db_password.clone(),
            host: self.db_ipv4_address.clone(),
            port: self.db_port,
            database: self.db_name.clone(),
            select_statement: self.db_prefix_statement.clone(),
            scan_interval_secs: self.db_scan_time,
        }
    }

    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

/// Defaults, then `--config` files, then flags. Validated; the hash covers
/// the effective config.
pub fn load_config(args: &Args) -> Result<LoadedConfig> {
    let policy = if args.strict_config {
        UnknownKeyPolicy::Fail
    } else {
        UnknownKeyPolicy::Warn
    };
    let paths: Vec<&str> = args.config_paths.iter().map(|s| s.as_str()).collect();
    let mut loaded = load_layered_yaml(&paths, policy)?;

    for key in &loaded.unknown_keys {
        warn!(op = "config", key = %key, "unknown config key ignored");
    }

    loaded.config.apply_source_overrides(args.source_overrides());
    if args.no_api {
        loaded.config.api.enabled = false;
    }
    if let Some(addr) = &args.api_addr {
        loaded.config.api.listen = addr.clone();
    }

    loaded.config.validate().context("invalid configuration")?;
    loaded.config_hash = loaded.config.config_hash()?;
    Ok(loaded)
}
