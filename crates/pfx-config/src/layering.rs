//! Layered YAML loading.
//!
//! Merge order: built-in defaults, then each YAML document in the order given
//! (later documents override earlier ones, objects merge key by key).
//!
//! Guards applied to the merged document:
//! - leaf strings that look like credentials are rejected
//!   (`CONFIG_SECRET_DETECTED`); YAML carries env var NAMES, not secrets
//! - leaf keys the config model does not know are reported, and fail the
//!   load under [`UnknownKeyPolicy::Fail`]

use std::collections::BTreeSet;
use std::fs;

use anyhow::{bail, Context, Result};
use serde_json::Value;

use crate::SyncConfig;

/// Known secret-like prefixes. A leaf string starting with one of these
/// aborts the load.
const SECRET_PREFIXES: &[&str] = &[
    "sk-",        // Stripe / OpenAI style
    "AKIA",       // AWS access key ID
    "-----BEGIN", // PEM private keys
    "ghp_",       // GitHub PAT
    "glpat-",     // GitLab PAT
    "xoxb-",      // Slack bot token
];

/// Pointers accepted even though the default serialization omits them.
const EXTRA_KNOWN_POINTERS: &[&str] = &["/source/password"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnknownKeyPolicy {
    Warn,
    Fail,
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: SyncConfig,
    pub config_hash: String,
    /// Leaf pointers present in YAML but unknown to the model (sorted).
    pub unknown_keys: Vec<String>,
}

pub fn load_layered_yaml(paths: &[&str], policy: UnknownKeyPolicy) -> Result<LoadedConfig> {
    let mut docs: Vec<String> = Vec::new();
    for p in paths {
        let raw =
            fs::read_to_string(p).with_context(|| format!("failed to read yaml path: {p}"))?;
        docs.push(raw);
    }

    let doc_refs: Vec<&str> = docs.iter().map(|s| s.as_str()).collect();
    load_layered_yaml_from_strings(&doc_refs, policy)
}

pub fn load_layered_yaml_from_strings(
    yaml_docs: &[&str],
    policy: UnknownKeyPolicy,
) -> Result<LoadedConfig> {
    let mut overlay = serde_json::json!({});
    for raw in yaml_docs {
        let v_yaml: serde_yaml::Value = serde_yaml::from_str(raw).context("invalid yaml")?;
        let v_json = serde_json::to_value(v_yaml).context("yaml->json conversion failed")?;
        // An empty YAML document parses as null; treat it as "no overrides".
        if v_json.is_null() {
            continue;
        }
        overlay = deep_merge(overlay, v_json);
    }

    enforce_no_secret_literals(&overlay)?;

    let defaults =
        serde_json::to_value(SyncConfig::default()).context("default config serialize failed")?;
    let unknown_keys = unknown_leaf_pointers(&defaults, &overlay);
    if policy == UnknownKeyPolicy::Fail && !unknown_keys.is_empty() {
        bail!(
            "CONFIG_UNKNOWN_KEYS: {} unknown config leaf key(s) detected. First few: {}",
            unknown_keys.len(),
            preview_list(&unknown_keys, 12)
        );
    }

    let merged = deep_merge(defaults, overlay);
    let config: SyncConfig =
        serde_json::from_value(merged).context("config does not match the expected schema")?;
    let config_hash = config.config_hash()?;

    Ok(LoadedConfig {
        config,
        config_hash,
        unknown_keys,
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

fn unknown_leaf_pointers(defaults: &Value, overlay: &Value) -> Vec<String> {
    let mut known: Vec<String> = Vec::new();
    collect_leaf_pointers(defaults, "", &mut known);
    known.extend(EXTRA_KNOWN_POINTERS.iter().map(|p| p.to_string()));

    let mut leaves: Vec<String> = Vec::new();
    collect_leaf_pointers(overlay, "", &mut leaves);

    let mut unknown: BTreeSet<String> = BTreeSet::new();
    'leaf: for lp in leaves {
        for kp in &known {
            if is_prefix_pointer(kp, &lp) || is_prefix_pointer(&lp, kp) {
                continue 'leaf;
            }
        }
        unknown.insert(lp);
    }
    unknown.into_iter().collect()
}

/// Return true if `prefix` is a JSON-pointer prefix of `leaf`.
///
/// - exact match counts
/// - "/a/b" is a prefix of "/a/b/c" but NOT of "/a/bc"
fn is_prefix_pointer(prefix: &str, leaf: &str) -> bool {
    if leaf == prefix {
        return true;
    }
    if leaf.starts_with(prefix) {
        return leaf
            .get(prefix.len()..prefix.len() + 1)
            .map(|c| c == "/")
            .unwrap_or(false);
    }
    false
}

fn collect_leaf_pointers(v: &Value, prefix: &str, out: &mut Vec<String>) {
    match v {
        Value::Object(map) if !map.is_empty() => {
            for (k, vv) in map.iter() {
                let next = format!("{}/{}", prefix, escape_pointer_token(k));
                collect_leaf_pointers(vv, &next, out);
            }
        }
        // Arrays are values in this model (e.g. routing.afi_safis); a list
        // replaces the default list wholesale.
        _ => {
            if !prefix.is_empty() {
                out.push(prefix.to_string());
            }
        }
    }
}

fn escape_pointer_token(s: &str) -> String {
    s.replace('~', "~0").replace('/', "~1")
}

fn preview_list(items: &[String], n: usize) -> String {
    let take = items.iter().take(n).cloned().collect::<Vec<_>>();
    format!("{:?}", take)
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

fn looks_like_secret(s: &str) -> bool {
    let t = s.trim();
    if t.len() < 8 {
        return false;
    }
    SECRET_PREFIXES.iter().any(|p| t.starts_with(p))
}
