use std::collections::{btree_map, BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// A routable network prefix as read from the store (usually CIDR text).
///
/// Opaque to the diff engine: equality is exact string match, so
/// `"10.0.0.0/24"` and `"10.0.0.0/024"` are different prefixes.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Prefix(String);

impl Prefix {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Prefix {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Prefix {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Opaque per-prefix metadata. Carried along but never compared.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefixMeta(Option<String>);

impl PrefixMeta {
    pub fn none() -> Self {
        Self(None)
    }

    pub fn tagged(tag: impl Into<String>) -> Self {
        Self(Some(tag.into()))
    }

    pub fn tag(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

// ---------------------------------------------------------------------------
// DesiredSet
// ---------------------------------------------------------------------------

/// Full desired state as returned by one fetch from the store.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DesiredSet {
    entries: BTreeMap<Prefix, PrefixMeta>,
}

impl DesiredSet {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Insert a prefix. A duplicate row keeps the first metadata seen.
    pub fn insert(&mut self, prefix: Prefix, meta: PrefixMeta) {
        self.entries.entry(prefix).or_insert(meta);
    }

    pub fn contains(&self, prefix: &Prefix) -> bool {
        self.entries.contains_key(prefix)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, Prefix, PrefixMeta> {
        self.entries.iter()
    }
}

impl FromIterator<Prefix> for DesiredSet {
    fn from_iter<I: IntoIterator<Item = Prefix>>(iter: I) -> Self {
        let mut set = DesiredSet::empty();
        for p in iter {
            set.insert(p, PrefixMeta::none());
        }
        set
    }
}

impl<'a> FromIterator<&'a str> for DesiredSet {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        iter.into_iter().map(Prefix::from).collect()
    }
}

// ---------------------------------------------------------------------------
// KnownState
// ---------------------------------------------------------------------------

/// What the loop believes is currently advertised.
///
/// Read-only outside this crate. The only way to change it is through
/// [`crate::reconcile`] / [`crate::DiffEngine::apply`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KnownState {
    entries: BTreeMap<Prefix, PrefixMeta>,
}

impl KnownState {
    /// Fresh process state: nothing known, everything in the store will be announced.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn contains(&self, prefix: &Prefix) -> bool {
        self.entries.contains_key(prefix)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn prefixes(&self) -> impl Iterator<Item = &Prefix> {
        self.entries.keys()
    }

    pub fn meta(&self, prefix: &Prefix) -> Option<&PrefixMeta> {
        self.entries.get(prefix)
    }

    /// Set-wise comparison with a desired set (metadata ignored).
    pub fn matches(&self, desired: &DesiredSet) -> bool {
        self.entries.len() == desired.len() && self.entries.keys().all(|p| desired.contains(p))
    }

    pub(crate) fn insert(&mut self, prefix: Prefix, meta: PrefixMeta) {
        self.entries.insert(prefix, meta);
    }

    pub(crate) fn remove(&mut self, prefix: &Prefix) {
        self.entries.remove(prefix);
    }
}

// ---------------------------------------------------------------------------
// DiffResult / PrefixBatch
// ---------------------------------------------------------------------------

/// Changes produced by one reconcile cycle. `added` and `removed` are disjoint.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DiffResult {
    pub added: BTreeSet<Prefix>,
    pub removed: BTreeSet<Prefix>,
}

impl DiffResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    /// Split into the two publishable batches. Empty sides become `None`.
    pub fn into_batches(self) -> (Option<PrefixBatch>, Option<PrefixBatch>) {
        (
            PrefixBatch::new(self.added),
            PrefixBatch::new(self.removed),
        )
    }
}

/// A non-empty set of prefixes delivered as one event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct PrefixBatch(BTreeSet<Prefix>);

impl PrefixBatch {
    /// Returns `None` for an empty set; empty batches are never published.
    pub fn new(prefixes: BTreeSet<Prefix>) -> Option<Self> {
        if prefixes.is_empty() {
            None
        } else {
            Some(Self(prefixes))
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn iter(&self) -> impl Iterator<Item = &Prefix> {
        self.0.iter()
    }

    pub fn contains(&self, prefix: &Prefix) -> bool {
        self.0.contains(prefix)
    }

    pub fn into_inner(self) -> BTreeSet<Prefix> {
        self.0
    }
}
