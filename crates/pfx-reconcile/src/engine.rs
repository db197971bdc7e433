use crate::{DesiredSet, DiffResult, KnownState};

/// Pure reconciliation of a freshly fetched desired set against known state.
///
/// - prefix in `desired`, not in `known` => `added`, inserted into the new state
/// - prefix in `known`, not in `desired` => `removed`, dropped from the new state
/// - prefix in both => untouched (metadata is not compared)
///
/// The returned state always equals `desired` set-wise.
pub fn reconcile(desired: &DesiredSet, known: &KnownState) -> (DiffResult, KnownState) {
    let mut next = known.clone();
    let diff = apply_into(desired, &mut next);
    (diff, next)
}

fn apply_into(desired: &DesiredSet, known: &mut KnownState) -> DiffResult {
    let mut diff = DiffResult::empty();

    // 1) New prefixes
    for (prefix, meta) in desired.iter() {
        if !known.contains(prefix) {
            diff.added.insert(prefix.clone());
            known.insert(prefix.clone(), meta.clone());
        }
    }

    // 2) Prefixes that disappeared from the store
    let gone: Vec<_> = known
        .prefixes()
        .filter(|p| !desired.contains(p))
        .cloned()
        .collect();
    for prefix in gone {
        known.remove(&prefix);
        diff.removed.insert(prefix);
    }

    diff
}

/// Single owner of [`KnownState`] for the process lifetime.
///
/// Lives inside the reconciliation loop task and is only ever touched through
/// `&mut self`, so no locking is involved.
#[derive(Debug, Default)]
pub struct DiffEngine {
    known: KnownState,
}

impl DiffEngine {
    /// Engine for a fresh process: empty known state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Diff `desired` against the current known state and commit the result.
    ///
    /// Idempotent: applying the same desired set twice yields an empty diff
    /// the second time.
    pub fn apply(&mut self, desired: &DesiredSet) -> DiffResult {
        apply_into(desired, &mut self.known)
    }

    pub fn known(&self) -> &KnownState {
        &self.known
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Prefix, PrefixMeta};

    fn set(items: &[&str]) -> DesiredSet {
        items.iter().copied().collect()
    }

    #[test]
    fn metadata_change_is_invisible() {
        let mut engine = DiffEngine::new();
        let mut d1 = DesiredSet::empty();
        d1.insert(Prefix::from("10.0.0.0/24"), PrefixMeta::tagged("a"));
        engine.apply(&d1);

        let mut d2 = DesiredSet::empty();
        d2.insert(Prefix::from("10.0.0.0/24"), PrefixMeta::tagged("b"));
        let diff = engine.apply(&d2);

        assert!(diff.is_empty());
        // The metadata recorded at announce time is kept.
        assert_eq!(
            engine
                .known()
                .meta(&Prefix::from("10.0.0.0/24"))
                .and_then(|m| m.tag()),
            Some("a")
        );
    }

    #[test]
    fn pure_reconcile_does_not_touch_input_state() {
        let known = KnownState::empty();
        let (diff, next) = reconcile(&set(&["A"]), &known);
        assert!(known.is_empty());
        assert_eq!(next.len(), 1);
        assert_eq!(diff.added.len(), 1);
    }

    #[test]
    fn prefix_equality_is_exact_string_match() {
        let mut engine = DiffEngine::new();
        engine.apply(&set(&["10.0.0.0/24"]));
        let diff = engine.apply(&set(&["10.0.0.0/024"]));
        assert!(diff.added.contains(&Prefix::from("10.0.0.0/024")));
        assert!(diff.removed.contains(&Prefix::from("10.0.0.0/24")));
    }

    #[test]
    fn duplicate_rows_collapse_to_one_prefix() {
        let d = set(&["A", "A", "B"]);
        assert_eq!(d.len(), 2);
    }
}
