//! Scenario: diff engine properties
//!
//! # Invariants under test
//!
//! 1. `added = D \ K`, `removed = K \ D`, new known state equals D.
//! 2. Re-applying the same D yields an empty diff (idempotence).
//! 3. `added ∩ removed = ∅` over a sequence of changing inputs.
//! 4. Empty sides of a diff never become batches.
//! 5. Restart: empty K + {"10.0.0.0/24"} => added = {"10.0.0.0/24"}.
//! 6. Steady state: identical consecutive fetches => empty second diff.
//! 7. Full withdrawal: {"A","B"} -> {} => removed = {"A","B"}.
//!
//! All tests are pure in-process; no DB or network required.

use std::collections::BTreeSet;

use pfx_reconcile::{reconcile, DesiredSet, DiffEngine, KnownState, Prefix, PrefixBatch};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn set(items: &[&str]) -> DesiredSet {
    items.iter().copied().collect()
}

fn prefixes(items: &[&str]) -> BTreeSet<Prefix> {
    items.iter().map(|s| Prefix::from(*s)).collect()
}

fn known_from(items: &[&str]) -> KnownState {
    let (_, known) = reconcile(&set(items), &KnownState::empty());
    known
}

// ---------------------------------------------------------------------------
// 1. Diff correctness
// ---------------------------------------------------------------------------

#[test]
fn diff_is_set_difference_both_ways() {
    let known = known_from(&["A", "B", "C"]);
    let desired = set(&["B", "C", "D", "E"]);

    let (diff, next) = reconcile(&desired, &known);

    assert_eq!(diff.added, prefixes(&["D", "E"]));
    assert_eq!(diff.removed, prefixes(&["A"]));
    assert!(next.matches(&desired), "new known state must equal D");
}

// ---------------------------------------------------------------------------
// 2. Idempotence
// ---------------------------------------------------------------------------

#[test]
fn second_reconcile_with_same_input_is_empty() {
    let known = known_from(&["A", "X"]);
    let desired = set(&["A", "B"]);

    let (first, next) = reconcile(&desired, &known);
    assert!(!first.is_empty());

    let (second, again) = reconcile(&desired, &next);
    assert!(second.added.is_empty());
    assert!(second.removed.is_empty());
    assert_eq!(next, again);
}

// ---------------------------------------------------------------------------
// 3. No overlap
// ---------------------------------------------------------------------------

#[test]
fn added_and_removed_never_overlap() {
    let inputs: [&[&str]; 5] = [
        &["A", "B"],
        &["B", "C"],
        &[],
        &["A", "C", "D"],
        &["D"],
    ];

    let mut engine = DiffEngine::new();
    for input in inputs {
        let diff = engine.apply(&set(input));
        assert!(
            diff.added.is_disjoint(&diff.removed),
            "overlap for input {input:?}: {diff:?}"
        );
        assert!(engine.known().matches(&set(input)));
    }
}

// ---------------------------------------------------------------------------
// 4. Empty sides never become batches
// ---------------------------------------------------------------------------

#[test]
fn empty_side_is_not_a_batch() {
    let mut engine = DiffEngine::new();
    let (added, removed) = engine.apply(&set(&["A"])).into_batches();
    assert!(added.is_some());
    assert!(removed.is_none(), "no removal batch when nothing was removed");

    let (added, removed) = engine.apply(&set(&["A"])).into_batches();
    assert!(added.is_none());
    assert!(removed.is_none());

    assert!(PrefixBatch::new(BTreeSet::new()).is_none());
}

// ---------------------------------------------------------------------------
// 5. Restart semantics
// ---------------------------------------------------------------------------

#[test]
fn restart_reannounces_everything_in_the_store() {
    let mut engine = DiffEngine::new();
    let diff = engine.apply(&set(&["10.0.0.0/24"]));

    assert_eq!(diff.added, prefixes(&["10.0.0.0/24"]));
    assert!(diff.removed.is_empty());
}

// ---------------------------------------------------------------------------
// 6. Steady state
// ---------------------------------------------------------------------------

#[test]
fn identical_consecutive_cycles_produce_empty_second_diff() {
    let mut engine = DiffEngine::new();
    let desired = set(&["10.0.0.0/24", "10.0.1.0/24"]);

    let first = engine.apply(&desired);
    assert_eq!(first.added.len(), 2);

    let second = engine.apply(&desired);
    assert!(second.is_empty(), "steady state must be quiet: {second:?}");
}

// ---------------------------------------------------------------------------
// 7. Full withdrawal
// ---------------------------------------------------------------------------

#[test]
fn empty_desired_set_withdraws_everything() {
    let mut engine = DiffEngine::new();
    engine.apply(&set(&["A", "B"]));

    let diff = engine.apply(&DesiredSet::empty());

    assert!(diff.added.is_empty());
    assert_eq!(diff.removed, prefixes(&["A", "B"]));
    assert!(engine.known().is_empty());
}

#[test]
fn prefix_serializes_as_plain_string() {
    let json = serde_json::to_string(&Prefix::from("192.0.2.1/32")).unwrap();
    assert_eq!(json, "\"192.0.2.1/32\"");
}
