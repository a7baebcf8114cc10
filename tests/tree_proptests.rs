//! Property-based tests for `Art`.
//!
//! Differential testing against `BTreeMap` as an oracle, covering point
//! operations, structural thresholds and ordered range scans.

#![expect(clippy::unwrap_used, reason = "fail fast in tests")]

use std::collections::BTreeMap;

use mvart::{Art, NodeKind};
use proptest::prelude::*;

// ============================================================================
//  Strategies
// ============================================================================

/// Short keys over a tiny alphabet, so keys share prefixes and many keys are
/// prefixes of each other.
fn dense_key() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(prop::sample::select(vec![b'a', b'b', b'c', 0, 255]), 0..=6)
}

/// Arbitrary binary keys.
fn binary_key() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=24)
}

/// Keys with a long shared head, exercising prefixes past the inline limit.
fn long_prefix_key() -> impl Strategy<Value = Vec<u8>> {
    (prop::collection::vec(any::<u8>(), 0..=4), 0..3u8).prop_map(|(tail, head)| {
        let mut key = vec![head; 20];
        key.extend(tail);
        key
    })
}

fn any_key() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        3 => dense_key(),
        2 => binary_key(),
        2 => long_prefix_key(),
    ]
}

/// Operations for random testing.
#[derive(Debug, Clone)]
enum Op {
    Insert(Vec<u8>, u64),
    Remove(Vec<u8>),
    Search(Vec<u8>),
}

fn operations(max_ops: usize) -> impl Strategy<Value = Vec<Op>> {
    prop::collection::vec(
        prop_oneof![
            4 => (any_key(), any::<u64>()).prop_map(|(k, v)| Op::Insert(k, v)),
            2 => any_key().prop_map(Op::Remove),
            1 => any_key().prop_map(Op::Search),
        ],
        0..=max_ops,
    )
}

fn assert_same_contents(tree: &Art<u64>, oracle: &BTreeMap<Vec<u8>, u64>) {
    let scanned: Vec<(Vec<u8>, u64)> = tree.iter(None, None).map(|(k, v)| (k, *v)).collect();
    let expected: Vec<(Vec<u8>, u64)> = oracle.iter().map(|(k, v)| (k.clone(), *v)).collect();
    assert_eq!(scanned, expected);
    assert_eq!(tree.len(), oracle.len());
}

// ============================================================================
//  Point Operations
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// Every inserted key is retrievable.
    #[test]
    fn insert_then_search_returns_value(key in any_key(), value: u64) {
        let tree: Art<u64> = Art::new();
        prop_assert!(tree.insert(&key, value).is_none());
        prop_assert_eq!(tree.search(&key).map(|v| *v), Some(value));
    }

    /// Re-inserting a key returns the previous value.
    #[test]
    fn insert_duplicate_returns_old_value(key in any_key(), v1: u64, v2: u64) {
        let tree: Art<u64> = Art::new();
        tree.insert(&key, v1);
        prop_assert_eq!(tree.insert(&key, v2).map(|v| *v), Some(v1));
        prop_assert_eq!(*tree.search(&key).unwrap(), v2);
        prop_assert_eq!(tree.len(), 1);
    }

    /// Removing a key never inserted reports nothing removed.
    #[test]
    fn remove_missing_is_none(inserted in any_key(), missing in any_key()) {
        prop_assume!(inserted != missing);
        let tree: Art<u64> = Art::new();
        tree.insert(&inserted, 1);
        prop_assert!(tree.remove(&missing).is_none());
        prop_assert_eq!(tree.len(), 1);
    }
}

// ============================================================================
//  Differential Testing Against BTreeMap
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Random operation sequences match `BTreeMap`, including scan order.
    #[test]
    fn differential_random_ops(ops in operations(200)) {
        let tree: Art<u64> = Art::new();
        let mut oracle: BTreeMap<Vec<u8>, u64> = BTreeMap::new();

        for op in ops {
            match op {
                Op::Insert(key, value) => {
                    prop_assert_eq!(
                        tree.insert(&key, value).map(|v| *v),
                        oracle.insert(key.clone(), value),
                        "insert mismatch for {:?}", key
                    );
                }
                Op::Remove(key) => {
                    prop_assert_eq!(
                        tree.remove(&key).map(|v| *v),
                        oracle.remove(&key),
                        "remove mismatch for {:?}", key
                    );
                }
                Op::Search(key) => {
                    prop_assert_eq!(tree.search(&key).map(|v| *v), oracle.get(&key).copied());
                }
            }
        }
        assert_same_contents(&tree, &oracle);
    }

    /// Removing everything leaves no inner nodes besides the root.
    #[test]
    fn remove_all_collapses_tree(keys in prop::collection::btree_set(any_key(), 0..100)) {
        let tree: Art<u64> = Art::new();
        for key in &keys {
            tree.insert(key, 0);
        }
        for key in &keys {
            prop_assert!(tree.remove(key).is_some());
        }
        let stats = tree.node_stats();
        prop_assert_eq!(stats.leaves, 0);
        prop_assert_eq!(stats.count(NodeKind::Node4), 0);
        prop_assert_eq!(stats.count(NodeKind::Node16), 0);
        prop_assert_eq!(stats.count(NodeKind::Node48), 0);
        prop_assert_eq!(stats.count(NodeKind::Node256), 1);
        prop_assert!(tree.is_empty());
    }

    /// Bounded scans match a filtered `BTreeMap` walk in both directions.
    #[test]
    fn differential_range_scans(
        keys in prop::collection::btree_set(any_key(), 0..120),
        start in prop::option::of(any_key()),
        end in prop::option::of(any_key()),
    ) {
        let tree: Art<u64> = Art::new();
        for (i, key) in keys.iter().enumerate() {
            tree.insert(key, i as u64);
        }

        let in_forward = |k: &Vec<u8>| {
            start.as_ref().is_none_or(|s| k > s) && end.as_ref().is_none_or(|e| k <= e)
        };
        let forward: Vec<Vec<u8>> = tree
            .iter(start.as_deref(), end.as_deref())
            .map(|(k, _)| k)
            .collect();
        let expected: Vec<Vec<u8>> = keys.iter().filter(|k| in_forward(k)).cloned().collect();
        prop_assert_eq!(forward, expected);

        let in_reverse = |k: &Vec<u8>| {
            start.as_ref().is_none_or(|s| k >= s) && end.as_ref().is_none_or(|e| k < e)
        };
        let reverse: Vec<Vec<u8>> = tree
            .iter(start.as_deref(), end.as_deref())
            .reverse()
            .map(|(k, _)| k)
            .collect();
        let expected: Vec<Vec<u8>> = keys.iter().rev().filter(|k| in_reverse(k)).cloned().collect();
        prop_assert_eq!(reverse, expected);
    }
}

// ============================================================================
//  Structural Thresholds
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    /// Growing to `n` children under one node picks the smallest kind that
    /// fits, and removing all but one child collapses the node.
    #[test]
    fn fanout_tracks_smallest_kind(n in 2usize..=256, seed: u64) {
        let tree: Art<u64> = Art::new();
        let mut bytes: Vec<u8> = (0..=255u8).collect();
        // Deterministic shuffle from the seed.
        let mut state = seed | 1;
        for i in (1..bytes.len()).rev() {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            bytes.swap(i, (state % (i as u64 + 1)) as usize);
        }
        let children = &bytes[..n];

        for &b in children {
            tree.insert(&[b'p', b], u64::from(b));
        }
        let expected = match n {
            0..=4 => NodeKind::Node4,
            5..=16 => NodeKind::Node16,
            17..=48 => NodeKind::Node48,
            _ => NodeKind::Node256,
        };
        let stats = tree.node_stats();
        // The root is always a Node256.
        let root_adjust = usize::from(expected == NodeKind::Node256);
        prop_assert_eq!(stats.count(expected), 1 + root_adjust);

        for &b in children {
            prop_assert_eq!(*tree.search(&[b'p', b]).unwrap(), u64::from(b));
        }

        let mut model: BTreeMap<Vec<u8>, u64> =
            children.iter().map(|&b| (vec![b'p', b], u64::from(b))).collect();
        for &b in &children[..n - 1] {
            tree.remove(&[b'p', b]);
            model.remove(&vec![b'p', b]);
        }
        // One child left: the inner node collapsed into the leaf.
        assert_same_contents(&tree, &model);
        prop_assert_eq!(tree.node_stats().leaves, 1);
        prop_assert_eq!(tree.node_stats().count(NodeKind::Node256), 1);
    }
}
