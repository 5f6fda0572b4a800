//! Property tests comparing the index against in-memory models.

#![allow(clippy::expect_used)]

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use proptest::prelude::*;
use sift_index::{AccessMode, IndexConfig, InvertedIndex, Query};
use tempfile::TempDir;

type Index = InvertedIndex<u16, u32>;

fn open(dir: &TempDir, name: &str, cache_size: u64, split_len: usize) -> Index {
    let config = IndexConfig::default()
        .with_mode(AccessMode::Create)
        .with_max_segment_len(1 << 20)
        .with_cache_size(cache_size)
        .with_split_len(split_len);
    InvertedIndex::open(dir.path(), name, config).expect("open")
}

#[derive(Debug, Clone)]
enum Op {
    Add(u16, u32),
    AddMany(u16, Vec<u32>),
    Delete(u16, u32),
    Clear(u16),
    DeleteKey(u16),
    PartialFlush,
}

fn op() -> impl Strategy<Value = Op> {
    let key = 0u16..6;
    let item = 0u32..80;
    prop_oneof![
        6 => (key.clone(), item.clone()).prop_map(|(k, i)| Op::Add(k, i)),
        3 => (key.clone(), prop::collection::vec(item.clone(), 0..40))
            .prop_map(|(k, items)| Op::AddMany(k, items)),
        2 => (key.clone(), item).prop_map(|(k, i)| Op::Delete(k, i)),
        1 => key.clone().prop_map(Op::Clear),
        1 => key.prop_map(Op::DeleteKey),
        1 => Just(Op::PartialFlush),
    ]
}

/// Apply `ops` to the index and to a map of sets.
fn apply(index: &mut Index, model: &mut BTreeMap<u16, BTreeSet<u32>>, ops: &[Op]) {
    for op in ops {
        match op {
            Op::Add(key, item) => {
                index.add_item(*key, *item).expect("add");
                model.entry(*key).or_default().insert(*item);
            }
            Op::AddMany(key, items) => {
                index
                    .add_item_vector(*key, items.iter().copied())
                    .expect("add vector");
                model.entry(*key).or_default().extend(items.iter().copied());
            }
            Op::Delete(key, item) => {
                let removed = index.delete_item(key, item).expect("delete");
                let expected = model.get_mut(key).is_some_and(|set| set.remove(item));
                assert_eq!(removed, expected);
            }
            Op::Clear(key) => {
                index.clear(key).expect("clear");
                if let Some(set) = model.get_mut(key) {
                    set.clear();
                }
            }
            Op::DeleteKey(key) => {
                index.delete_key(key).expect("delete key");
                model.remove(key);
            }
            Op::PartialFlush => {
                index
                    .partial_flush(Duration::from_secs(60))
                    .expect("partial flush");
            }
        }
    }
}

fn check(index: &mut Index, model: &BTreeMap<u16, BTreeSet<u32>>) -> Result<(), TestCaseError> {
    for key in 0u16..6 {
        let expected: Vec<u32> = model
            .get(&key)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        let actual = index.evaluate(&Query::key(key)).expect("evaluate");
        prop_assert_eq!(actual, expected, "key {}", key);
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn index_matches_model(ops in prop::collection::vec(op(), 0..80)) {
        let dir = TempDir::new().expect("tempdir");
        let mut index = open(&dir, "model", 1 << 20, 5);
        let mut model = BTreeMap::new();
        apply(&mut index, &mut model, &ops);
        check(&mut index, &model)?;
    }

    #[test]
    fn tiny_cache_is_transparent(ops in prop::collection::vec(op(), 0..80)) {
        let dir = TempDir::new().expect("tempdir");
        let mut roomy = open(&dir, "roomy", 1 << 24, 4);
        let mut tiny = open(&dir, "tiny", 512, 4);
        let mut model = BTreeMap::new();
        apply(&mut roomy, &mut model, &ops);
        let mut tiny_model = BTreeMap::new();
        apply(&mut tiny, &mut tiny_model, &ops);

        for key in 0u16..6 {
            let a = roomy.evaluate(&Query::key(key)).expect("roomy");
            let b = tiny.evaluate(&Query::key(key)).expect("tiny");
            prop_assert_eq!(a, b, "key {}", key);
        }
        check(&mut tiny, &model)?;
    }

    #[test]
    fn lists_survive_reopen(ops in prop::collection::vec(op(), 0..60)) {
        let dir = TempDir::new().expect("tempdir");
        let mut model = BTreeMap::new();
        {
            let mut index = open(&dir, "durable", 2_048, 3);
            apply(&mut index, &mut model, &ops);
            index.close().expect("close");
        }
        let config = IndexConfig::default()
            .with_mode(AccessMode::ReadOnly)
            .with_split_len(3);
        let mut index: Index = InvertedIndex::open(dir.path(), "durable", config).expect("reopen");
        check(&mut index, &model)?;
        for key in index.keys() {
            prop_assert!(model.get(key).is_some_and(|set| !set.is_empty()));
        }
    }

    #[test]
    fn storage_order_keeps_every_added_item(
        items in prop::collection::vec(0u32..1000, 0..400),
        split_len in 1usize..20,
    ) {
        let dir = TempDir::new().expect("tempdir");
        let mut index = open(&dir, "complete", 1 << 20, split_len);
        index.add_item_vector(1, items.iter().copied()).expect("add");

        let mut list = index.get_posting_list(&1).expect("lookup");
        let stored = match list.as_mut() {
            Some(list) => {
                prop_assert_eq!(list.len(), items.len());
                list.items().expect("items")
            }
            None => Vec::new(),
        };
        prop_assert_eq!(stored, items);

        // Other keys are untouched
        prop_assert!(index.get_posting_list(&2).expect("lookup").is_none());
    }

    #[test]
    fn defragment_is_idempotent(items in prop::collection::vec(0u32..100, 1..300)) {
        let dir = TempDir::new().expect("tempdir");
        let mut index = open(&dir, "def", 1 << 20, 7);
        index.add_item_vector(3, items.iter().copied()).expect("add");

        let mut list = index.get_posting_list(&3).expect("lookup").expect("present");
        list.defragment().expect("first");
        let once = list.items().expect("items");
        prop_assert!(list.is_merged());
        list.defragment().expect("second");
        prop_assert!(list.is_merged());
        prop_assert_eq!(list.items().expect("items"), once.clone());

        let expected: Vec<u32> = items.into_iter().collect::<BTreeSet<_>>().into_iter().collect();
        prop_assert_eq!(once, expected);
    }

    #[test]
    fn queries_follow_set_algebra(
        a in prop::collection::btree_set(0u32..40, 0..30),
        b in prop::collection::btree_set(0u32..40, 0..30),
        c in prop::collection::btree_set(0u32..40, 1..30),
    ) {
        let dir = TempDir::new().expect("tempdir");
        let mut index = open(&dir, "algebra", 1 << 20, 4);
        for (key, set) in [(0u16, &a), (1, &b), (2, &c)] {
            index.add_item_vector(key, set.iter().rev().copied()).expect("add");
        }
        let universe: BTreeSet<u32> = (0..40).collect();
        let not = |set: &BTreeSet<u32>| -> BTreeSet<u32> { universe.difference(set).copied().collect() };
        let sorted = |set: BTreeSet<u32>| -> Vec<u32> { set.into_iter().collect() };
        let k = Query::key;

        prop_assert_eq!(
            index.evaluate(&Query::and(k(0), k(1))).expect("and"),
            sorted(a.intersection(&b).copied().collect())
        );
        prop_assert_eq!(
            index.evaluate(&Query::or(k(0), k(1))).expect("or"),
            sorted(a.union(&b).copied().collect())
        );
        prop_assert_eq!(
            index.evaluate(&Query::and(Query::not(k(0)), k(1))).expect("and not"),
            sorted(b.difference(&a).copied().collect())
        );
        // c ∧ (¬a ∨ b)
        let either: BTreeSet<u32> = not(&a).union(&b).copied().collect();
        prop_assert_eq!(
            index
                .evaluate(&Query::and(k(2), Query::or(Query::not(k(0)), k(1))))
                .expect("mixed or"),
            sorted(c.intersection(&either).copied().collect())
        );
        // c ∧ ¬a ∧ ¬b
        let neither: BTreeSet<u32> = not(&a).intersection(&not(&b)).copied().collect();
        prop_assert_eq!(
            index
                .evaluate(&Query::and(k(2), Query::and(Query::not(k(0)), Query::not(k(1)))))
                .expect("both negated"),
            sorted(c.intersection(&neither).copied().collect())
        );
        // c ∧ ¬(¬a ∧ ¬b) = c ∧ (a ∨ b)
        let any: BTreeSet<u32> = a.union(&b).copied().collect();
        prop_assert_eq!(
            index
                .evaluate(&Query::and(
                    k(2),
                    Query::not(Query::and(Query::not(k(0)), Query::not(k(1))))
                ))
                .expect("double negation"),
            sorted(c.intersection(&any).copied().collect())
        );
    }

    #[test]
    fn merge_index_unions_lists(
        left in prop::collection::btree_map(0u16..5, prop::collection::btree_set(0u32..60, 1..20), 0..5),
        right in prop::collection::btree_map(0u16..5, prop::collection::btree_set(0u32..60, 1..20), 0..5),
    ) {
        let dir = TempDir::new().expect("tempdir");
        let mut target = open(&dir, "left", 1 << 20, 4);
        let mut other = open(&dir, "right", 1 << 20, 4);
        for (key, set) in &left {
            target.add_item_vector(*key, set.iter().copied()).expect("add");
        }
        for (key, set) in &right {
            other.add_item_vector(*key, set.iter().copied()).expect("add");
        }

        target.merge_index(&mut other).expect("merge");

        let mut expected = left.clone();
        for (key, set) in &right {
            expected.entry(*key).or_default().extend(set.iter().copied());
        }
        check(&mut target, &expected)?;

        // Appended in storage order after the target's own items
        for key in 0u16..5 {
            let stored: Vec<u32> = left
                .get(&key)
                .into_iter()
                .chain(right.get(&key))
                .flatten()
                .copied()
                .collect();
            prop_assert_eq!(target.items(&key).expect("items"), stored, "key {}", key);
            if !left.contains_key(&key) && right.contains_key(&key) {
                let list = target.get_posting_list(&key).expect("lookup").expect("present");
                prop_assert!(list.is_merged(), "key {}", key);
            }
        }
    }
}
