//! Set-combination strategies for posting lists.
//!
//! A [`MergePolicy`] defines the order of items and what happens when two
//! equivalent items meet. Every set operation assumes its inputs are sorted
//! and duplicate-free under that order, which is what
//! [`merge`](MergePolicy::merge) produces.

use std::cmp::Ordering;
use std::io::{Read, Seek, Write};

use binrw::BinResult;

use crate::codec::Persist;

/// Ordering and combination rules for posting-list items.
pub trait MergePolicy<T: Clone> {
    /// Strict ordering of items.
    fn less_than(&self, a: &T, b: &T) -> bool;

    /// Fold `duplicate` into `kept` when two equivalent items meet.
    fn combine(&self, _kept: &mut T, _duplicate: &T) {}

    /// Three-way comparison derived from [`less_than`](Self::less_than).
    fn compare(&self, a: &T, b: &T) -> Ordering {
        if self.less_than(a, b) {
            Ordering::Less
        } else if self.less_than(b, a) {
            Ordering::Greater
        } else {
            Ordering::Equal
        }
    }

    /// Sort `items` and collapse equivalent runs in place.
    fn merge(&self, items: &mut Vec<T>) {
        items.sort_by(|a, b| self.compare(a, b));
        items.dedup_by(|next, kept| {
            if self.compare(kept, next) == Ordering::Equal {
                self.combine(kept, next);
                true
            } else {
                false
            }
        });
    }

    /// Add the items of `other` missing from `main`.
    fn union(&self, main: &mut Vec<T>, other: &[T]) {
        let mut out = Vec::with_capacity(main.len() + other.len());
        let mut rest = other.iter().peekable();
        for mut item in main.drain(..) {
            while let Some(next) = rest.peek() {
                match self.compare(next, &item) {
                    Ordering::Less => out.push((*next).clone()),
                    Ordering::Equal => self.combine(&mut item, next),
                    Ordering::Greater => break,
                }
                rest.next();
            }
            out.push(item);
        }
        out.extend(rest.cloned());
        *main = out;
    }

    /// Keep only the items of `main` that also occur in `other`.
    fn intersect(&self, main: &mut Vec<T>, other: &[T]) {
        let mut rest = other;
        main.retain_mut(|item| {
            let skip = rest.partition_point(|candidate| self.less_than(candidate, item));
            rest = &rest[skip..];
            match rest.first() {
                Some(found) if !self.less_than(item, found) => {
                    self.combine(item, found);
                    rest = &rest[1..];
                    true
                }
                _ => false,
            }
        });
    }

    /// Items of `main` that do not occur in `other`.
    fn minus(&self, main: &[T], other: &[T]) -> Vec<T> {
        let mut rest = other;
        main.iter()
            .filter(|item| {
                let skip = rest.partition_point(|candidate| self.less_than(candidate, item));
                rest = &rest[skip..];
                !matches!(rest.first(), Some(found) if !self.less_than(item, found))
            })
            .cloned()
            .collect()
    }

    /// Remove every item equivalent to `item`. Returns whether any was removed.
    fn delete(&self, item: &T, items: &mut Vec<T>) -> bool {
        let before = items.len();
        items.retain(|candidate| self.compare(candidate, item) != Ordering::Equal);
        items.len() != before
    }
}

/// Policy for totally ordered items: plain sort and dedupe.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultMerger;

impl<T: Ord + Clone> MergePolicy<T> for DefaultMerger {
    fn less_than(&self, a: &T, b: &T) -> bool {
        a < b
    }
}

/// Item carrying a weight alongside its identity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Weighted {
    /// Identity
    pub id: u64,
    /// Accumulated weight
    pub weight: f32,
}

impl Weighted {
    /// Create a weighted item.
    pub const fn new(id: u64, weight: f32) -> Self {
        Self { id, weight }
    }
}

impl Persist for Weighted {
    fn write_to<W: Write + Seek>(&self, writer: &mut W) -> BinResult<()> {
        self.id.write_to(writer)?;
        self.weight.write_to(writer)
    }

    fn read_from<R: Read + Seek>(reader: &mut R) -> BinResult<Self> {
        Ok(Self {
            id: u64::read_from(reader)?,
            weight: f32::read_from(reader)?,
        })
    }
}

/// Policy ordering [`Weighted`] items by id and summing the weights of
/// equal ids.
#[derive(Debug, Clone, Copy, Default)]
pub struct WeightedMerger;

impl MergePolicy<Weighted> for WeightedMerger {
    fn less_than(&self, a: &Weighted, b: &Weighted) -> bool {
        a.id < b.id
    }

    fn combine(&self, kept: &mut Weighted, duplicate: &Weighted) {
        kept.weight += duplicate.weight;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    #[test]
    fn test_merge_sorts_and_dedupes() {
        let mut items = vec![5, 1, 3, 1, 5, 2];
        DefaultMerger.merge(&mut items);
        assert_eq!(items, vec![1, 2, 3, 5]);
    }

    #[test]
    fn test_set_operations() {
        let a = vec![1, 2, 3];
        let b = vec![2, 3, 4];

        let mut union = a.clone();
        DefaultMerger.union(&mut union, &b);
        assert_eq!(union, vec![1, 2, 3, 4]);

        let mut both = a.clone();
        DefaultMerger.intersect(&mut both, &b);
        assert_eq!(both, vec![2, 3]);

        assert_eq!(DefaultMerger.minus(&a, &b), vec![1]);
        assert_eq!(DefaultMerger.minus(&b, &a), vec![4]);
    }

    #[test]
    fn test_delete_removes_all_equivalents() {
        let mut items = vec![1, 2, 2, 3];
        assert!(DefaultMerger.delete(&2, &mut items));
        assert_eq!(items, vec![1, 3]);
        assert!(!DefaultMerger.delete(&9, &mut items));
    }

    #[test]
    fn test_weighted_merge_sums_duplicates() {
        let mut items = vec![
            Weighted::new(7, 1.0),
            Weighted::new(3, 0.5),
            Weighted::new(7, 2.0),
        ];
        WeightedMerger.merge(&mut items);
        assert_eq!(items, vec![Weighted::new(3, 0.5), Weighted::new(7, 3.0)]);

        let mut main = items.clone();
        WeightedMerger.union(&mut main, &[Weighted::new(7, 1.0), Weighted::new(9, 4.0)]);
        assert_eq!(
            main,
            vec![
                Weighted::new(3, 0.5),
                Weighted::new(7, 4.0),
                Weighted::new(9, 4.0)
            ]
        );
    }

    proptest! {
        #[test]
        fn set_operations_match_btreeset(
            a in prop::collection::btree_set(0u32..200, 0..60),
            b in prop::collection::btree_set(0u32..200, 0..60),
        ) {
            let va: Vec<u32> = a.iter().copied().collect();
            let vb: Vec<u32> = b.iter().copied().collect();

            let mut union = va.clone();
            DefaultMerger.union(&mut union, &vb);
            prop_assert_eq!(union, a.union(&b).copied().collect::<Vec<_>>());

            let mut both = va.clone();
            DefaultMerger.intersect(&mut both, &vb);
            prop_assert_eq!(both, a.intersection(&b).copied().collect::<Vec<_>>());

            prop_assert_eq!(
                DefaultMerger.minus(&va, &vb),
                a.difference(&b).copied().collect::<Vec<_>>()
            );
        }

        #[test]
        fn merge_matches_sorted_set(items in prop::collection::vec(0u16..100, 0..200)) {
            let mut merged = items.clone();
            DefaultMerger.merge(&mut merged);
            let expected: BTreeSet<u16> = items.into_iter().collect();
            prop_assert_eq!(merged, expected.into_iter().collect::<Vec<_>>());
        }
    }
}
