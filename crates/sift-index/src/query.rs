//! Boolean queries over index keys.
//!
//! Evaluation works on `(items, complement)` pairs: a complemented result
//! stands for every item *not* in `items`. Combining two pairs never needs
//! the universe of items:
//!
//! | node    | both plain  | both complemented      | mixed `¬A`, `B`     |
//! |---------|-------------|------------------------|---------------------|
//! | `And`   | `A ∩ B`     | `¬(A ∪ B)`             | `B − A`             |
//! | `Or`    | `A ∪ B`     | `¬(A ∩ B)`             | `¬(A − B)`          |
//!
//! Only the final result must be plain; a query whose root is complemented
//! is rejected by [`Query::validate`].

use std::collections::BTreeMap;

use crate::index::InvertedIndex;
use crate::merger::MergePolicy;
use crate::{IndexError, IndexItem, IndexKey, Result};

/// Boolean query tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query<K> {
    /// Matches nothing
    Empty,
    /// Items of one key
    Key(K),
    /// Items not matched by the inner query
    Not(Box<Query<K>>),
    /// Items matched by both queries
    And(Box<Query<K>>, Box<Query<K>>),
    /// Items matched by either query
    Or(Box<Query<K>>, Box<Query<K>>),
}

impl<K> Query<K> {
    /// Leaf for one key.
    pub const fn key(key: K) -> Self {
        Self::Key(key)
    }

    /// Negation of `query`.
    #[allow(clippy::should_implement_trait)]
    pub fn not(query: Self) -> Self {
        Self::Not(Box::new(query))
    }

    /// Conjunction of two queries.
    pub fn and(left: Self, right: Self) -> Self {
        Self::And(Box::new(left), Box::new(right))
    }

    /// Disjunction of two queries.
    pub fn or(left: Self, right: Self) -> Self {
        Self::Or(Box::new(left), Box::new(right))
    }

    /// Left-deep conjunction of all `queries`; `Empty` when there are none.
    pub fn and_all(queries: impl IntoIterator<Item = Self>) -> Self {
        queries.into_iter().reduce(Self::and).unwrap_or(Self::Empty)
    }

    /// Left-deep disjunction of all `queries`; `Empty` when there are none.
    pub fn or_all(queries: impl IntoIterator<Item = Self>) -> Self {
        queries.into_iter().reduce(Self::or).unwrap_or(Self::Empty)
    }

    /// Whether the query evaluates to a complemented set.
    pub fn is_complement(&self) -> bool {
        match self {
            Self::Empty | Self::Key(_) => false,
            Self::Not(inner) => !inner.is_complement(),
            Self::And(left, right) => left.is_complement() && right.is_complement(),
            Self::Or(left, right) => left.is_complement() || right.is_complement(),
        }
    }

    /// Reject trees that cannot be evaluated to a finite item list.
    pub fn validate(&self) -> Result<()> {
        self.check_nodes()?;
        if self.is_complement() {
            return Err(IndexError::InvalidQuery(
                "query matches an unbounded complement".to_string(),
            ));
        }
        Ok(())
    }

    fn check_nodes(&self) -> Result<()> {
        match self {
            Self::Empty | Self::Key(_) => Ok(()),
            Self::Not(inner) if matches!(**inner, Self::Empty) => Err(IndexError::InvalidQuery(
                "negation of an empty query".to_string(),
            )),
            Self::Not(inner) => inner.check_nodes(),
            Self::And(left, right) | Self::Or(left, right) => {
                left.check_nodes()?;
                right.check_nodes()
            }
        }
    }

    fn visit_keys<'a>(&'a self, out: &mut Vec<&'a K>) {
        match self {
            Self::Empty => {}
            Self::Key(key) => out.push(key),
            Self::Not(inner) => inner.visit_keys(out),
            Self::And(left, right) | Self::Or(left, right) => {
                left.visit_keys(out);
                right.visit_keys(out);
            }
        }
    }
}

impl<K: Ord> Query<K> {
    fn eval<T: Clone, P: MergePolicy<T>>(
        &self,
        lists: &BTreeMap<K, Vec<T>>,
        merger: &P,
    ) -> (Vec<T>, bool) {
        match self {
            Self::Empty => (Vec::new(), false),
            Self::Key(key) => (lists.get(key).cloned().unwrap_or_default(), false),
            Self::Not(inner) => {
                let (items, complement) = inner.eval(lists, merger);
                (items, !complement)
            }
            Self::And(left, right) => {
                let (mut l, lc) = left.eval(lists, merger);
                let (r, rc) = right.eval(lists, merger);
                match (lc, rc) {
                    (false, false) => {
                        merger.intersect(&mut l, &r);
                        (l, false)
                    }
                    (true, true) => {
                        merger.union(&mut l, &r);
                        (l, true)
                    }
                    (true, false) => (merger.minus(&r, &l), false),
                    (false, true) => (merger.minus(&l, &r), false),
                }
            }
            Self::Or(left, right) => {
                let (mut l, lc) = left.eval(lists, merger);
                let (r, rc) = right.eval(lists, merger);
                match (lc, rc) {
                    (false, false) => {
                        merger.union(&mut l, &r);
                        (l, false)
                    }
                    (true, true) => {
                        merger.intersect(&mut l, &r);
                        (l, true)
                    }
                    (true, false) => (merger.minus(&l, &r), true),
                    (false, true) => (merger.minus(&r, &l), true),
                }
            }
        }
    }
}

impl<K: IndexKey, T: IndexItem, M: MergePolicy<T>> InvertedIndex<K, T, M> {
    /// Evaluate `query` with the index's merge policy.
    ///
    /// Unknown keys match nothing. The result is sorted and free of
    /// duplicates under the policy.
    pub fn evaluate(&mut self, query: &Query<K>) -> Result<Vec<T>> {
        let lists = self.materialize(query)?;
        Ok(query.eval(&lists, self.merger()).0)
    }

    /// Evaluate `query` with another merge policy.
    pub fn evaluate_with<P: MergePolicy<T>>(
        &mut self,
        query: &Query<K>,
        merger: &P,
    ) -> Result<Vec<T>> {
        let mut lists = self.materialize(query)?;
        for items in lists.values_mut() {
            merger.merge(items);
        }
        Ok(query.eval(&lists, merger).0)
    }

    /// Items of every key the query names, merged under the index's policy.
    fn materialize(&mut self, query: &Query<K>) -> Result<BTreeMap<K, Vec<T>>> {
        query.validate()?;
        let mut keys = Vec::new();
        query.visit_keys(&mut keys);

        let mut lists = BTreeMap::new();
        for key in keys {
            if lists.contains_key(key) {
                continue;
            }
            let items = match self.get_posting_list(key)? {
                Some(mut list) => list.merged_items()?,
                None => Vec::new(),
            };
            lists.insert(key.clone(), items);
        }
        Ok(lists)
    }
}
