//! Memory-bounded cache of posting lists.
//!
//! The index talks to its cache through [`RecordCache`]. Eviction hands
//! each dropped entry to a callback before removing it; when the callback
//! fails the entry stays cached and the error is returned, so a failed
//! write-back never loses the in-memory state.
//!
//! [`LruRecordCache`] is the implementation the index uses by default.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

use crate::Result;

/// Callback invoked for every entry leaving the cache.
pub type EvictFn<'a, K, V> = dyn FnMut(&K, &mut V) -> Result<()> + 'a;

/// Approximate in-memory size of a cached value.
pub trait Footprint {
    /// Bytes held by the value, including owned heap allocations.
    fn footprint(&self) -> usize;
}

/// Key-value cache with a memory budget and an eviction callback.
pub trait RecordCache<K, V> {
    /// Look up an entry and mark it most recently used.
    fn get(&mut self, key: &K) -> Option<&mut V>;

    /// Look up an entry without touching its recency.
    fn peek_mut(&mut self, key: &K) -> Option<&mut V>;

    /// Whether an entry is cached.
    fn contains(&self, key: &K) -> bool;

    /// Insert or replace an entry as most recently used. Returns the
    /// replaced value.
    fn put(&mut self, key: K, value: V) -> Option<V>;

    /// Remove an entry without invoking the eviction callback.
    fn delete(&mut self, key: &K) -> Option<V>;

    /// Move an entry to a new key, keeping its recency.
    fn rekey(&mut self, old: &K, new: K) -> bool;

    /// Cached keys, least recently used first.
    fn keys(&self) -> Vec<K>;

    /// Visit every entry mutably, in no particular order.
    fn for_each_mut(&mut self, f: &mut EvictFn<'_, K, V>) -> Result<()>;

    /// Visit every entry.
    fn for_each(&self, f: &mut dyn FnMut(&K, &V));

    /// Evict least recently used entries until the cache fits its budget.
    ///
    /// Returns whether the cache had reached its budget.
    fn refresh_memory_usage(&mut self, evict: &mut EvictFn<'_, K, V>) -> Result<bool>;

    /// Evict every entry, least recently used first.
    fn drain(&mut self, evict: &mut EvictFn<'_, K, V>) -> Result<()>;

    /// Number of cached entries.
    fn len(&self) -> usize;

    /// Whether no entries are cached.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current total footprint of all entries.
    fn memory_used(&self) -> u64;

    /// Memory budget.
    fn capacity(&self) -> u64;
}

struct Slot<V> {
    value: V,
    tick: u64,
}

/// Least-recently-used cache with a byte budget.
///
/// Footprints are recomputed on demand rather than tracked on every
/// mutation, since cached values are changed in place through
/// [`get`](RecordCache::get).
pub struct LruRecordCache<K, V> {
    entries: HashMap<K, Slot<V>>,
    order: BTreeMap<u64, K>,
    next_tick: u64,
    capacity: u64,
}

impl<K: Hash + Eq + Clone, V: Footprint> LruRecordCache<K, V> {
    /// Create an empty cache with the given byte budget.
    pub fn new(capacity: u64) -> Self {
        Self {
            entries: HashMap::new(),
            order: BTreeMap::new(),
            next_tick: 0,
            capacity,
        }
    }

    fn touch(&mut self, key: &K) {
        let tick = self.next_tick;
        if let Some(slot) = self.entries.get_mut(key) {
            self.order.remove(&slot.tick);
            slot.tick = tick;
            self.order.insert(tick, key.clone());
            self.next_tick += 1;
        }
    }

    fn evict_oldest(&mut self, evict: &mut EvictFn<'_, K, V>) -> Result<Option<u64>> {
        let Some((&tick, key)) = self.order.first_key_value() else {
            return Ok(None);
        };
        let key = key.clone();
        let Some(slot) = self.entries.get_mut(&key) else {
            self.order.remove(&tick);
            return Ok(Some(0));
        };

        let freed = slot.value.footprint() as u64;
        evict(&key, &mut slot.value)?;
        self.entries.remove(&key);
        self.order.remove(&tick);
        Ok(Some(freed))
    }
}

impl<K: Hash + Eq + Clone, V: Footprint> RecordCache<K, V> for LruRecordCache<K, V> {
    fn get(&mut self, key: &K) -> Option<&mut V> {
        self.touch(key);
        self.entries.get_mut(key).map(|slot| &mut slot.value)
    }

    fn peek_mut(&mut self, key: &K) -> Option<&mut V> {
        self.entries.get_mut(key).map(|slot| &mut slot.value)
    }

    fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    fn put(&mut self, key: K, value: V) -> Option<V> {
        let tick = self.next_tick;
        self.next_tick += 1;
        self.order.insert(tick, key.clone());
        let old = self.entries.insert(key, Slot { value, tick })?;
        self.order.remove(&old.tick);
        Some(old.value)
    }

    fn delete(&mut self, key: &K) -> Option<V> {
        let slot = self.entries.remove(key)?;
        self.order.remove(&slot.tick);
        Some(slot.value)
    }

    fn rekey(&mut self, old: &K, new: K) -> bool {
        let Some(slot) = self.entries.remove(old) else {
            return false;
        };
        self.order.insert(slot.tick, new.clone());
        if let Some(displaced) = self.entries.insert(new, slot) {
            self.order.remove(&displaced.tick);
        }
        true
    }

    fn keys(&self) -> Vec<K> {
        self.order.values().cloned().collect()
    }

    fn for_each_mut(&mut self, f: &mut EvictFn<'_, K, V>) -> Result<()> {
        for (key, slot) in &mut self.entries {
            f(key, &mut slot.value)?;
        }
        Ok(())
    }

    fn for_each(&self, f: &mut dyn FnMut(&K, &V)) {
        for (key, slot) in &self.entries {
            f(key, &slot.value);
        }
    }

    fn refresh_memory_usage(&mut self, evict: &mut EvictFn<'_, K, V>) -> Result<bool> {
        let mut used = self.memory_used();
        if used <= self.capacity {
            return Ok(false);
        }
        while used > self.capacity {
            match self.evict_oldest(evict)? {
                Some(freed) => used = used.saturating_sub(freed),
                None => break,
            }
        }
        Ok(true)
    }

    fn drain(&mut self, evict: &mut EvictFn<'_, K, V>) -> Result<()> {
        while self.evict_oldest(evict)?.is_some() {}
        Ok(())
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn memory_used(&self) -> u64 {
        self.entries
            .values()
            .map(|slot| slot.value.footprint() as u64)
            .sum()
    }

    fn capacity(&self) -> u64 {
        self.capacity
    }
}
