//! Inverted index over a multi-segment blob store.
//!
//! The key table maps every key to the blob record of its posting list and
//! lives in memory, saved to `<name>.gix` on close. Posting lists live in
//! the blob store `<name>.gixdat` and are cached by record pointer; a list
//! is read from the store only on a cache miss, so at most one copy of a
//! list is ever live.
//!
//! Mutations track the net growth of cached lists. Once growth passes the
//! configured threshold, every cached list is defragmented and the cache is
//! shrunk to budget, writing evicted lists back to the store.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use binrw::BinReaderExt;
use sift_blob::{AccessMode, BlobPointer, BlobStore, BlobStoreStats, MultiSegmentStore};
use tracing::{debug, info, warn};

use crate::cache::{Footprint, LruRecordCache, RecordCache};
use crate::codec::Persist;
use crate::config::IndexConfig;
use crate::merger::{DefaultMerger, MergePolicy};
use crate::posting::PostingList;
use crate::stats::IndexStats;
use crate::{IndexError, IndexItem, IndexKey, Result};

/// Cache holding posting lists by record pointer.
pub type ListCache<K, T> = Box<dyn RecordCache<BlobPointer, PostingList<K, T>>>;

/// Net byte growth of cached lists since the last refresh.
#[derive(Debug)]
struct CachePressure {
    net_growth: i64,
    threshold: u64,
}

impl CachePressure {
    const fn new(threshold: u64) -> Self {
        Self {
            net_growth: 0,
            threshold,
        }
    }

    fn record(&mut self, before: usize, after: usize) {
        self.net_growth = self
            .net_growth
            .saturating_add_unsigned(after as u64)
            .saturating_sub_unsigned(before as u64);
    }

    fn exceeded(&self) -> bool {
        u64::try_from(self.net_growth).is_ok_and(|growth| growth > self.threshold)
    }

    const fn reset(&mut self) {
        self.net_growth = 0;
    }
}

/// Persistent map from keys to posting lists.
pub struct InvertedIndex<K: IndexKey, T: IndexItem, M: MergePolicy<T> = DefaultMerger> {
    name: String,
    key_path: PathBuf,
    config: IndexConfig,
    keys: BTreeMap<K, BlobPointer>,
    store: Box<dyn BlobStore>,
    cache: ListCache<K, T>,
    merger: M,
    pressure: CachePressure,
    cache_full: bool,
    closed: bool,
}

impl<K, T, M> InvertedIndex<K, T, M>
where
    K: IndexKey,
    T: IndexItem,
    M: MergePolicy<T> + Default,
{
    /// Open the index `name` in `dir` with the default merge policy and an
    /// LRU cache of `config.cache_size` bytes.
    ///
    /// In `Update` mode a missing index is created.
    pub fn open(dir: impl AsRef<Path>, name: &str, config: IndexConfig) -> Result<Self> {
        let cache = Box::new(LruRecordCache::<BlobPointer, PostingList<K, T>>::new(
            config.cache_size,
        ));
        Self::open_with(dir, name, config, M::default(), cache)
    }
}

impl<K: IndexKey, T: IndexItem, M: MergePolicy<T>> InvertedIndex<K, T, M> {
    /// Open the index with an explicit merge policy and cache.
    pub fn open_with(
        dir: impl AsRef<Path>,
        name: &str,
        config: IndexConfig,
        merger: M,
        cache: ListCache<K, T>,
    ) -> Result<Self> {
        config.validate()?;
        let dir = dir.as_ref();
        let key_path = dir.join(format!("{name}.gix"));
        let blob_base = dir.join(format!("{name}.gixdat"));

        let mut blob_config = config.blob_config();
        if config.mode == AccessMode::Update && !MultiSegmentStore::exists(&blob_base) {
            blob_config.mode = AccessMode::Create;
        }
        let store = MultiSegmentStore::open(&blob_base, &blob_config)?;

        let keys = if blob_config.mode == AccessMode::Create {
            BTreeMap::new()
        } else if key_path.exists() {
            load_keys(&key_path)?
        } else if config.mode == AccessMode::ReadOnly {
            return Err(IndexError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("key table {} not found", key_path.display()),
            )));
        } else {
            warn!(
                "Key table {} missing, starting with no keys",
                key_path.display()
            );
            BTreeMap::new()
        };

        info!(
            "Opened inverted index {} ({} keys, mode {:?})",
            key_path.display(),
            keys.len(),
            blob_config.mode
        );

        Ok(Self {
            name: name.to_string(),
            key_path,
            pressure: CachePressure::new(config.flush_threshold()),
            config,
            keys,
            store: Box::new(store),
            cache,
            merger,
            cache_full: false,
            closed: false,
        })
    }

    /// Name of the index.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configuration the index was opened with.
    pub const fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// Merge policy of the index.
    pub const fn merger(&self) -> &M {
        &self.merger
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.config.mode.can_write() {
            Ok(())
        } else {
            Err(IndexError::ReadOnly)
        }
    }

    fn resolve_or_create(&mut self, key: &K) -> Result<BlobPointer> {
        if let Some(&pointer) = self.keys.get(key) {
            return Ok(pointer);
        }
        let list = PostingList::new(key.clone(), self.config.split_len);
        let pointer = self.store.put(&list.encode()?)?;
        self.pressure.record(0, list.footprint());
        self.keys.insert(key.clone(), pointer);
        self.cache.put(pointer, list);
        Ok(pointer)
    }

    fn ensure_cached(&mut self, pointer: BlobPointer) -> Result<()> {
        if self.cache.contains(&pointer) {
            return Ok(());
        }
        let mut reader = self.store.get_reader(pointer)?;
        let list = PostingList::decode(&mut reader, self.config.split_len)?;
        self.pressure.record(0, list.footprint());
        self.cache.put(pointer, list);
        Ok(())
    }

    fn with_list<R>(
        &mut self,
        pointer: BlobPointer,
        f: impl FnOnce(&mut PostingList<K, T>, &mut dyn BlobStore, &M) -> Result<R>,
    ) -> Result<R> {
        self.ensure_cached(pointer)?;
        let Self {
            cache,
            store,
            merger,
            pressure,
            ..
        } = self;
        let list = cache.get(&pointer).ok_or(IndexError::CacheMiss(pointer))?;
        let before = list.footprint();
        let result = f(&mut *list, store.as_mut(), merger);
        pressure.record(before, list.footprint());
        result
    }

    /// Append `item` to the list of `key`, creating the key if needed.
    pub fn add_item(&mut self, key: K, item: T) -> Result<()> {
        self.ensure_writable()?;
        let pointer = self.resolve_or_create(&key)?;
        self.with_list(pointer, |list, store, merger| {
            list.add_item(item, store, merger)
        })?;
        self.refresh_cache()
    }

    /// Append every item of `items` to the list of `key`.
    pub fn add_item_vector(&mut self, key: K, items: impl IntoIterator<Item = T>) -> Result<()> {
        self.ensure_writable()?;
        let pointer = self.resolve_or_create(&key)?;
        self.with_list(pointer, |list, store, merger| {
            list.add_item_vector(items, store, merger)
        })?;
        self.refresh_cache()
    }

    /// Remove `item` from the list of `key`. Returns whether it was present.
    pub fn delete_item(&mut self, key: &K, item: &T) -> Result<bool> {
        self.ensure_writable()?;
        let Some(&pointer) = self.keys.get(key) else {
            return Ok(false);
        };
        let removed = self.with_list(pointer, |list, store, merger| {
            list.delete_item(item, store, merger)
        })?;
        self.refresh_cache()?;
        Ok(removed)
    }

    /// Drop all items of `key`. The key itself goes away once its empty
    /// list is written back.
    pub fn clear(&mut self, key: &K) -> Result<()> {
        self.ensure_writable()?;
        let Some(&pointer) = self.keys.get(key) else {
            return Ok(());
        };
        self.with_list(pointer, |list, store, _| list.clear(store))?;
        self.refresh_cache()
    }

    /// Remove `key` with its list record and overflow chunks.
    pub fn delete_key(&mut self, key: &K) -> Result<bool> {
        self.ensure_writable()?;
        let Some(pointer) = self.keys.remove(key) else {
            return Ok(false);
        };

        let mut list = if let Some(list) = self.cache.delete(&pointer) {
            self.pressure.record(list.footprint(), 0);
            list
        } else {
            let mut reader = self.store.get_reader(pointer)?;
            PostingList::decode(&mut reader, self.config.split_len)?
        };
        list.clear(self.store.as_mut())?;
        self.store.delete(pointer)?;
        debug!("Deleted key record {} from {}", pointer, self.name);
        Ok(true)
    }

    /// Handle to the list of `key`, loading it into the cache on a miss.
    /// `None` for an unknown key.
    pub fn get_posting_list(&mut self, key: &K) -> Result<Option<PostingListRef<'_, K, T, M>>> {
        self.refresh_cache()?;
        let Some(&pointer) = self.keys.get(key) else {
            return Ok(None);
        };
        self.ensure_cached(pointer)?;

        let writable = self.config.mode.can_write();
        let Self {
            cache,
            store,
            merger,
            pressure,
            ..
        } = self;
        let list = cache.get(&pointer).ok_or(IndexError::CacheMiss(pointer))?;
        Ok(Some(PostingListRef {
            list,
            store: store.as_mut(),
            merger,
            pressure,
            writable,
        }))
    }

    /// Items of `key` in storage order. Empty for an unknown key.
    pub fn items(&mut self, key: &K) -> Result<Vec<T>> {
        match self.get_posting_list(key)? {
            Some(mut list) => list.items(),
            None => Ok(Vec::new()),
        }
    }

    /// Number of items stored under `key`.
    pub fn item_count(&mut self, key: &K) -> Result<usize> {
        Ok(self.get_posting_list(key)?.map_or(0, |list| list.len()))
    }

    /// Append every list of `other`, in storage order, to the list of the
    /// same key here.
    pub fn merge_index(&mut self, other: &mut Self) -> Result<()> {
        self.ensure_writable()?;
        let keys: Vec<K> = other.keys.keys().cloned().collect();
        for key in keys {
            let items = match other.get_posting_list(&key)? {
                Some(mut list) => list.items()?,
                None => continue,
            };
            if !items.is_empty() {
                self.add_item_vector(key, items)?;
            }
        }
        info!(
            "Merged index {} into {} ({} keys)",
            other.name,
            self.name,
            other.keys.len()
        );
        Ok(())
    }

    fn refresh_cache(&mut self) -> Result<()> {
        if !self.pressure.exceeded() {
            return Ok(());
        }
        let writable = self.config.mode.can_write();
        let Self {
            cache,
            store,
            keys,
            merger,
            pressure,
            cache_full,
            ..
        } = self;
        let merger: &M = merger;

        if writable {
            cache.for_each_mut(&mut |_, list| list.defragment(store.as_mut(), merger))?;
        }
        let before = cache.len();
        *cache_full = cache.refresh_memory_usage(&mut |pointer, list| {
            write_back(store.as_mut(), keys, merger, writable, *pointer, list).map(|_| ())
        })?;
        pressure.reset();

        debug!(
            "Refreshed cache of {}: evicted {} lists, {} bytes in use",
            self.name,
            before - self.cache.len(),
            self.cache.memory_used()
        );
        Ok(())
    }

    /// Write every cached list back and empty the cache.
    pub fn flush(&mut self) -> Result<()> {
        let writable = self.config.mode.can_write();
        let count = self.cache.len();
        let Self {
            cache,
            store,
            keys,
            merger,
            pressure,
            cache_full,
            ..
        } = self;
        let merger: &M = merger;

        cache.drain(&mut |pointer, list| {
            write_back(store.as_mut(), keys, merger, writable, *pointer, list).map(|_| ())
        })?;
        pressure.reset();
        *cache_full = false;
        debug!("Flushed {} cached lists of {}", count, self.name);
        Ok(())
    }

    /// Write dirty cached lists back, least recently used first, keeping
    /// them cached. Stops once `window` has elapsed. Returns the number of
    /// lists written.
    pub fn partial_flush(&mut self, window: Duration) -> Result<usize> {
        if !self.config.mode.can_write() {
            return Ok(0);
        }
        let start = Instant::now();
        let Self {
            cache,
            store,
            keys,
            merger,
            ..
        } = self;
        let merger: &M = merger;

        let mut written = 0;
        for pointer in cache.keys() {
            if start.elapsed() >= window {
                break;
            }
            let Some(list) = cache.peek_mut(&pointer) else {
                continue;
            };
            if !list.is_dirty() && !list.is_empty() {
                continue;
            }
            match write_back(store.as_mut(), keys, merger, true, pointer, list)? {
                Some(moved) if moved != pointer => {
                    cache.rekey(&pointer, moved);
                }
                Some(_) => {}
                None => {
                    cache.delete(&pointer);
                }
            }
            written += 1;
        }

        debug!("Partially flushed {} lists of {}", written, self.name);
        Ok(written)
    }

    /// Flush, save the key table and close the store.
    pub fn close(mut self) -> Result<()> {
        self.closed = true;
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        self.flush()?;
        if self.config.mode.can_write() {
            self.save_keys()?;
        }
        self.store.close()?;
        info!("Closed inverted index {}", self.key_path.display());
        Ok(())
    }

    fn save_keys(&self) -> Result<()> {
        let staging = self.key_path.with_extension("gix.tmp");
        let mut writer = BufWriter::new(File::create(&staging)?);
        (self.keys.len() as u64).write_to(&mut writer)?;
        for (key, pointer) in &self.keys {
            key.write_to(&mut writer)?;
            pointer.write_to(&mut writer)?;
        }
        writer
            .into_inner()
            .map_err(std::io::IntoInnerError::into_error)?
            .sync_all()?;
        fs::rename(&staging, &self.key_path)?;
        debug!(
            "Saved {} keys to {}",
            self.keys.len(),
            self.key_path.display()
        );
        Ok(())
    }

    /// Keys in ascending order.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.keys.keys()
    }

    /// Whether `key` has a list.
    pub fn contains_key(&self, key: &K) -> bool {
        self.keys.contains_key(key)
    }

    /// Number of keys.
    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    /// Whether the last cache refresh found the cache at its budget.
    pub const fn is_cache_full(&self) -> bool {
        self.cache_full
    }

    /// Snapshot of the index and its cache.
    #[allow(clippy::cast_precision_loss)]
    pub fn stats(&self) -> IndexStats {
        let mut stats = IndexStats {
            key_count: self.keys.len(),
            cache_memory: self.cache.memory_used(),
            cache_full: self.cache_full,
            ..IndexStats::default()
        };
        let (mut chunks, mut loaded, mut items) = (0usize, 0usize, 0usize);
        self.cache.for_each(&mut |_, list| {
            stats.cached_lists += 1;
            if list.is_dirty() {
                stats.dirty_lists += 1;
            }
            chunks += list.chunk_count();
            loaded += list.loaded_chunk_count();
            items += list.len();
        });
        if chunks > 0 {
            stats.loaded_chunk_percent = loaded as f64 * 100.0 / chunks as f64;
        }
        if stats.cached_lists > 0 {
            stats.avg_list_len = items as f64 / stats.cached_lists as f64;
        }
        stats
    }

    /// Operation counters of the underlying blob store.
    pub fn blob_stats(&self) -> BlobStoreStats {
        self.store.stats()
    }

    /// Zero the blob store counters.
    pub fn reset_blob_stats(&mut self) {
        self.store.reset_stats();
    }
}

impl<K: IndexKey, T: IndexItem, M: MergePolicy<T>> Drop for InvertedIndex<K, T, M> {
    fn drop(&mut self) {
        if !self.closed
            && let Err(e) = self.shutdown()
        {
            warn!("Failed to close inverted index {}: {}", self.name, e);
        }
    }
}

/// Store a cached list at `pointer`. Returns where the record now lives,
/// or `None` when the list was empty and its record and key were removed.
fn write_back<K: IndexKey, T: IndexItem, M: MergePolicy<T>>(
    store: &mut dyn BlobStore,
    keys: &mut BTreeMap<K, BlobPointer>,
    merger: &M,
    writable: bool,
    pointer: BlobPointer,
    list: &mut PostingList<K, T>,
) -> Result<Option<BlobPointer>> {
    if !writable {
        debug_assert!(!list.is_dirty(), "read-only index holds a modified list");
        return Ok(Some(pointer));
    }

    if list.is_empty() {
        list.clear(store)?;
        store.delete(pointer)?;
        if keys.get(list.key()) == Some(&pointer) {
            keys.remove(list.key());
        }
        list.mark_clean();
        return Ok(None);
    }
    if !list.is_dirty() {
        return Ok(Some(pointer));
    }

    let bytes = list.persist(store, merger)?;
    let stored = store.put_at(pointer, &bytes)?;
    list.mark_clean();
    if stored != pointer {
        keys.insert(list.key().clone(), stored);
        debug!("Moved list record {} to {}", pointer, stored);
    }
    Ok(Some(stored))
}

fn load_keys<K: IndexKey>(path: &Path) -> Result<BTreeMap<K, BlobPointer>> {
    let mut reader = BufReader::new(File::open(path)?);
    let count: u64 = reader.read_le()?;
    let mut keys = BTreeMap::new();
    for _ in 0..count {
        let key = K::read_from(&mut reader)?;
        let pointer = BlobPointer::read_from(&mut reader)?;
        keys.insert(key, pointer);
    }
    Ok(keys)
}

/// Borrowed access to one cached posting list.
///
/// Loading overflow chunks through the handle counts toward the index's
/// cache pressure, checked on the next index operation.
pub struct PostingListRef<'a, K, T, M> {
    list: &'a mut PostingList<K, T>,
    store: &'a mut dyn BlobStore,
    merger: &'a M,
    pressure: &'a mut CachePressure,
    writable: bool,
}

impl<K: IndexKey, T: IndexItem, M: MergePolicy<T>> PostingListRef<'_, K, T, M> {
    fn tracked<R>(
        &mut self,
        f: impl FnOnce(&mut PostingList<K, T>, &mut dyn BlobStore, &M) -> Result<R>,
    ) -> Result<R> {
        let before = self.list.footprint();
        let result = f(&mut *self.list, &mut *self.store, self.merger);
        self.pressure.record(before, self.list.footprint());
        result
    }

    /// Key of the list.
    pub fn key(&self) -> &K {
        self.list.key()
    }

    /// Number of items.
    pub fn len(&self) -> usize {
        self.list.len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Whether the items are sorted and duplicate-free.
    pub fn is_merged(&self) -> bool {
        self.list.is_merged()
    }

    /// Item at `index`.
    pub fn get_item(&mut self, index: usize) -> Result<T> {
        self.tracked(|list, store, _| list.get_item(index, store).cloned())
    }

    /// All items in storage order.
    pub fn items(&mut self) -> Result<Vec<T>> {
        self.tracked(|list, store, _| list.items(store))
    }

    /// Sorted, duplicate-free items under the index's merge policy.
    pub fn merged_items(&mut self) -> Result<Vec<T>> {
        self.tracked(|list, store, merger| list.merged_items(store, merger))
    }

    /// Sort and deduplicate the stored list.
    pub fn defragment(&mut self) -> Result<()> {
        if !self.writable {
            return Err(IndexError::ReadOnly);
        }
        self.tracked(|list, store, merger| list.defragment(store, merger))
    }
}
