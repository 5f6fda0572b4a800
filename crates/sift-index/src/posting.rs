//! Posting lists with inline items and overflow chunks.
//!
//! A list holds its first `split_len` items inline. Further items go into
//! overflow chunks of at most `split_len` items, each stored as its own
//! blob record. Chunk contents are read from the store only when an item
//! inside them is needed.
//!
//! Encoded list record:
//!
//! ```text
//! key | flags u8 | inline items (u32 count + items) | chunk count u32 |
//!     chunk descriptors (pointer, len u32, min item, max item)...
//! ```
//!
//! An overflow chunk record is a `u32` count followed by its items.

use std::io::{Cursor, Read, Seek};
use std::mem::size_of;

use binrw::BinReaderExt;
use sift_blob::{BlobPointer, BlobStore};

use crate::cache::Footprint;
use crate::codec::{Persist, read_vec, write_len, write_vec};
use crate::merger::MergePolicy;
use crate::{IndexError, IndexItem, IndexKey, Result};

const FLAG_MERGED: u8 = 0x01;

#[derive(Debug)]
struct OverflowChunk<T> {
    pointer: BlobPointer,
    len: usize,
    min: T,
    max: T,
    items: Option<Vec<T>>,
    dirty: bool,
}

impl<T: IndexItem> OverflowChunk<T> {
    /// Store sorted `items` as a new chunk record.
    fn enlist(store: &mut dyn BlobStore, items: Vec<T>) -> Result<Option<Self>> {
        let (Some(min), Some(max)) = (items.first().cloned(), items.last().cloned()) else {
            return Ok(None);
        };
        let pointer = store.put(&encode_items(&items)?)?;
        Ok(Some(Self {
            pointer,
            len: items.len(),
            min,
            max,
            items: Some(items),
            dirty: false,
        }))
    }

    fn load(&mut self, store: &mut dyn BlobStore) -> Result<&mut Vec<T>> {
        let items = match self.items.take() {
            Some(items) => items,
            None => {
                let mut reader = store.get_reader(self.pointer)?;
                let items: Vec<T> = read_vec(&mut reader)?;
                if items.len() != self.len {
                    return Err(IndexError::Decode(format!(
                        "overflow chunk {} holds {} items, expected {}",
                        self.pointer,
                        items.len(),
                        self.len
                    )));
                }
                items
            }
        };
        Ok(self.items.insert(items))
    }

    /// Swap in sorted, non-empty contents. The chunk only turns dirty when
    /// the contents differ from what it holds.
    fn replace(&mut self, items: Vec<T>) {
        if let (Some(min), Some(max)) = (items.first(), items.last()) {
            self.min = min.clone();
            self.max = max.clone();
        }
        if self.items.as_ref() != Some(&items) {
            self.dirty = true;
        }
        self.len = items.len();
        self.items = Some(items);
    }

    fn write_back(&mut self, store: &mut dyn BlobStore) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        if let Some(items) = &self.items {
            self.pointer = store.put_at(self.pointer, &encode_items(items)?)?;
        }
        self.dirty = false;
        Ok(())
    }

    fn may_contain<M: MergePolicy<T>>(&self, item: &T, merger: &M) -> bool {
        !merger.less_than(item, &self.min) && !merger.less_than(&self.max, item)
    }
}

fn encode_items<T: IndexItem>(items: &[T]) -> Result<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    write_vec(&mut cursor, items)?;
    Ok(cursor.into_inner())
}

/// Items stored under one index key.
#[derive(Debug)]
pub struct PostingList<K, T> {
    key: K,
    inline: Vec<T>,
    overflow: Vec<OverflowChunk<T>>,
    merged: bool,
    total: usize,
    dirty: bool,
    split_len: usize,
}

impl<K: IndexKey, T: IndexItem> PostingList<K, T> {
    /// Create an empty list.
    pub fn new(key: K, split_len: usize) -> Self {
        Self {
            key,
            inline: Vec::new(),
            overflow: Vec::new(),
            merged: true,
            total: 0,
            dirty: false,
            split_len: split_len.max(1),
        }
    }

    /// Key this list belongs to.
    pub const fn key(&self) -> &K {
        &self.key
    }

    /// Total number of items, inline and overflow.
    pub const fn len(&self) -> usize {
        self.total
    }

    /// Whether the list holds no items.
    pub const fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Whether the items are known to be sorted and free of duplicates.
    pub const fn is_merged(&self) -> bool {
        self.merged
    }

    /// Whether the list changed since it was last persisted.
    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Number of inline items.
    pub fn inline_len(&self) -> usize {
        self.inline.len()
    }

    /// Length of each overflow chunk, in creation order.
    pub fn chunk_lens(&self) -> Vec<usize> {
        self.overflow.iter().map(|chunk| chunk.len).collect()
    }

    /// Number of overflow chunks.
    pub fn chunk_count(&self) -> usize {
        self.overflow.len()
    }

    /// Number of overflow chunks whose items are in memory.
    pub fn loaded_chunk_count(&self) -> usize {
        self.overflow
            .iter()
            .filter(|chunk| chunk.items.is_some())
            .count()
    }

    fn last_item(&self) -> Option<&T> {
        self.overflow
            .last()
            .map(|chunk| &chunk.max)
            .or_else(|| self.inline.last())
    }

    /// Append an item.
    ///
    /// The item goes inline while there is room, then into the last
    /// overflow chunk, then into a new chunk that is written to the store
    /// right away.
    pub fn add_item<M: MergePolicy<T>>(
        &mut self,
        item: T,
        store: &mut dyn BlobStore,
        merger: &M,
    ) -> Result<()> {
        if self.merged
            && let Some(last) = self.last_item()
            && !merger.less_than(last, &item)
        {
            self.merged = false;
        }

        let split_len = self.split_len;
        if self.overflow.is_empty() && self.inline.len() < split_len {
            self.inline.push(item);
        } else if let Some(chunk) = self
            .overflow
            .last_mut()
            .filter(|chunk| chunk.len < split_len)
        {
            if merger.less_than(&item, &chunk.min) {
                chunk.min = item.clone();
            }
            if merger.less_than(&chunk.max, &item) {
                chunk.max = item.clone();
            }
            chunk.load(store)?.push(item);
            chunk.len += 1;
            chunk.dirty = true;
        } else if let Some(chunk) = OverflowChunk::enlist(store, vec![item])? {
            self.overflow.push(chunk);
        }

        self.total += 1;
        self.dirty = true;
        Ok(())
    }

    /// Append every item of `items`.
    pub fn add_item_vector<M: MergePolicy<T>>(
        &mut self,
        items: impl IntoIterator<Item = T>,
        store: &mut dyn BlobStore,
        merger: &M,
    ) -> Result<()> {
        for item in items {
            self.add_item(item, store, merger)?;
        }
        Ok(())
    }

    /// Item at position `index`, loading only the chunk that holds it.
    pub fn get_item(&mut self, index: usize, store: &mut dyn BlobStore) -> Result<&T> {
        let len = self.total;
        if let Some(item) = self.inline.get(index) {
            return Ok(item);
        }

        let mut offset = index.saturating_sub(self.inline.len());
        for chunk in &mut self.overflow {
            if offset < chunk.len {
                return chunk
                    .load(store)?
                    .get(offset)
                    .ok_or(IndexError::IndexOutOfRange { index, len });
            }
            offset -= chunk.len;
        }
        Err(IndexError::IndexOutOfRange { index, len })
    }

    /// All items: inline first, then each chunk in creation order.
    pub fn items(&mut self, store: &mut dyn BlobStore) -> Result<Vec<T>> {
        let mut items = Vec::with_capacity(self.total);
        items.extend_from_slice(&self.inline);
        for chunk in &mut self.overflow {
            items.extend_from_slice(chunk.load(store)?);
        }
        Ok(items)
    }

    /// Sorted, duplicate-free items without changing the list.
    pub fn merged_items<M: MergePolicy<T>>(
        &mut self,
        store: &mut dyn BlobStore,
        merger: &M,
    ) -> Result<Vec<T>> {
        let mut items = self.items(store)?;
        if !self.merged {
            merger.merge(&mut items);
        }
        Ok(items)
    }

    /// Sort and deduplicate the list, then split it back into inline items
    /// and full chunks. A no-op on a merged list.
    pub fn defragment<M: MergePolicy<T>>(
        &mut self,
        store: &mut dyn BlobStore,
        merger: &M,
    ) -> Result<()> {
        if self.merged {
            return Ok(());
        }
        let mut items = self.items(store)?;
        merger.merge(&mut items);
        self.resplit(items, store)?;
        self.merged = true;
        self.dirty = true;
        Ok(())
    }

    /// Lay sorted `items` out again, reusing existing chunk records in
    /// order and deleting those no longer needed.
    fn resplit(&mut self, items: Vec<T>, store: &mut dyn BlobStore) -> Result<()> {
        let split_len = self.split_len;
        self.total = items.len();

        let mut rest = items.into_iter();
        self.inline = rest.by_ref().take(split_len).collect();
        let remaining: Vec<T> = rest.collect();
        let mut parts = remaining.chunks(split_len).map(<[T]>::to_vec);
        let needed = remaining.len().div_ceil(split_len);

        while self.overflow.len() > needed {
            if let Some(pointer) = self.overflow.last().map(|chunk| chunk.pointer) {
                store.delete(pointer)?;
            }
            self.overflow.pop();
        }
        for chunk in &mut self.overflow {
            if let Some(part) = parts.next() {
                chunk.replace(part);
            }
        }
        for part in parts {
            if let Some(chunk) = OverflowChunk::enlist(store, part)? {
                self.overflow.push(chunk);
            }
        }
        Ok(())
    }

    /// Remove every item equivalent to `item`. Returns whether one was found.
    pub fn delete_item<M: MergePolicy<T>>(
        &mut self,
        item: &T,
        store: &mut dyn BlobStore,
        merger: &M,
    ) -> Result<bool> {
        self.defragment(store, merger)?;

        let mut removed = merger.delete(item, &mut self.inline);
        for chunk in &mut self.overflow {
            if !chunk.may_contain(item, merger) {
                continue;
            }
            if merger.delete(item, chunk.load(store)?) {
                chunk.dirty = true;
                removed = true;
            }
        }

        if removed {
            let items = self.items(store)?;
            self.resplit(items, store)?;
            self.dirty = true;
        }
        Ok(removed)
    }

    /// Drop all items and delete the overflow chunk records.
    pub fn clear(&mut self, store: &mut dyn BlobStore) -> Result<()> {
        while let Some(pointer) = self.overflow.last().map(|chunk| chunk.pointer) {
            store.delete(pointer)?;
            self.overflow.pop();
        }
        if self.total > 0 {
            self.dirty = true;
        }
        self.inline.clear();
        self.total = 0;
        self.merged = true;
        Ok(())
    }

    /// Defragment, write dirty chunks back and encode the list record.
    ///
    /// The list stays dirty until [`mark_clean`](Self::mark_clean) confirms
    /// the record itself was stored.
    pub fn persist<M: MergePolicy<T>>(
        &mut self,
        store: &mut dyn BlobStore,
        merger: &M,
    ) -> Result<Vec<u8>> {
        self.defragment(store, merger)?;
        for chunk in &mut self.overflow {
            chunk.write_back(store)?;
        }
        self.encode()
    }

    /// Record that the stored list matches memory.
    pub const fn mark_clean(&mut self) {
        self.dirty = false;
    }

    /// Encode the list record.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut cursor = Cursor::new(Vec::new());
        self.key.write_to(&mut cursor)?;
        let flags = if self.merged { FLAG_MERGED } else { 0 };
        flags.write_to(&mut cursor)?;
        write_vec(&mut cursor, &self.inline)?;
        write_len(&mut cursor, self.overflow.len())?;
        for chunk in &self.overflow {
            chunk.pointer.write_to(&mut cursor)?;
            write_len(&mut cursor, chunk.len)?;
            chunk.min.write_to(&mut cursor)?;
            chunk.max.write_to(&mut cursor)?;
        }
        Ok(cursor.into_inner())
    }

    /// Decode a list record. Overflow chunks stay unloaded.
    pub fn decode<R: Read + Seek>(reader: &mut R, split_len: usize) -> Result<Self> {
        let key = K::read_from(reader)?;
        let flags: u8 = reader.read_le()?;
        let inline: Vec<T> = read_vec(reader)?;
        let count: u32 = reader.read_le()?;

        let mut total = inline.len();
        let mut overflow = Vec::new();
        for _ in 0..count {
            let pointer = BlobPointer::read_from(reader)?;
            let len: u32 = reader.read_le()?;
            let min = T::read_from(reader)?;
            let max = T::read_from(reader)?;
            total += len as usize;
            overflow.push(OverflowChunk {
                pointer,
                len: len as usize,
                min,
                max,
                items: None,
                dirty: false,
            });
        }

        Ok(Self {
            key,
            inline,
            overflow,
            merged: flags & FLAG_MERGED != 0,
            total,
            dirty: false,
            split_len: split_len.max(1),
        })
    }
}

impl<K, T> PostingList<K, T> {
    /// Approximate bytes held in memory.
    pub fn mem_used(&self) -> usize {
        let item = size_of::<T>();
        let loaded: usize = self
            .overflow
            .iter()
            .filter_map(|chunk| chunk.items.as_ref())
            .map(|items| items.capacity() * item)
            .sum();
        size_of::<Self>()
            + self.inline.capacity() * item
            + self.overflow.capacity() * size_of::<OverflowChunk<T>>()
            + loaded
    }
}

impl<K, T> Footprint for PostingList<K, T> {
    fn footprint(&self) -> usize {
        self.mem_used()
    }
}
