//! Blob store trait and its segment-based implementations.

use std::io::Cursor;

use crate::pointer::BlobPointer;
use crate::stats::BlobStoreStats;
use crate::Result;

pub mod header;
pub mod multi;
pub mod record;
pub mod segment;
pub mod size_class;

pub use multi::MultiSegmentStore;
pub use segment::SegmentStore;

/// Durable storage of opaque byte records.
///
/// Every operation either completes or fails; there are no partial writes
/// to recover from. Only data whose `put` has returned is durable, and only
/// to the extent the operating system persists it.
pub trait BlobStore {
    /// Store a new record and return its pointer.
    fn put(&mut self, data: &[u8]) -> Result<BlobPointer>;

    /// Replace the record at `pointer`.
    ///
    /// Returns `pointer` when the new bytes fit the existing slot. Otherwise
    /// the record moves, the old slot is freed and the new pointer is
    /// returned.
    fn put_at(&mut self, pointer: BlobPointer, data: &[u8]) -> Result<BlobPointer>;

    /// Read a record, validating its tags and checksum.
    fn get(&mut self, pointer: BlobPointer) -> Result<Vec<u8>>;

    /// Read a record as a stream positioned at the first payload byte.
    fn get_reader(&mut self, pointer: BlobPointer) -> Result<Cursor<Vec<u8>>> {
        self.get(pointer).map(Cursor::new)
    }

    /// Free a record's slot.
    fn delete(&mut self, pointer: BlobPointer) -> Result<()>;

    /// Cursor from which [`next_pointer`](Self::next_pointer) starts a
    /// traversal. Empty when the store holds no slots.
    fn first_pointer(&self) -> BlobPointer;

    /// Return the next live record at or after `cursor` and advance it.
    ///
    /// Returns `None` and leaves `cursor` empty once the traversal is done.
    fn next_pointer(&mut self, cursor: &mut BlobPointer) -> Result<Option<(BlobPointer, Vec<u8>)>>;

    /// Snapshot of the operation counters.
    fn stats(&self) -> BlobStoreStats;

    /// Zero the operation counters.
    fn reset_stats(&mut self);

    /// Whether mutations are rejected.
    fn is_read_only(&self) -> bool;

    /// Write the closing header state. Further use is not supported.
    fn close(&mut self) -> Result<()>;
}

/// Iterate over all live records of a store in pointer order.
pub fn records<S: BlobStore + ?Sized>(store: &mut S) -> Records<'_, S> {
    let cursor = store.first_pointer();
    Records { store, cursor }
}

/// Iterator returned by [`records`].
pub struct Records<'a, S: BlobStore + ?Sized> {
    store: &'a mut S,
    cursor: BlobPointer,
}

impl<S: BlobStore + ?Sized> Iterator for Records<'_, S> {
    type Item = Result<(BlobPointer, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor.is_empty() {
            return None;
        }
        match self.store.next_pointer(&mut self.cursor) {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => None,
            Err(e) => {
                self.cursor = BlobPointer::EMPTY;
                Some(Err(e))
            }
        }
    }
}
