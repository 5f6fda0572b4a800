//! Single-file blob segment.
//!
//! A segment is one file: a [`SegmentHeader`] followed by record slots.
//! New slots are appended at the end of the file until the file grows past
//! the configured maximum length; deleted slots are kept on a per-class
//! free list and handed out again before the file grows.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use binrw::{BinReaderExt, BinWriterExt};
use tracing::{debug, info, warn};

use super::BlobStore;
use super::header::{STATE_CLOSED, STATE_OFFSET, STATE_OPENED, SegmentHeader};
use super::record::{
    self, BEGIN_TAG, END_TAG, PREFIX_LEN, SlotPrefix, SlotState, encode_active, encode_free,
    encode_free_prefix,
};
use super::size_class::{block_lengths, class_for, class_of_block};
use crate::checksum::record_checksum;
use crate::config::{AccessMode, BlobStoreConfig};
use crate::pointer::{BlobPointer, EMPTY_OFFSET};
use crate::stats::BlobStoreStats;
use crate::{BlobError, Result};

/// Outcome of overwriting a record inside one segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Overwrite {
    /// New bytes fit the existing slot
    InPlace,
    /// Record moved to a new slot in this segment; old slot was freed
    Relocated {
        /// New location
        pointer: BlobPointer,
        /// Size class index of the freed slot
        released_class: usize,
    },
    /// Record needs a bigger slot and this segment is full; nothing changed
    NoRoom,
}

/// Blob store backed by a single segment file.
pub struct SegmentStore {
    path: PathBuf,
    file: File,
    mode: AccessMode,
    segment: u16,
    header: SegmentHeader,
    file_len: u64,
    stats: BlobStoreStats,
    closed: bool,
}

impl SegmentStore {
    /// Open or create a single-segment store at `path`.
    pub fn open(path: impl AsRef<Path>, config: &BlobStoreConfig) -> Result<Self> {
        Self::open_segment(path.as_ref(), config.max_segment_len, config.mode, 0)
    }

    /// Open a segment whose pointers carry `segment` as their segment id.
    pub(crate) fn open_segment(
        path: &Path,
        max_segment_len: u32,
        mode: AccessMode,
        segment: u16,
    ) -> Result<Self> {
        if mode == AccessMode::Create {
            return Self::create(path, max_segment_len, segment);
        }

        let file = OpenOptions::new()
            .read(true)
            .write(mode.can_write())
            .open(path)?;
        let file_len = file.metadata()?.len();

        let header: SegmentHeader = {
            let mut reader = BufReader::new(&file);
            reader.read_le()?
        };
        header
            .validate(&block_lengths())
            .map_err(|reason| BlobError::InvalidFormat(format!("{}: {reason}", path.display())))?;

        if !header.is_closed() {
            if mode != AccessMode::Restore {
                return Err(BlobError::UncleanShutdown(path.to_path_buf()));
            }
            warn!("Restoring segment {} that was not closed cleanly", path.display());
        }

        let mut store = Self {
            path: path.to_path_buf(),
            file,
            mode,
            segment,
            header,
            file_len,
            stats: BlobStoreStats::default(),
            closed: false,
        };

        if mode == AccessMode::Restore {
            store.rebuild_free_lists()?;
        }
        if mode.can_write() {
            store.header.state = STATE_OPENED;
            store.write_at(STATE_OFFSET, &STATE_OPENED)?;
        }

        info!(
            "Opened segment {} ({} bytes, mode {:?})",
            path.display(),
            file_len,
            mode
        );
        Ok(store)
    }

    fn create(path: &Path, max_segment_len: u32, segment: u16) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        let header = SegmentHeader::new(max_segment_len, block_lengths());
        let mut store = Self {
            path: path.to_path_buf(),
            file,
            mode: AccessMode::Create,
            segment,
            file_len: u64::from(header.first_record),
            header,
            stats: BlobStoreStats::default(),
            closed: false,
        };
        store.write_header()?;

        info!("Created segment {}", path.display());
        Ok(store)
    }

    /// Path of the segment file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current length of the segment file in bytes.
    pub const fn file_len(&self) -> u64 {
        self.file_len
    }

    /// Configured maximum segment length.
    pub const fn max_segment_len(&self) -> u32 {
        self.header.max_segment_len
    }

    /// Whether the segment accepts no new slots at the end of the file.
    pub fn is_full(&self) -> bool {
        self.file_len > u64::from(self.header.max_segment_len)
    }

    /// Insert a record, returning `None` when the segment has no room.
    pub(crate) fn try_put(&mut self, data: &[u8]) -> Result<Option<BlobPointer>> {
        self.ensure_writable()?;
        let lengths = &self.header.block_lengths;
        let class = class_for(lengths, data.len()).ok_or(BlobError::TooLarge(data.len()))?;
        let block_len = lengths[class];

        let head = self.header.free_heads[class];
        if !head.is_empty() {
            let pointer = head.in_segment(self.segment);
            let prefix = self.read_prefix(pointer)?;
            if prefix.slot_state() != Some(SlotState::Free) || prefix.block_len != block_len {
                return Err(BlobError::corruption(pointer, "free list entry is not a free slot"));
            }
            let next = self.link(prefix.len);
            self.write_at(u64::from(pointer.offset()), &encode_active(block_len, data))?;
            self.header.free_heads[class] = next;
            self.stats.record_put(data.len(), block_len, false);
            return Ok(Some(pointer));
        }

        if self.is_full() {
            return Ok(None);
        }
        let Ok(offset) = u32::try_from(self.file_len) else {
            return Ok(None);
        };
        if offset == EMPTY_OFFSET {
            return Ok(None);
        }

        let bytes = encode_active(block_len, data);
        self.write_at(self.file_len, &bytes)?;
        self.file_len += bytes.len() as u64;
        self.stats.record_put(data.len(), block_len, true);
        Ok(Some(BlobPointer::new(self.segment, offset)))
    }

    /// Overwrite a record, moving it within this segment if it outgrew its slot.
    pub(crate) fn overwrite(&mut self, pointer: BlobPointer, data: &[u8]) -> Result<Overwrite> {
        self.ensure_writable()?;
        let prefix = self.read_active_prefix(pointer)?;

        if data.len() <= prefix.block_len as usize {
            self.write_at(u64::from(pointer.offset()), &encode_active(prefix.block_len, data))?;
            self.stats.record_overwrite(data.len());
            return Ok(Overwrite::InPlace);
        }

        let Some(moved) = self.try_put(data)? else {
            return Ok(Overwrite::NoRoom);
        };
        let released_class = self.release(pointer, prefix)?;
        self.stats.size_changes += 1;
        debug!("Relocated record {} to {}", pointer, moved);
        Ok(Overwrite::Relocated {
            pointer: moved,
            released_class,
        })
    }

    /// Delete a record, returning the size class index of the freed slot.
    pub(crate) fn delete_slot(&mut self, pointer: BlobPointer) -> Result<usize> {
        self.ensure_writable()?;
        let prefix = self.read_active_prefix(pointer)?;
        self.release(pointer, prefix)
    }

    pub(crate) fn note_size_change(&mut self) {
        self.stats.size_changes += 1;
    }

    fn release(&mut self, pointer: BlobPointer, prefix: SlotPrefix) -> Result<usize> {
        let class = class_of_block(&self.header.block_lengths, prefix.block_len)
            .ok_or_else(|| BlobError::corruption(pointer, "unknown size class"))?;

        let next = self.header.free_heads[class];
        let next_offset = if next.is_empty() { EMPTY_OFFSET } else { next.offset() };
        self.write_at(
            u64::from(pointer.offset()),
            &encode_free(prefix.block_len, next_offset),
        )?;
        self.header.free_heads[class] = pointer.in_segment(self.segment);
        self.stats.record_delete(prefix.block_len);
        Ok(class)
    }

    /// Relink the free lists from the slots on disk.
    ///
    /// Free-list heads are only written on close, so after an unclean
    /// shutdown the header may name slots that were reused since.
    fn rebuild_free_lists(&mut self) -> Result<()> {
        let class_count = self.header.block_lengths.len();
        let mut free: Vec<Vec<u32>> = vec![Vec::new(); class_count];

        let mut offset = u64::from(self.header.first_record);
        while offset < self.file_len {
            let pointer = BlobPointer::new(self.segment, offset as u32);
            let prefix = self.read_prefix(pointer)?;
            if prefix.slot_state() == Some(SlotState::Free) {
                let class = class_of_block(&self.header.block_lengths, prefix.block_len)
                    .ok_or_else(|| BlobError::corruption(pointer, "unknown size class"))?;
                free[class].push(offset as u32);
            }
            offset += prefix.slot_len();
        }

        let mut relinked = 0usize;
        for (class, offsets) in free.iter().enumerate() {
            let block_len = self.header.block_lengths[class];
            let mut next = EMPTY_OFFSET;
            for &slot in offsets.iter().rev() {
                self.write_at(u64::from(slot), &encode_free_prefix(block_len, next))?;
                next = slot;
            }
            self.header.free_heads[class] = self.link(next);
            relinked += offsets.len();
        }

        warn!(
            "Rebuilt free lists of {} ({} free slots)",
            self.path.display(),
            relinked
        );
        Ok(())
    }

    fn link(&self, offset: u32) -> BlobPointer {
        if offset == EMPTY_OFFSET {
            BlobPointer::EMPTY
        } else {
            BlobPointer::new(self.segment, offset)
        }
    }

    fn read_prefix(&mut self, pointer: BlobPointer) -> Result<SlotPrefix> {
        if pointer.is_empty() {
            return Err(BlobError::EmptyPointer);
        }
        let offset = u64::from(pointer.offset());
        if offset < u64::from(self.header.first_record) || offset + PREFIX_LEN > self.file_len {
            return Err(BlobError::corruption(pointer, "offset outside of segment"));
        }

        let mut raw = [0u8; PREFIX_LEN as usize];
        self.read_at(offset, &mut raw)?;
        let prefix: SlotPrefix = Cursor::new(&raw[..]).read_le()?;

        if prefix.begin_tag != BEGIN_TAG {
            return Err(BlobError::corruption(pointer, "begin tag mismatch"));
        }
        if offset + prefix.slot_len() > self.file_len {
            return Err(BlobError::corruption(pointer, "slot extends past end of segment"));
        }
        Ok(prefix)
    }

    fn read_active_prefix(&mut self, pointer: BlobPointer) -> Result<SlotPrefix> {
        let prefix = self.read_prefix(pointer)?;
        match prefix.slot_state() {
            Some(SlotState::Active) => {}
            Some(SlotState::Free) => return Err(BlobError::corruption(pointer, "slot is free")),
            None => return Err(BlobError::corruption(pointer, "invalid slot state")),
        }
        if prefix.len > prefix.block_len {
            return Err(BlobError::corruption(pointer, "payload longer than its slot"));
        }
        Ok(prefix)
    }

    fn read_payload(&mut self, pointer: BlobPointer, prefix: SlotPrefix) -> Result<Vec<u8>> {
        let mut body = vec![0u8; prefix.block_len as usize + record::TRAILER_LEN as usize];
        self.read_at(u64::from(pointer.offset()) + PREFIX_LEN, &mut body)?;

        let (payload, checksum, end_tag) = record::split_body(&body, prefix.len as usize)
            .ok_or_else(|| BlobError::corruption(pointer, "malformed slot body"))?;
        if end_tag != END_TAG {
            return Err(BlobError::corruption(pointer, "end tag mismatch"));
        }
        if checksum != record_checksum(payload) {
            return Err(BlobError::corruption(pointer, "checksum mismatch"));
        }

        let payload = payload.to_vec();
        self.stats.record_get(payload.len());
        Ok(payload)
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    fn write_at(&mut self, offset: u64, bytes: &[u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(bytes)?;
        Ok(())
    }

    fn write_header(&mut self) -> Result<()> {
        let mut cursor = Cursor::new(Vec::with_capacity(self.header.encoded_len()));
        cursor.write_le(&self.header)?;
        self.write_at(0, cursor.get_ref())?;
        self.file.flush()?;
        Ok(())
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.mode.can_write() {
            Ok(())
        } else {
            Err(BlobError::ReadOnly)
        }
    }
}

impl BlobStore for SegmentStore {
    fn put(&mut self, data: &[u8]) -> Result<BlobPointer> {
        self.try_put(data)?.ok_or(BlobError::SegmentFull {
            len: self.file_len,
            max: self.header.max_segment_len,
        })
    }

    fn put_at(&mut self, pointer: BlobPointer, data: &[u8]) -> Result<BlobPointer> {
        match self.overwrite(pointer, data)? {
            Overwrite::InPlace => Ok(pointer),
            Overwrite::Relocated { pointer, .. } => Ok(pointer),
            Overwrite::NoRoom => Err(BlobError::SegmentFull {
                len: self.file_len,
                max: self.header.max_segment_len,
            }),
        }
    }

    fn get(&mut self, pointer: BlobPointer) -> Result<Vec<u8>> {
        let prefix = self.read_active_prefix(pointer)?;
        self.read_payload(pointer, prefix)
    }

    fn delete(&mut self, pointer: BlobPointer) -> Result<()> {
        self.delete_slot(pointer).map(|_| ())
    }

    fn first_pointer(&self) -> BlobPointer {
        if self.file_len > u64::from(self.header.first_record) {
            BlobPointer::new(self.segment, self.header.first_record)
        } else {
            BlobPointer::EMPTY
        }
    }

    fn next_pointer(&mut self, cursor: &mut BlobPointer) -> Result<Option<(BlobPointer, Vec<u8>)>> {
        loop {
            if cursor.is_empty() || u64::from(cursor.offset()) >= self.file_len {
                *cursor = BlobPointer::EMPTY;
                return Ok(None);
            }

            let pointer = *cursor;
            let prefix = self.read_prefix(pointer)?;
            let next = u64::from(pointer.offset()) + prefix.slot_len();
            *cursor = match u32::try_from(next) {
                Ok(offset) if u64::from(offset) < self.file_len => {
                    BlobPointer::new(self.segment, offset)
                }
                _ => BlobPointer::EMPTY,
            };

            match prefix.slot_state() {
                Some(SlotState::Active) => {
                    if prefix.len > prefix.block_len {
                        return Err(BlobError::corruption(pointer, "payload longer than its slot"));
                    }
                    let payload = self.read_payload(pointer, prefix)?;
                    return Ok(Some((pointer, payload)));
                }
                Some(SlotState::Free) => {}
                None => return Err(BlobError::corruption(pointer, "invalid slot state")),
            }
        }
    }

    fn stats(&self) -> BlobStoreStats {
        self.stats.clone()
    }

    fn reset_stats(&mut self) {
        self.stats.reset();
    }

    fn is_read_only(&self) -> bool {
        !self.mode.can_write()
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        if self.mode.can_write() {
            self.header.state = STATE_CLOSED;
            self.write_header()?;
            self.file.sync_all()?;
        }
        self.closed = true;
        info!("Closed segment {}", self.path.display());
        Ok(())
    }
}

impl Drop for SegmentStore {
    fn drop(&mut self) {
        if !self.closed
            && self.mode.can_write()
            && let Err(e) = self.close()
        {
            warn!("Failed to close segment {}: {}", self.path.display(), e);
        }
    }
}
