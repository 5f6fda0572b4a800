//! Segment file header.
//!
//! Layout (little-endian, `n` = number of size classes):
//!
//! | Offset      | Size  | Field                          |
//! |-------------|-------|--------------------------------|
//! | 0x00        | 32    | Version tag (NUL padded)       |
//! | 0x20        | 6     | State tag (`Opened`/`Closed`)  |
//! | 0x26        | 4     | Maximum segment length         |
//! | 0x2A        | 4     | Size class count `n`           |
//! | 0x2E        | 4 * n | Block length per class         |
//! | 0x2E + 4n   | 6 * n | Free-list head pointer per class |
//! | 0x2E + 10n  | 4     | Offset of the first record     |
//!
//! The header length depends only on the class table, so it can be
//! rewritten in place on close without moving any record.

use binrw::{BinRead, BinWrite};

use crate::pointer::{BlobPointer, POINTER_SIZE};

/// Version tag of the segment format.
pub const VERSION_TAG: [u8; 32] = *b"Sift Blob Segment Format 1.0\0\0\0\0";

/// State tag of a segment that is currently open for writing.
pub const STATE_OPENED: [u8; 6] = *b"Opened";

/// State tag of a segment that was closed cleanly.
pub const STATE_CLOSED: [u8; 6] = *b"Closed";

/// Byte offset of the state tag within the header.
pub const STATE_OFFSET: u64 = 32;

/// Segment file header.
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct SegmentHeader {
    /// Format version tag
    pub version: [u8; 32],
    /// Open/closed state tag
    pub state: [u8; 6],
    /// Maximum segment length in bytes
    pub max_segment_len: u32,
    /// Number of size classes
    pub class_count: u32,
    /// Block length of each size class
    #[br(count = class_count)]
    pub block_lengths: Vec<u32>,
    /// Head of the free list of each size class
    #[br(count = class_count)]
    pub free_heads: Vec<BlobPointer>,
    /// Offset of the first record slot
    pub first_record: u32,
}

impl SegmentHeader {
    /// Create a header for a fresh, open segment.
    pub fn new(max_segment_len: u32, block_lengths: Vec<u32>) -> Self {
        let count = block_lengths.len();
        let mut header = Self {
            version: VERSION_TAG,
            state: STATE_OPENED,
            max_segment_len,
            class_count: count as u32,
            block_lengths,
            free_heads: vec![BlobPointer::EMPTY; count],
            first_record: 0,
        };
        header.first_record = header.encoded_len() as u32;
        header
    }

    /// Encoded length in bytes.
    pub fn encoded_len(&self) -> usize {
        32 + 6 + 4 + 4 + self.block_lengths.len() * (4 + POINTER_SIZE) + 4
    }

    /// Whether the state tag says the segment was closed cleanly.
    pub fn is_closed(&self) -> bool {
        self.state == STATE_CLOSED
    }

    /// Check the header against the size-class table this build uses.
    pub fn validate(&self, block_lengths: &[u32]) -> Result<(), String> {
        if self.version != VERSION_TAG {
            return Err(format!(
                "unknown version tag {:?}",
                String::from_utf8_lossy(&self.version).trim_end_matches('\0')
            ));
        }
        if self.state != STATE_OPENED && self.state != STATE_CLOSED {
            return Err(format!("unknown state tag {:?}", String::from_utf8_lossy(&self.state)));
        }
        if self.block_lengths != block_lengths {
            return Err("size class table does not match".to_string());
        }
        if self.first_record as usize != self.encoded_len() {
            return Err(format!("first record offset {} does not follow header", self.first_record));
        }
        Ok(())
    }
}
