//! Blob pointer value type.
//!
//! A pointer names one record by its segment id and the byte offset of the
//! record's begin tag inside that segment. Serialized form (little-endian):
//!
//! | Offset | Size | Field   |
//! |--------|------|---------|
//! | 0x00   | 2    | segment |
//! | 0x02   | 4    | offset  |

use binrw::{BinRead, BinWrite};
use std::fmt;

/// Offset value reserved for the empty pointer.
pub const EMPTY_OFFSET: u32 = u32::MAX;

/// Serialized size of a pointer in bytes.
pub const POINTER_SIZE: usize = 6;

/// Handle to one stored record.
///
/// Pointers are plain values. Holding one does not keep the record alive;
/// using a pointer after its record was deleted yields a corruption error
/// from the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BinRead, BinWrite)]
#[brw(little)]
pub struct BlobPointer {
    segment: u16,
    offset: u32,
}

impl BlobPointer {
    /// The empty pointer.
    pub const EMPTY: Self = Self {
        segment: 0,
        offset: EMPTY_OFFSET,
    };

    /// Create a pointer to `offset` within `segment`.
    pub const fn new(segment: u16, offset: u32) -> Self {
        Self { segment, offset }
    }

    /// Create the empty pointer.
    pub const fn new_empty() -> Self {
        Self::EMPTY
    }

    /// Whether this pointer names no record.
    pub const fn is_empty(self) -> bool {
        self.offset == EMPTY_OFFSET
    }

    /// Segment id.
    pub const fn segment(self) -> u16 {
        self.segment
    }

    /// Byte offset within the segment.
    pub const fn offset(self) -> u32 {
        self.offset
    }

    /// Same offset, different segment.
    pub(crate) const fn in_segment(self, segment: u16) -> Self {
        Self {
            segment,
            offset: self.offset,
        }
    }

    /// Serialize to 6 bytes.
    pub fn to_bytes(self) -> [u8; POINTER_SIZE] {
        let mut bytes = [0u8; POINTER_SIZE];
        bytes[0..2].copy_from_slice(&self.segment.to_le_bytes());
        bytes[2..6].copy_from_slice(&self.offset.to_le_bytes());
        bytes
    }

    /// Deserialize from 6 bytes.
    pub fn from_bytes(bytes: [u8; POINTER_SIZE]) -> Self {
        Self {
            segment: u16::from_le_bytes([bytes[0], bytes[1]]),
            offset: u32::from_le_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]),
        }
    }
}

impl Default for BlobPointer {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl fmt::Display for BlobPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            write!(f, "[empty]")
        } else {
            write!(f, "[{}:{}]", self.segment, self.offset)
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use binrw::{BinReaderExt, BinWriterExt};
    use std::io::Cursor;

    #[test]
    fn test_empty_pointer() {
        assert!(BlobPointer::new_empty().is_empty());
        assert!(BlobPointer::default().is_empty());
        assert!(!BlobPointer::new(0, 0).is_empty());
        assert_eq!(BlobPointer::EMPTY.to_string(), "[empty]");
    }

    #[test]
    fn test_ordering_is_segment_then_offset() {
        let a = BlobPointer::new(0, 500);
        let b = BlobPointer::new(1, 10);
        let c = BlobPointer::new(1, 20);
        assert!(a < b);
        assert!(b < c);

        let mut pointers = vec![c, a, b];
        pointers.sort();
        assert_eq!(pointers, vec![a, b, c]);
    }

    #[test]
    fn test_byte_layout() {
        let pointer = BlobPointer::new(0x0102, 0x0A0B_0C0D);
        let bytes = pointer.to_bytes();
        assert_eq!(bytes, [0x02, 0x01, 0x0D, 0x0C, 0x0B, 0x0A]);
        assert_eq!(BlobPointer::from_bytes(bytes), pointer);
    }

    #[test]
    fn test_binrw_matches_manual_layout() {
        let pointer = BlobPointer::new(7, 123_456);
        let mut cursor = Cursor::new(Vec::new());
        cursor.write_le(&pointer).expect("write pointer");
        assert_eq!(cursor.get_ref().as_slice(), pointer.to_bytes().as_slice());

        cursor.set_position(0);
        let read: BlobPointer = cursor.read_le().expect("read pointer");
        assert_eq!(read, pointer);
    }
}
