//! Record framing.
//!
//! Every slot in a segment has the same shape:
//!
//! | Offset        | Size  | Field                                  |
//! |---------------|-------|----------------------------------------|
//! | 0x00          | 4     | Begin tag `0xABCDEFFF`                 |
//! | 0x04          | 4     | Block length (size class)              |
//! | 0x08          | 1     | State (1 = active, 2 = free)           |
//! | 0x09          | 4     | Payload length, or next free offset    |
//! | 0x0D          | block | Payload, zero padded to block length   |
//! | 0x0D + block  | 4     | Checksum of the payload                |
//! | 0x11 + block  | 4     | End tag `0xFFFEDCBA`                   |
//!
//! A free slot reuses the length field as the link to the next free slot
//! of its class and has a zeroed payload and checksum.

use binrw::{BinRead, BinWrite};

use crate::checksum::record_checksum;

/// Tag opening every slot.
pub const BEGIN_TAG: u32 = 0xABCD_EFFF;

/// Tag closing every slot.
pub const END_TAG: u32 = 0xFFFE_DCBA;

/// Length of the slot prefix in bytes.
pub const PREFIX_LEN: u64 = 13;

/// Length of the trailer (checksum and end tag) in bytes.
pub const TRAILER_LEN: u64 = 8;

/// Slot state byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SlotState {
    /// Slot holds a live record
    Active = 1,
    /// Slot is on a free list
    Free = 2,
}

impl SlotState {
    /// Parse a state byte.
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::Active),
            2 => Some(Self::Free),
            _ => None,
        }
    }
}

/// Fixed-size prefix of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct SlotPrefix {
    /// Begin tag
    pub begin_tag: u32,
    /// Block length of the slot's size class
    pub block_len: u32,
    /// Raw state byte
    pub state: u8,
    /// Payload length of an active slot, next free offset of a free one
    pub len: u32,
}

impl SlotPrefix {
    /// Decoded state, if the byte is valid.
    pub const fn slot_state(&self) -> Option<SlotState> {
        SlotState::from_byte(self.state)
    }

    /// Total slot length including prefix and trailer.
    pub const fn slot_len(&self) -> u64 {
        slot_len(self.block_len)
    }
}

/// Total slot length for a block length.
pub const fn slot_len(block_len: u32) -> u64 {
    PREFIX_LEN + block_len as u64 + TRAILER_LEN
}

/// Encode an active slot holding `payload`.
pub fn encode_active(block_len: u32, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(slot_len(block_len) as usize);
    push_prefix(&mut out, block_len, SlotState::Active, payload.len() as u32);
    out.extend_from_slice(payload);
    out.resize(out.len() + (block_len as usize - payload.len()), 0);
    out.extend_from_slice(&record_checksum(payload).to_le_bytes());
    out.extend_from_slice(&END_TAG.to_le_bytes());
    out
}

/// Encode a free slot linking to `next_free`.
pub fn encode_free(block_len: u32, next_free: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(slot_len(block_len) as usize);
    push_prefix(&mut out, block_len, SlotState::Free, next_free);
    out.resize(out.len() + block_len as usize + 4, 0);
    out.extend_from_slice(&END_TAG.to_le_bytes());
    out
}

/// Encode only the prefix of a free slot, used when relinking free lists.
pub fn encode_free_prefix(block_len: u32, next_free: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(PREFIX_LEN as usize);
    push_prefix(&mut out, block_len, SlotState::Free, next_free);
    out
}

fn push_prefix(out: &mut Vec<u8>, block_len: u32, state: SlotState, len: u32) {
    out.extend_from_slice(&BEGIN_TAG.to_le_bytes());
    out.extend_from_slice(&block_len.to_le_bytes());
    out.push(state as u8);
    out.extend_from_slice(&len.to_le_bytes());
}

/// Split the body that follows a prefix into payload, checksum and end tag.
///
/// `body` is the block area plus trailer, exactly `block_len + 8` bytes.
pub fn split_body(body: &[u8], payload_len: usize) -> Option<(&[u8], u32, u32)> {
    let block_len = body.len().checked_sub(TRAILER_LEN as usize)?;
    if payload_len > block_len {
        return None;
    }
    let checksum = u32::from_le_bytes(body[block_len..block_len + 4].try_into().ok()?);
    let end_tag = u32::from_le_bytes(body[block_len + 4..].try_into().ok()?);
    Some((&body[..payload_len], checksum, end_tag))
}
