//! Durable storage of variable-length byte records addressed by
//! [`BlobPointer`]s.
//!
//! Records live in segment files. Every record is framed by a begin tag, an
//! allocation size class, an active/free state byte, the payload length,
//! the payload padded to its size class, a checksum and an end tag. Deleted
//! slots are threaded onto a per-class free list so that later records of
//! the same class reuse them instead of growing the file.
//!
//! Two store variants implement the [`BlobStore`] trait:
//!
//! - [`SegmentStore`]: one file capped at a maximum length
//! - [`MultiSegmentStore`]: a main file plus numbered segment files, rolling
//!   to a fresh segment whenever the existing ones are full
//!
//! # Example
//!
//! ```rust,no_run
//! use sift_blob::{AccessMode, BlobStore, BlobStoreConfig, MultiSegmentStore};
//!
//! # fn example() -> sift_blob::Result<()> {
//! let config = BlobStoreConfig::default().with_mode(AccessMode::Create);
//! let mut store = MultiSegmentStore::open("/tmp/postings", &config)?;
//! let pointer = store.put(b"hello")?;
//! assert_eq!(store.get(pointer)?, b"hello");
//! store.close()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![allow(clippy::must_use_candidate)]

use std::path::PathBuf;

use thiserror::Error;

// Record checksums
pub mod checksum;

// Store configuration
pub mod config;

// Pointer value type
pub mod pointer;

// Operation counters
pub mod stats;

// Segment files and the store variants
pub mod store;

pub use config::{AccessMode, BlobStoreConfig};
pub use pointer::BlobPointer;
pub use stats::BlobStoreStats;
pub use store::{BlobStore, MultiSegmentStore, Records, SegmentStore, records};

/// Error types for blob store operations
#[derive(Debug, Error)]
pub enum BlobError {
    /// Underlying file operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Tag, state or checksum mismatch on a record
    #[error("corrupt record at {pointer}: {reason}")]
    Corruption {
        /// Record that failed validation
        pointer: BlobPointer,
        /// What was wrong with it
        reason: String,
    },

    /// Mutation attempted on a store opened read-only
    #[error("blob store is read-only")]
    ReadOnly,

    /// Store was not closed cleanly the last time it was open
    #[error("blob store was not closed cleanly: {0}")]
    UncleanShutdown(PathBuf),

    /// Header or main file does not match the expected layout
    #[error("invalid blob store format: {0}")]
    InvalidFormat(String),

    /// Single-segment store reached its length cap
    #[error("segment is full: {len} bytes of {max}")]
    SegmentFull {
        /// Current file length
        len: u64,
        /// Configured maximum segment length
        max: u32,
    },

    /// Payload is larger than the largest size class
    #[error("payload of {0} bytes exceeds the largest size class")]
    TooLarge(usize),

    /// Empty pointer passed where a live record was expected
    #[error("empty blob pointer")]
    EmptyPointer,

    /// No segment id is left for a new segment file
    #[error("segment limit reached")]
    SegmentLimit,

    /// Main file could not be encoded or decoded
    #[error("metadata error: {0}")]
    Metadata(#[from] serde_json::Error),
}

/// Result type for blob store operations
pub type Result<T> = std::result::Result<T, BlobError>;

impl BlobError {
    pub(crate) fn corruption(pointer: BlobPointer, reason: impl Into<String>) -> Self {
        Self::Corruption {
            pointer,
            reason: reason.into(),
        }
    }

    /// Whether this error reports a damaged record.
    pub const fn is_corruption(&self) -> bool {
        matches!(self, Self::Corruption { .. })
    }
}

impl From<binrw::Error> for BlobError {
    fn from(err: binrw::Error) -> Self {
        match err {
            binrw::Error::Io(io) => Self::Io(io),
            other => Self::InvalidFormat(other.to_string()),
        }
    }
}
