//! Persistent inverted index over a segmented blob store.
//!
//! An [`InvertedIndex`] maps keys to posting lists. Each posting list keeps
//! up to a fixed number of items inline and spills further items into
//! overflow chunks stored as separate blob records, loaded only when read.
//! All list access goes through a memory-bounded [`RecordCache`]; once the
//! lists have grown by a configured fraction of the cache budget, every
//! cached list is defragmented and the cache shrinks back to budget,
//! writing evicted lists back to the store.
//!
//! Boolean [`Query`] trees over keys evaluate to a single merged list using
//! a pluggable [`MergePolicy`].
//!
//! # Example
//!
//! ```rust,no_run
//! use sift_index::{AccessMode, IndexConfig, InvertedIndex, Query};
//!
//! # fn example() -> sift_index::Result<()> {
//! let config = IndexConfig::default().with_mode(AccessMode::Create);
//! let mut index: InvertedIndex<String, u64> = InvertedIndex::open("/tmp", "words", config)?;
//! index.add_item_vector("cat".to_string(), [1, 2, 3])?;
//! index.add_item_vector("dog".to_string(), [2, 3, 4])?;
//!
//! let both = Query::and(Query::key("cat".to_string()), Query::key("dog".to_string()));
//! assert_eq!(index.evaluate(&both)?, vec![2, 3]);
//! index.close()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![allow(clippy::must_use_candidate)]

use sift_blob::{BlobError, BlobPointer};
use thiserror::Error;

// Posting-list memory cache
pub mod cache;

// Binary encoding of keys and items
pub mod codec;

// Index configuration
pub mod config;

// Top-level index
pub mod index;

// Set-combination strategies
pub mod merger;

// Posting lists and overflow chunks
pub mod posting;

// Boolean query trees
pub mod query;

// Index statistics
pub mod stats;

pub use cache::{Footprint, LruRecordCache, RecordCache};
pub use codec::Persist;
pub use config::IndexConfig;
pub use index::{InvertedIndex, PostingListRef};
pub use merger::{DefaultMerger, MergePolicy, Weighted, WeightedMerger};
pub use posting::PostingList;
pub use query::Query;
pub use sift_blob::AccessMode;
pub use stats::IndexStats;

/// Error types for index operations
#[derive(Debug, Error)]
pub enum IndexError {
    /// Blob store failure, including corruption of a stored list
    #[error(transparent)]
    Blob(#[from] BlobError),

    /// Key table file operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Mutation attempted on an index opened read-only
    #[error("index is read-only")]
    ReadOnly,

    /// Item index outside of a posting list
    #[error("item index {index} out of range for posting list of {len} items")]
    IndexOutOfRange {
        /// Requested index
        index: usize,
        /// Number of items in the list
        len: usize,
    },

    /// Stored bytes do not decode as a posting list, chunk or key table
    #[error("decode error: {0}")]
    Decode(String),

    /// Query tree cannot be evaluated
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// Rejected configuration value
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Internal invariant broken: the cache did not retain a list it was
    /// just given. A conforming [`RecordCache`] never produces this; it
    /// reports a faulty custom cache instead of panicking.
    #[error("posting list {0} missing from cache")]
    CacheMiss(BlobPointer),
}

/// Result type for index operations
pub type Result<T> = std::result::Result<T, IndexError>;

impl IndexError {
    /// Whether this error reports a damaged blob record.
    pub const fn is_corruption(&self) -> bool {
        matches!(self, Self::Blob(e) if e.is_corruption())
    }
}

impl From<binrw::Error> for IndexError {
    fn from(err: binrw::Error) -> Self {
        match err {
            binrw::Error::Io(io) => Self::Io(io),
            other => Self::Decode(other.to_string()),
        }
    }
}

/// Key type usable in an index.
pub trait IndexKey: Persist + Ord + Clone + 'static {}

impl<K: Persist + Ord + Clone + 'static> IndexKey for K {}

/// Item type storable in a posting list.
pub trait IndexItem: Persist + Clone + PartialEq + 'static {}

impl<T: Persist + Clone + PartialEq + 'static> IndexItem for T {}
