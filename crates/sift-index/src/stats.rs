//! Index statistics

use serde::{Deserialize, Serialize};

/// Snapshot of an index and its posting-list cache
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexStats {
    /// Keys in the key table
    pub key_count: usize,
    /// Posting lists resident in the cache
    pub cached_lists: usize,
    /// Cached lists with changes not yet written to the store
    pub dirty_lists: usize,
    /// Percentage of cached overflow chunks whose items are loaded
    pub loaded_chunk_percent: f64,
    /// Average item count of cached lists
    pub avg_list_len: f64,
    /// Bytes held by the cache
    pub cache_memory: u64,
    /// Whether the last refresh found the cache at its budget
    pub cache_full: bool,
}
