//! Configuration for inverted indexes

use serde::{Deserialize, Serialize};
use sift_blob::{AccessMode, BlobStoreConfig};

use crate::{IndexError, Result};

/// Configuration for opening an inverted index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Memory budget of the posting-list cache (in bytes)
    pub cache_size: u64,

    /// Inline items per list, and items per overflow chunk
    pub split_len: usize,

    /// Fraction of the cache budget that lists may grow by before the
    /// cache is refreshed
    pub flush_threshold_ratio: f64,

    /// Maximum length of a blob segment file (in bytes)
    pub max_segment_len: u32,

    /// Access mode
    pub mode: AccessMode,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            cache_size: 100 * 1024 * 1024, // 100 MB
            split_len: 100,
            flush_threshold_ratio: 0.1,
            max_segment_len: sift_blob::config::DEFAULT_MAX_SEGMENT_LEN,
            mode: AccessMode::Update,
        }
    }
}

impl IndexConfig {
    /// Set the cache budget
    #[must_use]
    pub const fn with_cache_size(mut self, size: u64) -> Self {
        self.cache_size = size;
        self
    }

    /// Set the inline and chunk capacity
    #[must_use]
    pub const fn with_split_len(mut self, len: usize) -> Self {
        self.split_len = len;
        self
    }

    /// Set the cache refresh threshold as a fraction of the cache budget
    #[must_use]
    pub const fn with_flush_threshold_ratio(mut self, ratio: f64) -> Self {
        self.flush_threshold_ratio = ratio;
        self
    }

    /// Set the maximum blob segment length
    #[must_use]
    pub const fn with_max_segment_len(mut self, len: u32) -> Self {
        self.max_segment_len = len;
        self
    }

    /// Set the access mode
    #[must_use]
    pub const fn with_mode(mut self, mode: AccessMode) -> Self {
        self.mode = mode;
        self
    }

    /// Bytes of list growth that trigger a cache refresh.
    #[allow(clippy::cast_precision_loss)]
    pub fn flush_threshold(&self) -> u64 {
        (self.cache_size as f64 * self.flush_threshold_ratio) as u64
    }

    /// Blob store settings derived from this configuration.
    pub const fn blob_config(&self) -> BlobStoreConfig {
        BlobStoreConfig {
            max_segment_len: self.max_segment_len,
            mode: self.mode,
        }
    }

    /// Reject values the index cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.split_len == 0 {
            return Err(IndexError::InvalidConfiguration(
                "split_len must be greater than 0".to_string(),
            ));
        }
        if self.cache_size == 0 {
            return Err(IndexError::InvalidConfiguration(
                "cache_size must be greater than 0".to_string(),
            ));
        }
        if !(self.flush_threshold_ratio > 0.0 && self.flush_threshold_ratio <= 1.0) {
            return Err(IndexError::InvalidConfiguration(format!(
                "flush_threshold_ratio must be in (0, 1], got {}",
                self.flush_threshold_ratio
            )));
        }
        Ok(())
    }
}
