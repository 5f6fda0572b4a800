//! Configuration for blob stores

use serde::{Deserialize, Serialize};

/// Default maximum length of one segment file in bytes.
pub const DEFAULT_MAX_SEGMENT_LEN: u32 = 2_000_000_000;

/// How a store is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AccessMode {
    /// Create a new store, truncating any existing files.
    Create,
    /// Open an existing store for reading and writing.
    #[default]
    Update,
    /// Open an existing store for reading only.
    ReadOnly,
    /// Open an existing store for reading and writing even if it was not
    /// closed cleanly.
    Restore,
}

impl AccessMode {
    /// Check if this mode allows writes.
    pub const fn can_write(self) -> bool {
        !matches!(self, Self::ReadOnly)
    }
}

/// Configuration for opening a blob store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobStoreConfig {
    /// Maximum length of a segment file in bytes
    pub max_segment_len: u32,

    /// Access mode
    pub mode: AccessMode,
}

impl Default for BlobStoreConfig {
    fn default() -> Self {
        Self {
            max_segment_len: DEFAULT_MAX_SEGMENT_LEN,
            mode: AccessMode::Update,
        }
    }
}

impl BlobStoreConfig {
    /// Set the maximum segment length
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
}
