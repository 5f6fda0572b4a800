//! Blob store spanning several segment files.
//!
//! A store named `base` consists of a JSON main file `base.mbb` and segment
//! files `base.mbb00000`, `base.mbb00001`, and so on. The segment id stored
//! in every [`BlobPointer`] is the index of its segment file.
//!
//! For each size class the store remembers the lowest segment that may
//! still have room for it, so that inserts skip segments known to be full
//! and freed slots in older segments are found again.

use std::ffi::OsString;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::BlobStore;
use super::segment::{Overwrite, SegmentStore};
use super::size_class::{block_lengths, class_for};
use crate::config::{AccessMode, BlobStoreConfig};
use crate::pointer::BlobPointer;
use crate::stats::BlobStoreStats;
use crate::{BlobError, Result};

/// Version tag of the main file.
pub const MAIN_VERSION: &str = "Sift Multi-Segment Blob Store 1.0";

/// Extension appended to the store name for the main file.
pub const MAIN_SUFFIX: &str = ".mbb";

#[derive(Debug, Serialize, Deserialize)]
struct MainFile {
    version: String,
    max_segment_len: u32,
    segments: Vec<String>,
    write_segment: u16,
}

/// Blob store that grows by adding segment files.
pub struct MultiSegmentStore {
    main_path: PathBuf,
    mode: AccessMode,
    max_segment_len: u32,
    segments: Vec<SegmentStore>,
    segment_names: Vec<String>,
    block_lengths: Vec<u32>,
    class_hints: Vec<u16>,
    write_segment: u16,
    closed: bool,
}

impl MultiSegmentStore {
    /// Open or create the store named `base`.
    pub fn open(base: impl AsRef<Path>, config: &BlobStoreConfig) -> Result<Self> {
        let main_path = main_path(base.as_ref());
        let block_lengths = block_lengths();
        let class_hints = vec![0; block_lengths.len()];

        if config.mode == AccessMode::Create {
            let mut store = Self {
                main_path,
                mode: config.mode,
                max_segment_len: config.max_segment_len,
                segments: Vec::new(),
                segment_names: Vec::new(),
                block_lengths,
                class_hints,
                write_segment: 0,
                closed: false,
            };
            store.add_segment()?;
            info!("Created multi-segment store {}", store.main_path.display());
            return Ok(store);
        }

        let main: MainFile = serde_json::from_reader(BufReader::new(File::open(&main_path)?))?;
        if main.version != MAIN_VERSION {
            return Err(BlobError::InvalidFormat(format!(
                "{}: unknown version {:?}",
                main_path.display(),
                main.version
            )));
        }
        if main.segments.is_empty() || main.segments.len() > usize::from(u16::MAX) + 1 {
            return Err(BlobError::InvalidFormat(format!(
                "{}: {} segments listed",
                main_path.display(),
                main.segments.len()
            )));
        }

        let dir = parent_dir(&main_path);
        let mut segments = Vec::with_capacity(main.segments.len());
        for (id, name) in main.segments.iter().enumerate() {
            segments.push(SegmentStore::open_segment(
                &dir.join(name),
                main.max_segment_len,
                config.mode,
                id as u16,
            )?);
        }

        info!(
            "Opened multi-segment store {} ({} segments, mode {:?})",
            main_path.display(),
            segments.len(),
            config.mode
        );
        Ok(Self {
            main_path,
            mode: config.mode,
            max_segment_len: main.max_segment_len,
            segments,
            segment_names: main.segments,
            block_lengths,
            class_hints,
            write_segment: main.write_segment,
            closed: false,
        })
    }

    /// Whether a store named `base` exists on disk.
    pub fn exists(base: impl AsRef<Path>) -> bool {
        main_path(base.as_ref()).exists()
    }

    /// Path of the main file.
    pub fn main_path(&self) -> &Path {
        &self.main_path
    }

    /// Number of segment files.
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Segment that received the most recent new segment allocation.
    pub const fn write_segment(&self) -> u16 {
        self.write_segment
    }

    fn add_segment(&mut self) -> Result<u16> {
        let id = u16::try_from(self.segments.len()).map_err(|_| BlobError::SegmentLimit)?;
        let name = segment_file_name(&self.main_path, id);
        let path = parent_dir(&self.main_path).join(&name);

        let segment =
            SegmentStore::open_segment(&path, self.max_segment_len, AccessMode::Create, id)?;
        self.segments.push(segment);
        self.segment_names.push(name);
        self.write_segment = id;
        self.save_main()?;

        debug!("Added segment {} to {}", id, self.main_path.display());
        Ok(id)
    }

    fn save_main(&self) -> Result<()> {
        let main = MainFile {
            version: MAIN_VERSION.to_string(),
            max_segment_len: self.max_segment_len,
            segments: self.segment_names.clone(),
            write_segment: self.write_segment,
        };
        let mut writer = BufWriter::new(File::create(&self.main_path)?);
        serde_json::to_writer_pretty(&mut writer, &main)?;
        writer.flush()?;
        Ok(())
    }

    fn segment_mut(&mut self, pointer: BlobPointer) -> Result<&mut SegmentStore> {
        if pointer.is_empty() {
            return Err(BlobError::EmptyPointer);
        }
        self.segments
            .get_mut(usize::from(pointer.segment()))
            .ok_or_else(|| BlobError::corruption(pointer, "unknown segment"))
    }

    fn lower_hint(&mut self, class: usize, segment: u16) {
        if let Some(hint) = self.class_hints.get_mut(class) {
            *hint = (*hint).min(segment);
        }
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.mode.can_write() {
            Ok(())
        } else {
            Err(BlobError::ReadOnly)
        }
    }
}

impl BlobStore for MultiSegmentStore {
    fn put(&mut self, data: &[u8]) -> Result<BlobPointer> {
        self.ensure_writable()?;
        let class =
            class_for(&self.block_lengths, data.len()).ok_or(BlobError::TooLarge(data.len()))?;

        let start = usize::from(self.class_hints[class]);
        for id in start..self.segments.len() {
            if let Some(pointer) = self.segments[id].try_put(data)? {
                self.class_hints[class] = id as u16;
                return Ok(pointer);
            }
        }

        let id = self.add_segment()?;
        let pointer = self.segments[usize::from(id)]
            .try_put(data)?
            .ok_or(BlobError::SegmentFull {
                len: self.segments[usize::from(id)].file_len(),
                max: self.max_segment_len,
            })?;
        self.class_hints[class] = id;
        Ok(pointer)
    }

    fn put_at(&mut self, pointer: BlobPointer, data: &[u8]) -> Result<BlobPointer> {
        self.ensure_writable()?;
        let segment = pointer.segment();
        match self.segment_mut(pointer)?.overwrite(pointer, data)? {
            Overwrite::InPlace => Ok(pointer),
            Overwrite::Relocated {
                pointer: moved,
                released_class,
            } => {
                self.lower_hint(released_class, segment);
                Ok(moved)
            }
            Overwrite::NoRoom => {
                let moved = self.put(data)?;
                let owner = self.segment_mut(pointer)?;
                let released_class = owner.delete_slot(pointer)?;
                owner.note_size_change();
                self.lower_hint(released_class, segment);
                debug!("Relocated record {} to {}", pointer, moved);
                Ok(moved)
            }
        }
    }

    fn get(&mut self, pointer: BlobPointer) -> Result<Vec<u8>> {
        self.segment_mut(pointer)?.get(pointer)
    }

    fn delete(&mut self, pointer: BlobPointer) -> Result<()> {
        self.ensure_writable()?;
        let class = self.segment_mut(pointer)?.delete_slot(pointer)?;
        self.lower_hint(class, pointer.segment());
        Ok(())
    }

    fn first_pointer(&self) -> BlobPointer {
        self.segments
            .iter()
            .map(BlobStore::first_pointer)
            .find(|pointer| !pointer.is_empty())
            .unwrap_or(BlobPointer::EMPTY)
    }

    fn next_pointer(&mut self, cursor: &mut BlobPointer) -> Result<Option<(BlobPointer, Vec<u8>)>> {
        while !cursor.is_empty() {
            let id = usize::from(cursor.segment());
            let Some(segment) = self.segments.get_mut(id) else {
                break;
            };
            if let Some(record) = segment.next_pointer(cursor)? {
                return Ok(Some(record));
            }
            *cursor = self.segments[id + 1..]
                .iter()
                .map(BlobStore::first_pointer)
                .find(|pointer| !pointer.is_empty())
                .unwrap_or(BlobPointer::EMPTY);
        }
        *cursor = BlobPointer::EMPTY;
        Ok(None)
    }

    fn stats(&self) -> BlobStoreStats {
        let mut total = BlobStoreStats::default();
        for segment in &self.segments {
            total.accumulate(&segment.stats());
        }
        total
    }

    fn reset_stats(&mut self) {
        for segment in &mut self.segments {
            segment.reset_stats();
        }
    }

    fn is_read_only(&self) -> bool {
        !self.mode.can_write()
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        for segment in &mut self.segments {
            segment.close()?;
        }
        if self.mode.can_write() {
            self.save_main()?;
        }
        self.closed = true;
        info!("Closed multi-segment store {}", self.main_path.display());
        Ok(())
    }
}

impl Drop for MultiSegmentStore {
    fn drop(&mut self) {
        if !self.closed
            && self.mode.can_write()
            && let Err(e) = self.close()
        {
            warn!("Failed to close store {}: {}", self.main_path.display(), e);
        }
    }
}

fn main_path(base: &Path) -> PathBuf {
    let mut path = OsString::from(base.as_os_str());
    path.push(MAIN_SUFFIX);
    PathBuf::from(path)
}

fn segment_file_name(main_path: &Path, id: u16) -> String {
    let stem = main_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{stem}{id:05}")
}

fn parent_dir(path: &Path) -> PathBuf {
    path.parent().map(Path::to_path_buf).unwrap_or_default()
}
