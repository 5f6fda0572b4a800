//! Operation counters for blob stores.

use serde::{Deserialize, Serialize};

/// Running statistics of a blob store.
///
/// Counters accumulate from open (or the last reset). The allocation
/// figures describe the slots handed out during that window: bytes used by
/// payloads, bytes lost to size-class padding, and the total of both.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlobStoreStats {
    /// Completed puts, including overwrites
    pub puts: u64,
    /// Puts that extended a segment instead of reusing a free slot
    pub puts_new: u64,
    /// Completed gets
    pub gets: u64,
    /// Completed deletes
    pub dels: u64,
    /// Overwrites that did not fit and had to relocate
    pub size_changes: u64,
    /// Mean payload length over all puts
    pub avg_put_len: f64,
    /// Mean payload length over all gets
    pub avg_get_len: f64,
    /// Payload bytes in allocated slots
    pub alloc_used_size: u64,
    /// Padding bytes in allocated slots
    pub alloc_unused_size: u64,
    /// Size-class bytes of allocated slots
    pub alloc_size: u64,
    /// Allocated slots
    pub alloc_count: u64,
    /// Slots returned to a free list
    pub released_count: u64,
    /// Size-class bytes of released slots
    pub released_size: u64,
}

impl BlobStoreStats {
    pub(crate) fn record_put(&mut self, len: usize, class_len: u32, fresh: bool) {
        self.avg_put_len = running_mean(self.avg_put_len, self.puts, len);
        self.puts += 1;
        if fresh {
            self.puts_new += 1;
        }
        self.alloc_count += 1;
        self.alloc_size += u64::from(class_len);
        self.alloc_used_size += len as u64;
        self.alloc_unused_size += u64::from(class_len).saturating_sub(len as u64);
    }

    pub(crate) fn record_overwrite(&mut self, len: usize) {
        self.avg_put_len = running_mean(self.avg_put_len, self.puts, len);
        self.puts += 1;
    }

    pub(crate) fn record_get(&mut self, len: usize) {
        self.avg_get_len = running_mean(self.avg_get_len, self.gets, len);
        self.gets += 1;
    }

    pub(crate) fn record_delete(&mut self, class_len: u32) {
        self.dels += 1;
        self.released_count += 1;
        self.released_size += u64::from(class_len);
    }

    /// Net bytes held by slots allocated minus slots released.
    pub fn net_alloc_size(&self) -> u64 {
        self.alloc_size.saturating_sub(self.released_size)
    }

    /// Fold another store's counters into this one.
    pub fn accumulate(&mut self, other: &Self) {
        self.avg_put_len = weighted_mean(self.avg_put_len, self.puts, other.avg_put_len, other.puts);
        self.avg_get_len = weighted_mean(self.avg_get_len, self.gets, other.avg_get_len, other.gets);
        self.puts += other.puts;
        self.puts_new += other.puts_new;
        self.gets += other.gets;
        self.dels += other.dels;
        self.size_changes += other.size_changes;
        self.alloc_used_size += other.alloc_used_size;
        self.alloc_unused_size += other.alloc_unused_size;
        self.alloc_size += other.alloc_size;
        self.alloc_count += other.alloc_count;
        self.released_count += other.released_count;
        self.released_size += other.released_size;
    }

    /// Zero every counter.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[allow(clippy::cast_precision_loss)]
fn running_mean(mean: f64, count: u64, sample: usize) -> f64 {
    let n = count as f64;
    (mean * n + sample as f64) / (n + 1.0)
}

#[allow(clippy::cast_precision_loss)]
fn weighted_mean(a: f64, a_count: u64, b: f64, b_count: u64) -> f64 {
    let total = a_count + b_count;
    if total == 0 {
        return 0.0;
    }
    (a * a_count as f64 + b * b_count as f64) / total as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_accounting() {
        let mut stats = BlobStoreStats::default();
        stats.record_put(5, 8, true);
        stats.record_put(7, 8, false);

        assert_eq!(stats.puts, 2);
        assert_eq!(stats.puts_new, 1);
        assert_eq!(stats.alloc_size, 16);
        assert_eq!(stats.alloc_used_size, 12);
        assert_eq!(stats.alloc_unused_size, 4);
        assert!((stats.avg_put_len - 6.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_accumulate_and_reset() {
        let mut a = BlobStoreStats::default();
        a.record_get(10);
        let mut b = BlobStoreStats::default();
        b.record_get(20);
        b.record_get(30);
        b.record_delete(32);

        a.accumulate(&b);
        assert_eq!(a.gets, 3);
        assert_eq!(a.released_size, 32);
        assert!((a.avg_get_len - 20.0).abs() < 1e-9);

        a.reset();
        assert_eq!(a, BlobStoreStats::default());
    }
}
