//! Allocation size classes.
//!
//! Every record occupies a slot whose payload area is one of a fixed set of
//! block lengths. The table combines powers of two with decimal ladders so
//! that padding stays small for both binary-ish and decimal-ish payloads.

/// Build the sorted table of block lengths.
pub fn block_lengths() -> Vec<u32> {
    let mut lengths: Vec<u32> = (0..=30).map(|shift| 1u32 << shift).collect();
    lengths.extend((10..100).step_by(10));
    lengths.extend((100..10_000).step_by(100));
    lengths.extend((10_000..100_000).step_by(1_000));
    lengths.extend((100_000..1_000_000).step_by(25_000));
    lengths.extend((1_000_000..10_000_000).step_by(1_000_000));
    lengths.extend((10_000_000..100_000_000).step_by(10_000_000));
    lengths.sort_unstable();
    lengths.dedup();
    lengths
}

/// Index of the smallest block length that holds `len` bytes.
pub fn class_for(lengths: &[u32], len: usize) -> Option<usize> {
    let len = u32::try_from(len).ok()?;
    let idx = lengths.partition_point(|&block| block < len);
    (idx < lengths.len()).then_some(idx)
}

/// Index of an exact block length, as read back from a record prefix.
pub fn class_of_block(lengths: &[u32], block: u32) -> Option<usize> {
    lengths.binary_search(&block).ok()
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_table_is_sorted_and_unique() {
        let lengths = block_lengths();
        assert!(lengths.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(lengths.first(), Some(&1));
        assert_eq!(lengths.last(), Some(&(1 << 30)));
        assert!(lengths.contains(&975_000));
        assert!(lengths.contains(&90_000_000));
    }

    #[test]
    fn test_smallest_fitting_class() {
        let lengths = block_lengths();
        let block = |len| class_for(&lengths, len).map(|i| lengths[i]);

        assert_eq!(block(0), Some(1));
        assert_eq!(block(1), Some(1));
        assert_eq!(block(5), Some(8));
        assert_eq!(block(10), Some(10));
        assert_eq!(block(11), Some(16));
        assert_eq!(block(1_000), Some(1_000));
        assert_eq!(block(1_001), Some(1_024));
        assert_eq!(block((1 << 30) + 1), None);
    }

    #[test]
    fn test_exact_block_lookup() {
        let lengths = block_lengths();
        let idx = class_of_block(&lengths, 4_096).expect("power of two");
        assert_eq!(lengths[idx], 4_096);
        assert_eq!(class_of_block(&lengths, 4_097), None);
    }
}
