//! End-to-end scenarios for the inverted index.

#![allow(clippy::expect_used)]

use pretty_assertions::assert_eq;
use sift_blob::{BlobError, BlobPointer};
use sift_index::{
    AccessMode, DefaultMerger, IndexConfig, IndexError, InvertedIndex, LruRecordCache,
    PostingList, Query, Weighted, WeightedMerger,
};
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn config(mode: AccessMode) -> IndexConfig {
    IndexConfig::default()
        .with_mode(mode)
        .with_max_segment_len(1 << 20)
}

fn s(value: &str) -> String {
    value.to_string()
}

#[test]
fn overflow_split_of_a_growing_list() {
    init_tracing();
    let dir = TempDir::new().expect("tempdir");
    let mut index: InvertedIndex<String, u32> =
        InvertedIndex::open(dir.path(), "animals", config(AccessMode::Create)).expect("open");

    for item in 0..250 {
        index.add_item(s("cat"), item).expect("add");
    }

    let mut list = index
        .get_posting_list(&s("cat"))
        .expect("lookup")
        .expect("present");
    assert_eq!(list.len(), 250);
    assert_eq!(list.get_item(150).expect("item"), 150);
    assert!(list.is_merged());
    index.close().expect("close");

    let mut index: InvertedIndex<String, u32> =
        InvertedIndex::open(dir.path(), "animals", config(AccessMode::ReadOnly)).expect("reopen");
    let items = index.items(&s("cat")).expect("items");
    assert_eq!(items, (0..250).collect::<Vec<_>>());
    let stats = index.stats();
    assert_eq!(stats.cached_lists, 1);
    assert!((stats.loaded_chunk_percent - 100.0).abs() < f64::EPSILON);
}

#[test]
fn boolean_queries_over_two_keys() {
    let dir = TempDir::new().expect("tempdir");
    let mut index: InvertedIndex<String, u64> =
        InvertedIndex::open(dir.path(), "letters", config(AccessMode::Create)).expect("open");
    index.add_item_vector(s("a"), [1, 2, 3]).expect("add");
    index.add_item_vector(s("b"), [2, 3, 4]).expect("add");

    let a = || Query::key(s("a"));
    let b = || Query::key(s("b"));
    assert_eq!(index.evaluate(&Query::and(a(), b())).expect("and"), vec![2, 3]);
    assert_eq!(
        index.evaluate(&Query::or(a(), b())).expect("or"),
        vec![1, 2, 3, 4]
    );
    assert_eq!(
        index
            .evaluate(&Query::and(Query::not(a()), b()))
            .expect("and not"),
        vec![4]
    );
    assert_eq!(
        index.evaluate(&Query::or_all([a(), b(), Query::key(s("zzz"))])).expect("or all"),
        vec![1, 2, 3, 4]
    );

    let unbounded = index.evaluate(&Query::not(a()));
    assert!(matches!(unbounded, Err(IndexError::InvalidQuery(_))));
}

#[test]
fn weighted_items_sum_on_merge() {
    let dir = TempDir::new().expect("tempdir");
    let mut index: InvertedIndex<String, Weighted, WeightedMerger> =
        InvertedIndex::open(dir.path(), "weights", config(AccessMode::Create)).expect("open");

    index
        .add_item_vector(
            s("term"),
            [
                Weighted::new(9, 1.0),
                Weighted::new(2, 0.5),
                Weighted::new(9, 2.0),
            ],
        )
        .expect("add");
    index
        .add_item_vector(s("other"), [Weighted::new(9, 4.0), Weighted::new(5, 1.0)])
        .expect("add");

    let mut list = index
        .get_posting_list(&s("term"))
        .expect("lookup")
        .expect("present");
    list.defragment().expect("def");
    assert_eq!(
        list.items().expect("items"),
        vec![Weighted::new(2, 0.5), Weighted::new(9, 3.0)]
    );

    let both = index
        .evaluate(&Query::and(Query::key(s("term")), Query::key(s("other"))))
        .expect("and");
    assert_eq!(both, vec![Weighted::new(9, 7.0)]);
}

#[test]
fn merge_index_combines_partial_indexes() {
    let dir = TempDir::new().expect("tempdir");
    let small = config(AccessMode::Create).with_split_len(3);
    let mut target: InvertedIndex<String, u64> =
        InvertedIndex::open(dir.path(), "target", small.clone()).expect("open");
    let mut part: InvertedIndex<String, u64> =
        InvertedIndex::open(dir.path(), "part", small).expect("open");

    target.add_item_vector(s("x"), [1, 5]).expect("add");
    part.add_item_vector(s("x"), [2, 3, 4, 6, 7, 8, 9]).expect("add");
    part.add_item_vector(s("y"), [10]).expect("add");
    part.add_item_vector(s("z"), [11, 12, 13, 14, 15, 16, 17]).expect("add");

    target.merge_index(&mut part).expect("merge");
    assert_eq!(target.key_count(), 3);
    assert_eq!(
        target.evaluate(&Query::key(s("x"))).expect("x"),
        (1..=9).collect::<Vec<_>>()
    );
    // Source items follow the target's own, in the source's storage order
    assert_eq!(
        target.items(&s("x")).expect("x"),
        vec![1, 5, 2, 3, 4, 6, 7, 8, 9]
    );
    assert_eq!(target.items(&s("y")).expect("y"), vec![10]);

    let mut z = target
        .get_posting_list(&s("z"))
        .expect("lookup")
        .expect("present");
    assert!(z.is_merged());
    assert_eq!(z.items().expect("z"), (11..=17).collect::<Vec<_>>());

    assert_eq!(
        part.items(&s("x")).expect("x"),
        vec![2, 3, 4, 6, 7, 8, 9]
    );
}

#[test]
fn damaged_overflow_chunk_reports_corruption() {
    let dir = TempDir::new().expect("tempdir");
    let small = |mode| config(mode).with_split_len(3);
    let marked: Vec<u64> = (1..=6).map(|i| 0x5A5A_0000_0000_0000 | i).collect();
    {
        let mut index: InvertedIndex<String, u64> =
            InvertedIndex::open(dir.path(), "damaged", small(AccessMode::Create)).expect("open");
        index.add_item_vector(s("k"), marked.iter().copied()).expect("add");
        index.close().expect("close");
    }

    // Items four and five sit next to each other only in the chunk record
    let segment = dir.path().join("damaged.gixdat.mbb00000");
    let mut bytes = std::fs::read(&segment).expect("read segment");
    let needle: Vec<u8> = marked[3..5]
        .iter()
        .flat_map(|item| item.to_le_bytes())
        .collect();
    let at = bytes
        .windows(needle.len())
        .position(|window| window == needle.as_slice())
        .expect("chunk payload");
    bytes[at + 8] ^= 0xFF;
    std::fs::write(&segment, bytes).expect("write segment");

    let mut index: InvertedIndex<String, u64> =
        InvertedIndex::open(dir.path(), "damaged", small(AccessMode::ReadOnly)).expect("reopen");
    let mut list = index
        .get_posting_list(&s("k"))
        .expect("lookup")
        .expect("present");
    assert_eq!(list.len(), 6);
    assert_eq!(list.get_item(1).expect("inline item"), marked[1]);
    let err = list.get_item(4).expect_err("damaged chunk");
    assert!(err.is_corruption(), "{err}");

    let err = index.items(&s("k")).expect_err("damaged chunk");
    assert!(matches!(
        err,
        IndexError::Blob(BlobError::Corruption { .. })
    ));
}

#[test]
fn cached_list_is_read_from_the_store_once() {
    let dir = TempDir::new().expect("tempdir");
    let small = |mode| config(mode).with_split_len(3);
    {
        let mut index: InvertedIndex<String, u64> =
            InvertedIndex::open(dir.path(), "hits", small(AccessMode::Create)).expect("open");
        index.add_item_vector(s("k"), 0..10).expect("add");
        index.close().expect("close");
    }

    let mut index: InvertedIndex<String, u64> =
        InvertedIndex::open(dir.path(), "hits", small(AccessMode::ReadOnly)).expect("reopen");
    index.reset_blob_stats();
    assert_eq!(
        index.items(&s("k")).expect("items"),
        (0..10).collect::<Vec<_>>()
    );
    // The list record plus three overflow chunks
    let loaded = index.blob_stats().gets;
    assert_eq!(loaded, 4);

    assert_eq!(index.items(&s("k")).expect("items").len(), 10);
    assert_eq!(index.item_count(&s("k")).expect("count"), 10);
    let mut list = index
        .get_posting_list(&s("k"))
        .expect("lookup")
        .expect("present");
    assert_eq!(list.get_item(9).expect("item"), 9);
    assert_eq!(index.blob_stats().gets, loaded);
}

#[test]
fn unclean_index_needs_restore() {
    let dir = TempDir::new().expect("tempdir");
    {
        let mut index: InvertedIndex<String, u64> =
            InvertedIndex::open(dir.path(), "crash", config(AccessMode::Create)).expect("open");
        index.add_item_vector(s("a"), [1, 2, 3]).expect("add");
        index.close().expect("close");
    }
    {
        let mut index: InvertedIndex<String, u64> =
            InvertedIndex::open(dir.path(), "crash", config(AccessMode::Update)).expect("reopen");
        index.add_item_vector(s("b"), [7]).expect("add");
        // Simulate a crash: neither the key table nor the store headers are written
        std::mem::forget(index);
    }

    let result: Result<InvertedIndex<String, u64>, _> =
        InvertedIndex::open(dir.path(), "crash", config(AccessMode::Update));
    assert!(matches!(
        result,
        Err(IndexError::Blob(BlobError::UncleanShutdown(_)))
    ));

    let mut index: InvertedIndex<String, u64> =
        InvertedIndex::open(dir.path(), "crash", config(AccessMode::Restore)).expect("restore");
    assert_eq!(index.items(&s("a")).expect("items"), vec![1, 2, 3]);
    assert!(!index.contains_key(&s("b")));
    index.add_item(s("c"), 4).expect("add after restore");
    index.close().expect("close");
}

#[test]
fn tiny_cache_reports_full_and_stays_correct() {
    let dir = TempDir::new().expect("tempdir");
    let config = config(AccessMode::Create)
        .with_cache_size(4_096)
        .with_flush_threshold_ratio(0.01)
        .with_split_len(8);
    let cache = Box::new(LruRecordCache::<BlobPointer, PostingList<u32, u32>>::new(
        config.cache_size,
    ));
    let mut index: InvertedIndex<u32, u32> =
        InvertedIndex::open_with(dir.path(), "tiny", config, DefaultMerger, cache)
            .expect("open");

    for key in 0..40u32 {
        index
            .add_item_vector(key, (0..30).map(|i| (i * 7 + key) % 50))
            .expect("add");
    }
    assert!(index.is_cache_full());
    assert!(index.stats().cache_memory <= 4_096 * 2);

    for key in 0..40u32 {
        let mut expected: Vec<u32> = (0..30).map(|i| (i * 7 + key) % 50).collect();
        expected.sort_unstable();
        expected.dedup();
        assert_eq!(index.evaluate(&Query::key(key)).expect("eval"), expected);
    }
}

#[test]
fn read_only_index_rejects_every_mutation() {
    let dir = TempDir::new().expect("tempdir");
    {
        let mut index: InvertedIndex<String, u64> =
            InvertedIndex::open(dir.path(), "ro", config(AccessMode::Create)).expect("open");
        index.add_item(s("k"), 1).expect("add");
        index.close().expect("close");
    }

    let mut index: InvertedIndex<String, u64> =
        InvertedIndex::open(dir.path(), "ro", config(AccessMode::ReadOnly)).expect("open");
    assert!(matches!(index.add_item(s("k"), 2), Err(IndexError::ReadOnly)));
    assert!(matches!(
        index.add_item_vector(s("k"), [2]),
        Err(IndexError::ReadOnly)
    ));
    assert!(matches!(index.delete_item(&s("k"), &1), Err(IndexError::ReadOnly)));
    assert!(matches!(index.clear(&s("k")), Err(IndexError::ReadOnly)));
    assert!(matches!(index.delete_key(&s("k")), Err(IndexError::ReadOnly)));
    assert_eq!(index.partial_flush(std::time::Duration::from_secs(1)).expect("flush"), 0);

    let mut list = index
        .get_posting_list(&s("k"))
        .expect("lookup")
        .expect("present");
    assert!(matches!(list.defragment(), Err(IndexError::ReadOnly)));
    assert_eq!(list.items().expect("items"), vec![1]);
}

#[test]
fn missing_read_only_index_fails_to_open() {
    let dir = TempDir::new().expect("tempdir");
    let result: Result<InvertedIndex<String, u64>, _> =
        InvertedIndex::open(dir.path(), "absent", config(AccessMode::ReadOnly));
    assert!(result.is_err());
}
