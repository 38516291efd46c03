//! Tests for compaction
//!
//! These tests verify:
//! - Freshest-value selection across closed segments
//! - Merge leaves exactly one closed segment file and the active one untouched
//! - Segment numbering restarts after the merge point
//! - Merged state survives restart
//! - The background merge policy

use std::fs;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use segkv::compaction::{self, MergeStats};
use segkv::config::{Config, MergePolicy, SyncStrategy};
use segkv::directory::{ClosedSegment, SegmentDirectory};
use segkv::engine::Engine;
use segkv::segment::Segment;
use segkv::SegKvError;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

/// Records of `k1`/`k2` with a one-byte value are 11 bytes each
const THRESHOLD: u64 = 22;

/// A 12-byte value makes a `k2` record exactly `THRESHOLD` bytes long
const LONG_C: &[u8] = b"cccccccccccc";

fn open_engine(dir: &Path, max_segment_bytes: u64) -> Engine {
    let config = Config::builder()
        .data_dir(dir)
        .max_segment_bytes(max_segment_bytes)
        .sync_strategy(SyncStrategy::EveryWrite)
        .build();
    Engine::open(config).unwrap()
}

/// Builds S0 = {k1: a, k2: b}, S1 = {k2: cccc...}, active = {k4: d}
fn setup_two_closed_segments(dir: &Path) -> Engine {
    let engine = open_engine(dir, THRESHOLD);

    engine.put(b"k1", b"a").unwrap();
    engine.put(b"k2", b"b").unwrap();
    engine.put(b"k2", LONG_C).unwrap();
    engine.put(b"k4", b"d").unwrap();

    assert_eq!(engine.closed_segment_count(), 2);
    engine
}

fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

fn sealed(dir: &SegmentDirectory, id: u64, entries: &[(&[u8], &[u8])]) -> ClosedSegment {
    let path = dir.closed_path(id);
    let segment = Segment::create(&path, SyncStrategy::EveryWrite).unwrap();
    for (key, value) in entries {
        segment.append(key, value).unwrap();
    }
    segment.seal().unwrap();
    ClosedSegment {
        id,
        segment: std::sync::Arc::new(segment),
    }
}

// =============================================================================
// Freshest Selection Tests
// =============================================================================

#[test]
fn test_collect_freshest_prefers_newer_segment() {
    let temp = TempDir::new().unwrap();
    let dir = SegmentDirectory::open(temp.path()).unwrap();

    let inputs = vec![
        sealed(&dir, 0, &[(b"k1", b"a"), (b"k2", b"b")]),
        sealed(&dir, 1, &[(b"k2", b"c")]),
    ];

    let freshest = compaction::collect_freshest(&inputs);

    assert_eq!(freshest.len(), 2);
    assert_eq!(freshest[&b"k1".to_vec()].0, 0);
    assert_eq!(freshest[&b"k2".to_vec()], (1, 0));
}

#[test]
fn test_write_merged_in_key_order() {
    let temp = TempDir::new().unwrap();
    let dir = SegmentDirectory::open(temp.path()).unwrap();

    let inputs = vec![
        sealed(&dir, 0, &[(b"zeta", b"1"), (b"alpha", b"1")]),
        sealed(&dir, 1, &[(b"mid", b"2"), (b"zeta", b"2")]),
    ];

    let (merged, stats) = compaction::write_merged(&inputs, &dir.merge_path()).unwrap();

    assert!(merged.is_sealed());
    assert_eq!(stats.input_segments, 2);
    assert_eq!(stats.keys_written, 3);
    assert_eq!(stats.bytes_after, merged.size());

    let scanned: Vec<(Vec<u8>, Vec<u8>)> = merged
        .iter()
        .unwrap()
        .map(|item| {
            let (_, record) = item.unwrap();
            (record.key, record.value)
        })
        .collect();
    assert_eq!(
        scanned,
        vec![
            (b"alpha".to_vec(), b"1".to_vec()),
            (b"mid".to_vec(), b"2".to_vec()),
            (b"zeta".to_vec(), b"2".to_vec()),
        ]
    );
}

// =============================================================================
// Engine Merge Tests
// =============================================================================

#[test]
fn test_merge_keeps_freshest_values() {
    let temp = TempDir::new().unwrap();
    let engine = setup_two_closed_segments(temp.path());

    assert_eq!(
        file_names(temp.path()),
        vec!["segment.0", "segment.1", "segment.active"]
    );

    let stats = engine.merge().unwrap();

    assert_eq!(
        stats,
        MergeStats {
            input_segments: 2,
            keys_written: 2,
            bytes_before: 2 * THRESHOLD,
            bytes_after: 11 + THRESHOLD,
        }
    );
    assert_eq!(file_names(temp.path()), vec!["segment.0", "segment.active"]);
    assert_eq!(engine.closed_segment_count(), 1);

    // The merged file on its own holds exactly {k1: a, k2: cccc...}
    let (merged, _) = Segment::open_sealed(&temp.path().join("segment.0")).unwrap();
    assert_eq!(merged.key_count(), 2);
    assert_eq!(merged.get(b"k1").unwrap(), Some(b"a".to_vec()));
    assert_eq!(merged.get(b"k2").unwrap(), Some(LONG_C.to_vec()));

    // Engine reads and the active segment are unaffected
    assert_eq!(engine.get(b"k1").unwrap(), Some(b"a".to_vec()));
    assert_eq!(engine.get(b"k2").unwrap(), Some(LONG_C.to_vec()));
    assert_eq!(engine.get(b"k4").unwrap(), Some(b"d".to_vec()));
    assert_eq!(engine.active_segment_size(), 11);
}

#[test]
fn test_merge_without_closed_segments_is_noop() {
    let temp = TempDir::new().unwrap();
    let engine = open_engine(temp.path(), 1024);
    engine.put(b"key", b"value").unwrap();

    let stats = engine.merge().unwrap();

    assert_eq!(stats, MergeStats::default());
    assert_eq!(file_names(temp.path()), vec!["segment.active"]);
    assert_eq!(engine.get(b"key").unwrap(), Some(b"value".to_vec()));
}

#[test]
fn test_merge_single_segment_drops_overwritten_records() {
    let temp = TempDir::new().unwrap();
    let engine = open_engine(temp.path(), 50);

    engine.put(b"key", b"v1").unwrap();
    engine.put(b"key", b"v2").unwrap();
    engine.put(b"key", b"v3").unwrap();
    engine.put(b"key", b"v4").unwrap();
    assert_eq!(engine.closed_segment_count(), 1);

    let stats = engine.merge().unwrap();

    assert_eq!(stats.keys_written, 1);
    assert!(stats.bytes_after < stats.bytes_before);
    assert_eq!(engine.get(b"key").unwrap(), Some(b"v4".to_vec()));
}

#[test]
fn test_merge_removed_key_lookup_is_not_found() {
    let temp = TempDir::new().unwrap();
    let engine = setup_two_closed_segments(temp.path());

    engine.merge().unwrap();

    assert_eq!(engine.get(b"never-written").unwrap(), None);
}

#[test]
fn test_numbering_restarts_after_merge() {
    let temp = TempDir::new().unwrap();
    let engine = setup_two_closed_segments(temp.path());
    engine.merge().unwrap();

    // Fill the active segment past the threshold again
    engine.put(b"k5", LONG_C).unwrap();

    assert_eq!(
        file_names(temp.path()),
        vec!["segment.0", "segment.1", "segment.active"]
    );
    assert_eq!(engine.get(b"k4").unwrap(), Some(b"d".to_vec()));
    assert_eq!(engine.get(b"k5").unwrap(), Some(LONG_C.to_vec()));
}

#[test]
fn test_newer_write_after_merge_wins() {
    let temp = TempDir::new().unwrap();
    let engine = setup_two_closed_segments(temp.path());
    engine.merge().unwrap();

    engine.put(b"k1", b"z").unwrap();

    assert_eq!(engine.get(b"k1").unwrap(), Some(b"z".to_vec()));
}

#[test]
fn test_repeated_merge() {
    let temp = TempDir::new().unwrap();
    let engine = open_engine(temp.path(), 30);

    for round in 0..5 {
        for i in 0..8 {
            let key = format!("key{}", i);
            let value = format!("r{}-{}", round, i);
            engine.put(key.as_bytes(), value.as_bytes()).unwrap();
        }
        engine.merge().unwrap();
        assert_eq!(engine.closed_segment_count(), 1);
    }

    for i in 0..8 {
        let key = format!("key{}", i);
        let value = format!("r4-{}", i);
        assert_eq!(engine.get(key.as_bytes()).unwrap(), Some(value.into_bytes()));
    }
}

#[test]
fn test_merge_survives_restart() {
    let temp = TempDir::new().unwrap();

    {
        let engine = setup_two_closed_segments(temp.path());
        engine.merge().unwrap();
        engine.close().unwrap();
    }

    let engine = open_engine(temp.path(), THRESHOLD);

    assert_eq!(engine.closed_segment_count(), 1);
    assert_eq!(engine.get(b"k1").unwrap(), Some(b"a".to_vec()));
    assert_eq!(engine.get(b"k2").unwrap(), Some(LONG_C.to_vec()));
    assert_eq!(engine.get(b"k4").unwrap(), Some(b"d".to_vec()));
}

#[test]
fn test_leftover_merge_output_ignored_on_open() {
    let temp = TempDir::new().unwrap();

    {
        let engine = setup_two_closed_segments(temp.path());
        engine.close().unwrap();
    }
    fs::write(temp.path().join("segment.merge"), b"partial").unwrap();

    let engine = open_engine(temp.path(), THRESHOLD);

    assert!(!temp.path().join("segment.merge").exists());
    assert_eq!(engine.closed_segment_count(), 2);
    assert_eq!(engine.get(b"k2").unwrap(), Some(LONG_C.to_vec()));
}

#[test]
fn test_failed_merge_keeps_inputs_and_removes_output() {
    let temp = TempDir::new().unwrap();
    // "k1" + "a" is 11 bytes, so each put rotates
    let engine = open_engine(temp.path(), 11);
    engine.put(b"k1", b"a").unwrap();
    engine.put(b"k2", b"b").unwrap();
    assert_eq!(engine.closed_segment_count(), 2);

    // segment.1 loses its bytes after being indexed, so copying k2 fails
    fs::OpenOptions::new()
        .write(true)
        .open(temp.path().join("segment.1"))
        .unwrap()
        .set_len(0)
        .unwrap();

    let result = engine.merge();

    assert!(matches!(result, Err(SegKvError::Merge(_))));
    assert!(!temp.path().join("segment.merge").exists());
    assert_eq!(engine.closed_segment_count(), 2);
    assert_eq!(
        file_names(temp.path()),
        vec!["segment.0", "segment.1", "segment.active"]
    );
    assert_eq!(engine.get(b"k1").unwrap(), Some(b"a".to_vec()));
}

#[test]
fn test_merge_output_not_creatable() {
    let temp = TempDir::new().unwrap();
    let engine = open_engine(temp.path(), 11);
    engine.put(b"k1", b"a").unwrap();
    engine.put(b"k2", b"b").unwrap();

    fs::create_dir(temp.path().join("segment.merge")).unwrap();

    let result = engine.merge();

    assert!(matches!(result, Err(SegKvError::Merge(_))));
    assert_eq!(engine.closed_segment_count(), 2);
    assert_eq!(engine.get(b"k1").unwrap(), Some(b"a".to_vec()));
    assert_eq!(engine.get(b"k2").unwrap(), Some(b"b".to_vec()));
    assert!(temp.path().join("segment.0").exists());
    assert!(temp.path().join("segment.1").exists());
}

// =============================================================================
// Background Merge Tests
// =============================================================================

#[test]
fn test_background_merge_policy() {
    let temp = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp.path())
        .max_segment_bytes(40)
        .sync_strategy(SyncStrategy::EveryWrite)
        .merge_policy(MergePolicy::Background {
            min_closed_segments: 2,
        })
        .build();
    let engine = Engine::open(config).unwrap();

    for round in 0..4 {
        for i in 0..10 {
            let key = format!("key{}", i);
            let value = format!("round{}-{}", round, i);
            engine.put(key.as_bytes(), value.as_bytes()).unwrap();
        }
    }

    let deadline = Instant::now() + Duration::from_secs(10);
    while engine.closed_segment_count() > 1 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }

    assert_eq!(engine.closed_segment_count(), 1);
    for i in 0..10 {
        let key = format!("key{}", i);
        let value = format!("round3-{}", i);
        assert_eq!(engine.get(key.as_bytes()).unwrap(), Some(value.into_bytes()));
    }

    engine.close().unwrap();
}

#[test]
fn test_manual_policy_never_merges_on_its_own() {
    let temp = TempDir::new().unwrap();
    // "keyN" + "value" is 17 bytes, so every put rotates
    let engine = open_engine(temp.path(), 17);

    for i in 0..10 {
        let key = format!("key{}", i);
        engine.put(key.as_bytes(), b"value").unwrap();
    }
    thread::sleep(Duration::from_millis(50));

    assert_eq!(engine.closed_segment_count(), 10);
}
