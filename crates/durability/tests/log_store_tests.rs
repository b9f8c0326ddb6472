//! Integration tests for the log-structured backing store
//!
//! These tests verify that the log store:
//! 1. Replays the latest value per key across reopen
//! 2. Survives torn writes at the tail
//! 3. Keeps compare_and_put linearizable under concurrent writers
//! 4. Compacts without losing live entries

use chronicle_durability::{
    get_int_array, put_int_array, BackingStore, DurabilityMode, Keyspace, LogBackingStore,
    MemoryBackingStore,
};
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

fn open(dir: &TempDir, mode: DurabilityMode) -> LogBackingStore {
    LogBackingStore::open(dir.path().join("chronicle.log"), mode).unwrap()
}

// ============================================================================
// Replay
// ============================================================================

#[test]
fn test_random_workload_matches_memory_model_after_reopen() {
    let dir = TempDir::new().unwrap();
    let model = MemoryBackingStore::new();
    let mut rng = rand::rngs::StdRng::seed_from_u64(7);

    {
        let store = open(&dir, DurabilityMode::standard_default());
        for _ in 0..500 {
            let key = rng.gen_range(-20..20);
            let space = if rng.gen_bool(0.5) {
                Keyspace::Chronology
            } else {
                Keyspace::Taxonomy(rng.gen_range(-3..0))
            };
            let blocks: Vec<Vec<u8>> = (0..rng.gen_range(0..4))
                .map(|_| (0..rng.gen_range(0..16)).map(|_| rng.gen()).collect())
                .collect();
            store.put(space, key, blocks.clone()).unwrap();
            model.put(space, key, blocks).unwrap();
        }
        store.sync().unwrap();
    }

    let store = open(&dir, DurabilityMode::Always);
    for space in [
        Keyspace::Chronology,
        Keyspace::Taxonomy(-3),
        Keyspace::Taxonomy(-2),
        Keyspace::Taxonomy(-1),
    ] {
        let mut expected = BTreeMap::new();
        model
            .scan(space, &mut |k, b| {
                expected.insert(k, b.to_vec());
                true
            })
            .unwrap();
        let mut actual = BTreeMap::new();
        store
            .scan(space, &mut |k, b| {
                actual.insert(k, b.to_vec());
                true
            })
            .unwrap();
        assert_eq!(actual, expected, "keyspace {}", space);
    }
}

#[test]
fn test_int_array_values_survive_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let store = open(&dir, DurabilityMode::Always);
        put_int_array(&store, Keyspace::Assemblage, i32::MIN + 1, &[i32::MIN + 7, 0]).unwrap();
    }
    let store = open(&dir, DurabilityMode::Always);
    assert_eq!(
        get_int_array(&store, Keyspace::Assemblage, i32::MIN + 1).unwrap(),
        Some(vec![i32::MIN + 7, 0])
    );
}

// ============================================================================
// Torn writes
// ============================================================================

#[test]
fn test_every_truncation_point_recovers_a_prefix() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("chronicle.log");
    {
        let store = open(&dir, DurabilityMode::Always);
        for key in 0..5 {
            store.put(Keyspace::Identifier, key, vec![vec![key as u8; 8]]).unwrap();
        }
    }
    let full = std::fs::read(&path).unwrap();

    for cut in (0..full.len()).step_by(7) {
        let case_dir = TempDir::new().unwrap();
        let case_path = case_dir.path().join("chronicle.log");
        std::fs::write(&case_path, &full[..cut]).unwrap();

        let store = LogBackingStore::open(&case_path, DurabilityMode::Always).unwrap();
        let mut keys = Vec::new();
        store
            .scan(Keyspace::Identifier, &mut |k, _| {
                keys.push(k);
                true
            })
            .unwrap();
        let expected: Vec<i32> = (0..keys.len() as i32).collect();
        assert_eq!(keys, expected, "cut at {}", cut);
    }
}

// ============================================================================
// Concurrency
// ============================================================================

#[test]
fn test_concurrent_compare_and_put_counter() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(open(&dir, DurabilityMode::standard_default()));
    let threads = 4;
    let increments = 50;

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for _ in 0..increments {
                    loop {
                        let current = store.get(Keyspace::SemanticIndex, 0).unwrap();
                        let value = current
                            .as_ref()
                            .map(|b| u32::from_be_bytes([b[0][0], b[0][1], b[0][2], b[0][3]]))
                            .unwrap_or(0);
                        let next = vec![(value + 1).to_be_bytes().to_vec()];
                        if store
                            .compare_and_put(Keyspace::SemanticIndex, 0, current.as_deref(), next)
                            .unwrap()
                        {
                            break;
                        }
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let blocks = store.get(Keyspace::SemanticIndex, 0).unwrap().unwrap();
    assert_eq!(
        u32::from_be_bytes([blocks[0][0], blocks[0][1], blocks[0][2], blocks[0][3]]),
        (threads * increments) as u32
    );
}

// ============================================================================
// Compaction
// ============================================================================

#[test]
fn test_compaction_then_reopen_preserves_all_keyspaces() {
    let dir = TempDir::new().unwrap();
    {
        let store = open(&dir, DurabilityMode::Always);
        for round in 0..5u8 {
            store.put(Keyspace::Stamp, 1, vec![vec![round]]).unwrap();
            store.put(Keyspace::PathOrigin, -9, vec![vec![round, round]]).unwrap();
        }
        let info = store.compact().unwrap();
        assert_eq!(info.records_before, 10);
        assert_eq!(info.records_after, 2);
    }
    let store = open(&dir, DurabilityMode::Always);
    assert_eq!(store.get(Keyspace::Stamp, 1).unwrap(), Some(vec![vec![4]]));
    assert_eq!(store.get(Keyspace::PathOrigin, -9).unwrap(), Some(vec![vec![4, 4]]));
}
