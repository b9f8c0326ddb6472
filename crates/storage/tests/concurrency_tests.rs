//! Concurrency tests for the storage layer
//!
//! These tests verify that:
//! - Concurrent interning of one uncommitted tuple yields one handle
//! - Interning racing a commit never loses or duplicates a handle
//! - Concurrent nid assignment for one UUID yields one nid
//! - Spine growth under concurrent writers allocates each segment once
//!
//! The large-scale variant is marked #[ignore].
//! Run with: cargo test --release -- --ignored

use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use chronicle_core::{IntSet, ObjectType, Status, VersionType, FIRST_NID, UNCOMMITTED_TIME};
use chronicle_durability::{FaultyBackingStore, MemoryBackingStore};
use chronicle_storage::{IdentifierRegistry, SpinedIntArrayMap, SpinedMap, StampInterner};
use uuid::Uuid;

const AUTHOR: i32 = FIRST_NID + 1;
const MODULE: i32 = FIRST_NID + 2;
const PATH: i32 = FIRST_NID + 3;

// ============================================================================
// Stamp interner
// ============================================================================

#[test]
fn test_concurrent_uncommitted_interning_yields_one_handle() {
    let threads = 16;
    let interner = Arc::new(StampInterner::new());
    let barrier = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let interner = Arc::clone(&interner);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                interner
                    .stamp_sequence(Status::Active, UNCOMMITTED_TIME, AUTHOR, MODULE, PATH)
                    .unwrap()
            })
        })
        .collect();

    let sequences: HashSet<i32> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(sequences.len(), 1);
    assert_eq!(interner.uncommitted_len(), 1);
    assert_eq!(interner.max_sequence(), 1);
}

#[test]
fn test_interning_during_commit_lands_in_exactly_one_commit() {
    let interner = Arc::new(StampInterner::new());
    let writers = 4;
    let per_writer = 200;
    let barrier = Arc::new(Barrier::new(writers + 1));

    let handles: Vec<_> = (0..writers)
        .map(|w| {
            let interner = Arc::clone(&interner);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let mut mine = Vec::new();
                for i in 0..per_writer {
                    let module = MODULE + (w * per_writer + i) as i32;
                    mine.push(
                        interner
                            .stamp_sequence(Status::Active, UNCOMMITTED_TIME, AUTHOR, module, PATH)
                            .unwrap(),
                    );
                }
                mine
            })
        })
        .collect();

    barrier.wait();
    let mut commits: Vec<IntSet> = Vec::new();
    for round in 0..20 {
        commits.push(interner.commit(1_000 + round).unwrap());
    }
    let interned: Vec<i32> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    commits.push(interner.commit(5_000).unwrap());

    let mut seen = IntSet::new();
    for commit in &commits {
        let mut overlap = seen.clone();
        overlap.and(commit);
        assert!(overlap.is_empty(), "handle committed twice");
        seen.or(commit);
    }
    assert_eq!(seen.len(), writers * per_writer);
    for sequence in interned {
        assert!(seen.contains(sequence));
        assert!(!interner.stamp(sequence).unwrap().is_uncommitted());
    }
    assert_eq!(interner.uncommitted_len(), 0);
}

// ============================================================================
// Identifier registry
// ============================================================================

#[test]
fn test_concurrent_assign_nid_single_binding() {
    let registry = Arc::new(IdentifierRegistry::open(Arc::new(MemoryBackingStore::new())).unwrap());
    let uuid = Uuid::new_v4();
    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let registry = Arc::clone(&registry);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                registry.assign_nid(&[uuid]).unwrap()
            })
        })
        .collect();
    let nids: HashSet<i32> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(nids.len(), 1);
    assert_eq!(registry.nid_count(), 1);
}

#[test]
fn test_concurrent_membership_misses_share_one_read() {
    let inner = Arc::new(MemoryBackingStore::new());
    let nid = FIRST_NID + 7;
    IdentifierRegistry::open(inner.clone())
        .unwrap()
        .setup_nid(nid, FIRST_NID, ObjectType::Concept, VersionType::Concept)
        .unwrap();

    let faulty = Arc::new(FaultyBackingStore::new(inner.clone()));
    let registry = Arc::new(IdentifierRegistry::open(faulty.clone()).unwrap());
    faulty.slow_reads(Duration::from_millis(20));
    let before = inner.read_count();

    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let registry = Arc::clone(&registry);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                registry.assemblage_nid(nid).unwrap()
            })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), Some(FIRST_NID));
    }
    assert_eq!(inner.read_count(), before + 1);
}

#[test]
fn test_concurrent_setup_nid_dense_sequences() {
    let registry = Arc::new(IdentifierRegistry::open(Arc::new(MemoryBackingStore::new())).unwrap());
    let assemblage = FIRST_NID;
    let handles: Vec<_> = (0..4)
        .map(|t| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                (0..50)
                    .map(|i| {
                        registry
                            .setup_nid(
                                FIRST_NID + 1 + t * 50 + i,
                                assemblage,
                                chronicle_core::ObjectType::Concept,
                                chronicle_core::VersionType::Concept,
                            )
                            .unwrap()
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();
    let mut sequences: Vec<i32> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
    sequences.sort_unstable();
    assert_eq!(sequences, (0..200).collect::<Vec<_>>());
}

// ============================================================================
// Spine
// ============================================================================

#[test]
fn test_concurrent_growth_allocates_segments_once() {
    let map: Arc<SpinedIntArrayMap> = Arc::new(SpinedMap::with_segment_size(16));
    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let map = Arc::clone(&map);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for index in (t..4096).step_by(threads) {
                    map.put(index, vec![index as i32]).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(map.len(), 4096);
    assert_eq!(map.segment_count(), 4096 / 16);
    for index in 0..4096 {
        assert_eq!(map.get(index).unwrap()[0], index as i32);
    }
}

#[test]
#[ignore] // Run with: cargo test --release -- --ignored test_one_million_stamps
fn test_one_million_stamps() {
    let interner = StampInterner::new();
    let start = Instant::now();
    for i in 0..1_000_000i64 {
        interner
            .stamp_sequence(Status::Active, i, AUTHOR, MODULE, PATH)
            .unwrap();
    }
    println!("Interned 1,000,000 STAMPs in {:?}", start.elapsed());
    assert_eq!(interner.committed_len(), 1_000_000);
    assert_eq!(interner.max_sequence(), 1_000_000);
}
