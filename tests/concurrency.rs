//! # Concurrency Tests
//!
//! Parallel threads share one index instance. Lookups and single-bucket
//! mutations run under the index-wide shared latch; splits and merges
//! quiesce the index behind the exclusive latch. With disjoint key ranges
//! per thread, the final state must equal some serialization of the
//! per-thread operation streams, and every pin taken by an operation must
//! have been returned by the time the threads join.

use std::sync::{Arc, Barrier};
use std::thread;

use exhash::{BufferPool, ExtendibleHashTable, OrdComparator, SipKeyHasher};

type SharedTable = Arc<ExtendibleHashTable<i64, i64, OrdComparator, SipKeyHasher>>;

fn shared_table(dir: &tempfile::TempDir) -> (Arc<BufferPool>, SharedTable) {
    let pool = Arc::new(BufferPool::create(dir.path().join("index.ehx"), 64).unwrap());
    let table =
        ExtendibleHashTable::create(Arc::clone(&pool), OrdComparator, SipKeyHasher).unwrap();
    (pool, Arc::new(table))
}

const THREADS: i64 = 8;
const KEYS_PER_THREAD: i64 = 600;

fn thread_key(thread: i64, i: i64) -> i64 {
    thread * 1_000_000 + i
}

#[test]
fn disjoint_key_threads_serialize_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let (pool, table) = shared_table(&dir);
    let barrier = Arc::new(Barrier::new(THREADS as usize));

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let table = Arc::clone(&table);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();

                for i in 0..KEYS_PER_THREAD {
                    let key = thread_key(t, i);
                    assert!(table.insert(&key, &key).unwrap(), "insert {} failed", key);
                }
                for i in 0..KEYS_PER_THREAD {
                    let key = thread_key(t, i);
                    assert_eq!(table.get_value(&key).unwrap(), vec![key]);
                }
                // Remove the even half, leaving the odd half in place.
                for i in (0..KEYS_PER_THREAD).step_by(2) {
                    let key = thread_key(t, i);
                    assert!(table.remove(&key, &key).unwrap(), "remove {} failed", key);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    table.verify_integrity().unwrap();
    assert_eq!(pool.pinned_frames(), 0, "an operation leaked a page pin");

    for t in 0..THREADS {
        for i in 0..KEYS_PER_THREAD {
            let key = thread_key(t, i);
            let values = table.get_value(&key).unwrap();
            if i % 2 == 0 {
                assert!(values.is_empty(), "key {} should be removed", key);
            } else {
                assert_eq!(values, vec![key], "key {} lost its value", key);
            }
        }
    }
}

#[test]
fn concurrent_writers_agree_on_duplicates() {
    let dir = tempfile::tempdir().unwrap();
    let (_pool, table) = shared_table(&dir);
    let barrier = Arc::new(Barrier::new(4));

    // Four threads race to insert the same pairs; for each pair exactly one
    // insert may win.
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let table = Arc::clone(&table);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let mut wins = 0u32;
                for i in 0..200i64 {
                    if table.insert(&i, &(i * 2)).unwrap() {
                        wins += 1;
                    }
                }
                wins
            })
        })
        .collect();

    let total_wins: u32 = handles.into_iter().map(|h| h.join().unwrap()).sum();

    assert_eq!(total_wins, 200);
    table.verify_integrity().unwrap();
    for i in 0..200i64 {
        assert_eq!(table.get_value(&i).unwrap(), vec![i * 2]);
    }
}

#[test]
fn readers_run_against_writers() {
    let dir = tempfile::tempdir().unwrap();
    let (pool, table) = shared_table(&dir);

    for i in 0..1000i64 {
        table.insert(&i, &i).unwrap();
    }

    let writer = {
        let table = Arc::clone(&table);
        thread::spawn(move || {
            for i in 1000..2000i64 {
                table.insert(&i, &i).unwrap();
            }
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let table = Arc::clone(&table);
            thread::spawn(move || {
                // Keys below 1000 are stable while the writer appends others;
                // a reader must always observe them.
                for i in 0..1000i64 {
                    assert_eq!(table.get_value(&i).unwrap(), vec![i]);
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }

    table.verify_integrity().unwrap();
    assert_eq!(pool.pinned_frames(), 0);
}
