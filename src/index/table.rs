//! # Extendible Hash Table
//!
//! The coordinator over the directory and bucket pages: key hashing,
//! directory lookup, the split/merge state machine, latching, and buffer
//! pin accounting.
//!
//! ## Operation Flow
//!
//! ```text
//! hash(key) ── & global_depth_mask ──▶ directory slot ──▶ bucket page id
//!                                                            │
//!                        pin bucket, take bucket latch ◀─────┘
//! ```
//!
//! `get_value`, the insert fast path, and the remove fast path run under
//! the index-wide *shared* latch plus the target bucket's page latch, so
//! readers and writers to different buckets proceed concurrently. Splits
//! and merges take the index-wide *exclusive* latch, which quiesces every
//! other operation before the directory is edited.
//!
//! ## Bucket Lifecycle
//!
//! ```text
//! empty ── insert ──▶ partial ── insert ──▶ full ── split ──▶ partial (+ sibling)
//!  ▲                    │                                          │
//!  │                    └── remove ◀─────────── remove ────────────┘
//!  └─── merge (empty, image at same local depth, local depth > 1)
//! ```
//!
//! A split raises the bucket's local depth, doubling the directory first
//! when the bucket was already at global depth, installs a fresh sibling
//! page at the split image slot, re-points every directory slot that named
//! the old bucket, and rehashes the bucket's pairs by their low
//! `local_depth` hash bits. A merge is the inverse at one level only:
//! triggered by a removal that empties a bucket, re-checked under the
//! exclusive latch, and followed by directory halving while every live
//! slot sits below the global depth.
//!
//! ## Failure Semantics
//!
//! Inserting an exact duplicate pair and removing an absent pair report
//! `false`. Pool exhaustion propagates as an error before any directory
//! edit is made. A full bucket whose local depth is already `MAX_DEPTH`
//! makes `insert` return `false`; the bucket stays full.
//!
//! ## Pin Accounting
//!
//! Pages are pinned through RAII guards and latches borrow from those
//! guards, so every exit path (including errors) unpins in latch-then-pin
//! order. `BufferPool::pinned_frames` returns to zero between operations.

use std::marker::PhantomData;
use std::sync::Arc;

use eyre::{ensure, Result};
use hashbrown::HashSet;
use parking_lot::RwLock;
use tracing::debug;

use crate::config::{INVALID_PAGE_ID, MAX_DEPTH};
use crate::storage::BufferPool;
use super::bucket::{BucketMut, BucketRef};
use super::directory::DirectoryPage;
use super::hash::{KeyComparator, KeyHasher, OrdComparator, SipKeyHasher};
use super::PageValue;

/// A disk-backed extendible hash index mapping keys to sets of values.
///
/// Exact duplicate `(key, value)` pairs are rejected; distinct values under
/// one key are all retained and returned together.
pub struct ExtendibleHashTable<K, V, C = OrdComparator, H = SipKeyHasher> {
    pool: Arc<BufferPool>,
    table_latch: RwLock<()>,
    directory_page_id: u32,
    comparator: C,
    hasher: H,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V, C, H> ExtendibleHashTable<K, V, C, H>
where
    K: PageValue,
    V: PageValue + PartialEq,
    C: KeyComparator<K>,
    H: KeyHasher<K>,
{
    /// Creates a fresh index in the pool's file: a directory at global
    /// depth 1 pointing at two empty buckets of local depth 1.
    pub fn create(pool: Arc<BufferPool>, comparator: C, hasher: H) -> Result<Self> {
        let dir_guard = pool.new_page()?;
        let directory_page_id = dir_guard.page_id();
        let bucket_0 = pool.new_page()?;
        let bucket_1 = pool.new_page()?;

        {
            let mut dir_data = dir_guard.write();
            let dir = DirectoryPage::from_bytes_mut(&mut dir_data)?;
            dir.set_page_id(directory_page_id);
            dir.incr_global_depth()?;
            dir.set_bucket_page_id(0, bucket_0.page_id());
            dir.set_local_depth(0, 1);
            dir.set_bucket_page_id(1, bucket_1.page_id());
            dir.set_local_depth(1, 1);
        }

        pool.set_directory_page(directory_page_id)?;
        debug!(directory_page_id, "created extendible hash index");

        Ok(Self {
            pool,
            table_latch: RwLock::new(()),
            directory_page_id,
            comparator,
            hasher,
            _marker: PhantomData,
        })
    }

    /// Reattaches to the index recorded in the pool's file header.
    pub fn open(pool: Arc<BufferPool>, comparator: C, hasher: H) -> Result<Self> {
        let directory_page_id = pool.directory_page()?;
        ensure!(
            directory_page_id != INVALID_PAGE_ID,
            "index file has no directory page"
        );

        {
            let dir_guard = pool.fetch_page(directory_page_id)?;
            let dir_data = dir_guard.read();
            let dir = DirectoryPage::from_bytes(&dir_data)?;
            ensure!(
                dir.page_id() == directory_page_id,
                "directory page id mismatch: header says {}, page says {}",
                directory_page_id,
                dir.page_id()
            );
        }

        Ok(Self {
            pool,
            table_latch: RwLock::new(()),
            directory_page_id,
            comparator,
            hasher,
            _marker: PhantomData,
        })
    }

    /// Returns every value stored under `key`, in bucket order.
    pub fn get_value(&self, key: &K) -> Result<Vec<V>> {
        let _table = self.table_latch.read();
        let dir_guard = self.pool.fetch_page(self.directory_page_id)?;

        let bucket_page_id = {
            let dir_data = dir_guard.read();
            let dir = DirectoryPage::from_bytes(&dir_data)?;
            dir.bucket_page_id(self.slot_for(dir, key))
        };

        let bucket_guard = self.pool.fetch_page(bucket_page_id)?;
        let bucket_data = bucket_guard.read();
        let bucket = BucketRef::<K, V>::from_page(&bucket_data)?;

        Ok(bucket.get_value(key, &self.comparator)?.into_vec())
    }

    /// Inserts a pair. Returns `false` on an exact duplicate, or when the
    /// target bucket is full and already at maximum depth.
    pub fn insert(&self, key: &K, value: &V) -> Result<bool> {
        {
            let _table = self.table_latch.read();
            let dir_guard = self.pool.fetch_page(self.directory_page_id)?;

            let bucket_page_id = {
                let dir_data = dir_guard.read();
                let dir = DirectoryPage::from_bytes(&dir_data)?;
                dir.bucket_page_id(self.slot_for(dir, key))
            };

            let bucket_guard = self.pool.fetch_page(bucket_page_id)?;
            let mut bucket_data = bucket_guard.write();
            let mut bucket = BucketMut::<K, V>::from_page(&mut bucket_data)?;

            if !bucket.as_ref().is_full() {
                return bucket.insert(key, value, &self.comparator);
            }
            // A duplicate of a pair already in the full bucket is rejected
            // without splitting.
            if bucket.as_ref().contains(key, value, &self.comparator)? {
                return Ok(false);
            }
        }

        // Full bucket: everything above is released before the split path
        // escalates to the exclusive latch.
        self.split_insert(key, value)
    }

    /// Removes an exact `(key, value)` pair. Returns `false` when absent.
    /// A removal that empties its bucket attempts a merge.
    pub fn remove(&self, key: &K, value: &V) -> Result<bool> {
        let (removed, emptied) = {
            let _table = self.table_latch.read();
            let dir_guard = self.pool.fetch_page(self.directory_page_id)?;

            let bucket_page_id = {
                let dir_data = dir_guard.read();
                let dir = DirectoryPage::from_bytes(&dir_data)?;
                dir.bucket_page_id(self.slot_for(dir, key))
            };

            let bucket_guard = self.pool.fetch_page(bucket_page_id)?;
            let mut bucket_data = bucket_guard.write();
            let mut bucket = BucketMut::<K, V>::from_page(&mut bucket_data)?;

            let removed = bucket.remove(key, value, &self.comparator)?;
            (removed, bucket.as_ref().is_empty())
        };

        if emptied {
            self.merge(key)?;
        }

        Ok(removed)
    }

    /// Current global depth of the directory.
    pub fn global_depth(&self) -> Result<u32> {
        let _table = self.table_latch.read();
        let dir_guard = self.pool.fetch_page(self.directory_page_id)?;
        let dir_data = dir_guard.read();
        Ok(DirectoryPage::from_bytes(&dir_data)?.global_depth())
    }

    /// Checks the directory invariants and, per bucket, that every live
    /// pair hashes home to this bucket and that no exact pair repeats.
    pub fn verify_integrity(&self) -> Result<()> {
        let _table = self.table_latch.read();
        let dir_guard = self.pool.fetch_page(self.directory_page_id)?;
        let dir_data = dir_guard.read();
        let dir = DirectoryPage::from_bytes(&dir_data)?;

        dir.verify_integrity()?;

        let mut checked = HashSet::new();
        for slot in 0..dir.size() {
            let page_id = dir.bucket_page_id(slot);
            if !checked.insert(page_id) {
                continue;
            }

            let bucket_guard = self.pool.fetch_page(page_id)?;
            let bucket_data = bucket_guard.read();
            let bucket = BucketRef::<K, V>::from_page(&bucket_data)?;

            let mut live = Vec::new();
            for i in 0..bucket.capacity() {
                if !bucket.is_occupied(i) {
                    break;
                }
                if !bucket.is_readable(i) {
                    continue;
                }
                let pair_key = bucket.key_at(i)?;
                let home = (self.hash_of(&pair_key) & dir.global_depth_mask()) as usize;
                ensure!(
                    dir.bucket_page_id(home) == page_id,
                    "pair at bucket {} slot {} hashes to directory slot {} \
                     pointing at bucket {}",
                    page_id,
                    i,
                    home,
                    dir.bucket_page_id(home)
                );
                live.push((i, pair_key));
            }

            for a in 0..live.len() {
                for b in a + 1..live.len() {
                    if self.comparator.eq(&live[a].1, &live[b].1) {
                        ensure!(
                            bucket.value_at(live[a].0)? != bucket.value_at(live[b].0)?,
                            "bucket {} holds a duplicate pair at slots {} and {}",
                            page_id,
                            live[a].0,
                            live[b].0
                        );
                    }
                }
            }
        }

        Ok(())
    }

    /// Flushes all cached state to disk.
    pub fn flush(&self) -> Result<()> {
        self.pool.flush_all()
    }

    fn hash_of(&self, key: &K) -> u32 {
        self.hasher.hash(key) as u32
    }

    fn slot_for(&self, dir: &DirectoryPage, key: &K) -> usize {
        (self.hash_of(key) & dir.global_depth_mask()) as usize
    }

    /// Split loop: under the exclusive latch, split the key's bucket until
    /// it has room, then insert.
    fn split_insert(&self, key: &K, value: &V) -> Result<bool> {
        let _table = self.table_latch.write();
        let dir_guard = self.pool.fetch_page(self.directory_page_id)?;

        loop {
            let (slot, bucket_page_id, local) = {
                let dir_data = dir_guard.read();
                let dir = DirectoryPage::from_bytes(&dir_data)?;
                let slot = self.slot_for(dir, key);
                (slot, dir.bucket_page_id(slot), dir.local_depth(slot))
            };

            let bucket_guard = self.pool.fetch_page(bucket_page_id)?;
            let mut bucket_data = bucket_guard.write();
            let mut bucket = BucketMut::<K, V>::from_page(&mut bucket_data)?;

            if !bucket.as_ref().is_full() {
                return bucket.insert(key, value, &self.comparator);
            }
            if bucket.as_ref().contains(key, value, &self.comparator)? {
                return Ok(false);
            }

            if local as u32 == MAX_DEPTH {
                debug!(slot, "bucket saturated at maximum depth");
                return Ok(false);
            }

            // Allocate the sibling before touching the directory, so an
            // out-of-pages failure leaves the index unchanged.
            let split_guard = self.pool.new_page()?;
            let split_page_id = split_guard.page_id();
            let mut split_data = split_guard.write();
            let mut split_bucket = BucketMut::<K, V>::from_page(&mut split_data)?;

            let mut dir_data = dir_guard.write();
            let dir = DirectoryPage::from_bytes_mut(&mut dir_data)?;

            let old_global = dir.global_depth();
            if local as u32 == old_global {
                dir.incr_global_depth()?;
                debug!(global_depth = dir.global_depth(), "doubled directory");
            }

            dir.incr_local_depth(slot);
            let new_local = dir.local_depth(slot);
            let sibling = dir.split_image_index(slot);
            dir.set_bucket_page_id(sibling, split_page_id);
            dir.set_local_depth(sibling, new_local);

            // After doubling, the new upper half mirrors the lower half
            // except at the sibling slot itself.
            if dir.global_depth() > old_global {
                let old_size = 1usize << old_global;
                for i in old_size..dir.size() {
                    if i == sibling {
                        continue;
                    }
                    let src = i & (old_size - 1);
                    dir.set_bucket_page_id(i, dir.bucket_page_id(src));
                    dir.set_local_depth(i, dir.local_depth(src));
                }
            }

            // Every other slot still naming the split bucket rises to the
            // new depth; the sibling half of them re-points at the new page.
            let new_mask = (1u32 << new_local) - 1;
            let sibling_low = sibling as u32 & new_mask;
            for i in 0..dir.size() {
                if i == slot || i == sibling {
                    continue;
                }
                if dir.bucket_page_id(i) == bucket_page_id {
                    dir.set_local_depth(i, new_local);
                    if i as u32 & new_mask == sibling_low {
                        dir.set_bucket_page_id(i, split_page_id);
                    }
                }
            }

            // Move every pair whose hash now selects the sibling.
            for i in 0..bucket.as_ref().capacity() {
                if !bucket.as_ref().is_readable(i) {
                    continue;
                }
                let pair_key = bucket.as_ref().key_at(i)?;
                if self.hash_of(&pair_key) & new_mask == sibling_low {
                    let pair_value = bucket.as_ref().value_at(i)?;
                    ensure!(
                        split_bucket.insert(&pair_key, &pair_value, &self.comparator)?,
                        "sibling bucket rejected a rehashed pair from slot {}",
                        i
                    );
                    bucket.remove_at(i)?;
                }
            }

            debug!(slot, sibling, new_local, "split bucket");
        }
    }

    /// Folds an empty bucket back into its split image, one level at most.
    fn merge(&self, key: &K) -> Result<()> {
        let _table = self.table_latch.write();
        let dir_guard = self.pool.fetch_page(self.directory_page_id)?;

        let (slot, bucket_page_id, sibling, sibling_page_id) = {
            let dir_data = dir_guard.read();
            let dir = DirectoryPage::from_bytes(&dir_data)?;
            let slot = self.slot_for(dir, key);
            let local = dir.local_depth(slot);
            if local <= 1 {
                return Ok(());
            }
            let sibling = dir.split_image_index(slot);
            if dir.local_depth(sibling) != local {
                return Ok(());
            }
            (
                slot,
                dir.bucket_page_id(slot),
                sibling,
                dir.bucket_page_id(sibling),
            )
        };

        // The latch gap between the removal and this call may have admitted
        // a racing insert; merge only if the bucket is still empty.
        {
            let bucket_guard = self.pool.fetch_page(bucket_page_id)?;
            let bucket_data = bucket_guard.read();
            if !BucketRef::<K, V>::from_page(&bucket_data)?.is_empty() {
                return Ok(());
            }
        }

        {
            let mut dir_data = dir_guard.write();
            let dir = DirectoryPage::from_bytes_mut(&mut dir_data)?;

            dir.decr_local_depth(slot);
            dir.decr_local_depth(sibling);
            dir.set_bucket_page_id(slot, sibling_page_id);

            for i in 0..dir.size() {
                if i == slot || i == sibling {
                    continue;
                }
                let page = dir.bucket_page_id(i);
                if page == bucket_page_id || page == sibling_page_id {
                    dir.set_local_depth(i, dir.local_depth(slot));
                    dir.set_bucket_page_id(i, sibling_page_id);
                }
            }

            while dir.can_shrink() {
                dir.decr_global_depth()?;
            }
            debug!(
                slot,
                sibling,
                global_depth = dir.global_depth(),
                "merged bucket"
            );
        }

        self.pool.delete_page(bucket_page_id)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_POOL_PAGES;
    use tempfile::tempdir;

    fn create_table(
        dir: &tempfile::TempDir,
    ) -> ExtendibleHashTable<i32, i32, OrdComparator, SipKeyHasher> {
        let pool = Arc::new(
            BufferPool::create(dir.path().join("test.ehx"), DEFAULT_POOL_PAGES).unwrap(),
        );
        ExtendibleHashTable::create(pool, OrdComparator, SipKeyHasher).unwrap()
    }

    #[test]
    fn fresh_table_has_two_buckets() {
        let dir = tempdir().unwrap();
        let table = create_table(&dir);

        assert_eq!(table.global_depth().unwrap(), 1);
        table.verify_integrity().unwrap();
    }

    #[test]
    fn insert_then_get_roundtrips() {
        let dir = tempdir().unwrap();
        let table = create_table(&dir);

        assert!(table.insert(&1, &11).unwrap());
        assert_eq!(table.get_value(&1).unwrap(), vec![11]);
        assert!(table.get_value(&2).unwrap().is_empty());
    }

    #[test]
    fn remove_missing_pair_returns_false() {
        let dir = tempdir().unwrap();
        let table = create_table(&dir);

        assert!(!table.remove(&1, &11).unwrap());
        table.insert(&1, &11).unwrap();
        assert!(!table.remove(&1, &12).unwrap());
        assert!(table.remove(&1, &11).unwrap());
    }

    #[test]
    fn operations_balance_their_pins() {
        let dir = tempdir().unwrap();
        let table = create_table(&dir);

        for i in 0..100 {
            table.insert(&i, &i).unwrap();
        }
        for i in 0..100 {
            table.get_value(&i).unwrap();
        }
        for i in 0..50 {
            table.remove(&i, &i).unwrap();
        }
        table.verify_integrity().unwrap();

        assert_eq!(table.pool.pinned_frames(), 0);
    }

    #[test]
    fn many_inserts_split_and_stay_consistent() {
        let dir = tempdir().unwrap();
        let table = create_table(&dir);
        let pairs = 3000;

        for i in 0..pairs {
            assert!(table.insert(&i, &(i * 10)).unwrap(), "insert {} failed", i);
        }
        assert!(table.global_depth().unwrap() > 1);
        table.verify_integrity().unwrap();

        for i in 0..pairs {
            assert_eq!(table.get_value(&i).unwrap(), vec![i * 10]);
        }
    }
}
