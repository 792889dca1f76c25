//! # Hash Bucket Page
//!
//! A bucket occupies one page and stores up to `capacity` fixed-size
//! key/value pairs in three parallel regions:
//!
//! ```text
//! +----------------------+----------------------+---------------------+
//! | occupied bits (⌈B/8⌉)| readable bits (⌈B/8⌉)| pairs [(K,V); B]    |
//! +----------------------+----------------------+---------------------+
//! ```
//!
//! with `B = (4 * PAGE_SIZE) / (4 * (size_of::<K>() + size_of::<V>()) + 1)`,
//! the largest B such that two bitmaps plus the pair array fit in one page.
//!
//! ## Occupied vs Readable
//!
//! - `occupied`: the slot has held a pair at some point since the page was
//!   zeroed. Never cleared by removal.
//! - `readable`: the slot currently holds a live pair.
//!
//! A removed pair leaves `occupied = 1, readable = 0` (a tombstone), so
//! scans can still stop at the first never-occupied slot: insertion always
//! reuses the earliest non-readable slot, which keeps the occupied bits a
//! prefix of the array.
//!
//! ## Zero-Copy Access
//!
//! [`BucketRef`]/[`BucketMut`] borrow the page bytes from a latched buffer
//! frame; keys and values are transmuted in and out with `zerocopy`, so a
//! zeroed page is a valid empty bucket and no separate initialization step
//! exists.
//!
//! ## Thread Safety
//!
//! Not synchronized; callers operate on a page they have already latched
//! through the buffer pool.

use std::marker::PhantomData;

use eyre::{ensure, Result};
use smallvec::SmallVec;

use crate::config::PAGE_SIZE;
use super::hash::KeyComparator;
use super::PageValue;

/// Number of pairs a bucket page holds for the given key/value types.
pub fn bucket_capacity<K: PageValue, V: PageValue>() -> usize {
    (4 * PAGE_SIZE) / (4 * (size_of::<K>() + size_of::<V>()) + 1)
}

struct BucketLayout {
    capacity: usize,
    bitmap_bytes: usize,
    key_size: usize,
    entry_size: usize,
    entries_offset: usize,
}

fn layout<K: PageValue, V: PageValue>() -> BucketLayout {
    let key_size = size_of::<K>();
    let entry_size = key_size + size_of::<V>();
    let capacity = bucket_capacity::<K, V>();
    let bitmap_bytes = capacity.div_ceil(8);

    BucketLayout {
        capacity,
        bitmap_bytes,
        key_size,
        entry_size,
        entries_offset: 2 * bitmap_bytes,
    }
}

/// Read-only view of a bucket page.
pub struct BucketRef<'a, K, V> {
    data: &'a [u8],
    layout: BucketLayout,
    _marker: PhantomData<(K, V)>,
}

impl<'a, K: PageValue, V: PageValue> BucketRef<'a, K, V> {
    pub fn from_page(data: &'a [u8]) -> Result<Self> {
        let layout = layout::<K, V>();
        ensure!(
            data.len() == PAGE_SIZE,
            "invalid page size: {} != {}",
            data.len(),
            PAGE_SIZE
        );
        ensure!(
            layout.entries_offset + layout.capacity * layout.entry_size <= PAGE_SIZE,
            "bucket layout for {}-byte entries does not fit a page",
            layout.entry_size
        );

        Ok(Self {
            data,
            layout,
            _marker: PhantomData,
        })
    }

    pub fn capacity(&self) -> usize {
        self.layout.capacity
    }

    pub fn is_occupied(&self, slot: usize) -> bool {
        debug_assert!(slot < self.layout.capacity);
        self.data[slot / 8] & (1 << (slot % 8)) != 0
    }

    pub fn is_readable(&self, slot: usize) -> bool {
        debug_assert!(slot < self.layout.capacity);
        self.data[self.layout.bitmap_bytes + slot / 8] & (1 << (slot % 8)) != 0
    }

    pub fn key_at(&self, slot: usize) -> Result<K> {
        self.slot_check(slot)?;
        let offset = self.layout.entries_offset + slot * self.layout.entry_size;
        K::read_from_bytes(&self.data[offset..offset + self.layout.key_size])
            .map_err(|e| eyre::eyre!("failed to read key at slot {}: {:?}", slot, e))
    }

    pub fn value_at(&self, slot: usize) -> Result<V> {
        self.slot_check(slot)?;
        let offset =
            self.layout.entries_offset + slot * self.layout.entry_size + self.layout.key_size;
        V::read_from_bytes(&self.data[offset..offset + size_of::<V>()])
            .map_err(|e| eyre::eyre!("failed to read value at slot {}: {:?}", slot, e))
    }

    /// Collects every live value stored under a comparator-equal key.
    pub fn get_value<C: KeyComparator<K>>(&self, key: &K, cmp: &C) -> Result<SmallVec<[V; 4]>> {
        let mut values = SmallVec::new();

        for slot in 0..self.layout.capacity {
            if !self.is_occupied(slot) {
                break;
            }
            if self.is_readable(slot) && cmp.eq(&self.key_at(slot)?, key) {
                values.push(self.value_at(slot)?);
            }
        }

        Ok(values)
    }

    /// True when an identical `(key, value)` pair is live in this bucket.
    pub fn contains<C: KeyComparator<K>>(&self, key: &K, value: &V, cmp: &C) -> Result<bool>
    where
        V: PartialEq,
    {
        for slot in 0..self.layout.capacity {
            if !self.is_occupied(slot) {
                break;
            }
            if self.is_readable(slot)
                && cmp.eq(&self.key_at(slot)?, key)
                && self.value_at(slot)? == *value
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn num_readable(&self) -> usize {
        let mut count = 0;
        for slot in 0..self.layout.capacity {
            if !self.is_occupied(slot) {
                break;
            }
            if self.is_readable(slot) {
                count += 1;
            }
        }
        count
    }

    pub fn is_full(&self) -> bool {
        self.num_readable() == self.layout.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.num_readable() == 0
    }

    fn slot_check(&self, slot: usize) -> Result<()> {
        ensure!(
            slot < self.layout.capacity,
            "bucket slot {} out of bounds (capacity={})",
            slot,
            self.layout.capacity
        );
        Ok(())
    }
}

/// Mutable view of a bucket page.
pub struct BucketMut<'a, K, V> {
    data: &'a mut [u8],
    _marker: PhantomData<(K, V)>,
}

impl<'a, K, V> BucketMut<'a, K, V>
where
    K: PageValue,
    V: PageValue + PartialEq,
{
    pub fn from_page(data: &'a mut [u8]) -> Result<Self> {
        // Validate through the read view, then keep the mutable borrow.
        BucketRef::<K, V>::from_page(data)?;
        Ok(Self {
            data,
            _marker: PhantomData,
        })
    }

    /// Read view over the same page.
    pub fn as_ref(&self) -> BucketRef<'_, K, V> {
        BucketRef {
            data: self.data,
            layout: layout::<K, V>(),
            _marker: PhantomData,
        }
    }

    /// Inserts a pair unless an identical `(key, value)` pair is already
    /// live. Returns `false` on an exact duplicate or a full bucket.
    pub fn insert<C: KeyComparator<K>>(&mut self, key: &K, value: &V, cmp: &C) -> Result<bool> {
        let this = self.as_ref();
        let mut free_slot = None;

        for slot in 0..this.capacity() {
            if !this.is_occupied(slot) {
                if free_slot.is_none() {
                    free_slot = Some(slot);
                }
                break;
            }
            if this.is_readable(slot) {
                if cmp.eq(&this.key_at(slot)?, key) && this.value_at(slot)? == *value {
                    return Ok(false);
                }
            } else if free_slot.is_none() {
                free_slot = Some(slot);
            }
        }

        let Some(slot) = free_slot else {
            return Ok(false);
        };

        let lay = layout::<K, V>();
        let offset = lay.entries_offset + slot * lay.entry_size;
        self.data[offset..offset + lay.key_size].copy_from_slice(key.as_bytes());
        self.data[offset + lay.key_size..offset + lay.entry_size]
            .copy_from_slice(value.as_bytes());
        self.set_occupied(slot);
        self.set_readable(slot, true);

        Ok(true)
    }

    /// Removes the first live pair equal to `(key, value)`, leaving a
    /// tombstone. Returns `false` when no such pair exists.
    pub fn remove<C: KeyComparator<K>>(&mut self, key: &K, value: &V, cmp: &C) -> Result<bool> {
        let mut found = None;
        {
            let this = self.as_ref();
            for slot in 0..this.capacity() {
                if !this.is_occupied(slot) {
                    break;
                }
                if this.is_readable(slot)
                    && cmp.eq(&this.key_at(slot)?, key)
                    && this.value_at(slot)? == *value
                {
                    found = Some(slot);
                    break;
                }
            }
        }

        match found {
            Some(slot) => {
                self.set_readable(slot, false);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Clears the readable bit of a slot; used while rehashing a split.
    pub fn remove_at(&mut self, slot: usize) -> Result<()> {
        self.as_ref().slot_check(slot)?;
        self.set_readable(slot, false);
        Ok(())
    }

    fn set_occupied(&mut self, slot: usize) {
        self.data[slot / 8] |= 1 << (slot % 8);
    }

    fn set_readable(&mut self, slot: usize, readable: bool) {
        let lay = layout::<K, V>();
        let byte = lay.bitmap_bytes + slot / 8;
        if readable {
            self.data[byte] |= 1 << (slot % 8);
        } else {
            self.data[byte] &= !(1 << (slot % 8));
        }
    }
}
