//! # Hash Directory Page
//!
//! The directory occupies one page and maps the low `global_depth` bits of
//! a key's hash to a bucket page id. It is the only structural metadata the
//! index has; everything else is bucket contents.
//!
//! ## Page Layout (little-endian, packed)
//!
//! ```text
//! Offset  Size  Field             Description
//! ------  ----  ----------------  ---------------------------------
//! 0       4     lsn               Opaque log sequence number
//! 4       4     page_id           This page's own id (debug/logging)
//! 8       4     global_depth      Live low-bit count, 0..=MAX_DEPTH
//! 12      512   local_depths      Per-slot local depth
//! 524     2048  bucket_page_ids   Per-slot bucket page id
//! ```
//!
//! Only the first `2^global_depth` slots are live. Retired slots are
//! zeroed, and a zero page id is the invalid sentinel, so a freshly zeroed
//! page is a valid empty directory of depth zero.
//!
//! ## Depth Invariants
//!
//! Between public index operations the directory satisfies:
//!
//! - every live slot's local depth is at most `global_depth` and its page
//!   id is valid;
//! - slots pointing at the same bucket share one local depth and agree on
//!   their low `local_depth` index bits;
//! - a bucket of local depth `d` is referenced by exactly
//!   `2^(global_depth - d)` slots.
//!
//! [`DirectoryPage::verify_integrity`] checks all of this and is wired
//! into the index's own `verify_integrity`.
//!
//! ## Split Image
//!
//! `split_image_index(i) = i XOR (1 << (local_depth(i) - 1))`: the slot
//! that differs from `i` only in the highest live local-depth bit. A split
//! installs the new bucket there; a merge requires the image to sit at the
//! same local depth before folding the two slots back together.

use eyre::{ensure, Result};
use hashbrown::HashMap;
use zerocopy::little_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::{DIRECTORY_ARRAY_SIZE, INVALID_PAGE_ID, MAX_DEPTH, PAGE_SIZE};

#[repr(C)]
#[derive(FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct DirectoryPage {
    lsn: U32,
    page_id: U32,
    global_depth: U32,
    local_depths: [u8; DIRECTORY_ARRAY_SIZE],
    bucket_page_ids: [U32; DIRECTORY_ARRAY_SIZE],
}

const _: () = assert!(std::mem::size_of::<DirectoryPage>() <= PAGE_SIZE);

impl DirectoryPage {
    pub fn from_bytes(data: &[u8]) -> Result<&Self> {
        ensure!(
            data.len() >= size_of::<Self>(),
            "buffer too small for DirectoryPage: {} < {}",
            data.len(),
            size_of::<Self>()
        );

        Self::ref_from_bytes(&data[..size_of::<Self>()])
            .map_err(|e| eyre::eyre!("failed to read DirectoryPage: {:?}", e))
    }

    pub fn from_bytes_mut(data: &mut [u8]) -> Result<&mut Self> {
        ensure!(
            data.len() >= size_of::<Self>(),
            "buffer too small for DirectoryPage: {} < {}",
            data.len(),
            size_of::<Self>()
        );

        Self::mut_from_bytes(&mut data[..size_of::<Self>()])
            .map_err(|e| eyre::eyre!("failed to read DirectoryPage: {:?}", e))
    }

    pub fn lsn(&self) -> u32 {
        self.lsn.get()
    }

    pub fn set_lsn(&mut self, lsn: u32) {
        self.lsn = U32::new(lsn);
    }

    pub fn page_id(&self) -> u32 {
        self.page_id.get()
    }

    pub fn set_page_id(&mut self, page_id: u32) {
        self.page_id = U32::new(page_id);
    }

    pub fn global_depth(&self) -> u32 {
        self.global_depth.get()
    }

    pub fn global_depth_mask(&self) -> u32 {
        (1 << self.global_depth.get()) - 1
    }

    pub fn local_depth_mask(&self, slot: usize) -> u32 {
        (1 << self.local_depths[slot]) - 1
    }

    /// Number of live directory slots: `2^global_depth`.
    pub fn size(&self) -> usize {
        1 << self.global_depth.get()
    }

    pub fn bucket_page_id(&self, slot: usize) -> u32 {
        self.bucket_page_ids[slot].get()
    }

    pub fn set_bucket_page_id(&mut self, slot: usize, page_id: u32) {
        self.bucket_page_ids[slot] = U32::new(page_id);
    }

    pub fn local_depth(&self, slot: usize) -> u8 {
        self.local_depths[slot]
    }

    pub fn set_local_depth(&mut self, slot: usize, depth: u8) {
        debug_assert!(depth as u32 <= MAX_DEPTH);
        self.local_depths[slot] = depth;
    }

    pub fn incr_local_depth(&mut self, slot: usize) {
        debug_assert!((self.local_depths[slot] as u32) < MAX_DEPTH);
        self.local_depths[slot] += 1;
    }

    pub fn decr_local_depth(&mut self, slot: usize) {
        debug_assert!(self.local_depths[slot] > 0);
        self.local_depths[slot] -= 1;
    }

    /// The slot sharing all but the highest live local-depth bit with `slot`.
    pub fn split_image_index(&self, slot: usize) -> usize {
        let depth = self.local_depths[slot];
        debug_assert!(depth > 0, "slot {} has local depth 0", slot);
        slot ^ (1 << (depth - 1))
    }

    /// Doubles the directory: the new upper half mirrors the lower half.
    pub fn incr_global_depth(&mut self) -> Result<()> {
        let depth = self.global_depth.get();
        ensure!(
            depth < MAX_DEPTH,
            "directory is already at maximum depth {}",
            MAX_DEPTH
        );

        let old_size = 1usize << depth;
        for i in old_size..2 * old_size {
            self.bucket_page_ids[i] = self.bucket_page_ids[i - old_size];
            self.local_depths[i] = self.local_depths[i - old_size];
        }
        self.global_depth = U32::new(depth + 1);

        Ok(())
    }

    /// Halves the directory, zeroing the retired slots.
    pub fn decr_global_depth(&mut self) -> Result<()> {
        let depth = self.global_depth.get();
        ensure!(depth > 0, "directory is already at depth 0");

        let new_size = 1usize << (depth - 1);
        let old_size = 1usize << depth;
        for i in new_size..old_size {
            self.bucket_page_ids[i] = U32::new(INVALID_PAGE_ID);
            self.local_depths[i] = 0;
        }
        self.global_depth = U32::new(depth - 1);

        Ok(())
    }

    /// True when every live slot sits strictly below the global depth, i.e.
    /// the upper and lower halves of the directory are mirror images.
    pub fn can_shrink(&self) -> bool {
        let depth = self.global_depth.get();
        (0..self.size()).all(|i| (self.local_depths[i] as u32) < depth)
    }

    /// Checks the directory invariants; errors describe the first violation.
    pub fn verify_integrity(&self) -> Result<()> {
        let depth = self.global_depth.get();
        // page id -> (local depth, slot count)
        let mut buckets: HashMap<u32, (u8, u32)> = HashMap::new();

        for slot in 0..self.size() {
            let local = self.local_depths[slot];
            let page_id = self.bucket_page_ids[slot].get();

            ensure!(
                local as u32 <= depth,
                "slot {} local depth {} exceeds global depth {}",
                slot,
                local,
                depth
            );
            ensure!(
                page_id != INVALID_PAGE_ID,
                "slot {} has no bucket page",
                slot
            );

            // The canonical slot sharing this slot's low local-depth bits
            // must agree on both depth and page id.
            let canonical = slot & self.local_depth_mask(slot) as usize;
            ensure!(
                self.local_depths[canonical] == local
                    && self.bucket_page_ids[canonical].get() == page_id,
                "slots {} and {} disagree about bucket {} (depths {} vs {})",
                slot,
                canonical,
                page_id,
                local,
                self.local_depths[canonical]
            );

            let entry = buckets.entry(page_id).or_insert((local, 0));
            ensure!(
                entry.0 == local,
                "bucket {} is referenced at local depths {} and {}",
                page_id,
                entry.0,
                local
            );
            entry.1 += 1;
        }

        for (page_id, (local, count)) in buckets {
            let expected = 1u32 << (depth - local as u32);
            ensure!(
                count == expected,
                "bucket {} at local depth {} has {} directory slots (expected {})",
                page_id,
                local,
                count,
                expected
            );
        }

        Ok(())
    }
}

impl std::fmt::Debug for DirectoryPage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryPage")
            .field("page_id", &self.page_id.get())
            .field("lsn", &self.lsn.get())
            .field("global_depth", &self.global_depth.get())
            .field("size", &self.size())
            .finish()
    }
}
