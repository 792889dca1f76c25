//! # Free Page List
//!
//! Bucket pages freed by directory merges are recycled through an on-disk
//! freelist rather than leaking file space. The list is a chain of trunk
//! pages; each trunk stores a pointer to the next trunk and an array of
//! free page numbers.
//!
//! ## Trunk Page Layout
//!
//! ```text
//! Offset  Size      Description
//! ------  --------  ----------------------------------------
//! 0       4         next_trunk: page number of next trunk (0 = none)
//! 4       4         count: number of page numbers in this trunk
//! 8       4*N       page_numbers: array of free page numbers
//! ```
//!
//! With 4 KiB pages each trunk holds (4096 - 8) / 4 = 1022 page numbers.
//!
//! ## Allocation Strategy
//!
//! Releasing a page:
//! 1. No trunk yet, or the head trunk is full: the freed page itself
//!    becomes the new head trunk.
//! 2. Otherwise the page number is appended to the head trunk.
//!
//! Allocating a page:
//! 1. If the head trunk has entries, pop the last one.
//! 2. If the head trunk is empty, the trunk page itself is the allocation
//!    and the head advances to the next trunk.
//! 3. No trunks at all: return `None`; the caller grows the file.
//!
//! Every page on the list is therefore reusable, trunk pages included, and
//! `free_count` tracks exactly how many allocations the list can satisfy.
//!
//! ## Persistence
//!
//! The head page number and free count live in the file header; the
//! `Freelist` struct is the in-memory mirror and is written back by the
//! buffer pool's flush path.

use eyre::{ensure, Result};
use zerocopy::little_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::PAGE_SIZE;
use super::file::PageFile;

pub const TRUNK_HEADER_SIZE: usize = 8;
pub const TRUNK_MAX_ENTRIES: usize = (PAGE_SIZE - TRUNK_HEADER_SIZE) / 4;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct TrunkHeader {
    next_trunk: U32,
    count: U32,
}

impl TrunkHeader {
    pub fn new() -> Self {
        Self {
            next_trunk: U32::new(0),
            count: U32::new(0),
        }
    }

    pub fn with_next(next_trunk: u32) -> Self {
        Self {
            next_trunk: U32::new(next_trunk),
            count: U32::new(0),
        }
    }

    pub fn from_bytes(data: &[u8]) -> Result<&Self> {
        ensure!(
            data.len() >= TRUNK_HEADER_SIZE,
            "buffer too small for TrunkHeader: {} < {}",
            data.len(),
            TRUNK_HEADER_SIZE
        );

        Self::ref_from_bytes(&data[..TRUNK_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to read TrunkHeader: {:?}", e))
    }

    pub fn from_bytes_mut(data: &mut [u8]) -> Result<&mut Self> {
        ensure!(
            data.len() >= TRUNK_HEADER_SIZE,
            "buffer too small for TrunkHeader: {} < {}",
            data.len(),
            TRUNK_HEADER_SIZE
        );

        Self::mut_from_bytes(&mut data[..TRUNK_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to read TrunkHeader: {:?}", e))
    }

    pub fn next_trunk(&self) -> u32 {
        self.next_trunk.get()
    }

    pub fn set_next_trunk(&mut self, page_no: u32) {
        self.next_trunk = U32::new(page_no);
    }

    pub fn count(&self) -> u32 {
        self.count.get()
    }

    pub fn set_count(&mut self, count: u32) {
        self.count = U32::new(count);
    }

    pub fn is_full(&self) -> bool {
        self.count.get() as usize >= TRUNK_MAX_ENTRIES
    }

    pub fn is_empty(&self) -> bool {
        self.count.get() == 0
    }
}

impl Default for TrunkHeader {
    fn default() -> Self {
        Self::new()
    }
}

/// In-memory mirror of the on-disk free page list.
#[derive(Debug)]
pub struct Freelist {
    head_page: u32,
    free_count: u32,
}

impl Freelist {
    pub fn new() -> Self {
        Self {
            head_page: 0,
            free_count: 0,
        }
    }

    /// Reattaches to a persisted list using the file header's values.
    pub fn with_head(head_page: u32, free_count: u32) -> Self {
        Self {
            head_page,
            free_count,
        }
    }

    pub fn head_page(&self) -> u32 {
        self.head_page
    }

    pub fn free_count(&self) -> u32 {
        self.free_count
    }

    pub fn is_empty(&self) -> bool {
        self.free_count == 0
    }

    /// Pops a reusable page number, or returns `None` when the list is empty.
    pub fn allocate(&mut self, file: &mut PageFile) -> Result<Option<u32>> {
        if self.head_page == 0 {
            return Ok(None);
        }

        let page_data = file.page_mut(self.head_page)?;
        let (count, next_trunk) = {
            let trunk = TrunkHeader::from_bytes(page_data)?;
            (trunk.count(), trunk.next_trunk())
        };

        if count == 0 {
            // A drained trunk page is itself the allocation.
            let page_no = self.head_page;
            self.head_page = next_trunk;
            self.free_count -= 1;
            return Ok(Some(page_no));
        }

        let entry_index = (count - 1) as usize;
        let entry_offset = TRUNK_HEADER_SIZE + entry_index * 4;
        let page_no = u32::from_le_bytes(
            page_data[entry_offset..entry_offset + 4]
                .try_into()
                .unwrap(),
        );

        let trunk = TrunkHeader::from_bytes_mut(page_data)?;
        trunk.set_count(count - 1);
        self.free_count -= 1;

        Ok(Some(page_no))
    }

    /// Returns a page to the list.
    pub fn release(&mut self, file: &mut PageFile, page_no: u32) -> Result<()> {
        ensure!(
            page_no != 0 && page_no < file.page_count(),
            "cannot release page {} (page_count={})",
            page_no,
            file.page_count()
        );

        let head_full = if self.head_page == 0 {
            true
        } else {
            TrunkHeader::from_bytes(file.page(self.head_page)?)?.is_full()
        };

        if head_full {
            // The freed page becomes the new head trunk.
            let trunk = TrunkHeader::with_next(self.head_page);
            let page_data = file.page_mut(page_no)?;
            page_data[..TRUNK_HEADER_SIZE].copy_from_slice(trunk.as_bytes());
            self.head_page = page_no;
        } else {
            let page_data = file.page_mut(self.head_page)?;
            let count = TrunkHeader::from_bytes(page_data)?.count();
            let entry_offset = TRUNK_HEADER_SIZE + count as usize * 4;
            page_data[entry_offset..entry_offset + 4].copy_from_slice(&page_no.to_le_bytes());

            let trunk = TrunkHeader::from_bytes_mut(page_data)?;
            trunk.set_count(count + 1);
        }

        self.free_count += 1;
        Ok(())
    }
}

impl Default for Freelist {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn create_file(pages: u32) -> (tempfile::TempDir, PageFile) {
        let dir = tempdir().unwrap();
        let file = PageFile::create(dir.path().join("test.ehx"), pages).unwrap();
        (dir, file)
    }

    #[test]
    fn trunk_header_size_is_8_bytes() {
        assert_eq!(std::mem::size_of::<TrunkHeader>(), TRUNK_HEADER_SIZE);
    }

    #[test]
    fn trunk_max_entries_calculated_correctly() {
        assert_eq!(TRUNK_MAX_ENTRIES, (PAGE_SIZE - TRUNK_HEADER_SIZE) / 4);
        assert_eq!(TRUNK_MAX_ENTRIES, 1022);
    }

    #[test]
    fn trunk_header_roundtrip() {
        let mut data = [0u8; TRUNK_HEADER_SIZE];
        data[0..4].copy_from_slice(&42u32.to_le_bytes());
        data[4..8].copy_from_slice(&100u32.to_le_bytes());

        let trunk = TrunkHeader::from_bytes(&data).unwrap();

        assert_eq!(trunk.next_trunk(), 42);
        assert_eq!(trunk.count(), 100);
    }

    #[test]
    fn allocate_from_empty_list_returns_none() {
        let (_dir, mut file) = create_file(4);
        let mut freelist = Freelist::new();

        assert_eq!(freelist.allocate(&mut file).unwrap(), None);
    }

    #[test]
    fn released_page_becomes_trunk_and_is_reusable() {
        let (_dir, mut file) = create_file(4);
        let mut freelist = Freelist::new();

        freelist.release(&mut file, 3).unwrap();

        assert_eq!(freelist.head_page(), 3);
        assert_eq!(freelist.free_count(), 1);
        assert_eq!(freelist.allocate(&mut file).unwrap(), Some(3));
        assert!(freelist.is_empty());
    }

    #[test]
    fn release_then_allocate_is_lifo_for_entries() {
        let (_dir, mut file) = create_file(8);
        let mut freelist = Freelist::new();

        freelist.release(&mut file, 2).unwrap();
        freelist.release(&mut file, 5).unwrap();
        freelist.release(&mut file, 6).unwrap();

        assert_eq!(freelist.free_count(), 3);
        // Entries pop before the trunk page itself.
        assert_eq!(freelist.allocate(&mut file).unwrap(), Some(6));
        assert_eq!(freelist.allocate(&mut file).unwrap(), Some(5));
        assert_eq!(freelist.allocate(&mut file).unwrap(), Some(2));
        assert_eq!(freelist.allocate(&mut file).unwrap(), None);
    }

    #[test]
    fn release_rejects_header_page() {
        let (_dir, mut file) = create_file(4);
        let mut freelist = Freelist::new();

        assert!(freelist.release(&mut file, 0).is_err());
    }

    #[test]
    fn with_head_reattaches_persisted_list() {
        let (_dir, mut file) = create_file(8);

        let (head, count) = {
            let mut freelist = Freelist::new();
            freelist.release(&mut file, 2).unwrap();
            freelist.release(&mut file, 5).unwrap();
            (freelist.head_page(), freelist.free_count())
        };

        let mut freelist = Freelist::with_head(head, count);
        assert_eq!(freelist.allocate(&mut file).unwrap(), Some(5));
        assert_eq!(freelist.allocate(&mut file).unwrap(), Some(2));
        assert_eq!(freelist.allocate(&mut file).unwrap(), None);
    }
}
