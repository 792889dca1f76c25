//! # Memory-Mapped Page File
//!
//! This module implements `PageFile`, the lowest layer of the storage stack:
//! a fixed-size page array backed by a single disk file, accessed through a
//! memory mapping.
//!
//! ## Design
//!
//! The file is mapped read-write into the process address space. The buffer
//! pool above copies pages into its own frames (`read_page`/`write_page`),
//! because frames must stay valid while the mapping is replaced by `grow`.
//! Zero-copy slice access (`page`/`page_mut`) exists for the page-0 file
//! header, where the borrow checker guarantees no slice outlives a remap:
//!
//! ```text
//! page(&self) -> &[u8]              // immutable borrow of self
//! page_mut(&mut self) -> &mut [u8]  // exclusive borrow of self
//! grow(&mut self)                   // exclusive borrow (no live slices)
//! ```
//!
//! ## File Format
//!
//! Database files are concatenated 4 KiB pages:
//!
//! ```text
//! Offset 0:       Page 0 (file header + reserved space)
//! Offset 4096:    Page 1
//! Offset 8192:    Page 2
//! ...
//! ```
//!
//! The file length is always a multiple of `PAGE_SIZE`.
//!
//! ## Durability
//!
//! `sync()` issues `msync` (or the platform equivalent) and returns only
//! after the mapped contents have reached durable storage.

use std::fs::{File, OpenOptions};
use std::path::Path;

use eyre::{ensure, Result, WrapErr};
use memmap2::MmapMut;

use crate::config::PAGE_SIZE;

/// A disk file exposed as a fixed-size array of pages.
#[derive(Debug)]
pub struct PageFile {
    file: File,
    mmap: MmapMut,
    page_count: u32,
}

impl PageFile {
    /// Creates a new zero-filled file with the given number of pages.
    pub fn create<P: AsRef<Path>>(path: P, initial_pages: u32) -> Result<Self> {
        let path = path.as_ref();
        ensure!(initial_pages > 0, "cannot create an empty page file");

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
            .wrap_err_with(|| format!("failed to create index file '{}'", path.display()))?;

        file.set_len(initial_pages as u64 * PAGE_SIZE as u64)
            .wrap_err_with(|| format!("failed to size index file '{}'", path.display()))?;

        // SAFETY: the mapping is private to this struct; all access goes
        // through &self/&mut self methods, and grow() takes &mut self so no
        // slice can outlive a remap.
        let mmap = unsafe { MmapMut::map_mut(&file) }
            .wrap_err_with(|| format!("failed to map index file '{}'", path.display()))?;

        Ok(Self {
            file,
            mmap,
            page_count: initial_pages,
        })
    }

    /// Opens an existing file created by [`PageFile::create`].
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .wrap_err_with(|| format!("failed to open index file '{}'", path.display()))?;

        let len = file
            .metadata()
            .wrap_err_with(|| format!("failed to stat index file '{}'", path.display()))?
            .len();

        ensure!(
            len > 0 && len % PAGE_SIZE as u64 == 0,
            "index file '{}' has invalid length {} (not a multiple of {})",
            path.display(),
            len,
            PAGE_SIZE
        );

        // SAFETY: same invariants as in create().
        let mmap = unsafe { MmapMut::map_mut(&file) }
            .wrap_err_with(|| format!("failed to map index file '{}'", path.display()))?;

        Ok(Self {
            file,
            mmap,
            page_count: (len / PAGE_SIZE as u64) as u32,
        })
    }

    /// Returns the number of pages currently in the file.
    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    /// Returns a read-only slice of the page's bytes.
    pub fn page(&self, page_no: u32) -> Result<&[u8]> {
        self.bounds_check(page_no)?;
        let start = page_no as usize * PAGE_SIZE;
        Ok(&self.mmap[start..start + PAGE_SIZE])
    }

    /// Returns a mutable slice of the page's bytes.
    pub fn page_mut(&mut self, page_no: u32) -> Result<&mut [u8]> {
        self.bounds_check(page_no)?;
        let start = page_no as usize * PAGE_SIZE;
        Ok(&mut self.mmap[start..start + PAGE_SIZE])
    }

    /// Copies a page out of the file into the caller's buffer.
    pub fn read_page(&self, page_no: u32, buf: &mut [u8; PAGE_SIZE]) -> Result<()> {
        buf.copy_from_slice(self.page(page_no)?);
        Ok(())
    }

    /// Copies the caller's buffer into a page of the file.
    pub fn write_page(&mut self, page_no: u32, data: &[u8; PAGE_SIZE]) -> Result<()> {
        self.page_mut(page_no)?.copy_from_slice(data);
        Ok(())
    }

    /// Extends the file to hold `new_page_count` pages and remaps it.
    ///
    /// A no-op when the file already holds at least that many pages. New
    /// pages are zero-filled.
    pub fn grow(&mut self, new_page_count: u32) -> Result<()> {
        if new_page_count <= self.page_count {
            return Ok(());
        }

        self.mmap
            .flush()
            .wrap_err("failed to flush mapping before grow")?;

        self.file
            .set_len(new_page_count as u64 * PAGE_SIZE as u64)
            .wrap_err("failed to extend index file")?;

        // SAFETY: the old mapping is dropped by assignment; &mut self
        // guarantees no outstanding page slices.
        self.mmap =
            unsafe { MmapMut::map_mut(&self.file) }.wrap_err("failed to remap index file")?;
        self.page_count = new_page_count;

        Ok(())
    }

    /// Flushes the mapping to durable storage.
    pub fn sync(&self) -> Result<()> {
        self.mmap.flush().wrap_err("failed to sync index file")
    }

    fn bounds_check(&self, page_no: u32) -> Result<()> {
        ensure!(
            page_no < self.page_count,
            "page {} out of bounds (page_count={})",
            page_no,
            self.page_count
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn create_file(pages: u32) -> (tempfile::TempDir, PageFile) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.ehx");
        let file = PageFile::create(&path, pages).unwrap();
        (dir, file)
    }

    #[test]
    fn create_zero_fills_pages() {
        let (_dir, file) = create_file(3);

        assert_eq!(file.page_count(), 3);
        assert!(file.page(2).unwrap().iter().all(|&b| b == 0));
    }

    #[test]
    fn create_rejects_zero_pages() {
        let dir = tempdir().unwrap();
        let result = PageFile::create(dir.path().join("t.ehx"), 0);

        assert!(result.is_err());
    }

    #[test]
    fn page_out_of_bounds_is_error() {
        let (_dir, file) = create_file(2);

        let result = file.page(2);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("out of bounds"));
    }

    #[test]
    fn write_then_read_page_roundtrips() {
        let (_dir, mut file) = create_file(2);

        let mut page = [0u8; PAGE_SIZE];
        page[0] = 0xAB;
        page[PAGE_SIZE - 1] = 0xCD;
        file.write_page(1, &page).unwrap();

        let mut out = [0u8; PAGE_SIZE];
        file.read_page(1, &mut out).unwrap();
        assert_eq!(out[0], 0xAB);
        assert_eq!(out[PAGE_SIZE - 1], 0xCD);
    }

    #[test]
    fn grow_extends_and_zero_fills() {
        let (_dir, mut file) = create_file(1);
        file.page_mut(0).unwrap()[0] = 7;

        file.grow(4).unwrap();

        assert_eq!(file.page_count(), 4);
        assert_eq!(file.page(0).unwrap()[0], 7);
        assert!(file.page(3).unwrap().iter().all(|&b| b == 0));
    }

    #[test]
    fn grow_to_smaller_count_is_noop() {
        let (_dir, mut file) = create_file(4);

        file.grow(2).unwrap();

        assert_eq!(file.page_count(), 4);
    }

    #[test]
    fn open_sees_persisted_data() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.ehx");

        {
            let mut file = PageFile::create(&path, 2).unwrap();
            file.page_mut(1).unwrap()[42] = 42;
            file.sync().unwrap();
        }

        let file = PageFile::open(&path).unwrap();
        assert_eq!(file.page_count(), 2);
        assert_eq!(file.page(1).unwrap()[42], 42);
    }

    #[test]
    fn open_rejects_truncated_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.ehx");
        std::fs::write(&path, vec![0u8; PAGE_SIZE + 100]).unwrap();

        let result = PageFile::open(&path);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("invalid length"));
    }
}
