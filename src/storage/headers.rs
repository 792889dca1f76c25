//! # File Header Definition
//!
//! The first 128 bytes of page 0 identify an ExHash index file and anchor
//! its persistent structure: the page holding the hash directory and the
//! head of the free-page list. Everything else about the index is reachable
//! from those two page numbers, which is what makes a closed file
//! re-openable.
//!
//! ## Header Layout (128 bytes)
//!
//! ```text
//! Offset  Size  Field            Description
//! ------  ----  ---------------  -------------------------------------
//! 0       16    magic            b"ExHash Index\0\0\0\0"
//! 16      4     version          Format version (currently 1)
//! 20      4     page_size        Must equal PAGE_SIZE
//! 24      4     directory_page   Page id of the hash directory
//! 28      4     freelist_head    First freelist trunk page (0 = none)
//! 32      4     freelist_pages   Total free page numbers on the list
//! 36      92    reserved         Zeroed, for future use
//! ```
//!
//! ## Endianness
//!
//! All multi-byte fields use little-endian encoding via the zerocopy
//! `U32<LittleEndian>` wrapper, so the file format is identical across
//! platforms.

use eyre::{ensure, Result};
use zerocopy::little_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::{FILE_HEADER_SIZE, PAGE_SIZE};

pub const INDEX_MAGIC: &[u8; 16] = b"ExHash Index\x00\x00\x00\x00";

pub const CURRENT_VERSION: u32 = 1;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct IndexFileHeader {
    magic: [u8; 16],
    version: U32,
    page_size: U32,
    directory_page: U32,
    freelist_head: U32,
    freelist_pages: U32,
    reserved: [u8; 92],
}

const _: () = assert!(std::mem::size_of::<IndexFileHeader>() == FILE_HEADER_SIZE);

impl IndexFileHeader {
    pub fn new() -> Self {
        Self {
            magic: *INDEX_MAGIC,
            version: U32::new(CURRENT_VERSION),
            page_size: U32::new(PAGE_SIZE as u32),
            directory_page: U32::new(0),
            freelist_head: U32::new(0),
            freelist_pages: U32::new(0),
            reserved: [0u8; 92],
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        ensure!(
            bytes.len() >= FILE_HEADER_SIZE,
            "buffer too small for IndexFileHeader: {} < {}",
            bytes.len(),
            FILE_HEADER_SIZE
        );

        let header = Self::ref_from_bytes(&bytes[..FILE_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to parse IndexFileHeader: {:?}", e))?;

        ensure!(
            &header.magic == INDEX_MAGIC,
            "invalid magic bytes in index file"
        );

        ensure!(
            header.version.get() == CURRENT_VERSION,
            "unsupported index file version: {} (expected {})",
            header.version.get(),
            CURRENT_VERSION
        );

        ensure!(
            header.page_size.get() == PAGE_SIZE as u32,
            "index file page size {} does not match build-time page size {}",
            header.page_size.get(),
            PAGE_SIZE
        );

        Ok(header)
    }

    pub fn from_bytes_mut(bytes: &mut [u8]) -> Result<&mut Self> {
        ensure!(
            bytes.len() >= FILE_HEADER_SIZE,
            "buffer too small for IndexFileHeader: {} < {}",
            bytes.len(),
            FILE_HEADER_SIZE
        );

        let header = Self::mut_from_bytes(&mut bytes[..FILE_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to parse IndexFileHeader: {:?}", e))?;

        ensure!(
            &header.magic == INDEX_MAGIC,
            "invalid magic bytes in index file"
        );

        Ok(header)
    }

    pub fn version(&self) -> u32 {
        self.version.get()
    }

    pub fn page_size(&self) -> u32 {
        self.page_size.get()
    }

    pub fn directory_page(&self) -> u32 {
        self.directory_page.get()
    }

    pub fn set_directory_page(&mut self, page: u32) {
        self.directory_page = U32::new(page);
    }

    pub fn freelist_head(&self) -> u32 {
        self.freelist_head.get()
    }

    pub fn set_freelist_head(&mut self, page: u32) {
        self.freelist_head = U32::new(page);
    }

    pub fn freelist_pages(&self) -> u32 {
        self.freelist_pages.get()
    }

    pub fn set_freelist_pages(&mut self, count: u32) {
        self.freelist_pages = U32::new(count);
    }
}

impl Default for IndexFileHeader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_size_is_128() {
        assert_eq!(std::mem::size_of::<IndexFileHeader>(), 128);
    }

    #[test]
    fn header_roundtrip() {
        let mut header = IndexFileHeader::new();
        header.set_directory_page(1);
        header.set_freelist_head(7);
        header.set_freelist_pages(3);

        let bytes = header.as_bytes();
        let parsed = IndexFileHeader::from_bytes(bytes).unwrap();

        assert_eq!(parsed.version(), CURRENT_VERSION);
        assert_eq!(parsed.page_size(), PAGE_SIZE as u32);
        assert_eq!(parsed.directory_page(), 1);
        assert_eq!(parsed.freelist_head(), 7);
        assert_eq!(parsed.freelist_pages(), 3);
    }

    #[test]
    fn header_rejects_invalid_magic() {
        let mut bytes = [0u8; 128];
        bytes[..16].copy_from_slice(b"Invalid Magic!!!");

        let result = IndexFileHeader::from_bytes(&bytes);
        assert!(result.is_err());
    }

    #[test]
    fn header_rejects_wrong_version() {
        let mut header = IndexFileHeader::new();
        header.version = U32::new(99);

        let result = IndexFileHeader::from_bytes(header.as_bytes());
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("unsupported index file version"));
    }

    #[test]
    fn header_rejects_mismatched_page_size() {
        let mut header = IndexFileHeader::new();
        header.page_size = U32::new(16384);

        let result = IndexFileHeader::from_bytes(header.as_bytes());
        assert!(result.is_err());
    }

    #[test]
    fn header_mutable_access() {
        let mut bytes = [0u8; 128];
        bytes.copy_from_slice(IndexFileHeader::new().as_bytes());

        let header_mut = IndexFileHeader::from_bytes_mut(&mut bytes).unwrap();
        header_mut.set_directory_page(5);

        let header = IndexFileHeader::from_bytes(&bytes).unwrap();
        assert_eq!(header.directory_page(), 5);
    }
}
