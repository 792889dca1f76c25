//! # Storage Module
//!
//! The foundational storage layer for ExHash: a single index file exposed
//! as a fixed-size page array, cached by a pinned-frame buffer pool with
//! per-page reader/writer latches.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │  BufferPool (frames, pins, latches)  │  pool.rs
//! ├──────────────────┬───────────────────┤
//! │  IndexFileHeader │  Freelist         │  headers.rs / freelist.rs
//! ├──────────────────┴───────────────────┤
//! │  PageFile (mmap'd page array)        │  file.rs
//! └──────────────────────────────────────┘
//! ```
//!
//! The hash index above this layer consumes only the pool's contract:
//! `new_page`, `fetch_page`, `delete_page`, pin-scoped [`PageGuard`]s and
//! the per-page latch they expose. Page 0 of the file holds the
//! [`IndexFileHeader`]; all other pages are directory, bucket, or freelist
//! trunk pages.
//!
//! ## Module Organization
//!
//! - `file`: memory-mapped page file (`PageFile`)
//! - `headers`: the 128-byte file header on page 0
//! - `freelist`: trunk-page free list for recycled bucket pages
//! - `pool`: buffer pool with pin counts, latches, and SIEVE eviction

mod file;
mod freelist;
mod headers;
mod pool;

pub use file::PageFile;
pub use freelist::{Freelist, TrunkHeader, TRUNK_HEADER_SIZE, TRUNK_MAX_ENTRIES};
pub use headers::{IndexFileHeader, CURRENT_VERSION, INDEX_MAGIC};
pub use pool::{BufferPool, PageGuard, PageReadGuard, PageWriteGuard};
