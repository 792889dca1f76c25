//! # ExHash - Disk-Backed Extendible Hash Index
//!
//! ExHash is an embedded, unordered, multi-value key/value index built on
//! Fagin's extendible hashing. The directory grows and shrinks with the
//! data, one bucket split or merge at a time, so it never exceeds twice the
//! number of distinct bucket pages.
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use exhash::{BufferPool, ExtendibleHashTable, OrdComparator, SipKeyHasher};
//!
//! let pool = Arc::new(BufferPool::create("./users.ehx", 64)?);
//! let index: ExtendibleHashTable<i64, u64, _, _> =
//!     ExtendibleHashTable::create(pool, OrdComparator, SipKeyHasher)?;
//!
//! index.insert(&42, &1001)?;
//! index.insert(&42, &1002)?;
//! assert_eq!(index.get_value(&42)?.len(), 2);
//! index.remove(&42, &1001)?;
//! index.flush()?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │   ExtendibleHashTable (public surface)    │
//! ├──────────────────────────────────────────┤
//! │   DirectoryPage  │  Bucket page views     │
//! ├──────────────────────────────────────────┤
//! │   BufferPool (pins, latches, eviction)    │
//! ├──────────────────────────────────────────┤
//! │   Freelist │ IndexFileHeader │ PageFile   │
//! └──────────────────────────────────────────┘
//! ```
//!
//! One index lives in one file of 4 KiB pages. Page 0 carries the file
//! header; the directory occupies a single page for the life of the index;
//! buckets are created by splits and recycled through the freelist by
//! merges.
//!
//! ## Concurrency
//!
//! A single index instance is shared across threads. Lookups and
//! single-bucket mutations run under the index-wide shared latch plus a
//! per-bucket page latch; structural changes (split, merge) take the
//! index-wide exclusive latch. Latches are short-duration mutexes, distinct
//! from any transactional locking a caller may layer on top.
//!
//! ## Durability
//!
//! Page layouts are stable on disk and the file header records where the
//! directory lives, so `BufferPool::open` plus `ExtendibleHashTable::open`
//! reattach to an existing index. Crash consistency (redo/undo logging) is
//! out of scope; call [`ExtendibleHashTable::flush`] at quiesce points.
//!
//! ## Module Overview
//!
//! - [`config`]: page geometry and depth limits
//! - [`storage`]: page file, file header, freelist, buffer pool
//! - [`index`]: bucket and directory page layouts, the hash table

pub mod config;
pub mod index;
pub mod storage;

pub use config::{DIRECTORY_ARRAY_SIZE, INVALID_PAGE_ID, MAX_DEPTH, PAGE_SIZE};
pub use index::{
    bucket_capacity, BucketMut, BucketRef, DirectoryPage, ExtendibleHashTable, IdentityHasher,
    KeyComparator, KeyHasher, OrdComparator, PageValue, SipKeyHasher,
};
pub use storage::{BufferPool, PageGuard};
