//! # ExHash Configuration Constants
//!
//! This module centralizes all configuration constants, grouping
//! interdependent values together and documenting their relationships.
//!
//! ## Dependency Graph
//!
//! ```text
//! PAGE_SIZE (4096 bytes)
//!       │
//!       ├─> FILE_HEADER_SIZE (128 bytes, page 0 only)
//!       │     Page 0 is reserved for the file header and is never handed
//!       │     out as a data page; page id 0 doubles as INVALID_PAGE_ID.
//!       │
//!       └─> directory page payload (12 + 512 + 4*512 = 2572 bytes)
//!             Must fit in one page; see the assertion below.
//!
//! MAX_DEPTH (9)
//!       │
//!       └─> DIRECTORY_ARRAY_SIZE (derived: 1 << MAX_DEPTH = 512)
//!             The directory never addresses more than 2^MAX_DEPTH slots,
//!             so the slot arrays are sized for exactly that many entries.
//!
//! DEFAULT_POOL_PAGES (64)
//!       │
//!       └─> Any operation pins at most four pages at once (directory,
//!           bucket, split sibling, freelist trunk), so even a tiny pool
//!           cannot deadlock on pins.
//! ```
//!
//! ## Critical Invariants
//!
//! Enforced by compile-time assertions at the bottom of this file:
//!
//! 1. `DIRECTORY_ARRAY_SIZE == 1 << MAX_DEPTH`
//! 2. The directory page payload fits in `PAGE_SIZE`
//! 3. `FILE_HEADER_SIZE <= PAGE_SIZE`

/// Size of every page in the index file, in bytes.
pub const PAGE_SIZE: usize = 4096;

/// Size of the file header at the start of page 0.
pub const FILE_HEADER_SIZE: usize = 128;

/// Page id that never refers to a real data page.
///
/// Page 0 always holds the file header, so a zeroed directory slot reads
/// back as "no page" without a signed sentinel.
pub const INVALID_PAGE_ID: u32 = 0;

/// Maximum global (and therefore local) depth of the directory.
pub const MAX_DEPTH: u32 = 9;

/// Number of slots in the directory arrays: `2^MAX_DEPTH`.
pub const DIRECTORY_ARRAY_SIZE: usize = 1 << MAX_DEPTH;

/// Default number of frames in the buffer pool.
pub const DEFAULT_POOL_PAGES: usize = 64;

// Directory payload: lsn(4) + page_id(4) + global_depth(4)
// + local_depths(DIRECTORY_ARRAY_SIZE) + bucket_page_ids(4*DIRECTORY_ARRAY_SIZE).
const DIRECTORY_PAYLOAD: usize = 12 + DIRECTORY_ARRAY_SIZE + 4 * DIRECTORY_ARRAY_SIZE;

const _: () = assert!(DIRECTORY_ARRAY_SIZE == 1 << MAX_DEPTH);
const _: () = assert!(DIRECTORY_PAYLOAD <= PAGE_SIZE);
const _: () = assert!(FILE_HEADER_SIZE <= PAGE_SIZE);
