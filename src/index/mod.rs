//! # Index Module
//!
//! The extendible hash index proper: the two page layouts and the table
//! that coordinates them over the buffer pool.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │  ExtendibleHashTable (latching, split/merge) │  table.rs
//! ├──────────────────────┬──────────────────────┤
//! │  DirectoryPage       │  BucketRef/BucketMut │  directory.rs / bucket.rs
//! ├──────────────────────┴──────────────────────┤
//! │  KeyHasher / KeyComparator (injected)        │  hash.rs
//! └─────────────────────────────────────────────┘
//! ```
//!
//! Keys and values are fixed-size plain-data types ([`PageValue`]); they
//! move between page bytes and typed values through `zerocopy`, so bucket
//! contents are exactly the packed on-disk layout with no serialization
//! step in between.

mod bucket;
mod directory;
mod hash;
mod table;

pub use bucket::{bucket_capacity, BucketMut, BucketRef};
pub use directory::DirectoryPage;
pub use hash::{IdentityHasher, KeyComparator, KeyHasher, OrdComparator, SipKeyHasher};
pub use table::ExtendibleHashTable;

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Fixed-size plain-data type storable inside a bucket page.
///
/// Blanket-implemented for every type with the required `zerocopy`
/// properties (all primitive integers qualify).
pub trait PageValue: FromBytes + IntoBytes + Immutable + KnownLayout + Copy {}

impl<T: FromBytes + IntoBytes + Immutable + KnownLayout + Copy> PageValue for T {}
