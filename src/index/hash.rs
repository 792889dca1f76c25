//! # Injected Capabilities: Hashing and Key Comparison
//!
//! The hash table does not fix a hash function or a key ordering; both are
//! injected as generic parameters so the same index structure serves typed
//! integer keys, composite byte keys, and deterministic test harnesses.
//!
//! - [`KeyHasher`]: maps a key to a 64-bit hash. The table truncates to 32
//!   bits and masks with the directory's global depth mask, so only the low
//!   bits steer placement.
//! - [`KeyComparator`]: three-way comparison used for key equality inside
//!   buckets. Values are compared with `PartialEq` directly.
//!
//! [`SipKeyHasher`] (SipHash-1-3 over the key's byte representation with
//! fixed keys, so hashes are stable across runs and restarts) and
//! [`OrdComparator`] are the defaults. [`IdentityHasher`] maps a key to its
//! own little-endian value and exists so tests can steer keys into chosen
//! buckets.

use std::cmp::Ordering;
use std::hash::Hasher;

use siphasher::sip::SipHasher13;
use zerocopy::{Immutable, IntoBytes};

/// Three-way key comparison injected into the hash table.
pub trait KeyComparator<K>: Send + Sync {
    fn compare(&self, a: &K, b: &K) -> Ordering;

    fn eq(&self, a: &K, b: &K) -> bool {
        self.compare(a, b) == Ordering::Equal
    }
}

/// Comparator delegating to the key type's `Ord`.
#[derive(Debug, Default, Clone, Copy)]
pub struct OrdComparator;

impl<K: Ord> KeyComparator<K> for OrdComparator {
    fn compare(&self, a: &K, b: &K) -> Ordering {
        a.cmp(b)
    }
}

/// Stateless, deterministic key hashing injected into the hash table.
pub trait KeyHasher<K>: Send + Sync {
    fn hash(&self, key: &K) -> u64;
}

// Fixed SipHash keys: hashes must not vary between runs, or the on-disk
// directory would stop matching the keys stored in its buckets.
const SIP_KEY_0: u64 = 0x4578_4861_7368_2d31;
const SIP_KEY_1: u64 = 0x6469_736b_2d69_6478;

/// SipHash-1-3 over the key's byte representation.
#[derive(Debug, Default, Clone, Copy)]
pub struct SipKeyHasher;

impl<K: IntoBytes + Immutable> KeyHasher<K> for SipKeyHasher {
    fn hash(&self, key: &K) -> u64 {
        let mut hasher = SipHasher13::new_with_keys(SIP_KEY_0, SIP_KEY_1);
        hasher.write(key.as_bytes());
        hasher.finish()
    }
}

/// Hashes a key to its own little-endian integer value.
///
/// Only useful where the caller wants full control over bucket placement,
/// which in practice means tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityHasher;

impl<K: IntoBytes + Immutable> KeyHasher<K> for IdentityHasher {
    fn hash(&self, key: &K) -> u64 {
        let bytes = key.as_bytes();
        let mut buf = [0u8; 8];
        let len = bytes.len().min(8);
        buf[..len].copy_from_slice(&bytes[..len]);
        u64::from_le_bytes(buf)
    }
}
