//! Read cache keyed by (address, size).
//!
//! Entries are point-in-time snapshots installed by successful reads. A
//! write through the server invalidates every entry whose byte range
//! overlaps the written range; nothing else mutates an entry in place.
//! There is no eviction: entries live for the lifetime of the process.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use tracing::trace;

/// Identity of a previously read memory block.
///
/// Two keys are equal iff both fields match exactly; ordering is (address,
/// then size).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReadKey {
    pub address: u64,
    pub size: u64,
}

impl ReadKey {
    pub fn new(address: u64, size: u64) -> Self {
        Self { address, size }
    }

    /// One past the last byte of the keyed range, saturating at the
    /// address-space ceiling.
    fn end(&self) -> u64 {
        self.address.saturating_add(self.size)
    }
}

/// The most recently read bytes for a key. `data.len()` always equals the
/// owning key's `size`; blocks are replaced whole, never partially updated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedBlock {
    pub data: Vec<u8>,
}

/// Thread-safe map from [`ReadKey`] to [`CachedBlock`]. Concurrent readers
/// proceed in parallel; writers exclude everyone for the map mutation only.
#[derive(Default)]
pub struct ReadCache {
    map: RwLock<BTreeMap<ReadKey, CachedBlock>>,
}

impl ReadCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the block cached under an exact (address, size) key.
    pub fn get(&self, key: ReadKey) -> Option<CachedBlock> {
        self.map.read().get(&key).cloned()
    }

    /// Install a block, unconditionally overwriting any entry for the key.
    pub fn put(&self, key: ReadKey, block: CachedBlock) {
        debug_assert_eq!(block.data.len() as u64, key.size);
        self.map.write().insert(key, block);
    }

    /// Drop every entry whose range overlaps `[address, address + len)`.
    /// Returns the number of entries removed.
    pub fn invalidate_overlapping(&self, address: u64, len: u64) -> usize {
        if len == 0 {
            return 0;
        }
        let end = address.saturating_add(len);
        let mut map = self.map.write();
        // Only keys starting below `end` can overlap.
        let stale: Vec<ReadKey> = map
            .range(..ReadKey::new(end, 0))
            .filter(|(key, _)| key.end() > address)
            .map(|(key, _)| *key)
            .collect();
        for key in &stale {
            map.remove(key);
        }
        if !stale.is_empty() {
            trace!(
                target: "wsmem::cache",
                address = format_args!("{:#x}", address),
                len,
                removed = stale.len(),
                "Invalidated overlapping cache entries"
            );
        }
        stale.len()
    }

    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }

    /// Drop everything. Intended for operators of long-lived deployments.
    pub fn clear(&self) {
        self.map.write().clear();
    }
}
