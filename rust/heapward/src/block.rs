//! Block handles.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::owner::{Owner, OwnerId};

static NEXT_BLOCK_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of an allocation. Ids are never reused, even after
/// the block is freed and its address is handed out again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(u64);

impl BlockId {
    pub(crate) fn next() -> BlockId {
        BlockId(NEXT_BLOCK_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "block#{}", self.0)
    }
}

/// Handle to one allocated block of raw memory.
///
/// The handle is a plain value: copying it does not copy the memory, and
/// holding it does not keep the memory alive. Only the allocator that created
/// it can free it, and only on behalf of the recorded owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoryBlock {
    id: BlockId,
    address: usize,
    size: usize,
    owner: OwnerId,
}

impl MemoryBlock {
    pub(crate) fn new(id: BlockId, address: usize, size: usize, owner: OwnerId) -> MemoryBlock {
        MemoryBlock {
            id,
            address,
            size,
            owner,
        }
    }

    #[inline]
    pub fn id(&self) -> BlockId {
        self.id
    }

    /// Base address of the block's memory, as an opaque integer.
    #[inline]
    pub fn address(&self) -> usize {
        self.address
    }

    /// Size in bytes, as requested at allocation time.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn owner(&self) -> OwnerId {
        self.owner
    }

    pub fn is_owned_by(&self, owner: &Owner) -> bool {
        self.owner == owner.id()
    }
}
