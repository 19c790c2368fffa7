//! The block allocator.
//!
//! [`Allocator`] hands out raw memory regions as [`MemoryBlock`] handles and
//! takes them back only from the owner that allocated them. It knows nothing
//! about borrows; see [`BorrowLedger`](crate::BorrowLedger) for that.
//!
//! Live regions are kept in a registry keyed by [`BlockId`]. The registry is
//! what makes `free` safe to call with a stale or foreign handle: such calls
//! fail with `UnknownBlock` instead of releasing memory twice. Any blocks still
//! live when the allocator is dropped are released then.

use std::sync::{Mutex, MutexGuard, PoisonError};

use heapward_budget_tracker::{Budget, Charge};
use heapward_common::{Error, Result};
use heapward_page_alloc::Region;

use crate::block::{BlockId, MemoryBlock};
use crate::options::AllocatorOptions;
use crate::owner::{Owner, OwnerId};

pub struct Allocator {
    options: AllocatorOptions,
    budget: Budget,
    registry: Mutex<Registry>,
}

#[derive(Default)]
struct Registry {
    blocks: ahash::HashMap<BlockId, LiveBlock>,
    requested_bytes: u64,
    reserved_bytes: u64,
}

struct LiveBlock {
    region: Region,
    owner: OwnerId,
    _charge: Charge,
}

/// A point-in-time summary of an allocator's live blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AllocatorStats {
    pub live_blocks: usize,
    /// Sum of the sizes callers asked for.
    pub requested_bytes: u64,
    /// Sum of the capacities actually reserved from the provider.
    pub reserved_bytes: u64,
    /// What is left of the memory limit, or `u64::MAX` - used when unlimited.
    pub budget_remaining: u64,
}

impl Allocator {
    /// Creates an allocator with default options: page-backed, no memory limit.
    pub fn new() -> Allocator {
        Self::build(AllocatorOptions::default())
    }

    pub fn with_options(options: AllocatorOptions) -> Result<Allocator> {
        options.validate()?;
        Ok(Self::build(options))
    }

    fn build(options: AllocatorOptions) -> Allocator {
        let budget = options
            .memory_limit
            .map(Budget::new)
            .unwrap_or_else(Budget::unlimited);
        Allocator {
            options,
            budget,
            registry: Mutex::new(Registry::default()),
        }
    }

    pub fn options(&self) -> &AllocatorOptions {
        &self.options
    }

    /// The budget charged for every live block.
    pub fn budget(&self) -> &Budget {
        &self.budget
    }

    /// Allocates `size` zeroed bytes on behalf of `owner`.
    ///
    /// A zero `size` is accepted and yields a block of size zero that still has
    /// a distinct address.
    ///
    /// # Errors
    ///
    /// `OutOfMemory` if the provider cannot map the memory or the reserved
    /// capacity would exceed the configured memory limit. Nothing is left
    /// allocated in that case.
    pub fn allocate(&self, size: usize, owner: &Owner) -> Result<MemoryBlock> {
        let region = Region::allocate(self.options.provider, size, self.options.alignment)
            .map_err(|e| Error::out_of_memory(size, e.to_string()))?;
        let charge = self
            .budget
            .charge(region.capacity() as u64)
            .map_err(|e| Error::out_of_memory(size, e.to_string()))?;

        let block = MemoryBlock::new(BlockId::next(), region.address(), size, owner.id());
        log::debug!(
            "allocated {} for {}: {} bytes at {:#x} (capacity {}, {:?})",
            block.id(),
            block.owner(),
            size,
            block.address(),
            region.capacity(),
            region.origin(),
        );

        let mut registry = self.registry();
        registry.requested_bytes += size as u64;
        registry.reserved_bytes += region.capacity() as u64;
        registry.blocks.insert(
            block.id(),
            LiveBlock {
                region,
                owner: owner.id(),
                _charge: charge,
            },
        );
        Ok(block)
    }

    /// Releases `block`, provided `requester` is the owner that allocated it.
    ///
    /// # Errors
    ///
    /// - `OwnershipViolation` if `requester` is any other owner. The block
    ///   stays allocated and can still be freed by its owner.
    /// - `UnknownBlock` if the block is not live in this allocator, e.g. it was
    ///   already freed.
    pub fn free(&self, block: &MemoryBlock, requester: &Owner) -> Result<()> {
        let live = {
            let mut registry = self.registry();
            let Some(live) = registry.blocks.get(&block.id()) else {
                log::warn!("{} attempted to free unknown {}", requester.id(), block.id());
                return Err(Error::unknown_block(block.id().as_u64()));
            };
            if live.owner != requester.id() {
                log::warn!(
                    "{} attempted to free {} owned by {}",
                    requester.id(),
                    block.id(),
                    live.owner,
                );
                return Err(Error::ownership_violation(
                    block.id().as_u64(),
                    live.owner.as_u64(),
                    requester.id().as_u64(),
                ));
            }
            let live = registry
                .blocks
                .remove(&block.id())
                .ok_or_else(|| Error::unknown_block(block.id().as_u64()))?;
            registry.requested_bytes -= live.region.len() as u64;
            registry.reserved_bytes -= live.region.capacity() as u64;
            live
        };

        log::debug!(
            "freed {} ({} bytes at {:#x})",
            block.id(),
            live.region.len(),
            live.region.address(),
        );
        // Unmapping happens outside the registry lock.
        drop(live);
        Ok(())
    }

    /// Whether `block` is currently allocated by this allocator.
    pub fn is_live(&self, block: &MemoryBlock) -> bool {
        self.registry().blocks.contains_key(&block.id())
    }

    pub fn stats(&self) -> AllocatorStats {
        let registry = self.registry();
        AllocatorStats {
            live_blocks: registry.blocks.len(),
            requested_bytes: registry.requested_bytes,
            reserved_bytes: registry.reserved_bytes,
            budget_remaining: self.budget.remaining(),
        }
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        // Registry updates cannot be observed half-done, so a poisoned lock
        // still guards consistent data.
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Allocator {
    fn default() -> Self {
        Allocator::new()
    }
}

impl Drop for Allocator {
    fn drop(&mut self) {
        let registry = self
            .registry
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if !registry.blocks.is_empty() {
            log::warn!(
                "allocator dropped with {} live blocks ({} bytes); releasing them",
                registry.blocks.len(),
                registry.requested_bytes,
            );
        }
    }
}

impl std::fmt::Debug for Allocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Allocator")
            .field("options", &self.options)
            .field("stats", &self.stats())
            .finish()
    }
}
