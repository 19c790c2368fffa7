//! An allocator and a borrow ledger used together.

use heapward_common::{BorrowKind, Error, Result};

use crate::allocator::{Allocator, AllocatorStats};
use crate::block::MemoryBlock;
use crate::ledger::{BorrowLedger, BorrowState, Loan};
use crate::options::{FreePolicy, HeapOptions};
use crate::owner::Owner;

/// The context object callers drive: allocate, borrow, return and free.
///
/// Unlike a bare [`BorrowLedger`], a heap only lends out blocks that are
/// currently allocated, and it drops a block's borrow state when the block is
/// freed. Liveness checks and frees both run under the block's ledger lock, so
/// a borrow and a free of the same block never interleave.
#[derive(Debug)]
pub struct Heap {
    allocator: Allocator,
    ledger: BorrowLedger,
    free_policy: FreePolicy,
}

impl Heap {
    pub fn new() -> Heap {
        Heap {
            allocator: Allocator::new(),
            ledger: BorrowLedger::new(),
            free_policy: FreePolicy::default(),
        }
    }

    pub fn with_options(options: HeapOptions) -> Result<Heap> {
        options.validate()?;
        Ok(Heap {
            allocator: Allocator::with_options(options.allocator)?,
            ledger: BorrowLedger::with_options(options.ledger)?,
            free_policy: options.free_policy,
        })
    }

    pub fn allocator(&self) -> &Allocator {
        &self.allocator
    }

    pub fn ledger(&self) -> &BorrowLedger {
        &self.ledger
    }

    pub fn free_policy(&self) -> FreePolicy {
        self.free_policy
    }

    /// See [`Allocator::allocate`].
    pub fn allocate(&self, size: usize, owner: &Owner) -> Result<MemoryBlock> {
        self.allocator.allocate(size, owner)
    }

    /// Frees `block` on behalf of `requester` and discards its borrow state.
    ///
    /// # Errors
    ///
    /// - `OwnershipViolation` or `UnknownBlock`, as for [`Allocator::free`].
    /// - `BlockBorrowed` under [`FreePolicy::RejectBorrowed`] when the block
    ///   still has outstanding borrows.
    ///
    /// On error the block and its borrow state are untouched.
    pub fn free(&self, block: &MemoryBlock, requester: &Owner) -> Result<()> {
        self.ledger.retire(block.id(), |state| {
            if !state.is_free() {
                match self.free_policy {
                    FreePolicy::Permissive => {
                        log::debug!("freeing {} while {state}", block.id());
                    }
                    FreePolicy::RejectBorrowed => {
                        return Err(Error::block_borrowed(
                            block.id().as_u64(),
                            state.to_string(),
                        ));
                    }
                }
            }
            self.allocator.free(block, requester)
        })
    }

    /// Borrows a live block.
    ///
    /// # Errors
    ///
    /// `UnknownBlock` if the block is not allocated by this heap, otherwise as
    /// for [`BorrowLedger::borrow`].
    pub fn borrow(&self, block: &MemoryBlock, kind: BorrowKind) -> Result<()> {
        self.ledger
            .borrow_if(block, kind, || self.allocator.is_live(block))
    }

    /// See [`BorrowLedger::return_borrow`].
    pub fn return_borrow(&self, block: &MemoryBlock, kind: BorrowKind) {
        self.ledger.return_borrow(block, kind)
    }

    /// See [`BorrowLedger::try_return_borrow`].
    pub fn try_return_borrow(&self, block: &MemoryBlock, kind: BorrowKind) -> Result<()> {
        self.ledger.try_return_borrow(block, kind)
    }

    /// Borrows a live block for the lifetime of the returned guard.
    pub fn lend(&self, block: &MemoryBlock, kind: BorrowKind) -> Result<Loan> {
        self.ledger
            .lend_if(block, kind, || self.allocator.is_live(block))
    }

    pub fn state(&self, block: &MemoryBlock) -> BorrowState {
        self.ledger.state(block)
    }

    pub fn is_live(&self, block: &MemoryBlock) -> bool {
        self.allocator.is_live(block)
    }

    pub fn stats(&self) -> AllocatorStats {
        self.allocator.stats()
    }
}

impl Default for Heap {
    fn default() -> Self {
        Heap::new()
    }
}
