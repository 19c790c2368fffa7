//! Runtime borrow tracking.
//!
//! The [`BorrowLedger`] enforces "many readers xor one writer" per block. Each
//! tracked block has a [`BorrowState`]:
//!
//! ```text
//!            shared              shared
//!   Free ──────────────▶ Shared(1) ◀────▶ Shared(n)
//!    │ ▲  ◀──────────────
//!    │ │   return shared
//!    │ └──────────────── Exclusive
//!    └───────────────────▶
//!          exclusive
//! ```
//!
//! Requests that would break the rule fail immediately with `BorrowConflict`;
//! nothing ever waits.
//!
//! # Concurrency
//!
//! The map from block to state is split into shards, each behind its own
//! `RwLock`, and every state sits behind its own `Mutex`. A borrow takes the
//! shard lock only long enough to find (or insert-if-absent) the block's slot,
//! then performs check-then-act under the slot mutex. Two first-time borrowers
//! of one block therefore always meet on the same slot, and blocks in different
//! shards never contend.
//!
//! A slot that is dropped from its shard is marked retired first. Callers that
//! looked it up just before that find the mark once they hold the mutex and
//! look the block up again. A [`Loan`] keeps its slot, so after the block is
//! forgotten it has nothing to give back, even if the block is borrowed anew.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use heapward_common::{BorrowKind, ConflictReason, Error, ErrorKind, Result};

use crate::block::{BlockId, MemoryBlock};
use crate::options::LedgerOptions;

/// Lending state of one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BorrowState {
    #[default]
    Free,
    /// Held by this many shared borrowers; always at least one.
    Shared(usize),
    Exclusive,
}

impl BorrowState {
    pub fn shared_count(self) -> usize {
        match self {
            BorrowState::Shared(n) => n,
            _ => 0,
        }
    }

    pub fn exclusive_held(self) -> bool {
        self == BorrowState::Exclusive
    }

    pub fn is_free(self) -> bool {
        self == BorrowState::Free
    }

    /// The state after granting a borrow of `kind`, or why it cannot be granted.
    pub fn acquire(self, kind: BorrowKind) -> std::result::Result<BorrowState, ConflictReason> {
        match (self, kind) {
            (BorrowState::Free, BorrowKind::Shared) => Ok(BorrowState::Shared(1)),
            (BorrowState::Shared(n), BorrowKind::Shared) => Ok(BorrowState::Shared(n + 1)),
            (BorrowState::Exclusive, BorrowKind::Shared) => {
                Err(ConflictReason::SharedWhileExclusive)
            }
            (BorrowState::Free, BorrowKind::Exclusive) => Ok(BorrowState::Exclusive),
            (_, BorrowKind::Exclusive) => Err(ConflictReason::ExclusiveWhileBorrowed),
        }
    }

    /// The state after giving back a borrow of `kind`, or `None` if no such
    /// borrow is held.
    pub fn release(self, kind: BorrowKind) -> Option<BorrowState> {
        match (self, kind) {
            (BorrowState::Shared(1), BorrowKind::Shared) => Some(BorrowState::Free),
            (BorrowState::Shared(n), BorrowKind::Shared) => Some(BorrowState::Shared(n - 1)),
            (BorrowState::Exclusive, BorrowKind::Exclusive) => Some(BorrowState::Free),
            _ => None,
        }
    }
}

impl std::fmt::Display for BorrowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BorrowState::Free => f.write_str("not borrowed"),
            BorrowState::Shared(1) => f.write_str("shared by 1 borrower"),
            BorrowState::Shared(n) => write!(f, "shared by {n} borrowers"),
            BorrowState::Exclusive => f.write_str("borrowed exclusively"),
        }
    }
}

#[derive(Debug, Default)]
struct Slot {
    state: BorrowState,
    /// Set when the slot is unlinked from its shard. Only callers that found it
    /// earlier, and loans taken against it, can observe this.
    retired: bool,
}

type SlotRef = Arc<Mutex<Slot>>;
type Shard = RwLock<ahash::HashMap<BlockId, SlotRef>>;

/// Tracks shared and exclusive borrows of memory blocks.
///
/// A ledger holds no memory and knows nothing about allocators; it is keyed by
/// block identity only. Share it between threads through an `Arc`.
pub struct BorrowLedger {
    shards: Box<[Shard]>,
    mask: usize,
}

impl BorrowLedger {
    pub fn new() -> BorrowLedger {
        Self::build(&LedgerOptions::default())
    }

    pub fn with_options(options: LedgerOptions) -> Result<BorrowLedger> {
        options.validate()?;
        Ok(Self::build(&options))
    }

    fn build(options: &LedgerOptions) -> BorrowLedger {
        let count = options.shards.max(1).next_power_of_two();
        BorrowLedger {
            shards: (0..count).map(|_| Shard::default()).collect(),
            mask: count - 1,
        }
    }

    /// Borrows `block` as `kind`.
    ///
    /// # Errors
    ///
    /// `BorrowConflict` if the borrow would alias an exclusive borrow, or if an
    /// exclusive borrow is requested while any borrow is held. The block's
    /// state is left unchanged.
    pub fn borrow(&self, block: &MemoryBlock, kind: BorrowKind) -> Result<()> {
        self.acquire(block.id(), kind, || true).map(|_| ())
    }

    /// Gives back a borrow of `kind`.
    ///
    /// Never fails. Returning a borrow the block does not hold (nothing
    /// borrowed, or the other kind held) changes nothing and is logged.
    pub fn return_borrow(&self, block: &MemoryBlock, kind: BorrowKind) {
        if let Err(e) = self.release(block.id(), kind) {
            log::warn!("ignored return: {e}");
        }
    }

    /// Gives back a borrow of `kind`, reporting a mismatch instead of ignoring it.
    ///
    /// # Errors
    ///
    /// `ReturnMismatch` if the block holds no borrow of `kind`. The state is
    /// left unchanged.
    pub fn try_return_borrow(&self, block: &MemoryBlock, kind: BorrowKind) -> Result<()> {
        self.release(block.id(), kind)
    }

    /// Borrows `block` and returns a guard that gives the borrow back on drop.
    pub fn lend(&self, block: &MemoryBlock, kind: BorrowKind) -> Result<Loan> {
        self.lend_if(block, kind, || true)
    }

    /// Like [`BorrowLedger::borrow`], but `live` is consulted under the block's
    /// lock and the borrow fails with `UnknownBlock` if it returns `false`.
    pub(crate) fn borrow_if(
        &self,
        block: &MemoryBlock,
        kind: BorrowKind,
        live: impl FnOnce() -> bool,
    ) -> Result<()> {
        self.acquire(block.id(), kind, live).map(|_| ())
    }

    pub(crate) fn lend_if(
        &self,
        block: &MemoryBlock,
        kind: BorrowKind,
        live: impl FnOnce() -> bool,
    ) -> Result<Loan> {
        let slot = self.acquire(block.id(), kind, live)?;
        Ok(Loan {
            block: block.id(),
            slot,
            kind,
        })
    }

    /// Current state of `block`. Untracked blocks are [`BorrowState::Free`].
    pub fn state(&self, block: &MemoryBlock) -> BorrowState {
        self.existing(block.id())
            .map(|slot| current(&slot))
            .unwrap_or_default()
    }

    /// Stops tracking `block`, returning its last state. Borrowers still
    /// holding a [`Loan`] on it find nothing to give back.
    pub fn forget(&self, block: &MemoryBlock) -> BorrowState {
        let mut last = BorrowState::Free;
        let _ = self.retire(block.id(), |state| {
            last = state;
            Ok(())
        });
        last
    }

    /// Number of tracked blocks.
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| read(shard).len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs `check` against the block's state under the block's lock and, if it
    /// succeeds, unlinks the block from the ledger before the lock is released.
    /// No borrow can be granted between the check and the removal, including a
    /// first borrow of a block that had no entry yet.
    ///
    /// When the check fails the entry stays, unless it holds no borrows (an
    /// entry in that state is the same as none) or the check reports
    /// `UnknownBlock` (the block is gone for good).
    pub(crate) fn retire(
        &self,
        block: BlockId,
        check: impl FnOnce(BorrowState) -> Result<()>,
    ) -> Result<()> {
        self.with_slot(block, |slot, guard| {
            let res = check(guard.state);
            let drop_entry = match &res {
                Ok(()) => true,
                Err(e) => {
                    guard.state.is_free()
                        || matches!(e.kind(), ErrorKind::UnknownBlock { .. })
                }
            };
            if drop_entry {
                guard.retired = true;
                self.unlink(block, slot);
                if res.is_ok() {
                    log::trace!("{block}: retired ({})", guard.state);
                }
            }
            res
        })
    }

    fn acquire(
        &self,
        block: BlockId,
        kind: BorrowKind,
        live: impl FnOnce() -> bool,
    ) -> Result<SlotRef> {
        self.with_slot(block, |slot, guard| {
            if !live() {
                guard.retired = true;
                self.unlink(block, slot);
                return Err(Error::unknown_block(block.as_u64()));
            }
            match guard.state.acquire(kind) {
                Ok(next) => {
                    log::trace!("{block}: {kind} borrow, {} -> {next}", guard.state);
                    guard.state = next;
                    Ok(slot.clone())
                }
                Err(reason) => {
                    log::trace!("{block}: {kind} borrow refused, {}", guard.state);
                    Err(Error::borrow_conflict(block.as_u64(), reason))
                }
            }
        })
    }

    /// Runs `f` on the block's current slot with its mutex held, looking the
    /// block up again whenever the slot found was retired in the meantime.
    fn with_slot<R>(&self, block: BlockId, f: impl FnOnce(&SlotRef, &mut Slot) -> R) -> R {
        loop {
            let slot = self.slot(block);
            let mut guard = lock(&slot);
            if !guard.retired {
                return f(&slot, &mut *guard);
            }
        }
    }

    fn release(&self, block: BlockId, kind: BorrowKind) -> Result<()> {
        match self.existing(block) {
            Some(slot) => Self::release_slot(block, &slot, kind),
            None => Err(Error::return_mismatch(
                block.as_u64(),
                kind,
                BorrowState::Free.to_string(),
            )),
        }
    }

    /// Gives back a borrow held on `slot` itself. A retired slot holds nothing
    /// that can be given back.
    fn release_slot(block: BlockId, slot: &SlotRef, kind: BorrowKind) -> Result<()> {
        let mut guard = lock(slot);
        if guard.retired {
            return Err(Error::return_mismatch(
                block.as_u64(),
                kind,
                BorrowState::Free.to_string(),
            ));
        }
        match guard.state.release(kind) {
            Some(next) => {
                log::trace!("{block}: {kind} return, {} -> {next}", guard.state);
                guard.state = next;
                Ok(())
            }
            None => Err(Error::return_mismatch(
                block.as_u64(),
                kind,
                guard.state.to_string(),
            )),
        }
    }

    fn shard(&self, block: BlockId) -> &Shard {
        // Ids are sequential, so the low bits spread consecutive blocks evenly.
        &self.shards[block.as_u64() as usize & self.mask]
    }

    fn existing(&self, block: BlockId) -> Option<SlotRef> {
        read(self.shard(block)).get(&block).cloned()
    }

    /// Removes the block's entry if it is still `slot`; a newer slot for the
    /// same block is left alone.
    fn unlink(&self, block: BlockId, slot: &SlotRef) {
        let mut shard = write(self.shard(block));
        if shard.get(&block).is_some_and(|s| Arc::ptr_eq(s, slot)) {
            shard.remove(&block);
        }
    }

    fn slot(&self, block: BlockId) -> SlotRef {
        if let Some(slot) = self.existing(block) {
            return slot;
        }
        write(self.shard(block)).entry(block).or_default().clone()
    }
}

impl Default for BorrowLedger {
    fn default() -> Self {
        BorrowLedger::new()
    }
}

impl std::fmt::Debug for BorrowLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BorrowLedger")
            .field("shards", &self.shards.len())
            .field("tracked", &self.len())
            .finish()
    }
}

/// A borrow that is given back when the guard is dropped.
#[must_use = "dropping a Loan returns the borrow immediately"]
pub struct Loan {
    block: BlockId,
    slot: SlotRef,
    kind: BorrowKind,
}

impl Loan {
    pub fn block(&self) -> BlockId {
        self.block
    }

    pub fn kind(&self) -> BorrowKind {
        self.kind
    }
}

impl Drop for Loan {
    fn drop(&mut self) {
        if let Err(e) = BorrowLedger::release_slot(self.block, &self.slot, self.kind) {
            log::debug!("loan of {} not returned: {e}", self.block);
        }
    }
}

impl std::fmt::Debug for Loan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Loan")
            .field("block", &self.block)
            .field("kind", &self.kind)
            .finish()
    }
}

// Slot and shard critical sections are single assignments, so poisoned locks
// still guard consistent data.

fn lock(slot: &Mutex<Slot>) -> MutexGuard<'_, Slot> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

fn current(slot: &Mutex<Slot>) -> BorrowState {
    lock(slot).state
}

fn read(shard: &Shard) -> std::sync::RwLockReadGuard<'_, ahash::HashMap<BlockId, SlotRef>> {
    shard.read().unwrap_or_else(PoisonError::into_inner)
}

fn write(shard: &Shard) -> std::sync::RwLockWriteGuard<'_, ahash::HashMap<BlockId, SlotRef>> {
    shard.write().unwrap_or_else(PoisonError::into_inner)
}
