//! Manual memory allocation with runtime-checked borrowing.
//!
//! Blocks of raw memory are allocated by an [`Allocator`] on behalf of an
//! [`Owner`], lent out through a [`BorrowLedger`] under "many readers xor one
//! writer" rules, and freed only by the owner that allocated them. [`Heap`]
//! bundles the two for the common case:
//!
//! ```
//! use heapward::{BorrowKind, Heap, Owner};
//!
//! let heap = Heap::new();
//! let owner = Owner::new();
//! let block = heap.allocate(1024, &owner)?;
//!
//! heap.borrow(&block, BorrowKind::Shared)?;
//! assert!(heap.borrow(&block, BorrowKind::Exclusive).is_err());
//! heap.return_borrow(&block, BorrowKind::Shared);
//!
//! heap.free(&block, &owner)?;
//! # Ok::<(), heapward::Error>(())
//! ```
//!
//! All failures are reported as [`Error`] values whose [`ErrorKind`] tells the
//! caller what went wrong; a failed call never changes any state.

pub mod allocator;
pub mod block;
pub mod heap;
pub mod ledger;
pub mod options;
pub mod owner;

pub use allocator::{Allocator, AllocatorStats};
pub use block::{BlockId, MemoryBlock};
pub use heap::Heap;
pub use heapward_common::{BorrowKind, ConflictReason, Error, ErrorKind, Result};
pub use heapward_page_alloc::ProviderKind;
pub use ledger::{BorrowLedger, BorrowState, Loan};
pub use options::{AllocatorOptions, FreePolicy, HeapOptions, LedgerOptions};
pub use owner::{Owner, OwnerId};
