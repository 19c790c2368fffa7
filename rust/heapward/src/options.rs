//! Configuration for allocators, ledgers and heaps.
//!
//! All option types are plain values with sensible defaults and chainable
//! setters:
//!
//! ```
//! use heapward::{HeapOptions, ProviderKind, FreePolicy};
//!
//! let options = HeapOptions::default()
//!     .provider(ProviderKind::System)
//!     .memory_limit(64 * 1024 * 1024)
//!     .free_policy(FreePolicy::RejectBorrowed);
//! assert_eq!(options.allocator.memory_limit, Some(64 * 1024 * 1024));
//! ```

use heapward_common::{Result, verify_arg};
use heapward_page_alloc::ProviderKind;

/// Default alignment of blocks served by [`ProviderKind::System`].
pub const DEFAULT_ALIGNMENT: usize = 16;

/// Default number of ledger shards.
pub const DEFAULT_LEDGER_SHARDS: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocatorOptions {
    /// Where block memory comes from.
    pub provider: ProviderKind,
    /// Upper bound on the bytes reserved by live blocks. `None` means no limit
    /// beyond what the provider itself imposes.
    pub memory_limit: Option<u64>,
    /// Alignment of [`ProviderKind::System`] blocks. Page providers always
    /// align to their page size.
    pub alignment: usize,
}

impl Default for AllocatorOptions {
    fn default() -> Self {
        AllocatorOptions {
            provider: ProviderKind::Pages,
            memory_limit: None,
            alignment: DEFAULT_ALIGNMENT,
        }
    }
}

impl AllocatorOptions {
    pub fn provider(mut self, provider: ProviderKind) -> Self {
        self.provider = provider;
        self
    }

    pub fn memory_limit(mut self, limit: u64) -> Self {
        self.memory_limit = Some(limit);
        self
    }

    pub fn alignment(mut self, alignment: usize) -> Self {
        self.alignment = alignment;
        self
    }

    pub fn validate(&self) -> Result<()> {
        verify_arg!(alignment, self.alignment.is_power_of_two());
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerOptions {
    /// Number of independently locked partitions of the ledger map. Rounded up
    /// to a power of two.
    pub shards: usize,
}

impl Default for LedgerOptions {
    fn default() -> Self {
        LedgerOptions {
            shards: DEFAULT_LEDGER_SHARDS,
        }
    }
}

impl LedgerOptions {
    pub fn shards(mut self, shards: usize) -> Self {
        self.shards = shards;
        self
    }

    pub fn validate(&self) -> Result<()> {
        verify_arg!(shards, self.shards >= 1);
        verify_arg!(shards, self.shards <= 1 << 16);
        Ok(())
    }
}

/// What [`Heap::free`](crate::Heap::free) does with a block that still has
/// outstanding borrows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FreePolicy {
    /// Free it anyway. Borrowers are left holding a dangling handle.
    #[default]
    Permissive,
    /// Refuse with `BlockBorrowed`; the block stays allocated.
    RejectBorrowed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeapOptions {
    pub allocator: AllocatorOptions,
    pub ledger: LedgerOptions,
    pub free_policy: FreePolicy,
}

impl HeapOptions {
    pub fn provider(mut self, provider: ProviderKind) -> Self {
        self.allocator.provider = provider;
        self
    }

    pub fn memory_limit(mut self, limit: u64) -> Self {
        self.allocator.memory_limit = Some(limit);
        self
    }

    pub fn alignment(mut self, alignment: usize) -> Self {
        self.allocator.alignment = alignment;
        self
    }

    pub fn shards(mut self, shards: usize) -> Self {
        self.ledger.shards = shards;
        self
    }

    pub fn free_policy(mut self, policy: FreePolicy) -> Self {
        self.free_policy = policy;
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.allocator.validate()?;
        self.ledger.validate()
    }
}
