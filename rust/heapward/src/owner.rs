//! Owner identities.
//!
//! An [`Owner`] is the token a caller presents to allocate and later free a
//! block. It cannot be cloned, and every owner created in the process gets a
//! distinct [`OwnerId`], so two owners never compare equal even when they are
//! otherwise indistinguishable. Blocks only remember the id; there is no way to
//! turn an id back into an `Owner`.

use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_OWNER_ID: AtomicU64 = AtomicU64::new(1);

/// An unforgeable owner token.
#[derive(Debug)]
pub struct Owner {
    id: OwnerId,
}

impl Owner {
    pub fn new() -> Owner {
        Owner {
            id: OwnerId(NEXT_OWNER_ID.fetch_add(1, Ordering::Relaxed)),
        }
    }

    pub fn id(&self) -> OwnerId {
        self.id
    }
}

impl Default for Owner {
    fn default() -> Self {
        Owner::new()
    }
}

/// The identity of an [`Owner`], as recorded in the blocks it allocates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OwnerId(u64);

impl OwnerId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for OwnerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "owner#{}", self.0)
    }
}
