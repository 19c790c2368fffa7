//! Raw memory providers for heapward.
//!
//! [`region::Region`] is the unit handed out to the allocator: one owned, zeroed,
//! aligned span of memory obtained either from anonymous page mappings or from the
//! global allocator, and released again when the region is dropped.

pub mod region;

#[cfg_attr(target_os = "linux", path = "mmap_linux.rs")]
#[cfg_attr(not(target_os = "linux"), path = "mmap_fallback.rs")]
pub mod mmap;

pub use region::{Origin, ProviderKind, Region};
