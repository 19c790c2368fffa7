//! Owned raw memory regions.
//!
//! A [`Region`] is the allocator's view of one allocation: a base address, the
//! byte length the caller asked for, and the (possibly larger) capacity that was
//! actually reserved from the provider. Regions are zero-initialized and release
//! their memory when dropped.

use std::alloc::{Layout, alloc_zeroed, dealloc};
use std::ptr::NonNull;

use crate::mmap;

/// Where an allocator obtains its memory from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ProviderKind {
    /// Anonymous mappings of regular pages. Every region occupies at least one
    /// page, which suits large or long-lived blocks.
    #[default]
    Pages,
    /// Huge page mappings, falling back to regular pages when the system has no
    /// huge pages available.
    LargePages,
    /// The process-wide global allocator. Regions are rounded up only to the
    /// requested alignment, which suits many small blocks.
    System,
}

/// The provider a particular region actually came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    Pages,
    LargePages,
    System,
}

/// One owned, aligned, zero-initialized span of raw memory.
pub struct Region {
    ptr: NonNull<u8>,
    /// Requested length in bytes.
    len: usize,
    /// Reserved length in bytes; never less than `max(len, 1)`.
    capacity: usize,
    alignment: usize,
    origin: Origin,
}

impl Region {
    /// Allocates `size` bytes from the provider selected by `kind`.
    ///
    /// # Arguments
    ///
    /// * `kind` - The provider to draw from. [`ProviderKind::LargePages`] falls
    ///   back to regular pages when huge pages cannot be mapped.
    /// * `size` - The number of bytes requested. Zero is valid: the region
    ///   reserves the provider's minimum granule and reports a length of zero.
    /// * `alignment` - Alignment for [`ProviderKind::System`]; must be a power of
    ///   two. Page providers are always aligned to their page size.
    ///
    /// # Returns
    ///
    /// The zero-initialized region, or an `io::Error`: `InvalidInput` for a bad
    /// alignment, `OutOfMemory` (or the OS error) when memory is unavailable.
    pub fn allocate(kind: ProviderKind, size: usize, alignment: usize) -> std::io::Result<Region> {
        match kind {
            ProviderKind::Pages => Self::allocate_pages(size),
            ProviderKind::LargePages => {
                Self::allocate_large_pages(size).or_else(|_| Self::allocate_pages(size))
            }
            ProviderKind::System => Self::allocate_system(size, alignment),
        }
    }

    /// Allocates regular pages.
    pub fn allocate_pages(size: usize) -> std::io::Result<Region> {
        let (ptr, capacity) = mmap::map(size, false)?;
        Self::from_mapping(ptr, size, capacity, mmap::get_page_size(), Origin::Pages)
    }

    /// Allocates huge pages, without any fallback.
    pub fn allocate_large_pages(size: usize) -> std::io::Result<Region> {
        let (ptr, capacity) = mmap::map(size, true)?;
        Self::from_mapping(
            ptr,
            size,
            capacity,
            mmap::get_large_page_size(),
            Origin::LargePages,
        )
    }

    /// Allocates from the global allocator.
    ///
    /// # Arguments
    ///
    /// * `size` - The number of bytes requested, rounded up to `alignment`
    /// * `alignment` - A power of two
    ///
    /// # Errors
    ///
    /// `InvalidInput` if `alignment` is not a power of two, `OutOfMemory` if the
    /// rounded size overflows or the global allocator fails.
    pub fn allocate_system(size: usize, alignment: usize) -> std::io::Result<Region> {
        let layout = system_layout(size, alignment)?;
        let ptr = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(ptr).ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::OutOfMemory,
                "global allocator returned null",
            )
        })?;
        Ok(Region {
            ptr,
            len: size,
            capacity: layout.size(),
            alignment: layout.align(),
            origin: Origin::System,
        })
    }

    fn from_mapping(
        ptr: *mut std::ffi::c_void,
        len: usize,
        capacity: usize,
        alignment: usize,
        origin: Origin,
    ) -> std::io::Result<Region> {
        let ptr = NonNull::new(ptr as *mut u8)
            .ok_or_else(|| std::io::Error::other("page provider returned null"))?;
        debug_assert!((ptr.as_ptr() as usize).is_multiple_of(alignment));
        Ok(Region {
            ptr,
            len,
            capacity,
            alignment,
            origin,
        })
    }

    /// Base address of the region as an opaque integer.
    #[inline]
    pub fn address(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    /// Requested length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes actually reserved from the provider.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn alignment(&self) -> usize {
        self.alignment
    }

    #[inline]
    pub fn origin(&self) -> Origin {
        self.origin
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        match self.origin {
            Origin::Pages | Origin::LargePages => {
                let large = self.origin == Origin::LargePages;
                let _ = unsafe { mmap::unmap(self.ptr.as_ptr() as _, self.capacity, large) };
            }
            Origin::System => {
                // The layout was validated when the region was created.
                if let Ok(layout) = Layout::from_size_align(self.capacity, self.alignment) {
                    unsafe { dealloc(self.ptr.as_ptr(), layout) };
                }
            }
        }
    }
}

// SAFETY: a Region exclusively owns its memory and never hands out references
// into it; only the integer address escapes.
unsafe impl Send for Region {}

// SAFETY: all `&self` methods read immutable metadata.
unsafe impl Sync for Region {}

impl std::fmt::Debug for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Region")
            .field("address", &format_args!("{:#x}", self.address()))
            .field("len", &self.len)
            .field("capacity", &self.capacity)
            .field("origin", &self.origin)
            .finish()
    }
}

fn system_layout(size: usize, alignment: usize) -> std::io::Result<Layout> {
    if !alignment.is_power_of_two() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "alignment must be a power of two",
        ));
    }
    let capacity = size
        .max(1)
        .checked_next_multiple_of(alignment)
        .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::OutOfMemory))?;
    Layout::from_size_align(capacity, alignment)
        .map_err(|_| std::io::Error::from(std::io::ErrorKind::OutOfMemory))
}
