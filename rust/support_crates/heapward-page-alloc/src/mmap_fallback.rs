//! Page mappings emulated on top of the global allocator, for targets without
//! a native `mmap` binding.

use std::alloc::{Layout, alloc_zeroed, dealloc};

/// Allocates a zeroed, page-aligned region of at least `size` bytes.
///
/// # Arguments
///
/// * `size` - The number of bytes to allocate, rounded up to a whole number of
///   (emulated) pages
/// * `large` - Use the emulated huge page size as the granule
///
/// # Returns
///
/// - `Ok((ptr, capacity))` - The base pointer and the reserved capacity
/// - `Err(io::Error)` - `OutOfMemory` if the global allocator fails
pub fn map(size: usize, large: bool) -> std::io::Result<(*mut std::ffi::c_void, usize)> {
    let layout = page_layout(size, large)?;
    let ptr = unsafe { alloc_zeroed(layout) };
    if ptr.is_null() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::OutOfMemory,
            "failed to allocate pages",
        ));
    }
    Ok((ptr as *mut std::ffi::c_void, layout.size()))
}

/// Releases a region obtained from [`map`].
///
/// # Arguments
///
/// * `ptr` - The base pointer returned by [`map`]
/// * `capacity` - The capacity returned by the same [`map`] call
/// * `large` - The `large` flag passed to that call
///
/// # Safety
///
/// This function is safe to call as long as:
/// - `ptr`, `capacity` and `large` match one successful [`map`] call
/// - The region has not been released already
pub unsafe fn unmap(
    ptr: *mut std::ffi::c_void,
    capacity: usize,
    large: bool,
) -> std::io::Result<()> {
    let layout = page_layout(capacity, large)?;
    unsafe { dealloc(ptr as *mut u8, layout) };
    Ok(())
}

pub fn get_page_size() -> usize {
    4 * 1024
}

pub fn get_large_page_size() -> usize {
    2 * 1024 * 1024
}

fn page_layout(size: usize, large: bool) -> std::io::Result<Layout> {
    let granule = if large {
        get_large_page_size()
    } else {
        get_page_size()
    };
    let capacity = size
        .max(1)
        .checked_next_multiple_of(granule)
        .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::OutOfMemory))?;
    Layout::from_size_align(capacity, granule)
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "invalid layout"))
}
