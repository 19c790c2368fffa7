//! Anonymous page mappings through `mmap(2)`.

use std::sync::OnceLock;

/// Maps a private, zero-filled, read-write region of at least `size` bytes.
///
/// # Arguments
///
/// * `size` - The number of bytes to map. Rounded up to a whole number of pages;
///   a zero `size` still maps a single page.
/// * `large` - Map huge pages (`MAP_HUGETLB`) instead of regular ones.
///
/// # Returns
///
/// Returns a `Result` containing:
/// - `Ok((ptr, capacity))` - The page-aligned base pointer and the mapped
///   capacity in bytes, which must be passed back unchanged to [`unmap`]
/// - `Err(io::Error)` - The OS error if the mapping fails
///
/// # Prerequisites
///
/// Huge page mappings need huge pages to be set up on the system, e.g.:
///
/// ```bash
/// echo COUNT > /proc/sys/vm/nr_overcommit_hugepages
/// ```
///
/// Otherwise the kernel refuses them with `ENOMEM`.
pub fn map(size: usize, large: bool) -> std::io::Result<(*mut std::ffi::c_void, usize)> {
    let granule = if large {
        get_large_page_size()
    } else {
        get_page_size()
    };
    let capacity = round_up(size, granule)?;
    let mut flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
    if large {
        flags |= libc::MAP_HUGETLB;
    }
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            capacity,
            libc::PROT_READ | libc::PROT_WRITE,
            flags,
            -1,
            0,
        )
    };
    if ptr.is_null() || ptr == libc::MAP_FAILED {
        return Err(std::io::Error::last_os_error());
    }
    Ok((ptr, capacity))
}

/// Unmaps a region obtained from [`map`].
///
/// # Arguments
///
/// * `ptr` - The base pointer returned by [`map`]
/// * `capacity` - The capacity returned by the same [`map`] call
/// * `large` - Accepted for parity with the emulated provider; the kernel
///   tracks the page size of the mapping itself
///
/// # Returns
///
/// Returns `Ok(())` on success, or the OS error if `munmap` fails.
///
/// # Safety
///
/// This function is safe to call as long as:
/// - `ptr` and `capacity` come from one successful [`map`] call
/// - The region has not been unmapped already
/// - No references into the region are used afterwards
pub unsafe fn unmap(
    ptr: *mut std::ffi::c_void,
    capacity: usize,
    _large: bool,
) -> std::io::Result<()> {
    let res = unsafe { libc::munmap(ptr, capacity) };
    if res < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

/// Returns the regular page size in bytes.
///
/// Queried once through `sysconf(_SC_PAGESIZE)` and cached; falls back to 4KB
/// when the query fails.
pub fn get_page_size() -> usize {
    static SIZE: OnceLock<usize> = OnceLock::new();
    *SIZE.get_or_init(|| read_page_size().unwrap_or(4 * 1024))
}

/// Returns the huge page size in bytes.
///
/// Read once from the `Hugepagesize:` line of `/proc/meminfo` and cached; falls
/// back to 2MB when it cannot be read.
pub fn get_large_page_size() -> usize {
    static SIZE: OnceLock<usize> = OnceLock::new();
    *SIZE.get_or_init(|| read_large_page_size().unwrap_or(2 * 1024 * 1024))
}

fn round_up(size: usize, granule: usize) -> std::io::Result<usize> {
    assert!(granule.is_power_of_two());
    size.max(1)
        .checked_next_multiple_of(granule)
        .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::OutOfMemory))
}

fn read_page_size() -> std::io::Result<usize> {
    let res = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if res <= 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(res as usize)
}

fn read_large_page_size() -> std::io::Result<usize> {
    let meminfo = std::fs::read_to_string("/proc/meminfo")?;
    meminfo
        .lines()
        .find_map(|line| {
            let rest = line.strip_prefix("Hugepagesize:")?;
            let kb = rest.split_whitespace().next()?.parse::<usize>().ok()?;
            Some(kb * 1024)
        })
        .filter(|size| size.is_power_of_two())
        .ok_or_else(|| std::io::Error::other("failed to read Hugepagesize"))
}
