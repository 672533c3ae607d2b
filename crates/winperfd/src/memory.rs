//! Allocator setup and memory release after evictions.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

/// Releases unused memory back to the operating system.
/// Uses jemalloc's arena purge to reduce RSS after idle devices are evicted.
#[cfg(not(target_env = "msvc"))]
pub(crate) fn release_memory_to_os() {
    // SAFETY: mallctl is called with a valid NUL-terminated name and no
    // input or output buffers.
    unsafe {
        // MALLCTL_ARENAS_ALL = 4096: purge dirty pages from every arena.
        tikv_jemalloc_sys::mallctl(
            c"arena.4096.purge".as_ptr().cast(),
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            0,
        );
    }
}

#[cfg(target_env = "msvc")]
pub(crate) fn release_memory_to_os() {}
