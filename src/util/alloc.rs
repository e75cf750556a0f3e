//! Returning free heap pages to the operating system.

/// Ask the allocator to release unused heap pages. Returns whether any memory
/// was given back.
#[cfg(all(target_os = "linux", target_env = "gnu"))]
#[allow(unsafe_code)]
#[must_use]
pub fn release_free_heap() -> bool {
    // SAFETY: malloc_trim only walks glibc's own arenas and has no
    // preconditions on the caller.
    unsafe { libc::malloc_trim(0) != 0 }
}

/// Ask the allocator to release unused heap pages. Not supported on this
/// platform, so nothing is released.
#[cfg(not(all(target_os = "linux", target_env = "gnu")))]
#[must_use]
pub const fn release_free_heap() -> bool {
    false
}
