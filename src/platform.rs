use std::ffi::c_void;

/// Called once when the platform allocator cannot satisfy a request, before the request is retried.
///
/// A handler is expected to release memory (drop caches, shrink pools) so the retry can succeed.
pub type LowMemoryHandler = fn();

/// A size-only allocator, in the shape of `malloc` and `free`.
///
/// Unlike [`GlobalAlloc`][std::alloc::GlobalAlloc], freeing takes only the address, so a block can
/// be released without knowing how large it was. That is what lets tracked deallocation free
/// addresses it has no record of.
///
/// # Safety
///
/// `malloc` must return either null or a block of at least `size` bytes, suitably aligned for any
/// fundamental type, that stays valid until passed to `free`.
pub unsafe trait RawAllocator {
    /// Allocates `size` bytes. `size` is never 0. Returns null on failure.
    fn malloc(&self, size: usize) -> *mut u8;

    /// Releases a block returned by `malloc`.
    ///
    /// # Safety
    ///
    /// `ptr` must be non-null, have come from `malloc` on this allocator, and not have been freed
    /// since.
    unsafe fn free(&self, ptr: *mut u8);
}

/// The C library allocator.
#[derive(Clone, Copy, Debug, Default)]
pub struct Libc;

unsafe impl RawAllocator for Libc {
    fn malloc(&self, size: usize) -> *mut u8 {
        unsafe { libc::malloc(size) as *mut u8 }
    }

    unsafe fn free(&self, ptr: *mut u8) {
        libc::free(ptr as *mut c_void)
    }
}

unsafe impl<R> RawAllocator for &R
where
    R: RawAllocator + ?Sized,
{
    fn malloc(&self, size: usize) -> *mut u8 {
        (**self).malloc(size)
    }

    unsafe fn free(&self, ptr: *mut u8) {
        (**self).free(ptr)
    }
}
