use std::{borrow::Cow, ptr::NonNull};

use parking_lot::{const_mutex, Mutex};

use crate::{
    guard::ReentrancyGuard,
    ledger::{Ledger, Options},
    platform::{Libc, LowMemoryHandler, RawAllocator},
    Error, Result,
};

/// Tracked allocate/deallocate entry points over a [`RawAllocator`].
///
/// Every call goes to the raw allocator first. Only then, and only for the outermost tracked call
/// on the thread while the ledger is on, is the ledger updated and the event logged. Calls made
/// while the ledger is stopped are plain `malloc`/`free`.
///
/// Deallocation never fails: null pointers and addresses the ledger does not know are reported to
/// the sinks, and the latter are still handed to the raw allocator to be freed.
pub struct LeakDebug<R = Libc> {
    raw: R,
    ledger: Ledger,
    low_memory_handler: Mutex<Option<LowMemoryHandler>>,
}

impl LeakDebug<Libc> {
    /// Creates a stopped tracker over the C library allocator.
    pub const fn libc() -> Self {
        Self::from_raw(Libc)
    }
}

impl<R> LeakDebug<R> {
    /// Creates a stopped tracker over `raw`.
    pub const fn from_raw(raw: R) -> Self {
        Self {
            raw,
            ledger: Ledger::new(),
            low_memory_handler: const_mutex(None),
        }
    }

    /// The ledger this tracker records into.
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// The raw allocator calls are forwarded to.
    pub fn raw(&self) -> &R {
        &self.raw
    }

    /// Sets the handler to run when the raw allocator fails, or clears it with `None`.
    ///
    /// Returns the handler that was set before.
    pub fn set_low_memory_handler(
        &self,
        handler: Option<LowMemoryHandler>,
    ) -> Option<LowMemoryHandler> {
        std::mem::replace(&mut *self.low_memory_handler.lock(), handler)
    }
}

impl<R> LeakDebug<R>
where
    R: RawAllocator,
{
    /// Allocates `size` bytes, attributed to the stashed call site if there is one.
    ///
    /// # Errors
    ///
    /// [`Error::OutOfMemory`] if the raw allocator fails, even after the low-memory handler ran.
    pub fn allocate(&self, size: usize) -> Result<NonNull<u8>> {
        self.allocate_with(size, &Options::new())
    }

    /// Allocates `size` bytes, attributed to `file` and `line`.
    ///
    /// # Errors
    ///
    /// [`Error::OutOfMemory`] if the raw allocator fails, even after the low-memory handler ran.
    pub fn allocate_at<F>(&self, size: usize, file: F, line: u32) -> Result<NonNull<u8>>
    where
        F: Into<Cow<'static, str>>,
    {
        self.allocate_with(size, &Options::new().at(file, line))
    }

    /// Allocates `size` bytes with per-call overrides.
    ///
    /// # Errors
    ///
    /// [`Error::OutOfMemory`] if the raw allocator fails, even after the low-memory handler ran.
    pub fn allocate_with(&self, size: usize, options: &Options) -> Result<NonNull<u8>> {
        self.try_allocate_with(size, options)
            .ok_or(Error::OutOfMemory { size })
    }

    /// Allocates `size` bytes, returning `None` instead of an error on failure.
    pub fn try_allocate(&self, size: usize) -> Option<NonNull<u8>> {
        self.try_allocate_with(size, &Options::new())
    }

    /// Allocates `size` bytes with per-call overrides, returning `None` instead of an error on
    /// failure.
    ///
    /// A request for 0 bytes allocates 1 byte but is recorded as 0.
    pub fn try_allocate_with(&self, size: usize, options: &Options) -> Option<NonNull<u8>> {
        let guard = ReentrancyGuard::enter();

        let normalized = size.max(1);
        let mut ptr = self.raw.malloc(normalized);
        if ptr.is_null() {
            let handler = *self.low_memory_handler.lock();
            if let Some(handler) = handler {
                warn_event!(size, "allocation failed, running low-memory handler before retrying");
                handler();
                ptr = self.raw.malloc(normalized);
            }
        }

        if guard.is_outermost() && self.ledger.is_on() {
            self.ledger
                .record_allocation(&guard, ptr as usize, size, options);
        }

        NonNull::new(ptr)
    }

    /// Frees `ptr`, attributed to the stashed call site if there is one.
    ///
    /// # Safety
    ///
    /// `ptr` must be null, or a live block from this tracker's raw allocator. Freeing anything else
    /// is reported, but still reaches the raw allocator.
    pub unsafe fn deallocate(&self, ptr: *mut u8) {
        self.deallocate_with(ptr, &Options::new())
    }

    /// Frees `ptr`, attributed to `file` and `line`.
    ///
    /// # Safety
    ///
    /// Same as [`deallocate`][LeakDebug::deallocate].
    pub unsafe fn deallocate_at<F>(&self, ptr: *mut u8, file: F, line: u32)
    where
        F: Into<Cow<'static, str>>,
    {
        self.deallocate_with(ptr, &Options::new().at(file, line))
    }

    /// Frees `ptr` with per-call overrides.
    ///
    /// # Safety
    ///
    /// Same as [`deallocate`][LeakDebug::deallocate].
    pub unsafe fn deallocate_with(&self, ptr: *mut u8, options: &Options) {
        let guard = ReentrancyGuard::enter();

        // Retire the record before freeing: once freed, the address may be handed out again.
        if guard.is_outermost() && self.ledger.is_on() {
            self.ledger
                .record_deallocation(&guard, ptr as usize, options);
        }

        if !ptr.is_null() {
            self.raw.free(ptr);
        }
    }
}

impl Default for LeakDebug<Libc> {
    fn default() -> Self {
        Self::libc()
    }
}
