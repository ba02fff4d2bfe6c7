use std::alloc::{GlobalAlloc, Layout, System};

use crate::{
    guard::ReentrancyGuard,
    ledger::{Ledger, Options},
};

/// Ledger-backed global allocator.
///
/// This allocator must be installed via `#[global_allocator]` in order to take effect. Every heap
/// allocation the program makes then passes through it: the wrapped allocator does the work, and
/// the outermost call on each thread records the result in [`ledger`][Allocator::ledger] while
/// tracking is on.
///
/// Rust allocations carry no call site, so records made here take their provenance from the
/// ledger's stash (see [`store_file_line!`][crate::store_file_line]) or are marked unknown.
///
/// A failed allocation is logged and the null pointer handed back unchanged, so the program reacts
/// to exhaustion exactly as it would without the tracker.
pub struct Allocator<A = System> {
    inner: A,
    ledger: Ledger,
}

impl Allocator<System> {
    /// Wraps the system allocator.
    pub const fn system() -> Self {
        Self::from_allocator(System)
    }
}

impl<A> Allocator<A> {
    /// Wraps `allocator`.
    pub const fn from_allocator(allocator: A) -> Self {
        Self {
            inner: allocator,
            ledger: Ledger::new(),
        }
    }

    /// The ledger every allocation is recorded into.
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    #[inline(always)]
    fn is_tracking(&self, guard: &ReentrancyGuard) -> bool {
        guard.is_outermost() && self.ledger.is_on()
    }

    #[inline(always)]
    fn track_allocation(&self, guard: &ReentrancyGuard, ptr: *mut u8, size: usize) {
        if self.is_tracking(guard) {
            self.ledger
                .record_allocation(guard, ptr as usize, size, &Options::new());
        }
    }

    #[inline(always)]
    fn track_deallocation(&self, guard: &ReentrancyGuard, ptr: *mut u8) {
        if self.is_tracking(guard) {
            self.ledger
                .record_deallocation(guard, ptr as usize, &Options::new());
        }
    }
}

unsafe impl<A> GlobalAlloc for Allocator<A>
where
    A: GlobalAlloc,
{
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let guard = ReentrancyGuard::enter();
        let ptr = self.inner.alloc(layout);
        self.track_allocation(&guard, ptr, layout.size());
        ptr
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let guard = ReentrancyGuard::enter();
        let ptr = self.inner.alloc_zeroed(layout);
        self.track_allocation(&guard, ptr, layout.size());
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        let guard = ReentrancyGuard::enter();
        self.track_deallocation(&guard, ptr);
        self.inner.dealloc(ptr, layout);
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let guard = ReentrancyGuard::enter();
        if !self.is_tracking(&guard) {
            return self.inner.realloc(ptr, layout, new_size);
        }

        // Tracked as allocate, copy, free: the old block stays live until its record is retired,
        // so its address cannot be handed to another thread while the record still exists.
        let origin = self.ledger.take_stored_origin(&guard);
        let options = match origin {
            Some(origin) => Options::new().provenance(origin),
            None => Options::new(),
        };

        let new_layout = Layout::from_size_align_unchecked(new_size, layout.align());
        let new_ptr = self.inner.alloc(new_layout);
        self.ledger
            .record_allocation(&guard, new_ptr as usize, new_size, &options);

        // On failure the old block is untouched and keeps its record.
        if !new_ptr.is_null() {
            std::ptr::copy_nonoverlapping(ptr, new_ptr, layout.size().min(new_size));
            self.ledger
                .record_deallocation(&guard, ptr as usize, &options);
            self.inner.dealloc(ptr, layout);
        }
        new_ptr
    }
}
