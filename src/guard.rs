use std::{cell::Cell, marker::PhantomData};

thread_local! {
    // How many tracked allocate/deallocate calls are currently on this thread's stack.
    //
    // Only the outermost call (depth 1) may touch a ledger. Anything deeper was caused by the
    // ledger itself (growing its map, formatting a line, a sink writing) and must pass straight
    // through, or tracking the tracker recurses forever.
    static DEPTH: Cell<usize> = const { Cell::new(0) };
}

pub(crate) type PhantomNotSend = PhantomData<*const ()>;

/// Scoped re-entrancy guard.
///
/// Entering bumps the per-thread depth, dropping the guard restores it, on every exit path.
pub(crate) struct ReentrancyGuard {
    outermost: bool,
    entered: bool,
    _ns: PhantomNotSend,
}

impl ReentrancyGuard {
    pub(crate) fn enter() -> Self {
        // If thread-local storage is already gone (thread teardown), treat the call as nested so
        // it is never tracked.
        let depth = DEPTH
            .try_with(|depth| {
                let next = depth.get() + 1;
                depth.set(next);
                next
            })
            .ok();

        Self {
            outermost: depth == Some(1),
            entered: depth.is_some(),
            _ns: PhantomData,
        }
    }

    /// Whether this is the outermost tracked call on the current thread.
    pub(crate) fn is_outermost(&self) -> bool {
        self.outermost
    }
}

impl Drop for ReentrancyGuard {
    fn drop(&mut self) {
        if self.entered {
            let _ = DEPTH.try_with(|depth| depth.set(depth.get() - 1));
        }
    }
}

/// Current re-entrancy depth of the calling thread.
#[cfg(test)]
pub(crate) fn depth() -> usize {
    DEPTH.try_with(Cell::get).unwrap_or(0)
}

/// Runs `f` without tracking any allocation or deallocation it makes on this thread.
///
/// Blocks allocated inside `f` never enter a ledger, so freeing them later from tracked code is
/// reported as a deallocation of unallocated memory.
pub fn untracked<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    let _guard = ReentrancyGuard::enter();
    f()
}
