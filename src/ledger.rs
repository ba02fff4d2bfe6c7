use std::{
    borrow::Cow,
    io,
    sync::atomic::{AtomicBool, Ordering},
};

use parking_lot::{const_mutex, Mutex};

use crate::{
    guard::ReentrancyGuard,
    record::{AllocationRecord, LeakMap, Provenance},
    sink::{Sink, Sinks},
    OutputFlags,
};

/// Per-call overrides for a tracked allocation or deallocation.
///
/// Anything left unset falls back to the ledger: the stashed provenance (or unknown), and the
/// ledger's default log/error flags.
#[derive(Clone, Debug, Default)]
pub struct Options {
    provenance: Option<Provenance>,
    log_flags: Option<OutputFlags>,
    error_flags: Option<OutputFlags>,
}

impl Options {
    /// Options that defer everything to the ledger.
    pub const fn new() -> Self {
        Self {
            provenance: None,
            log_flags: None,
            error_flags: None,
        }
    }

    /// Attributes the call to `file` and `line` instead of the stash.
    pub fn at<F>(mut self, file: F, line: u32) -> Self
    where
        F: Into<Cow<'static, str>>,
    {
        self.provenance = Some(Provenance::new(file, line));
        self
    }

    /// Attributes the call to `provenance` instead of the stash.
    pub fn provenance(mut self, provenance: Provenance) -> Self {
        self.provenance = Some(provenance);
        self
    }

    /// Flags for the log sink, for this call only.
    pub fn log_flags(mut self, flags: OutputFlags) -> Self {
        self.log_flags = Some(flags);
        self
    }

    /// Flags for the error sink, for this call only.
    pub fn error_flags(mut self, flags: OutputFlags) -> Self {
        self.error_flags = Some(flags);
        self
    }
}

struct State {
    leaks: LeakMap,
    stash: Option<Provenance>,
    sinks: Sinks,
}

impl State {
    /// Provenance for the current call. The stash is consumed whether or not it is used.
    fn resolve_origin(&mut self, options: &Options) -> Provenance {
        let stashed = self.stash.take();
        options
            .provenance
            .clone()
            .or(stashed)
            .unwrap_or_else(Provenance::unknown)
    }

    fn flags_for(&self, options: &Options) -> (OutputFlags, OutputFlags) {
        (
            options.log_flags.unwrap_or(self.sinks.log_flags),
            options.error_flags.unwrap_or(self.sinks.error_flags),
        )
    }
}

/// The allocation ledger.
///
/// Maps the address of every live tracked block to an [`AllocationRecord`], holds the one-slot
/// provenance stash, and writes event lines to a "log" and an "error" sink.
///
/// A ledger starts stopped: nothing is recorded until [`start`][Ledger::start] is called.
///
/// All state sits behind a single lock. Callers that allocate while the lock is held (growing the
/// map, formatting, sinks) do so inside a re-entrancy guard, so those allocations are never
/// tracked and never try to take the lock again.
pub struct Ledger {
    enabled: AtomicBool,
    state: Mutex<State>,
}

impl Ledger {
    /// Creates an empty, stopped ledger with the default flags (`SUCCESSES` to the log sink,
    /// `FAILURES` to the error sink) and both sinks writing to standard error.
    pub const fn new() -> Self {
        Self {
            enabled: AtomicBool::new(false),
            state: const_mutex(State {
                leaks: LeakMap::new(),
                stash: None,
                sinks: Sinks::new(),
            }),
        }
    }

    /// Starts tracking.
    pub fn start(&self) {
        self.enabled.store(true, Ordering::SeqCst);

        let _guard = ReentrancyGuard::enter();
        debug_event!("allocation tracking started");
    }

    /// Sets the default output flags, then starts tracking.
    pub fn start_with_flags(&self, log_flags: OutputFlags, error_flags: OutputFlags) {
        self.set_output_flags(log_flags, error_flags);
        self.start();
    }

    /// Stops tracking.
    ///
    /// Records already in the ledger are kept. While stopped, tracked calls pass straight through
    /// to the underlying allocator without recording or logging anything.
    pub fn stop(&self) {
        self.enabled.store(false, Ordering::SeqCst);

        let _guard = ReentrancyGuard::enter();
        debug_event!("allocation tracking stopped");
    }

    /// Whether tracking is on.
    pub fn is_on(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Sets the flags used by calls that do not override them.
    pub fn set_output_flags(&self, log_flags: OutputFlags, error_flags: OutputFlags) {
        let _guard = ReentrancyGuard::enter();
        let mut state = self.state.lock();
        state.sinks.log_flags = log_flags;
        state.sinks.error_flags = error_flags;
        debug_event!(?log_flags, ?error_flags, "default output flags changed");
    }

    /// Default `(log, error)` flags.
    pub fn output_flags(&self) -> (OutputFlags, OutputFlags) {
        let _guard = ReentrancyGuard::enter();
        let state = self.state.lock();
        (state.sinks.log_flags, state.sinks.error_flags)
    }

    /// Replaces the log sink.
    ///
    /// Sinks run while the ledger is locked, so a sink must never call back into the same ledger.
    pub fn set_log_sink<S>(&self, sink: S)
    where
        S: Sink + 'static,
    {
        let _guard = ReentrancyGuard::enter();
        self.state.lock().sinks.set_log(Box::new(sink));
    }

    /// Replaces the error sink.
    pub fn set_error_sink<S>(&self, sink: S)
    where
        S: Sink + 'static,
    {
        let _guard = ReentrancyGuard::enter();
        self.state.lock().sinks.set_error(Box::new(sink));
    }

    /// Replaces both sinks.
    pub fn set_sinks<L, E>(&self, log: L, error: E)
    where
        L: Sink + 'static,
        E: Sink + 'static,
    {
        let _guard = ReentrancyGuard::enter();
        let mut state = self.state.lock();
        state.sinks.set_log(Box::new(log));
        state.sinks.set_error(Box::new(error));
    }

    /// Remembers `file` and `line` as the origin of the next tracked call that has no explicit
    /// origin of its own.
    ///
    /// Only one origin is stashed at a time; storing again overwrites it. The stash has no expiry:
    /// it attaches to whichever tracked call comes next, from anywhere.
    pub fn store_file_line<F>(&self, file: F, line: u32)
    where
        F: Into<Cow<'static, str>>,
    {
        let _guard = ReentrancyGuard::enter();
        let provenance = Provenance::new(file, line);
        self.state.lock().stash = Some(provenance);
    }

    /// Clears the stash.
    pub fn unstore_file_line(&self) {
        let _guard = ReentrancyGuard::enter();
        let stashed = self.state.lock().stash.take();
        drop(stashed);
    }

    /// The stashed origin, if any.
    pub fn stored_file_line(&self) -> Option<Provenance> {
        let _guard = ReentrancyGuard::enter();
        let stashed = self.state.lock().stash.clone();
        stashed
    }

    /// Copies every live record.
    ///
    /// The copy is independent of the ledger. It is built inside the re-entrancy guard, so when the
    /// ledger backs the global allocator, the copy's own blocks are untracked and freeing it later
    /// is reported as a deallocation of unallocated memory.
    pub fn leaks(&self) -> LeakMap {
        let _guard = ReentrancyGuard::enter();
        let snapshot = self.state.lock().leaks.clone();
        snapshot
    }

    /// Looks up the record for `address`.
    pub fn get(&self, address: usize) -> Option<AllocationRecord> {
        let _guard = ReentrancyGuard::enter();
        let record = self.state.lock().leaks.get(&address).cloned();
        record
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        self.state.lock().leaks.len()
    }

    /// Whether no record is live.
    pub fn is_empty(&self) -> bool {
        self.state.lock().leaks.is_empty()
    }

    /// Writes one line per live record, in address order, or `No dynamic memory allocated.` when
    /// there are none.
    ///
    /// # Errors
    ///
    /// Returns the first error reported by `out`.
    pub fn dump_leaks<W>(&self, out: &mut W) -> io::Result<()>
    where
        W: io::Write + ?Sized,
    {
        let _guard = ReentrancyGuard::enter();
        let state = self.state.lock();
        if state.leaks.is_empty() {
            return writeln!(out, "No dynamic memory allocated.");
        }
        for record in state.leaks.values() {
            writeln!(out, "{}", record)?;
        }
        Ok(())
    }

    /// Records the outcome of an allocation of `size` bytes. A null `address` is a failure.
    ///
    /// Only the outermost tracked call may record anything.
    pub(crate) fn record_allocation(
        &self,
        guard: &ReentrancyGuard,
        address: usize,
        size: usize,
        options: &Options,
    ) {
        debug_assert!(guard.is_outermost());

        let mut state = self.state.lock();
        let origin = state.resolve_origin(options);
        let (log_flags, error_flags) = state.flags_for(options);

        if address == 0 {
            state.sinks.emit(
                OutputFlags::FAILED_ALLOCATIONS,
                log_flags,
                error_flags,
                format_args!("FAILED ALLOCATION of {} bytes by {}", size, origin),
            );
            return;
        }

        let record = AllocationRecord::new(address, size, origin);
        state.sinks.emit(
            OutputFlags::SUCCESSFUL_ALLOCATIONS,
            log_flags,
            error_flags,
            format_args!("{}", record),
        );
        state.leaks.insert(address, record);
    }

    /// Takes the stashed origin for a call that records several events, such as a reallocation.
    pub(crate) fn take_stored_origin(&self, guard: &ReentrancyGuard) -> Option<Provenance> {
        debug_assert!(guard.is_outermost());
        self.state.lock().stash.take()
    }

    /// Records a deallocation of `address`.
    ///
    /// Null and untracked addresses are reported, never treated as errors.
    pub(crate) fn record_deallocation(
        &self,
        guard: &ReentrancyGuard,
        address: usize,
        options: &Options,
    ) {
        debug_assert!(guard.is_outermost());

        let mut state = self.state.lock();
        let origin = state.resolve_origin(options);
        let (log_flags, error_flags) = state.flags_for(options);

        if address == 0 {
            state.sinks.emit(
                OutputFlags::DEALLOCATIONS,
                log_flags,
                error_flags,
                format_args!("Null pointer deallocated by {}", origin),
            );
            return;
        }

        match state.leaks.remove(&address) {
            Some(record) => {
                state.sinks.emit(
                    OutputFlags::DEALLOCATIONS,
                    log_flags,
                    error_flags,
                    format_args!("{} deallocated by {}", record, origin),
                );
            }
            None => {
                state.sinks.emit(
                    OutputFlags::DEALLOCATIONS,
                    log_flags,
                    error_flags,
                    format_args!(
                        "Pointer to unallocated memory at {:#x} deallocated by {}",
                        address, origin
                    ),
                );
            }
        }
    }
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}
