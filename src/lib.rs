//! # leak-debug
//!
//! This crate keeps a ledger of every live heap block a program hands out: where it is, how big it
//! is, and which file and line asked for it. At any point the ledger can be copied out or dumped,
//! and whatever is still in it is, by definition, not yet freed.
//!
//! ## high-level usage
//!
//! `leak-debug` has three main components:
//! - [`Ledger`], the address-to-[`AllocationRecord`] map, with its provenance stash, on/off switch
//!   and the two sinks ("log" and "error") event lines are written to
//! - [`LeakDebug`], tracked allocate/deallocate entry points over a `malloc`/`free`-style
//!   [`RawAllocator`], for code that manages raw blocks by hand
//! - [`Allocator`], a [`GlobalAlloc`][global_alloc]-compatible allocator that feeds every Rust heap
//!   allocation through a ledger
//!
//! Tracking is off until [`Ledger::start`] is called, and can be stopped again at any time; while
//! stopped, every call passes straight through to the underlying allocator.
//!
//! ## provenance
//!
//! A call site can be passed explicitly ([`LeakDebug::allocate_at`], [`debug_new!`]), or stashed
//! ahead of a call that cannot carry one ([`Ledger::store_file_line`], [`store_file_line!`]). The
//! stash holds a single call site and is consumed by the next tracked call, whichever it is.
//!
//! ## event lines
//!
//! Each event is one line, written to every sink whose [`OutputFlags`] include the event's
//! category. A live allocation reads `<size> bytes at <address> allocated by <file>(<line>)`, with
//! `unknown` standing in for a missing call site.
//!
//! ## re-entrancy
//!
//! The ledger allocates too: its map grows, lines get formatted, sinks write. Every tracked call
//! bumps a per-thread depth counter for its duration, and only the outermost call on a thread
//! touches the ledger. Everything deeper passes straight through untracked, which is what keeps an
//! installed [`Allocator`] from recursing into itself.
//!
//! [global_alloc]: std::alloc::GlobalAlloc
#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::cargo)]

// Internal diagnostics, compiled out without `tracing-compat`.
macro_rules! debug_event {
    ($($arg:tt)*) => {
        #[cfg(feature = "tracing-compat")]
        ::tracing::debug!(target: "leak_debug", $($arg)*);
    };
}

macro_rules! warn_event {
    ($($arg:tt)*) => {
        #[cfg(feature = "tracing-compat")]
        ::tracing::warn!(target: "leak_debug", $($arg)*);
    };
}

mod allocator;
mod debug;
mod flags;
mod guard;
mod ledger;
mod platform;
mod record;
mod sink;
#[cfg(feature = "tracing-compat")]
mod tracing;

pub use crate::allocator::Allocator;
pub use crate::debug::LeakDebug;
pub use crate::flags::OutputFlags;
pub use crate::guard::untracked;
pub use crate::ledger::{Ledger, Options};
pub use crate::platform::{Libc, LowMemoryHandler, RawAllocator};
pub use crate::record::{AllocationRecord, LeakMap, Provenance};
pub use crate::sink::{SharedBuffer, Sink};
#[cfg(feature = "tracing-compat")]
#[cfg_attr(docsrs, doc(cfg(feature = "tracing-compat")))]
pub use crate::tracing::TracingSink;

/// Errors surfaced by tracked allocation.
///
/// Only allocation can fail. Null, unknown and double deallocations are reported to the sinks
/// instead.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The raw allocator could not provide the block, even after the low-memory handler ran.
    #[error("failed to allocate {size} bytes")]
    OutOfMemory {
        /// Requested size, in bytes.
        size: usize,
    },
}

/// Result type for tracked allocation.
pub type Result<T> = std::result::Result<T, Error>;

/// Stashes the current file and line in a [`Ledger`] as the origin of its next tracked call.
///
/// ```
/// let ledger = leak_debug::Ledger::new();
/// leak_debug::store_file_line!(ledger);
/// assert!(ledger.stored_file_line().is_some());
/// ```
#[macro_export]
macro_rules! store_file_line {
    ($ledger:expr) => {
        $ledger.store_file_line(::core::file!(), ::core::line!())
    };
}

/// Allocates through a [`LeakDebug`], attributed to the current file and line.
///
/// Expands to a call to [`LeakDebug::allocate_at`].
#[macro_export]
macro_rules! debug_new {
    ($debug:expr, $size:expr) => {
        $debug.allocate_at($size, ::core::file!(), ::core::line!())
    };
}

/// Frees through a [`LeakDebug`], attributed to the current file and line.
///
/// Expands to a call to [`LeakDebug::deallocate_at`], so it must be used inside `unsafe`.
#[macro_export]
macro_rules! debug_delete {
    ($debug:expr, $ptr:expr) => {
        $debug.deallocate_at($ptr, ::core::file!(), ::core::line!())
    };
}
