use leak_debug::{store_file_line, Allocator, OutputFlags};

use std::io;

// This is where we actually set the global allocator to be the ledger-backed allocator from
// `leak_debug`. It wraps the system allocator, which still does all of the real work; the ledger
// only watches.
#[global_allocator]
static GLOBAL: Allocator = Allocator::system();

fn main() {
    let ledger = GLOBAL.ledger();

    // Log every event to standard output. Failures would also go to standard error, which is where
    // both sinks point until they are replaced.
    ledger.set_log_sink(io::stdout());

    // Nothing is recorded until tracking starts.
    ledger.start_with_flags(OutputFlags::ALL, OutputFlags::FAILURES);

    // Rust allocations have no call site of their own, so we stash one right before the allocation
    // we care about. The stash is consumed by the very next tracked allocation or deallocation.
    store_file_line!(ledger);
    let kept = String::from("Hello world!");

    let mut v = Vec::with_capacity(4);
    v.push(1u32);

    // Dropping the vector frees its buffer, which retires its record.
    drop(v);

    // Stop tracking before dumping, so the dump itself isn't logged.
    ledger.stop();

    // We should see a single record left over: the string, attributed to this file.
    let _ = ledger.dump_leaks(&mut io::stdout());

    drop(kept);
}
