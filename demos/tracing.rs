use leak_debug::{debug_delete, debug_new, LeakDebug, OutputFlags, TracingSink};
use tracing::Level;

fn main() {
    // Configure tracing to print everything the ledger emits, including its own diagnostics.
    tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .init();

    // A tracker over the C library allocator, for code that manages raw blocks itself.
    let debug = LeakDebug::libc();
    let ledger = debug.ledger();

    // Route both sinks into tracing: the log sink at INFO, the error sink at WARN.
    ledger.set_sinks(TracingSink::log(), TracingSink::error());
    ledger.start_with_flags(OutputFlags::SUCCESSES, OutputFlags::FAILURES);

    let kept = debug_new!(debug, 128).expect("allocation failed");
    let freed = debug_new!(debug, 64).expect("allocation failed");
    unsafe { debug_delete!(debug, freed.as_ptr()) };

    // Freeing a null pointer is a reported no-op.
    unsafe { debug_delete!(debug, std::ptr::null_mut()) };

    for record in ledger.leaks().values() {
        tracing::info!(address = record.address(), size = record.size(), "still live: {}", record);
    }

    ledger.stop();
    unsafe { debug.deallocate(kept.as_ptr()) };
}
