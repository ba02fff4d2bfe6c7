use std::ptr::NonNull;

use leak_debug::{
    debug_delete, debug_new, store_file_line, AllocationRecord, LeakDebug, Libc, Options,
    OutputFlags, Provenance, RawAllocator, SharedBuffer,
};

const DATA_SIZE: usize = 12;

/// Hands out real blocks but never frees them, so a test can free the same address twice.
struct NeverFrees;

unsafe impl RawAllocator for NeverFrees {
    fn malloc(&self, size: usize) -> *mut u8 {
        Libc.malloc(size)
    }

    unsafe fn free(&self, _ptr: *mut u8) {}
}

struct Fixture<R> {
    debug: LeakDebug<R>,
    log: SharedBuffer,
    error: SharedBuffer,
}

fn fixture<R>(raw: R) -> Fixture<R> {
    let debug = LeakDebug::from_raw(raw);
    let log = SharedBuffer::new();
    let error = SharedBuffer::new();
    debug.ledger().set_sinks(log.clone(), error.clone());
    debug.ledger().start();
    Fixture { debug, log, error }
}

fn addr(ptr: NonNull<u8>) -> usize {
    ptr.as_ptr() as usize
}

#[test]
fn not_tracking_until_started() {
    let debug = LeakDebug::libc();
    assert!(!debug.ledger().is_on());

    let ptr = debug.allocate(DATA_SIZE).expect("allocation");
    assert!(debug.ledger().leaks().is_empty());
    unsafe { debug.deallocate(ptr.as_ptr()) };

    debug.ledger().start();
    assert!(debug.ledger().is_on());
    debug.ledger().stop();
    assert!(!debug.ledger().is_on());
}

#[test]
fn track_one_with_line() {
    let f = fixture(Libc);

    let ptr = f
        .debug
        .allocate_at(DATA_SIZE, "a.cpp", 10)
        .expect("allocation");
    let leaks = f.debug.ledger().leaks();
    assert_eq!(leaks.len(), 1);
    assert_eq!(
        leaks[&addr(ptr)],
        AllocationRecord::new(addr(ptr), DATA_SIZE, Provenance::new("a.cpp", 10))
    );

    unsafe { f.debug.deallocate_at(ptr.as_ptr(), "a.cpp", 20) };
    assert!(f.debug.ledger().leaks().is_empty());

    let log = f.log.lines();
    assert_eq!(log.len(), 2);
    assert_eq!(
        log[0],
        format!("12 bytes at {:#x} allocated by a.cpp(10)", addr(ptr))
    );
    assert_eq!(
        log[1],
        format!(
            "12 bytes at {:#x} allocated by a.cpp(10) deallocated by a.cpp(20)",
            addr(ptr)
        )
    );
    assert!(f.error.lines().is_empty());
}

#[test]
fn track_two_without_line() {
    let f = fixture(Libc);

    let first = f.debug.allocate(DATA_SIZE).expect("allocation");
    let second = f.debug.allocate(DATA_SIZE).expect("allocation");
    assert_ne!(first, second);

    let leaks = f.debug.ledger().leaks();
    assert_eq!(leaks.len(), 2);
    for ptr in [first, second].iter() {
        let record = &leaks[&addr(*ptr)];
        assert_eq!(record.size(), DATA_SIZE);
        assert_eq!(record.origin_file(), "");
        assert_eq!(record.origin_line(), 0);
    }

    unsafe { f.debug.deallocate(first.as_ptr()) };
    let leaks = f.debug.ledger().leaks();
    assert_eq!(leaks.len(), 1);
    assert!(!leaks.contains_key(&addr(first)));
    assert!(leaks.contains_key(&addr(second)));

    unsafe { f.debug.deallocate(second.as_ptr()) };
    assert!(f.debug.ledger().leaks().is_empty());
}

#[test]
fn allocations_are_all_tracked_until_freed() {
    let f = fixture(Libc);

    let sizes = [1usize, 7, 64, 0, 4096, 3];
    let ptrs: Vec<NonNull<u8>> = sizes
        .iter()
        .enumerate()
        .map(|(i, size)| {
            f.debug
                .allocate_at(*size, "many.rs", i as u32)
                .expect("allocation")
        })
        .collect();

    let leaks = f.debug.ledger().leaks();
    assert_eq!(leaks.len(), sizes.len());
    for (i, (ptr, size)) in ptrs.iter().zip(sizes.iter()).enumerate() {
        let record = &leaks[&addr(*ptr)];
        assert_eq!(record.size(), *size);
        assert_eq!(record.origin(), Provenance::new("many.rs", i as u32));
    }

    for ptr in ptrs {
        unsafe { f.debug.deallocate(ptr.as_ptr()) };
    }
    assert!(f.debug.ledger().is_empty());
}

#[test]
fn double_free_is_reported_not_raised() {
    let f = fixture(NeverFrees);

    let ptr = f.debug.allocate(DATA_SIZE).expect("allocation");
    unsafe { f.debug.deallocate(ptr.as_ptr()) };
    assert!(f.debug.ledger().leaks().is_empty());

    f.log.clear();
    unsafe { f.debug.deallocate(ptr.as_ptr()) };
    assert!(f.debug.ledger().leaks().is_empty());
    assert_eq!(
        f.log.lines(),
        vec![format!(
            "Pointer to unallocated memory at {:#x} deallocated by unknown",
            addr(ptr)
        )]
    );
}

#[test]
fn null_deallocation_is_a_logged_no_op() {
    let f = fixture(Libc);

    let ptr = f.debug.allocate(DATA_SIZE).expect("allocation");
    unsafe { f.debug.deallocate_at(std::ptr::null_mut(), "null.rs", 5) };
    assert_eq!(f.debug.ledger().len(), 1);
    assert_eq!(
        f.log.lines().last().map(String::as_str),
        Some("Null pointer deallocated by null.rs(5)")
    );

    unsafe { f.debug.deallocate(ptr.as_ptr()) };
}

#[test]
fn unknown_pointer_is_freed_and_reported_once() {
    let f = fixture(Libc);
    f.debug
        .ledger()
        .set_output_flags(OutputFlags::NONE, OutputFlags::DEALLOCATIONS);

    // Allocated while stopped, so the ledger never saw it.
    f.debug.ledger().stop();
    let ptr = f.debug.allocate(DATA_SIZE).expect("allocation");
    f.debug.ledger().start();

    unsafe { f.debug.deallocate(ptr.as_ptr()) };
    assert!(f.debug.ledger().leaks().is_empty());
    assert!(f.log.lines().is_empty());

    let error = f.error.lines();
    assert_eq!(error.len(), 1);
    assert!(error[0].contains("unallocated"));
}

#[test]
fn allocate_then_free_restores_empty_ledger() {
    let f = fixture(Libc);
    for size in 0..16 {
        let ptr = f.debug.allocate(size).expect("allocation");
        unsafe { f.debug.deallocate(ptr.as_ptr()) };
        assert!(f.debug.ledger().is_empty());
    }
}

#[test]
fn stored_line_is_consumed_by_next_call() {
    let f = fixture(Libc);
    let ledger = f.debug.ledger();

    ledger.store_file_line("stored.rs", 42);
    let tagged = f.debug.allocate(DATA_SIZE).expect("allocation");
    assert_eq!(ledger.stored_file_line(), None);
    let untagged = f.debug.allocate(DATA_SIZE).expect("allocation");

    let leaks = ledger.leaks();
    assert_eq!(leaks[&addr(tagged)].origin(), Provenance::new("stored.rs", 42));
    assert_eq!(leaks[&addr(untagged)].origin(), Provenance::unknown());

    ledger.store_file_line("stored.rs", 50);
    unsafe { f.debug.deallocate(tagged.as_ptr()) };
    assert_eq!(ledger.stored_file_line(), None);
    let last = f.log.lines().pop().unwrap_or_default();
    assert!(last.ends_with("deallocated by stored.rs(50)"));

    unsafe { f.debug.deallocate(untagged.as_ptr()) };
}

#[test]
fn stale_stash_attaches_to_whatever_comes_next() {
    let f = fixture(Libc);
    let ledger = f.debug.ledger();

    ledger.store_file_line("meant_for_later.rs", 1);
    let unrelated = f.debug.allocate(1).expect("allocation");
    assert_eq!(
        ledger.get(addr(unrelated)).map(|r| r.origin()),
        Some(Provenance::new("meant_for_later.rs", 1))
    );
    unsafe { f.debug.deallocate(unrelated.as_ptr()) };
}

#[test]
fn macros_capture_the_call_site() {
    let f = fixture(Libc);

    let line = line!() + 1;
    let ptr = debug_new!(f.debug, DATA_SIZE).expect("allocation");
    let record = f.debug.ledger().get(addr(ptr)).expect("tracked");
    assert_eq!(record.origin_file(), file!());
    assert_eq!(record.origin_line(), line);

    let line = line!() + 1;
    store_file_line!(f.debug.ledger());
    assert_eq!(
        f.debug.ledger().stored_file_line(),
        Some(Provenance::new(file!(), line))
    );
    f.debug.ledger().unstore_file_line();

    let line = line!() + 1;
    unsafe { debug_delete!(f.debug, ptr.as_ptr()) };
    let expected = format!("deallocated by {}({})", file!(), line);
    assert!(f.log.lines().last().map_or(false, |l| l.ends_with(&expected)));
}

#[test]
fn per_call_flags_silence_a_single_call() {
    let f = fixture(Libc);

    let quiet = Options::new()
        .log_flags(OutputFlags::NONE)
        .error_flags(OutputFlags::NONE);
    let ptr = f.debug.allocate_with(DATA_SIZE, &quiet).expect("allocation");
    assert_eq!(f.debug.ledger().len(), 1);
    assert!(f.log.lines().is_empty());

    unsafe { f.debug.deallocate(ptr.as_ptr()) };
    assert_eq!(f.log.lines().len(), 1);
}

#[test]
fn dump_on_empty_ledger_writes_one_line() {
    let f = fixture(Libc);
    let mut out = Vec::new();
    f.debug.ledger().dump_leaks(&mut out).expect("dump");
    assert_eq!(
        String::from_utf8(out).expect("utf-8"),
        "No dynamic memory allocated.\n"
    );
}

#[test]
fn dump_lists_every_live_record() {
    let f = fixture(Libc);
    let first = f.debug.allocate_at(4, "dump.rs", 1).expect("allocation");
    let second = f.debug.allocate(8).expect("allocation");

    let mut out = Vec::new();
    f.debug.ledger().dump_leaks(&mut out).expect("dump");
    let dump = String::from_utf8(out).expect("utf-8");
    let lines: Vec<&str> = dump.lines().collect();
    assert_eq!(lines.len(), 2);
    let first_line = format!("4 bytes at {:#x} allocated by dump.rs(1)", addr(first));
    let second_line = format!("8 bytes at {:#x} allocated by unknown", addr(second));
    assert!(lines.contains(&first_line.as_str()));
    assert!(lines.contains(&second_line.as_str()));

    unsafe {
        f.debug.deallocate(first.as_ptr());
        f.debug.deallocate(second.as_ptr());
    }
}
