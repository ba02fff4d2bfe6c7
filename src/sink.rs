use std::{
    fmt,
    io::{self, Write},
    sync::Arc,
};

use parking_lot::Mutex;

use crate::{guard::untracked, OutputFlags};

/// Destination for formatted event lines.
///
/// A sink receives whole lines without a trailing newline. Writing must never fail loudly: the
/// ledger is a debugging aid, so a sink that cannot write simply drops the line.
pub trait Sink: Send {
    /// Writes one event line.
    fn write_line(&mut self, line: fmt::Arguments<'_>);
}

impl<W> Sink for W
where
    W: Write + Send,
{
    fn write_line(&mut self, line: fmt::Arguments<'_>) {
        let _ = self.write_fmt(line).and_then(|_| self.write_all(b"\n"));
    }
}

/// A sink that keeps every line in memory.
///
/// Clones share the same buffer, so one clone can be handed to a ledger while another is kept for
/// reading the lines back.
///
/// The buffer is only ever touched untracked. With [`Allocator`][crate::Allocator] installed, the
/// lines it hands out are therefore unknown to the ledger, and freeing them is reported as a
/// deallocation of unallocated memory.
#[derive(Clone, Default)]
pub struct SharedBuffer {
    lines: Arc<Mutex<Vec<String>>>,
}

impl SharedBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies out every line written so far.
    pub fn lines(&self) -> Vec<String> {
        untracked(|| self.lines.lock().clone())
    }

    /// Removes and returns every line written so far.
    pub fn take(&self) -> Vec<String> {
        untracked(|| std::mem::take(&mut *self.lines.lock()))
    }

    /// Discards every line written so far.
    pub fn clear(&self) {
        untracked(|| self.lines.lock().clear());
    }
}

impl fmt::Debug for SharedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let len = untracked(|| self.lines.lock().len());
        f.debug_struct("SharedBuffer").field("lines", &len).finish()
    }
}

// Not `Write`: the blanket impl above would conflict, and lines are the unit here anyway.
impl Sink for SharedBuffer {
    fn write_line(&mut self, line: fmt::Arguments<'_>) {
        untracked(|| {
            let line = line.to_string();
            self.lines.lock().push(line);
        });
    }
}

/// The "log" and "error" sinks, each with its own default flags.
pub(crate) struct Sinks {
    log: Option<Box<dyn Sink>>,
    error: Option<Box<dyn Sink>>,
    pub(crate) log_flags: OutputFlags,
    pub(crate) error_flags: OutputFlags,
}

impl Sinks {
    pub(crate) const fn new() -> Self {
        Self {
            log: None,
            error: None,
            log_flags: OutputFlags::SUCCESSES,
            error_flags: OutputFlags::FAILURES,
        }
    }

    pub(crate) fn set_log(&mut self, sink: Box<dyn Sink>) {
        self.log = Some(sink);
    }

    pub(crate) fn set_error(&mut self, sink: Box<dyn Sink>) {
        self.error = Some(sink);
    }

    /// Writes `line` to every sink whose flags intersect `category`.
    ///
    /// Sinks that were never configured write to standard error, like `clog` and `cerr` do.
    pub(crate) fn emit(
        &mut self,
        category: OutputFlags,
        log_flags: OutputFlags,
        error_flags: OutputFlags,
        line: fmt::Arguments<'_>,
    ) {
        if log_flags.intersects(category) {
            write_to(&mut self.log, line);
        }
        if error_flags.intersects(category) {
            write_to(&mut self.error, line);
        }
    }
}

fn write_to(sink: &mut Option<Box<dyn Sink>>, line: fmt::Arguments<'_>) {
    match sink {
        Some(sink) => sink.write_line(line),
        None => {
            let _ = writeln!(io::stderr().lock(), "{}", line);
        }
    }
}
