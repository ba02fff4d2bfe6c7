use std::{borrow::Cow, collections::BTreeMap, fmt};

/// Snapshot of tracked allocations, keyed by address.
pub type LeakMap = BTreeMap<usize, AllocationRecord>;

/// Where an allocation or deallocation request came from.
///
/// An empty file name means "unknown", and a line of 0 means the line was never set.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Provenance {
    file: Cow<'static, str>,
    line: u32,
}

impl Provenance {
    /// Creates a new `Provenance` for the given file and line.
    pub fn new<F>(file: F, line: u32) -> Self
    where
        F: Into<Cow<'static, str>>,
    {
        Self {
            file: file.into(),
            line,
        }
    }

    /// Provenance that identifies nothing: empty file, line 0.
    pub const fn unknown() -> Self {
        Self {
            file: Cow::Borrowed(""),
            line: 0,
        }
    }

    /// The file name, or an empty string if unknown.
    pub fn file(&self) -> &str {
        &self.file
    }

    /// The line number, or 0 if unknown.
    pub fn line(&self) -> u32 {
        self.line
    }

    /// Whether a file name is present.
    pub fn is_known(&self) -> bool {
        !self.file.is_empty()
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_known() {
            write!(f, "{}({})", self.file, self.line)
        } else {
            f.write_str("unknown")
        }
    }
}

/// A single live, tracked allocation.
///
/// The address is only an identity: the record never owns or reads through it.
///
/// Records are ordered by address, then size, then origin file (bytewise), then origin line,
/// which is exactly the field order below, so the derived comparisons give the total order.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AllocationRecord {
    address: usize,
    size: usize,
    origin_file: Cow<'static, str>,
    origin_line: u32,
}

impl AllocationRecord {
    /// Creates a record for `size` bytes at `address`, requested from `origin`.
    pub fn new(address: usize, size: usize, origin: Provenance) -> Self {
        Self {
            address,
            size,
            origin_file: origin.file,
            origin_line: origin.line,
        }
    }

    /// Address of the allocated block.
    pub fn address(&self) -> usize {
        self.address
    }

    /// Requested size of the block, in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// File that requested the allocation, or an empty string if unknown.
    pub fn origin_file(&self) -> &str {
        &self.origin_file
    }

    /// Line that requested the allocation, or 0 if unknown.
    pub fn origin_line(&self) -> u32 {
        self.origin_line
    }

    /// The `(file, line)` pair as a [`Provenance`].
    pub fn origin(&self) -> Provenance {
        Provenance {
            file: self.origin_file.clone(),
            line: self.origin_line,
        }
    }
}

/// Formats as `<size> bytes at <address> allocated by <file>(<line>)`, with `unknown` in place of
/// the call site when no file was recorded.
impl fmt::Display for AllocationRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} bytes at {:#x} allocated by ", self.size, self.address)?;
        if self.origin_file.is_empty() {
            f.write_str("unknown")
        } else {
            write!(f, "{}({})", self.origin_file, self.origin_line)
        }
    }
}
