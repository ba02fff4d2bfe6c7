use std::{fmt, ops};

/// Which events are written to a sink.
///
/// Every event belongs to exactly one category (`FAILED_ALLOCATIONS`, `SUCCESSFUL_ALLOCATIONS`
/// or `DEALLOCATIONS`), and a sink receives it iff the sink's flags intersect that category.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct OutputFlags {
    bits: u8,
}

impl OutputFlags {
    /// Nothing is written.
    pub const NONE: Self = Self { bits: 0 };

    /// Allocations the platform allocator could not satisfy.
    pub const FAILED_ALLOCATIONS: Self = Self { bits: 1 << 0 };

    /// Allocations that succeeded and are now tracked.
    pub const SUCCESSFUL_ALLOCATIONS: Self = Self { bits: 1 << 1 };

    /// Every deallocation, including null and unknown pointers.
    pub const DEALLOCATIONS: Self = Self { bits: 1 << 2 };

    /// Failed and successful allocations.
    pub const ALLOCATIONS: Self = Self::FAILED_ALLOCATIONS.with(Self::SUCCESSFUL_ALLOCATIONS);

    /// Successful allocations and deallocations. Default for the log sink.
    pub const SUCCESSES: Self = Self::SUCCESSFUL_ALLOCATIONS.with(Self::DEALLOCATIONS);

    /// Failed allocations. Default for the error sink.
    pub const FAILURES: Self = Self::FAILED_ALLOCATIONS;

    /// Every event.
    pub const ALL: Self = Self::SUCCESSES.with(Self::FAILURES);

    /// Raw bits.
    pub const fn bits(self) -> u8 {
        self.bits
    }

    /// Builds flags from raw bits, dropping bits that name no category.
    pub const fn from_bits_truncate(bits: u8) -> Self {
        Self {
            bits: bits & Self::ALL.bits,
        }
    }

    /// Whether no flag is set.
    pub const fn is_empty(self) -> bool {
        self.bits == 0
    }

    /// Whether every flag in `other` is set in `self`.
    pub const fn contains(self, other: Self) -> bool {
        self.bits & other.bits == other.bits
    }

    /// Whether any flag in `other` is set in `self`.
    pub const fn intersects(self, other: Self) -> bool {
        self.bits & other.bits != 0
    }

    /// `self` with the flags in `other` added.
    #[must_use]
    pub const fn with(self, other: Self) -> Self {
        Self {
            bits: self.bits | other.bits,
        }
    }
}

impl ops::BitOr for OutputFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.with(rhs)
    }
}

impl ops::BitOrAssign for OutputFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.bits |= rhs.bits;
    }
}

impl ops::BitAnd for OutputFlags {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self {
            bits: self.bits & rhs.bits,
        }
    }
}

impl fmt::Debug for OutputFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(OutputFlags, &str); 3] = [
            (OutputFlags::FAILED_ALLOCATIONS, "FAILED_ALLOCATIONS"),
            (OutputFlags::SUCCESSFUL_ALLOCATIONS, "SUCCESSFUL_ALLOCATIONS"),
            (OutputFlags::DEALLOCATIONS, "DEALLOCATIONS"),
        ];

        if self.is_empty() {
            return f.write_str("NONE");
        }

        let mut first = true;
        for (flag, name) in NAMES.iter() {
            if self.contains(*flag) {
                if !first {
                    f.write_str(" | ")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}
