use std::fmt;

use tracing::Level;

use crate::Sink;

/// A sink that turns event lines into `tracing` events under the `leak_debug` target.
///
/// The line is carried in the event's message. Events are emitted inside the ledger's re-entrancy
/// guard, so whatever the installed subscriber allocates while recording them is never tracked.
#[derive(Clone, Copy, Debug)]
pub struct TracingSink {
    level: Level,
}

impl TracingSink {
    /// Emits every line at `level`.
    pub const fn new(level: Level) -> Self {
        Self { level }
    }

    /// The usual stand-in for the log sink: `INFO`.
    pub const fn log() -> Self {
        Self::new(Level::INFO)
    }

    /// The usual stand-in for the error sink: `WARN`.
    pub const fn error() -> Self {
        Self::new(Level::WARN)
    }

    /// Level lines are emitted at.
    pub fn level(&self) -> Level {
        self.level
    }
}

impl Sink for TracingSink {
    fn write_line(&mut self, line: fmt::Arguments<'_>) {
        // `event!` needs the level at compile time.
        if self.level == Level::ERROR {
            tracing::error!(target: "leak_debug", "{}", line);
        } else if self.level == Level::WARN {
            tracing::warn!(target: "leak_debug", "{}", line);
        } else if self.level == Level::INFO {
            tracing::info!(target: "leak_debug", "{}", line);
        } else if self.level == Level::DEBUG {
            tracing::debug!(target: "leak_debug", "{}", line);
        } else {
            tracing::trace!(target: "leak_debug", "{}", line);
        }
    }
}
