//! Build log sinks.
//!
//! The compiler reports warnings and errors through a [`Logger`] so that embedders
//! can route them wherever they like. Internal progress is traced with `tracing`
//! regardless of which sink is installed.

use std::fmt;

pub trait Logger: Send + Sync {
    fn debug(&self, message: fmt::Arguments<'_>);
    fn info(&self, message: fmt::Arguments<'_>);
    fn warn(&self, message: fmt::Arguments<'_>);
    fn error(&self, message: fmt::Arguments<'_>);
}

/// Discards everything. The default sink.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullLogger;

impl Logger for NullLogger {
    fn debug(&self, _message: fmt::Arguments<'_>) {}
    fn info(&self, _message: fmt::Arguments<'_>) {}
    fn warn(&self, _message: fmt::Arguments<'_>) {}
    fn error(&self, _message: fmt::Arguments<'_>) {}
}

/// Forwards to the `tracing` subscriber under the `scriptc::build` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn debug(&self, message: fmt::Arguments<'_>) {
        tracing::debug!(target: "scriptc::build", "{}", message);
    }

    fn info(&self, message: fmt::Arguments<'_>) {
        tracing::info!(target: "scriptc::build", "{}", message);
    }

    fn warn(&self, message: fmt::Arguments<'_>) {
        tracing::warn!(target: "scriptc::build", "{}", message);
    }

    fn error(&self, message: fmt::Arguments<'_>) {
        tracing::error!(target: "scriptc::build", "{}", message);
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::Logger;
    use parking_lot::Mutex;
    use std::fmt;

    /// Captures warnings and errors for assertions.
    #[derive(Default)]
    pub struct MemoryLogger {
        pub lines: Mutex<Vec<String>>,
    }

    impl MemoryLogger {
        pub fn errors(&self) -> Vec<String> {
            self.lines
                .lock()
                .iter()
                .filter_map(|l| l.strip_prefix("error: ").map(str::to_string))
                .collect()
        }
    }

    impl Logger for MemoryLogger {
        fn debug(&self, _message: fmt::Arguments<'_>) {}
        fn info(&self, _message: fmt::Arguments<'_>) {}
        fn warn(&self, message: fmt::Arguments<'_>) {
            self.lines.lock().push(format!("warn: {}", message));
        }
        fn error(&self, message: fmt::Arguments<'_>) {
            self.lines.lock().push(format!("error: {}", message));
        }
    }
}
