//! Reporter trait for dependency injection
//!
//! This trait allows core logic to report progress and status without
//! being coupled to a specific TUI or GUI implementation.

pub trait Reporter: Send + Sync {
    /// Indicates a new section or phase has started (e.g. "Fetching", "Syncing").
    fn section(&self, title: &str);

    /// Updates the progress of a download.
    fn downloading(&self, name: &str, current: u64, total: Option<u64>);

    /// Marks an item as being written into the store or the desktop.
    fn storing(&self, name: &str);

    /// Marks an item as successfully completed.
    fn done(&self, name: &str, detail: &str);

    /// Marks an item as failed with a specific reason.
    fn failed(&self, name: &str, reason: &str);

    /// Log an informational message.
    fn info(&self, msg: &str);

    /// Log a success message.
    fn success(&self, msg: &str);

    /// Log a warning message.
    fn warning(&self, msg: &str);

    /// Log an error message.
    fn error(&self, msg: &str);

    /// Ask the user a yes/no question. Non-interactive reporters answer `false`.
    fn confirm(&self, question: &str) -> bool;

    /// Display a final summary without timing information.
    fn summary_plain(&self, count: usize, status: &str);
}

impl<T: Reporter + ?Sized> Reporter for std::sync::Arc<T> {
    fn section(&self, title: &str) {
        (**self).section(title);
    }
    fn downloading(&self, name: &str, current: u64, total: Option<u64>) {
        (**self).downloading(name, current, total);
    }
    fn storing(&self, name: &str) {
        (**self).storing(name);
    }
    fn done(&self, name: &str, detail: &str) {
        (**self).done(name, detail);
    }
    fn failed(&self, name: &str, reason: &str) {
        (**self).failed(name, reason);
    }
    fn info(&self, msg: &str) {
        (**self).info(msg);
    }
    fn success(&self, msg: &str) {
        (**self).success(msg);
    }
    fn warning(&self, msg: &str) {
        (**self).warning(msg);
    }
    fn error(&self, msg: &str) {
        (**self).error(msg);
    }
    fn confirm(&self, question: &str) -> bool {
        (**self).confirm(question)
    }
    fn summary_plain(&self, count: usize, status: &str) {
        (**self).summary_plain(count, status);
    }
}

/// A no-op reporter for silent operations (e.g., verification, testing).
#[derive(Debug, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn section(&self, _: &str) {}
    fn downloading(&self, _: &str, _: u64, _: Option<u64>) {}
    fn storing(&self, _: &str) {}
    fn done(&self, _: &str, _: &str) {}
    fn failed(&self, _: &str, _: &str) {}
    fn info(&self, _: &str) {}
    fn success(&self, _: &str) {}
    fn warning(&self, _: &str) {}
    fn error(&self, _: &str) {}
    fn confirm(&self, _: &str) -> bool {
        false
    }
    fn summary_plain(&self, _: usize, _: &str) {}
}
