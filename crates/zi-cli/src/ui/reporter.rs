//! Terminal reporter.
//!
//! Progress and status lines go to stderr so stdout stays parseable for
//! commands such as `zi select --xml` and `zi store find`.

use std::io::{self, BufRead, IsTerminal, Write};
use std::sync::Mutex;

use crossterm::style::Stylize;
use zi_core::Reporter;

use super::theme::{Theme, format_size};

/// Writes styled progress lines to stderr.
#[derive(Debug)]
pub struct TerminalReporter {
    theme: Theme,
    /// Last download percentage printed per item, to avoid flooding the terminal.
    last_progress: Mutex<Vec<(String, u64)>>,
}

impl TerminalReporter {
    pub fn new() -> Self {
        Self {
            theme: Theme::default(),
            last_progress: Mutex::new(Vec::new()),
        }
    }

    fn line(&self, text: &str) {
        let mut stderr = io::stderr().lock();
        let _ = writeln!(stderr, "{text}");
    }

    fn should_print_progress(&self, name: &str, percent: u64) -> bool {
        let Ok(mut last) = self.last_progress.lock() else {
            return true;
        };
        match last.iter_mut().find(|(n, _)| n == name) {
            Some((_, previous)) if percent < *previous + 25 && percent < 100 => false,
            Some((_, previous)) => {
                *previous = percent;
                true
            }
            None => {
                last.push((name.to_string(), percent));
                true
            }
        }
    }
}

impl Default for TerminalReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl Reporter for TerminalReporter {
    fn section(&self, title: &str) {
        self.line("");
        self.line(&title.to_uppercase().with(self.theme.colors.header).bold().to_string());
    }

    fn downloading(&self, name: &str, current: u64, total: Option<u64>) {
        let Some(total) = total.filter(|&t| t > 0) else {
            return;
        };
        let percent = current.saturating_mul(100) / total;
        if !self.should_print_progress(name, percent) {
            return;
        }
        self.line(&format!(
            "  {} {} {}",
            self.theme.icons.active.with(self.theme.colors.warning),
            name.with(self.theme.colors.name),
            format!("{percent:>3}% of {}", format_size(total)).with(self.theme.colors.secondary),
        ));
    }

    fn storing(&self, name: &str) {
        self.line(&format!(
            "  {} {} {}",
            self.theme.icons.active.with(self.theme.colors.warning),
            name.with(self.theme.colors.name),
            "storing".with(self.theme.colors.secondary),
        ));
    }

    fn done(&self, name: &str, detail: &str) {
        self.line(&format!(
            "  {} {} {}",
            self.theme.icons.success.with(self.theme.colors.success),
            name.with(self.theme.colors.name),
            detail.with(self.theme.colors.secondary),
        ));
    }

    fn failed(&self, name: &str, reason: &str) {
        self.line(&format!(
            "  {} {} {}",
            self.theme.icons.error.with(self.theme.colors.error),
            name.with(self.theme.colors.name),
            reason.with(self.theme.colors.error),
        ));
    }

    fn info(&self, msg: &str) {
        self.line(&format!("{} {msg}", self.theme.icons.info.with(self.theme.colors.secondary)));
    }

    fn success(&self, msg: &str) {
        self.line(&format!("{} {msg}", self.theme.icons.success.with(self.theme.colors.success)));
    }

    fn warning(&self, msg: &str) {
        self.line(&format!(
            "{} {}",
            self.theme.icons.warning.with(self.theme.colors.warning),
            msg.with(self.theme.colors.warning)
        ));
    }

    fn error(&self, msg: &str) {
        self.line(&format!(
            "{} {}",
            self.theme.icons.error.with(self.theme.colors.error),
            msg.with(self.theme.colors.error)
        ));
    }

    fn confirm(&self, question: &str) -> bool {
        if !io::stdin().is_terminal() {
            return false;
        }
        {
            let mut stderr = io::stderr().lock();
            let _ = write!(stderr, "{question} [y/N] ");
            let _ = stderr.flush();
        }
        let mut answer = String::new();
        if io::stdin().lock().read_line(&mut answer).is_err() {
            return false;
        }
        matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
    }

    fn summary_plain(&self, count: usize, status: &str) {
        let msg = format!(
            "{} item{} {}",
            count,
            if count == 1 { "" } else { "s" },
            status
        );
        self.success(&msg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_is_throttled() {
        let reporter = TerminalReporter::new();
        assert!(reporter.should_print_progress("app", 0));
        assert!(!reporter.should_print_progress("app", 10));
        assert!(reporter.should_print_progress("app", 30));
        assert!(reporter.should_print_progress("app", 100));
        assert!(reporter.should_print_progress("other", 10));
    }
}
