//! Bulk operations that continue past individual failures.

use std::fmt::Display;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};

use anyhow::Result;
use tracing::warn;
use zi_core::Reporter;

use super::error::{CliError, ExitStatus, exit_status};

/// Run `task` for every item, reporting each failure, and fail at the end if
/// any item failed. The exit status of the first failure is kept.
pub async fn run_all<T, F, Fut>(
    what: &'static str,
    items: Vec<T>,
    reporter: &dyn Reporter,
    mut task: F,
) -> Result<()>
where
    T: Display,
    F: FnMut(T) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let total = items.len();
    let mut failed = 0;
    let mut status = None::<ExitStatus>;
    for item in items {
        let name = item.to_string();
        if let Err(e) = task(item).await {
            warn!(item = %name, error = %e, "Bulk item failed");
            reporter.failed(&name, &format!("{e:#}"));
            status.get_or_insert_with(|| exit_status(&e));
            failed += 1;
        }
    }
    match status {
        None => Ok(()),
        Some(status) => Err(CliError::Aggregate {
            what,
            failed,
            total,
            status,
        }
        .into()),
    }
}

/// Lock state shared between bulk items, failing the item if another one panicked.
pub fn lock<'a, T>(mutex: &'a Mutex<T>, what: &str) -> Result<MutexGuard<'a, T>> {
    mutex
        .lock()
        .map_err(|_| anyhow::anyhow!("{what} lock poisoned"))
}
