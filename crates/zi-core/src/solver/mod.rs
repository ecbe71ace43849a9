//! Dependency solving.
//!
//! A [`Solver`] turns [`Requirements`] into [`Selections`]: one implementation
//! per interface, with every essential dependency and command chain satisfied.
//! Solvers are pure with respect to the network; [`solve_with_download`]
//! wraps one to fetch feeds that are missing from the cache.

mod backtracking;
pub mod candidate;

pub use backtracking::BacktrackingSolver;
pub use candidate::{Candidate, CandidateComparer, DefaultComparer};

use std::collections::HashSet;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use zi_schema::{FeedUri, Requirements, Selections};

use crate::feeds::{FeedCache, FeedError};

#[derive(Error, Debug)]
pub enum SolverError {
    #[error(transparent)]
    Feed(#[from] FeedError),

    #[error("Unable to find a usable implementation of {interface}{}", format_reasons(.reasons))]
    Unsolvable {
        interface: FeedUri,
        reasons: Vec<String>,
    },

    #[error("Solving cancelled")]
    Cancelled,
}

fn format_reasons(reasons: &[String]) -> String {
    if reasons.is_empty() {
        return String::new();
    }
    let mut out = String::from(":");
    for reason in reasons {
        out.push_str("\n  ");
        out.push_str(reason);
    }
    out
}

/// The result of a successful solve.
#[derive(Debug, Clone)]
pub struct Solution {
    /// Chosen implementations.
    pub selections: Selections,
    /// At least one consulted feed is older than the freshness limit.
    pub stale: bool,
}

/// Chooses implementations for a set of requirements.
pub trait Solver: Send + Sync {
    /// Solve `requirements` using only locally available feeds.
    fn solve(&self, requirements: &Requirements) -> Result<Solution, SolverError>;
}

/// Solve, downloading each feed the solver reports as uncached and retrying.
///
/// Every URI is downloaded at most once per call.
///
/// # Errors
///
/// Returns the solver's error, a feed download error, or `Cancelled`.
pub async fn solve_with_download(
    solver: &dyn Solver,
    feeds: &FeedCache,
    requirements: &Requirements,
    cancel: &CancellationToken,
) -> Result<Solution, SolverError> {
    let mut downloaded = HashSet::new();
    loop {
        match solver.solve(requirements) {
            Err(SolverError::Feed(FeedError::NotCached(uri))) if downloaded.insert(uri.clone()) => {
                if cancel.is_cancelled() {
                    return Err(SolverError::Cancelled);
                }
                debug!(feed = %uri, "Feed needed by solver is not cached");
                let result = feeds.download(&uri).await;
                if cancel.is_cancelled() {
                    return Err(SolverError::Cancelled);
                }
                result?;
            }
            other => return other,
        }
    }
}
