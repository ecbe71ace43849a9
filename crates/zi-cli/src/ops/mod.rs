//! Operations shared between commands

pub mod context;
pub mod error;
pub mod solve;
pub mod tasks;

pub use context::{Context, ResolvedApp};
pub use error::{CliError, ExitStatus, exit_status, final_status};
