//! Desktop integration: the application list, access points and their
//! reconciliation with the desktop environment and a sync server.

pub mod access_point;
pub mod app_list;
pub mod category;
pub mod environment;
pub mod integration;
pub mod merge;
pub mod sync;

pub use access_point::AccessPoint;
pub use app_list::{AppEntry, AppList, ConflictData};
pub use category::{Category, CategoryIntegration};
pub use environment::{DesktopEnvironment, RecordingDesktop, UnixDesktop};
pub use integration::IntegrationManager;
pub use sync::{SyncError, SyncIntegrationManager, SyncResetMode};

use std::fmt;

use thiserror::Error;
use zi_schema::{FeedUri, ParseError};

/// Two access points claiming the same OS resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessPointConflict {
    /// Conflict ID of the contested resource.
    pub id: String,
    /// Interface already owning the resource.
    pub existing_interface: FeedUri,
    /// Access point already owning the resource.
    pub existing: AccessPoint,
    /// Access point that was requested.
    pub requested: AccessPoint,
}

impl fmt::Display for AccessPointConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} conflicts with {} of {} ({})",
            self.requested, self.existing, self.existing_interface, self.id
        )
    }
}

#[derive(Error, Debug)]
pub enum IntegrationError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid application list data: {0}")]
    Parse(#[from] ParseError),

    #[error("Failed to serialize requirements: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0} is already in the application list")]
    AlreadyInList(FeedUri),

    #[error("{0} is not in the application list")]
    NotInList(FeedUri),

    #[error("Access points of {interface} conflict with existing ones:{}", format_conflicts(.conflicts))]
    Conflict {
        interface: FeedUri,
        conflicts: Vec<AccessPointConflict>,
    },

    #[error("Unknown integration category '{0}'")]
    UnknownCategory(String),
}

fn format_conflicts(conflicts: &[AccessPointConflict]) -> String {
    conflicts.iter().map(|c| format!("\n  {c}")).collect()
}
