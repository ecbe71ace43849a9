//! Exit codes and CLI-level errors

use std::fmt;
use std::io;
use std::process::ExitCode;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use zi_core::catalog::CatalogError;
use zi_core::config::ConfigError;
use zi_core::desktop::{IntegrationError, SyncError};
use zi_core::executor::ExecutorError;
use zi_core::feeds::FeedError;
use zi_core::fetcher::FetchError;
use zi_core::io::download::DownloadError;
use zi_core::io::extract::ExtractError;
use zi_core::solver::SolverError;
use zi_core::store::StoreError;
use zi_schema::ParseError;

/// Process exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitStatus {
    Ok = 0,
    NoChanges = 1,
    WebError = 10,
    AccessDenied = 11,
    IoError = 12,
    Conflict = 15,
    SolverError = 20,
    ExecutorError = 21,
    InvalidData = 25,
    InvalidSignature = 26,
    DigestMismatch = 27,
    NotSupported = 50,
    InvalidArguments = 99,
    UserCanceled = 100,
}

impl From<ExitStatus> for ExitCode {
    fn from(status: ExitStatus) -> Self {
        ExitCode::from(status as u8)
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?} ({})", *self as u8)
    }
}

#[derive(Error, Debug)]
pub enum CliError {
    #[error("{0}")]
    InvalidArguments(String),

    #[error("Operation cancelled by user")]
    UserCanceled,

    #[error("Nothing changed")]
    NoChanges,

    #[error("{failed} of {total} {what} failed")]
    Aggregate {
        what: &'static str,
        failed: usize,
        total: usize,
        status: ExitStatus,
    },
}

impl CliError {
    pub fn invalid(msg: impl fmt::Display) -> Self {
        Self::InvalidArguments(msg.to_string())
    }
}

/// Exit status for an error returned by a command.
///
/// The first error in the chain with a known type decides.
pub fn exit_status(err: &anyhow::Error) -> ExitStatus {
    err.chain().find_map(classify).unwrap_or(ExitStatus::IoError)
}

/// Exit status for a failed run; anything failing after Ctrl-C counts as canceled.
pub fn final_status(err: &anyhow::Error, cancel: &CancellationToken) -> ExitStatus {
    if cancel.is_cancelled() {
        return ExitStatus::UserCanceled;
    }
    exit_status(err)
}

fn classify(err: &(dyn std::error::Error + 'static)) -> Option<ExitStatus> {
    if let Some(e) = err.downcast_ref::<CliError>() {
        return Some(match e {
            CliError::InvalidArguments(_) => ExitStatus::InvalidArguments,
            CliError::UserCanceled => ExitStatus::UserCanceled,
            CliError::NoChanges => ExitStatus::NoChanges,
            CliError::Aggregate { status, .. } => *status,
        });
    }
    if let Some(e) = err.downcast_ref::<StoreError>() {
        return Some(store_status(e));
    }
    if let Some(e) = err.downcast_ref::<FetchError>() {
        return Some(fetch_status(e));
    }
    if let Some(e) = err.downcast_ref::<SolverError>() {
        return Some(match e {
            SolverError::Feed(feed) => feed_status(feed),
            SolverError::Unsolvable { .. } => ExitStatus::SolverError,
            SolverError::Cancelled => ExitStatus::UserCanceled,
        });
    }
    if let Some(e) = err.downcast_ref::<FeedError>() {
        return Some(feed_status(e));
    }
    if let Some(e) = err.downcast_ref::<ExecutorError>() {
        return Some(match e {
            ExecutorError::NotCached(_) => ExitStatus::NotSupported,
            _ => ExitStatus::ExecutorError,
        });
    }
    if let Some(e) = err.downcast_ref::<IntegrationError>() {
        return Some(integration_status(e));
    }
    if let Some(e) = err.downcast_ref::<SyncError>() {
        return Some(match e {
            SyncError::NotConfigured => ExitStatus::InvalidArguments,
            SyncError::CredentialsInvalid | SyncError::Http(_) => ExitStatus::WebError,
            SyncError::CryptoKeyInvalid | SyncError::ServerDataDamaged(_) => ExitStatus::InvalidData,
            SyncError::Integration(e) => integration_status(e),
            SyncError::Io(e) => io_status(e),
            SyncError::Cancelled => ExitStatus::UserCanceled,
        });
    }
    if let Some(e) = err.downcast_ref::<CatalogError>() {
        return Some(match e {
            CatalogError::Io(e) => io_status(e),
            CatalogError::Parse(_) => ExitStatus::InvalidData,
            CatalogError::AlreadyRegistered(_) | CatalogError::NotRegistered(_) => ExitStatus::NoChanges,
        });
    }
    if let Some(e) = err.downcast_ref::<ConfigError>() {
        return Some(match e {
            ConfigError::Io(e) => io_status(e),
            ConfigError::InvalidValue { .. } => ExitStatus::InvalidArguments,
            _ => ExitStatus::InvalidData,
        });
    }
    if err.is::<ParseError>() {
        return Some(ExitStatus::InvalidData);
    }
    if let Some(e) = err.downcast_ref::<DownloadError>() {
        return Some(download_status(e));
    }
    if err.is::<reqwest::Error>() {
        return Some(ExitStatus::WebError);
    }
    if err.is::<clap::Error>() {
        return Some(ExitStatus::InvalidArguments);
    }
    err.downcast_ref::<io::Error>().map(io_status)
}

fn io_status(e: &io::Error) -> ExitStatus {
    match e.kind() {
        io::ErrorKind::PermissionDenied => ExitStatus::AccessDenied,
        io::ErrorKind::InvalidData => ExitStatus::InvalidData,
        _ => ExitStatus::IoError,
    }
}

fn download_status(e: &DownloadError) -> ExitStatus {
    match e {
        DownloadError::Io(e) => io_status(e),
        _ => ExitStatus::WebError,
    }
}

fn extract_status(e: &ExtractError) -> ExitStatus {
    match e {
        ExtractError::Io(e) => io_status(e),
        ExtractError::UnsupportedFormat(_) => ExitStatus::NotSupported,
        ExtractError::Archive(_) => ExitStatus::InvalidData,
    }
}

pub(crate) fn store_status(e: &StoreError) -> ExitStatus {
    match e {
        StoreError::Io(e) => io_status(e),
        StoreError::Extract(e) => extract_status(e),
        StoreError::DigestMismatch { .. } => ExitStatus::DigestMismatch,
        StoreError::ImplementationNotFound(_) => ExitStatus::InvalidArguments,
        StoreError::ImplementationAlreadyInStore(_) => ExitStatus::NoChanges,
        StoreError::NoKnownDigest(_) => ExitStatus::NotSupported,
        StoreError::Cancelled => ExitStatus::UserCanceled,
    }
}

fn fetch_status(e: &FetchError) -> ExitStatus {
    match e {
        FetchError::Download(e) => download_status(e),
        FetchError::Store(e) => store_status(e),
        FetchError::Extract(e) => extract_status(e),
        FetchError::Io(e) => io_status(e),
        FetchError::NotSupported(_) | FetchError::NoDigest(_) => ExitStatus::NotSupported,
        FetchError::Task(_) => ExitStatus::IoError,
        FetchError::Cancelled => ExitStatus::UserCanceled,
    }
}

fn feed_status(e: &FeedError) -> ExitStatus {
    match e {
        FeedError::NotCached(_) | FeedError::Offline(_) | FeedError::NotFound(_) | FeedError::Http { .. } => {
            ExitStatus::WebError
        }
        FeedError::Parse { .. } | FeedError::UriMismatch { .. } => ExitStatus::InvalidData,
        FeedError::ImplementationNotFound { .. } => ExitStatus::SolverError,
        FeedError::Io { source, .. } => io_status(source),
    }
}

fn integration_status(e: &IntegrationError) -> ExitStatus {
    match e {
        IntegrationError::Io(e) => io_status(e),
        IntegrationError::Parse(_) | IntegrationError::Json(_) => ExitStatus::InvalidData,
        IntegrationError::AlreadyInList(_) => ExitStatus::NoChanges,
        IntegrationError::NotInList(_) | IntegrationError::UnknownCategory(_) => ExitStatus::InvalidArguments,
        IntegrationError::Conflict { .. } => ExitStatus::Conflict,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;
    use zi_schema::FeedUri;

    #[test]
    fn maps_wrapped_errors() {
        let mismatch = StoreError::DigestMismatch {
            expected: "a".into(),
            actual: "b".into(),
        };
        let err = anyhow::Error::from(FetchError::Store(mismatch)).context("Failed to download");
        assert_eq!(exit_status(&err), ExitStatus::DigestMismatch);

        let uri = FeedUri::parse("http://example.com/a.xml").unwrap();
        let err = anyhow::Error::from(IntegrationError::NotInList(uri));
        assert_eq!(exit_status(&err), ExitStatus::InvalidArguments);

        let err = anyhow::Error::from(SyncError::CryptoKeyInvalid);
        assert_eq!(exit_status(&err), ExitStatus::InvalidData);
    }

    #[test]
    fn io_errors_by_kind() {
        let denied: anyhow::Result<()> =
            Err(io::Error::from(io::ErrorKind::PermissionDenied)).context("Failed to write");
        assert_eq!(exit_status(&denied.unwrap_err()), ExitStatus::AccessDenied);

        let err = anyhow::anyhow!("something odd");
        assert_eq!(exit_status(&err), ExitStatus::IoError);
    }

    #[test]
    fn aggregate_carries_first_status() {
        let err = anyhow::Error::from(CliError::Aggregate {
            what: "applications",
            failed: 2,
            total: 3,
            status: ExitStatus::WebError,
        });
        assert_eq!(exit_status(&err), ExitStatus::WebError);
        assert_eq!(err.to_string(), "2 of 3 applications failed");
    }

    #[test]
    fn errors_after_interrupt_are_cancellations() {
        let cancel = CancellationToken::new();
        let err = anyhow::Error::from(io::Error::from(io::ErrorKind::BrokenPipe)).context("Failed to download");
        assert_eq!(final_status(&err, &cancel), ExitStatus::IoError);

        cancel.cancel();
        assert_eq!(final_status(&err, &cancel), ExitStatus::UserCanceled);
    }
}
