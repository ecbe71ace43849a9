//! Content-addressed implementation storage.
//!
//! Implementations are stored in directories named after their manifest
//! digest. Nothing is committed to a store unless the digest computed from
//! the bytes on disk matches the digest the caller expected.

mod directory;

pub use directory::DirectoryStore;

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use zi_schema::ManifestDigest;

use crate::Reporter;
use crate::io::extract::{ArchiveFormat, ExtractError, ExtractOptions};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Archive error: {0}")]
    Extract(#[from] ExtractError),

    #[error("Digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("Implementation {0} not found in store")]
    ImplementationNotFound(String),

    #[error("Implementation {0} is already in the store")]
    ImplementationAlreadyInStore(String),

    #[error("No supported digest algorithm in {0}")]
    NoKnownDigest(String),

    #[error("Operation cancelled")]
    Cancelled,
}

/// An archive that has been downloaded and is ready to be unpacked.
#[derive(Debug, Clone)]
pub struct ArchiveFileInfo {
    /// Local file holding the archive.
    pub path: PathBuf,
    /// Archive format.
    pub format: ArchiveFormat,
    /// Subdirectory, destination and offset settings.
    pub options: ExtractOptions,
}

/// Decides what happens to an implementation that failed verification.
pub trait VerifyHandler: Send + Sync {
    /// Return `true` to delete the damaged implementation.
    fn remove_damaged(&self, expected: &str, actual: &str) -> bool;
}

/// Keeps damaged implementations in place.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeepDamaged;

impl VerifyHandler for KeepDamaged {
    fn remove_damaged(&self, _expected: &str, _actual: &str) -> bool {
        false
    }
}

/// Storage for implementations keyed by manifest digest.
pub trait ImplementationStore: Send + Sync {
    /// Root directory of the store.
    fn path(&self) -> &Path;

    /// Digests of every stored implementation.
    fn list_all(&self) -> Result<Vec<ManifestDigest>, StoreError>;

    /// Leftover temporary directories from interrupted operations.
    fn list_all_temp(&self) -> Result<Vec<PathBuf>, StoreError>;

    /// Whether any of the digest's values is stored.
    fn contains(&self, digest: &ManifestDigest) -> bool;

    /// Whether a directory with exactly this name is stored.
    fn contains_directory(&self, directory: &str) -> bool;

    /// Path of the stored implementation, if present.
    fn get_path(&self, digest: &ManifestDigest) -> Option<PathBuf>;

    /// Copy `path` into the store after verifying it against `digest`.
    fn add_directory(
        &self,
        path: &Path,
        digest: &ManifestDigest,
        reporter: &dyn Reporter,
    ) -> Result<PathBuf, StoreError>;

    /// Unpack `archives` (in order) into one directory and add it after verification.
    fn add_archives(
        &self,
        archives: &[ArchiveFileInfo],
        digest: &ManifestDigest,
        cancel: &CancellationToken,
        reporter: &dyn Reporter,
    ) -> Result<PathBuf, StoreError>;

    /// Delete a stored implementation. Returns `false` if it was not present.
    fn remove(&self, digest: &ManifestDigest, reporter: &dyn Reporter) -> Result<bool, StoreError>;

    /// Recompute the digest of a stored implementation.
    fn verify(&self, digest: &ManifestDigest, handler: &dyn VerifyHandler) -> Result<(), StoreError>;

    /// Verify every implementation and return the problems found.
    fn audit(
        &self,
        cancel: &CancellationToken,
        reporter: &dyn Reporter,
    ) -> Result<Vec<StoreError>, StoreError>;

    /// Hard-link identical files across implementations; returns bytes saved.
    fn optimise(&self, cancel: &CancellationToken, reporter: &dyn Reporter) -> Result<u64, StoreError>;

    /// Remove every implementation and temporary directory.
    fn purge(&self, cancel: &CancellationToken, reporter: &dyn Reporter) -> Result<(), StoreError>;
}
