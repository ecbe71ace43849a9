//! Digest command

use std::io::Write as _;
use std::path::Path;

use anyhow::{Context as _, Result};
use zi_core::io::extract::{ArchiveFormat, ExtractOptions, extract_archive};
use zi_core::manifest::Manifest;
use zi_schema::DigestAlgorithm;

use crate::ops::CliError;

/// Print the manifest digest of a directory or archive.
///
/// Without `algorithm` every supported algorithm is printed, strongest first.
/// Archives are unpacked into a temporary directory before hashing.
pub fn digest(path: &Path, algorithm: Option<&str>, manifest: bool) -> Result<()> {
    let algorithms = match algorithm {
        Some(name) => vec![
            name.parse::<DigestAlgorithm>()
                .map_err(|_| CliError::invalid(format!("Unknown digest algorithm '{name}'")))?,
        ],
        None if manifest => vec![DigestAlgorithm::Sha256New],
        None => DigestAlgorithm::ALL.to_vec(),
    };

    let unpacked;
    let root = if path.is_dir() {
        path
    } else {
        let format = ArchiveFormat::detect(None, &path.to_string_lossy())?;
        unpacked = tempfile::tempdir()?;
        extract_archive(path, format, unpacked.path(), &ExtractOptions::default())
            .with_context(|| format!("Failed to unpack {}", path.display()))?;
        unpacked.path()
    };

    for algorithm in algorithms {
        let generated = Manifest::generate(root, algorithm)
            .with_context(|| format!("Failed to hash {}", path.display()))?;
        if manifest {
            std::io::stdout().write_all(&generated.to_bytes())?;
        } else {
            println!("{}", generated.digest());
        }
    }
    Ok(())
}
