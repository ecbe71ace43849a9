use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walkdir::WalkDir;
use zi_schema::{DigestAlgorithm, ManifestDigest};

use super::{ArchiveFileInfo, ImplementationStore, StoreError, VerifyHandler};
use crate::Reporter;
use crate::io::extract::extract_archive;
use crate::manifest::{MANIFEST_FILE, Manifest};

const TEMP_PREFIX: &str = "_temp";

/// An implementation store backed by a plain directory.
///
/// Each implementation lives in `<root>/<algorithm><sep><value>` and is
/// write-protected once committed.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    /// Store rooted at `root`; the directory is created if missing.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the directory cannot be created.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn temp_dir(&self) -> Result<tempfile::TempDir, StoreError> {
        Ok(tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempdir_in(&self.root)?)
    }

    /// Verify the tree in `temp` against `expected` and move it into place.
    fn commit(
        &self,
        temp: tempfile::TempDir,
        expected: &ManifestDigest,
        reporter: &dyn Reporter,
    ) -> Result<PathBuf, StoreError> {
        let (algorithm, expected_value) = best_of(expected)?;
        let id = format!("{}{expected_value}", algorithm.prefix());
        reporter.storing(&id);

        let manifest = Manifest::generate(temp.path(), algorithm)?;
        let actual = manifest.digest_value();
        if actual != expected_value {
            return Err(StoreError::DigestMismatch {
                expected: id,
                actual: format!("{}{actual}", algorithm.prefix()),
            });
        }
        manifest.save(temp.path())?;

        let target = self.root.join(&id);
        if target.exists() {
            return Err(StoreError::ImplementationAlreadyInStore(id));
        }
        if let Err(e) = fs::rename(temp.path(), &target) {
            if target.exists() {
                return Err(StoreError::ImplementationAlreadyInStore(id));
            }
            return Err(e.into());
        }
        write_protect(&target, true)?;
        info!(digest = %id, "Added implementation to store");
        Ok(target)
    }

    fn delete_tree(&self, path: &Path) -> Result<(), StoreError> {
        write_protect(path, false)?;
        let temp = self.root.join(format!("{TEMP_PREFIX}{}", rand::random::<u32>()));
        fs::rename(path, &temp)?;
        fs::remove_dir_all(&temp)?;
        Ok(())
    }

    /// Load or regenerate the manifest of a stored implementation.
    fn manifest_of(&self, name: &str) -> Result<Manifest, StoreError> {
        let digest = ManifestDigest::parse_id(name)
            .map_err(|_| StoreError::NoKnownDigest(name.to_string()))?;
        let (algorithm, _) = best_of(&digest)?;
        let dir = self.root.join(name);
        match Manifest::load(&dir, algorithm) {
            Ok(manifest) => Ok(manifest),
            Err(_) => Ok(Manifest::generate(&dir, algorithm)?),
        }
    }
}

fn best_of(digest: &ManifestDigest) -> Result<(DigestAlgorithm, String), StoreError> {
    digest
        .best_algorithm()
        .and_then(|a| digest.get(a).map(|v| (a, v.to_string())))
        .ok_or_else(|| StoreError::NoKnownDigest(digest.to_string()))
}

/// Set (`true`) or lift (`false`) write protection on a whole tree.
#[cfg(unix)]
fn write_protect(path: &Path, protect: bool) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    // Directories are made writable before and protected after their contents.
    let walker = WalkDir::new(path).contents_first(protect);
    for entry in walker {
        let entry = entry.map_err(std::io::Error::other)?;
        if entry.path_is_symlink() {
            continue;
        }
        let meta = entry.metadata().map_err(std::io::Error::other)?;
        let mode = meta.permissions().mode();
        let new_mode = if protect { mode & !0o222 } else { mode | 0o200 };
        if new_mode != mode {
            fs::set_permissions(entry.path(), fs::Permissions::from_mode(new_mode))?;
        }
    }
    Ok(())
}

#[cfg(not(unix))]
fn write_protect(path: &Path, protect: bool) -> std::io::Result<()> {
    for entry in WalkDir::new(path) {
        let entry = entry.map_err(std::io::Error::other)?;
        let mut perms = entry.metadata().map_err(std::io::Error::other)?.permissions();
        perms.set_readonly(protect);
        fs::set_permissions(entry.path(), perms)?;
    }
    Ok(())
}

/// Copy a directory tree keeping mtimes, permissions and symlinks.
fn copy_tree(source: &Path, target: &Path) -> std::io::Result<()> {
    for entry in WalkDir::new(source).min_depth(1) {
        let entry = entry.map_err(std::io::Error::other)?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(std::io::Error::other)?;
        if relative == Path::new(MANIFEST_FILE) {
            continue;
        }
        let dest = target.join(relative);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&dest)?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &dest)?;
        } else {
            fs::copy(entry.path(), &dest)?;
            let meta = entry.metadata().map_err(std::io::Error::other)?;
            filetime::set_file_mtime(&dest, filetime::FileTime::from_last_modification_time(&meta))?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(source: &Path, dest: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(fs::read_link(source)?, dest)
}

#[cfg(not(unix))]
fn copy_symlink(source: &Path, dest: &Path) -> std::io::Result<()> {
    fs::copy(source, dest).map(|_| ())
}

#[cfg(unix)]
fn same_file(a: &Path, b: &Path) -> std::io::Result<bool> {
    use std::os::unix::fs::MetadataExt;
    let (a, b) = (fs::metadata(a)?, fs::metadata(b)?);
    Ok(a.dev() == b.dev() && a.ino() == b.ino())
}

#[cfg(not(unix))]
fn same_file(_a: &Path, _b: &Path) -> std::io::Result<bool> {
    Ok(false)
}

/// Replace `target` with a hard link to `source`.
fn replace_with_link(source: &Path, target: &Path) -> std::io::Result<()> {
    let Some(dir) = target.parent() else {
        return Ok(());
    };
    let temp = dir.join(format!("{TEMP_PREFIX}{}", rand::random::<u32>()));
    fs::hard_link(source, &temp)?;
    if let Err(e) = fs::rename(&temp, target) {
        fs::remove_file(&temp).ok();
        return Err(e);
    }
    Ok(())
}

#[cfg(unix)]
fn set_dir_writable(dir: &Path, writable: bool) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mode = fs::metadata(dir)?.permissions().mode();
    let mode = if writable { mode | 0o200 } else { mode & !0o222 };
    fs::set_permissions(dir, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_dir_writable(_dir: &Path, _writable: bool) -> std::io::Result<()> {
    Ok(())
}

impl ImplementationStore for DirectoryStore {
    fn path(&self) -> &Path {
        &self.root
    }

    fn list_all(&self) -> Result<Vec<ManifestDigest>, StoreError> {
        let mut digests = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Ok(digest) = ManifestDigest::parse_id(&name) {
                digests.push(digest);
            }
        }
        digests.sort_by_key(ToString::to_string);
        Ok(digests)
    }

    fn list_all_temp(&self) -> Result<Vec<PathBuf>, StoreError> {
        let mut temps = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_name().to_string_lossy().starts_with(TEMP_PREFIX) {
                temps.push(entry.path());
            }
        }
        Ok(temps)
    }

    fn contains(&self, digest: &ManifestDigest) -> bool {
        self.get_path(digest).is_some()
    }

    fn contains_directory(&self, directory: &str) -> bool {
        ManifestDigest::parse_id(directory).is_ok() && self.root.join(directory).is_dir()
    }

    fn get_path(&self, digest: &ManifestDigest) -> Option<PathBuf> {
        digest
            .available()
            .into_iter()
            .map(|id| self.root.join(id))
            .find(|p| p.is_dir())
    }

    fn add_directory(
        &self,
        path: &Path,
        digest: &ManifestDigest,
        reporter: &dyn Reporter,
    ) -> Result<PathBuf, StoreError> {
        if self.contains(digest) {
            return Err(StoreError::ImplementationAlreadyInStore(digest.to_string()));
        }
        let temp = self.temp_dir()?;
        copy_tree(path, temp.path())?;
        self.commit(temp, digest, reporter)
    }

    fn add_archives(
        &self,
        archives: &[ArchiveFileInfo],
        digest: &ManifestDigest,
        cancel: &CancellationToken,
        reporter: &dyn Reporter,
    ) -> Result<PathBuf, StoreError> {
        if self.contains(digest) {
            return Err(StoreError::ImplementationAlreadyInStore(digest.to_string()));
        }
        let temp = self.temp_dir()?;
        for archive in archives {
            if cancel.is_cancelled() {
                return Err(StoreError::Cancelled);
            }
            debug!(archive = %archive.path.display(), "Extracting");
            extract_archive(&archive.path, archive.format, temp.path(), &archive.options)?;
        }
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        self.commit(temp, digest, reporter)
    }

    fn remove(&self, digest: &ManifestDigest, reporter: &dyn Reporter) -> Result<bool, StoreError> {
        let Some(path) = self.get_path(digest) else {
            return Ok(false);
        };
        self.delete_tree(&path)?;
        reporter.done(&digest.to_string(), "removed");
        info!(digest = %digest, "Removed implementation from store");
        Ok(true)
    }

    fn verify(&self, digest: &ManifestDigest, handler: &dyn VerifyHandler) -> Result<(), StoreError> {
        let path = self
            .get_path(digest)
            .ok_or_else(|| StoreError::ImplementationNotFound(digest.to_string()))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let stored = ManifestDigest::parse_id(&name)
            .map_err(|_| StoreError::NoKnownDigest(name.clone()))?;
        let (algorithm, expected) = best_of(&stored)?;

        let actual = Manifest::generate(&path, algorithm)?.digest_value();
        if actual == expected {
            return Ok(());
        }
        let actual = format!("{}{actual}", algorithm.prefix());
        warn!(expected = %name, actual = %actual, "Damaged implementation");
        if handler.remove_damaged(&name, &actual) {
            self.delete_tree(&path)?;
        }
        Err(StoreError::DigestMismatch {
            expected: name,
            actual,
        })
    }

    fn audit(
        &self,
        cancel: &CancellationToken,
        reporter: &dyn Reporter,
    ) -> Result<Vec<StoreError>, StoreError> {
        let mut problems = Vec::new();
        for digest in self.list_all()? {
            if cancel.is_cancelled() {
                return Err(StoreError::Cancelled);
            }
            let name = digest.to_string();
            match self.verify(&digest, &super::KeepDamaged) {
                Ok(()) => reporter.done(&name, "ok"),
                Err(e) => {
                    reporter.failed(&name, &e.to_string());
                    problems.push(e);
                }
            }
        }
        Ok(problems)
    }

    fn optimise(&self, cancel: &CancellationToken, reporter: &dyn Reporter) -> Result<u64, StoreError> {
        // (hash, mtime, size, executable) -> first path seen
        let mut seen: HashMap<(String, i64, u64, bool), PathBuf> = HashMap::new();
        let mut saved = 0u64;

        for digest in self.list_all()? {
            if cancel.is_cancelled() {
                return Err(StoreError::Cancelled);
            }
            let name = digest.to_string();
            let manifest = self.manifest_of(&name)?;
            let root = self.root.join(&name);

            for file in manifest.files() {
                let path = root.join(&file.relative_path);
                let key = (file.hash.to_string(), file.mtime, file.size, file.executable);
                let Some(existing) = seen.get(&key) else {
                    seen.insert(key, path);
                    continue;
                };
                if same_file(existing, &path)? {
                    continue;
                }
                let Some(dir) = path.parent() else {
                    continue;
                };
                set_dir_writable(dir, true)?;
                let linked = replace_with_link(existing, &path);
                set_dir_writable(dir, false)?;
                match linked {
                    Ok(()) => saved += file.size,
                    Err(e) => warn!(path = %path.display(), error = %e, "Could not hard-link file"),
                }
            }
            reporter.done(&name, "optimised");
        }
        Ok(saved)
    }

    fn purge(&self, cancel: &CancellationToken, reporter: &dyn Reporter) -> Result<(), StoreError> {
        for digest in self.list_all()? {
            if cancel.is_cancelled() {
                return Err(StoreError::Cancelled);
            }
            self.remove(&digest, reporter)?;
        }
        for temp in self.list_all_temp()? {
            write_protect(&temp, false)?;
            if temp.is_dir() {
                fs::remove_dir_all(&temp)?;
            } else {
                fs::remove_file(&temp)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NullReporter;
    use crate::manifest::digest_directory;

    fn tree(content: &[u8]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("bin")).unwrap();
        fs::write(dir.path().join("bin/app"), content).unwrap();
        fs::write(dir.path().join("README"), b"readme").unwrap();
        dir
    }

    fn store() -> (tempfile::TempDir, DirectoryStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryStore::new(dir.path().join("store")).unwrap();
        (dir, store)
    }

    #[test]
    fn add_directory_round_trips() {
        let (_dir, store) = store();
        let source = tree(b"v1");
        let digest = digest_directory(source.path(), DigestAlgorithm::Sha256New).unwrap();

        let path = store.add_directory(source.path(), &digest, &NullReporter).unwrap();
        assert_eq!(store.get_path(&digest), Some(path.clone()));
        assert_eq!(
            digest_directory(&path, DigestAlgorithm::Sha256New).unwrap(),
            digest
        );
        assert!(path.join(MANIFEST_FILE).exists());
        assert_eq!(store.list_all().unwrap(), vec![digest.clone()]);
        assert!(store.list_all_temp().unwrap().is_empty());

        let again = store.add_directory(source.path(), &digest, &NullReporter);
        assert!(matches!(again, Err(StoreError::ImplementationAlreadyInStore(_))));
    }

    #[test]
    fn mismatch_leaves_store_unchanged() {
        let (_dir, store) = store();
        let source = tree(b"v1");
        let other = tree(b"v2");
        let wrong = digest_directory(other.path(), DigestAlgorithm::Sha256New).unwrap();

        let err = store.add_directory(source.path(), &wrong, &NullReporter);
        assert!(matches!(err, Err(StoreError::DigestMismatch { .. })));
        assert!(store.get_path(&wrong).is_none());
        assert!(store.list_all().unwrap().is_empty());
        assert!(store.list_all_temp().unwrap().is_empty());
    }

    #[test]
    fn remove_and_purge() {
        let (_dir, store) = store();
        let a = tree(b"a");
        let b = tree(b"b");
        let da = digest_directory(a.path(), DigestAlgorithm::Sha1New).unwrap();
        let db = digest_directory(b.path(), DigestAlgorithm::Sha256).unwrap();
        store.add_directory(a.path(), &da, &NullReporter).unwrap();
        store.add_directory(b.path(), &db, &NullReporter).unwrap();

        assert!(store.remove(&da, &NullReporter).unwrap());
        assert!(!store.remove(&da, &NullReporter).unwrap());
        assert!(store.contains(&db));

        store.purge(&CancellationToken::new(), &NullReporter).unwrap();
        assert!(store.list_all().unwrap().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn verify_and_audit_detect_damage() {
        let (_dir, store) = store();
        let source = tree(b"original");
        let digest = digest_directory(source.path(), DigestAlgorithm::Sha256New).unwrap();
        let path = store.add_directory(source.path(), &digest, &NullReporter).unwrap();
        store.verify(&digest, &super::super::KeepDamaged).unwrap();

        write_protect(&path, false).unwrap();
        fs::write(path.join("bin/app"), b"tampered").unwrap();

        let problems = store.audit(&CancellationToken::new(), &NullReporter).unwrap();
        assert_eq!(problems.len(), 1);
        assert!(matches!(problems[0], StoreError::DigestMismatch { .. }));
        assert!(store.contains(&digest));

        struct RemoveAll;
        impl VerifyHandler for RemoveAll {
            fn remove_damaged(&self, _: &str, _: &str) -> bool {
                true
            }
        }
        assert!(store.verify(&digest, &RemoveAll).is_err());
        assert!(!store.contains(&digest));
    }

    #[cfg(unix)]
    #[test]
    fn optimise_links_identical_files_without_changing_digests() {
        let (_dir, store) = store();
        let a = tree(b"same");
        let b = tree(b"same");
        fs::write(b.path().join("extra"), b"x").unwrap();
        for t in [&a, &b] {
            for f in ["bin/app", "README"] {
                filetime::set_file_mtime(t.path().join(f), filetime::FileTime::from_unix_time(5, 0))
                    .unwrap();
            }
        }
        let da = digest_directory(a.path(), DigestAlgorithm::Sha256New).unwrap();
        let db = digest_directory(b.path(), DigestAlgorithm::Sha256New).unwrap();
        let pa = store.add_directory(a.path(), &da, &NullReporter).unwrap();
        let pb = store.add_directory(b.path(), &db, &NullReporter).unwrap();

        let saved = store.optimise(&CancellationToken::new(), &NullReporter).unwrap();
        assert_eq!(saved, 4 + 6);
        assert!(same_file(&pa.join("bin/app"), &pb.join("bin/app")).unwrap());
        store.verify(&da, &super::super::KeepDamaged).unwrap();
        store.verify(&db, &super::super::KeepDamaged).unwrap();

        let again = store.optimise(&CancellationToken::new(), &NullReporter).unwrap();
        assert_eq!(again, 0);
    }

    #[test]
    fn cancelled_add_archives_commits_nothing() {
        let (_dir, store) = store();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let digest = ManifestDigest::single(DigestAlgorithm::Sha256New, "X");
        let err = store.add_archives(&[], &digest, &cancel, &NullReporter);
        assert!(matches!(err, Err(StoreError::Cancelled)));
        assert!(store.list_all_temp().unwrap().is_empty());
    }
}
