//! Manifest generation: hash trees over directory contents.
//!
//! A manifest lists every directory, file and symlink below an
//! implementation root together with content hashes. The digest of the
//! manifest text identifies the tree; two trees have the same digest exactly
//! when they have the same names, contents, modification times and
//! executable bits.

use std::borrow::Cow;
use std::ffi::{OsStr, OsString};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use sha1::Digest as _;
use zi_schema::{DigestAlgorithm, ManifestDigest, base32_encode};

/// Name of the manifest file saved inside store entries.
pub const MANIFEST_FILE: &str = ".manifest";

/// Metadata files at the root of a tree that never appear in a manifest.
const HIDDEN_FILES: [&str; 3] = [MANIFEST_FILE, ".xbit", ".symlink"];

/// One line of a manifest.
///
/// Names are kept as the OS spells them; on Unix they are hashed byte for byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestNode {
    /// A directory, given by its path relative to the root (`/sub/dir`).
    Directory {
        /// Relative path starting with `/`.
        path: OsString,
        /// Modification time; only recorded by the legacy `sha1` format.
        mtime: Option<i64>,
    },
    /// A regular file.
    File {
        /// Hex hash of the contents.
        hash: String,
        /// Modification time in seconds since the epoch.
        mtime: i64,
        /// Size in bytes.
        size: u64,
        /// File name.
        name: OsString,
        /// Whether any executable bit is set.
        executable: bool,
    },
    /// A symbolic link.
    Symlink {
        /// Hex hash of the link target.
        hash: String,
        /// Length of the link target.
        size: u64,
        /// Link name.
        name: OsString,
    },
}

impl ManifestNode {
    fn to_line(&self) -> Vec<u8> {
        let (prefix, name) = match self {
            Self::Directory { path, mtime: Some(mtime) } => (format!("D {mtime} "), path),
            Self::Directory { path, mtime: None } => ("D ".to_string(), path),
            Self::File {
                hash,
                mtime,
                size,
                name,
                executable,
            } => {
                let kind = if *executable { 'X' } else { 'F' };
                (format!("{kind} {hash} {mtime} {size} "), name)
            }
            Self::Symlink { hash, size, name } => (format!("S {hash} {size} "), name),
        };
        let mut line = prefix.into_bytes();
        line.extend_from_slice(&os_bytes(name));
        line
    }

    fn parse_line(line: &[u8], algorithm: DigestAlgorithm) -> io::Result<Self> {
        let bad = || invalid(format!("malformed manifest line: {}", String::from_utf8_lossy(line)));
        let field = |bytes: &[u8]| std::str::from_utf8(bytes).map(str::to_string).map_err(|_| bad());
        let number = |bytes: &[u8]| -> io::Result<i64> {
            std::str::from_utf8(bytes).ok().and_then(|s| s.parse().ok()).ok_or_else(bad)
        };
        let mut split = line.splitn(2, |b| *b == b' ');
        let (Some(kind), Some(rest)) = (split.next(), split.next()) else {
            return Err(bad());
        };
        match kind {
            b"D" if algorithm == DigestAlgorithm::Sha1 => {
                let mut parts = rest.splitn(2, |b| *b == b' ');
                let (Some(mtime), Some(path)) = (parts.next(), parts.next()) else {
                    return Err(bad());
                };
                Ok(Self::Directory {
                    path: os_from_bytes(path),
                    mtime: Some(number(mtime)?),
                })
            }
            b"D" => Ok(Self::Directory {
                path: os_from_bytes(rest),
                mtime: None,
            }),
            b"F" | b"X" => {
                let mut parts = rest.splitn(4, |b| *b == b' ');
                let (Some(hash), Some(mtime), Some(size), Some(name)) =
                    (parts.next(), parts.next(), parts.next(), parts.next())
                else {
                    return Err(bad());
                };
                Ok(Self::File {
                    hash: field(hash)?,
                    mtime: number(mtime)?,
                    size: u64::try_from(number(size)?).map_err(|_| bad())?,
                    name: os_from_bytes(name),
                    executable: kind == b"X",
                })
            }
            b"S" => {
                let mut parts = rest.splitn(3, |b| *b == b' ');
                let (Some(hash), Some(size), Some(name)) = (parts.next(), parts.next(), parts.next())
                else {
                    return Err(bad());
                };
                Ok(Self::Symlink {
                    hash: field(hash)?,
                    size: u64::try_from(number(size)?).map_err(|_| bad())?,
                    name: os_from_bytes(name),
                })
            }
            _ => Err(bad()),
        }
    }
}

/// A file entry with its location, as yielded by [`Manifest::files`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestFile<'a> {
    /// Path relative to the root, without a leading slash.
    pub relative_path: PathBuf,
    /// Content hash.
    pub hash: &'a str,
    /// Modification time.
    pub mtime: i64,
    /// Size in bytes.
    pub size: u64,
    /// Executable bit.
    pub executable: bool,
}

/// The ordered list of nodes describing a directory tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    algorithm: DigestAlgorithm,
    nodes: Vec<ManifestNode>,
}

impl Manifest {
    /// Walk `root` and build its manifest.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if any entry cannot be read or a file name
    /// contains a newline.
    pub fn generate(root: &Path, algorithm: DigestAlgorithm) -> io::Result<Self> {
        let mut nodes = Vec::new();
        if algorithm == DigestAlgorithm::Sha1 {
            walk_old(root, OsStr::new(""), algorithm, &mut nodes)?;
        } else {
            walk_new(root, OsStr::new(""), algorithm, &mut nodes)?;
        }
        Ok(Self { algorithm, nodes })
    }

    /// Parse manifest text written with `algorithm`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidData` for malformed lines.
    pub fn parse(data: &[u8], algorithm: DigestAlgorithm) -> io::Result<Self> {
        let nodes = data
            .split(|b| *b == b'\n')
            .filter(|l| !l.is_empty())
            .map(|l| ManifestNode::parse_line(l, algorithm))
            .collect::<io::Result<_>>()?;
        Ok(Self { algorithm, nodes })
    }

    /// Algorithm the manifest was generated with.
    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    /// Nodes in manifest order.
    pub fn nodes(&self) -> &[ManifestNode] {
        &self.nodes
    }

    /// Manifest contents as hashed; every line ends in `\n`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut data = Vec::new();
        for node in &self.nodes {
            data.extend_from_slice(&node.to_line());
            data.push(b'\n');
        }
        data
    }

    /// Manifest text for display, with names that are not UTF-8 replaced.
    pub fn to_text(&self) -> String {
        String::from_utf8_lossy(&self.to_bytes()).into_owned()
    }

    /// Digest value of the tree (without the algorithm prefix).
    pub fn digest_value(&self) -> String {
        let mut hasher = Hasher::new(self.algorithm);
        hasher.update(&self.to_bytes());
        if self.algorithm == DigestAlgorithm::Sha256New {
            base32_encode(&hasher.finalize())
        } else {
            hex::encode(hasher.finalize())
        }
    }

    /// The digest as a [`ManifestDigest`] with only this algorithm set.
    pub fn digest(&self) -> ManifestDigest {
        ManifestDigest::single(self.algorithm, self.digest_value())
    }

    /// Total size of all files and symlinks.
    pub fn total_size(&self) -> u64 {
        self.nodes
            .iter()
            .map(|n| match n {
                ManifestNode::File { size, .. } | ManifestNode::Symlink { size, .. } => *size,
                ManifestNode::Directory { .. } => 0,
            })
            .sum()
    }

    /// Regular files with their paths relative to the root.
    pub fn files(&self) -> Vec<ManifestFile<'_>> {
        let mut dir = PathBuf::new();
        let mut out = Vec::new();
        for node in &self.nodes {
            match node {
                ManifestNode::Directory { path, .. } => {
                    let path = Path::new(path);
                    dir = path.strip_prefix("/").unwrap_or(path).to_path_buf();
                }
                ManifestNode::File {
                    hash,
                    mtime,
                    size,
                    name,
                    executable,
                } => out.push(ManifestFile {
                    relative_path: dir.join(name),
                    hash,
                    mtime: *mtime,
                    size: *size,
                    executable: *executable,
                }),
                ManifestNode::Symlink { .. } => {}
            }
        }
        out
    }

    /// Write the manifest text to `.manifest` inside `dir`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be written.
    pub fn save(&self, dir: &Path) -> io::Result<()> {
        fs::write(dir.join(MANIFEST_FILE), self.to_bytes())
    }

    /// Read `.manifest` from inside `dir`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file is missing or malformed.
    pub fn load(dir: &Path, algorithm: DigestAlgorithm) -> io::Result<Self> {
        Self::parse(&fs::read(dir.join(MANIFEST_FILE))?, algorithm)
    }
}

/// Compute the digest of a directory tree with one algorithm.
///
/// # Errors
///
/// Returns an I/O error if the tree cannot be read.
pub fn digest_directory(root: &Path, algorithm: DigestAlgorithm) -> io::Result<ManifestDigest> {
    Ok(Manifest::generate(root, algorithm)?.digest())
}

enum Hasher {
    Sha1(sha1::Sha1),
    Sha256(sha2::Sha256),
}

impl Hasher {
    fn new(algorithm: DigestAlgorithm) -> Self {
        match algorithm {
            DigestAlgorithm::Sha1 | DigestAlgorithm::Sha1New => Self::Sha1(sha1::Sha1::new()),
            DigestAlgorithm::Sha256 | DigestAlgorithm::Sha256New => {
                Self::Sha256(sha2::Sha256::new())
            }
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Self::Sha1(h) => h.update(data),
            Self::Sha256(h) => h.update(data),
        }
    }

    fn finalize(self) -> Vec<u8> {
        match self {
            Self::Sha1(h) => h.finalize().to_vec(),
            Self::Sha256(h) => h.finalize().to_vec(),
        }
    }
}

fn hash_file(path: &Path, algorithm: DigestAlgorithm) -> io::Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Hasher::new(algorithm);
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn hash_bytes(data: &[u8], algorithm: DigestAlgorithm) -> String {
    let mut hasher = Hasher::new(algorithm);
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn invalid(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

fn mtime_of(meta: &fs::Metadata) -> io::Result<i64> {
    let modified = meta.modified()?;
    Ok(match modified.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs() as i64,
        Err(e) => -(e.duration().as_secs() as i64),
    })
}

#[cfg(unix)]
fn is_executable(meta: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_meta: &fs::Metadata) -> bool {
    false
}

#[cfg(unix)]
fn os_bytes(value: &OsStr) -> Cow<'_, [u8]> {
    use std::os::unix::ffi::OsStrExt;
    Cow::Borrowed(value.as_bytes())
}

#[cfg(not(unix))]
fn os_bytes(value: &OsStr) -> Cow<'_, [u8]> {
    match value.to_string_lossy() {
        Cow::Borrowed(s) => Cow::Borrowed(s.as_bytes()),
        Cow::Owned(s) => Cow::Owned(s.into_bytes()),
    }
}

#[cfg(unix)]
fn os_from_bytes(bytes: &[u8]) -> OsString {
    use std::os::unix::ffi::OsStrExt;
    OsStr::from_bytes(bytes).to_os_string()
}

#[cfg(not(unix))]
fn os_from_bytes(bytes: &[u8]) -> OsString {
    String::from_utf8_lossy(bytes).into_owned().into()
}

/// Directory entries sorted by name, with root metadata files removed.
fn sorted_entries(dir: &Path, at_root: bool) -> io::Result<Vec<(OsString, PathBuf, fs::Metadata)>> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if at_root && HIDDEN_FILES.iter().any(|hidden| name == OsStr::new(hidden)) {
            continue;
        }
        if os_bytes(&name).contains(&b'\n') {
            return Err(invalid(format!("file name contains a newline: {name:?}")));
        }
        let path = entry.path();
        let meta = fs::symlink_metadata(&path)?;
        entries.push((name, path, meta));
    }
    entries.sort_by(|a, b| os_bytes(&a.0).cmp(&os_bytes(&b.0)));
    Ok(entries)
}

fn leaf_node(
    name: &OsStr,
    path: &Path,
    meta: &fs::Metadata,
    algorithm: DigestAlgorithm,
) -> io::Result<Option<ManifestNode>> {
    let file_type = meta.file_type();
    if file_type.is_symlink() {
        let target = fs::read_link(path)?;
        let target = os_bytes(target.as_os_str());
        return Ok(Some(ManifestNode::Symlink {
            hash: hash_bytes(&target, algorithm),
            size: target.len() as u64,
            name: name.to_os_string(),
        }));
    }
    if file_type.is_file() {
        return Ok(Some(ManifestNode::File {
            hash: hash_file(path, algorithm)?,
            mtime: mtime_of(meta)?,
            size: meta.len(),
            name: name.to_os_string(),
            executable: is_executable(meta),
        }));
    }
    Ok(None)
}

fn sub_path(rel: &OsStr, name: &OsStr) -> OsString {
    let mut sub = rel.to_os_string();
    sub.push("/");
    sub.push(name);
    sub
}

/// Depth-first layout: the files of a directory precede its subdirectories.
fn walk_new(
    dir: &Path,
    rel: &OsStr,
    algorithm: DigestAlgorithm,
    nodes: &mut Vec<ManifestNode>,
) -> io::Result<()> {
    let entries = sorted_entries(dir, rel.is_empty())?;
    for (name, path, meta) in &entries {
        if !meta.is_dir() {
            if let Some(node) = leaf_node(name, path, meta, algorithm)? {
                nodes.push(node);
            }
        }
    }
    for (name, path, meta) in &entries {
        if meta.is_dir() {
            let sub = sub_path(rel, name);
            nodes.push(ManifestNode::Directory {
                path: sub.clone(),
                mtime: None,
            });
            walk_new(path, &sub, algorithm, nodes)?;
        }
    }
    Ok(())
}

/// Legacy layout: entries of a directory in one sorted sequence.
fn walk_old(
    dir: &Path,
    rel: &OsStr,
    algorithm: DigestAlgorithm,
    nodes: &mut Vec<ManifestNode>,
) -> io::Result<()> {
    for (name, path, meta) in sorted_entries(dir, rel.is_empty())? {
        if meta.is_dir() {
            let sub = sub_path(rel, &name);
            nodes.push(ManifestNode::Directory {
                path: sub.clone(),
                mtime: Some(mtime_of(&meta)?),
            });
            walk_old(&path, &sub, algorithm, nodes)?;
        } else if let Some(node) = leaf_node(&name, &path, &meta, algorithm)? {
            nodes.push(node);
        }
    }
    Ok(())
}
