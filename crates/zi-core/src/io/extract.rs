//! Archive extraction module
//!
//! Handles tar, tar.gz, tar.zst and zip archives, optionally picking out one
//! subdirectory (`extract`) and placing the result below a subdirectory of the
//! target (`dest`).

use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Component, Path, PathBuf};

use filetime::FileTime;
use thiserror::Error;
use zip::ZipArchive;
use zstd::stream::Decoder as ZstdDecoder;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Unsupported archive format: {0}")]
    UnsupportedFormat(String),

    #[error("Archive error: {0}")]
    Archive(String),
}

/// Supported archive formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Tar,
    TarGz,
    TarZst,
    Zip,
}

impl ArchiveFormat {
    /// Format for a MIME type as used in feeds.
    pub fn from_mime_type(mime: &str) -> Option<Self> {
        match mime {
            "application/x-tar" => Some(Self::Tar),
            "application/x-compressed-tar" | "application/gzip" => Some(Self::TarGz),
            "application/x-zstd-compressed-tar" => Some(Self::TarZst),
            "application/zip" => Some(Self::Zip),
            _ => None,
        }
    }

    /// Format guessed from a file name or URL.
    pub fn from_path(path: &str) -> Option<Self> {
        let lower = path.to_lowercase();
        if lower.ends_with(".tar.zst") || lower.ends_with(".tzst") {
            Some(Self::TarZst)
        } else if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            Some(Self::TarGz)
        } else if lower.ends_with(".tar") {
            Some(Self::Tar)
        } else if lower.ends_with(".zip") {
            Some(Self::Zip)
        } else {
            None
        }
    }

    /// MIME type if known, otherwise the extension of `path`.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedFormat` when neither identifies a supported format.
    pub fn detect(mime: Option<&str>, path: &str) -> Result<Self, ExtractError> {
        match mime {
            Some(mime) => Self::from_mime_type(mime)
                .ok_or_else(|| ExtractError::UnsupportedFormat(mime.to_string())),
            None => Self::from_path(path)
                .ok_or_else(|| ExtractError::UnsupportedFormat(path.to_string())),
        }
    }
}

/// Where and how to unpack one archive.
#[derive(Debug, Clone, Default)]
pub struct ExtractOptions {
    /// Only unpack this subdirectory of the archive, placing its contents at the target root.
    pub extract: Option<String>,
    /// Subdirectory of the target to unpack into.
    pub destination: Option<String>,
    /// Bytes to skip at the start of the file.
    pub start_offset: u64,
}

/// Unpack `archive_path` into `target`.
///
/// # Errors
///
/// Returns an error for unreadable archives, entries escaping the target and
/// `extract` directories missing from the archive.
pub fn extract_archive(
    archive_path: &Path,
    format: ArchiveFormat,
    target: &Path,
    options: &ExtractOptions,
) -> Result<(), ExtractError> {
    let base = match &options.destination {
        Some(dest) => target.join(sanitize(Path::new(dest))?),
        None => target.to_path_buf(),
    };
    fs::create_dir_all(&base)?;
    let subdir = options
        .extract
        .as_deref()
        .map(|e| sanitize(Path::new(e)))
        .transpose()?;

    let mut reader = BufReader::new(File::open(archive_path)?);
    if options.start_offset > 0 {
        if format == ArchiveFormat::Zip {
            return Err(ExtractError::UnsupportedFormat(
                "start-offset on zip archives".to_string(),
            ));
        }
        io::copy(&mut reader.by_ref().take(options.start_offset), &mut io::sink())?;
    }

    let found = match format {
        ArchiveFormat::Tar => extract_tar(reader, &base, subdir.as_deref())?,
        ArchiveFormat::TarGz => {
            extract_tar(flate2::read::GzDecoder::new(reader), &base, subdir.as_deref())?
        }
        ArchiveFormat::TarZst => extract_tar(ZstdDecoder::new(reader)?, &base, subdir.as_deref())?,
        ArchiveFormat::Zip => extract_zip(archive_path, &base, subdir.as_deref())?,
    };

    if let (Some(sub), false) = (&subdir, found) {
        return Err(ExtractError::Archive(format!(
            "Directory {} not found in archive",
            sub.display()
        )));
    }
    Ok(())
}

/// Relative path with `.` removed; rejects absolute paths and `..`.
fn sanitize(path: &Path) -> Result<PathBuf, ExtractError> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            _ => {
                return Err(ExtractError::Archive(format!(
                    "Invalid path in archive: {}",
                    path.display()
                )));
            }
        }
    }
    Ok(out)
}

/// Map an archive path to its location below the target, honoring `subdir`.
fn relocate(entry_path: &Path, subdir: Option<&Path>) -> Result<Option<PathBuf>, ExtractError> {
    let relative = sanitize(entry_path)?;
    match subdir {
        None => Ok(Some(relative)),
        Some(sub) => Ok(relative.strip_prefix(sub).ok().map(Path::to_path_buf)),
    }
}

/// Extract a tar stream; returns whether anything matched `subdir`.
fn extract_tar<R: Read>(reader: R, base: &Path, subdir: Option<&Path>) -> Result<bool, ExtractError> {
    let mut archive = tar::Archive::new(reader);
    archive.set_preserve_mtime(true);
    archive.set_preserve_permissions(true);
    let mut found = false;

    for entry in archive.entries()? {
        let mut entry = entry?;
        let entry_path = entry.path()?.into_owned();
        let Some(relative) = relocate(&entry_path, subdir)? else {
            continue;
        };
        found = true;
        let absolute_path = base.join(&relative);

        if entry.header().entry_type().is_dir() {
            fs::create_dir_all(&absolute_path)?;
            continue;
        }
        if let Some(parent) = absolute_path.parent() {
            fs::create_dir_all(parent)?;
        }
        entry.unpack(&absolute_path)?;
    }

    Ok(found)
}

/// Extract a zip archive; returns whether anything matched `subdir`.
fn extract_zip(archive_path: &Path, base: &Path, subdir: Option<&Path>) -> Result<bool, ExtractError> {
    let file = File::open(archive_path)?;
    let mut archive = ZipArchive::new(file).map_err(|e| ExtractError::Archive(e.to_string()))?;
    let mut found = false;

    for i in 0..archive.len() {
        let mut file = archive
            .by_index(i)
            .map_err(|e| ExtractError::Archive(e.to_string()))?;
        let Some(name) = file.enclosed_name() else {
            return Err(ExtractError::Archive(format!(
                "Invalid path in archive: {}",
                file.name()
            )));
        };
        let Some(relative) = relocate(&name, subdir)? else {
            continue;
        };
        found = true;
        let absolute_path = base.join(&relative);

        if file.is_dir() {
            fs::create_dir_all(&absolute_path)?;
            continue;
        }
        if let Some(p) = absolute_path.parent() {
            fs::create_dir_all(p)?;
        }

        let mut outfile = File::create(&absolute_path)?;
        io::copy(&mut file, &mut outfile)?;
        drop(outfile);

        #[cfg(unix)]
        if let Some(mode) = file.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&absolute_path, fs::Permissions::from_mode(mode & 0o777))?;
        }

        if let Some(mtime) = file.last_modified().and_then(zip_mtime) {
            filetime::set_file_mtime(&absolute_path, mtime)?;
        }
    }

    Ok(found)
}

fn zip_mtime(dt: zip::DateTime) -> Option<FileTime> {
    let date = chrono::NaiveDate::from_ymd_opt(
        i32::from(dt.year()),
        u32::from(dt.month()),
        u32::from(dt.day()),
    )?;
    let time = date.and_hms_opt(
        u32::from(dt.hour()),
        u32::from(dt.minute()),
        u32::from(dt.second()),
    )?;
    Some(FileTime::from_unix_time(time.and_utc().timestamp(), 0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn tar_gz_fixture(dir: &Path) -> PathBuf {
        let path = dir.join("fixture.tar.gz");
        let encoder = flate2::write::GzEncoder::new(
            File::create(&path).unwrap(),
            flate2::Compression::default(),
        );
        let mut builder = tar::Builder::new(encoder);
        for (name, data) in [("pkg-1.0/bin/tool", &b"#!/bin/sh\n"[..]), ("pkg-1.0/README", b"hi")] {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o755);
            header.set_mtime(1_200_000_000);
            header.set_cksum();
            builder.append_data(&mut header, name, data).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
        path
    }

    #[test]
    fn detects_formats() {
        assert_eq!(
            ArchiveFormat::detect(None, "http://x/a.tgz").unwrap(),
            ArchiveFormat::TarGz
        );
        assert_eq!(
            ArchiveFormat::detect(Some("application/zip"), "a.bin").unwrap(),
            ArchiveFormat::Zip
        );
        assert!(matches!(
            ArchiveFormat::detect(None, "a.rar"),
            Err(ExtractError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn extracts_subdirectory_into_destination() {
        let dir = tempfile::tempdir().unwrap();
        let archive = tar_gz_fixture(dir.path());
        let target = dir.path().join("out");
        let options = ExtractOptions {
            extract: Some("pkg-1.0".into()),
            destination: Some("opt".into()),
            start_offset: 0,
        };
        extract_archive(&archive, ArchiveFormat::TarGz, &target, &options).unwrap();
        assert_eq!(fs::read(target.join("opt/README")).unwrap(), b"hi");
        let mtime = fs::metadata(target.join("opt/bin/tool")).unwrap().modified().unwrap();
        assert_eq!(FileTime::from_system_time(mtime).unix_seconds(), 1_200_000_000);
    }

    #[test]
    fn missing_extract_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let archive = tar_gz_fixture(dir.path());
        let options = ExtractOptions {
            extract: Some("other".into()),
            ..ExtractOptions::default()
        };
        let err = extract_archive(&archive, ArchiveFormat::TarGz, &dir.path().join("out"), &options);
        assert!(matches!(err, Err(ExtractError::Archive(_))));
    }

    #[test]
    fn rejects_traversal_in_destination() {
        let dir = tempfile::tempdir().unwrap();
        let archive = tar_gz_fixture(dir.path());
        let options = ExtractOptions {
            destination: Some("../escape".into()),
            ..ExtractOptions::default()
        };
        assert!(extract_archive(&archive, ArchiveFormat::TarGz, &dir.path().join("out"), &options).is_err());
    }

    #[test]
    fn extracts_zip_with_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.zip");
        {
            let mut writer = zip::ZipWriter::new(File::create(&path).unwrap());
            let options = zip::write::SimpleFileOptions::default().last_modified_time(
                zip::DateTime::from_date_and_time(2010, 1, 2, 3, 4, 6).unwrap(),
            );
            writer.start_file("dir/file.txt", options).unwrap();
            writer.write_all(b"zip data").unwrap();
            writer.finish().unwrap();
        }
        let target = dir.path().join("out");
        extract_archive(&path, ArchiveFormat::Zip, &target, &ExtractOptions::default()).unwrap();
        let file = target.join("dir/file.txt");
        assert_eq!(fs::read(&file).unwrap(), b"zip data");
        let mtime = FileTime::from_last_modification_time(&fs::metadata(&file).unwrap());
        assert_eq!(mtime.unix_seconds(), 1_262_401_446);
    }
}
