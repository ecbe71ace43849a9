//! Applying access points to the desktop environment.

use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use sha2::{Digest, Sha256};
use tracing::debug;
use zi_schema::{Capability, Feed, FeedUri};

use super::access_point::AccessPoint;
use super::app_list::AppEntry;
use crate::paths::{Locations, atomic_write};

/// Creates and removes the OS artifacts behind access points.
///
/// Both operations must be idempotent: applying twice leaves one artifact,
/// unapplying something absent succeeds.
pub trait DesktopEnvironment: Send + Sync {
    /// Create the artifacts for `access_point`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the artifact cannot be written.
    fn apply(&self, entry: &AppEntry, access_point: &AccessPoint, feed: Option<&Feed>) -> io::Result<()>;

    /// Remove the artifacts for `access_point`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the artifact exists but cannot be removed.
    fn unapply(&self, entry: &AppEntry, access_point: &AccessPoint) -> io::Result<()>;
}

/// Shell stubs and freedesktop.org desktop entries below a zi home.
#[derive(Debug, Clone)]
pub struct UnixDesktop {
    locations: Locations,
    launcher: String,
}

impl UnixDesktop {
    /// Desktop writing into `locations`, launching through `zi` on the `PATH`.
    pub fn new(locations: Locations) -> Self {
        Self {
            locations,
            launcher: "zi".to_string(),
        }
    }

    /// Launch applications through `launcher` instead.
    pub fn with_launcher(mut self, launcher: impl Into<String>) -> Self {
        self.launcher = launcher.into();
        self
    }

    fn path_for(&self, entry: &AppEntry, access_point: &AccessPoint) -> io::Result<Option<PathBuf>> {
        let unique = |name: &str| unique_stem(entry, name);
        let path = match access_point {
            AccessPoint::AppAlias { name, .. } => self.locations.bin().join(alias_file(name)?),
            AccessPoint::MenuEntry { name, category, .. } => {
                let file = match category {
                    Some(category) => format!("zi-{}-{}.desktop", slug(category)?, unique(name)?),
                    None => format!("zi-{}.desktop", unique(name)?),
                };
                self.locations.applications().join(file)
            }
            AccessPoint::DesktopIcon { name, .. } => {
                self.locations.desktop().join(format!("{}.desktop", unique(name)?))
            }
            AccessPoint::AutoStart { name, .. } => self
                .locations
                .autostart()
                .join(format!("zi-{}.desktop", unique(name)?)),
            AccessPoint::FileType { capability } | AccessPoint::UrlProtocol { capability } => self
                .locations
                .applications()
                .join(format!("zi-default-{}.desktop", unique(capability)?)),
            AccessPoint::CapabilityRegistration => self
                .locations
                .applications()
                .join(format!("zi-capabilities-{}.desktop", unique("")?)),
            AccessPoint::DefaultProgram { .. } | AccessPoint::AutoPlay { .. } => return Ok(None),
        };
        Ok(Some(path))
    }

    fn exec_line(&self, entry: &AppEntry, command: Option<&str>) -> String {
        let mut args = vec![self.launcher.clone(), "run".to_string()];
        if let Some(command) = command {
            args.push("--command".to_string());
            args.push(command.to_string());
        }
        args.push(entry.interface.to_string());
        args
            .iter()
            .map(|a| format!("\"{}\"", a.replace('\\', "\\\\").replace('"', "\\\"")))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn alias_stub(&self, entry: &AppEntry, command: Option<&str>) -> String {
        let mut line = format!("exec {} run", shell_quote(&self.launcher));
        if let Some(command) = command {
            let _ = write!(line, " --command {}", shell_quote(command));
        }
        let _ = write!(line, " {} \"$@\"", shell_quote(entry.interface.as_str()));
        format!("#!/bin/sh\n{line}\n")
    }

    fn desktop_file(
        &self,
        entry: &AppEntry,
        name: &str,
        command: Option<&str>,
        feed: Option<&Feed>,
        extra: &[(&str, String)],
    ) -> String {
        let mut text = String::from("[Desktop Entry]\nType=Application\n");
        let _ = writeln!(text, "Name={name}");
        if let Some(summary) = feed.and_then(|f| f.summary.as_deref()) {
            let _ = writeln!(text, "Comment={summary}");
        }
        let _ = writeln!(text, "Exec={} %U", self.exec_line(entry, command));
        for (key, value) in extra {
            let _ = writeln!(text, "{key}={value}");
        }
        text
    }

    fn render(&self, entry: &AppEntry, access_point: &AccessPoint, feed: Option<&Feed>) -> Option<String> {
        let hidden = ("NoDisplay", "true".to_string());
        match access_point {
            AccessPoint::AppAlias { command, .. } => Some(self.alias_stub(entry, command.as_deref())),
            AccessPoint::MenuEntry {
                name,
                category,
                command,
            } => {
                let extra: Vec<_> = category
                    .iter()
                    .map(|c| ("Categories", format!("{c};")))
                    .collect();
                Some(self.desktop_file(entry, name, command.as_deref(), feed, &extra))
            }
            AccessPoint::DesktopIcon { name, command } | AccessPoint::AutoStart { name, command } => {
                Some(self.desktop_file(entry, name, command.as_deref(), feed, &[]))
            }
            AccessPoint::FileType { .. } | AccessPoint::UrlProtocol { .. } => {
                let mime = mime_list(&default_keys(entry, access_point)?);
                Some(self.desktop_file(entry, &entry.name, None, feed, &[("MimeType", mime), hidden]))
            }
            AccessPoint::CapabilityRegistration => {
                let capabilities = entry
                    .capability_lists
                    .iter()
                    .filter(|l| l.is_compatible())
                    .flat_map(|l| &l.entries);
                let mime = mime_list(&mime_types(capabilities));
                if mime.is_empty() {
                    return None;
                }
                Some(self.desktop_file(entry, &entry.name, None, feed, &[("MimeType", mime), hidden]))
            }
            AccessPoint::DefaultProgram { .. } | AccessPoint::AutoPlay { .. } => None,
        }
    }
}

impl DesktopEnvironment for UnixDesktop {
    fn apply(&self, entry: &AppEntry, access_point: &AccessPoint, feed: Option<&Feed>) -> io::Result<()> {
        let (Some(path), Some(contents)) = (
            self.path_for(entry, access_point)?,
            self.render(entry, access_point, feed),
        ) else {
            debug!(interface = %entry.interface, %access_point, "Not supported on this desktop, skipping");
            return Ok(());
        };
        atomic_write(&path, contents.as_bytes())?;
        if matches!(access_point, AccessPoint::AppAlias { .. }) {
            make_executable(&path)?;
        }
        if let Some(keys) = default_keys(entry, access_point) {
            set_default_handler(&self.locations.mime_apps(), &handler_name(&path), &keys)?;
        }
        debug!(interface = %entry.interface, %access_point, path = %path.display(), "Applied");
        Ok(())
    }

    fn unapply(&self, entry: &AppEntry, access_point: &AccessPoint) -> io::Result<()> {
        let Some(path) = self.path_for(entry, access_point)? else {
            return Ok(());
        };
        if matches!(access_point, AccessPoint::FileType { .. } | AccessPoint::UrlProtocol { .. }) {
            set_default_handler(&self.locations.mime_apps(), &handler_name(&path), &[])?;
        }
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(interface = %entry.interface, %access_point, path = %path.display(), "Removed");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(unix)]
fn make_executable(path: &std::path::Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn make_executable(_path: &std::path::Path) -> io::Result<()> {
    Ok(())
}

/// MIME types and URL scheme handlers the capabilities cover.
fn mime_types<'a>(capabilities: impl Iterator<Item = &'a Capability>) -> Vec<String> {
    let mut out = Vec::new();
    for capability in capabilities {
        match capability {
            Capability::FileType(file_type) => out.extend(
                file_type
                    .extensions
                    .iter()
                    .filter_map(|e| e.mime_type.clone()),
            ),
            Capability::UrlProtocol(protocol) => out.extend(
                protocol
                    .known_prefixes
                    .iter()
                    .map(|prefix| format!("x-scheme-handler/{prefix}")),
            ),
            _ => {}
        }
    }
    out
}

fn mime_list(types: &[String]) -> String {
    types.iter().map(|t| format!("{t};")).collect()
}

/// `[Default Applications]` keys a default access point takes over.
fn default_keys(entry: &AppEntry, access_point: &AccessPoint) -> Option<Vec<String>> {
    match access_point {
        AccessPoint::FileType { .. } | AccessPoint::UrlProtocol { .. } => {
            let capability = access_point.resolve_capability(entry).ok().flatten()?;
            Some(mime_types(std::iter::once(capability)))
        }
        _ => None,
    }
}

fn handler_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

const DEFAULT_APPLICATIONS: &str = "[Default Applications]";

/// Point `keys` at `handler` in the `[Default Applications]` section of
/// `mimeapps.list`, and stop `handler` from handling anything else.
fn set_default_handler(path: &Path, handler: &str, keys: &[String]) -> io::Result<()> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound && keys.is_empty() => return Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e),
    };

    let mut sections: Vec<(String, Vec<String>)> = vec![(String::new(), Vec::new())];
    for line in text.lines() {
        if line.trim_start().starts_with('[') {
            sections.push((line.trim().to_string(), Vec::new()));
        } else if let Some((_, body)) = sections.last_mut() {
            body.push(line.to_string());
        }
    }
    let index = match sections.iter().position(|(header, _)| header == DEFAULT_APPLICATIONS) {
        Some(index) => index,
        None if keys.is_empty() => return Ok(()),
        None => {
            if let Some((_, body)) = sections.last_mut() {
                if body.last().is_some_and(|l| !l.trim().is_empty()) {
                    body.push(String::new());
                }
            }
            sections.push((DEFAULT_APPLICATIONS.to_string(), Vec::new()));
            sections.len() - 1
        }
    };

    let body = &mut sections[index].1;
    body.retain_mut(|line| {
        let Some((key, value)) = line.split_once('=') else {
            return true;
        };
        if keys.iter().any(|k| k == key.trim()) {
            return false;
        }
        let handlers: Vec<&str> = value.split(';').map(str::trim).filter(|h| !h.is_empty()).collect();
        if !handlers.contains(&handler) {
            return true;
        }
        let others: Vec<&str> = handlers.into_iter().filter(|h| *h != handler).collect();
        if others.is_empty() {
            return false;
        }
        let kept = format!("{}={};", key.trim(), others.join(";"));
        *line = kept;
        true
    });
    while body.last().is_some_and(|l| l.trim().is_empty()) {
        body.pop();
    }
    body.extend(keys.iter().map(|key| format!("{key}={handler}")));

    let mut out = String::new();
    for (header, body) in &sections {
        if !header.is_empty() {
            out.push_str(header);
            out.push('\n');
        }
        for line in body {
            out.push_str(line);
            out.push('\n');
        }
    }
    atomic_write(path, out.as_bytes())?;
    debug!(path = %path.display(), handler, "Updated default applications");
    Ok(())
}

/// File name safe version of `name`, rejecting names that leave nothing.
fn slug(name: &str) -> io::Result<String> {
    let slug: String = name
        .chars()
        .map(|c| if c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | ' ') { c } else { '_' })
        .collect::<String>()
        .trim_start_matches('.')
        .trim()
        .to_string();
    if slug.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("'{name}' cannot be used as a file name"),
        ));
    }
    Ok(slug)
}

/// Slug of `name` made unique per application and per original spelling.
fn unique_stem(entry: &AppEntry, name: &str) -> io::Result<String> {
    let mut hasher = Sha256::new();
    hasher.update(entry.interface.as_str().as_bytes());
    hasher.update(b"\0");
    hasher.update(name.as_bytes());
    let hash = hex::encode(&hasher.finalize()[..4]);
    if name.is_empty() {
        return Ok(hash);
    }
    Ok(format!("{}-{hash}", slug(name)?))
}

/// Aliases are typed by users, so they keep their exact name.
fn alias_file(name: &str) -> io::Result<&str> {
    if name.is_empty() || name.starts_with('.') || name.contains(['/', '\\', '\0']) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("'{name}' is not a valid alias name"),
        ));
    }
    Ok(name)
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// In-memory desktop that records what is applied.
#[derive(Debug, Default)]
pub struct RecordingDesktop {
    applied: Mutex<Vec<(FeedUri, AccessPoint)>>,
    fail_on: Mutex<Option<AccessPoint>>,
}

impl RecordingDesktop {
    /// Empty desktop.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make applying `access_point` fail from now on.
    pub fn fail_on(&self, access_point: AccessPoint) {
        if let Ok(mut fail_on) = self.fail_on.lock() {
            *fail_on = Some(access_point);
        }
    }

    /// Currently applied access points.
    pub fn applied(&self) -> Vec<(FeedUri, AccessPoint)> {
        self.applied.lock().map(|a| a.clone()).unwrap_or_default()
    }

    /// Whether `access_point` is applied for `interface`.
    pub fn is_applied(&self, interface: &FeedUri, access_point: &AccessPoint) -> bool {
        self.applied()
            .iter()
            .any(|(i, a)| i == interface && a == access_point)
    }
}

impl DesktopEnvironment for RecordingDesktop {
    fn apply(&self, entry: &AppEntry, access_point: &AccessPoint, _feed: Option<&Feed>) -> io::Result<()> {
        let failing = self
            .fail_on
            .lock()
            .map(|f| f.as_ref() == Some(access_point))
            .unwrap_or(false);
        if failing {
            return Err(io::Error::other(format!("cannot apply {access_point}")));
        }
        let mut applied = self
            .applied
            .lock()
            .map_err(|_| io::Error::other("desktop state poisoned"))?;
        let record = (entry.interface.clone(), access_point.clone());
        if !applied.contains(&record) {
            applied.push(record);
        }
        Ok(())
    }

    fn unapply(&self, entry: &AppEntry, access_point: &AccessPoint) -> io::Result<()> {
        let mut applied = self
            .applied
            .lock()
            .map_err(|_| io::Error::other("desktop state poisoned"))?;
        applied.retain(|(i, a)| !(i == &entry.interface && a == access_point));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zi_schema::CapabilityList;
    use zi_schema::capability::{FileType, FileTypeExtension};

    fn entry() -> AppEntry {
        let mut entry = AppEntry::new(FeedUri::parse("http://example.com/editor.xml").unwrap(), "Editor");
        entry.capability_lists.push(CapabilityList {
            entries: vec![Capability::FileType(FileType {
                id: "Editor.Text".into(),
                explicit_only: false,
                description: None,
                extensions: vec![FileTypeExtension {
                    value: ".txt".into(),
                    mime_type: Some("text/plain".into()),
                }],
            })],
            ..CapabilityList::default()
        });
        entry
    }

    #[test]
    fn alias_stub_is_executable_and_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let desktop = UnixDesktop::new(Locations::new(dir.path()));
        let alias = AccessPoint::AppAlias {
            name: "edit".into(),
            command: Some("edit".into()),
        };
        desktop.apply(&entry(), &alias, None).unwrap();
        desktop.apply(&entry(), &alias, None).unwrap();

        let path = dir.path().join("bin/edit");
        let stub = fs::read_to_string(&path).unwrap();
        assert!(stub.starts_with("#!/bin/sh\n"));
        assert!(stub.contains("exec 'zi' run --command 'edit' 'http://example.com/editor.xml' \"$@\""));
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            assert_eq!(fs::metadata(&path).unwrap().permissions().mode() & 0o777, 0o755);
        }

        desktop.unapply(&entry(), &alias).unwrap();
        assert!(!path.exists());
        desktop.unapply(&entry(), &alias).unwrap();
    }

    /// The single file in `dir` whose name starts with `prefix`.
    fn named(dir: &Path, prefix: &str) -> PathBuf {
        let matches: Vec<PathBuf> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| p.file_name().unwrap().to_string_lossy().starts_with(prefix))
            .collect();
        assert_eq!(matches.len(), 1, "{prefix}* in {}", dir.display());
        matches.into_iter().next().unwrap()
    }

    #[test]
    fn menu_entry_and_file_type_desktop_files() {
        let dir = tempfile::tempdir().unwrap();
        let desktop = UnixDesktop::new(Locations::new(dir.path())).with_launcher("/usr/bin/zi");
        let menu = AccessPoint::MenuEntry {
            name: "Editor".into(),
            category: Some("Office".into()),
            command: None,
        };
        desktop.apply(&entry(), &menu, None).unwrap();
        let text = fs::read_to_string(named(&dir.path().join("applications"), "zi-Office-Editor-")).unwrap();
        assert!(text.contains("Name=Editor\n"));
        assert!(text.contains("Exec=\"/usr/bin/zi\" \"run\" \"http://example.com/editor.xml\" %U\n"));
        assert!(text.contains("Categories=Office;\n"));

        let default = AccessPoint::FileType {
            capability: "Editor.Text".into(),
        };
        desktop.apply(&entry(), &default, None).unwrap();
        let text = fs::read_to_string(named(&dir.path().join("applications"), "zi-default-Editor.Text-")).unwrap();
        assert!(text.contains("MimeType=text/plain;\n"));
        assert!(text.contains("NoDisplay=true\n"));
    }

    #[test]
    fn default_file_type_owns_mimeapps_entries() {
        let dir = tempfile::tempdir().unwrap();
        let locations = Locations::new(dir.path());
        fs::create_dir_all(locations.applications()).unwrap();
        fs::write(
            locations.mime_apps(),
            "[Added Associations]\ntext/plain=other.desktop;\n\n[Default Applications]\ntext/plain=other.desktop\nimage/png=viewer.desktop\n",
        )
        .unwrap();
        let desktop = UnixDesktop::new(locations.clone());
        let default = AccessPoint::FileType {
            capability: "Editor.Text".into(),
        };

        desktop.apply(&entry(), &default, None).unwrap();
        desktop.apply(&entry(), &default, None).unwrap();
        let handler = named(&locations.applications(), "zi-default-Editor.Text-");
        let handler = handler.file_name().unwrap().to_string_lossy().into_owned();
        assert_eq!(
            fs::read_to_string(locations.mime_apps()).unwrap(),
            format!(
                "[Added Associations]\ntext/plain=other.desktop;\n\n[Default Applications]\nimage/png=viewer.desktop\ntext/plain={handler}\n"
            )
        );

        // Another program took over in the meantime
        let list = fs::read_to_string(locations.mime_apps()).unwrap();
        fs::write(
            locations.mime_apps(),
            list.replace(&format!("text/plain={handler}"), "text/plain=other.desktop"),
        )
        .unwrap();
        desktop.unapply(&entry(), &default).unwrap();
        let list = fs::read_to_string(locations.mime_apps()).unwrap();
        assert!(list.contains("text/plain=other.desktop\n"));
        assert!(list.contains("image/png=viewer.desktop\n"));
        assert!(!list.contains(&handler));
    }

    #[test]
    fn default_url_protocol_is_removed_on_unapply() {
        let dir = tempfile::tempdir().unwrap();
        let locations = Locations::new(dir.path());
        let desktop = UnixDesktop::new(locations.clone());
        let mut entry = entry();
        entry.capability_lists[0]
            .entries
            .push(Capability::UrlProtocol(zi_schema::capability::UrlProtocol {
                id: "Editor.Url".into(),
                explicit_only: false,
                description: None,
                known_prefixes: vec!["edit".into()],
            }));
        let default = AccessPoint::UrlProtocol {
            capability: "Editor.Url".into(),
        };

        desktop.apply(&entry, &default, None).unwrap();
        let list = fs::read_to_string(locations.mime_apps()).unwrap();
        assert!(list.starts_with("[Default Applications]\nx-scheme-handler/edit=zi-default-Editor.Url-"));

        desktop.unapply(&entry, &default).unwrap();
        assert_eq!(fs::read_to_string(locations.mime_apps()).unwrap(), "[Default Applications]\n");
    }

    #[test]
    fn file_names_are_unique_and_never_empty() {
        let dir = tempfile::tempdir().unwrap();
        let desktop = UnixDesktop::new(Locations::new(dir.path()));
        let icon = |name: &str| AccessPoint::DesktopIcon {
            name: name.into(),
            command: None,
        };

        desktop.apply(&entry(), &icon("A/B"), None).unwrap();
        desktop.apply(&entry(), &icon("A_B"), None).unwrap();
        assert_eq!(fs::read_dir(dir.path().join("desktop")).unwrap().count(), 2);

        let mut other = entry();
        other.interface = FeedUri::parse("http://example.com/other.xml").unwrap();
        desktop.apply(&other, &icon("A_B"), None).unwrap();
        assert_eq!(fs::read_dir(dir.path().join("desktop")).unwrap().count(), 3);

        let err = desktop.apply(&entry(), &icon("..."), None).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        let alias = AccessPoint::AppAlias {
            name: "../edit".into(),
            command: None,
        };
        let err = desktop.apply(&entry(), &alias, None).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn windows_only_access_points_are_no_ops() {
        let dir = tempfile::tempdir().unwrap();
        let desktop = UnixDesktop::new(Locations::new(dir.path()));
        let autoplay = AccessPoint::AutoPlay {
            capability: "Play".into(),
        };
        desktop.apply(&entry(), &autoplay, None).unwrap();
        desktop.unapply(&entry(), &autoplay).unwrap();
        assert!(fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[test]
    fn recording_desktop_failure_injection() {
        let desktop = RecordingDesktop::new();
        let icon = AccessPoint::DesktopIcon {
            name: "Editor".into(),
            command: None,
        };
        desktop.apply(&entry(), &icon, None).unwrap();
        assert!(desktop.is_applied(&entry().interface, &icon));

        desktop.fail_on(icon.clone());
        assert!(desktop.apply(&entry(), &icon, None).is_err());
        desktop.unapply(&entry(), &icon).unwrap();
        assert!(desktop.applied().is_empty());
    }
}
