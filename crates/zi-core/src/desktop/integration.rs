//! Reconciles the application list with the desktop environment.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};
use zi_schema::{Feed, FeedUri};

use super::access_point::AccessPoint;
use super::app_list::{AppEntry, AppList, current_hostname};
use super::environment::DesktopEnvironment;
use super::{AccessPointConflict, IntegrationError};
use crate::feeds::FeedProvider;

/// Owns the application list and applies its access points.
///
/// Mutating operations other than [`add_app`](Self::add_app) and
/// [`remove_app`](Self::remove_app) only change the in-memory list; call
/// [`finish`](Self::finish) to persist it.
pub struct IntegrationManager {
    app_list_path: PathBuf,
    app_list: AppList,
    desktop: Arc<dyn DesktopEnvironment>,
    hostname: String,
}

impl std::fmt::Debug for IntegrationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntegrationManager")
            .field("app_list_path", &self.app_list_path)
            .field("entries", &self.app_list.entries.len())
            .finish_non_exhaustive()
    }
}

impl IntegrationManager {
    /// Open the list at `app_list_path`, creating an empty one if missing.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing list cannot be read or parsed, or a new
    /// one cannot be written.
    pub fn new(
        app_list_path: impl Into<PathBuf>,
        desktop: Arc<dyn DesktopEnvironment>,
    ) -> Result<Self, IntegrationError> {
        let app_list_path = app_list_path.into();
        let app_list = if app_list_path.exists() {
            AppList::load(&app_list_path)?
        } else {
            let list = AppList::default();
            list.save(&app_list_path)?;
            list
        };
        Ok(Self {
            app_list_path,
            app_list,
            desktop,
            hostname: current_hostname(),
        })
    }

    /// Match hostname filters against `hostname` instead of this machine's name.
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    /// The current list.
    pub fn app_list(&self) -> &AppList {
        &self.app_list
    }

    /// Where the list is stored.
    pub fn app_list_path(&self) -> &Path {
        &self.app_list_path
    }

    fn entry(&self, interface: &FeedUri) -> Result<&AppEntry, IntegrationError> {
        self.app_list
            .get(interface)
            .ok_or_else(|| IntegrationError::NotInList(interface.clone()))
    }

    fn entry_mut(&mut self, interface: &FeedUri) -> Result<&mut AppEntry, IntegrationError> {
        self.app_list
            .get_mut(interface)
            .ok_or_else(|| IntegrationError::NotInList(interface.clone()))
    }

    /// Add `interface` to the list without integrating it.
    ///
    /// # Errors
    ///
    /// Returns [`IntegrationError::AlreadyInList`] if it is already present.
    pub fn add_app(&mut self, interface: &FeedUri, feed: &Feed) -> Result<&AppEntry, IntegrationError> {
        if self.app_list.contains(interface) {
            return Err(IntegrationError::AlreadyInList(interface.clone()));
        }
        let mut entry = AppEntry::new(interface.clone(), feed.name.clone());
        entry.capability_lists.clone_from(&feed.capability_lists);
        self.app_list.entries.push(entry);
        self.app_list.save(&self.app_list_path)?;
        info!(%interface, "Added application");
        self.entry(interface)
    }

    /// Add a copy of `prototype` and apply its access points.
    ///
    /// The entry is removed again if applying fails.
    ///
    /// # Errors
    ///
    /// Returns [`IntegrationError::AlreadyInList`] if the interface is already
    /// present, or the error of applying the access points.
    pub fn add_app_from(&mut self, prototype: &AppEntry, feed: Option<&Feed>) -> Result<(), IntegrationError> {
        let interface = &prototype.interface;
        if self.app_list.contains(interface) {
            return Err(IntegrationError::AlreadyInList(interface.clone()));
        }
        let mut entry = prototype.clone();
        entry.access_points = None;
        entry.touch();
        self.app_list.entries.push(entry);

        if let Some(points) = &prototype.access_points {
            if let Err(e) = self.add_access_points(interface, feed, points) {
                self.app_list.entries.retain(|e| e.interface != *interface);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Remove `interface` and, best effort, its access points.
    ///
    /// # Errors
    ///
    /// Returns [`IntegrationError::NotInList`] if it is not present, or an
    /// error saving the list.
    pub fn remove_app(&mut self, interface: &FeedUri) -> Result<(), IntegrationError> {
        self.remove_entry(interface)?;
        self.app_list.save(&self.app_list_path)?;
        info!(%interface, "Removed application");
        Ok(())
    }

    pub(crate) fn remove_entry(&mut self, interface: &FeedUri) -> Result<AppEntry, IntegrationError> {
        let index = self
            .app_list
            .entries
            .iter()
            .position(|e| e.interface == *interface)
            .ok_or_else(|| IntegrationError::NotInList(interface.clone()))?;
        let entry = self.app_list.entries.remove(index);
        for point in entry.access_points() {
            if let Err(e) = self.desktop.unapply(&entry, point) {
                warn!(%interface, access_point = %point, error = %e, "Failed to remove access point");
            }
        }
        Ok(entry)
    }

    /// Refresh an entry after its feed changed.
    ///
    /// Default access points and capability registrations are re-created
    /// against the new capabilities; ones that no longer resolve are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`IntegrationError::NotInList`] or an error unapplying the old
    /// access points.
    pub fn update_app(&mut self, interface: &FeedUri, feed: &Feed) -> Result<(), IntegrationError> {
        let to_refresh: Vec<AccessPoint> = self
            .entry(interface)?
            .access_points()
            .iter()
            .filter(|p| p.is_default() || matches!(p, AccessPoint::CapabilityRegistration))
            .cloned()
            .collect();
        self.remove_access_points(interface, &to_refresh)?;

        let entry = self.entry_mut(interface)?;
        entry.name.clone_from(&feed.name);
        entry.capability_lists.clone_from(&feed.capability_lists);
        entry.touch();

        for point in to_refresh {
            if let Err(e) = self.add_access_points(interface, Some(feed), std::slice::from_ref(&point)) {
                warn!(%interface, access_point = %point, error = %e, "Dropping access point that no longer applies");
            }
        }
        Ok(())
    }

    /// Apply `access_points` for `interface` and record them.
    ///
    /// Nothing is applied if any of them conflicts with an access point of
    /// another entry, or with a different access point of the same entry.
    /// If applying fails part way, the access points applied so far that were
    /// not recorded before are removed again.
    ///
    /// # Errors
    ///
    /// Returns [`IntegrationError::Conflict`] listing every collision, or the
    /// error of the failed application.
    pub fn add_access_points(
        &mut self,
        interface: &FeedUri,
        feed: Option<&Feed>,
        access_points: &[AccessPoint],
    ) -> Result<(), IntegrationError> {
        let entry = self.entry(interface)?;
        self.check_for_conflicts(entry, access_points)?;

        if entry.applies_to_host(&self.hostname) {
            let mut applied: Vec<&AccessPoint> = Vec::new();
            for point in access_points {
                if let Err(e) = self.desktop.apply(entry, point, feed) {
                    for done in applied.iter().rev() {
                        if entry.access_points().contains(*done) {
                            continue;
                        }
                        if let Err(undo) = self.desktop.unapply(entry, done) {
                            warn!(%interface, access_point = %done, error = %undo, "Rollback failed");
                        }
                    }
                    return Err(e.into());
                }
                applied.push(point);
            }
        } else {
            debug!(%interface, hostname = %self.hostname, "Hostname filter does not match, recording only");
        }

        let entry = self.entry_mut(interface)?;
        let points = entry.access_points.get_or_insert_with(Vec::new);
        for point in access_points {
            if !points.contains(point) {
                points.push(point.clone());
            }
        }
        entry.touch();
        Ok(())
    }

    /// Remove `access_points` from `interface` and from the desktop.
    ///
    /// # Errors
    ///
    /// Returns [`IntegrationError::NotInList`] or the error of removing an
    /// artifact.
    pub fn remove_access_points(
        &mut self,
        interface: &FeedUri,
        access_points: &[AccessPoint],
    ) -> Result<(), IntegrationError> {
        let entry = self.entry(interface)?;
        for point in access_points {
            self.desktop.unapply(entry, point)?;
        }
        let entry = self.entry_mut(interface)?;
        if let Some(points) = &mut entry.access_points {
            points.retain(|p| !access_points.contains(p));
        }
        entry.touch();
        Ok(())
    }

    fn check_for_conflicts(&self, entry: &AppEntry, access_points: &[AccessPoint]) -> Result<(), IntegrationError> {
        let existing = self.app_list.conflict_map()?;
        let mut requested: HashMap<String, &AccessPoint> = HashMap::new();
        let mut conflicts = Vec::new();

        for point in access_points {
            for id in point.conflict_ids(entry)? {
                if let Some(owner) = existing.get(&id) {
                    if owner.interface != entry.interface || owner.access_point != *point {
                        conflicts.push(AccessPointConflict {
                            id: id.clone(),
                            existing_interface: owner.interface.clone(),
                            existing: owner.access_point.clone(),
                            requested: point.clone(),
                        });
                    }
                }
                if let Some(other) = requested.insert(id.clone(), point) {
                    if other != point {
                        conflicts.push(AccessPointConflict {
                            id,
                            existing_interface: entry.interface.clone(),
                            existing: other.clone(),
                            requested: point.clone(),
                        });
                    }
                }
            }
        }

        if conflicts.is_empty() {
            Ok(())
        } else {
            Err(IntegrationError::Conflict {
                interface: entry.interface.clone(),
                conflicts,
            })
        }
    }

    /// Re-apply every recorded access point, e.g. after artifacts were deleted.
    ///
    /// # Errors
    ///
    /// Returns the first error applying an access point or saving the list.
    pub fn repair(&self, feeds: &dyn FeedProvider) -> Result<(), IntegrationError> {
        for entry in &self.app_list.entries {
            if entry.access_points().is_empty() || !entry.applies_to_host(&self.hostname) {
                continue;
            }
            let feed = match feeds.get_feed(&entry.interface) {
                Ok(feed) => Some(feed),
                Err(e) => {
                    debug!(interface = %entry.interface, error = %e, "Repairing without feed");
                    None
                }
            };
            for point in entry.access_points() {
                self.desktop.apply(entry, point, feed.as_deref())?;
            }
        }
        self.finish()
    }

    /// Persist the list, retrying once after a short pause on I/O errors.
    ///
    /// # Errors
    ///
    /// Returns the error of the second attempt.
    pub fn finish(&self) -> Result<(), IntegrationError> {
        match self.app_list.save(&self.app_list_path) {
            Err(IntegrationError::Io(e)) => {
                warn!(error = %e, "Saving application list failed, retrying");
                std::thread::sleep(Duration::from_secs(1));
                self.app_list.save(&self.app_list_path)
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::desktop::environment::RecordingDesktop;
    use zi_schema::capability::{DefaultProgram, FileType, FileTypeExtension};
    use zi_schema::{Capability, CapabilityList};

    fn uri(name: &str) -> FeedUri {
        FeedUri::parse(&format!("http://example.com/{name}.xml")).unwrap()
    }

    fn feed(name: &str, extension: &str) -> Feed {
        let xml = format!(
            r#"<interface xmlns="http://zero-install.sourceforge.net/2004/injector/interface" uri="http://example.com/{lower}.xml">
  <name>{name}</name><summary>test</summary>
</interface>"#,
            lower = name.to_lowercase()
        );
        let mut feed = Feed::parse(&xml, &uri(&name.to_lowercase())).unwrap();
        feed.capability_lists.push(CapabilityList {
            entries: vec![Capability::FileType(FileType {
                id: format!("{name}.File"),
                explicit_only: false,
                description: None,
                extensions: vec![FileTypeExtension {
                    value: extension.to_string(),
                    mime_type: None,
                }],
            })],
            ..CapabilityList::default()
        });
        feed
    }

    fn manager(dir: &Path) -> (IntegrationManager, Arc<RecordingDesktop>) {
        let desktop = Arc::new(RecordingDesktop::new());
        let manager = IntegrationManager::new(dir.join("app-list.xml"), desktop.clone()).unwrap();
        (manager, desktop)
    }

    fn alias(name: &str) -> AccessPoint {
        AccessPoint::AppAlias {
            name: name.into(),
            command: None,
        }
    }

    #[test]
    fn add_app_is_unique_and_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let (mut manager, _) = manager(dir.path());
        let entry = manager.add_app(&uri("editor"), &feed("Editor", ".txt")).unwrap();
        assert_eq!(entry.name, "Editor");
        assert!(entry.access_points.is_none());
        assert_eq!(entry.capability_lists.len(), 1);

        assert!(matches!(
            manager.add_app(&uri("editor"), &feed("Editor", ".txt")),
            Err(IntegrationError::AlreadyInList(_))
        ));
        assert_eq!(manager.app_list().entries.len(), 1);
        assert_eq!(AppList::load(manager.app_list_path()).unwrap().entries.len(), 1);
    }

    #[test]
    fn conflicting_access_point_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (mut manager, desktop) = manager(dir.path());
        manager.add_app(&uri("editor"), &feed("Editor", ".txt")).unwrap();
        manager.add_app(&uri("viewer"), &feed("Viewer", ".txt")).unwrap();
        manager.add_access_points(&uri("editor"), None, &[alias("open")]).unwrap();

        let err = manager
            .add_access_points(&uri("viewer"), None, &[alias("view"), alias("open")])
            .unwrap_err();
        match err {
            IntegrationError::Conflict { conflicts, .. } => {
                assert_eq!(conflicts.len(), 1);
                assert_eq!(conflicts[0].id, "alias:open");
                assert_eq!(conflicts[0].existing_interface, uri("editor"));
            }
            other => panic!("unexpected error {other}"),
        }
        assert!(desktop.is_applied(&uri("editor"), &alias("open")));
        assert!(!desktop.is_applied(&uri("viewer"), &alias("view")));
        assert!(manager.app_list().get(&uri("viewer")).unwrap().access_points.is_none());

        let file_type = |c: &str| AccessPoint::FileType { capability: c.into() };
        manager
            .add_access_points(&uri("editor"), None, &[file_type("Editor.File")])
            .unwrap();
        assert!(matches!(
            manager.add_access_points(&uri("viewer"), None, &[file_type("Viewer.File")]),
            Err(IntegrationError::Conflict { .. })
        ));
    }

    #[test]
    fn registrations_for_the_same_extension_coexist() {
        let dir = tempfile::tempdir().unwrap();
        let (mut manager, desktop) = manager(dir.path());
        manager.add_app(&uri("editor"), &feed("Editor", ".txt")).unwrap();
        manager.add_app(&uri("viewer"), &feed("Viewer", ".txt")).unwrap();

        for app in ["editor", "viewer"] {
            manager
                .add_access_points(&uri(app), None, &[AccessPoint::CapabilityRegistration])
                .unwrap();
            assert!(desktop.is_applied(&uri(app), &AccessPoint::CapabilityRegistration));
        }
    }

    #[test]
    fn default_program_for_a_service_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let (mut manager, desktop) = manager(dir.path());
        for name in ["Mailer", "Postbox"] {
            let mut mail = feed(name, ".eml");
            mail.capability_lists.push(CapabilityList {
                entries: vec![Capability::DefaultProgram(DefaultProgram {
                    id: format!("{name}.Mail"),
                    explicit_only: false,
                    service: "Mail".into(),
                })],
                ..CapabilityList::default()
            });
            manager.add_app(&uri(&name.to_lowercase()), &mail).unwrap();
        }
        let default = |c: &str| AccessPoint::DefaultProgram { capability: c.into() };

        manager
            .add_access_points(&uri("mailer"), None, &[default("Mailer.Mail")])
            .unwrap();
        match manager.add_access_points(&uri("postbox"), None, &[default("Postbox.Mail")]) {
            Err(IntegrationError::Conflict { conflicts, .. }) => {
                assert_eq!(conflicts[0].id, "clients:Mail");
                assert_eq!(conflicts[0].existing_interface, uri("mailer"));
            }
            other => panic!("expected a conflict, got {other:?}"),
        }
        assert!(!desktop.is_applied(&uri("postbox"), &default("Postbox.Mail")));

        // Registering both as mail clients is fine
        for app in ["mailer", "postbox"] {
            manager
                .add_access_points(&uri(app), None, &[AccessPoint::CapabilityRegistration])
                .unwrap();
        }
    }

    #[test]
    fn re_adding_same_access_point_is_not_a_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let (mut manager, _) = manager(dir.path());
        manager.add_app(&uri("editor"), &feed("Editor", ".txt")).unwrap();
        manager.add_access_points(&uri("editor"), None, &[alias("edit")]).unwrap();
        manager.add_access_points(&uri("editor"), None, &[alias("edit")]).unwrap();
        assert_eq!(manager.app_list().get(&uri("editor")).unwrap().access_points().len(), 1);

        let with_command = AccessPoint::AppAlias {
            name: "edit".into(),
            command: Some("other".into()),
        };
        assert!(manager.add_access_points(&uri("editor"), None, &[with_command]).is_err());
    }

    #[test]
    fn failed_apply_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let (mut manager, desktop) = manager(dir.path());
        manager.add_app(&uri("editor"), &feed("Editor", ".txt")).unwrap();
        desktop.fail_on(alias("broken"));

        assert!(
            manager
                .add_access_points(&uri("editor"), None, &[alias("a"), alias("broken")])
                .is_err()
        );
        assert!(desktop.applied().is_empty());
        assert!(manager.app_list().get(&uri("editor")).unwrap().access_points.is_none());
    }

    #[test]
    fn remove_app_tolerates_drift() {
        let dir = tempfile::tempdir().unwrap();
        let (mut manager, desktop) = manager(dir.path());
        manager.add_app(&uri("editor"), &feed("Editor", ".txt")).unwrap();
        manager.add_access_points(&uri("editor"), None, &[alias("edit")]).unwrap();
        let entry = manager.app_list().get(&uri("editor")).unwrap().clone();
        desktop.unapply(&entry, &alias("edit")).unwrap();

        manager.remove_app(&uri("editor")).unwrap();
        assert!(!manager.app_list().contains(&uri("editor")));
        assert!(matches!(
            manager.remove_app(&uri("editor")),
            Err(IntegrationError::NotInList(_))
        ));
    }

    #[test]
    fn update_app_drops_defaults_that_no_longer_resolve() {
        let dir = tempfile::tempdir().unwrap();
        let (mut manager, desktop) = manager(dir.path());
        let old_feed = feed("Editor", ".txt");
        manager.add_app(&uri("editor"), &old_feed).unwrap();
        let default = AccessPoint::FileType {
            capability: "Editor.File".into(),
        };
        manager
            .add_access_points(
                &uri("editor"),
                Some(&old_feed),
                &[alias("edit"), default.clone(), AccessPoint::CapabilityRegistration],
            )
            .unwrap();

        let mut new_feed = feed("Editor", ".md");
        new_feed.name = "Editor 2".into();
        manager.update_app(&uri("editor"), &new_feed).unwrap();
        let entry = manager.app_list().get(&uri("editor")).unwrap();
        assert_eq!(entry.name, "Editor 2");
        assert_eq!(entry.access_points().len(), 3);

        new_feed.capability_lists.clear();
        manager.update_app(&uri("editor"), &new_feed).unwrap();
        let entry = manager.app_list().get(&uri("editor")).unwrap();
        assert_eq!(entry.access_points(), [alias("edit"), AccessPoint::CapabilityRegistration]);
        assert!(!desktop.is_applied(&uri("editor"), &default));
    }

    #[test]
    fn hostname_filter_records_without_applying() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, desktop) = manager(dir.path());
        let mut manager = manager.with_hostname("home-pc");
        let mut prototype = AppEntry::new(uri("editor"), "Editor");
        prototype.hostname = Some("^work-".into());
        prototype.access_points = Some(vec![alias("edit")]);

        manager.add_app_from(&prototype, None).unwrap();
        assert!(desktop.applied().is_empty());
        assert_eq!(manager.app_list().get(&uri("editor")).unwrap().access_points().len(), 1);
    }

    #[test]
    fn repair_reapplies_access_points() {
        struct NoFeeds;
        impl FeedProvider for NoFeeds {
            fn get_feed(&self, uri: &FeedUri) -> Result<Arc<Feed>, crate::feeds::FeedError> {
                Err(crate::feeds::FeedError::NotCached(uri.clone()))
            }
            fn is_stale(&self, _uri: &FeedUri) -> bool {
                false
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let (mut manager, desktop) = manager(dir.path());
        manager.add_app(&uri("editor"), &feed("Editor", ".txt")).unwrap();
        manager.add_access_points(&uri("editor"), None, &[alias("edit")]).unwrap();
        let entry = manager.app_list().get(&uri("editor")).unwrap().clone();
        desktop.unapply(&entry, &alias("edit")).unwrap();

        manager.repair(&NoFeeds).unwrap();
        manager.repair(&NoFeeds).unwrap();
        assert_eq!(desktop.applied(), [(uri("editor"), alias("edit"))]);
    }
}
