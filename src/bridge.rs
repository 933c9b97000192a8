//! Wires the gallery into the host: the toolbar button, folder resolution for
//! the selected character, and the delete/refresh callbacks handed to the
//! overlay.

use std::sync::Arc;

use crate::data::{GalleryService, HostContext, SettingsStore};
use crate::gallery::{GalleryError, GalleryFolder, GalleryItem, SortOrder};
use crate::overlay::{DeleteHandler, Overlay, RefreshHandler};
use crate::shell::{ButtonAction, NoticeLevel, Notifier, Toolbar, ToolbarButton, GALLERY_BUTTON_ID};

/// The gallery button goes right after this one when the host has it.
pub const ANCHOR_BUTTON_ID: &str = crate::shell::CHARACTER_BUTTON_ID;
pub const GALLERY_HOTKEY: char = 'g';

#[derive(Clone)]
pub struct HostBridge {
    service: Arc<dyn GalleryService>,
    context: Arc<dyn HostContext>,
    settings: Arc<dyn SettingsStore>,
    notifier: Arc<dyn Notifier>,
}

impl HostBridge {
    pub fn new(
        service: Arc<dyn GalleryService>,
        context: Arc<dyn HostContext>,
        settings: Arc<dyn SettingsStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            service,
            context,
            settings,
            notifier,
        }
    }

    pub fn gallery_button() -> ToolbarButton {
        ToolbarButton {
            id: GALLERY_BUTTON_ID.to_string(),
            icon: "▦",
            tooltip: "Gallery Pro".to_string(),
            hotkey: GALLERY_HOTKEY,
            action: ButtonAction::OpenGallery,
        }
    }

    /// Adds the gallery button once. Returns false when it was already there.
    pub fn attach(&self, toolbar: &mut Toolbar) -> bool {
        if toolbar.contains(GALLERY_BUTTON_ID) {
            return false;
        }
        toolbar.insert_after(ANCHOR_BUTTON_ID, Self::gallery_button());
        log::debug!("gallery button attached");
        true
    }

    pub fn context(&self) -> &Arc<dyn HostContext> {
        &self.context
    }

    /// Folder for the selected character: a per-avatar override when one is
    /// configured, otherwise the character name.
    pub fn resolve_folder(&self) -> Result<GalleryFolder, GalleryError> {
        let id = self
            .context
            .selected_subject_id()
            .ok_or(GalleryError::NoSubject)?;
        let subject = self
            .context
            .subject(&id)
            .map_err(|err| {
                log::error!("character lookup for {id} failed: {err:#}");
                GalleryError::HostUnavailable
            })?
            .ok_or(GalleryError::SubjectNotFound)?;
        let name = self
            .settings
            .folder_override(&subject.avatar)
            .filter(|folder| !folder.trim().is_empty())
            .unwrap_or(subject.name);
        GalleryFolder::new(name).ok_or(GalleryError::NoFolder)
    }

    /// Lists a folder. Failures are logged and reported, and come back empty.
    pub fn fetch_items(&self, folder: &GalleryFolder, sort: SortOrder) -> Vec<GalleryItem> {
        fetch_or_report(self.service.as_ref(), self.notifier.as_ref(), folder, sort)
    }

    /// A missing selection is informational; anything else is an error.
    pub fn report(&self, err: &GalleryError) {
        let level = match err {
            GalleryError::NoSubject => NoticeLevel::Info,
            _ => NoticeLevel::Error,
        };
        log::info!("gallery unavailable: {err}");
        self.notifier.notify(level, &err.to_string());
    }

    /// The toolbar button action. Returns whether the overlay ended up open.
    pub fn open_gallery(&self, overlay: &mut Overlay) -> bool {
        let folder = match self.resolve_folder() {
            Ok(folder) => folder,
            Err(err) => {
                self.report(&err);
                return false;
            }
        };

        let sort = self.settings.sort_order().unwrap_or_default();
        let items = self.fetch_items(&folder, sort);
        log::info!("opening gallery for {folder} with {} item(s)", items.len());
        if items.is_empty() {
            self.notifier.notify(
                NoticeLevel::Info,
                &format!("No images in {folder} yet. Press u to upload."),
            );
        }

        let handlers = Arc::new(FolderHandlers {
            service: self.service.clone(),
            notifier: self.notifier.clone(),
            folder: folder.clone(),
        });
        overlay.open(
            items,
            0,
            Some(handlers.clone() as Arc<dyn DeleteHandler>),
            Some(handlers as Arc<dyn RefreshHandler>),
            Some(folder),
        );
        overlay.is_open()
    }
}

/// Delete and refresh bound to one folder for the life of a gallery session.
struct FolderHandlers {
    service: Arc<dyn GalleryService>,
    notifier: Arc<dyn Notifier>,
    folder: GalleryFolder,
}

impl DeleteHandler for FolderHandlers {
    fn delete(&self, src: &str) {
        match self.service.delete_item(src) {
            Ok(()) => {
                log::info!("deleted {src}");
                self.notifier.notify(NoticeLevel::Success, "Image deleted");
            }
            Err(err) => {
                log::error!("delete of {src} failed: {err:#}");
                self.notifier
                    .notify(NoticeLevel::Error, "Failed to delete image");
            }
        }
    }
}

impl RefreshHandler for FolderHandlers {
    fn refresh(&self, sort: SortOrder) -> Vec<GalleryItem> {
        fetch_or_report(self.service.as_ref(), self.notifier.as_ref(), &self.folder, sort)
    }
}

fn fetch_or_report(
    service: &dyn GalleryService,
    notifier: &dyn Notifier,
    folder: &GalleryFolder,
    sort: SortOrder,
) -> Vec<GalleryItem> {
    match service.list_items(folder, sort) {
        Ok(items) => items,
        Err(err) => {
            log::error!("listing {folder} failed: {err:#}");
            notifier.notify(NoticeLevel::Error, "Failed to load gallery images");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{MockGalleryService, MockHostContext, MockSettingsStore};
    use crate::gallery::Subject;
    use crate::overlay::Environment;
    use crate::shell::{host_toolbar, NoticeBoard, QUIT_BUTTON_ID};
    use std::collections::BTreeMap;
    use std::time::Duration;

    struct Fixture {
        bridge: HostBridge,
        overlay: Overlay,
        service: Arc<MockGalleryService>,
        settings: Arc<MockSettingsStore>,
        notices: Arc<NoticeBoard>,
    }

    fn ann() -> Subject {
        Subject {
            name: "Ann".into(),
            avatar: "ann.png".into(),
        }
    }

    fn fixture(
        service: MockGalleryService,
        context: MockHostContext,
        settings: MockSettingsStore,
    ) -> Fixture {
        let service = Arc::new(service);
        let settings = Arc::new(settings);
        let notices = Arc::new(NoticeBoard::new(Duration::from_secs(60)));
        let bridge = HostBridge::new(
            service.clone(),
            Arc::new(context),
            settings.clone(),
            notices.clone(),
        );
        let overlay = Overlay::new(Environment {
            settings: settings.clone(),
            notifier: notices.clone(),
            uploader: Some(service.clone()),
            confirm: None,
        });
        Fixture {
            bridge,
            overlay,
            service,
            settings,
            notices,
        }
    }

    fn selected_ann() -> MockHostContext {
        MockHostContext {
            selected: Some("Ann".into()),
            subjects: vec![ann()],
            ..Default::default()
        }
    }

    #[test]
    fn attach_places_button_after_anchor_once() {
        let fx = fixture(
            MockGalleryService::default(),
            MockHostContext::default(),
            MockSettingsStore::default(),
        );
        let mut toolbar = host_toolbar();
        assert!(fx.bridge.attach(&mut toolbar));
        assert!(!fx.bridge.attach(&mut toolbar));
        let ids: Vec<&str> = toolbar.buttons().iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, vec![ANCHOR_BUTTON_ID, GALLERY_BUTTON_ID, QUIT_BUTTON_ID]);

        let mut bare = Toolbar::default();
        fx.bridge.attach(&mut bare);
        assert_eq!(bare.buttons().len(), 1);
    }

    #[test]
    fn no_selection_reports_info_and_skips_listing() {
        let mut fx = fixture(
            MockGalleryService::default(),
            MockHostContext::default(),
            MockSettingsStore::default(),
        );
        assert!(!fx.bridge.open_gallery(&mut fx.overlay));
        assert!(fx.service.list_calls.lock().is_empty());
        let notices = fx.notices.active();
        assert_eq!(notices[0].level, NoticeLevel::Info);
        assert_eq!(notices[0].message, "Please select a character first");
    }

    #[test]
    fn missing_subject_record_reports_error() {
        let context = MockHostContext {
            selected: Some("Ghost".into()),
            subjects: vec![ann()],
            ..Default::default()
        };
        let mut fx = fixture(
            MockGalleryService::default(),
            context,
            MockSettingsStore::default(),
        );
        assert!(!fx.bridge.open_gallery(&mut fx.overlay));
        let notices = fx.notices.active();
        assert_eq!(notices[0].level, NoticeLevel::Error);
        assert_eq!(notices[0].message, "Character data not found.");
    }

    #[test]
    fn unreachable_host_reports_lookup_failure() {
        let context = MockHostContext {
            offline: true,
            ..selected_ann()
        };
        let mut fx = fixture(
            MockGalleryService::default(),
            context,
            MockSettingsStore::default(),
        );
        assert_eq!(
            fx.bridge.resolve_folder(),
            Err(GalleryError::HostUnavailable)
        );
        assert!(!fx.bridge.open_gallery(&mut fx.overlay));
        assert!(fx.service.list_calls.lock().is_empty());
        let notices = fx.notices.active();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].level, NoticeLevel::Error);
        assert_eq!(notices[0].message, "Failed to load characters from the host");
    }

    #[test]
    fn folder_override_wins_over_name() {
        let mut folders = BTreeMap::new();
        folders.insert("ann.png".to_string(), "Ann Archive".to_string());
        let settings = MockSettingsStore {
            folders,
            ..Default::default()
        };
        let fx = fixture(MockGalleryService::default(), selected_ann(), settings);
        assert_eq!(fx.bridge.resolve_folder().unwrap().as_str(), "Ann Archive");

        let fx = fixture(
            MockGalleryService::default(),
            selected_ann(),
            MockSettingsStore::default(),
        );
        assert_eq!(fx.bridge.resolve_folder().unwrap().as_str(), "Ann");
    }

    #[test]
    fn opens_at_first_item_with_persisted_sort() {
        let settings = MockSettingsStore::default();
        *settings.sort.lock() = Some(SortOrder::NameDesc);
        let mut fx = fixture(
            MockGalleryService::with_folder("Ann", &["b.png", "a.mp4"]),
            selected_ann(),
            settings,
        );
        assert!(fx.bridge.open_gallery(&mut fx.overlay));
        assert_eq!(
            fx.service.list_calls.lock().as_slice(),
            &[("Ann".to_string(), SortOrder::NameDesc)]
        );
        let viewer = fx.overlay.viewer().unwrap();
        assert_eq!(viewer.current_index(), 0);
        assert_eq!(viewer.len(), 2);
        assert!(fx.overlay.can_delete());
        assert_eq!(fx.overlay.folder().unwrap().as_str(), "Ann");
        assert!(fx.settings.saves.lock().is_empty());
    }

    #[test]
    fn failed_listing_becomes_empty_with_notice() {
        let service = MockGalleryService {
            fail_list: true,
            ..MockGalleryService::with_folder("Ann", &["a.png"])
        };
        let mut fx = fixture(service, selected_ann(), MockSettingsStore::default());
        assert!(!fx.bridge.open_gallery(&mut fx.overlay));
        let messages: Vec<String> = fx
            .notices
            .active()
            .into_iter()
            .map(|notice| notice.message)
            .collect();
        assert!(messages.contains(&"Failed to load gallery images".to_string()));
        assert!(fx.overlay.can_upload());
    }

    #[test]
    fn delete_through_overlay_hits_service_and_relists() {
        let mut fx = fixture(
            MockGalleryService::with_folder("Ann", &["a.png", "b.png"]),
            selected_ann(),
            MockSettingsStore::default(),
        );
        fx.bridge.open_gallery(&mut fx.overlay);
        fx.overlay.viewer_mut().unwrap().select(1);
        fx.overlay.request_delete();
        assert!(fx.overlay.confirm_delete(true));

        assert_eq!(
            fx.service.deleted.lock().as_slice(),
            &["user/images/Ann/b.png".to_string()]
        );
        assert_eq!(fx.service.list_calls.lock().len(), 2);
        let viewer = fx.overlay.viewer().unwrap();
        assert_eq!(viewer.len(), 1);
        assert_eq!(viewer.current_index(), 0);
    }

    #[test]
    fn upload_into_empty_folder_opens_gallery() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("cat.png");
        std::fs::write(&file, b"png").unwrap();

        let mut fx = fixture(
            MockGalleryService::default(),
            selected_ann(),
            MockSettingsStore::default(),
        );
        assert!(!fx.bridge.open_gallery(&mut fx.overlay));
        assert_eq!(fx.overlay.upload(&[file]), 1);
        assert!(fx.overlay.is_open());
        assert_eq!(
            fx.overlay.viewer().unwrap().items()[0].src,
            "user/images/Ann/cat_png.png"
        );
    }
}
