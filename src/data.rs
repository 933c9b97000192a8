use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use parking_lot::{Mutex, RwLock};

use crate::api::{self, UploadRequest};
use crate::config;
use crate::gallery::{GalleryFolder, GalleryItem, SortOrder, Subject, UploadFile};

pub trait GalleryService: Send + Sync {
    fn list_items(&self, folder: &GalleryFolder, sort: SortOrder) -> Result<Vec<GalleryItem>>;
    fn delete_item(&self, src: &str) -> Result<()>;
}

/// Stores one file in a folder and returns the path the host saved it at.
pub trait UploadTarget: Send + Sync {
    fn upload(&self, folder: &GalleryFolder, file: &UploadFile) -> Result<String>;
}

pub trait MediaSource: Send + Sync {
    fn fetch(&self, src: &str) -> Result<Vec<u8>>;
    fn probe(&self, src: &str) -> Result<()>;
    fn playback_url(&self, src: &str) -> Result<String>;
}

/// Settings the host keeps for the gallery namespace.
pub trait SettingsStore: Send + Sync {
    fn sort_order(&self) -> Option<SortOrder>;
    fn save_sort_order(&self, sort: SortOrder) -> Result<()>;
    fn folder_override(&self, avatar: &str) -> Option<String>;
}

/// The host's character roster. Lookups that need the network return `Err`
/// when the host cannot be reached, as opposed to `Ok(None)` for an unknown
/// character.
pub trait HostContext: Send + Sync {
    fn selected_subject_id(&self) -> Option<String>;
    fn subject(&self, id: &str) -> Result<Option<Subject>>;

    fn select_next(&self) -> Result<Option<String>> {
        Ok(None)
    }
}

pub struct HostGalleryService {
    client: Arc<api::Client>,
}

impl HostGalleryService {
    pub fn new(client: Arc<api::Client>) -> Self {
        Self { client }
    }
}

impl GalleryService for HostGalleryService {
    fn list_items(&self, folder: &GalleryFolder, sort: SortOrder) -> Result<Vec<GalleryItem>> {
        let files = self
            .client
            .list_images(folder, sort)
            .context("fetch gallery listing")?;
        Ok(files
            .iter()
            .map(|file| GalleryItem::from_listing(folder, file))
            .collect())
    }

    fn delete_item(&self, src: &str) -> Result<()> {
        self.client.delete_image(src).context("delete gallery item")
    }
}

impl UploadTarget for HostGalleryService {
    fn upload(&self, folder: &GalleryFolder, file: &UploadFile) -> Result<String> {
        let response = self
            .client
            .upload_image(&UploadRequest::new(folder, file))
            .with_context(|| format!("upload {}", file.name))?;
        Ok(response.path)
    }
}

pub struct HostMediaSource {
    client: Arc<api::Client>,
}

impl HostMediaSource {
    pub fn new(client: Arc<api::Client>) -> Self {
        Self { client }
    }
}

impl MediaSource for HostMediaSource {
    fn fetch(&self, src: &str) -> Result<Vec<u8>> {
        self.client.fetch_media(src)
    }

    fn probe(&self, src: &str) -> Result<()> {
        self.client.probe_media(src).map(|_| ())
    }

    fn playback_url(&self, src: &str) -> Result<String> {
        Ok(self.client.media_url(src)?.to_string())
    }
}

/// Subjects known to the host, with the one picked on the command line or
/// through the toolbar as the active one.
pub struct HostCharacterContext {
    client: Arc<api::Client>,
    selected: RwLock<Option<String>>,
    cache: RwLock<Option<Vec<Subject>>>,
}

impl HostCharacterContext {
    pub fn new(client: Arc<api::Client>, selected: Option<String>) -> Self {
        Self {
            client,
            selected: RwLock::new(selected.filter(|name| !name.trim().is_empty())),
            cache: RwLock::new(None),
        }
    }

    /// Failed fetches are not cached, so the next lookup retries.
    fn subjects(&self) -> Result<Vec<Subject>> {
        if let Some(cached) = self.cache.read().as_ref() {
            return Ok(cached.clone());
        }
        let records = self
            .client
            .characters()
            .context("load characters from host")?;
        let subjects: Vec<Subject> = records
            .into_iter()
            .filter(|record| !record.name.is_empty())
            .map(|record| Subject {
                name: record.name,
                avatar: record.avatar,
            })
            .collect();
        *self.cache.write() = Some(subjects.clone());
        Ok(subjects)
    }
}

impl HostContext for HostCharacterContext {
    fn selected_subject_id(&self) -> Option<String> {
        self.selected.read().clone()
    }

    fn subject(&self, id: &str) -> Result<Option<Subject>> {
        Ok(self
            .subjects()?
            .into_iter()
            .find(|subject| subject.name == id || subject.avatar == id))
    }

    fn select_next(&self) -> Result<Option<String>> {
        let subjects = self.subjects()?;
        if subjects.is_empty() {
            return Ok(None);
        }
        let mut selected = self.selected.write();
        let next = match selected
            .as_ref()
            .and_then(|current| subjects.iter().position(|s| &s.name == current))
        {
            Some(index) => &subjects[(index + 1) % subjects.len()],
            None => &subjects[0],
        };
        *selected = Some(next.name.clone());
        Ok(selected.clone())
    }
}

/// Gallery settings backed by the YAML config file.
pub struct ConfigSettingsStore {
    path: Option<PathBuf>,
    settings: RwLock<config::GallerySettings>,
}

impl ConfigSettingsStore {
    pub fn new(path: Option<PathBuf>, settings: config::GallerySettings) -> Self {
        Self {
            path,
            settings: RwLock::new(settings),
        }
    }
}

impl SettingsStore for ConfigSettingsStore {
    fn sort_order(&self) -> Option<SortOrder> {
        self.settings.read().sort
    }

    fn save_sort_order(&self, sort: SortOrder) -> Result<()> {
        self.settings.write().sort = Some(sort);
        config::save_sort_preference(self.path.clone(), sort)?;
        Ok(())
    }

    fn folder_override(&self, avatar: &str) -> Option<String> {
        self.settings.read().folders.get(avatar).cloned()
    }
}

#[derive(Default)]
pub struct MockGalleryService {
    pub folders: Mutex<BTreeMap<String, Vec<String>>>,
    pub list_calls: Mutex<Vec<(String, SortOrder)>>,
    pub deleted: Mutex<Vec<String>>,
    pub uploads: Mutex<Vec<(String, String)>>,
    pub fail_list: bool,
    pub fail_uploads_named: Vec<String>,
}

impl MockGalleryService {
    pub fn with_folder(folder: &str, files: &[&str]) -> Self {
        let service = Self::default();
        service.folders.lock().insert(
            folder.to_string(),
            files.iter().map(|file| file.to_string()).collect(),
        );
        service
    }
}

impl GalleryService for MockGalleryService {
    fn list_items(&self, folder: &GalleryFolder, sort: SortOrder) -> Result<Vec<GalleryItem>> {
        self.list_calls.lock().push((folder.to_string(), sort));
        if self.fail_list {
            return Err(anyhow!("mock: listing unavailable"));
        }
        let files = self
            .folders
            .lock()
            .get(folder.as_str())
            .cloned()
            .unwrap_or_default();
        Ok(files
            .iter()
            .map(|file| GalleryItem::from_listing(folder, file))
            .collect())
    }

    fn delete_item(&self, src: &str) -> Result<()> {
        self.deleted.lock().push(src.to_string());
        let mut folders = self.folders.lock();
        for files in folders.values_mut() {
            files.retain(|file| !src.ends_with(&format!("/{file}")));
        }
        Ok(())
    }
}

impl UploadTarget for MockGalleryService {
    fn upload(&self, folder: &GalleryFolder, file: &UploadFile) -> Result<String> {
        self.uploads
            .lock()
            .push((folder.to_string(), file.name.clone()));
        if self.fail_uploads_named.contains(&file.name) {
            return Err(anyhow!("mock: upload rejected"));
        }
        let stored = format!("{}.{}", file.stored_name(), file.format());
        self.folders
            .lock()
            .entry(folder.to_string())
            .or_default()
            .push(stored.clone());
        Ok(format!("user/images/{folder}/{stored}"))
    }
}

#[derive(Default)]
pub struct MockSettingsStore {
    pub sort: Mutex<Option<SortOrder>>,
    pub saves: Mutex<Vec<SortOrder>>,
    pub folders: BTreeMap<String, String>,
    pub fail_save: bool,
}

impl SettingsStore for MockSettingsStore {
    fn sort_order(&self) -> Option<SortOrder> {
        *self.sort.lock()
    }

    fn save_sort_order(&self, sort: SortOrder) -> Result<()> {
        self.saves.lock().push(sort);
        if self.fail_save {
            return Err(anyhow!("mock: settings are read-only"));
        }
        *self.sort.lock() = Some(sort);
        Ok(())
    }

    fn folder_override(&self, avatar: &str) -> Option<String> {
        self.folders.get(avatar).cloned()
    }
}

#[derive(Default)]
pub struct MockHostContext {
    pub selected: Option<String>,
    pub subjects: Vec<Subject>,
    pub offline: bool,
}

impl HostContext for MockHostContext {
    fn selected_subject_id(&self) -> Option<String> {
        self.selected.clone()
    }

    fn subject(&self, id: &str) -> Result<Option<Subject>> {
        if self.offline {
            return Err(anyhow!("mock: host unreachable"));
        }
        Ok(self
            .subjects
            .iter()
            .find(|subject| subject.name == id)
            .cloned())
    }
}

#[derive(Default)]
pub struct MockMediaSource {
    pub files: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MediaSource for MockMediaSource {
    fn fetch(&self, src: &str) -> Result<Vec<u8>> {
        self.files
            .lock()
            .get(src)
            .cloned()
            .ok_or_else(|| anyhow!("mock: {src} not found"))
    }

    fn probe(&self, src: &str) -> Result<()> {
        self.fetch(src).map(|_| ())
    }

    fn playback_url(&self, src: &str) -> Result<String> {
        Ok(format!("http://mock/{src}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_service_lists_items_under_folder() {
        let service = MockGalleryService::with_folder("Ann", &["a.png", "b.mp4"]);
        let folder = GalleryFolder::new("Ann").unwrap();
        let items = service.list_items(&folder, SortOrder::NameAsc).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].src, "user/images/Ann/b.mp4");
        assert_eq!(
            service.list_calls.lock().as_slice(),
            &[("Ann".to_string(), SortOrder::NameAsc)]
        );
    }

    #[test]
    fn mock_delete_removes_file() {
        let service = MockGalleryService::with_folder("Ann", &["a.png", "b.png"]);
        service.delete_item("user/images/Ann/a.png").unwrap();
        let folder = GalleryFolder::new("Ann").unwrap();
        let items = service.list_items(&folder, SortOrder::default()).unwrap();
        assert_eq!(items, vec![GalleryItem::from_listing(&folder, "b.png")]);
    }

    #[test]
    fn config_settings_store_reads_overrides() {
        let mut settings = config::GallerySettings::default();
        settings
            .folders
            .insert("ann.png".to_string(), "Ann (alt)".to_string());
        settings.sort = Some(SortOrder::NameDesc);
        let store = ConfigSettingsStore::new(None, settings);
        assert_eq!(store.folder_override("ann.png").as_deref(), Some("Ann (alt)"));
        assert_eq!(store.folder_override("bob.png"), None);
        assert_eq!(store.sort_order(), Some(SortOrder::NameDesc));
    }
}
