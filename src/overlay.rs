//! The gallery overlay: the open/close/is-open control surface plus the
//! side effects the viewer triggers (delete, sort, upload, refresh).

use std::path::PathBuf;
use std::sync::Arc;

use crate::data::{SettingsStore, UploadTarget};
use crate::gallery::{GalleryError, GalleryFolder, GalleryItem, SortOrder, UploadFile};
use crate::shell::{NoticeLevel, Notifier};
use crate::viewer::{Key, Transition, Viewer};

pub const DELETE_PROMPT: &str = "Are you sure you want to delete this image?";

pub trait DeleteHandler: Send + Sync {
    fn delete(&self, src: &str);
}

/// Re-fetches the session's folder. Failures surface as an empty list.
pub trait RefreshHandler: Send + Sync {
    fn refresh(&self, sort: SortOrder) -> Vec<GalleryItem>;
}

/// A host-supplied confirm dialog. Without one the overlay parks the request
/// until the shell answers through [`Overlay::confirm_delete`].
pub trait ConfirmDialog: Send + Sync {
    fn confirm(&self, message: &str, detail: &str) -> bool;
}

#[derive(Clone)]
pub struct Environment {
    pub settings: Arc<dyn SettingsStore>,
    pub notifier: Arc<dyn Notifier>,
    pub uploader: Option<Arc<dyn UploadTarget>>,
    pub confirm: Option<Arc<dyn ConfirmDialog>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDelete {
    pub src: String,
}

pub struct Overlay {
    env: Environment,
    visible: bool,
    viewer: Option<Viewer>,
    on_delete: Option<Arc<dyn DeleteHandler>>,
    on_refresh: Option<Arc<dyn RefreshHandler>>,
    folder: Option<GalleryFolder>,
    pending_delete: Option<PendingDelete>,
    generation: u64,
}

impl Overlay {
    pub fn new(env: Environment) -> Self {
        Self {
            env,
            visible: false,
            viewer: None,
            on_delete: None,
            on_refresh: None,
            folder: None,
            pending_delete: None,
            generation: 0,
        }
    }

    /// Replaces the session wholesale. An empty list leaves the overlay
    /// closed.
    pub fn open(
        &mut self,
        items: Vec<GalleryItem>,
        initial_index: usize,
        on_delete: Option<Arc<dyn DeleteHandler>>,
        on_refresh: Option<Arc<dyn RefreshHandler>>,
        folder: Option<GalleryFolder>,
    ) {
        let sort = self.env.settings.sort_order().unwrap_or_default();
        if let Some(previous) = self.viewer.as_ref() {
            self.generation = self.generation.max(previous.generation());
        }
        let generation = self.generation;
        self.viewer = Viewer::new(items, initial_index, sort)
            .map(|viewer| viewer.continuing_from(generation));
        self.on_delete = on_delete;
        self.on_refresh = on_refresh;
        self.folder = folder;
        self.pending_delete = None;
        self.visible = self.viewer.is_some();
    }

    pub fn close(&mut self) {
        self.visible = false;
        self.pending_delete = None;
    }

    pub fn is_open(&self) -> bool {
        self.visible
    }

    pub fn viewer(&self) -> Option<&Viewer> {
        self.viewer.as_ref().filter(|_| self.visible)
    }

    pub fn viewer_mut(&mut self) -> Option<&mut Viewer> {
        if self.visible {
            self.viewer.as_mut()
        } else {
            None
        }
    }

    pub fn folder(&self) -> Option<&GalleryFolder> {
        self.folder.as_ref()
    }

    pub fn can_delete(&self) -> bool {
        self.on_delete.is_some()
    }

    pub fn can_upload(&self) -> bool {
        self.folder.is_some()
    }

    pub fn pending_delete(&self) -> Option<&PendingDelete> {
        self.pending_delete.as_ref()
    }

    pub fn handle_key(&mut self, key: Key) -> Transition {
        let Some(viewer) = self.viewer_mut() else {
            return Transition::Unchanged;
        };
        let transition = viewer.handle_key(key);
        if transition == Transition::Close {
            self.close();
        }
        transition
    }

    /// Asks to delete the current item. Returns true when the delete ran.
    pub fn request_delete(&mut self) -> bool {
        if self.on_delete.is_none() {
            return false;
        }
        let Some(src) = self
            .viewer()
            .and_then(|viewer| viewer.current_item())
            .map(|item| item.src.clone())
        else {
            return false;
        };
        match self.env.confirm.clone() {
            Some(dialog) => {
                if dialog.confirm(DELETE_PROMPT, &src) {
                    self.delete(&src);
                    true
                } else {
                    false
                }
            }
            None => {
                self.pending_delete = Some(PendingDelete { src });
                false
            }
        }
    }

    pub fn confirm_delete(&mut self, accepted: bool) -> bool {
        let Some(pending) = self.pending_delete.take() else {
            return false;
        };
        if !accepted {
            return false;
        }
        self.delete(&pending.src);
        true
    }

    pub fn change_sort(&mut self, sort: SortOrder) {
        let Some(viewer) = self.viewer_mut() else {
            return;
        };
        viewer.set_sort_order(sort);
        if let Err(err) = self.env.settings.save_sort_order(sort) {
            log::warn!("failed to persist gallery sort {}: {err:#}", sort.key());
        }
        self.refresh(sort);
    }

    /// Uploads each file in turn, reporting per file, then refreshes once.
    pub fn upload(&mut self, paths: &[PathBuf]) -> usize {
        if paths.is_empty() {
            return 0;
        }
        let Some(folder) = self.folder.clone() else {
            self.env
                .notifier
                .notify(NoticeLevel::Error, &GalleryError::NoFolder.to_string());
            return 0;
        };
        let Some(uploader) = self.env.uploader.clone() else {
            self.env
                .notifier
                .notify(NoticeLevel::Error, "Uploads are not available for this host");
            return 0;
        };

        let mut uploaded = 0;
        for path in paths {
            let result = UploadFile::read(path).and_then(|file| uploader.upload(&folder, &file));
            match result {
                Ok(saved) => {
                    uploaded += 1;
                    log::info!("uploaded {} to {saved}", path.display());
                    self.env.notifier.notify(
                        NoticeLevel::Success,
                        &format!("File uploaded successfully. Saved at: {saved}"),
                    );
                }
                Err(err) => {
                    log::error!("upload of {} failed: {err:#}", path.display());
                    self.env.notifier.notify(
                        NoticeLevel::Error,
                        &format!("Failed to upload {}", display_name(path)),
                    );
                }
            }
        }

        let sort = self.current_sort();
        self.refresh(sort);
        uploaded
    }

    fn delete(&mut self, src: &str) {
        let Some(handler) = self.on_delete.clone() else {
            return;
        };
        handler.delete(src);
        let sort = self.current_sort();
        self.refresh(sort);
    }

    fn refresh(&mut self, sort: SortOrder) {
        let Some(handler) = self.on_refresh.clone() else {
            return;
        };
        let items = handler.refresh(sort);
        let on_delete = self.on_delete.clone();
        let folder = self.folder.clone();
        self.open(items, 0, on_delete, Some(handler), folder);
        if let Some(viewer) = self.viewer.as_mut() {
            viewer.set_sort_order(sort);
        }
    }

    fn current_sort(&self) -> SortOrder {
        self.viewer
            .as_ref()
            .map(Viewer::sort_order)
            .or_else(|| self.env.settings.sort_order())
            .unwrap_or_default()
    }
}

fn display_name(path: &std::path::Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}
