//! Host-side surfaces the gallery plugs into: the toolbar container with its
//! mount event, and transient notifications.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use walkdir::WalkDir;

use crate::gallery::is_media_file;

pub const GALLERY_BUTTON_ID: &str = "gallery-pro-button";
pub const CHARACTER_BUTTON_ID: &str = "character-select-button";
pub const QUIT_BUTTON_ID: &str = "quit-button";
const MAX_NOTICES: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
    pub posted_at: Instant,
}

pub trait Notifier: Send + Sync {
    fn notify(&self, level: NoticeLevel, message: &str);
}

/// Transient notifications, newest last. Entries expire after `ttl`.
pub struct NoticeBoard {
    ttl: Duration,
    entries: Mutex<VecDeque<Notice>>,
}

impl NoticeBoard {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(VecDeque::new()),
        }
    }

    pub fn active(&self) -> Vec<Notice> {
        self.entries.lock().iter().cloned().collect()
    }

    /// Drops expired notices; true when anything was removed.
    pub fn prune(&self, now: Instant) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|notice| now.duration_since(notice.posted_at) < self.ttl);
        entries.len() != before
    }

    pub fn dismiss_all(&self) {
        self.entries.lock().clear();
    }
}

impl Notifier for NoticeBoard {
    fn notify(&self, level: NoticeLevel, message: &str) {
        let mut entries = self.entries.lock();
        entries.push_back(Notice {
            level,
            message: message.to_string(),
            posted_at: Instant::now(),
        });
        while entries.len() > MAX_NOTICES {
            entries.pop_front();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonAction {
    OpenGallery,
    NextCharacter,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolbarButton {
    pub id: String,
    pub icon: &'static str,
    pub tooltip: String,
    pub hotkey: char,
    pub action: ButtonAction,
}

#[derive(Debug, Clone, Default)]
pub struct Toolbar {
    buttons: Vec<ToolbarButton>,
}

impl Toolbar {
    pub fn new(buttons: Vec<ToolbarButton>) -> Self {
        Self { buttons }
    }

    pub fn buttons(&self) -> &[ToolbarButton] {
        &self.buttons
    }

    pub fn contains(&self, id: &str) -> bool {
        self.buttons.iter().any(|button| button.id == id)
    }

    pub fn find_hotkey(&self, key: char) -> Option<&ToolbarButton> {
        self.buttons.iter().find(|button| button.hotkey == key)
    }

    /// Places `button` right after `anchor` when present, else at the end.
    pub fn insert_after(&mut self, anchor: &str, button: ToolbarButton) {
        match self.buttons.iter().position(|existing| existing.id == anchor) {
            Some(index) => self.buttons.insert(index + 1, button),
            None => self.buttons.push(button),
        }
    }
}

type ReadyListener = Box<dyn FnOnce(&mut Toolbar)>;

/// Owns the toolbar and tells listeners once it is mounted.
#[derive(Default)]
pub struct Shell {
    toolbar: Option<Toolbar>,
    listeners: Vec<ReadyListener>,
}

impl Shell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_mounted(&self) -> bool {
        self.toolbar.is_some()
    }

    pub fn toolbar(&self) -> Option<&Toolbar> {
        self.toolbar.as_ref()
    }

    /// Runs `listener` on mount, or right away if the toolbar already exists.
    pub fn on_ready(&mut self, listener: impl FnOnce(&mut Toolbar) + 'static) {
        match self.toolbar.as_mut() {
            Some(toolbar) => listener(toolbar),
            None => self.listeners.push(Box::new(listener)),
        }
    }

    pub fn mount(&mut self, mut toolbar: Toolbar) {
        for listener in self.listeners.drain(..) {
            listener(&mut toolbar);
        }
        self.toolbar = Some(toolbar);
    }
}

pub fn host_toolbar() -> Toolbar {
    Toolbar::new(vec![
        ToolbarButton {
            id: CHARACTER_BUTTON_ID.to_string(),
            icon: "☺",
            tooltip: "Next character".to_string(),
            hotkey: 'c',
            action: ButtonAction::NextCharacter,
        },
        ToolbarButton {
            id: QUIT_BUTTON_ID.to_string(),
            icon: "⏻",
            tooltip: "Quit".to_string(),
            hotkey: 'q',
            action: ButtonAction::Quit,
        },
    ])
}

/// Expands a comma separated list of files and directories into the media
/// files to upload. Directories are walked recursively.
pub fn expand_upload_paths(input: &str) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    for raw in input.split(',') {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        let path = expand_home(raw);
        if path.is_dir() {
            let mut found: Vec<PathBuf> = WalkDir::new(&path)
                .follow_links(true)
                .into_iter()
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.file_type().is_file() && is_media_file(entry.path()))
                .map(|entry| entry.into_path())
                .collect();
            found.sort();
            paths.extend(found);
        } else {
            paths.push(path);
        }
    }
    paths
}

fn expand_home(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    Path::new(raw).to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::fs;
    use std::rc::Rc;
    use tempfile::tempdir;

    fn button(id: &str, hotkey: char) -> ToolbarButton {
        ToolbarButton {
            id: id.to_string(),
            icon: "*",
            tooltip: id.to_string(),
            hotkey,
            action: ButtonAction::OpenGallery,
        }
    }

    #[test]
    fn listeners_wait_for_mount() {
        let fired = Rc::new(Cell::new(0));
        let mut shell = Shell::new();
        let counter = fired.clone();
        shell.on_ready(move |toolbar| {
            counter.set(counter.get() + 1);
            toolbar.insert_after(CHARACTER_BUTTON_ID, button("late", 'x'));
        });
        assert_eq!(fired.get(), 0);

        shell.mount(host_toolbar());
        assert_eq!(fired.get(), 1);
        let ids: Vec<&str> = shell
            .toolbar()
            .unwrap()
            .buttons()
            .iter()
            .map(|b| b.id.as_str())
            .collect();
        assert_eq!(ids, vec![CHARACTER_BUTTON_ID, "late", QUIT_BUTTON_ID]);
    }

    #[test]
    fn listener_after_mount_runs_immediately() {
        let mut shell = Shell::new();
        shell.mount(Toolbar::default());
        let fired = Rc::new(Cell::new(false));
        let flag = fired.clone();
        shell.on_ready(move |_| flag.set(true));
        assert!(fired.get());
    }

    #[test]
    fn insert_without_anchor_appends() {
        let mut toolbar = Toolbar::new(vec![button("a", 'a')]);
        toolbar.insert_after("missing", button("b", 'b'));
        assert_eq!(toolbar.buttons()[1].id, "b");
        assert_eq!(toolbar.find_hotkey('b').unwrap().id, "b");
        assert!(toolbar.find_hotkey('z').is_none());
    }

    #[test]
    fn notices_expire_and_cap() {
        let board = NoticeBoard::new(Duration::from_millis(50));
        for i in 0..(MAX_NOTICES + 2) {
            board.notify(NoticeLevel::Info, &format!("n{i}"));
        }
        let active = board.active();
        assert_eq!(active.len(), MAX_NOTICES);
        assert_eq!(active[0].message, "n2");

        assert!(!board.prune(Instant::now()));
        assert!(board.prune(Instant::now() + Duration::from_secs(1)));
        assert!(board.active().is_empty());
    }

    #[test]
    fn expands_directories_to_media_files() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("set");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("b.png"), b"x").unwrap();
        fs::write(nested.join("a.mp4"), b"x").unwrap();
        fs::write(nested.join("notes.txt"), b"x").unwrap();
        let single = dir.path().join("single.jpg");
        fs::write(&single, b"x").unwrap();

        let input = format!("{}, {} ,", single.display(), nested.display());
        let paths = expand_upload_paths(&input);
        assert_eq!(paths, vec![single, nested.join("a.mp4"), nested.join("b.png")]);
    }
}
