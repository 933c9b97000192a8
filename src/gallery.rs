use std::fmt;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use base64::{engine::general_purpose, Engine as _};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const IMAGES_ROOT: &str = "user/images";
pub const VIDEO_EXTENSIONS: [&str; 6] = ["mp4", "webm", "ogg", "mov", "avi", "mkv"];
pub const IMAGE_EXTENSIONS: [&str; 7] = ["png", "jpg", "jpeg", "gif", "webp", "bmp", "avif"];

static VIDEO_PATTERN: Lazy<Regex> = Lazy::new(|| {
    let pattern = format!(r"(?i)\.({})$", VIDEO_EXTENSIONS.join("|"));
    Regex::new(&pattern).expect("video extension pattern")
});

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum GalleryError {
    #[error("Please select a character first")]
    NoSubject,
    #[error("Character data not found.")]
    SubjectNotFound,
    #[error("Failed to load characters from the host")]
    HostUnavailable,
    #[error("Gallery folder not specified")]
    NoFolder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn classify(src: &str) -> Self {
        if VIDEO_PATTERN.is_match(src) {
            MediaKind::Video
        } else {
            MediaKind::Image
        }
    }

    pub fn is_video(self) -> bool {
        self == MediaKind::Video
    }
}

/// One entry of a folder listing. Items are never edited after a fetch; a
/// refresh swaps the whole list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GalleryItem {
    pub src: String,
    pub title: String,
}

impl GalleryItem {
    pub fn new<S: Into<String>, T: Into<String>>(src: S, title: T) -> Self {
        Self {
            src: src.into(),
            title: title.into(),
        }
    }

    pub fn from_listing(folder: &GalleryFolder, file: &str) -> Self {
        Self::new(format!("{}/{}/{}", IMAGES_ROOT, folder, file), file)
    }

    pub fn kind(&self) -> MediaKind {
        MediaKind::classify(&self.src)
    }

    pub fn filename(&self) -> &str {
        file_name(&self.src)
    }

    pub fn display_name(&self) -> &str {
        file_stem(&self.src)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GalleryFolder(String);

impl GalleryFolder {
    /// Blank names do not identify a folder.
    pub fn new<S: Into<String>>(name: S) -> Option<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            None
        } else {
            Some(Self(name))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GalleryFolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash, Default)]
#[serde(rename_all = "camelCase")]
pub enum SortOrder {
    NameAsc,
    NameDesc,
    DateDesc,
    #[default]
    DateAsc,
}

impl SortOrder {
    pub const ALL: [SortOrder; 4] = [
        SortOrder::NameAsc,
        SortOrder::NameDesc,
        SortOrder::DateDesc,
        SortOrder::DateAsc,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            SortOrder::NameAsc => "nameAsc",
            SortOrder::NameDesc => "nameDesc",
            SortOrder::DateDesc => "dateDesc",
            SortOrder::DateAsc => "dateAsc",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|sort| sort.key().eq_ignore_ascii_case(key.trim()))
    }

    pub fn label(&self) -> &'static str {
        match self {
            SortOrder::NameAsc => "Name (A-Z)",
            SortOrder::NameDesc => "Name (Z-A)",
            SortOrder::DateDesc => "Newest",
            SortOrder::DateAsc => "Oldest",
        }
    }

    pub fn field(&self) -> &'static str {
        match self {
            SortOrder::NameAsc | SortOrder::NameDesc => "name",
            SortOrder::DateDesc | SortOrder::DateAsc => "date",
        }
    }

    pub fn direction(&self) -> &'static str {
        match self {
            SortOrder::NameAsc | SortOrder::DateAsc => "asc",
            SortOrder::NameDesc | SortOrder::DateDesc => "desc",
        }
    }

    pub fn next(self) -> Self {
        self.shift(1)
    }

    pub fn previous(self) -> Self {
        self.shift(Self::ALL.len() - 1)
    }

    fn shift(self, step: usize) -> Self {
        let index = Self::ALL
            .iter()
            .position(|sort| *sort == self)
            .unwrap_or(0);
        Self::ALL[(index + step) % Self::ALL.len()]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    pub name: String,
    pub avatar: String,
}

/// A local file picked for upload, read fully into memory.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl UploadFile {
    pub fn read(path: &Path) -> Result<Self> {
        let bytes =
            fs::read(path).with_context(|| format!("read upload file {}", path.display()))?;
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        Ok(Self { name, bytes })
    }

    /// Everything after the last dot, or the whole name when there is none.
    pub fn format(&self) -> &str {
        self.name.rsplit('.').next().unwrap_or(&self.name)
    }

    /// The host stores uploads under this name plus its own extension.
    pub fn stored_name(&self) -> String {
        self.name.replace('.', "_")
    }

    pub fn base64(&self) -> String {
        general_purpose::STANDARD.encode(&self.bytes)
    }
}

pub fn file_name(src: &str) -> &str {
    match src.rsplit('/').next() {
        Some(last) if !last.is_empty() => last,
        _ => src,
    }
}

pub fn file_stem(src: &str) -> &str {
    let name = file_name(src);
    match name.rfind('.') {
        Some(dot) if dot > 0 => &name[..dot],
        _ => name,
    }
}

pub fn is_media_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            IMAGE_EXTENSIONS.contains(&ext.as_str()) || VIDEO_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_video_extensions_case_insensitively() {
        assert_eq!(MediaKind::classify("user/images/a/clip.mp4"), MediaKind::Video);
        assert_eq!(MediaKind::classify("user/images/a/CLIP.MP4"), MediaKind::Video);
        assert_eq!(MediaKind::classify("loop.WebM"), MediaKind::Video);
        assert_eq!(MediaKind::classify("user/images/a/pic.png"), MediaKind::Image);
        assert_eq!(MediaKind::classify("pic.jpg"), MediaKind::Image);
        assert_eq!(MediaKind::classify("user/images/a/noext"), MediaKind::Image);
        assert_eq!(MediaKind::classify("movie.mp4.png"), MediaKind::Image);
    }

    #[test]
    fn listing_items_point_into_folder() {
        let folder = GalleryFolder::new("Seraphina").unwrap();
        let item = GalleryItem::from_listing(&folder, "2024-01-01.png");
        assert_eq!(item.src, "user/images/Seraphina/2024-01-01.png");
        assert_eq!(item.title, "2024-01-01.png");
        assert_eq!(item.display_name(), "2024-01-01");
    }

    #[test]
    fn blank_folder_is_rejected() {
        assert!(GalleryFolder::new("  ").is_none());
        assert!(GalleryFolder::new("").is_none());
    }

    #[test]
    fn filename_helpers() {
        assert_eq!(file_name("user/images/x/a.b.png"), "a.b.png");
        assert_eq!(file_stem("user/images/x/a.b.png"), "a.b");
        assert_eq!(file_stem(".hidden"), ".hidden");
        assert_eq!(file_name("trailing/"), "trailing/");
        assert_eq!(file_stem(""), "");
    }

    #[test]
    fn sort_order_maps_to_listing_fields() {
        assert_eq!(SortOrder::default(), SortOrder::DateAsc);
        assert_eq!(SortOrder::NameDesc.field(), "name");
        assert_eq!(SortOrder::NameDesc.direction(), "desc");
        assert_eq!(SortOrder::DateAsc.field(), "date");
        assert_eq!(SortOrder::DateAsc.direction(), "asc");
        assert_eq!(SortOrder::from_key("datedesc"), Some(SortOrder::DateDesc));
        assert_eq!(SortOrder::from_key("random"), None);
        assert_eq!(SortOrder::DateAsc.next(), SortOrder::NameAsc);
        assert_eq!(SortOrder::NameAsc.previous(), SortOrder::DateAsc);
    }

    #[test]
    fn sort_order_serializes_camel_case() {
        let yaml = serde_yaml::to_string(&SortOrder::NameDesc).unwrap();
        assert_eq!(yaml.trim(), "nameDesc");
    }

    #[test]
    fn upload_file_naming() {
        let file = UploadFile {
            name: "my.cat.photo.png".into(),
            bytes: vec![1, 2, 3],
        };
        assert_eq!(file.format(), "png");
        assert_eq!(file.stored_name(), "my_cat_photo_png");
        assert_eq!(file.base64(), "AQID");

        let bare = UploadFile {
            name: "README".into(),
            bytes: Vec::new(),
        };
        assert_eq!(bare.format(), "README");
    }

    #[test]
    fn media_file_filter() {
        assert!(is_media_file(Path::new("/tmp/a.PNG")));
        assert!(is_media_file(Path::new("clip.mkv")));
        assert!(!is_media_file(Path::new("notes.txt")));
        assert!(!is_media_file(Path::new("Makefile")));
    }
}
