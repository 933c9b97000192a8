#![allow(clippy::uninlined_format_args)]

pub mod api;
pub mod app;
pub mod bridge;
pub mod config;
pub mod data;
pub mod gallery;
pub mod media;
pub mod overlay;
pub mod shell;
pub mod ui;
pub mod video;
pub mod viewer;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use app::run;
