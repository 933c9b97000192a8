use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::api;
use crate::bridge::HostBridge;
use crate::config;
use crate::data::{
    ConfigSettingsStore, GalleryService, HostCharacterContext, HostGalleryService, HostMediaSource,
    UploadTarget,
};
use crate::media;
use crate::overlay::{Environment, Overlay};
use crate::shell::{host_toolbar, NoticeBoard, Shell, Toolbar};
use crate::ui;

pub const LOG_ENV: &str = "TAVERN_GALLERY_LOG";

/// Command line overrides applied on top of the config file.
#[derive(Debug, Clone, Default)]
pub struct Options {
    pub config_file: Option<PathBuf>,
    pub server: Option<String>,
    pub character: Option<String>,
}

pub fn run(opts: Options) -> Result<()> {
    init_logging();

    let cfg = config::load(config::LoadOptions {
        config_file: opts.config_file.clone(),
        env_prefix: None,
    })
    .context("load config")?;
    let config_path = opts.config_file.clone().or_else(config::default_path);
    let display_path = friendly_path(config_path.as_ref());

    let base_url = opts
        .server
        .clone()
        .unwrap_or_else(|| cfg.host.base_url.clone());
    let client = Arc::new(
        api::Client::new(api::ClientConfig {
            base_url: Some(base_url),
            user_agent: cfg.host.user_agent.clone(),
            timeout: Some(cfg.host.timeout),
            http_client: None,
        })
        .context("create host client")?,
    );
    let server_label = client.base_url().to_string();
    log::info!("using host {server_label}");

    let service = Arc::new(HostGalleryService::new(client.clone()));
    let character = opts.character.clone().or_else(|| {
        Some(cfg.host.character.clone()).filter(|name| !name.trim().is_empty())
    });
    let context = Arc::new(HostCharacterContext::new(client.clone(), character));
    let settings = Arc::new(ConfigSettingsStore::new(
        config_path.clone(),
        cfg.gallery.clone(),
    ));
    let notices = Arc::new(NoticeBoard::new(cfg.ui.notice_ttl));

    let overlay = Overlay::new(Environment {
        settings: settings.clone(),
        notifier: notices.clone(),
        uploader: Some(service.clone() as Arc<dyn UploadTarget>),
        confirm: None,
    });
    let bridge = HostBridge::new(
        service as Arc<dyn GalleryService>,
        context,
        settings,
        notices.clone(),
    );

    let mut shell = Shell::new();
    let attach = bridge.clone();
    shell.on_ready(move |toolbar: &mut Toolbar| {
        if !attach.attach(toolbar) {
            log::debug!("gallery button already present");
        }
    });
    shell.mount(host_toolbar());

    let loader = media::Loader::new(Arc::new(HostMediaSource::new(client)));

    let options = ui::Options {
        overlay,
        bridge,
        shell,
        notices,
        loader,
        video_command: cfg.player.video_command.clone(),
        server_label,
        config_path: display_path,
    };

    let mut model = ui::Model::new(options);
    model.run()?;
    log::info!("exiting");

    Ok(())
}

/// Logs go to a file so they never tear the alternate screen.
fn init_logging() {
    let Some(dir) = dirs::cache_dir().map(|dir| dir.join("tavern-gallery")) else {
        return;
    };
    if fs::create_dir_all(&dir).is_err() {
        return;
    }
    let Ok(file) = OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join("tavern-gallery.log"))
    else {
        return;
    };
    let _ = env_logger::Builder::from_env(env_logger::Env::default().filter_or(LOG_ENV, "info"))
        .target(env_logger::Target::Pipe(Box::new(file)))
        .try_init();
}

fn friendly_path(path: Option<&PathBuf>) -> String {
    if let Some(path) = path {
        if let Some(home) = dirs::home_dir() {
            if let Ok(stripped) = path.strip_prefix(&home) {
                let mut display = String::from("~");
                if !stripped.as_os_str().is_empty() {
                    display.push_str(&format!("/{}", stripped.display()));
                }
                return display;
            }
        }
        path.display().to_string()
    } else {
        "~/.config/tavern-gallery/config.yaml".to_string()
    }
}
