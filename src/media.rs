use std::io::Cursor;
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use image::ImageFormat;

use crate::data::MediaSource;
use crate::gallery::{GalleryItem, MediaKind};
use crate::viewer::LoadTicket;

const MAX_PREVIEW_WIDTH: u32 = 1600;
const MAX_PREVIEW_HEIGHT: u32 = 1200;

#[derive(Debug, Clone)]
pub struct Request {
    pub ticket: LoadTicket,
    pub item: GalleryItem,
}

/// Decoded image scaled down for the terminal, re-encoded as PNG.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePreview {
    pub width: u32,
    pub height: u32,
    pub source_width: u32,
    pub source_height: u32,
    pub png: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Preview {
    Image(ImagePreview),
    Video { url: String },
}

#[derive(Debug)]
pub struct Loaded {
    pub ticket: LoadTicket,
    pub src: String,
    pub result: Result<Preview>,
}

struct Inner {
    source: Arc<dyn MediaSource>,
    results: Sender<Loaded>,
}

/// Background loader for lightbox media. A newer request supersedes any that
/// are still queued.
pub struct Loader {
    jobs: Option<Sender<Request>>,
    stop: Sender<()>,
    results: Receiver<Loaded>,
    handle: Option<thread::JoinHandle<()>>,
}

impl Loader {
    pub fn new(source: Arc<dyn MediaSource>) -> Self {
        let (job_tx, job_rx) = unbounded();
        let (stop_tx, stop_rx) = unbounded();
        let (result_tx, result_rx) = unbounded();
        let inner = Inner {
            source,
            results: result_tx,
        };
        let handle = thread::spawn(move || inner.worker(job_rx, stop_rx));
        Self {
            jobs: Some(job_tx),
            stop: stop_tx,
            results: result_rx,
            handle: Some(handle),
        }
    }

    pub fn enqueue(&self, request: Request) {
        if let Some(jobs) = &self.jobs {
            let _ = jobs.send(request);
        }
    }

    pub fn try_recv(&self) -> Option<Loaded> {
        self.results.try_recv().ok()
    }

    pub fn results(&self) -> &Receiver<Loaded> {
        &self.results
    }

    fn shutdown(&mut self) {
        let _ = self.stop.send(());
        self.jobs.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Loader {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Inner {
    fn worker(&self, jobs: Receiver<Request>, stop: Receiver<()>) {
        loop {
            crossbeam_channel::select! {
                recv(stop) -> _ => break,
                recv(jobs) -> msg => {
                    match msg {
                        Ok(request) => self.process(latest(request, &jobs)),
                        Err(_) => break,
                    }
                }
            }
        }
    }

    fn process(&self, request: Request) {
        let src = request.item.src.clone();
        let result = self.load(&request.item);
        if let Err(err) = &result {
            log::warn!("media load for {src} failed: {err:#}");
        }
        let _ = self.results.send(Loaded {
            ticket: request.ticket,
            src,
            result,
        });
    }

    fn load(&self, item: &GalleryItem) -> Result<Preview> {
        match item.kind() {
            MediaKind::Video => {
                self.source.probe(&item.src)?;
                Ok(Preview::Video {
                    url: self.source.playback_url(&item.src)?,
                })
            }
            MediaKind::Image => {
                let bytes = self.source.fetch(&item.src)?;
                Ok(Preview::Image(decode_preview(&bytes)?))
            }
        }
    }
}

/// Skips past requests that were superseded while the worker was busy.
fn latest(mut request: Request, jobs: &Receiver<Request>) -> Request {
    loop {
        match jobs.try_recv() {
            Ok(newer) => request = newer,
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return request,
        }
    }
}

pub fn decode_preview(bytes: &[u8]) -> Result<ImagePreview> {
    let image = image::load_from_memory(bytes).context("media: decode image")?;
    let (source_width, source_height) = (image.width(), image.height());
    let scaled = if source_width > MAX_PREVIEW_WIDTH || source_height > MAX_PREVIEW_HEIGHT {
        image.thumbnail(MAX_PREVIEW_WIDTH, MAX_PREVIEW_HEIGHT)
    } else {
        image
    };
    let mut png = Vec::new();
    scaled
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .context("media: encode preview")?;
    Ok(ImagePreview {
        width: scaled.width(),
        height: scaled.height(),
        source_width,
        source_height,
        png,
    })
}
