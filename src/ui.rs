use std::collections::hash_map::DefaultHasher;
use std::env;
use std::hash::{Hash, Hasher};
use std::io::{self, Stdout, Write};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use base64::{engine::general_purpose, Engine as _};
use crossterm::cursor::MoveTo;
use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind, MouseButton,
    MouseEvent, MouseEventKind,
};
use crossterm::style::Print;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, window_size, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, Clear, Padding, Paragraph, Wrap};
use ratatui::{Frame, Terminal};
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::bridge::HostBridge;
use crate::gallery::{GalleryError, MediaKind};
use crate::media::{self, ImagePreview, Loaded, Preview};
use crate::overlay::{Overlay, DELETE_PROMPT};
use crate::shell::{
    expand_upload_paths, ButtonAction, Notice, NoticeBoard, NoticeLevel, Notifier, Shell,
};
use crate::video;
use crate::viewer::{Key, LoadTicket, ViewMode, Viewer};

const KITTY_CHUNK_SIZE: usize = 4096;
const FALLBACK_PREVIEW_PX: f64 = 480.0;
const GRID_CELL_WIDTH: usize = 24;
const GRID_CELL_HEIGHT: u16 = 4;
const MAX_FOOTER_DOTS: usize = 40;
const MAX_TOAST_WIDTH: u16 = 60;

const COLOR_BG: Color = Color::Rgb(30, 30, 46);
const COLOR_PANEL_BG: Color = Color::Rgb(24, 24, 36);
const COLOR_PANEL_FOCUSED_BG: Color = Color::Rgb(49, 50, 68);
const COLOR_PANEL_SELECTED_BG: Color = Color::Rgb(69, 71, 90);
const COLOR_BORDER_IDLE: Color = Color::Rgb(49, 50, 68);
const COLOR_BORDER_FOCUSED: Color = Color::Rgb(137, 180, 250);
const COLOR_TEXT_PRIMARY: Color = Color::Rgb(205, 214, 244);
const COLOR_TEXT_SECONDARY: Color = Color::Rgb(166, 173, 200);
const COLOR_ACCENT: Color = Color::Rgb(137, 180, 250);
const COLOR_SUCCESS: Color = Color::Rgb(166, 227, 161);
const COLOR_ERROR: Color = Color::Rgb(243, 139, 168);

const SPINNER_FRAMES: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

#[derive(Clone)]
struct KittyImage {
    id: u32,
    transmit_chunks: Vec<String>,
    transmitted: bool,
    wrap_tmux: bool,
}

impl KittyImage {
    fn ensure_transmitted<W: Write>(&mut self, writer: &mut W) -> io::Result<()> {
        if self.transmitted {
            return Ok(());
        }
        for chunk in &self.transmit_chunks {
            writer.write_all(chunk.as_bytes())?;
        }
        writer.flush()?;
        self.transmitted = true;
        Ok(())
    }

    fn placement_sequence(&self, cols: u16, rows: u16) -> String {
        let base = format!(
            "\x1b_Ga=p,q=2,C=1,i={},c={},r={};\x1b\\",
            self.id, cols, rows
        );
        if self.wrap_tmux {
            format!("\x1bPtmux;\x1b{base}\x1b\\")
        } else {
            base
        }
    }

    fn delete_sequence_for(id: u32, wrap_tmux: bool) -> String {
        let base = format!("\x1b_Ga=d,q=2,i={id};\x1b\\");
        if wrap_tmux {
            format!("\x1bPtmux;\x1b{}\x1b\\", base)
        } else {
            base
        }
    }
}

struct ActiveKitty {
    image_id: u32,
    wrap_tmux: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct KittyTarget {
    col: u16,
    row: u16,
    cols: u16,
    rows: u16,
}

struct LightboxPreview {
    ticket: LoadTicket,
    preview: Preview,
    kitty: Option<KittyImage>,
}

#[derive(Debug, Clone, Copy)]
struct CellMetrics {
    width: f64,
    height: f64,
}

fn terminal_cell_metrics() -> CellMetrics {
    static METRICS: OnceLock<CellMetrics> = OnceLock::new();
    *METRICS.get_or_init(|| {
        window_size().ok().map_or(
            CellMetrics {
                width: 1.0,
                height: 1.0,
            },
            |size| {
                let columns = size.columns.max(1) as f64;
                let rows = size.rows.max(1) as f64;
                let width = if size.width > 0 {
                    f64::from(size.width) / columns
                } else {
                    1.0
                };
                let height = if size.height > 0 {
                    f64::from(size.height) / rows
                } else {
                    1.0
                };
                CellMetrics { width, height }
            },
        )
    })
}

struct Spinner {
    index: usize,
    last_tick: Instant,
}

impl Spinner {
    fn new() -> Self {
        Self {
            index: 0,
            last_tick: Instant::now(),
        }
    }

    fn frame(&self) -> &'static str {
        SPINNER_FRAMES[self.index % SPINNER_FRAMES.len()]
    }

    fn advance(&mut self) -> bool {
        let now = Instant::now();
        if now.duration_since(self.last_tick) >= Duration::from_millis(120) {
            self.index = (self.index + 1) % SPINNER_FRAMES.len();
            self.last_tick = now;
            true
        } else {
            false
        }
    }

    fn reset(&mut self) {
        self.index = 0;
        self.last_tick = Instant::now();
    }
}

/// Click targets recorded while drawing.
#[derive(Default)]
struct HitMap {
    overlay: Option<Rect>,
    close: Option<Rect>,
    cells: Vec<(Rect, usize)>,
    dots: Vec<(Rect, usize)>,
    buttons: Vec<(Rect, usize)>,
}

impl HitMap {
    fn clear(&mut self) {
        *self = HitMap::default();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MouseOutcome {
    Ignored,
    Changed,
    Quit,
}

struct UploadPrompt {
    input: String,
}

pub struct Options {
    pub overlay: Overlay,
    pub bridge: HostBridge,
    pub shell: Shell,
    pub notices: Arc<NoticeBoard>,
    pub loader: media::Loader,
    pub video_command: Vec<String>,
    pub server_label: String,
    pub config_path: String,
}

pub struct Model {
    overlay: Overlay,
    bridge: HostBridge,
    shell: Shell,
    notices: Arc<NoticeBoard>,
    loader: media::Loader,
    video_command: Vec<String>,
    server_label: String,
    config_path: String,
    status_message: String,
    toolbar_focus: usize,
    upload_prompt: Option<UploadPrompt>,
    preview: Option<LightboxPreview>,
    kitty_enabled: bool,
    kitty_target: Option<KittyTarget>,
    active_kitty: Option<ActiveKitty>,
    needs_kitty_flush: bool,
    needs_redraw: bool,
    spinner: Spinner,
    grid_scroll: usize,
    grid_columns: usize,
    grid_rows: usize,
    hits: HitMap,
}

impl Model {
    pub fn new(opts: Options) -> Self {
        let kitty_enabled = inline_images_supported(|key| env::var(key).ok());
        log::debug!("kitty graphics {}", if kitty_enabled { "on" } else { "off" });
        Self {
            overlay: opts.overlay,
            bridge: opts.bridge,
            shell: opts.shell,
            notices: opts.notices,
            loader: opts.loader,
            video_command: opts.video_command,
            server_label: opts.server_label,
            config_path: opts.config_path,
            status_message: "Press g to open the gallery, c to switch character, q to quit."
                .to_string(),
            toolbar_focus: 0,
            upload_prompt: None,
            preview: None,
            kitty_enabled,
            kitty_target: None,
            active_kitty: None,
            needs_kitty_flush: false,
            needs_redraw: true,
            spinner: Spinner::new(),
            grid_scroll: 0,
            grid_columns: 1,
            grid_rows: 1,
            hits: HitMap::default(),
        }
    }

    pub fn run(&mut self) -> Result<()> {
        let mut stdout = io::stdout();
        enable_raw_mode()?;
        stdout.execute(EnterAlternateScreen)?;
        stdout.execute(EnableMouseCapture)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;
        terminal.clear()?;

        let result = self.event_loop(&mut terminal);

        if let Err(err) = self.clear_inline_images(terminal.backend_mut()) {
            log::warn!("failed to clear inline image: {err}");
        }
        terminal.backend_mut().execute(DisableMouseCapture)?;
        disable_raw_mode()?;
        terminal.backend_mut().execute(LeaveAlternateScreen)?;
        terminal.show_cursor()?;

        result
    }

    fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
        let mut last_tick = Instant::now();
        let tick_rate = Duration::from_millis(120);

        loop {
            if self.pump_media() {
                self.mark_layout_dirty();
            }

            if self.needs_redraw {
                terminal.draw(|frame| self.draw(frame))?;
                self.flush_inline_images(terminal.backend_mut())?;
                self.needs_redraw = false;
            }

            let timeout = tick_rate
                .checked_sub(last_tick.elapsed())
                .unwrap_or_else(|| Duration::from_millis(16));

            if event::poll(timeout)? {
                match event::read()? {
                    Event::Key(key) if key.kind == KeyEventKind::Press => {
                        match self.handle_key(key.code) {
                            Ok(true) => break,
                            Ok(false) => {}
                            Err(err) => {
                                log::error!("key handling failed: {err:#}");
                                self.status_message = format!("Error: {}", err);
                            }
                        }
                        self.mark_layout_dirty();
                    }
                    Event::Mouse(mouse) => match self.handle_mouse(mouse) {
                        Ok(MouseOutcome::Quit) => break,
                        Ok(MouseOutcome::Changed) => self.mark_layout_dirty(),
                        Ok(MouseOutcome::Ignored) => {}
                        Err(err) => {
                            log::error!("mouse handling failed: {err:#}");
                            self.status_message = format!("Error: {}", err);
                            self.mark_layout_dirty();
                        }
                    },
                    Event::Resize(_, _) => self.mark_layout_dirty(),
                    _ => {}
                }
            }

            if last_tick.elapsed() >= tick_rate {
                last_tick = Instant::now();
                if self.notices.prune(Instant::now()) {
                    self.mark_dirty();
                }
                if self.is_loading_media() {
                    if self.spinner.advance() {
                        self.mark_dirty();
                    }
                } else {
                    self.spinner.reset();
                }
            }
        }

        Ok(())
    }

    fn mark_dirty(&mut self) {
        self.needs_redraw = true;
    }

    /// Redraw and re-place any inline image.
    fn mark_layout_dirty(&mut self) {
        self.needs_redraw = true;
        self.needs_kitty_flush = true;
    }

    fn is_loading_media(&self) -> bool {
        self.overlay
            .viewer()
            .is_some_and(|viewer| viewer.mode() == ViewMode::Lightbox && viewer.state().is_loading)
    }

    /// Hands the current lightbox load to the worker and applies finished
    /// loads. Returns true when anything visible changed.
    fn pump_media(&mut self) -> bool {
        let mut changed = false;
        while let Some(loaded) = self.loader.try_recv() {
            changed |= self.apply_loaded(loaded);
        }
        if let Some(viewer) = self.overlay.viewer_mut() {
            if let Some((ticket, item)) = viewer.take_load_request() {
                log::debug!("loading {} (generation {})", item.src, ticket.generation);
                self.loader.enqueue(media::Request { ticket, item });
                changed = true;
            }
        }
        let current = self.overlay.viewer().map(Viewer::ticket);
        if self
            .preview
            .as_ref()
            .is_some_and(|preview| Some(preview.ticket) != current)
        {
            self.preview = None;
            changed = true;
        }
        changed
    }

    fn apply_loaded(&mut self, loaded: Loaded) -> bool {
        let Some(viewer) = self.overlay.viewer_mut() else {
            return false;
        };
        let ticket = loaded.ticket;
        match loaded.result {
            Ok(preview) => {
                if !viewer.media_loaded(ticket) {
                    log::debug!("dropping stale load of {}", loaded.src);
                    return false;
                }
                let kitty = match &preview {
                    Preview::Image(image) if self.kitty_enabled => {
                        match kitty_transmit_inline(&image.png, kitty_image_id(&loaded.src, ticket))
                        {
                            Ok(kitty) => Some(kitty),
                            Err(err) => {
                                log::warn!("inline image for {} unavailable: {err:#}", loaded.src);
                                None
                            }
                        }
                    }
                    _ => None,
                };
                self.preview = Some(LightboxPreview {
                    ticket,
                    preview,
                    kitty,
                });
            }
            Err(_) => {
                if !viewer.media_failed(ticket) {
                    return false;
                }
                self.preview = None;
            }
        }
        true
    }

    fn handle_key(&mut self, code: KeyCode) -> Result<bool> {
        if self.upload_prompt.is_some() {
            self.handle_upload_prompt_key(code);
            return Ok(false);
        }
        if self.overlay.pending_delete().is_some() {
            self.handle_confirm_key(code);
            return Ok(false);
        }
        if self.overlay.is_open() {
            return self.handle_overlay_key(code);
        }
        self.handle_host_key(code)
    }

    fn handle_host_key(&mut self, code: KeyCode) -> Result<bool> {
        let count = self.shell.toolbar().map_or(0, |toolbar| toolbar.buttons().len());
        match code {
            KeyCode::Left | KeyCode::BackTab if count > 0 => {
                self.toolbar_focus = (self.toolbar_focus + count - 1) % count;
            }
            KeyCode::Right | KeyCode::Tab if count > 0 => {
                self.toolbar_focus = (self.toolbar_focus + 1) % count;
            }
            KeyCode::Enter => {
                let action = self
                    .shell
                    .toolbar()
                    .and_then(|toolbar| toolbar.buttons().get(self.toolbar_focus))
                    .map(|button| button.action);
                if let Some(action) = action {
                    return self.trigger(action);
                }
            }
            KeyCode::Esc => self.notices.dismiss_all(),
            KeyCode::Char('u') => self.start_upload(),
            KeyCode::Char(ch) => {
                let action = self
                    .shell
                    .toolbar()
                    .and_then(|toolbar| toolbar.find_hotkey(ch))
                    .map(|button| button.action);
                if let Some(action) = action {
                    return self.trigger(action);
                }
            }
            _ => {}
        }
        Ok(false)
    }

    fn trigger(&mut self, action: ButtonAction) -> Result<bool> {
        match action {
            ButtonAction::OpenGallery => self.open_gallery(),
            ButtonAction::NextCharacter => match self.bridge.context().select_next() {
                Ok(Some(name)) => {
                    self.overlay.close();
                    self.status_message = format!("Character: {name}");
                    self.notices
                        .notify(NoticeLevel::Info, &format!("Selected {name}"));
                }
                Ok(None) => {
                    self.notices
                        .notify(NoticeLevel::Error, "No characters available");
                }
                Err(err) => {
                    log::error!("switching character failed: {err:#}");
                    self.notices
                        .notify(NoticeLevel::Error, &GalleryError::HostUnavailable.to_string());
                }
            },
            ButtonAction::Quit => return Ok(true),
        }
        Ok(false)
    }

    fn open_gallery(&mut self) {
        self.preview = None;
        self.grid_scroll = 0;
        if self.bridge.open_gallery(&mut self.overlay) {
            if let Some(folder) = self.overlay.folder() {
                self.status_message = format!("Gallery: {folder}");
            }
        }
    }

    fn handle_overlay_key(&mut self, code: KeyCode) -> Result<bool> {
        let Some(mode) = self.overlay.viewer().map(Viewer::mode) else {
            return Ok(false);
        };
        match code {
            KeyCode::Left | KeyCode::Char('h') => {
                self.overlay.handle_key(Key::Left);
            }
            KeyCode::Right | KeyCode::Char('l') => {
                self.overlay.handle_key(Key::Right);
            }
            KeyCode::Esc => {
                self.overlay.handle_key(Key::Escape);
            }
            KeyCode::Char('x') => self.overlay.close(),
            KeyCode::Char('q') => return Ok(true),
            KeyCode::Char('s') => self.shift_sort(true),
            KeyCode::Char('S') => self.shift_sort(false),
            KeyCode::Char('u') => self.start_upload(),
            KeyCode::Char('d') | KeyCode::Delete => {
                if self.overlay.can_delete() {
                    self.overlay.request_delete();
                } else {
                    self.status_message = "Deleting is not available here".to_string();
                }
            }
            KeyCode::Home => {
                if let Some(viewer) = self.overlay.viewer_mut() {
                    viewer.jump_to(0);
                }
            }
            KeyCode::End => {
                if let Some(viewer) = self.overlay.viewer_mut() {
                    let last = viewer.len().saturating_sub(1);
                    viewer.jump_to(last);
                }
            }
            _ => match mode {
                ViewMode::Grid => self.handle_grid_key(code),
                ViewMode::Lightbox => self.handle_lightbox_key(code)?,
            },
        }
        Ok(false)
    }

    fn handle_grid_key(&mut self, code: KeyCode) {
        let columns = self.grid_columns;
        let page = self.grid_rows.max(1) as i32;
        let Some(viewer) = self.overlay.viewer_mut() else {
            return;
        };
        match code {
            KeyCode::Up | KeyCode::Char('k') => viewer.move_rows(-1, columns),
            KeyCode::Down | KeyCode::Char('j') => viewer.move_rows(1, columns),
            KeyCode::PageUp => viewer.move_rows(-page, columns),
            KeyCode::PageDown => viewer.move_rows(page, columns),
            KeyCode::Enter | KeyCode::Char(' ') => {
                viewer.open_current();
            }
            _ => {}
        }
    }

    fn handle_lightbox_key(&mut self, code: KeyCode) -> Result<()> {
        match code {
            KeyCode::Backspace | KeyCode::Char('b') => {
                if let Some(viewer) = self.overlay.viewer_mut() {
                    viewer.back();
                }
            }
            KeyCode::Enter | KeyCode::Char('p') => self.play_current()?,
            KeyCode::Char(ch @ '1'..='9') => {
                if let Some(viewer) = self.overlay.viewer_mut() {
                    let index = ch as usize - '1' as usize;
                    viewer.jump_to(index);
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn play_current(&mut self) -> Result<()> {
        let Some(item) = self.overlay.viewer().and_then(Viewer::current_item) else {
            return Ok(());
        };
        if item.kind() != MediaKind::Video {
            return Ok(());
        }
        let name = item.filename().to_string();
        let Some(LightboxPreview {
            preview: Preview::Video { url },
            ..
        }) = &self.preview
        else {
            bail!("{name} is not ready to play yet");
        };
        if let Err(err) = video::spawn_external_player(&self.video_command, url) {
            log::error!("video player failed: {err:#}");
            self.notices
                .notify(NoticeLevel::Error, "Failed to launch video player");
            return Ok(());
        }
        self.status_message = format!("Playing {name} in external player");
        Ok(())
    }

    fn shift_sort(&mut self, forward: bool) {
        let Some(current) = self.overlay.viewer().map(Viewer::sort_order) else {
            return;
        };
        let sort = if forward {
            current.next()
        } else {
            current.previous()
        };
        self.overlay.change_sort(sort);
        self.grid_scroll = 0;
        self.status_message = format!("Sorted by {}", sort.label());
    }

    fn start_upload(&mut self) {
        if !self.overlay.is_open() {
            if let Err(err) = self.bridge.resolve_folder() {
                self.bridge.report(&err);
                return;
            }
            self.open_gallery();
        }
        if !self.overlay.can_upload() {
            self.notices
                .notify(NoticeLevel::Error, &GalleryError::NoFolder.to_string());
            return;
        }
        self.upload_prompt = Some(UploadPrompt {
            input: String::new(),
        });
    }

    fn handle_upload_prompt_key(&mut self, code: KeyCode) {
        let Some(prompt) = self.upload_prompt.as_mut() else {
            return;
        };
        match code {
            KeyCode::Esc => self.upload_prompt = None,
            KeyCode::Backspace => {
                prompt.input.pop();
            }
            KeyCode::Char(ch) => prompt.input.push(ch),
            KeyCode::Enter => {
                let input = std::mem::take(&mut prompt.input);
                self.upload_prompt = None;
                let paths = expand_upload_paths(&input);
                if paths.is_empty() {
                    self.notices
                        .notify(NoticeLevel::Error, "No media files selected");
                    return;
                }
                let uploaded = self.overlay.upload(&paths);
                self.grid_scroll = 0;
                self.status_message = format!("Uploaded {uploaded} of {} file(s)", paths.len());
            }
            _ => {}
        }
    }

    fn handle_confirm_key(&mut self, code: KeyCode) {
        match code {
            KeyCode::Char('y') | KeyCode::Char('Y') | KeyCode::Enter => {
                if self.overlay.confirm_delete(true) {
                    self.grid_scroll = 0;
                    self.status_message = "Deleted".to_string();
                }
            }
            KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => {
                self.overlay.confirm_delete(false);
            }
            _ => {}
        }
    }

    fn handle_mouse(&mut self, event: MouseEvent) -> Result<MouseOutcome> {
        if self.upload_prompt.is_some() || self.overlay.pending_delete().is_some() {
            return Ok(MouseOutcome::Ignored);
        }
        if !matches!(event.kind, MouseEventKind::Down(MouseButton::Left)) {
            return Ok(MouseOutcome::Ignored);
        }
        let (col, row) = (event.column, event.row);

        if self.overlay.is_open() {
            if self.hits.close.is_some_and(|rect| rect_contains(rect, col, row))
                || self
                    .hits
                    .overlay
                    .is_some_and(|rect| !rect_contains(rect, col, row))
            {
                self.overlay.close();
                return Ok(MouseOutcome::Changed);
            }
            let target = self
                .hits
                .cells
                .iter()
                .chain(self.hits.dots.iter())
                .find(|(rect, _)| rect_contains(*rect, col, row))
                .map(|(_, index)| *index);
            let Some(index) = target else {
                return Ok(MouseOutcome::Ignored);
            };
            if let Some(viewer) = self.overlay.viewer_mut() {
                match viewer.mode() {
                    ViewMode::Grid => viewer.select(index),
                    ViewMode::Lightbox => viewer.jump_to(index),
                };
            }
            return Ok(MouseOutcome::Changed);
        }

        let clicked = self
            .hits
            .buttons
            .iter()
            .find(|(rect, _)| rect_contains(*rect, col, row))
            .map(|(_, index)| *index);
        let Some(index) = clicked else {
            return Ok(MouseOutcome::Ignored);
        };
        self.toolbar_focus = index;
        let action = self
            .shell
            .toolbar()
            .and_then(|toolbar| toolbar.buttons().get(index))
            .map(|button| button.action);
        let Some(action) = action else {
            return Ok(MouseOutcome::Changed);
        };
        if self.trigger(action)? {
            Ok(MouseOutcome::Quit)
        } else {
            Ok(MouseOutcome::Changed)
        }
    }

    fn draw(&mut self, frame: &mut Frame<'_>) {
        self.hits.clear();
        self.kitty_target = None;

        let full = frame.size();
        frame.render_widget(Block::default().style(Style::default().bg(COLOR_BG)), full);

        let layout = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(1),
                Constraint::Length(3),
                Constraint::Min(0),
                Constraint::Length(1),
            ])
            .split(full);

        let character = self
            .bridge
            .context()
            .selected_subject_id()
            .unwrap_or_else(|| "none".to_string());
        let status_text = format!(
            "Tavern Gallery · {} · Character: {} · {}",
            self.server_label, character, self.status_message
        );
        let status_line = Paragraph::new(status_text).style(
            Style::default()
                .fg(COLOR_TEXT_PRIMARY)
                .bg(COLOR_PANEL_FOCUSED_BG)
                .add_modifier(Modifier::BOLD),
        );
        frame.render_widget(status_line, layout[0]);

        self.draw_toolbar(frame, layout[1]);
        self.draw_host_body(frame, layout[2]);

        let footer = Paragraph::new(self.footer_text())
            .style(
                Style::default()
                    .fg(COLOR_TEXT_SECONDARY)
                    .bg(COLOR_PANEL_BG)
                    .add_modifier(Modifier::ITALIC),
            )
            .alignment(Alignment::Center);
        frame.render_widget(footer, layout[3]);

        if self.overlay.is_open() {
            self.draw_overlay(frame, centered_rect(94, 90, full));
        }

        if self.overlay.pending_delete().is_some() {
            self.kitty_target = None;
            self.draw_confirm(frame, full);
        }
        if self.upload_prompt.is_some() {
            self.kitty_target = None;
            self.draw_upload_prompt(frame, full);
        }

        draw_notices(frame, full, &self.notices.active());
    }

    fn draw_toolbar(&mut self, frame: &mut Frame<'_>, area: Rect) {
        let block = Block::default()
            .title(Span::styled(
                "Toolbar",
                Style::default().fg(COLOR_TEXT_SECONDARY),
            ))
            .borders(Borders::ALL)
            .border_style(Style::default().fg(COLOR_BORDER_IDLE))
            .style(Style::default().bg(COLOR_PANEL_BG));
        let inner = block.inner(area);
        frame.render_widget(block, area);

        let Some(toolbar) = self.shell.toolbar() else {
            frame.render_widget(
                Paragraph::new("Waiting for host…").style(Style::default().fg(COLOR_TEXT_SECONDARY)),
                inner,
            );
            return;
        };

        let mut spans = Vec::new();
        let mut x = inner.x;
        let right = inner.x.saturating_add(inner.width);
        for (index, button) in toolbar.buttons().iter().enumerate() {
            let label = format!(" {} {} ({}) ", button.icon, button.tooltip, button.hotkey);
            let width = UnicodeWidthStr::width(label.as_str()) as u16;
            if x.saturating_add(width) > right {
                break;
            }
            let style = if index == self.toolbar_focus {
                Style::default()
                    .fg(COLOR_BG)
                    .bg(COLOR_ACCENT)
                    .add_modifier(Modifier::BOLD)
            } else {
                Style::default()
                    .fg(COLOR_TEXT_PRIMARY)
                    .bg(COLOR_PANEL_SELECTED_BG)
            };
            self.hits
                .buttons
                .push((Rect::new(x, inner.y, width, 1), index));
            spans.push(Span::styled(label, style));
            spans.push(Span::raw("  "));
            x = x.saturating_add(width + 2);
        }
        frame.render_widget(Paragraph::new(Line::from(spans)), inner);
    }

    fn draw_host_body(&self, frame: &mut Frame<'_>, area: Rect) {
        let block = Block::default()
            .title(Span::styled(
                "Chat",
                Style::default().fg(COLOR_TEXT_SECONDARY),
            ))
            .borders(Borders::ALL)
            .border_style(Style::default().fg(COLOR_BORDER_IDLE))
            .style(Style::default().bg(COLOR_PANEL_BG))
            .padding(Padding::uniform(1));
        let lines = vec![
            Line::from(Span::styled(
                "Browse, upload and prune the media gallery of the selected character.",
                Style::default().fg(COLOR_TEXT_PRIMARY),
            )),
            Line::from(""),
            Line::from(Span::styled(
                "g / Enter on Gallery Pro  open the gallery",
                Style::default().fg(COLOR_TEXT_SECONDARY),
            )),
            Line::from(Span::styled(
                "c                         switch to the next character",
                Style::default().fg(COLOR_TEXT_SECONDARY),
            )),
            Line::from(Span::styled(
                "u                         upload files into the gallery",
                Style::default().fg(COLOR_TEXT_SECONDARY),
            )),
            Line::from(""),
            Line::from(Span::styled(
                format!("Config: {}", self.config_path),
                Style::default().fg(COLOR_TEXT_SECONDARY),
            )),
        ];
        frame.render_widget(
            Paragraph::new(Text::from(lines))
                .block(block)
                .wrap(Wrap { trim: false }),
            area,
        );
    }

    fn draw_overlay(&mut self, frame: &mut Frame<'_>, area: Rect) {
        frame.render_widget(Clear, area);
        let title = match self.overlay.folder() {
            Some(folder) => format!(" Gallery Pro · {folder} "),
            None => " Gallery Pro ".to_string(),
        };
        let block = Block::default()
            .title(Span::styled(
                title,
                Style::default()
                    .fg(COLOR_ACCENT)
                    .add_modifier(Modifier::BOLD),
            ))
            .borders(Borders::ALL)
            .border_style(Style::default().fg(COLOR_BORDER_FOCUSED))
            .style(Style::default().bg(COLOR_PANEL_BG));
        let inner = block.inner(area);
        frame.render_widget(block, area);
        self.hits.overlay = Some(area);

        if area.width > 6 {
            let close = Rect::new(area.x + area.width - 5, area.y, 3, 1);
            frame.render_widget(
                Paragraph::new(Span::styled(
                    "[x]",
                    Style::default().fg(COLOR_ERROR).add_modifier(Modifier::BOLD),
                )),
                close,
            );
            self.hits.close = Some(close);
        }

        let can_upload = self.overlay.can_upload();
        let can_delete = self.overlay.can_delete();
        let Some(viewer) = self.overlay.viewer() else {
            return;
        };
        match viewer.mode() {
            ViewMode::Grid => {
                let layout = render_grid(
                    frame,
                    inner,
                    viewer,
                    GridChrome {
                        can_upload,
                        can_delete,
                    },
                    self.grid_scroll,
                    &mut self.hits,
                );
                self.grid_scroll = layout.scroll;
                self.grid_columns = layout.columns;
                self.grid_rows = layout.rows;
            }
            ViewMode::Lightbox => {
                let preview = self
                    .preview
                    .as_ref()
                    .filter(|preview| preview.ticket == viewer.ticket());
                self.kitty_target = render_lightbox(
                    frame,
                    inner,
                    viewer,
                    preview,
                    self.spinner.frame(),
                    can_delete,
                    &mut self.hits,
                );
            }
        }
    }

    fn draw_confirm(&self, frame: &mut Frame<'_>, area: Rect) {
        let Some(pending) = self.overlay.pending_delete() else {
            return;
        };
        let popup = centered_rect(60, 30, area);
        frame.render_widget(Clear, popup);
        let block = Block::default()
            .title(Span::styled(
                "Delete",
                Style::default().fg(COLOR_ERROR).add_modifier(Modifier::BOLD),
            ))
            .borders(Borders::ALL)
            .border_style(Style::default().fg(COLOR_ERROR))
            .style(Style::default().bg(COLOR_PANEL_FOCUSED_BG))
            .padding(Padding::uniform(1));
        let lines = vec![
            Line::from(Span::styled(
                DELETE_PROMPT,
                Style::default().fg(COLOR_TEXT_PRIMARY),
            )),
            Line::from(Span::styled(
                pending.src.clone(),
                Style::default().fg(COLOR_TEXT_SECONDARY),
            )),
            Line::from(""),
            Line::from(Span::styled(
                "y / Enter delete · n / Esc cancel",
                Style::default().fg(COLOR_ACCENT),
            )),
        ];
        frame.render_widget(
            Paragraph::new(Text::from(lines))
                .block(block)
                .wrap(Wrap { trim: true }),
            popup,
        );
    }

    fn draw_upload_prompt(&self, frame: &mut Frame<'_>, area: Rect) {
        let Some(prompt) = self.upload_prompt.as_ref() else {
            return;
        };
        let popup = centered_rect(70, 30, area);
        frame.render_widget(Clear, popup);
        let title = match self.overlay.folder() {
            Some(folder) => format!("Upload to {folder}"),
            None => "Upload".to_string(),
        };
        let block = Block::default()
            .title(Span::styled(
                title,
                Style::default()
                    .fg(COLOR_ACCENT)
                    .add_modifier(Modifier::BOLD),
            ))
            .borders(Borders::ALL)
            .border_style(Style::default().fg(COLOR_BORDER_FOCUSED))
            .style(Style::default().bg(COLOR_PANEL_FOCUSED_BG))
            .padding(Padding::uniform(1));
        let lines = vec![
            Line::from(vec![
                Span::styled("> ", Style::default().fg(COLOR_ACCENT)),
                Span::styled(
                    prompt.input.clone(),
                    Style::default().fg(COLOR_TEXT_PRIMARY),
                ),
                Span::styled("▏", Style::default().fg(COLOR_ACCENT)),
            ]),
            Line::from(""),
            Line::from(Span::styled(
                "Files or folders, comma separated. Folders are searched for images and videos.",
                Style::default().fg(COLOR_TEXT_SECONDARY),
            )),
            Line::from(Span::styled(
                "Enter upload · Esc cancel",
                Style::default().fg(COLOR_TEXT_SECONDARY),
            )),
        ];
        frame.render_widget(
            Paragraph::new(Text::from(lines))
                .block(block)
                .wrap(Wrap { trim: false }),
            popup,
        );
    }

    fn flush_inline_images(&mut self, backend: &mut CrosstermBackend<Stdout>) -> Result<()> {
        if !self.needs_kitty_flush {
            return Ok(());
        }
        self.needs_kitty_flush = false;
        self.clear_inline_images(backend)?;

        let Some(target) = self.kitty_target else {
            return Ok(());
        };
        let Some(kitty) = self
            .preview
            .as_mut()
            .and_then(|preview| preview.kitty.as_mut())
        else {
            return Ok(());
        };

        kitty.ensure_transmitted(backend)?;
        let sequence = kitty.placement_sequence(target.cols, target.rows);
        crossterm::queue!(backend, MoveTo(target.col, target.row), Print(sequence))?;
        backend.flush()?;

        self.active_kitty = Some(ActiveKitty {
            image_id: kitty.id,
            wrap_tmux: kitty.wrap_tmux,
        });
        Ok(())
    }

    fn clear_inline_images<W: Write>(&mut self, writer: &mut W) -> Result<()> {
        if let Some(active) = self.active_kitty.take() {
            let sequence = KittyImage::delete_sequence_for(active.image_id, active.wrap_tmux);
            writer.write_all(sequence.as_bytes())?;
            writer.flush()?;
        }
        Ok(())
    }

    fn footer_text(&self) -> String {
        if self.upload_prompt.is_some() {
            return "Type paths · Enter upload · Esc cancel".to_string();
        }
        if self.overlay.pending_delete().is_some() {
            return "Confirm delete: y / n".to_string();
        }
        match self.overlay.viewer().map(Viewer::mode) {
            Some(ViewMode::Grid) => {
                "Grid: ←/→ ↑/↓ move · Enter open · s/S sort · u upload · d delete · Esc/x close · q quit"
                    .to_string()
            }
            Some(ViewMode::Lightbox) => {
                "Lightbox: ←/→ previous/next · 1-9 jump · p play · d delete · Esc back · x close"
                    .to_string()
            }
            None => "Toolbar: ←/→ focus · Enter press · g gallery · c character · u upload · q quit"
                .to_string(),
        }
    }
}

#[derive(Clone, Copy)]
struct GridChrome {
    can_upload: bool,
    can_delete: bool,
}

struct GridLayout {
    scroll: usize,
    columns: usize,
    rows: usize,
}

fn render_grid(
    frame: &mut Frame<'_>,
    area: Rect,
    viewer: &Viewer,
    chrome: GridChrome,
    scroll: usize,
    hits: &mut HitMap,
) -> GridLayout {
    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(0),
            Constraint::Length(1),
        ])
        .split(area);

    let mut header = vec![
        Span::styled(
            image_count_label(viewer.len()),
            Style::default()
                .fg(COLOR_TEXT_PRIMARY)
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled(
            format!("   Sort: {} (s)", viewer.sort_order().label()),
            Style::default().fg(COLOR_ACCENT),
        ),
    ];
    if chrome.can_upload {
        header.push(Span::styled(
            "   Upload (u)",
            Style::default().fg(COLOR_SUCCESS),
        ));
    }
    frame.render_widget(Paragraph::new(Line::from(header)), layout[0]);

    let body = layout[1];
    let columns = grid_columns(body.width);
    let rows = usize::from((body.height / GRID_CELL_HEIGHT).max(1));
    let current = viewer.current_index();
    let scroll = scroll_to_show(current / columns, rows, scroll);
    let cell_width = (body.width / columns as u16).max(1);

    for row in 0..rows {
        for column in 0..columns {
            let index = (scroll + row) * columns + column;
            let Some(item) = viewer.items().get(index) else {
                break;
            };
            let y = body.y + row as u16 * GRID_CELL_HEIGHT;
            if y + GRID_CELL_HEIGHT > body.y + body.height {
                break;
            }
            let rect = Rect::new(
                body.x + column as u16 * cell_width,
                y,
                cell_width,
                GRID_CELL_HEIGHT,
            );
            let selected = index == current;
            let block = Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(if selected {
                    COLOR_BORDER_FOCUSED
                } else {
                    COLOR_BORDER_IDLE
                }))
                .style(Style::default().bg(if selected {
                    COLOR_PANEL_SELECTED_BG
                } else {
                    COLOR_PANEL_BG
                }));
            let width = usize::from(rect.width.saturating_sub(2));
            let kind = item.kind();
            let lines = vec![
                Line::from(Span::styled(
                    truncate_to_width(&format!("{} {}", kind_icon(kind), kind_label(kind)), width),
                    Style::default().fg(COLOR_TEXT_SECONDARY),
                )),
                Line::from(Span::styled(
                    truncate_to_width(item.filename(), width),
                    Style::default().fg(COLOR_TEXT_PRIMARY),
                )),
            ];
            frame.render_widget(Paragraph::new(Text::from(lines)).block(block), rect);
            hits.cells.push((rect, index));
        }
    }

    let mut hints = vec!["Enter open", "s sort"];
    if chrome.can_delete {
        hints.push("d delete");
    }
    if chrome.can_upload {
        hints.push("u upload");
    }
    hints.push("Esc close");
    frame.render_widget(
        Paragraph::new(hints.join(" · "))
            .style(Style::default().fg(COLOR_TEXT_SECONDARY))
            .alignment(Alignment::Center),
        layout[2],
    );

    GridLayout {
        scroll,
        columns,
        rows,
    }
}

fn render_lightbox(
    frame: &mut Frame<'_>,
    area: Rect,
    viewer: &Viewer,
    preview: Option<&LightboxPreview>,
    spinner: &str,
    can_delete: bool,
    hits: &mut HitMap,
) -> Option<KittyTarget> {
    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(3),
            Constraint::Length(1),
            Constraint::Length(1),
        ])
        .split(area);
    let item = viewer.current_item()?;
    let state = viewer.state();

    frame.render_widget(
        Paragraph::new(Span::styled(
            item.display_name().to_string(),
            Style::default()
                .fg(COLOR_TEXT_PRIMARY)
                .add_modifier(Modifier::BOLD),
        )),
        layout[0],
    );
    frame.render_widget(
        Paragraph::new(Span::styled(
            position_label(state.current_index, viewer.len()),
            Style::default().fg(COLOR_ACCENT),
        ))
        .alignment(Alignment::Right),
        layout[0],
    );

    let media_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(COLOR_BORDER_IDLE));
    let media_area = media_block.inner(layout[1]);
    frame.render_widget(media_block, layout[1]);

    let mut target = None;
    let body: Text<'static> = if state.has_error {
        Text::from(Line::from(Span::styled(
            "Failed to load media",
            Style::default().fg(COLOR_ERROR).add_modifier(Modifier::BOLD),
        )))
    } else {
        match preview {
            None => Text::from(Line::from(Span::styled(
                format!("{spinner} Loading {}…", item.filename()),
                Style::default().fg(COLOR_TEXT_SECONDARY),
            ))),
            Some(LightboxPreview {
                preview: Preview::Image(image),
                kitty: Some(_),
                ..
            }) => {
                let (cols, rows) = fit_cells(
                    image.source_width,
                    image.source_height,
                    terminal_cell_metrics(),
                    media_area.width,
                    media_area.height.saturating_sub(1),
                );
                target = Some(KittyTarget {
                    col: media_area.x + media_area.width.saturating_sub(cols) / 2,
                    row: media_area.y,
                    cols,
                    rows,
                });
                let mut lines: Vec<Line<'static>> =
                    (0..rows).map(|_| Line::from("")).collect();
                lines.push(Line::from(Span::styled(
                    image_caption(item.filename(), image),
                    Style::default().fg(COLOR_TEXT_SECONDARY),
                )));
                Text::from(lines)
            }
            Some(LightboxPreview {
                preview: Preview::Image(image),
                ..
            }) => image_placeholder_text(item.filename(), image),
            Some(LightboxPreview {
                preview: Preview::Video { url },
                ..
            }) => Text::from(vec![
                Line::from(Span::styled(
                    format!("▶ {}", item.filename()),
                    Style::default()
                        .fg(COLOR_TEXT_PRIMARY)
                        .add_modifier(Modifier::BOLD),
                )),
                Line::from(""),
                Line::from(Span::styled(
                    "Press p or Enter to play in the external player",
                    Style::default().fg(COLOR_ACCENT),
                )),
                Line::from(Span::styled(
                    url.clone(),
                    Style::default().fg(COLOR_TEXT_SECONDARY),
                )),
            ]),
        }
    };
    let alignment = if target.is_some() {
        Alignment::Left
    } else {
        Alignment::Center
    };
    frame.render_widget(
        Paragraph::new(body)
            .alignment(alignment)
            .wrap(Wrap { trim: false }),
        media_area,
    );

    let dots = footer_dots(viewer.len(), state.current_index);
    if !dots.is_empty() {
        let row = layout[2];
        let total = (dots.len() * 2) as u16;
        let mut x = row.x + row.width.saturating_sub(total) / 2;
        let mut spans = Vec::with_capacity(dots.len());
        for (index, active) in dots.into_iter().enumerate() {
            let (glyph, color) = if active {
                ("● ", COLOR_ACCENT)
            } else {
                ("○ ", COLOR_TEXT_SECONDARY)
            };
            spans.push(Span::styled(glyph, Style::default().fg(color)));
            hits.dots.push((Rect::new(x, row.y, 1, 1), index));
            x = x.saturating_add(2);
        }
        frame.render_widget(
            Paragraph::new(Line::from(spans)).alignment(Alignment::Center),
            row,
        );
    }

    let mut hints = vec!["←/→ navigate", "Esc back to grid", "x close"];
    if item.kind().is_video() {
        hints.insert(1, "p play");
    }
    if can_delete {
        hints.push("d delete");
    }
    frame.render_widget(
        Paragraph::new(hints.join(" · "))
            .style(Style::default().fg(COLOR_TEXT_SECONDARY))
            .alignment(Alignment::Center),
        layout[3],
    );

    target
}

fn draw_notices(frame: &mut Frame<'_>, area: Rect, notices: &[Notice]) {
    let width = MAX_TOAST_WIDTH.min(area.width.saturating_sub(2));
    if width < 10 {
        return;
    }
    let mut y = area.y + 1;
    for notice in notices.iter().rev() {
        if y + 3 > area.y + area.height {
            break;
        }
        let rect = Rect::new(area.x + area.width - width - 1, y, width, 3);
        let color = match notice.level {
            NoticeLevel::Info => COLOR_ACCENT,
            NoticeLevel::Success => COLOR_SUCCESS,
            NoticeLevel::Error => COLOR_ERROR,
        };
        frame.render_widget(Clear, rect);
        let block = Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(color))
            .style(Style::default().bg(COLOR_PANEL_FOCUSED_BG));
        let text = truncate_to_width(&notice.message, usize::from(width.saturating_sub(2)));
        frame.render_widget(
            Paragraph::new(Span::styled(text, Style::default().fg(COLOR_TEXT_PRIMARY))).block(block),
            rect,
        );
        y += 3;
    }
}

fn image_placeholder_text(filename: &str, image: &ImagePreview) -> Text<'static> {
    Text::from(vec![
        Line::from(Span::styled(
            format!("[image: {filename}]"),
            Style::default().fg(COLOR_TEXT_PRIMARY),
        )),
        Line::from(Span::styled(
            format!("{} × {} px", image.source_width, image.source_height),
            Style::default().fg(COLOR_TEXT_SECONDARY),
        )),
        Line::from(""),
        Line::from(Span::styled(
            "Inline previews need a terminal with kitty graphics support.",
            Style::default().fg(COLOR_TEXT_SECONDARY),
        )),
    ])
}

fn image_caption(filename: &str, image: &ImagePreview) -> String {
    format!(
        "{filename} · {} × {} px",
        image.source_width, image.source_height
    )
}

fn image_count_label(count: usize) -> String {
    format!("{count} Image(s)")
}

fn position_label(index: usize, len: usize) -> String {
    format!("{} / {}", index + 1, len)
}

fn kind_icon(kind: MediaKind) -> &'static str {
    match kind {
        MediaKind::Image => "▣",
        MediaKind::Video => "▶",
    }
}

fn kind_label(kind: MediaKind) -> &'static str {
    match kind {
        MediaKind::Image => "image",
        MediaKind::Video => "video",
    }
}

fn grid_columns(width: u16) -> usize {
    (usize::from(width) / GRID_CELL_WIDTH).max(1)
}

/// First visible row so that `row` stays on screen.
fn scroll_to_show(row: usize, visible: usize, scroll: usize) -> usize {
    let visible = visible.max(1);
    if row < scroll {
        row
    } else if row >= scroll + visible {
        row + 1 - visible
    } else {
        scroll
    }
}

/// One flag per item, set for the current one. Empty when dots would not fit
/// or there is nothing to page through.
fn footer_dots(len: usize, current: usize) -> Vec<bool> {
    if len <= 1 || len > MAX_FOOTER_DOTS {
        return Vec::new();
    }
    (0..len).map(|index| index == current).collect()
}

fn truncate_to_width(text: &str, max: usize) -> String {
    if UnicodeWidthStr::width(text) <= max {
        return text.to_string();
    }
    if max == 0 {
        return String::new();
    }
    let mut out = String::new();
    let mut used = 0;
    for ch in text.chars() {
        let width = UnicodeWidthChar::width(ch).unwrap_or(0);
        if used + width > max - 1 {
            break;
        }
        out.push(ch);
        used += width;
    }
    out.push('…');
    out
}

fn rect_contains(rect: Rect, col: u16, row: u16) -> bool {
    col >= rect.x
        && col < rect.x.saturating_add(rect.width)
        && row >= rect.y
        && row < rect.y.saturating_add(rect.height)
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let percent_x = percent_x.min(100);
    let percent_y = percent_y.min(100);
    let horizontal = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage(100 - percent_x - (100 - percent_x) / 2),
        ])
        .split(area);
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage(100 - percent_y - (100 - percent_y) / 2),
        ])
        .split(horizontal[1]);
    vertical[1]
}

fn kitty_image_id(src: &str, ticket: LoadTicket) -> u32 {
    let mut hasher = DefaultHasher::new();
    src.hash(&mut hasher);
    ticket.generation.hash(&mut hasher);
    // Zero is not a valid kitty image id.
    ((hasher.finish() & 0xFFFF_FFFF) as u32).max(1)
}

fn tmux_passthrough_enabled() -> bool {
    env::var("TMUX").map(|v| !v.is_empty()).unwrap_or(false)
}

fn kitty_transmit_inline(png: &[u8], image_id: u32) -> Result<KittyImage> {
    if png.is_empty() {
        bail!("no image data provided");
    }
    let encoded = general_purpose::STANDARD.encode(png);

    let wrap_tmux = tmux_passthrough_enabled();
    let mut chunks: Vec<String> = Vec::new();
    let mut offset = 0;
    while offset < encoded.len() {
        let end = usize::min(offset + KITTY_CHUNK_SIZE, encoded.len());
        let more = if end < encoded.len() { 1 } else { 0 };
        let mut out = String::new();
        if wrap_tmux {
            out.push_str("\x1bPtmux;\x1b");
        }
        if offset == 0 {
            out.push_str(&format!("\x1b_Ga=t,q=2,i={},f=100,m={more};", image_id));
        } else {
            out.push_str(&format!("\x1b_Ga=t,q=2,i={},m={more};", image_id));
        }
        out.push_str(&encoded[offset..end]);
        out.push_str("\x1b\\");
        if wrap_tmux {
            out.push_str("\x1b\\");
        }
        chunks.push(out);
        offset = end;
    }

    Ok(KittyImage {
        id: image_id,
        transmit_chunks: chunks,
        transmitted: false,
        wrap_tmux,
    })
}

/// Whether the terminal speaks the kitty graphics protocol.
/// `TAVERN_GALLERY_INLINE_IMAGES=on|off` overrides detection.
fn inline_images_supported(var: impl Fn(&str) -> Option<String>) -> bool {
    match var("TAVERN_GALLERY_INLINE_IMAGES").as_deref().map(str::trim) {
        Some("on" | "1") => return true,
        Some("off" | "0") => return false,
        _ => {}
    }
    if var("KITTY_WINDOW_ID").is_some_and(|id| !id.is_empty())
        || var("TERM_PROGRAM").is_some_and(|program| program == "WezTerm")
    {
        return true;
    }
    var("TERM").is_some_and(|term| {
        let term = term.to_ascii_lowercase();
        term.contains("kitty") || term.contains("wezterm")
    })
}

/// Cells covered by a `width`x`height` pixel image, shrunk to fit the box
/// but never enlarged. Unknown sizes count as the fallback width.
fn fit_cells(width: u32, height: u32, cell: CellMetrics, max_cols: u16, max_rows: u16) -> (u16, u16) {
    let max_cols = max_cols.max(1);
    let max_rows = max_rows.max(1);
    let pixels = |value: u32| {
        if value == 0 {
            FALLBACK_PREVIEW_PX
        } else {
            f64::from(value)
        }
    };
    let cols = (pixels(width) / cell.width.max(1.0)).max(1.0);
    let rows = (pixels(height) / cell.height.max(1.0)).max(1.0);
    let scale = (f64::from(max_cols) / cols)
        .min(f64::from(max_rows) / rows)
        .min(1.0);
    let fit = |native: f64, max: u16| ((native * scale).round() as u16).clamp(1, max);
    (fit(cols, max_cols), fit(rows, max_rows))
}
