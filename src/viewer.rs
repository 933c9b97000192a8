//! Grid and lightbox view state for one open gallery session.
//!
//! The viewer never talks to the host. It only tracks which item is current,
//! which view is showing, and whether the lightbox media for the current item
//! has loaded. Media loads are tagged with a [`LoadTicket`]; a result is only
//! applied while its ticket is still the current one.

use crate::gallery::{GalleryItem, SortOrder};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewMode {
    Grid,
    Lightbox,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewState {
    pub mode: ViewMode,
    pub current_index: usize,
    pub is_loading: bool,
    pub has_error: bool,
    pub sort_order: SortOrder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoadTicket {
    pub index: usize,
    pub generation: u64,
}

/// Keys the viewer reacts to while mounted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Left,
    Right,
    Escape,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Unchanged,
    Changed,
    Close,
}

#[derive(Debug, Clone)]
pub struct Viewer {
    items: Vec<GalleryItem>,
    state: ViewState,
    generation: u64,
    requested: Option<u64>,
}

impl Viewer {
    /// Starts in the grid. Returns `None` for an empty list since there is
    /// nothing to index.
    pub fn new(items: Vec<GalleryItem>, initial_index: usize, sort_order: SortOrder) -> Option<Self> {
        if items.is_empty() {
            return None;
        }
        let current_index = initial_index.min(items.len() - 1);
        Some(Self {
            items,
            state: ViewState {
                mode: ViewMode::Grid,
                current_index,
                is_loading: true,
                has_error: false,
                sort_order,
            },
            generation: 0,
            requested: None,
        })
    }

    /// Continues the load generation of an earlier session so its tickets
    /// never match this one's.
    pub fn continuing_from(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn items(&self) -> &[GalleryItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn state(&self) -> ViewState {
        self.state
    }

    pub fn mode(&self) -> ViewMode {
        self.state.mode
    }

    pub fn current_index(&self) -> usize {
        self.state.current_index
    }

    pub fn current_item(&self) -> Option<&GalleryItem> {
        self.items.get(self.state.current_index)
    }

    pub fn sort_order(&self) -> SortOrder {
        self.state.sort_order
    }

    pub fn set_sort_order(&mut self, sort: SortOrder) {
        self.state.sort_order = sort;
    }

    pub fn select(&mut self, index: usize) -> bool {
        if index >= self.items.len() {
            return false;
        }
        self.set_index(index);
        self.state.mode = ViewMode::Lightbox;
        true
    }

    pub fn open_current(&mut self) -> bool {
        self.select(self.state.current_index)
    }

    pub fn back(&mut self) -> bool {
        if self.state.mode == ViewMode::Lightbox {
            self.state.mode = ViewMode::Grid;
            true
        } else {
            false
        }
    }

    pub fn next(&mut self) {
        let len = self.items.len();
        self.set_index((self.state.current_index + 1) % len);
    }

    pub fn previous(&mut self) {
        let len = self.items.len();
        self.set_index((self.state.current_index + len - 1) % len);
    }

    pub fn jump_to(&mut self, index: usize) -> bool {
        if index >= self.items.len() {
            return false;
        }
        self.set_index(index);
        true
    }

    /// Moves the grid cursor by whole rows, stopping at the edges.
    pub fn move_rows(&mut self, rows: i32, columns: usize) {
        let columns = columns.max(1) as i64;
        let last = self.items.len() as i64 - 1;
        let target = self.state.current_index as i64 + i64::from(rows) * columns;
        if (0..=last).contains(&target) {
            self.set_index(target as usize);
        }
    }

    pub fn handle_key(&mut self, key: Key) -> Transition {
        match key {
            Key::Left => {
                self.previous();
                Transition::Changed
            }
            Key::Right => {
                self.next();
                Transition::Changed
            }
            Key::Escape => match self.state.mode {
                ViewMode::Lightbox => {
                    self.back();
                    Transition::Changed
                }
                ViewMode::Grid => Transition::Close,
            },
        }
    }

    pub fn ticket(&self) -> LoadTicket {
        LoadTicket {
            index: self.state.current_index,
            generation: self.generation,
        }
    }

    /// Hands out the current load once while the lightbox waits on it.
    pub fn take_load_request(&mut self) -> Option<(LoadTicket, GalleryItem)> {
        if self.state.mode != ViewMode::Lightbox || !self.state.is_loading {
            return None;
        }
        if self.requested == Some(self.generation) {
            return None;
        }
        let item = self.current_item()?.clone();
        self.requested = Some(self.generation);
        Some((self.ticket(), item))
    }

    pub fn media_loaded(&mut self, ticket: LoadTicket) -> bool {
        self.finish_load(ticket, false)
    }

    pub fn media_failed(&mut self, ticket: LoadTicket) -> bool {
        self.finish_load(ticket, true)
    }

    fn finish_load(&mut self, ticket: LoadTicket, failed: bool) -> bool {
        if ticket != self.ticket() {
            return false;
        }
        self.state.is_loading = false;
        self.state.has_error = failed;
        true
    }

    fn set_index(&mut self, index: usize) {
        let changed = index != self.state.current_index;
        self.state.current_index = index;
        if changed || self.state.has_error || self.requested != Some(self.generation) {
            self.generation = self.generation.wrapping_add(1);
            self.requested = None;
            self.state.is_loading = true;
            self.state.has_error = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(count: usize) -> Vec<GalleryItem> {
        (0..count)
            .map(|i| GalleryItem::new(format!("user/images/f/{i}.png"), format!("{i}.png")))
            .collect()
    }

    #[test]
    fn empty_list_has_no_viewer() {
        assert!(Viewer::new(Vec::new(), 0, SortOrder::default()).is_none());
    }

    #[test]
    fn initial_index_is_clamped() {
        let viewer = Viewer::new(items(2), 5, SortOrder::default()).unwrap();
        assert_eq!(viewer.current_index(), 1);
        assert_eq!(viewer.mode(), ViewMode::Grid);
    }

    #[test]
    fn next_and_previous_wrap() {
        let mut viewer = Viewer::new(items(3), 2, SortOrder::default()).unwrap();
        viewer.next();
        assert_eq!(viewer.current_index(), 0);
        viewer.previous();
        assert_eq!(viewer.current_index(), 2);
        for _ in 0..10 {
            viewer.next();
            assert!(viewer.current_index() < 3);
        }
    }

    #[test]
    fn single_item_navigation_stays_put() {
        let mut viewer = Viewer::new(items(1), 0, SortOrder::default()).unwrap();
        viewer.next();
        assert_eq!(viewer.current_index(), 0);
        viewer.previous();
        assert_eq!(viewer.current_index(), 0);
    }

    #[test]
    fn escape_steps_back_one_level() {
        let mut viewer = Viewer::new(items(3), 0, SortOrder::default()).unwrap();
        assert!(viewer.select(1));
        assert_eq!(viewer.mode(), ViewMode::Lightbox);
        assert_eq!(viewer.handle_key(Key::Escape), Transition::Changed);
        assert_eq!(viewer.mode(), ViewMode::Grid);
        assert_eq!(viewer.current_index(), 1);
        assert_eq!(viewer.handle_key(Key::Escape), Transition::Close);
    }

    #[test]
    fn arrows_navigate_in_both_modes() {
        let mut viewer = Viewer::new(items(3), 0, SortOrder::default()).unwrap();
        viewer.handle_key(Key::Left);
        assert_eq!(viewer.current_index(), 2);
        viewer.select(0);
        viewer.handle_key(Key::Right);
        assert_eq!(viewer.current_index(), 1);
    }

    #[test]
    fn select_out_of_range_is_ignored() {
        let mut viewer = Viewer::new(items(2), 0, SortOrder::default()).unwrap();
        assert!(!viewer.select(7));
        assert_eq!(viewer.mode(), ViewMode::Grid);
        assert!(!viewer.jump_to(2));
    }

    #[test]
    fn index_change_resets_media_flags() {
        let mut viewer = Viewer::new(items(3), 0, SortOrder::default()).unwrap();
        viewer.select(0);
        let (ticket, _) = viewer.take_load_request().unwrap();
        assert!(viewer.media_failed(ticket));
        assert!(viewer.state().has_error);
        assert!(!viewer.state().is_loading);

        viewer.next();
        let state = viewer.state();
        assert!(state.is_loading);
        assert!(!state.has_error);
    }

    #[test]
    fn stale_load_results_are_dropped() {
        let mut viewer = Viewer::new(items(3), 0, SortOrder::default()).unwrap();
        viewer.select(0);
        let (first, item) = viewer.take_load_request().unwrap();
        assert_eq!(item.title, "0.png");

        viewer.next();
        let (second, _) = viewer.take_load_request().unwrap();
        assert_ne!(first, second);

        assert!(!viewer.media_failed(first));
        assert!(viewer.state().is_loading);
        assert!(!viewer.state().has_error);

        assert!(viewer.media_loaded(second));
        assert!(!viewer.state().is_loading);
    }

    #[test]
    fn returning_to_an_index_issues_a_fresh_ticket() {
        let mut viewer = Viewer::new(items(2), 0, SortOrder::default()).unwrap();
        viewer.select(0);
        let (first, _) = viewer.take_load_request().unwrap();
        viewer.next();
        viewer.previous();
        let (again, _) = viewer.take_load_request().unwrap();
        assert_eq!(first.index, again.index);
        assert_ne!(first.generation, again.generation);
        assert!(!viewer.media_loaded(first));
    }

    #[test]
    fn load_request_is_handed_out_once() {
        let mut viewer = Viewer::new(items(2), 0, SortOrder::default()).unwrap();
        assert!(viewer.take_load_request().is_none());
        viewer.select(0);
        assert!(viewer.take_load_request().is_some());
        assert!(viewer.take_load_request().is_none());
    }

    #[test]
    fn grid_rows_clamp_at_edges() {
        let mut viewer = Viewer::new(items(7), 1, SortOrder::default()).unwrap();
        viewer.move_rows(1, 3);
        assert_eq!(viewer.current_index(), 4);
        viewer.move_rows(1, 3);
        assert_eq!(viewer.current_index(), 4);
        viewer.move_rows(-1, 3);
        assert_eq!(viewer.current_index(), 1);
        viewer.move_rows(-1, 3);
        assert_eq!(viewer.current_index(), 1);
    }
}
