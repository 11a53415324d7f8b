//! Model of the page the browser renders.
//!
use common::protocol::{CaptureSurface, PageState};

use crate::board::LabelBoard;

/// Button states, loading indicator, capture element and display slots.
#[derive(Debug)]
pub struct Page {
    start_enabled: bool,
    stop_enabled: bool,
    loading: bool,
    capture: Option<CaptureSurface>,
    board: LabelBoard,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            start_enabled: true,
            stop_enabled: false,
            loading: false,
            capture: None,
            board: LabelBoard::new(),
        }
    }
}

impl Page {
    pub fn new() -> Self {
        Self::default()
    }

    /// Show the loading indicator while the model and camera are acquired.
    pub fn begin_loading(&mut self) {
        self.loading = true;
    }

    /// Return to the idle look after a failed start.
    pub fn abort_loading(&mut self) {
        self.loading = false;
        self.start_enabled = true;
        self.stop_enabled = false;
    }

    /// Show the capture element and `num_classes` empty slots, and swap the buttons.
    pub fn attach(&mut self, surface: CaptureSurface, num_classes: usize) {
        self.capture = Some(surface);
        self.board.allocate(num_classes);
        self.loading = false;
        self.start_enabled = false;
        self.stop_enabled = true;
    }

    /// Remove the capture element and all slots, and swap the buttons back.
    pub fn detach(&mut self) {
        self.capture = None;
        self.board.clear();
        self.loading = false;
        self.start_enabled = true;
        self.stop_enabled = false;
    }

    pub fn board_mut(&mut self) -> &mut LabelBoard {
        &mut self.board
    }

    pub fn snapshot(&self) -> PageState {
        PageState {
            start_enabled: self.start_enabled,
            stop_enabled: self.stop_enabled,
            loading: self.loading,
            capture: self.capture,
            labels: self.board.slots().to_vec(),
        }
    }
}

#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn starts_idle() {
        let state = Page::new().snapshot();

        assert!(state.start_enabled);
        assert!(!state.stop_enabled);
        assert!(!state.loading);
        assert_eq!(state.capture, None);
        assert!(state.labels.is_empty());
    }

    #[test]
    fn attach_then_detach() {
        let mut page = Page::new();
        page.begin_loading();
        assert!(page.snapshot().loading);

        page.attach(CaptureSurface::Video, 4);
        let state = page.snapshot();
        assert!(!state.loading);
        assert!(!state.start_enabled);
        assert!(state.stop_enabled);
        assert_eq!(state.capture, Some(CaptureSurface::Video));
        assert_eq!(state.labels.len(), 4);

        page.detach();
        assert_eq!(page.snapshot(), Page::new().snapshot());
    }

    #[test]
    fn failed_start_hides_loading_indicator() {
        let mut page = Page::new();
        page.begin_loading();
        page.abort_loading();

        assert_eq!(page.snapshot(), Page::new().snapshot());
    }
}
