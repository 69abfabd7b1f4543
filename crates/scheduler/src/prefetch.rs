//! Scroll-driven prefetch
//!
//! [`PrefetchController`] turns the scroll signals of a vertically stacked
//! page list into two outputs: the page-number label the UI should show, and
//! the page that should be rendered speculatively once scrolling stops.
//!
//! The controller is a plain state machine. It never renders anything itself;
//! the caller submits the returned page to the render scheduler at
//! [`RenderPriority::Prefetch`](crate::RenderPriority::Prefetch).

use std::time::{Duration, Instant};

/// Default time the page label stays up after the last change
pub const DEFAULT_LABEL_HIDE_DELAY: Duration = Duration::from_secs(3);

/// Scroll direction, derived from the sign of the last nonzero delta
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScrollDirection {
    Forward,
    Backward,
    #[default]
    Stationary,
}

impl ScrollDirection {
    /// Direction after a scroll frame with vertical delta `delta_y`
    ///
    /// A zero delta keeps the previous direction.
    pub fn after(self, delta_y: f32) -> Self {
        if delta_y > 0.0 {
            ScrollDirection::Forward
        } else if delta_y < 0.0 {
            ScrollDirection::Backward
        } else {
            self
        }
    }
}

/// Pages currently on screen
///
/// `None` means the layout has no such page (for example, no page is fully
/// visible while a tall page fills the screen).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VisiblePages {
    pub first_visible: Option<usize>,
    pub first_complete: Option<usize>,
    pub last_visible: Option<usize>,
    pub last_complete: Option<usize>,
}

impl VisiblePages {
    pub fn new(
        first_visible: Option<usize>,
        first_complete: Option<usize>,
        last_visible: Option<usize>,
        last_complete: Option<usize>,
    ) -> Self {
        Self {
            first_visible,
            first_complete,
            last_visible,
            last_complete,
        }
    }

    /// Page the label should name for a given scroll direction
    ///
    /// Forward scrolling prefers the last fully visible page, backward
    /// scrolling the first fully visible one. A stationary list shows the
    /// first visible page.
    pub fn page_to_display(&self, direction: ScrollDirection) -> Option<usize> {
        match direction {
            ScrollDirection::Forward => self
                .last_complete
                .or(self.last_visible)
                .or(self.first_visible),
            ScrollDirection::Backward => self
                .first_complete
                .or(self.first_visible)
                .or(self.last_visible),
            ScrollDirection::Stationary => self.first_visible,
        }
    }
}

/// Page-number label shown while scrolling
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageLabel {
    /// Zero-based page index
    pub page: usize,
    pub page_count: usize,
}

impl PageLabel {
    /// Text shown to the user, e.g. `3 / 12`
    pub fn text(&self) -> String {
        format!("{} / {}", self.page + 1, self.page_count)
    }
}

/// Tracks scroll state for one document view
///
/// # Example
///
/// ```
/// use pdf_viewer_scheduler::{PrefetchController, VisiblePages};
///
/// let mut prefetch = PrefetchController::new(20);
/// let visible = VisiblePages::new(Some(4), Some(5), Some(7), Some(6));
///
/// let label = prefetch.on_scroll(visible, 12.0).unwrap();
/// assert_eq!(label.text(), "7 / 20");
///
/// assert_eq!(prefetch.on_scroll_idle(4, 7), Some(5));
/// ```
#[derive(Debug, Clone)]
pub struct PrefetchController {
    page_count: usize,
    direction: ScrollDirection,
    displayed_page: Option<usize>,
    label_visible: bool,
    hide_deadline: Option<Instant>,
    hide_delay: Duration,
}

impl PrefetchController {
    pub fn new(page_count: usize) -> Self {
        Self {
            page_count,
            direction: ScrollDirection::Stationary,
            displayed_page: None,
            label_visible: false,
            hide_deadline: None,
            hide_delay: DEFAULT_LABEL_HIDE_DELAY,
        }
    }

    pub fn with_label_hide_delay(mut self, delay: Duration) -> Self {
        self.hide_delay = delay;
        self
    }

    pub fn direction(&self) -> ScrollDirection {
        self.direction
    }

    pub fn displayed_page(&self) -> Option<usize> {
        self.displayed_page
    }

    pub fn label_visible(&self) -> bool {
        self.label_visible
    }

    /// When the label will hide, if a hide is pending
    pub fn hide_deadline(&self) -> Option<Instant> {
        self.hide_deadline
    }

    /// Handle one scroll frame
    ///
    /// Returns the new label when the displayed page changed.
    pub fn on_scroll(&mut self, visible: VisiblePages, delta_y: f32) -> Option<PageLabel> {
        self.on_scroll_at(visible, delta_y, Instant::now())
    }

    /// [`on_scroll`](Self::on_scroll) with an explicit clock
    pub fn on_scroll_at(
        &mut self,
        visible: VisiblePages,
        delta_y: f32,
        now: Instant,
    ) -> Option<PageLabel> {
        self.direction = self.direction.after(delta_y);

        let page = visible.page_to_display(self.direction)?;
        if self.displayed_page == Some(page) {
            return None;
        }

        self.displayed_page = Some(page);
        self.label_visible = true;
        self.hide_deadline = Some(now + self.hide_delay);
        tracing::trace!(page, direction = ?self.direction, "displayed page changed");

        Some(PageLabel {
            page,
            page_count: self.page_count,
        })
    }

    /// Scrolling started again; keep the label up until the next idle
    pub fn on_scroll_resumed(&mut self) {
        self.hide_deadline = None;
    }

    /// Scrolling stopped
    ///
    /// Restarts the label hide timer and returns the single page to
    /// prefetch: the midpoint of the visible range.
    pub fn on_scroll_idle(&mut self, first_visible: usize, last_visible: usize) -> Option<usize> {
        self.on_scroll_idle_at(first_visible, last_visible, Instant::now())
    }

    /// [`on_scroll_idle`](Self::on_scroll_idle) with an explicit clock
    pub fn on_scroll_idle_at(
        &mut self,
        first_visible: usize,
        last_visible: usize,
        now: Instant,
    ) -> Option<usize> {
        if self.label_visible {
            self.hide_deadline = Some(now + self.hide_delay);
        }

        let (low, high) = if first_visible <= last_visible {
            (first_visible, last_visible)
        } else {
            (last_visible, first_visible)
        };
        let middle = low + (high - low) / 2;
        (middle < self.page_count).then_some(middle)
    }

    /// Hide the label if its deadline has passed
    ///
    /// Returns `true` when this call hid the label.
    pub fn poll_label(&mut self, now: Instant) -> bool {
        match self.hide_deadline {
            Some(deadline) if now >= deadline => {
                self.hide_deadline = None;
                let was_visible = self.label_visible;
                self.label_visible = false;
                was_visible
            }
            _ => false,
        }
    }
}
