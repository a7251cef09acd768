//! Proportional scroll synchronization between two panes.
//!
//! Positions are mapped as a fraction of each pane's scrollable range; no
//! attempt is made to align source lines with rendered blocks.

use std::time::Instant;

use log::debug;

use crate::scheduler::FrameClock;
use crate::surface::ScrollPane;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PaneMetrics {
    pub offset: f64,
    pub content_height: f64,
    pub viewport_height: f64,
}

impl PaneMetrics {
    pub fn new(offset: f64, content_height: f64, viewport_height: f64) -> Self {
        Self {
            offset,
            content_height,
            viewport_height,
        }
    }

    /// `content - viewport`; zero or negative when everything fits.
    pub fn scrollable_extent(&self) -> f64 {
        self.content_height - self.viewport_height
    }

    /// Scroll position as a fraction in [0, 1], `None` without overflow.
    pub fn fraction(&self) -> Option<f64> {
        let extent = self.scrollable_extent();
        if !(extent.is_finite() && extent > 0.0 && self.offset.is_finite()) {
            return None;
        }
        Some((self.offset / extent).clamp(0.0, 1.0))
    }
}

/// Target offset equivalent to the source's scroll fraction.
pub fn map_offset(source: &PaneMetrics, target: &PaneMetrics) -> Option<f64> {
    let ratio = source.fraction()?;
    let target_extent = target.scrollable_extent();
    if !target_extent.is_finite() {
        return None;
    }
    Some(ratio * target_extent.max(0.0))
}

/// Scroll `target` to the fraction `source` is at. No-op (returns `None`)
/// when the source has nothing to scroll.
pub fn sync_following<S, T>(source: &S, target: &mut T) -> Option<f64>
where
    S: ScrollPane + ?Sized,
    T: ScrollPane + ?Sized,
{
    let from = source.scroll();
    let offset = map_offset(&from, &target.scroll())?;
    debug!(
        "scroll: {:.1}/{:.1} -> {offset:.1}",
        from.offset,
        from.scrollable_extent()
    );
    target.set_scroll_offset(offset);
    Some(offset)
}

/// Coalesces scroll events into at most one sync per display refresh.
///
/// The first event of a frame arms the throttle; the sync then runs at the
/// next tick with whatever the positions are at that point.
#[derive(Debug, Clone, Copy)]
pub struct ScrollThrottle {
    clock: FrameClock,
    armed_until: Option<Instant>,
}

impl ScrollThrottle {
    pub fn new(clock: FrameClock) -> Self {
        Self {
            clock,
            armed_until: None,
        }
    }

    pub fn request(&mut self, now: Instant) {
        if self.armed_until.is_none() {
            self.armed_until = Some(self.clock.next_tick(now));
        }
    }

    /// True once per armed frame, when the tick has been reached.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.armed_until {
            Some(at) if now >= at => {
                self.armed_until = None;
                true
            }
            _ => false,
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.armed_until
    }
}
