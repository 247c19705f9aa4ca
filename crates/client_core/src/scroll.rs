//! Viewport bookkeeping for prepend-style inserts.
//!
//! Before a backfill page is merged the caller captures the viewport; after each layout
//! pass it reports the new content height and receives the offset that keeps the
//! previously visible message in place. Stick-to-bottom auto-scroll is suspended until
//! the prepend settles.

const SETTLE_EPSILON: f32 = 0.5;
pub const MAX_SETTLE_PASSES: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub scroll_offset: f32,
    pub content_height: f32,
    pub viewport_height: f32,
}

impl Viewport {
    pub fn distance_from_bottom(&self) -> f32 {
        (self.content_height - self.viewport_height - self.scroll_offset).max(0.0)
    }

    pub fn is_near_bottom(&self, threshold: f32) -> bool {
        self.distance_from_bottom() <= threshold
    }

    pub fn bottom_offset(&self) -> f32 {
        (self.content_height - self.viewport_height).max(0.0)
    }
}

#[derive(Debug, Clone, Copy)]
struct PendingPrepend {
    offset_before: f32,
    height_before: f32,
    last_target: Option<f32>,
    passes: u8,
    stick_before: bool,
}

#[derive(Debug, Clone)]
pub struct ScrollAnchor {
    near_bottom_threshold: f32,
    backfill_trigger: f32,
    stick_to_bottom: bool,
    pending: Option<PendingPrepend>,
}

impl ScrollAnchor {
    pub fn new(near_bottom_threshold: f32, backfill_trigger: f32) -> Self {
        Self {
            near_bottom_threshold,
            backfill_trigger,
            stick_to_bottom: true,
            pending: None,
        }
    }

    pub fn sticks_to_bottom(&self) -> bool {
        self.stick_to_bottom && self.pending.is_none()
    }

    pub fn is_compensating(&self) -> bool {
        self.pending.is_some()
    }

    /// Called on user scroll. Re-evaluates stick-to-bottom unless a prepend is settling.
    pub fn observe(&mut self, viewport: Viewport) {
        if self.pending.is_none() {
            self.stick_to_bottom = viewport.is_near_bottom(self.near_bottom_threshold);
        }
    }

    /// True when the viewport is close enough to the top to request older history.
    pub fn wants_backfill(&self, viewport: Viewport) -> bool {
        self.pending.is_none() && viewport.scroll_offset <= self.backfill_trigger
    }

    /// Captures the viewport right before older content is inserted above it.
    pub fn begin_prepend(&mut self, viewport: Viewport) {
        self.pending = Some(PendingPrepend {
            offset_before: viewport.scroll_offset,
            height_before: viewport.content_height,
            last_target: None,
            passes: 0,
            stick_before: self.stick_to_bottom,
        });
    }

    /// Reports a layout pass. Returns the offset to apply when it differs from the one
    /// returned by the previous pass. The anchor releases itself after
    /// `MAX_SETTLE_PASSES` passes.
    pub fn settle(&mut self, content_height: f32) -> Option<f32> {
        let pending = self.pending.as_mut()?;
        pending.passes += 1;
        let inserted = (content_height - pending.height_before).max(0.0);
        let target = pending.offset_before + inserted;
        let changed = pending
            .last_target
            .map_or(true, |last| (last - target).abs() > SETTLE_EPSILON);
        pending.last_target = Some(target);

        if pending.passes >= MAX_SETTLE_PASSES {
            self.finish();
        }
        changed.then_some(target)
    }

    /// Ends compensation early (e.g. the page turned out to be empty).
    pub fn finish(&mut self) {
        if let Some(pending) = self.pending.take() {
            self.stick_to_bottom = pending.stick_before;
        }
    }

    /// Called after appended content was laid out. Returns the offset that pins the view
    /// to the bottom when auto-scroll is active.
    pub fn on_append(&self, viewport: Viewport) -> Option<f32> {
        self.sticks_to_bottom().then(|| viewport.bottom_offset())
    }
}

#[cfg(test)]
#[path = "tests/scroll_tests.rs"]
mod tests;
