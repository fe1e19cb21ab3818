//! Drawing surface state: pen settings, local and remote strokes, and the
//! sync client they talk through.

use crate::channel::Channel;
use crate::placement::{NormalizedPoint, to_device};
use crate::strokes::{DEFAULT_STROKE_WIDTH, DrawPath, LocalStrokeBuffer, PenColor};
use crate::sync::{SyncClient, SyncEvent};
use kurbo::Point;

/// Current pen configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PenSettings {
    pub color: PenColor,
    pub stroke_width: f64,
    /// Eraser mode paints with white.
    pub erasing: bool,
}

impl PenSettings {
    /// Color strokes are actually drawn with.
    pub fn active_color(&self) -> PenColor {
        if self.erasing { PenColor::white() } else { self.color }
    }
}

impl Default for PenSettings {
    fn default() -> Self {
        Self {
            color: PenColor::default(),
            stroke_width: DEFAULT_STROKE_WIDTH,
            erasing: false,
        }
    }
}

/// A student's whiteboard.
///
/// Pointer input draws locally right away and is forwarded to the server
/// when the connection and edit permission allow it. Strokes relayed from
/// other participants are collected separately.
pub struct Whiteboard<C: Channel> {
    sync: SyncClient<C>,
    strokes: LocalStrokeBuffer,
    remote_strokes: LocalStrokeBuffer,
    pen: PenSettings,
}

impl<C: Channel> Whiteboard<C> {
    pub fn new(sync: SyncClient<C>) -> Self {
        Self {
            sync,
            strokes: LocalStrokeBuffer::new(),
            remote_strokes: LocalStrokeBuffer::new(),
            pen: PenSettings::default(),
        }
    }

    pub fn sync(&self) -> &SyncClient<C> {
        &self.sync
    }

    pub fn sync_mut(&mut self) -> &mut SyncClient<C> {
        &mut self.sync
    }

    pub fn strokes(&self) -> &LocalStrokeBuffer {
        &self.strokes
    }

    /// Strokes relayed from other participants, in image-normalized
    /// coordinates.
    pub fn remote_strokes(&self) -> &LocalStrokeBuffer {
        &self.remote_strokes
    }

    /// Relayed strokes mapped onto the current placement, oldest first and
    /// the in-progress stroke last. Empty until a placement exists.
    pub fn remote_paths_on_screen(&self) -> Vec<DrawPath> {
        let Some(placement) = self.sync.placement() else {
            return Vec::new();
        };
        self.remote_strokes
            .completed()
            .iter()
            .chain(self.remote_strokes.current())
            .filter(|path| !path.is_empty())
            .map(|path| DrawPath {
                points: path
                    .points
                    .iter()
                    .map(|p| to_device(NormalizedPoint::new(p.x, p.y), &placement))
                    .collect(),
                ..path.clone()
            })
            .collect()
    }

    pub fn pen(&self) -> PenSettings {
        self.pen
    }

    pub fn set_pen_color(&mut self, color: PenColor) {
        self.pen.color = color;
        self.pen.erasing = false;
    }

    pub fn set_stroke_width(&mut self, width: f64) {
        if width > 0.0 && width.is_finite() {
            self.pen.stroke_width = width;
        } else {
            log::warn!("Ignoring invalid stroke width {width}");
        }
    }

    pub fn set_erasing(&mut self, erasing: bool) {
        self.pen.erasing = erasing;
    }

    /// The drawing surface changed size.
    pub fn resize(&mut self, width: f64, height: f64) -> bool {
        self.sync.register_viewport(width, height)
    }

    /// Begin a stroke. Ignored without edit permission; returns whether a
    /// stroke was started.
    pub fn pointer_down(&mut self, point: Point) -> bool {
        if !self.sync.link().can_edit() {
            log::debug!("Drawing not allowed, ignoring touch");
            return false;
        }
        let page = self.sync.background().current_page();
        let color = self.pen.active_color();
        self.strokes.start(point, color, self.pen.stroke_width, page);
        self.sync.send_stroke(point, true, self.pen.stroke_width, color, page);
        true
    }

    /// Continue the open stroke. Locally the stroke keeps growing even if
    /// permission is lost mid-gesture; only transmission stops.
    pub fn pointer_move(&mut self, point: Point) {
        let Some(path) = self.strokes.current() else {
            return;
        };
        let (color, width, page) = (path.color, path.stroke_width, path.page_number);
        self.strokes.extend(point);
        self.sync.send_stroke(point, false, width, color, page);
    }

    /// Finish the open stroke. Returns true if it was committed.
    pub fn pointer_up(&mut self) -> bool {
        self.strokes.end()
    }

    /// Remove the last local stroke. Local only.
    pub fn undo(&mut self) -> bool {
        self.strokes.undo().is_some()
    }

    /// Wipe local strokes. Local only.
    pub fn clear(&mut self) {
        self.strokes.clear();
    }

    pub fn next_page(&mut self) -> bool {
        let background = self.sync.background();
        let total = background.total_pages();
        match background.current_page().checked_add(1) {
            Some(next) if next < total => self.sync.change_page(next),
            _ => false,
        }
    }

    pub fn previous_page(&mut self) -> bool {
        if self.sync.background().total_pages() == 0 {
            return false;
        }
        match self.sync.background().current_page().checked_sub(1) {
            Some(previous) => self.sync.change_page(previous),
            None => false,
        }
    }

    pub fn request_edit_permission(&mut self, question: &str) -> bool {
        self.sync.request_edit_permission(question)
    }

    /// Apply inbound events. Annotation clears and relayed strokes are
    /// folded into the stroke buffers before being returned.
    pub fn poll(&mut self) -> Vec<SyncEvent> {
        let events = self.sync.poll();
        for event in &events {
            match event {
                SyncEvent::AnnotationsCleared => {
                    self.strokes.clear();
                    self.remote_strokes.clear();
                }
                SyncEvent::RemoteStroke {
                    normalized,
                    is_start: true,
                    line_width,
                    color,
                    page_number,
                    ..
                } => {
                    let point = Point::new(normalized.x, normalized.y);
                    self.remote_strokes.start(point, *color, *line_width, *page_number);
                }
                SyncEvent::RemoteStroke { normalized, .. } => {
                    self.remote_strokes.extend(Point::new(normalized.x, normalized.y));
                }
                _ => {}
            }
        }
        events
    }

    pub fn close(&mut self) {
        self.strokes.end();
        self.sync.close();
    }
}
