//! Local stroke history.
//!
//! Strokes are kept in device pixels for local rendering and are appended
//! optimistically, independent of any server echo.

use kurbo::{BezPath, Point, Rect};
use peniko::Color;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default pen width in device pixels.
pub const DEFAULT_STROKE_WIDTH: f64 = 5.0;

/// Serializable pen color (RGBA8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PenColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl PenColor {
    pub fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self::new(r, g, b, 255)
    }

    pub fn black() -> Self {
        Self::rgb(0, 0, 0)
    }

    pub fn white() -> Self {
        Self::rgb(255, 255, 255)
    }

    pub fn blue() -> Self {
        Self::rgb(0, 0, 255)
    }

    /// `#RRGGBB`, alpha dropped.
    pub fn to_hex(&self) -> String {
        format!("#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }

    /// Parse `#RRGGBB` (the leading `#` is optional).
    pub fn from_hex(hex: &str) -> Option<Self> {
        let digits = hex.strip_prefix('#').unwrap_or(hex);
        if digits.len() != 6 || !digits.is_ascii() {
            return None;
        }
        let channel = |i: usize| u8::from_str_radix(&digits[i..i + 2], 16).ok();
        Some(Self::rgb(channel(0)?, channel(2)?, channel(4)?))
    }
}

impl Default for PenColor {
    fn default() -> Self {
        Self::blue()
    }
}

impl From<Color> for PenColor {
    fn from(color: Color) -> Self {
        let rgba = color.to_rgba8();
        Self::new(rgba.r, rgba.g, rgba.b, rgba.a)
    }
}

impl From<PenColor> for Color {
    fn from(color: PenColor) -> Self {
        Color::from_rgba8(color.r, color.g, color.b, color.a)
    }
}

/// One stroke: ordered device-pixel points plus pen settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrawPath {
    pub id: Uuid,
    /// Points in touch order.
    pub points: Vec<Point>,
    pub color: PenColor,
    pub stroke_width: f64,
    pub page_number: u32,
}

impl DrawPath {
    pub fn new(color: PenColor, stroke_width: f64, page_number: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            points: Vec::new(),
            color,
            stroke_width,
            page_number,
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// A stroke needs at least two points to have a direction.
    pub fn is_renderable(&self) -> bool {
        self.points.len() >= 2
    }

    /// Smoothed outline: a cubic to each point with the second control at the
    /// midpoint of the segment.
    pub fn to_path(&self) -> BezPath {
        let mut path = BezPath::new();
        let Some(first) = self.points.first() else {
            return path;
        };
        path.move_to(*first);
        for window in self.points.windows(2) {
            let (p1, p2) = (window[0], window[1]);
            path.curve_to(p1, p1.midpoint(p2), p2);
        }
        path
    }

    pub fn bounds(&self) -> Rect {
        let Some(first) = self.points.first() else {
            return Rect::ZERO;
        };
        self.points
            .iter()
            .skip(1)
            .fold(Rect::from_points(*first, *first), |rect, p| rect.union_pt(*p))
    }
}

/// Completed strokes plus one optional in-progress stroke.
///
/// The completed list always holds at least a sentinel placeholder path,
/// which [`undo`](Self::undo) never removes.
#[derive(Debug, Clone)]
pub struct LocalStrokeBuffer {
    completed: Vec<DrawPath>,
    current: Option<DrawPath>,
}

impl LocalStrokeBuffer {
    pub fn new() -> Self {
        Self {
            completed: vec![Self::sentinel()],
            current: None,
        }
    }

    fn sentinel() -> DrawPath {
        DrawPath::new(PenColor::default(), DEFAULT_STROKE_WIDTH, 0)
    }

    /// Open a new stroke, closing any dangling one first.
    pub fn start(&mut self, point: Point, color: PenColor, stroke_width: f64, page_number: u32) {
        if self.current.is_some() {
            log::debug!("Closing dangling stroke before starting a new one");
            self.end();
        }
        let mut path = DrawPath::new(color, stroke_width, page_number);
        path.points.push(point);
        self.current = Some(path);
    }

    /// Append to the in-progress stroke. No-op when none is open.
    pub fn extend(&mut self, point: Point) {
        if let Some(path) = self.current.as_mut() {
            path.points.push(point);
        }
    }

    /// Close the in-progress stroke. Returns true if it was kept.
    ///
    /// Single-point taps are discarded.
    pub fn end(&mut self) -> bool {
        match self.current.take() {
            Some(path) if path.is_renderable() => {
                self.completed.push(path);
                true
            }
            _ => false,
        }
    }

    /// Drop all history and the in-progress stroke.
    pub fn clear(&mut self) {
        self.completed.clear();
        self.completed.push(Self::sentinel());
        self.current = None;
    }

    /// Remove the most recent completed stroke. The sentinel stays.
    pub fn undo(&mut self) -> Option<DrawPath> {
        if self.completed.len() > 1 {
            self.completed.pop()
        } else {
            None
        }
    }

    /// Completed strokes, sentinel first.
    pub fn completed(&self) -> &[DrawPath] {
        &self.completed
    }

    pub fn current(&self) -> Option<&DrawPath> {
        self.current.as_ref()
    }

    pub fn is_drawing(&self) -> bool {
        self.current.is_some()
    }

    /// Renderable completed strokes on one page, oldest first.
    pub fn paths_for_page(&self, page_number: u32) -> impl Iterator<Item = &DrawPath> {
        self.completed
            .iter()
            .filter(move |p| p.page_number == page_number && p.is_renderable())
    }
}

impl Default for LocalStrokeBuffer {
    fn default() -> Self {
        Self::new()
    }
}
