//! Mapping between device pixels and image-normalized coordinates.
//!
//! The background image is aspect-fit into the viewport and centered on the
//! axis that does not fill. Strokes travel over the wire as coordinates in
//! `[0, 1] x [0, 1]` relative to that image, so every receiver can redraw
//! them at its own resolution.

use kurbo::{Affine, Point, Size, Vec2};
use serde::{Deserialize, Serialize};

/// Normalized values this close to an edge are treated as on it.
pub const EDGE_TOLERANCE: f64 = 1e-9;

/// Size of the drawing surface in device pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ViewportGeometry {
    pub view_width: f64,
    pub view_height: f64,
}

impl ViewportGeometry {
    pub fn new(view_width: f64, view_height: f64) -> Self {
        Self {
            view_width,
            view_height,
        }
    }

    pub fn size(&self) -> Size {
        Size::new(self.view_width, self.view_height)
    }

    /// Whether both dimensions are positive and finite.
    pub fn is_valid(&self) -> bool {
        is_positive(self.view_width) && is_positive(self.view_height)
    }
}

/// A point in image-relative coordinates, each axis in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedPoint {
    pub x: f64,
    pub y: f64,
}

impl NormalizedPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Whether both axes are inside the unit square (edges included).
    pub fn in_bounds(&self) -> bool {
        (0.0..=1.0).contains(&self.x) && (0.0..=1.0).contains(&self.y)
    }
}

/// Where the background image sits inside the viewport.
///
/// Derived from the viewport and image sizes by [`compute_placement`]; never
/// stored independently of them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImagePlacement {
    /// Image width in image pixels.
    pub image_width: f64,
    /// Image height in image pixels.
    pub image_height: f64,
    pub offset_x: f64,
    pub offset_y: f64,
    /// Device pixels per image pixel. Always positive.
    pub scale_factor: f64,
}

impl ImagePlacement {
    /// Offset of the image's top-left corner in the viewport.
    pub fn offset(&self) -> Vec2 {
        Vec2::new(self.offset_x, self.offset_y)
    }

    /// Size of the image once scaled into the viewport.
    pub fn scaled_size(&self) -> Size {
        Size::new(
            self.image_width * self.scale_factor,
            self.image_height * self.scale_factor,
        )
    }

    /// Transform from image pixels to device pixels.
    pub fn transform(&self) -> Affine {
        Affine::translate(self.offset()) * Affine::scale(self.scale_factor)
    }
}

fn is_positive(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

/// Aspect-fit an image of the given pixel size into the viewport.
///
/// Returns `None` when any dimension is not positive; without a placement no
/// coordinates may be transmitted.
pub fn compute_placement(
    viewport: ViewportGeometry,
    image_width: f64,
    image_height: f64,
) -> Option<ImagePlacement> {
    if !viewport.is_valid() || !is_positive(image_width) || !is_positive(image_height) {
        return None;
    }

    let image_aspect = image_width / image_height;
    let view_aspect = viewport.view_width / viewport.view_height;

    let placement = if image_aspect > view_aspect {
        // Relatively wider: fit to width, letterbox top and bottom.
        let scale_factor = viewport.view_width / image_width;
        ImagePlacement {
            image_width,
            image_height,
            offset_x: 0.0,
            offset_y: (viewport.view_height - image_height * scale_factor) / 2.0,
            scale_factor,
        }
    } else {
        let scale_factor = viewport.view_height / image_height;
        ImagePlacement {
            image_width,
            image_height,
            offset_x: (viewport.view_width - image_width * scale_factor) / 2.0,
            offset_y: 0.0,
            scale_factor,
        }
    };

    log::debug!(
        "Image placement: scale={}, offset=({}, {})",
        placement.scale_factor,
        placement.offset_x,
        placement.offset_y
    );
    Some(placement)
}

/// Convert a device point to image-normalized coordinates.
///
/// Points outside the rendered image are rejected, not clamped: the server
/// has no coordinate space outside the image.
pub fn to_normalized(device_point: Point, placement: &ImagePlacement) -> Option<NormalizedPoint> {
    let scaled = placement.scaled_size();
    let normalized = NormalizedPoint::new(
        (device_point.x - placement.offset_x) / scaled.width,
        (device_point.y - placement.offset_y) / scaled.height,
    );
    if let (Some(x), Some(y)) = (snap_unit(normalized.x), snap_unit(normalized.y)) {
        Some(NormalizedPoint::new(x, y))
    } else {
        log::trace!(
            "Point ({}, {}) outside image, dropping ({}, {})",
            device_point.x,
            device_point.y,
            normalized.x,
            normalized.y
        );
        None
    }
}

/// Snap rounding noise at the edges back onto `[0, 1]`; `None` if outside.
fn snap_unit(value: f64) -> Option<f64> {
    if (0.0..=1.0).contains(&value) {
        Some(value)
    } else if (-EDGE_TOLERANCE..0.0).contains(&value) {
        Some(0.0)
    } else if value > 1.0 && value <= 1.0 + EDGE_TOLERANCE {
        Some(1.0)
    } else {
        None
    }
}

/// Convert image-normalized coordinates back to a device point.
pub fn to_device(normalized: NormalizedPoint, placement: &ImagePlacement) -> Point {
    let image_point = Point::new(
        normalized.x * placement.image_width,
        normalized.y * placement.image_height,
    );
    placement.transform() * image_point
}
