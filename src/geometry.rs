//! Geometry helpers for presenter layout
//!
//! Sizes, rectangles and edge insets used to place the presenter's video
//! on the stage and to derive the normalized content rect consumed by the
//! render surface.

use glam::Vec2;
use serde::{Deserialize, Serialize};

/// A width/height pair in pixels (or normalized units for content rects).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: f32,
    pub height: f32,
}

impl Size {
    pub const ZERO: Size = Size {
        width: 0.0,
        height: 0.0,
    };

    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    pub fn is_zero(&self) -> bool {
        self.width == 0.0 && self.height == 0.0
    }

    pub fn as_vec2(&self) -> Vec2 {
        Vec2::new(self.width, self.height)
    }
}

/// An axis-aligned rectangle.
///
/// Content rects are normalized (unit square); layer frames are in stage
/// pixels. A negative width encodes horizontal mirroring.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// The full unit square.
    pub fn unit() -> Self {
        Self::new(0.0, 0.0, 1.0, 1.0)
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    pub fn center(&self) -> Vec2 {
        Vec2::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

/// Fractional insets from each edge, in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EdgeInsets {
    pub top: f32,
    pub left: f32,
    pub bottom: f32,
    pub right: f32,
}

impl EdgeInsets {
    pub const ZERO: EdgeInsets = EdgeInsets {
        top: 0.0,
        left: 0.0,
        bottom: 0.0,
        right: 0.0,
    };

    pub fn new(top: f32, left: f32, bottom: f32, right: f32) -> Self {
        Self {
            top,
            left,
            bottom,
            right,
        }
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// Clamp every inset into `[0, 1]`.
    pub fn clamped(&self) -> Self {
        Self {
            top: self.top.clamp(0.0, 1.0),
            left: self.left.clamp(0.0, 1.0),
            bottom: self.bottom.clamp(0.0, 1.0),
            right: self.right.clamp(0.0, 1.0),
        }
    }
}

/// Scale `content` to fit inside `bounds` preserving aspect ratio.
pub fn aspect_fit(content: Size, bounds: Size) -> Size {
    if content.width <= 0.0 || content.height <= 0.0 {
        return bounds;
    }
    let scale = (bounds.width / content.width).min(bounds.height / content.height);
    Size::new(content.width * scale, content.height * scale)
}

/// Normalized content rect for the given crop insets.
///
/// Mirroring flips the rect horizontally by negating its width, which the
/// render surface interprets as a flipped texture lookup.
pub fn content_rect_from_crop_insets(crop: EdgeInsets, mirror: bool) -> Rect {
    let crop = crop.clamped();
    let mut rect = Rect::new(
        crop.left,
        crop.top,
        (1.0 - (crop.left + crop.right)).max(0.0),
        (1.0 - (crop.top + crop.bottom)).max(0.0),
    );
    if mirror {
        rect.width = -rect.width;
        rect.x = 1.0 - rect.x;
    }
    rect
}

/// Circumradius of a regular `sides`-gon (apex up) whose vertical extent
/// equals `height`.
pub fn polygon_radius_for_height(sides: u32, height: f32) -> f32 {
    let extent = polygon_unit_extent(sides).y;
    if extent <= 0.0 {
        return 0.0;
    }
    height / extent
}

/// Bounding size of a regular `sides`-gon (apex up) of the given height.
pub fn polygon_bounding_size(sides: u32, height: f32) -> Size {
    let extent = polygon_unit_extent(sides);
    if extent.y <= 0.0 {
        return Size::ZERO;
    }
    let radius = height / extent.y;
    Size::new(radius * extent.x, height)
}

/// Width/height extent of a unit-circumradius `sides`-gon with its first
/// vertex at the top.
fn polygon_unit_extent(sides: u32) -> Vec2 {
    let sides = sides.max(3);
    let mut min = Vec2::new(f32::MAX, f32::MAX);
    let mut max = Vec2::new(f32::MIN, f32::MIN);
    for k in 0..sides {
        let theta = (k as f32) * std::f32::consts::TAU / (sides as f32);
        let point = Vec2::new(theta.sin(), -theta.cos());
        min = min.min(point);
        max = max.max(point);
    }
    max - min
}
