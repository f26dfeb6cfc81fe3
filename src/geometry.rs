//! Screen-space primitives shared by the motion planner and the localizer.

use serde::{Deserialize, Serialize};

/// An absolute screen pixel coordinate. `(0, 0)` is the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScreenPoint {
    pub x: f64,
    pub y: f64,
}

impl ScreenPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: &ScreenPoint) -> f64 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        (dx * dx + dy * dy).sqrt()
    }

    /// Linear interpolation between two points at parameter `t`.
    pub fn lerp(&self, other: &ScreenPoint, t: f64) -> ScreenPoint {
        ScreenPoint {
            x: (1.0 - t) * self.x + t * other.x,
            y: (1.0 - t) * self.y + t * other.y,
        }
    }
}

/// An axis-aligned rectangle in screen pixels.
///
/// The constructor normalizes the corners so `x2 >= x1` and `y2 >= y1`
/// always hold regardless of the order the caller supplied them in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BoundingBox {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self {
            x1: x1.min(x2),
            y1: y1.min(y2),
            x2: x1.max(x2),
            y2: y1.max(y2),
        }
    }

    pub fn center(&self) -> ScreenPoint {
        ScreenPoint {
            x: (self.x1 + self.x2) / 2.0,
            y: (self.y1 + self.y2) / 2.0,
        }
    }

    pub fn width(&self) -> f64 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f64 {
        self.y2 - self.y1
    }
}

/// The dimensions of the screen the pointer is confined to.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScreenBounds {
    pub width: f64,
    pub height: f64,
}

impl ScreenBounds {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// Clamps a point into the visible screen area.
    pub fn clamp(&self, point: ScreenPoint) -> ScreenPoint {
        ScreenPoint {
            x: point.x.clamp(0.0, (self.width - 1.0).max(0.0)),
            y: point.y.clamp(0.0, (self.height - 1.0).max(0.0)),
        }
    }

    /// A point expressed as fractions of the screen dimensions.
    ///
    /// Used for the reduced-confidence fallback coordinates when
    /// localization fails.
    pub fn point_at(&self, fx: f64, fy: f64) -> ScreenPoint {
        self.clamp(ScreenPoint {
            x: self.width * fx,
            y: self.height * fy,
        })
    }

    pub fn contains(&self, point: ScreenPoint) -> bool {
        point.x >= 0.0 && point.y >= 0.0 && point.x < self.width && point.y < self.height
    }
}
