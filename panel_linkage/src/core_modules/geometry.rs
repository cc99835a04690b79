// THEORY:
// The `geometry` module is the leaf of the linkage engine. It knows nothing about
// panels, anomalies or frames; it only answers three questions about a pair of
// axis-aligned rectangles in pixel space:
//
// 1.  **Overlap** (`iou`): how much of their combined area is shared. A small
//     epsilon keeps the ratio finite even when both rectangles have zero area.
// 2.  **Center containment** (`center_inside`): whether one rectangle's centroid
//     sits inside the other, bounds inclusive.
// 3.  **Full containment** (`fully_inside`): whether one rectangle lies entirely
//     within the other, bounds inclusive.
//
// All three are pure functions. Higher layers (the tracker and the linker) decide
// which thresholds to apply to them.

use serde::Serialize;

/// Added to the IoU denominator so zero-area pairs never divide by zero.
pub const IOU_EPSILON: f64 = 1e-6;

/// An axis-aligned rectangle in pixel coordinates, `x1 <= x2` and `y1 <= y2`.
/// Zero-area boxes are valid values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BoundingBox {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f64 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f64 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    /// The centroid of the rectangle.
    pub fn center(&self) -> (f64, f64) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    /// Closed-rectangle point test.
    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        self.x1 <= x && x <= self.x2 && self.y1 <= y && y <= self.y2
    }

    /// Returns a copy shifted by `(dx, dy)` pixels.
    pub fn translated(&self, dx: f64, dy: f64) -> Self {
        Self::new(self.x1 + dx, self.y1 + dy, self.x2 + dx, self.y2 + dy)
    }
}

/// Intersection-over-union of two boxes.
///
/// The intersection extent is clamped at zero on each axis, so disjoint boxes
/// contribute no (negative) overlap. The result lies in `[0, 1]` for well-formed
/// boxes; identical boxes land within `IOU_EPSILON / area` of 1.
pub fn iou(a: &BoundingBox, b: &BoundingBox) -> f64 {
    let inter_x1 = a.x1.max(b.x1);
    let inter_y1 = a.y1.max(b.y1);
    let inter_x2 = a.x2.min(b.x2);
    let inter_y2 = a.y2.min(b.y2);

    let intersection = (inter_x2 - inter_x1).max(0.0) * (inter_y2 - inter_y1).max(0.0);
    let union = a.area() + b.area() - intersection;

    intersection / (union + IOU_EPSILON)
}

/// True when the centroid of `inner` lies within the closed rectangle `outer`.
pub fn center_inside(outer: &BoundingBox, inner: &BoundingBox) -> bool {
    let (cx, cy) = inner.center();
    outer.contains_point(cx, cy)
}

/// True when every corner of `small` lies within the closed rectangle `big`.
pub fn fully_inside(small: &BoundingBox, big: &BoundingBox) -> bool {
    small.x1 >= big.x1 && small.y1 >= big.y1 && small.x2 <= big.x2 && small.y2 <= big.y2
}
