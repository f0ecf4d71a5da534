//! Axis-aligned box geometry.
//!
//! Model outputs are center-form (`x, y, w, h`, normalized to the model input),
//! while emitted results are corner-form and clamped to the unit square.

use serde::{Deserialize, Serialize};

/// Center-form box: `w, h` spread around `x, y`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CenterBox {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl CenterBox {
    pub fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }

    fn area(&self) -> f32 {
        if self.w <= 0.0 || self.h <= 0.0 {
            return 0.0;
        }
        self.w * self.h
    }

    /// Corner-form box clamped to `[0, 1]` with `left <= right`, `top <= bottom`.
    pub fn to_bounding_box(&self) -> BoundingBox {
        BoundingBox::new(
            self.x - self.w / 2.0,
            self.y - self.h / 2.0,
            self.x + self.w / 2.0,
            self.y + self.h / 2.0,
        )
    }
}

/// Corner-form box in normalized image coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl BoundingBox {
    /// Build a box, clamping each coordinate to `[0, 1]` and restoring order.
    pub fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        let (left, right) = ordered(clamp_unit(left), clamp_unit(right));
        let (top, bottom) = ordered(clamp_unit(top), clamp_unit(bottom));
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }

    /// True when every coordinate is in `[0, 1]` and the corners are ordered.
    pub fn is_normalized(&self) -> bool {
        [self.left, self.top, self.right, self.bottom]
            .iter()
            .all(|v| (0.0..=1.0).contains(v))
            && self.left <= self.right
            && self.top <= self.bottom
    }

    /// Coordinate-wise mean of a set of boxes. `None` for an empty set.
    pub fn mean<'a, I>(boxes: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a BoundingBox>,
    {
        let mut count = 0usize;
        let mut sums = [0f64; 4];
        for b in boxes {
            sums[0] += b.left as f64;
            sums[1] += b.top as f64;
            sums[2] += b.right as f64;
            sums[3] += b.bottom as f64;
            count += 1;
        }
        if count == 0 {
            return None;
        }
        let n = count as f64;
        Some(Self::new(
            (sums[0] / n) as f32,
            (sums[1] / n) as f32,
            (sums[2] / n) as f32,
            (sums[3] / n) as f32,
        ))
    }
}

/// Standard intersection-over-union of two center-form boxes.
///
/// Returns 0 for disjoint boxes and for degenerate (zero-area) unions.
/// Symmetric in its arguments.
pub fn intersection_over_union(a: &CenterBox, b: &CenterBox) -> f32 {
    let x1 = (a.x - a.w / 2.0).max(b.x - b.w / 2.0);
    let y1 = (a.y - a.h / 2.0).max(b.y - b.h / 2.0);
    let x2 = (a.x + a.w / 2.0).min(b.x + b.w / 2.0);
    let y2 = (a.y + a.h / 2.0).min(b.y + b.h / 2.0);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    if intersection <= 0.0 {
        return 0.0;
    }
    let union = a.area() + b.area() - intersection;
    if union <= 0.0 || !union.is_finite() {
        return 0.0;
    }
    (intersection / union).clamp(0.0, 1.0)
}

fn clamp_unit(v: f32) -> f32 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}

fn ordered(a: f32, b: f32) -> (f32, f32) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}
