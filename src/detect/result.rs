use serde::{Deserialize, Serialize};

use crate::geometry::{BoundingBox, CenterBox};

/// Decoded candidate before suppression and class mapping.
///
/// Geometry is center-form and normalized to the model input.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RawDetection {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
    /// `objectness * best class score`.
    pub confidence: f32,
    pub class_id: u32,
}

impl RawDetection {
    pub fn center_box(&self) -> CenterBox {
        CenterBox::new(self.x, self.y, self.w, self.h)
    }
}

/// A labeled, confidence-scored box emitted for one processed frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub id: String,
    pub label: String,
    pub confidence: f32,
    pub bounding_box: BoundingBox,
}

impl DetectionResult {
    /// Build a result; confidence is clamped to `[0, 1]` and the box to the unit square.
    pub fn new(
        id: impl Into<String>,
        label: impl Into<String>,
        confidence: f32,
        bounding_box: BoundingBox,
    ) -> Self {
        let confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };
        Self {
            id: id.into(),
            label: label.into(),
            confidence,
            bounding_box: BoundingBox::new(
                bounding_box.left,
                bounding_box.top,
                bounding_box.right,
                bounding_box.bottom,
            ),
        }
    }
}
