//! Raw output decoding.
//!
//! The model emits `N` slots of `5 + C` floats:
//! `[x, y, w, h, objectness, class_score_0 .. class_score_{C-1}]`.

use crate::detect::result::RawDetection;

/// Shape of the model's flat output tensor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OutputLayout {
    /// Maximum detections per inference (`N`).
    pub max_detections: usize,
    /// Trainable classes (`C`).
    pub num_classes: usize,
}

impl OutputLayout {
    pub fn new(max_detections: usize, num_classes: usize) -> Self {
        Self {
            max_detections,
            num_classes,
        }
    }

    pub fn stride(&self) -> usize {
        5 + self.num_classes
    }

    /// Expected number of floats, `None` on overflow.
    pub fn expected_len(&self) -> Option<usize> {
        self.max_detections.checked_mul(self.stride())
    }
}

/// Thresholds applied while decoding.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DecodeThresholds {
    /// Slots whose objectness is below this are dropped before the class scan.
    pub early_reject: f32,
    /// Minimum `objectness * best class score` to keep a candidate.
    pub confidence: f32,
}

/// Decode a flat output buffer into candidates, preserving slot order.
///
/// A zero-slot layout or a buffer whose length does not match the layout
/// yields an empty list.
pub fn decode_output(
    output: &[f32],
    layout: OutputLayout,
    thresholds: DecodeThresholds,
) -> Vec<RawDetection> {
    let Some(expected) = layout.expected_len() else {
        return Vec::new();
    };
    if layout.max_detections == 0 || output.len() != expected {
        if output.len() != expected {
            log::debug!(
                "output length {} does not match layout {}x{}",
                output.len(),
                layout.max_detections,
                layout.stride()
            );
        }
        return Vec::new();
    }

    let mut detections = Vec::new();
    for slot in output.chunks_exact(layout.stride()) {
        let objectness = slot[4];
        if !(objectness >= thresholds.early_reject) {
            continue;
        }

        let Some((class_id, best_score)) = best_class(&slot[5..]) else {
            continue;
        };

        let confidence = objectness * best_score;
        if confidence >= thresholds.confidence {
            detections.push(RawDetection {
                x: slot[0],
                y: slot[1],
                w: slot[2],
                h: slot[3],
                confidence,
                class_id,
            });
        }
    }
    detections
}

/// Highest-scoring class; ties keep the lowest index.
fn best_class(scores: &[f32]) -> Option<(u32, f32)> {
    let mut best: Option<(u32, f32)> = None;
    for (idx, &score) in scores.iter().enumerate() {
        if score.is_nan() {
            continue;
        }
        match best {
            Some((_, current)) if score <= current => {}
            _ => best = Some((idx as u32, score)),
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    const LAYOUT: OutputLayout = OutputLayout {
        max_detections: 3,
        num_classes: 4,
    };
    const THRESHOLDS: DecodeThresholds = DecodeThresholds {
        early_reject: 0.5,
        confidence: 0.5,
    };

    fn slot(geom: [f32; 4], objectness: f32, scores: [f32; 4]) -> Vec<f32> {
        let mut v = geom.to_vec();
        v.push(objectness);
        v.extend_from_slice(&scores);
        v
    }

    fn buffer(slots: &[Vec<f32>]) -> Vec<f32> {
        slots.iter().flatten().copied().collect()
    }

    #[test]
    fn keeps_confident_slots_in_slot_order() {
        let out = buffer(&[
            slot([0.2, 0.2, 0.1, 0.1], 0.9, [0.1, 0.8, 0.0, 0.0]),
            slot([0.5, 0.5, 0.1, 0.1], 0.1, [1.0, 1.0, 1.0, 1.0]),
            slot([0.7, 0.7, 0.1, 0.1], 1.0, [0.0, 0.0, 0.0, 0.95]),
        ]);
        let dets = decode_output(&out, LAYOUT, THRESHOLDS);
        assert_eq!(dets.len(), 2);
        assert_eq!(dets[0].class_id, 1);
        assert!((dets[0].confidence - 0.72).abs() < 1e-6);
        assert_eq!(dets[1].class_id, 3);
        assert!((dets[1].confidence - 0.95).abs() < 1e-6);
    }

    #[test]
    fn low_objectness_is_rejected_regardless_of_class_scores() {
        let out = buffer(&[
            slot([0.5, 0.5, 0.2, 0.2], 0.49, [1.0, 1.0, 1.0, 1.0]),
            slot([0.5, 0.5, 0.2, 0.2], 0.0, [1.0, 0.0, 0.0, 0.0]),
            slot([0.5, 0.5, 0.2, 0.2], -1.0, [1.0, 0.0, 0.0, 0.0]),
        ]);
        assert!(decode_output(&out, LAYOUT, THRESHOLDS).is_empty());
    }

    #[test]
    fn final_confidence_is_product_and_meets_threshold() {
        let out = buffer(&[
            slot([0.5, 0.5, 0.2, 0.2], 0.8, [0.6, 0.0, 0.0, 0.0]),
            slot([0.5, 0.5, 0.2, 0.2], 0.9, [0.0, 0.7, 0.0, 0.0]),
            slot([0.5, 0.5, 0.2, 0.2], 0.6, [0.0, 0.0, 0.9, 0.0]),
        ]);
        let dets = decode_output(&out, LAYOUT, THRESHOLDS);
        // 0.48 is dropped, 0.63 and 0.54 survive.
        assert_eq!(dets.len(), 2);
        for d in &dets {
            assert!(d.confidence >= THRESHOLDS.confidence);
        }
        assert!((dets[0].confidence - 0.9 * 0.7).abs() < 1e-6);
        assert!((dets[1].confidence - 0.6 * 0.9).abs() < 1e-6);
    }

    #[test]
    fn class_ties_keep_lowest_index() {
        let out = buffer(&[
            slot([0.5, 0.5, 0.2, 0.2], 0.9, [0.2, 0.9, 0.9, 0.9]),
            slot([0.0; 4], 0.0, [0.0; 4]),
            slot([0.0; 4], 0.0, [0.0; 4]),
        ]);
        let dets = decode_output(&out, LAYOUT, THRESHOLDS);
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].class_id, 1);
    }

    #[test]
    fn malformed_or_empty_buffers_decode_to_nothing() {
        assert!(decode_output(&[0.5; 10], LAYOUT, THRESHOLDS).is_empty());
        assert!(decode_output(&[], OutputLayout::new(0, 4), THRESHOLDS).is_empty());
        assert!(decode_output(&[], LAYOUT, THRESHOLDS).is_empty());
    }
}
