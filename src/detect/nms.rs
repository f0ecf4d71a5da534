//! Greedy non-maximum suppression.

use std::cmp::Ordering;

use crate::detect::result::RawDetection;
use crate::geometry::intersection_over_union;

/// Suppress overlapping candidates.
///
/// Candidates are ranked by confidence (stable, so equal confidences keep
/// input order). Each kept candidate suppresses every later candidate whose
/// IoU with it exceeds `iou_threshold`. Output is a subset of the input in
/// descending-confidence order.
pub fn suppress(detections: &[RawDetection], iou_threshold: f32) -> Vec<RawDetection> {
    if detections.is_empty() {
        return Vec::new();
    }

    let mut sorted: Vec<RawDetection> = detections.to_vec();
    sorted.sort_by(|a, b| by_confidence_desc(a.confidence, b.confidence));

    let mut kept = Vec::new();
    let mut suppressed = vec![false; sorted.len()];

    for i in 0..sorted.len() {
        if suppressed[i] {
            continue;
        }
        kept.push(sorted[i]);
        let anchor = sorted[i].center_box();

        for j in (i + 1)..sorted.len() {
            if suppressed[j] {
                continue;
            }
            let iou = intersection_over_union(&anchor, &sorted[j].center_box());
            if iou > iou_threshold || is_same_box(&sorted[i], &sorted[j]) {
                suppressed[j] = true;
            }
        }
    }

    kept
}

/// Descending order with NaN ranked last.
pub(crate) fn by_confidence_desc(a: f32, b: f32) -> Ordering {
    match b.partial_cmp(&a) {
        Some(ordering) => ordering,
        None => match (a.is_nan(), b.is_nan()) {
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            _ => Ordering::Equal,
        },
    }
}

// Identical non-degenerate boxes have IoU 1 and are always duplicates,
// even when the threshold is 1.0.
fn is_same_box(a: &RawDetection, b: &RawDetection) -> bool {
    a.w > 0.0 && a.h > 0.0 && a.x == b.x && a.y == b.y && a.w == b.w && a.h == b.h
}
