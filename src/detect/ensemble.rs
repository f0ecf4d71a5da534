//! Multi-scale ensemble merging.
//!
//! Auxiliary-scale results are damped, pooled with the base-scale results,
//! grouped by `(label, bucketed top-left corner)`, and each multi-member
//! group collapses into one result with the boosted mean confidence and the
//! mean box.

use std::collections::HashMap;

use crate::config::EnsembleSettings;
use crate::detect::nms::by_confidence_desc;
use crate::detect::result::DetectionResult;
use crate::geometry::BoundingBox;

/// Square edge for an auxiliary pass: `input_size * scale`, clamped.
pub fn scaled_size(input_size: u32, scale: f32, settings: &EnsembleSettings) -> u32 {
    let raw = (input_size as f32 * scale).round();
    let raw = if raw.is_finite() && raw > 0.0 {
        raw as u32
    } else {
        settings.min_scaled_size
    };
    raw.clamp(settings.min_scaled_size, settings.max_scaled_size)
}

/// Attenuate auxiliary-scale confidences.
pub fn damp(results: &mut [DetectionResult], factor: f32) {
    for result in results.iter_mut() {
        result.confidence = (result.confidence * factor).clamp(0.0, 1.0);
    }
}

/// Merge near-duplicates across scales.
///
/// Singleton groups pass through unchanged. Output is sorted by confidence
/// (descending, stable) and truncated to `settings.max_results`. Merged
/// results are named `ensemble_{tag}_{n}`.
pub fn merge(
    detections: Vec<DetectionResult>,
    settings: &EnsembleSettings,
    tag: &str,
) -> Vec<DetectionResult> {
    let mut order: Vec<(String, i64, i64)> = Vec::new();
    let mut groups: HashMap<(String, i64, i64), Vec<DetectionResult>> = HashMap::new();

    for detection in detections {
        let key = group_key(&detection, settings.bucket);
        groups
            .entry(key.clone())
            .or_insert_with(|| {
                order.push(key);
                Vec::new()
            })
            .push(detection);
    }

    let mut merged: Vec<DetectionResult> = Vec::with_capacity(order.len());
    for (n, key) in order.into_iter().enumerate() {
        let Some(mut group) = groups.remove(&key) else {
            continue;
        };
        if group.len() == 1 {
            merged.extend(group.pop());
            continue;
        }
        merged.push(merge_group(&group, settings.boost, format!("ensemble_{}_{}", tag, n)));
    }

    merged.sort_by(|a, b| by_confidence_desc(a.confidence, b.confidence));
    merged.truncate(settings.max_results);
    merged
}

fn group_key(detection: &DetectionResult, bucket: f32) -> (String, i64, i64) {
    let cell = |v: f32| (v / bucket).floor() as i64;
    (
        detection.label.clone(),
        cell(detection.bounding_box.left),
        cell(detection.bounding_box.top),
    )
}

fn merge_group(group: &[DetectionResult], boost: f32, id: String) -> DetectionResult {
    let mean_confidence =
        group.iter().map(|d| d.confidence as f64).sum::<f64>() / group.len() as f64;
    let bounding_box =
        BoundingBox::mean(group.iter().map(|d| &d.bounding_box)).unwrap_or_default();
    DetectionResult::new(
        id,
        group[0].label.clone(),
        ((mean_confidence as f32) * boost).min(1.0),
        bounding_box,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(id: &str, label: &str, confidence: f32, left: f32, top: f32) -> DetectionResult {
        DetectionResult::new(
            id,
            label,
            confidence,
            BoundingBox::new(left, top, left + 0.2, top + 0.2),
        )
    }

    #[test]
    fn singleton_group_is_unchanged() {
        let only = result("det_1", "Oxygen Tank", 0.66, 0.42, 0.13);
        let merged = merge(vec![only.clone()], &EnsembleSettings::default(), "t");
        assert_eq!(merged, vec![only]);
    }

    #[test]
    fn pair_merges_to_boosted_mean() {
        let a = result("a", "Fire Alarm", 0.6, 0.41, 0.41);
        let b = result("b", "Fire Alarm", 0.8, 0.45, 0.43);
        let merged = merge(vec![a, b], &EnsembleSettings::default(), "t");
        assert_eq!(merged.len(), 1);
        assert!((merged[0].confidence - 0.7 * 1.1).abs() < 1e-5);
        assert!((merged[0].bounding_box.left - 0.43).abs() < 1e-5);
        assert!(merged[0].id.starts_with("ensemble_t_"));
    }

    #[test]
    fn boosted_confidence_is_capped() {
        let a = result("a", "Fire Alarm", 0.95, 0.41, 0.41);
        let b = result("b", "Fire Alarm", 0.99, 0.42, 0.42);
        let merged = merge(vec![a, b], &EnsembleSettings::default(), "t");
        assert_eq!(merged[0].confidence, 1.0);
    }

    #[test]
    fn distinct_labels_and_cells_stay_separate() {
        let merged = merge(
            vec![
                result("a", "Fire Alarm", 0.7, 0.41, 0.41),
                result("b", "Oxygen Tank", 0.9, 0.41, 0.41),
                result("c", "Fire Alarm", 0.8, 0.61, 0.41),
            ],
            &EnsembleSettings::default(),
            "t",
        );
        let ids: Vec<_> = merged.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
    }

    #[test]
    fn truncates_to_max_results() {
        let settings = EnsembleSettings {
            max_results: 2,
            ..EnsembleSettings::default()
        };
        let detections = (0..5)
            .map(|i| result(&format!("d{}", i), "Safety Helmet", 0.5 + i as f32 * 0.1, i as f32 * 0.15, 0.0))
            .collect();
        let merged = merge(detections, &settings, "t");
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].id, "d4");
    }

    #[test]
    fn scaled_size_is_clamped() {
        let settings = EnsembleSettings::default();
        assert_eq!(scaled_size(640, 0.8, &settings), 512);
        assert_eq!(scaled_size(640, 1.2, &settings), 768);
        assert_eq!(scaled_size(640, 0.1, &settings), 320);
        assert_eq!(scaled_size(640, 4.0, &settings), 1024);
    }

    #[test]
    fn damping_scales_confidence() {
        let mut results = vec![result("a", "Fire Alarm", 0.8, 0.0, 0.0)];
        damp(&mut results, 0.9);
        assert!((results[0].confidence - 0.72).abs() < 1e-6);
    }
}
