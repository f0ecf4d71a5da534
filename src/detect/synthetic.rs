use std::time::{SystemTime, UNIX_EPOCH};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::config::DetectionMode;
use crate::detect::backend::InferenceError;
use crate::detect::classes::SafetyObjectClass;
use crate::detect::result::DetectionResult;
use crate::detect::strategy::DetectionStrategy;
use crate::frame::Frame;
use crate::geometry::BoundingBox;
use crate::orchestrator::PipelinePhase;

/// Fallback strategy used when no inference engine could be initialized.
///
/// Fabricates a handful of safety-object sightings per frame so downstream
/// consumers stay exercisable. Every result id is prefixed `mock_` and the
/// strategy reports itself as synthetic.
pub struct SyntheticDetector {
    rng: StdRng,
}

impl SyntheticDetector {
    /// Deterministic generator, for tests and replays.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn from_wall_clock() -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        Self::with_seed(seed)
    }
}

impl DetectionStrategy for SyntheticDetector {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn is_synthetic(&self) -> bool {
        true
    }

    fn detect_with(
        &mut self,
        _frame: &Frame,
        mode: DetectionMode,
        tag: &str,
        _on_phase: &dyn Fn(PipelinePhase),
    ) -> Result<Vec<DetectionResult>, InferenceError> {
        let (count, base) = match mode {
            DetectionMode::Enhanced => (self.rng.gen_range(2..6), 0.75),
            DetectionMode::Standard => (self.rng.gen_range(1..4), 0.65),
        };
        let mut classes = SafetyObjectClass::ALL;
        classes.shuffle(&mut self.rng);

        let results = (0..count)
            .map(|index| {
                let class = classes[index % classes.len()];
                let confidence = base + self.rng.gen::<f32>() * 0.2;
                let left = self.rng.gen::<f32>() * 0.6;
                let top = self.rng.gen::<f32>() * 0.6;
                let width = 0.15 + self.rng.gen::<f32>() * 0.15;
                let height = 0.15 + self.rng.gen::<f32>() * 0.15;
                DetectionResult::new(
                    format!("mock_det_{}_{}", tag, index),
                    class.display_name(),
                    confidence,
                    BoundingBox::new(left, top, left + width, top + height),
                )
            })
            .collect();
        Ok(results)
    }
}
