use crate::config::{DetectionMode, DetectionSettings, EnsembleSettings, SentinelConfig};
use crate::detect::backend::{EngineConfig, EngineHandle, InferenceEngine, InferenceError};
use crate::detect::classes::map_class_to_safety_object;
use crate::detect::decode::{decode_output, DecodeThresholds, OutputLayout};
use crate::detect::ensemble;
use crate::detect::nms::suppress;
use crate::detect::result::DetectionResult;
use crate::detect::synthetic::SyntheticDetector;
use crate::frame::{Frame, PreprocessRequest, Preprocessor, ResizeNormalize};
use crate::model::ModelBundle;
use crate::orchestrator::PipelinePhase;

/// How the orchestrator turns an admitted frame into results.
///
/// Two implementations: [`ModelDetector`] drives a loaded inference engine,
/// [`SyntheticDetector`] fabricates plausible results when no engine could be
/// brought up.
pub trait DetectionStrategy: Send {
    fn name(&self) -> &'static str;

    /// Results are fabricated rather than inferred.
    fn is_synthetic(&self) -> bool {
        false
    }

    /// Detect safety objects in one frame. `tag` makes result ids unique
    /// per frame. `on_phase` is told when a model pass starts inference and
    /// when it moves on to decoding.
    fn detect_with(
        &mut self,
        frame: &Frame,
        mode: DetectionMode,
        tag: &str,
        on_phase: &dyn Fn(PipelinePhase),
    ) -> Result<Vec<DetectionResult>, InferenceError>;

    fn detect(
        &mut self,
        frame: &Frame,
        mode: DetectionMode,
        tag: &str,
    ) -> Result<Vec<DetectionResult>, InferenceError> {
        self.detect_with(frame, mode, tag, &|_| {})
    }
}

/// Model-backed strategy: preprocess, infer, decode, suppress, map, and
/// optionally merge auxiliary scales.
pub struct ModelDetector {
    engine: Box<dyn InferenceEngine>,
    handle: EngineHandle,
    labels: Vec<String>,
    layout: OutputLayout,
    input_size: u32,
    preprocessor: Box<dyn Preprocessor>,
    detection: DetectionSettings,
    ensemble: EnsembleSettings,
    unmapped: u64,
}

impl ModelDetector {
    /// Load the bundle's model into `engine`.
    pub fn load(
        mut engine: Box<dyn InferenceEngine>,
        bundle: &ModelBundle,
        engine_config: &EngineConfig,
        detection: DetectionSettings,
        ensemble: EnsembleSettings,
    ) -> Result<Self, InferenceError> {
        let handle = engine.load(&bundle.artifact, engine_config)?;
        let layout = bundle.artifact.output_layout();
        log::info!(
            "model loaded on {} engine: sha256={} input={} slots={} classes={} labels={}",
            engine.name(),
            bundle.artifact.fingerprint(),
            bundle.artifact.input_size(),
            layout.max_detections,
            layout.num_classes,
            bundle.labels.len()
        );
        Ok(Self {
            engine,
            handle,
            labels: bundle.labels.clone(),
            layout,
            input_size: bundle.artifact.input_size(),
            preprocessor: Box::new(ResizeNormalize::default()),
            detection,
            ensemble,
            unmapped: 0,
        })
    }

    pub fn with_preprocessor(mut self, preprocessor: Box<dyn Preprocessor>) -> Self {
        self.preprocessor = preprocessor;
        self
    }

    /// Candidates that survived suppression but had no safety-object mapping.
    pub fn unmapped(&self) -> u64 {
        self.unmapped
    }

    fn run_pass(
        &mut self,
        frame: &Frame,
        request: PreprocessRequest,
        decode: DecodeThresholds,
        nms_iou: f32,
        tag: &str,
        on_phase: &dyn Fn(PipelinePhase),
    ) -> Result<Vec<DetectionResult>, InferenceError> {
        on_phase(PipelinePhase::Inferring);
        let input = self.preprocessor.prepare(frame, request)?;
        let output = self.engine.run(self.handle, &input)?;
        on_phase(PipelinePhase::PostProcessing);
        let candidates = decode_output(&output.data, self.layout, decode);
        let kept = suppress(&candidates, nms_iou);

        let mut results = Vec::with_capacity(kept.len());
        for (index, raw) in kept.iter().enumerate() {
            match map_class_to_safety_object(raw.class_id, &self.labels) {
                Some(class) => results.push(DetectionResult::new(
                    format!("det_{}_{}", tag, index),
                    class.display_name(),
                    raw.confidence,
                    raw.center_box().to_bounding_box(),
                )),
                None => {
                    self.unmapped += 1;
                    log::trace!("class {} has no safety-object mapping", raw.class_id);
                }
            }
        }
        Ok(results)
    }
}

impl DetectionStrategy for ModelDetector {
    fn name(&self) -> &'static str {
        self.engine.name()
    }

    fn detect_with(
        &mut self,
        frame: &Frame,
        mode: DetectionMode,
        tag: &str,
        on_phase: &dyn Fn(PipelinePhase),
    ) -> Result<Vec<DetectionResult>, InferenceError> {
        let thresholds = self.detection.thresholds(mode);
        let decode = DecodeThresholds {
            early_reject: thresholds.early_reject(),
            confidence: thresholds.confidence,
        };
        let base_request = PreprocessRequest {
            input_size: self.input_size,
            resample_size: None,
            enhance: mode.is_enhanced() && self.detection.enhance_preprocessing,
        };
        let base = self.run_pass(frame, base_request, decode, thresholds.nms_iou, tag, on_phase)?;

        let settings = self.ensemble.clone();
        if !(settings.enabled && mode.is_enhanced() && base.len() < settings.trigger_cap) {
            return Ok(base);
        }

        let aux_nms = self.detection.standard.nms_iou;
        let mut pooled = base;
        for scale in settings.scales.iter().copied() {
            let request = PreprocessRequest {
                input_size: self.input_size,
                resample_size: Some(ensemble::scaled_size(self.input_size, scale, &settings)),
                enhance: false,
            };
            let aux_tag = format!("{}_x{}", tag, (scale * 100.0).round() as u32);
            match self.run_pass(frame, request, decode, aux_nms, &aux_tag, on_phase) {
                Ok(mut extra) => {
                    ensemble::damp(&mut extra, settings.damping);
                    pooled.extend(extra);
                }
                Err(err) => {
                    log::warn!("ensemble scale {} dropped: {}", scale, err);
                }
            }
        }
        Ok(ensemble::merge(pooled, &settings, tag))
    }
}

impl Drop for ModelDetector {
    fn drop(&mut self) {
        self.engine.close(self.handle);
    }
}

/// Bring up the model-backed strategy, or fall back to the synthetic one.
///
/// Falls back when no engine or bundle is available, or when the engine
/// refuses to load the model.
pub fn select_strategy(
    engine: Option<Box<dyn InferenceEngine>>,
    bundle: Option<&ModelBundle>,
    config: &SentinelConfig,
) -> Box<dyn DetectionStrategy> {
    let (engine, bundle) = match (engine, bundle) {
        (Some(engine), Some(bundle)) => (engine, bundle),
        (None, _) => {
            log::warn!("no inference engine available, using synthetic detections");
            return Box::new(SyntheticDetector::from_wall_clock());
        }
        (_, None) => {
            log::warn!("no model configured, using synthetic detections");
            return Box::new(SyntheticDetector::from_wall_clock());
        }
    };
    let engine_config = EngineConfig {
        threads: config.engine.threads,
        hardware_acceleration: config.engine.hardware_acceleration,
    };
    match ModelDetector::load(
        engine,
        bundle,
        &engine_config,
        config.detection.clone(),
        config.ensemble.clone(),
    ) {
        Ok(detector) => Box::new(detector),
        Err(err) => {
            log::warn!("model load failed ({}), using synthetic detections", err);
            Box::new(SyntheticDetector::from_wall_clock())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::sync::{Arc, Mutex};

    use crate::detect::backend::{Stage, Tensor};
    use crate::detect::backends::ReplayEngine;
    use crate::detect::classes::SafetyObjectClass;
    use crate::model::ModelArtifact;

    const CLASSES: usize = 80;
    const SLOTS: usize = 4;

    fn bundle() -> ModelBundle {
        ModelBundle {
            artifact: ModelArtifact::new(
                vec![0u8; 16],
                vec![1, 8, 8, 3],
                vec![1, SLOTS, 5 + CLASSES],
            )
            .unwrap(),
            labels: Vec::new(),
        }
    }

    fn output(slots: &[(f32, f32, f32, u32, f32)]) -> Tensor {
        let stride = 5 + CLASSES;
        let mut data = vec![0.0; SLOTS * stride];
        for (i, &(x, y, objectness, class, score)) in slots.iter().enumerate() {
            let row = &mut data[i * stride..(i + 1) * stride];
            row[..5].copy_from_slice(&[x, y, 0.2, 0.2, objectness]);
            row[5 + class as usize] = score;
        }
        Tensor::new(vec![1, SLOTS, stride], data).unwrap()
    }

    fn detector(engine: ReplayEngine) -> ModelDetector {
        ModelDetector::load(
            Box::new(engine),
            &bundle(),
            &EngineConfig::default(),
            DetectionSettings::default(),
            EnsembleSettings::default(),
        )
        .unwrap()
    }

    #[test]
    fn standard_pass_maps_and_names_results() {
        let engine = ReplayEngine::new(vec![output(&[(0.5, 0.5, 0.9, 39, 0.9), (0.2, 0.2, 0.9, 5, 0.9)])]);
        let mut detector = detector(engine);
        let frame = Frame::filled(16, 16, [40, 40, 40]);
        let results = detector.detect(&frame, DetectionMode::Standard, "7").unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "det_7_0");
        assert_eq!(results[0].label, SafetyObjectClass::OxygenTank.display_name());
        assert!((results[0].confidence - 0.81).abs() < 1e-6);
        assert_eq!(detector.unmapped(), 1);
    }

    #[test]
    fn enhanced_mode_merges_auxiliary_scales() {
        let frame_output = output(&[(0.5, 0.5, 0.9, 39, 0.8)]);
        let engine = ReplayEngine::new(vec![frame_output.clone(), frame_output.clone(), frame_output]);
        let mut detector = detector(engine);
        let frame = Frame::filled(16, 16, [40, 40, 40]);
        let results = detector.detect(&frame, DetectionMode::Enhanced, "1").unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].id.starts_with("ensemble_1_"));
        let mean = (0.72 + 0.72 * 0.9 * 2.0) / 3.0;
        assert!((results[0].confidence - mean * 1.1).abs() < 1e-4);
    }

    #[test]
    fn failed_auxiliary_scale_is_dropped() {
        let base = output(&[(0.5, 0.5, 0.9, 39, 0.8)]);
        let mut engine = ReplayEngine::new(vec![base.clone()]);
        engine.push_error(InferenceError::resource_exhausted(Stage::Inference, "scale"));
        engine.push_output(base);
        let mut detector = detector(engine);
        let frame = Frame::filled(16, 16, [40, 40, 40]);
        let results = detector.detect(&frame, DetectionMode::Enhanced, "2").unwrap();
        assert_eq!(results.len(), 1);
        let mean = (0.72 + 0.72 * 0.9) / 2.0;
        assert!((results[0].confidence - mean * 1.1).abs() < 1e-4);
    }

    #[test]
    fn base_pass_exhaustion_propagates() {
        let mut engine = ReplayEngine::new(Vec::new());
        engine.push_error(InferenceError::resource_exhausted(Stage::Inference, "base"));
        let mut detector = detector(engine);
        let frame = Frame::filled(16, 16, [40, 40, 40]);
        let err = detector
            .detect(&frame, DetectionMode::Standard, "3")
            .unwrap_err();
        assert!(err.is_resource_exhausted());
    }

    /// Feeds a blank input and remembers what it was asked for.
    struct Recording(Arc<Mutex<Vec<PreprocessRequest>>>);

    impl Preprocessor for Recording {
        fn prepare(&self, _frame: &Frame, request: PreprocessRequest) -> Result<Tensor, InferenceError> {
            self.0.lock().unwrap().push(request);
            let edge = request.input_size as usize;
            Tensor::new(vec![1, edge, edge, 3], vec![0.0; edge * edge * 3])
        }
    }

    #[test]
    fn phases_follow_each_model_pass() {
        let frame_output = output(&[(0.5, 0.5, 0.9, 39, 0.8)]);
        let engine = ReplayEngine::cycling(vec![frame_output]);
        let requests = Arc::new(Mutex::new(Vec::new()));
        let mut detector =
            detector(engine).with_preprocessor(Box::new(Recording(Arc::clone(&requests))));
        let frame = Frame::filled(16, 16, [40, 40, 40]);

        let phases = RefCell::new(Vec::new());
        detector
            .detect_with(&frame, DetectionMode::Standard, "4", &|p| phases.borrow_mut().push(p))
            .unwrap();
        assert_eq!(
            phases.take(),
            vec![PipelinePhase::Inferring, PipelinePhase::PostProcessing]
        );

        detector
            .detect_with(&frame, DetectionMode::Enhanced, "5", &|p| phases.borrow_mut().push(p))
            .unwrap();
        let pass = [PipelinePhase::Inferring, PipelinePhase::PostProcessing];
        assert_eq!(phases.take(), pass.repeat(3));

        let requests = requests.lock().unwrap();
        assert_eq!(requests.len(), 4);
        assert!(requests[..2].iter().all(|r| r.resample_size.is_none()));
        assert!(requests[2..].iter().all(|r| r.resample_size.is_some() && !r.enhance));
    }

    #[test]
    fn selection_falls_back_without_engine() {
        let strategy = select_strategy(None, Some(&bundle()), &SentinelConfig::default());
        assert!(strategy.is_synthetic());

        let mut engine = ReplayEngine::new(Vec::new());
        engine.fail_load("corrupt model");
        let strategy = select_strategy(Some(Box::new(engine)), Some(&bundle()), &SentinelConfig::default());
        assert!(strategy.is_synthetic());

        let engine = ReplayEngine::new(Vec::new());
        let strategy = select_strategy(Some(Box::new(engine)), Some(&bundle()), &SentinelConfig::default());
        assert!(!strategy.is_synthetic());
        assert_eq!(strategy.name(), "replay");
    }
}
