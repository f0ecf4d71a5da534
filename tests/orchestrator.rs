use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use safety_sentinel::alerts::MEMORY_WARNING;
use safety_sentinel::detect::{InferenceError, Stage};
use safety_sentinel::{
    select_strategy, AlertSeverity, BoundingBox, DetectionMode, DetectionResult,
    DetectionStrategy, FixedMemoryProbe, Frame, FrameOutcome, ManualClock, ModelArtifact,
    ModelBundle, Orchestrator, PipelineEvent, PipelinePhase, Rejection, ReplayEngine, SafetyObjectClass,
    SentinelConfig, Tensor,
};

/// Returns fixed results and charges simulated latency to the clock.
struct Scripted {
    clock: ManualClock,
    latency_ms: u64,
    results: Vec<DetectionResult>,
    entered: Option<Sender<()>>,
    hold: Duration,
}

impl Scripted {
    fn new(clock: &ManualClock, results: Vec<DetectionResult>) -> Self {
        Self {
            clock: clock.clone(),
            latency_ms: 0,
            results,
            entered: None,
            hold: Duration::ZERO,
        }
    }

    fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }
}

impl DetectionStrategy for Scripted {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn detect_with(
        &mut self,
        _frame: &Frame,
        _mode: DetectionMode,
        tag: &str,
        _on_phase: &dyn Fn(PipelinePhase),
    ) -> Result<Vec<DetectionResult>, InferenceError> {
        if let Some(entered) = &self.entered {
            let _ = entered.send(());
        }
        if !self.hold.is_zero() {
            thread::sleep(self.hold);
        }
        self.clock.advance(self.latency_ms);
        Ok(self
            .results
            .iter()
            .enumerate()
            .map(|(i, r)| DetectionResult {
                id: format!("det_{}_{}", tag, i),
                ..r.clone()
            })
            .collect())
    }
}

/// Panics on its first frame, then reports a fire alarm.
struct PanicsOnce {
    panicked: bool,
}

impl DetectionStrategy for PanicsOnce {
    fn name(&self) -> &'static str {
        "panics-once"
    }

    fn detect_with(
        &mut self,
        _frame: &Frame,
        _mode: DetectionMode,
        _tag: &str,
        _on_phase: &dyn Fn(PipelinePhase),
    ) -> Result<Vec<DetectionResult>, InferenceError> {
        if !self.panicked {
            self.panicked = true;
            panic!("detector crashed");
        }
        Ok(vec![sighting(SafetyObjectClass::FireAlarm, 0.9)])
    }
}

fn sighting(class: SafetyObjectClass, confidence: f32) -> DetectionResult {
    DetectionResult::new(
        "det",
        class.display_name(),
        confidence,
        BoundingBox::new(0.1, 0.1, 0.3, 0.3),
    )
}

fn frame() -> Frame {
    Frame::filled(16, 16, [70, 80, 90])
}

fn orchestrator(
    clock: &ManualClock,
    memory: &FixedMemoryProbe,
    strategy: Box<dyn DetectionStrategy>,
) -> Orchestrator {
    Orchestrator::new(SentinelConfig::default(), strategy)
        .with_clock(Arc::new(clock.clone()))
        .with_memory_probe(Arc::new(memory.clone()))
}

fn replay_bundle() -> ModelBundle {
    ModelBundle {
        artifact: ModelArtifact::new(b"replay".to_vec(), vec![1, 8, 8, 3], vec![1, 2, 85])
            .expect("artifact"),
        labels: Vec::new(),
    }
}

fn replay_output() -> Tensor {
    let mut data = vec![0.0; 2 * 85];
    data[..5].copy_from_slice(&[0.5, 0.5, 0.2, 0.2, 0.9]);
    data[5 + 39] = 0.9;
    Tensor::new(vec![1, 2, 85], data).expect("tensor")
}

#[test]
fn frame_inside_interval_is_dropped() {
    let clock = ManualClock::new(10_000);
    let orch = orchestrator(
        &clock,
        &FixedMemoryProbe::new(0),
        Box::new(Scripted::new(&clock, vec![])),
    );
    orch.start_session();

    assert!(orch.process_frame(&frame()).is_processed());
    clock.advance(100);
    let second = orch.process_frame(&frame());
    let FrameOutcome::Rejected(Rejection::TooSoon { remaining_ms }) = second else {
        panic!("expected a too-soon rejection, got {:?}", second);
    };
    // zero latency decayed the interval to 450 ms
    assert_eq!(remaining_ms, 350);
    assert_eq!(orch.skipped_frames(), 1);
    assert_eq!(orch.consecutive_skips(), 1);

    clock.advance(remaining_ms);
    assert!(orch.process_frame(&frame()).is_processed());
    assert_eq!(orch.consecutive_skips(), 0);
    assert_eq!(orch.current_stats().frames, 2);
}

#[test]
fn slow_frames_grow_interval_to_ceiling() {
    let clock = ManualClock::new(0);
    let strategy = Scripted::new(&clock, vec![]).with_latency(300);
    let orch = orchestrator(&clock, &FixedMemoryProbe::new(0), Box::new(strategy));
    orch.start_session();

    let mut intervals = Vec::new();
    for _ in 0..20 {
        let FrameOutcome::Processed(report) = orch.process_frame(&frame()) else {
            panic!("frame should be admitted");
        };
        assert_eq!(report.latency_ms, 300);
        intervals.push(report.interval_ms);
        clock.advance(report.interval_ms);
    }
    assert_eq!(intervals[0], 600);
    assert!(intervals.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(*intervals.last().unwrap(), 5_000);
}

#[test]
fn exhaustion_aborts_frame_and_backs_off() {
    let clock = ManualClock::new(0);
    let memory = FixedMemoryProbe::new(0);
    let mut engine = ReplayEngine::new(vec![replay_output()]);
    engine.push_error(InferenceError::resource_exhausted(
        Stage::Inference,
        "tensor arena",
    ));
    engine.push_output(replay_output());
    let strategy = select_strategy(
        Some(Box::new(engine)),
        Some(&replay_bundle()),
        &SentinelConfig::default(),
    );
    let orch = orchestrator(&clock, &memory, strategy);
    assert!(!orch.is_synthetic());

    // archive one session so there is history to reclaim
    orch.start_session();
    assert!(orch.process_frame(&frame()).is_processed());
    clock.advance(1_000);
    orch.end_session();
    assert_eq!(orch.history().len(), 1);

    orch.start_session();
    let outcome = orch.process_frame(&frame());
    assert_eq!(outcome, FrameOutcome::Aborted { interval_ms: 1_000 });
    assert_eq!(memory.reclaim_requests(), 1);
    assert!(orch.history().is_empty());
    let alerts = orch.alerts();
    assert_eq!(alerts[0].message, MEMORY_WARNING);
    assert_eq!(alerts[0].severity, AlertSeverity::Low);

    clock.advance(999);
    assert!(matches!(
        orch.process_frame(&frame()),
        FrameOutcome::Rejected(Rejection::TooSoon { remaining_ms: 1 })
    ));
    clock.advance(1);
    let FrameOutcome::Processed(report) = orch.process_frame(&frame()) else {
        panic!("frame after back-off should be processed");
    };
    assert_eq!(report.results.len(), 1);
    assert_eq!(report.results[0].label, "Oxygen Tank");
}

#[test]
fn inference_failure_publishes_empty_batch() {
    let clock = ManualClock::new(0);
    let mut engine = ReplayEngine::new(Vec::new());
    engine.push_error(InferenceError::Failed("delegate crashed".into()));
    let strategy = select_strategy(
        Some(Box::new(engine)),
        Some(&replay_bundle()),
        &SentinelConfig::default(),
    );
    let orch = orchestrator(&clock, &FixedMemoryProbe::new(0), strategy);
    let events = orch.subscribe();
    orch.start_session();

    let FrameOutcome::Processed(report) = orch.process_frame(&frame()) else {
        panic!("failure should still publish a batch");
    };
    assert!(report.results.is_empty());
    assert_eq!(orch.current_stats().frames, 1);
    assert!(events
        .try_iter()
        .any(|e| matches!(e, PipelineEvent::Frame(r) if r.results.is_empty())));
}

#[test]
fn missing_engine_falls_back_to_synthetic() {
    let clock = ManualClock::new(0);
    let strategy = select_strategy(None, None, &SentinelConfig::default());
    let orch = orchestrator(&clock, &FixedMemoryProbe::new(0), strategy);
    assert!(orch.is_synthetic());
    orch.start_session();
    let FrameOutcome::Processed(report) = orch.process_frame(&frame()) else {
        panic!("synthetic frame should be processed");
    };
    assert!(report.synthetic);
    assert!(!report.results.is_empty());
    assert!(report.results.iter().all(|r| r.id.starts_with("mock_det_")));
    let record = orch.end_session().expect("record");
    assert!(record.synthetic);
}

#[test]
fn five_of_seven_classes_scores_71_percent() {
    let clock = ManualClock::new(0);
    let results = vec![
        sighting(SafetyObjectClass::OxygenTank, 0.9),
        sighting(SafetyObjectClass::FireExtinguisher, 0.8),
        sighting(SafetyObjectClass::FirstAidKit, 0.6),
        sighting(SafetyObjectClass::EmergencyLight, 0.75),
        sighting(SafetyObjectClass::SafetyHelmet, 0.95),
    ];
    let orch = orchestrator(
        &clock,
        &FixedMemoryProbe::new(0),
        Box::new(Scripted::new(&clock, results)),
    );
    orch.start_session();
    assert!(orch.process_frame(&frame()).is_processed());

    assert_eq!(orch.safety_percentage(), 71);
    assert_eq!(
        orch.missing_critical_items(),
        vec![SafetyObjectClass::FireAlarm]
    );
    assert!((orch.overall_accuracy() - 80.0).abs() < 1e-9);

    let record = orch.end_session().expect("record");
    assert_eq!(record.detections.len(), 5);
    assert_eq!(record.unique_classes.len(), 5);
    let metrics = orch.performance_metrics();
    assert_eq!(metrics.total_detections, 5);
    assert!((metrics.critical_detection_rate - 0.4).abs() < 1e-6);
}

#[test]
fn absent_critical_objects_raise_alert_after_streak() {
    let clock = ManualClock::new(0);
    let orch = orchestrator(
        &clock,
        &FixedMemoryProbe::new(0),
        Box::new(Scripted::new(
            &clock,
            vec![sighting(SafetyObjectClass::OxygenTank, 0.9)],
        )),
    );
    orch.start_session();
    for _ in 0..5 {
        assert!(orch.process_frame(&frame()).is_processed());
        clock.advance(orch.current_interval_ms());
    }
    let messages: Vec<_> = orch.alerts().into_iter().map(|a| a.message).collect();
    assert!(messages.contains(&"Fire Extinguisher not detected!".to_string()));
    assert!(messages.contains(&"Fire Alarm not detected!".to_string()));
    assert!(!messages.contains(&"Oxygen Tank not detected!".to_string()));
}

#[test]
fn ending_session_drains_in_flight_frame() {
    let clock = ManualClock::new(0);
    let (tx, rx) = mpsc::channel();
    let mut strategy = Scripted::new(&clock, vec![sighting(SafetyObjectClass::FireAlarm, 0.9)]);
    strategy.entered = Some(tx);
    strategy.hold = Duration::from_millis(50);
    let orch = Arc::new(orchestrator(
        &clock,
        &FixedMemoryProbe::new(0),
        Box::new(strategy),
    ));
    orch.start_session();

    let worker = {
        let orch = Arc::clone(&orch);
        thread::spawn(move || orch.process_frame(&frame()))
    };
    rx.recv().expect("detect entered");
    assert_eq!(orch.phase(), PipelinePhase::Inferring);
    assert_eq!(
        orch.process_frame(&frame()),
        FrameOutcome::Rejected(Rejection::InFlight)
    );
    // a shed frame leaves the in-flight frame's phase alone
    assert_eq!(orch.phase(), PipelinePhase::Inferring);

    let record = orch.end_session().expect("record");
    assert_eq!(record.frames, 1);
    assert_eq!(record.detections.len(), 1);
    assert!(worker.join().expect("worker").is_processed());
    assert_eq!(orch.phase(), PipelinePhase::Idle);
    assert_eq!(
        orch.process_frame(&frame()),
        FrameOutcome::Rejected(Rejection::SessionInactive)
    );
}

#[test]
fn panicking_strategy_releases_the_lane() {
    let clock = ManualClock::new(0);
    let orch = orchestrator(
        &clock,
        &FixedMemoryProbe::new(0),
        Box::new(PanicsOnce { panicked: false }),
    );
    orch.start_session();

    let crashed = panic::catch_unwind(AssertUnwindSafe(|| orch.process_frame(&frame())));
    assert!(crashed.is_err());
    assert_eq!(orch.phase(), PipelinePhase::Idle);

    clock.advance(10_000);
    let FrameOutcome::Processed(report) = orch.process_frame(&frame()) else {
        panic!("lane should be free after the crash");
    };
    assert_eq!(report.results.len(), 1);

    let record = orch.end_session().expect("record");
    assert_eq!(record.frames, 1);
    assert!(!orch.is_active());
}
