//! Frame-admission state machine.
//!
//! `Idle -> Admitting -> Inferring -> PostProcessing -> Idle`. Frames are
//! admitted one at a time; anything arriving while a frame is in flight or
//! before the current interval has elapsed is dropped, not queued.
//!
//! Lock order is admission, then lane, then published state. The phase lock
//! is a leaf. The in-flight flag is cleared only after a frame's results are
//! published, so consumers see batches in admission order and ending a
//! session drains the in-flight frame before the session is frozen. An
//! [`InFlightGuard`] clears it on every exit path, unwinding included.

use std::sync::mpsc::Receiver;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use serde::Serialize;

use crate::alerts::{AlertEvent, AlertLog, AlertMonitor, AlertSink, LogSink};
use crate::clock::{Clock, SystemClock};
use crate::config::{DetectionMode, SentinelConfig};
use crate::detect::classes::SafetyObjectClass;
use crate::detect::{DetectionResult, DetectionStrategy, InferenceError};
use crate::events::{EventBus, FrameReport, PipelineEvent};
use crate::frame::Frame;
use crate::memory::{MemoryProbe, ProcessMemoryProbe};
use crate::scheduler::{AdaptiveScheduler, Rejection};
use crate::session::{PerformanceMetrics, SessionAggregator, SessionRecord, SessionStats};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum PipelinePhase {
    Idle,
    Admitting,
    Inferring,
    PostProcessing,
}

/// What happened to one offered frame.
#[derive(Clone, Debug, PartialEq)]
pub enum FrameOutcome {
    /// Dropped by admission control.
    Rejected(Rejection),
    /// Results published (possibly an empty batch after an inference failure).
    Processed(FrameReport),
    /// Resource exhaustion: frame abandoned, interval backed off.
    Aborted { interval_ms: u64 },
}

impl FrameOutcome {
    pub fn is_processed(&self) -> bool {
        matches!(self, FrameOutcome::Processed(_))
    }
}

struct Admission {
    scheduler: AdaptiveScheduler,
    active: bool,
    requested_mode: DetectionMode,
    mode: DetectionMode,
    sequence: u64,
}

struct Published {
    aggregator: SessionAggregator,
    monitor: AlertMonitor,
    alerts: AlertLog,
    last_results: Vec<DetectionResult>,
}

pub struct Orchestrator {
    config: SentinelConfig,
    synthetic: bool,
    clock: Arc<dyn Clock>,
    memory: Arc<dyn MemoryProbe>,
    sink: Arc<dyn AlertSink>,
    bus: EventBus,
    admission: Mutex<Admission>,
    phase: Mutex<PipelinePhase>,
    idle: Condvar,
    lane: Mutex<Box<dyn DetectionStrategy>>,
    published: Mutex<Published>,
}

impl Orchestrator {
    pub fn new(config: SentinelConfig, strategy: Box<dyn DetectionStrategy>) -> Self {
        let mode = config.mode();
        if strategy.is_synthetic() {
            log::warn!("detection running in synthetic mode; results are not model output");
        }
        Self {
            synthetic: strategy.is_synthetic(),
            clock: Arc::new(SystemClock::new()),
            memory: Arc::new(ProcessMemoryProbe),
            sink: Arc::new(LogSink),
            bus: EventBus::new(),
            admission: Mutex::new(Admission {
                scheduler: AdaptiveScheduler::new(config.scheduler.clone(), mode),
                active: false,
                requested_mode: mode,
                mode,
                sequence: 0,
            }),
            phase: Mutex::new(PipelinePhase::Idle),
            idle: Condvar::new(),
            lane: Mutex::new(strategy),
            published: Mutex::new(Published {
                aggregator: SessionAggregator::new(config.session.clone()),
                monitor: AlertMonitor::new(config.alerts.clone()),
                alerts: AlertLog::new(config.alerts.log_cap(mode)),
                last_results: Vec::new(),
            }),
            config,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_memory_probe(mut self, memory: Arc<dyn MemoryProbe>) -> Self {
        self.memory = memory;
        self
    }

    pub fn with_alert_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn subscribe(&self) -> Receiver<PipelineEvent> {
        self.bus.subscribe()
    }

    /// Results come from the synthetic fallback strategy.
    pub fn is_synthetic(&self) -> bool {
        self.synthetic
    }

    /// Request enhanced mode. Takes effect at the next session start.
    pub fn set_enhanced(&self, enhanced: bool) {
        lock(&self.admission).requested_mode = DetectionMode::from_enhanced(enhanced);
    }

    /// Start a session. Returns false if one is already running.
    pub fn start_session(&self) -> bool {
        let now = self.clock.now_ms();
        let mode = {
            let mut adm = lock(&self.admission);
            if adm.active {
                return false;
            }
            while adm.scheduler.in_flight() {
                adm = self.idle.wait(adm).unwrap_or_else(|p| p.into_inner());
            }
            let mode = adm.requested_mode;
            adm.mode = mode;
            adm.scheduler.reset(mode);
            adm.sequence = 0;
            adm.active = true;
            mode
        };

        let mut state = lock(&self.published);
        state.aggregator.start_session(now, mode, self.synthetic);
        state.monitor.reset();
        state.alerts.set_cap(self.config.alerts.log_cap(mode));
        state.last_results.clear();
        log::info!(
            "detection session started (mode={:?}, synthetic={})",
            mode,
            self.synthetic
        );
        self.raise(&mut state, AlertEvent::session_started(now, mode));
        true
    }

    /// End the running session after the in-flight frame, if any, finishes.
    pub fn end_session(&self) -> Option<SessionRecord> {
        {
            let mut adm = lock(&self.admission);
            if !adm.active {
                return None;
            }
            adm.active = false;
            while adm.scheduler.in_flight() {
                adm = self.idle.wait(adm).unwrap_or_else(|p| p.into_inner());
            }
        }

        let now = self.clock.now_ms();
        let mut state = lock(&self.published);
        let final_results = std::mem::take(&mut state.last_results);
        let detected = final_results.len();
        let record = state.aggregator.end_session(now, final_results);
        log::info!("detection session ended: {} items detected", detected);
        self.raise(&mut state, AlertEvent::session_ended(now, detected));
        record
    }

    /// Offer one frame to the pipeline.
    pub fn process_frame(&self, frame: &Frame) -> FrameOutcome {
        let admitted_at = self.clock.now_ms();
        let (mode, sequence, _in_flight) = {
            let mut adm = lock(&self.admission);
            let owns_phase = !adm.scheduler.in_flight();
            if owns_phase {
                self.set_phase(PipelinePhase::Admitting);
            }
            let active = adm.active;
            let check = frame.check(self.config.detection.max_frame_bytes);
            if let Err(rejection) = adm.scheduler.admission(admitted_at, active, check) {
                adm.scheduler.record_skip();
                if owns_phase {
                    self.set_phase(PipelinePhase::Idle);
                }
                log::trace!("frame rejected: {}", rejection);
                return FrameOutcome::Rejected(rejection);
            }
            adm.scheduler.begin(admitted_at);
            adm.sequence += 1;
            (adm.mode, adm.sequence, InFlightGuard { orchestrator: self })
        };

        let tag = format!("{}_{}", admitted_at, sequence);
        self.set_phase(PipelinePhase::Inferring);
        let outcome = {
            let mut strategy = lock(&self.lane);
            strategy.detect_with(frame, mode, &tag, &|phase| self.set_phase(phase))
        };
        let latency_ms = self.clock.now_ms().saturating_sub(admitted_at);
        log::trace!("frame {} inferred in {} ms", sequence, latency_ms);

        let results = match outcome {
            Ok(results) => results,
            Err(err) if err.is_resource_exhausted() => return self.abort_frame(err),
            Err(err) => {
                log::warn!("inference failed on frame {}: {}", sequence, err);
                Vec::new()
            }
        };

        self.set_phase(PipelinePhase::PostProcessing);
        let interval_ms = {
            let mut adm = lock(&self.admission);
            adm.scheduler.adapt(latency_ms);
            if adm.scheduler.apply_memory_pressure(self.memory.used_bytes()) {
                self.memory.request_reclaim();
            }
            adm.scheduler.current_interval_ms()
        };

        let report = FrameReport {
            sequence,
            results,
            synthetic: self.synthetic,
            latency_ms,
            interval_ms,
        };
        {
            let mut state = lock(&self.published);
            let now = self.clock.now_ms();
            state.aggregator.record(&report.results, now);
            let alerts = state.monitor.observe(&report.results, mode, now);
            state.last_results = report.results.clone();
            self.bus.publish(PipelineEvent::Frame(report.clone()));
            for alert in alerts {
                self.raise(&mut state, alert);
            }
        }

        FrameOutcome::Processed(report)
    }

    fn abort_frame(&self, err: InferenceError) -> FrameOutcome {
        log::error!("frame aborted: {}", err);
        let interval_ms = lock(&self.admission).scheduler.back_off();
        self.memory.request_reclaim();
        {
            let mut state = lock(&self.published);
            let dropped = state.aggregator.reclaim();
            if dropped > 0 {
                log::info!("reclaimed {} archived sessions", dropped);
            }
            let now = self.clock.now_ms();
            self.raise(&mut state, AlertEvent::memory_warning(now));
        }
        FrameOutcome::Aborted { interval_ms }
    }

    fn release(&self) {
        let mut adm = lock(&self.admission);
        adm.scheduler.release();
        self.set_phase(PipelinePhase::Idle);
        self.idle.notify_all();
    }

    fn set_phase(&self, phase: PipelinePhase) {
        *lock(&self.phase) = phase;
    }

    fn raise(&self, state: &mut Published, alert: AlertEvent) {
        state.alerts.push(alert.clone());
        self.sink.deliver(&alert);
        self.bus.publish(PipelineEvent::Alert(alert));
    }

    pub fn phase(&self) -> PipelinePhase {
        *lock(&self.phase)
    }

    pub fn is_active(&self) -> bool {
        lock(&self.admission).active
    }

    pub fn mode(&self) -> DetectionMode {
        lock(&self.admission).mode
    }

    pub fn current_interval_ms(&self) -> u64 {
        lock(&self.admission).scheduler.current_interval_ms()
    }

    /// Frames dropped by admission since the session started.
    pub fn skipped_frames(&self) -> u64 {
        lock(&self.admission).scheduler.total_skips()
    }

    pub fn consecutive_skips(&self) -> u64 {
        lock(&self.admission).scheduler.consecutive_skips()
    }

    pub fn current_stats(&self) -> SessionStats {
        lock(&self.published).aggregator.current_stats()
    }

    pub fn missing_critical_items(&self) -> Vec<SafetyObjectClass> {
        lock(&self.published).aggregator.critical_missing()
    }

    pub fn safety_percentage(&self) -> u32 {
        lock(&self.published).aggregator.safety_percentage()
    }

    pub fn overall_accuracy(&self) -> f64 {
        lock(&self.published).aggregator.overall_accuracy()
    }

    pub fn performance_metrics(&self) -> PerformanceMetrics {
        lock(&self.published).aggregator.performance_metrics()
    }

    pub fn history(&self) -> Vec<SessionRecord> {
        lock(&self.published).aggregator.history()
    }

    pub fn last_results(&self) -> Vec<DetectionResult> {
        lock(&self.published).last_results.clone()
    }

    pub fn alerts(&self) -> Vec<AlertEvent> {
        lock(&self.published).alerts.snapshot()
    }

    /// Drop archived sessions, long-run class stats and the alert log. A
    /// running session keeps going.
    pub fn clear_history(&self) {
        let mut state = lock(&self.published);
        state.aggregator.clear_history();
        state.alerts.clear();
        log::info!("detection history cleared");
    }
}

/// Clears the in-flight flag when an admitted frame is done, however it ends.
struct InFlightGuard<'a> {
    orchestrator: &'a Orchestrator,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.orchestrator.release();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
