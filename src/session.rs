//! Per-session and long-run detection statistics.
//!
//! The aggregator is owned by the orchestrator. Consumers read it through
//! query methods and cloned snapshots; nothing outside mutates it.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::Serialize;

use crate::config::{DetectionMode, SessionSettings};
use crate::detect::classes::{match_label_fuzzy, SafetyObjectClass};
use crate::detect::DetectionResult;

/// Archived sessions sampled for performance metrics.
const METRIC_SESSIONS: usize = 5;
/// Archived detections sampled for performance metrics.
const METRIC_DETECTIONS: usize = 50;
/// Result batches retained for the live session.
const MAX_SESSION_BATCHES: usize = 1_000;

/// Long-run totals for one safety-object class.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct ClassStats {
    pub total_detections: u64,
    pub successful_detections: u64,
    pub cumulative_confidence: f64,
    pub last_seen_ms: u64,
}

impl ClassStats {
    pub fn average_confidence(&self) -> f64 {
        if self.total_detections == 0 {
            0.0
        } else {
            self.cumulative_confidence / self.total_detections as f64
        }
    }
}

/// Statistics for one processed frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct FrameStats {
    pub total_detections: usize,
    pub critical_detected: usize,
    pub critical_missing: usize,
    pub average_confidence: f32,
}

impl FrameStats {
    pub fn from_results(results: &[DetectionResult]) -> Self {
        let critical: BTreeSet<SafetyObjectClass> = results
            .iter()
            .filter_map(|r| resolve(&r.label))
            .filter(|c| c.is_critical())
            .collect();
        let critical_total = SafetyObjectClass::critical().count();
        let average_confidence = if results.is_empty() {
            0.0
        } else {
            results.iter().map(|r| r.confidence).sum::<f32>() / results.len() as f32
        };
        Self {
            total_detections: results.len(),
            critical_detected: critical.len(),
            critical_missing: critical_total.saturating_sub(critical.len()),
            average_confidence,
        }
    }
}

/// A finished session, frozen into history.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SessionRecord {
    pub started_at_ms: u64,
    pub ended_at_ms: u64,
    pub duration_ms: u64,
    pub frames: u64,
    pub detections: Vec<DetectionResult>,
    pub unique_classes: BTreeSet<SafetyObjectClass>,
    pub enhanced: bool,
    pub synthetic: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct PerformanceMetrics {
    pub average_confidence: f32,
    pub critical_detection_rate: f32,
    pub total_detections: usize,
    pub enhanced_mode: bool,
    pub synthetic: bool,
}

/// Point-in-time view of the live session.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SessionStats {
    pub active: bool,
    pub started_at_ms: Option<u64>,
    pub frames: u64,
    pub total_scans: u64,
    pub seen: Vec<SafetyObjectClass>,
    pub missing: Vec<SafetyObjectClass>,
    pub critical_missing: Vec<SafetyObjectClass>,
    pub safety_percentage: u32,
    pub overall_accuracy: f64,
    pub last_frame: FrameStats,
}

struct LiveSession {
    started_at_ms: u64,
    frames: u64,
    batches: VecDeque<Vec<DetectionResult>>,
    mode: DetectionMode,
    synthetic: bool,
}

pub struct SessionAggregator {
    settings: SessionSettings,
    live: Option<LiveSession>,
    seen: BTreeSet<SafetyObjectClass>,
    class_stats: BTreeMap<SafetyObjectClass, ClassStats>,
    history: VecDeque<SessionRecord>,
    total_scans: u64,
    last_frame: FrameStats,
    last_mode: DetectionMode,
    last_synthetic: bool,
}

impl SessionAggregator {
    pub fn new(settings: SessionSettings) -> Self {
        Self {
            settings,
            live: None,
            seen: BTreeSet::new(),
            class_stats: BTreeMap::new(),
            history: VecDeque::new(),
            total_scans: 0,
            last_frame: FrameStats::default(),
            last_mode: DetectionMode::Standard,
            last_synthetic: false,
        }
    }

    /// Begin a session. Clears the seen set only; per-class stats persist.
    pub fn start_session(&mut self, now_ms: u64, mode: DetectionMode, synthetic: bool) {
        self.seen.clear();
        self.last_frame = FrameStats::default();
        self.last_mode = mode;
        self.last_synthetic = synthetic;
        self.live = Some(LiveSession {
            started_at_ms: now_ms,
            frames: 0,
            batches: VecDeque::new(),
            mode,
            synthetic,
        });
    }

    pub fn is_active(&self) -> bool {
        self.live.is_some()
    }

    /// Fold one frame's results into the session and the long-run stats.
    pub fn record(&mut self, results: &[DetectionResult], now_ms: u64) -> FrameStats {
        self.total_scans += 1;
        for result in results {
            let Some(class) = resolve(&result.label) else {
                continue;
            };
            self.seen.insert(class);
            let stats = self.class_stats.entry(class).or_default();
            stats.total_detections += 1;
            stats.cumulative_confidence += result.confidence as f64;
            stats.last_seen_ms = now_ms;
            if result.confidence >= self.settings.success_bar {
                stats.successful_detections += 1;
            }
        }
        if let Some(live) = self.live.as_mut() {
            live.frames += 1;
            if live.batches.len() == MAX_SESSION_BATCHES {
                live.batches.pop_front();
            }
            live.batches.push_back(results.to_vec());
        }
        self.last_frame = FrameStats::from_results(results);
        self.last_frame
    }

    /// Freeze the live session into history, most recent first.
    pub fn end_session(
        &mut self,
        now_ms: u64,
        final_results: Vec<DetectionResult>,
    ) -> Option<SessionRecord> {
        let live = self.live.take()?;
        let record = SessionRecord {
            started_at_ms: live.started_at_ms,
            ended_at_ms: now_ms,
            duration_ms: now_ms.saturating_sub(live.started_at_ms),
            frames: live.frames,
            detections: final_results,
            unique_classes: self.seen.clone(),
            enhanced: live.mode.is_enhanced(),
            synthetic: live.synthetic,
        };
        self.history.push_front(record.clone());
        self.history.truncate(self.settings.history_cap);
        Some(record)
    }

    /// Successful sightings over all sightings, as a percentage.
    pub fn overall_accuracy(&self) -> f64 {
        let (successful, total) = self
            .class_stats
            .values()
            .fold((0u64, 0u64), |(s, t), stats| {
                (s + stats.successful_detections, t + stats.total_detections)
            });
        if total == 0 {
            0.0
        } else {
            successful as f64 / total as f64 * 100.0
        }
    }

    /// Share of required classes seen this session, floored to an integer percent.
    pub fn safety_percentage(&self) -> u32 {
        let required = SafetyObjectClass::ALL.len();
        (self.seen.len() * 100 / required) as u32
    }

    pub fn seen(&self) -> Vec<SafetyObjectClass> {
        self.seen.iter().copied().collect()
    }

    pub fn missing(&self) -> Vec<SafetyObjectClass> {
        SafetyObjectClass::ALL
            .into_iter()
            .filter(|c| !self.seen.contains(c))
            .collect()
    }

    pub fn critical_missing(&self) -> Vec<SafetyObjectClass> {
        self.missing()
            .into_iter()
            .filter(|c| c.is_critical())
            .collect()
    }

    pub fn class_stats(&self, class: SafetyObjectClass) -> Option<ClassStats> {
        self.class_stats.get(&class).copied()
    }

    pub fn last_frame(&self) -> FrameStats {
        self.last_frame
    }

    /// Result batches of the live session, oldest first.
    pub fn session_batches(&self) -> Vec<Vec<DetectionResult>> {
        self.live
            .as_ref()
            .map(|live| live.batches.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn current_stats(&self) -> SessionStats {
        SessionStats {
            active: self.live.is_some(),
            started_at_ms: self.live.as_ref().map(|l| l.started_at_ms),
            frames: self.live.as_ref().map(|l| l.frames).unwrap_or(0),
            total_scans: self.total_scans,
            seen: self.seen(),
            missing: self.missing(),
            critical_missing: self.critical_missing(),
            safety_percentage: self.safety_percentage(),
            overall_accuracy: self.overall_accuracy(),
            last_frame: self.last_frame,
        }
    }

    /// Snapshot of archived sessions, most recent first.
    pub fn history(&self) -> Vec<SessionRecord> {
        self.history.iter().cloned().collect()
    }

    /// Final results of the most recent archived sessions, newest first.
    pub fn recent_detections(&self, max_results: usize) -> Vec<DetectionResult> {
        self.history
            .iter()
            .take((max_results / 10).max(1))
            .flat_map(|record| record.detections.iter().cloned())
            .take(max_results)
            .collect()
    }

    pub fn performance_metrics(&self) -> PerformanceMetrics {
        let recent = self.recent_detections(METRIC_SESSIONS * 10);
        let recent = &recent[..recent.len().min(METRIC_DETECTIONS)];
        let (average_confidence, critical_detection_rate) = if recent.is_empty() {
            (0.0, 0.0)
        } else {
            let n = recent.len() as f32;
            let confidence = recent.iter().map(|r| r.confidence).sum::<f32>() / n;
            let critical = recent
                .iter()
                .filter(|r| resolve(&r.label).is_some_and(|c| c.is_critical()))
                .count();
            (confidence, critical as f32 / n)
        };
        PerformanceMetrics {
            average_confidence,
            critical_detection_rate,
            total_detections: recent.len(),
            enhanced_mode: self.last_mode.is_enhanced(),
            synthetic: self.last_synthetic,
        }
    }

    /// Drop archived history. The live session and class stats are kept.
    pub fn reclaim(&mut self) -> usize {
        let dropped = self.history.len();
        self.history.clear();
        self.history.shrink_to_fit();
        dropped
    }

    /// Forget archived sessions and long-run class stats. The live session,
    /// if any, is untouched.
    pub fn clear_history(&mut self) {
        self.history.clear();
        self.class_stats.clear();
        self.total_scans = 0;
    }
}

fn resolve(label: &str) -> Option<SafetyObjectClass> {
    SafetyObjectClass::from_label(label).or_else(|| match_label_fuzzy(label))
}
