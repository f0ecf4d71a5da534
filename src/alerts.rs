//! Alert generation and the bounded alert log.
//!
//! Missing-object and low-confidence alerts are debounced with per-class
//! streak counters. Each alert fires once per streak and re-arms when the
//! condition clears.

use std::collections::{BTreeMap, VecDeque};

use serde::Serialize;

use crate::config::{AlertSettings, DetectionMode};
use crate::detect::classes::{match_label_fuzzy, SafetyObjectClass};
use crate::detect::DetectionResult;

pub const MEMORY_WARNING: &str = "Memory warning - detection slowed to preserve stability";

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertSeverity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AlertSeverity::Info => "INFO",
            AlertSeverity::Low => "LOW",
            AlertSeverity::Medium => "MEDIUM",
            AlertSeverity::High => "HIGH",
            AlertSeverity::Critical => "CRITICAL",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AlertEvent {
    pub timestamp_ms: u64,
    pub message: String,
    pub severity: AlertSeverity,
    pub related: Option<SafetyObjectClass>,
}

impl AlertEvent {
    pub fn new(timestamp_ms: u64, message: impl Into<String>, severity: AlertSeverity) -> Self {
        Self {
            timestamp_ms,
            message: message.into(),
            severity,
            related: None,
        }
    }

    pub fn related_to(mut self, class: SafetyObjectClass) -> Self {
        self.related = Some(class);
        self
    }

    pub fn session_started(timestamp_ms: u64, mode: DetectionMode) -> Self {
        let message = if mode.is_enhanced() {
            "Enhanced detection session started"
        } else {
            "Detection session started"
        };
        Self::new(timestamp_ms, message, AlertSeverity::Info)
    }

    pub fn session_ended(timestamp_ms: u64, detected: usize) -> Self {
        Self::new(
            timestamp_ms,
            format!("Detection session ended - {} items detected", detected),
            AlertSeverity::Info,
        )
    }

    pub fn memory_warning(timestamp_ms: u64) -> Self {
        Self::new(timestamp_ms, MEMORY_WARNING, AlertSeverity::Low)
    }
}

/// Receives `(message, severity)` alerts. Delivery is the sink's concern.
pub trait AlertSink: Send + Sync {
    fn deliver(&self, alert: &AlertEvent);
}

/// Sink that writes alerts to the log.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogSink;

impl AlertSink for LogSink {
    fn deliver(&self, alert: &AlertEvent) {
        match alert.severity {
            AlertSeverity::Info => log::info!("alert [{}] {}", alert.severity, alert.message),
            AlertSeverity::Low | AlertSeverity::Medium => {
                log::warn!("alert [{}] {}", alert.severity, alert.message)
            }
            AlertSeverity::High | AlertSeverity::Critical => {
                log::error!("alert [{}] {}", alert.severity, alert.message)
            }
        }
    }
}

/// Most-recent-first alert log with a capacity.
#[derive(Clone, Debug)]
pub struct AlertLog {
    entries: VecDeque<AlertEvent>,
    cap: usize,
}

impl AlertLog {
    pub fn new(cap: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            cap,
        }
    }

    pub fn push(&mut self, alert: AlertEvent) {
        self.entries.push_front(alert);
        self.entries.truncate(self.cap);
    }

    /// Change the capacity, dropping the oldest entries if needed.
    pub fn set_cap(&mut self, cap: usize) {
        self.cap = cap;
        self.entries.truncate(cap);
    }

    pub fn snapshot(&self) -> Vec<AlertEvent> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[derive(Clone, Copy, Debug)]
struct Streak {
    count: u32,
    armed: bool,
}

impl Default for Streak {
    fn default() -> Self {
        Self {
            count: 0,
            armed: true,
        }
    }
}

impl Streak {
    /// Extend the streak; true exactly once when it reaches `threshold`.
    fn bump(&mut self, threshold: u32) -> bool {
        self.count = self.count.saturating_add(1);
        if self.armed && self.count >= threshold {
            self.armed = false;
            return true;
        }
        false
    }

    fn clear(&mut self) {
        self.count = 0;
        self.armed = true;
    }
}

/// Turns per-frame results into debounced alerts.
pub struct AlertMonitor {
    settings: AlertSettings,
    missing: BTreeMap<SafetyObjectClass, Streak>,
    low_confidence: BTreeMap<SafetyObjectClass, Streak>,
}

impl AlertMonitor {
    pub fn new(settings: AlertSettings) -> Self {
        Self {
            settings,
            missing: BTreeMap::new(),
            low_confidence: BTreeMap::new(),
        }
    }

    pub fn reset(&mut self) {
        self.missing.clear();
        self.low_confidence.clear();
    }

    /// Inspect one processed frame.
    pub fn observe(
        &mut self,
        results: &[DetectionResult],
        mode: DetectionMode,
        now_ms: u64,
    ) -> Vec<AlertEvent> {
        let mut best: BTreeMap<SafetyObjectClass, &DetectionResult> = BTreeMap::new();
        for result in results {
            let Some(class) = SafetyObjectClass::from_label(&result.label)
                .or_else(|| match_label_fuzzy(&result.label))
            else {
                continue;
            };
            best.entry(class)
                .and_modify(|current| {
                    if result.confidence > current.confidence {
                        *current = result;
                    }
                })
                .or_insert(result);
        }

        let mut alerts = Vec::new();
        for class in SafetyObjectClass::critical() {
            let streak = self.missing.entry(class).or_default();
            if best.contains_key(&class) {
                streak.clear();
            } else if streak.bump(self.settings.missing_streak) {
                alerts.push(
                    AlertEvent::new(
                        now_ms,
                        format!("{} not detected!", class.display_name()),
                        AlertSeverity::High,
                    )
                    .related_to(class),
                );
            }
        }

        let threshold = self.settings.low_confidence_threshold(mode);
        let severity = if mode.is_enhanced() {
            AlertSeverity::Low
        } else {
            AlertSeverity::Medium
        };
        for class in SafetyObjectClass::ALL {
            let streak = self.low_confidence.entry(class).or_default();
            match best.get(&class) {
                Some(result) if result.confidence >= threshold => streak.clear(),
                Some(result) => {
                    if streak.bump(self.settings.low_confidence_streak) {
                        alerts.push(
                            AlertEvent::new(
                                now_ms,
                                format!(
                                    "Low confidence detection: {} ({}%)",
                                    result.label,
                                    (result.confidence * 100.0) as u32
                                ),
                                severity,
                            )
                            .related_to(class),
                        );
                    }
                }
                None => streak.count = 0,
            }
        }
        alerts
    }
}
