use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::frame::MAX_FRAME_BYTES;

const DEFAULT_STANDARD_INTERVAL_MS: u64 = 500;
const DEFAULT_ENHANCED_INTERVAL_MS: u64 = 300;
const DEFAULT_MIN_INTERVAL_MS: u64 = 200;
const DEFAULT_MAX_INTERVAL_MS: u64 = 5_000;
const DEFAULT_LATENCY_CEILING_MS: u64 = 100;
const DEFAULT_MEMORY_WARNING_BYTES: u64 = 50 * 1024 * 1024;
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_MAX_DETECTIONS: usize = 100;
const DEFAULT_NUM_CLASSES: usize = 80;
const DEFAULT_HISTORY_CAP: usize = 50;

/// Detection mode. Enhanced mode tightens thresholds and enables the ensemble.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DetectionMode {
    #[default]
    Standard,
    Enhanced,
}

impl DetectionMode {
    pub fn from_enhanced(enhanced: bool) -> Self {
        if enhanced {
            DetectionMode::Enhanced
        } else {
            DetectionMode::Standard
        }
    }

    pub fn is_enhanced(self) -> bool {
        self == DetectionMode::Enhanced
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerSettings {
    pub standard_interval_ms: u64,
    pub enhanced_interval_ms: u64,
    pub min_interval_ms: u64,
    pub max_interval_ms: u64,
    /// Frames slower than this grow the interval.
    pub latency_ceiling_ms: u64,
    pub growth_factor: f64,
    pub decay_factor: f64,
    pub memory_penalty_factor: f64,
    pub memory_warning_bytes: u64,
    pub exhaustion_backoff_factor: f64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            standard_interval_ms: DEFAULT_STANDARD_INTERVAL_MS,
            enhanced_interval_ms: DEFAULT_ENHANCED_INTERVAL_MS,
            min_interval_ms: DEFAULT_MIN_INTERVAL_MS,
            max_interval_ms: DEFAULT_MAX_INTERVAL_MS,
            latency_ceiling_ms: DEFAULT_LATENCY_CEILING_MS,
            growth_factor: 1.2,
            decay_factor: 0.9,
            memory_penalty_factor: 1.5,
            memory_warning_bytes: DEFAULT_MEMORY_WARNING_BYTES,
            exhaustion_backoff_factor: 2.0,
        }
    }
}

impl SchedulerSettings {
    pub fn initial_interval_ms(&self, mode: DetectionMode) -> u64 {
        match mode {
            DetectionMode::Standard => self.standard_interval_ms,
            DetectionMode::Enhanced => self.enhanced_interval_ms,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModeThresholds {
    pub confidence: f32,
    pub nms_iou: f32,
    /// Objectness floor for the decoder; defaults to `confidence`.
    #[serde(default)]
    pub early_reject: Option<f32>,
}

impl ModeThresholds {
    pub fn early_reject(&self) -> f32 {
        self.early_reject.unwrap_or(self.confidence)
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DetectionSettings {
    pub input_size: u32,
    pub max_detections: usize,
    pub num_classes: usize,
    pub standard: ModeThresholds,
    pub enhanced: ModeThresholds,
    pub max_frame_bytes: usize,
    /// Contrast/brightness lift in enhanced mode.
    pub enhance_preprocessing: bool,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            input_size: DEFAULT_INPUT_SIZE,
            max_detections: DEFAULT_MAX_DETECTIONS,
            num_classes: DEFAULT_NUM_CLASSES,
            standard: ModeThresholds {
                confidence: 0.5,
                nms_iou: 0.5,
                early_reject: None,
            },
            enhanced: ModeThresholds {
                confidence: 0.6,
                nms_iou: 0.4,
                early_reject: None,
            },
            max_frame_bytes: MAX_FRAME_BYTES,
            enhance_preprocessing: true,
        }
    }
}

impl DetectionSettings {
    pub fn thresholds(&self, mode: DetectionMode) -> ModeThresholds {
        match mode {
            DetectionMode::Standard => self.standard,
            DetectionMode::Enhanced => self.enhanced,
        }
    }

    pub fn input_shape(&self) -> Vec<usize> {
        let size = self.input_size as usize;
        vec![1, size, size, 3]
    }

    pub fn output_shape(&self) -> Vec<usize> {
        vec![1, self.max_detections, 5 + self.num_classes]
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EnsembleSettings {
    pub enabled: bool,
    /// The ensemble only runs when the base pass yields fewer results than this.
    pub trigger_cap: usize,
    /// Auxiliary resize factors relative to the model input size.
    pub scales: Vec<f32>,
    pub min_scaled_size: u32,
    pub max_scaled_size: u32,
    /// Confidence multiplier for auxiliary-scale results.
    pub damping: f32,
    /// Confidence multiplier for merged groups (capped at 1.0).
    pub boost: f32,
    /// Grid cell size for grouping by top-left corner.
    pub bucket: f32,
    pub max_results: usize,
}

impl Default for EnsembleSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            trigger_cap: 10,
            scales: vec![0.8, 1.2],
            min_scaled_size: 320,
            max_scaled_size: 1024,
            damping: 0.9,
            boost: 1.1,
            bucket: 0.1,
            max_results: 10,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineSettings {
    pub threads: usize,
    pub hardware_acceleration: bool,
    pub model_path: Option<PathBuf>,
    pub labels_path: Option<PathBuf>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            threads: 4,
            hardware_acceleration: true,
            model_path: None,
            labels_path: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionSettings {
    /// Preference-store flag: enhanced mode requested.
    pub enhanced_mode: bool,
    /// Confidence at or above which a sighting counts as successful.
    pub success_bar: f32,
    pub history_cap: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            enhanced_mode: false,
            success_bar: 0.7,
            history_cap: DEFAULT_HISTORY_CAP,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AlertSettings {
    /// Consecutive frames a critical object must be absent before alerting.
    pub missing_streak: u32,
    /// Consecutive frames a class must be seen only at low confidence.
    pub low_confidence_streak: u32,
    pub low_confidence_standard: f32,
    pub low_confidence_enhanced: f32,
    pub log_cap_standard: usize,
    pub log_cap_enhanced: usize,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            missing_streak: 5,
            low_confidence_streak: 3,
            low_confidence_standard: 0.7,
            low_confidence_enhanced: 0.75,
            log_cap_standard: 20,
            log_cap_enhanced: 25,
        }
    }
}

impl AlertSettings {
    pub fn low_confidence_threshold(&self, mode: DetectionMode) -> f32 {
        match mode {
            DetectionMode::Standard => self.low_confidence_standard,
            DetectionMode::Enhanced => self.low_confidence_enhanced,
        }
    }

    pub fn log_cap(&self, mode: DetectionMode) -> usize {
        match mode {
            DetectionMode::Standard => self.log_cap_standard,
            DetectionMode::Enhanced => self.log_cap_enhanced,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SentinelConfig {
    pub scheduler: SchedulerSettings,
    pub detection: DetectionSettings,
    pub ensemble: EnsembleSettings,
    pub engine: EngineSettings,
    pub session: SessionSettings,
    pub alerts: AlertSettings,
}

impl SentinelConfig {
    /// Load from `SENTINEL_CONFIG` (if set), apply environment overrides, validate.
    pub fn load() -> Result<Self> {
        let mut cfg = match std::env::var("SENTINEL_CONFIG").ok().as_deref() {
            Some(path) if !path.trim().is_empty() => read_config_file(Path::new(path))?,
            _ => Self::default(),
        };
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn mode(&self) -> DetectionMode {
        DetectionMode::from_enhanced(self.session.enhanced_mode)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(enhanced) = std::env::var("SENTINEL_ENHANCED") {
            self.session.enhanced_mode = parse_bool("SENTINEL_ENHANCED", &enhanced)?;
        }
        if let Ok(path) = std::env::var("SENTINEL_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.engine.model_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(path) = std::env::var("SENTINEL_LABELS_PATH") {
            if !path.trim().is_empty() {
                self.engine.labels_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(threads) = std::env::var("SENTINEL_THREADS") {
            self.engine.threads = threads
                .trim()
                .parse()
                .context("SENTINEL_THREADS must be a positive integer")?;
        }
        if let Ok(ms) = std::env::var("SENTINEL_MIN_INTERVAL_MS") {
            self.scheduler.min_interval_ms = ms
                .trim()
                .parse()
                .context("SENTINEL_MIN_INTERVAL_MS must be an integer")?;
        }
        if let Ok(ms) = std::env::var("SENTINEL_MAX_INTERVAL_MS") {
            self.scheduler.max_interval_ms = ms
                .trim()
                .parse()
                .context("SENTINEL_MAX_INTERVAL_MS must be an integer")?;
        }
        if let Ok(scales) = std::env::var("SENTINEL_ENSEMBLE_SCALES") {
            let parsed = split_csv(&scales)
                .iter()
                .map(|s| s.parse::<f32>())
                .collect::<std::result::Result<Vec<_>, _>>()
                .context("SENTINEL_ENSEMBLE_SCALES must be comma-separated numbers")?;
            if !parsed.is_empty() {
                self.ensemble.scales = parsed;
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let s = &self.scheduler;
        if s.min_interval_ms == 0 || s.min_interval_ms > s.max_interval_ms {
            return Err(anyhow!(
                "scheduler interval band [{}, {}] is invalid",
                s.min_interval_ms,
                s.max_interval_ms
            ));
        }
        for (name, value) in [
            ("standard_interval_ms", s.standard_interval_ms),
            ("enhanced_interval_ms", s.enhanced_interval_ms),
        ] {
            if value < s.min_interval_ms || value > s.max_interval_ms {
                return Err(anyhow!(
                    "scheduler.{} ({}) must lie within [{}, {}]",
                    name,
                    value,
                    s.min_interval_ms,
                    s.max_interval_ms
                ));
            }
        }
        // growth, penalty and back-off stretch the interval, decay shrinks it
        for (name, factor, stretches) in [
            ("growth_factor", s.growth_factor, true),
            ("decay_factor", s.decay_factor, false),
            ("memory_penalty_factor", s.memory_penalty_factor, true),
            ("exhaustion_backoff_factor", s.exhaustion_backoff_factor, true),
        ] {
            if !(factor.is_finite() && factor > 0.0) {
                return Err(anyhow!("scheduler.{} must be positive", name));
            }
            if stretches && factor < 1.0 {
                return Err(anyhow!("scheduler.{} ({}) must be >= 1", name, factor));
            }
            if !stretches && factor > 1.0 {
                return Err(anyhow!("scheduler.{} ({}) must be <= 1", name, factor));
            }
        }

        let d = &self.detection;
        if d.input_size == 0 || d.num_classes == 0 {
            return Err(anyhow!("detection input_size and num_classes must be > 0"));
        }
        for (name, t) in [("standard", d.standard), ("enhanced", d.enhanced)] {
            for value in [Some(t.confidence), Some(t.nms_iou), t.early_reject]
                .into_iter()
                .flatten()
            {
                if !unit(value) {
                    return Err(anyhow!("detection.{} thresholds must lie in [0, 1]", name));
                }
            }
        }

        let e = &self.ensemble;
        if e.enabled {
            if e.scales.is_empty() || e.scales.iter().any(|s| !(s.is_finite() && *s > 0.0)) {
                return Err(anyhow!("ensemble.scales must be non-empty positive factors"));
            }
            if e.min_scaled_size == 0 || e.min_scaled_size > e.max_scaled_size {
                return Err(anyhow!("ensemble scaled size band is invalid"));
            }
            if !unit(e.damping) || !(e.boost.is_finite() && e.boost > 0.0) {
                return Err(anyhow!("ensemble damping must lie in [0, 1] and boost be positive"));
            }
            if !(e.bucket > 0.0 && e.bucket <= 1.0) || e.max_results == 0 {
                return Err(anyhow!("ensemble bucket must lie in (0, 1] and max_results be > 0"));
            }
        }

        if self.engine.threads == 0 {
            return Err(anyhow!("engine.threads must be > 0"));
        }
        if !unit(self.session.success_bar) || self.session.history_cap == 0 {
            return Err(anyhow!(
                "session.success_bar must lie in [0, 1] and history_cap be > 0"
            ));
        }
        let a = &self.alerts;
        if !unit(a.low_confidence_standard) || !unit(a.low_confidence_enhanced) {
            return Err(anyhow!("alert confidence thresholds must lie in [0, 1]"));
        }
        if a.missing_streak == 0 || a.low_confidence_streak == 0 {
            return Err(anyhow!("alert streaks must be > 0"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<SentinelConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg: SentinelConfig = if is_toml {
        toml::from_str(&raw)
            .with_context(|| format!("invalid config file {}", path.display()))?
    } else {
        serde_json::from_str(&raw)
            .with_context(|| format!("invalid config file {}", path.display()))?
    };
    Ok(cfg)
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(anyhow!("{} must be a boolean", name)),
    }
}

fn unit(value: f32) -> bool {
    (0.0..=1.0).contains(&value)
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
