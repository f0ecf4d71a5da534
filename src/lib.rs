//! Safety Sentinel
//!
//! Real-time detection core for expected safety equipment: it turns camera
//! frames into labeled, confidence-scored boxes, tracks which safety objects
//! are visible in the current session, and raises alerts when critical
//! objects go missing or confidence drops.
//!
//! # Pipeline
//!
//! frame -> admission (`scheduler`) -> preprocessing (`frame`) -> inference
//! engine (`detect::backend`) -> decode -> NMS -> optional multi-scale
//! ensemble -> class mapping -> `session` aggregation + `alerts` -> `events`.
//!
//! # Module Structure
//!
//! - `geometry`: boxes and IoU
//! - `detect`: result types, decoder, NMS, class taxonomy, ensemble merge,
//!   inference-engine contract and engines, detection strategies
//! - `frame`: RGB frame buffers and preprocessing
//! - `model`: model artifacts and label lists
//! - `orchestrator`: the frame-admission state machine tying it together
//! - `session`, `alerts`, `events`: what consumers read
//! - `config`, `clock`, `memory`: ambient configuration and host hooks
//! - `ingest`: frame sources for the binaries

pub mod alerts;
pub mod clock;
pub mod config;
pub mod detect;
pub mod events;
pub mod frame;
pub mod geometry;
pub mod ingest;
pub mod memory;
pub mod model;
pub mod orchestrator;
pub mod scheduler;
pub mod session;

pub use alerts::{AlertEvent, AlertLog, AlertMonitor, AlertSeverity, AlertSink, LogSink};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{DetectionMode, SentinelConfig};
pub use detect::{
    select_strategy, DetectionResult, DetectionStrategy, InferenceEngine, InferenceError,
    ModelDetector, RawDetection, ReplayEngine, SafetyObjectClass, SyntheticDetector, Tensor,
};
pub use events::{EventBus, FrameReport, PipelineEvent};
pub use frame::{Frame, FrameDefect, PreprocessRequest, Preprocessor, ResizeNormalize};
pub use geometry::{intersection_over_union, BoundingBox, CenterBox};
pub use ingest::{FrameSource, SourceConfig, SourceStats, SyntheticSource};
pub use memory::{FixedMemoryProbe, MemoryProbe, ProcessMemoryProbe};
pub use model::{load_labels, ModelArtifact, ModelBundle};
pub use orchestrator::{FrameOutcome, Orchestrator, PipelinePhase};
pub use scheduler::{AdaptiveScheduler, Rejection};
pub use session::{
    ClassStats, FrameStats, PerformanceMetrics, SessionAggregator, SessionRecord, SessionStats,
};

#[cfg(feature = "backend-tract")]
pub use detect::backends::TractEngine;
#[cfg(feature = "ingest-image")]
pub use ingest::ImageDirSource;
