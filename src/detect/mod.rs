pub mod backend;
pub mod backends;
pub mod classes;
pub mod decode;
pub mod ensemble;
pub mod nms;
mod result;
pub mod strategy;
pub mod synthetic;

pub use backend::{EngineConfig, EngineHandle, InferenceEngine, InferenceError, Stage, Tensor};
pub use backends::ReplayEngine;
pub use classes::{map_class_to_safety_object, SafetyObjectClass};
pub use decode::{decode_output, DecodeThresholds, OutputLayout};
pub use nms::suppress;
pub use result::{DetectionResult, RawDetection};
pub use strategy::{select_strategy, DetectionStrategy, ModelDetector};
pub use synthetic::SyntheticDetector;
