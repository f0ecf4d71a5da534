use thiserror::Error;

use crate::model::ModelArtifact;

/// Pipeline stage in which an inference-side failure occurred.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Load,
    Preprocess,
    Inference,
    Ensemble,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Load => "load",
            Stage::Preprocess => "preprocess",
            Stage::Inference => "inference",
            Stage::Ensemble => "ensemble",
        };
        f.write_str(name)
    }
}

/// Failures crossing the inference seam.
///
/// `ResourceExhausted` is an ordinary outcome: the orchestrator aborts the
/// frame, backs off, and keeps the session alive.
#[derive(Clone, Debug, Error)]
pub enum InferenceError {
    #[error("resource exhausted during {stage}: {detail}")]
    ResourceExhausted { stage: Stage, detail: String },

    #[error("inference engine unavailable: {0}")]
    Unavailable(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("inference failed: {0}")]
    Failed(String),
}

impl InferenceError {
    pub fn resource_exhausted(stage: Stage, detail: impl Into<String>) -> Self {
        InferenceError::ResourceExhausted {
            stage,
            detail: detail.into(),
        }
    }

    pub fn is_resource_exhausted(&self) -> bool {
        matches!(self, InferenceError::ResourceExhausted { .. })
    }
}

/// Dense f32 tensor with an explicit shape.
#[derive(Clone, Debug, PartialEq)]
pub struct Tensor {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl Tensor {
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self, InferenceError> {
        let expected = shape
            .iter()
            .try_fold(1usize, |acc, dim| acc.checked_mul(*dim))
            .ok_or_else(|| InferenceError::InvalidInput("tensor shape overflows".into()))?;
        if expected != data.len() {
            return Err(InferenceError::InvalidInput(format!(
                "tensor shape {:?} needs {} values, got {}",
                shape,
                expected,
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Hints passed to the engine at load time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    pub threads: usize,
    pub hardware_acceleration: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            threads: 4,
            hardware_acceleration: true,
        }
    }
}

/// Opaque handle to a loaded model.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EngineHandle(pub u64);

/// Inference engine capability.
///
/// Engines own the numerical kernels; the pipeline only hands them a
/// preprocessed input tensor and reads back the flat output tensor.
pub trait InferenceEngine: Send {
    /// Engine identifier.
    fn name(&self) -> &'static str;

    /// Load a model artifact and return a handle to it.
    fn load(
        &mut self,
        model: &ModelArtifact,
        config: &EngineConfig,
    ) -> Result<EngineHandle, InferenceError>;

    /// Run one inference. May block while the engine executes.
    fn run(&mut self, handle: EngineHandle, input: &Tensor) -> Result<Tensor, InferenceError>;

    /// Release a loaded model. Unknown handles are ignored.
    fn close(&mut self, handle: EngineHandle);
}
