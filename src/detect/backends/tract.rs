#![cfg(feature = "backend-tract")]

use std::collections::HashMap;
use std::io::Cursor;

use tract_onnx::prelude::*;

use crate::detect::backend::{
    EngineConfig, EngineHandle, InferenceEngine, InferenceError, Tensor as FlatTensor,
};
use crate::model::ModelArtifact;

type Plan = TypedRunnableModel<TypedModel>;

/// ONNX inference engine built on tract.
///
/// Models are parsed from the artifact bytes; nothing is read from or
/// written to disk. Input is NHWC f32, output is read back flat.
#[derive(Default)]
pub struct TractEngine {
    plans: HashMap<EngineHandle, Plan>,
    next_handle: u64,
}

impl TractEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

impl InferenceEngine for TractEngine {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn load(
        &mut self,
        model: &ModelArtifact,
        config: &EngineConfig,
    ) -> Result<EngineHandle, InferenceError> {
        if config.threads != 1 || config.hardware_acceleration {
            log::debug!(
                "tract runs single-threaded on CPU; ignoring threads={} accel={}",
                config.threads,
                config.hardware_acceleration
            );
        }
        let shape: TVec<usize> = model.input_shape.iter().copied().collect();
        let plan = tract_onnx::onnx()
            .model_for_read(&mut Cursor::new(model.bytes()))
            .and_then(|m| m.with_input_fact(0, InferenceFact::dt_shape(f32::datum_type(), shape)))
            .and_then(|m| m.into_optimized())
            .and_then(|m| m.into_runnable())
            .map_err(|e| InferenceError::Unavailable(format!("failed to prepare ONNX model: {}", e)))?;

        self.next_handle += 1;
        let handle = EngineHandle(self.next_handle);
        self.plans.insert(handle, plan);
        Ok(handle)
    }

    fn run(
        &mut self,
        handle: EngineHandle,
        input: &FlatTensor,
    ) -> Result<FlatTensor, InferenceError> {
        let plan = self
            .plans
            .get(&handle)
            .ok_or_else(|| InferenceError::Unavailable(format!("unknown handle {}", handle.0)))?;
        let array = tract_ndarray::ArrayD::from_shape_vec(input.shape.clone(), input.data.clone())
            .map_err(|e| InferenceError::InvalidInput(e.to_string()))?;
        let outputs = plan
            .run(tvec!(array.into_tensor().into()))
            .map_err(|e| InferenceError::Failed(format!("ONNX inference failed: {}", e)))?;
        let output = outputs
            .first()
            .ok_or_else(|| InferenceError::Failed("model produced no outputs".into()))?;
        let view = output
            .to_array_view::<f32>()
            .map_err(|e| InferenceError::Failed(format!("model output was not f32: {}", e)))?;
        FlatTensor::new(view.shape().to_vec(), view.iter().copied().collect())
    }

    fn close(&mut self, handle: EngineHandle) {
        self.plans.remove(&handle);
    }
}
