use std::collections::{HashMap, VecDeque};

use crate::detect::backend::{EngineConfig, EngineHandle, InferenceEngine, InferenceError, Tensor};
use crate::model::ModelArtifact;

/// Engine that answers from a script instead of running a model.
///
/// Each `run` pops the next scripted output (or failure). In cycling mode the
/// step is pushed back so the script repeats forever.
pub struct ReplayEngine {
    script: VecDeque<Result<Tensor, InferenceError>>,
    cycle: bool,
    load_error: Option<String>,
    loaded: HashMap<EngineHandle, Vec<usize>>,
    next_handle: u64,
    runs: u64,
}

impl ReplayEngine {
    pub fn new(outputs: Vec<Tensor>) -> Self {
        Self {
            script: outputs.into_iter().map(Ok).collect(),
            cycle: false,
            load_error: None,
            loaded: HashMap::new(),
            next_handle: 1,
            runs: 0,
        }
    }

    /// Replay `outputs` in a loop.
    pub fn cycling(outputs: Vec<Tensor>) -> Self {
        Self {
            cycle: true,
            ..Self::new(outputs)
        }
    }

    pub fn push_output(&mut self, output: Tensor) {
        self.script.push_back(Ok(output));
    }

    pub fn push_error(&mut self, error: InferenceError) {
        self.script.push_back(Err(error));
    }

    /// Make every subsequent `load` fail.
    pub fn fail_load(&mut self, reason: impl Into<String>) {
        self.load_error = Some(reason.into());
    }

    pub fn runs(&self) -> u64 {
        self.runs
    }
}

impl InferenceEngine for ReplayEngine {
    fn name(&self) -> &'static str {
        "replay"
    }

    fn load(
        &mut self,
        model: &ModelArtifact,
        config: &EngineConfig,
    ) -> Result<EngineHandle, InferenceError> {
        if let Some(reason) = &self.load_error {
            return Err(InferenceError::Unavailable(reason.clone()));
        }
        let handle = EngineHandle(self.next_handle);
        self.next_handle += 1;
        self.loaded.insert(handle, model.input_shape.clone());
        log::debug!(
            "replay engine loaded handle {} (threads={}, accel={})",
            handle.0,
            config.threads,
            config.hardware_acceleration
        );
        Ok(handle)
    }

    fn run(&mut self, handle: EngineHandle, input: &Tensor) -> Result<Tensor, InferenceError> {
        let shape = self
            .loaded
            .get(&handle)
            .ok_or_else(|| InferenceError::Unavailable(format!("unknown handle {}", handle.0)))?;
        if &input.shape != shape {
            return Err(InferenceError::InvalidInput(format!(
                "input shape {:?} does not match model input {:?}",
                input.shape, shape
            )));
        }
        self.runs += 1;
        let step = self
            .script
            .pop_front()
            .ok_or_else(|| InferenceError::Failed("replay script exhausted".into()))?;
        if self.cycle {
            self.script.push_back(step.clone());
        }
        step
    }

    fn close(&mut self, handle: EngineHandle) {
        self.loaded.remove(&handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::backend::Stage;

    fn artifact() -> ModelArtifact {
        ModelArtifact::new(vec![1], vec![1, 2, 2, 3], vec![1, 1, 6]).unwrap()
    }

    fn input() -> Tensor {
        Tensor::new(vec![1, 2, 2, 3], vec![0.0; 12]).unwrap()
    }

    #[test]
    fn replays_script_in_order() {
        let out = Tensor::new(vec![1, 1, 6], vec![0.5; 6]).unwrap();
        let mut engine = ReplayEngine::new(vec![out.clone()]);
        engine.push_error(InferenceError::resource_exhausted(Stage::Inference, "oom"));
        let handle = engine.load(&artifact(), &EngineConfig::default()).unwrap();

        assert_eq!(engine.run(handle, &input()).unwrap(), out);
        assert!(engine.run(handle, &input()).unwrap_err().is_resource_exhausted());
        assert!(matches!(
            engine.run(handle, &input()),
            Err(InferenceError::Failed(_))
        ));
        assert_eq!(engine.runs(), 3);
    }

    #[test]
    fn cycling_repeats_forever() {
        let out = Tensor::new(vec![1, 1, 6], vec![0.1; 6]).unwrap();
        let mut engine = ReplayEngine::cycling(vec![out.clone()]);
        let handle = engine.load(&artifact(), &EngineConfig::default()).unwrap();
        for _ in 0..5 {
            assert_eq!(engine.run(handle, &input()).unwrap(), out);
        }
    }

    #[test]
    fn closed_handle_and_bad_shape_are_rejected() {
        let mut engine = ReplayEngine::cycling(Vec::new());
        let handle = engine.load(&artifact(), &EngineConfig::default()).unwrap();
        let wrong = Tensor::new(vec![1, 3], vec![0.0; 3]).unwrap();
        assert!(matches!(
            engine.run(handle, &wrong),
            Err(InferenceError::InvalidInput(_))
        ));
        engine.close(handle);
        assert!(matches!(
            engine.run(handle, &input()),
            Err(InferenceError::Unavailable(_))
        ));
    }
}
