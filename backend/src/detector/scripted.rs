use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tch::{CModule, Device, Tensor};

use super::LogitModel;
use crate::error::DetectorError;

/// A traced module written by `export_model`, served without rebuilding the
/// architecture.
#[derive(Clone)]
pub struct ScriptedDetector {
    model: Arc<Mutex<CModule>>,
    device: Device,
}

impl ScriptedDetector {
    pub fn load(model_path: &Path, device: Device) -> Result<Self, DetectorError> {
        if !model_path.is_file() {
            return Err(DetectorError::CheckpointNotFound(model_path.to_path_buf()));
        }

        let mut module = CModule::load_on_device(model_path, device)?;
        module.set_eval();
        log::info!("Loaded TorchScript module from {}", model_path.display());

        Ok(Self {
            model: Arc::new(Mutex::new(module)),
            device,
        })
    }
}

impl LogitModel for ScriptedDetector {
    fn forward(&self, input: &Tensor) -> Result<Tensor, DetectorError> {
        let input = input.to_device(self.device);
        let model = self.model.lock().unwrap_or_else(PoisonError::into_inner);
        let output = tch::no_grad(|| model.forward_ts(&[input]))?;
        Ok(output)
    }

    fn device(&self) -> Device {
        self.device
    }
}
