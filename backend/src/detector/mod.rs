pub mod backbone;
pub mod export;
pub mod model;
pub mod predictor;
pub mod preprocess;
pub mod scripted;

use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tch::{Device, Kind, Tensor};

use crate::config::{DetectorConfig, ModelFormat};
use crate::error::DetectorError;
use preprocess::{IMG_SIZE, NUM_CHANNELS};

pub use model::DetectorNet;
pub use predictor::{analyze, predict};
pub use preprocess::preprocess;
pub use scripted::ScriptedDetector;

/// A loaded real/fake network. `forward` maps a `[N, 3, 224, 224]` batch to
/// `[N, 1]` logits and must not mutate the model.
pub trait LogitModel: Send + Sync {
    fn forward(&self, input: &Tensor) -> Result<Tensor, DetectorError>;

    fn device(&self) -> Device;

    /// Runs a random image-shaped input through the model and returns the
    /// sigmoid probability.
    fn smoke_test(&self) -> Result<f64, DetectorError> {
        let input = Tensor::randn(
            [1, NUM_CHANNELS, IMG_SIZE, IMG_SIZE],
            (Kind::Float, self.device()),
        );
        let logits = self.forward(&input)?;
        Ok(logits.sigmoid().reshape([-1]).f_double_value(&[0])?)
    }
}

/// Runs tensor code whose libtorch failures surface as panics (operator
/// overloads, `apply_t`) and turns such a panic into `Internal`.
pub(crate) fn catch_torch_panic<T>(op: impl FnOnce() -> T) -> Result<T, DetectorError> {
    panic::catch_unwind(AssertUnwindSafe(op)).map_err(|payload| {
        let message = payload
            .downcast_ref::<String>()
            .map(String::as_str)
            .or_else(|| payload.downcast_ref::<&str>().copied())
            .unwrap_or("tensor operation panicked");
        DetectorError::Internal(message.to_string())
    })
}

pub fn load_model(
    format: ModelFormat,
    model_path: &Path,
    device: Device,
) -> Result<Arc<dyn LogitModel>, DetectorError> {
    let model: Arc<dyn LogitModel> = match format {
        ModelFormat::Checkpoint => Arc::new(DetectorNet::load(model_path, device)?),
        ModelFormat::TorchScript => Arc::new(ScriptedDetector::load(model_path, device)?),
    };
    Ok(model)
}

/// Resolves the model location from `config` and loads it on the configured
/// device. Called once per process.
pub fn load_from_config(config: &DetectorConfig) -> Result<Arc<dyn LogitModel>, DetectorError> {
    let model_path = config.resolve_model_path()?;
    let device = config.device();
    let started = Instant::now();
    let model = load_model(config.model_format, &model_path, device)?;
    log::info!(
        "Model ready from {} ({:?}, {:?}) in {:.2}s",
        model_path.display(),
        config.model_format,
        device,
        started.elapsed().as_secs_f32()
    );
    Ok(model)
}
