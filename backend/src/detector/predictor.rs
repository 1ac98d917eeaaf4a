use shared::PredictionResult;
use tch::Tensor;

use super::LogitModel;
use super::preprocess::preprocess;
use crate::error::DetectorError;

/// Sigmoid of the single logit, threshold at 0.5.
pub fn predict(input: &Tensor, model: &dyn LogitModel) -> Result<PredictionResult, DetectorError> {
    let logits = model.forward(input)?;
    if logits.numel() != 1 {
        return Err(DetectorError::Internal(format!(
            "expected a single logit, model returned shape {:?}",
            logits.size()
        )));
    }

    let probability_real = logits.sigmoid().reshape([-1]).f_double_value(&[0])?;
    if !probability_real.is_finite() {
        return Err(DetectorError::Internal(
            "model produced a non-finite logit".to_string(),
        ));
    }
    Ok(PredictionResult::from_probability(probability_real))
}

/// Decode, preprocess and classify one encoded image.
pub fn analyze(image_bytes: &[u8], model: &dyn LogitModel) -> Result<PredictionResult, DetectorError> {
    let input = preprocess(image_bytes, model.device())?;
    predict(&input, model)
}
