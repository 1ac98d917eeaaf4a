use serde::{Deserialize, Serialize};
use strum::Display;

/// Probability at or above which an image is classified as real.
pub const REAL_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Label {
    Real,
    Fake,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    #[serde(rename = "prediction")]
    pub label: Label,
    pub confidence: f64,
    pub probability_real: f64,
    pub probability_fake: f64,
}

impl PredictionResult {
    /// Builds the result from the sigmoid output of the model.
    pub fn from_probability(probability_real: f64) -> Self {
        let probability_fake = 1.0 - probability_real;
        let label = if probability_real >= REAL_THRESHOLD {
            Label::Real
        } else {
            Label::Fake
        };
        let confidence = match label {
            Label::Real => probability_real,
            Label::Fake => probability_fake,
        };

        Self {
            label,
            confidence,
            probability_real,
            probability_fake,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct HealthResponse {
    pub status: String,
    pub device: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ErrorResponse {
    pub error: String,
}

/// Body read from stdin by the `analyze_image` command.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct AnalyzeRequest {
    #[serde(default)]
    pub image: Option<String>,
}

impl AnalyzeRequest {
    /// Base64 payload with any `data:image/...;base64,` header removed.
    pub fn payload(&self) -> Option<&str> {
        let image = self.image.as_deref()?.trim();
        let data = match image.split_once(',') {
            Some((_, data)) => data,
            None => image,
        };
        (!data.is_empty()).then_some(data)
    }
}
