use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use shared::ErrorResponse;
use std::path::PathBuf;

use crate::config::ConfigError;

#[derive(Debug, thiserror::Error)]
pub enum DetectorError {
    #[error("Empty file")]
    EmptyInput,
    #[error("Image processing error: {0}")]
    Decode(String),
    #[error("{0}")]
    InvalidRequest(String),
    #[error("File too large: {size} bytes, max allowed: {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },
    #[error("Model checkpoint not found: {}", .0.display())]
    CheckpointNotFound(PathBuf),
    #[error("Checkpoint does not match the model architecture: {0}")]
    CheckpointMismatch(String),
    #[error("Model error: {0}")]
    Model(#[from] tch::TchError),
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl DetectorError {
    /// Errors caused by the caller's input rather than by the service.
    pub fn is_request_error(&self) -> bool {
        matches!(
            self,
            DetectorError::EmptyInput
                | DetectorError::Decode(_)
                | DetectorError::InvalidRequest(_)
                | DetectorError::PayloadTooLarge { .. }
        )
    }
}

impl ResponseError for DetectorError {
    fn status_code(&self) -> StatusCode {
        match self {
            DetectorError::EmptyInput
            | DetectorError::Decode(_)
            | DetectorError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            DetectorError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorResponse {
            error: self.to_string(),
        })
    }
}
