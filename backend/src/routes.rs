use actix_multipart::Multipart;
use actix_web::{HttpResponse, web};
use futures::TryStreamExt;
use log::{error, info, warn};
use serde_json::json;
use shared::HealthResponse;

use crate::config::device_label;
use crate::detector::{self, LogitModel};
use crate::error::DetectorError;

const UPLOAD_FIELD: &str = "file";

#[derive(Clone, Copy, Debug)]
pub struct UploadLimits {
    pub max_bytes: usize,
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/").route(web::get().to(root)))
        .service(web::resource("/health").route(web::get().to(health)))
        .service(web::resource("/analyze").route(web::post().to(analyze)));
}

async fn root() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "message": "Fake Image Detector API is running"
    }))
}

async fn health(model: web::Data<dyn LogitModel>) -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse {
        status: "healthy".into(),
        device: device_label(model.device()),
    })
}

struct Upload {
    content_type: Option<String>,
    bytes: Vec<u8>,
}

fn malformed(e: actix_multipart::MultipartError) -> DetectorError {
    DetectorError::InvalidRequest(format!("Malformed upload: {e}"))
}

/// Takes the part named `file`, or else the first part carrying a filename.
/// Other parts are drained and discarded.
async fn read_upload(payload: &mut Multipart, max_bytes: usize) -> Result<Upload, DetectorError> {
    let mut selected: Option<Upload> = None;

    while let Some(mut field) = payload.try_next().await.map_err(malformed)? {
        let named_file = field.name() == Some(UPLOAD_FIELD);
        let has_filename = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .is_some();
        let wanted = named_file || (has_filename && selected.is_none());
        let content_type = field.content_type().map(|mime| mime.essence_str().to_owned());

        let mut bytes = Vec::new();
        while let Some(chunk) = field.try_next().await.map_err(malformed)? {
            if !wanted {
                continue;
            }
            if bytes.len() + chunk.len() > max_bytes {
                return Err(DetectorError::PayloadTooLarge {
                    size: bytes.len() + chunk.len(),
                    limit: max_bytes,
                });
            }
            bytes.extend_from_slice(&chunk);
        }

        if wanted {
            selected = Some(Upload { content_type, bytes });
            if named_file {
                break;
            }
        }
    }

    selected.ok_or_else(|| DetectorError::InvalidRequest("No file provided".to_string()))
}

async fn analyze(
    model: web::Data<dyn LogitModel>,
    limits: web::Data<UploadLimits>,
    mut payload: Multipart,
) -> Result<HttpResponse, DetectorError> {
    let outcome = run_analysis(model, limits.max_bytes, &mut payload).await;
    match &outcome {
        Ok(result) => info!(
            "Analyzed upload: {} (probability_real={:.4})",
            result.label, result.probability_real
        ),
        Err(e) if e.is_request_error() => warn!("Rejected upload: {}", e),
        Err(e) => error!("Analysis failed: {}", e),
    }
    Ok(HttpResponse::Ok().json(outcome?))
}

async fn run_analysis(
    model: web::Data<dyn LogitModel>,
    max_bytes: usize,
    payload: &mut Multipart,
) -> Result<shared::PredictionResult, DetectorError> {
    let upload = read_upload(payload, max_bytes).await?;

    let is_image = upload
        .content_type
        .as_deref()
        .is_some_and(|ct| ct.starts_with("image/"));
    if !is_image {
        return Err(DetectorError::InvalidRequest("File must be an image".to_string()));
    }
    if upload.bytes.is_empty() {
        return Err(DetectorError::EmptyInput);
    }

    let model = model.into_inner();
    let bytes = upload.bytes;
    web::block(move || detector::analyze(&bytes, &*model))
        .await
        .map_err(|e| DetectorError::Internal(format!("inference task failed: {e}")))?
}
