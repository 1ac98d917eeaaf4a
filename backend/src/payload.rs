use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use shared::AnalyzeRequest;

use crate::error::DetectorError;

/// Parses the JSON body given to `analyze_image` on stdin.
pub fn parse_request(input: &str) -> Result<AnalyzeRequest, DetectorError> {
    serde_json::from_str(input)
        .map_err(|e| DetectorError::InvalidRequest(format!("Invalid JSON input: {e}")))
}

/// Base64 image bytes from the request, data URL header stripped. Line
/// breaks and other ASCII whitespace inside the payload are ignored.
pub fn decode_image_payload(request: &AnalyzeRequest) -> Result<Vec<u8>, DetectorError> {
    let payload = request
        .payload()
        .ok_or_else(|| DetectorError::InvalidRequest("No image data provided".to_string()))?;
    let compact: String = payload.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    STANDARD
        .decode(compact)
        .map_err(|e| DetectorError::InvalidRequest(format!("Invalid base64 image data: {e}")))
}
