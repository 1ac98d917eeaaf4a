//! Reads `{"image": "<base64>"}` from stdin and prints the prediction as JSON.
//! On failure prints `{"error": "..."}` and exits with status 1.

use fake_detector::DetectorError;
use fake_detector::config::DetectorConfig;
use fake_detector::detector;
use fake_detector::payload::{decode_image_payload, parse_request};
use shared::{ErrorResponse, PredictionResult};
use std::io::Read;
use std::panic;

fn run() -> Result<PredictionResult, DetectorError> {
    let mut input = String::new();
    std::io::stdin().read_to_string(&mut input)?;

    let request = parse_request(&input)?;
    let image_bytes = decode_image_payload(&request)?;

    let config = DetectorConfig::load()?;
    let model = detector::load_from_config(&config)?;
    detector::analyze(&image_bytes, &*model)
}

fn fail(message: String) -> ! {
    log::error!("Analysis error: {}", message);
    let error = ErrorResponse { error: message };
    match serde_json::to_string(&error) {
        Ok(json) => println!("{json}"),
        Err(_) => println!(r#"{{"error": "Analysis error"}}"#),
    }
    std::process::exit(1);
}

fn main() {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("warn"));

    // libtorch failures outside the guarded forward pass (e.g. allocation
    // while building the network) still have to produce the error object.
    let outcome = panic::catch_unwind(run).unwrap_or_else(|payload| {
        let message = payload
            .downcast_ref::<String>()
            .cloned()
            .or_else(|| payload.downcast_ref::<&str>().map(|s| s.to_string()))
            .unwrap_or_else(|| "analysis panicked".to_string());
        Err(DetectorError::Internal(message))
    });

    match outcome.and_then(|result| {
        serde_json::to_string(&result)
            .map_err(|e| DetectorError::Internal(format!("Could not serialize result: {e}")))
    }) {
        Ok(json) => println!("{json}"),
        Err(e) => fail(e.to_string()),
    }
}
