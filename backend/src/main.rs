use actix_cors::Cors;
use actix_web::middleware::Logger;
use actix_web::{App, HttpServer, web};
use fake_detector::config::{DetectorConfig, device_label};
use fake_detector::detector;
use fake_detector::routes::{UploadLimits, configure_routes};
use std::env;

fn cors(allowed_origins: &[String]) -> Cors {
    let cors = if allowed_origins.iter().any(|o| o == "*") {
        Cors::default().allow_any_origin()
    } else {
        allowed_origins
            .iter()
            .fold(Cors::default(), |cors, origin| cors.allowed_origin(origin))
    };
    cors.allow_any_method()
        .allow_any_header()
        .supports_credentials()
        .max_age(3600)
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    if let Ok(current_dir) = env::current_dir() {
        log::info!("Current working directory: {}", current_dir.display());
    } else {
        log::error!("Failed to get the current working directory.");
    }

    let config = DetectorConfig::load().map_err(|e| {
        log::error!("Invalid configuration: {}", e);
        std::io::Error::other(format!("Configuration failed: {e}"))
    })?;
    log::info!("Using device: {}", device_label(config.device()));

    let model = detector::load_from_config(&config).map_err(|e| {
        log::error!("Failed to load model at startup: {}", e);
        std::io::Error::other(format!("Model loading failed: {e}"))
    })?;

    match model.smoke_test() {
        Ok(probability) => log::debug!("Startup self-check probability: {:.4}", probability),
        Err(e) => log::warn!("Startup self-check failed: {}", e),
    }

    let limits = UploadLimits {
        max_bytes: config.max_upload_bytes,
    };
    let allowed_origins = config.allowed_origins.clone();
    let bind_address = config.bind_address();
    log::info!("Starting server on {}", bind_address);

    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(cors(&allowed_origins))
            .app_data(web::Data::from(model.clone()))
            .app_data(web::Data::new(limits))
            .configure(configure_routes)
    })
    .bind(&bind_address)?
    .run()
    .await
}
