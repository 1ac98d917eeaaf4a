use clap::Parser;
use fake_detector::config::{DetectorConfig, ModelFormat};
use fake_detector::detector::DetectorNet;
use fake_detector::detector::export::export_torchscript;
use std::path::PathBuf;
use tch::Device;

#[derive(Parser)]
#[command(name = "export_model")]
#[command(about = "Trace the trained detector into a portable TorchScript module")]
struct Args {
    /// Checkpoint to export (.safetensors or .ot). Defaults to the configured model path.
    #[arg(long)]
    checkpoint: Option<PathBuf>,

    /// Where to write the traced module
    #[arg(long, default_value = "frontend/public/model.pt")]
    output: PathBuf,
}

fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));
    let args = Args::parse();

    let checkpoint = match args.checkpoint {
        Some(path) => path,
        None => {
            let mut config = DetectorConfig::load().map_err(std::io::Error::other)?;
            config.model_format = ModelFormat::Checkpoint;
            config.resolve_model_path().map_err(std::io::Error::other)?
        }
    };

    log::info!("Loading checkpoint {}", checkpoint.display());
    // Tracing is done on CPU so the module loads on any device.
    let net = DetectorNet::load(&checkpoint, Device::Cpu).map_err(std::io::Error::other)?;

    log::info!("Tracing to {}", args.output.display());
    let bytes = export_torchscript(&net, &args.output).map_err(std::io::Error::other)?;
    log::info!(
        "Model exported to {} ({:.2} MB)",
        args.output.display(),
        bytes as f64 / (1024.0 * 1024.0)
    );
    Ok(())
}
