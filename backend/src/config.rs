use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tch::Device;

use crate::error::DetectorError;

pub const DEFAULT_CONFIG_PATH: &str = "config/detector.yaml";
pub const CHECKPOINT_FILE_NAME: &str = "best_resnet50.safetensors";
pub const TORCHSCRIPT_FILE_NAME: &str = "model.pt";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelFormat {
    /// Named tensors (`.safetensors` or `.ot`) loaded into the rebuilt network.
    #[default]
    Checkpoint,
    /// Traced module written by `export_model`.
    TorchScript,
}

impl ModelFormat {
    pub fn default_file_name(self) -> &'static str {
        match self {
            ModelFormat::Checkpoint => CHECKPOINT_FILE_NAME,
            ModelFormat::TorchScript => TORCHSCRIPT_FILE_NAME,
        }
    }
}

impl FromStr for ModelFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "checkpoint" => Ok(ModelFormat::Checkpoint),
            "torchscript" => Ok(ModelFormat::TorchScript),
            _ => Err(ConfigError::InvalidValue {
                key: "MODEL_FORMAT",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub host: String,
    pub port: u16,
    pub model_path: Option<PathBuf>,
    pub model_format: ModelFormat,
    pub allowed_origins: Vec<String>,
    pub force_cpu: bool,
    pub max_upload_bytes: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            model_path: None,
            model_format: ModelFormat::Checkpoint,
            allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "http://127.0.0.1:3000".to_string(),
            ],
            force_cpu: false,
            max_upload_bytes: 50 * 1024 * 1024,
        }
    }
}

impl DetectorConfig {
    /// Reads the YAML file named by `DETECTOR_CONFIG` (or the default path when
    /// it exists), then applies environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let explicit = std::env::var("DETECTOR_CONFIG").ok().map(PathBuf::from);
        let path = explicit.or_else(|| {
            let default = PathBuf::from(DEFAULT_CONFIG_PATH);
            default.exists().then_some(default)
        });

        let mut config = match path {
            Some(path) => {
                log::info!("Loading configuration from {}", path.display());
                Self::from_file(&path)?
            }
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let config_str = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&config_str)
    }

    pub fn from_yaml_str(config_str: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(config_str)?)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("HOST") {
            self.host = host;
        }
        if let Some(port) = lookup("PORT") {
            self.port = port.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: "PORT",
                value: port.clone(),
            })?;
        }
        if let Some(path) = lookup("MODEL_PATH").filter(|p| !p.trim().is_empty()) {
            self.model_path = Some(PathBuf::from(path));
        }
        if let Some(format) = lookup("MODEL_FORMAT") {
            self.model_format = format.parse()?;
        }
        if let Some(origins) = lookup("ALLOWED_ORIGINS") {
            self.allowed_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(force_cpu) = lookup("FORCE_CPU") {
            self.force_cpu = match force_cpu.trim().to_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: "FORCE_CPU",
                        value: force_cpu,
                    });
                }
            };
        }
        Ok(())
    }

    pub fn device(&self) -> Device {
        if self.force_cpu {
            Device::Cpu
        } else {
            Device::cuda_if_available()
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The configured model path, or the first default location that exists.
    pub fn resolve_model_path(&self) -> Result<PathBuf, DetectorError> {
        if let Some(path) = &self.model_path {
            return Ok(path.clone());
        }

        let candidates = model_candidates(self.model_format);
        match candidates.iter().find(|p| p.is_file()) {
            Some(found) => Ok(found.clone()),
            None => Err(DetectorError::CheckpointNotFound(
                candidates
                    .into_iter()
                    .next()
                    .unwrap_or_else(|| PathBuf::from(self.model_format.default_file_name())),
            )),
        }
    }
}

/// Directory the UI serves static assets from; `export_model` writes there.
const PUBLIC_DIRS: [&str; 3] = ["public", "../public", "frontend/public"];

/// Working directory and its parent first, then (for TorchScript) the UI's
/// public directories, then the executable's directory and up to three of
/// its ancestors (covers `target/<profile>/` layouts).
fn model_candidates(format: ModelFormat) -> Vec<PathBuf> {
    let file_name = format.default_file_name();
    let mut candidates = vec![
        PathBuf::from(file_name),
        Path::new("..").join(file_name),
    ];
    if format == ModelFormat::TorchScript {
        candidates.extend(PUBLIC_DIRS.iter().map(|dir| Path::new(dir).join(file_name)));
    }
    if let Ok(exe) = std::env::current_exe() {
        candidates.extend(exe.ancestors().skip(1).take(4).map(|dir| dir.join(file_name)));
    }
    candidates
}

pub fn device_label(device: Device) -> String {
    match device {
        Device::Cpu => "cpu".to_string(),
        Device::Cuda(index) => format!("cuda:{index}"),
        other => format!("{other:?}").to_lowercase(),
    }
}
