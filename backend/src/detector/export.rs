use std::path::Path;

use super::model::DetectorNet;
use crate::error::DetectorError;

/// Name of the traced TorchScript class.
pub const EXPORT_MODULE_NAME: &str = "FakeImageDetector";

/// Traces `net` and writes the module to `output`, creating parent
/// directories. Returns the size of the written file in bytes.
///
/// The module takes one `[batch, 3, 224, 224]` input and returns the
/// `[batch, 1]` logits; the batch dimension is not fixed by tracing.
pub fn export_torchscript(net: &DetectorNet, output: &Path) -> Result<u64, DetectorError> {
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let module = net.to_torchscript(EXPORT_MODULE_NAME)?;
    module.save(output)?;
    Ok(std::fs::metadata(output)?.len())
}
