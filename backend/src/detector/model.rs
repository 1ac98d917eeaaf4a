use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tch::nn;
use tch::{CModule, Device, Kind, Tensor};

use super::backbone::{FEATURE_DIM, resnet50_features};
use super::preprocess::{IMG_SIZE, NUM_CHANNELS};
use super::{LogitModel, catch_torch_panic};
use crate::error::DetectorError;

/// Hidden widths of the classifier head, after the backbone features.
pub const HEAD_HIDDEN: [i64; 2] = [512, 256];
/// Dropout before each head linear layer. Only active in training.
pub const HEAD_DROPOUT: [f64; 3] = [0.5, 0.3, 0.2];

/// Batch-norm step counters PyTorch stores alongside the running statistics.
const IGNORED_SUFFIX: &str = "num_batches_tracked";

/// `Dropout, Linear, BatchNorm1d, ReLU` per hidden width, then
/// `Dropout, Linear(_, 1)`. Parametrized layers sit at the same indices as in
/// the `nn.Sequential` the checkpoint was trained with (`fc.1`, `fc.2`, ...).
pub fn classifier_head(p: &nn::Path, in_dim: i64, hidden: &[i64], dropout: &[f64]) -> nn::SequentialT {
    let fc = p / "fc";
    let mut head = nn::seq_t();
    let mut width = in_dim;
    for (block, &out_dim) in hidden.iter().enumerate() {
        let rate = dropout[block];
        let base = 4 * block;
        head = head
            .add_fn_t(move |xs, train| xs.dropout(rate, train))
            .add(nn::linear(&fc / (base + 1), width, out_dim, Default::default()))
            .add(nn::batch_norm1d(&fc / (base + 2), out_dim, Default::default()))
            .add_fn(|xs| xs.relu());
        width = out_dim;
    }
    let rate = dropout[hidden.len()];
    head.add_fn_t(move |xs, train| xs.dropout(rate, train))
        .add(nn::linear(&fc / (4 * hidden.len() + 1), width, 1, Default::default()))
}

struct Network {
    backbone: nn::FuncT<'static>,
    head: nn::SequentialT,
}

impl Network {
    fn build(p: &nn::Path) -> Self {
        Self {
            backbone: resnet50_features(p),
            head: classifier_head(p, FEATURE_DIM, &HEAD_HIDDEN, &HEAD_DROPOUT),
        }
    }

    fn forward(&self, xs: &Tensor) -> Tensor {
        xs.apply_t(&self.backbone, false).apply_t(&self.head, false)
    }
}

/// ResNet-50 real/fake classifier rebuilt in a var store.
///
/// Variables are frozen and every forward pass runs in inference mode, so the
/// network is never mutated after construction.
pub struct DetectorNet {
    vs: nn::VarStore,
    network: Mutex<Network>,
}

impl DetectorNet {
    /// Randomly initialized network, mostly useful for tests and exports of
    /// the architecture itself.
    pub fn new(device: Device) -> Self {
        let mut vs = nn::VarStore::new(device);
        let network = Network::build(&vs.root());
        vs.freeze();
        Self {
            vs,
            network: Mutex::new(network),
        }
    }

    /// Rebuilds the architecture and fills it from a `.safetensors` or `.ot`
    /// checkpoint. Every variable must be present with the same shape and
    /// the file must not hold any tensor the network does not have.
    pub fn load(checkpoint_path: &Path, device: Device) -> Result<Self, DetectorError> {
        if !checkpoint_path.is_file() {
            return Err(DetectorError::CheckpointNotFound(checkpoint_path.to_path_buf()));
        }

        let net = Self::new(device);
        let tensors = read_named_tensors(checkpoint_path)?;
        copy_checked(&net.vs, tensors)?;

        log::info!(
            "Loaded {} tensors from {} onto {:?}",
            net.vs.variables().len(),
            checkpoint_path.display(),
            device
        );
        Ok(net)
    }

    pub fn var_store(&self) -> &nn::VarStore {
        &self.vs
    }

    fn network(&self) -> MutexGuard<'_, Network> {
        // Forward passes never write through the guard.
        self.network.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Traces the forward pass into a TorchScript module.
    pub fn to_torchscript(&self, module_name: &str) -> Result<CModule, DetectorError> {
        let network = self.network();
        let example = Tensor::randn(
            [1, NUM_CHANNELS, IMG_SIZE, IMG_SIZE],
            (Kind::Float, self.vs.device()),
        );
        let mut forward = |inputs: &[Tensor]| vec![network.forward(&inputs[0])];
        let module = CModule::create_by_tracing(module_name, "forward", &[example], &mut forward)?;
        Ok(module)
    }
}

impl LogitModel for DetectorNet {
    fn forward(&self, input: &Tensor) -> Result<Tensor, DetectorError> {
        let size = input.size();
        if size.len() != 4 || size[1..] != [NUM_CHANNELS, IMG_SIZE, IMG_SIZE] {
            return Err(DetectorError::Internal(format!(
                "expected input of shape [N, {NUM_CHANNELS}, {IMG_SIZE}, {IMG_SIZE}], got {size:?}"
            )));
        }

        let network = self.network();
        catch_torch_panic(|| {
            let input = input.to_device(self.vs.device());
            tch::no_grad(|| network.forward(&input))
        })
    }

    fn device(&self) -> Device {
        self.vs.device()
    }
}

fn read_named_tensors(path: &Path) -> Result<Vec<(String, Tensor)>, DetectorError> {
    let tensors = match path.extension().and_then(|ext| ext.to_str()) {
        Some("safetensors") => Tensor::read_safetensors(path)?,
        _ => Tensor::load_multi(path)?,
    };
    Ok(tensors)
}

/// Validates the whole checkpoint before touching any variable.
fn copy_checked(vs: &nn::VarStore, tensors: Vec<(String, Tensor)>) -> Result<(), DetectorError> {
    let mut source: HashMap<String, Tensor> = tensors
        .into_iter()
        .filter(|(name, _)| !name.ends_with(IGNORED_SUFFIX))
        .collect();

    let mut variables: Vec<(String, Tensor)> = vs.variables().into_iter().collect();
    variables.sort_by(|a, b| a.0.cmp(&b.0));

    let mut pairs = Vec::with_capacity(variables.len());
    for (name, var) in variables {
        let Some(src) = source.remove(&name) else {
            return Err(DetectorError::CheckpointMismatch(format!("missing key `{name}`")));
        };
        if src.size() != var.size() {
            return Err(DetectorError::CheckpointMismatch(format!(
                "`{name}` has shape {:?} in the checkpoint, expected {:?}",
                src.size(),
                var.size()
            )));
        }
        pairs.push((var, src));
    }

    if let Some(extra) = source.keys().min() {
        return Err(DetectorError::CheckpointMismatch(format!("unexpected key `{extra}`")));
    }

    tch::no_grad(|| -> Result<(), DetectorError> {
        for (mut var, src) in pairs {
            var.f_copy_(&src)?;
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn head_matches_training_layout() {
        let vs = nn::VarStore::new(Device::Cpu);
        let _head = classifier_head(&vs.root(), FEATURE_DIM, &HEAD_HIDDEN, &HEAD_DROPOUT);
        let variables = vs.variables();

        assert_eq!(variables["fc.1.weight"].size(), vec![512, 2048]);
        assert_eq!(variables["fc.2.running_mean"].size(), vec![512]);
        assert_eq!(variables["fc.5.weight"].size(), vec![256, 512]);
        assert_eq!(variables["fc.6.weight"].size(), vec![256]);
        assert_eq!(variables["fc.9.weight"].size(), vec![1, 256]);
        assert_eq!(variables["fc.9.bias"].size(), vec![1]);
        assert_eq!(variables.len(), 14);
    }

    #[test]
    fn eval_head_is_deterministic_for_single_item_batches() {
        let vs = nn::VarStore::new(Device::Cpu);
        let head = classifier_head(&vs.root(), 8, &[4, 2], &[0.5, 0.3, 0.2]);
        let xs = Tensor::randn([1, 8], (Kind::Float, Device::Cpu));
        let first = tch::no_grad(|| xs.apply_t(&head, false));
        let second = tch::no_grad(|| xs.apply_t(&head, false));
        assert_eq!(first.size(), vec![1, 1]);
        assert!(first.equal(&second));
    }

    #[test]
    fn rejects_non_image_shaped_input() {
        let net = DetectorNet::new(Device::Cpu);
        let xs = Tensor::zeros([1, 3, 32, 32], (Kind::Float, Device::Cpu));
        assert!(matches!(net.forward(&xs), Err(DetectorError::Internal(_))));
    }

    #[test]
    fn missing_checkpoint_is_reported() {
        let err = DetectorNet::load(Path::new("no/such/best_resnet50.safetensors"), Device::Cpu)
            .err()
            .unwrap();
        assert!(matches!(err, DetectorError::CheckpointNotFound(_)));
    }

    #[test]
    fn extra_and_missing_keys_are_mismatches() {
        let target = nn::VarStore::new(Device::Cpu);
        let _ = target.root().zeros("weight", &[2, 2]);

        let missing = vec![];
        let err = copy_checked(&target, missing).unwrap_err();
        assert!(matches!(err, DetectorError::CheckpointMismatch(ref m) if m.contains("weight")));

        let extra = vec![
            ("weight".to_string(), Tensor::ones([2, 2], (Kind::Float, Device::Cpu))),
            ("stray".to_string(), Tensor::ones([1], (Kind::Float, Device::Cpu))),
        ];
        let err = copy_checked(&target, extra).unwrap_err();
        assert!(matches!(err, DetectorError::CheckpointMismatch(ref m) if m.contains("stray")));
    }

    #[test]
    fn batch_norm_counters_are_ignored_and_values_copied() {
        let target = nn::VarStore::new(Device::Cpu);
        let weight = target.root().zeros("weight", &[2, 2]);
        let tensors = vec![
            ("weight".to_string(), Tensor::ones([2, 2], (Kind::Float, Device::Cpu))),
            (
                "bn.num_batches_tracked".to_string(),
                Tensor::from_slice(&[7i64]),
            ),
        ];
        copy_checked(&target, tensors).unwrap();
        assert_eq!(weight.sum(Kind::Float).double_value(&[]), 4.0);
    }
}
