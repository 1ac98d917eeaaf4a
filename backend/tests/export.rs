use fake_detector::detector::export::export_torchscript;
use fake_detector::detector::{DetectorNet, LogitModel, ScriptedDetector};
use tch::{Device, Kind, Tensor};

#[test]
fn traced_module_matches_the_network() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("public").join("model.pt");

    let net = DetectorNet::new(Device::Cpu);
    let written = export_torchscript(&net, &output).unwrap();
    assert!(written > 0);
    assert_eq!(std::fs::metadata(&output).unwrap().len(), written);

    let scripted = ScriptedDetector::load(&output, Device::Cpu).unwrap();
    let input = Tensor::randn([1, 3, 224, 224], (Kind::Float, Device::Cpu));
    let expected = net.forward(&input).unwrap();
    let actual = scripted.forward(&input).unwrap();
    assert!(expected.allclose(&actual, 1e-4, 1e-5, false));
}

#[test]
fn traced_module_accepts_any_batch_size() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("model.pt");

    let net = DetectorNet::new(Device::Cpu);
    export_torchscript(&net, &output).unwrap();
    let scripted = ScriptedDetector::load(&output, Device::Cpu).unwrap();

    let batch = Tensor::randn([2, 3, 224, 224], (Kind::Float, Device::Cpu));
    let logits = scripted.forward(&batch).unwrap();
    assert_eq!(logits.size(), vec![2, 1]);
}
