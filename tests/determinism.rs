//! Alone in its own binary: `tch::manual_seed` is process-wide.

mod common;

use cifar_finetune::FineTunedResNet;
use tch::nn::ModuleT;
use tch::{Device, Kind, Tensor};

/// Features and logits for a fixed non-zero input.
fn outputs(seed: i64) -> anyhow::Result<(Tensor, Tensor)> {
    tch::manual_seed(seed);
    let blob = common::pretrained_blob()?;
    let model = FineTunedResNet::from_pretrained(&blob, Device::Cpu)?;
    let xs = Tensor::ones([2, 3, 32, 32], (Kind::Float, Device::Cpu)) * 0.75;
    let features = model.backbone.forward_t(&xs, false);
    Ok((features, model.forward_t(&xs, false)))
}

#[test]
fn same_seed_same_logits() -> anyhow::Result<()> {
    let (features, first) = outputs(1234)?;
    let (same_features, second) = outputs(1234)?;
    assert_eq!(first.size(), vec![2, 10]);
    assert!(features.abs().sum(Kind::Float).double_value(&[]) > 0.0);
    assert!(features.equal(&same_features));
    assert!(first.equal(&second));

    let (other_features, other) = outputs(4321)?;
    assert!(!features.equal(&other_features));
    assert!(!first.equal(&other));
    Ok(())
}
