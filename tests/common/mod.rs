#![allow(dead_code)]

use std::path::{Path, PathBuf};

use cifar_finetune::resnet::{cifar_resnet, InitRegistry, ResNetConfig, PRETRAINED_CLASSES};
use cifar_finetune::data::RECORD_LEN;
use cifar_finetune::weights::{write_named, InMemoryWeights, NamedTensors};
use tch::nn::VarStore;
use tch::{Device, Tensor};

/// A CIFAR-100 ResNet-20 state dict with random values, in the shape a converted download has.
pub fn pretrained_blob() -> anyhow::Result<InMemoryWeights> {
    let vs = VarStore::new(Device::Cpu);
    let _net = cifar_resnet(
        &vs.root(),
        ResNetConfig::resnet20(PRETRAINED_CLASSES),
        &InitRegistry::default(),
    )?;
    Ok(InMemoryWeights::snapshot(&vs.variables()))
}

/// Writes `blob` to `dir/file`, adding the batch-norm counters PyTorch exports alongside.
pub fn write_blob(blob: &InMemoryWeights, dir: &Path, file: &str) -> anyhow::Result<PathBuf> {
    let mut named: NamedTensors = blob
        .tensors
        .iter()
        .map(|(name, t)| (name.clone(), t.shallow_clone()))
        .collect();
    let counters: Vec<String> = named
        .iter()
        .filter_map(|(name, _)| name.strip_suffix(".running_mean"))
        .map(|bn| format!("{bn}.num_batches_tracked"))
        .collect();
    for name in counters {
        named.push((name, Tensor::from(0i64)));
    }

    let path = dir.join(file);
    write_named(&named, &path)?;
    Ok(path)
}

/// A CIFAR-10 binary layout under `dir` with `per_batch` flat-colour records in each batch file.
pub fn write_cifar_dir(dir: &Path, per_batch: usize) -> anyhow::Result<()> {
    std::fs::create_dir_all(dir)?;
    let files = [
        "data_batch_1.bin",
        "data_batch_2.bin",
        "data_batch_3.bin",
        "data_batch_4.bin",
        "data_batch_5.bin",
        "test_batch.bin",
    ];
    for (b, file) in files.iter().enumerate() {
        let mut bytes = Vec::with_capacity(per_batch * RECORD_LEN);
        for i in 0..per_batch {
            let label = ((b + i) % 10) as u8;
            bytes.push(label);
            bytes.extend(std::iter::repeat(label * 25).take(RECORD_LEN - 1));
        }
        std::fs::write(dir.join(file), bytes)?;
    }
    Ok(())
}
