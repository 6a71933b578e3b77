use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const CIFAR10_MEAN: [f64; 3] = [0.4914, 0.4822, 0.4465];
pub const CIFAR10_STD: [f64; 3] = [0.2023, 0.1994, 0.2010];

/// Knobs of the mini-batch loop; handed to `Trainer` as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    pub epochs: usize,
    pub batch_size: i64,
    pub learning_rate: f64,
    pub momentum: f64,
    /// Log the running loss every this many mini-batches.
    pub log_every: usize,
    pub shuffle: bool,
    pub seed: Option<i64>,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            epochs: 10,
            batch_size: 32,
            learning_rate: 0.001,
            momentum: 0.9,
            log_every: 20,
            shuffle: true,
            seed: None,
        }
    }
}

impl TrainConfig {
    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            return Err(Error::InvalidConfig("epochs must be at least 1".into()));
        }
        if self.batch_size < 1 {
            return Err(Error::InvalidConfig(format!(
                "batch_size must be positive, got {}",
                self.batch_size
            )));
        }
        if self.log_every == 0 {
            return Err(Error::InvalidConfig("log_every must be at least 1".into()));
        }
        if !(self.learning_rate > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if !(0.0..1.0).contains(&self.momentum) {
            return Err(Error::InvalidConfig(format!(
                "momentum must be in [0, 1), got {}",
                self.momentum
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FinetuneConfig {
    /// Directory holding the CIFAR-10 binary batches.
    pub data_dir: PathBuf,
    /// Converted CIFAR-100 ResNet-20 weights (`.safetensors`, `.npz` or `.ot`).
    pub pretrained: PathBuf,
    pub checkpoint: PathBuf,
    pub save_checkpoint: bool,
    pub report: PathBuf,
    /// Prefix of the `image{i}.png` references written into the report.
    pub image_prefix: String,
    pub report_limit: Option<usize>,
    pub use_cuda: bool,
    pub mean: [f64; 3],
    pub std: [f64; 3],
    pub train: TrainConfig,
}

impl Default for FinetuneConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data/cifar-10-batches-bin"),
            pretrained: PathBuf::from("weights/cifar100-resnet20.safetensors"),
            checkpoint: PathBuf::from("cifar_net.ot"),
            save_checkpoint: true,
            report: PathBuf::from("result.html"),
            image_prefix: "data/test/".to_string(),
            report_limit: None,
            use_cuda: true,
            mean: CIFAR10_MEAN,
            std: CIFAR10_STD,
            train: TrainConfig::default(),
        }
    }
}

impl FinetuneConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.train.validate()?;
        if let Some(s) = self.std.iter().find(|&&s| !(s > 0.0)) {
            return Err(Error::InvalidConfig(format!(
                "normalisation std must be positive, got {s}"
            )));
        }
        Ok(())
    }

    pub fn device(&self) -> tch::Device {
        if self.use_cuda {
            tch::Device::cuda_if_available()
        } else {
            tch::Device::Cpu
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = FinetuneConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.train.batch_size, 32);
        assert_eq!(config.train.log_every, 20);
    }

    #[test]
    fn partial_json_keeps_defaults() -> anyhow::Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        write!(file, r#"{{ "train": {{ "epochs": 2 }}, "use_cuda": false }}"#)?;
        let config = FinetuneConfig::from_file(file.path())?;
        assert_eq!(config.train.epochs, 2);
        assert_eq!(config.train.learning_rate, 0.001);
        assert!(!config.use_cuda);
        assert_eq!(config.device(), tch::Device::Cpu);
        Ok(())
    }

    #[test]
    fn rejects_bad_values() {
        let mut config = FinetuneConfig::default();
        config.train.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = FinetuneConfig::default();
        config.std[1] = 0.0;
        assert!(config.validate().is_err());

        let mut config = FinetuneConfig::default();
        config.train.learning_rate = f64::NAN;
        assert!(config.validate().is_err());
    }
}
