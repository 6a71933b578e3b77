//! Fine-tuning a CIFAR-100 ResNet-20 onto CIFAR-10 with `tch`: frozen pretrained body, fresh
//! linear head, and an HTML report of per-class probabilities.

pub mod config;
pub mod data;
pub mod error;
pub mod eval;
pub mod pipeline;
pub mod report;
pub mod resnet;
pub mod train;
pub mod weights;

use log::LevelFilter;

pub use config::{FinetuneConfig, TrainConfig};
pub use error::{Error, ParameterLoadError, Result};
pub use resnet::{FineTunedResNet, ResNetConfig};

/// Initialise logging once; `RUST_LOG` wins over `default_filter` when set.
pub fn init_logging(default_filter: LevelFilter) {
    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(default_filter.as_str()),
    );
    // Already initialised is fine.
    let _ = builder.try_init();
}
