use log::{info, warn};

use crate::config::FinetuneConfig;
use crate::data::{load_cifar10_test, load_cifar10_train, Split, CIFAR10_CLASSES};
use crate::error::Result;
use crate::eval::{accuracy, predict, Prediction};
use crate::report::write_report;
use crate::resnet::FineTunedResNet;
use crate::train::Trainer;
use crate::weights::WeightFile;

#[derive(Debug)]
pub struct RunOutcome {
    pub trained: bool,
    /// Over the whole test split, whatever `report_limit` says.
    pub accuracy: f64,
    pub predictions: Vec<Prediction>,
}

/// Restores the checkpoint when one exists, otherwise trains on `load_train()` and saves the
/// result if `save_checkpoint` is set. Returns whether training ran.
///
/// The training split is only loaded when it is needed.
pub fn train_or_restore<F>(
    model: &mut FineTunedResNet,
    config: &FinetuneConfig,
    load_train: F,
) -> Result<bool>
where
    F: FnOnce() -> Result<Split>,
{
    if config.checkpoint.exists() {
        model.load_checkpoint(&config.checkpoint)?;
        return Ok(false);
    }

    info!("no checkpoint at {}, training", config.checkpoint.display());
    let train = load_train()?;
    let summary = Trainer::new(config.train.clone())?.train(model, &train)?;
    info!("finished training after {} steps", summary.steps);
    if config.save_checkpoint {
        model.save_checkpoint(&config.checkpoint)?;
    } else {
        warn!("checkpoint saving disabled, trained head is discarded on exit");
    }
    Ok(true)
}

/// Pretrained body + new head, trained unless a checkpoint already exists, then a report over
/// the test split.
pub fn run(config: &FinetuneConfig) -> Result<RunOutcome> {
    config.validate()?;
    if let Some(seed) = config.train.seed {
        tch::manual_seed(seed);
    }
    let device = config.device();
    info!("using device {device:?}");

    let mut model = FineTunedResNet::from_pretrained(&WeightFile::new(&config.pretrained), device)?;
    info!(
        "trainable parameters: {} (head {})",
        model.trainable_parameter_count(),
        model.head_parameter_count()
    );

    let trained = train_or_restore(&mut model, config, || {
        load_cifar10_train(&config.data_dir, config.mean, config.std)
    })?;

    let test = load_cifar10_test(&config.data_dir, config.mean, config.std)?.to_device(device);
    let predictions = predict(&model, &test, config.train.batch_size, None)?;
    let accuracy = accuracy(&predictions);
    info!(
        "accuracy on {} test images: {:.2}%",
        predictions.len(),
        accuracy * 100.0
    );

    let rows = config
        .report_limit
        .map_or(predictions.len(), |limit| limit.min(predictions.len()));
    write_report(
        &config.report,
        &predictions[..rows],
        &CIFAR10_CLASSES,
        &config.image_prefix,
    )?;

    Ok(RunOutcome {
        trained,
        accuracy,
        predictions,
    })
}
