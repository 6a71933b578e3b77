use log::info;
use tch::data::Iter2;
use tch::nn::{self, ModuleT, OptimizerConfig};

use crate::config::TrainConfig;
use crate::data::Split;
use crate::error::Result;
use crate::resnet::FineTunedResNet;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LossReport {
    pub epoch: usize,
    /// 1-based index of the last mini-batch in the window.
    pub batch: usize,
    pub mean_loss: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainSummary {
    pub steps: usize,
    pub reports: Vec<LossReport>,
}

/// Mini-batch SGD over the head of a `FineTunedResNet`.
#[derive(Debug, Clone)]
pub struct Trainer {
    pub config: TrainConfig,
}

impl Trainer {
    pub fn new(config: TrainConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn train(&self, model: &FineTunedResNet, data: &Split) -> Result<TrainSummary> {
        data.validate()?;
        let c = &self.config;
        let device = model.device();
        let mut opt = nn::Sgd {
            momentum: c.momentum,
            ..Default::default()
        }
        .build(model.head_var_store(), c.learning_rate)?;

        let mut summary = TrainSummary::default();
        for epoch in 1..=c.epochs {
            let mut iter = Iter2::f_new(&data.images, &data.labels, c.batch_size)?;
            iter.to_device(device).return_smaller_last_batch();
            if c.shuffle {
                iter.shuffle();
            }

            let mut running_loss = 0.0;
            for (i, (xs, ys)) in iter.enumerate() {
                let logits = model.checked_forward(&xs)?;
                let loss = logits.cross_entropy_for_logits(&ys);
                opt.backward_step(&loss);
                summary.steps += 1;

                running_loss += loss.double_value(&[]);
                if i % c.log_every == c.log_every - 1 {
                    let report = LossReport {
                        epoch,
                        batch: i + 1,
                        mean_loss: running_loss / c.log_every as f64,
                    };
                    info!(
                        "[{}, {:5}] loss: {:.3}",
                        report.epoch, report.batch, report.mean_loss
                    );
                    summary.reports.push(report);
                    running_loss = 0.0;
                }
            }
        }
        Ok(summary)
    }
}

/// Mean cross-entropy of `model` on `data`, evaluated in batches without gradients.
pub fn mean_loss(model: &impl ModuleT, data: &Split, batch_size: i64) -> Result<f64> {
    data.validate()?;
    tch::no_grad(|| -> Result<f64> {
        let mut iter = Iter2::f_new(&data.images, &data.labels, batch_size)?;
        iter.return_smaller_last_batch();

        let mut total = 0.0;
        let mut seen = 0i64;
        for (xs, ys) in iter {
            let n = ys.size()[0];
            let loss = model.forward_t(&xs, false).cross_entropy_for_logits(&ys);
            total += loss.double_value(&[]) * n as f64;
            seen += n;
        }
        Ok(if seen == 0 { 0.0 } else { total / seen as f64 })
    })
}
