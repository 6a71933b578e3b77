use log::debug;
use tch::data::Iter2;
use tch::nn::ModuleT;
use tch::Kind;

use crate::data::{class_name, Split};
use crate::error::Result;

#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    /// Position of the example in its split.
    pub index: usize,
    pub label: i64,
    pub predicted: i64,
    /// Softmax over the logits, one entry per class.
    pub probabilities: Vec<f64>,
}

/// Runs `model` in evaluation mode over `data` in order.
pub fn predict(
    model: &impl ModuleT,
    data: &Split,
    batch_size: i64,
    limit: Option<usize>,
) -> Result<Vec<Prediction>> {
    data.validate()?;
    let wanted = limit.unwrap_or(usize::MAX).min(data.len().max(0) as usize);
    let device = data.images.device();
    let mut predictions = Vec::with_capacity(wanted);

    tch::no_grad(|| -> Result<()> {
        let mut iter = Iter2::f_new(&data.images, &data.labels, batch_size)?;
        iter.to_device(device).return_smaller_last_batch();
        for (xs, ys) in iter {
            if predictions.len() >= wanted {
                break;
            }
            let probs = model
                .forward_t(&xs, false)
                .softmax(-1, Kind::Double)
                .to_device(tch::Device::Cpu);
            let predicted = probs.argmax(-1, false);
            let (rows, classes) = (probs.size()[0], probs.size()[1]);

            for row in 0..rows {
                if predictions.len() >= wanted {
                    break;
                }
                let p = Prediction {
                    index: predictions.len(),
                    label: ys.int64_value(&[row]),
                    predicted: predicted.int64_value(&[row]),
                    probabilities: (0..classes).map(|c| probs.double_value(&[row, c])).collect(),
                };
                debug!(
                    "{} {} {}",
                    p.index,
                    class_name(p.label),
                    class_name(p.predicted)
                );
                predictions.push(p);
            }
        }
        Ok(())
    })?;
    Ok(predictions)
}

pub fn accuracy(predictions: &[Prediction]) -> f64 {
    if predictions.is_empty() {
        return 0.0;
    }
    let correct = predictions.iter().filter(|p| p.label == p.predicted).count();
    correct as f64 / predictions.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use tch::Tensor;

    /// Picks the class stored in the first pixel of channel 0.
    #[derive(Debug)]
    struct Oracle;

    impl ModuleT for Oracle {
        fn forward_t(&self, xs: &Tensor, _train: bool) -> Tensor {
            let class = xs
                .select(1, 0)
                .select(1, 0)
                .select(1, 0)
                .to_kind(Kind::Int64);
            class.one_hot(10).to_kind(Kind::Float) * 10.0
        }
    }

    fn split() -> Split {
        let mut pixels = vec![0f32; 5 * 3 * 4 * 4];
        for (i, class) in [3f32, 1., 4., 1., 5.].iter().enumerate() {
            pixels[i * 3 * 4 * 4] = *class;
        }
        Split {
            images: Tensor::from_slice(&pixels).view([5, 3, 4, 4]),
            labels: Tensor::from_slice(&[3i64, 1, 4, 9, 5]),
        }
    }

    #[test]
    fn predictions_follow_split_order() -> anyhow::Result<()> {
        let preds = predict(&Oracle, &split(), 2, None)?;
        assert_eq!(preds.len(), 5);
        let predicted: Vec<_> = preds.iter().map(|p| p.predicted).collect();
        assert_eq!(predicted, vec![3, 1, 4, 1, 5]);
        assert_eq!(preds[3].index, 3);
        assert_eq!(preds[3].label, 9);
        for p in &preds {
            let total: f64 = p.probabilities.iter().sum();
            assert!((total - 1.0).abs() < 1e-9);
        }
        assert!((accuracy(&preds) - 0.8).abs() < 1e-12);
        Ok(())
    }

    #[test]
    fn limit_truncates() -> anyhow::Result<()> {
        let preds = predict(&Oracle, &split(), 2, Some(3))?;
        assert_eq!(preds.len(), 3);
        Ok(())
    }

    #[test]
    fn grayscale_split_is_a_shape_mismatch() {
        let data = Split {
            images: Tensor::zeros([2, 1, 4, 4], (Kind::Float, tch::Device::Cpu)),
            labels: Tensor::from_slice(&[0i64, 1]),
        };
        assert!(matches!(
            predict(&Oracle, &data, 2, None),
            Err(Error::ShapeMismatch { actual: 1, .. })
        ));
    }

    #[test]
    fn label_count_must_match_images() {
        let mut data = split();
        data.labels = Tensor::from_slice(&[3i64, 1, 4]);
        assert!(matches!(
            predict(&Oracle, &data, 2, None),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn accuracy_of_nothing_is_zero() {
        assert_eq!(accuracy(&[]), 0.0);
    }
}
