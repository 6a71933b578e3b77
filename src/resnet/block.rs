use tch::nn;
use tch::nn::ModuleT;
use tch::Tensor;

use crate::error::{Error, Result};
use crate::resnet::conv::{conv1x1, conv3x3};
use crate::resnet::init::InitRegistry;

/// Projection shortcut: 1x1 conv + batch norm, stored as `downsample.0` / `downsample.1`.
#[derive(Debug)]
pub struct Downsample {
    pub conv: nn::Conv2D,
    pub bn: nn::BatchNorm,
}

impl ModuleT for Downsample {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        xs.apply(&self.conv).apply_t(&self.bn, train)
    }
}

#[derive(Debug)]
pub struct BasicBlock {
    pub conv1: nn::Conv2D,
    pub bn1: nn::BatchNorm,
    pub conv2: nn::Conv2D,
    pub bn2: nn::BatchNorm,
    pub downsample: Option<Downsample>,
    pub inplanes: i64,
    pub planes: i64,
    pub stride: i64,
}

impl BasicBlock {
    pub const EXPANSION: i64 = 1;

    /// The only structural decision a block makes, settled once here.
    pub fn needs_downsample(inplanes: i64, planes: i64, stride: i64) -> bool {
        stride != 1 || inplanes != planes * Self::EXPANSION
    }

    pub fn new(
        p: &nn::Path,
        inplanes: i64,
        planes: i64,
        stride: i64,
        registry: &InitRegistry,
    ) -> Result<Self> {
        let conv1 = conv3x3(&(p / "conv1"), inplanes, planes, stride, registry)?;
        let bn1 = nn::batch_norm2d(p / "bn1", planes, registry.batch_norm_config());
        let conv2 = conv3x3(&(p / "conv2"), planes, planes, 1, registry)?;
        let bn2 = nn::batch_norm2d(p / "bn2", planes, registry.batch_norm_config());

        let downsample = if Self::needs_downsample(inplanes, planes, stride) {
            let ds = p / "downsample";
            let out = planes * Self::EXPANSION;
            Some(Downsample {
                conv: conv1x1(&(&ds / "0"), inplanes, out, stride, registry)?,
                bn: nn::batch_norm2d(&ds / "1", out, registry.batch_norm_config()),
            })
        } else {
            None
        };

        Ok(Self {
            conv1,
            bn1,
            conv2,
            bn2,
            downsample,
            inplanes,
            planes,
            stride,
        })
    }

    pub fn out_planes(&self) -> i64 {
        self.planes * Self::EXPANSION
    }

    /// `forward_t` with the input channel count checked before any kernel runs.
    pub fn checked_forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        check_channels("basic block", xs, self.inplanes)?;
        Ok(self.forward_t(xs, train))
    }
}

impl ModuleT for BasicBlock {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        let out = xs
            .apply(&self.conv1)
            .apply_t(&self.bn1, train)
            .relu()
            .apply(&self.conv2)
            .apply_t(&self.bn2, train);

        let identity = match &self.downsample {
            Some(downsample) => downsample.forward_t(xs, train),
            None => xs.shallow_clone(),
        };

        (out + identity).relu()
    }
}

/// Fails unless `xs` is a 4-d activation with `expected` channels.
pub fn check_channels(context: &str, xs: &Tensor, expected: i64) -> Result<()> {
    let size = xs.size();
    if size.len() != 4 {
        return Err(Error::InvalidArgument(format!(
            "{context}: expected a (batch, channels, height, width) tensor, got shape {size:?}"
        )));
    }
    if size[1] != expected {
        return Err(Error::ShapeMismatch {
            context: context.to_string(),
            expected,
            actual: size[1],
        });
    }
    Ok(())
}
