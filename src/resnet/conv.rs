use tch::nn;

use crate::error::{Error, Result};
use crate::resnet::init::InitRegistry;

fn check_dims(in_planes: i64, out_planes: i64, stride: i64) -> Result<()> {
    if in_planes <= 0 || out_planes <= 0 || stride <= 0 {
        return Err(Error::InvalidArgument(format!(
            "convolution needs positive sizes, got in={in_planes} out={out_planes} stride={stride}"
        )));
    }
    Ok(())
}

/// 3x3 convolution with padding
pub fn conv3x3(
    p: &nn::Path,
    in_planes: i64,
    out_planes: i64,
    stride: i64,
    registry: &InitRegistry,
) -> Result<nn::Conv2D> {
    check_dims(in_planes, out_planes, stride)?;
    Ok(nn::conv2d(
        p,
        in_planes,
        out_planes,
        3,
        registry.conv_config(stride, 1),
    ))
}

/// 1x1 convolution, only used on projection shortcuts.
pub fn conv1x1(
    p: &nn::Path,
    in_planes: i64,
    out_planes: i64,
    stride: i64,
    registry: &InitRegistry,
) -> Result<nn::Conv2D> {
    check_dims(in_planes, out_planes, stride)?;
    Ok(nn::conv2d(
        p,
        in_planes,
        out_planes,
        1,
        registry.conv_config(stride, 0),
    ))
}
