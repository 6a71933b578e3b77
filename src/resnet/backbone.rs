use tch::nn;
use tch::nn::ModuleT;
use tch::Tensor;

use crate::error::{Error, Result};
use crate::resnet::block::{check_channels, BasicBlock};
use crate::resnet::conv::conv3x3;
use crate::resnet::init::InitRegistry;

pub const STAGE_PLANES: [i64; 3] = [16, 32, 64];
pub const STAGE_STRIDES: [i64; 3] = [1, 2, 2];
pub const IN_CHANNELS: i64 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResNetConfig {
    /// Residual blocks per stage.
    pub layers: [i64; 3],
    pub num_classes: i64,
}

impl Default for ResNetConfig {
    fn default() -> Self {
        Self {
            layers: [3, 3, 3],
            num_classes: 100,
        }
    }
}

impl ResNetConfig {
    pub fn resnet20(num_classes: i64) -> Self {
        Self {
            layers: [3, 3, 3],
            num_classes,
        }
    }

    pub fn feature_dim(&self) -> i64 {
        STAGE_PLANES[2] * BasicBlock::EXPANSION
    }
}

/// Stem, three residual stages, global average pool and flatten: everything but the classifier.
#[derive(Debug)]
pub struct ResNetFeatures {
    pub conv1: nn::Conv2D,
    pub bn1: nn::BatchNorm,
    pub layer1: Vec<BasicBlock>,
    pub layer2: Vec<BasicBlock>,
    pub layer3: Vec<BasicBlock>,
    pub out_dim: i64,
}

fn make_layer(
    p: &nn::Path,
    inplanes: &mut i64,
    planes: i64,
    blocks: i64,
    stride: i64,
    registry: &InitRegistry,
) -> Result<Vec<BasicBlock>> {
    let mut layer = Vec::with_capacity(blocks as usize);
    layer.push(BasicBlock::new(&(p / "0"), *inplanes, planes, stride, registry)?);
    *inplanes = planes * BasicBlock::EXPANSION;
    for i in 1..blocks {
        layer.push(BasicBlock::new(&(p / i), *inplanes, planes, 1, registry)?);
    }
    Ok(layer)
}

pub fn resnet_features(
    p: &nn::Path,
    config: &ResNetConfig,
    registry: &InitRegistry,
) -> Result<ResNetFeatures> {
    if let Some(n) = config.layers.iter().find(|&&n| n < 1) {
        return Err(Error::InvalidArgument(format!(
            "every stage needs at least one block, got {n} in {:?}",
            config.layers
        )));
    }

    let mut inplanes = STAGE_PLANES[0];
    let conv1 = conv3x3(&(p / "conv1"), IN_CHANNELS, inplanes, 1, registry)?;
    let bn1 = nn::batch_norm2d(p / "bn1", inplanes, registry.batch_norm_config());

    let stage = |i: usize, inplanes: &mut i64| {
        make_layer(
            &(p / format!("layer{}", i + 1)),
            inplanes,
            STAGE_PLANES[i],
            config.layers[i],
            STAGE_STRIDES[i],
            registry,
        )
    };
    let layer1 = stage(0, &mut inplanes)?;
    let layer2 = stage(1, &mut inplanes)?;
    let layer3 = stage(2, &mut inplanes)?;

    Ok(ResNetFeatures {
        conv1,
        bn1,
        layer1,
        layer2,
        layer3,
        out_dim: inplanes,
    })
}

impl ResNetFeatures {
    pub fn blocks(&self) -> impl Iterator<Item = &BasicBlock> {
        self.layer1
            .iter()
            .chain(self.layer2.iter())
            .chain(self.layer3.iter())
    }

    /// Like `forward_t`, but every block checks its input channels first.
    pub fn checked_forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        check_channels("stem", xs, IN_CHANNELS)?;
        let mut out = xs.apply(&self.conv1).apply_t(&self.bn1, train).relu();
        for block in self.blocks() {
            out = block.checked_forward_t(&out, train)?;
        }
        Ok(pool_flatten(&out))
    }
}

impl ModuleT for ResNetFeatures {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        let mut out = xs.apply(&self.conv1).apply_t(&self.bn1, train).relu();
        for block in self.blocks() {
            out = block.forward_t(&out, train);
        }
        pool_flatten(&out)
    }
}

fn pool_flatten(xs: &Tensor) -> Tensor {
    let pooled = xs.adaptive_avg_pool2d([1, 1]);
    let batch = pooled.size()[0];
    pooled.view([batch, -1])
}

#[derive(Debug)]
pub struct CifarResNet {
    pub features: ResNetFeatures,
    pub fc: nn::Linear,
    pub config: ResNetConfig,
}

/// Parameter names follow the usual `conv1` / `layerN.i.*` / `fc` state-dict layout.
pub fn cifar_resnet(
    p: &nn::Path,
    config: ResNetConfig,
    registry: &InitRegistry,
) -> Result<CifarResNet> {
    if config.num_classes < 1 {
        return Err(Error::InvalidArgument(format!(
            "num_classes must be positive, got {}",
            config.num_classes
        )));
    }
    let features = resnet_features(p, &config, registry)?;
    let fc = nn::linear(
        p / "fc",
        features.out_dim,
        config.num_classes,
        registry.linear_config(),
    );
    Ok(CifarResNet {
        features,
        fc,
        config,
    })
}

impl CifarResNet {
    pub fn checked_forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        Ok(self.features.checked_forward_t(xs, train)?.apply(&self.fc))
    }
}

impl ModuleT for CifarResNet {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        self.features.forward_t(xs, train).apply(&self.fc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::nn::VarStore;
    use tch::{Device, Kind};

    #[test]
    fn resnet20_logits_shape() -> anyhow::Result<()> {
        let vs = VarStore::new(Device::Cpu);
        let net = cifar_resnet(
            &vs.root(),
            ResNetConfig::resnet20(100),
            &InitRegistry::default(),
        )?;
        for n in [1, 3] {
            let xs = Tensor::randn([n, 3, 32, 32], (Kind::Float, Device::Cpu));
            assert_eq!(net.checked_forward_t(&xs, false)?.size(), vec![n, 100]);
            assert_eq!(net.forward_t(&xs, true).size(), vec![n, 100]);
        }
        Ok(())
    }

    #[test]
    fn only_stage_entries_project() -> anyhow::Result<()> {
        let vs = VarStore::new(Device::Cpu);
        let net = cifar_resnet(&vs.root(), ResNetConfig::default(), &InitRegistry::default())?;
        let projecting: Vec<_> = net
            .features
            .blocks()
            .map(|b| b.downsample.is_some())
            .collect();
        assert_eq!(
            projecting,
            vec![false, false, false, true, false, false, true, false, false]
        );
        assert_eq!(net.features.out_dim, 64);
        Ok(())
    }

    #[test]
    fn state_dict_names() -> anyhow::Result<()> {
        let vs = VarStore::new(Device::Cpu);
        let _net = cifar_resnet(&vs.root(), ResNetConfig::default(), &InitRegistry::default())?;
        let vars = vs.variables();
        for name in [
            "conv1.weight",
            "bn1.running_mean",
            "layer1.2.conv2.weight",
            "layer2.0.downsample.0.weight",
            "layer3.0.downsample.1.bias",
            "fc.weight",
            "fc.bias",
        ] {
            assert!(vars.contains_key(name), "missing {name}");
        }
        assert!(!vars.contains_key("conv1.bias"));
        assert_eq!(vars["fc.weight"].size(), vec![100, 64]);
        Ok(())
    }

    #[test]
    fn uneven_stage_counts() -> anyhow::Result<()> {
        let vs = VarStore::new(Device::Cpu);
        let config = ResNetConfig {
            layers: [1, 2, 1],
            num_classes: 7,
        };
        let net = cifar_resnet(&vs.root(), config, &InitRegistry::default())?;
        assert_eq!(net.features.blocks().count(), 4);
        let xs = Tensor::zeros([2, 3, 32, 32], (Kind::Float, Device::Cpu));
        assert_eq!(net.forward_t(&xs, false).size(), vec![2, 7]);
        Ok(())
    }

    #[test]
    fn empty_stage_is_rejected() {
        let vs = VarStore::new(Device::Cpu);
        let config = ResNetConfig {
            layers: [3, 0, 3],
            num_classes: 10,
        };
        assert!(cifar_resnet(&vs.root(), config, &InitRegistry::default()).is_err());
    }

    #[test]
    fn conv_weights_are_scaled_by_fan_out() -> anyhow::Result<()> {
        tch::manual_seed(7);
        let vs = VarStore::new(Device::Cpu);
        let _net = cifar_resnet(&vs.root(), ResNetConfig::default(), &InitRegistry::default())?;
        let ws = &vs.variables()["layer3.1.conv1.weight"];
        // fan_out = 64 * 3 * 3, std = sqrt(2 / fan_out) ~ 0.059
        let std = ws.std(true).double_value(&[]);
        assert!((std - (2.0f64 / 576.0).sqrt()).abs() < 0.01, "std {std}");
        Ok(())
    }
}
