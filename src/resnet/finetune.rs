use std::collections::BTreeMap;
use std::path::Path;

use log::{debug, info};
use tch::nn::{self, ModuleT, VarStore};
use tch::{Device, Tensor};

use crate::error::Result;
use crate::resnet::backbone::{cifar_resnet, resnet_features, ResNetConfig, ResNetFeatures};
use crate::resnet::init::InitRegistry;
use crate::weights::{load_strict, read_named, write_named, NamedTensors, WeightSource};

pub const PRETRAINED_CLASSES: i64 = 100;
pub const TARGET_CLASSES: i64 = 10;

const BACKBONE: &str = "backbone";
const HEAD: &str = "fc";

/// Pretrained ResNet-20 body with a fresh 10-way linear head.
///
/// The body and the head live in separate var stores: the body's is frozen and never handed to
/// an optimizer, the head's is the only thing training touches.
#[derive(Debug)]
pub struct FineTunedResNet {
    backbone_vs: VarStore,
    head_vs: VarStore,
    pub backbone: ResNetFeatures,
    pub fc: nn::Linear,
}

impl FineTunedResNet {
    /// Builds the 100-class source network, loads `source` into it strictly, keeps everything
    /// before its classifier and attaches a new head.
    pub fn from_pretrained(source: &dyn WeightSource, device: Device) -> Result<Self> {
        let registry = InitRegistry::default();

        let source_vs = VarStore::new(device);
        let pretrained = cifar_resnet(
            &source_vs.root(),
            ResNetConfig::resnet20(PRETRAINED_CLASSES),
            &registry,
        )?;
        load_strict(&source.fetch()?, &sorted(&source_vs))?;
        info!(
            "loaded pretrained backbone ({} tensors)",
            source_vs.variables().len()
        );

        let model = Self::untrained(device, &pretrained.config, &registry)?;

        // Everything but the source classifier moves over; `fc.*` stays behind with `source_vs`.
        let carried: NamedTensors = source_vs
            .variables()
            .into_iter()
            .filter(|(name, _)| !name.starts_with("fc."))
            .map(|(name, t)| (format!("{BACKBONE}.{name}"), t))
            .collect();
        load_strict(&carried, &sorted(&model.backbone_vs))?;
        Ok(model)
    }

    /// Same module graph with random weights everywhere; a checkpoint is expected to follow.
    pub fn untrained(
        device: Device,
        config: &ResNetConfig,
        registry: &InitRegistry,
    ) -> Result<Self> {
        let backbone_vs = VarStore::new(device);
        let head_vs = VarStore::new(device);
        let backbone = resnet_features(&(backbone_vs.root() / BACKBONE), config, registry)?;
        let fc = nn::linear(
            head_vs.root() / HEAD,
            config.feature_dim(),
            TARGET_CLASSES,
            registry.linear_config(),
        );
        let mut model = Self {
            backbone_vs,
            head_vs,
            backbone,
            fc,
        };
        model.freeze_backbone();
        Ok(model)
    }

    fn freeze_backbone(&mut self) {
        self.backbone_vs.freeze();
        for (_, var) in self.backbone_vs.variables() {
            let _ = var.set_requires_grad(false);
        }
        debug!(
            "froze {} backbone tensors",
            self.backbone_vs.variables().len()
        );
    }

    /// The var store an optimizer should be built over.
    pub fn head_var_store(&self) -> &VarStore {
        &self.head_vs
    }

    pub fn device(&self) -> Device {
        self.head_vs.device()
    }

    /// Every variable of the model, body and head, including batch-norm running statistics.
    pub fn named_variables(&self) -> BTreeMap<String, Tensor> {
        let mut vars = sorted(&self.backbone_vs);
        vars.extend(sorted(&self.head_vs));
        vars
    }

    pub fn trainable_parameter_count(&self) -> usize {
        self.named_variables()
            .values()
            .filter(|t| t.requires_grad())
            .map(|t| t.numel())
            .sum()
    }

    pub fn head_parameter_count(&self) -> usize {
        sorted(&self.head_vs).values().map(|t| t.numel()).sum()
    }

    pub fn checked_forward(&self, xs: &Tensor) -> Result<Tensor> {
        let features = self.backbone.checked_forward_t(xs, false)?;
        Ok(features.apply(&self.fc))
    }

    pub fn save_checkpoint(&self, path: &Path) -> Result<()> {
        let named: NamedTensors = self.named_variables().into_iter().collect();
        write_named(&named, path)?;
        info!("saved checkpoint to {}", path.display());
        Ok(())
    }

    pub fn load_checkpoint(&mut self, path: &Path) -> Result<()> {
        load_strict(&read_named(path)?, &self.named_variables())?;
        info!("restored checkpoint from {}", path.display());
        Ok(())
    }
}

impl ModuleT for FineTunedResNet {
    /// The body always runs in evaluation mode: its running statistics are part of the frozen
    /// state and must not drift while the head trains.
    fn forward_t(&self, xs: &Tensor, _train: bool) -> Tensor {
        self.backbone.forward_t(xs, false).apply(&self.fc)
    }
}

fn sorted(vs: &VarStore) -> BTreeMap<String, Tensor> {
    vs.variables().into_iter().collect()
}
