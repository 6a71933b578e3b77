use std::collections::BTreeMap;

use tch::nn;
use tch::nn::init::{FanInOut, NonLinearity, NormalOrUniform};
use tch::nn::Init;

/// The kinds of parameterised operator the network is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OpKind {
    Conv,
    BatchNorm,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InitPolicy {
    /// He-normal on the output fan, gain tuned for ReLU.
    KaimingFanOut,
    /// Constant scale and shift (normalisation layers).
    ScaleShift { scale: f64, shift: f64 },
    /// Whatever `tch` does for the layer out of the box.
    LibraryDefault,
}

/// Operator kind -> initialiser policy. Layer constructors ask this for their config instead
/// of anyone walking the module tree afterwards.
#[derive(Debug, Clone)]
pub struct InitRegistry {
    policies: BTreeMap<OpKind, InitPolicy>,
}

impl Default for InitRegistry {
    fn default() -> Self {
        let policies = BTreeMap::from([
            (OpKind::Conv, InitPolicy::KaimingFanOut),
            (
                OpKind::BatchNorm,
                InitPolicy::ScaleShift {
                    scale: 1.0,
                    shift: 0.0,
                },
            ),
            (OpKind::Linear, InitPolicy::LibraryDefault),
        ]);
        Self { policies }
    }
}

impl InitRegistry {
    pub fn with_policy(mut self, kind: OpKind, policy: InitPolicy) -> Self {
        self.policies.insert(kind, policy);
        self
    }

    pub fn policy(&self, kind: OpKind) -> InitPolicy {
        self.policies
            .get(&kind)
            .copied()
            .unwrap_or(InitPolicy::LibraryDefault)
    }

    pub fn conv_config(&self, stride: i64, padding: i64) -> nn::ConvConfig {
        let mut config = nn::ConvConfig {
            stride,
            padding,
            bias: false,
            ..Default::default()
        };
        match self.policy(OpKind::Conv) {
            InitPolicy::KaimingFanOut => config.ws_init = kaiming_fan_out(),
            InitPolicy::ScaleShift { scale, .. } => config.ws_init = Init::Const(scale),
            InitPolicy::LibraryDefault => {}
        }
        config
    }

    pub fn batch_norm_config(&self) -> nn::BatchNormConfig {
        let mut config = nn::BatchNormConfig::default();
        match self.policy(OpKind::BatchNorm) {
            InitPolicy::ScaleShift { scale, shift } => {
                config.ws_init = Init::Const(scale);
                config.bs_init = Init::Const(shift);
            }
            InitPolicy::KaimingFanOut => config.ws_init = kaiming_fan_out(),
            InitPolicy::LibraryDefault => {}
        }
        config
    }

    pub fn linear_config(&self) -> nn::LinearConfig {
        let mut config = nn::LinearConfig::default();
        match self.policy(OpKind::Linear) {
            InitPolicy::KaimingFanOut => config.ws_init = kaiming_fan_out(),
            InitPolicy::ScaleShift { scale, shift } => {
                config.ws_init = Init::Const(scale);
                config.bs_init = Some(Init::Const(shift));
            }
            InitPolicy::LibraryDefault => {}
        }
        config
    }
}

fn kaiming_fan_out() -> Init {
    Init::Kaiming {
        dist: NormalOrUniform::Normal,
        fan: FanInOut::FanOut,
        non_linearity: NonLinearity::ReLU,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_covers_every_kind() {
        let registry = InitRegistry::default();
        assert_eq!(registry.policy(OpKind::Conv), InitPolicy::KaimingFanOut);
        assert_eq!(
            registry.policy(OpKind::BatchNorm),
            InitPolicy::ScaleShift {
                scale: 1.0,
                shift: 0.0
            }
        );
        assert_eq!(registry.policy(OpKind::Linear), InitPolicy::LibraryDefault);
    }

    #[test]
    fn conv_config_is_bias_free() {
        let config = InitRegistry::default().conv_config(2, 1);
        assert!(!config.bias);
        assert_eq!(config.stride, 2);
        assert_eq!(config.padding, 1);
    }

    #[test]
    fn overridden_policy_reaches_the_layer() {
        use tch::nn::VarStore;
        use tch::{Device, Kind};

        let registry = InitRegistry::default().with_policy(
            OpKind::Linear,
            InitPolicy::ScaleShift {
                scale: 0.5,
                shift: -1.0,
            },
        );
        let vs = VarStore::new(Device::Cpu);
        let lin = nn::linear(vs.root() / "fc", 4, 2, registry.linear_config());
        assert_eq!(lin.ws.sum(Kind::Float).double_value(&[]), 4.0);
        let bs = lin.bs.as_ref().map(|b| b.sum(Kind::Float).double_value(&[]));
        assert_eq!(bs, Some(-2.0));
    }
}
