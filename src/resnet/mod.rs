pub mod backbone;
pub mod block;
pub mod conv;
pub mod finetune;
pub mod init;

pub use backbone::{
    cifar_resnet, resnet_features, CifarResNet, ResNetConfig, ResNetFeatures, IN_CHANNELS,
};
pub use block::{check_channels, BasicBlock, Downsample};
pub use conv::{conv1x1, conv3x3};
pub use finetune::{FineTunedResNet, PRETRAINED_CLASSES, TARGET_CLASSES};
pub use init::{InitPolicy, InitRegistry, OpKind};
