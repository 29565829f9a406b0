use crate::error::ParseKindError;
use crate::model::UNetConfig;
use burn::config::Config;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 损失函数.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossFunction {
    /// 数值稳定的 sigmoid 二元交叉熵, 直接作用于 logits.
    #[default]
    BceWithLogits,

    /// 软 Dice 损失.
    Dice,

    /// 二元交叉熵与软 Dice 之和.
    BceDice,
}

impl LossFunction {
    const NAMES: &'static str = "bce_with_logits, dice, bce_dice";

    /// 名称.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::BceWithLogits => "bce_with_logits",
            Self::Dice => "dice",
            Self::BceDice => "bce_dice",
        }
    }
}

impl fmt::Display for LossFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for LossFunction {
    type Err = ParseKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bce_with_logits" => Ok(Self::BceWithLogits),
            "dice" => Ok(Self::Dice),
            "bce_dice" => Ok(Self::BceDice),
            _ => Err(ParseKindError {
                value: s.to_string(),
                expected: Self::NAMES,
            }),
        }
    }
}

/// 优化器.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerKind {
    /// Adam.
    #[default]
    Adam,

    /// 随机梯度下降.
    Sgd,
}

impl OptimizerKind {
    const NAMES: &'static str = "adam, sgd";

    /// 名称.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Adam => "adam",
            Self::Sgd => "sgd",
        }
    }
}

impl fmt::Display for OptimizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for OptimizerKind {
    type Err = ParseKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "adam" => Ok(Self::Adam),
            "sgd" => Ok(Self::Sgd),
            _ => Err(ParseKindError {
                value: s.to_string(),
                expected: Self::NAMES,
            }),
        }
    }
}

/// 验证损失停滞时降低学习率. 语义为 `min` 模式, 相对门限.
#[derive(Config, Debug, PartialEq)]
pub struct PlateauConfig {
    /// 学习率的缩放因子.
    #[config(default = 0.1)]
    pub factor: f64,

    /// 允许连续多少个 epoch 没有改善.
    #[config(default = 10)]
    pub patience: usize,

    /// 相对改善门限: 新值须小于 `best * (1 - threshold)` 才算改善.
    #[config(default = 1e-4)]
    pub threshold: f64,

    /// 降低学习率后暂停计数的 epoch 数.
    #[config(default = 0)]
    pub cooldown: usize,

    /// 学习率下限.
    #[config(default = 0.0)]
    pub min_lr: f64,

    /// 新旧学习率之差小于该值时不再更新.
    #[config(default = 1e-8)]
    pub eps: f64,
}

/// 训练参数. 与模型结构参数一并保存为产物目录下的 `config.json`.
#[derive(Config, Debug)]
pub struct TrainingConfig {
    /// 模型结构.
    #[config(default = "UNetConfig::new()")]
    pub model: UNetConfig,

    /// 损失函数.
    #[config(default = "LossFunction::BceWithLogits")]
    pub loss: LossFunction,

    /// 优化器.
    #[config(default = "OptimizerKind::Adam")]
    pub optimizer: OptimizerKind,

    /// 初始学习率.
    #[config(default = 1e-3)]
    pub learning_rate: f64,

    /// 训练轮数.
    #[config(default = 20)]
    pub num_epochs: usize,

    /// 批大小.
    #[config(default = 4)]
    pub batch_size: usize,

    /// 数据加载线程数.
    #[config(default = 2)]
    pub num_workers: usize,

    /// 随机种子.
    #[config(default = 42)]
    pub seed: u64,

    /// 验证集所占的体数据比例.
    #[config(default = 0.2)]
    pub validation_fraction: f64,

    /// 全背景切片的保留比例.
    #[config(default = 1.0)]
    pub background_keep_ratio: f64,

    /// 每隔多少步输出一次训练损失.
    #[config(default = 50)]
    pub log_interval: usize,

    /// 学习率调度.
    #[config(default = "PlateauConfig::new()")]
    pub plateau: PlateauConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_kinds() {
        for loss in [LossFunction::BceWithLogits, LossFunction::Dice, LossFunction::BceDice] {
            assert_eq!(loss.name().parse::<LossFunction>().unwrap(), loss);
        }
        assert_eq!("sgd".parse::<OptimizerKind>().unwrap(), OptimizerKind::Sgd);
        let err = "focal".parse::<LossFunction>().unwrap_err();
        assert_eq!(err.value, "focal");
    }

    #[test]
    fn test_training_config_json() {
        let config = TrainingConfig::new()
            .with_loss(LossFunction::BceDice)
            .with_model(UNetConfig::new().with_encoder_channels(vec![8, 16]));
        let path = std::env::temp_dir().join(format!("ct-contour-config-{}.json", std::process::id()));
        config.save(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"bce_dice\""));

        let back = TrainingConfig::load(&path).unwrap();
        assert_eq!(back.loss, LossFunction::BceDice);
        assert_eq!(back.model, config.model);
        assert_eq!(back.plateau, PlateauConfig::new());
        assert_eq!(back.learning_rate, 1e-3);
        std::fs::remove_file(&path).unwrap();
    }
}
