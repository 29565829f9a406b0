//! 损失函数. 输入均为 logits `[N, C, H, W]` 与同形状的 `{0, 1}` 目标.

use super::LossFunction;
use burn::tensor::activation::sigmoid;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

/// 软 Dice 的平滑项.
const DICE_SMOOTH: f64 = 1.0;

/// `mean(max(x, 0) - x * y + ln(1 + e^(-|x|)))`.
pub fn bce_with_logits<B: Backend>(logits: Tensor<B, 4>, targets: Tensor<B, 4>) -> Tensor<B, 1> {
    let positive = logits.clone().clamp_min(0.0);
    let log_term = logits.clone().abs().neg().exp().log1p();
    (positive - logits * targets + log_term).mean()
}

/// `1 - (2 * sum(p * y) + s) / (sum(p) + sum(y) + s)`, `p = sigmoid(x)`.
pub fn soft_dice<B: Backend>(logits: Tensor<B, 4>, targets: Tensor<B, 4>) -> Tensor<B, 1> {
    let probs = sigmoid(logits);
    let intersection = (probs.clone() * targets.clone()).sum();
    let denominator = probs.sum() + targets.sum();
    let score = intersection
        .mul_scalar(2.0)
        .add_scalar(DICE_SMOOTH)
        .div(denominator.add_scalar(DICE_SMOOTH));
    score.neg().add_scalar(1.0)
}

impl LossFunction {
    /// 计算批次的标量损失.
    pub fn compute<B: Backend>(&self, logits: Tensor<B, 4>, targets: Tensor<B, 4>) -> Tensor<B, 1> {
        match self {
            Self::BceWithLogits => bce_with_logits(logits, targets),
            Self::Dice => soft_dice(logits, targets),
            Self::BceDice => {
                bce_with_logits(logits.clone(), targets.clone()) + soft_dice(logits, targets)
            }
        }
    }
}
