//! 二值掩码的重合度指标.

use crate::consts::gray::is_foreground;
use burn::tensor::activation::sigmoid;
use burn::tensor::backend::Backend;
use burn::tensor::{ElementConversion, Tensor};
use std::ops::AddAssign;

/// 预测与真值的像素计数.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct OverlapCounts {
    /// 预测与真值均为前景.
    pub true_positive: f64,

    /// 预测为前景, 真值为背景.
    pub false_positive: f64,

    /// 预测为背景, 真值为前景.
    pub false_negative: f64,
}

impl OverlapCounts {
    /// 统计两张 `{0, 1}` 掩码. 长度必须一致.
    pub fn from_masks(pred: &[u8], target: &[u8]) -> Self {
        assert_eq!(pred.len(), target.len(), "掩码长度不一致");
        let mut ans = Self::default();
        for (p, t) in pred.iter().zip(target) {
            match (is_foreground(*p), is_foreground(*t)) {
                (true, true) => ans.true_positive += 1.0,
                (true, false) => ans.false_positive += 1.0,
                (false, true) => ans.false_negative += 1.0,
                (false, false) => {}
            }
        }
        ans
    }

    /// 由 logits 以门限 `threshold` (作用于 sigmoid 概率) 二值化后统计.
    pub fn from_logits<B: Backend>(logits: Tensor<B, 4>, targets: Tensor<B, 4>, threshold: f32) -> Self {
        let pred = sigmoid(logits).greater_equal_elem(threshold).float();
        let tp: f64 = (pred.clone() * targets.clone()).sum().into_scalar().elem();
        let pred_sum: f64 = pred.sum().into_scalar().elem();
        let target_sum: f64 = targets.sum().into_scalar().elem();
        Self {
            true_positive: tp,
            false_positive: pred_sum - tp,
            false_negative: target_sum - tp,
        }
    }

    /// `2TP / (2TP + FP + FN)`. 预测与真值均为空时为 1.
    pub fn dice(&self) -> f64 {
        let denominator = 2.0 * self.true_positive + self.false_positive + self.false_negative;
        if denominator == 0.0 {
            1.0
        } else {
            2.0 * self.true_positive / denominator
        }
    }

    /// `TP / (TP + FP + FN)`. 预测与真值均为空时为 1.
    pub fn iou(&self) -> f64 {
        let denominator = self.true_positive + self.false_positive + self.false_negative;
        if denominator == 0.0 {
            1.0
        } else {
            self.true_positive / denominator
        }
    }
}

impl AddAssign for OverlapCounts {
    fn add_assign(&mut self, rhs: Self) {
        self.true_positive += rhs.true_positive;
        self.false_positive += rhs.false_positive;
        self.false_negative += rhs.false_negative;
    }
}

/// 两张 `{0, 1}` 掩码的 Dice 系数.
#[inline]
pub fn dice(pred: &[u8], target: &[u8]) -> f64 {
    OverlapCounts::from_masks(pred, target).dice()
}

/// 两张 `{0, 1}` 掩码的交并比.
#[inline]
pub fn iou(pred: &[u8], target: &[u8]) -> f64 {
    OverlapCounts::from_masks(pred, target).iou()
}
