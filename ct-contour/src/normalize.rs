//! 强度标准化.
//!
//! 训练与推理使用同一规则: 以整个序列 (或整个 3D 体数据) 全部像素的均值和
//! 总体标准差做 z-score 标准化.

use crate::error::{Error, Result};

/// z-score 标准化参数.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ZScore {
    mean: f64,
    std: f64,
}

impl ZScore {
    /// 由 `values` 估计均值与总体标准差.
    ///
    /// 若 `values` 为空或标准差为零 (或非有限值), 返回 [`Error::ZeroVariance`].
    pub fn fit<'a, I: IntoIterator<Item = &'a f32>>(values: I) -> Result<Self> {
        // Welford 在线算法, 避免大体数据求平方和时的精度损失.
        let mut n = 0u64;
        let mut mean = 0.0f64;
        let mut m2 = 0.0f64;
        for &v in values {
            n += 1;
            let x = v as f64;
            let delta = x - mean;
            mean += delta / n as f64;
            m2 += delta * (x - mean);
        }
        if n == 0 {
            return Err(Error::ZeroVariance);
        }
        let std = (m2 / n as f64).sqrt();
        if !std.is_finite() || std <= f64::EPSILON {
            return Err(Error::ZeroVariance);
        }
        Ok(Self { mean, std })
    }

    /// 均值.
    #[inline]
    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// 总体标准差.
    #[inline]
    pub fn std(&self) -> f64 {
        self.std
    }

    /// 标准化单个值.
    #[inline]
    pub fn apply(&self, v: f32) -> f32 {
        ((v as f64 - self.mean) / self.std) as f32
    }
}
