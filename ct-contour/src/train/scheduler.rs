use super::PlateauConfig;

/// 验证损失停滞时按比例降低学习率. 每个 epoch 调用一次 [`step`](Self::step).
#[derive(Clone, Debug)]
pub struct ReduceLrOnPlateau {
    config: PlateauConfig,
    lr: f64,
    best: f64,
    num_bad_epochs: usize,
    cooldown_counter: usize,
}

impl ReduceLrOnPlateau {
    /// 以初始学习率 `lr` 创建.
    pub fn new(config: PlateauConfig, lr: f64) -> Self {
        assert!(config.factor < 1.0, "缩放因子必须小于 1");
        Self {
            config,
            lr,
            best: f64::INFINITY,
            num_bad_epochs: 0,
            cooldown_counter: 0,
        }
    }

    /// 当前学习率.
    #[inline]
    pub fn lr(&self) -> f64 {
        self.lr
    }

    /// 目前最好的指标值.
    #[inline]
    pub fn best(&self) -> f64 {
        self.best
    }

    #[inline]
    fn is_better(&self, metric: f64) -> bool {
        metric < self.best * (1.0 - self.config.threshold)
    }

    /// 记录本 epoch 的指标 (越小越好), 返回更新后的学习率.
    pub fn step(&mut self, metric: f64) -> f64 {
        if self.is_better(metric) {
            self.best = metric;
            self.num_bad_epochs = 0;
        } else {
            self.num_bad_epochs += 1;
        }

        if self.cooldown_counter > 0 {
            self.cooldown_counter -= 1;
            self.num_bad_epochs = 0;
        }

        if self.num_bad_epochs > self.config.patience {
            let new_lr = (self.lr * self.config.factor).max(self.config.min_lr);
            if self.lr - new_lr > self.config.eps {
                log::info!("学习率 {:.3e} -> {:.3e}", self.lr, new_lr);
                self.lr = new_lr;
            }
            self.cooldown_counter = self.config.cooldown;
            self.num_bad_epochs = 0;
        }
        self.lr
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reduce_after_patience() {
        let mut s = ReduceLrOnPlateau::new(PlateauConfig::new().with_patience(2), 1.0);
        assert_eq!(s.step(1.0), 1.0);
        // 停滞 3 个 epoch 后 (超过耐心值 2) 才降低.
        assert_eq!(s.step(1.0), 1.0);
        assert_eq!(s.step(1.0), 1.0);
        assert!((s.step(1.0) - 0.1).abs() < 1e-12);
        assert_eq!(s.best(), 1.0);
    }

    #[test]
    fn test_relative_threshold() {
        let mut s = ReduceLrOnPlateau::new(
            PlateauConfig::new().with_patience(0).with_threshold(0.1),
            1.0,
        );
        s.step(1.0);
        // 0.95 > 1.0 * 0.9, 不算改善.
        assert!((s.step(0.95) - 0.1).abs() < 1e-12);
        // 0.5 < 1.0 * 0.9, 改善.
        assert!((s.step(0.5) - 0.1).abs() < 1e-12);
        assert_eq!(s.best(), 0.5);
    }

    #[test]
    fn test_cooldown_and_min_lr() {
        let mut s = ReduceLrOnPlateau::new(
            PlateauConfig::new()
                .with_patience(0)
                .with_cooldown(1)
                .with_min_lr(0.05),
            1.0,
        );
        s.step(1.0);
        assert!((s.step(2.0) - 0.1).abs() < 1e-12);
        // 冷却期内不计数.
        assert!((s.step(2.0) - 0.1).abs() < 1e-12);
        assert!((s.step(2.0) - 0.05).abs() < 1e-12);
        // 已到下限.
        s.step(2.0);
        assert!((s.step(2.0) - 0.05).abs() < 1e-12);
    }
}
