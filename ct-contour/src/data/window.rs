//! CT 窗口与预览渲染.

use image::GrayImage;

use crate::ScanSlice;

/// CT 窗口: 把 HU 值线性映射到 8 位灰度, 窗外截断.
///
/// 窗口只用于预览图. 模型输入使用 [`crate::normalize::ZScore`], 与窗口无关.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CtWindow {
    level: f32,
    width: f32,
}

impl CtWindow {
    /// 构建 CT 窗.
    ///
    /// `level` 和 `width` 必须在合理范围内, 否则返回 `None`.
    pub fn new(level: f32, width: f32) -> Option<CtWindow> {
        let valid = (-1e5..=1e5).contains(&level) && width > 0.0 && width <= 1e5;
        valid.then_some(Self { level, width })
    }

    /// 腹部软组织窗: 窗位 40, 窗宽 400.
    #[inline]
    pub const fn from_soft_tissue() -> CtWindow {
        Self {
            level: 40.0,
            width: 400.0,
        }
    }

    /// 肝脏窗: 窗位 60, 窗宽 200.
    #[inline]
    pub const fn from_liver_visual() -> CtWindow {
        Self {
            level: 60.0,
            width: 200.0,
        }
    }

    /// 窗口下界 (HU).
    #[inline]
    pub fn lower_bound(&self) -> f32 {
        self.level - self.width / 2.0
    }

    /// 窗口上界 (HU).
    #[inline]
    pub fn upper_bound(&self) -> f32 {
        self.level + self.width / 2.0
    }

    /// 求 `hu` 对应的灰度 (0 <= value <= 255). `hu` 为 NaN 或无穷时返回 `None`.
    pub fn eval(&self, hu: f32) -> Option<u8> {
        if !hu.is_finite() {
            return None;
        }
        let t = ((hu - self.lower_bound()) / self.width).clamp(0.0, 1.0);
        Some((t * 255.0) as u8)
    }

    /// 以该窗口渲染整张扫描切片. 无效的 HU 值渲染为黑色.
    pub fn render(&self, scan: &ScanSlice) -> GrayImage {
        let (height, width) = scan.shape();
        GrayImage::from_fn(width as u32, height as u32, |w, h| {
            image::Luma([self.eval(scan[(h as usize, w as usize)]).unwrap_or(0)])
        })
    }
}
