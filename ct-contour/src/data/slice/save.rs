//! 图像的持久化存储.

use crate::{CtWindow, Mask, MaskSlice, ScanSlice};
use image::{GrayImage, ImageResult, Luma, Rgb, RgbImage};
use ndarray::Data;
use std::path::Path;

/// 表明一个可以通过 **可视化友好** 模式持久化存储的图像对象.
///
/// 对于 [`Mask`] 这类仅存在 0, 1 像素值的图像, 保存时背景映射为黑色,
/// 前景映射为白色; 对于以 CT HU 值存储的 `ScanSlice`,
/// 保存时用软组织窗口规范化.
pub trait ImgWriteVis {
    /// 按照一定的可视化规则将图片保存到 `path` 路径.
    fn save<P: AsRef<Path>>(&self, path: P) -> ImageResult<()>;
}

/// 表明一个可以通过 **按原样** 模式持久化存储的图像对象.
pub trait ImgWriteRaw {
    /// 按原样将图片保存到 `path` 路径.
    fn save_raw<P: AsRef<Path>>(&self, path: P) -> ImageResult<()>;
}

/// 使像素更有利于单通道可视化.
#[inline]
pub(crate) fn pretty(label: u8) -> u8 {
    use crate::consts::gray::*;
    match label {
        MASK_BACKGROUND => BLACK,
        _ => WHITE,
    }
}

fn mask_image<S: Data<Elem = u8>>(mask: &Mask<S>, pixel: fn(u8) -> u8) -> GrayImage {
    let (height, width) = mask.shape();
    GrayImage::from_fn(width as u32, height as u32, |w, h| {
        Luma([pixel(mask[(h as usize, w as usize)])])
    })
}

/// 背景/前景分别映射为黑色/白色.
impl<S: Data<Elem = u8>> ImgWriteVis for Mask<S> {
    fn save<P: AsRef<Path>>(&self, path: P) -> ImageResult<()> {
        mask_image(self, pretty).save(path)
    }
}

impl<S: Data<Elem = u8>> ImgWriteRaw for Mask<S> {
    fn save_raw<P: AsRef<Path>>(&self, path: P) -> ImageResult<()> {
        mask_image(self, |p| p).save(path)
    }
}

/// 用软组织窗 (窗位 40, 窗宽 400) 渲染.
impl ImgWriteVis for ScanSlice<'_> {
    fn save<P: AsRef<Path>>(&self, path: P) -> ImageResult<()> {
        CtWindow::from_soft_tissue().render(self).save(path)
    }
}

/// 将 `mask` 的前景以半透明红色叠加在经 `window` 规范化的 `scan` 上, 保存为 RGB 图像.
///
/// 两者形状必须一致, 否则程序 panic.
pub fn save_overlay<P: AsRef<Path>>(
    scan: &ScanSlice,
    mask: &MaskSlice,
    window: CtWindow,
    path: P,
) -> ImageResult<()> {
    assert_eq!(scan.shape(), mask.shape(), "扫描和掩码形状不一致");
    let gray = window.render(scan);
    let buf = RgbImage::from_fn(gray.width(), gray.height(), |w, h| {
        let g = gray.get_pixel(w, h).0[0];
        if crate::consts::gray::is_foreground(mask[(h as usize, w as usize)]) {
            Rgb([g / 2 + 128, g / 2, g / 2])
        } else {
            Rgb([g, g, g])
        }
    });
    buf.save(path)
}
