//! 分割掩码到病人坐标系轮廓的转换.
//!
//! 每张切片的掩码先经过可选的后处理, 然后用 Moore 邻域追踪提取每个 8-连通前景区域
//! 的外边界, 最后把边界像素映射为病人坐标 `[x, y, z]`.

use crate::consts::MIN_CONTOUR_POINTS;
use crate::dicom::PixelGrid;
use crate::error::{Error, Result};
use crate::{Idx2d, MaskSlice};
use dicom_object::InMemDicomObject;
use serde::{Deserialize, Serialize};

/// 单张切片上的所有轮廓. 每条轮廓展开为 `[x1, y1, z1, x2, y2, z2, ...]`.
pub type SliceStructure = Vec<Vec<f64>>;

/// 轮廓提取前的掩码后处理.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostProcess {
    /// 填充前景内部的背景空洞.
    pub fill_holes: bool,

    /// 仅保留最大的前景区域.
    pub keep_largest: bool,

    /// 少于该点数的轮廓被丢弃.
    pub min_points: usize,
}

impl Default for PostProcess {
    fn default() -> Self {
        Self {
            fill_holes: false,
            keep_largest: false,
            min_points: MIN_CONTOUR_POINTS,
        }
    }
}

/// 提取掩码中每个前景区域的外边界 (像素索引), 顺序与区域的行优先首像素一致.
pub fn mask_contours(mask: MaskSlice, post: &PostProcess) -> Vec<Vec<Idx2d>> {
    let contours = if post.fill_holes || post.keep_largest {
        let mut owned = mask.to_owned();
        if post.keep_largest {
            owned.keep_largest();
        }
        if post.fill_holes {
            owned.fill_background_hollow();
        }
        owned.outer_contours()
    } else {
        mask.outer_contours()
    };
    contours
        .into_iter()
        .filter(|c| c.len() >= post.min_points)
        .collect()
}

/// 经 `grid` 将像素轮廓映射为病人坐标, 并展开为扁平序列.
pub fn contours_to_structure(grid: &PixelGrid, contours: &[Vec<Idx2d>]) -> SliceStructure {
    contours
        .iter()
        .map(|c| c.iter().flat_map(|p| grid.to_patient(*p)).collect())
        .collect()
}

/// 把 CT 切片 `image` 上的预测掩码 `mask` 转换为该切片的轮廓结构.
///
/// 掩码形状必须与切片的 `Rows x Columns` 一致, 否则返回 [`Error::ShapeMismatch`].
pub fn predict_to_structure(
    image: &InMemDicomObject,
    mask: MaskSlice,
    post: &PostProcess,
) -> Result<SliceStructure> {
    let grid = PixelGrid::from_object(image)?;
    if grid.shape() != mask.shape() {
        return Err(Error::ShapeMismatch {
            expected: grid.shape(),
            found: mask.shape(),
        });
    }
    Ok(contours_to_structure(&grid, &mask_contours(mask, post)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dicom::testing::ct_slice;
    use ndarray::{array, Array2};

    #[test]
    fn test_small_contours_dropped() {
        let a = array![[1u8, 0, 0, 0], [0, 0, 1, 1], [0, 0, 1, 1]];
        let c = mask_contours(MaskSlice::new(a.view()), &PostProcess::default());
        assert_eq!(c, vec![vec![(1, 2), (1, 3), (2, 3), (2, 2)]]);

        let keep_all = PostProcess {
            min_points: 1,
            ..Default::default()
        };
        assert_eq!(mask_contours(MaskSlice::new(a.view()), &keep_all).len(), 2);
    }

    #[test]
    fn test_keep_largest() {
        let mut a = Array2::<u8>::zeros((8, 8));
        a.slice_mut(ndarray::s![0..2, 0..2]).fill(1);
        a.slice_mut(ndarray::s![4..8, 4..8]).fill(1);
        let post = PostProcess {
            keep_largest: true,
            ..Default::default()
        };
        let c = mask_contours(MaskSlice::new(a.view()), &post);
        assert_eq!(c.len(), 1);
        assert_eq!(c[0][0], (4, 4));
        // 原掩码保持不变.
        assert_eq!(a[(0, 0)], 1);
    }

    #[test]
    fn test_predict_to_structure() {
        let image = ct_slice("1.2.3.1", 1, 7.5, (4, 4), 0);
        let mut a = Array2::<u8>::zeros((4, 4));
        a.slice_mut(ndarray::s![1..3, 1..3]).fill(1);
        let s = predict_to_structure(&image, MaskSlice::new(a.view()), &PostProcess::default())
            .unwrap();
        // 原点 (-10, -20), 行间距 0.5, 列间距 0.75.
        assert_eq!(
            s,
            vec![vec![
                -9.25, -19.5, 7.5, //
                -8.5, -19.5, 7.5, //
                -8.5, -19.0, 7.5, //
                -9.25, -19.0, 7.5,
            ]]
        );

        let wrong = Array2::<u8>::zeros((3, 4));
        assert!(matches!(
            predict_to_structure(&image, MaskSlice::new(wrong.view()), &PostProcess::default()),
            Err(Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_empty_mask() {
        let image = ct_slice("1.2.3.1", 1, 0.0, (4, 4), 0);
        let a = Array2::<u8>::zeros((4, 4));
        let s = predict_to_structure(&image, MaskSlice::new(a.view()), &PostProcess::default())
            .unwrap();
        assert!(s.is_empty());
    }
}
