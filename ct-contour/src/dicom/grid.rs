use super::{multi_f64_attr, usize_attr};
use crate::error::Result;
use crate::Idx2d;
use dicom_dictionary_std::tags;
use dicom_object::InMemDicomObject;

/// 切片像素网格到病人坐标系 (毫米) 的映射.
///
/// 像素 `(row, col)` 的中心位于
/// `origin + row_dir * col_spacing * col + col_dir * row_spacing * row`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PixelGrid {
    origin: [f64; 3],
    row_dir: [f64; 3],
    col_dir: [f64; 3],

    /// (相邻行间距, 相邻列间距), 即 DICOM `PixelSpacing` 的顺序.
    spacing: [f64; 2],
    rows: usize,
    cols: usize,
}

#[inline]
fn cross(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

#[inline]
fn dot(a: [f64; 3], b: [f64; 3]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

impl PixelGrid {
    /// 由各几何属性直接创建.
    pub fn new(
        origin: [f64; 3],
        orientation: [f64; 6],
        spacing: [f64; 2],
        (rows, cols): Idx2d,
    ) -> Self {
        let [rx, ry, rz, cx, cy, cz] = orientation;
        Self {
            origin,
            row_dir: [rx, ry, rz],
            col_dir: [cx, cy, cz],
            spacing,
            rows,
            cols,
        }
    }

    /// 从 CT 图像的 `ImagePositionPatient`, `ImageOrientationPatient`, `PixelSpacing`,
    /// `Rows`, `Columns` 属性构造.
    pub fn from_object(obj: &InMemDicomObject) -> Result<Self> {
        let origin = multi_f64_attr::<3>(obj, tags::IMAGE_POSITION_PATIENT, "ImagePositionPatient")?;
        let orientation =
            multi_f64_attr::<6>(obj, tags::IMAGE_ORIENTATION_PATIENT, "ImageOrientationPatient")?;
        let spacing = multi_f64_attr::<2>(obj, tags::PIXEL_SPACING, "PixelSpacing")?;
        let rows = usize_attr(obj, tags::ROWS, "Rows")?;
        let cols = usize_attr(obj, tags::COLUMNS, "Columns")?;
        Ok(Self::new(origin, orientation, spacing, (rows, cols)))
    }

    /// 像素网格形状 (行数, 列数).
    #[inline]
    pub fn shape(&self) -> Idx2d {
        (self.rows, self.cols)
    }

    /// 第一个像素中心的病人坐标.
    #[inline]
    pub fn origin(&self) -> [f64; 3] {
        self.origin
    }

    /// 像素 `(row, col)` 中心的病人坐标 `[x, y, z]`.
    pub fn to_patient(&self, (row, col): Idx2d) -> [f64; 3] {
        let (r, c) = (row as f64 * self.spacing[0], col as f64 * self.spacing[1]);
        std::array::from_fn(|i| self.origin[i] + self.row_dir[i] * c + self.col_dir[i] * r)
    }

    /// 切片平面的法向量.
    #[inline]
    pub fn normal(&self) -> [f64; 3] {
        cross(self.row_dir, self.col_dir)
    }

    /// 切片沿法向量的位置, 与切片内任一像素的选择无关.
    #[inline]
    pub fn location(&self) -> f64 {
        dot(self.origin, self.normal())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dicom::testing::ct_slice;

    #[test]
    fn test_axial_grid() {
        let obj = ct_slice("1.2.3.1", 1, 12.5, (4, 6), 0);
        let grid = PixelGrid::from_object(&obj).unwrap();
        assert_eq!(grid.shape(), (4, 6));
        assert_eq!(grid.origin(), [-10.0, -20.0, 12.5]);
        // 行间距 0.5, 列间距 0.75.
        assert_eq!(grid.to_patient((0, 0)), [-10.0, -20.0, 12.5]);
        assert_eq!(grid.to_patient((2, 4)), [-7.0, -19.0, 12.5]);
        assert_eq!(grid.normal(), [0.0, 0.0, 1.0]);
        assert_eq!(grid.location(), 12.5);
    }

    #[test]
    fn test_grid_after_file_round_trip() {
        let path = std::env::temp_dir().join(format!("grid-{}.dcm", std::process::id()));
        let obj = ct_slice("1.2.3.1", 1, -3.0, (4, 6), 0);
        obj.write_to_file(&path).unwrap();
        let read = dicom_object::open_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        let grid = PixelGrid::from_object(&read).unwrap();
        assert_eq!(grid, PixelGrid::from_object(&obj).unwrap());
        assert_eq!(grid.origin(), [-10.0, -20.0, -3.0]);
    }

    #[test]
    fn test_oblique_grid() {
        // 冠状位: 行方向为 +x, 列方向为 -z.
        let grid = PixelGrid::new(
            [0.0, 5.0, 100.0],
            [1.0, 0.0, 0.0, 0.0, 0.0, -1.0],
            [2.0, 1.0],
            (8, 8),
        );
        assert_eq!(grid.to_patient((3, 1)), [1.0, 5.0, 94.0]);
        assert_eq!(grid.normal(), [0.0, 1.0, 0.0]);
        assert_eq!(grid.location(), 5.0);
    }
}
