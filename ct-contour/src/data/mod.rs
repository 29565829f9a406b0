use std::ops::Index;
use std::path::Path;

use ndarray::{Array3, ArrayD, ArrayView3, Axis, Ix3};
use nifti::{InMemNiftiObject, IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};

use crate::consts::gray::*;
use crate::error::{Error, Result};
use crate::Idx3d;

pub mod slice;
pub mod window;

pub use slice::{
    save_overlay, CompactMask, CompactScan, Connectivity, ImgWriteRaw, ImgWriteVis, Mask,
    MaskSlice, MaskSliceMut, OwnedMask, OwnedScanSlice, ScanSlice,
};

pub use window::CtWindow;

/// 可从 nifti 文件读出的体素类型.
pub trait Voxel: Copy {
    /// 把整个体数据转换为该类型, 形状为 nifti 原生的 (W, H, z).
    fn read_volume(obj: InMemNiftiObject) -> nifti::Result<ArrayD<Self>>;
}

impl Voxel for f32 {
    fn read_volume(obj: InMemNiftiObject) -> nifti::Result<ArrayD<f32>> {
        obj.into_volume().into_ndarray::<f32>()
    }
}

impl Voxel for u8 {
    fn read_volume(obj: InMemNiftiObject) -> nifti::Result<ArrayD<u8>> {
        obj.into_volume().into_ndarray::<u8>()
    }
}

/// 3D 体数据的 header 属性.
pub trait NiftiHeaderAttr {
    /// 获取 header 部分.
    fn header(&self) -> &NiftiHeader;

    /// 获取单个体素分辨率 (毫米), 依次为 z, 高, 宽.
    #[inline]
    fn pix_dim(&self) -> [f64; 3] {
        let [_, w, h, z, ..] = self.header().pixdim;
        [z as f64, h as f64, w as f64]
    }
}

/// nii 格式 3D 体数据. 数据按 (z, H, W) 存储, 原第一维向右增长, 原第二维向下增长.
///
/// `NiftiHeader` 较大, 放在堆上以便移动.
#[derive(Debug, Clone)]
pub struct NiftiVolume<T> {
    header: Box<NiftiHeader>,
    data: Array3<T>,
}

/// 3D CT 扫描, 以 `f32` 保存 HU 值.
pub type CtScan = NiftiVolume<f32>;

/// 3D CT 标注, 以 `u8` 保存标签.
pub type CtLabel = NiftiVolume<u8>;

impl<T> NiftiHeaderAttr for NiftiVolume<T> {
    #[inline]
    fn header(&self) -> &NiftiHeader {
        &self.header
    }
}

impl<T> Index<Idx3d> for NiftiVolume<T> {
    type Output = T;

    #[inline]
    fn index(&self, index: Idx3d) -> &T {
        &self.data[index]
    }
}

impl<T: Voxel> NiftiVolume<T> {
    /// 打开 nii 文件. 非三维数据返回 [`Error::VolumeLayout`].
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let obj = ReaderOptions::new().read_file(path.as_ref())?;
        let header = Box::new(obj.header().clone());
        let data = T::read_volume(obj)?
            .into_dimensionality::<Ix3>()?
            .permuted_axes([2, 1, 0]);
        Ok(Self {
            header,
            data: data.as_standard_layout().into_owned(),
        })
    }

    /// 从按 (z, H, W) 组织的数据创建体数据. 体素分辨率按 (W, H, z) 给出.
    pub fn from_array(data: Array3<T>, pix_dim: [f32; 3]) -> Self {
        let (z, h, w) = data.dim();
        let mut header = Box::<NiftiHeader>::default();
        header.dim = [3, w as u16, h as u16, z as u16, 1, 1, 1, 1];
        header.pixdim[1..4].copy_from_slice(&pix_dim);
        Self { header, data }
    }

    /// 数据形状 (z, H, W).
    #[inline]
    pub fn shape(&self) -> Idx3d {
        self.data.dim()
    }

    /// 水平切片个数.
    #[inline]
    pub fn len_z(&self) -> usize {
        self.data.len_of(Axis(0))
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView3<'_, T> {
        self.data.view()
    }
}

impl CtScan {
    /// 按升序迭代水平切片.
    #[inline]
    pub fn slice_iter(&self) -> impl ExactSizeIterator<Item = ScanSlice> {
        self.data.axis_iter(Axis(0)).map(ScanSlice::new)
    }
}

impl CtLabel {
    /// 按升序迭代水平切片.
    #[inline]
    pub fn slice_iter(&self) -> impl ExactSizeIterator<Item = MaskSlice> {
        self.data.axis_iter(Axis(0)).map(MaskSlice::new)
    }

    /// 将 LiTS 标注就地转换为 `{0, 1}` 二值掩码: 肝脏和肿瘤均视为前景.
    ///
    /// 返回前景体素个数.
    pub fn binarize_liver(&mut self) -> usize {
        let mut cnt = 0usize;
        self.data.mapv_inplace(|p| {
            if is_liver_or_tumor(p) {
                cnt += 1;
                MASK_FOREGROUND
            } else {
                MASK_BACKGROUND
            }
        });
        cnt
    }
}

/// nii 格式的 3D CT 扫描与对应的标注.
#[derive(Debug, Clone)]
pub struct CtData3d {
    /// 3D CT 扫描.
    pub scan: CtScan,

    /// 3D CT 标注.
    pub label: CtLabel,
}

impl CtData3d {
    /// 分别打开扫描和对应标注. 两者形状不一致时返回 [`Error::VolumeMismatch`].
    pub fn open(scan_path: impl AsRef<Path>, label_path: impl AsRef<Path>) -> Result<Self> {
        let scan = CtScan::open(scan_path)?;
        let label = CtLabel::open(label_path)?;
        if scan.shape() != label.shape() {
            return Err(Error::VolumeMismatch {
                scan: scan.shape(),
                label: label.shape(),
            });
        }
        Ok(Self { scan, label })
    }

    /// 获取水平切片个数.
    #[inline]
    pub fn len_z(&self) -> usize {
        self.label.len_z()
    }

    /// 按升序迭代 (扫描, 标注) 水平切片.
    #[inline]
    pub fn slice_iter(&self) -> impl ExactSizeIterator<Item = (ScanSlice, MaskSlice)> {
        self.scan.slice_iter().zip(self.label.slice_iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn test_from_array_header() {
        let scan = CtScan::from_array(Array3::zeros((4, 3, 2)), [0.7, 0.8, 2.5]);
        assert_eq!(scan.shape(), (4, 3, 2));
        assert_eq!(scan.len_z(), 4);
        assert_eq!(scan.header().dim[1..4], [2, 3, 4]);
        assert_eq!(scan.pix_dim(), [2.5, 0.8f32 as f64, 0.7f32 as f64]);
    }

    #[test]
    fn test_binarize_liver() {
        let mut raw = Array3::<u8>::zeros((1, 2, 2));
        raw[(0, 0, 1)] = LITS_LIVER;
        raw[(0, 1, 1)] = LITS_TUMOR;
        let mut label = CtLabel::from_array(raw, [1.0; 3]);
        assert_eq!(label.binarize_liver(), 2);
        assert_eq!(label[(0, 1, 1)], MASK_FOREGROUND);
        assert_eq!(label.slice_iter().len(), 1);
    }
}
