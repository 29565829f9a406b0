use crate::consts::gray::*;
use crate::{Area2d, Areas2d, Idx2d, Predicate};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use ndarray::iter::Iter;
use ndarray::{Array2, ArrayBase, ArrayView2, Data, DataMut, Ix2, OwnedRepr, RawData, ViewRepr};
use std::borrow::Cow;
use std::collections::VecDeque;
use std::fmt;
use std::io::{Read, Write};
use std::ops::{Index, IndexMut};

/// 连通规则.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Connectivity {
    /// 上下左右.
    Four,

    /// 上下左右及四个对角.
    Eight,
}

/// 二维 `{0, 1}` 掩码, 按 (高, 宽) 索引. 存储方式由 `S` 决定.
pub struct Mask<S: RawData<Elem = u8>> {
    data: ArrayBase<S, Ix2>,
}

/// 不可变、借用的掩码切片.
pub type MaskSlice<'a> = Mask<ViewRepr<&'a u8>>;

/// 可变、借用的掩码切片.
pub type MaskSliceMut<'a> = Mask<ViewRepr<&'a mut u8>>;

/// 拥有所有权的掩码切片.
pub type OwnedMask = Mask<OwnedRepr<u8>>;

impl<S: RawData<Elem = u8>> Mask<S> {
    /// 包装 `data`. 像素值应为 `{0, 1}`, 否则先调用 `binarize`.
    #[inline]
    pub fn new(data: ArrayBase<S, Ix2>) -> Self {
        Self { data }
    }
}

impl<S: Data<Elem = u8>> Index<Idx2d> for Mask<S> {
    type Output = u8;

    #[inline]
    fn index(&self, index: Idx2d) -> &u8 {
        &self.data[index]
    }
}

impl<S: DataMut<Elem = u8>> IndexMut<Idx2d> for Mask<S> {
    #[inline]
    fn index_mut(&mut self, index: Idx2d) -> &mut u8 {
        &mut self.data[index]
    }
}

impl<S: Data<Elem = u8>> fmt::Debug for Mask<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mask")
            .field("shape", &self.shape())
            .field("foreground", &self.count(MASK_FOREGROUND))
            .finish()
    }
}

impl<S: Data<Elem = u8>, S2: Data<Elem = u8>> PartialEq<Mask<S2>> for Mask<S> {
    #[inline]
    fn eq(&self, other: &Mask<S2>) -> bool {
        self.data == other.data
    }
}

impl Clone for OwnedMask {
    fn clone(&self) -> Self {
        Self::new(self.data.clone())
    }
}

/// 只读操作.
impl<S: Data<Elem = u8>> Mask<S> {
    /// 借用为 [`MaskSlice`].
    #[inline]
    pub fn view(&self) -> MaskSlice<'_> {
        Mask::new(self.data.view())
    }

    /// 以行优先顺序迭代像素值.
    #[inline]
    pub fn iter(&self) -> Iter<'_, u8, Ix2> {
        self.data.iter()
    }

    /// 获取给定位置 (高, 宽) 的像素值. 越界时返回 `None`.
    #[inline]
    pub fn get(&self, pos: Idx2d) -> Option<&u8> {
        self.data.get(pos)
    }

    /// (高, 宽).
    #[inline]
    pub fn shape(&self) -> Idx2d {
        self.data.dim()
    }

    /// 高度.
    #[inline]
    pub fn height(&self) -> usize {
        self.shape().0
    }

    /// 宽度.
    #[inline]
    pub fn width(&self) -> usize {
        self.shape().1
    }

    /// 判断一个索引是否未越界.
    #[inline]
    pub fn check(&self, (h, w): Idx2d) -> bool {
        h < self.height() && w < self.width()
    }

    /// 统计值为 `label` 的像素个数.
    #[inline]
    pub fn count(&self, label: u8) -> usize {
        self.data.iter().filter(|&&p| p == label).count()
    }

    /// 是否存在前景像素.
    #[inline]
    pub fn has_foreground(&self) -> bool {
        self.data.iter().copied().any(is_foreground)
    }

    /// 深拷贝为 [`OwnedMask`].
    #[inline]
    pub fn to_owned(&self) -> OwnedMask {
        Mask::new(self.data.to_owned())
    }

    /// 行优先字节序列. 数据本身为行优先连续存储时不拷贝.
    pub fn row_major_bytes(&self) -> Cow<[u8]> {
        match self.data.as_slice() {
            Some(s) => Cow::Borrowed(s),
            None => Cow::Owned(self.data.iter().copied().collect()),
        }
    }

    /// 判断一个索引是否位于图像的边缘.
    #[inline]
    pub fn is_at_border(&self, (h, w): Idx2d) -> bool {
        h == 0 || w == 0 || h + 1 == self.height() || w + 1 == self.width()
    }

    /// 以行优先规则迭代 `(索引, 像素值)`.
    #[inline]
    pub fn indexed_iter(&self) -> impl Iterator<Item = (Idx2d, &u8)> {
        self.data.indexed_iter()
    }

    /// 按 `conn` 规则划分满足 `pred` 的连通区域.
    ///
    /// 区域按其行优先首像素的顺序给出, 每个区域的第一个元素即为其行优先首像素.
    pub fn areas(&self, pred: Predicate, conn: Connectivity) -> Areas2d {
        let mut ans = Areas2d::new();
        let mut seen = Array2::from_elem(self.shape(), false);
        let mut queue = VecDeque::new();

        for (pos, &p) in self.data.indexed_iter() {
            if seen[pos] || !pred(p) {
                continue;
            }
            seen[pos] = true;
            queue.push_back(pos);
            let mut area = Area2d::new();
            while let Some(cur) = queue.pop_front() {
                area.push(cur);
                for next in crate::eight::neighbours(cur, self.shape(), conn) {
                    if !seen[next] && pred(self.data[next]) {
                        seen[next] = true;
                        queue.push_back(next);
                    }
                }
            }
            ans.push(area);
        }
        ans
    }

    /// 所有 8-连通前景区域.
    #[inline]
    pub fn foreground_areas(&self) -> Areas2d {
        self.areas(is_foreground, Connectivity::Eight)
    }
}

/// 就地修改.
impl<S: DataMut<Elem = u8>> Mask<S> {
    /// 借用为 [`MaskSliceMut`].
    #[inline]
    pub fn view_mut(&mut self) -> MaskSliceMut<'_> {
        Mask::new(self.data.view_mut())
    }

    /// 将 `it` 中的每个索引对应的像素改为 `new`.
    pub fn fill_batch<I: IntoIterator<Item = Idx2d>>(&mut self, it: I, new: u8) {
        for pos in it {
            self.data[pos] = new;
        }
    }

    /// 将不与图像边缘接触的 4-连通背景区域 (空洞) 填充为前景.
    /// 有修改时返回 `true`.
    ///
    /// 前景以 8-连通定义时, 背景须以 4-连通定义.
    pub fn fill_background_hollow(&mut self) -> bool {
        let holes: Vec<_> = self
            .areas(is_background, Connectivity::Four)
            .into_iter()
            .filter(|area| area.iter().all(|&p| !self.is_at_border(p)))
            .collect();
        let modified = !holes.is_empty();
        self.fill_batch(holes.into_iter().flatten(), MASK_FOREGROUND);
        modified
    }

    /// 仅保留面积最大的 8-连通前景区域 (并列时取行优先靠前者).
    ///
    /// 如果图像为全背景则返回 `false`.
    pub fn keep_largest(&mut self) -> bool {
        let areas = self.foreground_areas();
        let Some(largest) = areas
            .iter()
            .enumerate()
            .max_by(|(i, a), (j, b)| a.len().cmp(&b.len()).then(j.cmp(i)))
            .map(|(i, _)| i)
        else {
            return false;
        };
        for (_, area) in areas.into_iter().enumerate().filter(|(i, _)| *i != largest) {
            self.fill_batch(area, MASK_BACKGROUND);
        }
        true
    }

    /// 将任意非零像素视为前景, 把图像规范为 `{0, 1}` 二值掩码.
    ///
    /// 返回前景像素个数.
    pub fn binarize(&mut self) -> usize {
        let mut cnt = 0usize;
        self.data.mapv_inplace(|p| {
            if p == MASK_BACKGROUND {
                MASK_BACKGROUND
            } else {
                cnt += 1;
                MASK_FOREGROUND
            }
        });
        cnt
    }
}

impl OwnedMask {
    /// 从底层数据直接创建.
    #[inline]
    pub fn from_raw(data: Array2<u8>) -> Self {
        Self::new(data)
    }

    /// 直接获得底层数据.
    #[inline]
    pub fn into_raw(self) -> Array2<u8> {
        self.data
    }

    /// zlib 压缩.
    pub fn compress(&self) -> CompactMask {
        CompactMask {
            buf: deflate(&self.row_major_bytes()),
            sh: self.shape(),
        }
    }
}

/// 压缩存储的 [`OwnedMask`]; 不透明类型.
#[derive(Debug, Clone)]
pub struct CompactMask {
    buf: Vec<u8>,
    sh: Idx2d,
}

impl CompactMask {
    /// 解压为 [`OwnedMask`].
    pub fn decompress(&self) -> OwnedMask {
        let (h, w) = self.sh;
        let raw = inflate(&self.buf, h * w);
        Mask::new(Array2::from_shape_vec(self.sh, raw).expect("解压后长度与形状不一致"))
    }
}

/// 不可变、借用的二维水平 CT 扫描切片, 像素为 HU 值.
#[derive(Debug, Clone)]
pub struct ScanSlice<'a> {
    data: ArrayView2<'a, f32>,
}

impl Index<Idx2d> for ScanSlice<'_> {
    type Output = f32;

    #[inline]
    fn index(&self, index: Idx2d) -> &f32 {
        &self.data[index]
    }
}

impl<'a> ScanSlice<'a> {
    /// 包装一张 HU 值切片.
    #[inline]
    pub fn new(data: ArrayView2<'a, f32>) -> Self {
        Self { data }
    }

    /// 底层数据视图.
    #[inline]
    pub fn data(&self) -> ArrayView2<f32> {
        self.data.view()
    }

    /// (高, 宽).
    #[inline]
    pub fn shape(&self) -> Idx2d {
        self.data.dim()
    }

    /// 深拷贝为 [`OwnedScanSlice`].
    pub fn to_owned(&self) -> OwnedScanSlice {
        OwnedScanSlice {
            data: self.data.to_owned(),
        }
    }

    /// 以 `i16` 精度压缩存储 HU 值. 超出 `i16` 范围的值会被截断.
    pub fn compress(&self) -> CompactScan {
        let raw: Vec<u8> = self
            .data
            .iter()
            .flat_map(|hu| {
                let v = hu.round().clamp(i16::MIN as f32, i16::MAX as f32) as i16;
                v.to_le_bytes()
            })
            .collect();
        CompactScan {
            buf: deflate(&raw),
            sh: self.shape(),
        }
    }
}

/// 拥有所有权的二维水平 CT 扫描切片.
#[derive(Clone, Debug, PartialEq)]
pub struct OwnedScanSlice {
    data: Array2<f32>,
}

impl OwnedScanSlice {
    /// 从底层数据直接创建.
    #[inline]
    pub fn from_raw(data: Array2<f32>) -> Self {
        Self { data }
    }

    /// 借用为 [`ScanSlice`].
    #[inline]
    pub fn view(&self) -> ScanSlice<'_> {
        ScanSlice::new(self.data.view())
    }

    /// 直接获得底层数据.
    #[inline]
    pub fn into_raw(self) -> Array2<f32> {
        self.data
    }
}

/// 压缩存储的 CT 扫描切片 (`i16` HU); 不透明类型.
#[derive(Debug, Clone)]
pub struct CompactScan {
    buf: Vec<u8>,
    sh: Idx2d,
}

impl CompactScan {
    /// 解压. 像素值为取整后的 HU.
    pub fn decompress(&self) -> OwnedScanSlice {
        let (h, w) = self.sh;
        let values: Vec<f32> = inflate(&self.buf, h * w * 2)
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32)
            .collect();
        OwnedScanSlice::from_raw(Array2::from_shape_vec(self.sh, values).expect("解压后长度与形状不一致"))
    }

    /// 形状 (高, 宽).
    #[inline]
    pub fn shape(&self) -> Idx2d {
        self.sh
    }
}

// 写入内存缓冲区不会失败.
fn deflate(raw: &[u8]) -> Vec<u8> {
    let mut e = ZlibEncoder::new(Vec::with_capacity(raw.len() / 4), Compression::fast());
    e.write_all(raw).expect("内存压缩失败");
    e.finish().expect("内存压缩失败")
}

fn inflate(buf: &[u8], len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len);
    ZlibDecoder::new(buf)
        .read_to_end(&mut out)
        .expect("压缩数据损坏");
    debug_assert_eq!(out.len(), len);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_areas_connectivity() {
        // 两个仅对角相连的像素.
        let a = array![[1u8, 0, 0], [0, 1, 0], [0, 0, 0]];
        let m = MaskSlice::new(a.view());
        assert_eq!(m.areas(is_foreground, Connectivity::Four).len(), 2);
        assert_eq!(m.foreground_areas().len(), 1);
        assert_eq!(m.foreground_areas()[0][0], (0, 0));
    }

    #[test]
    fn test_fill_hollow_and_keep_largest() {
        let mut a = array![
            [0u8, 0, 0, 0, 0, 0],
            [0, 1, 1, 1, 0, 0],
            [0, 1, 0, 1, 0, 1],
            [0, 1, 1, 1, 0, 0],
            [0, 0, 0, 0, 0, 0],
        ];
        let mut m = MaskSliceMut::new(a.view_mut());
        assert!(m.fill_background_hollow());
        assert_eq!(m[(2, 2)], MASK_FOREGROUND);
        assert!(!m.fill_background_hollow());

        assert!(m.keep_largest());
        assert_eq!(m[(2, 5)], MASK_BACKGROUND);
        assert_eq!(m.count(MASK_FOREGROUND), 9);
    }

    #[test]
    fn test_keep_largest_tie_keeps_first() {
        let mut m = OwnedMask::from_raw(array![[1u8, 0, 1], [0, 0, 0]]);
        assert!(m.keep_largest());
        assert_eq!(m.into_raw(), array![[1u8, 0, 0], [0, 0, 0]]);

        let mut empty = OwnedMask::from_raw(Array2::zeros((4, 4)));
        assert!(!empty.keep_largest());
    }

    #[test]
    fn test_binarize() {
        let mut a = array![[0u8, 2], [1, 0]];
        let mut m = MaskSliceMut::new(a.view_mut());
        assert_eq!(m.binarize(), 2);
        assert_eq!(a, array![[0u8, 1], [1, 0]]);
    }

    #[test]
    fn test_row_major_bytes_of_transposed_view() {
        let a = array![[1u8, 2], [3, 4]];
        let t = a.t();
        let m = MaskSlice::new(t);
        assert!(matches!(m.row_major_bytes(), Cow::Owned(_)));
        assert_eq!(m.row_major_bytes().as_ref(), &[1, 3, 2, 4]);
        assert!(matches!(MaskSlice::new(a.view()).row_major_bytes(), Cow::Borrowed(_)));
    }

    #[test]
    fn test_compact_storage() {
        let mask = OwnedMask::from_raw(array![[0u8, 1, 1], [1, 0, 0]]);
        assert_eq!(mask.compress().decompress(), mask);

        let scan = OwnedScanSlice::from_raw(array![[-1024.0f32, 40.4], [99999.0, 3.6]]);
        let back = scan.view().compress().decompress().into_raw();
        assert_eq!(back, array![[-1024.0f32, 40.0], [i16::MAX as f32, 4.0]]);
    }
}
