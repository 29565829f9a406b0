//! 二维切片训练集.
//!
//! 3D 体数据在加载时被拆分成水平切片, 以压缩形式常驻内存,
//! 取样时再解压并标准化.

use crate::error::Result;
use crate::normalize::ZScore;
use crate::{CompactMask, CompactScan, CtData3d, Idx2d};
use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// 单个训练样本: 标准化后的切片和对应的 `{0, 1}` 掩码, 均按行优先展开.
#[derive(Clone, Debug)]
pub struct SliceItem {
    /// 标准化后的像素值.
    pub image: Vec<f32>,

    /// 掩码, 取值为 0.0 或 1.0.
    pub mask: Vec<f32>,

    /// 形状 (高, 宽).
    pub shape: Idx2d,
}

/// 切片筛选规则.
#[derive(Copy, Clone, Debug)]
pub struct SliceSelection {
    /// 全背景切片被保留的概率, 取值 \[0, 1\].
    pub background_keep_ratio: f64,

    /// 随机种子.
    pub seed: u64,
}

impl Default for SliceSelection {
    fn default() -> Self {
        Self {
            background_keep_ratio: 1.0,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone)]
struct StoredSlice {
    scan: CompactScan,
    mask: CompactMask,
    norm: ZScore,
}

/// 以压缩切片为元素的数据集.
#[derive(Debug, Clone, Default)]
pub struct SliceDataset {
    slices: Vec<StoredSlice>,
    volumes: usize,
}

impl SliceDataset {
    /// 空数据集.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// 拆分并加入一个 3D 体数据. 标注会先被二值化 (肝脏和肿瘤均视为前景),
    /// 扫描以整个体数据的均值与标准差标准化.
    ///
    /// 返回实际加入的切片个数.
    pub fn push_volume(&mut self, mut data: CtData3d, selection: &SliceSelection) -> Result<usize> {
        data.label.binarize_liver();
        let norm = ZScore::fit(data.scan.data().iter())?;
        let mut rng = StdRng::seed_from_u64(selection.seed ^ self.volumes as u64);
        self.volumes += 1;

        let mut added = 0usize;
        for (scan, label) in data.slice_iter() {
            if !label.has_foreground() && !rng.gen_bool(selection.background_keep_ratio.clamp(0.0, 1.0)) {
                continue;
            }
            self.slices.push(StoredSlice {
                scan: scan.compress(),
                mask: label.to_owned().compress(),
                norm,
            });
            added += 1;
        }
        Ok(added)
    }

    /// 已加入的体数据个数.
    #[inline]
    pub fn volumes(&self) -> usize {
        self.volumes
    }
}

impl Dataset<SliceItem> for SliceDataset {
    fn get(&self, index: usize) -> Option<SliceItem> {
        let stored = self.slices.get(index)?;
        let scan = stored.scan.decompress().into_raw();
        let mask = stored.mask.decompress().into_raw();
        Some(SliceItem {
            image: scan.iter().map(|v| stored.norm.apply(*v)).collect(),
            mask: mask.iter().map(|v| *v as f32).collect(),
            shape: stored.scan.shape(),
        })
    }

    fn len(&self) -> usize {
        self.slices.len()
    }
}

/// 一个批次的图像与掩码张量, 形状均为 `[N, 1, H, W]`.
#[derive(Clone, Debug)]
pub struct SegmentationBatch<B: Backend> {
    /// 图像.
    pub images: Tensor<B, 4>,

    /// 掩码.
    pub masks: Tensor<B, 4>,
}

/// 把 [`SliceItem`] 组装为 [`SegmentationBatch`].
#[derive(Clone, Debug)]
pub struct SegmentationBatcher<B: Backend> {
    device: B::Device,
}

impl<B: Backend> SegmentationBatcher<B> {
    /// 在 `device` 上创建张量.
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }
}

impl<B: Backend> Batcher<SliceItem, SegmentationBatch<B>> for SegmentationBatcher<B> {
    /// 同一批次内切片形状必须一致, 否则程序 panic.
    fn batch(&self, items: Vec<SliceItem>) -> SegmentationBatch<B> {
        let n = items.len();
        let (h, w) = items.first().map(|i| i.shape).unwrap_or((0, 0));
        let mut images = Vec::with_capacity(n * h * w);
        let mut masks = Vec::with_capacity(n * h * w);
        for item in items {
            assert_eq!(item.shape, (h, w), "同一批次内切片形状不一致");
            images.extend(item.image);
            masks.extend(item.mask);
        }

        let images = Tensor::<B, 4>::from_data(TensorData::new(images, [n, 1, h, w]), &self.device);
        let masks = Tensor::<B, 4>::from_data(TensorData::new(masks, [n, 1, h, w]), &self.device);
        SegmentationBatch { images, masks }
    }
}
