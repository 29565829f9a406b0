#![warn(missing_docs)] // <= 合适时移除它.
// #![warn(clippy::missing_docs_in_private_items)]  // <= too strict.

//! 核心库. 训练二维 U-Net 对 CT 水平切片做肝脏分割, 并把预测掩码转换为
//! DICOM RT Structure Set 中的闭合平面轮廓.
//!
//! 张量运算、自动微分与卷积由 `burn` 提供, DICOM 编解码由 `dicom-rs` 提供.
//! 该 crate 只负责把它们组织成训练与推理流程.
//!
//! # 注意
//!
//! 1. 训练数据按 LiTS 模式组织 (nii 格式的 scan 与 label), 推理输入是 DICOM CT 序列.
//! 2. 输入数据的问题 (文件缺失、属性缺失、形状不一致等) 以 [`Error`] 返回;
//!   违反内部不变量时程序直接 panic, 而不会导致内存错误. As what Rust promises.
//!
//! # 开发计划
//!
//! ### 切片数据结构与压缩存储 ✅
//!
//! 二值掩码切片与 CT 扫描切片的借用/持有/压缩形式. 训练时切片以 zlib
//! 压缩常驻内存, 取样时解压.
//!
//! 实现位于 `ct-contour/src/data`.
//!
//! ### 8-邻域边界追踪 ✅
//!
//! Moore 邻域追踪, 以 "再次以相同方式离开起点" 为终止条件. 只追踪外边界.
//!
//! 实现位于 `ct-contour/src/eight`.
//!
//! ### U-Net 模型 ✅
//!
//! 编码器默认通道 (32, 64, 128, 256, 512, 1024), 按通道丢弃, 转置卷积上采样.
//!
//! 实现位于 `ct-contour/src/model`.
//!
//! ### 训练循环 ✅
//!
//! 1. 损失函数: BCE with logits / soft Dice / 两者之和. ✅
//! 2. 优化器: Adam / SGD. ✅
//! 3. 验证损失停滞时降低学习率. ✅
//! 4. 每轮保存检查点, 保留验证损失最低者. ✅
//!
//! 实现位于 `ct-contour/src/train`.
//!
//! ### DICOM 序列读取与结构集生成 ✅
//!
//! 1. 缺少文件元信息的文件如何读取? 按隐式 VR 小端序强制读取, 再补全元信息.
//! 2. 目录中有多个序列怎么办? 选切片最多的 CT 序列.
//! 3. 切片按什么排序? `SliceLocation`, 缺失时用图像位置在法向量上的投影.
//! 4. 轮廓的 z 坐标从哪里来? 由 `ImagePositionPatient` 和
//!   `ImageOrientationPatient` 完整映射, 对斜切片同样成立.
//!
//! 实现位于 `ct-contour/src/dicom`, `ct-contour/src/contour`.
//!
//! ### 推理流程 ✅
//!
//! 实现位于 `ct-contour/src/infer`.
//!
//! ### 多器官 (多输出通道) 结构集 ⌛️
//!
//! 模型已支持多个输出通道, 但推理目前只取第一个通道生成单个 ROI.

/// 二维索引, 同时也可一定程度上用作非负整数向量.
pub type Idx2d = (usize, usize);

/// 三维索引, 同时也可一定程度上用作非负整数向量.
pub type Idx3d = (usize, usize, usize);

type Predicate = fn(u8) -> bool;

type Area2d = Vec<Idx2d>;
type Areas2d = Vec<Area2d>;

/// 3D CT nii 文件与二维切片基础数据结构.
mod data;

pub use data::{
    save_overlay, CompactMask, CompactScan, Connectivity, CtData3d, CtLabel, CtScan, CtWindow,
    ImgWriteRaw, ImgWriteVis, Mask, MaskSlice, MaskSliceMut, NiftiHeaderAttr, NiftiVolume,
    OwnedMask, OwnedScanSlice, ScanSlice, Voxel,
};

pub mod consts;

mod error;

pub use error::{Error, ParseKindError, Result};

pub mod contour;
pub mod dataset;
pub mod dicom;
pub mod eight;
pub mod infer;
pub mod model;
pub mod normalize;
pub mod prelude;
pub mod train;
