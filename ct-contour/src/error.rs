//! 运行时错误.

use std::path::PathBuf;

/// 本 crate 的统一错误类型.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// 读取 DICOM 文件失败.
    #[error("无法读取 DICOM 文件 `{path}`")]
    DicomRead {
        /// 文件路径.
        path: PathBuf,
        /// 底层错误.
        #[source]
        source: dicom_object::ReadError,
    },

    /// 写入 DICOM 文件失败.
    #[error("无法写入 DICOM 文件")]
    DicomWrite(#[from] dicom_object::WriteError),

    /// 构造 DICOM 文件元信息失败.
    #[error("无法构造 DICOM 文件元信息")]
    DicomMeta(#[from] dicom_object::WithMetaError),

    /// 像素数据解码失败.
    #[error("无法解码像素数据")]
    PixelData(#[from] dicom_pixeldata::Error),

    /// DICOM 对象缺少必要属性, 或属性值无法解析.
    #[error("DICOM 属性 `{0}` 缺失或无效")]
    MissingAttribute(&'static str),

    /// 读取 nifti 文件失败.
    #[error("无法读取 nifti 文件")]
    Nifti(#[from] nifti::NiftiError),

    /// 保存或加载模型参数失败.
    #[error("模型记录读写错误")]
    Recorder(#[from] burn::record::RecorderError),

    /// 加载配置失败.
    #[error("无法加载配置 `{path}`: {reason}")]
    Config {
        /// 配置文件路径.
        path: PathBuf,
        /// 原因.
        reason: String,
    },

    /// 写出 npy 文件失败.
    #[error("无法写出 npy 文件")]
    Npy(#[from] ndarray_npy::WriteNpyError),

    /// nifti 数据不是三维体数据.
    #[error("nifti 数据不是三维体数据")]
    VolumeLayout(#[from] ndarray::ShapeError),

    /// 扫描与标注形状不一致.
    #[error("扫描形状 {scan:?} 与标注形状 {label:?} 不一致")]
    VolumeMismatch {
        /// 扫描形状 (z, 高, 宽).
        scan: (usize, usize, usize),
        /// 标注形状 (z, 高, 宽).
        label: (usize, usize, usize),
    },

    /// 底层 I/O 错误.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// 目录下没有可用的 CT 序列.
    #[error("没有找到 CT 图像序列")]
    EmptySeries,

    /// 序列中切片的形状不一致.
    #[error("切片形状不一致: 期望 {expected:?}, 实际 {found:?}")]
    ShapeMismatch {
        /// 期望形状 (高, 宽).
        expected: (usize, usize),
        /// 实际形状 (高, 宽).
        found: (usize, usize),
    },

    /// 输入图像的高或宽不能被模型下采样倍数整除.
    #[error("输入尺寸 {shape:?} 不能被 {divisor} 整除")]
    IndivisibleInput {
        /// 输入形状 (高, 宽).
        shape: (usize, usize),
        /// 要求的除数.
        divisor: usize,
    },

    /// 整个序列的像素值方差为零, 无法标准化.
    #[error("像素值标准差为零, 无法标准化")]
    ZeroVariance,

    /// 非法 UID 根.
    #[error("非法 UID 根 `{0}`")]
    InvalidUidRoot(String),

    /// 预测结果与切片个数不一致.
    #[error("预测个数 {predictions} 与切片个数 {slices} 不一致")]
    CountMismatch {
        /// 切片个数.
        slices: usize,
        /// 预测个数.
        predictions: usize,
    },

    /// 模型配置无效.
    #[error("无效的模型配置: {0}")]
    InvalidModel(String),

    /// 张量数据无法转换.
    #[error("张量数据转换失败: {0}")]
    TensorData(String),

    /// 数据集为空.
    #[error("数据集为空: {0}")]
    EmptyDataset(String),
}

/// 本 crate 的 `Result` 别名.
pub type Result<T> = std::result::Result<T, Error>;

/// 从字符串解析枚举失败.
#[derive(Debug, Clone, thiserror::Error)]
#[error("未知取值 `{value}`, 可选: {expected}")]
pub struct ParseKindError {
    /// 输入值.
    pub value: String,
    /// 可选值.
    pub expected: &'static str,
}
