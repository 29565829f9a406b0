//! 通用常量.

/// 单通道颜色与标签像素值.
pub mod gray {
    /// 二值掩码中, 背景的像素值.
    pub const MASK_BACKGROUND: u8 = 0;

    /// 二值掩码中, 前景 (被分割的器官) 的像素值.
    pub const MASK_FOREGROUND: u8 = 1;

    /// 原 LiTS 数据集中, 背景的像素值.
    pub const LITS_BACKGROUND: u8 = 0;

    /// 原 LiTS 数据集中, 肝脏的像素值.
    pub const LITS_LIVER: u8 = 1;

    /// 原 LiTS 数据集中, 肿瘤的像素值.
    pub const LITS_TUMOR: u8 = 2;

    /// 单通道黑色.
    pub const BLACK: u8 = 0b_0000_0000;

    /// 单通道白色.
    pub const WHITE: u8 = 0b_1111_1111;

    /// 掩码像素是否是前景?
    #[inline]
    pub const fn is_foreground(p: u8) -> bool {
        matches!(p, MASK_FOREGROUND)
    }

    /// 掩码像素是否是背景?
    #[inline]
    pub const fn is_background(p: u8) -> bool {
        matches!(p, MASK_BACKGROUND)
    }

    /// LiTS 标签像素是否是肝脏或肿瘤?
    #[inline]
    pub const fn is_liver_or_tumor(p: u8) -> bool {
        matches!(p, LITS_LIVER | LITS_TUMOR)
    }
}

/// DICOM 相关常量.
pub mod dicom {
    /// 默认的 UID 根 (仅供测试与演示使用).
    pub const DEFAULT_ROOT_UID: &str = "1.2.826.0.1.3680043.8.498.";

    /// UID 的最大长度.
    pub const UID_MAX_LEN: usize = 64;

    /// CT 图像的模态.
    pub const CT_MODALITY: &str = "CT";

    /// 结构集的模态.
    pub const RTSTRUCT_MODALITY: &str = "RTSTRUCT";

    /// 结构集中轮廓的几何类型.
    pub const CLOSED_PLANAR: &str = "CLOSED_PLANAR";

    /// Study Component Management SOP Class, 用于 RT Referenced Study Sequence.
    pub const STUDY_COMPONENT_MANAGEMENT: &str = "1.2.840.10008.3.1.2.3.1";
}

/// 默认的 U-Net 编码器通道数.
pub const DEFAULT_ENCODER_CHANNELS: [usize; 6] = [32, 64, 128, 256, 512, 1024];

/// 默认的二值化门限 (作用于 sigmoid 概率).
pub const DEFAULT_THRESHOLD: f32 = 0.5;

/// 闭合平面轮廓最少应包含的点数.
pub const MIN_CONTOUR_POINTS: usize = 3;
