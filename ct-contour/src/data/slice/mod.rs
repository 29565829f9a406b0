//! 二维掩码/扫描切片对象的操作.

mod core;
mod save;

pub use core::{
    CompactMask, CompactScan, Connectivity, Mask, MaskSlice, MaskSliceMut, OwnedMask, OwnedScanSlice,
    ScanSlice,
};

pub use save::{save_overlay, ImgWriteRaw, ImgWriteVis};
