//! 🍇欢迎光临🍓
//!
//! 涵盖了本 crate 一系列常用的功能.

pub use crate::{Error, Idx2d, Idx3d, Result};

pub use crate::data::slice::{ImgWriteVis, MaskSlice, MaskSliceMut, OwnedMask, ScanSlice};
pub use crate::data::window::CtWindow;
pub use crate::data::{CtData3d, CtLabel, CtScan, NiftiHeaderAttr};

pub use crate::consts::gray::{LITS_BACKGROUND, LITS_LIVER, LITS_TUMOR};
pub use crate::consts::{DEFAULT_ENCODER_CHANNELS, DEFAULT_THRESHOLD};

pub use crate::dataset::home_dataset_dir_with;
pub use crate::dataset::{self, lits_train};

pub use crate::contour::{PostProcess, SliceStructure};
pub use crate::dicom::{PixelGrid, StructureSetOptions};
pub use crate::infer::{infer_contours, InferenceConfig, InferenceOutput};
pub use crate::model::{UNet, UNetConfig};
pub use crate::train::{Checkpoint, LossFunction, OptimizerKind, TrainingConfig};
