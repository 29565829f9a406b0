//! 训练循环、损失函数、指标与学习率调度.
//!
//! 与 `burn` 的 `Learner` 不同, 这里手写训练循环, 以便在每轮结束时按验证损失
//! 调整学习率并保存最好的模型.

mod config;
mod loss;
mod metric;
mod scheduler;
mod trainer;

pub use config::{LossFunction, OptimizerKind, PlateauConfig, TrainingConfig};
pub use loss::{bce_with_logits, soft_dice};
pub use metric::{dice, iou, OverlapCounts};
pub use scheduler::ReduceLrOnPlateau;
pub use trainer::{
    evaluate, evaluate_batches, load_config, load_model, load_slices, split_indices, train,
    Checkpoint, EpochSummary, Evaluation, TrainingReport, CONFIG_FILE,
};
