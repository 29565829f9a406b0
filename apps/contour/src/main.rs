//! `contour`: 肝脏分割模型的训练、测试与推理.
//!
//! 默认使用 `NdArray` 后端, 启用 `wgpu` 特性后使用 GPU.

mod profile;
mod result;
mod runner;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use ct_contour::train::{Checkpoint, LossFunction, OptimizerKind};
use std::path::PathBuf;

cfg_if::cfg_if! {
    if #[cfg(feature = "wgpu")] {
        type Backend = burn::backend::Wgpu;
    } else {
        type Backend = burn::backend::NdArray;
    }
}

type TrainBackend = burn::backend::Autodiff<Backend>;

#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// 日志级别: off, error, warn, info, debug, trace.
    #[arg(long, global = true, default_value = "info")]
    log_level: log::LevelFilter,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// 在 LiTS 训练集上训练模型.
    Train(TrainArgs),

    /// 在指定 volume 上测试已训练的模型.
    Evaluate(EvaluateArgs),

    /// 对 DICOM CT 序列推理, 输出 RT Structure Set 或掩码.
    Infer(InferArgs),

    /// 用随机输入检查模型输出形状.
    Check(CheckArgs),
}

#[derive(Debug, Args)]
struct TrainArgs {
    /// 数据集目录. 缺省时依次使用 `$CT_CONTOUR_TRAIN_DIR` 和 `$HOME/dataset/train`.
    #[arg(long)]
    dataset: Option<PathBuf>,

    /// 产物目录.
    #[arg(long, default_value = "artifacts")]
    artifact_dir: PathBuf,

    /// 训练配置文件 (JSON). 下面的选项会覆盖其中的值.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    epochs: Option<usize>,

    #[arg(long)]
    batch_size: Option<usize>,

    #[arg(long)]
    learning_rate: Option<f64>,

    /// bce_with_logits, dice 或 bce_dice.
    #[arg(long)]
    loss: Option<LossFunction>,

    /// adam 或 sgd.
    #[arg(long)]
    optimizer: Option<OptimizerKind>,

    /// 数据加载线程数. 给出 0 时使用全部可用核心.
    #[arg(long)]
    workers: Option<usize>,

    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Debug, Args)]
struct EvaluateArgs {
    /// 数据集目录, 规则同 `train`.
    #[arg(long)]
    dataset: Option<PathBuf>,

    #[arg(long, default_value = "artifacts")]
    artifact_dir: PathBuf,

    /// `best`, `model-{epoch}` 或轮次.
    #[arg(long, default_value = "best")]
    checkpoint: Checkpoint,

    /// 形如 `0-9,12` 的 volume 索引. 缺省时使用训练时划出的验证集.
    #[arg(long)]
    volumes: Option<String>,
}

#[derive(Debug, Args)]
struct InferArgs {
    /// 包含 CT 序列 `*.dcm` 文件的检查目录.
    study_dir: PathBuf,

    #[arg(long, default_value = "artifacts")]
    artifact_dir: PathBuf,

    #[arg(long, default_value = "best")]
    checkpoint: Checkpoint,

    /// 输出目录.
    #[arg(long, short, default_value = ".")]
    output: PathBuf,

    /// 推理配置文件 (JSON). 下面的选项会覆盖其中的值.
    #[arg(long)]
    config: Option<PathBuf>,

    /// 作用于 sigmoid 概率的门限.
    #[arg(long)]
    threshold: Option<f32>,

    /// 新 UID 的根, 以 `.` 结尾.
    #[arg(long)]
    root_uid: Option<String>,

    #[arg(long)]
    roi_name: Option<String>,

    /// 输出 `masks.npy` 而不是结构集.
    #[arg(long)]
    masks: bool,

    /// 与 `--masks` 一同使用: 把含前景的切片叠加图写入该目录.
    #[arg(long, requires = "masks")]
    preview: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct CheckArgs {
    #[arg(long, default_value_t = 5)]
    batch: usize,

    /// 输入边长.
    #[arg(long, default_value_t = 512)]
    size: usize,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    simple_logger::SimpleLogger::new()
        .with_level(cli.log_level)
        .init()?;

    let device: <Backend as burn::tensor::backend::Backend>::Device = Default::default();

    match cli.command {
        Command::Train(args) => {
            let (report, profile) = runner::train::<TrainBackend>(&args, &device)?;
            result::print_with(|w| result::describe_training(&report, w))?;
            result::print_with(|w| result::describe_into("train", &profile, w))?;
        }
        Command::Evaluate(args) => {
            let (eval, profile) = runner::evaluate::<Backend>(&args, &device)?;
            result::print_with(|w| result::describe_evaluation(&eval, w))?;
            result::print_with(|w| result::describe_into("evaluate", &profile, w))?;
        }
        Command::Infer(args) => {
            let profile = runner::infer::<Backend>(&args, &device)?;
            result::print_with(|w| result::describe_into("infer", &profile, w))?;
        }
        Command::Check(args) => {
            runner::check::<Backend>(args.batch, args.size, &device)?;
        }
    }
    Ok(())
}
