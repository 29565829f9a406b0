//! 训练、验证与测试循环.

use super::{OptimizerKind, OverlapCounts, ReduceLrOnPlateau, TrainingConfig};
use crate::consts::DEFAULT_THRESHOLD;
use crate::dataset::lits_train::ct_loader;
use crate::dataset::{SegmentationBatch, SegmentationBatcher, SliceDataset, SliceSelection};
use crate::error::{Error, ParseKindError, Result};
use crate::model::UNet;
use crate::train::LossFunction;
use burn::config::Config;
use burn::data::dataloader::{DataLoader, DataLoaderBuilder};
use burn::data::dataset::Dataset;
use burn::module::{AutodiffModule, Module};
use burn::optim::{AdamConfig, GradientsParams, Optimizer, SgdConfig};
use burn::record::CompactRecorder;
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::ElementConversion;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::fs;
use std::str::FromStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// 产物目录下的训练配置文件名.
pub const CONFIG_FILE: &str = "config.json";

/// 要加载的模型参数.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Checkpoint {
    /// 验证损失最低的一轮.
    Best,

    /// 指定轮次 (从 1 开始).
    Epoch(usize),
}

impl Checkpoint {
    /// 在 `artifact_dir` 下的记录路径 (不含扩展名, 由记录器追加).
    pub fn path(&self, artifact_dir: &Path) -> PathBuf {
        match self {
            Self::Best => artifact_dir.join("best"),
            Self::Epoch(e) => artifact_dir.join(format!("model-{e}")),
        }
    }
}

/// 接受 `best`, `model-{epoch}` 或者单独的轮次.
impl FromStr for Checkpoint {
    type Err = ParseKindError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s == "best" {
            return Ok(Self::Best);
        }
        let digits = s.strip_prefix("model-").unwrap_or(s);
        match digits.parse::<usize>() {
            Ok(e) if e > 0 => Ok(Self::Epoch(e)),
            _ => Err(ParseKindError {
                value: s.to_string(),
                expected: "best, model-{epoch}, {epoch}",
            }),
        }
    }
}

/// 单轮训练的统计.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct EpochSummary {
    /// 轮次, 从 1 开始.
    pub epoch: usize,

    /// 平均训练损失.
    pub train_loss: f64,

    /// 平均验证损失.
    pub val_loss: f64,

    /// 验证集 Dice.
    pub dice: f64,

    /// 验证集 IoU.
    pub iou: f64,

    /// 本轮使用的学习率.
    pub lr: f64,
}

/// 整个训练过程的统计.
#[derive(Clone, Debug, Default)]
pub struct TrainingReport {
    /// 每轮统计.
    pub epochs: Vec<EpochSummary>,

    /// 验证损失最低的轮次.
    pub best_epoch: Option<usize>,
}

/// 在数据集上一次完整前向传播的统计.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Evaluation {
    /// 按样本加权的平均损失.
    pub loss: f64,

    /// 像素计数.
    pub counts: OverlapCounts,

    /// 样本 (切片) 数.
    pub samples: usize,
}

impl Evaluation {
    /// Dice 系数.
    #[inline]
    pub fn dice(&self) -> f64 {
        self.counts.dice()
    }

    /// 交并比.
    #[inline]
    pub fn iou(&self) -> f64 {
        self.counts.iou()
    }
}

/// 以 `seed` 打乱 `indices`, 按体数据划分出训练集和验证集.
///
/// 两个集合都至少包含一个体数据; 体数据少于两个时返回 [`Error::EmptyDataset`].
pub fn split_indices(indices: &[u32], validation_fraction: f64, seed: u64) -> Result<(Vec<u32>, Vec<u32>)> {
    if indices.len() < 2 {
        return Err(Error::EmptyDataset(format!(
            "至少需要 2 个体数据才能划分验证集, 实际为 {}",
            indices.len()
        )));
    }
    let mut shuffled = indices.to_vec();
    shuffled.shuffle(&mut StdRng::seed_from_u64(seed));
    let n_valid = ((indices.len() as f64 * validation_fraction).round() as usize).clamp(1, indices.len() - 1);
    let valid = shuffled.split_off(indices.len() - n_valid);
    Ok((shuffled, valid))
}

/// 加载 `indices` 指定的体数据并拆分为切片.
pub fn load_slices(indices: &[u32], dataset_dir: &Path, selection: &SliceSelection) -> Result<SliceDataset> {
    let mut dataset = SliceDataset::new();
    for (idx, data) in ct_loader(indices.iter().copied(), dataset_dir) {
        let added = dataset.push_volume(data?, selection)?;
        log::debug!("volume-{idx}: {added} 张切片");
    }
    if dataset.is_empty() {
        return Err(Error::EmptyDataset(format!("{}", dataset_dir.display())));
    }
    Ok(dataset)
}

/// 在 `loader` 的全部批次上做前向传播 (不记录梯度).
pub fn evaluate_batches<B: Backend>(
    model: &UNet<B>,
    loader: Arc<dyn DataLoader<SegmentationBatch<B>>>,
    loss_fn: LossFunction,
) -> Evaluation {
    let mut eval = Evaluation::default();
    let mut loss_sum = 0.0;
    for batch in loader.iter() {
        let n = batch.images.dims()[0];
        let logits = model.forward(batch.images);
        let loss: f64 = loss_fn
            .compute(logits.clone(), batch.masks.clone())
            .into_scalar()
            .elem();
        loss_sum += loss * n as f64;
        eval.counts += OverlapCounts::from_logits(logits, batch.masks, DEFAULT_THRESHOLD);
        eval.samples += n;
    }
    if eval.samples > 0 {
        eval.loss = loss_sum / eval.samples as f64;
    }
    eval
}

fn run<B, O>(
    config: &TrainingConfig,
    train_set: SliceDataset,
    valid_set: SliceDataset,
    artifact_dir: &Path,
    device: &B::Device,
    mut model: UNet<B>,
    mut optim: O,
) -> Result<TrainingReport>
where
    B: AutodiffBackend,
    O: Optimizer<UNet<B>, B>,
{
    let train_loader = DataLoaderBuilder::new(SegmentationBatcher::<B>::new(device.clone()))
        .batch_size(config.batch_size)
        .shuffle(config.seed)
        .num_workers(config.num_workers)
        .build(train_set);
    let valid_loader =
        DataLoaderBuilder::new(SegmentationBatcher::<B::InnerBackend>::new(device.clone()))
            .batch_size(config.batch_size)
            .num_workers(config.num_workers)
            .build(valid_set);

    let mut scheduler = ReduceLrOnPlateau::new(config.plateau.clone(), config.learning_rate);
    let recorder = CompactRecorder::new();
    let mut report = TrainingReport::default();
    let mut best_loss = f64::INFINITY;

    for epoch in 1..=config.num_epochs {
        let lr = scheduler.lr();
        let mut loss_sum = 0.0;
        let mut steps = 0usize;
        for (iteration, batch) in train_loader.iter().enumerate() {
            let logits = model.forward(batch.images);
            let loss = config.loss.compute(logits, batch.masks);
            let value: f64 = loss.clone().into_scalar().elem();
            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optim.step(lr, model, grads);

            loss_sum += value;
            steps += 1;
            if config.log_interval > 0 && (iteration + 1) % config.log_interval == 0 {
                log::info!("[epoch {epoch}, step {}] train_loss = {value:.5}", iteration + 1);
            }
        }
        let train_loss = if steps > 0 { loss_sum / steps as f64 } else { f64::NAN };

        let valid = evaluate_batches(&model.valid(), valid_loader.clone(), config.loss);
        scheduler.step(valid.loss);
        let summary = EpochSummary {
            epoch,
            train_loss,
            val_loss: valid.loss,
            dice: valid.dice(),
            iou: valid.iou(),
            lr,
        };
        log::info!(
            "[epoch {epoch}] train_loss = {:.5}, val_loss = {:.5}, dice = {:.4}, iou = {:.4}",
            summary.train_loss,
            summary.val_loss,
            summary.dice,
            summary.iou
        );

        model.clone().save_file(Checkpoint::Epoch(epoch).path(artifact_dir), &recorder)?;
        if valid.loss < best_loss {
            best_loss = valid.loss;
            report.best_epoch = Some(epoch);
            model.clone().save_file(Checkpoint::Best.path(artifact_dir), &recorder)?;
        }
        report.epochs.push(summary);
    }
    Ok(report)
}

/// 在 `dataset_dir` 的 LiTS 数据上训练 U-Net, 产物写入 `artifact_dir`:
/// `config.json`, 每轮的 `model-{epoch}`, 以及验证损失最低的 `best`.
pub fn train<B: AutodiffBackend>(
    config: &TrainingConfig,
    dataset_dir: &Path,
    artifact_dir: &Path,
    device: &B::Device,
) -> Result<TrainingReport> {
    fs::create_dir_all(artifact_dir)?;
    config.save(artifact_dir.join(CONFIG_FILE))?;
    B::seed(config.seed);

    let indices = crate::dataset::lits_train::discover(dataset_dir)?;
    let (train_idx, valid_idx) = split_indices(&indices, config.validation_fraction, config.seed)?;
    log::info!("训练集 {train_idx:?}, 验证集 {valid_idx:?}");

    let selection = SliceSelection {
        background_keep_ratio: config.background_keep_ratio,
        seed: config.seed,
    };
    let train_set = load_slices(&train_idx, dataset_dir, &selection)?;
    let valid_set = load_slices(&valid_idx, dataset_dir, &SliceSelection::default())?;
    log::info!("训练切片 {}, 验证切片 {}", train_set.len(), valid_set.len());

    let model = config.model.init::<B>(device)?;
    match config.optimizer {
        OptimizerKind::Adam => {
            let optim = AdamConfig::new().init::<B, UNet<B>>();
            run(config, train_set, valid_set, artifact_dir, device, model, optim)
        }
        OptimizerKind::Sgd => {
            let optim = SgdConfig::new().init::<B, UNet<B>>();
            run(config, train_set, valid_set, artifact_dir, device, model, optim)
        }
    }
}

/// 读取产物目录下的训练配置.
pub fn load_config(artifact_dir: &Path) -> Result<TrainingConfig> {
    let path = artifact_dir.join(CONFIG_FILE);
    TrainingConfig::load(&path).map_err(|e| Error::Config {
        path,
        reason: e.to_string(),
    })
}

/// 从产物目录加载模型结构和参数.
pub fn load_model<B: Backend>(artifact_dir: &Path, which: Checkpoint, device: &B::Device) -> Result<UNet<B>> {
    let config = load_config(artifact_dir)?;
    let model = config.model.init::<B>(device)?;
    Ok(model.load_file(which.path(artifact_dir), &CompactRecorder::new(), device)?)
}

/// 测试阶段: 在 `indices` 指定的体数据上计算平均损失, Dice 和 IoU.
pub fn evaluate<B: Backend>(
    artifact_dir: &Path,
    which: Checkpoint,
    dataset_dir: &Path,
    indices: &[u32],
    device: &B::Device,
) -> Result<Evaluation> {
    let config = load_config(artifact_dir)?;
    let model = load_model::<B>(artifact_dir, which, device)?;
    let test_set = load_slices(indices, dataset_dir, &SliceSelection::default())?;
    let loader = DataLoaderBuilder::new(SegmentationBatcher::<B>::new(device.clone()))
        .batch_size(config.batch_size)
        .num_workers(config.num_workers)
        .build(test_set);
    let eval = evaluate_batches(&model, loader, config.loss);
    log::info!(
        "test_loss = {:.5}, dice = {:.4}, iou = {:.4} ({} 张切片)",
        eval.loss,
        eval.dice(),
        eval.iou(),
        eval.samples
    );
    Ok(eval)
}
