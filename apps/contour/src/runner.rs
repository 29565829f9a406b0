//! 程序运行函数.

use crate::profile::Profile;
use crate::{EvaluateArgs, InferArgs, TrainArgs};
use anyhow::{anyhow, ensure, Context, Result};
use burn::config::Config;
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::{Distribution, Tensor};
use ct_contour::dicom::pixel_arrays;
use ct_contour::infer::{self, InferenceConfig, InferenceOutput};
use ct_contour::model::UNetConfig;
use ct_contour::train::{self, Evaluation, TrainingConfig, TrainingReport};
use ct_contour::{save_overlay, MaskSlice, ScanSlice};
use ndarray::{Array3, Axis};
use std::fs;
use std::path::{Path, PathBuf};
use utils::loader;

/// 解析数据集目录并确认其存在.
fn dataset_dir(given: Option<&Path>) -> Result<PathBuf> {
    let dir = loader::train_dir_or_default(given).with_context(|| {
        format!(
            "无法确定数据集目录, 请使用 --dataset 或设置 ${}",
            loader::TRAIN_DIR_ENV
        )
    })?;
    ensure!(dir.is_dir(), "数据集目录 {} 不存在", dir.display());
    Ok(dir)
}

fn load_json_config<C: Config>(path: &Path) -> Result<C> {
    C::load(path).map_err(|e| anyhow!("读取配置 {} 失败: {e}", path.display()))
}

/// 训练. 命令行选项覆盖配置文件中的值.
pub fn train<B: AutodiffBackend>(
    args: &TrainArgs,
    device: &B::Device,
) -> Result<(TrainingReport, Profile)> {
    let mut profile = Profile::new();
    let dataset_dir = dataset_dir(args.dataset.as_deref())?;

    let mut config = match &args.config {
        Some(p) => load_json_config::<TrainingConfig>(p)?,
        None => TrainingConfig::new(),
    };
    if let Some(e) = args.epochs {
        config.num_epochs = e;
    }
    if let Some(b) = args.batch_size {
        config.batch_size = b;
    }
    if let Some(lr) = args.learning_rate {
        config.learning_rate = lr;
    }
    if let Some(loss) = args.loss {
        config.loss = loss;
    }
    if let Some(optim) = args.optimizer {
        config.optimizer = optim;
    }
    match args.workers {
        Some(0) => config.num_workers = utils::cpus(),
        Some(w) => config.num_workers = w,
        None => {}
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    ensure!(config.num_epochs > 0, "训练轮数必须为正");
    ensure!(config.batch_size > 0, "batch size 必须为正");

    log::info!(
        "在 {} 上训练, 产物写入 {}",
        dataset_dir.display(),
        args.artifact_dir.display()
    );
    let report = profile
        .stage("train", || {
            train::train::<B>(&config, &dataset_dir, &args.artifact_dir, device)
        })
        .context("训练失败")?;
    Ok((report, profile.finish()))
}

/// 测试. 未给出 volume 时使用训练时划出的验证集.
pub fn evaluate<B: Backend>(args: &EvaluateArgs, device: &B::Device) -> Result<(Evaluation, Profile)> {
    let mut profile = Profile::new();
    let dataset_dir = dataset_dir(args.dataset.as_deref())?;

    let indices = match &args.volumes {
        Some(s) => {
            let given = loader::parse_indices(s)
                .with_context(|| format!("无法解析 volume 索引 `{s}`"))?;
            loader::volume_indices(&dataset_dir, Some(&given))?
        }
        None => {
            let config = train::load_config(&args.artifact_dir)?;
            let all = loader::volume_indices(&dataset_dir, None)?;
            train::split_indices(&all, config.validation_fraction, config.seed)?.1
        }
    };
    ensure!(!indices.is_empty(), "没有可用于测试的 volume");
    log::info!("测试 volume: {indices:?}");

    let eval = profile
        .stage("evaluate", || {
            train::evaluate::<B>(&args.artifact_dir, args.checkpoint, &dataset_dir, &indices, device)
        })
        .context("测试失败")?;
    profile.count_slices(eval.samples);
    Ok((eval, profile.finish()))
}

/// 推理. 写出 `RS.{uid}.dcm`, 或在 `--masks` 时写出 `masks.npy` 及可选的预览图.
pub fn infer<B: Backend>(args: &InferArgs, device: &B::Device) -> Result<Profile> {
    let mut profile = Profile::new();

    let mut config = match &args.config {
        Some(p) => load_json_config::<InferenceConfig>(p)?,
        None => InferenceConfig::new(),
    };
    if let Some(t) = args.threshold {
        config.threshold = t;
    }
    if let Some(root) = &args.root_uid {
        config.root_uid = root.clone();
    }
    if let Some(name) = &args.roi_name {
        config.structure.roi_name = name.clone();
    }

    let series = profile
        .stage("load", || infer::load_series(&args.study_dir))
        .with_context(|| format!("读取序列 {} 失败", args.study_dir.display()))?;
    profile.count_slices(series.len());
    log::info!("CT 序列共 {} 张切片", series.len());

    let divisor = train::load_config(&args.artifact_dir)?.model.required_divisor();
    let model = profile
        .stage("model", || {
            train::load_model::<B>(&args.artifact_dir, args.checkpoint, device)
        })
        .with_context(|| format!("加载模型 {} 失败", args.artifact_dir.display()))?;

    let output = profile
        .stage("predict", || {
            infer::infer_series(&series, &model, divisor, &config, !args.masks, device)
        })
        .context("推理失败")?;

    fs::create_dir_all(&args.output)?;
    match output {
        InferenceOutput::Structure(rs) => {
            let path = args.output.join(infer::structure_file_name(&rs));
            profile
                .stage("write", || rs.write_to_file(&path))
                .with_context(|| format!("写入 {} 失败", path.display()))?;
            log::info!("结构集已写入 {}", path.display());
        }
        InferenceOutput::Masks(masks) => {
            let path = args.output.join("masks.npy");
            profile
                .stage("write", || infer::write_masks_npy(&path, &masks))
                .with_context(|| format!("写入 {} 失败", path.display()))?;
            log::info!("掩码已写入 {}", path.display());

            if let Some(dir) = &args.preview {
                let pixels = pixel_arrays(&series)?;
                let n = profile.stage("preview", || write_previews(&pixels, &masks, dir))?;
                log::info!("{n} 张预览图已写入 {}", dir.display());
            }
        }
    }
    Ok(profile.finish())
}

/// 把含前景的切片以叠加图形式写入 `dir`, 文件名为切片序号. 返回写出的张数.
fn write_previews(pixels: &Array3<f32>, masks: &Array3<u8>, dir: &Path) -> Result<usize> {
    ensure!(pixels.shape() == masks.shape(), "像素与掩码形状不一致");
    fs::create_dir_all(dir)?;
    let window = utils::liver_window();
    let mut count = 0;
    for (z, (scan, mask)) in pixels
        .axis_iter(Axis(0))
        .zip(masks.axis_iter(Axis(0)))
        .enumerate()
    {
        let mask = MaskSlice::new(mask);
        if !mask.has_foreground() {
            continue;
        }
        let path = dir.join(format!("{z:04}.png"));
        save_overlay(&ScanSlice::new(scan), &mask, window, &path)
            .with_context(|| format!("写入 {} 失败", path.display()))?;
        count += 1;
    }
    Ok(count)
}

/// 用形状为 `[batch, 1, size, size]` 的随机输入前向传播, 检查输出形状与输入一致.
pub fn check<B: Backend>(batch: usize, size: usize, device: &B::Device) -> Result<()> {
    let config = UNetConfig::new();
    let divisor = config.required_divisor();
    ensure!(
        size % divisor == 0,
        "输入边长 {size} 必须是 {divisor} 的整数倍"
    );
    let model = config.init::<B>(device)?;
    let shape = [batch, config.input_channels, size, size];
    let x = Tensor::<B, 4>::random(shape, Distribution::Default, device);
    let y = model.forward(x);
    let expected = [batch, config.output_channels, size, size];
    ensure!(
        y.dims() == expected,
        "输出形状 {:?} 与期望 {expected:?} 不一致",
        y.dims()
    );
    println!("U-Net 深度 {}, 输入 {shape:?}, 输出 {:?}: OK", model.depth(), y.dims());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use ndarray::s;

    #[test]
    fn test_write_previews_skips_background() {
        let dir = std::env::temp_dir().join(format!("contour-preview-{}", std::process::id()));
        let pixels = Array3::<f32>::zeros((3, 8, 8));
        let mut masks = Array3::<u8>::zeros((3, 8, 8));
        masks.slice_mut(s![1, 2..5, 2..5]).fill(1);

        assert_eq!(write_previews(&pixels, &masks, &dir).unwrap(), 1);
        assert!(dir.join("0001.png").is_file());
        assert!(!dir.join("0000.png").exists());
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_check_rejects_indivisible_size() {
        assert!(check::<NdArray>(1, 48, &Default::default()).is_err());
    }
}
