//! 推理: 读取 CT 序列, 逐切片预测掩码, 并转换为 RT Structure Set.
//!
//! 流程为 glob `*.dcm` -> 强制读取 -> 补全传输语法 -> 选出 CT 序列 -> 按位置排序
//! -> 全序列 z-score 标准化 -> 逐切片前向传播 -> sigmoid 与门限 -> 轮廓 -> 结构集.

use crate::consts::dicom::DEFAULT_ROOT_UID;
use crate::consts::DEFAULT_THRESHOLD;
use crate::contour::{predict_to_structure, PostProcess, SliceStructure};
use crate::dicom::{
    add_transfer_syntax, create_rs_file, filter_dicom_files, glob_series, pixel_arrays,
    read_dicom_paths, sort_slice_location, StructureSetOptions,
};
use crate::error::Error;
use crate::model::UNet;
use crate::normalize::ZScore;
use crate::train::{load_config, load_model, Checkpoint};
use crate::MaskSlice;
use burn::config::Config;
use burn::tensor::activation::sigmoid;
use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};
use dicom_dictionary_std::tags;
use dicom_object::DefaultDicomObject;
use ndarray::{Array3, Array4, ArrayView2, Axis};
use std::path::Path;

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        use rayon::iter::{IndexedParallelIterator, IntoParallelRefIterator, ParallelIterator};
    }
}

/// 推理参数.
#[derive(Config, Debug)]
pub struct InferenceConfig {
    /// 作用于 sigmoid 概率的二值化门限.
    #[config(default = "DEFAULT_THRESHOLD")]
    pub threshold: f32,

    /// 新 UID 的根.
    #[config(default = "DEFAULT_ROOT_UID.to_string()")]
    pub root_uid: String,

    /// 轮廓提取前的掩码后处理.
    #[config(default = "PostProcess::default()")]
    pub post_process: PostProcess,

    /// 结构集描述信息.
    #[config(default = "StructureSetOptions::default()")]
    pub structure: StructureSetOptions,
}

/// 推理结果.
#[derive(Debug, Clone)]
pub enum InferenceOutput {
    /// RT Structure Set 文件对象.
    Structure(DefaultDicomObject),

    /// 逐切片的 `{0, 1}` 掩码, 形状为 (切片, 高, 宽).
    Masks(Array3<u8>),
}

/// 读取目录下的 CT 序列, 按切片位置升序排列.
pub fn load_series<P: AsRef<Path>>(study_dir: P) -> crate::Result<Vec<DefaultDicomObject>> {
    let paths = glob_series(study_dir.as_ref())?;
    log::info!("`{}` 下共 {} 个 dcm 文件", study_dir.as_ref().display(), paths.len());
    let files = add_transfer_syntax(read_dicom_paths(&paths, true)?)?;
    let filtered = filter_dicom_files(files)?;
    if !filtered.rest.is_empty() {
        log::debug!("{} 个文件不属于选中的序列", filtered.rest.len());
    }
    sort_slice_location(filtered.series)
}

/// 检查切片形状能否被模型下采样倍数整除.
pub fn check_divisible((h, w): (usize, usize), divisor: usize) -> crate::Result<()> {
    if h % divisor != 0 || w % divisor != 0 {
        return Err(Error::IndivisibleInput {
            shape: (h, w),
            divisor,
        });
    }
    Ok(())
}

/// 以整个序列的均值和标准差标准化, 并增加通道维: (n, H, W) -> (n, 1, H, W).
pub fn load_inputs(pixels: &Array3<f32>) -> crate::Result<Array4<f32>> {
    let norm = ZScore::fit(pixels.iter())?;
    log::debug!("序列均值 {:.2}, 标准差 {:.2}", norm.mean(), norm.std());
    Ok(pixels.mapv(|v| norm.apply(v)).insert_axis(Axis(1)))
}

fn slice_tensor<B: Backend>(slice: ArrayView2<f32>, device: &B::Device) -> Tensor<B, 4> {
    let &[h, w] = slice.shape() else {
        unreachable!()
    };
    let values: Vec<f32> = slice.iter().copied().collect();
    Tensor::from_data(TensorData::new(values, [1, 1, h, w]), device)
}

/// 每次一张切片做前向传播, 取第一个输出通道的 sigmoid 概率, 以 `threshold`
/// 二值化为 `{0, 1}` 掩码.
pub fn predict<B: Backend>(
    model: &UNet<B>,
    inputs: &Array4<f32>,
    threshold: f32,
    device: &B::Device,
) -> crate::Result<Array3<u8>> {
    let &[n, _, h, w] = inputs.shape() else {
        unreachable!()
    };
    let mut masks = Array3::<u8>::zeros((n, h, w));
    for (i, (x, mut dst)) in inputs.outer_iter().zip(masks.outer_iter_mut()).enumerate() {
        let logits = model.forward(slice_tensor::<B>(x.index_axis(Axis(0), 0), device));
        let probs = sigmoid(logits.slice([0..1, 0..1, 0..h, 0..w]));
        let values = probs
            .greater_equal_elem(threshold)
            .float()
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| Error::TensorData(format!("{e:?}")))?;
        for (d, v) in dst.iter_mut().zip(values) {
            *d = u8::from(v > 0.5);
        }
        log::trace!("切片 {i}: {} 个前景像素", dst.iter().filter(|p| **p != 0).count());
    }
    Ok(masks)
}

/// 把每张切片的掩码转换为轮廓, 并生成结构集. 掩码个数必须与切片个数一致.
pub fn convert_to_dicom_rs(
    series: &[DefaultDicomObject],
    masks: &Array3<u8>,
    root_uid: &str,
    post: &PostProcess,
    options: &StructureSetOptions,
) -> crate::Result<DefaultDicomObject> {
    let predictions = masks.len_of(Axis(0));
    if predictions != series.len() {
        return Err(Error::CountMismatch {
            slices: series.len(),
            predictions,
        });
    }
    let to_structure = |(obj, i): (&DefaultDicomObject, usize)| -> crate::Result<SliceStructure> {
        predict_to_structure(obj, MaskSlice::new(masks.index_axis(Axis(0), i)), post)
    };

    #[cfg(feature = "rayon")]
    let structures = series
        .par_iter()
        .zip(0..predictions)
        .map(to_structure)
        .collect::<crate::Result<Vec<_>>>()?;
    #[cfg(not(feature = "rayon"))]
    let structures = series
        .iter()
        .zip(0..predictions)
        .map(to_structure)
        .collect::<crate::Result<Vec<_>>>()?;

    create_rs_file(series, &structures, root_uid, options)
}

/// 对一个检查目录推理.
///
/// `convert_to_dicom` 为 `true` 时返回结构集, 否则返回原始掩码.
pub fn infer_series<B: Backend>(
    series: &[DefaultDicomObject],
    model: &UNet<B>,
    divisor: usize,
    config: &InferenceConfig,
    convert_to_dicom: bool,
    device: &B::Device,
) -> crate::Result<InferenceOutput> {
    let pixels = pixel_arrays(series)?;
    let &[_, h, w] = pixels.shape() else {
        unreachable!()
    };
    check_divisible((h, w), divisor)?;
    let inputs = load_inputs(&pixels)?;
    let masks = predict(model, &inputs, config.threshold, device)?;

    if convert_to_dicom {
        let rs = convert_to_dicom_rs(
            series,
            &masks,
            &config.root_uid,
            &config.post_process,
            &config.structure,
        )?;
        Ok(InferenceOutput::Structure(rs))
    } else {
        Ok(InferenceOutput::Masks(masks))
    }
}

/// 读取 `study_dir` 下的 CT 序列, 用 `artifact_dir` 中的模型推理.
pub fn infer_contours<B: Backend>(
    study_dir: &Path,
    artifact_dir: &Path,
    checkpoint: Checkpoint,
    config: &InferenceConfig,
    convert_to_dicom: bool,
    device: &B::Device,
) -> crate::Result<InferenceOutput> {
    let series = load_series(study_dir)?;
    let divisor = load_config(artifact_dir)?.model.required_divisor();
    let model = load_model::<B>(artifact_dir, checkpoint, device)?;
    infer_series(&series, &model, divisor, config, convert_to_dicom, device)
}

/// 结构集的标准文件名 `RS.{SOPInstanceUID}.dcm`.
pub fn structure_file_name(rs: &DefaultDicomObject) -> String {
    let uid = rs
        .element(tags::SOP_INSTANCE_UID)
        .ok()
        .and_then(|e| e.to_str().ok().map(|s| s.trim_end_matches('\0').to_string()))
        .unwrap_or_else(|| "unknown".to_string());
    format!("RS.{uid}.dcm")
}

/// 把掩码写为 `.npy` 文件.
pub fn write_masks_npy<P: AsRef<Path>>(path: P, masks: &Array3<u8>) -> crate::Result<()> {
    ndarray_npy::write_npy(path, masks)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dicom::testing::ct_slice;
    use crate::model::UNetConfig;
    use burn::backend::NdArray;
    use ndarray::s;

    type B = NdArray;

    #[test]
    fn test_load_inputs() {
        let pixels = Array3::<f32>::from_shape_fn((2, 2, 2), |(z, h, w)| (z * 4 + h * 2 + w) as f32);
        let inputs = load_inputs(&pixels).unwrap();
        assert_eq!(inputs.shape(), &[2, 1, 2, 2]);
        let mean = inputs.mean().unwrap();
        let var = inputs.mapv(|v| (v - mean) * (v - mean)).mean().unwrap();
        assert!(mean.abs() < 1e-6);
        assert!((var - 1.0).abs() < 1e-5);

        let flat = Array3::<f32>::from_elem((2, 2, 2), 3.0);
        assert!(matches!(load_inputs(&flat), Err(Error::ZeroVariance)));
    }

    #[test]
    fn test_check_divisible() {
        assert!(check_divisible((512, 512), 32).is_ok());
        assert!(matches!(
            check_divisible((500, 512), 32),
            Err(Error::IndivisibleInput { shape: (500, 512), divisor: 32 })
        ));
    }

    #[test]
    fn test_predict_shape_and_values() {
        let device = Default::default();
        let model = UNetConfig::new()
            .with_encoder_channels(vec![2, 4])
            .init::<B>(&device)
            .unwrap();
        let inputs = Array4::<f32>::from_shape_fn((3, 1, 8, 8), |(z, _, h, w)| (z + h + w) as f32 / 10.0);
        let masks = predict(&model, &inputs, 0.5, &device).unwrap();
        assert_eq!(masks.shape(), &[3, 8, 8]);
        assert!(masks.iter().all(|v| *v <= 1));

        // 门限为 0 时所有像素都是前景, 大于 1 时都是背景.
        assert!(predict(&model, &inputs, 0.0, &device).unwrap().iter().all(|v| *v == 1));
        assert!(predict(&model, &inputs, 1.1, &device).unwrap().iter().all(|v| *v == 0));
    }

    #[test]
    fn test_convert_to_dicom_rs() {
        let series = vec![
            ct_slice("1.2.3.1", 1, 0.0, (4, 4), 0),
            ct_slice("1.2.3.1", 2, 2.0, (4, 4), 0),
        ];
        let mut masks = Array3::<u8>::zeros((2, 4, 4));
        masks.slice_mut(s![1, 1..3, 1..3]).fill(1);
        let rs = convert_to_dicom_rs(
            &series,
            &masks,
            DEFAULT_ROOT_UID,
            &PostProcess::default(),
            &StructureSetOptions::default(),
        )
        .unwrap();
        let roi_contour = &rs
            .element(tags::ROI_CONTOUR_SEQUENCE)
            .unwrap()
            .items()
            .unwrap()[0];
        let contours = roi_contour.element(tags::CONTOUR_SEQUENCE).unwrap().items().unwrap();
        assert_eq!(contours.len(), 1);
        assert!(structure_file_name(&rs).starts_with(&format!("RS.{DEFAULT_ROOT_UID}")));

        let too_few = Array3::<u8>::zeros((1, 4, 4));
        assert!(matches!(
            convert_to_dicom_rs(
                &series,
                &too_few,
                DEFAULT_ROOT_UID,
                &PostProcess::default(),
                &StructureSetOptions::default()
            ),
            Err(Error::CountMismatch { slices: 2, predictions: 1 })
        ));
    }

    #[test]
    fn test_infer_series_masks() {
        let device = Default::default();
        let model = UNetConfig::new()
            .with_encoder_channels(vec![2, 4])
            .init::<B>(&device)
            .unwrap();
        let series = vec![
            ct_slice("1.2.3.1", 1, 0.0, (4, 4), 1000),
            ct_slice("1.2.3.1", 2, 2.0, (4, 4), 1100),
        ];
        let config = InferenceConfig::new();
        match infer_series(&series, &model, 2, &config, false, &device).unwrap() {
            InferenceOutput::Masks(m) => assert_eq!(m.shape(), &[2, 4, 4]),
            InferenceOutput::Structure(_) => panic!("期望掩码"),
        }
        assert!(matches!(
            infer_series(&series, &model, 8, &config, true, &device),
            Err(Error::IndivisibleInput { .. })
        ));
    }

    /// 在临时目录中准备一个检查目录 (两张乱序 CT 切片和一个 MR 文件) 与一个产物目录.
    fn study_and_artifacts(tag: &str) -> (std::path::PathBuf, std::path::PathBuf) {
        use crate::train::{TrainingConfig, CONFIG_FILE};
        use burn::module::Module;
        use burn::record::CompactRecorder;
        use dicom_core::{DataElement, PrimitiveValue, VR};

        let root = std::env::temp_dir().join(format!("ct-contour-{tag}-{}", std::process::id()));
        let (study, artifacts) = (root.join("study"), root.join("artifacts"));
        std::fs::create_dir_all(&study).unwrap();
        std::fs::create_dir_all(&artifacts).unwrap();

        ct_slice("1.2.3.1", 1, 2.0, (4, 4), 1000).write_to_file(study.join("a.dcm")).unwrap();
        ct_slice("1.2.3.1", 2, 0.0, (4, 4), 1100).write_to_file(study.join("b.dcm")).unwrap();
        let mut mr = ct_slice("1.2.3.2", 3, 0.0, (4, 4), 0);
        mr.put(DataElement::new(tags::MODALITY, VR::CS, PrimitiveValue::from("MR")));
        mr.write_to_file(study.join("c.dcm")).unwrap();

        let device = Default::default();
        let config = TrainingConfig::new()
            .with_model(UNetConfig::new().with_encoder_channels(vec![2, 4]));
        config.save(artifacts.join(CONFIG_FILE)).unwrap();
        let model = config.model.init::<B>(&device).unwrap();
        model
            .save_file(Checkpoint::Best.path(&artifacts), &CompactRecorder::new())
            .unwrap();
        (study, artifacts)
    }

    #[test]
    fn test_infer_contours_from_directory() {
        let device = Default::default();
        let (study, artifacts) = study_and_artifacts("infer-rs");
        // 门限为 0 时每张切片都是整片前景, 各得到一条轮廓.
        let config = InferenceConfig::new().with_threshold(0.0);
        let rs = match infer_contours::<B>(&study, &artifacts, Checkpoint::Best, &config, true, &device)
            .unwrap()
        {
            InferenceOutput::Structure(rs) => rs,
            InferenceOutput::Masks(_) => panic!("期望结构集"),
        };

        let referenced = |item: &dicom_object::InMemDicomObject| {
            let image = &item
                .element(tags::CONTOUR_IMAGE_SEQUENCE)
                .unwrap()
                .items()
                .unwrap()[0];
            image
                .element(tags::REFERENCED_SOP_INSTANCE_UID)
                .unwrap()
                .to_str()
                .unwrap()
                .trim_end_matches('\0')
                .to_string()
        };
        let roi_contour = &rs
            .element(tags::ROI_CONTOUR_SEQUENCE)
            .unwrap()
            .items()
            .unwrap()[0];
        let contours = roi_contour.element(tags::CONTOUR_SEQUENCE).unwrap().items().unwrap();
        // 按切片位置排序: z = 0 的 b.dcm 在前, MR 文件被滤除.
        let uids: Vec<_> = contours.iter().map(referenced).collect();
        assert_eq!(uids, vec!["1.2.3.4.2", "1.2.3.4.1"]);
        let data = contours[0]
            .element(tags::CONTOUR_DATA)
            .unwrap()
            .to_multi_float64()
            .unwrap();
        assert!(data.chunks(3).all(|p| p[2] == 0.0));

        std::fs::remove_dir_all(study.parent().unwrap()).unwrap();
    }

    #[test]
    fn test_infer_contours_masks() {
        let device = Default::default();
        let (study, artifacts) = study_and_artifacts("infer-masks");
        let config = InferenceConfig::new().with_threshold(1.1);
        match infer_contours::<B>(&study, &artifacts, Checkpoint::Best, &config, false, &device)
            .unwrap()
        {
            InferenceOutput::Masks(m) => {
                assert_eq!(m.shape(), &[2, 4, 4]);
                assert!(m.iter().all(|v| *v == 0));
            }
            InferenceOutput::Structure(_) => panic!("期望掩码"),
        }
        assert!(matches!(
            infer_contours::<B>(&study, &artifacts, Checkpoint::Epoch(3), &config, false, &device),
            Err(Error::Recorder(_))
        ));
        std::fs::remove_dir_all(study.parent().unwrap()).unwrap();
    }

    #[test]
    fn test_write_masks_npy() {
        let path = std::env::temp_dir().join(format!("ct-contour-masks-{}.npy", std::process::id()));
        let masks = Array3::<u8>::from_shape_fn((2, 3, 4), |(z, h, w)| ((z + h + w) % 2) as u8);
        write_masks_npy(&path, &masks).unwrap();
        let back: Array3<u8> = ndarray_npy::read_npy(&path).unwrap();
        assert_eq!(back, masks);
        std::fs::remove_file(&path).unwrap();
    }
}
