//! CT 图像序列的读取与整理.

use super::{f64_attr, opt_str_attr, PixelGrid};
use crate::consts::dicom::CT_MODALITY;
use crate::error::{Error, Result};
use dicom_dictionary_std::{tags, uids};
use dicom_encoding::transfer_syntax::TransferSyntaxIndex;
use dicom_object::file::ReadPreamble;
use dicom_object::meta::FileMetaTableBuilder;
use dicom_object::{DefaultDicomObject, InMemDicomObject, OpenFileOptions};
use dicom_pixeldata::PixelDecoder;
use dicom_transfer_syntax_registry::TransferSyntaxRegistry;
use itertools::Itertools;
use ndarray::{s, Array2, Array3};
use ordered_float::OrderedFloat;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
    }
}

/// 读取得到的 DICOM 文件.
#[derive(Debug, Clone)]
pub enum ReadDicom {
    /// 带有文件元信息的标准 DICOM 文件.
    WithMeta(DefaultDicomObject),

    /// 缺少前导区和文件元信息, 按隐式 VR 小端序强制读取的数据集.
    Bare(InMemDicomObject),
}

/// 目录 `study_dir` 下所有扩展名为 `dcm` (不区分大小写) 的文件, 按路径排序.
pub fn glob_series<P: AsRef<Path>>(study_dir: P) -> Result<Vec<PathBuf>> {
    let mut ans = Vec::new();
    for entry in fs::read_dir(study_dir.as_ref())? {
        let path = entry?.path();
        let is_dcm = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("dcm"));
        if is_dcm && path.is_file() {
            ans.push(path);
        }
    }
    ans.sort_unstable();
    Ok(ans)
}

fn read_bare(path: &Path) -> Option<InMemDicomObject> {
    let ts = TransferSyntaxRegistry.get(uids::IMPLICIT_VR_LITTLE_ENDIAN)?;
    let file = BufReader::new(File::open(path).ok()?);
    InMemDicomObject::read_dataset_with_ts(file, ts).ok()
}

fn read_one(path: &Path, force: bool) -> Result<ReadDicom> {
    match OpenFileOptions::new()
        .read_preamble(ReadPreamble::Auto)
        .open_file(path)
    {
        Ok(obj) => Ok(ReadDicom::WithMeta(obj)),
        Err(source) => {
            if force {
                if let Some(obj) = read_bare(path) {
                    log::debug!("`{}` 缺少文件元信息, 已强制读取", path.display());
                    return Ok(ReadDicom::Bare(obj));
                }
            }
            Err(Error::DicomRead {
                path: path.to_path_buf(),
                source,
            })
        }
    }
}

/// 依次读取 `paths` 中的每个文件. 启用 `force` 时, 缺少前导区或文件元信息的文件
/// 按隐式 VR 小端序数据集读取, 得到 [`ReadDicom::Bare`]; 仍无法读取的文件记录
/// 警告后跳过.
///
/// 未启用 `force` 时, 任一文件无法读取即返回 `Err`. 结果顺序与 `paths` 一致.
pub fn read_dicom_paths<P: AsRef<Path> + Sync>(paths: &[P], force: bool) -> Result<Vec<ReadDicom>> {
    #[cfg(feature = "rayon")]
    let files: Vec<_> = paths.par_iter().map(|p| read_one(p.as_ref(), force)).collect();
    #[cfg(not(feature = "rayon"))]
    let files: Vec<_> = paths.iter().map(|p| read_one(p.as_ref(), force)).collect();

    if !force {
        return files.into_iter().collect();
    }
    Ok(files
        .into_iter()
        .filter_map(|f| match f {
            Ok(f) => Some(f),
            Err(e) => {
                log::warn!("跳过无法读取的文件: {e}");
                None
            }
        })
        .collect())
}

/// 为缺少文件元信息的数据集补上元信息, 传输语法记为隐式 VR 小端序.
pub fn add_transfer_syntax(files: Vec<ReadDicom>) -> Result<Vec<DefaultDicomObject>> {
    files
        .into_iter()
        .map(|f| match f {
            ReadDicom::WithMeta(obj) => Ok(obj),
            ReadDicom::Bare(obj) => {
                let class = opt_str_attr(&obj, tags::SOP_CLASS_UID).unwrap_or_default();
                let instance = opt_str_attr(&obj, tags::SOP_INSTANCE_UID).unwrap_or_default();
                let meta = FileMetaTableBuilder::new()
                    .media_storage_sop_class_uid(class)
                    .media_storage_sop_instance_uid(instance)
                    .transfer_syntax(uids::IMPLICIT_VR_LITTLE_ENDIAN);
                Ok(obj.with_meta(meta)?)
            }
        })
        .collect()
}

/// 按序列筛选后的文件.
#[derive(Debug, Clone)]
pub struct FilteredFiles {
    /// 选中的 CT 图像序列, 顺序未定.
    pub series: Vec<DefaultDicomObject>,

    /// 其余文件.
    pub rest: Vec<DefaultDicomObject>,
}

/// 是否是 CT 图像?
fn is_ct_image(obj: &InMemDicomObject) -> bool {
    let is_ct = opt_str_attr(obj, tags::MODALITY).is_some_and(|m| m == CT_MODALITY)
        || opt_str_attr(obj, tags::SOP_CLASS_UID).is_some_and(|c| c == uids::CT_IMAGE_STORAGE);
    is_ct && obj.element(tags::PIXEL_DATA).is_ok()
}

/// 挑出 CT 图像, 并按 `SeriesInstanceUID` 分组. 切片数最多的序列被选中
/// (切片数相同时取 UID 字典序最小者), 其余 CT 序列与非 CT 文件归入 `rest`.
///
/// 没有任何 CT 图像时返回 [`Error::EmptySeries`].
pub fn filter_dicom_files(files: Vec<DefaultDicomObject>) -> Result<FilteredFiles> {
    let (ct, mut rest): (Vec<_>, Vec<_>) = files.into_iter().partition(|f| is_ct_image(f));
    let mut groups = ct
        .into_iter()
        .into_group_map_by(|f| opt_str_attr(f, tags::SERIES_INSTANCE_UID).unwrap_or_default());

    let chosen = groups
        .iter()
        .max_by(|(ua, a), (ub, b)| a.len().cmp(&b.len()).then_with(|| ub.cmp(ua)))
        .map(|(uid, _)| uid.clone())
        .ok_or(Error::EmptySeries)?;
    let series = groups.remove(&chosen).unwrap_or_default();
    if !groups.is_empty() {
        log::warn!("发现 {} 个其它 CT 序列, 已忽略", groups.len());
    }
    rest.extend(groups.into_values().flatten());

    log::info!("选中序列 `{chosen}`, 共 {} 张切片", series.len());
    Ok(FilteredFiles { series, rest })
}

/// 单张切片的排序位置: `SliceLocation`, 以及图像位置在切片法向量上的投影.
pub fn slice_location(obj: &InMemDicomObject) -> Result<(Option<f64>, f64)> {
    let declared = f64_attr(obj, tags::SLICE_LOCATION, "SliceLocation").ok();
    let projected = PixelGrid::from_object(obj)?.location();
    Ok((declared, projected))
}

/// 按切片位置升序排列. 所有切片都带有 `SliceLocation` 时以其排序,
/// 否则统一使用图像位置在法向量上的投影.
pub fn sort_slice_location(series: Vec<DefaultDicomObject>) -> Result<Vec<DefaultDicomObject>> {
    let locations = series
        .iter()
        .map(|obj| slice_location(obj))
        .collect::<Result<Vec<_>>>()?;
    let declared = locations.iter().all(|(d, _)| d.is_some());
    if !declared {
        log::debug!("部分切片缺少 SliceLocation, 改用图像位置排序");
    }

    Ok(series
        .into_iter()
        .zip(locations)
        .map(|(obj, (d, p))| (OrderedFloat(if declared { d.unwrap_or(p) } else { p }), obj))
        .sorted_by_key(|(k, _)| *k)
        .map(|(_, obj)| obj)
        .collect())
}

fn pixel_array(obj: &DefaultDicomObject) -> Result<Array2<f32>> {
    let decoded = obj.decode_pixel_data()?;
    let data = decoded.to_ndarray::<f32>()?;
    Ok(data.slice(s![0, .., .., 0]).to_owned())
}

/// 解码序列中每张切片的像素 (已应用 modality LUT, 即 HU 值), 形状为 (切片, 高, 宽).
///
/// 所有切片形状必须一致, 否则返回 [`Error::ShapeMismatch`].
pub fn pixel_arrays(series: &[DefaultDicomObject]) -> Result<Array3<f32>> {
    if series.is_empty() {
        return Err(Error::EmptySeries);
    }
    #[cfg(feature = "rayon")]
    let slices = series.par_iter().map(pixel_array).collect::<Result<Vec<_>>>()?;
    #[cfg(not(feature = "rayon"))]
    let slices = series.iter().map(pixel_array).collect::<Result<Vec<_>>>()?;

    let &[h, w] = slices[0].shape() else {
        unreachable!()
    };
    let mut ans = Array3::<f32>::zeros((slices.len(), h, w));
    for (mut dst, src) in ans.outer_iter_mut().zip(slices.iter()) {
        let &[sh, sw] = src.shape() else {
            unreachable!()
        };
        if (sh, sw) != (h, w) {
            return Err(Error::ShapeMismatch {
                expected: (h, w),
                found: (sh, sw),
            });
        }
        dst.assign(src);
    }
    Ok(ans)
}
