//! RT Structure Set 文件的生成.

use super::{generate_uid, opt_str_attr, str_attr};
use crate::consts::dicom::{CLOSED_PLANAR, RTSTRUCT_MODALITY, STUDY_COMPONENT_MANAGEMENT};
use crate::contour::SliceStructure;
use crate::error::{Error, Result};
use dicom_core::value::DataSetSequence;
use dicom_core::{DataElement, Length, PrimitiveValue, Tag, VR};
use dicom_dictionary_std::{tags, uids};
use dicom_object::meta::FileMetaTableBuilder;
use dicom_object::{DefaultDicomObject, InMemDicomObject};
use serde::{Deserialize, Serialize};

/// 从 CT 序列原样复制到结构集的病人与检查属性. 源文件缺失时写入空值.
const COPIED_ATTRIBUTES: [(Tag, VR); 12] = [
    (tags::PATIENT_NAME, VR::PN),
    (tags::PATIENT_ID, VR::LO),
    (tags::PATIENT_BIRTH_DATE, VR::DA),
    (tags::PATIENT_SEX, VR::CS),
    (tags::STUDY_DATE, VR::DA),
    (tags::STUDY_TIME, VR::TM),
    (tags::STUDY_ID, VR::SH),
    (tags::STUDY_DESCRIPTION, VR::LO),
    (tags::ACCESSION_NUMBER, VR::SH),
    (tags::REFERRING_PHYSICIAN_NAME, VR::PN),
    (tags::INSTITUTION_NAME, VR::LO),
    (tags::OPERATORS_NAME, VR::PN),
];

/// 结构集中可定制的描述信息.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StructureSetOptions {
    /// ROI 名称.
    pub roi_name: String,

    /// ROI 编号.
    pub roi_number: u32,

    /// ROI 显示颜色 (RGB).
    pub roi_color: [u8; 3],

    /// RT ROI Interpreted Type, 如 `ORGAN`.
    pub interpreted_type: String,

    /// 结构集标签.
    pub label: String,

    /// 序列描述.
    pub series_description: String,

    /// 生产厂商.
    pub manufacturer: String,
}

impl Default for StructureSetOptions {
    fn default() -> Self {
        Self {
            roi_name: "Liver".to_string(),
            roi_number: 1,
            roi_color: [255, 0, 0],
            interpreted_type: "ORGAN".to_string(),
            label: "AutoContour".to_string(),
            series_description: "Automatic segmentation".to_string(),
            manufacturer: "ct-contour".to_string(),
        }
    }
}

fn put_str(obj: &mut InMemDicomObject, tag: Tag, vr: VR, value: impl Into<String>) {
    obj.put(DataElement::new(tag, vr, PrimitiveValue::from(value.into())));
}

fn put_strs<I: IntoIterator<Item = String>>(obj: &mut InMemDicomObject, tag: Tag, vr: VR, values: I) {
    obj.put(DataElement::new(
        tag,
        vr,
        PrimitiveValue::Strs(values.into_iter().collect()),
    ));
}

fn put_seq(obj: &mut InMemDicomObject, tag: Tag, items: Vec<InMemDicomObject>) {
    obj.put(DataElement::new(
        tag,
        VR::SQ,
        DataSetSequence::new(items, Length::UNDEFINED),
    ));
}

/// 十进制字符串 (DS) 最多 16 个字符.
fn format_ds(v: f64) -> String {
    for precision in (0..=6).rev() {
        let s = format!("{v:.precision$}");
        let s = if s.contains('.') {
            s.trim_end_matches('0').trim_end_matches('.')
        } else {
            s.as_str()
        };
        let s = if s == "-0" { "0" } else { s };
        if s.len() <= 16 {
            return s.to_string();
        }
    }
    format!("{v:.0e}")
}

/// 引用单张 CT 切片的条目.
fn image_reference(image: &InMemDicomObject) -> Result<InMemDicomObject> {
    let mut item = InMemDicomObject::new_empty();
    put_str(
        &mut item,
        tags::REFERENCED_SOP_CLASS_UID,
        VR::UI,
        str_attr(image, tags::SOP_CLASS_UID, "SOPClassUID")?,
    );
    put_str(
        &mut item,
        tags::REFERENCED_SOP_INSTANCE_UID,
        VR::UI,
        str_attr(image, tags::SOP_INSTANCE_UID, "SOPInstanceUID")?,
    );
    Ok(item)
}

fn referenced_frame_of_reference(
    series: &[DefaultDicomObject],
    frame_uid: &str,
    study_uid: &str,
    series_uid: &str,
) -> Result<InMemDicomObject> {
    let contour_images = series
        .iter()
        .map(|obj| image_reference(obj))
        .collect::<Result<Vec<_>>>()?;

    let mut rt_series = InMemDicomObject::new_empty();
    put_str(&mut rt_series, tags::SERIES_INSTANCE_UID, VR::UI, series_uid);
    put_seq(&mut rt_series, tags::CONTOUR_IMAGE_SEQUENCE, contour_images);

    let mut rt_study = InMemDicomObject::new_empty();
    put_str(
        &mut rt_study,
        tags::REFERENCED_SOP_CLASS_UID,
        VR::UI,
        STUDY_COMPONENT_MANAGEMENT,
    );
    put_str(&mut rt_study, tags::REFERENCED_SOP_INSTANCE_UID, VR::UI, study_uid);
    put_seq(&mut rt_study, tags::RT_REFERENCED_SERIES_SEQUENCE, vec![rt_series]);

    let mut item = InMemDicomObject::new_empty();
    put_str(&mut item, tags::FRAME_OF_REFERENCE_UID, VR::UI, frame_uid);
    put_seq(&mut item, tags::RT_REFERENCED_STUDY_SEQUENCE, vec![rt_study]);
    Ok(item)
}

/// 每张切片的每条轮廓生成一个 `CLOSED_PLANAR` 条目, 并引用其所在切片.
fn contour_items(series: &[DefaultDicomObject], structures: &[SliceStructure]) -> Result<Vec<InMemDicomObject>> {
    let mut items = Vec::new();
    for (image, structure) in series.iter().zip(structures) {
        for contour in structure.iter().filter(|c| !c.is_empty()) {
            debug_assert_eq!(contour.len() % 3, 0, "轮廓坐标必须是 [x, y, z] 三元组");
            let mut item = InMemDicomObject::new_empty();
            put_seq(&mut item, tags::CONTOUR_IMAGE_SEQUENCE, vec![image_reference(image)?]);
            put_str(&mut item, tags::CONTOUR_GEOMETRIC_TYPE, VR::CS, CLOSED_PLANAR);
            put_str(
                &mut item,
                tags::NUMBER_OF_CONTOUR_POINTS,
                VR::IS,
                (contour.len() / 3).to_string(),
            );
            put_str(&mut item, tags::CONTOUR_NUMBER, VR::IS, (items.len() + 1).to_string());
            put_strs(
                &mut item,
                tags::CONTOUR_DATA,
                VR::DS,
                contour.iter().map(|v| format_ds(*v)),
            );
            items.push(item);
        }
    }
    Ok(items)
}

/// 根据 CT 序列和逐切片的轮廓, 生成 RT Structure Set 文件对象.
///
/// `structures[i]` 是 `series[i]` 上所有轮廓, 每条轮廓展开为 `[x1, y1, z1, x2, ...]`
/// (病人坐标, 毫米). 新的 SOP Instance UID 与 Series Instance UID 由 `root_uid` 生成.
/// 病人与检查信息复制自序列的第一张切片. 文件以隐式 VR 小端序编码.
///
/// # 错误
///
/// 1. `series` 为空时返回 [`Error::EmptySeries`].
/// 2. 切片数与结构数不一致时返回 [`Error::CountMismatch`].
/// 3. 缺少 `StudyInstanceUID` 等必需属性时返回 [`Error::MissingAttribute`].
pub fn create_rs_file(
    series: &[DefaultDicomObject],
    structures: &[SliceStructure],
    root_uid: &str,
    options: &StructureSetOptions,
) -> Result<DefaultDicomObject> {
    let first = series.first().ok_or(Error::EmptySeries)?;
    if series.len() != structures.len() {
        return Err(Error::CountMismatch {
            slices: series.len(),
            predictions: structures.len(),
        });
    }

    let study_uid = str_attr(first, tags::STUDY_INSTANCE_UID, "StudyInstanceUID")?;
    let ct_series_uid = str_attr(first, tags::SERIES_INSTANCE_UID, "SeriesInstanceUID")?;
    let frame_uid = str_attr(first, tags::FRAME_OF_REFERENCE_UID, "FrameOfReferenceUID")?;
    let instance_uid = generate_uid(root_uid)?;
    let series_uid = generate_uid(root_uid)?;

    let now = chrono::Local::now();
    let date = now.format("%Y%m%d").to_string();
    let time = now.format("%H%M%S").to_string();

    let mut rs = InMemDicomObject::new_empty();
    if let Some(charset) = opt_str_attr(first, tags::SPECIFIC_CHARACTER_SET) {
        put_str(&mut rs, tags::SPECIFIC_CHARACTER_SET, VR::CS, charset);
    }
    put_str(&mut rs, tags::SOP_CLASS_UID, VR::UI, uids::RT_STRUCTURE_SET_STORAGE);
    put_str(&mut rs, tags::SOP_INSTANCE_UID, VR::UI, instance_uid.as_str());
    put_str(&mut rs, tags::INSTANCE_CREATION_DATE, VR::DA, date.as_str());
    put_str(&mut rs, tags::INSTANCE_CREATION_TIME, VR::TM, time.as_str());
    for (tag, vr) in COPIED_ATTRIBUTES {
        put_str(&mut rs, tag, vr, opt_str_attr(first, tag).unwrap_or_default());
    }
    put_str(&mut rs, tags::STUDY_INSTANCE_UID, VR::UI, study_uid.as_str());
    put_str(&mut rs, tags::MODALITY, VR::CS, RTSTRUCT_MODALITY);
    put_str(&mut rs, tags::MANUFACTURER, VR::LO, options.manufacturer.as_str());
    put_str(&mut rs, tags::SERIES_INSTANCE_UID, VR::UI, series_uid.as_str());
    put_str(&mut rs, tags::SERIES_NUMBER, VR::IS, "1");
    put_str(&mut rs, tags::SERIES_DESCRIPTION, VR::LO, options.series_description.as_str());
    put_str(&mut rs, tags::INSTANCE_NUMBER, VR::IS, "1");
    put_str(&mut rs, tags::FRAME_OF_REFERENCE_UID, VR::UI, frame_uid.as_str());

    put_str(&mut rs, tags::STRUCTURE_SET_LABEL, VR::SH, options.label.as_str());
    put_str(&mut rs, tags::STRUCTURE_SET_NAME, VR::LO, options.label.as_str());
    put_str(&mut rs, tags::STRUCTURE_SET_DATE, VR::DA, date);
    put_str(&mut rs, tags::STRUCTURE_SET_TIME, VR::TM, time);
    put_seq(
        &mut rs,
        tags::REFERENCED_FRAME_OF_REFERENCE_SEQUENCE,
        vec![referenced_frame_of_reference(series, &frame_uid, &study_uid, &ct_series_uid)?],
    );

    let roi_number = options.roi_number.to_string();
    let mut roi = InMemDicomObject::new_empty();
    put_str(&mut roi, tags::ROI_NUMBER, VR::IS, roi_number.as_str());
    put_str(&mut roi, tags::REFERENCED_FRAME_OF_REFERENCE_UID, VR::UI, frame_uid.as_str());
    put_str(&mut roi, tags::ROI_NAME, VR::LO, options.roi_name.as_str());
    put_str(&mut roi, tags::ROI_GENERATION_ALGORITHM, VR::CS, "AUTOMATIC");
    put_seq(&mut rs, tags::STRUCTURE_SET_ROI_SEQUENCE, vec![roi]);

    let contours = contour_items(series, structures)?;
    log::info!("结构集 `{instance_uid}` 共 {} 条轮廓", contours.len());
    let mut roi_contour = InMemDicomObject::new_empty();
    put_strs(
        &mut roi_contour,
        tags::ROI_DISPLAY_COLOR,
        VR::IS,
        options.roi_color.iter().map(|c| c.to_string()),
    );
    if !contours.is_empty() {
        put_seq(&mut roi_contour, tags::CONTOUR_SEQUENCE, contours);
    }
    put_str(&mut roi_contour, tags::REFERENCED_ROI_NUMBER, VR::IS, roi_number.as_str());
    put_seq(&mut rs, tags::ROI_CONTOUR_SEQUENCE, vec![roi_contour]);

    let mut observation = InMemDicomObject::new_empty();
    put_str(&mut observation, tags::OBSERVATION_NUMBER, VR::IS, roi_number.as_str());
    put_str(&mut observation, tags::REFERENCED_ROI_NUMBER, VR::IS, roi_number.as_str());
    put_str(
        &mut observation,
        tags::RTROI_INTERPRETED_TYPE,
        VR::CS,
        options.interpreted_type.as_str(),
    );
    put_str(&mut observation, tags::ROI_INTERPRETER, VR::PN, "");
    put_seq(&mut rs, tags::RTROI_OBSERVATIONS_SEQUENCE, vec![observation]);

    let meta = FileMetaTableBuilder::new()
        .media_storage_sop_class_uid(uids::RT_STRUCTURE_SET_STORAGE)
        .media_storage_sop_instance_uid(instance_uid)
        .transfer_syntax(uids::IMPLICIT_VR_LITTLE_ENDIAN);
    Ok(rs.with_meta(meta)?)
}
