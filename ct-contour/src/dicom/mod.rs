//! DICOM 序列的读取、筛选、排序与 RT Structure Set 文件的生成.
//!
//! 解析与编码全部交给 `dicom-rs`, 这里只负责属性的提取和组织.

mod grid;
mod rtstruct;
mod series;
mod uid;

pub use grid::PixelGrid;
pub use rtstruct::{create_rs_file, StructureSetOptions};
pub use series::{
    add_transfer_syntax, filter_dicom_files, glob_series, pixel_arrays, read_dicom_paths,
    slice_location, sort_slice_location, FilteredFiles, ReadDicom,
};
pub use uid::generate_uid;

use crate::error::{Error, Result};
use dicom_core::Tag;
use dicom_object::InMemDicomObject;

/// 读取字符串属性, 去除首尾空白. 属性缺失时返回 `None`.
pub(crate) fn opt_str_attr(obj: &InMemDicomObject, tag: Tag) -> Option<String> {
    let elem = obj.element(tag).ok()?;
    let s = elem.to_str().ok()?;
    Some(s.trim_matches(|c: char| c.is_whitespace() || c == '\0').to_string())
}

/// 读取必需的字符串属性.
pub(crate) fn str_attr(obj: &InMemDicomObject, tag: Tag, name: &'static str) -> Result<String> {
    opt_str_attr(obj, tag).ok_or(Error::MissingAttribute(name))
}

/// 读取必需的单值浮点属性.
pub(crate) fn f64_attr(obj: &InMemDicomObject, tag: Tag, name: &'static str) -> Result<f64> {
    obj.element(tag)
        .ok()
        .and_then(|e| e.to_float64().ok())
        .ok_or(Error::MissingAttribute(name))
}

/// 读取必需的多值浮点属性, 且值的个数必须为 `N`.
pub(crate) fn multi_f64_attr<const N: usize>(
    obj: &InMemDicomObject,
    tag: Tag,
    name: &'static str,
) -> Result<[f64; N]> {
    obj.element(tag)
        .ok()
        .and_then(|e| e.to_multi_float64().ok())
        .and_then(|v| <[f64; N]>::try_from(v).ok())
        .ok_or(Error::MissingAttribute(name))
}

/// 读取必需的无符号整数属性.
pub(crate) fn usize_attr(obj: &InMemDicomObject, tag: Tag, name: &'static str) -> Result<usize> {
    obj.element(tag)
        .ok()
        .and_then(|e| e.to_int::<u32>().ok())
        .map(|v| v as usize)
        .ok_or(Error::MissingAttribute(name))
}

#[cfg(test)]
pub(crate) mod testing {
    //! 测试用的内存 CT 切片.

    use dicom_core::{DataElement, PrimitiveValue, Tag, VR};
    use dicom_dictionary_std::{tags, uids};
    use dicom_object::meta::FileMetaTableBuilder;
    use dicom_object::{DefaultDicomObject, InMemDicomObject};

    /// 构造一张 `rows x cols` 的轴位 CT 切片, 像素值为 `fill`, 位于 `z` 处.
    pub fn ct_slice(
        series_uid: &str,
        instance: u32,
        z: f64,
        (rows, cols): (u16, u16),
        fill: u16,
    ) -> DefaultDicomObject {
        let sop_uid = format!("1.2.3.4.{instance}");
        let mut obj = InMemDicomObject::new_empty();
        let put_str = |obj: &mut InMemDicomObject, tag, vr, v: &str| {
            obj.put(DataElement::new(tag, vr, PrimitiveValue::from(v)));
        };
        put_str(&mut obj, tags::SOP_CLASS_UID, VR::UI, uids::CT_IMAGE_STORAGE);
        put_str(&mut obj, tags::SOP_INSTANCE_UID, VR::UI, &sop_uid);
        put_str(&mut obj, tags::MODALITY, VR::CS, "CT");
        put_str(&mut obj, tags::PATIENT_NAME, VR::PN, "Doe^John");
        put_str(&mut obj, tags::PATIENT_ID, VR::LO, "P001");
        put_str(&mut obj, tags::STUDY_INSTANCE_UID, VR::UI, "1.2.3");
        put_str(&mut obj, tags::SERIES_INSTANCE_UID, VR::UI, series_uid);
        put_str(&mut obj, tags::FRAME_OF_REFERENCE_UID, VR::UI, "1.2.3.9");
        // 多值属性每个值单独存放, 与从文件解析出的对象一致.
        let put_multi = |obj: &mut InMemDicomObject, tag: Tag, values: &[&str]| {
            let strs = values.iter().map(|v| v.to_string()).collect();
            obj.put(DataElement::new(tag, VR::DS, PrimitiveValue::Strs(strs)));
        };
        let z_str = z.to_string();
        put_multi(&mut obj, tags::IMAGE_POSITION_PATIENT, &["-10", "-20", &z_str]);
        put_multi(&mut obj, tags::IMAGE_ORIENTATION_PATIENT, &["1", "0", "0", "0", "1", "0"]);
        put_multi(&mut obj, tags::PIXEL_SPACING, &["0.5", "0.75"]);
        put_str(&mut obj, tags::SLICE_LOCATION, VR::DS, &z.to_string());
        put_str(&mut obj, tags::PHOTOMETRIC_INTERPRETATION, VR::CS, "MONOCHROME2");
        put_str(&mut obj, tags::RESCALE_INTERCEPT, VR::DS, "-1024");
        put_str(&mut obj, tags::RESCALE_SLOPE, VR::DS, "1");
        obj.put(DataElement::new(tags::SAMPLES_PER_PIXEL, VR::US, PrimitiveValue::from(1u16)));
        obj.put(DataElement::new(tags::ROWS, VR::US, PrimitiveValue::from(rows)));
        obj.put(DataElement::new(tags::COLUMNS, VR::US, PrimitiveValue::from(cols)));
        obj.put(DataElement::new(tags::BITS_ALLOCATED, VR::US, PrimitiveValue::from(16u16)));
        obj.put(DataElement::new(tags::BITS_STORED, VR::US, PrimitiveValue::from(16u16)));
        obj.put(DataElement::new(tags::HIGH_BIT, VR::US, PrimitiveValue::from(15u16)));
        obj.put(DataElement::new(
            tags::PIXEL_REPRESENTATION,
            VR::US,
            PrimitiveValue::from(0u16),
        ));
        let pixels: Vec<u16> = vec![fill; rows as usize * cols as usize];
        obj.put(DataElement::new(
            tags::PIXEL_DATA,
            VR::OW,
            PrimitiveValue::U16(pixels.into()),
        ));

        obj.with_meta(
            FileMetaTableBuilder::new()
                .media_storage_sop_class_uid(uids::CT_IMAGE_STORAGE)
                .media_storage_sop_instance_uid(sop_uid)
                .transfer_syntax(uids::EXPLICIT_VR_LITTLE_ENDIAN),
        )
        .unwrap()
    }
}
