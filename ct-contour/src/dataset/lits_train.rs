//! LiTS 格式 CT scan/label 训练数据加载器.
//!
//! 提供迭代器风格的数据集获取模式. 目录布局为:
//!
//! ```text
//! {dataset}/scan/volume-{i}.nii
//! {dataset}/label/segmentation-{i}.nii
//! ```

use crate::error::Result;
use crate::CtData3d;
use std::fs;
use std::path::{Path, PathBuf};

/// 数据集目录下的 (scan, label) 子目录.
#[inline]
fn make_loader_path<P: AsRef<Path>>(path: P) -> (PathBuf, PathBuf) {
    let root = path.as_ref();
    (root.join("scan"), root.join("label"))
}

/// `{dir}/{stem}.nii`, 不存在而 `{stem}.nii.gz` 存在时取后者.
fn nii_path(dir: &Path, stem: &str) -> PathBuf {
    let plain = dir.join(format!("{stem}.nii"));
    let gz = dir.join(format!("{stem}.nii.gz"));
    if !plain.is_file() && gz.is_file() {
        gz
    } else {
        plain
    }
}

/// 从文件名 `volume-{i}.nii` 或 `volume-{i}.nii.gz` 中解析索引 `i`.
fn parse_volume_index(name: &str) -> Option<u32> {
    let rest = name.strip_prefix("volume-")?;
    let digits = rest
        .strip_suffix(".nii")
        .or_else(|| rest.strip_suffix(".nii.gz"))?;
    digits.parse().ok()
}

/// 列出 `{dataset_path}/scan` 下所有同时具有对应标注文件的 volume 索引, 按升序返回.
pub fn discover<P: AsRef<Path>>(dataset_path: P) -> std::io::Result<Vec<u32>> {
    let (scan_path, label_path) = make_loader_path(dataset_path);
    let mut ans = Vec::new();
    for entry in fs::read_dir(&scan_path)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(idx) = name.to_str().and_then(parse_volume_index) else {
            continue;
        };
        if nii_path(&label_path, &format!("segmentation-{idx}")).is_file() {
            ans.push(idx);
        } else {
            log::warn!("volume-{idx} 缺少对应标注, 已跳过");
        }
    }
    ans.sort_unstable();
    Ok(ans)
}

/// 按 `indices` 的顺序逐个读取 `volume-{i}.nii[.gz]` 与 `segmentation-{i}.nii[.gz]`.
///
/// 文件缺失或解析失败时, 对应项为 `Err`, 迭代继续.
pub fn ct_loader<I: IntoIterator<Item = u32>, P: AsRef<Path>>(
    indices: I,
    dataset_path: P,
) -> CtDataLoader {
    let (scan_path, label_path) = make_loader_path(dataset_path);
    CtDataLoader {
        scan_path,
        label_path,
        indices: indices.into_iter().collect::<Vec<_>>().into_iter(),
    }
}

/// 3D CT 数据集 (scan + label) 加载器.
#[derive(Debug)]
pub struct CtDataLoader {
    scan_path: PathBuf,
    label_path: PathBuf,
    indices: std::vec::IntoIter<u32>,
}

impl Iterator for CtDataLoader {
    type Item = (u32, Result<CtData3d>);

    fn next(&mut self) -> Option<Self::Item> {
        let idx = self.indices.next()?;
        let scan = nii_path(&self.scan_path, &format!("volume-{idx}"));
        let label = nii_path(&self.label_path, &format!("segmentation-{idx}"));
        log::debug!("读取 {}", scan.display());
        Some((idx, CtData3d::open(scan, label)))
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        self.indices.size_hint()
    }
}

impl ExactSizeIterator for CtDataLoader {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_volume_index() {
        assert_eq!(parse_volume_index("volume-0.nii"), Some(0));
        assert_eq!(parse_volume_index("volume-130.nii.gz"), Some(130));
        assert_eq!(parse_volume_index("segmentation-3.nii"), None);
        assert_eq!(parse_volume_index("volume-x.nii"), None);
    }

    #[test]
    fn test_discover_pairs_only() {
        let dir = std::env::temp_dir().join(format!("ct-contour-discover-{}", std::process::id()));
        let (scan, label) = make_loader_path(&dir);
        fs::create_dir_all(&scan).unwrap();
        fs::create_dir_all(&label).unwrap();
        for i in [3u32, 1, 2] {
            fs::write(scan.join(format!("volume-{i}.nii")), b"").unwrap();
        }
        fs::write(label.join("segmentation-1.nii"), b"").unwrap();
        fs::write(label.join("segmentation-3.nii.gz"), b"").unwrap();
        fs::write(scan.join("notes.txt"), b"").unwrap();

        assert_eq!(discover(&dir).unwrap(), vec![1, 3]);
        assert_eq!(nii_path(&label, "segmentation-3"), label.join("segmentation-3.nii.gz"));
        assert_eq!(nii_path(&label, "segmentation-2"), label.join("segmentation-2.nii"));

        let mut loader = ct_loader([1, 3], &dir);
        assert_eq!(loader.len(), 2);
        // 空文件无法解析.
        assert!(matches!(loader.next(), Some((1, Err(_)))));
        assert_eq!(loader.len(), 1);
        fs::remove_dir_all(&dir).unwrap();
    }
}
