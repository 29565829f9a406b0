//! 训练数据: LiTS 体数据的发现与加载, 以及切片级 `burn` 数据集.

use std::path::{Path, PathBuf};

pub mod lits_train;
mod slices;

pub use slices::{SegmentationBatch, SegmentationBatcher, SliceDataset, SliceItem, SliceSelection};

/// `{用户主目录}/dataset/{parts...}`. 无法确定主目录时返回 `None`.
pub fn home_dataset_dir_with<P: AsRef<Path>, I: IntoIterator<Item = P>>(parts: I) -> Option<PathBuf> {
    let mut ans = dirs::home_dir()?.join("dataset");
    ans.extend(parts);
    Some(ans)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_home_dataset_dir_with() {
        if let Some(home) = dirs::home_dir() {
            let p = home_dataset_dir_with(["train", "scan"]).unwrap();
            assert_eq!(p, home.join("dataset").join("train").join("scan"));
        }
    }
}
