//! 对 `ct-contour::dataset` 的更一层封装. 提供数据集目录与索引的解析.

use ct_contour::dataset::{self, lits_train};
use std::env;
use std::path::{Path, PathBuf};

/// 训练集目录环境变量.
pub const TRAIN_DIR_ENV: &str = "CT_CONTOUR_TRAIN_DIR";

/// 获取 LiTS 训练集数据基本路径.
///
/// 1. 若环境变量 `$CT_CONTOUR_TRAIN_DIR` 非空, 则返回其值;
/// 2. 否则, 返回 `$HOME/dataset/train`. 无法确定主目录时返回 `None`.
pub fn train_dir_from_env_or_home() -> Option<PathBuf> {
    match env::var(TRAIN_DIR_ENV) {
        Ok(d) if !d.is_empty() => Some(PathBuf::from(d)),
        _ => dataset::home_dataset_dir_with(["train"]),
    }
}

/// 命令行给出的路径优先, 其次是 [`train_dir_from_env_or_home`].
#[inline]
pub fn train_dir_or_default(given: Option<&Path>) -> Option<PathBuf> {
    given.map(Path::to_path_buf).or_else(train_dir_from_env_or_home)
}

/// 解析形如 `0-9,12,15-17` 的 volume 索引列表. 区间两端均包含.
///
/// 格式错误时返回 `None`.
pub fn parse_indices(s: &str) -> Option<Vec<u32>> {
    let mut ans = Vec::new();
    for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match part.split_once('-') {
            Some((lo, hi)) => {
                let lo: u32 = lo.trim().parse().ok()?;
                let hi: u32 = hi.trim().parse().ok()?;
                if lo > hi {
                    return None;
                }
                ans.extend(lo..=hi);
            }
            None => ans.push(part.parse().ok()?),
        }
    }
    ans.sort_unstable();
    ans.dedup();
    Some(ans)
}

/// 获取 `dataset_dir` 下所有可用 volume 的索引, 若 `given` 非空则只保留其中给定的索引.
pub fn volume_indices(dataset_dir: &Path, given: Option<&[u32]>) -> std::io::Result<Vec<u32>> {
    let all = lits_train::discover(dataset_dir)?;
    Ok(match given {
        Some(g) => all.into_iter().filter(|i| g.contains(i)).collect(),
        None => all,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_indices() {
        assert_eq!(parse_indices("3,0-2, 2"), Some(vec![0, 1, 2, 3]));
        assert_eq!(parse_indices(""), Some(vec![]));
        assert_eq!(parse_indices("5-3"), None);
        assert_eq!(parse_indices("a"), None);
    }

    #[test]
    fn test_given_dir_wins() {
        let p = Path::new("/data/lits");
        assert_eq!(train_dir_or_default(Some(p)), Some(p.to_path_buf()));
    }
}
