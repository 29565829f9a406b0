use crate::consts::dicom::UID_MAX_LEN;
use crate::error::{Error, Result};
use rand::Rng;

/// UID 根之后至少保留的随机位数.
const MIN_SUFFIX_LEN: usize = 10;

/// UID 根必须由数字和 `.` 组成, 以 `.` 结尾, 各段非空且没有前导零.
fn is_valid_root(root: &str) -> bool {
    let Some(body) = root.strip_suffix('.') else {
        return false;
    };
    !body.is_empty()
        && body.split('.').all(|seg| {
            !seg.is_empty()
                && seg.bytes().all(|b| b.is_ascii_digit())
                && (seg == "0" || !seg.starts_with('0'))
        })
}

/// 在 `root` 之后追加随机十进制数字, 生成新的 UID. 总长度不超过 64 个字符.
///
/// `root` 形如 `"1.2.826.0.1.3680043.8.498."`; 格式非法或过长时返回
/// [`Error::InvalidUidRoot`].
pub fn generate_uid(root: &str) -> Result<String> {
    if !is_valid_root(root) || root.len() > UID_MAX_LEN - MIN_SUFFIX_LEN {
        return Err(Error::InvalidUidRoot(root.to_string()));
    }
    let room = UID_MAX_LEN - root.len();
    let suffix = rand::thread_rng().gen::<u128>().to_string();
    let suffix = &suffix[..suffix.len().min(room)];
    Ok(format!("{root}{suffix}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::dicom::DEFAULT_ROOT_UID;

    #[test]
    fn test_generate_uid() {
        let a = generate_uid(DEFAULT_ROOT_UID).unwrap();
        let b = generate_uid(DEFAULT_ROOT_UID).unwrap();
        assert_ne!(a, b);
        for uid in [a, b] {
            assert!(uid.starts_with(DEFAULT_ROOT_UID));
            assert!(uid.len() <= UID_MAX_LEN);
            let suffix = &uid[DEFAULT_ROOT_UID.len()..];
            assert!(!suffix.is_empty());
            assert!(suffix.bytes().all(|b| b.is_ascii_digit()));
            assert!(suffix == "0" || !suffix.starts_with('0'));
        }
    }

    #[test]
    fn test_long_root_is_truncated_to_limit() {
        let root = format!("1.{}.", "2".repeat(UID_MAX_LEN - MIN_SUFFIX_LEN - 3));
        assert_eq!(root.len(), UID_MAX_LEN - MIN_SUFFIX_LEN);
        let uid = generate_uid(&root).unwrap();
        assert!(uid.len() <= UID_MAX_LEN);
    }

    #[test]
    fn test_invalid_roots() {
        for root in ["", ".", "1.2.3", "1..2.", "1.02.", "1.a.", &format!("1.{}.", "2".repeat(60))] {
            assert!(
                matches!(generate_uid(root), Err(Error::InvalidUidRoot(_))),
                "{root:?}"
            );
        }
    }
}
