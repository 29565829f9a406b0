//! 命令行工具依赖的通用组件.

use ct_contour::CtWindow;

pub mod loader;

const SEP: &str = "--------------------------------------------------------";

/// 简单分隔线.
#[inline]
pub fn sep() {
    println!("{SEP}");
}

/// 简单分隔线.
#[inline]
pub fn sep_to<W: std::io::Write>(mut w: W) -> std::io::Result<()> {
    writeln!(&mut w, "{SEP}")
}

/// 获得可并行核心数.
pub fn cpus() -> usize {
    std::thread::available_parallelism().map_or_else(|_| num_cpus::get(), usize::from)
}

/// 创建一般情况下合适的、用于可视化腹部 CT 肝脏扫描的窗口.
/// 该窗口窗位为 60, 窗宽为 200.
#[inline]
pub fn liver_window() -> CtWindow {
    CtWindow::from_liver_visual()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_liver_window() {
        let w = liver_window();
        assert_eq!(w.lower_bound(), -40.0);
        assert_eq!(w.upper_bound(), 160.0);
    }

    #[test]
    fn test_sep_to() {
        let mut buf = Vec::new();
        sep_to(&mut buf).unwrap();
        assert_eq!(buf, format!("{SEP}\n").into_bytes());
        assert!(cpus() >= 1);
    }
}
