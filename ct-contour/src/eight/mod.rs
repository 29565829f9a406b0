//! 8-邻域操作: 邻居枚举与 Moore 外边界追踪.

mod trace;

use crate::{Connectivity, Idx2d};

pub use trace::MOORE_CLOCKWISE;

/// 在 `shape` 范围内按 [`MOORE_CLOCKWISE`] 的顺序枚举 `pos` 的邻居.
///
/// 4-邻域取其中的西, 北, 东, 南四个方向.
pub(crate) fn neighbours(
    (h, w): Idx2d,
    (height, width): Idx2d,
    conn: Connectivity,
) -> impl Iterator<Item = Idx2d> {
    let step = match conn {
        Connectivity::Four => 2,
        Connectivity::Eight => 1,
    };
    MOORE_CLOCKWISE.iter().step_by(step).filter_map(move |&(dh, dw)| {
        let nh = h.checked_add_signed(dh)?;
        let nw = w.checked_add_signed(dw)?;
        (nh < height && nw < width).then_some((nh, nw))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_neighbours_clipped() {
        let corner: Vec<_> = neighbours((0, 0), (3, 3), Connectivity::Eight).collect();
        assert_eq!(corner, vec![(0, 1), (1, 1), (1, 0)]);

        let four: Vec<_> = neighbours((1, 1), (3, 3), Connectivity::Four).collect();
        assert_eq!(four, vec![(1, 0), (0, 1), (1, 2), (2, 1)]);

        assert_eq!(neighbours((1, 1), (3, 3), Connectivity::Eight).count(), 8);
        assert_eq!(neighbours((2, 2), (3, 3), Connectivity::Four).count(), 2);
    }
}
