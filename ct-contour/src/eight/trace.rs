use crate::consts::gray::is_foreground;
use crate::{Idx2d, Mask};
use ndarray::Data;

/// 以西为起点、顺时针排列的 8-邻域偏移量 `(dh, dw)`.
pub const MOORE_CLOCKWISE: [(isize, isize); 8] = [
    (0, -1),
    (-1, -1),
    (-1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
    (1, 0),
    (1, -1),
];

type SignedIdx = (isize, isize);

#[inline]
fn offset((h, w): SignedIdx, dir: usize) -> SignedIdx {
    let (dh, dw) = MOORE_CLOCKWISE[dir];
    (h + dh, w + dw)
}

/// `to` 相对 `from` 的方向编号. 两者必须 8-相邻.
#[inline]
fn direction(from: SignedIdx, to: SignedIdx) -> usize {
    let d = (to.0 - from.0, to.1 - from.1);
    MOORE_CLOCKWISE
        .iter()
        .position(|&o| o == d)
        .unwrap_or_else(|| unreachable!("{from:?} 与 {to:?} 不相邻"))
}

/// Moore 邻域边界追踪.
impl<S: Data<Elem = u8>> Mask<S> {
    /// 图像外的位置视为背景.
    #[inline]
    fn is_foreground_at(&self, (h, w): SignedIdx) -> bool {
        h >= 0 && w >= 0 && matches!(self.get((h as usize, w as usize)), Some(&p) if is_foreground(p))
    }

    /// 从 `start` 出发, 顺时针追踪其所在 8-连通前景区域的外边界.
    ///
    /// `start` 必须是该区域的行优先首像素 (保证其西侧为背景),
    /// 否则结果无意义. 返回的多边形首尾隐式相连, 不重复起点;
    /// 孤立像素返回只含 `start` 的序列.
    ///
    /// 当再次以相同的方式离开起点时 (即下一步与第一步相同) 追踪结束.
    pub fn trace_boundary(&self, start: Idx2d) -> Vec<Idx2d> {
        debug_assert!(is_foreground(self[start]));
        let s = (start.0 as isize, start.1 as isize);
        let mut contour = vec![start];
        let mut cur = s;

        // 回溯点方向. 起点的西侧必为背景.
        let mut back = 0usize;
        let mut first_step: Option<SignedIdx> = None;

        loop {
            let Some(dir) = (1..=8)
                .map(|k| (back + k) % 8)
                .find(|&d| self.is_foreground_at(offset(cur, d)))
            else {
                break;
            };
            let next = offset(cur, dir);
            match first_step {
                None => first_step = Some(next),
                Some(f) if cur == s && next == f => break,
                _ => {}
            }
            // 顺时针扫描中紧邻 `next` 之前的位置一定是背景, 作为新的回溯点.
            let prev = offset(cur, (dir + 7) % 8);
            back = direction(next, prev);
            contour.push((next.0 as usize, next.1 as usize));
            cur = next;
        }

        if contour.len() > 1 && contour.last() == Some(&start) {
            contour.pop();
        }
        contour
    }

    /// 获取所有 8-连通前景区域的外边界, 顺序与区域的行优先首像素一致.
    /// 区域内部的空洞不产生轮廓.
    pub fn outer_contours(&self) -> Vec<Vec<Idx2d>> {
        self.foreground_areas()
            .into_iter()
            .map(|area| self.trace_boundary(area[0]))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use crate::MaskSlice;
    use ndarray::{array, Array2};

    #[test]
    fn test_single_pixel() {
        let a = array![[0u8, 0, 0], [0, 1, 0], [0, 0, 0]];
        assert_eq!(MaskSlice::new(a.view()).outer_contours(), vec![vec![(1, 1)]]);
    }

    #[test]
    fn test_square_clockwise() {
        let a = array![[1u8, 1], [1, 1]];
        let c = MaskSlice::new(a.view()).outer_contours();
        assert_eq!(c, vec![vec![(0, 0), (0, 1), (1, 1), (1, 0)]]);
    }

    #[test]
    fn test_two_pixels() {
        let a = array![[0u8, 1, 1, 0]];
        let c = MaskSlice::new(a.view()).outer_contours();
        assert_eq!(c, vec![vec![(0, 1), (0, 2)]]);
    }

    #[test]
    fn test_ring_ignores_hole() {
        let a = array![
            [0u8, 0, 0, 0, 0],
            [0, 1, 1, 1, 0],
            [0, 1, 0, 1, 0],
            [0, 1, 1, 1, 0],
            [0, 0, 0, 0, 0],
        ];
        let c = MaskSlice::new(a.view()).outer_contours();
        assert_eq!(c.len(), 1);
        assert_eq!(
            c[0],
            vec![(1, 1), (1, 2), (1, 3), (2, 3), (3, 3), (3, 2), (3, 1), (2, 1)]
        );
    }

    #[test]
    fn test_junction_pixel_visited_twice() {
        // 起点为两个环节的交汇点, 追踪需要经过它不止一次.
        let a = array![
            [1u8, 0, 0],
            [0, 1, 0],
            [1, 0, 1],
        ];
        let c = MaskSlice::new(a.view()).outer_contours();
        assert_eq!(c.len(), 1);
        assert_eq!(c[0], vec![(0, 0), (1, 1), (2, 2), (1, 1), (2, 0), (1, 1)]);
    }

    #[test]
    fn test_components_and_border() {
        let mut a = Array2::<u8>::zeros((6, 6));
        a[(0, 0)] = 1;
        a[(0, 1)] = 1;
        a[(4, 4)] = 1;
        a[(5, 4)] = 1;
        a[(5, 5)] = 1;
        let c = MaskSlice::new(a.view()).outer_contours();
        assert_eq!(c.len(), 2);
        assert_eq!(c[0], vec![(0, 0), (0, 1)]);
        assert_eq!(c[1], vec![(4, 4), (5, 5), (5, 4)]);
    }
}
