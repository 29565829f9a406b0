//! 各阶段运行统计.

use std::time::{Duration, Instant};

/// 累计计时器.
///
/// 每次 `elapsed` 把自上次 `elapsed` (或创建) 以来的时长累加到总时长上.
#[derive(Clone, Debug)]
struct AccTimer {
    consumed: Duration,
    since: Instant,
}

impl AccTimer {
    /// 初始化计时器, 立即开始计时.
    #[inline]
    pub fn new() -> Self {
        Self {
            consumed: Duration::from_secs(0),
            since: Instant::now(),
        }
    }

    /// 结束本轮计时并累加, 同时开始下一轮. 返回本轮计时时长.
    #[inline]
    pub fn elapsed(&mut self) -> Duration {
        let now = Instant::now();
        let d = now - self.since;
        self.consumed += d;
        self.since = now;
        d
    }

    /// 累计时长.
    #[inline]
    pub fn total(&self) -> Duration {
        self.consumed
    }
}

impl Default for AccTimer {
    fn default() -> Self {
        Self::new()
    }
}

/// 一次命令运行的统计: 各阶段耗时与处理的切片数.
#[derive(Clone, Debug)]
pub struct Profile {
    /// 按首次出现顺序排列的阶段及其累计耗时.
    stages: Vec<(&'static str, Duration)>,

    /// 各阶段中最耗时的一次.
    most: Option<(&'static str, Duration)>,

    /// 处理的切片个数.
    slices: u64,

    /// 整个任务花费的总时间 (包括 IO 与调度时间).
    real_time: AccTimer,
}

impl Profile {
    /// 初始化, 同时开始总计时.
    #[inline]
    pub fn new() -> Self {
        Self {
            stages: Vec::new(),
            most: None,
            slices: 0,
            real_time: AccTimer::default(),
        }
    }

    /// 运行 `f` 并把耗时累加到阶段 `name` 上.
    pub fn stage<T, F: FnOnce() -> T>(&mut self, name: &'static str, f: F) -> T {
        let mut timer = AccTimer::new();
        let ans = f();
        let d = timer.elapsed();
        match self.stages.iter_mut().find(|(n, _)| *n == name) {
            Some((_, acc)) => *acc += d,
            None => self.stages.push((name, d)),
        }
        if self.most.map_or(true, |(_, m)| d > m) {
            self.most = Some((name, d));
        }
        log::debug!("阶段 `{name}` 用时 {} ms", d.as_millis());
        ans
    }

    /// 记录处理了 `n` 张切片.
    #[inline]
    pub fn count_slices(&mut self, n: usize) {
        self.slices += n as u64;
    }

    /// 结束全部计时.
    #[inline]
    pub fn finish(mut self) -> Self {
        self.real_time.elapsed();
        self
    }

    /// 各阶段累计耗时.
    #[inline]
    pub fn stages(&self) -> &[(&'static str, Duration)] {
        &self.stages
    }

    /// 获得处理的切片总数.
    #[inline]
    pub fn get_slices(&self) -> u64 {
        self.slices
    }

    /// 以微秒为单位获得运行到目前 (或 `finish` 时) 的总自然时间.
    #[inline]
    pub fn get_real_time_us(&self) -> u64 {
        self.real_time.total().as_micros() as u64
    }

    /// 以微秒为单位获得平均每张切片的总耗时. 没有切片时返回 `None`.
    #[inline]
    pub fn get_avg_slice_time_us(&self) -> Option<f64> {
        match self.slices {
            0 => None,
            n => Some(self.get_real_time_us() as f64 / n as f64),
        }
    }

    /// 获取最耗时的一次阶段运行.
    ///
    /// 如果不存在任何阶段, 则返回 `None`.
    #[inline]
    pub fn get_most_time_consuming(&self) -> Option<(&'static str, Duration)> {
        self.most
    }
}

impl Default for Profile {
    fn default() -> Self {
        Self::new()
    }
}
