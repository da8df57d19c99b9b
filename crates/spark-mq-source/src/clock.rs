use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// 抽象可注入的单调时钟。
///
/// # 设计背景（Why）
/// - 刷写调度依赖“距上次刷写已过去多久”；若直接读取系统时钟，时间阈值相关的测试只能靠真实睡眠，
///   既慢又不稳定。
/// - 通过 trait 注入时钟，生产环境使用 [`SystemClock`]，测试使用可手动推进的 [`MockClock`]。
///
/// # 接口约束（What）
/// - `now` 返回单调递增的时间点；实现者不得让时间回退。
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Instant;
}

/// 直接委托 [`Instant::now`] 的系统时钟。
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// 虚拟时钟：通过手动推进时间复现确定性的阈值判定。
///
/// # 行为概览（How）
/// - 记录构造时的 [`Instant`] 作为基准，`advance` 累加偏移量；
/// - 克隆体共享同一份偏移量，便于测试持有一份句柄、把另一份注入调度器。
///
/// # 契约说明（What）
/// - 偏移量只增不减，`now` 始终返回 `origin + elapsed`。
#[derive(Clone, Debug)]
pub struct MockClock {
    origin: Instant,
    elapsed: Arc<Mutex<Duration>>,
}

impl MockClock {
    pub fn new() -> Self {
        Self::with_start(Instant::now())
    }

    /// 以指定起始时间构造虚拟时钟。
    pub fn with_start(origin: Instant) -> Self {
        Self {
            origin,
            elapsed: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    /// 手动推进虚拟时间。
    pub fn advance(&self, delta: Duration) {
        let mut elapsed = self.elapsed.lock();
        *elapsed = elapsed.saturating_add(delta);
    }

    /// 自起始时间以来累计推进的虚拟时长。
    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock()
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.origin + *self.elapsed.lock()
    }
}
