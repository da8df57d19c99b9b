//! 退避参数与驱动侧的升级记账。
//!
//! # 教案式说明
//! - **意图（Why）**：调度器只报告“就绪 / 退避”，从不自行睡眠；退避多久由外部驱动决定。
//!   [`BackoffPolicy`] 把配置中的两个常量暴露给驱动，[`BackoffState`] 则是驱动用来累计连续退避次数的
//!   小型记账器。
//! - **契约（What）**：第 `n` 次连续退避的等待时长为 `min(n * increment, max_interval)`；
//!   一次就绪即把计数清零。
//! - **风险提示（Trade-offs）**：线性升级而非指数升级，与常见的轮询数据源运行器保持一致，
//!   在下游长期故障时由上限兜底。
use std::time::Duration;

/// 退避参数：步长与上限。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackoffPolicy {
    increment: Duration,
    max_interval: Duration,
}

impl BackoffPolicy {
    /// 构造退避参数。若 `increment` 大于 `max_interval`，步长被夹紧到上限。
    pub fn new(increment: Duration, max_interval: Duration) -> Self {
        Self {
            increment: increment.min(max_interval),
            max_interval,
        }
    }

    /// 每次连续退避增加的睡眠时长。
    pub fn backoff_sleep_increment(&self) -> Duration {
        self.increment
    }

    /// 退避睡眠时长的上限。
    pub fn max_backoff_sleep(&self) -> Duration {
        self.max_interval
    }
}

/// 驱动侧的退避记账：连续退避次数与当前等待时长。
#[derive(Clone, Debug)]
pub struct BackoffState {
    policy: BackoffPolicy,
    consecutive: u32,
    current_interval: Duration,
}

impl BackoffState {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            consecutive: 0,
            current_interval: Duration::ZERO,
        }
    }

    /// 记录一次退避，返回驱动本轮应睡眠的时长。
    pub fn on_backoff(&mut self) -> Duration {
        self.consecutive = self.consecutive.saturating_add(1);
        self.current_interval = self
            .policy
            .increment
            .saturating_mul(self.consecutive)
            .min(self.policy.max_interval);
        self.current_interval
    }

    /// 记录一次就绪，清零升级进度。
    pub fn on_ready(&mut self) {
        self.consecutive = 0;
        self.current_interval = Duration::ZERO;
    }

    pub fn consecutive_backoffs(&self) -> u32 {
        self.consecutive
    }

    pub fn current_interval(&self) -> Duration {
        self.current_interval
    }

    pub fn policy(&self) -> BackoffPolicy {
        self.policy
    }
}
