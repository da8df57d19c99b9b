//! 数据源计数器：摄取、接收、受理、丢弃计数与两个延迟计时器。
//!
//! # 设计背景（Why）
//! - 刷写引擎只把计数器当作“只写不读”的副作用协作者；具体导出到哪个后端由宿主决定。
//! - 因此以 [`SourceMetrics`] trait 作为注入点，并提供基于原子变量的默认实现 [`SourceCounter`]，
//!   供测试断言与停机日志使用。
//!
//! # 计数语义（What）
//! - `ingested`：监听器成功追加到缓冲区的信封数；
//! - `received`：每轮刷写从缓冲区切出、即将交付下游的信封数，每个信封只计一次；
//! - `accepted`：下游成功受理的批次中的信封数，分发失败的轮次不计入；
//! - `dropped`：已确认给消息队列、但最终未能交付下游的信封数（分发失败或停机未排空）；
//! - `received_latency`：自本次调度调用开始到该轮刷写开始的累计耗时；
//! - `accepted_latency`：下游分发调用本身的累计耗时。
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

/// 刷写引擎使用的计数器接口。
///
/// # 契约说明（What）
/// - 所有方法都可能在消费者回调线程与轮询线程上并发调用，实现必须线程安全；
/// - 实现不得阻塞或 panic；后端不可用时应丢弃数据。
pub trait SourceMetrics: Send + Sync {
    /// 生命周期：数据源启动。
    fn start(&self);

    /// 生命周期：数据源停止。
    fn stop(&self);

    fn add_ingested(&self, count: u64);

    fn add_received(&self, count: u64);

    fn add_received_latency(&self, elapsed: Duration);

    fn add_accepted(&self, count: u64);

    fn add_accepted_latency(&self, elapsed: Duration);

    fn add_dropped(&self, count: u64);
}

/// 基于原子变量的默认计数器实现。
///
/// - **并发语义**：全部字段为独立原子量，使用 `Relaxed` 序；读取快照时各字段之间不保证同一时刻一致。
/// - **生命周期**：`start`/`stop` 只翻转运行标记并统计启停次数，不清零计数。
#[derive(Debug, Default)]
pub struct SourceCounter {
    name: String,
    running: AtomicBool,
    starts: AtomicU64,
    ingested: AtomicU64,
    received: AtomicU64,
    received_latency_us: AtomicU64,
    accepted: AtomicU64,
    accepted_latency_us: AtomicU64,
    dropped: AtomicU64,
}

impl SourceCounter {
    /// 以数据源名称构造计数器，名称会出现在快照的展示文本中。
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// 读取当前计数快照。
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            name: self.name.clone(),
            starts: self.starts.load(Ordering::Relaxed),
            ingested: self.ingested.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            received_latency: Duration::from_micros(
                self.received_latency_us.load(Ordering::Relaxed),
            ),
            accepted: self.accepted.load(Ordering::Relaxed),
            accepted_latency: Duration::from_micros(
                self.accepted_latency_us.load(Ordering::Relaxed),
            ),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

impl SourceMetrics for SourceCounter {
    fn start(&self) {
        if !self.running.swap(true, Ordering::AcqRel) {
            self.starts.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    fn add_ingested(&self, count: u64) {
        self.ingested.fetch_add(count, Ordering::Relaxed);
    }

    fn add_received(&self, count: u64) {
        self.received.fetch_add(count, Ordering::Relaxed);
    }

    fn add_received_latency(&self, elapsed: Duration) {
        self.received_latency_us
            .fetch_add(micros(elapsed), Ordering::Relaxed);
    }

    fn add_accepted(&self, count: u64) {
        self.accepted.fetch_add(count, Ordering::Relaxed);
    }

    fn add_accepted_latency(&self, elapsed: Duration) {
        self.accepted_latency_us
            .fetch_add(micros(elapsed), Ordering::Relaxed);
    }

    fn add_dropped(&self, count: u64) {
        self.dropped.fetch_add(count, Ordering::Relaxed);
    }
}

fn micros(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX)
}

/// 计数器的只读快照。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub name: String,
    pub starts: u64,
    pub ingested: u64,
    pub received: u64,
    pub received_latency: Duration,
    pub accepted: u64,
    pub accepted_latency: Duration,
    pub dropped: u64,
}

impl fmt::Display for CounterSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{{ingested={}, received={}, accepted={}, dropped={}, received_latency={:?}, accepted_latency={:?}}}",
            self.name,
            self.ingested,
            self.received,
            self.accepted,
            self.dropped,
            self.received_latency,
            self.accepted_latency,
        )
    }
}
