//! 双阈值刷写调度器。
//!
//! # 模块定位（Why）
//! - 由外部驱动反复调用 [`FlushScheduler::process`]（轮询式）；每次调用检查缓冲区大小与距上次刷写的时长，
//!   任一阈值越界即把信封交付下游。
//! - 突发流量超过 `max_size` 时，在一次调用内按不超过 `max_size` 的块依次刷写；低流量时则由
//!   `max_delay` 保证信封最多等待一个时间窗口。
//!
//! # 契约说明（What）
//! - 循环条件：`pending >= max_size || (elapsed >= max_delay && pending > 0)`；
//! - `last_flush` 在每次刷写尝试（无论成败）后更新为本次调用开始的时间点，同一次调用内多轮刷写共享该基线；
//! - `received` 在分发前按本轮切出的块大小累计，滞留在积压中的信封不会被重复计数；
//! - 分发失败时返回 [`PollStatus::Backoff`]，失败块计入 `dropped`，不会按子批次重试；
//! - 同一时刻只允许一个排空者：重叠的调用直接返回 [`PollStatus::Ready`] 且不做任何工作。
//!
//! # 执行逻辑（How）
//! - 调度器在 `FlushState` 中保留一个仅排空者可见的 `backlog`：需要刷写时若 `backlog` 不足一块，
//!   先 [`EnvelopeBuffer::swap`] 把共享缓冲区整体并入 `backlog` 尾部，再从头部切出至多 `max_size` 条分发；
//! - `backlog` 中的信封总是早于共享缓冲区中的信封到达，因此跨块、跨调用的到达顺序保持不变；
//! - `FlushState` 由 `parking_lot::Mutex` 保护，`process` 使用 `try_lock` 作为排空守卫，
//!   生产者从不接触这把锁。
use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, error};

use crate::buffer::EnvelopeBuffer;
use crate::clock::Clock;
use crate::envelope::Envelope;
use crate::error::DeliveryError;
use crate::metrics::SourceMetrics;
use crate::sink::BatchSink;

/// 单次轮询的结论，供驱动决定是否退避。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollStatus {
    /// 本轮没有发生错误，驱动可以立即再次轮询。
    Ready,
    /// 分发失败，驱动应按退避策略暂停后再轮询。
    Backoff,
}

/// 刷写阈值。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FlushPolicy {
    max_size: usize,
    max_delay: Duration,
}

impl FlushPolicy {
    /// `max_size` 为 0 时按 1 处理，避免空块死循环。
    pub fn new(max_size: usize, max_delay: Duration) -> Self {
        Self {
            max_size: max_size.max(1),
            max_delay,
        }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// 双阈值判定。
    pub fn should_flush(&self, pending: usize, elapsed: Duration) -> bool {
        pending >= self.max_size || (elapsed >= self.max_delay && pending > 0)
    }
}

struct FlushState {
    last_flush: Instant,
    backlog: VecDeque<Envelope>,
}

/// 刷写调度器。
///
/// # 教案式说明
/// - **定位（Where）**：由 [`BatchingSource`](crate::BatchingSource) 持有，与
///   [`IngestListener`](crate::IngestListener) 共享同一个 [`EnvelopeBuffer`]。
/// - **前置条件**：`sink` 与 `metrics` 必须线程安全；`clock` 必须单调。
/// - **后置条件**：`process` 返回后，若未发生失败，则 `pending < max_size` 或距上次刷写不足 `max_delay`。
pub struct FlushScheduler {
    policy: FlushPolicy,
    buffer: Arc<EnvelopeBuffer>,
    sink: Arc<dyn BatchSink>,
    metrics: Arc<dyn SourceMetrics>,
    clock: Arc<dyn Clock>,
    state: Mutex<FlushState>,
}

impl FlushScheduler {
    pub fn new(
        policy: FlushPolicy,
        buffer: Arc<EnvelopeBuffer>,
        sink: Arc<dyn BatchSink>,
        metrics: Arc<dyn SourceMetrics>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let last_flush = clock.now();
        Self {
            policy,
            buffer,
            sink,
            metrics,
            clock,
            state: Mutex::new(FlushState {
                last_flush,
                backlog: VecDeque::new(),
            }),
        }
    }

    pub fn policy(&self) -> FlushPolicy {
        self.policy
    }

    /// 尚未交付的信封总数：排空者积压 + 共享缓冲区。
    ///
    /// 排空进行中时积压部分不可读，此时只统计共享缓冲区。
    pub fn pending(&self) -> usize {
        let backlog = self.state.try_lock().map_or(0, |state| state.backlog.len());
        backlog + self.buffer.len()
    }

    /// 执行一次轮询。
    ///
    /// # 逻辑解析（How）
    /// 1. 以 `try_lock` 获取排空权，失败说明已有排空者在运行，直接返回 `Ready`；
    /// 2. 记录调用开始时间 `start`；
    /// 3. 每轮计算 `pending` 与 `elapsed = start - last_flush`，满足阈值则：
    ///    切出至多 `max_size` 条 → 以块大小记录 `received` 计数与延迟 → 同步分发 →
    ///    成功记录 `accepted` 计数与分发耗时，失败记录 `dropped` 并返回 `Backoff`；
    ///    无论成败都把 `last_flush` 设为 `start`。
    pub fn process(&self) -> PollStatus {
        let Some(mut state) = self.state.try_lock() else {
            debug!("flush already in progress on another thread, skipping this poll");
            return PollStatus::Ready;
        };

        let start = self.clock.now();
        loop {
            let pending = state.backlog.len() + self.buffer.len();
            let elapsed = start.saturating_duration_since(state.last_flush);
            if !self.policy.should_flush(pending, elapsed) {
                return PollStatus::Ready;
            }

            let batch = self.next_batch(&mut state.backlog);
            self.metrics.add_received(batch.len() as u64);
            self.metrics
                .add_received_latency(self.clock.now().saturating_duration_since(start));
            state.last_flush = start;
            if self.deliver(batch).is_err() {
                return PollStatus::Backoff;
            }
        }
    }

    /// 无视阈值，把当前全部积压与缓冲区内容按块交付下游。
    ///
    /// - **用途**：停机前的最后一次排空；会阻塞等待正在进行的 `process` 结束。
    /// - **返回**：成功交付的信封数；遇到第一次分发失败即停止并返回错误，剩余信封保留在积压中。
    pub fn drain_all(&self) -> Result<usize, DeliveryError> {
        let mut state = self.state.lock();
        let start = self.clock.now();
        state.backlog.extend(self.buffer.swap());

        let mut delivered = 0;
        while !state.backlog.is_empty() {
            let batch = self.next_batch(&mut state.backlog);
            self.metrics.add_received(batch.len() as u64);
            state.last_flush = start;
            delivered += self.deliver(batch)?;
        }
        Ok(delivered)
    }

    /// 丢弃全部未交付的信封并计入 `dropped`，返回丢弃数量。
    pub fn discard_pending(&self) -> usize {
        let mut state = self.state.lock();
        let discarded = state.backlog.len() + self.buffer.swap().len();
        state.backlog.clear();
        if discarded > 0 {
            self.metrics.add_dropped(discarded as u64);
        }
        discarded
    }

    fn next_batch(&self, backlog: &mut VecDeque<Envelope>) -> Vec<Envelope> {
        if backlog.len() < self.policy.max_size {
            backlog.extend(self.buffer.swap());
        }
        let take = backlog.len().min(self.policy.max_size);
        backlog.drain(..take).collect()
    }

    fn deliver(&self, batch: Vec<Envelope>) -> Result<usize, DeliveryError> {
        let batch_size = batch.len();
        let dispatch_start = self.clock.now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.sink.process_batch(batch)))
            .unwrap_or_else(|payload| {
                Err(DeliveryError::Panicked {
                    batch_size,
                    detail: panic_detail(payload.as_ref()),
                })
            });

        match outcome {
            Ok(()) => {
                self.metrics.add_accepted(batch_size as u64);
                self.metrics.add_accepted_latency(
                    self.clock.now().saturating_duration_since(dispatch_start),
                );
                debug!(batch_size, "batch delivered downstream");
                Ok(batch_size)
            }
            Err(err) => {
                self.metrics.add_dropped(batch_size as u64);
                error!(
                    batch_size,
                    error = %err,
                    "batch delivery failed, acknowledged envelopes are lost"
                );
                Err(err)
            }
        }
    }
}

fn panic_detail(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::metrics::SourceCounter;
    use crate::test_stubs::RecordingSink;
    use std::collections::HashMap;

    struct Fixture {
        scheduler: FlushScheduler,
        buffer: Arc<EnvelopeBuffer>,
        sink: Arc<RecordingSink>,
        counter: Arc<SourceCounter>,
        clock: MockClock,
    }

    fn fixture(max_size: usize, max_delay: Duration) -> Fixture {
        let buffer = Arc::new(EnvelopeBuffer::new());
        let sink = Arc::new(RecordingSink::new());
        let counter = Arc::new(SourceCounter::new("test"));
        let clock = MockClock::new();
        let scheduler = FlushScheduler::new(
            FlushPolicy::new(max_size, max_delay),
            Arc::clone(&buffer),
            sink.clone(),
            counter.clone(),
            Arc::new(clock.clone()),
        );
        Fixture {
            scheduler,
            buffer,
            sink,
            counter,
            clock,
        }
    }

    fn push(buffer: &EnvelopeBuffer, count: usize) {
        for seq in 0..count {
            buffer.append(Envelope::new(seq.to_string().into_bytes(), HashMap::new()));
        }
    }

    #[test]
    fn policy_requires_either_threshold() {
        let policy = FlushPolicy::new(3, Duration::from_millis(50));
        assert!(policy.should_flush(3, Duration::ZERO));
        assert!(policy.should_flush(1, Duration::from_millis(50)));
        assert!(!policy.should_flush(0, Duration::from_secs(60)));
        assert!(!policy.should_flush(2, Duration::from_millis(49)));
    }

    #[test]
    fn nothing_happens_below_both_thresholds() {
        let f = fixture(3, Duration::from_secs(10));
        push(&f.buffer, 2);

        assert_eq!(f.scheduler.process(), PollStatus::Ready);
        assert!(f.sink.batches().is_empty());
        assert_eq!(f.scheduler.pending(), 2);
        assert_eq!(f.counter.snapshot().received, 0);
    }

    /// 验证：积压超过多个块时，一次调用内按 `max_size` 分块刷写，余数留待下次。
    #[test]
    fn burst_is_flushed_in_bounded_chunks() {
        let f = fixture(3, Duration::from_secs(10));
        push(&f.buffer, 7);

        assert_eq!(f.scheduler.process(), PollStatus::Ready);

        assert_eq!(f.sink.batch_sizes(), [3, 3]);
        assert_eq!(f.scheduler.pending(), 1);
        let snapshot = f.counter.snapshot();
        assert_eq!(snapshot.accepted, 6);
        assert_eq!(snapshot.received, 6, "积压中的信封不得被重复计入 received");
    }

    #[test]
    fn delay_threshold_flushes_partial_batch_once() {
        let f = fixture(100, Duration::from_millis(50));
        push(&f.buffer, 1);
        f.clock.advance(Duration::from_millis(60));

        assert_eq!(f.scheduler.process(), PollStatus::Ready);
        push(&f.buffer, 1);
        assert_eq!(f.scheduler.process(), PollStatus::Ready);

        assert_eq!(f.sink.batch_sizes(), [1], "同一时间基线内不得重复触发时间阈值");
        assert_eq!(f.scheduler.pending(), 1);
    }

    #[test]
    fn failed_delivery_reports_backoff_and_counts_drop() {
        let f = fixture(2, Duration::from_secs(10));
        f.sink.fail_next(1);
        push(&f.buffer, 2);

        assert_eq!(f.scheduler.process(), PollStatus::Backoff);

        let snapshot = f.counter.snapshot();
        assert_eq!(snapshot.received, 2);
        assert_eq!(snapshot.accepted, 0);
        assert_eq!(snapshot.dropped, 2);
        assert_eq!(f.scheduler.pending(), 0);
    }

    #[test]
    fn panicking_sink_is_contained() {
        let buffer = Arc::new(EnvelopeBuffer::new());
        let counter = Arc::new(SourceCounter::new("test"));
        let sink = |_batch: Vec<Envelope>| -> Result<(), DeliveryError> { panic!("sink exploded") };
        let scheduler = FlushScheduler::new(
            FlushPolicy::new(1, Duration::from_secs(1)),
            Arc::clone(&buffer),
            Arc::new(sink),
            counter.clone(),
            Arc::new(MockClock::new()),
        );
        push(&buffer, 1);

        assert_eq!(scheduler.process(), PollStatus::Backoff);
        assert_eq!(counter.snapshot().dropped, 1);
    }

    #[test]
    fn drain_all_ignores_thresholds() {
        let f = fixture(3, Duration::from_secs(10));
        push(&f.buffer, 4);

        assert_eq!(f.scheduler.drain_all(), Ok(4));
        assert_eq!(f.sink.batch_sizes(), [3, 1]);
        assert_eq!(f.scheduler.pending(), 0);
        assert_eq!(f.counter.snapshot().received, 4);
    }

    #[test]
    fn discard_pending_counts_everything_left() {
        let f = fixture(3, Duration::from_secs(10));
        push(&f.buffer, 5);
        f.scheduler.process();

        assert_eq!(f.scheduler.discard_pending(), 2);
        assert_eq!(f.counter.snapshot().dropped, 2);
        assert_eq!(f.scheduler.pending(), 0);
    }
}
