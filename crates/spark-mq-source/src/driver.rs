//! 轮询驱动：在独立线程上反复调用 [`BatchingSource::process`]，并按退避策略暂停。
//!
//! # 设计背景（Why）
//! - 调度器本身从不睡眠，宿主需要一个“就绪即继续、退避即等待”的外层循环；
//! - 等待通过 `parking_lot::Condvar` 实现，停机信号可立即打断退避睡眠，而不必等满上限。
//!
//! # 契约说明（What）
//! - `Ready` 后清零退避进度，并等待 `poll_interval` 避免空转；
//! - `Backoff` 后按 [`BackoffState::on_backoff`] 计算等待时长，连续失败线性升级直至上限；
//! - [`PollingDriver::shutdown`] 只停止驱动线程，不会调用 [`BatchingSource::stop`]，两者的顺序由宿主决定。
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, warn};

use crate::backoff::BackoffState;
use crate::scheduler::PollStatus;
use crate::source::BatchingSource;

/// 未显式指定时，两次就绪轮询之间的等待时长。
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Default)]
struct DriverShared {
    stopping: Mutex<bool>,
    wake: Condvar,
    polls: AtomicU64,
    backoffs: AtomicU64,
}

impl DriverShared {
    /// 等待 `timeout` 或停机信号，返回是否已收到停机信号。
    fn wait(&self, timeout: Duration) -> bool {
        let mut stopping = self.stopping.lock();
        if !*stopping && !timeout.is_zero() {
            let _ = self.wake.wait_for(&mut stopping, timeout);
        }
        *stopping
    }

    fn is_stopping(&self) -> bool {
        *self.stopping.lock()
    }
}

/// 后台轮询线程的句柄。
///
/// 句柄被丢弃时会发出停机信号并等待线程退出。
pub struct PollingDriver {
    shared: Arc<DriverShared>,
    handle: Option<JoinHandle<()>>,
}

impl PollingDriver {
    /// 以默认轮询间隔启动驱动线程。
    pub fn spawn(source: Arc<BatchingSource>) -> io::Result<Self> {
        Self::spawn_with_interval(source, DEFAULT_POLL_INTERVAL)
    }

    /// 启动驱动线程，线程名取自数据源名称。
    pub fn spawn_with_interval(
        source: Arc<BatchingSource>,
        poll_interval: Duration,
    ) -> io::Result<Self> {
        let shared = Arc::new(DriverShared::default());
        let worker = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(format!("{}-poller", source.name()))
            .spawn(move || run(&source, &worker, poll_interval))?;
        Ok(Self {
            shared,
            handle: Some(handle),
        })
    }

    /// 已完成的轮询次数。
    pub fn polls(&self) -> u64 {
        self.shared.polls.load(Ordering::Relaxed)
    }

    /// 返回 `Backoff` 的轮询次数。
    pub fn backoffs(&self) -> u64 {
        self.shared.backoffs.load(Ordering::Relaxed)
    }

    /// 发出停机信号并等待驱动线程退出。
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        *self.shared.stopping.lock() = true;
        self.shared.wake.notify_all();
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            error!("polling thread terminated with a panic");
        }
    }
}

impl Drop for PollingDriver {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

fn run(source: &BatchingSource, shared: &DriverShared, poll_interval: Duration) {
    let mut backoff = BackoffState::new(source.backoff_policy());
    debug!(source = source.name(), "polling driver started");

    while !shared.is_stopping() {
        let status = source.process();
        shared.polls.fetch_add(1, Ordering::Relaxed);

        let wait = match status {
            PollStatus::Ready => {
                backoff.on_ready();
                poll_interval
            }
            PollStatus::Backoff => {
                shared.backoffs.fetch_add(1, Ordering::Relaxed);
                let wait = backoff.on_backoff();
                warn!(
                    source = source.name(),
                    consecutive = backoff.consecutive_backoffs(),
                    wait_ms = wait.as_millis() as u64,
                    "poll reported backoff"
                );
                wait
            }
        };

        if shared.wait(wait) {
            break;
        }
    }
    debug!(source = source.name(), "polling driver exited");
}
