//! 官方维护的内存桩实现：脚本化消费者与记录型下游。
//!
//! # 设计背景（Why）
//! - 集成测试、示例程序与下游使用者的单元测试都需要“可手动投递的消费者”和“可注入失败的下游”；
//!   集中维护可避免各处重复定义，并在契约演进时单点更新。
//!
//! # 使用方式（How）
//! - [`ScriptedConsumer`] 可克隆：一份交给 [`BatchingSource`](crate::BatchingSource)，另一份留在测试中调用
//!   [`ScriptedConsumer::deliver`] 模拟客户端投递线程；
//! - [`RecordingSink`] 记录每个收到的批次，并可通过 [`RecordingSink::fail_next`] 让接下来若干次分发失败。
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::consumer::{ConsumeContext, ConsumeStatus, MessageListener, PushConsumer};
use crate::envelope::{Envelope, RawMessage};
use crate::error::{ConsumerError, DeliveryError};
use crate::sink::BatchSink;

#[derive(Default)]
struct ConsumerState {
    subscriptions: Vec<(String, String)>,
    listener: Option<Arc<dyn MessageListener>>,
    running: bool,
    shutdowns: usize,
    subscribe_failure: Option<String>,
    start_failure: Option<String>,
}

/// 脚本化的推模式消费者。
#[derive(Clone, Default)]
pub struct ScriptedConsumer {
    state: Arc<Mutex<ConsumerState>>,
}

impl ScriptedConsumer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 让下一次 `subscribe` 失败。
    pub fn fail_subscribe(&self, detail: impl Into<String>) {
        self.state.lock().subscribe_failure = Some(detail.into());
    }

    /// 让下一次 `start` 失败。
    pub fn fail_start(&self, detail: impl Into<String>) {
        self.state.lock().start_failure = Some(detail.into());
    }

    /// 以客户端投递线程的身份调用已注册的监听器。
    ///
    /// 消费者未运行或未注册监听器时返回 `None`，模拟客户端尚未开始投递。
    pub fn deliver(&self, messages: &[RawMessage]) -> Option<(ConsumeStatus, ConsumeContext)> {
        let listener = {
            let state = self.state.lock();
            if !state.running {
                return None;
            }
            state.listener.clone()?
        };
        let mut context = ConsumeContext::new();
        let status = listener.consume(messages, &mut context);
        Some((status, context))
    }

    pub fn subscriptions(&self) -> Vec<(String, String)> {
        self.state.lock().subscriptions.clone()
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    pub fn shutdown_count(&self) -> usize {
        self.state.lock().shutdowns
    }
}

impl PushConsumer for ScriptedConsumer {
    fn subscribe(&mut self, topic: &str, tag: &str) -> Result<(), ConsumerError> {
        let mut state = self.state.lock();
        if let Some(detail) = state.subscribe_failure.take() {
            return Err(ConsumerError::Subscribe {
                topic: topic.to_owned(),
                tag: tag.to_owned(),
                detail,
            });
        }
        state.subscriptions.push((topic.to_owned(), tag.to_owned()));
        Ok(())
    }

    fn register_listener(&mut self, listener: Arc<dyn MessageListener>) {
        self.state.lock().listener = Some(listener);
    }

    fn start(&mut self) -> Result<(), ConsumerError> {
        let mut state = self.state.lock();
        if let Some(detail) = state.start_failure.take() {
            return Err(ConsumerError::Start { detail });
        }
        state.running = true;
        Ok(())
    }

    fn shutdown(&mut self) {
        let mut state = self.state.lock();
        if state.running {
            state.running = false;
            state.shutdowns += 1;
        }
    }
}

/// 记录每个批次的下游桩。
#[derive(Default)]
pub struct RecordingSink {
    batches: Mutex<Vec<Vec<Envelope>>>,
    failures_remaining: AtomicUsize,
    latency: Option<Duration>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// 每次分发前睡眠指定时长，模拟慢速下游。
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    /// 让接下来 `count` 次分发失败。失败的批次不会被记录。
    pub fn fail_next(&self, count: usize) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    pub fn batches(&self) -> Vec<Vec<Envelope>> {
        self.batches.lock().clone()
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batches.lock().iter().map(Vec::len).collect()
    }

    /// 所有已受理信封的负载，按交付顺序展开。
    pub fn payloads(&self) -> Vec<Vec<u8>> {
        self.batches
            .lock()
            .iter()
            .flatten()
            .map(|envelope| envelope.payload().to_vec())
            .collect()
    }
}

impl BatchSink for RecordingSink {
    fn process_batch(&self, batch: Vec<Envelope>) -> Result<(), DeliveryError> {
        if let Some(latency) = self.latency {
            thread::sleep(latency);
        }
        let should_fail = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                remaining.checked_sub(1)
            })
            .is_ok();
        if should_fail {
            return Err(DeliveryError::rejected(batch.len(), "scripted failure"));
        }
        self.batches.lock().push(batch);
        Ok(())
    }
}
