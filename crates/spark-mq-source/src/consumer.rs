//! 推模式消息队列客户端的最小契约。
//!
//! # 模块定位（Why）
//! - 订阅、位点提交、重投递等协议细节属于客户端自身；刷写引擎只需要“注册回调、启动、关闭”
//!   以及回调返回的“已消费 / 稍后重试”信号。
//! - 以 trait 描述该契约后，生产环境可以接入任意客户端适配层，测试则使用
//!   [`ScriptedConsumer`](crate::test_stubs::ScriptedConsumer)。
//!
//! # 暴露接口（What）
//! - [`PushConsumer`]：客户端生命周期；
//! - [`MessageListener`]：客户端在投递线程上调用的回调；
//! - [`ConsumeContext`] / [`ConsumeStatus`]：单次回调的确认进度与返回信号。
use std::sync::Arc;

use crate::envelope::RawMessage;
use crate::error::ConsumerError;

/// 回调对整批消息的处理结论。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConsumeStatus {
    /// 批次已被处理，客户端可以推进位点。
    ConsumeSuccess,
    /// 批次未被处理，客户端应在稍后重新投递。
    ReconsumeLater,
}

/// 单次回调内的确认进度。
///
/// # 契约说明（What）
/// - `ack_index` 表示批次中前 `ack_index` 条消息已被处理；
/// - 回调返回 [`ConsumeStatus::ConsumeSuccess`] 时，客户端以 `ack_index` 为准推进位点，
///   之后的消息视为需要重投。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConsumeContext {
    ack_index: usize,
}

impl ConsumeContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ack_index(&self) -> usize {
        self.ack_index
    }

    pub fn set_ack_index(&mut self, ack_index: usize) {
        self.ack_index = ack_index;
    }
}

/// 客户端投递回调。
///
/// # 契约说明（What）
/// - 可能被客户端的多个投递线程并发调用；
/// - 实现不得 panic，也不得阻塞在下游 IO 上，否则会拖垮客户端线程池。
pub trait MessageListener: Send + Sync {
    fn consume(&self, messages: &[RawMessage], context: &mut ConsumeContext) -> ConsumeStatus;
}

/// 推模式消息队列客户端。
///
/// # 契约说明（What）
/// - `subscribe` 与 `register_listener` 在 `start` 之前调用；
/// - `start` 之后客户端开始在自有线程上调用已注册的监听器；
/// - `shutdown` 返回后不得再调用监听器，且应当幂等。
pub trait PushConsumer: Send {
    fn subscribe(&mut self, topic: &str, tag: &str) -> Result<(), ConsumerError>;

    fn register_listener(&mut self, listener: Arc<dyn MessageListener>);

    fn start(&mut self) -> Result<(), ConsumerError>;

    fn shutdown(&mut self);
}
