use std::sync::Arc;

use tracing::{error, trace};

use crate::buffer::EnvelopeBuffer;
use crate::consumer::{ConsumeContext, ConsumeStatus, MessageListener};
use crate::envelope::{Envelope, IdentityFields, RawMessage};
use crate::metrics::SourceMetrics;

/// 摄取监听器：把客户端投递的原始消息转换为信封并追加到共享缓冲区。
///
/// # 教案式说明
/// - **定位（Where）**：注册到 [`PushConsumer`](crate::PushConsumer)，在客户端投递线程上被并发调用。
/// - **契约（What）**：
///   - 空批次属于协议违例：记录错误并返回 [`ConsumeStatus::ReconsumeLater`]，不修改缓冲区与计数器；
///   - 非空批次逐条构造信封并在一次段锁内整体追加，`ack_index` 推进到批次末尾，最终返回
///     [`ConsumeStatus::ConsumeSuccess`]；同一回调的信封在缓冲区中保持连续；
///   - 从不等待刷写，缓冲区再大也立即返回。
/// - **风险提示（Trade-offs）**：消息在追加时即被确认，而非在下游交付成功后；
///   下游失败会丢失已确认的消息，该损失通过 `dropped` 计数与错误日志暴露。
pub struct IngestListener {
    identity: IdentityFields,
    buffer: Arc<EnvelopeBuffer>,
    metrics: Arc<dyn SourceMetrics>,
}

impl IngestListener {
    pub fn new(
        identity: IdentityFields,
        buffer: Arc<EnvelopeBuffer>,
        metrics: Arc<dyn SourceMetrics>,
    ) -> Self {
        Self {
            identity,
            buffer,
            metrics,
        }
    }

    pub fn identity(&self) -> &IdentityFields {
        &self.identity
    }
}

impl MessageListener for IngestListener {
    fn consume(&self, messages: &[RawMessage], context: &mut ConsumeContext) -> ConsumeStatus {
        if messages.is_empty() {
            error!(
                topic = self.identity.topic(),
                "consume() called with an empty message batch, asking for redelivery"
            );
            return ConsumeStatus::ReconsumeLater;
        }

        self.buffer.append_all(messages.iter().map(|message| {
            trace!(msg_id = message.msg_id(), "message buffered");
            Envelope::from_raw(&self.identity, message)
        }));
        context.set_ack_index(messages.len());
        self.metrics.add_ingested(messages.len() as u64);
        ConsumeStatus::ConsumeSuccess
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::SourceCounter;

    fn listener() -> (IngestListener, Arc<EnvelopeBuffer>, Arc<SourceCounter>) {
        let buffer = Arc::new(EnvelopeBuffer::new());
        let counter = Arc::new(SourceCounter::new("test"));
        let listener = IngestListener::new(
            IdentityFields::new("orders", "*", None),
            Arc::clone(&buffer),
            counter.clone(),
        );
        (listener, buffer, counter)
    }

    #[test]
    fn empty_batch_asks_for_redelivery() {
        let (listener, buffer, counter) = listener();
        let mut context = ConsumeContext::new();

        let status = listener.consume(&[], &mut context);

        assert_eq!(status, ConsumeStatus::ReconsumeLater);
        assert_eq!(context.ack_index(), 0);
        assert!(buffer.is_empty());
        assert_eq!(counter.snapshot().ingested, 0);
    }

    #[test]
    fn every_message_is_buffered_and_acknowledged() {
        let (listener, buffer, counter) = listener();
        let mut context = ConsumeContext::new();
        let messages: Vec<_> = (0..3)
            .map(|seq| RawMessage::new(format!("m{seq}").into_bytes()))
            .collect();

        let status = listener.consume(&messages, &mut context);

        assert_eq!(status, ConsumeStatus::ConsumeSuccess);
        assert_eq!(context.ack_index(), 3);
        assert_eq!(buffer.len(), 3);
        assert_eq!(counter.snapshot().ingested, 3);
        assert_eq!(buffer.swap()[0].attribute("topic"), Some("orders"));
    }
}
