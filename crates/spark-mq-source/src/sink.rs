//! 下游批量管道契约。
use crate::envelope::Envelope;
use crate::error::DeliveryError;

/// 只接受批次的下游事件管道。
///
/// # 教案式说明
/// - **意图（Why）**：下游内部处理（通道、事务、拦截器）不在本 crate 范围内，调度器只需要
///   “同步交付一个有序批次，可能失败”这一能力。
/// - **契约（What）**：
///   - 调用在轮询线程上同步执行，返回即表示下游已受理或已拒绝；
///   - 批次内信封保持到达顺序，实现不得假设批次非空以外的大小；
///   - 失败时整个批次视为未交付，调度器不会按子批次重试。
/// - **风险提示（Trade-offs）**：调用耗时直接形成对轮询频率的背压；由于消息在摄取时已确认，
///   该背压不会传导到消息队列的流控。
pub trait BatchSink: Send + Sync {
    fn process_batch(&self, batch: Vec<Envelope>) -> Result<(), DeliveryError>;
}

impl<F> BatchSink for F
where
    F: Fn(Vec<Envelope>) -> Result<(), DeliveryError> + Send + Sync,
{
    fn process_batch(&self, batch: Vec<Envelope>) -> Result<(), DeliveryError> {
        self(batch)
    }
}
