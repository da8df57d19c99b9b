//! 生产者与排空者之间交换信封的共享缓冲区。
//!
//! # 设计初衷（Why）
//! - 消费者回调线程（多个生产者）与轮询线程（单一排空者）并发访问同一批待发信封；
//!   若排空者在下游分发期间持有锁，慢速下游会直接阻塞摄取。
//! - 因此采用 [`arc_swap::ArcSwap`] 作为“当前段”的原子引用：排空者先原子替换引用，再封存旧段，
//!   分发过程中不持有任何生产者可见的锁。
//!
//! # 契约说明（What）
//! - [`EnvelopeBuffer::append`] 可被任意线程并发调用，不会因分发而阻塞；
//! - [`EnvelopeBuffer::swap`] 原子地安装新的空段并返回旧段内容；
//! - 与 `swap` 并发的每次 `append` 恰好落入“被返回的旧段”或“新的当前段”之一，既不丢失也不重复。
//!
//! # 执行逻辑（How）
//! - 段内部由 `parking_lot::Mutex` 保护 `{ items, sealed }`，锁只覆盖一次 `push` 或一次 `take`；
//! - 排空者顺序为：`swap` 引用 → 锁旧段 → 置 `sealed` → 取走全部元素；
//! - 生产者加载当前段并加锁，若观察到 `sealed`，说明引用已被替换，重新加载后重试。
//!
//! # 权衡与注意事项（Trade-offs）
//! - 每段一把短锁，换取了“交换点之后旧段绝不再被写入”的强保证；纯 RCU 克隆方案在大批次下
//!   会让每次追加退化为 O(n) 复制。
//! - 重试只会在交换瞬间发生，且新段必然已安装，因此循环至多再执行一轮。
use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use crate::envelope::Envelope;

/// 单个缓冲段。封存后不再接受写入。
#[derive(Default)]
struct Segment {
    state: Mutex<SegmentState>,
}

#[derive(Default)]
struct SegmentState {
    items: Vec<Envelope>,
    sealed: bool,
}

/// 可原子交换的待发信封缓冲区。
///
/// # 教案式说明
/// - **定位（Where）**：每个 [`BatchingSource`](crate::BatchingSource) 实例持有一份，
///   通过 `Arc` 在监听器与调度器之间共享；不存在进程级单例。
/// - **契约（What）**：元素保持到达顺序；一次 `swap` 建立全序切分点，
///   切分点之前追加的元素全部出现在返回值中，之后追加的全部留在新段中。
pub struct EnvelopeBuffer {
    current: ArcSwap<Segment>,
}

impl EnvelopeBuffer {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(Segment::default()),
        }
    }

    /// 将信封追加到当前段末尾。
    ///
    /// - **并发语义**：仅在 `push` 期间持有段锁；遇到已封存的旧段时重新加载当前段并重试。
    /// - **后置条件**：返回时信封已位于某个段中，且该段要么仍是当前段，要么尚未被排空者取走。
    pub fn append(&self, envelope: Envelope) {
        loop {
            let segment = self.current.load();
            let mut state = segment.state.lock();
            if !state.sealed {
                state.items.push(envelope);
                return;
            }
        }
    }

    /// 在一次段锁内追加一组信封，组内元素在缓冲区中保持连续。
    pub fn append_all(&self, envelopes: impl IntoIterator<Item = Envelope>) {
        let mut pending: Vec<Envelope> = envelopes.into_iter().collect();
        if pending.is_empty() {
            return;
        }
        loop {
            let segment = self.current.load();
            let mut state = segment.state.lock();
            if !state.sealed {
                state.items.append(&mut pending);
                return;
            }
        }
    }

    /// 以新的空段替换当前段，返回旧段中的全部信封（保持到达顺序）。
    pub fn swap(&self) -> Vec<Envelope> {
        let previous = self.current.swap(Arc::new(Segment::default()));
        let mut state = previous.state.lock();
        state.sealed = true;
        std::mem::take(&mut state.items)
    }

    /// 当前段中的信封数量。
    pub fn len(&self) -> usize {
        self.current.load().state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EnvelopeBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EnvelopeBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvelopeBuffer")
            .field("len", &self.len())
            .finish()
    }
}
