#![doc = "spark-mq-source: 把推模式消息队列消费者桥接到只接受批次的下游管道。"]
#![doc = ""]
#![doc = "消费者回调把消息追加到无界缓冲区后立即确认；轮询驱动按条数与时长双阈值把缓冲区切块交付下游，"]
#![doc = "失败时报告退避，由驱动按线性升级的等待时长暂停。"]

//! ## 模块结构（Where）
//! - `envelope`/`buffer`：信封模型与多生产者单排空者的交换缓冲区；
//! - `listener`/`consumer`：消费者客户端抽象与摄取监听器；
//! - `scheduler`/`sink`/`backoff`：刷写调度、下游接口与退避记账；
//! - `source`/`driver`：生命周期装配与后台轮询线程；
//! - `config`/`error`/`metrics`/`clock`：环境支撑；
//! - `test_stubs`：脚本化消费者与记录型下游，供测试与示例复用。

pub mod backoff;
pub mod buffer;
pub mod clock;
pub mod config;
pub mod consumer;
pub mod driver;
pub mod envelope;
pub mod error;
pub mod listener;
pub mod metrics;
pub mod scheduler;
pub mod sink;
pub mod source;
pub mod test_stubs;

pub use backoff::{BackoffPolicy, BackoffState};
pub use buffer::EnvelopeBuffer;
pub use clock::{Clock, MockClock, SystemClock};
pub use config::{ConsumeFromWhere, MessageModel, SourceConfig};
pub use consumer::{ConsumeContext, ConsumeStatus, MessageListener, PushConsumer};
pub use driver::PollingDriver;
pub use envelope::{Envelope, IdentityFields, RawMessage};
pub use error::{ConfigError, ConsumerError, DeliveryError, Result, SourceError};
pub use listener::IngestListener;
pub use metrics::{CounterSnapshot, SourceCounter, SourceMetrics};
pub use scheduler::{FlushPolicy, FlushScheduler, PollStatus};
pub use sink::BatchSink;
pub use source::{BatchingSource, LifecycleState, SourceBuilder};
