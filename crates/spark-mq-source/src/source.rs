//! 数据源实例：装配缓冲区、监听器、调度器与消费者，并管理启停生命周期。
//!
//! # 设计目标（Why）
//! - 每个配置实例拥有独立的缓冲区与计数器，同一进程内可并存多个互不干扰的数据源；
//! - 生命周期操作集中在此处，把客户端的启动失败、停机时的未交付信封等边界情况转换为
//!   日志与计数，而不是向调用方抛出致命错误。
//!
//! # 状态机（What）
//! - `Idle --start--> Running --stop--> Stopped --start--> Running`；
//! - 订阅或启动失败进入 `Faulted`，此后 `start` 不再生效，`stop` 仍可执行清理；
//! - `process` 不检查生命周期，由驱动决定何时轮询。
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::backoff::BackoffPolicy;
use crate::buffer::EnvelopeBuffer;
use crate::clock::{Clock, SystemClock};
use crate::config::SourceConfig;
use crate::consumer::PushConsumer;
use crate::envelope::IdentityFields;
use crate::error::Result;
use crate::listener::IngestListener;
use crate::metrics::{CounterSnapshot, SourceCounter, SourceMetrics};
use crate::scheduler::{FlushPolicy, FlushScheduler, PollStatus};
use crate::sink::BatchSink;

/// 数据源生命周期状态。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Running,
    Stopped,
    /// 订阅或启动失败，附带失败描述。数据源不再可用，但不会 panic 或中断宿主。
    Faulted(String),
}

impl LifecycleState {
    pub fn is_operational(&self) -> bool {
        !matches!(self, LifecycleState::Faulted(_))
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleState::Idle => f.write_str("idle"),
            LifecycleState::Running => f.write_str("running"),
            LifecycleState::Stopped => f.write_str("stopped"),
            LifecycleState::Faulted(reason) => write!(f, "faulted: {reason}"),
        }
    }
}

/// [`BatchingSource`] 的装配器，用于覆盖名称与时钟。
pub struct SourceBuilder {
    name: Option<String>,
    config: SourceConfig,
    clock: Arc<dyn Clock>,
}

impl SourceBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// 校验配置、装配组件并向消费者订阅。
    ///
    /// # 契约说明（What）
    /// - 配置非法时返回 [`SourceError::Config`](crate::SourceError::Config)，不会触碰消费者；
    /// - 订阅失败只记录错误日志并把数据源置为 [`LifecycleState::Faulted`]，依旧返回 `Ok`，
    ///   调用方可通过 [`BatchingSource::health`] 观察。
    pub fn build(
        self,
        mut consumer: Box<dyn PushConsumer>,
        sink: Arc<dyn BatchSink>,
    ) -> Result<BatchingSource> {
        let config = self.config;
        config.validate()?;

        let name = self
            .name
            .unwrap_or_else(|| format!("mq-source-{}", config.topic()));
        let counter = Arc::new(SourceCounter::new(name.clone()));
        let metrics: Arc<dyn SourceMetrics> = counter.clone();
        let buffer = Arc::new(EnvelopeBuffer::new());
        let identity = IdentityFields::new(
            config.topic(),
            config.tag(),
            config.extra().map(str::to_owned),
        );
        let listener = Arc::new(IngestListener::new(
            identity,
            Arc::clone(&buffer),
            Arc::clone(&metrics),
        ));
        let scheduler = FlushScheduler::new(
            FlushPolicy::new(config.max_size(), config.max_delay()),
            buffer,
            sink,
            metrics,
            self.clock,
        );

        let state = match consumer.subscribe(config.topic(), config.tag()) {
            Ok(()) => {
                consumer.register_listener(listener.clone());
                info!(
                    source = %name,
                    topic = config.topic(),
                    tag = config.tag(),
                    message_model = %config.message_model(),
                    consume_from_where = %config.consume_from_where(),
                    extra = config.extra(),
                    "source configured"
                );
                LifecycleState::Idle
            }
            Err(err) => {
                error!(source = %name, error = %err, "source configuration failed");
                LifecycleState::Faulted(err.to_string())
            }
        };

        Ok(BatchingSource {
            name,
            backoff: BackoffPolicy::new(config.backoff_sleep_increment(), config.max_backoff_sleep()),
            config,
            listener,
            scheduler,
            counter,
            consumer: Mutex::new(consumer),
            lifecycle: Mutex::new(Lifecycle {
                state,
                halted: false,
            }),
        })
    }
}

/// 生命周期状态与“停机清理是否已执行”的标记。
///
/// `halted` 与 `state` 分开记录：`Faulted` 数据源同样需要一次清理，但清理后仍保持故障状态。
struct Lifecycle {
    state: LifecycleState,
    halted: bool,
}

/// 一个已配置的攒批数据源。
///
/// # 教案式说明
/// - **意图（Why）**：把“消费者回调 → 缓冲区 → 轮询刷写 → 下游”整条链路封装为一个可独立启停的对象。
/// - **契约（What）**：
///   - [`BatchingSource::process`] 由单一驱动线程反复调用，返回值决定是否退避；
///   - [`BatchingSource::stop`] 关闭消费者后按配置排空剩余信封，未能交付的信封计入 `dropped` 并输出 WARN；
///   - 实例被丢弃时若仍在运行，会自动执行一次 `stop`。
/// - **风险提示（Trade-offs）**：消息在摄取时即向客户端确认；分发失败或停机未排空的信封不会被重投，
///   只能通过计数与日志发现。
pub struct BatchingSource {
    name: String,
    config: SourceConfig,
    backoff: BackoffPolicy,
    listener: Arc<IngestListener>,
    scheduler: FlushScheduler,
    counter: Arc<SourceCounter>,
    consumer: Mutex<Box<dyn PushConsumer>>,
    lifecycle: Mutex<Lifecycle>,
}

impl BatchingSource {
    /// 以系统时钟与默认名称装配数据源。
    pub fn configure(
        config: SourceConfig,
        consumer: Box<dyn PushConsumer>,
        sink: Arc<dyn BatchSink>,
    ) -> Result<Self> {
        Self::builder(config).build(consumer, sink)
    }

    pub fn builder(config: SourceConfig) -> SourceBuilder {
        SourceBuilder {
            name: None,
            config,
            clock: Arc::new(SystemClock),
        }
    }

    /// 启动消费者与计数器。
    ///
    /// - 已在运行时为空操作；
    /// - 处于 `Faulted` 时记录错误并保持故障状态；
    /// - 消费者启动失败时记录错误并进入 `Faulted`。
    pub fn start(&self) {
        let mut lifecycle = self.lifecycle.lock();
        match &lifecycle.state {
            LifecycleState::Running => {
                debug!(source = %self.name, "start() ignored, source already running");
                return;
            }
            LifecycleState::Faulted(reason) => {
                error!(source = %self.name, reason = %reason, "refusing to start a faulted source");
                return;
            }
            LifecycleState::Idle | LifecycleState::Stopped => {}
        }

        warn!(source = %self.name, topic = self.config.topic(), "starting consumer");
        match self.consumer.lock().start() {
            Ok(()) => {
                self.counter.start();
                lifecycle.state = LifecycleState::Running;
                lifecycle.halted = false;
            }
            Err(err) => {
                error!(source = %self.name, error = %err, "consumer failed to start");
                lifecycle.state = LifecycleState::Faulted(err.to_string());
            }
        }
    }

    /// 关闭消费者，处理剩余信封并停止计数器。
    ///
    /// 清理只执行一次：之后的调用在重新 `start` 之前均为空操作，`Faulted` 数据源也不例外。
    pub fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.halted {
            return;
        }

        self.consumer.lock().shutdown();

        if self.config.flush_on_stop() {
            match self.scheduler.drain_all() {
                Ok(0) => {}
                Ok(delivered) => {
                    info!(source = %self.name, delivered, "flushed remaining envelopes on stop")
                }
                Err(err) => {
                    error!(source = %self.name, error = %err, "final flush on stop failed")
                }
            }
        }
        let dropped = self.scheduler.discard_pending();
        if dropped > 0 {
            warn!(
                source = %self.name,
                dropped,
                "stopping with undelivered envelopes, they were acknowledged and are now lost"
            );
        }

        self.counter.stop();
        lifecycle.halted = true;
        if lifecycle.state.is_operational() {
            lifecycle.state = LifecycleState::Stopped;
        }
        warn!(source = %self.name, metrics = %self.counter.snapshot(), "consumer stopped");
    }

    /// 执行一次轮询刷写。
    pub fn process(&self) -> PollStatus {
        self.scheduler.process()
    }

    /// 驱动退避时使用的参数。
    pub fn backoff_policy(&self) -> BackoffPolicy {
        self.backoff
    }

    pub fn health(&self) -> LifecycleState {
        self.lifecycle.lock().state.clone()
    }

    /// 尚未交付下游的信封数。
    pub fn pending(&self) -> usize {
        self.scheduler.pending()
    }

    pub fn counters(&self) -> CounterSnapshot {
        self.counter.snapshot()
    }

    /// 已注册到消费者的监听器，也可直接用于绕过客户端的摄取。
    pub fn listener(&self) -> Arc<IngestListener> {
        Arc::clone(&self.listener)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &SourceConfig {
        &self.config
    }
}

impl Drop for BatchingSource {
    fn drop(&mut self) {
        if self.lifecycle.get_mut().state == LifecycleState::Running {
            self.stop();
        }
    }
}

impl fmt::Debug for BatchingSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchingSource")
            .field("name", &self.name)
            .field("state", &self.lifecycle.lock().state)
            .field("pending", &self.pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ConfigError, SourceError};
    use crate::test_stubs::{RecordingSink, ScriptedConsumer};

    #[test]
    fn invalid_config_is_rejected_before_subscribing() {
        let consumer = ScriptedConsumer::new();
        let result = BatchingSource::configure(
            SourceConfig::new("orders", "*").with_max_size(0),
            Box::new(consumer.clone()),
            Arc::new(RecordingSink::new()),
        );

        assert!(matches!(
            result,
            Err(SourceError::Config(ConfigError::Constraint { key: "maxSize", .. }))
        ));
        assert!(consumer.subscriptions().is_empty());
    }

    #[test]
    fn default_name_is_derived_from_topic() {
        let source = BatchingSource::configure(
            SourceConfig::new("orders", "*"),
            Box::new(ScriptedConsumer::new()),
            Arc::new(RecordingSink::new()),
        )
        .expect("合法配置");
        assert_eq!(source.name(), "mq-source-orders");
        assert_eq!(source.health(), LifecycleState::Idle);
    }

    #[test]
    fn start_is_idempotent() {
        let consumer = ScriptedConsumer::new();
        let source = BatchingSource::configure(
            SourceConfig::new("orders", "*"),
            Box::new(consumer.clone()),
            Arc::new(RecordingSink::new()),
        )
        .expect("合法配置");

        source.start();
        source.start();

        assert_eq!(source.health(), LifecycleState::Running);
        assert_eq!(source.counters().starts, 1);
        assert!(consumer.is_running());
    }
}
