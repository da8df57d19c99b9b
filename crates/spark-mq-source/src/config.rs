//! 数据源配置：订阅选择器、攒批阈值与退避参数。
//!
//! # 设计目标（Why）
//! - 核心只消费平铺的数值/字符串参数；本模块负责把 TOML 文本或宿主传入的平铺属性
//!   转换为强类型的 [`SourceConfig`]，并在装配前集中校验。
//! - 平铺属性沿用消息队列数据源的惯用键名（`maxSize`、`maxDelay`、`backoffSleepIncrement` 等），
//!   使既有部署配置无需改写即可迁移。
//!
//! # 契约说明（What）
//! - 所有时长字段以毫秒表达，读取时转换为 [`Duration`]；
//! - [`SourceConfig::validate`] 在 [`SourceConfig::from_toml_str`] 与
//!   [`SourceConfig::from_properties`] 中自动调用，手工构造时由
//!   [`BatchingSource::configure`](crate::BatchingSource::configure) 负责调用。
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// 未配置主题时使用的默认主题。
pub const DEFAULT_TOPIC: &str = "spark-mq-source";
/// 未配置标签时订阅全部标签。
pub const DEFAULT_TAG: &str = "*";
pub const DEFAULT_MAX_SIZE: usize = 20;
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(2_000);
pub const DEFAULT_BACKOFF_SLEEP_INCREMENT: Duration = Duration::from_millis(1_000);
pub const DEFAULT_MAX_BACKOFF_SLEEP: Duration = Duration::from_millis(5_000);

/// 平铺属性键名，与常见消息队列数据源的配置约定保持一致。
pub mod keys {
    pub const TOPIC: &str = "topic";
    pub const TAG: &str = "tag";
    pub const EXTRA: &str = "extra";
    pub const MAX_SIZE: &str = "maxSize";
    pub const MAX_DELAY: &str = "maxDelay";
    pub const BACKOFF_SLEEP_INCREMENT: &str = "backoffSleepIncrement";
    pub const MAX_BACKOFF_SLEEP: &str = "maxBackoffSleep";
    pub const MESSAGE_MODEL: &str = "messageModel";
    pub const CONSUME_FROM_WHERE: &str = "consumeFromWhere";
    pub const FLUSH_ON_STOP: &str = "flushOnStop";
}

/// 消费模式：集群内分摊或广播到每个实例。
///
/// 本 crate 不解释该值，只透传给消费者客户端的装配方并记录到日志。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum MessageModel {
    #[default]
    Clustering,
    Broadcasting,
}

impl FromStr for MessageModel {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "clustering" => Ok(MessageModel::Clustering),
            "broadcasting" => Ok(MessageModel::Broadcasting),
            _ => Err(ConfigError::InvalidValue {
                key: keys::MESSAGE_MODEL,
                expected: "CLUSTERING or BROADCASTING",
                value: value.to_owned(),
            }),
        }
    }
}

impl TryFrom<String> for MessageModel {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for MessageModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageModel::Clustering => f.write_str("CLUSTERING"),
            MessageModel::Broadcasting => f.write_str("BROADCASTING"),
        }
    }
}

/// 首次订阅（无已提交位点）时的起始消费位置。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum ConsumeFromWhere {
    #[default]
    LastOffset,
    FirstOffset,
    Timestamp,
}

impl FromStr for ConsumeFromWhere {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let lowered = value.trim().to_ascii_lowercase();
        let normalized = lowered
            .strip_prefix("consume_from_")
            .unwrap_or(lowered.as_str());
        match normalized {
            "last_offset" => Ok(ConsumeFromWhere::LastOffset),
            "first_offset" => Ok(ConsumeFromWhere::FirstOffset),
            "timestamp" => Ok(ConsumeFromWhere::Timestamp),
            _ => Err(ConfigError::InvalidValue {
                key: keys::CONSUME_FROM_WHERE,
                expected: "CONSUME_FROM_LAST_OFFSET, CONSUME_FROM_FIRST_OFFSET or CONSUME_FROM_TIMESTAMP",
                value: value.to_owned(),
            }),
        }
    }
}

impl TryFrom<String> for ConsumeFromWhere {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for ConsumeFromWhere {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsumeFromWhere::LastOffset => f.write_str("CONSUME_FROM_LAST_OFFSET"),
            ConsumeFromWhere::FirstOffset => f.write_str("CONSUME_FROM_FIRST_OFFSET"),
            ConsumeFromWhere::Timestamp => f.write_str("CONSUME_FROM_TIMESTAMP"),
        }
    }
}

/// 单个数据源实例的完整配置。
///
/// # 教案式说明
/// - **意图（Why）**：把订阅选择器、攒批阈值、退避参数与停机策略收拢到一个值对象，
///   让 [`BatchingSource`](crate::BatchingSource) 的装配过程只依赖这一处输入。
/// - **契约（What）**：
///   - `max_size`：触发刷写的信封数量阈值，必须大于 0；
///   - `max_delay_ms`：距上次刷写的最长等待时间，必须大于 0；
///   - `backoff_sleep_increment_ms` 不得超过 `max_backoff_sleep_ms`；
///   - `flush_on_stop`：停机时是否尝试排空剩余信封，默认开启。
/// - **风险提示（Trade-offs）**：`extra` 为自由文本，不做格式校验；其内容会原样写入每个信封。
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SourceConfig {
    topic: String,
    tag: String,
    extra: Option<String>,
    max_size: usize,
    max_delay_ms: u64,
    backoff_sleep_increment_ms: u64,
    max_backoff_sleep_ms: u64,
    message_model: MessageModel,
    consume_from_where: ConsumeFromWhere,
    flush_on_stop: bool,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            topic: DEFAULT_TOPIC.to_owned(),
            tag: DEFAULT_TAG.to_owned(),
            extra: None,
            max_size: DEFAULT_MAX_SIZE,
            max_delay_ms: duration_ms(DEFAULT_MAX_DELAY),
            backoff_sleep_increment_ms: duration_ms(DEFAULT_BACKOFF_SLEEP_INCREMENT),
            max_backoff_sleep_ms: duration_ms(DEFAULT_MAX_BACKOFF_SLEEP),
            message_model: MessageModel::default(),
            consume_from_where: ConsumeFromWhere::default(),
            flush_on_stop: true,
        }
    }
}

impl SourceConfig {
    /// 以主题与标签构造配置，其余字段取默认值。
    pub fn new(topic: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            tag: tag.into(),
            ..Self::default()
        }
    }

    /// 从 TOML 文本解析并校验配置。缺省字段取默认值，未知字段视为错误。
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: SourceConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// 从平铺的字符串属性解析配置，键名见 [`keys`]。
    ///
    /// # 逻辑解析（How）
    /// - 缺失的键保持默认值；
    /// - 数值与布尔值解析失败时返回 [`ConfigError::InvalidValue`]，并附带原始文本；
    /// - 未识别的键被忽略，宿主可以把整份组件配置原样传入。
    pub fn from_properties(properties: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let mut config = SourceConfig::default();
        if let Some(topic) = properties.get(keys::TOPIC) {
            config.topic = topic.clone();
        }
        if let Some(tag) = properties.get(keys::TAG) {
            config.tag = tag.clone();
        }
        config.extra = properties.get(keys::EXTRA).cloned();
        if let Some(value) = properties.get(keys::MAX_SIZE) {
            config.max_size = parse_number(keys::MAX_SIZE, value)?;
        }
        if let Some(value) = properties.get(keys::MAX_DELAY) {
            config.max_delay_ms = parse_number(keys::MAX_DELAY, value)?;
        }
        if let Some(value) = properties.get(keys::BACKOFF_SLEEP_INCREMENT) {
            config.backoff_sleep_increment_ms = parse_number(keys::BACKOFF_SLEEP_INCREMENT, value)?;
        }
        if let Some(value) = properties.get(keys::MAX_BACKOFF_SLEEP) {
            config.max_backoff_sleep_ms = parse_number(keys::MAX_BACKOFF_SLEEP, value)?;
        }
        if let Some(value) = properties.get(keys::MESSAGE_MODEL) {
            config.message_model = value.parse()?;
        }
        if let Some(value) = properties.get(keys::CONSUME_FROM_WHERE) {
            config.consume_from_where = value.parse()?;
        }
        if let Some(value) = properties.get(keys::FLUSH_ON_STOP) {
            config.flush_on_stop = value.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: keys::FLUSH_ON_STOP,
                expected: "true or false",
                value: value.clone(),
            })?;
        }
        config.validate()?;
        Ok(config)
    }

    /// 校验字段间约束。
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.topic.trim().is_empty() {
            return Err(ConfigError::Constraint {
                key: keys::TOPIC,
                reason: "must not be empty",
            });
        }
        if self.tag.trim().is_empty() {
            return Err(ConfigError::Constraint {
                key: keys::TAG,
                reason: "must not be empty",
            });
        }
        if self.max_size == 0 {
            return Err(ConfigError::Constraint {
                key: keys::MAX_SIZE,
                reason: "must be greater than zero",
            });
        }
        if self.max_delay_ms == 0 {
            return Err(ConfigError::Constraint {
                key: keys::MAX_DELAY,
                reason: "must be greater than zero",
            });
        }
        if self.backoff_sleep_increment_ms == 0 {
            return Err(ConfigError::Constraint {
                key: keys::BACKOFF_SLEEP_INCREMENT,
                reason: "must be greater than zero",
            });
        }
        if self.backoff_sleep_increment_ms > self.max_backoff_sleep_ms {
            return Err(ConfigError::Constraint {
                key: keys::BACKOFF_SLEEP_INCREMENT,
                reason: "must not exceed maxBackoffSleep",
            });
        }
        Ok(())
    }

    pub fn with_extra(mut self, extra: impl Into<String>) -> Self {
        self.extra = Some(extra.into());
        self
    }

    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay_ms = duration_ms(max_delay);
        self
    }

    pub fn with_backoff(mut self, increment: Duration, max: Duration) -> Self {
        self.backoff_sleep_increment_ms = duration_ms(increment);
        self.max_backoff_sleep_ms = duration_ms(max);
        self
    }

    pub fn with_message_model(mut self, model: MessageModel) -> Self {
        self.message_model = model;
        self
    }

    pub fn with_consume_from_where(mut self, from_where: ConsumeFromWhere) -> Self {
        self.consume_from_where = from_where;
        self
    }

    pub fn with_flush_on_stop(mut self, flush_on_stop: bool) -> Self {
        self.flush_on_stop = flush_on_stop;
        self
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn extra(&self) -> Option<&str> {
        self.extra.as_deref()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn backoff_sleep_increment(&self) -> Duration {
        Duration::from_millis(self.backoff_sleep_increment_ms)
    }

    pub fn max_backoff_sleep(&self) -> Duration {
        Duration::from_millis(self.max_backoff_sleep_ms)
    }

    pub fn message_model(&self) -> MessageModel {
        self.message_model
    }

    pub fn consume_from_where(&self) -> ConsumeFromWhere {
        self.consume_from_where
    }

    pub fn flush_on_stop(&self) -> bool {
        self.flush_on_stop
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn parse_number<T: FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key,
        expected: "a non-negative integer",
        value: value.to_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_applied_for_missing_fields() {
        let config = SourceConfig::from_toml_str("topic = \"orders\"").expect("合法配置");
        assert_eq!(config.topic(), "orders");
        assert_eq!(config.tag(), DEFAULT_TAG);
        assert_eq!(config.max_size(), DEFAULT_MAX_SIZE);
        assert_eq!(config.max_delay(), DEFAULT_MAX_DELAY);
        assert_eq!(config.backoff_sleep_increment(), DEFAULT_BACKOFF_SLEEP_INCREMENT);
        assert_eq!(config.max_backoff_sleep(), DEFAULT_MAX_BACKOFF_SLEEP);
        assert!(config.flush_on_stop());
        assert!(config.extra().is_none());
    }

    #[test]
    fn toml_accepts_full_document() {
        let text = r#"
            topic = "orders"
            tag = "created || paid"
            extra = "dc-1"
            max_size = 3
            max_delay_ms = 10000
            backoff_sleep_increment_ms = 500
            max_backoff_sleep_ms = 4000
            message_model = "BROADCASTING"
            consume_from_where = "CONSUME_FROM_FIRST_OFFSET"
            flush_on_stop = false
        "#;
        let config = SourceConfig::from_toml_str(text).expect("合法配置");
        assert_eq!(config.extra(), Some("dc-1"));
        assert_eq!(config.max_size(), 3);
        assert_eq!(config.max_delay(), Duration::from_secs(10));
        assert_eq!(config.message_model(), MessageModel::Broadcasting);
        assert_eq!(config.consume_from_where(), ConsumeFromWhere::FirstOffset);
        assert!(!config.flush_on_stop());
    }

    #[test]
    fn toml_rejects_unknown_fields() {
        let err = SourceConfig::from_toml_str("topicc = \"typo\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn properties_use_conventional_key_names() {
        let properties: HashMap<String, String> = [
            (keys::TOPIC, "orders"),
            (keys::MAX_SIZE, "50"),
            (keys::MAX_DELAY, "250"),
            (keys::MESSAGE_MODEL, "clustering"),
            (keys::CONSUME_FROM_WHERE, "CONSUME_FROM_TIMESTAMP"),
            ("unrelated.key", "ignored"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_owned(), v.to_owned()))
        .collect();

        let config = SourceConfig::from_properties(&properties).expect("合法属性");
        assert_eq!(config.topic(), "orders");
        assert_eq!(config.max_size(), 50);
        assert_eq!(config.max_delay(), Duration::from_millis(250));
        assert_eq!(config.consume_from_where(), ConsumeFromWhere::Timestamp);
    }

    #[test]
    fn properties_report_unparsable_numbers() {
        let properties = HashMap::from([(keys::MAX_SIZE.to_owned(), "twenty".to_owned())]);
        assert_eq!(
            SourceConfig::from_properties(&properties),
            Err(ConfigError::InvalidValue {
                key: keys::MAX_SIZE,
                expected: "a non-negative integer",
                value: "twenty".to_owned(),
            })
        );
    }

    #[test]
    fn validation_rejects_zero_thresholds_and_inverted_backoff() {
        assert!(SourceConfig::default().with_max_size(0).validate().is_err());
        assert!(
            SourceConfig::default()
                .with_max_delay(Duration::ZERO)
                .validate()
                .is_err()
        );
        let inverted = SourceConfig::default()
            .with_backoff(Duration::from_secs(10), Duration::from_secs(1))
            .validate();
        assert!(matches!(
            inverted,
            Err(ConfigError::Constraint {
                key: keys::BACKOFF_SLEEP_INCREMENT,
                ..
            })
        ));
    }
}
