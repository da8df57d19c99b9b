//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 集中定义配置、消费者客户端与下游分发三类失败，并提供统一的 [`SourceError`] 出口；
//! - 所有错误在组件边界被捕获并转换为就绪/退避/故障分类，不会穿透到消费者回调线程。
//!
//! ## 设计要求（What）
//! - 错误类型派生 `thiserror::Error`，兼容 `std::error::Error` 与 `?` 传播；
//! - 携带足够的上下文（配置键、主题、批大小），便于日志直接定位。

use thiserror::Error;

/// 配置解析与校验失败。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// TOML 文本无法解析或字段类型不匹配。
    #[error("failed to parse source configuration: {detail}")]
    Parse { detail: String },

    /// 平铺属性中的数值无法解析。
    #[error("configuration key `{key}` expects {expected}, got `{value}`")]
    InvalidValue {
        key: &'static str,
        expected: &'static str,
        value: String,
    },

    /// 字段取值违反约束。
    #[error("configuration key `{key}` is invalid: {reason}")]
    Constraint {
        key: &'static str,
        reason: &'static str,
    },
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::Parse {
            detail: err.to_string(),
        }
    }
}

/// 消息队列客户端在订阅或启动阶段返回的错误。
///
/// - **意图 (Why)**：客户端本身是外部协作者，本 crate 只关心“哪一步失败了”以及底层描述；
/// - **风险 (Trade-offs)**：底层错误被压缩为字符串，若需要保留原始类型应在客户端适配层自行记录。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConsumerError {
    #[error("subscribe to topic `{topic}` with tag `{tag}` failed: {detail}")]
    Subscribe {
        topic: String,
        tag: String,
        detail: String,
    },

    #[error("consumer failed to start: {detail}")]
    Start { detail: String },
}

/// 下游管道拒绝或未能处理一个批次。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DeliveryError {
    /// 下游显式拒绝了批次，例如通道已满或事务回滚。
    #[error("downstream rejected a batch of {batch_size} envelopes: {detail}")]
    Rejected { batch_size: usize, detail: String },

    /// 下游在处理过程中 panic，已在调度器边界被捕获。
    #[error("downstream panicked while processing a batch of {batch_size} envelopes: {detail}")]
    Panicked { batch_size: usize, detail: String },
}

impl DeliveryError {
    /// 便捷构造：以任意描述构造 `Rejected`。
    pub fn rejected(batch_size: usize, detail: impl Into<String>) -> Self {
        DeliveryError::Rejected {
            batch_size,
            detail: detail.into(),
        }
    }

    /// 失败批次中的信封数量。
    pub fn batch_size(&self) -> usize {
        match self {
            DeliveryError::Rejected { batch_size, .. }
            | DeliveryError::Panicked { batch_size, .. } => *batch_size,
        }
    }
}

/// crate 级统一错误，供 `BatchingSource` 等装配入口使用。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SourceError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Consumer(#[from] ConsumerError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),
}

/// crate 内统一的 `Result` 别名。
pub type Result<T, E = SourceError> = core::result::Result<T, E>;
