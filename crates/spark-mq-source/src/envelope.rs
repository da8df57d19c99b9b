//! 消息信封与原始消息的数据模型。
//!
//! # 设计目标（Why）
//! - 消息队列客户端按“原始消息”投递（消息体 + 字符串属性），而下游管道只接受“信封”批次；
//!   本模块集中定义两者以及从前者构造后者的规则，避免在监听器与测试中散落拼装逻辑。
//!
//! # 契约说明（What）
//! - [`Envelope`] 创建后不可变：字段私有，仅提供只读访问器；
//! - 属性合并顺序固定：先写入 `topic`、`tag`、可选的 `extra` 标识字段，再由消息自身属性覆盖；
//!   键冲突时消息属性胜出。
use std::collections::HashMap;

use bytes::Bytes;

/// 信封属性中承载订阅主题的键。
pub const TOPIC_ATTRIBUTE: &str = "topic";
/// 信封属性中承载订阅标签的键。
pub const TAG_ATTRIBUTE: &str = "tag";
/// 信封属性中承载自定义附加字段的键。
pub const EXTRA_ATTRIBUTE: &str = "extra";

/// 消息队列客户端一次回调中交付的单条原始消息。
///
/// - `body`：不透明的消息体字节；
/// - `properties`：消息自带的字符串键值属性；
/// - `msg_id`：可选的消息标识，仅用于日志定位，不会写入信封。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RawMessage {
    body: Bytes,
    properties: HashMap<String, String>,
    msg_id: Option<String>,
}

impl RawMessage {
    /// 以消息体构造原始消息，属性为空。
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            body: body.into(),
            properties: HashMap::new(),
            msg_id: None,
        }
    }

    /// 追加一条消息属性，重复键以最后一次写入为准。
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// 附加消息标识。
    pub fn with_msg_id(mut self, msg_id: impl Into<String>) -> Self {
        self.msg_id = Some(msg_id.into());
        self
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn properties(&self) -> &HashMap<String, String> {
        &self.properties
    }

    pub fn msg_id(&self) -> Option<&str> {
        self.msg_id.as_deref()
    }
}

/// 注入每个信封的固定标识字段。
///
/// # 教案式说明
/// - **意图（Why）**：`topic`、`tag` 与 `extra` 来自配置，在实例生命周期内不变；
///   预先组装为结构体，避免监听器在热路径上反复读取配置。
/// - **契约（What）**：`extra` 为 `None` 时不写入 `extra` 键，而不是写入空字符串。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdentityFields {
    topic: String,
    tag: String,
    extra: Option<String>,
}

impl IdentityFields {
    pub fn new(topic: impl Into<String>, tag: impl Into<String>, extra: Option<String>) -> Self {
        Self {
            topic: topic.into(),
            tag: tag.into(),
            extra,
        }
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
}

/// 投递给下游管道的最小单元：消息体 + 属性表。
///
/// # 设计背景（Why）
/// - 下游管道只认识“负载 + 头部”的事件结构，与消息队列的系统属性无关；
/// - 信封在缓冲区中可能被多个生产者线程并发追加，因此创建后不可再修改。
///
/// # 契约说明（What）
/// - 由 [`Envelope::from_raw`] 在摄取阶段一次性构造；
/// - 仅在缓冲区与分发调用期间存活，分发结束（无论成败）即被丢弃，不做单条重试。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    payload: Bytes,
    attributes: HashMap<String, String>,
}

impl Envelope {
    /// 直接以负载与属性构造信封，主要供下游测试与基准使用。
    pub fn new(payload: impl Into<Bytes>, attributes: HashMap<String, String>) -> Self {
        Self {
            payload: payload.into(),
            attributes,
        }
    }

    /// 依据固定标识字段与原始消息构造信封。
    ///
    /// # 逻辑解析（How）
    /// 1. 先写入 `topic`、`tag`，若配置了 `extra` 再写入 `extra`；
    /// 2. 再按原始消息属性逐条覆盖，键冲突时消息属性胜出；
    /// 3. 消息体以 [`Bytes`] 共享，不复制底层字节。
    pub fn from_raw(identity: &IdentityFields, message: &RawMessage) -> Self {
        let mut attributes = HashMap::with_capacity(message.properties.len() + 3);
        attributes.insert(TOPIC_ATTRIBUTE.to_owned(), identity.topic.clone());
        attributes.insert(TAG_ATTRIBUTE.to_owned(), identity.tag.clone());
        if let Some(extra) = &identity.extra {
            attributes.insert(EXTRA_ATTRIBUTE.to_owned(), extra.clone());
        }
        attributes.extend(
            message
                .properties
                .iter()
                .map(|(key, value)| (key.clone(), value.clone())),
        );
        Self {
            payload: message.body.clone(),
            attributes,
        }
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn attributes(&self) -> &HashMap<String, String> {
        &self.attributes
    }

    /// 读取单个属性值。
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// 拆解为负载与属性，供下游获取所有权。
    pub fn into_parts(self) -> (Bytes, HashMap<String, String>) {
        (self.payload, self.attributes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(extra: Option<&str>) -> IdentityFields {
        IdentityFields::new("orders", "created", extra.map(str::to_owned))
    }

    #[test]
    fn identity_fields_are_injected() {
        let message = RawMessage::new(&b"payload"[..]).with_property("trace", "abc");
        let envelope = Envelope::from_raw(&identity(Some("dc-1")), &message);

        assert_eq!(envelope.attribute(TOPIC_ATTRIBUTE), Some("orders"));
        assert_eq!(envelope.attribute(TAG_ATTRIBUTE), Some("created"));
        assert_eq!(envelope.attribute(EXTRA_ATTRIBUTE), Some("dc-1"));
        assert_eq!(envelope.attribute("trace"), Some("abc"));
        assert_eq!(envelope.payload().as_ref(), b"payload");
    }

    /// 验证：消息属性与固定字段冲突时，消息属性覆盖固定字段。
    #[test]
    fn message_properties_override_identity_fields() {
        let message = RawMessage::new(&b"x"[..])
            .with_property(TOPIC_ATTRIBUTE, "rerouted")
            .with_property(EXTRA_ATTRIBUTE, "from-message");
        let envelope = Envelope::from_raw(&identity(Some("dc-1")), &message);

        assert_eq!(envelope.attribute(TOPIC_ATTRIBUTE), Some("rerouted"));
        assert_eq!(envelope.attribute(EXTRA_ATTRIBUTE), Some("from-message"));
        assert_eq!(envelope.attribute(TAG_ATTRIBUTE), Some("created"));
    }

    #[test]
    fn missing_extra_leaves_key_absent() {
        let envelope = Envelope::from_raw(&identity(None), &RawMessage::new(&b""[..]));
        assert!(envelope.attribute(EXTRA_ATTRIBUTE).is_none());
        assert_eq!(envelope.attributes().len(), 2);
    }
}
