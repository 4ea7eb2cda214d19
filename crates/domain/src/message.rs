//! 外发消息相关类型
//!
//! 发送参数保持为不透明的键值表，由业务逻辑组装，分发队列只负责按序送达。

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::value_objects::{MessageId, Recipient, Timestamp};

/// 分发优先级，声明顺序即优先顺序（越靠前越紧急）。
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum DispatchPriority {
    High,
    #[default]
    Normal,
    Low,
}

/// 发送参数（content、embed 等），对分发层不透明。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessagePayload(pub Map<String, Value>);

impl MessagePayload {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// 纯文本消息
    pub fn text(content: impl Into<String>) -> Self {
        Self::new().with("content", Value::String(content.into()))
    }

    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.0.insert(key.into(), value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn content(&self) -> Option<&str> {
        self.0.get("content").and_then(Value::as_str)
    }
}

/// 平台确认送达后返回的回执。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentMessage {
    pub message_id: MessageId,
    pub recipient: Recipient,
    pub sent_at: Timestamp,
}
