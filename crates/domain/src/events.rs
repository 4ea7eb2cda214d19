//! 聊天平台推送的入站事件

use serde::{Deserialize, Serialize};

use crate::value_objects::{ChannelId, MessageId, Timestamp, UserId};

/// 消息作者
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub id: UserId,
    pub name: String,
    pub is_bot: bool,
    /// 在所属服务器内拥有管理员权限
    pub is_admin: bool,
}

/// 频道中收到的一条消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub id: MessageId,
    pub channel_id: ChannelId,
    pub author: Author,
    pub content: String,
    pub received_at: Timestamp,
}

/// 入站事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    /// 连接就绪
    Ready { bot_user: UserId },
    /// 新消息
    Message(IncomingMessage),
}

impl InboundEvent {
    pub fn as_message(&self) -> Option<&IncomingMessage> {
        match self {
            InboundEvent::Message(message) => Some(message),
            InboundEvent::Ready { .. } => None,
        }
    }
}
