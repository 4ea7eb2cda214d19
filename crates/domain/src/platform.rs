//! 聊天平台客户端抽象
//!
//! 底层协议由具体适配器实现。分发逻辑只依赖 `send` 的三种结果：
//! 成功、限流（`ProviderError::Throttled`）、永久失败（其余错误）。

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::errors::ProviderError;
use crate::events::InboundEvent;
use crate::message::{MessagePayload, SentMessage};
use crate::value_objects::{ChannelId, Credentials, MessageId, Recipient};

/// 已建立连接上的操作
#[cfg_attr(feature = "testing", mockall::automock)]
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// 发送一条消息
    async fn send(
        &self,
        recipient: &Recipient,
        payload: &MessagePayload,
    ) -> Result<SentMessage, ProviderError>;

    /// 删除频道中的消息
    async fn delete_message(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
    ) -> Result<(), ProviderError>;

    /// 关闭连接
    async fn close(&self);
}

/// 一次成功建立的连接：客户端 + 入站事件流
///
/// 事件流结束表示平台端已断开。
pub struct ChatConnection {
    pub client: Arc<dyn ChatClient>,
    pub events: mpsc::UnboundedReceiver<InboundEvent>,
}

/// 负责建立连接
#[async_trait]
pub trait ChatConnector: Send + Sync {
    async fn connect(&self, credentials: &Credentials) -> Result<ChatConnection, ProviderError>;
}
