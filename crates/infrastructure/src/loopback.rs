//! 进程内的回环聊天平台
//!
//! 实现 `ChatConnector` / `ChatClient`，不走任何网络协议：
//! 发出的消息和删除操作记录在内存里，入站事件由 `inject` 注入。
//! 用于二进制的演练模式和集成测试，也可以预设限流、拒收和连接失败。

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use domain::{
    Author, ChannelId, ChatClient, ChatConnection, ChatConnector, Credentials, InboundEvent,
    IncomingMessage, MessageId, MessagePayload, ProviderError, Recipient, SentMessage, UserId,
};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// 平台上的一条已发送消息
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveredMessage {
    pub message_id: MessageId,
    pub recipient: Recipient,
    pub payload: MessagePayload,
}

#[derive(Debug, Default)]
struct Script {
    connect_failures: usize,
    throttles: VecDeque<Option<Duration>>,
    unreachable: HashSet<UserId>,
}

#[derive(Debug)]
struct PlatformState {
    bot_user: UserId,
    connects: AtomicUsize,
    next_message_id: AtomicU64,
    delivered: Mutex<Vec<DeliveredMessage>>,
    deleted: Mutex<Vec<(ChannelId, MessageId)>>,
    script: Mutex<Script>,
    events: Mutex<Option<mpsc::UnboundedSender<InboundEvent>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// 回环平台，可克隆，克隆体共享同一份状态
#[derive(Debug, Clone)]
pub struct LoopbackPlatform {
    state: Arc<PlatformState>,
}

impl Default for LoopbackPlatform {
    fn default() -> Self {
        Self::new(UserId::new(1))
    }
}

impl LoopbackPlatform {
    pub fn new(bot_user: UserId) -> Self {
        Self {
            state: Arc::new(PlatformState {
                bot_user,
                connects: AtomicUsize::new(0),
                next_message_id: AtomicU64::new(1000),
                delivered: Mutex::new(Vec::new()),
                deleted: Mutex::new(Vec::new()),
                script: Mutex::new(Script::default()),
                events: Mutex::new(None),
            }),
        }
    }

    pub fn connect_count(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.state.events)
            .as_ref()
            .is_some_and(|sender| !sender.is_closed())
    }

    /// 接下来 `attempts` 次连接以可恢复的连接错误失败
    pub fn fail_next_connects(&self, attempts: usize) {
        lock(&self.state.script).connect_failures = attempts;
    }

    /// 下一次发送被限流
    pub fn throttle_next_send(&self, retry_after: Option<Duration>) {
        lock(&self.state.script).throttles.push_back(retry_after);
    }

    /// 该用户拒收私信
    pub fn mark_unreachable(&self, user: UserId) {
        lock(&self.state.script).unreachable.insert(user);
    }

    /// 注入入站事件，未连接时返回 false
    pub fn inject(&self, event: InboundEvent) -> bool {
        match lock(&self.state.events).as_ref() {
            Some(sender) => sender.send(event).is_ok(),
            None => false,
        }
    }

    /// 以普通用户身份在频道发一条消息，返回其消息 ID
    pub fn post(&self, channel_id: ChannelId, author: Author, content: &str) -> Option<MessageId> {
        let id = MessageId::new(self.state.next_message_id.fetch_add(1, Ordering::SeqCst));
        let message = IncomingMessage {
            id,
            channel_id,
            author,
            content: content.to_string(),
            received_at: Utc::now(),
        };
        self.inject(InboundEvent::Message(message)).then_some(id)
    }

    /// 平台端断开连接，事件流随之结束
    pub fn disconnect(&self) {
        if lock(&self.state.events).take().is_some() {
            info!("回环平台已断开连接");
        }
    }

    pub fn delivered(&self) -> Vec<DeliveredMessage> {
        lock(&self.state.delivered).clone()
    }

    /// 已发送消息的文本内容，按发送顺序
    pub fn delivered_contents(&self) -> Vec<String> {
        lock(&self.state.delivered)
            .iter()
            .filter_map(|message| message.payload.content().map(str::to_string))
            .collect()
    }

    pub fn deleted(&self) -> Vec<(ChannelId, MessageId)> {
        lock(&self.state.deleted).clone()
    }
}

#[async_trait]
impl ChatConnector for LoopbackPlatform {
    async fn connect(&self, credentials: &Credentials) -> Result<ChatConnection, ProviderError> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        if credentials.is_empty() {
            return Err(ProviderError::Unauthorized {
                message: "token 为空".to_string(),
            });
        }

        {
            let mut script = lock(&self.state.script);
            if script.connect_failures > 0 {
                script.connect_failures -= 1;
                return Err(ProviderError::connection("回环平台拒绝连接"));
            }
        }

        let (sender, events) = mpsc::unbounded_channel();
        // 就绪事件先于任何消息
        let _ = sender.send(InboundEvent::Ready {
            bot_user: self.state.bot_user,
        });
        *lock(&self.state.events) = Some(sender);
        info!(bot_user = %self.state.bot_user, "回环平台已连接");

        Ok(ChatConnection {
            client: Arc::new(LoopbackClient {
                state: Arc::clone(&self.state),
            }),
            events,
        })
    }
}

struct LoopbackClient {
    state: Arc<PlatformState>,
}

#[async_trait]
impl ChatClient for LoopbackClient {
    async fn send(
        &self,
        recipient: &Recipient,
        payload: &MessagePayload,
    ) -> Result<SentMessage, ProviderError> {
        {
            let mut script = lock(&self.state.script);
            if let Some(retry_after) = script.throttles.pop_front() {
                return Err(ProviderError::Throttled { retry_after });
            }
            if let Recipient::User(user) = recipient {
                if script.unreachable.contains(user) {
                    return Err(ProviderError::forbidden(format!("用户 {user} 不接受私信")));
                }
            }
        }

        let message_id = MessageId::new(self.state.next_message_id.fetch_add(1, Ordering::SeqCst));
        lock(&self.state.delivered).push(DeliveredMessage {
            message_id,
            recipient: *recipient,
            payload: payload.clone(),
        });
        debug!(%recipient, %message_id, "回环平台收到消息");

        Ok(SentMessage {
            message_id,
            recipient: *recipient,
            sent_at: Utc::now(),
        })
    }

    async fn delete_message(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
    ) -> Result<(), ProviderError> {
        lock(&self.state.deleted).push((channel_id, message_id));
        Ok(())
    }

    async fn close(&self) {
        lock(&self.state.events).take();
        info!("回环平台客户端已关闭");
    }
}
