//! 单元测试共用的假实现

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use domain::{
    Author, ChannelId, ChatClient, ChatConnection, ChatConnector, ConfigKey, ConfigSource,
    ConfigValue, Credentials, InboundEvent, IncomingMessage, LookupResult, MessageId,
    MessagePayload, ProviderError, Recipient, SentMessage, UserId,
};
use tokio::sync::mpsc;
use tokio::time::Instant;

/// 记录每次发送/删除的客户端，可按消息内容预设失败
#[derive(Default)]
pub(crate) struct RecordingClient {
    attempts: Mutex<Vec<(Recipient, String, Instant)>>,
    deletions: Mutex<Vec<(ChannelId, MessageId, Instant)>>,
    script: Mutex<HashMap<String, VecDeque<ProviderError>>>,
    next_id: AtomicU64,
    closed: AtomicUsize,
}

impl RecordingClient {
    pub(crate) fn fail_next(&self, content: &str, error: ProviderError) {
        self.script
            .lock()
            .unwrap()
            .entry(content.to_string())
            .or_default()
            .push_back(error);
    }

    /// 按尝试顺序返回消息内容
    pub(crate) fn attempted(&self) -> Vec<String> {
        self.attempts
            .lock()
            .unwrap()
            .iter()
            .map(|(_, content, _)| content.clone())
            .collect()
    }

    pub(crate) fn attempted_recipients(&self) -> Vec<Recipient> {
        self.attempts
            .lock()
            .unwrap()
            .iter()
            .map(|(recipient, _, _)| *recipient)
            .collect()
    }

    pub(crate) fn attempt_times(&self) -> Vec<Instant> {
        self.attempts
            .lock()
            .unwrap()
            .iter()
            .map(|(_, _, at)| *at)
            .collect()
    }

    pub(crate) fn deletions(&self) -> Vec<(ChannelId, MessageId, Instant)> {
        self.deletions.lock().unwrap().clone()
    }

    pub(crate) fn close_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatClient for RecordingClient {
    async fn send(
        &self,
        recipient: &Recipient,
        payload: &MessagePayload,
    ) -> Result<SentMessage, ProviderError> {
        let content = payload.content().unwrap_or_default().to_string();
        if content == "panic" {
            panic!("client exploded");
        }
        self.attempts
            .lock()
            .unwrap()
            .push((*recipient, content.clone(), Instant::now()));

        if let Some(error) = self
            .script
            .lock()
            .unwrap()
            .get_mut(&content)
            .and_then(VecDeque::pop_front)
        {
            return Err(error);
        }

        Ok(SentMessage {
            message_id: MessageId::new(self.next_id.fetch_add(1, Ordering::SeqCst) + 1),
            recipient: *recipient,
            sent_at: Utc::now(),
        })
    }

    async fn delete_message(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
    ) -> Result<(), ProviderError> {
        self.deletions
            .lock()
            .unwrap()
            .push((channel_id, message_id, Instant::now()));
        Ok(())
    }

    async fn close(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// 返回固定表格的配置来源
#[derive(Default)]
pub(crate) struct StaticSource {
    values: Mutex<HashMap<ConfigKey, ConfigValue>>,
}

impl StaticSource {
    pub(crate) fn with(self, key: ConfigKey, value: ConfigValue) -> Self {
        self.values.lock().unwrap().insert(key, value);
        self
    }
}

#[async_trait]
impl ConfigSource for StaticSource {
    async fn lookup(&self, key: &ConfigKey) -> LookupResult<ConfigValue> {
        Ok(self
            .values
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .unwrap_or_else(|| key.category().failure_default()))
    }
}

/// 计数连接次数的连接器，入站事件通过 `inject` 注入
#[derive(Default)]
pub(crate) struct FakeConnector {
    pub(crate) client: Arc<RecordingClient>,
    connects: AtomicUsize,
    failures_left: AtomicUsize,
    events: Mutex<Option<mpsc::UnboundedSender<InboundEvent>>>,
}

impl FakeConnector {
    pub(crate) fn failing_first(attempts: usize) -> Self {
        let connector = Self::default();
        connector.failures_left.store(attempts, Ordering::SeqCst);
        connector
    }

    pub(crate) fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub(crate) fn inject(&self, event: InboundEvent) -> bool {
        match self.events.lock().unwrap().as_ref() {
            Some(sender) => sender.send(event).is_ok(),
            None => false,
        }
    }

    /// 模拟平台端断开
    pub(crate) fn drop_connection(&self) {
        self.events.lock().unwrap().take();
    }
}

#[async_trait]
impl ChatConnector for FakeConnector {
    async fn connect(&self, _credentials: &Credentials) -> Result<ChatConnection, ProviderError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures_left.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_left.store(remaining - 1, Ordering::SeqCst);
            return Err(ProviderError::connection("gateway unavailable"));
        }

        let (sender, events) = mpsc::unbounded_channel();
        *self.events.lock().unwrap() = Some(sender);
        Ok(ChatConnection {
            client: Arc::clone(&self.client) as Arc<dyn ChatClient>,
            events,
        })
    }
}

pub(crate) fn incoming(
    message_id: u64,
    channel_id: u64,
    author_id: u64,
    content: &str,
) -> IncomingMessage {
    IncomingMessage {
        id: MessageId::new(message_id),
        channel_id: ChannelId::new(channel_id),
        author: Author {
            id: UserId::new(author_id),
            name: format!("user-{author_id}"),
            is_bot: false,
            is_admin: false,
        },
        content: content.to_string(),
        received_at: Utc::now(),
    }
}
