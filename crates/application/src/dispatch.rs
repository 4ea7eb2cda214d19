//! 外发消息分发队列
//!
//! 所有外发消息经同一个消费者串行发送，保证令牌桶限流有效，
//! 并按 (优先级, 序号) 的顺序送达。入队永不阻塞，也不会失败。
//!
//! 优先级堆只属于消费者任务：`DispatchHandle` 通过无界通道提交请求，
//! 消费者每次取出前先把已提交的请求全部收进堆里。

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use config::DispatchConfig;
use domain::{ChatClient, DispatchPriority, MessagePayload, ProviderError, Recipient, SentMessage};
use futures::FutureExt;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::rate_limiter::TokenBucket;

/// 分发结果错误
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DispatchError {
    /// 平台永久拒绝（目标不存在、拒收等），不会重试
    #[error("投递失败: {0}")]
    Delivery(#[from] ProviderError),
    /// 队列在请求完成前被停止
    #[error("分发已取消：队列已停止")]
    Cancelled,
    /// 发送过程中发生 panic
    #[error("分发内部错误: {0}")]
    Internal(String),
}

type Completion = oneshot::Sender<Result<SentMessage, DispatchError>>;

/// 队列中的一条发送请求
pub struct DispatchRequest {
    pub recipient: Recipient,
    pub payload: MessagePayload,
    pub priority: DispatchPriority,
    /// 入队时分配，进程内单调递增且不复用
    pub sequence: u64,
    completion: Completion,
}

impl DispatchRequest {
    fn key(&self) -> (DispatchPriority, u64) {
        (self.priority, self.sequence)
    }
}

impl PartialEq for DispatchRequest {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for DispatchRequest {}

impl PartialOrd for DispatchRequest {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for DispatchRequest {
    // BinaryHeap 是大顶堆，反转后堆顶为最小的 (priority, sequence)
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other.key().cmp(&self.key())
    }
}

/// 调用方持有的完成句柄
#[derive(Debug)]
pub struct CompletionHandle {
    sequence: u64,
    receiver: oneshot::Receiver<Result<SentMessage, DispatchError>>,
}

impl CompletionHandle {
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// 等待发送结果
    ///
    /// 队列停止时尚未完成的请求返回 `DispatchError::Cancelled`。
    pub async fn outcome(self) -> Result<SentMessage, DispatchError> {
        match self.receiver.await {
            Ok(result) => result,
            Err(_) => Err(DispatchError::Cancelled),
        }
    }
}

/// 队列参数
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub rate_limit: u32,
    pub rate_period: Duration,
    pub default_retry_after: Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self::from(&DispatchConfig::default())
    }
}

impl From<&DispatchConfig> for DispatchSettings {
    fn from(config: &DispatchConfig) -> Self {
        Self {
            rate_limit: config.rate_limit,
            rate_period: config.rate_period(),
            default_retry_after: config.default_retry_after(),
        }
    }
}

/// 入队端
#[derive(Clone)]
pub struct DispatchHandle {
    sender: mpsc::UnboundedSender<DispatchRequest>,
    sequence: Arc<AtomicU64>,
    pending: Arc<AtomicUsize>,
}

impl DispatchHandle {
    /// 把发送请求放入队列，立即返回完成句柄
    pub fn enqueue(
        &self,
        recipient: Recipient,
        payload: MessagePayload,
        priority: DispatchPriority,
    ) -> CompletionHandle {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let (completion, receiver) = oneshot::channel();
        let request = DispatchRequest {
            recipient,
            payload,
            priority,
            sequence,
            completion,
        };

        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.sender.send(request).is_err() {
            // 消费者已退出，请求连同 completion 一起丢弃，等待方得到 Cancelled
            self.pending.fetch_sub(1, Ordering::SeqCst);
            debug!(sequence, %recipient, "分发队列已关闭，请求被丢弃");
        }

        CompletionHandle { sequence, receiver }
    }

    pub fn enqueue_normal(&self, recipient: Recipient, payload: MessagePayload) -> CompletionHandle {
        self.enqueue(recipient, payload, DispatchPriority::Normal)
    }

    /// 尚未完成的请求数
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// 唯一的消费者
pub struct DispatchWorker {
    incoming: mpsc::UnboundedReceiver<DispatchRequest>,
    heap: BinaryHeap<DispatchRequest>,
    limiter: TokenBucket,
    client: Arc<dyn ChatClient>,
    pending: Arc<AtomicUsize>,
    default_retry_after: Duration,
}

/// 创建一对入队端与消费者
///
/// `sequence` 由调用方持有并跨会话共享，保证序号在进程生命周期内不复用。
pub fn channel(
    client: Arc<dyn ChatClient>,
    settings: &DispatchSettings,
    sequence: Arc<AtomicU64>,
) -> (DispatchHandle, DispatchWorker) {
    let (sender, incoming) = mpsc::unbounded_channel();
    let pending = Arc::new(AtomicUsize::new(0));

    let handle = DispatchHandle {
        sender,
        sequence,
        pending: Arc::clone(&pending),
    };
    let worker = DispatchWorker {
        incoming,
        heap: BinaryHeap::new(),
        limiter: TokenBucket::new(settings.rate_limit, settings.rate_period),
        client,
        pending,
        default_retry_after: settings.default_retry_after,
    };

    (handle, worker)
}

impl DispatchWorker {
    /// 消费循环，直到所有入队端都被释放
    ///
    /// 每次只有一条请求在发送中。
    pub async fn run(mut self) {
        info!("分发队列消费者已启动");

        loop {
            self.absorb_submitted();

            let request = match self.heap.pop() {
                Some(request) => request,
                None => match self.incoming.recv().await {
                    Some(request) => {
                        self.heap.push(request);
                        continue;
                    }
                    None => break,
                },
            };

            self.limiter.acquire().await;
            self.deliver(request).await;
        }

        info!("分发队列消费者已退出");
    }

    /// 把通道中已提交的请求全部移入堆
    fn absorb_submitted(&mut self) {
        while let Ok(request) = self.incoming.try_recv() {
            self.heap.push(request);
        }
    }

    async fn deliver(&mut self, request: DispatchRequest) {
        let attempt = AssertUnwindSafe(self.client.send(&request.recipient, &request.payload))
            .catch_unwind()
            .await;

        match attempt {
            Ok(Ok(sent)) => {
                debug!(
                    sequence = request.sequence,
                    recipient = %request.recipient,
                    message_id = %sent.message_id,
                    "消息已发送"
                );
                self.complete(request, Ok(sent));
            }
            Ok(Err(err)) if err.is_throttled() => {
                let delay = err.retry_after().unwrap_or(self.default_retry_after);
                warn!(
                    sequence = request.sequence,
                    recipient = %request.recipient,
                    retry_after_ms = delay.as_millis() as u64,
                    "发送被平台限流，等待后重新入队"
                );
                tokio::time::sleep(delay).await;
                // 原请求重新入堆，保留原优先级与序号
                self.heap.push(request);
            }
            Ok(Err(err)) => {
                error!(
                    sequence = request.sequence,
                    recipient = %request.recipient,
                    error = %err,
                    "发送消息失败"
                );
                self.complete(request, Err(DispatchError::Delivery(err)));
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(
                    sequence = request.sequence,
                    recipient = %request.recipient,
                    panic = %message,
                    "发送消息时发生 panic"
                );
                self.complete(request, Err(DispatchError::Internal(message)));
            }
        }
    }

    fn complete(&self, request: DispatchRequest, result: Result<SentMessage, DispatchError>) {
        self.pending.fetch_sub(1, Ordering::SeqCst);
        // 调用方可能已经不关心结果
        let _ = request.completion.send(result);
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
