//! 跨线程调用桥
//!
//! 事件循环运行在独立线程上。任意线程（包括同步代码）都可以通过 `Bridge`
//! 把一段异步工作提交到事件循环执行，并选择同步等待结果或直接忽略。
//! 事件循环未运行时提交被拒绝：返回 `None` 并记录警告，不会报错。

use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use domain::{ChatClient, DispatchPriority, MessagePayload, Recipient, SentMessage};
use futures::future::BoxFuture;
use futures::FutureExt;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config_cache::ConfigCache;
use crate::dispatch::{CompletionHandle, DispatchError, DispatchHandle};
use crate::error::ApplicationError;

/// 跨线程调用错误
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum BridgeError {
    #[error("事件循环未运行")]
    NotRunning,
    #[error("等待事件循环结果超时")]
    Timeout,
    /// 事件循环在工作完成前退出，或工作本身 panic
    #[error("事件循环在返回结果前已停止")]
    Disconnected,
}

/// 在事件循环上执行的工作可以使用的资源
#[derive(Clone)]
pub struct LoopContext {
    dispatch: DispatchHandle,
    client: Arc<dyn ChatClient>,
    cache: Arc<ConfigCache>,
}

impl LoopContext {
    pub fn new(dispatch: DispatchHandle, client: Arc<dyn ChatClient>, cache: Arc<ConfigCache>) -> Self {
        Self {
            dispatch,
            client,
            cache,
        }
    }

    pub fn dispatch(&self) -> &DispatchHandle {
        &self.dispatch
    }

    pub fn client(&self) -> &Arc<dyn ChatClient> {
        &self.client
    }

    pub fn cache(&self) -> &Arc<ConfigCache> {
        &self.cache
    }

    /// 经分发队列发送，受统一限流约束
    pub fn send(
        &self,
        recipient: Recipient,
        payload: MessagePayload,
        priority: DispatchPriority,
    ) -> CompletionHandle {
        self.dispatch.enqueue(recipient, payload, priority)
    }
}

pub(crate) type LoopWork = Box<dyn FnOnce(LoopContext) -> BoxFuture<'static, ()> + Send>;

/// 发往事件循环的指令
pub(crate) enum LoopCommand {
    Run(LoopWork),
    Shutdown,
}

/// 提交后的结果句柄
///
/// 不能在事件循环线程上调用 `wait`，否则会阻塞循环自身。
#[derive(Debug)]
pub struct PendingResult<T> {
    receiver: std_mpsc::Receiver<T>,
}

impl<T> PendingResult<T> {
    /// 阻塞当前线程直到结果返回或超时
    pub fn wait(self, timeout: Duration) -> Result<T, BridgeError> {
        self.receiver.recv_timeout(timeout).map_err(|err| match err {
            std_mpsc::RecvTimeoutError::Timeout => BridgeError::Timeout,
            std_mpsc::RecvTimeoutError::Disconnected => BridgeError::Disconnected,
        })
    }

    /// 不关心结果
    pub fn detach(self) {}
}

/// 跨线程提交入口，可自由克隆
#[derive(Clone, Default)]
pub struct Bridge {
    sender: Arc<RwLock<Option<mpsc::UnboundedSender<LoopCommand>>>>,
}

impl Bridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// 事件循环就绪后安装指令通道
    pub(crate) fn open(&self, sender: mpsc::UnboundedSender<LoopCommand>) {
        *self.sender.write().unwrap_or_else(|e| e.into_inner()) = Some(sender);
    }

    /// 取下指令通道，之后的提交都会被拒绝
    pub(crate) fn close(&self) -> Option<mpsc::UnboundedSender<LoopCommand>> {
        self.sender.write().unwrap_or_else(|e| e.into_inner()).take()
    }

    pub fn is_open(&self) -> bool {
        self.sender
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|sender| !sender.is_closed())
    }

    /// 把工作提交到事件循环
    ///
    /// 事件循环未运行时返回 `None`。
    pub fn submit<F, Fut, T>(&self, work: F) -> Option<PendingResult<T>>
    where
        F: FnOnce(LoopContext) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (result_tx, receiver) = std_mpsc::sync_channel(1);
        let unit: LoopWork = Box::new(move |ctx: LoopContext| {
            async move {
                let output = work(ctx).await;
                // 调用方可能已经 detach 或超时离开
                let _ = result_tx.send(output);
            }
            .boxed()
        });

        if self.send_command(LoopCommand::Run(unit)) {
            Some(PendingResult { receiver })
        } else {
            None
        }
    }

    /// 提交并同步等待结果
    pub fn call<F, Fut, T>(&self, work: F, timeout: Duration) -> Result<T, BridgeError>
    where
        F: FnOnce(LoopContext) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.submit(work).ok_or(BridgeError::NotRunning)?.wait(timeout)
    }

    /// 从任意线程发送一条消息，结果为最终投递结果
    pub fn send_message(
        &self,
        recipient: Recipient,
        payload: MessagePayload,
        priority: DispatchPriority,
    ) -> Option<PendingResult<Result<SentMessage, DispatchError>>> {
        self.submit(move |ctx| async move { ctx.send(recipient, payload, priority).outcome().await })
    }

    /// 同步发送并等待投递结果
    pub fn send_and_wait(
        &self,
        recipient: Recipient,
        payload: MessagePayload,
        priority: DispatchPriority,
        timeout: Duration,
    ) -> Result<SentMessage, ApplicationError> {
        let pending = self
            .send_message(recipient, payload, priority)
            .ok_or(BridgeError::NotRunning)?;
        Ok(pending.wait(timeout)??)
    }

    /// 发出即忘的通知，返回是否已提交
    pub fn notify(&self, recipient: Recipient, payload: MessagePayload, priority: DispatchPriority) -> bool {
        self.send_message(recipient, payload, priority)
            .map(PendingResult::detach)
            .is_some()
    }

    /// 分发队列中尚未完成的请求数
    pub fn pending_dispatches(&self, timeout: Duration) -> Result<usize, BridgeError> {
        self.call(|ctx| async move { ctx.dispatch().pending() }, timeout)
    }

    fn send_command(&self, command: LoopCommand) -> bool {
        let guard = self.sender.read().unwrap_or_else(|e| e.into_inner());
        match guard.as_ref() {
            Some(sender) => {
                if sender.send(command).is_ok() {
                    true
                } else {
                    debug!("事件循环正在退出，提交被丢弃");
                    false
                }
            }
            None => {
                warn!("事件循环未运行，忽略跨线程提交");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{self, DispatchSettings};
    use crate::test_support::{RecordingClient, StaticSource};
    use domain::UserId;
    use std::sync::atomic::AtomicU64;
    use std::thread;

    const WAIT: Duration = Duration::from_secs(5);

    /// 在独立线程上跑一个最小事件循环，返回桥与线程句柄
    fn spawn_loop(client: Arc<RecordingClient>) -> (Bridge, thread::JoinHandle<()>) {
        let bridge = Bridge::new();
        let (tx, mut commands) = mpsc::unbounded_channel();
        bridge.open(tx);

        let handle = thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("runtime");
            runtime.block_on(async move {
                let (handle, worker) = dispatch::channel(
                    client as Arc<dyn ChatClient>,
                    &DispatchSettings::default(),
                    Arc::new(AtomicU64::new(0)),
                );
                let ctx = LoopContext::new(
                    handle,
                    Arc::new(RecordingClient::default()),
                    Arc::new(ConfigCache::new(Arc::new(StaticSource::default()), Duration::from_secs(60))),
                );
                tokio::spawn(worker.run());
                while let Some(command) = commands.recv().await {
                    match command {
                        LoopCommand::Run(unit) => {
                            tokio::spawn(unit(ctx.clone()));
                        }
                        LoopCommand::Shutdown => break,
                    }
                }
            });
        });

        (bridge, handle)
    }

    fn stop_loop(bridge: &Bridge, handle: thread::JoinHandle<()>) {
        if let Some(sender) = bridge.close() {
            let _ = sender.send(LoopCommand::Shutdown);
        }
        handle.join().expect("loop thread");
    }

    #[test]
    fn submit_without_loop_is_rejected() {
        let bridge = Bridge::new();
        assert!(!bridge.is_open());
        assert!(bridge.submit(|_| async { 1 }).is_none());
        assert!(!bridge.notify(
            Recipient::User(UserId::new(1)),
            MessagePayload::text("hi"),
            DispatchPriority::Normal
        ));
        assert_eq!(bridge.call(|_| async { 1 }, WAIT), Err(BridgeError::NotRunning));
    }

    #[test]
    fn foreign_thread_gets_result_from_loop() {
        let (bridge, handle) = spawn_loop(Arc::new(RecordingClient::default()));

        let result = bridge
            .submit(|_| async { 40 + 2 })
            .expect("loop is running")
            .wait(WAIT);
        assert_eq!(result, Ok(42));

        stop_loop(&bridge, handle);
        assert!(bridge.submit(|_| async { 0 }).is_none());
    }

    #[test]
    fn send_message_goes_through_dispatch_queue() {
        let client = Arc::new(RecordingClient::default());
        let (bridge, handle) = spawn_loop(Arc::clone(&client));

        let sent = bridge
            .send_message(
                Recipient::User(UserId::new(7)),
                MessagePayload::text("hello"),
                DispatchPriority::Normal,
            )
            .expect("loop is running")
            .wait(WAIT)
            .expect("bridge result")
            .expect("delivered");

        assert_eq!(sent.recipient, Recipient::User(UserId::new(7)));
        assert_eq!(client.attempted(), vec!["hello"]);
        assert_eq!(bridge.pending_dispatches(WAIT), Ok(0));

        stop_loop(&bridge, handle);
    }

    #[test]
    fn send_and_wait_surfaces_permanent_failures() {
        let client = Arc::new(RecordingClient::default());
        client.fail_next("closed dm", domain::ProviderError::forbidden("dm closed"));
        let (bridge, handle) = spawn_loop(Arc::clone(&client));

        let err = bridge
            .send_and_wait(
                Recipient::User(UserId::new(9)),
                MessagePayload::text("closed dm"),
                DispatchPriority::Normal,
                WAIT,
            )
            .expect_err("delivery is rejected");
        assert!(err.is_permanent_delivery_failure());

        stop_loop(&bridge, handle);
        assert!(matches!(
            bridge.send_and_wait(
                Recipient::User(UserId::new(9)),
                MessagePayload::text("late"),
                DispatchPriority::Normal,
                WAIT,
            ),
            Err(ApplicationError::Bridge(BridgeError::NotRunning))
        ));
    }

    #[test]
    fn wait_times_out_on_slow_work() {
        let (bridge, handle) = spawn_loop(Arc::new(RecordingClient::default()));

        let pending = bridge
            .submit(|_| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
            })
            .expect("loop is running");
        assert_eq!(pending.wait(Duration::from_millis(50)), Err(BridgeError::Timeout));

        stop_loop(&bridge, handle);
    }

    #[test]
    fn panicking_work_reports_disconnected() {
        let (bridge, handle) = spawn_loop(Arc::new(RecordingClient::default()));

        let pending = bridge
            .submit(|_| async {
                panic!("unit of work failed");
            })
            .expect("loop is running");
        let result: Result<(), BridgeError> = pending.wait(WAIT);
        assert_eq!(result, Err(BridgeError::Disconnected));

        // 循环本身不受影响
        assert_eq!(bridge.call(|_| async { "alive" }, WAIT), Ok("alive"));
        stop_loop(&bridge, handle);
    }
}
