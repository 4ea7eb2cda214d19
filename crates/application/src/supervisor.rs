//! 机器人生命周期管理
//!
//! 进程内只应存在一个 `Supervisor`。它在专用线程上运行单线程 tokio 运行时，
//! 该运行时承载平台连接、分发队列消费者、事件处理器以及经 `Bridge` 提交的工作。
//!
//! 状态转换：Stopped → Starting → Running → Stopping → Stopped。
//! 连接失败或平台断开时会话直接结束并回到 Stopped。

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use config::AppConfig;
use domain::{
    ChatConnection, ChatConnector, Credentials, InboundEvent, LifecycleState, ProviderError,
};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::bridge::{Bridge, LoopCommand, LoopContext};
use crate::config_cache::ConfigCache;
use crate::dispatch::{self, panic_message, DispatchSettings};
use crate::handlers::HandlerRegistry;
use crate::retry::{retry_async, RetryConfig};

/// 事件循环线程名
pub const LOOP_THREAD_NAME: &str = "botlink-loop";

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("未设置机器人 token")]
    MissingToken,
    #[error("无法创建事件循环线程: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("上一个会话尚未退出（当前状态 {0}）")]
    SessionStillActive(LifecycleState),
}

#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub dispatch: DispatchSettings,
    /// 只对可恢复的连接错误重试
    pub connect_retry: RetryConfig,
    /// `stop` 等待事件循环线程退出的上限
    pub shutdown_timeout: Duration,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for SupervisorSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            dispatch: DispatchSettings::from(&config.dispatch),
            connect_retry: RetryConfig::new(
                config.supervisor.connect_attempts,
                Duration::from_millis(config.supervisor.connect_backoff_ms),
            ),
            shutdown_timeout: Duration::from_secs(config.supervisor.shutdown_timeout_secs),
        }
    }
}

struct Inner {
    state: AtomicU8,
    connector: Arc<dyn ChatConnector>,
    cache: Arc<ConfigCache>,
    handlers: RwLock<HandlerRegistry>,
    settings: SupervisorSettings,
    /// 跨会话共享，重启后序号继续递增
    sequence: Arc<AtomicU64>,
    bridge: Bridge,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
    fn current_state(&self) -> LifecycleState {
        LifecycleState::from(self.state.load(Ordering::SeqCst))
    }

    fn transition(&self, from: LifecycleState, to: LifecycleState) -> Result<(), LifecycleState> {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| info!(from = %from, to = %to, "生命周期状态变更"))
            .map_err(LifecycleState::from)
    }

    fn force_state(&self, to: LifecycleState) {
        let from = LifecycleState::from(self.state.swap(to as u8, Ordering::SeqCst));
        if from != to {
            info!(from = %from, to = %to, "生命周期状态变更");
        }
    }

    fn worker_slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.worker.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn handlers_snapshot(&self) -> HandlerRegistry {
        self.handlers.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

/// 生命周期管理器，可克隆，克隆体共享同一个事件循环
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl Supervisor {
    pub fn new(
        connector: Arc<dyn ChatConnector>,
        cache: Arc<ConfigCache>,
        settings: SupervisorSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: AtomicU8::new(LifecycleState::Stopped as u8),
                connector,
                cache,
                handlers: RwLock::new(HandlerRegistry::new()),
                settings,
                sequence: Arc::new(AtomicU64::new(0)),
                bridge: Bridge::new(),
                worker: Mutex::new(None),
            }),
        }
    }

    /// 替换事件处理器，下次启动时生效
    pub fn set_handlers(&self, registry: HandlerRegistry) {
        *self.inner.handlers.write().unwrap_or_else(|e| e.into_inner()) = registry;
    }

    pub fn status(&self) -> LifecycleState {
        self.inner.current_state()
    }

    pub fn is_running(&self) -> bool {
        self.status().is_running()
    }

    pub fn bridge(&self) -> Bridge {
        self.inner.bridge.clone()
    }

    pub fn cache(&self) -> &Arc<ConfigCache> {
        &self.inner.cache
    }

    /// 启动事件循环线程并建立连接
    ///
    /// 非 Stopped 状态下调用是空操作。连接在后台线程上建立，
    /// 可用 `wait_for(LifecycleState::Running, ..)` 等待就绪。
    pub fn start(&self, credentials: Credentials) -> Result<(), SupervisorError> {
        if credentials.is_empty() {
            warn!("未设置机器人 token，跳过启动");
            return Err(SupervisorError::MissingToken);
        }

        let mut slot = self.inner.worker_slot();
        if let Err(current) = self
            .inner
            .transition(LifecycleState::Stopped, LifecycleState::Starting)
        {
            match current {
                LifecycleState::Stopping => warn!("机器人正在停止，忽略启动请求"),
                _ => warn!(state = %current, "机器人已在运行，忽略启动请求"),
            }
            return Ok(());
        }

        // 上一个会话的线程可能刚把状态置为 Stopped，还没完全退出
        if let Some(previous) = slot.take() {
            if previous.thread().id() != thread::current().id() {
                let _ = previous.join();
            }
        }

        info!("正在启动机器人");
        let inner = Arc::clone(&self.inner);
        let spawned = thread::Builder::new()
            .name(LOOP_THREAD_NAME.to_string())
            .spawn(move || run_loop_thread(inner, credentials));

        match spawned {
            Ok(handle) => {
                *slot = Some(handle);
                Ok(())
            }
            Err(err) => {
                error!(error = %err, "无法创建事件循环线程");
                self.inner.force_state(LifecycleState::Stopped);
                Err(SupervisorError::Spawn(err))
            }
        }
    }

    /// 请求事件循环关闭连接与分发队列，并等待线程退出
    ///
    /// 只在 Running 状态下生效。在事件循环线程上调用时不等待，直接返回。
    pub fn stop(&self) {
        if let Err(current) = self
            .inner
            .transition(LifecycleState::Running, LifecycleState::Stopping)
        {
            debug!(state = %current, "机器人未在运行，忽略停止请求");
            return;
        }

        info!("正在停止机器人");
        if let Some(sender) = self.inner.bridge.close() {
            let _ = sender.send(LoopCommand::Shutdown);
        }

        let handle = {
            let mut slot = self.inner.worker_slot();
            match slot.take() {
                Some(handle) if handle.thread().id() == thread::current().id() => {
                    *slot = Some(handle);
                    debug!("在事件循环线程上请求停止，不等待线程退出");
                    return;
                }
                other => other,
            }
        };

        if let Some(handle) = handle {
            self.join_loop_thread(handle);
        }
    }

    /// 停止后重新启动
    ///
    /// 旧会话在 `shutdown_timeout` 内没有退出时返回 `SessionStillActive`，不会启动新会话。
    pub fn restart(&self, credentials: Credentials) -> Result<(), SupervisorError> {
        info!("正在重启机器人");
        self.stop();
        match self.status() {
            LifecycleState::Stopped => self.start(credentials),
            state => {
                warn!(state = %state, "上一个会话尚未退出，放弃重启");
                Err(SupervisorError::SessionStillActive(state))
            }
        }
    }

    /// 阻塞等待进入指定状态
    pub fn wait_for(&self, state: LifecycleState, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.status() == state {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(5));
        }
    }

    fn join_loop_thread(&self, handle: JoinHandle<()>) {
        let deadline = Instant::now() + self.inner.settings.shutdown_timeout;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                warn!(
                    timeout_secs = self.inner.settings.shutdown_timeout.as_secs(),
                    "等待事件循环线程退出超时"
                );
                // 留给下次启动时回收
                *self.inner.worker_slot() = Some(handle);
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }

        if handle.join().is_err() {
            error!("事件循环线程异常退出");
        }
    }
}

fn run_loop_thread(inner: Arc<Inner>, credentials: Credentials) {
    match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => {
            let session = std::panic::catch_unwind(AssertUnwindSafe(|| {
                runtime.block_on(run_session(Arc::clone(&inner), credentials))
            }));
            if let Err(panic) = session {
                error!(panic = %panic_message(panic.as_ref()), "事件循环异常退出");
            }
            // 运行时销毁时未完成的任务一并取消
            drop(runtime);
        }
        Err(err) => {
            error!(error = %err, "无法创建事件循环运行时");
        }
    }

    inner.bridge.close();
    inner.force_state(LifecycleState::Stopped);
    info!("机器人已停止");
}

async fn connect(inner: &Inner, credentials: &Credentials) -> Result<ChatConnection, ProviderError> {
    let connector = Arc::clone(&inner.connector);
    retry_async(
        &inner.settings.connect_retry,
        |attempt| {
            let connector = Arc::clone(&connector);
            let credentials = credentials.clone();
            async move {
                debug!(attempt, "正在连接聊天平台");
                connector.connect(&credentials).await
            }
        },
        ProviderError::is_transient_connection,
    )
    .await
}

async fn run_session(inner: Arc<Inner>, credentials: Credentials) {
    let ChatConnection { client, mut events } = match connect(&inner, &credentials).await {
        Ok(connection) => connection,
        Err(err) => {
            error!(error = %err, "连接聊天平台失败");
            return;
        }
    };

    let (dispatch, worker) = dispatch::channel(
        Arc::clone(&client),
        &inner.settings.dispatch,
        Arc::clone(&inner.sequence),
    );
    let consumer = tokio::spawn(worker.run());
    let context = LoopContext::new(dispatch, Arc::clone(&client), Arc::clone(&inner.cache));

    let registry = Arc::new(inner.handlers_snapshot());
    for name in registry.names() {
        info!(handler = name, "已注册事件处理器");
    }

    let (command_tx, mut commands) = mpsc::unbounded_channel();
    inner.bridge.open(command_tx);
    if let Err(current) = inner.transition(LifecycleState::Starting, LifecycleState::Running) {
        warn!(state = %current, "启动过程中状态被修改，结束会话");
    } else {
        info!("机器人已上线");
        loop {
            tokio::select! {
                biased;
                command = commands.recv() => match command {
                    Some(LoopCommand::Run(work)) => {
                        tokio::spawn(work(context.clone()));
                    }
                    Some(LoopCommand::Shutdown) | None => {
                        info!("收到停止请求");
                        break;
                    }
                },
                event = events.recv() => match event {
                    Some(event) => {
                        if let InboundEvent::Ready { bot_user } = &event {
                            info!(%bot_user, "聊天平台连接就绪");
                        }
                        let registry = Arc::clone(&registry);
                        let ctx = context.clone();
                        tokio::spawn(async move { registry.dispatch(&event, &ctx).await });
                    }
                    None => {
                        warn!("聊天平台连接已断开");
                        break;
                    }
                },
            }
        }
    }

    inner.bridge.close();
    consumer.abort();
    client.close().await;
}
