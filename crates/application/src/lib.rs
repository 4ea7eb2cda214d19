//! 应用层实现。
//!
//! 这里提供围绕领域模型的运行时组件：限流的外发消息队列、
//! 带过期与主动失效的配置缓存、跨线程调用桥、事件处理器，
//! 以及管理整个事件循环生命周期的 `Supervisor`。

pub mod bridge;
pub mod clock;
pub mod config_cache;
pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod notifications;
pub mod rate_limiter;
pub mod retry;
pub mod supervisor;

#[cfg(test)]
pub(crate) mod test_support;

pub use bridge::{Bridge, BridgeError, LoopContext, PendingResult};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config_cache::{CacheEntry, ConfigCache};
pub use dispatch::{
    CompletionHandle, DispatchError, DispatchHandle, DispatchSettings, DispatchWorker,
};
pub use error::ApplicationError;
pub use handlers::{
    AutodeleteHandler, CommandAction, CommandInvocation, CommandRouter, EventHandler,
    HandlerRegistry,
};
pub use notifications::{notify_payment_success, PaymentNotice};
pub use rate_limiter::TokenBucket;
pub use retry::{retry_async, Backoff, RetryConfig};
pub use supervisor::{Supervisor, SupervisorError, SupervisorSettings, LOOP_THREAD_NAME};
