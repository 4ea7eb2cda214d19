//! 入站事件处理器
//!
//! 每个入站事件依次交给所有已注册的处理器。单个处理器返回错误或 panic
//! 只记录日志，不影响其他处理器，也不影响事件循环。

pub mod autodelete;
pub mod command;

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use domain::InboundEvent;
use futures::FutureExt;
use tracing::error;

use crate::bridge::LoopContext;
use crate::dispatch::panic_message;

pub use autodelete::AutodeleteHandler;
pub use command::{CommandAction, CommandInvocation, CommandRouter};

#[async_trait]
pub trait EventHandler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(&self, event: &InboundEvent, ctx: &LoopContext) -> anyhow::Result<()>;
}

/// 处理器注册表，按注册顺序分派
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    pub fn with(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.register(handler);
        self
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.handlers.iter().map(|handler| handler.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub async fn dispatch(&self, event: &InboundEvent, ctx: &LoopContext) {
        for handler in &self.handlers {
            match AssertUnwindSafe(handler.handle(event, ctx)).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    error!(handler = handler.name(), error = %format!("{err:#}"), "事件处理失败");
                }
                Err(panic) => {
                    error!(
                        handler = handler.name(),
                        panic = %panic_message(panic.as_ref()),
                        "事件处理时发生 panic"
                    );
                }
            }
        }
    }
}
