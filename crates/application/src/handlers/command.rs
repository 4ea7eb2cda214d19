//! 前缀指令路由
//!
//! 指令名到行为的映射来自配置缓存（Command 类别），
//! 行为对应的频道白名单来自 Channel 类别。不在白名单内的频道静默忽略。

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use domain::{CommandKind, InboundEvent, IncomingMessage};
use tracing::debug;

use super::EventHandler;
use crate::bridge::LoopContext;

/// 一次解析后的指令调用
#[derive(Debug, Clone, PartialEq)]
pub struct CommandInvocation {
    pub name: String,
    pub kind: CommandKind,
    pub args: Vec<String>,
    pub message: IncomingMessage,
}

/// 指令行为
#[async_trait]
pub trait CommandAction: Send + Sync {
    async fn execute(&self, invocation: CommandInvocation, ctx: &LoopContext) -> anyhow::Result<()>;
}

pub struct CommandRouter {
    prefix: String,
    actions: HashMap<CommandKind, Arc<dyn CommandAction>>,
}

impl CommandRouter {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            actions: HashMap::new(),
        }
    }

    pub fn route(mut self, kind: CommandKind, action: Arc<dyn CommandAction>) -> Self {
        self.actions.insert(kind, action);
        self
    }

    /// 拆出指令名与参数，不带前缀或前缀后为空时返回 `None`
    pub fn parse<'a>(&self, content: &'a str) -> Option<(&'a str, Vec<&'a str>)> {
        let rest = content.trim_start().strip_prefix(self.prefix.as_str())?;
        let mut parts = rest.split_whitespace();
        let name = parts.next()?;
        Some((name, parts.collect()))
    }
}

#[async_trait]
impl EventHandler for CommandRouter {
    fn name(&self) -> &'static str {
        "command_router"
    }

    async fn handle(&self, event: &InboundEvent, ctx: &LoopContext) -> anyhow::Result<()> {
        let Some(message) = event.as_message() else {
            return Ok(());
        };
        if message.author.is_bot {
            return Ok(());
        }
        let Some((name, args)) = self.parse(&message.content) else {
            return Ok(());
        };

        let Some(kind) = ctx.cache().command_kind(name).await else {
            debug!(command = name, "未配置的指令，忽略");
            return Ok(());
        };
        let Some(action) = self.actions.get(&kind) else {
            debug!(command = name, kind = kind.as_str(), "指令行为未注册，忽略");
            return Ok(());
        };

        if !ctx
            .cache()
            .is_channel_allowed(kind.channel_kind(), message.channel_id)
            .await
        {
            debug!(
                command = name,
                channel_id = %message.channel_id,
                "频道不在白名单内，忽略指令"
            );
            return Ok(());
        }

        let invocation = CommandInvocation {
            name: name.to_string(),
            kind,
            args: args.into_iter().map(str::to_string).collect(),
            message: message.clone(),
        };
        action
            .execute(invocation, ctx)
            .await
            .with_context(|| format!("执行指令 {name} 失败"))
    }
}
