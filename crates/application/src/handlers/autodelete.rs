//! 频道消息定时删除
//!
//! 规则按频道配置：延迟秒数，以及管理员、机器人、普通用户的消息是否删除。
//! 删除在事件循环上延后执行，失败只记录警告。

use std::time::Duration;

use async_trait::async_trait;
use domain::{AutodeleteRule, Author, InboundEvent};
use tracing::{debug, warn};

use super::EventHandler;
use crate::bridge::LoopContext;

#[derive(Debug, Default, Clone, Copy)]
pub struct AutodeleteHandler;

impl AutodeleteHandler {
    pub fn new() -> Self {
        Self
    }

    fn applies_to(rule: &AutodeleteRule, author: &Author) -> bool {
        if author.is_bot {
            rule.delete_bot
        } else if author.is_admin {
            rule.delete_admin
        } else {
            rule.delete_user
        }
    }
}

#[async_trait]
impl EventHandler for AutodeleteHandler {
    fn name(&self) -> &'static str {
        "autodelete"
    }

    async fn handle(&self, event: &InboundEvent, ctx: &LoopContext) -> anyhow::Result<()> {
        let Some(message) = event.as_message() else {
            return Ok(());
        };
        let Some(rule) = ctx.cache().autodelete_rule(message.channel_id).await else {
            return Ok(());
        };
        if rule.delay_secs == 0 || !Self::applies_to(&rule, &message.author) {
            return Ok(());
        }

        let client = ctx.client().clone();
        let channel_id = message.channel_id;
        let message_id = message.id;
        let delay = Duration::from_secs(rule.delay_secs);
        debug!(%channel_id, %message_id, delay_secs = rule.delay_secs, "已安排删除消息");

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(err) = client.delete_message(channel_id, message_id).await {
                warn!(%channel_id, %message_id, error = %err, "自动删除消息失败");
            }
        });
        Ok(())
    }
}
