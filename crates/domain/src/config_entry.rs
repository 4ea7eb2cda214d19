//! 配置缓存的键与值
//!
//! 缓存类别是封闭集合，每个类别定义自己的参数形式和查询失败时的安全默认值。

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value_objects::ChannelId;

/// 频道白名单的用途类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Bind,
    Points,
    Buy,
    Gift,
    Announce,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Bind => "bind",
            ChannelKind::Points => "points",
            ChannelKind::Buy => "buy",
            ChannelKind::Gift => "gift",
            ChannelKind::Announce => "announce",
        }
    }
}

/// 指令对应的行为类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Bind,
    Points,
    Buy,
    Gift,
    Announce,
}

impl CommandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Bind => "bind",
            CommandKind::Points => "points",
            CommandKind::Buy => "buy",
            CommandKind::Gift => "gift",
            CommandKind::Announce => "announce",
        }
    }

    /// 执行该指令前需要检查的频道白名单
    pub fn channel_kind(&self) -> ChannelKind {
        match self {
            CommandKind::Bind => ChannelKind::Bind,
            CommandKind::Points => ChannelKind::Points,
            CommandKind::Buy => ChannelKind::Buy,
            CommandKind::Gift => ChannelKind::Gift,
            CommandKind::Announce => ChannelKind::Announce,
        }
    }
}

/// 频道自动删除规则
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutodeleteRule {
    pub channel_id: ChannelId,
    /// 删除延迟（秒），0 表示不删除
    pub delay_secs: u64,
    pub delete_admin: bool,
    pub delete_bot: bool,
    pub delete_user: bool,
}

/// 缓存类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigCategory {
    Channel,
    Command,
    Autodelete,
}

impl ConfigCategory {
    pub const ALL: [ConfigCategory; 3] = [
        ConfigCategory::Channel,
        ConfigCategory::Command,
        ConfigCategory::Autodelete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigCategory::Channel => "channel",
            ConfigCategory::Command => "command",
            ConfigCategory::Autodelete => "autodelete",
        }
    }

    /// 查询失败时缓存的默认值
    ///
    /// - Channel: `Unknown`，视为未设白名单，所有频道放行
    /// - Command: 无对应行为，指令被忽略
    /// - Autodelete: 无规则，不删除任何消息
    pub fn failure_default(&self) -> ConfigValue {
        match self {
            ConfigCategory::Channel => ConfigValue::Unknown,
            ConfigCategory::Command => ConfigValue::Command(None),
            ConfigCategory::Autodelete => ConfigValue::Autodelete(Vec::new()),
        }
    }
}

impl fmt::Display for ConfigCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 缓存键：类别 + 参数
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "category", content = "param", rename_all = "snake_case")]
pub enum ConfigKey {
    Channel(ChannelKind),
    Command(String),
    Autodelete,
}

impl ConfigKey {
    pub fn channel(kind: ChannelKind) -> Self {
        ConfigKey::Channel(kind)
    }

    pub fn command(name: impl Into<String>) -> Self {
        ConfigKey::Command(name.into())
    }

    pub fn autodelete() -> Self {
        ConfigKey::Autodelete
    }

    pub fn category(&self) -> ConfigCategory {
        match self {
            ConfigKey::Channel(_) => ConfigCategory::Channel,
            ConfigKey::Command(_) => ConfigCategory::Command,
            ConfigKey::Autodelete => ConfigCategory::Autodelete,
        }
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigKey::Channel(kind) => write!(f, "channel:{}", kind.as_str()),
            ConfigKey::Command(name) => write!(f, "command:{}", name),
            ConfigKey::Autodelete => f.write_str("autodelete"),
        }
    }
}

/// 缓存值
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigValue {
    Channels(Vec<ChannelId>),
    Command(Option<CommandKind>),
    Autodelete(Vec<AutodeleteRule>),
    /// 存储中没有这项配置或无法判断
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_report_their_category() {
        assert_eq!(
            ConfigKey::channel(ChannelKind::Buy).category(),
            ConfigCategory::Channel
        );
        assert_eq!(ConfigKey::command("購買").category(), ConfigCategory::Command);
        assert_eq!(ConfigKey::autodelete().category(), ConfigCategory::Autodelete);
    }

    #[test]
    fn failure_defaults_per_category() {
        assert_eq!(
            ConfigCategory::Channel.failure_default(),
            ConfigValue::Unknown
        );
        assert_eq!(
            ConfigCategory::Command.failure_default(),
            ConfigValue::Command(None)
        );
        assert_eq!(
            ConfigCategory::Autodelete.failure_default(),
            ConfigValue::Autodelete(Vec::new())
        );
    }

    #[test]
    fn every_command_maps_to_its_channel_list() {
        assert_eq!(CommandKind::Points.channel_kind(), ChannelKind::Points);
        assert_eq!(CommandKind::Buy.channel_kind().as_str(), "buy");
    }
}
