//! 配置缓存
//!
//! 每个入站事件都要做频道/指令检查，缓存避免每次都访问权威存储。
//! 过期时间只是兜底上限，平时由存储端在提交后调用 `invalidate` 主动失效。
//!
//! 并发策略：事件循环线程读取、任意线程失效，统一用 `RwLock` 保护，
//! 锁从不跨越 await。每个类别带一个代数，失效时递增；
//! 查询开始后若该类别被失效，查询结果不写回缓存，避免旧值覆盖失效。
//!
//! 指令名来自用户输入，键空间不受控；每次写入时顺带清理已过期条目，
//! 缓存大小不超过一个过期周期内查询过的键数。

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use domain::{
    AutodeleteRule, ChannelId, ChannelKind, CommandKind, ConfigCategory, ConfigKey, ConfigSource,
    ConfigValue,
};
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};

/// 缓存条目
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub value: ConfigValue,
    pub fetched_at: Instant,
    /// 该值来自查询失败时的安全默认值
    pub is_fallback: bool,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<ConfigKey, CacheEntry>,
    generations: HashMap<ConfigCategory, u64>,
}

impl CacheState {
    fn generation(&self, category: ConfigCategory) -> u64 {
        self.generations.get(&category).copied().unwrap_or(0)
    }
}

pub struct ConfigCache {
    source: Arc<dyn ConfigSource>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    state: RwLock<CacheState>,
}

impl ConfigCache {
    pub fn new(source: Arc<dyn ConfigSource>, ttl: Duration) -> Self {
        Self::with_clock(source, ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(source: Arc<dyn ConfigSource>, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            source,
            clock,
            ttl,
            state: RwLock::new(CacheState::default()),
        }
    }

    fn read_state(&self) -> RwLockReadGuard<'_, CacheState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, CacheState> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_fresh(&self, entry: &CacheEntry) -> bool {
        self.clock.now().saturating_duration_since(entry.fetched_at) < self.ttl
    }

    /// 读取配置
    ///
    /// 新鲜条目直接返回；否则查询权威存储。查询失败时缓存该类别的安全默认值，
    /// 同样带时间戳，避免存储故障时每个事件都去查询。此方法不会返回错误。
    pub async fn get(&self, key: &ConfigKey) -> ConfigValue {
        let generation = {
            let state = self.read_state();
            if let Some(entry) = state.entries.get(key) {
                if self.is_fresh(entry) {
                    return entry.value.clone();
                }
            }
            state.generation(key.category())
        };

        let (value, is_fallback) = match self.source.lookup(key).await {
            Ok(value) => (value, false),
            Err(err) => {
                warn!(key = %key, error = %err, "查询配置失败，使用安全默认值");
                (key.category().failure_default(), true)
            }
        };

        self.store(key, value.clone(), generation, is_fallback);
        value
    }

    fn store(&self, key: &ConfigKey, value: ConfigValue, generation: u64, is_fallback: bool) {
        let mut state = self.write_state();
        if state.generation(key.category()) != generation {
            debug!(key = %key, "查询期间配置已失效，结果不写入缓存");
            return;
        }

        let now = self.clock.now();
        let before = state.entries.len();
        state
            .entries
            .retain(|_, entry| now.saturating_duration_since(entry.fetched_at) < self.ttl);
        let evicted = before - state.entries.len();
        if evicted > 0 {
            debug!(evicted, "已清理过期配置条目");
        }

        state.entries.insert(
            key.clone(),
            CacheEntry {
                value,
                fetched_at: now,
                is_fallback,
            },
        );
    }

    /// 清除某个类别的全部条目，不论是否过期
    ///
    /// 由权威存储在提交该类别的增删改之后同步调用，可在任意线程调用。
    pub fn invalidate(&self, category: ConfigCategory) {
        let removed = {
            let mut state = self.write_state();
            let before = state.entries.len();
            state.entries.retain(|key, _| key.category() != category);
            *state.generations.entry(category).or_insert(0) += 1;
            before - state.entries.len()
        };
        info!(category = %category, removed, "已清除配置缓存");
    }

    /// 清除全部类别
    pub fn invalidate_all(&self) {
        for category in ConfigCategory::ALL {
            self.invalidate(category);
        }
    }

    /// 查看缓存条目（不触发查询）
    pub fn peek(&self, key: &ConfigKey) -> Option<CacheEntry> {
        self.read_state().entries.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.read_state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 某用途允许的频道；`None` 表示未设置白名单
    pub async fn allowed_channels(&self, kind: ChannelKind) -> Option<Vec<ChannelId>> {
        match self.get(&ConfigKey::channel(kind)).await {
            ConfigValue::Channels(channels) => Some(channels),
            ConfigValue::Unknown => None,
            other => {
                warn!(kind = kind.as_str(), value = ?other, "频道配置类型不符，视为未设置");
                None
            }
        }
    }

    /// 未设置或空白名单时所有频道放行
    pub async fn is_channel_allowed(&self, kind: ChannelKind, channel_id: ChannelId) -> bool {
        match self.allowed_channels(kind).await {
            None => true,
            Some(channels) if channels.is_empty() => true,
            Some(channels) => channels.contains(&channel_id),
        }
    }

    /// 指令名称对应的行为
    pub async fn command_kind(&self, name: &str) -> Option<CommandKind> {
        match self.get(&ConfigKey::command(name)).await {
            ConfigValue::Command(kind) => kind,
            _ => None,
        }
    }

    pub async fn autodelete_rules(&self) -> Vec<AutodeleteRule> {
        match self.get(&ConfigKey::autodelete()).await {
            ConfigValue::Autodelete(rules) => rules,
            _ => Vec::new(),
        }
    }

    pub async fn autodelete_rule(&self, channel_id: ChannelId) -> Option<AutodeleteRule> {
        self.autodelete_rules()
            .await
            .into_iter()
            .find(|rule| rule.channel_id == channel_id)
    }
}
