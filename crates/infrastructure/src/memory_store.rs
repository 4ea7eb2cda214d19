//! 内存中的权威配置存储
//!
//! 写操作在提交后同步调用 `ConfigCache::invalidate`，
//! 让事件循环上的缓存立即看到新配置，而不必等待过期。

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use application::ConfigCache;
use async_trait::async_trait;
use domain::{
    AutodeleteRule, ChannelId, ChannelKind, CommandKind, ConfigCategory, ConfigKey, ConfigSource,
    ConfigValue, LookupError, LookupResult,
};
use tracing::debug;

#[derive(Debug, Default)]
struct StoreState {
    channels: HashMap<ChannelKind, Vec<ChannelId>>,
    commands: HashMap<String, CommandKind>,
    autodelete: BTreeMap<ChannelId, AutodeleteRule>,
}

#[derive(Default)]
pub struct InMemoryConfigStore {
    state: RwLock<StoreState>,
    cache: RwLock<Option<Weak<ConfigCache>>>,
    offline: AtomicBool,
}

impl InMemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 关联需要在写入后失效的缓存
    ///
    /// 只保存弱引用：缓存本身持有这个存储。
    pub fn attach_cache(&self, cache: &Arc<ConfigCache>) {
        *self.cache.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::downgrade(cache));
    }

    /// 模拟存储不可用，之后的查询全部失败
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn set_channels(&self, kind: ChannelKind, channels: Vec<ChannelId>) {
        self.write_state().channels.insert(kind, channels);
        self.committed(ConfigCategory::Channel);
    }

    pub fn clear_channels(&self, kind: ChannelKind) {
        self.write_state().channels.remove(&kind);
        self.committed(ConfigCategory::Channel);
    }

    pub fn upsert_command(&self, name: impl Into<String>, kind: CommandKind) {
        self.write_state().commands.insert(name.into(), kind);
        self.committed(ConfigCategory::Command);
    }

    pub fn remove_command(&self, name: &str) -> bool {
        let removed = self.write_state().commands.remove(name).is_some();
        if removed {
            self.committed(ConfigCategory::Command);
        }
        removed
    }

    pub fn set_autodelete_rule(&self, rule: AutodeleteRule) {
        self.write_state().autodelete.insert(rule.channel_id, rule);
        self.committed(ConfigCategory::Autodelete);
    }

    pub fn remove_autodelete_rule(&self, channel_id: ChannelId) -> bool {
        let removed = self.write_state().autodelete.remove(&channel_id).is_some();
        if removed {
            self.committed(ConfigCategory::Autodelete);
        }
        removed
    }

    fn read_state(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    /// 提交后通知缓存；调用时写锁已释放
    fn committed(&self, category: ConfigCategory) {
        let cache = self
            .cache
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .and_then(Weak::upgrade);
        match cache {
            Some(cache) => cache.invalidate(category),
            None => debug!(category = %category, "未关联缓存，跳过失效通知"),
        }
    }
}

#[async_trait]
impl ConfigSource for InMemoryConfigStore {
    async fn lookup(&self, key: &ConfigKey) -> LookupResult<ConfigValue> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(LookupError::unavailable("配置存储不可用"));
        }

        let state = self.read_state();
        let value = match key {
            ConfigKey::Channel(kind) => {
                ConfigValue::Channels(state.channels.get(kind).cloned().unwrap_or_default())
            }
            ConfigKey::Command(name) => ConfigValue::Command(state.commands.get(name).copied()),
            ConfigKey::Autodelete => {
                ConfigValue::Autodelete(state.autodelete.values().cloned().collect())
            }
        };
        Ok(value)
    }
}
