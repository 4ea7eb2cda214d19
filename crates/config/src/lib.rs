//! 统一配置中心
//!
//! 提供应用的全局配置管理，包括：
//! - 机器人凭证与指令前缀
//! - 外发消息限流
//! - 配置缓存过期时间
//! - 跨线程调用与生命周期参数
//!
//! 加载顺序：默认值 -> 可选配置文件（BOTLINK_CONFIG_FILE）-> 环境变量（BOTLINK_*）

use std::time::Duration;

use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};

/// 指定配置文件路径的环境变量
pub const CONFIG_FILE_ENV: &str = "BOTLINK_CONFIG_FILE";
/// 环境变量前缀，嵌套字段用 `__` 分隔，例如 `BOTLINK_DISPATCH__RATE_LIMIT`
pub const ENV_PREFIX: &str = "BOTLINK_";

/// 全局应用配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub bot: BotConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// 机器人配置
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct BotConfig {
    /// 未设置时不启动机器人
    pub token: Option<String>,
    pub command_prefix: String,
}

impl std::fmt::Debug for BotConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BotConfig")
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("command_prefix", &self.command_prefix)
            .finish()
    }
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            token: None,
            command_prefix: "!".to_string(),
        }
    }
}

/// 外发消息分发配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// 时间窗口内允许的最大发送数（令牌桶容量）
    pub rate_limit: u32,
    /// 时间窗口长度（秒）
    pub rate_period_secs: f64,
    /// 平台限流但未给出等待时间时使用的默认值（秒）
    pub default_retry_after_secs: f64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            rate_limit: 5,
            rate_period_secs: 5.0,
            default_retry_after_secs: 5.0,
        }
    }
}

impl DispatchConfig {
    pub fn rate_period(&self) -> Duration {
        Duration::from_secs_f64(self.rate_period_secs)
    }

    pub fn default_retry_after(&self) -> Duration {
        Duration::from_secs_f64(self.default_retry_after_secs)
    }
}

/// 配置缓存
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_secs: 60 }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// 跨线程调用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// 同步等待结果的默认超时（毫秒）
    pub wait_timeout_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            wait_timeout_ms: 5000,
        }
    }
}

impl BridgeConfig {
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }
}

/// 生命周期管理
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// 建立连接的最大尝试次数
    pub connect_attempts: u32,
    /// 连接重试的基础退避（毫秒），按指数增长
    pub connect_backoff_ms: u64,
    /// 停止时等待工作线程退出的上限（秒）
    pub shutdown_timeout_secs: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            connect_attempts: 3,
            connect_backoff_ms: 500,
            shutdown_timeout_secs: 10,
        }
    }
}

/// 日志
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    /// tracing EnvFilter 指令，RUST_LOG 优先
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bot: BotConfig::default(),
            dispatch: DispatchConfig::default(),
            cache: CacheConfig::default(),
            bridge: BridgeConfig::default(),
            supervisor: SupervisorConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl AppConfig {
    /// 按默认值 -> 配置文件 -> 环境变量的顺序加载并校验
    pub fn load() -> Result<Self, ConfigError> {
        let config: AppConfig = Self::figment().extract()?;
        config.validate()?;
        Ok(config)
    }

    /// 组装配置来源
    pub fn figment() -> Figment {
        let mut fig = Figment::new().merge(Serialized::defaults(AppConfig::default()));
        if let Ok(path) = std::env::var(CONFIG_FILE_ENV) {
            if path.ends_with(".yml") || path.ends_with(".yaml") {
                fig = fig.merge(Yaml::file(path));
            } else if path.ends_with(".json") {
                fig = fig.merge(Json::file(path));
            } else {
                fig = fig.merge(Toml::file(path));
            }
        }
        fig.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// 验证配置有效性
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dispatch.rate_limit == 0 {
            return Err(ConfigError::InvalidDispatchConfig(
                "rate_limit must be greater than 0".to_string(),
            ));
        }

        if !(self.dispatch.rate_period_secs.is_finite() && self.dispatch.rate_period_secs > 0.0) {
            return Err(ConfigError::InvalidDispatchConfig(
                "rate_period_secs must be a positive number".to_string(),
            ));
        }

        if !(self.dispatch.default_retry_after_secs.is_finite()
            && self.dispatch.default_retry_after_secs >= 0.0)
        {
            return Err(ConfigError::InvalidDispatchConfig(
                "default_retry_after_secs cannot be negative".to_string(),
            ));
        }

        if self.cache.ttl_secs == 0 {
            return Err(ConfigError::InvalidCacheConfig(
                "ttl_secs must be greater than 0".to_string(),
            ));
        }

        if self.supervisor.connect_attempts == 0 {
            return Err(ConfigError::InvalidSupervisorConfig(
                "connect_attempts must be at least 1".to_string(),
            ));
        }

        if self.bot.command_prefix.is_empty() {
            return Err(ConfigError::InvalidBotConfig(
                "command_prefix cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

/// 配置错误类型
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid bot configuration: {0}")]
    InvalidBotConfig(String),
    #[error("Invalid dispatch configuration: {0}")]
    InvalidDispatchConfig(String),
    #[error("Invalid cache configuration: {0}")]
    InvalidCacheConfig(String),
    #[error("Invalid supervisor configuration: {0}")]
    InvalidSupervisorConfig(String),
    #[error("Failed to load configuration: {0}")]
    Load(#[from] figment::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.dispatch.rate_limit, 5);
        assert_eq!(config.dispatch.rate_period(), Duration::from_secs(5));
        assert_eq!(config.cache.ttl(), Duration::from_secs(60));
        assert!(config.bot.token.is_none());
    }

    #[test]
    fn env_overrides_nested_fields() {
        Jail::expect_with(|jail| {
            jail.set_env("BOTLINK_DISPATCH__RATE_LIMIT", "10");
            jail.set_env("BOTLINK_CACHE__TTL_SECS", "30");
            jail.set_env("BOTLINK_BOT__TOKEN", "token-from-env");

            let config = AppConfig::load().expect("config should load");
            assert_eq!(config.dispatch.rate_limit, 10);
            assert_eq!(config.cache.ttl_secs, 30);
            assert_eq!(config.bot.token.as_deref(), Some("token-from-env"));
            Ok(())
        });
    }

    #[test]
    fn file_is_merged_before_env() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "botlink.toml",
                r#"
                [dispatch]
                rate_limit = 3
                rate_period_secs = 1.5
                default_retry_after_secs = 2.0

                [bot]
                command_prefix = "?"
                "#,
            )?;
            jail.set_env(CONFIG_FILE_ENV, "botlink.toml");
            jail.set_env("BOTLINK_DISPATCH__RATE_LIMIT", "4");

            let config = AppConfig::load().expect("config should load");
            assert_eq!(config.dispatch.rate_limit, 4);
            assert_eq!(config.dispatch.rate_period_secs, 1.5);
            assert_eq!(config.bot.command_prefix, "?");
            Ok(())
        });
    }

    #[test]
    fn validation_rejects_unusable_values() {
        let mut config = AppConfig::default();
        config.dispatch.rate_limit = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidDispatchConfig(_))
        ));

        let mut config = AppConfig::default();
        config.dispatch.rate_period_secs = 0.0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.cache.ttl_secs = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidCacheConfig(_))
        ));

        let mut config = AppConfig::default();
        config.supervisor.connect_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn debug_output_hides_token() {
        let mut config = AppConfig::default();
        config.bot.token = Some("very-secret".to_string());
        let text = format!("{:?}", config);
        assert!(!text.contains("very-secret"));
    }
}
