use async_trait::async_trait;

use crate::config_entry::{ConfigKey, ConfigValue};
use crate::errors::LookupError;

pub type LookupResult<T> = Result<T, LookupError>;

/// 权威配置存储的只读查询接口
///
/// 实现可能很慢或暂时失败，调用方（配置缓存）负责兜底。
#[cfg_attr(feature = "testing", mockall::automock)]
#[async_trait]
pub trait ConfigSource: Send + Sync {
    async fn lookup(&self, key: &ConfigKey) -> LookupResult<ConfigValue>;
}
