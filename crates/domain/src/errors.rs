//! 领域错误定义
//!
//! 聊天平台返回的错误必须能区分“被限流”和“永久失败”，分发队列据此决定重试还是放弃。

use std::time::Duration;

use thiserror::Error;

/// 聊天平台客户端错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    /// 平台限流，`retry_after` 为平台建议的等待时间（可能缺省）
    #[error("被平台限流，建议 {retry_after:?} 后重试")]
    Throttled { retry_after: Option<Duration> },

    /// 目标用户或频道不存在
    #[error("目标不存在: {target}")]
    NotFound { target: String },

    /// 目标拒收（关闭私讯、封锁、无权限）
    #[error("目标拒收: {reason}")]
    Forbidden { reason: String },

    /// 连接层错误（建立连接失败、连接中断）
    #[error("连接错误: {message}")]
    Connection { message: String },

    /// 凭证无效
    #[error("认证失败: {message}")]
    Unauthorized { message: String },

    /// 其他平台错误
    #[error("平台错误: {message}")]
    Other { message: String },
}

impl ProviderError {
    pub fn throttled(retry_after: Duration) -> Self {
        Self::Throttled {
            retry_after: Some(retry_after),
        }
    }

    pub fn not_found(target: impl Into<String>) -> Self {
        Self::NotFound {
            target: target.into(),
        }
    }

    pub fn forbidden(reason: impl Into<String>) -> Self {
        Self::Forbidden {
            reason: reason.into(),
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }

    /// 是否为限流错误
    pub fn is_throttled(&self) -> bool {
        matches!(self, ProviderError::Throttled { .. })
    }

    /// 限流时平台给出的等待时间
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ProviderError::Throttled { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// 连接层错误可以重试建立连接，其余错误重试无意义
    pub fn is_transient_connection(&self) -> bool {
        matches!(self, ProviderError::Connection { .. })
    }
}

/// 权威配置存储查询错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LookupError {
    #[error("配置存储不可用: {message}")]
    Unavailable { message: String },

    #[error("配置数据无效: {message}")]
    Invalid { message: String },
}

impl LookupError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }
}
