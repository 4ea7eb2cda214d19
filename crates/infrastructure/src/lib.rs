//! 基础设施层实现。
//!
//! 提供内存配置存储和回环聊天平台两个适配器，实现领域层定义的接口。

pub mod loopback;
pub mod memory_store;

pub use loopback::{DeliveredMessage, LoopbackPlatform};
pub use memory_store::InMemoryConfigStore;
