//! 聊天平台桥接核心领域模型
//!
//! 包含标识符、消息载荷、配置缓存键值、生命周期状态，
//! 以及聊天平台客户端和权威配置存储的抽象接口。

pub mod config_entry;
pub mod errors;
pub mod events;
pub mod lifecycle;
pub mod message;
pub mod platform;
pub mod repository;
pub mod value_objects;

// 重新导出常用类型
pub use config_entry::*;
pub use errors::*;
pub use events::*;
pub use lifecycle::*;
pub use message::*;
pub use platform::*;
pub use repository::*;
pub use value_objects::*;
