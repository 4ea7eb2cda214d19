//! 主应用程序入口
//!
//! 加载配置，组装配置缓存与回环聊天平台，启动机器人并等待退出信号。

use std::sync::Arc;

use application::{
    AutodeleteHandler, CommandRouter, ConfigCache, HandlerRegistry, Supervisor, SupervisorSettings,
};
use config::AppConfig;
use domain::{ConfigSource, Credentials, LifecycleState};
use infrastructure::{InMemoryConfigStore, LoopbackPlatform};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// 指令行为由嵌入方注册，回环演练模式下只解析并记录指令
fn command_router(config: &AppConfig) -> CommandRouter {
    CommandRouter::new(config.bot.command_prefix.clone())
}

fn handlers(config: &AppConfig) -> HandlerRegistry {
    HandlerRegistry::new()
        .with(Arc::new(command_router(config)))
        .with(Arc::new(AutodeleteHandler::new()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;

    // 初始化日志，RUST_LOG 优先于配置文件
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log.filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    info!(?config, "配置已加载");

    // 配置存储写入后主动失效缓存
    let store = Arc::new(InMemoryConfigStore::new());
    let cache = Arc::new(ConfigCache::new(
        Arc::clone(&store) as Arc<dyn ConfigSource>,
        config.cache.ttl(),
    ));
    store.attach_cache(&cache);

    let platform = LoopbackPlatform::default();
    let supervisor = Supervisor::new(
        Arc::new(platform),
        cache,
        SupervisorSettings::from(&config),
    );
    supervisor.set_handlers(handlers(&config));

    let Some(token) = config.bot.token.clone() else {
        warn!("未设置 BOTLINK_BOT__TOKEN，机器人不会启动");
        return Ok(());
    };
    supervisor.start(Credentials::new(token))?;

    let waiting = supervisor.clone();
    let timeout = config.bridge.wait_timeout();
    let ready = tokio::task::spawn_blocking(move || waiting.wait_for(LifecycleState::Running, timeout)).await?;
    if ready {
        info!("机器人已就绪，按 Ctrl+C 退出");
    } else {
        warn!(status = %supervisor.status(), "机器人未在预期时间内上线");
    }

    tokio::signal::ctrl_c().await?;
    info!("收到退出信号，正在停止");

    // stop 会阻塞等待事件循环线程退出
    let stopping = supervisor.clone();
    tokio::task::spawn_blocking(move || stopping.stop()).await?;
    Ok(())
}
