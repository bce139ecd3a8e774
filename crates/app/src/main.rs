use std::path::PathBuf;
use std::sync::Arc;

use shingo_api::server::{start_server, AppState};
use shingo_core::common::RealTimeProvider;
use shingo_core::config::AppConfig;
use shingo_manager::dispatch::DispatchManager;
use shingo_manager::lease::LeaseMonitor;
use shingo_store::queue::SqliteQueueStore;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// # Summary
/// 加载应用配置：配置文件 (config/shingo.toml) + SHINGO_* 环境变量覆盖，
/// 两者都缺省时落回内置默认值。
fn load_config() -> Result<AppConfig, config::ConfigError> {
    config::Config::builder()
        .add_source(config::File::with_name("config/shingo").required(false))
        .add_source(config::Environment::with_prefix("SHINGO").separator("__"))
        .build()?
        .try_deserialize()
}

/// # Summary
/// 应用启动入口，纯粹的 DI 容器。
/// 负责实例化所有具体实现组件并通过 Arc<dyn Trait> 注入到 DispatchManager。
///
/// # Logic
/// 1. 加载配置并初始化全局日志 (stdout + 滚动文件)。
/// 2. 实例化基础设施层 (SqliteQueueStore、真实时钟)。
/// 3. 构造应用服务层 (DispatchManager) 并启动租约监视器。
/// 4. 启动 HTTP 网关，挂起等待外部信号退出。
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. 配置与日志
    let config = load_config()?;

    std::fs::create_dir_all("logs")?;
    let file_appender = tracing_appender::rolling::daily("logs", "shingo.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .with(fmt::layer().with_writer(file_writer).with_ansi(false))
        .init();

    info!("Shingo dispatch engine starting...");

    // 2. 实例化基础设施层
    shingo_store::config::set_root_dir(PathBuf::from(&config.database.data_dir));
    let store = Arc::new(SqliteQueueStore::new().await?);
    let clock = Arc::new(RealTimeProvider);

    // 3. 构造应用服务层（注入 Core Trait 抽象）
    let manager = DispatchManager::new(
        store.clone(),
        store.clone(),
        store.clone(),
        clock.clone(),
        config.dispatch.clone(),
    );

    // 4. 启动租约监视器：独立于请求流量的故障恢复定时器
    let monitor = LeaseMonitor::new(store.clone(), clock, config.dispatch.clone());
    let sweep_handle = monitor.spawn();
    info!(
        "Lease monitor running (sweep every {}s, lease timeout {}s, max retries {})",
        config.dispatch.sweep_interval_secs,
        config.dispatch.lease_timeout_secs,
        config.dispatch.max_retries
    );

    // 5. 启动 HTTP 网关
    let state = AppState {
        manager,
        api_token: Arc::new(config.server.api_token.clone()),
    };
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let server = tokio::spawn(async move {
        if let Err(e) = start_server(state, &bind_addr).await {
            tracing::error!("API server exited with error: {}", e);
        }
    });

    // 6. 挂起主线程，等待外部退出信号
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Exiting...");

    sweep_handle.abort();
    server.abort();

    Ok(())
}
