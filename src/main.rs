//! # api-probe 入口
//!
//! 装配顺序：配置 → 日志 → 数据库（含迁移）→ 资源层 → 核心服务 →
//! 后台任务；收到 ctrl-c 后逆序停机。

use std::sync::Arc;

use api_probe::app::{AppResources, AppServices};
use api_probe::config::AppConfig;
use api_probe::error::{ProbeError, Result};
use api_probe::logging::{self, LogComponent, LogStage};
use api_probe::{database, linfo};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Arc::new(AppConfig::from_env());
    logging::init_logging(None);

    linfo!(
        "system",
        LogStage::Startup,
        LogComponent::Main,
        "boot",
        "api-probe 启动中",
        broker_mode = config.broker_enabled()
    );

    let db = database::init_database(&config.database)
        .await
        .map_err(|e| ProbeError::database_with_source("数据库初始化失败", e))?;
    database::run_migrations(&db)
        .await
        .map_err(|e| ProbeError::database_with_source("数据库迁移失败", e))?;

    let resources = AppResources::build(Arc::clone(&config), Arc::new(db)).await?;
    let services = AppServices::initialize(&resources).await?;
    services.start_background_tasks().await?;

    linfo!(
        "system",
        LogStage::Startup,
        LogComponent::Main,
        "ready",
        "api-probe 就绪"
    );

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| ProbeError::internal_with_source("信号监听失败", e))?;

    linfo!(
        "system",
        LogStage::Shutdown,
        LogComponent::Main,
        "shutdown_begin",
        "收到退出信号，开始停机"
    );

    services.shutdown().await;

    linfo!(
        "system",
        LogStage::Shutdown,
        LogComponent::Main,
        "shutdown_done",
        "api-probe 已退出"
    );
    Ok(())
}
