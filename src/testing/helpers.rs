//! # 测试辅助函数

use entity::{channels, models};
use sea_orm::{ActiveModelTrait, ConnectOptions, Database, DatabaseConnection};
use sea_orm_migration::MigratorTrait;
use std::sync::Arc;
use std::time::Duration;

use super::fixtures::{ChannelFixture, ModelFixture};
use crate::admission::{AdmissionController, AdmissionLimits, MemoryAdmission};
use crate::catalog::CatalogSync;
use crate::config::WorkerDefaults;
use crate::cronjobs::CronScheduler;
use crate::detection::DetectionService;
use crate::probe::ProbeExecutor;
use crate::progress::ProgressBus;
use crate::queue::{MemoryProbeQueue, ProbeQueue};
use crate::repository::{ProbeRepository, SchedulerSettings, SeaOrmProbeRepository};
use crate::worker::WorkerPool;

/// 建一个跑完迁移的内存数据库
///
/// 连接数固定为 1：sqlite 内存库按连接隔离，多连接会各见各的空库
pub async fn setup_test_db() -> Arc<DatabaseConnection> {
    let mut options = ConnectOptions::new("sqlite::memory:".to_string());
    options.max_connections(1).sqlx_logging(false);
    let db = Database::connect(options)
        .await
        .expect("内存数据库连接失败");
    migration::Migrator::up(&db, None)
        .await
        .expect("测试数据库迁移失败");
    Arc::new(db)
}

/// 内存数据库 + 仓储
pub async fn setup_repository() -> (Arc<DatabaseConnection>, Arc<SeaOrmProbeRepository>) {
    let db = setup_test_db().await;
    let repository = Arc::new(SeaOrmProbeRepository::new(Arc::clone(&db)));
    (db, repository)
}

/// 插入一个渠道
pub async fn seed_channel(db: &DatabaseConnection, fixture: ChannelFixture) -> channels::Model {
    fixture
        .to_active_model()
        .insert(db)
        .await
        .expect("插入测试渠道失败")
}

/// 插入一个模型
pub async fn seed_model(db: &DatabaseConnection, fixture: ModelFixture) -> models::Model {
    fixture
        .to_active_model()
        .insert(db)
        .await
        .expect("插入测试模型失败")
}

/// 手工装配的测试服务栈（进程内后端 + 真实仓储）
pub struct TestStack {
    pub db: Arc<DatabaseConnection>,
    pub repository: Arc<dyn ProbeRepository>,
    pub queue: Arc<dyn ProbeQueue>,
    pub admission: Arc<dyn AdmissionController>,
    pub bus: Arc<ProgressBus>,
    pub worker: Arc<WorkerPool>,
    pub catalog: Arc<CatalogSync>,
    pub detection: Arc<DetectionService>,
    pub cron: Arc<CronScheduler>,
}

/// 按给定调度配置装配测试栈；worker 需要手动 `start()`
pub async fn setup_stack(settings: SchedulerSettings) -> TestStack {
    let db = setup_test_db().await;
    let repository: Arc<dyn ProbeRepository> =
        Arc::new(SeaOrmProbeRepository::new(Arc::clone(&db)));
    repository
        .upsert_scheduler_config(&settings)
        .await
        .expect("写入测试调度配置失败");

    let queue: Arc<dyn ProbeQueue> = Arc::new(MemoryProbeQueue::new());
    let admission: Arc<dyn AdmissionController> = Arc::new(MemoryAdmission::new(
        AdmissionLimits::new(settings.max_global_concurrency, settings.channel_concurrency),
    ));
    let executor = Arc::new(ProbeExecutor::new(Duration::from_secs(5)));
    let bus = Arc::new(ProgressBus::new());

    let worker = Arc::new(WorkerPool::new(
        Arc::clone(&queue),
        Arc::clone(&admission),
        Arc::clone(&repository),
        Arc::clone(&executor),
        Arc::clone(&bus),
        WorkerDefaults::default(),
        16,
    ));
    let catalog = Arc::new(CatalogSync::new(Arc::clone(&repository), executor));
    let detection = Arc::new(DetectionService::new(
        Arc::clone(&repository),
        Arc::clone(&queue),
        Arc::clone(&admission),
        Arc::clone(&worker),
        Arc::clone(&catalog),
        Vec::new(),
    ));
    let cron = Arc::new(CronScheduler::new(
        Arc::clone(&repository),
        Arc::clone(&detection),
    ));

    TestStack {
        db,
        repository,
        queue,
        admission,
        bus,
        worker,
        catalog,
        detection,
        cron,
    }
}

/// 轮询等待条件成立；超时返回 false
pub async fn wait_for<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
