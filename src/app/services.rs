//! # 服务装配
//!
//! `initialize_services` 在进程启动时调用一次，按配置选择队列/准入/进度
//! 总线的后端并完成组装。测试通过同样的构造函数注入假实现。

use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::admission::{AdmissionController, AdmissionLimits, MemoryAdmission, RedisAdmission};
use crate::app::resources::AppResources;
use crate::catalog::CatalogSync;
use crate::cronjobs::CronScheduler;
use crate::detection::DetectionService;
use crate::error::Result;
use crate::keys::ChannelKeyService;
use crate::logging::{LogComponent, LogStage};
use crate::probe::strategy::parse_kind_list;
use crate::probe::ProbeExecutor;
use crate::progress::ProgressBus;
use crate::queue::{MemoryProbeQueue, ProbeQueue, RedisProbeQueue};
use crate::repository::{ProbeRepository, SeaOrmProbeRepository};
use crate::worker::{WorkerPool, WORKER_FAN_OUT};
use crate::linfo;

/// 核心服务集合
pub struct AppServices {
    repository: Arc<dyn ProbeRepository>,
    queue: Arc<dyn ProbeQueue>,
    admission: Arc<dyn AdmissionController>,
    bus: Arc<ProgressBus>,
    worker: Arc<WorkerPool>,
    catalog: Arc<CatalogSync>,
    detection: Arc<DetectionService>,
    cron_scheduler: Arc<CronScheduler>,
    channel_keys: Arc<ChannelKeyService>,
    mirror_task: Option<JoinHandle<()>>,
}

impl AppServices {
    /// 按配置组装全部核心服务
    pub async fn initialize(resources: &Arc<AppResources>) -> Result<Arc<Self>> {
        let config = resources.config();
        let repository: Arc<dyn ProbeRepository> =
            Arc::new(SeaOrmProbeRepository::new(resources.database()));
        let executor = Arc::new(ProbeExecutor::default());

        let limits = AdmissionLimits::new(
            config.worker.max_global_concurrency,
            config.worker.channel_concurrency,
        );

        let (queue, admission, bus, mirror_task): (
            Arc<dyn ProbeQueue>,
            Arc<dyn AdmissionController>,
            Arc<ProgressBus>,
            Option<JoinHandle<()>>,
        ) = match resources.redis() {
            Some(redis) => {
                let bus = Arc::new(ProgressBus::with_mirror(redis.manager.clone()));
                let mirror_task = bus.start_mirror_task(redis.client.clone()).await?;
                (
                    Arc::new(RedisProbeQueue::new(redis.manager.clone())),
                    Arc::new(RedisAdmission::new(redis.manager.clone(), limits)),
                    bus,
                    Some(mirror_task),
                )
            }
            None => (
                Arc::new(MemoryProbeQueue::new()),
                Arc::new(MemoryAdmission::new(limits)),
                Arc::new(ProgressBus::new()),
                None,
            ),
        };

        let worker = Arc::new(WorkerPool::new(
            Arc::clone(&queue),
            Arc::clone(&admission),
            Arc::clone(&repository),
            Arc::clone(&executor),
            Arc::clone(&bus),
            config.worker.clone(),
            WORKER_FAN_OUT,
        ));

        let catalog = Arc::new(CatalogSync::new(
            Arc::clone(&repository),
            Arc::clone(&executor),
        ));
        let channel_keys = Arc::new(ChannelKeyService::new(
            Arc::clone(&repository),
            Arc::clone(&executor),
        ));

        let detection = Arc::new(DetectionService::new(
            Arc::clone(&repository),
            Arc::clone(&queue),
            Arc::clone(&admission),
            Arc::clone(&worker),
            Arc::clone(&catalog),
            parse_kind_list(&config.worker.secondary_chat_kinds),
        ));

        let cron_scheduler = Arc::new(CronScheduler::new(
            Arc::clone(&repository),
            Arc::clone(&detection),
        ));

        linfo!(
            "system",
            LogStage::Startup,
            LogComponent::Main,
            "services_ready",
            "核心服务装配完成",
            broker_mode = resources.redis().is_some()
        );

        Ok(Arc::new(Self {
            repository,
            queue,
            admission,
            bus,
            worker,
            catalog,
            detection,
            cron_scheduler,
            channel_keys,
            mirror_task,
        }))
    }

    #[must_use]
    pub fn repository(&self) -> Arc<dyn ProbeRepository> {
        Arc::clone(&self.repository)
    }

    #[must_use]
    pub fn queue(&self) -> Arc<dyn ProbeQueue> {
        Arc::clone(&self.queue)
    }

    #[must_use]
    pub fn admission(&self) -> Arc<dyn AdmissionController> {
        Arc::clone(&self.admission)
    }

    #[must_use]
    pub fn progress_bus(&self) -> Arc<ProgressBus> {
        Arc::clone(&self.bus)
    }

    #[must_use]
    pub fn worker(&self) -> Arc<WorkerPool> {
        Arc::clone(&self.worker)
    }

    #[must_use]
    pub fn catalog(&self) -> Arc<CatalogSync> {
        Arc::clone(&self.catalog)
    }

    #[must_use]
    pub fn detection(&self) -> Arc<DetectionService> {
        Arc::clone(&self.detection)
    }

    #[must_use]
    pub fn cron_scheduler(&self) -> Arc<CronScheduler> {
        Arc::clone(&self.cron_scheduler)
    }

    #[must_use]
    pub fn channel_keys(&self) -> Arc<ChannelKeyService> {
        Arc::clone(&self.channel_keys)
    }

    /// 启动后台任务：worker 池在前，定时调度在后
    pub async fn start_background_tasks(&self) -> Result<()> {
        self.worker.start().await?;
        if let Err(e) = self.cron_scheduler.start_all().await {
            // 定时任务起不来时 worker 不能留成孤儿
            self.worker.stop().await;
            return Err(e);
        }
        linfo!(
            "system",
            LogStage::Startup,
            LogComponent::Main,
            "background_tasks_started",
            "后台任务已启动"
        );
        Ok(())
    }

    /// 逆序停机：先停定时调度防止新批次入队，再等 worker 清场，
    /// 最后断开进度镜像
    pub async fn shutdown(&self) {
        self.cron_scheduler.stop_all().await;
        self.worker.stop().await;
        if let Some(handle) = &self.mirror_task {
            handle.abort();
        }
        linfo!(
            "system",
            LogStage::Shutdown,
            LogComponent::Main,
            "background_tasks_stopped",
            "后台任务已停止"
        );
    }
}
