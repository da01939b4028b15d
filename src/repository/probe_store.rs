//! # Sea-ORM 仓储实现

use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use entity::{channel_keys, channels, check_logs, model_endpoints, models, scheduler_configs};
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, Order, PaginatorTrait,
    QueryFilter, QueryOrder, Set, TransactionError, TransactionTrait,
};
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;

use super::{ChannelWithModels, ProbeRepository, SchedulerSettings, SyncOutcome};
use crate::error::{ProbeError, Result};
use crate::logging::{LogComponent, LogStage};
use crate::probe::{ModelHealth, ProbeJob, ProbeOutcome, ProbeStatus};
use crate::{ldebug, linfo};

const SCHEDULER_CONFIG_ID: &str = "default";

/// Sea-ORM 仓储
pub struct SeaOrmProbeRepository {
    db: Arc<DatabaseConnection>,
}

impl SeaOrmProbeRepository {
    #[must_use]
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    fn map_txn_error(err: TransactionError<ProbeError>) -> ProbeError {
        match err {
            TransactionError::Connection(e) => e.into(),
            TransactionError::Transaction(e) => e,
        }
    }
}

fn settings_from_row(row: &scheduler_configs::Model) -> SchedulerSettings {
    let selected_channel_ids = row
        .selected_channel_ids
        .as_deref()
        .and_then(|raw| serde_json::from_str::<Vec<i32>>(raw).ok());
    // JSON 对象的键是字符串，转回渠道 ID
    let selected_model_ids = row
        .selected_model_ids
        .as_deref()
        .and_then(|raw| serde_json::from_str::<HashMap<String, Vec<i32>>>(raw).ok())
        .map(|parsed| {
            parsed
                .into_iter()
                .filter_map(|(key, value)| key.parse::<i32>().ok().map(|id| (id, value)))
                .collect::<HashMap<i32, Vec<i32>>>()
        });

    SchedulerSettings {
        enabled: row.enabled,
        cron_expression: row.cron_expression.clone(),
        timezone: row.timezone.clone(),
        channel_concurrency: u32::try_from(row.channel_concurrency.max(1)).unwrap_or(1),
        max_global_concurrency: u32::try_from(row.max_global_concurrency.max(1)).unwrap_or(1),
        min_jitter_ms: u64::try_from(row.min_jitter_ms.max(0)).unwrap_or(0),
        max_jitter_ms: u64::try_from(row.max_jitter_ms.max(0)).unwrap_or(0),
        detect_all_channels: row.detect_all_channels,
        selected_channel_ids,
        selected_model_ids,
        log_retention_days: u32::try_from(row.log_retention_days.max(1)).unwrap_or(7),
    }
}

fn settings_to_json_columns(
    settings: &SchedulerSettings,
) -> Result<(Option<String>, Option<String>)> {
    let channel_ids = settings
        .selected_channel_ids
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    let model_ids = settings
        .selected_model_ids
        .as_ref()
        .map(|map| {
            let keyed: HashMap<String, &Vec<i32>> =
                map.iter().map(|(id, v)| (id.to_string(), v)).collect();
            serde_json::to_string(&keyed)
        })
        .transpose()?;
    Ok((channel_ids, model_ids))
}

#[async_trait]
impl ProbeRepository for SeaOrmProbeRepository {
    async fn load_enabled_channels(&self, with_models: bool) -> Result<Vec<ChannelWithModels>> {
        let channel_rows = channels::Entity::find()
            .filter(channels::Column::Enabled.eq(true))
            .order_by(channels::Column::SortOrder, Order::Asc)
            .order_by(channels::Column::CreatedAt, Order::Desc)
            .all(self.db.as_ref())
            .await?;

        if !with_models {
            return Ok(channel_rows
                .into_iter()
                .map(|channel| ChannelWithModels {
                    channel,
                    models: Vec::new(),
                })
                .collect());
        }

        let channel_ids: Vec<i32> = channel_rows.iter().map(|c| c.id).collect();
        let model_rows = if channel_ids.is_empty() {
            Vec::new()
        } else {
            models::Entity::find()
                .filter(models::Column::ChannelId.is_in(channel_ids))
                .all(self.db.as_ref())
                .await?
        };

        let mut grouped: HashMap<i32, Vec<models::Model>> = HashMap::new();
        for model in model_rows {
            grouped.entry(model.channel_id).or_default().push(model);
        }

        Ok(channel_rows
            .into_iter()
            .map(|channel| {
                let models = grouped.remove(&channel.id).unwrap_or_default();
                ChannelWithModels { channel, models }
            })
            .collect())
    }

    async fn find_channel(&self, channel_id: i32) -> Result<Option<channels::Model>> {
        Ok(channels::Entity::find_by_id(channel_id)
            .one(self.db.as_ref())
            .await?)
    }

    async fn find_model(&self, model_id: i32) -> Result<Option<models::Model>> {
        Ok(models::Entity::find_by_id(model_id)
            .one(self.db.as_ref())
            .await?)
    }

    async fn load_channel_models(
        &self,
        channel_id: i32,
        model_ids: Option<&[i32]>,
    ) -> Result<Vec<models::Model>> {
        let mut query =
            models::Entity::find().filter(models::Column::ChannelId.eq(channel_id));
        if let Some(ids) = model_ids {
            query = query.filter(models::Column::Id.is_in(ids.to_vec()));
        }
        Ok(query.all(self.db.as_ref()).await?)
    }

    async fn reset_models_probe_state(&self, model_ids: &[i32]) -> Result<()> {
        if model_ids.is_empty() {
            return Ok(());
        }
        let ids = model_ids.to_vec();
        self.db
            .transaction::<_, (), ProbeError>(move |txn| {
                Box::pin(async move {
                    model_endpoints::Entity::delete_many()
                        .filter(model_endpoints::Column::ModelId.is_in(ids.clone()))
                        .exec(txn)
                        .await?;

                    models::Entity::update_many()
                        .col_expr(
                            models::Column::HealthStatus,
                            Expr::value(ModelHealth::Unknown.as_str()),
                        )
                        .col_expr(models::Column::LastStatus, Expr::value(Option::<bool>::None))
                        .col_expr(
                            models::Column::LastLatencyMs,
                            Expr::value(Option::<i32>::None),
                        )
                        .col_expr(
                            models::Column::LastCheckedAt,
                            Expr::value(Option::<NaiveDateTime>::None),
                        )
                        .filter(models::Column::Id.is_in(ids))
                        .exec(txn)
                        .await?;
                    Ok(())
                })
            })
            .await
            .map_err(Self::map_txn_error)?;

        ldebug!(
            "system",
            LogStage::Detection,
            LogComponent::Repository,
            "reset_models",
            "模型探测状态已重置",
            count = model_ids.len()
        );
        Ok(())
    }

    async fn persist_probe_outcome(
        &self,
        job: &ProbeJob,
        outcome: &ProbeOutcome,
    ) -> Result<ModelHealth> {
        let model_id = job.model_id;
        let kind = job.endpoint_kind;
        let outcome = outcome.clone();
        let job_id = job.job_id.clone();

        let health = self
            .db
            .transaction::<_, ModelHealth, ProbeError>(move |txn| {
                Box::pin(async move {
                    let now = Utc::now().naive_utc();

                    let model = models::Entity::find_by_id(model_id)
                        .one(txn)
                        .await?
                        .ok_or_else(|| {
                            ProbeError::database(format!("模型不存在: {model_id}"))
                        })?;

                    // upsert (model_id, endpoint_kind) 端点行
                    let existing = model_endpoints::Entity::find()
                        .filter(model_endpoints::Column::ModelId.eq(model_id))
                        .filter(model_endpoints::Column::EndpointKind.eq(kind.as_str()))
                        .one(txn)
                        .await?;
                    let status_code = outcome.http_status.map(i32::from);
                    match existing {
                        Some(row) => {
                            let mut active: model_endpoints::ActiveModel = row.into();
                            active.status = Set(outcome.status.as_str().to_string());
                            active.latency_ms = Set(outcome.latency_ms);
                            active.status_code = Set(status_code);
                            active.error_msg = Set(outcome.error_msg.clone());
                            active.response_content = Set(outcome.response_content.clone());
                            active.checked_at = Set(now);
                            active.update(txn).await?;
                        }
                        None => {
                            model_endpoints::ActiveModel {
                                model_id: Set(model_id),
                                endpoint_kind: Set(kind.as_str().to_string()),
                                status: Set(outcome.status.as_str().to_string()),
                                latency_ms: Set(outcome.latency_ms),
                                status_code: Set(status_code),
                                error_msg: Set(outcome.error_msg.clone()),
                                response_content: Set(outcome.response_content.clone()),
                                checked_at: Set(now),
                                ..Default::default()
                            }
                            .insert(txn)
                            .await?;
                        }
                    }

                    // 追加探测日志
                    check_logs::ActiveModel {
                        model_id: Set(model_id),
                        endpoint_kind: Set(kind.as_str().to_string()),
                        status: Set(outcome.status.as_str().to_string()),
                        latency_ms: Set(outcome.latency_ms),
                        status_code: Set(status_code),
                        error_msg: Set(outcome.error_msg.clone()),
                        response_content: Set(outcome.response_content.clone()),
                        created_at: Set(now),
                        ..Default::default()
                    }
                    .insert(txn)
                    .await?;

                    // 以当前全部端点行派生聚合健康
                    let endpoint_rows = model_endpoints::Entity::find()
                        .filter(model_endpoints::Column::ModelId.eq(model_id))
                        .all(txn)
                        .await?;
                    let statuses: Vec<ProbeStatus> = endpoint_rows
                        .iter()
                        .filter_map(|row| ProbeStatus::from_str(&row.status).ok())
                        .collect();
                    let (health, last_status) = ModelHealth::derive(&statuses);

                    let mut active: models::ActiveModel = model.into();
                    active.health_status = Set(health.as_str().to_string());
                    active.last_status = Set(last_status);
                    active.last_latency_ms = Set(Some(outcome.latency_ms));
                    active.last_checked_at = Set(Some(now));
                    active.update(txn).await?;

                    Ok(health)
                })
            })
            .await
            .map_err(Self::map_txn_error)?;

        ldebug!(
            &job_id,
            LogStage::Persist,
            LogComponent::Repository,
            "persist_outcome",
            "探测结果已落库",
            model_id = model_id,
            kind = %kind,
            health = %health
        );
        Ok(health)
    }

    async fn load_scheduler_config(&self) -> Result<SchedulerSettings> {
        let row = scheduler_configs::Entity::find_by_id(SCHEDULER_CONFIG_ID)
            .one(self.db.as_ref())
            .await?;
        match row {
            Some(row) => Ok(settings_from_row(&row)),
            None => {
                // 首次访问时落一条默认单例
                let defaults = SchedulerSettings::default();
                self.upsert_scheduler_config(&defaults).await?;
                Ok(defaults)
            }
        }
    }

    async fn upsert_scheduler_config(&self, settings: &SchedulerSettings) -> Result<()> {
        settings.validate()?;
        let (channel_ids_json, model_ids_json) = settings_to_json_columns(settings)?;
        let now = Utc::now().naive_utc();

        let existing = scheduler_configs::Entity::find_by_id(SCHEDULER_CONFIG_ID)
            .one(self.db.as_ref())
            .await?;

        let active = scheduler_configs::ActiveModel {
            id: Set(SCHEDULER_CONFIG_ID.to_string()),
            enabled: Set(settings.enabled),
            cron_expression: Set(settings.cron_expression.clone()),
            timezone: Set(settings.timezone.clone()),
            channel_concurrency: Set(i32::try_from(settings.channel_concurrency).unwrap_or(5)),
            max_global_concurrency: Set(
                i32::try_from(settings.max_global_concurrency).unwrap_or(30)
            ),
            min_jitter_ms: Set(i32::try_from(settings.min_jitter_ms).unwrap_or(3000)),
            max_jitter_ms: Set(i32::try_from(settings.max_jitter_ms).unwrap_or(5000)),
            detect_all_channels: Set(settings.detect_all_channels),
            selected_channel_ids: Set(channel_ids_json),
            selected_model_ids: Set(model_ids_json),
            log_retention_days: Set(i32::try_from(settings.log_retention_days).unwrap_or(7)),
            updated_at: Set(now),
        };

        if existing.is_some() {
            active.update(self.db.as_ref()).await?;
        } else {
            active.insert(self.db.as_ref()).await?;
        }
        Ok(())
    }

    async fn purge_check_logs_older_than(&self, cutoff: NaiveDateTime) -> Result<u64> {
        let result = check_logs::Entity::delete_many()
            .filter(check_logs::Column::CreatedAt.lt(cutoff))
            .exec(self.db.as_ref())
            .await?;
        linfo!(
            "system",
            LogStage::Cleanup,
            LogComponent::Repository,
            "purge_check_logs",
            "过期探测日志已清理",
            deleted = result.rows_affected,
            cutoff = %cutoff
        );
        Ok(result.rows_affected)
    }

    async fn list_models_for_sync(&self, channel_id: i32) -> Result<Vec<models::Model>> {
        Ok(models::Entity::find()
            .filter(models::Column::ChannelId.eq(channel_id))
            .order_by(models::Column::Id, Order::Asc)
            .all(self.db.as_ref())
            .await?)
    }

    async fn replace_or_add_models(
        &self,
        channel_id: i32,
        names: &[String],
    ) -> Result<SyncOutcome> {
        let existing: HashSet<String> = models::Entity::find()
            .filter(models::Column::ChannelId.eq(channel_id))
            .all(self.db.as_ref())
            .await?
            .into_iter()
            .map(|m| m.model_name)
            .collect();

        // 输入名单有序去重；已有条目保留，历史不删除
        let mut seen = HashSet::new();
        let now = Utc::now().naive_utc();
        let fresh: Vec<models::ActiveModel> = names
            .iter()
            .filter(|name| !name.is_empty())
            .filter(|name| seen.insert((*name).clone()))
            .filter(|name| !existing.contains(*name))
            .map(|name| models::ActiveModel {
                channel_id: Set(channel_id),
                model_name: Set(name.clone()),
                health_status: Set(ModelHealth::Unknown.as_str().to_string()),
                created_at: Set(now),
                ..Default::default()
            })
            .collect();

        let added = fresh.len() as u64;
        if !fresh.is_empty() {
            models::Entity::insert_many(fresh)
                .on_conflict(
                    OnConflict::columns([models::Column::ChannelId, models::Column::ModelName])
                        .do_nothing()
                        .to_owned(),
                )
                .do_nothing()
                .exec(self.db.as_ref())
                .await?;
        }

        let total = models::Entity::find()
            .filter(models::Column::ChannelId.eq(channel_id))
            .count(self.db.as_ref())
            .await?;

        Ok(SyncOutcome { added, total })
    }

    async fn list_channel_keys(&self, channel_id: i32) -> Result<Vec<channel_keys::Model>> {
        Ok(channel_keys::Entity::find()
            .filter(channel_keys::Column::ChannelId.eq(channel_id))
            .order_by(channel_keys::Column::SortOrder, Order::Asc)
            .order_by(channel_keys::Column::Id, Order::Asc)
            .all(self.db.as_ref())
            .await?)
    }

    async fn update_channel_key_validity(&self, key_id: i32, valid: bool) -> Result<()> {
        let key = channel_keys::Entity::find_by_id(key_id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| ProbeError::database(format!("附加密钥不存在: {key_id}")))?;

        let mut active: channel_keys::ActiveModel = key.into();
        active.last_valid = Set(Some(valid));
        active.last_checked_at = Set(Some(Utc::now().naive_utc()));
        active.update(self.db.as_ref()).await?;
        Ok(())
    }
}
