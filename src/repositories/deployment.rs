use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use sea_orm::sea_query::{Expr, Query};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, Iterable,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Select, Set,
};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::entity::deployment::{self, ActiveModel, Column, Entity as DeploymentEntity};
use crate::entity::tool::{Column as ToolColumn, Entity as ToolEntity};
use crate::error::{AppError, AppResult};
use crate::models::{
    format_version, Deployment, DeploymentLogEntry, DeploymentStats, DeploymentStatus,
    DeploymentType, DeploymentUpdate, HealthStatus, NewDeployment, RecentCounts, SslStatus,
};
use crate::repositories::{Repository, ToolRepository};

/// Deployment repository for database operations
pub struct DeploymentRepository;

#[async_trait]
impl Repository<Deployment> for DeploymentRepository {
    async fn find_by_id(db: &DatabaseConnection, id: Uuid) -> AppResult<Deployment> {
        let model = DeploymentEntity::find_by_id(id)
            .one(db)
            .await?
            .ok_or_else(|| AppError::NotFound("Deployment".to_string()))?;

        Ok(model.into())
    }

    async fn list(
        db: &DatabaseConnection,
        limit: u64,
        offset: u64,
    ) -> AppResult<Vec<Deployment>> {
        let models = DeploymentEntity::find()
            .order_by_desc(Column::CreatedAt)
            .paginate(db, limit)
            .fetch_page(offset / limit)
            .await?;

        Ok(models.into_iter().map(|m| m.into()).collect())
    }

    async fn count(db: &DatabaseConnection) -> AppResult<u64> {
        let count = DeploymentEntity::find().count(db).await?;
        Ok(count)
    }
}

impl DeploymentRepository {
    /// Insert a deployment row. The version label is derived from `sequence`.
    pub async fn create<C>(conn: &C, input: &NewDeployment) -> AppResult<Deployment>
    where
        C: ConnectionTrait,
    {
        let now = OffsetDateTime::now_utc();
        let completed_at = input.status.is_terminal().then_some(now);

        let model = ActiveModel {
            id: Set(Uuid::new_v4()),
            tool_id: Set(input.tool_id),
            version: Set(format_version(input.sequence)),
            sequence: Set(input.sequence),
            subdomain: Set(input.subdomain.clone()),
            deployment_type: Set(input.deployment_type),
            status: Set(input.status),
            ssl_status: Set(input.ssl_status),
            health_status: Set(HealthStatus::Unknown),
            health_check_url: Set(input.health_check_url.clone()),
            proxy_config: Set(input.proxy_config.clone()),
            deployment_log: Set(journal_to_json(&input.deployment_log)?),
            rollback_version: Set(None),
            error_message: Set(input.error_message.clone()),
            last_health_check: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            completed_at: Set(completed_at),
            rolled_back_at: Set(None),
        };

        let result = model.insert(conn).await?;
        Ok(result.into())
    }

    /// Apply a partial update to a deployment row
    pub async fn update<C>(conn: &C, id: Uuid, input: &DeploymentUpdate) -> AppResult<Deployment>
    where
        C: ConnectionTrait,
    {
        let model = DeploymentEntity::find_by_id(id)
            .one(conn)
            .await?
            .ok_or_else(|| AppError::NotFound("Deployment".to_string()))?;

        let now = OffsetDateTime::now_utc();
        let mut active: ActiveModel = model.into();

        if let Some(status) = input.status {
            active.status = Set(status);
        }
        if let Some(ssl_status) = input.ssl_status {
            active.ssl_status = Set(ssl_status);
        }
        if let Some(health_status) = input.health_status {
            active.health_status = Set(health_status);
        }
        if let Some(proxy_config) = &input.proxy_config {
            active.proxy_config = Set(Some(proxy_config.clone()));
        }
        if let Some(rollback_version) = &input.rollback_version {
            active.rollback_version = Set(Some(rollback_version.clone()));
        }
        if let Some(error_message) = &input.error_message {
            active.error_message = Set(Some(error_message.clone()));
        }
        if let Some(log) = &input.deployment_log {
            active.deployment_log = Set(journal_to_json(log)?);
        }
        if input.completed {
            active.completed_at = Set(Some(now));
        }
        active.updated_at = Set(now);

        let result = active.update(conn).await?;
        Ok(result.into())
    }

    /// Append one entry to a deployment's journal
    pub async fn append_log<C>(conn: &C, id: Uuid, entry: DeploymentLogEntry) -> AppResult<()>
    where
        C: ConnectionTrait,
    {
        let model = DeploymentEntity::find_by_id(id)
            .one(conn)
            .await?
            .ok_or_else(|| AppError::NotFound("Deployment".to_string()))?;

        let mut log = journal_from_json(&model.deployment_log);
        log.push(entry);

        let mut active: ActiveModel = model.into();
        active.deployment_log = Set(journal_to_json(&log)?);
        active.updated_at = Set(OffsetDateTime::now_utc());
        active.update(conn).await?;

        Ok(())
    }

    /// Find deployment by ID, verifying the caller owns its tool
    pub async fn find_by_id_and_user(
        db: &DatabaseConnection,
        id: Uuid,
        user_id: Uuid,
    ) -> AppResult<Deployment> {
        let model = DeploymentEntity::find_by_id(id)
            .one(db)
            .await?
            .ok_or_else(|| AppError::NotFound("Deployment".to_string()))?;

        // Verify tool ownership
        ToolEntity::find_by_id(model.tool_id)
            .filter(ToolColumn::UserId.eq(user_id))
            .one(db)
            .await?
            .ok_or_else(|| AppError::NotFound("Deployment".to_string()))?;

        Ok(model.into())
    }

    /// Number of deployment rows (of any status) recorded for a tool
    pub async fn count_by_tool<C>(conn: &C, tool_id: Uuid) -> AppResult<u64>
    where
        C: ConnectionTrait,
    {
        let count = DeploymentEntity::find()
            .filter(Column::ToolId.eq(tool_id))
            .count(conn)
            .await?;

        Ok(count)
    }

    /// Next deployment sequence for a tool. Callers must hold the tool's lock.
    pub async fn next_sequence<C>(conn: &C, tool_id: Uuid) -> AppResult<i32>
    where
        C: ConnectionTrait,
    {
        let count = Self::count_by_tool(conn, tool_id).await?;
        i32::try_from(count + 1)
            .map_err(|_| AppError::Internal(format!("Deployment sequence overflow for tool {}", tool_id)))
    }

    /// List deployments of a tool (with ownership check), newest first
    pub async fn list_by_tool(
        db: &DatabaseConnection,
        tool_id: Uuid,
        user_id: Uuid,
        limit: u64,
        offset: u64,
    ) -> AppResult<Vec<Deployment>> {
        // Verify tool ownership
        ToolRepository::find_by_id_and_user(db, tool_id, user_id).await?;

        let models = DeploymentEntity::find()
            .filter(Column::ToolId.eq(tool_id))
            .order_by_desc(Column::Sequence)
            .paginate(db, limit)
            .fetch_page(offset / limit)
            .await?;

        Ok(models.into_iter().map(|m| m.into()).collect())
    }

    /// Active deployment of another tool that already serves `subdomain`
    pub async fn find_active_claim<C>(
        conn: &C,
        subdomain: &str,
        tool_id: Uuid,
    ) -> AppResult<Option<Deployment>>
    where
        C: ConnectionTrait,
    {
        let model = DeploymentEntity::find()
            .filter(Column::Subdomain.eq(subdomain.to_ascii_lowercase()))
            .filter(Column::ToolId.ne(tool_id))
            .filter(Column::Status.eq(DeploymentStatus::Active))
            .one(conn)
            .await?;

        Ok(model.map(Into::into))
    }

    /// Latest successful deployment of a tool created before `before_sequence`
    /// that no rollback has replaced
    pub async fn find_previous<C>(
        conn: &C,
        tool_id: Uuid,
        before_sequence: i32,
    ) -> AppResult<Option<Deployment>>
    where
        C: ConnectionTrait,
    {
        let model = DeploymentEntity::find()
            .filter(Column::ToolId.eq(tool_id))
            .filter(Column::Sequence.lt(before_sequence))
            .filter(Column::Status.eq(DeploymentStatus::Active))
            .filter(Column::RolledBackAt.is_null())
            .order_by_desc(Column::Sequence)
            .one(conn)
            .await?;

        Ok(model.map(Into::into))
    }

    /// Mark every active deployment of a tool newer than `sequence` as
    /// replaced by a rollback
    pub async fn mark_rolled_back<C>(conn: &C, tool_id: Uuid, sequence: i32) -> AppResult<u64>
    where
        C: ConnectionTrait,
    {
        let now = OffsetDateTime::now_utc();
        let result = DeploymentEntity::update_many()
            .col_expr(Column::RolledBackAt, Expr::value(now))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::ToolId.eq(tool_id))
            .filter(Column::Sequence.gt(sequence))
            .filter(Column::Status.eq(DeploymentStatus::Active))
            .filter(Column::RolledBackAt.is_null())
            .exec(conn)
            .await?;

        Ok(result.rows_affected)
    }

    /// Current deployment of every tool: the latest active one not replaced
    /// by a rollback
    pub async fn list_current(db: &DatabaseConnection) -> AppResult<Vec<Deployment>> {
        let models = DeploymentEntity::find()
            .filter(Column::Status.eq(DeploymentStatus::Active))
            .filter(Column::RolledBackAt.is_null())
            .order_by_asc(Column::ToolId)
            .order_by_desc(Column::Sequence)
            .all(db)
            .await?;

        let mut seen = HashSet::new();
        Ok(models
            .into_iter()
            .filter(|m| seen.insert(m.tool_id))
            .map(Into::into)
            .collect())
    }

    /// Record the outcome of a health probe
    pub async fn record_health(
        db: &DatabaseConnection,
        id: Uuid,
        health_status: HealthStatus,
    ) -> AppResult<()> {
        let model = DeploymentEntity::find_by_id(id)
            .one(db)
            .await?
            .ok_or_else(|| AppError::NotFound("Deployment".to_string()))?;

        let now = OffsetDateTime::now_utc();
        let mut active: ActiveModel = model.into();
        active.health_status = Set(health_status);
        active.last_health_check = Set(Some(now));
        active.updated_at = Set(now);
        active.update(db).await?;

        Ok(())
    }

    /// Aggregate counters over the deployment history of one user's tools
    pub async fn stats(db: &DatabaseConnection, user_id: Uuid) -> AppResult<DeploymentStats> {
        let now = OffsetDateTime::now_utc();

        let recent = RecentCounts {
            last_24h: Self::count_since(db, user_id, now - Duration::hours(24)).await?,
            last_7d: Self::count_since(db, user_id, now - Duration::days(7)).await?,
            last_30d: Self::count_since(db, user_id, now - Duration::days(30)).await?,
        };

        Ok(DeploymentStats {
            total: Self::owned_by(user_id).count(db).await?,
            deployed_tools: ToolRepository::count_deployed(db, user_id).await?,
            by_status: Self::count_by(
                db,
                user_id,
                Column::Status,
                DeploymentStatus::iter().map(|s| s.as_str()),
            )
            .await?,
            by_health: Self::count_by(
                db,
                user_id,
                Column::HealthStatus,
                HealthStatus::iter().map(|s| s.as_str()),
            )
            .await?,
            by_ssl: Self::count_by(
                db,
                user_id,
                Column::SslStatus,
                SslStatus::iter().map(|s| s.as_str()),
            )
            .await?,
            by_type: Self::count_by(
                db,
                user_id,
                Column::DeploymentType,
                DeploymentType::iter().map(|t| t.as_str()),
            )
            .await?,
            recent,
        })
    }

    /// Deployments of the tools `user_id` owns
    fn owned_by(user_id: Uuid) -> Select<DeploymentEntity> {
        DeploymentEntity::find().filter(
            Column::ToolId.in_subquery(
                Query::select()
                    .column(ToolColumn::Id)
                    .from(ToolEntity)
                    .and_where(ToolColumn::UserId.eq(user_id))
                    .to_owned(),
            ),
        )
    }

    async fn count_since(
        db: &DatabaseConnection,
        user_id: Uuid,
        since: OffsetDateTime,
    ) -> AppResult<u64> {
        let count = Self::owned_by(user_id)
            .filter(Column::CreatedAt.gte(since))
            .count(db)
            .await?;

        Ok(count)
    }

    /// Group counts by a string-valued column, zero-filling every known key
    async fn count_by(
        db: &DatabaseConnection,
        user_id: Uuid,
        column: Column,
        keys: impl Iterator<Item = &'static str>,
    ) -> AppResult<BTreeMap<String, u64>> {
        let mut counts: BTreeMap<String, u64> = keys.map(|k| (k.to_string(), 0)).collect();

        let rows: Vec<(String, i64)> = Self::owned_by(user_id)
            .select_only()
            .column(column)
            .column_as(Expr::col(Column::Id).count(), "count")
            .group_by(column)
            .into_tuple()
            .all(db)
            .await?;

        for (key, count) in rows {
            counts.insert(key, count.max(0) as u64);
        }

        Ok(counts)
    }
}

fn journal_to_json(entries: &[DeploymentLogEntry]) -> AppResult<serde_json::Value> {
    serde_json::to_value(entries)
        .map_err(|e| AppError::Internal(format!("Failed to serialize deployment log: {}", e)))
}

fn journal_from_json(value: &serde_json::Value) -> Vec<DeploymentLogEntry> {
    serde_json::from_value(value.clone()).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Unreadable deployment log, starting a new one");
        Vec::new()
    })
}

// Conversion from SeaORM model to our domain model
impl From<deployment::Model> for Deployment {
    fn from(m: deployment::Model) -> Self {
        Self {
            deployment_log: journal_from_json(&m.deployment_log),
            id: m.id,
            tool_id: m.tool_id,
            version: m.version,
            sequence: m.sequence,
            subdomain: m.subdomain,
            deployment_type: m.deployment_type,
            status: m.status,
            ssl_status: m.ssl_status,
            health_status: m.health_status,
            health_check_url: m.health_check_url,
            proxy_config: m.proxy_config,
            rollback_version: m.rollback_version,
            error_message: m.error_message,
            last_health_check: m.last_health_check,
            created_at: m.created_at,
            updated_at: m.updated_at,
            completed_at: m.completed_at,
            rolled_back_at: m.rolled_back_at,
        }
    }
}
