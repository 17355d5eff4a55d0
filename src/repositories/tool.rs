use async_trait::async_trait;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set,
};
use uuid::Uuid;

use crate::entity::deployment::{Column as DeploymentColumn, Entity as DeploymentEntity};
use crate::entity::tool::{self, ActiveModel, Column, Entity as ToolEntity};
use crate::error::{AppError, AppResult};
use crate::models::{CreateTool, Tool};
use crate::repositories::Repository;

/// Tool repository for database operations
pub struct ToolRepository;

#[async_trait]
impl Repository<Tool> for ToolRepository {
    async fn find_by_id(db: &DatabaseConnection, id: Uuid) -> AppResult<Tool> {
        let model = ToolEntity::find_by_id(id)
            .one(db)
            .await?
            .ok_or_else(|| AppError::NotFound("Tool".to_string()))?;

        Ok(model.into())
    }

    async fn list(db: &DatabaseConnection, limit: u64, offset: u64) -> AppResult<Vec<Tool>> {
        let models = ToolEntity::find()
            .order_by_desc(Column::CreatedAt)
            .paginate(db, limit)
            .fetch_page(offset / limit)
            .await?;

        Ok(models.into_iter().map(|m| m.into()).collect())
    }

    async fn count(db: &DatabaseConnection) -> AppResult<u64> {
        let count = ToolEntity::find().count(db).await?;
        Ok(count)
    }
}

impl ToolRepository {
    /// Create a new tool (not yet deployed, no subdomain)
    pub async fn create(
        db: &DatabaseConnection,
        user_id: Uuid,
        input: &CreateTool,
    ) -> AppResult<Tool> {
        let now = time::OffsetDateTime::now_utc();
        let model = ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            name: Set(input.name.clone()),
            description: Set(input.description.clone()),
            definition: Set(input.definition.clone()),
            subdomain: Set(None),
            deployed: Set(false),
            enabled: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let result = model.insert(db).await?;
        Ok(result.into())
    }

    /// Find tool by ID and verify ownership
    pub async fn find_by_id_and_user(
        db: &DatabaseConnection,
        id: Uuid,
        user_id: Uuid,
    ) -> AppResult<Tool> {
        let model = ToolEntity::find_by_id(id)
            .filter(Column::UserId.eq(user_id))
            .one(db)
            .await?
            .ok_or_else(|| AppError::NotFound("Tool".to_string()))?;

        Ok(model.into())
    }

    /// Load a tool holding a row lock until the surrounding transaction ends
    pub async fn find_for_update<C>(conn: &C, id: Uuid) -> AppResult<Tool>
    where
        C: ConnectionTrait,
    {
        let model = ToolEntity::find_by_id(id)
            .lock_exclusive()
            .one(conn)
            .await?
            .ok_or_else(|| AppError::NotFound("Tool".to_string()))?;

        Ok(model.into())
    }

    /// Whether a subdomain is held by any tool other than `tool_id`,
    /// either as its current subdomain or through its deployment history
    pub async fn subdomain_taken<C>(conn: &C, subdomain: &str, tool_id: Uuid) -> AppResult<bool>
    where
        C: ConnectionTrait,
    {
        let subdomain = subdomain.to_ascii_lowercase();

        let tools = ToolEntity::find()
            .filter(Column::Subdomain.eq(subdomain.as_str()))
            .filter(Column::Id.ne(tool_id))
            .count(conn)
            .await?;
        if tools > 0 {
            return Ok(true);
        }

        let deployments = DeploymentEntity::find()
            .filter(DeploymentColumn::Subdomain.eq(subdomain.as_str()))
            .filter(DeploymentColumn::ToolId.ne(tool_id))
            .count(conn)
            .await?;

        Ok(deployments > 0)
    }

    /// Persist the subdomain allocated for a tool
    pub async fn assign_subdomain<C>(conn: &C, id: Uuid, subdomain: &str) -> AppResult<Tool>
    where
        C: ConnectionTrait,
    {
        let model = ToolEntity::find_by_id(id)
            .one(conn)
            .await?
            .ok_or_else(|| AppError::NotFound("Tool".to_string()))?;

        let mut active: ActiveModel = model.into();
        active.subdomain = Set(Some(subdomain.to_string()));
        active.updated_at = Set(time::OffsetDateTime::now_utc());

        let result = active.update(conn).await?;
        Ok(result.into())
    }

    /// Flag a tool as having at least one successful deployment
    pub async fn mark_deployed<C>(conn: &C, id: Uuid) -> AppResult<()>
    where
        C: ConnectionTrait,
    {
        let model = ToolEntity::find_by_id(id)
            .one(conn)
            .await?
            .ok_or_else(|| AppError::NotFound("Tool".to_string()))?;

        if model.deployed {
            return Ok(());
        }

        let mut active: ActiveModel = model.into();
        active.deployed = Set(true);
        active.updated_at = Set(time::OffsetDateTime::now_utc());
        active.update(conn).await?;

        Ok(())
    }

    /// Count tools that have been deployed at least once
    pub async fn count_deployed(db: &DatabaseConnection, user_id: Uuid) -> AppResult<u64> {
        let count = ToolEntity::find()
            .filter(Column::UserId.eq(user_id))
            .filter(Column::Deployed.eq(true))
            .count(db)
            .await?;

        Ok(count)
    }
}

// Conversion from SeaORM model to our domain model
impl From<tool::Model> for Tool {
    fn from(m: tool::Model) -> Self {
        Self {
            id: m.id,
            user_id: m.user_id,
            name: m.name,
            description: m.description,
            definition: m.definition,
            subdomain: m.subdomain,
            deployed: m.deployed,
            enabled: m.enabled,
            created_at: m.created_at,
            updated_at: m.updated_at,
        }
    }
}
