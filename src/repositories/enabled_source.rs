//! Enabled source repository

use chrono::Utc;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder, Set,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::enabled_source::{self, ActiveModel, Entity as EnabledSource};

#[derive(Debug, Clone)]
pub struct EnabledSourceRepository {
    db: Arc<DatabaseConnection>,
}

impl EnabledSourceRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn find(
        &self,
        business_id: Uuid,
        source_id: Uuid,
    ) -> Result<Option<enabled_source::Model>, DbErr> {
        EnabledSource::find()
            .filter(enabled_source::Column::BusinessId.eq(business_id))
            .filter(enabled_source::Column::SourceId.eq(source_id))
            .one(&*self.db)
            .await
    }

    pub async fn list_for_business(
        &self,
        business_id: Uuid,
    ) -> Result<Vec<enabled_source::Model>, DbErr> {
        EnabledSource::find()
            .filter(enabled_source::Column::BusinessId.eq(business_id))
            .order_by_asc(enabled_source::Column::CreatedAt)
            .all(&*self.db)
            .await
    }

    /// Enables a source for a business, or updates its location if already enabled.
    pub async fn enable(
        &self,
        business_id: Uuid,
        source_id: Uuid,
        user_id: Uuid,
        location_id: Option<String>,
    ) -> Result<enabled_source::Model, DbErr> {
        let now = Utc::now();
        let location_id = location_id
            .map(|location| location.trim().to_string())
            .filter(|location| !location.is_empty());

        let row = ActiveModel {
            id: Set(Uuid::new_v4()),
            business_id: Set(business_id),
            source_id: Set(source_id),
            user_id: Set(user_id),
            location_id: Set(location_id),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };

        EnabledSource::insert(row)
            .on_conflict(
                OnConflict::columns([
                    enabled_source::Column::BusinessId,
                    enabled_source::Column::SourceId,
                ])
                .update_columns([
                    enabled_source::Column::LocationId,
                    enabled_source::Column::UpdatedAt,
                ])
                .to_owned(),
            )
            .exec_without_returning(&*self.db)
            .await?;

        self.find(business_id, source_id)
            .await?
            .ok_or_else(|| DbErr::RecordNotFound("enabled source".to_string()))
    }

    /// Returns whether a row was removed.
    pub async fn disable(&self, business_id: Uuid, source_id: Uuid) -> Result<bool, DbErr> {
        let result = EnabledSource::delete_many()
            .filter(enabled_source::Column::BusinessId.eq(business_id))
            .filter(enabled_source::Column::SourceId.eq(source_id))
            .exec(&*self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }
}
