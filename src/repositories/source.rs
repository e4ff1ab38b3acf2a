//! Source catalog repository

use chrono::Utc;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder, Set,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::connectors::metadata::SourceKind;
use crate::error::ServiceError;
use crate::models::source::{self, ActiveModel, Entity as Source};

#[derive(Debug, Clone)]
pub struct SourceRepository {
    db: Arc<DatabaseConnection>,
}

impl SourceRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// All catalog rows, sorted by display name.
    pub async fn list_all(&self) -> Result<Vec<source::Model>, DbErr> {
        Source::find()
            .order_by_asc(source::Column::DisplayName)
            .all(&*self.db)
            .await
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<source::Model>, DbErr> {
        Source::find_by_id(id).one(&*self.db).await
    }

    pub async fn find_by_kind(&self, kind: SourceKind) -> Result<Option<source::Model>, DbErr> {
        Source::find()
            .filter(source::Column::Name.eq(kind.slug()))
            .one(&*self.db)
            .await
    }

    /// Loads a catalog row together with its typed kind.
    pub async fn get_with_kind(
        &self,
        id: Uuid,
    ) -> Result<(source::Model, SourceKind), ServiceError> {
        let source = self
            .find_by_id(id)
            .await?
            .ok_or(ServiceError::NotFound("Source"))?;
        let kind = source
            .kind()
            .ok_or_else(|| ServiceError::SourceUnsupported(source.display_name.clone()))?;
        Ok((source, kind))
    }

    /// Inserts the catalog row for `kind`, refreshing its labels if it exists.
    pub async fn upsert_kind(&self, kind: SourceKind) -> Result<source::Model, DbErr> {
        let now = Utc::now();
        let row = ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(kind.slug().to_string()),
            display_name: Set(kind.display_name().to_string()),
            icon: Set(Some(kind.icon().to_string())),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };

        Source::insert(row)
            .on_conflict(
                OnConflict::column(source::Column::Name)
                    .update_columns([
                        source::Column::DisplayName,
                        source::Column::Icon,
                        source::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(&*self.db)
            .await?;

        self.find_by_kind(kind)
            .await?
            .ok_or_else(|| DbErr::RecordNotFound(format!("source '{}'", kind.slug())))
    }
}
