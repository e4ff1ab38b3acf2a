//! Business repository
//!
//! Every tenant-scoped operation starts by proving the caller owns the
//! business it names; [`BusinessRepository::get_owned`] is that check.

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder,
    Set,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::ServiceError;
use crate::models::business::{self, ActiveModel, Entity as Business};

pub const MAX_BUSINESS_NAME_LEN: usize = 200;

#[derive(Debug, Clone)]
pub struct BusinessRepository {
    db: Arc<DatabaseConnection>,
}

impl BusinessRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn create(&self, user_id: Uuid, name: &str) -> Result<business::Model, ServiceError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ServiceError::invalid_input("name", "must not be empty"));
        }
        if name.chars().count() > MAX_BUSINESS_NAME_LEN {
            return Err(ServiceError::invalid_input(
                "name",
                format!("must be at most {MAX_BUSINESS_NAME_LEN} characters"),
            ));
        }

        let now = Utc::now();
        let model = ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            name: Set(name.to_string()),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        }
        .insert(&*self.db)
        .await?;
        Ok(model)
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<business::Model>, DbErr> {
        Business::find_by_id(id).one(&*self.db).await
    }

    /// Loads a business and checks it belongs to `user_id`.
    pub async fn get_owned(
        &self,
        id: Uuid,
        user_id: Uuid,
    ) -> Result<business::Model, ServiceError> {
        let business = self
            .find_by_id(id)
            .await?
            .ok_or(ServiceError::NotFound("Business"))?;
        if business.user_id != user_id {
            return Err(ServiceError::access_denied());
        }
        Ok(business)
    }

    pub async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<business::Model>, DbErr> {
        Business::find()
            .filter(business::Column::UserId.eq(user_id))
            .order_by_asc(business::Column::CreatedAt)
            .order_by_asc(business::Column::Id)
            .all(&*self.db)
            .await
    }
}
