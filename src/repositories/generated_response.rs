//! Generated response repository
//!
//! Writes that must land together with a review update take a
//! `ConnectionTrait` so callers can pass a transaction.

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter, Set,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::ServiceError;
use crate::models::generated_response::{
    self, ActiveModel, ApprovalStatus, Entity as GeneratedResponse,
};

pub const MAX_RESPONSE_TEXT_LEN: usize = 4096;

/// Non-empty and within the length cap.
pub fn validate_response_text(text: &str) -> Result<&str, ServiceError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ServiceError::invalid_input(
            "response_text",
            "must not be empty",
        ));
    }
    if text.chars().count() > MAX_RESPONSE_TEXT_LEN {
        return Err(ServiceError::invalid_input(
            "response_text",
            format!("must be at most {MAX_RESPONSE_TEXT_LEN} characters"),
        ));
    }
    Ok(text)
}

#[derive(Debug, Clone)]
pub struct GeneratedResponseRepository {
    db: Arc<DatabaseConnection>,
}

impl GeneratedResponseRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<generated_response::Model>, DbErr> {
        GeneratedResponse::find_by_id(id).one(&*self.db).await
    }

    pub async fn get(&self, id: Uuid) -> Result<generated_response::Model, ServiceError> {
        self.find_by_id(id)
            .await?
            .ok_or(ServiceError::NotFound("Response"))
    }

    pub async fn find_by_review(
        &self,
        review_id: Uuid,
    ) -> Result<Option<generated_response::Model>, DbErr> {
        GeneratedResponse::find()
            .filter(generated_response::Column::ReviewId.eq(review_id))
            .one(&*self.db)
            .await
    }

    /// Inserts a `pending` draft for a review.
    pub async fn insert<C: ConnectionTrait>(
        conn: &C,
        review_id: Uuid,
        response_text: &str,
        ai_model_used: Option<&str>,
    ) -> Result<generated_response::Model, DbErr> {
        let now = Utc::now();
        ActiveModel {
            id: Set(Uuid::new_v4()),
            review_id: Set(review_id),
            response_text: Set(response_text.to_string()),
            approval_status: Set(ApprovalStatus::Pending),
            ai_model_used: Set(ai_model_used.map(str::to_string)),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        }
        .insert(conn)
        .await
    }

    pub async fn delete<C: ConnectionTrait>(conn: &C, id: Uuid) -> Result<u64, DbErr> {
        let result = GeneratedResponse::delete_by_id(id).exec(conn).await?;
        Ok(result.rows_affected)
    }

    pub async fn set_status(
        &self,
        response: generated_response::Model,
        status: ApprovalStatus,
    ) -> Result<generated_response::Model, DbErr> {
        let mut active: ActiveModel = response.into();
        active.approval_status = Set(status);
        active.updated_at = Set(Utc::now().into());
        active.update(&*self.db).await
    }

    /// Replaces the text and resets approval to `pending`.
    pub async fn set_text(
        &self,
        response: generated_response::Model,
        response_text: &str,
    ) -> Result<generated_response::Model, DbErr> {
        let mut active: ActiveModel = response.into();
        active.response_text = Set(response_text.to_string());
        active.approval_status = Set(ApprovalStatus::Pending);
        active.updated_at = Set(Utc::now().into());
        active.update(&*self.db).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_response_text() {
        assert_eq!(validate_response_text("  Thanks!  ").unwrap(), "Thanks!");
        assert!(validate_response_text("   ").is_err());
        assert!(validate_response_text(&"a".repeat(MAX_RESPONSE_TEXT_LEN)).is_ok());
        assert!(validate_response_text(&"a".repeat(MAX_RESPONSE_TEXT_LEN + 1)).is_err());
    }
}
