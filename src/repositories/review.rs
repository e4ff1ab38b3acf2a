//! Review repository

use chrono::{DateTime, Utc};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set,
};
use serde::Deserialize;
use std::sync::Arc;
use utoipa::IntoParams;
use uuid::Uuid;

use crate::error::{ServiceError, is_unique_violation};
use crate::models::review::{self, ActiveModel, Entity as Review, ReviewStatus, Sentiment};

pub const MAX_REVIEWER_NAME_LEN: usize = 200;
pub const MAX_REVIEW_TEXT_LEN: usize = 5000;
const DEFAULT_LIST_LIMIT: u64 = 100;
const MAX_LIST_LIMIT: u64 = 500;

/// A review ready to be stored.
#[derive(Debug, Clone)]
pub struct NewReview {
    pub business_id: Uuid,
    pub user_id: Uuid,
    pub source_id: Option<Uuid>,
    pub source_platform: String,
    pub external_review_id: Option<String>,
    pub reviewer_name: String,
    pub rating: i32,
    pub review_text: String,
    pub review_date: DateTime<Utc>,
}

impl NewReview {
    /// Checks the rating range and text length caps.
    pub fn validate(&self) -> Result<(), ServiceError> {
        if !(1..=5).contains(&self.rating) {
            return Err(ServiceError::invalid_input("rating", "must be between 1 and 5"));
        }
        if self.reviewer_name.trim().is_empty() {
            return Err(ServiceError::invalid_input(
                "reviewer_name",
                "must not be empty",
            ));
        }
        if self.reviewer_name.chars().count() > MAX_REVIEWER_NAME_LEN {
            return Err(ServiceError::invalid_input(
                "reviewer_name",
                format!("must be at most {MAX_REVIEWER_NAME_LEN} characters"),
            ));
        }
        if self.review_text.chars().count() > MAX_REVIEW_TEXT_LEN {
            return Err(ServiceError::invalid_input(
                "review_text",
                format!("must be at most {MAX_REVIEW_TEXT_LEN} characters"),
            ));
        }
        Ok(())
    }
}

#[derive(Debug)]
pub enum InsertOutcome {
    Inserted(review::Model),
    /// The (business, source, external id) triple is already stored
    Duplicate,
}

/// Query filters for listing reviews.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ReviewFilter {
    pub business_id: Option<Uuid>,
    pub source_id: Option<Uuid>,
    pub rating: Option<i32>,
    pub sentiment: Option<Sentiment>,
    pub status: Option<ReviewStatus>,
    /// Page size (default 100, max 500)
    pub limit: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct ReviewRepository {
    db: Arc<DatabaseConnection>,
}

impl ReviewRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<review::Model>, DbErr> {
        Review::find_by_id(id).one(&*self.db).await
    }

    pub async fn get(&self, id: Uuid) -> Result<review::Model, ServiceError> {
        self.find_by_id(id)
            .await?
            .ok_or(ServiceError::NotFound("Review"))
    }

    pub async fn exists_external(
        &self,
        business_id: Uuid,
        source_id: Uuid,
        external_review_id: &str,
    ) -> Result<bool, DbErr> {
        let count = Review::find()
            .filter(review::Column::BusinessId.eq(business_id))
            .filter(review::Column::SourceId.eq(source_id))
            .filter(review::Column::ExternalReviewId.eq(external_review_id))
            .count(&*self.db)
            .await?;
        Ok(count > 0)
    }

    /// Inserts a review with `status=pending` and no sentiment.
    ///
    /// A unique violation on the external id triple is reported as
    /// [`InsertOutcome::Duplicate`] rather than an error.
    pub async fn insert(&self, new: NewReview) -> Result<InsertOutcome, DbErr> {
        let now = Utc::now();
        let row = ActiveModel {
            id: Set(Uuid::new_v4()),
            business_id: Set(new.business_id),
            user_id: Set(new.user_id),
            source_id: Set(new.source_id),
            source_platform: Set(new.source_platform),
            external_review_id: Set(new.external_review_id),
            reviewer_name: Set(new.reviewer_name),
            rating: Set(new.rating),
            review_text: Set(new.review_text),
            review_date: Set(new.review_date.into()),
            sentiment: Set(None),
            status: Set(ReviewStatus::Pending),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };

        match row.insert(&*self.db).await {
            Ok(model) => Ok(InsertOutcome::Inserted(model)),
            Err(err) if is_unique_violation(&err) => Ok(InsertOutcome::Duplicate),
            Err(err) => Err(err),
        }
    }

    /// Lists reviews owned by `user_id`, newest first.
    pub async fn list(
        &self,
        user_id: Uuid,
        filter: &ReviewFilter,
    ) -> Result<Vec<review::Model>, DbErr> {
        let mut query = Review::find().filter(review::Column::UserId.eq(user_id));
        if let Some(business_id) = filter.business_id {
            query = query.filter(review::Column::BusinessId.eq(business_id));
        }
        if let Some(source_id) = filter.source_id {
            query = query.filter(review::Column::SourceId.eq(source_id));
        }
        if let Some(rating) = filter.rating {
            query = query.filter(review::Column::Rating.eq(rating));
        }
        if let Some(sentiment) = filter.sentiment {
            query = query.filter(review::Column::Sentiment.eq(sentiment));
        }
        if let Some(status) = filter.status {
            query = query.filter(review::Column::Status.eq(status));
        }

        let limit = filter
            .limit
            .unwrap_or(DEFAULT_LIST_LIMIT)
            .clamp(1, MAX_LIST_LIMIT);

        query
            .order_by_desc(review::Column::ReviewDate)
            .order_by_desc(review::Column::Id)
            .limit(limit)
            .all(&*self.db)
            .await
    }

    pub async fn set_status(
        &self,
        review: review::Model,
        status: ReviewStatus,
    ) -> Result<review::Model, DbErr> {
        let mut active: ActiveModel = review.into();
        active.status = Set(status);
        active.updated_at = Set(Utc::now().into());
        active.update(&*self.db).await
    }

    /// Records an analysis result; runs inside the caller's transaction.
    pub async fn record_analysis<C: ConnectionTrait>(
        conn: &C,
        review: review::Model,
        sentiment: Sentiment,
    ) -> Result<review::Model, DbErr> {
        let mut active: ActiveModel = review.into();
        active.sentiment = Set(Some(sentiment));
        active.status = Set(ReviewStatus::Responded);
        active.updated_at = Set(DateTimeWithTimeZone::from(Utc::now()));
        active.update(conn).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn review() -> NewReview {
        NewReview {
            business_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            source_id: None,
            source_platform: "Manual".to_string(),
            external_review_id: None,
            reviewer_name: "Jane".to_string(),
            rating: 5,
            review_text: "Great!".to_string(),
            review_date: Utc::now(),
        }
    }

    #[test]
    fn test_new_review_validation() {
        assert!(review().validate().is_ok());

        let mut bad = review();
        bad.rating = 6;
        assert!(matches!(
            bad.validate(),
            Err(ServiceError::InvalidInput { .. })
        ));

        let mut bad = review();
        bad.reviewer_name = "x".repeat(MAX_REVIEWER_NAME_LEN + 1);
        assert!(bad.validate().is_err());

        let mut bad = review();
        bad.review_text = "x".repeat(MAX_REVIEW_TEXT_LEN + 1);
        assert!(bad.validate().is_err());
    }
}
