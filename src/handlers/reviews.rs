//! # Review Handlers
//!
//! Pulling reviews from a connected platform, entering reviews by hand and
//! listing what has been stored.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::{CallerExtension, UserHeader};
use crate::error::{ApiError, ServiceError};
use crate::ingestion::SyncSummary;
use crate::models::review::{self, ReviewStatus, Sentiment};
use crate::repositories::review::{InsertOutcome, NewReview, ReviewFilter};
use crate::server::AppState;
use crate::session::{SESSION_ID_HEADER, sanitize_session_id};

/// Platform label stored on reviews entered by hand.
pub const MANUAL_PLATFORM: &str = "Manual";

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ReviewInfo {
    pub id: Uuid,
    pub business_id: Uuid,
    pub source_id: Option<Uuid>,
    pub source_platform: String,
    /// Present only for reviews pulled from a provider
    pub external_review_id: Option<String>,
    pub reviewer_name: String,
    #[schema(minimum = 1, maximum = 5, example = 5)]
    pub rating: i32,
    pub review_text: String,
    pub review_date: DateTime<Utc>,
    pub sentiment: Option<Sentiment>,
    pub status: ReviewStatus,
    pub created_at: DateTime<Utc>,
}

impl From<review::Model> for ReviewInfo {
    fn from(model: review::Model) -> Self {
        Self {
            id: model.id,
            business_id: model.business_id,
            source_id: model.source_id,
            source_platform: model.source_platform,
            external_review_id: model.external_review_id,
            reviewer_name: model.reviewer_name,
            rating: model.rating,
            review_text: model.review_text,
            review_date: model.review_date.with_timezone(&Utc),
            sentiment: model.sentiment,
            status: model.status,
            created_at: model.created_at.with_timezone(&Utc),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SyncResponse {
    pub message: String,
    pub summary: SyncSummary,
}

fn sync_message(summary: &SyncSummary) -> String {
    match summary.new_reviews {
        0 => format!(
            "No new reviews ({} already stored)",
            summary.total_fetched
        ),
        1 => "Synced 1 new review".to_string(),
        n => format!("Synced {n} new reviews"),
    }
}

/// Pulls reviews from a connected source
///
/// Callers that send `X-Session-Id` are held to one sync per source per
/// cooldown window.
#[utoipa::path(
    post,
    path = "/businesses/{business_id}/sources/{source_id}/sync",
    security(("bearer_auth" = [])),
    params(
        ("business_id" = Uuid, Path, description = "Business identifier"),
        ("source_id" = Uuid, Path, description = "Source identifier"),
        ("X-Session-Id" = Option<String>, Header, description = "Browser session used for the sync cooldown"),
        UserHeader
    ),
    responses(
        (status = 200, description = "Sync finished", body = SyncResponse),
        (status = 400, description = "Source cannot be synced", body = ApiError),
        (status = 401, description = "Stored token could not be refreshed", body = ApiError),
        (status = 403, description = "Business belongs to another user", body = ApiError),
        (status = 409, description = "Source not connected or location not configured", body = ApiError),
        (status = 429, description = "Sync cooling down or provider rate limit", body = ApiError),
        (status = 502, description = "Provider error", body = ApiError)
    ),
    tag = "reviews"
)]
pub async fn sync_reviews(
    State(state): State<AppState>,
    caller: CallerExtension,
    Path((business_id, source_id)): Path<(Uuid, Uuid)>,
    headers: HeaderMap,
) -> Result<Json<SyncResponse>, ApiError> {
    let session_id = headers
        .get(SESSION_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(sanitize_session_id)
        .map(str::to_string);

    if let Some(session_id) = session_id.as_deref() {
        if let Err(active) = state.sessions.try_acquire(session_id, source_id).await {
            tracing::debug!(source_id = %source_id, remaining = ?active.remaining, "Sync throttled");
            return Err(ServiceError::RateLimited {
                retry_after: Some(active.retry_after_secs()),
            }
            .into());
        }
    }

    let summary = match state
        .ingestion()
        .sync(caller.user_id(), business_id, source_id)
        .await
    {
        Ok(summary) => summary,
        Err(err) => {
            // A failed sync does not start the cooldown.
            if let Some(session_id) = session_id.as_deref() {
                state.sessions.release(session_id, source_id).await;
            }
            return Err(err.into());
        }
    };

    Ok(Json(SyncResponse {
        message: sync_message(&summary),
        summary,
    }))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateReviewRequest {
    pub reviewer_name: String,
    #[schema(minimum = 1, maximum = 5, example = 4)]
    pub rating: i32,
    #[serde(default)]
    pub review_text: String,
    /// Defaults to now
    #[serde(default)]
    pub review_date: Option<DateTime<Utc>>,
    /// Defaults to "Manual"
    #[serde(default)]
    pub source_platform: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ReviewResponse {
    pub message: String,
    pub review: ReviewInfo,
}

/// Adds a review by hand
#[utoipa::path(
    post,
    path = "/businesses/{business_id}/reviews",
    security(("bearer_auth" = [])),
    params(
        ("business_id" = Uuid, Path, description = "Business identifier"),
        UserHeader
    ),
    request_body = CreateReviewRequest,
    responses(
        (status = 201, description = "Review stored", body = ReviewResponse),
        (status = 400, description = "Invalid rating or text", body = ApiError),
        (status = 403, description = "Business belongs to another user", body = ApiError),
        (status = 404, description = "Business not found", body = ApiError)
    ),
    tag = "reviews"
)]
pub async fn create_review(
    State(state): State<AppState>,
    caller: CallerExtension,
    Path(business_id): Path<Uuid>,
    Json(request): Json<CreateReviewRequest>,
) -> Result<(StatusCode, Json<ReviewResponse>), ApiError> {
    let user_id = caller.user_id();
    state.businesses().get_owned(business_id, user_id).await?;

    let source_platform = request
        .source_platform
        .map(|platform| platform.trim().to_string())
        .filter(|platform| !platform.is_empty())
        .unwrap_or_else(|| MANUAL_PLATFORM.to_string());

    let new_review = NewReview {
        business_id,
        user_id,
        source_id: None,
        source_platform,
        external_review_id: None,
        reviewer_name: request.reviewer_name.trim().to_string(),
        rating: request.rating,
        review_text: request.review_text,
        review_date: request.review_date.unwrap_or_else(Utc::now),
    };
    new_review.validate()?;

    let review = match state.reviews().insert(new_review).await? {
        InsertOutcome::Inserted(review) => review,
        InsertOutcome::Duplicate => {
            return Err(ServiceError::Conflict("Review already exists".to_string()).into());
        }
    };

    tracing::info!(review_id = %review.id, business_id = %business_id, "Manual review added");

    Ok((
        StatusCode::CREATED,
        Json(ReviewResponse {
            message: "Review added".to_string(),
            review: review.into(),
        }),
    ))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ReviewsResponse {
    pub reviews: Vec<ReviewInfo>,
}

/// Lists the caller's reviews, newest first
#[utoipa::path(
    get,
    path = "/reviews",
    security(("bearer_auth" = [])),
    params(UserHeader, ReviewFilter),
    responses(
        (status = 200, description = "Matching reviews", body = ReviewsResponse),
        (status = 401, description = "Missing or invalid authorization", body = ApiError)
    ),
    tag = "reviews"
)]
pub async fn list_reviews(
    State(state): State<AppState>,
    caller: CallerExtension,
    Query(filter): Query<ReviewFilter>,
) -> Result<Json<ReviewsResponse>, ApiError> {
    let reviews = state.reviews().list(caller.user_id(), &filter).await?;
    Ok(Json(ReviewsResponse {
        reviews: reviews.into_iter().map(ReviewInfo::from).collect(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_message() {
        let none = SyncSummary {
            total_fetched: 3,
            new_reviews: 0,
        };
        assert_eq!(sync_message(&none), "No new reviews (3 already stored)");

        let one = SyncSummary {
            total_fetched: 3,
            new_reviews: 1,
        };
        assert_eq!(sync_message(&one), "Synced 1 new review");

        let many = SyncSummary {
            total_fetched: 7,
            new_reviews: 7,
        };
        assert_eq!(sync_message(&many), "Synced 7 new reviews");
    }
}
