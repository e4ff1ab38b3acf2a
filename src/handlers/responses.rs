//! # Response Handlers
//!
//! Drafting, editing and approving replies to reviews.

use axum::{
    extract::{Path, State, rejection::JsonRejection},
    response::Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::{CallerExtension, UserHeader};
use crate::error::ApiError;
use crate::handlers::reviews::ReviewInfo;
use crate::models::generated_response::{self, ApprovalStatus};
use crate::responses::{PostingOutcome, sentiment_label};
use crate::server::AppState;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ResponseInfo {
    pub id: Uuid,
    pub review_id: Uuid,
    pub response_text: String,
    pub approval_status: ApprovalStatus,
    pub ai_model_used: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<generated_response::Model> for ResponseInfo {
    fn from(model: generated_response::Model) -> Self {
        Self {
            id: model.id,
            review_id: model.review_id,
            response_text: model.response_text,
            approval_status: model.approval_status,
            ai_model_used: model.ai_model_used,
            created_at: model.created_at.with_timezone(&Utc),
            updated_at: model.updated_at.with_timezone(&Utc),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ResponseEnvelope {
    pub message: String,
    pub response: ResponseInfo,
}

impl ResponseEnvelope {
    fn new(message: &str, response: generated_response::Model) -> Self {
        Self {
            message: message.to_string(),
            response: response.into(),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AnalyzeResponse {
    pub message: String,
    pub review: ReviewInfo,
    pub response: ResponseInfo,
}

/// Classifies a review and drafts a reply
#[utoipa::path(
    post,
    path = "/reviews/{review_id}/analyze",
    security(("bearer_auth" = [])),
    params(
        ("review_id" = Uuid, Path, description = "Review identifier"),
        UserHeader
    ),
    responses(
        (status = 200, description = "Sentiment stored and reply drafted", body = AnalyzeResponse),
        (status = 400, description = "Review has no text", body = ApiError),
        (status = 403, description = "Review belongs to another user", body = ApiError),
        (status = 404, description = "Review not found", body = ApiError),
        (status = 409, description = "Review already has a reply", body = ApiError),
        (status = 502, description = "Language model failed", body = ApiError)
    ),
    tag = "responses"
)]
pub async fn analyze_review(
    State(state): State<AppState>,
    caller: CallerExtension,
    Path(review_id): Path<Uuid>,
) -> Result<Json<AnalyzeResponse>, ApiError> {
    let outcome = state.lifecycle().analyze(caller.user_id(), review_id).await?;
    let message = format!(
        "Review analyzed as {}; reply drafted",
        sentiment_label(outcome.review.sentiment)
    );
    Ok(Json(AnalyzeResponse {
        message,
        review: outcome.review.into(),
        response: outcome.response.into(),
    }))
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct RegenerateRequest {
    /// Reply to replace; the review's current reply when omitted
    #[serde(default)]
    pub response_id: Option<Uuid>,
}

/// Rejects the current reply and drafts a new one
#[utoipa::path(
    post,
    path = "/reviews/{review_id}/regenerate",
    security(("bearer_auth" = [])),
    params(
        ("review_id" = Uuid, Path, description = "Review identifier"),
        UserHeader
    ),
    request_body = RegenerateRequest,
    responses(
        (status = 200, description = "New reply drafted", body = ResponseEnvelope),
        (status = 403, description = "Review belongs to another user", body = ApiError),
        (status = 404, description = "Review or reply not found", body = ApiError),
        (status = 409, description = "Reply cannot be replaced", body = ApiError),
        (status = 502, description = "Language model failed", body = ApiError)
    ),
    tag = "responses"
)]
pub async fn regenerate_response(
    State(state): State<AppState>,
    caller: CallerExtension,
    Path(review_id): Path<Uuid>,
    payload: Result<Json<RegenerateRequest>, JsonRejection>,
) -> Result<Json<ResponseEnvelope>, ApiError> {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(JsonRejection::MissingJsonContentType(_)) => RegenerateRequest::default(),
        Err(rejection) => return Err(rejection.into()),
    };

    let response = state
        .lifecycle()
        .regenerate(caller.user_id(), review_id, request.response_id)
        .await?;
    Ok(Json(ResponseEnvelope::new("Reply regenerated", response)))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct EditResponseRequest {
    pub response_text: String,
}

/// Replaces the text of a reply
///
/// Editing sends an approved reply back to pending.
#[utoipa::path(
    put,
    path = "/responses/{response_id}",
    security(("bearer_auth" = [])),
    params(
        ("response_id" = Uuid, Path, description = "Reply identifier"),
        UserHeader
    ),
    request_body = EditResponseRequest,
    responses(
        (status = 200, description = "Reply updated", body = ResponseEnvelope),
        (status = 400, description = "Empty reply text", body = ApiError),
        (status = 403, description = "Reply belongs to another user", body = ApiError),
        (status = 404, description = "Reply not found", body = ApiError)
    ),
    tag = "responses"
)]
pub async fn edit_response(
    State(state): State<AppState>,
    caller: CallerExtension,
    Path(response_id): Path<Uuid>,
    Json(request): Json<EditResponseRequest>,
) -> Result<Json<ResponseEnvelope>, ApiError> {
    let response = state
        .lifecycle()
        .edit(caller.user_id(), response_id, &request.response_text)
        .await?;
    Ok(Json(ResponseEnvelope::new("Reply updated", response)))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ApproveResponse {
    pub message: String,
    pub response: ResponseInfo,
    pub posting: PostingOutcome,
}

fn approve_message(posting: &PostingOutcome) -> &'static str {
    match posting {
        PostingOutcome::Posted => "Reply approved and posted",
        PostingOutcome::Skipped { .. } => "Reply approved",
        PostingOutcome::Failed { .. } => "Reply approved but could not be posted",
    }
}

/// Approves a reply and posts it when the platform allows
///
/// A failed post does not undo the approval; `posting` reports what
/// happened.
#[utoipa::path(
    post,
    path = "/responses/{response_id}/approve",
    security(("bearer_auth" = [])),
    params(
        ("response_id" = Uuid, Path, description = "Reply identifier"),
        UserHeader
    ),
    responses(
        (status = 200, description = "Reply approved", body = ApproveResponse),
        (status = 403, description = "Reply belongs to another user", body = ApiError),
        (status = 404, description = "Reply not found", body = ApiError),
        (status = 409, description = "Reply was rejected", body = ApiError)
    ),
    tag = "responses"
)]
pub async fn approve_response(
    State(state): State<AppState>,
    caller: CallerExtension,
    Path(response_id): Path<Uuid>,
) -> Result<Json<ApproveResponse>, ApiError> {
    let outcome = state.lifecycle().approve(caller.user_id(), response_id).await?;
    Ok(Json(ApproveResponse {
        message: approve_message(&outcome.posting).to_string(),
        response: outcome.response.into(),
        posting: outcome.posting,
    }))
}

/// Rejects a reply
#[utoipa::path(
    post,
    path = "/responses/{response_id}/reject",
    security(("bearer_auth" = [])),
    params(
        ("response_id" = Uuid, Path, description = "Reply identifier"),
        UserHeader
    ),
    responses(
        (status = 200, description = "Reply rejected", body = ResponseEnvelope),
        (status = 403, description = "Reply belongs to another user", body = ApiError),
        (status = 404, description = "Reply not found", body = ApiError),
        (status = 409, description = "Reply was already posted", body = ApiError)
    ),
    tag = "responses"
)]
pub async fn reject_response(
    State(state): State<AppState>,
    caller: CallerExtension,
    Path(response_id): Path<Uuid>,
) -> Result<Json<ResponseEnvelope>, ApiError> {
    let response = state.lifecycle().reject(caller.user_id(), response_id).await?;
    Ok(Json(ResponseEnvelope::new("Reply rejected", response)))
}
