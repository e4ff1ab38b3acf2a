//! # Business Handlers
//!
//! Minimal business listing and creation so a caller can own something to
//! enable sources on.

use axum::{
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::{CallerExtension, UserHeader};
use crate::error::ApiError;
use crate::models::business;
use crate::server::AppState;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct BusinessInfo {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl From<business::Model> for BusinessInfo {
    fn from(model: business::Model) -> Self {
        Self {
            id: model.id,
            name: model.name,
            created_at: model.created_at.with_timezone(&Utc),
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateBusinessRequest {
    /// Display name, 1 to 200 characters
    pub name: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BusinessesResponse {
    pub businesses: Vec<BusinessInfo>,
}

/// Lists the caller's businesses
#[utoipa::path(
    get,
    path = "/businesses",
    security(("bearer_auth" = [])),
    params(UserHeader),
    responses(
        (status = 200, description = "Businesses owned by the caller", body = BusinessesResponse),
        (status = 401, description = "Missing or invalid authorization", body = ApiError)
    ),
    tag = "businesses"
)]
pub async fn list_businesses(
    State(state): State<AppState>,
    caller: CallerExtension,
) -> Result<Json<BusinessesResponse>, ApiError> {
    let businesses = state.businesses().list_for_user(caller.user_id()).await?;
    Ok(Json(BusinessesResponse {
        businesses: businesses.into_iter().map(BusinessInfo::from).collect(),
    }))
}

/// Creates a business owned by the caller
#[utoipa::path(
    post,
    path = "/businesses",
    security(("bearer_auth" = [])),
    params(UserHeader),
    request_body = CreateBusinessRequest,
    responses(
        (status = 201, description = "Business created", body = BusinessInfo),
        (status = 400, description = "Invalid name", body = ApiError),
        (status = 401, description = "Missing or invalid authorization", body = ApiError)
    ),
    tag = "businesses"
)]
pub async fn create_business(
    State(state): State<AppState>,
    caller: CallerExtension,
    payload: Result<Json<CreateBusinessRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<BusinessInfo>), ApiError> {
    let Json(request) = payload?;
    let business = state
        .businesses()
        .create(caller.user_id(), &request.name)
        .await?;
    Ok((StatusCode::CREATED, Json(business.into())))
}
