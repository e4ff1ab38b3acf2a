//! # Source Handlers
//!
//! The review platform catalog, and enabling or disabling a platform for a
//! business.

use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State, rejection::JsonRejection},
    response::Json,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::auth::{CallerExtension, UserHeader};
use crate::connectors::AuthType;
use crate::error::{ApiError, ServiceError};
use crate::models::source_connection::ConnectionStatus;
use crate::models::{enabled_source, source};
use crate::server::AppState;

/// Plain acknowledgement body.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListSourcesQuery {
    /// When set, each source reports its state for this business
    pub business_id: Option<Uuid>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SourceInfo {
    pub id: Uuid,
    /// Catalog slug, e.g. "google_business"
    pub name: String,
    pub display_name: String,
    pub icon: Option<String>,
    /// `None` when this server does not know the slug
    pub auth_type: Option<AuthType>,
    pub supports_reply_posting: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_status: Option<ConnectionStatus>,
}

impl From<source::Model> for SourceInfo {
    fn from(model: source::Model) -> Self {
        let kind = model.kind();
        Self {
            id: model.id,
            name: model.name,
            display_name: model.display_name,
            icon: model.icon,
            auth_type: kind.map(|kind| kind.auth_type()),
            supports_reply_posting: kind.is_some_and(|kind| kind.supports_reply_posting()),
            enabled: None,
            location_id: None,
            connection_status: None,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SourcesResponse {
    pub sources: Vec<SourceInfo>,
}

/// Lists review platforms, optionally with one business's state
#[utoipa::path(
    get,
    path = "/sources",
    security(("bearer_auth" = [])),
    params(UserHeader, ListSourcesQuery),
    responses(
        (status = 200, description = "Source catalog", body = SourcesResponse),
        (status = 401, description = "Missing or invalid authorization", body = ApiError),
        (status = 403, description = "Business belongs to another user", body = ApiError),
        (status = 404, description = "Business not found", body = ApiError)
    ),
    tag = "sources"
)]
pub async fn list_sources(
    State(state): State<AppState>,
    caller: CallerExtension,
    Query(query): Query<ListSourcesQuery>,
) -> Result<Json<SourcesResponse>, ApiError> {
    let catalog = state.sources().list_all().await?;
    let mut sources: Vec<SourceInfo> = catalog.into_iter().map(SourceInfo::from).collect();

    if let Some(business_id) = query.business_id {
        state
            .businesses()
            .get_owned(business_id, caller.user_id())
            .await?;

        let enabled: HashMap<Uuid, enabled_source::Model> = state
            .enabled_sources()
            .list_for_business(business_id)
            .await?
            .into_iter()
            .map(|row| (row.source_id, row))
            .collect();
        let connections: HashMap<Uuid, ConnectionStatus> = state
            .connections()
            .list_for_business(business_id)
            .await?
            .into_iter()
            .map(|row| (row.source_id, row.status))
            .collect();

        for info in &mut sources {
            let row = enabled.get(&info.id);
            info.enabled = Some(row.is_some());
            info.location_id = row.and_then(|row| row.location().map(str::to_string));
            info.connection_status = connections.get(&info.id).copied();
        }
    }

    Ok(Json(SourcesResponse { sources }))
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct EnableSourceRequest {
    /// Provider location identifier, required before syncing
    #[serde(default)]
    pub location_id: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct EnabledSourceResponse {
    pub message: String,
    pub business_id: Uuid,
    pub source_id: Uuid,
    pub location_id: Option<String>,
}

/// Enables a source for a business or updates its location
#[utoipa::path(
    put,
    path = "/businesses/{business_id}/sources/{source_id}",
    security(("bearer_auth" = [])),
    params(
        ("business_id" = Uuid, Path, description = "Business identifier"),
        ("source_id" = Uuid, Path, description = "Source identifier"),
        UserHeader
    ),
    request_body = EnableSourceRequest,
    responses(
        (status = 200, description = "Source enabled", body = EnabledSourceResponse),
        (status = 403, description = "Business belongs to another user", body = ApiError),
        (status = 404, description = "Business or source not found", body = ApiError)
    ),
    tag = "sources"
)]
pub async fn enable_source(
    State(state): State<AppState>,
    caller: CallerExtension,
    Path((business_id, source_id)): Path<(Uuid, Uuid)>,
    payload: Result<Json<EnableSourceRequest>, JsonRejection>,
) -> Result<Json<EnabledSourceResponse>, ApiError> {
    // An empty body enables without a location.
    let request = match payload {
        Ok(Json(request)) => request,
        Err(JsonRejection::MissingJsonContentType(_)) => EnableSourceRequest::default(),
        Err(rejection) => return Err(rejection.into()),
    };

    state
        .businesses()
        .get_owned(business_id, caller.user_id())
        .await?;
    let source = state
        .sources()
        .find_by_id(source_id)
        .await?
        .ok_or(ServiceError::NotFound("Source"))?;

    let enabled = state
        .enabled_sources()
        .enable(business_id, source_id, caller.user_id(), request.location_id)
        .await?;

    tracing::info!(
        business_id = %business_id,
        source_id = %source_id,
        has_location = enabled.location().is_some(),
        "Source enabled"
    );

    Ok(Json(EnabledSourceResponse {
        message: format!("{} enabled", source.display_name),
        business_id,
        source_id,
        location_id: enabled.location().map(str::to_string),
    }))
}

/// Disables a source for a business
#[utoipa::path(
    delete,
    path = "/businesses/{business_id}/sources/{source_id}",
    security(("bearer_auth" = [])),
    params(
        ("business_id" = Uuid, Path, description = "Business identifier"),
        ("source_id" = Uuid, Path, description = "Source identifier"),
        UserHeader
    ),
    responses(
        (status = 200, description = "Source disabled", body = MessageResponse),
        (status = 403, description = "Business belongs to another user", body = ApiError),
        (status = 404, description = "Source was not enabled", body = ApiError)
    ),
    tag = "sources"
)]
pub async fn disable_source(
    State(state): State<AppState>,
    caller: CallerExtension,
    Path((business_id, source_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<MessageResponse>, ApiError> {
    state
        .businesses()
        .get_owned(business_id, caller.user_id())
        .await?;

    if !state
        .enabled_sources()
        .disable(business_id, source_id)
        .await?
    {
        return Err(ServiceError::NotFound("Enabled source").into());
    }

    Ok(Json(MessageResponse {
        message: "Source disabled".to_string(),
    }))
}
