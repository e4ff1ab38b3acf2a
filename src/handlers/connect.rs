//! # Connect Handler
//!
//! Connects a business to a source. OAuth sources answer with an
//! authorization URL for the popup; API-key and URL sources are stored and
//! connected immediately.

use axum::{
    extract::{Path, State, rejection::JsonRejection},
    response::Json,
};
use serde::{Deserialize, Serialize};
use url::Url;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::{CallerExtension, UserHeader};
use crate::connectors::AuthType;
use crate::crypto::ApiCredentials;
use crate::error::{ApiError, ServiceError};
use crate::models::source_connection::{ConnectionStatus, ConnectionType};
use crate::repositories::source_connection::ConnectionFields;
use crate::server::AppState;

/// Credentials for the source's connection method; OAuth sources need none.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct ConnectSourceRequest {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_secret: Option<String>,
    /// Public listing URL for URL-only sources
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ConnectSourceResponse {
    pub message: String,
    pub connection_status: ConnectionStatus,
    /// Provider sign-in page to open in a popup (OAuth sources only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorize_url: Option<String>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_listing_url(raw: Option<String>) -> Result<Url, ServiceError> {
    let raw = non_blank(raw).ok_or_else(|| ServiceError::invalid_input("url", "is required"))?;
    let url = Url::parse(&raw).map_err(|_| ServiceError::invalid_input("url", "is not a valid URL"))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        _ => Err(ServiceError::invalid_input("url", "must use http or https")),
    }
}

/// Connects a source for a business
#[utoipa::path(
    post,
    path = "/businesses/{business_id}/sources/{source_id}/connect",
    security(("bearer_auth" = [])),
    params(
        ("business_id" = Uuid, Path, description = "Business identifier"),
        ("source_id" = Uuid, Path, description = "Source identifier"),
        UserHeader
    ),
    request_body = ConnectSourceRequest,
    responses(
        (status = 200, description = "Connected, or sign-in URL issued", body = ConnectSourceResponse),
        (status = 400, description = "Missing credentials or unknown source", body = ApiError),
        (status = 403, description = "Business belongs to another user", body = ApiError),
        (status = 404, description = "Business or source not found", body = ApiError),
        (status = 503, description = "Sign-in is not configured", body = ApiError)
    ),
    tag = "connections"
)]
pub async fn connect_source(
    State(state): State<AppState>,
    caller: CallerExtension,
    Path((business_id, source_id)): Path<(Uuid, Uuid)>,
    payload: Result<Json<ConnectSourceRequest>, JsonRejection>,
) -> Result<Json<ConnectSourceResponse>, ApiError> {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(JsonRejection::MissingJsonContentType(_)) => ConnectSourceRequest::default(),
        Err(rejection) => return Err(rejection.into()),
    };
    let user_id = caller.user_id();

    state.businesses().get_owned(business_id, user_id).await?;
    let (source, kind) = state.sources().get_with_kind(source_id).await?;

    let response = match kind.auth_type() {
        AuthType::OAuth2 => {
            let url = state
                .oauth_flow()
                .initiate(user_id, business_id, source_id)
                .await?;
            ConnectSourceResponse {
                message: format!("Continue in the {} sign-in window", source.display_name),
                connection_status: ConnectionStatus::Pending,
                authorize_url: Some(url.to_string()),
            }
        }
        AuthType::ApiKey => {
            let api_key = non_blank(request.api_key)
                .ok_or_else(|| ServiceError::invalid_input("api_key", "is required"))?;
            let credentials = ApiCredentials {
                api_key,
                api_secret: non_blank(request.api_secret),
            };
            let connection = state
                .connections()
                .upsert(
                    business_id,
                    source_id,
                    user_id,
                    ConnectionFields {
                        connection_type: ConnectionType::ApiKey,
                        status: ConnectionStatus::Connected,
                        credentials: Some(credentials),
                        metadata: None,
                    },
                )
                .await?;
            ConnectSourceResponse {
                message: format!("{} connected", source.display_name),
                connection_status: connection.status,
                authorize_url: None,
            }
        }
        AuthType::Url => {
            let url = parse_listing_url(request.url)?;
            let connection = state
                .connections()
                .upsert(
                    business_id,
                    source_id,
                    user_id,
                    ConnectionFields {
                        connection_type: ConnectionType::Url,
                        status: ConnectionStatus::Connected,
                        credentials: None,
                        metadata: Some(serde_json::json!({ "url": url.as_str() })),
                    },
                )
                .await?;
            ConnectSourceResponse {
                message: format!("{} connected", source.display_name),
                connection_status: connection.status,
                authorize_url: None,
            }
        }
    };

    tracing::info!(
        business_id = %business_id,
        source_id = %source_id,
        kind = kind.slug(),
        status = ?response.connection_status,
        "Connect requested"
    );
    Ok(Json(response))
}
