//! # Connection Handlers
//!
//! Reads and removes the stored connection of a (business, source) pair.
//! Secrets never leave the server; only their presence and the last
//! characters of an API key are reported.

use axum::{
    extract::{Path, State},
    response::Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::{CallerExtension, UserHeader};
use crate::crypto::ApiCredentials;
use crate::error::ApiError;
use crate::models::source_connection::{self, ConnectionStatus, ConnectionType};
use crate::server::AppState;

/// Connection information for API responses
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ConnectionInfo {
    pub id: Uuid,
    pub business_id: Uuid,
    pub source_id: Uuid,
    pub connection_type: ConnectionType,
    pub status: ConnectionStatus,
    pub token_expires_at: Option<DateTime<Utc>>,
    /// Indicates whether an encrypted access token is stored
    #[schema(default = false, example = true)]
    pub has_access_token: bool,
    /// Indicates whether an encrypted refresh token is stored
    #[schema(default = false, example = true)]
    pub has_refresh_token: bool,
    /// Indicates whether encrypted API credentials are stored
    #[schema(default = false, example = false)]
    pub has_credentials: bool,
    /// Last four characters of the stored API key, e.g. `••••9876`
    pub api_key_hint: Option<String>,
    /// Provider account linked at sign-in
    pub account_id: Option<String>,
    /// Listing URL for URL connections
    pub url: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl From<source_connection::Model> for ConnectionInfo {
    fn from(model: source_connection::Model) -> Self {
        let account_id = model.account_id().map(str::to_string);
        let url = model
            .metadata
            .as_ref()
            .and_then(|metadata| metadata.get("url"))
            .and_then(serde_json::Value::as_str)
            .map(str::to_string);
        Self {
            id: model.id,
            business_id: model.business_id,
            source_id: model.source_id,
            connection_type: model.connection_type,
            status: model.status,
            token_expires_at: model.token_expires_at.map(|at| at.with_timezone(&Utc)),
            has_access_token: model.oauth_token_ciphertext.is_some(),
            has_refresh_token: model.oauth_refresh_token_ciphertext.is_some(),
            has_credentials: model.credentials_ciphertext.is_some(),
            api_key_hint: None,
            account_id,
            url,
            updated_at: model.updated_at.with_timezone(&Utc),
        }
    }
}

/// Masked form of an API key; keys too short to mask safely get no hint.
pub fn api_key_hint(credentials: &ApiCredentials) -> Option<String> {
    let chars: Vec<char> = credentials.api_key.trim().chars().collect();
    if chars.len() < 8 {
        return None;
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    Some(format!("••••{tail}"))
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ConnectionResponse {
    pub message: String,
    pub connection: ConnectionInfo,
}

/// Returns the connection of a source for a business
#[utoipa::path(
    get,
    path = "/businesses/{business_id}/sources/{source_id}/connection",
    security(("bearer_auth" = [])),
    params(
        ("business_id" = Uuid, Path, description = "Business identifier"),
        ("source_id" = Uuid, Path, description = "Source identifier"),
        UserHeader
    ),
    responses(
        (status = 200, description = "Stored connection", body = ConnectionResponse),
        (status = 403, description = "Business belongs to another user", body = ApiError),
        (status = 404, description = "No connection for this source", body = ApiError)
    ),
    tag = "connections"
)]
pub async fn get_connection(
    State(state): State<AppState>,
    caller: CallerExtension,
    Path((business_id, source_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<ConnectionResponse>, ApiError> {
    state
        .businesses()
        .get_owned(business_id, caller.user_id())
        .await?;
    let connections = state.connections();
    let connection = connections.get(business_id, source_id).await?;
    let hint = connections
        .decrypt_credentials(&connection)?
        .as_ref()
        .and_then(api_key_hint);

    let message = match connection.status {
        ConnectionStatus::Connected => "Source is connected",
        ConnectionStatus::Pending => "Sign-in has not been completed",
        ConnectionStatus::Disconnected => "Source is disconnected; connect it again",
    };
    let mut info = ConnectionInfo::from(connection);
    info.api_key_hint = hint;
    Ok(Json(ConnectionResponse {
        message: message.to_string(),
        connection: info,
    }))
}

/// Disconnects a source and wipes its stored secrets
#[utoipa::path(
    delete,
    path = "/businesses/{business_id}/sources/{source_id}/connection",
    security(("bearer_auth" = [])),
    params(
        ("business_id" = Uuid, Path, description = "Business identifier"),
        ("source_id" = Uuid, Path, description = "Source identifier"),
        UserHeader
    ),
    responses(
        (status = 200, description = "Source disconnected", body = ConnectionResponse),
        (status = 403, description = "Business belongs to another user", body = ApiError),
        (status = 404, description = "No connection for this source", body = ApiError)
    ),
    tag = "connections"
)]
pub async fn delete_connection(
    State(state): State<AppState>,
    caller: CallerExtension,
    Path((business_id, source_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<ConnectionResponse>, ApiError> {
    state
        .businesses()
        .get_owned(business_id, caller.user_id())
        .await?;
    let connections = state.connections();
    let connection = connections.get(business_id, source_id).await?;
    let disconnected = connections.disconnect(connection).await?;

    Ok(Json(ConnectionResponse {
        message: "Source disconnected".to_string(),
        connection: disconnected.into(),
    }))
}
