//! Source connection repository
//!
//! Credential store for (business, source) pairs. Secrets are sealed with the
//! connection's scope as additional authenticated data before they reach the
//! database and are only opened on demand.

use chrono::{DateTime, Utc};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, Set,
};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::crypto::{
    ApiCredentials, ConnectionScope, CryptoError, CryptoKey, open_credentials, open_secret,
    seal_credentials, seal_secret,
};
use crate::error::ServiceError;
use crate::models::source_connection::{
    self, ActiveModel, ConnectionStatus, ConnectionType, Entity as SourceConnection,
};

/// Plaintext tokens about to be stored on a connection.
pub struct OAuthTokens<'a> {
    pub access_token: &'a str,
    /// `None` keeps the stored refresh token
    pub refresh_token: Option<&'a str>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Fields written by [`SourceConnectionRepository::upsert`].
#[derive(Debug, Clone)]
pub struct ConnectionFields {
    pub connection_type: ConnectionType,
    pub status: ConnectionStatus,
    pub credentials: Option<ApiCredentials>,
    pub metadata: Option<JsonValue>,
}

#[derive(Debug, Clone)]
pub struct SourceConnectionRepository {
    db: Arc<DatabaseConnection>,
    crypto_key: CryptoKey,
}

fn crypto_failure(error: CryptoError) -> ServiceError {
    ServiceError::Unexpected(anyhow::anyhow!("credential crypto failed: {error}"))
}

impl SourceConnectionRepository {
    pub fn new(db: Arc<DatabaseConnection>, crypto_key: CryptoKey) -> Self {
        Self { db, crypto_key }
    }

    pub async fn find(
        &self,
        business_id: Uuid,
        source_id: Uuid,
    ) -> Result<Option<source_connection::Model>, DbErr> {
        SourceConnection::find()
            .filter(source_connection::Column::BusinessId.eq(business_id))
            .filter(source_connection::Column::SourceId.eq(source_id))
            .one(&*self.db)
            .await
    }

    pub async fn get(
        &self,
        business_id: Uuid,
        source_id: Uuid,
    ) -> Result<source_connection::Model, ServiceError> {
        self.find(business_id, source_id)
            .await?
            .ok_or(ServiceError::NotFound("Connection"))
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<source_connection::Model>, DbErr> {
        SourceConnection::find_by_id(id).one(&*self.db).await
    }

    pub async fn list_for_business(
        &self,
        business_id: Uuid,
    ) -> Result<Vec<source_connection::Model>, DbErr> {
        SourceConnection::find()
            .filter(source_connection::Column::BusinessId.eq(business_id))
            .all(&*self.db)
            .await
    }

    /// Writes the connection for a pair in one `INSERT ... ON CONFLICT DO UPDATE`.
    ///
    /// Replaces any stored OAuth tokens; used for API-key and URL connections.
    pub async fn upsert(
        &self,
        business_id: Uuid,
        source_id: Uuid,
        user_id: Uuid,
        fields: ConnectionFields,
    ) -> Result<source_connection::Model, ServiceError> {
        let scope = ConnectionScope {
            user_id,
            business_id,
            source_id,
        };
        let credentials_ciphertext = fields
            .credentials
            .as_ref()
            .map(|credentials| seal_credentials(&self.crypto_key, &scope, credentials))
            .transpose()
            .map_err(crypto_failure)?;

        let now = Utc::now();
        let row = ActiveModel {
            id: Set(Uuid::new_v4()),
            business_id: Set(business_id),
            source_id: Set(source_id),
            user_id: Set(user_id),
            connection_type: Set(fields.connection_type),
            status: Set(fields.status),
            credentials_ciphertext: Set(credentials_ciphertext),
            oauth_token_ciphertext: Set(None),
            oauth_refresh_token_ciphertext: Set(None),
            token_expires_at: Set(None),
            metadata: Set(fields.metadata),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };

        SourceConnection::insert(row)
            .on_conflict(
                OnConflict::columns([
                    source_connection::Column::BusinessId,
                    source_connection::Column::SourceId,
                ])
                .update_columns([
                    source_connection::Column::UserId,
                    source_connection::Column::ConnectionType,
                    source_connection::Column::Status,
                    source_connection::Column::CredentialsCiphertext,
                    source_connection::Column::OauthTokenCiphertext,
                    source_connection::Column::OauthRefreshTokenCiphertext,
                    source_connection::Column::TokenExpiresAt,
                    source_connection::Column::Metadata,
                    source_connection::Column::UpdatedAt,
                ])
                .to_owned(),
            )
            .exec_without_returning(&*self.db)
            .await?;

        self.find(business_id, source_id)
            .await?
            .ok_or_else(|| ServiceError::Database(DbErr::RecordNotFound("connection".into())))
    }

    /// Creates the `pending` OAuth row a callback will later fill in.
    ///
    /// A connected or pending row for the pair is left untouched, so restarting
    /// a flow never drops working credentials. A disconnected row goes back to
    /// `pending` as an OAuth connection.
    pub async fn ensure_oauth_placeholder(
        &self,
        business_id: Uuid,
        source_id: Uuid,
        user_id: Uuid,
    ) -> Result<source_connection::Model, ServiceError> {
        let now = Utc::now();
        let row = ActiveModel {
            id: Set(Uuid::new_v4()),
            business_id: Set(business_id),
            source_id: Set(source_id),
            user_id: Set(user_id),
            connection_type: Set(ConnectionType::OAuth),
            status: Set(ConnectionStatus::Pending),
            credentials_ciphertext: Set(None),
            oauth_token_ciphertext: Set(None),
            oauth_refresh_token_ciphertext: Set(None),
            token_expires_at: Set(None),
            metadata: Set(None),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };

        SourceConnection::insert(row)
            .on_conflict(
                OnConflict::columns([
                    source_connection::Column::BusinessId,
                    source_connection::Column::SourceId,
                ])
                .do_nothing()
                .to_owned(),
            )
            .exec_without_returning(&*self.db)
            .await?;

        let existing = self
            .find(business_id, source_id)
            .await?
            .ok_or_else(|| ServiceError::Database(DbErr::RecordNotFound("connection".into())))?;
        if existing.status != ConnectionStatus::Disconnected {
            return Ok(existing);
        }

        let mut active: ActiveModel = existing.into();
        active.connection_type = Set(ConnectionType::OAuth);
        active.status = Set(ConnectionStatus::Pending);
        active.updated_at = Set(Utc::now().into());
        Ok(active.update(&*self.db).await?)
    }

    /// Stores tokens from a code exchange and marks the connection connected.
    ///
    /// Only the row owned by `user_id` is written; no match is `NotConnected`.
    pub async fn store_oauth_tokens(
        &self,
        business_id: Uuid,
        source_id: Uuid,
        user_id: Uuid,
        tokens: OAuthTokens<'_>,
        metadata: Option<JsonValue>,
    ) -> Result<source_connection::Model, ServiceError> {
        let existing = SourceConnection::find()
            .filter(source_connection::Column::BusinessId.eq(business_id))
            .filter(source_connection::Column::SourceId.eq(source_id))
            .filter(source_connection::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotConnected(
                    "No pending connection matches this authorization".to_string(),
                )
            })?;

        let scope = existing.scope();
        let access = seal_secret(&self.crypto_key, &scope, tokens.access_token)
            .map_err(crypto_failure)?;
        let refresh = tokens
            .refresh_token
            .map(|token| seal_secret(&self.crypto_key, &scope, token))
            .transpose()
            .map_err(crypto_failure)?;

        let merged_metadata = merge_metadata(existing.metadata.clone(), metadata);
        let mut active: ActiveModel = existing.into();
        active.connection_type = Set(ConnectionType::OAuth);
        active.status = Set(ConnectionStatus::Connected);
        active.oauth_token_ciphertext = Set(Some(access));
        if let Some(refresh) = refresh {
            active.oauth_refresh_token_ciphertext = Set(Some(refresh));
        }
        active.token_expires_at = Set(tokens.expires_at.map(DateTimeWithTimeZone::from));
        active.metadata = Set(merged_metadata);
        active.updated_at = Set(Utc::now().into());

        let updated = active.update(&*self.db).await?;
        info!(
            connection_id = %updated.id,
            business_id = %business_id,
            source_id = %source_id,
            "Stored OAuth tokens"
        );
        Ok(updated)
    }

    /// Persists the result of a token refresh.
    pub async fn update_refreshed_tokens(
        &self,
        connection: source_connection::Model,
        tokens: OAuthTokens<'_>,
    ) -> Result<source_connection::Model, ServiceError> {
        let scope = connection.scope();
        let access = seal_secret(&self.crypto_key, &scope, tokens.access_token)
            .map_err(crypto_failure)?;
        let refresh = tokens
            .refresh_token
            .map(|token| seal_secret(&self.crypto_key, &scope, token))
            .transpose()
            .map_err(crypto_failure)?;

        let mut active: ActiveModel = connection.into();
        active.oauth_token_ciphertext = Set(Some(access));
        if let Some(refresh) = refresh {
            active.oauth_refresh_token_ciphertext = Set(Some(refresh));
        }
        active.token_expires_at = Set(tokens.expires_at.map(DateTimeWithTimeZone::from));
        active.updated_at = Set(Utc::now().into());

        Ok(active.update(&*self.db).await?)
    }

    /// Marks the connection disconnected and wipes every stored secret.
    pub async fn disconnect(
        &self,
        connection: source_connection::Model,
    ) -> Result<source_connection::Model, DbErr> {
        let connection_id = connection.id;
        let mut active: ActiveModel = connection.into();
        active.status = Set(ConnectionStatus::Disconnected);
        active.credentials_ciphertext = Set(None);
        active.oauth_token_ciphertext = Set(None);
        active.oauth_refresh_token_ciphertext = Set(None);
        active.token_expires_at = Set(None);
        active.updated_at = Set(Utc::now().into());
        let updated = active.update(&*self.db).await?;
        warn!(connection_id = %connection_id, "Connection disconnected");
        Ok(updated)
    }

    pub fn decrypt_access_token(
        &self,
        connection: &source_connection::Model,
    ) -> Result<Option<String>, ServiceError> {
        connection
            .oauth_token_ciphertext
            .as_deref()
            .map(|sealed| open_secret(&self.crypto_key, &connection.scope(), sealed))
            .transpose()
            .map_err(crypto_failure)
    }

    pub fn decrypt_refresh_token(
        &self,
        connection: &source_connection::Model,
    ) -> Result<Option<String>, ServiceError> {
        connection
            .oauth_refresh_token_ciphertext
            .as_deref()
            .map(|sealed| open_secret(&self.crypto_key, &connection.scope(), sealed))
            .transpose()
            .map_err(crypto_failure)
    }

    pub fn decrypt_credentials(
        &self,
        connection: &source_connection::Model,
    ) -> Result<Option<ApiCredentials>, ServiceError> {
        connection
            .credentials_ciphertext
            .as_deref()
            .map(|sealed| open_credentials(&self.crypto_key, &connection.scope(), sealed))
            .transpose()
            .map_err(crypto_failure)
    }
}

/// Overlays `update` keys onto `existing`; non-object values replace wholesale.
fn merge_metadata(existing: Option<JsonValue>, update: Option<JsonValue>) -> Option<JsonValue> {
    match (existing, update) {
        (Some(JsonValue::Object(mut base)), Some(JsonValue::Object(overlay))) => {
            base.extend(overlay);
            Some(JsonValue::Object(base))
        }
        (existing, None) => existing,
        (_, update) => update,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_metadata() {
        assert_eq!(
            merge_metadata(Some(json!({"a": 1, "b": 2})), Some(json!({"b": 3}))),
            Some(json!({"a": 1, "b": 3}))
        );
        assert_eq!(merge_metadata(Some(json!({"a": 1})), None), Some(json!({"a": 1})));
        assert_eq!(merge_metadata(None, Some(json!({"c": 1}))), Some(json!({"c": 1})));
    }
}
