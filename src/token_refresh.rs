//! # Token Refresh Service
//!
//! Provides a valid access token before any provider call. Tokens expiring
//! within the configured lead time are refreshed through the connector and
//! persisted; permanent refresh failures disconnect the source.

use chrono::{Duration, Utc};
use metrics::{counter, histogram};
use tracing::{debug, error, info, instrument, warn};

use crate::connectors::{ConnectorError, ReviewConnector, TokenGrant};
use crate::error::ServiceError;
use crate::models::source_connection::{self, ConnectionStatus};
use crate::repositories::source_connection::{OAuthTokens, SourceConnectionRepository};

/// Classification of token refresh errors for appropriate handling
#[derive(Debug, PartialEq)]
pub enum RefreshErrorClassification {
    /// The grant is gone (e.g. `invalid_grant`); the user must reconnect
    Permanent,
    Transient,
    RateLimited,
}

/// Classifies a refresh failure reported by a connector.
pub fn classify_refresh_error(error: &ConnectorError) -> RefreshErrorClassification {
    match error {
        ConnectorError::RateLimited { .. } => RefreshErrorClassification::RateLimited,
        ConnectorError::Unauthorized { .. } => RefreshErrorClassification::Permanent,
        ConnectorError::Http { status, body } => {
            let body = body.as_deref().unwrap_or_default().to_lowercase();
            if body.contains("invalid_grant")
                || body.contains("invalid_client")
                || body.contains("unauthorized_client")
                || body.contains("revoked")
                || body.contains("access_denied")
                || body.contains("unsupported_grant_type")
            {
                RefreshErrorClassification::Permanent
            } else if *status == 429 || body.contains("rate_limit") || body.contains("quota_exceeded")
            {
                RefreshErrorClassification::RateLimited
            } else {
                RefreshErrorClassification::Transient
            }
        }
        ConnectorError::Network { .. }
        | ConnectorError::MalformedResponse { .. }
        | ConnectorError::Configuration { .. } => RefreshErrorClassification::Transient,
    }
}

/// A usable access token and the connection row it was read from.
#[derive(Debug)]
pub struct FreshToken {
    pub access_token: String,
    pub connection: source_connection::Model,
}

#[derive(Debug, Clone)]
pub struct TokenRefreshService {
    connections: SourceConnectionRepository,
    lead_time: Duration,
}

impl TokenRefreshService {
    pub fn new(connections: SourceConnectionRepository, lead_time_seconds: u64) -> Self {
        Self {
            connections,
            lead_time: Duration::seconds(lead_time_seconds as i64),
        }
    }

    /// Whether a token expiring at `expires_at` must be refreshed now.
    ///
    /// Tokens without a recorded expiry are used as-is.
    pub fn needs_refresh(&self, connection: &source_connection::Model) -> bool {
        connection
            .token_expires_at
            .is_some_and(|expires_at| expires_at <= Utc::now() + self.lead_time)
    }

    /// Returns a token safe to use for the next provider call.
    #[instrument(skip_all, fields(connection_id = %connection.id))]
    pub async fn ensure_fresh_token(
        &self,
        connector: &dyn ReviewConnector,
        connection: source_connection::Model,
    ) -> Result<FreshToken, ServiceError> {
        if !self.needs_refresh(&connection) {
            let access_token = self
                .connections
                .decrypt_access_token(&connection)?
                .ok_or_else(|| {
                    ServiceError::NotConnected(
                        "No access token is stored for this source. Please reconnect."
                            .to_string(),
                    )
                })?;
            return Ok(FreshToken {
                access_token,
                connection,
            });
        }

        debug!("Access token expired or expiring soon; refreshing");
        counter!("token_refresh_attempts_total").increment(1);

        let Some(refresh_token) = self.connections.decrypt_refresh_token(&connection)? else {
            warn!("Connection has no refresh token, cannot refresh");
            counter!("token_refresh_failure_total").increment(1);
            return Err(ServiceError::TokenRefreshFailed(
                "no refresh token is stored; please reconnect".to_string(),
            ));
        };

        let started = std::time::Instant::now();
        let result = connector.refresh_token(&refresh_token).await;
        histogram!("token_refresh_latency_ms").record(started.elapsed().as_secs_f64() * 1_000.0);

        match result {
            Ok(grant) => self.persist(connection, grant).await,
            Err(err) => Err(self.handle_failure(connection, err).await),
        }
    }

    async fn persist(
        &self,
        connection: source_connection::Model,
        grant: TokenGrant,
    ) -> Result<FreshToken, ServiceError> {
        let expires_at = grant.expires_at(Utc::now());
        let updated = self
            .connections
            .update_refreshed_tokens(
                connection,
                OAuthTokens {
                    access_token: &grant.access_token,
                    refresh_token: grant.refresh_token.as_deref(),
                    expires_at,
                },
            )
            .await?;

        counter!("token_refresh_success_total").increment(1);
        info!(
            connection_id = %updated.id,
            rotated_refresh_token = grant.refresh_token.is_some(),
            "Refreshed access token"
        );

        Ok(FreshToken {
            access_token: grant.access_token.clone(),
            connection: updated,
        })
    }

    async fn handle_failure(
        &self,
        connection: source_connection::Model,
        err: ConnectorError,
    ) -> ServiceError {
        counter!("token_refresh_failure_total").increment(1);
        let connection_id = connection.id;

        match classify_refresh_error(&err) {
            RefreshErrorClassification::Permanent => {
                error!(
                    connection_id = %connection_id,
                    error = %err,
                    "Permanent token refresh failure - disconnecting source"
                );
                counter!("token_refresh_permanent_failure_total").increment(1);
                if connection.status == ConnectionStatus::Connected {
                    if let Err(db_err) = self.connections.disconnect(connection).await {
                        return ServiceError::Database(db_err);
                    }
                }
                ServiceError::TokenRefreshFailed(
                    "the provider revoked access; please reconnect".to_string(),
                )
            }
            RefreshErrorClassification::RateLimited => {
                warn!(connection_id = %connection_id, "Rate limited during token refresh");
                counter!("token_refresh_rate_limited_total").increment(1);
                let retry_after = match err {
                    ConnectorError::RateLimited { retry_after } => retry_after,
                    _ => None,
                };
                ServiceError::RateLimited { retry_after }
            }
            RefreshErrorClassification::Transient => {
                warn!(
                    connection_id = %connection_id,
                    error = %err,
                    "Transient token refresh failure"
                );
                counter!("token_refresh_transient_failure_total").increment(1);
                ServiceError::TokenRefreshFailed(err.to_string())
            }
        }
    }
}
