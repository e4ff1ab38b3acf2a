//! Review connector trait definition
//!
//! The interface every review platform integration implements: the OAuth
//! authorization code flow, token refresh, review listing and reply posting.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use super::metadata::SourceKind;
use crate::error::ServiceError;

/// Failures talking to a provider, before they are mapped to domain errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConnectorError {
    /// 401 from the provider; the access token is no longer accepted
    #[error("provider rejected the access token: {details}")]
    Unauthorized { details: String },
    #[error("rate limit exceeded")]
    RateLimited { retry_after: Option<u64> },
    /// Any other non-success status
    #[error("HTTP error {status}")]
    Http { status: u16, body: Option<String> },
    #[error("network error: {details}")]
    Network { details: String },
    #[error("malformed response: {details}")]
    MalformedResponse { details: String },
    #[error("configuration error: {details}")]
    Configuration { details: String },
}

impl ConnectorError {
    /// Maps a provider failure on a data call (list or reply) into the domain taxonomy.
    pub fn into_service_error(self, kind: SourceKind) -> ServiceError {
        match self {
            ConnectorError::Unauthorized { .. } => ServiceError::TokenExpired,
            ConnectorError::RateLimited { retry_after } => {
                ServiceError::RateLimited { retry_after }
            }
            ConnectorError::Http { status, body } => ServiceError::Provider {
                provider: kind.slug().to_string(),
                status,
                body,
            },
            ConnectorError::Network { details } | ConnectorError::MalformedResponse { details } => {
                ServiceError::Provider {
                    provider: kind.slug().to_string(),
                    status: 502,
                    body: Some(details),
                }
            }
            ConnectorError::Configuration { details } => ServiceError::Configuration(details),
        }
    }
}

impl From<reqwest::Error> for ConnectorError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            ConnectorError::MalformedResponse {
                details: error.to_string(),
            }
        } else {
            ConnectorError::Network {
                details: error.to_string(),
            }
        }
    }
}

/// Parameters for building the authorization URL
#[derive(Debug, Clone)]
pub struct AuthorizeParams {
    pub state: String,
}

/// Tokens returned by a code exchange or a refresh.
#[derive(Clone, Serialize, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    /// Absent on refresh when the provider does not rotate refresh tokens
    pub refresh_token: Option<String>,
    pub expires_in: Option<i64>,
}

impl TokenGrant {
    pub fn expires_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.expires_in
            .map(|seconds| now + chrono::Duration::seconds(seconds))
    }
}

impl std::fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenGrant")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Provider-side listing a review belongs to.
#[derive(Debug, Clone)]
pub struct ListingRef {
    pub account_id: String,
    pub location_id: String,
}

/// A review as reported by a provider, before de-duplication.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderReview {
    /// `None` when the payload carried no usable identifier
    pub external_id: Option<String>,
    pub reviewer_name: String,
    pub rating: i32,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait ReviewConnector: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// Builds the URL the popup window is sent to.
    fn authorize_url(&self, params: &AuthorizeParams) -> Result<Url, ConnectorError>;

    async fn exchange_code(&self, code: &str) -> Result<TokenGrant, ConnectorError>;

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenGrant, ConnectorError>;

    /// Looks up the provider account the grant can act for, if the provider has one.
    async fn discover_account(&self, access_token: &str)
    -> Result<Option<String>, ConnectorError>;

    async fn list_reviews(
        &self,
        access_token: &str,
        listing: &ListingRef,
    ) -> Result<Vec<ProviderReview>, ConnectorError>;

    async fn post_reply(
        &self,
        access_token: &str,
        listing: &ListingRef,
        external_review_id: &str,
        comment: &str,
    ) -> Result<(), ConnectorError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_call_errors_map_to_domain() {
        let kind = SourceKind::GoogleBusiness;

        assert!(matches!(
            ConnectorError::Unauthorized {
                details: "expired".into()
            }
            .into_service_error(kind),
            ServiceError::TokenExpired
        ));
        assert!(matches!(
            ConnectorError::RateLimited {
                retry_after: Some(12)
            }
            .into_service_error(kind),
            ServiceError::RateLimited {
                retry_after: Some(12)
            }
        ));
        assert!(matches!(
            ConnectorError::Http {
                status: 500,
                body: None
            }
            .into_service_error(kind),
            ServiceError::Provider { status: 500, .. }
        ));
    }

    #[test]
    fn test_token_grant_debug_is_redacted() {
        let grant = TokenGrant {
            access_token: "ya29.secret".into(),
            refresh_token: Some("1//refresh".into()),
            expires_in: Some(3599),
        };

        let debug = format!("{:?}", grant);
        assert!(!debug.contains("ya29.secret"));
        assert!(!debug.contains("1//refresh"));
        assert!(debug.contains("3599"));
    }
}
