//! # OAuth Exchange Flow
//!
//! Starts authorization attempts and completes them when the provider
//! redirects back. Each callback produces exactly one terminal outcome,
//! either `Connected` or `Failed`.

use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use url::Url;
use utoipa::IntoParams;
use uuid::Uuid;

use crate::connectors::{AuthType, AuthorizeParams, ConnectorError, Registry, SourceKind};
use crate::error::ServiceError;
use crate::repositories::source_connection::OAuthTokens;
use crate::repositories::{
    BusinessRepository, OAuthStateRepository, SourceConnectionRepository, SourceRepository,
};

const MAX_AUTHORIZE_URL_LEN: usize = 2048;

/// Query parameters of the provider redirect.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    /// Set by the provider when the user declined or the request was invalid
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Why an exchange ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeFailure {
    pub code: &'static str,
    pub message: String,
}

impl ExchangeFailure {
    fn provider_denied(error: &str, description: Option<&str>) -> Self {
        Self {
            code: "PROVIDER_DENIED",
            message: match description {
                Some(description) if !description.is_empty() => {
                    format!("Authorization was denied: {description}")
                }
                _ => format!("Authorization was denied ({error})"),
            },
        }
    }
}

impl From<ServiceError> for ExchangeFailure {
    fn from(error: ServiceError) -> Self {
        let message = match &error {
            ServiceError::Database(_) | ServiceError::Unexpected(_) => {
                "Failed to save connection".to_string()
            }
            ServiceError::Provider { .. } => "Failed to exchange authorization code".to_string(),
            other => other.to_string(),
        };
        Self {
            code: error.code(),
            message,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangePhase {
    /// Callback received, nothing validated yet
    Pending,
    /// State consumed; talking to the provider
    Exchanging,
    Connected,
    Failed(ExchangeFailure),
}

impl ExchangePhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExchangePhase::Connected | ExchangePhase::Failed(_))
    }

    fn advance(&mut self, next: ExchangePhase) {
        debug_assert!(!self.is_terminal(), "exchange already finished");
        *self = next;
    }
}

/// Terminal result of one callback.
#[derive(Debug, Clone)]
pub struct ExchangeOutcome {
    pub phase: ExchangePhase,
    pub business_id: Option<Uuid>,
    pub source_id: Option<Uuid>,
}

impl ExchangeOutcome {
    pub fn is_success(&self) -> bool {
        self.phase == ExchangePhase::Connected
    }

    pub fn failure(&self) -> Option<&ExchangeFailure> {
        match &self.phase {
            ExchangePhase::Failed(failure) => Some(failure),
            _ => None,
        }
    }
}

/// Checks the generated authorization URL is safe to hand to a browser.
pub fn validate_authorize_url(url: &Url) -> Result<(), ServiceError> {
    if url.scheme() != "https" {
        return Err(ServiceError::Configuration(
            "Authorization URL must use HTTPS".to_string(),
        ));
    }
    if url.fragment().is_some() {
        return Err(ServiceError::Configuration(
            "Authorization URL must not include a fragment".to_string(),
        ));
    }
    if url.as_str().len() > MAX_AUTHORIZE_URL_LEN {
        return Err(ServiceError::Configuration(format!(
            "Authorization URL exceeds {MAX_AUTHORIZE_URL_LEN} characters"
        )));
    }
    Ok(())
}

#[derive(Clone)]
pub struct OAuthExchangeFlow {
    pub businesses: BusinessRepository,
    pub sources: SourceRepository,
    pub states: OAuthStateRepository,
    pub connections: SourceConnectionRepository,
    pub registry: Arc<Registry>,
}

impl OAuthExchangeFlow {
    /// Issues a state token and returns the provider authorization URL.
    ///
    /// A `pending` connection row is created so the callback has a row,
    /// owned by the caller, to complete.
    #[instrument(skip(self), fields(business_id = %business_id, source_id = %source_id))]
    pub async fn initiate(
        &self,
        caller: Uuid,
        business_id: Uuid,
        source_id: Uuid,
    ) -> Result<Url, ServiceError> {
        self.businesses.get_owned(business_id, caller).await?;
        let (source, kind) = self.sources.get_with_kind(source_id).await?;
        if kind.auth_type() != AuthType::OAuth2 {
            return Err(ServiceError::invalid_input(
                "source_id",
                format!("{} does not use OAuth sign-in", source.display_name),
            ));
        }
        let connector = self.registry.get(kind).map_err(|_| {
            ServiceError::Configuration(format!(
                "{} sign-in is not configured on this server",
                source.display_name
            ))
        })?;

        if let Err(err) = self.states.purge_expired().await {
            warn!(error = %err, "Failed to purge expired OAuth states");
        }

        let state = self.states.issue(caller, business_id, source_id).await?;
        self.connections
            .ensure_oauth_placeholder(business_id, source_id, caller)
            .await?;

        let url = connector
            .authorize_url(&AuthorizeParams { state })
            .map_err(|err| ServiceError::Configuration(err.to_string()))?;
        validate_authorize_url(&url)?;

        info!(business_id = %business_id, kind = kind.slug(), "OAuth flow initiated");
        Ok(url)
    }

    /// Completes a provider redirect. Never fails; failures are an outcome.
    #[instrument(skip_all)]
    pub async fn complete(&self, params: CallbackParams) -> ExchangeOutcome {
        let mut phase = ExchangePhase::Pending;
        let mut outcome = ExchangeOutcome {
            phase: ExchangePhase::Pending,
            business_id: None,
            source_id: None,
        };

        let result = self.run(&params, &mut phase, &mut outcome).await;
        match result {
            Ok(()) => phase.advance(ExchangePhase::Connected),
            Err(failure) => {
                warn!(code = failure.code, message = %failure.message, "OAuth exchange failed");
                phase.advance(ExchangePhase::Failed(failure));
            }
        }

        metrics::counter!(
            "oauth_exchange_total",
            "outcome" => if phase == ExchangePhase::Connected { "connected" } else { "failed" }
        )
        .increment(1);
        outcome.phase = phase;
        outcome
    }

    async fn run(
        &self,
        params: &CallbackParams,
        phase: &mut ExchangePhase,
        outcome: &mut ExchangeOutcome,
    ) -> Result<(), ExchangeFailure> {
        if let Some(error) = params.error.as_deref() {
            return Err(ExchangeFailure::provider_denied(
                error,
                params.error_description.as_deref(),
            ));
        }

        let (Some(code), Some(state)) = (
            params.code.as_deref().filter(|c| !c.is_empty()),
            params.state.as_deref().filter(|s| !s.is_empty()),
        ) else {
            return Err(ServiceError::MissingAuthCode(
                "the provider did not return an authorization code".to_string(),
            )
            .into());
        };

        let consumed = self.states.consume(state).await?;
        outcome.business_id = Some(consumed.business_id);
        outcome.source_id = Some(consumed.source_id);

        let (_, kind) = self.sources.get_with_kind(consumed.source_id).await?;
        let connector = self.registry.get(kind).map_err(|_| {
            ExchangeFailure::from(ServiceError::Configuration(format!(
                "{kind} sign-in is not configured on this server"
            )))
        })?;

        phase.advance(ExchangePhase::Exchanging);
        let grant = connector
            .exchange_code(code)
            .await
            .map_err(|err| exchange_error(kind, err))?;
        let expires_at = grant.expires_at(Utc::now());

        let metadata = match connector.discover_account(&grant.access_token).await {
            Ok(Some(account_id)) => Some(serde_json::json!({ "account_id": account_id })),
            Ok(None) => None,
            Err(err) => {
                warn!(error = %err, "Account discovery failed; continuing without account id");
                None
            }
        };

        self.connections
            .store_oauth_tokens(
                consumed.business_id,
                consumed.source_id,
                consumed.user_id,
                OAuthTokens {
                    access_token: &grant.access_token,
                    refresh_token: grant.refresh_token.as_deref(),
                    expires_at,
                },
                metadata,
            )
            .await?;

        info!(
            business_id = %consumed.business_id,
            source_id = %consumed.source_id,
            "OAuth connection established"
        );
        Ok(())
    }
}

fn exchange_error(kind: SourceKind, err: ConnectorError) -> ExchangeFailure {
    match err {
        ConnectorError::Configuration { details } => ServiceError::Configuration(details).into(),
        ConnectorError::RateLimited { retry_after } => {
            ServiceError::RateLimited { retry_after }.into()
        }
        ConnectorError::Unauthorized { details } => ServiceError::Provider {
            provider: kind.slug().to_string(),
            status: 401,
            body: Some(details),
        }
        .into(),
        other => other.into_service_error(kind).into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_authorize_url() {
        let ok = Url::parse("https://accounts.google.com/o/oauth2/v2/auth?state=x").unwrap();
        assert!(validate_authorize_url(&ok).is_ok());

        let http = Url::parse("http://accounts.google.com/o/oauth2/v2/auth").unwrap();
        assert!(validate_authorize_url(&http).is_err());

        let fragment = Url::parse("https://accounts.google.com/auth#frag").unwrap();
        assert!(validate_authorize_url(&fragment).is_err());

        let long = Url::parse(&format!("https://example.com/?q={}", "a".repeat(2100))).unwrap();
        assert!(validate_authorize_url(&long).is_err());
    }

    #[test]
    fn test_provider_denied_message() {
        let failure = ExchangeFailure::provider_denied("access_denied", None);
        assert_eq!(failure.code, "PROVIDER_DENIED");
        assert!(failure.message.contains("access_denied"));
    }

    #[test]
    fn test_phase_terminality() {
        assert!(!ExchangePhase::Pending.is_terminal());
        assert!(!ExchangePhase::Exchanging.is_terminal());
        assert!(ExchangePhase::Connected.is_terminal());
        assert!(
            ExchangePhase::Failed(ExchangeFailure {
                code: "X",
                message: String::new()
            })
            .is_terminal()
        );
    }
}
