//! Google Business Profile connector
//!
//! OAuth2 web flow against Google's authorization server, account discovery
//! through the Account Management API and review listing / reply posting
//! through the My Business v4 API.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::AppConfig;
use crate::connectors::metadata::SourceKind;
use crate::connectors::trait_::{
    AuthorizeParams, ConnectorError, ListingRef, ProviderReview, ReviewConnector, TokenGrant,
};

pub const BUSINESS_MANAGE_SCOPE: &str = "https://www.googleapis.com/auth/business.manage";

/// Hard stop for paging through a location's reviews.
const MAX_REVIEW_PAGES: usize = 50;
const REVIEW_PAGE_SIZE: &str = "50";

/// Endpoints and client credentials for the Google APIs.
#[derive(Debug, Clone)]
pub struct GoogleBusinessSettings {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub oauth_base: String,
    pub token_base: String,
    pub account_api_base: String,
    pub business_api_base: String,
    pub timeout: Duration,
}

impl GoogleBusinessSettings {
    /// `None` when the deployment has no Google client configured.
    pub fn from_config(config: &AppConfig) -> Option<Self> {
        let client_id = config.google_client_id.clone()?;
        let client_secret = config.google_client_secret.clone()?;
        Some(Self {
            client_id,
            client_secret,
            redirect_uri: config.google_redirect_uri(),
            oauth_base: config.google_oauth_base.clone(),
            token_base: config.google_token_base.clone(),
            account_api_base: config.google_account_api_base.clone(),
            business_api_base: config.google_business_api_base.clone(),
            timeout: config.http_timeout(),
        })
    }

    /// Points every endpoint at one base URL, e.g. a mock server.
    pub fn with_single_base(mut self, base: &str) -> Self {
        let base = base.trim_end_matches('/').to_string();
        self.oauth_base = base.clone();
        self.token_base = base.clone();
        self.account_api_base = base.clone();
        self.business_api_base = base;
        self
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct AccountsResponse {
    #[serde(default)]
    accounts: Vec<GoogleAccount>,
}

#[derive(Debug, Deserialize)]
struct GoogleAccount {
    /// "accounts/{id}"
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReviewsPage {
    #[serde(default)]
    reviews: Vec<GoogleReview>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleReview {
    name: Option<String>,
    review_id: Option<String>,
    reviewer: Option<GoogleReviewer>,
    star_rating: Option<String>,
    comment: Option<String>,
    create_time: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleReviewer {
    display_name: Option<String>,
}

/// Maps Google's `starRating` enum to 1..=5; unknown or missing is 3.
pub fn star_rating_to_int(star_rating: Option<&str>) -> i32 {
    match star_rating {
        Some("ONE") => 1,
        Some("TWO") => 2,
        Some("THREE") => 3,
        Some("FOUR") => 4,
        Some("FIVE") => 5,
        _ => 3,
    }
}

impl GoogleReview {
    fn into_provider_review(self, now: DateTime<Utc>) -> ProviderReview {
        // "accounts/{a}/locations/{l}/reviews/{id}"
        let external_id = self
            .name
            .as_deref()
            .and_then(|name| name.rsplit('/').next())
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .or(self.review_id)
            .filter(|id| !id.is_empty());

        let created_at = self
            .create_time
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|parsed| parsed.with_timezone(&Utc))
            .unwrap_or(now);

        ProviderReview {
            external_id,
            reviewer_name: self
                .reviewer
                .and_then(|reviewer| reviewer.display_name)
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(|| "Anonymous".to_string()),
            rating: star_rating_to_int(self.star_rating.as_deref()),
            text: self.comment.unwrap_or_default(),
            created_at,
        }
    }
}

pub struct GoogleBusinessConnector {
    settings: GoogleBusinessSettings,
    client: Client,
}

impl GoogleBusinessConnector {
    pub fn new(settings: GoogleBusinessSettings) -> Result<Self, ConnectorError> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .user_agent(concat!("reviewdesk/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ConnectorError::Configuration {
                details: e.to_string(),
            })?;
        Ok(Self { settings, client })
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<TokenGrant, ConnectorError> {
        let url = format!("{}/token", self.settings.token_base.trim_end_matches('/'));
        let response = self.client.post(&url).form(form).send().await?;
        let response = check_status(response).await?;

        let token: TokenResponse = response.json().await?;
        if token.access_token.is_empty() {
            return Err(ConnectorError::MalformedResponse {
                details: "token response carried an empty access_token".to_string(),
            });
        }
        Ok(TokenGrant {
            access_token: token.access_token,
            refresh_token: token.refresh_token.filter(|t| !t.is_empty()),
            expires_in: token.expires_in,
        })
    }

    fn reviews_url(&self, listing: &ListingRef) -> String {
        format!(
            "{}/v4/accounts/{}/locations/{}/reviews",
            self.settings.business_api_base.trim_end_matches('/'),
            listing.account_id,
            listing.location_id
        )
    }
}

/// Turns non-success statuses into [`ConnectorError`]s.
async fn check_status(response: Response) -> Result<Response, ConnectorError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    match status {
        StatusCode::UNAUTHORIZED => {
            let details = response.text().await.unwrap_or_default();
            Err(ConnectorError::Unauthorized { details })
        }
        StatusCode::TOO_MANY_REQUESTS => {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok());
            Err(ConnectorError::RateLimited { retry_after })
        }
        _ => {
            let body = response.text().await.ok().filter(|b| !b.is_empty());
            Err(ConnectorError::Http {
                status: status.as_u16(),
                body,
            })
        }
    }
}

#[async_trait]
impl ReviewConnector for GoogleBusinessConnector {
    fn kind(&self) -> SourceKind {
        SourceKind::GoogleBusiness
    }

    fn authorize_url(&self, params: &AuthorizeParams) -> Result<Url, ConnectorError> {
        let base = format!(
            "{}/o/oauth2/v2/auth",
            self.settings.oauth_base.trim_end_matches('/')
        );
        let mut url = Url::parse(&base).map_err(|e| ConnectorError::Configuration {
            details: format!("invalid Google OAuth base: {e}"),
        })?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.settings.client_id)
            .append_pair("redirect_uri", &self.settings.redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", BUSINESS_MANAGE_SCOPE)
            .append_pair("access_type", "offline")
            .append_pair("prompt", "consent")
            .append_pair("state", &params.state);
        Ok(url)
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenGrant, ConnectorError> {
        debug!("Exchanging Google authorization code");
        self.token_request(&[
            ("code", code),
            ("client_id", &self.settings.client_id),
            ("client_secret", &self.settings.client_secret),
            ("redirect_uri", &self.settings.redirect_uri),
            ("grant_type", "authorization_code"),
        ])
        .await
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenGrant, ConnectorError> {
        debug!("Refreshing Google access token");
        self.token_request(&[
            ("refresh_token", refresh_token),
            ("client_id", &self.settings.client_id),
            ("client_secret", &self.settings.client_secret),
            ("grant_type", "refresh_token"),
        ])
        .await
    }

    async fn discover_account(
        &self,
        access_token: &str,
    ) -> Result<Option<String>, ConnectorError> {
        let url = format!(
            "{}/v1/accounts",
            self.settings.account_api_base.trim_end_matches('/')
        );
        let response = self
            .client
            .get(&url)
            .bearer_auth(access_token)
            .send()
            .await?;
        let page: AccountsResponse = check_status(response).await?.json().await?;

        let account = page
            .accounts
            .into_iter()
            .find_map(|account| {
                account
                    .name
                    .strip_prefix("accounts/")
                    .map(str::to_string)
                    .filter(|id| !id.is_empty())
            });
        if account.is_none() {
            warn!("Google grant has no Business Profile accounts");
        }
        Ok(account)
    }

    async fn list_reviews(
        &self,
        access_token: &str,
        listing: &ListingRef,
    ) -> Result<Vec<ProviderReview>, ConnectorError> {
        let base = self.reviews_url(listing);
        let now = Utc::now();
        let mut reviews = Vec::new();
        let mut page_token: Option<String> = None;

        for _ in 0..MAX_REVIEW_PAGES {
            let mut url = Url::parse(&base).map_err(|e| ConnectorError::Configuration {
                details: format!("invalid Google Business API base: {e}"),
            })?;
            {
                let mut query = url.query_pairs_mut();
                query.append_pair("pageSize", REVIEW_PAGE_SIZE);
                if let Some(token) = &page_token {
                    query.append_pair("pageToken", token);
                }
            }

            let response = self
                .client
                .get(url)
                .bearer_auth(access_token)
                .send()
                .await?;
            let page: ReviewsPage = check_status(response).await?.json().await?;

            reviews.extend(
                page.reviews
                    .into_iter()
                    .map(|review| review.into_provider_review(now)),
            );

            match page.next_page_token.filter(|token| !token.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        info!(
            location_id = %listing.location_id,
            count = reviews.len(),
            "Fetched Google reviews"
        );
        Ok(reviews)
    }

    async fn post_reply(
        &self,
        access_token: &str,
        listing: &ListingRef,
        external_review_id: &str,
        comment: &str,
    ) -> Result<(), ConnectorError> {
        let url = format!("{}/{}/reply", self.reviews_url(listing), external_review_id);
        let response = self
            .client
            .put(&url)
            .bearer_auth(access_token)
            .json(&serde_json::json!({ "comment": comment }))
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }
}
