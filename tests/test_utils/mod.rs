//! Shared fixtures for integration tests.
//!
//! Every test gets its own in-memory SQLite database with all migrations
//! applied and the source catalog seeded.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, Statement};
use uuid::Uuid;

use reviewdesk::ai::{AiClient, AiError, ReviewPrompt};
use reviewdesk::config::AppConfig;
use reviewdesk::connectors::{GoogleBusinessConnector, GoogleBusinessSettings, Registry, SourceKind};
use reviewdesk::crypto::CryptoKey;
use reviewdesk::models::review::Sentiment;
use reviewdesk::models::{business, review, source, source_connection};
use reviewdesk::repositories::review::{InsertOutcome, NewReview};
use reviewdesk::repositories::source_connection::OAuthTokens;
use reviewdesk::repositories::{
    BusinessRepository, EnabledSourceRepository, ReviewRepository, SourceConnectionRepository,
    SourceRepository,
};
use reviewdesk::seeds::seed_sources;
use reviewdesk::server::AppState;

pub const OPERATOR_TOKEN: &str = "test-operator-token";
pub const APP_ORIGIN: &str = "https://app.reviewdesk.test";
pub const ACCOUNT_ID: &str = "111";
pub const LOCATION_ID: &str = "222";

/// Sets up an in-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await?;
    db.execute(Statement::from_string(
        db.get_database_backend(),
        "PRAGMA foreign_keys = ON".to_string(),
    ))
    .await?;
    Migrator::up(&db, None).await?;
    seed_sources(&db).await?;
    Ok(db)
}

pub fn test_crypto_key() -> CryptoKey {
    CryptoKey::new(vec![7u8; 32]).expect("32 byte key")
}

pub fn test_config() -> AppConfig {
    AppConfig {
        profile: "test".to_string(),
        operator_tokens: vec![OPERATOR_TOKEN.to_string()],
        crypto_key: Some(vec![7u8; 32]),
        public_base_url: "https://api.reviewdesk.test".to_string(),
        app_origin: APP_ORIGIN.to_string(),
        google_client_id: Some("client-123".to_string()),
        google_client_secret: Some("shh".to_string()),
        ..AppConfig::default()
    }
}

/// Google connector whose API endpoints live under `base`.
///
/// The authorize page keeps Google's real https origin; only a browser opens it.
pub fn google_connector(base: &str) -> GoogleBusinessConnector {
    let mut settings = GoogleBusinessSettings {
        client_id: "client-123".to_string(),
        client_secret: "shh".to_string(),
        redirect_uri: "https://api.reviewdesk.test/oauth/google/callback".to_string(),
        oauth_base: String::new(),
        token_base: String::new(),
        account_api_base: String::new(),
        business_api_base: String::new(),
        timeout: Duration::from_secs(5),
    }
    .with_single_base(base);
    settings.oauth_base = "https://accounts.google.com".to_string();
    GoogleBusinessConnector::new(settings).expect("connector builds")
}

pub fn google_registry(base: &str) -> Registry {
    let mut registry = Registry::new();
    registry.register(Arc::new(google_connector(base)));
    registry
}

/// Language model stand-in with a fixed answer and call counters.
pub struct ScriptedAi {
    pub sentiment: Sentiment,
    pub draft: String,
    pub classify_calls: AtomicUsize,
    pub draft_calls: AtomicUsize,
    pub fail_with: Option<AiError>,
}

impl ScriptedAi {
    pub fn new(sentiment: Sentiment, draft: &str) -> Self {
        Self {
            sentiment,
            draft: draft.to_string(),
            classify_calls: AtomicUsize::new(0),
            draft_calls: AtomicUsize::new(0),
            fail_with: None,
        }
    }

    pub fn failing(error: AiError) -> Self {
        Self {
            fail_with: Some(error),
            ..Self::new(Sentiment::Neutral, "")
        }
    }

    pub fn calls(&self) -> usize {
        self.classify_calls.load(Ordering::SeqCst) + self.draft_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AiClient for ScriptedAi {
    fn model(&self) -> &str {
        "scripted-model"
    }

    async fn classify_sentiment(&self, _review: &ReviewPrompt) -> Result<Sentiment, AiError> {
        self.classify_calls.fetch_add(1, Ordering::SeqCst);
        match &self.fail_with {
            Some(error) => Err(error.clone()),
            None => Ok(self.sentiment),
        }
    }

    async fn draft_reply(
        &self,
        _review: &ReviewPrompt,
        _sentiment: Sentiment,
    ) -> Result<String, AiError> {
        self.draft_calls.fetch_add(1, Ordering::SeqCst);
        match &self.fail_with {
            Some(error) => Err(error.clone()),
            None => Ok(self.draft.clone()),
        }
    }
}

pub fn test_state(db: DatabaseConnection, registry: Registry, ai: Arc<dyn AiClient>) -> AppState {
    AppState::new(
        Arc::new(test_config()),
        db,
        test_crypto_key(),
        registry,
        ai,
    )
}

pub fn connections(db: &DatabaseConnection) -> SourceConnectionRepository {
    SourceConnectionRepository::new(Arc::new(db.clone()), test_crypto_key())
}

pub async fn create_business(db: &DatabaseConnection, user_id: Uuid) -> Result<business::Model> {
    Ok(BusinessRepository::new(Arc::new(db.clone()))
        .create(user_id, "Acme Bakery")
        .await?)
}

pub async fn source_of(db: &DatabaseConnection, kind: SourceKind) -> Result<source::Model> {
    SourceRepository::new(Arc::new(db.clone()))
        .find_by_kind(kind)
        .await?
        .ok_or_else(|| anyhow::anyhow!("source {} not seeded", kind.slug()))
}

pub async fn enable_source(
    db: &DatabaseConnection,
    business: &business::Model,
    source_id: Uuid,
    location_id: Option<&str>,
) -> Result<()> {
    EnabledSourceRepository::new(Arc::new(db.clone()))
        .enable(
            business.id,
            source_id,
            business.user_id,
            location_id.map(str::to_string),
        )
        .await?;
    Ok(())
}

/// A connected Google connection with sealed tokens and a linked account.
pub async fn connect_google(
    db: &DatabaseConnection,
    business: &business::Model,
    source_id: Uuid,
    access_token: &str,
    refresh_token: Option<&str>,
    expires_at: Option<DateTime<Utc>>,
) -> Result<source_connection::Model> {
    let repo = connections(db);
    repo.ensure_oauth_placeholder(business.id, source_id, business.user_id)
        .await?;
    let connection = repo
        .store_oauth_tokens(
            business.id,
            source_id,
            business.user_id,
            OAuthTokens {
                access_token,
                refresh_token,
                expires_at,
            },
            Some(serde_json::json!({ "account_id": ACCOUNT_ID })),
        )
        .await?;
    Ok(connection)
}

/// Business with Google enabled at a location and connected.
pub struct GoogleFixture {
    pub business: business::Model,
    pub source: source::Model,
    pub connection: source_connection::Model,
}

pub async fn google_fixture(db: &DatabaseConnection, user_id: Uuid) -> Result<GoogleFixture> {
    let business = create_business(db, user_id).await?;
    let source = source_of(db, SourceKind::GoogleBusiness).await?;
    enable_source(db, &business, source.id, Some(LOCATION_ID)).await?;
    let connection = connect_google(
        db,
        &business,
        source.id,
        "ya29.live",
        Some("1//refresh"),
        Some(Utc::now() + chrono::Duration::hours(1)),
    )
    .await?;
    Ok(GoogleFixture {
        business,
        source,
        connection,
    })
}

pub async fn insert_review(
    db: &DatabaseConnection,
    business: &business::Model,
    source_id: Option<Uuid>,
    external_review_id: Option<&str>,
    reviewer_name: &str,
    rating: i32,
    text: &str,
) -> Result<review::Model> {
    let outcome = ReviewRepository::new(Arc::new(db.clone()))
        .insert(NewReview {
            business_id: business.id,
            user_id: business.user_id,
            source_id,
            source_platform: if source_id.is_some() {
                "Google Business".to_string()
            } else {
                "Manual".to_string()
            },
            external_review_id: external_review_id.map(str::to_string),
            reviewer_name: reviewer_name.to_string(),
            rating,
            review_text: text.to_string(),
            review_date: Utc::now(),
        })
        .await?;
    match outcome {
        InsertOutcome::Inserted(review) => Ok(review),
        InsertOutcome::Duplicate => Err(anyhow::anyhow!("duplicate review")),
    }
}
