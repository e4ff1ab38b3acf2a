//! Review sync against a mocked Google Business Profile API.

#[path = "test_utils/mod.rs"]
mod test_utils;

use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use reviewdesk::connectors::SourceKind;
use reviewdesk::error::ServiceError;
use reviewdesk::models::review::{ReviewStatus, Sentiment};
use reviewdesk::models::source_connection::ConnectionStatus;
use reviewdesk::repositories::review::ReviewFilter;
use reviewdesk::server::AppState;
use test_utils::*;

const REVIEWS_PATH: &str = "/v4/accounts/111/locations/222/reviews";

fn google_reviews() -> serde_json::Value {
    serde_json::json!({
        "reviews": [
            {
                "name": "accounts/111/locations/222/reviews/r1",
                "reviewer": { "displayName": "Jane" },
                "starRating": "FIVE",
                "comment": "Lovely croissants",
                "createTime": "2024-05-01T10:00:00Z"
            },
            {
                "name": "accounts/111/locations/222/reviews/r2",
                "reviewer": { "displayName": "Sam" },
                "starRating": "TWO",
                "comment": "Slow service",
                "createTime": "2024-05-02T10:00:00Z"
            },
            {
                "reviewer": { "displayName": "Ghost" },
                "starRating": "THREE",
                "comment": "No identifier"
            }
        ]
    })
}

async fn state_for(server: &MockServer) -> anyhow::Result<AppState> {
    let db = setup_test_db().await?;
    Ok(test_state(
        db,
        google_registry(&server.uri()),
        Arc::new(ScriptedAi::new(Sentiment::Positive, "Thanks!")),
    ))
}

#[tokio::test]
async fn test_sync_is_idempotent() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(REVIEWS_PATH))
        .and(header("authorization", "Bearer ya29.live"))
        .respond_with(ResponseTemplate::new(200).set_body_json(google_reviews()))
        .mount(&server)
        .await;
    let state = state_for(&server).await?;
    let fixture = google_fixture(&state.db, Uuid::new_v4()).await?;
    let ingestion = state.ingestion();

    let first = ingestion
        .sync(fixture.business.user_id, fixture.business.id, fixture.source.id)
        .await?;
    assert_eq!(first.total_fetched, 3);
    assert_eq!(first.new_reviews, 2);

    let second = ingestion
        .sync(fixture.business.user_id, fixture.business.id, fixture.source.id)
        .await?;
    assert_eq!(second.total_fetched, 3);
    assert_eq!(second.new_reviews, 0);

    let stored = state
        .reviews()
        .list(fixture.business.user_id, &ReviewFilter::default())
        .await?;
    assert_eq!(stored.len(), 2);
    let jane = stored
        .iter()
        .find(|review| review.reviewer_name == "Jane")
        .expect("Jane's review stored");
    assert_eq!(jane.rating, 5);
    assert_eq!(jane.external_review_id.as_deref(), Some("r1"));
    assert_eq!(jane.source_platform, "Google Business");
    assert_eq!(jane.status, ReviewStatus::Pending);
    assert!(jane.sentiment.is_none());
    Ok(())
}

#[tokio::test]
async fn test_sync_requires_connection_before_location() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    let state = state_for(&server).await?;
    let business = create_business(&state.db, Uuid::new_v4()).await?;
    let source = source_of(&state.db, SourceKind::GoogleBusiness).await?;
    let ingestion = state.ingestion();

    // Neither connected nor located: the connection is reported first.
    let err = ingestion
        .sync(business.user_id, business.id, source.id)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::NotConnected(_)));

    connect_google(
        &state.db,
        &business,
        source.id,
        "ya29.live",
        Some("1//refresh"),
        Some(Utc::now() + Duration::hours(1)),
    )
    .await?;
    enable_source(&state.db, &business, source.id, None).await?;

    let err = ingestion
        .sync(business.user_id, business.id, source.id)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::LocationNotConfigured(_)));

    assert!(server.received_requests().await.unwrap_or_default().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_sync_rejects_other_users() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    let state = state_for(&server).await?;
    let fixture = google_fixture(&state.db, Uuid::new_v4()).await?;

    let err = state
        .ingestion()
        .sync(Uuid::new_v4(), fixture.business.id, fixture.source.id)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::AccessDenied(_)));
    Ok(())
}

#[tokio::test]
async fn test_sync_surfaces_provider_rate_limit() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(REVIEWS_PATH))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "30"))
        .mount(&server)
        .await;
    let state = state_for(&server).await?;
    let fixture = google_fixture(&state.db, Uuid::new_v4()).await?;

    let err = state
        .ingestion()
        .sync(fixture.business.user_id, fixture.business.id, fixture.source.id)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ServiceError::RateLimited {
            retry_after: Some(30)
        }
    ));
    Ok(())
}

#[tokio::test]
async fn test_sync_maps_server_error_to_provider_error() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(REVIEWS_PATH))
        .respond_with(ResponseTemplate::new(500).set_body_string("backend unavailable"))
        .expect(1)
        .mount(&server)
        .await;
    let state = state_for(&server).await?;
    let fixture = google_fixture(&state.db, Uuid::new_v4()).await?;

    let err = state
        .ingestion()
        .sync(fixture.business.user_id, fixture.business.id, fixture.source.id)
        .await
        .unwrap_err();
    match err {
        ServiceError::Provider { status, .. } => assert_eq!(status, 500),
        other => panic!("expected a provider error, got {other:?}"),
    }

    let stored = state
        .reviews()
        .list(fixture.business.user_id, &ReviewFilter::default())
        .await?;
    assert!(stored.is_empty());
    let connection = state
        .connections()
        .get(fixture.business.id, fixture.source.id)
        .await?;
    assert_eq!(connection.status, ConnectionStatus::Connected);
    Ok(())
}

#[tokio::test]
async fn test_sync_refreshes_expired_token_first() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "ya29.rotated",
            "expires_in": 3599
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(REVIEWS_PATH))
        .and(header("authorization", "Bearer ya29.rotated"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let state = state_for(&server).await?;
    let business = create_business(&state.db, Uuid::new_v4()).await?;
    let source = source_of(&state.db, SourceKind::GoogleBusiness).await?;
    enable_source(&state.db, &business, source.id, Some(LOCATION_ID)).await?;
    connect_google(
        &state.db,
        &business,
        source.id,
        "ya29.stale",
        Some("1//refresh"),
        Some(Utc::now() - Duration::minutes(5)),
    )
    .await?;

    let summary = state
        .ingestion()
        .sync(business.user_id, business.id, source.id)
        .await?;
    assert_eq!(summary.total_fetched, 0);

    let connection = state.connections().get(business.id, source.id).await?;
    assert_eq!(connection.status, ConnectionStatus::Connected);
    assert_eq!(
        state.connections().decrypt_access_token(&connection)?.as_deref(),
        Some("ya29.rotated")
    );
    // Google omitted a new refresh token, so the old one is kept.
    assert_eq!(
        state.connections().decrypt_refresh_token(&connection)?.as_deref(),
        Some("1//refresh")
    );
    Ok(())
}
