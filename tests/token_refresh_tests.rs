//! Token refresh against a mocked Google token endpoint.

#[path = "test_utils/mod.rs"]
mod test_utils;

use chrono::{Duration, Utc};
use uuid::Uuid;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use reviewdesk::connectors::SourceKind;
use reviewdesk::error::ServiceError;
use reviewdesk::models::source_connection::ConnectionStatus;
use reviewdesk::token_refresh::TokenRefreshService;
use test_utils::*;

async fn expiring_connection(
    db: &sea_orm::DatabaseConnection,
    expires_in: Duration,
) -> anyhow::Result<reviewdesk::models::source_connection::Model> {
    let business = create_business(db, Uuid::new_v4()).await?;
    let source = source_of(db, SourceKind::GoogleBusiness).await?;
    connect_google(
        db,
        &business,
        source.id,
        "ya29.old",
        Some("1//old"),
        Some(Utc::now() + expires_in),
    )
    .await
}

#[tokio::test]
async fn test_fresh_token_is_used_without_refresh() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    let db = setup_test_db().await?;
    let connection = expiring_connection(&db, Duration::hours(1)).await?;
    let service = TokenRefreshService::new(connections(&db), 60);
    let connector = google_connector(&server.uri());

    let fresh = service.ensure_fresh_token(&connector, connection).await?;
    assert_eq!(fresh.access_token, "ya29.old");
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_refresh_rotates_tokens() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=1%2F%2Fold"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "ya29.new",
            "refresh_token": "1//new",
            "expires_in": 3599
        })))
        .expect(1)
        .mount(&server)
        .await;

    let db = setup_test_db().await?;
    // Inside the lead time, so it counts as expiring.
    let connection = expiring_connection(&db, Duration::seconds(30)).await?;
    let service = TokenRefreshService::new(connections(&db), 60);
    let connector = google_connector(&server.uri());

    let fresh = service.ensure_fresh_token(&connector, connection).await?;
    assert_eq!(fresh.access_token, "ya29.new");

    let repo = connections(&db);
    let stored = repo
        .find_by_id(fresh.connection.id)
        .await?
        .expect("connection kept");
    assert_eq!(repo.decrypt_access_token(&stored)?.as_deref(), Some("ya29.new"));
    assert_eq!(repo.decrypt_refresh_token(&stored)?.as_deref(), Some("1//new"));
    let expires_at = stored.token_expires_at.expect("expiry recorded");
    assert!(expires_at > Utc::now() + Duration::minutes(50));
    Ok(())
}

#[tokio::test]
async fn test_invalid_grant_disconnects() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": "invalid_grant",
            "error_description": "Token has been expired or revoked."
        })))
        .mount(&server)
        .await;

    let db = setup_test_db().await?;
    let connection = expiring_connection(&db, -Duration::minutes(1)).await?;
    let connection_id = connection.id;
    let service = TokenRefreshService::new(connections(&db), 60);
    let connector = google_connector(&server.uri());

    let err = service
        .ensure_fresh_token(&connector, connection)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::TokenRefreshFailed(_)));

    let stored = connections(&db)
        .find_by_id(connection_id)
        .await?
        .expect("row kept");
    assert_eq!(stored.status, ConnectionStatus::Disconnected);
    assert!(stored.oauth_token_ciphertext.is_none());
    assert!(stored.oauth_refresh_token_ciphertext.is_none());
    Ok(())
}

#[tokio::test]
async fn test_transient_failure_keeps_connection() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let db = setup_test_db().await?;
    let connection = expiring_connection(&db, -Duration::minutes(1)).await?;
    let connection_id = connection.id;
    let service = TokenRefreshService::new(connections(&db), 60);
    let connector = google_connector(&server.uri());

    let err = service
        .ensure_fresh_token(&connector, connection)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::TokenRefreshFailed(_)));

    let stored = connections(&db)
        .find_by_id(connection_id)
        .await?
        .expect("row kept");
    assert_eq!(stored.status, ConnectionStatus::Connected);
    assert!(stored.oauth_refresh_token_ciphertext.is_some());
    Ok(())
}
