//! Sign-in flow: state ledger, code exchange and the callback page.

#[path = "test_utils/mod.rs"]
mod test_utils;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use chrono::Duration;
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use reviewdesk::connectors::SourceKind;
use reviewdesk::error::ServiceError;
use reviewdesk::models::review::Sentiment;
use reviewdesk::models::source_connection::{ConnectionStatus, ConnectionType};
use reviewdesk::oauth_flow::{CallbackParams, ExchangePhase};
use reviewdesk::repositories::OAuthStateRepository;
use reviewdesk::server::{AppState, create_app};
use test_utils::*;

fn callback(code: Option<&str>, state: Option<&str>) -> CallbackParams {
    CallbackParams {
        code: code.map(str::to_string),
        state: state.map(str::to_string),
        error: None,
        error_description: None,
    }
}

fn state_of(url: &url::Url) -> String {
    url.query_pairs()
        .find(|(key, _)| key == "state")
        .map(|(_, value)| value.into_owned())
        .expect("authorize url carries a state")
}

async fn mock_google_sign_in(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "ya29.fresh",
            "refresh_token": "1//fresh",
            "expires_in": 3599
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/accounts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "accounts": [{ "name": "accounts/987" }]
        })))
        .mount(server)
        .await;
}

async fn google_state(server: &MockServer) -> anyhow::Result<AppState> {
    let db = setup_test_db().await?;
    Ok(test_state(
        db,
        google_registry(&server.uri()),
        Arc::new(ScriptedAi::new(Sentiment::Positive, "Thanks!")),
    ))
}

#[tokio::test]
async fn test_state_token_is_single_use() -> anyhow::Result<()> {
    let db = setup_test_db().await?;
    let business = create_business(&db, Uuid::new_v4()).await?;
    let source = source_of(&db, SourceKind::GoogleBusiness).await?;
    let states = OAuthStateRepository::new(Arc::new(db.clone()), Duration::minutes(10));

    let token = states.issue(business.user_id, business.id, source.id).await?;
    assert_eq!(token.len(), 43);

    let consumed = states.consume(&token).await?;
    assert_eq!(consumed.user_id, business.user_id);
    assert_eq!(consumed.business_id, business.id);
    assert_eq!(consumed.source_id, source.id);

    let replay = states.consume(&token).await;
    assert!(matches!(replay, Err(ServiceError::InvalidOrExpiredState)));

    let unknown = states.consume("never-issued").await;
    assert!(matches!(unknown, Err(ServiceError::InvalidOrExpiredState)));
    Ok(())
}

#[tokio::test]
async fn test_expired_state_is_rejected_and_purged() -> anyhow::Result<()> {
    let db = setup_test_db().await?;
    let business = create_business(&db, Uuid::new_v4()).await?;
    let source = source_of(&db, SourceKind::GoogleBusiness).await?;
    let expired = OAuthStateRepository::new(Arc::new(db.clone()), Duration::seconds(-5));

    let token = expired.issue(business.user_id, business.id, source.id).await?;
    assert!(matches!(
        expired.consume(&token).await,
        Err(ServiceError::InvalidOrExpiredState)
    ));

    assert_eq!(expired.purge_expired().await?, 1);
    assert!(expired.find(&token).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_initiate_and_complete_connects_google() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    mock_google_sign_in(&server).await;
    let state = google_state(&server).await?;
    let business = create_business(&state.db, Uuid::new_v4()).await?;
    let source = source_of(&state.db, SourceKind::GoogleBusiness).await?;
    let flow = state.oauth_flow();

    let url = flow
        .initiate(business.user_id, business.id, source.id)
        .await?;
    assert_eq!(url.scheme(), "https");
    assert!(url.as_str().contains("access_type=offline"));

    let pending = state.connections().get(business.id, source.id).await?;
    assert_eq!(pending.status, ConnectionStatus::Pending);

    let token = state_of(&url);
    let outcome = flow.complete(callback(Some("auth-code"), Some(&token))).await;
    assert!(outcome.is_success(), "unexpected outcome: {:?}", outcome.phase);
    assert_eq!(outcome.business_id, Some(business.id));

    let connection = state.connections().get(business.id, source.id).await?;
    assert_eq!(connection.status, ConnectionStatus::Connected);
    assert_eq!(connection.connection_type, ConnectionType::OAuth);
    assert_eq!(connection.account_id(), Some("987"));
    assert!(connection.token_expires_at.is_some());
    assert_eq!(
        state.connections().decrypt_access_token(&connection)?.as_deref(),
        Some("ya29.fresh")
    );
    assert_eq!(
        state.connections().decrypt_refresh_token(&connection)?.as_deref(),
        Some("1//fresh")
    );

    // The same redirect replayed must not exchange again.
    let replay = flow.complete(callback(Some("auth-code"), Some(&token))).await;
    assert_eq!(
        replay.failure().map(|failure| failure.code),
        Some("INVALID_OR_EXPIRED_STATE")
    );
    Ok(())
}

#[tokio::test]
async fn test_complete_reports_denial_and_missing_code() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    let state = google_state(&server).await?;
    let flow = state.oauth_flow();

    let denied = flow
        .complete(CallbackParams {
            code: None,
            state: Some("whatever".into()),
            error: Some("access_denied".into()),
            error_description: None,
        })
        .await;
    assert_eq!(denied.failure().map(|f| f.code), Some("PROVIDER_DENIED"));

    let missing = flow.complete(callback(None, Some("whatever"))).await;
    assert_eq!(missing.failure().map(|f| f.code), Some("MISSING_AUTH_CODE"));
    assert!(matches!(missing.phase, ExchangePhase::Failed(_)));

    // Neither attempt reached the provider.
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_initiate_rejects_foreign_business() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    let state = google_state(&server).await?;
    let business = create_business(&state.db, Uuid::new_v4()).await?;
    let source = source_of(&state.db, SourceKind::GoogleBusiness).await?;

    let result = state
        .oauth_flow()
        .initiate(Uuid::new_v4(), business.id, source.id)
        .await;
    assert!(matches!(result, Err(ServiceError::AccessDenied(_))));
    assert!(state.connections().find(business.id, source.id).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_initiate_rejects_non_oauth_source() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    let state = google_state(&server).await?;
    let business = create_business(&state.db, Uuid::new_v4()).await?;
    let yelp = source_of(&state.db, SourceKind::Yelp).await?;

    let result = state
        .oauth_flow()
        .initiate(business.user_id, business.id, yelp.id)
        .await;
    assert!(matches!(result, Err(ServiceError::InvalidInput { .. })));
    Ok(())
}

#[tokio::test]
async fn test_token_write_is_scoped_to_owner() -> anyhow::Result<()> {
    let db = setup_test_db().await?;
    let business = create_business(&db, Uuid::new_v4()).await?;
    let source = source_of(&db, SourceKind::GoogleBusiness).await?;
    let repo = connections(&db);
    repo.ensure_oauth_placeholder(business.id, source.id, business.user_id)
        .await?;

    let intruder = repo
        .store_oauth_tokens(
            business.id,
            source.id,
            Uuid::new_v4(),
            reviewdesk::repositories::source_connection::OAuthTokens {
                access_token: "stolen",
                refresh_token: None,
                expires_at: None,
            },
            None,
        )
        .await;
    assert!(matches!(intruder, Err(ServiceError::NotConnected(_))));

    let untouched = repo.get(business.id, source.id).await?;
    assert_eq!(untouched.status, ConnectionStatus::Pending);
    assert!(untouched.oauth_token_ciphertext.is_none());
    Ok(())
}

#[tokio::test]
async fn test_restarting_flow_reopens_disconnected_row_only() -> anyhow::Result<()> {
    let db = setup_test_db().await?;
    let business = create_business(&db, Uuid::new_v4()).await?;
    let source = source_of(&db, SourceKind::GoogleBusiness).await?;
    let repo = connections(&db);
    let connected = connect_google(&db, &business, source.id, "ya29.live", None, None).await?;

    let kept = repo
        .ensure_oauth_placeholder(business.id, source.id, business.user_id)
        .await?;
    assert_eq!(kept.id, connected.id);
    assert_eq!(kept.status, ConnectionStatus::Connected);
    assert!(kept.oauth_token_ciphertext.is_some());

    repo.disconnect(kept).await?;
    let reopened = repo
        .ensure_oauth_placeholder(business.id, source.id, business.user_id)
        .await?;
    assert_eq!(reopened.id, connected.id);
    assert_eq!(reopened.status, ConnectionStatus::Pending);
    assert!(reopened.oauth_token_ciphertext.is_none());
    Ok(())
}

#[tokio::test]
async fn test_callback_page_posts_result_to_app_origin() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    mock_google_sign_in(&server).await;
    let state = google_state(&server).await?;
    let business = create_business(&state.db, Uuid::new_v4()).await?;
    let source = source_of(&state.db, SourceKind::GoogleBusiness).await?;
    let url = state
        .oauth_flow()
        .initiate(business.user_id, business.id, source.id)
        .await?;
    let token = state_of(&url);

    let app = create_app(state.clone());
    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/oauth/google/callback?code=abc&state={token}"))
                .body(Body::empty())?,
        )
        .await?;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CACHE_CONTROL).map(|v| v.as_bytes()),
        Some(&b"no-store"[..])
    );
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    let page = String::from_utf8(body.to_vec())?;
    assert!(page.contains(r#"{"type":"auth-success","service":"google"}"#));
    assert!(page.contains(APP_ORIGIN));

    let app = create_app(state);
    let failed = app
        .oneshot(
            Request::builder()
                .uri("/oauth/google/callback?error=access_denied")
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(failed.status(), StatusCode::BAD_REQUEST);
    let body = axum::body::to_bytes(failed.into_body(), usize::MAX).await?;
    assert!(String::from_utf8(body.to_vec())?.contains("auth-error"));
    Ok(())
}
