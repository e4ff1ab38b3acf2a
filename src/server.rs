//! # Server Configuration
//!
//! Router assembly, shared application state and the serve loop.

use std::sync::Arc;

use axum::{
    Router,
    http::HeaderValue,
    middleware,
    routing::{get, post, put},
};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

use crate::ai::AiClient;
use crate::auth::auth_middleware;
use crate::config::AppConfig;
use crate::connectors::Registry;
use crate::crypto::CryptoKey;
use crate::handlers;
use crate::ingestion::ReviewIngestion;
use crate::oauth_flow::OAuthExchangeFlow;
use crate::posting::ReplyPoster;
use crate::repositories::{
    BusinessRepository, EnabledSourceRepository, GeneratedResponseRepository,
    OAuthStateRepository, ReviewRepository, SourceConnectionRepository, SourceRepository,
};
use crate::responses::ResponseLifecycle;
use crate::session::SessionStore;
use crate::telemetry::trace_context_middleware;
use crate::token_refresh::TokenRefreshService;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: Arc<DatabaseConnection>,
    pub crypto_key: CryptoKey,
    pub registry: Arc<Registry>,
    pub ai: Arc<dyn AiClient>,
    pub sessions: Arc<SessionStore>,
}

impl AppState {
    pub fn new(
        config: Arc<AppConfig>,
        db: DatabaseConnection,
        crypto_key: CryptoKey,
        registry: Registry,
        ai: Arc<dyn AiClient>,
    ) -> Self {
        let sessions = Arc::new(SessionStore::from_config(&config.sync));
        Self {
            config,
            db: Arc::new(db),
            crypto_key,
            registry: Arc::new(registry),
            ai,
            sessions,
        }
    }

    pub fn businesses(&self) -> BusinessRepository {
        BusinessRepository::new(Arc::clone(&self.db))
    }

    pub fn sources(&self) -> SourceRepository {
        SourceRepository::new(Arc::clone(&self.db))
    }

    pub fn enabled_sources(&self) -> EnabledSourceRepository {
        EnabledSourceRepository::new(Arc::clone(&self.db))
    }

    pub fn connections(&self) -> SourceConnectionRepository {
        SourceConnectionRepository::new(Arc::clone(&self.db), self.crypto_key.clone())
    }

    pub fn reviews(&self) -> ReviewRepository {
        ReviewRepository::new(Arc::clone(&self.db))
    }

    pub fn responses(&self) -> GeneratedResponseRepository {
        GeneratedResponseRepository::new(Arc::clone(&self.db))
    }

    pub fn oauth_states(&self) -> OAuthStateRepository {
        OAuthStateRepository::new(Arc::clone(&self.db), self.config.oauth_state_ttl())
    }

    pub fn token_refresh(&self) -> TokenRefreshService {
        TokenRefreshService::new(
            self.connections(),
            self.config.token_refresh.lead_time_seconds,
        )
    }

    pub fn oauth_flow(&self) -> OAuthExchangeFlow {
        OAuthExchangeFlow {
            businesses: self.businesses(),
            sources: self.sources(),
            states: self.oauth_states(),
            connections: self.connections(),
            registry: Arc::clone(&self.registry),
        }
    }

    pub fn ingestion(&self) -> ReviewIngestion {
        ReviewIngestion {
            businesses: self.businesses(),
            sources: self.sources(),
            enabled_sources: self.enabled_sources(),
            connections: self.connections(),
            reviews: self.reviews(),
            token_refresh: self.token_refresh(),
            registry: Arc::clone(&self.registry),
        }
    }

    pub fn poster(&self) -> ReplyPoster {
        ReplyPoster {
            sources: self.sources(),
            enabled_sources: self.enabled_sources(),
            connections: self.connections(),
            reviews: self.reviews(),
            token_refresh: self.token_refresh(),
            registry: Arc::clone(&self.registry),
        }
    }

    pub fn lifecycle(&self) -> ResponseLifecycle {
        ResponseLifecycle {
            db: Arc::clone(&self.db),
            businesses: self.businesses(),
            sources: self.sources(),
            reviews: self.reviews(),
            responses: self.responses(),
            ai: Arc::clone(&self.ai),
            poster: self.poster(),
        }
    }
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    let protected = Router::new()
        .route("/sources", get(handlers::sources::list_sources))
        .route(
            "/businesses",
            get(handlers::businesses::list_businesses).post(handlers::businesses::create_business),
        )
        .route(
            "/businesses/{business_id}/sources/{source_id}",
            put(handlers::sources::enable_source).delete(handlers::sources::disable_source),
        )
        .route(
            "/businesses/{business_id}/sources/{source_id}/connect",
            post(handlers::connect::connect_source),
        )
        .route(
            "/businesses/{business_id}/sources/{source_id}/connection",
            get(handlers::connections::get_connection)
                .delete(handlers::connections::delete_connection),
        )
        .route(
            "/businesses/{business_id}/sources/{source_id}/sync",
            post(handlers::reviews::sync_reviews),
        )
        .route(
            "/businesses/{business_id}/reviews",
            post(handlers::reviews::create_review),
        )
        .route("/reviews", get(handlers::reviews::list_reviews))
        .route(
            "/reviews/{review_id}/analyze",
            post(handlers::responses::analyze_review),
        )
        .route(
            "/reviews/{review_id}/regenerate",
            post(handlers::responses::regenerate_response),
        )
        .route(
            "/responses/{response_id}",
            put(handlers::responses::edit_response),
        )
        .route(
            "/responses/{response_id}/approve",
            post(handlers::responses::approve_response),
        )
        .route(
            "/responses/{response_id}/reject",
            post(handlers::responses::reject_response),
        )
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state.config),
            auth_middleware,
        ));

    let cors = match HeaderValue::from_str(&state.config.app_origin) {
        Ok(origin) => CorsLayer::new()
            .allow_origin(origin)
            .allow_methods(tower_http::cors::Any)
            .allow_headers(tower_http::cors::Any),
        Err(_) => CorsLayer::new(),
    };

    Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::health))
        .route(
            "/oauth/google/callback",
            get(handlers::oauth_callback::google_callback),
        )
        .merge(protected)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
        .layer(middleware::from_fn(trace_context_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

/// Serves `state` until `shutdown` is cancelled.
pub async fn run_server(
    state: AppState,
    shutdown: CancellationToken,
) -> Result<(), Box<dyn std::error::Error>> {
    let addr = state
        .config
        .bind_addr()
        .map_err(|e| format!("Invalid server address: {}", e))?;
    let profile = state.config.profile.clone();
    let app = create_app(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %addr, profile = %profile, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
            );
        }
    }
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::health,
        crate::handlers::oauth_callback::google_callback,
        crate::handlers::sources::list_sources,
        crate::handlers::sources::enable_source,
        crate::handlers::sources::disable_source,
        crate::handlers::businesses::list_businesses,
        crate::handlers::businesses::create_business,
        crate::handlers::connect::connect_source,
        crate::handlers::connections::get_connection,
        crate::handlers::connections::delete_connection,
        crate::handlers::reviews::sync_reviews,
        crate::handlers::reviews::create_review,
        crate::handlers::reviews::list_reviews,
        crate::handlers::responses::analyze_review,
        crate::handlers::responses::regenerate_response,
        crate::handlers::responses::edit_response,
        crate::handlers::responses::approve_response,
        crate::handlers::responses::reject_response,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::error::ApiError,
            crate::error::ProviderError,
            crate::connectors::SourceKind,
            crate::connectors::AuthType,
            crate::ingestion::SyncSummary,
            crate::responses::PostingOutcome,
            crate::handlers::HealthResponse,
            crate::handlers::sources::SourceInfo,
            crate::handlers::sources::SourcesResponse,
            crate::handlers::sources::EnableSourceRequest,
            crate::handlers::sources::EnabledSourceResponse,
            crate::handlers::sources::MessageResponse,
            crate::handlers::businesses::BusinessInfo,
            crate::handlers::businesses::CreateBusinessRequest,
            crate::handlers::businesses::BusinessesResponse,
            crate::handlers::connect::ConnectSourceRequest,
            crate::handlers::connect::ConnectSourceResponse,
            crate::handlers::connections::ConnectionInfo,
            crate::handlers::connections::ConnectionResponse,
            crate::handlers::reviews::SyncResponse,
            crate::handlers::reviews::CreateReviewRequest,
            crate::handlers::reviews::ReviewInfo,
            crate::handlers::reviews::ReviewResponse,
            crate::handlers::reviews::ReviewsResponse,
            crate::handlers::responses::ResponseInfo,
            crate::handlers::responses::AnalyzeResponse,
            crate::handlers::responses::RegenerateRequest,
            crate::handlers::responses::EditResponseRequest,
            crate::handlers::responses::ResponseEnvelope,
            crate::handlers::responses::ApproveResponse,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "root", description = "Service information"),
        (name = "oauth", description = "Provider sign-in callbacks"),
        (name = "businesses", description = "Businesses owned by the caller"),
        (name = "sources", description = "Review platforms and their enablement"),
        (name = "connections", description = "Source credentials"),
        (name = "reviews", description = "Review ingestion and listing"),
        (name = "responses", description = "AI reply drafts and approval"),
    ),
    info(
        title = "ReviewDesk API",
        description = "Review ingestion and AI-assisted reply management",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_lists_core_paths() {
        let doc = ApiDoc::openapi();
        let paths: Vec<&String> = doc.paths.paths.keys().collect();
        for expected in [
            "/sources",
            "/oauth/google/callback",
            "/businesses/{business_id}/sources/{source_id}/sync",
            "/responses/{response_id}/approve",
        ] {
            assert!(
                paths.iter().any(|path| path.as_str() == expected),
                "missing {expected}"
            );
        }
    }
}
