//! # Reply Posting
//!
//! Publishes an approved reply to the platform a review came from.

use std::sync::Arc;
use tracing::{info, instrument};

use crate::connectors::{ListingRef, Registry};
use crate::error::ServiceError;
use crate::models::review::{self, ReviewStatus};
use crate::models::source_connection::ConnectionType;
use crate::repositories::{
    EnabledSourceRepository, ReviewRepository, SourceConnectionRepository, SourceRepository,
};
use crate::token_refresh::TokenRefreshService;

#[derive(Clone)]
pub struct ReplyPoster {
    pub sources: SourceRepository,
    pub enabled_sources: EnabledSourceRepository,
    pub connections: SourceConnectionRepository,
    pub reviews: ReviewRepository,
    pub token_refresh: TokenRefreshService,
    pub registry: Arc<Registry>,
}

impl ReplyPoster {
    /// Posts `text` as the reply to `review` and marks the review posted.
    #[instrument(skip_all, fields(review_id = %review.id))]
    pub async fn post(
        &self,
        review: review::Model,
        text: &str,
    ) -> Result<review::Model, ServiceError> {
        let external_review_id = match review.external_review_id.as_deref() {
            Some(external) if !external.is_empty() => external.to_string(),
            _ => return Err(ServiceError::NotExternallySourced),
        };
        let source_id = review.source_id.ok_or(ServiceError::NotExternallySourced)?;

        let (source, kind) = self.sources.get_with_kind(source_id).await?;
        if !kind.supports_reply_posting() {
            return Err(ServiceError::PostingUnsupported(source.display_name));
        }
        let connector = self
            .registry
            .get(kind)
            .map_err(|_| ServiceError::PostingUnsupported(source.display_name.clone()))?;

        let connection = self
            .connections
            .find(review.business_id, source_id)
            .await?
            .filter(|connection| {
                connection.is_connected() && connection.connection_type == ConnectionType::OAuth
            })
            .ok_or_else(|| {
                ServiceError::NotConnected(format!("{} account not connected", source.display_name))
            })?;

        let location_id = self
            .enabled_sources
            .find(review.business_id, source_id)
            .await?
            .and_then(|enabled| enabled.location().map(str::to_string))
            .ok_or_else(|| {
                ServiceError::LocationNotConfigured(format!(
                    "{} location is not configured",
                    source.display_name
                ))
            })?;
        let account_id = connection
            .account_id()
            .map(str::to_string)
            .ok_or_else(|| {
                ServiceError::LocationNotConfigured(format!(
                    "No {} account is linked to this connection. Please reconnect.",
                    source.display_name
                ))
            })?;

        let fresh = self
            .token_refresh
            .ensure_fresh_token(connector.as_ref(), connection)
            .await?;

        connector
            .post_reply(
                &fresh.access_token,
                &ListingRef {
                    account_id,
                    location_id,
                },
                &external_review_id,
                text,
            )
            .await
            .map_err(|err| err.into_service_error(kind))?;

        let posted = self.reviews.set_status(review, ReviewStatus::Posted).await?;
        metrics::counter!("replies_posted_total").increment(1);
        info!(review_id = %posted.id, "Reply posted to provider");
        Ok(posted)
    }
}
