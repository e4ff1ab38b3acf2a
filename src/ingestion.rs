//! # Review Ingestion
//!
//! Pulls reviews for one enabled source from its provider and stores the ones
//! not seen before. Storage uniqueness on (business, source, external id) is
//! the duplicate guard; the existence check only saves a failed insert.

use metrics::counter;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::connectors::{ListingRef, ProviderReview, Registry};
use crate::error::ServiceError;
use crate::models::source_connection::ConnectionType;
use crate::repositories::review::{
    InsertOutcome, MAX_REVIEW_TEXT_LEN, MAX_REVIEWER_NAME_LEN, NewReview,
};
use crate::repositories::{
    BusinessRepository, EnabledSourceRepository, ReviewRepository, SourceConnectionRepository,
    SourceRepository,
};
use crate::token_refresh::TokenRefreshService;

/// Counts reported back to the caller after a sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct SyncSummary {
    /// Reviews returned by the provider
    pub total_fetched: usize,
    /// Reviews stored by this sync
    pub new_reviews: usize,
}

#[derive(Clone)]
pub struct ReviewIngestion {
    pub businesses: BusinessRepository,
    pub sources: SourceRepository,
    pub enabled_sources: EnabledSourceRepository,
    pub connections: SourceConnectionRepository,
    pub reviews: ReviewRepository,
    pub token_refresh: TokenRefreshService,
    pub registry: Arc<Registry>,
}

fn truncate_chars(value: &str, max: usize) -> String {
    match value.char_indices().nth(max) {
        Some((idx, _)) => value[..idx].to_string(),
        None => value.to_string(),
    }
}

impl ReviewIngestion {
    #[instrument(skip(self), fields(business_id = %business_id, source_id = %source_id))]
    pub async fn sync(
        &self,
        caller: Uuid,
        business_id: Uuid,
        source_id: Uuid,
    ) -> Result<SyncSummary, ServiceError> {
        let business = self.businesses.get_owned(business_id, caller).await?;
        let source = self
            .sources
            .find_by_id(source_id)
            .await?
            .ok_or(ServiceError::NotFound("Source"))?;

        let connection = self
            .connections
            .find(business_id, source_id)
            .await?
            .filter(|connection| connection.is_connected())
            .ok_or_else(|| {
                ServiceError::NotConnected(format!(
                    "{} is not connected. Please connect it first.",
                    source.display_name
                ))
            })?;

        // Checked before any network call.
        let location_id = self
            .enabled_sources
            .find(business_id, source_id)
            .await?
            .and_then(|enabled| enabled.location().map(str::to_string))
            .ok_or_else(|| {
                ServiceError::LocationNotConfigured(format!(
                    "{} location is not configured",
                    source.display_name
                ))
            })?;

        let kind = source
            .kind()
            .ok_or_else(|| ServiceError::SourceUnsupported(source.display_name.clone()))?;
        let connector = self
            .registry
            .get(kind)
            .map_err(|_| ServiceError::SourceUnsupported(source.display_name.clone()))?;

        if connection.connection_type != ConnectionType::OAuth {
            return Err(ServiceError::NotConnected(format!(
                "{} must be connected through its sign-in flow to sync reviews",
                source.display_name
            )));
        }

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

        let listing = ListingRef {
            account_id,
            location_id,
        };
        let fetched = connector
            .list_reviews(&fresh.access_token, &listing)
            .await
            .map_err(|err| err.into_service_error(kind))?;

        let mut summary = SyncSummary {
            total_fetched: fetched.len(),
            new_reviews: 0,
        };

        for review in fetched {
            if self
                .store(business.id, business.user_id, source_id, kind.display_name(), review)
                .await?
            {
                summary.new_reviews += 1;
            }
        }

        counter!("reviews_ingested_total").increment(summary.new_reviews as u64);
        info!(
            business_id = %business_id,
            source_id = %source_id,
            total_fetched = summary.total_fetched,
            new_reviews = summary.new_reviews,
            "Review sync complete"
        );
        Ok(summary)
    }

    /// Stores one provider review; returns whether a row was added.
    async fn store(
        &self,
        business_id: Uuid,
        owner_id: Uuid,
        source_id: Uuid,
        platform: &str,
        review: ProviderReview,
    ) -> Result<bool, ServiceError> {
        let Some(external_id) = review.external_id else {
            debug!("Skipping provider review without an identifier");
            return Ok(false);
        };

        if self
            .reviews
            .exists_external(business_id, source_id, &external_id)
            .await?
        {
            debug!(external_review_id = %external_id, "Review already stored");
            return Ok(false);
        }

        let outcome = self
            .reviews
            .insert(NewReview {
                business_id,
                user_id: owner_id,
                source_id: Some(source_id),
                source_platform: platform.to_string(),
                external_review_id: Some(external_id),
                reviewer_name: truncate_chars(&review.reviewer_name, MAX_REVIEWER_NAME_LEN),
                rating: review.rating.clamp(1, 5),
                review_text: truncate_chars(&review.text, MAX_REVIEW_TEXT_LEN),
                review_date: review.created_at,
            })
            .await?;

        Ok(matches!(outcome, InsertOutcome::Inserted(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("short", 10), "short");
        assert_eq!(truncate_chars("", 3), "");
    }
}
