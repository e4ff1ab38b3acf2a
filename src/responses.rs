//! # Response Lifecycle
//!
//! AI-drafted replies move through `pending -> approved` or
//! `pending -> rejected -> (regenerated) pending`. Approval of an externally
//! sourced review also publishes the reply; a failed publish is reported next
//! to the approval instead of undoing it.

use regex::Regex;
use sea_orm::{DatabaseConnection, TransactionTrait};
use serde::Serialize;
use std::sync::{Arc, OnceLock};
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::ai::{AiClient, ReviewPrompt};
use crate::error::{ServiceError, is_unique_violation};
use crate::models::generated_response::{self, ApprovalStatus};
use crate::models::review::{self, ReviewStatus, Sentiment};
use crate::posting::ReplyPoster;
use crate::repositories::generated_response::validate_response_text;
use crate::repositories::{
    BusinessRepository, GeneratedResponseRepository, ReviewRepository, SourceRepository,
};

const PLACEHOLDER_PATTERN: &str = r"(?i)\[\s*(?:customer|reviewer|guest)?[ _]?name\s*\]|\{\{?\s*(?:customer|reviewer|guest)?_?name\s*\}\}?|<\s*(?:customer|reviewer|guest)?[ _]?name\s*>";
const SALUTATION_PATTERN: &str = r"(?i)^(?:dear|hi|hello|hey)\b[^,\n]{0,60},\s*";

fn placeholder_regex() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(PLACEHOLDER_PATTERN).ok()).as_ref()
}

fn salutation_regex() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(SALUTATION_PATTERN).ok()).as_ref()
}

/// Makes a drafted reply address the reviewer by name.
///
/// Template placeholders become the name, and the reply always opens with
/// `Dear {name},`; any other greeting line the model wrote is replaced.
pub fn personalize_reply(draft: &str, reviewer_name: &str) -> String {
    let name = reviewer_name.trim();
    let mut body = draft.trim().to_string();

    if let Some(placeholders) = placeholder_regex() {
        body = placeholders
            .replace_all(&body, regex::NoExpand(name))
            .into_owned();
    }

    let greeting = format!("Dear {name},");
    if body.starts_with(&greeting) {
        return body;
    }
    if let Some(salutation) = salutation_regex() {
        body = salutation.replace(&body, "").into_owned();
    }
    format!("{greeting}\n\n{}", body.trim_start())
}

/// Result of the posting step of an approval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PostingOutcome {
    Posted,
    Skipped { reason: String },
    Failed { code: String, message: String },
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApproveOutcome {
    #[schema(value_type = Object)]
    pub response: generated_response::Model,
    pub posting: PostingOutcome,
}

#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub review: review::Model,
    pub response: generated_response::Model,
}

#[derive(Clone)]
pub struct ResponseLifecycle {
    pub db: Arc<DatabaseConnection>,
    pub businesses: BusinessRepository,
    pub sources: SourceRepository,
    pub reviews: ReviewRepository,
    pub responses: GeneratedResponseRepository,
    pub ai: Arc<dyn AiClient>,
    pub poster: ReplyPoster,
}

impl ResponseLifecycle {
    async fn owned_review(&self, caller: Uuid, review_id: Uuid) -> Result<review::Model, ServiceError> {
        let review = self.reviews.get(review_id).await?;
        self.businesses.get_owned(review.business_id, caller).await?;
        Ok(review)
    }

    async fn owned_response(
        &self,
        caller: Uuid,
        response_id: Uuid,
    ) -> Result<(generated_response::Model, review::Model), ServiceError> {
        let response = self.responses.get(response_id).await?;
        let review = self.owned_review(caller, response.review_id).await?;
        Ok((response, review))
    }

    fn prompt(review: &review::Model) -> ReviewPrompt {
        ReviewPrompt {
            reviewer_name: review.reviewer_name.clone(),
            rating: review.rating,
            text: review.review_text.clone(),
        }
    }

    /// Classifies the review, drafts a reply and stores both.
    #[instrument(skip(self), fields(review_id = %review_id))]
    pub async fn analyze(
        &self,
        caller: Uuid,
        review_id: Uuid,
    ) -> Result<AnalysisOutcome, ServiceError> {
        let review = self.owned_review(caller, review_id).await?;
        if review.review_text.trim().is_empty() {
            return Err(ServiceError::invalid_input(
                "review_text",
                "must not be empty to analyze",
            ));
        }
        if self.responses.find_by_review(review.id).await?.is_some() {
            return Err(ServiceError::Conflict(
                "This review already has a response".to_string(),
            ));
        }

        let prompt = Self::prompt(&review);
        let sentiment = self.ai.classify_sentiment(&prompt).await?;
        let draft = self.ai.draft_reply(&prompt, sentiment).await?;
        let text = personalize_reply(&draft, &review.reviewer_name);
        let text = validate_response_text(&text)?.to_string();

        let txn = self.db.begin().await?;
        let response = GeneratedResponseRepository::insert(
            &txn,
            review.id,
            &text,
            Some(self.ai.model()),
        )
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                ServiceError::Conflict("This review already has a response".to_string())
            } else {
                ServiceError::Database(err)
            }
        })?;
        let review = ReviewRepository::record_analysis(&txn, review, sentiment).await?;
        txn.commit().await?;

        metrics::counter!("reviews_analyzed_total", "sentiment" => sentiment.as_str())
            .increment(1);
        info!(
            review_id = %review.id,
            response_id = %response.id,
            sentiment = sentiment.as_str(),
            "Review analyzed"
        );
        Ok(AnalysisOutcome { review, response })
    }

    /// Approves a draft and publishes it when the review's platform allows.
    #[instrument(skip(self), fields(response_id = %response_id))]
    pub async fn approve(
        &self,
        caller: Uuid,
        response_id: Uuid,
    ) -> Result<ApproveOutcome, ServiceError> {
        let (response, review) = self.owned_response(caller, response_id).await?;
        match response.approval_status {
            ApprovalStatus::Pending | ApprovalStatus::Approved => {}
            ApprovalStatus::Rejected => {
                return Err(ServiceError::InvalidTransition(
                    "A rejected response must be regenerated before it can be approved"
                        .to_string(),
                ));
            }
        }

        // An edit resets approval, so an approved reply on a posted review is
        // exactly the text the platform already shows.
        let unchanged_since_post = response.approval_status == ApprovalStatus::Approved
            && review.status == ReviewStatus::Posted;
        let response = self
            .responses
            .set_status(response, ApprovalStatus::Approved)
            .await?;
        let posting = if unchanged_since_post {
            PostingOutcome::Skipped {
                reason: "Reply was already posted".to_string(),
            }
        } else {
            self.publish(review, &response.response_text).await?
        };

        Ok(ApproveOutcome { response, posting })
    }

    async fn publish(
        &self,
        review: review::Model,
        text: &str,
    ) -> Result<PostingOutcome, ServiceError> {
        if !review.is_externally_sourced() {
            return Ok(PostingOutcome::Skipped {
                reason: "Review was entered manually; copy the reply to the platform yourself"
                    .to_string(),
            });
        }
        if let Some(source_id) = review.source_id {
            let (source, kind) = self.sources.get_with_kind(source_id).await?;
            if !kind.supports_reply_posting() {
                return Ok(PostingOutcome::Skipped {
                    reason: format!("{} does not support posting replies", source.display_name),
                });
            }
        }

        let review_id = review.id;
        match self.poster.post(review, text).await {
            Ok(_) => Ok(PostingOutcome::Posted),
            Err(err) => {
                warn!(review_id = %review_id, error = %err, "Approved reply could not be posted");
                Ok(PostingOutcome::Failed {
                    code: err.code().to_string(),
                    message: err.to_string(),
                })
            }
        }
    }

    /// Replaces the reply text; the edited reply needs approval again.
    #[instrument(skip(self, new_text), fields(response_id = %response_id))]
    pub async fn edit(
        &self,
        caller: Uuid,
        response_id: Uuid,
        new_text: &str,
    ) -> Result<generated_response::Model, ServiceError> {
        let text = validate_response_text(new_text)?;
        let (response, _review) = self.owned_response(caller, response_id).await?;
        if response.approval_status == ApprovalStatus::Rejected {
            return Err(ServiceError::InvalidTransition(
                "A rejected response cannot be edited; regenerate it instead".to_string(),
            ));
        }
        Ok(self.responses.set_text(response, text).await?)
    }

    #[instrument(skip(self), fields(response_id = %response_id))]
    pub async fn reject(
        &self,
        caller: Uuid,
        response_id: Uuid,
    ) -> Result<generated_response::Model, ServiceError> {
        let (response, review) = self.owned_response(caller, response_id).await?;
        if review.status == ReviewStatus::Posted {
            return Err(ServiceError::InvalidTransition(
                "The reply is already posted and can no longer be rejected".to_string(),
            ));
        }
        if response.approval_status == ApprovalStatus::Rejected {
            return Err(ServiceError::InvalidTransition(
                "Response is already rejected".to_string(),
            ));
        }
        Ok(self
            .responses
            .set_status(response, ApprovalStatus::Rejected)
            .await?)
    }

    /// Replaces a rejected response with a fresh draft.
    ///
    /// `response_id` defaults to the review's current response.
    #[instrument(skip(self), fields(review_id = %review_id))]
    pub async fn regenerate(
        &self,
        caller: Uuid,
        review_id: Uuid,
        response_id: Option<Uuid>,
    ) -> Result<generated_response::Model, ServiceError> {
        let review = self.owned_review(caller, review_id).await?;
        let rejected = match response_id {
            Some(id) => self.responses.get(id).await?,
            None => self
                .responses
                .find_by_review(review.id)
                .await?
                .ok_or(ServiceError::NotFound("Response"))?,
        };
        if rejected.review_id != review.id {
            return Err(ServiceError::invalid_input(
                "response_id",
                "does not belong to this review",
            ));
        }
        if rejected.approval_status != ApprovalStatus::Rejected {
            return Err(ServiceError::InvalidTransition(
                "Only rejected responses can be regenerated".to_string(),
            ));
        }

        let prompt = Self::prompt(&review);
        let sentiment = match review.sentiment {
            Some(sentiment) => sentiment,
            None => self.ai.classify_sentiment(&prompt).await?,
        };
        let draft = self.ai.draft_reply(&prompt, sentiment).await?;
        let text = personalize_reply(&draft, &review.reviewer_name);
        let text = validate_response_text(&text)?;

        let txn = self.db.begin().await?;
        GeneratedResponseRepository::delete(&txn, rejected.id).await?;
        let replacement =
            GeneratedResponseRepository::insert(&txn, review.id, text, Some(self.ai.model()))
                .await?;
        if review.sentiment.is_none() {
            ReviewRepository::record_analysis(&txn, review, sentiment).await?;
        }
        txn.commit().await?;

        info!(
            replaced = %rejected.id,
            response_id = %replacement.id,
            "Response regenerated"
        );
        Ok(replacement)
    }
}

/// Sentiment label for display, e.g. in success messages.
pub fn sentiment_label(sentiment: Option<Sentiment>) -> &'static str {
    sentiment.map(|s| s.as_str()).unwrap_or("unknown")
}
