//! AI collaborator used to classify review sentiment and draft replies.

pub mod gateway;

use async_trait::async_trait;
use thiserror::Error;

use crate::error::ServiceError;
use crate::models::review::Sentiment;

pub use gateway::GatewayAiClient;

/// What the model needs to know about a review.
#[derive(Debug, Clone)]
pub struct ReviewPrompt {
    pub reviewer_name: String,
    pub rating: i32,
    pub text: String,
}

#[derive(Debug, Clone, Error)]
pub enum AiError {
    #[error("AI gateway rate limited the request")]
    RateLimited { retry_after: Option<u64> },
    #[error("AI credits exhausted")]
    QuotaExhausted,
    #[error("AI gateway is not configured: {0}")]
    NotConfigured(String),
    #[error("AI gateway returned status {status}")]
    Http { status: u16, body: Option<String> },
    #[error("AI gateway request failed: {0}")]
    Transport(String),
    #[error("AI gateway returned an unusable completion: {0}")]
    EmptyCompletion(String),
}

impl From<AiError> for ServiceError {
    fn from(error: AiError) -> Self {
        match error {
            AiError::RateLimited { retry_after } => ServiceError::RateLimited { retry_after },
            AiError::QuotaExhausted => ServiceError::QuotaExhausted,
            AiError::NotConfigured(details) => ServiceError::Configuration(details),
            AiError::Http { status, body } => ServiceError::Provider {
                provider: "ai_gateway".to_string(),
                status,
                body,
            },
            AiError::Transport(details) | AiError::EmptyCompletion(details) => {
                ServiceError::Provider {
                    provider: "ai_gateway".to_string(),
                    status: 502,
                    body: Some(details),
                }
            }
        }
    }
}

#[async_trait]
pub trait AiClient: Send + Sync {
    /// Model identifier recorded on generated responses.
    fn model(&self) -> &str;

    async fn classify_sentiment(&self, review: &ReviewPrompt) -> Result<Sentiment, AiError>;

    /// Drafts a reply in a tone suited to `sentiment`.
    async fn draft_reply(
        &self,
        review: &ReviewPrompt,
        sentiment: Sentiment,
    ) -> Result<String, AiError>;
}
