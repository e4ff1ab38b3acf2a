//! OpenAI-compatible chat completions client.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use super::{AiClient, AiError, ReviewPrompt};
use crate::config::AppConfig;
use crate::models::review::Sentiment;

const SENTIMENT_SYSTEM_PROMPT: &str = "You are a sentiment analysis expert. Analyze the review and respond with ONLY ONE WORD: 'positive', 'negative', or 'neutral'. No explanations, just the sentiment.";

const REPLY_SYSTEM_PROMPT: &str = "You are a professional customer service representative. Generate a thoughtful, empathetic response to this review. Address the reviewer by the exact name you are given, never a placeholder. Keep it concise (2-3 sentences), professional, and appropriate for the sentiment.";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChatChoiceMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

pub struct GatewayAiClient {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
}

impl GatewayAiClient {
    pub fn new(
        endpoint: String,
        api_key: Option<String>,
        model: String,
        timeout: Duration,
    ) -> Result<Self, AiError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AiError::NotConfigured(e.to_string()))?;
        Ok(Self {
            client,
            endpoint,
            api_key,
            model,
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, AiError> {
        Self::new(
            config.ai_gateway_url.clone(),
            config.ai_api_key.clone(),
            config.ai_model.clone(),
            config.http_timeout(),
        )
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String, AiError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| AiError::NotConfigured("AI service not configured".to_string()))?;

        let request = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| AiError::Transport(e.to_string()))?;

        let status = response.status();
        match status {
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get("Retry-After")
                    .and_then(|h| h.to_str().ok())
                    .and_then(|s| s.parse::<u64>().ok());
                return Err(AiError::RateLimited { retry_after });
            }
            StatusCode::PAYMENT_REQUIRED => return Err(AiError::QuotaExhausted),
            status if !status.is_success() => {
                let body = response.text().await.ok().filter(|b| !b.is_empty());
                warn!(status = status.as_u16(), "AI gateway request failed");
                return Err(AiError::Http {
                    status: status.as_u16(),
                    body,
                });
            }
            _ => {}
        }

        let completion: ChatResponse = response
            .json()
            .await
            .map_err(|e| AiError::Transport(format!("invalid completion body: {e}")))?;

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .and_then(|message| message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| AiError::EmptyCompletion("no choices in completion".to_string()))
    }
}

#[async_trait]
impl AiClient for GatewayAiClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn classify_sentiment(&self, review: &ReviewPrompt) -> Result<Sentiment, AiError> {
        let prompt = format!(
            "Analyze this {}-star review: \"{}\"",
            review.rating, review.text
        );
        let label = match self.complete(SENTIMENT_SYSTEM_PROMPT, &prompt).await {
            Ok(label) => label,
            // A blank answer is read as neutral; transport errors still fail.
            Err(AiError::EmptyCompletion(_)) => String::new(),
            Err(other) => return Err(other),
        };
        let sentiment = Sentiment::from_label(&label);
        debug!(sentiment = sentiment.as_str(), "Classified review sentiment");
        Ok(sentiment)
    }

    async fn draft_reply(
        &self,
        review: &ReviewPrompt,
        sentiment: Sentiment,
    ) -> Result<String, AiError> {
        let prompt = format!(
            "Generate a response to this {}-star review with {} sentiment, written by {}: \"{}\"",
            review.rating,
            sentiment.as_str(),
            review.reviewer_name,
            review.text
        );
        let reply = self.complete(REPLY_SYSTEM_PROMPT, &prompt).await?;
        Ok(reply.trim().to_string())
    }
}
