//! Chat-completion client for the warehouse's assistant: walks an ordered
//! model fallback list, normalizes conversation shape before sending, and
//! logs each interaction.
pub mod cache;
pub mod convo;

use crate::cache::{ModelCache, SystemClock};
use crate::convo::{normalize, Message, Role};
use chrono::TimeDelta;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::{info, warn};

/// Models tried in order until one answers.
pub const FALLBACK_MODELS: [&str; 3] = ["gpt-4o", "gpt-4o-mini", "gpt-3.5-turbo"];

/// How long one model listing stays good for.
const MODEL_CACHE_TTL_MINUTES: i64 = 10;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("chat provider request failed: {0}")]
    Provider(String),

    #[error("every fallback model failed; last error: {0}")]
    Exhausted(String),

    #[error("conversation has no user turn after normalization")]
    EmptyConversation,
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        Self::Provider(err.to_string())
    }
}

pub struct ChatClient {
    http_client: reqwest::Client,
    base_url: String,
    token: String,
    fallback: Vec<String>,
    cache: ModelCache,
}

impl ChatClient {
    pub fn new(http_client: reqwest::Client, base_url: String, token: String) -> Self {
        Self {
            http_client,
            base_url,
            token,
            fallback: FALLBACK_MODELS.iter().map(|model| model.to_string()).collect(),
            cache: ModelCache::new(TimeDelta::minutes(MODEL_CACHE_TTL_MINUTES), SystemClock),
        }
    }

    pub fn from_env(http_client: reqwest::Client) -> anyhow::Result<Self> {
        Ok(Self::new(
            http_client,
            std::env::var("OPENAI_URL")
                .unwrap_or_else(|_| "https://api.openai.com".to_string()),
            std::env::var("OPENAI_TOKEN")?,
        ))
    }

    /// Model ids the provider advertises; cached between calls.
    pub async fn list_models(&mut self) -> Result<Vec<String>, ChatError> {
        if let Some(models) = self.cache.get() {
            return Ok(models);
        }

        let response = self
            .http_client
            .get(format!("{}/v1/models", self.base_url))
            .bearer_auth(&self.token)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ChatError::Provider(format!(
                "model listing returned {}",
                response.status()
            )));
        }

        let listing: ModelListing = response.json().await?;
        let models: Vec<String> = listing.data.into_iter().map(|model| model.id).collect();
        self.cache.put(models.clone());
        Ok(models)
    }

    /// One assistant turn: normalize the conversation, then walk the
    /// fallback list until a model answers.
    pub async fn complete(&mut self, messages: Vec<Message>) -> Result<Reply, ChatError> {
        let conversation = normalize(messages);
        if !conversation.iter().any(|message| message.role == Role::User) {
            return Err(ChatError::EmptyConversation);
        }

        // prefer models the provider actually advertises, when the
        // listing is reachable
        let advertised = self.list_models().await.ok();
        let mut candidates: Vec<String> = match &advertised {
            Some(ids) => self
                .fallback
                .iter()
                .filter(|model| ids.contains(*model))
                .cloned()
                .collect(),
            None => self.fallback.clone(),
        };
        if candidates.is_empty() {
            candidates = self.fallback.clone();
        }

        let mut last_error = String::new();
        for model in &candidates {
            match self.try_model(model, &conversation).await {
                Ok(reply) => {
                    info!(
                        model = reply.model.as_str(),
                        turns = conversation.len(),
                        reply_chars = reply.content.len(),
                        "chat completion"
                    );
                    return Ok(reply);
                }
                Err(err) => {
                    warn!("model {model} failed: {err}; falling back");
                    last_error = err.to_string();
                }
            }
        }
        Err(ChatError::Exhausted(last_error))
    }

    async fn try_model(
        &self,
        model: &str,
        conversation: &[Message],
    ) -> Result<Reply, ChatError> {
        let response = self
            .http_client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(&self.token)
            .json(&json!({ "model": model, "messages": conversation }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ChatError::Provider(format!(
                "{model} returned {}",
                response.status()
            )));
        }

        let completion: Completion = response.json().await?;
        let choice = completion
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ChatError::Provider(format!("{model} returned no choices")))?;
        Ok(Reply {
            model: completion.model.unwrap_or_else(|| model.to_string()),
            content: choice.message.content,
        })
    }
}

/// The assistant's answer and the model that produced it.
#[derive(Debug)]
pub struct Reply {
    pub model: String,
    pub content: String,
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//
// Deserialization
//
////////////////////////////////////////////////////////////////////////////////////////////////////

// { "data": [ { "id": "gpt-4o", ... }, ... ] }
#[derive(Deserialize, Debug)]
struct ModelListing {
    data: Vec<ModelEntry>,
}

#[derive(Deserialize, Debug)]
struct ModelEntry {
    id: String,
}

// { "model": "gpt-4o", "choices": [ { "message": { "role": "assistant", "content": "..." } } ] }
#[derive(Deserialize, Debug)]
struct Completion {
    model: Option<String>,
    choices: Vec<Choice>,
}

#[derive(Deserialize, Debug)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize, Debug)]
struct ChoiceMessage {
    content: String,
}
