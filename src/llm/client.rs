//! OpenAI-compatible LLM client.
//!
//! This client works with any OpenAI-compatible API endpoint. It performs a
//! single request per call; retries live in [`super::retry`] so they also
//! cover malformed responses.

use crate::config::LlmConfig;
use crate::error::{PageIndexError, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Message role in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

/// A message in the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    // Some gateways send `null` content on refusals.
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Token accounting reported by the endpoint.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

/// One completion.
#[derive(Debug, Clone)]
pub struct Completion {
    pub content: String,
    /// Reason the model stopped generating.
    pub finish_reason: Option<String>,
    pub usage: Option<TokenUsage>,
}

impl Completion {
    /// The answer hit the token limit and is probably cut off.
    pub fn truncated(&self) -> bool {
        self.finish_reason.as_deref() == Some("length")
    }
}

/// Turn a raw response body into a completion or a classified error.
fn parse_completion(status: u16, body: &str) -> Result<Completion> {
    if !(200..300).contains(&status) {
        let message = match serde_json::from_str::<ApiError>(body) {
            Ok(api_error) => api_error.error.message,
            Err(_) => body.chars().take(500).collect(),
        };
        return Err(PageIndexError::ApiStatus { status, message });
    }

    let response: ChatCompletionResponse = serde_json::from_str(body)?;
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| PageIndexError::LlmApi("No choices in response".to_string()))?;
    let content = choice
        .message
        .content
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| PageIndexError::LlmParse("empty completion".to_string()))?;

    Ok(Completion {
        content,
        finish_reason: choice.finish_reason,
        usage: response.usage,
    })
}

/// OpenAI-compatible LLM client.
#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    config: LlmConfig,
}

impl LlmClient {
    /// Create a new LLM client with the given configuration.
    pub fn new(config: LlmConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();
        Self { client, config }
    }

    /// Same endpoint and credentials, different model.
    pub fn with_model(&self, model: impl Into<String>) -> Self {
        let mut config = self.config.clone();
        config.model = model.into();
        Self {
            client: self.client.clone(),
            config,
        }
    }

    /// Model this client talks to.
    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn endpoint(&self) -> String {
        let base = self.config.api_base.trim_end_matches('/');
        format!("{}/v1/chat/completions", base)
    }

    /// Send a chat completion request.
    pub async fn chat(&self, messages: &[Message]) -> Result<Completion> {
        let request = ChatCompletionRequest {
            model: &self.config.model,
            messages,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?;
        let status = response.status().as_u16();
        let body = response.text().await?;

        let completion = parse_completion(status, &body)?;
        if let Some(usage) = completion.usage {
            debug!(
                model = %self.config.model,
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "chat completion"
            );
        }
        if completion.truncated() {
            warn!(model = %self.config.model, max_tokens = self.config.max_tokens, "completion hit the token limit");
        }
        Ok(completion)
    }

    /// Single user message with optional system prompt.
    pub async fn complete(&self, system: Option<&str>, user: &str) -> Result<String> {
        let mut messages = Vec::with_capacity(2);
        if let Some(sys) = system {
            messages.push(Message::system(sys));
        }
        messages.push(Message::user(user));

        Ok(self.chat(&messages).await?.content)
    }

    /// Test connectivity to the API.
    pub async fn test_connection(&self) -> Result<()> {
        let reply = self.complete(None, "Say 'hello' and nothing else.").await?;
        if reply.to_lowercase().contains("hello") {
            Ok(())
        } else {
            Err(PageIndexError::LlmApi(format!("Unexpected response: {}", reply)))
        }
    }
}
