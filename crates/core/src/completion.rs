use crate::error::ProviderError;
use crate::traits::{CompletionProvider, CompletionRequest};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_COMPLETION_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
pub const DEFAULT_COMPLETION_MODEL: &str = "openai/gpt-4o-mini";

/// Client for an OpenAI-compatible chat completions endpoint.
pub struct ChatCompletionClient {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl ChatCompletionClient {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            model: model.into(),
        })
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    max_tokens: usize,
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
    #[serde(default)]
    message: Option<AssistantMessage>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
}

fn first_completion(response: ChatResponse) -> Option<String> {
    let choice = response.choices.into_iter().next()?;
    let from_message = choice.message.and_then(|message| message.content);
    Some(from_message.or(choice.text).unwrap_or_default())
}

#[async_trait]
impl CompletionProvider for ChatCompletionClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError> {
        let body = ChatRequest {
            model: &self.model,
            max_tokens: request.max_tokens,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.user,
                },
            ],
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let details = response.text().await.unwrap_or_default();
            return Err(ProviderError::BackendResponse {
                backend: "completion".to_string(),
                details: format!("{status}: {details}"),
            });
        }

        let parsed: ChatResponse = response.json().await?;
        first_completion(parsed).ok_or_else(|| ProviderError::EmptyResponse(self.endpoint.clone()))
    }
}
