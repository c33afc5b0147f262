use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while calling the external text-generation endpoint.
///
/// None of these are fatal to a query; they trigger the degraded-answer path.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// Transport failure or timeout before a response arrived.
    #[error("Generation request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Endpoint responded with an unexpected status code.
    #[error("Unexpected generation response ({status}): {body}")]
    UnexpectedStatus {
        /// HTTP status returned by the endpoint.
        status: reqwest::StatusCode,
        /// Body payload associated with the failing response.
        body: String,
    },
    /// Response parsed but contained no generated text.
    #[error("Generation response contained no choices")]
    EmptyResponse,
}

/// Black-box text-generation collaborator: prompt in, generated text out.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Generate an answer for the assembled prompt.
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError>;
}

/// Client for an OpenAI-compatible chat-completions endpoint.
///
/// The original system consumed the hosted NVIDIA Llama endpoint through this
/// wire shape; any compatible service works. The request timeout is enforced
/// at the HTTP client level so a slow endpoint degrades the query instead of
/// hanging it.
pub struct HttpGenerationClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl HttpGenerationClient {
    /// Construct a client for the given endpoint, model, and timeout budget.
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, GenerationError> {
        let client = Client::builder()
            .user_agent("manualkb/0.2")
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
        })
    }
}

#[async_trait]
impl GenerationClient for HttpGenerationClient {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "user", "content": prompt }
            ],
            "temperature": 0.2,
        });

        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body);
        if let Some(api_key) = &self.api_key
            && !api_key.is_empty()
        {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::UnexpectedStatus { status, body });
        }

        let completion: ChatCompletionResponse = response.json().await?;
        completion
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(GenerationError::EmptyResponse)
    }
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}
